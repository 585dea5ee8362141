use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Result page in the shape of the HTML search endpoint: one
/// `a.result__a` anchor per URL.
pub fn search_results_html(urls: &[&str]) -> String {
    let items: String = urls
        .iter()
        .map(|u| format!(r#"<div class="result"><h2><a class="result__a" href="{}">result</a></h2></div>"#, u))
        .collect();
    format!("<html><body><div id=\"links\">{}</div></body></html>", items)
}

/// Answer the search for `query` with `urls`. Expects exactly `expected_calls` hits.
pub async fn mount_search(server: &MockServer, query: &str, urls: &[&str], expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path("/html/"))
        .and(query_param("q", query))
        .respond_with(html_response(&search_results_html(urls)))
        .expect(expected_calls)
        .mount(server)
        .await;
}

pub async fn mount_page(server: &MockServer, url_path: &str, html: &str) {
    Mock::given(method("GET"))
        .and(path(url_path))
        .respond_with(html_response(html))
        .mount(server)
        .await;
}

/// Serve `status` for the first `times` requests to `url_path`. Mount this
/// before the page itself so it takes precedence.
pub async fn mount_status(server: &MockServer, url_path: &str, status: u16, times: u64) {
    Mock::given(method("GET"))
        .and(path(url_path))
        .respond_with(ResponseTemplate::new(status))
        .up_to_n_times(times)
        .mount(server)
        .await;
}

fn html_response(html: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(html.as_bytes().to_vec(), "text/html; charset=utf-8")
}
