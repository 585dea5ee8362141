//! Parsed page model with typed navigation
//!
//! A [`Page`] owns the parsed HTML tree of one fetched document. Extraction
//! strategies never walk the tree ad hoc; they work on a [`Fragment`], which
//! is one or more sibling subtrees plus their flattened text, and use the
//! navigation helpers here (`descendants_matching`, `following_siblings_until`,
//! `next_element_sibling`).
//!
//! `scraper::Html` is not `Send`, so a `Page` must be built and dropped
//! between two `.await` points.

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};

// Safety: constant selector, parse cannot fail.
static TITLE_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());

/// Elements whose text content is never part of the visible page text.
const SKIPPED_TAGS: &[&str] = &["script", "style", "noscript", "template"];

/// Elements that start a new line in flattened text, so that adjacent cells
/// or paragraphs never fuse into one digit run.
const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "br", "dd", "div", "dl", "dt", "footer", "h1", "h2", "h3",
    "h4", "h5", "h6", "header", "li", "main", "nav", "ol", "p", "section", "table", "tbody",
    "td", "th", "thead", "tr", "ul",
];

pub struct Page {
    html: Html,
}

impl Page {
    pub fn parse(body: &str) -> Self {
        Self {
            html: Html::parse_document(body),
        }
    }

    pub fn html(&self) -> &Html {
        &self.html
    }

    /// Trimmed `<title>` text, if the document has a non-empty one.
    pub fn title(&self) -> Option<String> {
        self.html
            .select(&TITLE_SELECTOR)
            .next()
            .map(|t| t.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty())
    }

    /// The whole document as a single fragment.
    pub fn whole(&self) -> Fragment<'_> {
        Fragment::from_element(self.html.root_element())
    }
}

/// One or more sibling subtrees of a page, with their flattened text.
#[derive(Debug, Clone)]
pub struct Fragment<'a> {
    roots: Vec<ElementRef<'a>>,
    text: String,
}

impl<'a> Fragment<'a> {
    pub fn from_element(element: ElementRef<'a>) -> Self {
        Self {
            text: flatten_text(element),
            roots: vec![element],
        }
    }

    /// A heading plus every following sibling up to, but not including, the
    /// next heading of equal or higher level.
    ///
    /// Bare text nodes between the siblings are part of the section text.
    pub fn from_section(heading: ElementRef<'a>) -> Self {
        let level = heading_level(heading).unwrap_or(6);
        let mut roots = vec![heading];
        let mut text = flatten_text(heading);

        for node in heading.next_siblings() {
            if let Some(element) = ElementRef::wrap(node) {
                if heading_level(element).is_some_and(|l| l <= level) {
                    break;
                }
                text.push('\n');
                text.push_str(&flatten_text(element));
                roots.push(element);
            } else if let Some(t) = node.value().as_text() {
                text.push_str(t);
            }
        }

        Self { roots, text }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn roots(&self) -> &[ElementRef<'a>] {
        &self.roots
    }

    /// Every element in the fragment (roots included), in document order,
    /// for which `predicate` holds.
    pub fn descendants_matching<P>(&self, predicate: P) -> Vec<ElementRef<'a>>
    where
        P: Fn(ElementRef<'a>) -> bool,
    {
        self.roots
            .iter()
            .flat_map(|root| root.descendants())
            .filter_map(ElementRef::wrap)
            .filter(|el| predicate(*el))
            .collect()
    }

    pub fn select(&self, selector: &Selector) -> Vec<ElementRef<'a>> {
        self.descendants_matching(|el| selector.matches(&el))
    }
}

/// Visible text of an element subtree.
pub fn flatten_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in element.descendants() {
        if let Some(el) = node.value().as_element() {
            if BLOCK_TAGS.contains(&el.name()) && !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
        } else if let Some(text) = node.value().as_text() {
            let hidden = node.ancestors().any(|a| {
                a.value()
                    .as_element()
                    .is_some_and(|e| SKIPPED_TAGS.contains(&e.name()))
            });
            if !hidden {
                out.push_str(text);
            }
        }
    }
    out
}

/// `1..=6` for `h1`..`h6`, `None` for anything else.
pub fn heading_level(element: ElementRef<'_>) -> Option<u8> {
    match element.value().name() {
        "h1" => Some(1),
        "h2" => Some(2),
        "h3" => Some(3),
        "h4" => Some(4),
        "h5" => Some(5),
        "h6" => Some(6),
        _ => None,
    }
}

/// Element siblings after `element`, stopping before the first one for which
/// `stop` holds.
pub fn following_siblings_until<'a, P>(element: ElementRef<'a>, stop: P) -> Vec<ElementRef<'a>>
where
    P: Fn(ElementRef<'a>) -> bool,
{
    element
        .next_siblings()
        .filter_map(ElementRef::wrap)
        .take_while(|el| !stop(*el))
        .collect()
}

pub fn next_element_sibling(element: ElementRef<'_>) -> Option<ElementRef<'_>> {
    element.next_siblings().find_map(ElementRef::wrap)
}

pub fn parent_element(element: ElementRef<'_>) -> Option<ElementRef<'_>> {
    element.parent().and_then(ElementRef::wrap)
}

/// Lowercased `id` and `class` attribute values joined by a space.
pub fn id_and_class(element: ElementRef<'_>) -> String {
    let el = element.value();
    let mut out = String::new();
    if let Some(id) = el.attr("id") {
        out.push_str(id);
    }
    if let Some(class) = el.attr("class") {
        out.push(' ');
        out.push_str(class);
    }
    out.to_lowercase()
}
