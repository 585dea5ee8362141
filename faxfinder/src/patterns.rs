//! Fax number extraction strategies
//!
//! Strategies are tried in a fixed order, most precise first:
//! 1. Explicit label: `FAX: 03-1234-5678`, `ＦＡＸ番号 ０３…`, `(FAX) …`
//! 2. Keyword proximity: the phone-shaped run closest to a fax keyword
//! 3. Phone anchored: a fax label within 150 characters after a TEL label
//! 4. Table: the cell next to (or below) a fax header cell
//! 5. Definition list: the `<dd>` after a fax `<dt>`
//! 6. Keyword containers: elements whose id or class mentions fax
//!
//! Every strategy is a pure function of a [`Fragment`] and only accepts a
//! span that normalizes to at least [`MIN_DIGITS`](crate::normalize::MIN_DIGITS)
//! digits.

use crate::normalize::is_plausible;
use crate::page::{flatten_text, id_and_class, next_element_sibling, Fragment};
use fancy_regex::Regex;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Selector};
use std::fmt;
use std::ops::Range;

/// Phone-shaped digit run: 2-5, 1-4 and 3-4 digit groups with optional
/// hyphen or parenthesis separators, half or full width.
const PHONE_BODY: &str =
    r"[(（]?[0-9０-９]{2,5}[-‐‑‒–−－()（）]?[0-9０-９]{1,4}[-‐‑‒–−－()（）]?[0-9０-９]{3,4}";

/// Characters allowed between a label and its number.
const LABEL_SEPARATORS: &str = r"(?:番号)?[\s　]*[)）]?[\s　:：.．/／\-－]*";

/// Lowercased spellings that mark a fax field.
pub const FAX_KEYWORDS: &[&str] = &["fax", "ｆａｘ", "ファックス", "ファクス"];

/// Lowercased spellings that mark a voice phone field.
pub const PHONE_KEYWORDS: &[&str] = &["tel", "ｔｅｌ", "phone", "電話"];

/// Largest distance, in characters, between a fax keyword and a candidate run.
pub const PROXIMITY_WINDOW: usize = 100;

/// How far past a TEL label the phone-anchored strategy looks.
pub const PHONE_ANCHOR_WINDOW: usize = 150;

// Safety: the patterns below are constants and compile.
pub static PHONE_SHAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?<![0-9０-９]){}(?![0-9０-９])", PHONE_BODY)).unwrap()
});

static FAX_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)(?<![a-z])(?:f[ \t.．]*a[ \t.．]*x|ＦＡＸ|ｆａｘ|ファックス|ファクス){}(?P<number>{})(?![0-9０-９])",
        LABEL_SEPARATORS, PHONE_BODY
    ))
    .unwrap()
});

static TEL_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)(?<![a-z])(?:tel|ＴＥＬ|ｔｅｌ|電話){}(?P<number>{})(?![0-9０-９])",
        LABEL_SEPARATORS, PHONE_BODY
    ))
    .unwrap()
});

static TABLE_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("table").unwrap());
static ROW_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").unwrap());
static DT_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("dt").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    ExplicitLabel,
    KeywordProximity,
    PhoneAnchored,
    Table,
    DefinitionList,
    KeywordContainer,
}

impl Strategy {
    /// Every strategy in priority order.
    pub const ALL: [Strategy; 6] = [
        Strategy::ExplicitLabel,
        Strategy::KeywordProximity,
        Strategy::PhoneAnchored,
        Strategy::Table,
        Strategy::DefinitionList,
        Strategy::KeywordContainer,
    ];

    pub fn apply(self, fragment: &Fragment<'_>) -> Option<ExtractionMatch> {
        let found = match self {
            Strategy::ExplicitLabel => explicit_label(fragment.text()),
            Strategy::KeywordProximity => keyword_proximity(fragment.text()),
            Strategy::PhoneAnchored => phone_anchored(fragment.text()),
            Strategy::Table => table(fragment),
            Strategy::DefinitionList => definition_list(fragment),
            Strategy::KeywordContainer => keyword_container(fragment),
        };
        found.map(|(raw, context)| ExtractionMatch {
            strategy: self,
            raw,
            context,
        })
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::ExplicitLabel => "explicit label",
            Strategy::KeywordProximity => "keyword proximity",
            Strategy::PhoneAnchored => "phone anchored",
            Strategy::Table => "table",
            Strategy::DefinitionList => "definition list",
            Strategy::KeywordContainer => "fax container",
        };
        f.write_str(name)
    }
}

/// Raw output of one strategy, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionMatch {
    pub strategy: Strategy,
    /// The matched digit span as it appeared on the page
    pub raw: String,
    /// Text the span was found in (label cell, label match, or nearby text)
    pub context: String,
}

/// Ordered set of strategies tried against a fragment.
#[derive(Debug, Clone)]
pub struct PatternLibrary {
    order: Vec<Strategy>,
}

impl Default for PatternLibrary {
    fn default() -> Self {
        Self {
            order: Strategy::ALL.to_vec(),
        }
    }
}

impl PatternLibrary {
    pub fn new(order: Vec<Strategy>) -> Self {
        Self { order }
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.order
    }

    /// First strategy match, in priority order.
    pub fn first_match(&self, fragment: &Fragment<'_>) -> Option<ExtractionMatch> {
        self.order.iter().find_map(|s| s.apply(fragment))
    }
}

/// Whether a label mentions fax and not a voice line.
pub fn is_fax_label(text: &str) -> bool {
    let lower = text.to_lowercase();
    FAX_KEYWORDS.iter().any(|k| lower.contains(k)) && !PHONE_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// First plausible phone-shaped run in `text` that no TEL label claims.
pub fn first_phone_run(text: &str) -> Option<String> {
    let claimed = claimed_by_phone_labels(text);
    PHONE_SHAPE
        .find_iter(text)
        .filter_map(Result::ok)
        .filter(|m| !claimed.iter().any(|c| overlaps(c, &m.range())))
        .map(|m| m.as_str())
        .find(|s| is_plausible(s))
        .map(str::to_string)
}

fn explicit_label(text: &str) -> Option<(String, String)> {
    FAX_LABEL
        .captures_iter(text)
        .filter_map(Result::ok)
        .find_map(|caps| {
            let number = caps.name("number")?.as_str();
            let whole = caps.get(0)?.as_str();
            is_plausible(number).then(|| (number.to_string(), whole.trim().to_string()))
        })
}

/// Byte ranges of numbers already claimed by a TEL label.
fn claimed_by_phone_labels(text: &str) -> Vec<Range<usize>> {
    TEL_LABEL
        .captures_iter(text)
        .filter_map(Result::ok)
        .filter_map(|caps| caps.name("number").map(|m| m.range()))
        .collect()
}

fn overlaps(a: &Range<usize>, b: &Range<usize>) -> bool {
    a.start < b.end && b.start < a.end
}

/// Byte offset to char offset lookup for one string.
struct CharOffsets(Vec<usize>);

impl CharOffsets {
    fn new(text: &str) -> Self {
        Self(text.char_indices().map(|(i, _)| i).collect())
    }

    fn of(&self, byte: usize) -> usize {
        self.0.partition_point(|&b| b < byte)
    }
}

/// Char ranges of every fax keyword occurrence, case-insensitive.
fn keyword_positions(text: &str) -> Vec<Range<usize>> {
    let lower: Vec<char> = text
        .chars()
        .map(|c| c.to_lowercase().next().unwrap_or(c))
        .collect();
    let mut found = Vec::new();
    for keyword in FAX_KEYWORDS {
        let needle: Vec<char> = keyword.chars().collect();
        if needle.len() > lower.len() {
            continue;
        }
        for start in 0..=(lower.len() - needle.len()) {
            if lower[start..start + needle.len()] == needle[..] {
                found.push(start..start + needle.len());
            }
        }
    }
    found.sort_by_key(|r| r.start);
    found
}

/// Picks, for the first keyword that has one, the plausible run with the
/// smallest gap to it. On a tie the run after the keyword wins.
fn keyword_proximity(text: &str) -> Option<(String, String)> {
    let claimed = claimed_by_phone_labels(text);
    let offsets = CharOffsets::new(text);

    let runs: Vec<(Range<usize>, &str)> = PHONE_SHAPE
        .find_iter(text)
        .filter_map(Result::ok)
        .filter(|m| is_plausible(m.as_str()))
        .filter(|m| !claimed.iter().any(|c| overlaps(c, &m.range())))
        .map(|m| (offsets.of(m.start())..offsets.of(m.end()), m.as_str()))
        .collect();

    for keyword in keyword_positions(text) {
        let mut best: Option<(usize, bool, &str)> = None;
        for (run, raw) in &runs {
            let (distance, after) = if run.start >= keyword.end {
                (run.start - keyword.end, true)
            } else if run.end <= keyword.start {
                (keyword.start - run.end, false)
            } else {
                continue;
            };
            if distance > PROXIMITY_WINDOW {
                continue;
            }
            let better = match best {
                None => true,
                Some((d, a, _)) => distance < d || (distance == d && after && !a),
            };
            if better {
                best = Some((distance, after, *raw));
            }
        }
        if let Some((_, _, raw)) = best {
            let context = text
                .chars()
                .skip(keyword.start.saturating_sub(20))
                .take(keyword.len() + 60)
                .collect::<String>();
            return Some((raw.to_string(), context.trim().to_string()));
        }
    }
    None
}

/// Looks for a fax label shortly after each TEL label. The window starts at
/// the end of the TEL match, so the phone number itself is never a candidate.
fn phone_anchored(text: &str) -> Option<(String, String)> {
    for caps in TEL_LABEL.captures_iter(text).filter_map(Result::ok) {
        let Some(tel) = caps.get(0) else { continue };
        let rest = &text[tel.end()..];
        let window_end = rest
            .char_indices()
            .nth(PHONE_ANCHOR_WINDOW)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        if let Some((number, label)) = explicit_label(&rest[..window_end]) {
            return Some((number, format!("{} {}", tel.as_str().trim(), label)));
        }
    }
    None
}

fn row_cells<'a>(row: ElementRef<'a>) -> Vec<ElementRef<'a>> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|el| matches!(el.value().name(), "td" | "th"))
        .collect()
}

fn table(fragment: &Fragment<'_>) -> Option<(String, String)> {
    for tbl in fragment.select(&TABLE_SELECTOR) {
        let rows: Vec<Vec<ElementRef<'_>>> = tbl.select(&ROW_SELECTOR).map(row_cells).collect();

        for (row_index, cells) in rows.iter().enumerate() {
            for (column, cell) in cells.iter().enumerate() {
                let label = flatten_text(*cell);
                if !is_fax_label(&label) {
                    continue;
                }
                let beside = cells[column + 1..]
                    .iter()
                    .find_map(|c| first_phone_run(&flatten_text(*c)));
                let below = || {
                    rows[row_index + 1..]
                        .iter()
                        .filter_map(|r| r.get(column))
                        .find_map(|c| first_phone_run(&flatten_text(*c)))
                };
                if let Some(raw) = beside.or_else(below) {
                    return Some((raw, label.trim().to_string()));
                }
            }
        }
    }
    None
}

fn definition_list(fragment: &Fragment<'_>) -> Option<(String, String)> {
    fragment.select(&DT_SELECTOR).into_iter().find_map(|dt| {
        let label = flatten_text(dt);
        if !is_fax_label(&label) {
            return None;
        }
        let dd = next_element_sibling(dt).filter(|el| el.value().name() == "dd")?;
        let raw = first_phone_run(&flatten_text(dd))?;
        Some((raw, label.trim().to_string()))
    })
}

fn keyword_container(fragment: &Fragment<'_>) -> Option<(String, String)> {
    fragment
        .descendants_matching(|el| id_and_class(el).contains("fax"))
        .into_iter()
        .find_map(|el| {
            let raw = first_phone_run(&flatten_text(el))?;
            Some((raw, id_and_class(el).trim().to_string()))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::Page;

    fn run(strategy: Strategy, html: &str) -> Option<String> {
        let page = Page::parse(html);
        strategy.apply(&page.whole()).map(|m| m.raw)
    }

    fn first(html: &str) -> Option<ExtractionMatch> {
        let page = Page::parse(html);
        PatternLibrary::default().first_match(&page.whole())
    }

    // ============ Explicit Label Tests ============

    #[test]
    fn test_explicit_label_variants() {
        let cases = [
            ("<p>FAX: 03-1234-5678</p>", "03-1234-5678"),
            ("<p>Fax 03(1234)5678</p>", "03(1234)5678"),
            ("<p>F.A.X. 0312345678</p>", "0312345678"),
            ("<p>ＦＡＸ番号：０３－１２３４－５６７８</p>", "０３－１２３４－５６７８"),
            ("<p>ファックス 045-123-4567</p>", "045-123-4567"),
            ("<p>(FAX) 06-6543-2100</p>", "06-6543-2100"),
            ("<p>ファクス／(03)1234-5678</p>", "(03)1234-5678"),
        ];
        for (html, expected) in cases {
            assert_eq!(run(Strategy::ExplicitLabel, html).as_deref(), Some(expected), "{}", html);
        }
    }

    #[test]
    fn test_explicit_label_ignores_words_ending_in_fax() {
        assert_eq!(run(Strategy::ExplicitLabel, "<p>Fairfax 03-1234-5678</p>"), None);
    }

    #[test]
    fn test_explicit_label_wins_over_bare_number() {
        let m = first("<div><p>Call 0311112222 anytime</p><p>FAX: 03-1234-5678</p></div>").unwrap();
        assert_eq!(m.strategy, Strategy::ExplicitLabel);
        assert_eq!(m.raw, "03-1234-5678");
    }

    #[test]
    fn test_short_runs_are_rejected() {
        assert_eq!(run(Strategy::ExplicitLabel, "<p>FAX: 12-345</p>"), None);
        assert!(first("<p>FAX: 12-3456</p>").is_none());
    }

    // ============ Keyword Proximity Tests ============

    #[test]
    fn test_proximity_picks_closest_run() {
        let html = "<p>03-1111-2222 is the office. Send to our fax machine at 03-3333-4444 please</p>";
        assert_eq!(run(Strategy::KeywordProximity, html).as_deref(), Some("03-3333-4444"));
    }

    #[test]
    fn test_proximity_tie_prefers_run_after_keyword() {
        let html = "<p>03-1111-2222 ファックス 04-2222-3333</p>";
        assert_eq!(run(Strategy::KeywordProximity, html).as_deref(), Some("04-2222-3333"));
    }

    #[test]
    fn test_proximity_respects_window() {
        let filler = "x".repeat(PROXIMITY_WINDOW + 1);
        let html = format!("<p>fax {} 03-1234-5678</p>", filler);
        assert_eq!(run(Strategy::KeywordProximity, &html), None);

        let filler = "x".repeat(PROXIMITY_WINDOW - 2);
        let html = format!("<p>fax {} 03-1234-5678</p>", filler);
        assert_eq!(run(Strategy::KeywordProximity, &html).as_deref(), Some("03-1234-5678"));
    }

    #[test]
    fn test_proximity_never_returns_tel_number() {
        let html = "<p>TEL: 03-1111-2222 / FAXはお問い合わせください</p>";
        assert_eq!(run(Strategy::KeywordProximity, html), None);

        let html = "<p>TEL: 03-1111-2222 FAX受付中 番号は 03-3333-4444</p>";
        assert_eq!(run(Strategy::KeywordProximity, html).as_deref(), Some("03-3333-4444"));
    }

    // ============ Phone Anchored Tests ============

    #[test]
    fn test_phone_anchored_finds_fax_after_tel() {
        let html = "<p>電話番号：03-1111-2222（受付 9:00-18:00）ＦＡＸ：03-3333-4444</p>";
        assert_eq!(run(Strategy::PhoneAnchored, html).as_deref(), Some("03-3333-4444"));
    }

    #[test]
    fn test_phone_anchored_window_is_bounded() {
        let filler = "あ".repeat(PHONE_ANCHOR_WINDOW);
        let html = format!("<p>TEL 03-1111-2222{}FAX 03-3333-4444</p>", filler);
        assert_eq!(run(Strategy::PhoneAnchored, &html), None);
    }

    #[test]
    fn test_phone_anchored_needs_a_tel_label() {
        assert_eq!(run(Strategy::PhoneAnchored, "<p>FAX 03-3333-4444</p>"), None);
    }

    // ============ Structural Tests ============

    #[test]
    fn test_table_same_row() {
        let html = "<table><tr><td>FAX</td><td>03-1111-2222</td></tr></table>";
        assert_eq!(run(Strategy::Table, html).as_deref(), Some("03-1111-2222"));
    }

    #[test]
    fn test_table_same_column_below() {
        let html = "<table><tr><th>TEL</th><th>FAX</th></tr>\
                    <tr><td>03-1111-2222</td><td>03-3333-4444</td></tr></table>";
        assert_eq!(run(Strategy::Table, html).as_deref(), Some("03-3333-4444"));
    }

    #[test]
    fn test_table_skips_combined_tel_fax_header() {
        let html = "<table><tr><td>TEL/FAX</td><td>03-1111-2222</td></tr></table>";
        assert_eq!(run(Strategy::Table, html), None);
    }

    #[test]
    fn test_definition_list() {
        let html = "<dl><dt>電話</dt><dd>03-1111-2222</dd><dt>ＦＡＸ</dt><dd>03-3333-4444</dd></dl>";
        assert_eq!(run(Strategy::DefinitionList, html).as_deref(), Some("03-3333-4444"));
    }

    #[test]
    fn test_keyword_container() {
        let html = "<div class='tel'>03-1111-2222</div><div class='shop-fax'>03-3333-4444</div>";
        assert_eq!(run(Strategy::KeywordContainer, html).as_deref(), Some("03-3333-4444"));
    }

    #[test]
    fn test_table_never_returns_tel_number() {
        let html = "<table><tr><th>FAX</th><td>TEL 03-1111-2222</td></tr></table>";
        assert_eq!(run(Strategy::Table, html), None);

        let html = "<table><tr><th>FAX</th><td>TEL 03-1111-2222 / 03-3333-4444</td></tr></table>";
        assert_eq!(run(Strategy::Table, html).as_deref(), Some("03-3333-4444"));
    }

    #[test]
    fn test_definition_list_never_returns_tel_number() {
        let html = "<dl><dt>FAX</dt><dd>電話 03-1111-2222</dd></dl>";
        assert_eq!(run(Strategy::DefinitionList, html), None);
    }

    #[test]
    fn test_keyword_container_never_returns_tel_number() {
        let html = "<p class='fax-tel'>TEL 03-1111-2222</p>";
        assert_eq!(run(Strategy::KeywordContainer, html), None);
        assert!(first(html).is_none());
    }

    #[test]
    fn test_first_phone_run_skips_claimed_numbers() {
        assert_eq!(first_phone_run("TEL：03-1111-2222"), None);
        assert_eq!(
            first_phone_run("TEL：03-1111-2222 03-3333-4444").as_deref(),
            Some("03-3333-4444")
        );
    }

    #[test]
    fn test_is_fax_label() {
        assert!(is_fax_label("FAX"));
        assert!(is_fax_label("ＦＡＸ番号"));
        assert!(is_fax_label("ファクス"));
        assert!(!is_fax_label("TEL / FAX"));
        assert!(!is_fax_label("電話・ファックス"));
        assert!(!is_fax_label("住所"));
    }

    #[test]
    fn test_strategy_display() {
        assert_eq!(Strategy::ExplicitLabel.to_string(), "explicit label");
        assert_eq!(Strategy::Table.to_string(), "table");
    }
}
