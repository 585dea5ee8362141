//! Extraction engine
//!
//! Runs the pattern library over progressively broader parts of a page:
//! contact regions first, then the phone-anchored strategy over the whole
//! page, then every strategy over the whole page.

use crate::normalize::{is_plausible, normalize};
use crate::page::Page;
use crate::patterns::{PatternLibrary, Strategy};
use crate::region::{locate, RegionSource};
use std::fmt;
use tracing::debug;

/// Where on the page a match was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    ContactRegion(RegionSource),
    PhoneAnchor,
    WholePage,
}

impl fmt::Display for SearchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchScope::ContactRegion(source) => write!(f, "contact region ({})", source),
            SearchScope::PhoneAnchor => f.write_str("phone anchor on whole page"),
            SearchScope::WholePage => f.write_str("whole page"),
        }
    }
}

/// A normalized fax number and how it was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaxMatch {
    pub number: String,
    pub raw: String,
    pub strategy: Strategy,
    pub scope: SearchScope,
}

impl fmt::Display for FaxMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} via {} in {}", self.number, self.strategy, self.scope)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FaxExtractor {
    library: PatternLibrary,
}

impl FaxExtractor {
    pub fn new(library: PatternLibrary) -> Self {
        Self { library }
    }

    /// Parse `body` and extract from it. The parsed tree is dropped before
    /// this returns.
    pub fn extract_html(&self, body: &str) -> Option<FaxMatch> {
        let page = Page::parse(body);
        self.extract(&page)
    }

    pub fn extract(&self, page: &Page) -> Option<FaxMatch> {
        for region in locate(page) {
            if let Some(m) = self.library.first_match(&region.fragment) {
                if let Some(found) = accept(m.raw, m.strategy, SearchScope::ContactRegion(region.source)) {
                    return Some(found);
                }
            }
        }
        debug!("No fax number in contact regions, widening to whole page");

        let whole = page.whole();
        if let Some(m) = Strategy::PhoneAnchored.apply(&whole) {
            if let Some(found) = accept(m.raw, m.strategy, SearchScope::PhoneAnchor) {
                return Some(found);
            }
        }

        let m = self.library.first_match(&whole)?;
        accept(m.raw, m.strategy, SearchScope::WholePage)
    }
}

fn accept(raw: String, strategy: Strategy, scope: SearchScope) -> Option<FaxMatch> {
    if !is_plausible(&raw) {
        return None;
    }
    let number = normalize(&raw);
    debug!("Found fax number {} via {} in {}", number, strategy, scope);
    Some(FaxMatch {
        number,
        raw,
        strategy,
        scope,
    })
}
