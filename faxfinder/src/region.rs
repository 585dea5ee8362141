//! Contact region locator
//!
//! Narrows a page to the parts most likely to hold contact details. Elements
//! whose id or class mentions a contact keyword are preferred; when there are
//! none, sections introduced by a contact-ish heading are used instead.

use crate::page::{flatten_text, heading_level, id_and_class, Fragment, Page};
use std::fmt;

/// Lowercased keywords that mark contact information.
pub const CONTACT_KEYWORDS: &[&str] = &[
    "contact",
    "access",
    "info",
    "inquiry",
    "アクセス",
    "連絡",
    "お問い合わせ",
    "問い合わせ",
    "診療時間",
    "案内",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionSource {
    /// Matched on an element's id or class attribute
    Attribute,
    /// A heading and the siblings that follow it
    Heading,
}

impl fmt::Display for RegionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionSource::Attribute => f.write_str("id/class"),
            RegionSource::Heading => f.write_str("heading section"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContactRegion<'a> {
    pub source: RegionSource,
    pub fragment: Fragment<'a>,
}

fn mentions_contact(text: &str) -> bool {
    let lower = text.to_lowercase();
    CONTACT_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Contact regions of `page`, in document order. Empty when neither
/// attribute nor heading search finds anything.
pub fn locate(page: &Page) -> Vec<ContactRegion<'_>> {
    let whole = page.whole();

    let by_attribute: Vec<ContactRegion<'_>> = whole
        .descendants_matching(|el| mentions_contact(&id_and_class(el)))
        .into_iter()
        .map(|el| ContactRegion {
            source: RegionSource::Attribute,
            fragment: Fragment::from_element(el),
        })
        .collect();
    if !by_attribute.is_empty() {
        return by_attribute;
    }

    whole
        .descendants_matching(|el| heading_level(el).is_some() && mentions_contact(&flatten_text(el)))
        .into_iter()
        .map(|heading| ContactRegion {
            source: RegionSource::Heading,
            fragment: Fragment::from_section(heading),
        })
        .collect()
}
