//! Fax numbers in already-extracted document text
//!
//! Handles text dumped from printed directories, where numbers are written
//! as `(DDD-DDD-DDDD)`. Pages are separated by form feeds.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::records::UTF8_BOM;

// Safety: constant pattern, compile cannot fail.
static PAREN_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\((\d{3}-\d{3}-\d{4})\)").unwrap());

const PAGE_BREAK: char = '\x0c';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentHit {
    /// 1-based page number
    pub page: usize,
    pub fax_number: String,
    /// The line holding the number with one line either side
    pub context: String,
}

pub fn split_pages(text: &str) -> Vec<String> {
    text.split(PAGE_BREAK).map(str::to_string).collect()
}

pub fn scan_pages(pages: &[String]) -> Vec<DocumentHit> {
    let mut hits = Vec::new();

    for (page_index, page) in pages.iter().enumerate() {
        let lines: Vec<&str> = page.lines().collect();
        let mut seen = HashSet::new();

        for (line_index, line) in lines.iter().enumerate() {
            for caps in PAREN_NUMBER.captures_iter(line) {
                let number = caps[1].to_string();
                if !seen.insert(number.clone()) {
                    continue;
                }
                let from = line_index.saturating_sub(1);
                let to = (line_index + 2).min(lines.len());
                let context = lines[from..to]
                    .iter()
                    .map(|l| l.trim())
                    .filter(|l| !l.is_empty())
                    .collect::<Vec<_>>()
                    .join(" ");
                hits.push(DocumentHit {
                    page: page_index + 1,
                    fax_number: number,
                    context,
                });
            }
        }
    }

    hits
}

pub fn scan_file(path: &Path) -> Result<Vec<DocumentHit>> {
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(scan_pages(&split_pages(&text)))
}

/// CSV with a BOM and a `page,fax_number,context` header.
pub fn write_hits<W: Write>(mut writer: W, hits: &[DocumentHit]) -> Result<()> {
    writer.write_all(UTF8_BOM)?;
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(["page", "fax_number", "context"])?;
    for hit in hits {
        csv.write_record([hit.page.to_string(), hit.fax_number.clone(), hit.context.clone()])?;
    }
    csv.flush()?;
    Ok(())
}
