//! Input/output record table
//!
//! The first column is always the organization name. An optional `URL`
//! column skips the search step for that row. The `FAX番号` and `エラー詳細`
//! columns are added when missing. Every other column is carried through
//! untouched.

use anyhow::{bail, Context, Result};
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::warn;

pub const NAME_HEADER: &str = "名称";
pub const URL_COLUMN: &str = "URL";
pub const FAX_COLUMN: &str = "FAX番号";
pub const ERROR_COLUMN: &str = "エラー詳細";

pub const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Record {
    pub name: String,
    pub url: Option<String>,
    pub fax: Option<String>,
    pub error_detail: Option<String>,
    /// Original cells of the row, in header order
    cells: Vec<String>,
}

impl Record {
    pub fn new(name: impl Into<String>, url: Option<&str>) -> Self {
        Self {
            name: name.into(),
            url: url.map(str::to_string),
            ..Self::default()
        }
    }

    pub fn with_fax(mut self, fax: impl Into<String>) -> Self {
        self.fax = Some(fax.into());
        self
    }

    /// Blank and missing fax values both count as absent.
    pub fn has_fax(&self) -> bool {
        self.fax.as_deref().is_some_and(|f| !f.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordTable {
    headers: Vec<String>,
    url_col: Option<usize>,
    fax_col: usize,
    error_col: usize,
    records: Vec<Record>,
}

fn non_empty(cell: &str) -> Option<String> {
    let trimmed = cell.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

impl RecordTable {
    /// Table with the standard name/URL/fax/error columns.
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            headers: vec![
                NAME_HEADER.to_string(),
                URL_COLUMN.to_string(),
                FAX_COLUMN.to_string(),
                ERROR_COLUMN.to_string(),
            ],
            url_col: Some(1),
            fax_col: 2,
            error_col: 3,
            records,
        }
    }

    pub fn from_csv_path(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("Failed to read input file: {}", path.display()))?;
        Self::from_csv_bytes(&bytes).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn from_csv_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(bytes);

        let mut headers: Vec<String> = reader
            .headers()
            .context("Failed to read CSV header row (input must be UTF-8)")?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        if headers.iter().all(|h| h.is_empty()) {
            bail!("CSV input has no header row");
        }

        let width = headers.len();
        let url_col = headers.iter().position(|h| h.eq_ignore_ascii_case(URL_COLUMN));
        let mut column = |name: &str| match headers.iter().position(|h| h == name) {
            Some(i) => i,
            None => {
                headers.push(name.to_string());
                headers.len() - 1
            }
        };
        let fax_col = column(FAX_COLUMN);
        let error_col = column(ERROR_COLUMN);

        let mut records = Vec::new();
        for (i, row) in reader.records().enumerate() {
            let row = row.with_context(|| format!("Failed to parse CSV row {}", i + 2))?;
            let mut cells: Vec<String> = row.iter().map(str::to_string).collect();
            if cells.len() > width {
                warn!("Row {} has {} cells for {} headers, extra cells dropped", i + 2, cells.len(), width);
                cells.truncate(width);
            }
            cells.resize(headers.len(), String::new());
            records.push(Record {
                name: cells[0].trim().to_string(),
                url: url_col.and_then(|c| non_empty(&cells[c])),
                fax: non_empty(&cells[fax_col]),
                error_detail: non_empty(&cells[error_col]),
                cells,
            });
        }

        Ok(Self {
            headers,
            url_col,
            fax_col,
            error_col,
            records,
        })
    }

    pub fn write_csv<W: Write>(&self, mut writer: W, bom: bool) -> Result<()> {
        if bom {
            writer.write_all(UTF8_BOM)?;
        }
        let mut csv = csv::WriterBuilder::new().flexible(true).from_writer(writer);
        csv.write_record(&self.headers)?;
        for record in &self.records {
            csv.write_record(self.row(record))?;
        }
        csv.flush()?;
        Ok(())
    }

    fn row(&self, record: &Record) -> Vec<String> {
        let mut cells = record.cells.clone();
        if cells.len() < self.headers.len() {
            cells.resize(self.headers.len(), String::new());
        }
        cells[0] = record.name.clone();
        if let Some(c) = self.url_col {
            cells[c] = record.url.clone().unwrap_or_default();
        }
        cells[self.fax_col] = record.fax.clone().unwrap_or_default();
        cells[self.error_col] = record.error_detail.clone().unwrap_or_default();
        cells
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut [Record] {
        &mut self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
