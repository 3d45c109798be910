//! Output types: voter records, per-page reports, and the merged outcome.

use crate::error::{PageError, PartialExtractionLoss, VoterListError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One elector entry as printed on a voter-list page.
///
/// Every field is best-effort: an illegible or missing field is stored as an
/// empty string rather than rejecting the record. EPIC numbers are not
/// required to be unique across the result set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterRecord {
    pub name: String,
    pub age: Age,
    pub gender: String,
    pub address: String,
    /// Elector identification code (EPIC).
    pub epic_number: String,
}

impl VoterRecord {
    /// True when the model produced an entry with nothing in it.
    pub fn is_blank(&self) -> bool {
        self.name.is_empty()
            && self.age.is_empty()
            && self.gender.is_empty()
            && self.address.is_empty()
            && self.epic_number.is_empty()
    }
}

/// Age as extracted: a number when it parses, the raw text otherwise.
///
/// Serialises untagged, so JSON output carries `45` or `"४५ वर्षे?"` as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Age {
    Years(u32),
    Text(String),
}

impl Default for Age {
    fn default() -> Self {
        Age::Text(String::new())
    }
}

impl Age {
    /// Interpret printed age text. Devanagari digits (`०`–`९`) count as digits.
    pub fn from_text(raw: &str) -> Self {
        let trimmed = raw.trim();
        let ascii: String = trimmed.chars().map(devanagari_to_ascii_digit).collect();
        match ascii.parse::<u32>() {
            Ok(years) => Age::Years(years),
            Err(_) => Age::Text(trimmed.to_string()),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Age::Text(t) if t.is_empty())
    }

    pub fn years(&self) -> Option<u32> {
        match self {
            Age::Years(y) => Some(*y),
            Age::Text(_) => None,
        }
    }
}

impl fmt::Display for Age {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Age::Years(y) => write!(f, "{y}"),
            Age::Text(t) => f.write_str(t),
        }
    }
}

fn devanagari_to_ascii_digit(c: char) -> char {
    match c {
        '\u{0966}'..='\u{096F}' => char::from(b'0' + (c as u32 - 0x0966) as u8),
        other => other,
    }
}

/// What happened to one page during extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageReport {
    /// 1-based page number.
    pub page: usize,
    pub record_count: usize,
    /// Inference calls made for this page (1 + retries).
    pub attempts: u32,
    pub duration_ms: u64,
    /// `Some` when the page contributed zero records because it failed.
    pub error: Option<PageError>,
}

impl PageReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Merged result of an extraction run.
///
/// `records` are concatenated in page order; within a page they keep the
/// order the inference service returned. No deduplication, no sorting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionOutcome {
    pub records: Vec<VoterRecord>,
    /// One report per input page, in page order.
    pub pages: Vec<PageReport>,
}

impl ExtractionOutcome {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 1-based numbers of pages that failed.
    pub fn failed_pages(&self) -> Vec<usize> {
        self.pages
            .iter()
            .filter(|p| !p.succeeded())
            .map(|p| p.page)
            .collect()
    }

    pub fn page_errors(&self) -> impl Iterator<Item = &PageError> {
        self.pages.iter().filter_map(|p| p.error.as_ref())
    }

    /// `Some` when at least one page, but not every page, failed.
    pub fn partial_loss(&self) -> Option<PartialExtractionLoss> {
        let failed_pages = self.failed_pages();
        if failed_pages.is_empty() || failed_pages.len() == self.pages.len() {
            return None;
        }
        Some(PartialExtractionLoss {
            failed_pages,
            total_pages: self.pages.len(),
        })
    }

    /// Treat any page loss as an error.
    pub fn into_strict(self) -> Result<Self, VoterListError> {
        match self.partial_loss() {
            Some(loss) => Err(loss.into()),
            None => Ok(self),
        }
    }
}
