//! Error types for the voterlist-extract library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`VoterListError`] — **Fatal**: the job cannot produce a record set
//!   (not a PDF, unreadable structure, a page failed to rasterise, every page
//!   failed extraction). Returned as `Err(VoterListError)` from
//!   [`crate::job::Pipeline::run`] and the stage entry points.
//!
//! * [`PageError`] — **Non-fatal**: extraction failed for a single page
//!   (inference error, timeout, prose instead of JSON) but other pages are
//!   fine. Stored inside [`crate::record::PageReport`] so the job keeps the
//!   records from every page that did succeed.
//!
//! Rasterisation has no partial-success mode, so render failures are always
//! fatal; extraction does, so its per-page failures are absorbed unless total.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the voterlist-extract library.
#[derive(Debug, Error)]
pub enum VoterListError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The document does not carry a PDF signature.
    #[error("'{name}' is not a PDF file (first bytes: {magic:?}).\nPlease select a valid PDF file.")]
    InvalidFormat { name: String, magic: Vec<u8> },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF structure could not be parsed, so the page count is unknown.
    #[error("PDF '{name}' is corrupt: {detail}\nTry repairing with: qpdf input.pdf output.pdf")]
    CorruptDocument { name: String, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{name}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { name: String },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{name}'")]
    WrongPassword { name: String },

    /// One page failed to rasterise; no images are handed to extraction.
    #[error("Rasterisation failed for page {page}: {detail}")]
    Render { page: usize, detail: String },

    // ── Extraction errors ─────────────────────────────────────────────────
    /// Every page failed inference or parsing; the record set would be empty.
    #[error("Extraction failed on all {total} pages.\nFirst error: {first_error}")]
    Extraction { total: usize, first_error: String },

    /// Some pages succeeded but at least one failed.
    ///
    /// Only returned by [`crate::record::ExtractionOutcome::into_strict`]
    /// when the caller wants to treat any page loss as an error.
    #[error(transparent)]
    PartialExtractionLoss(#[from] PartialExtractionLoss),

    /// The job was cancelled between pages.
    #[error("Job cancelled after {completed} of {total} pages")]
    Cancelled { completed: usize, total: usize },

    /// A tracked job was started while another was still running.
    #[error("A job is already in progress ({status})")]
    JobInProgress { status: String },

    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Output errors ─────────────────────────────────────────────────────
    /// Could not create or write the output CSV file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// CSV serialisation failed.
    #[error("CSV encoding failed: {0}")]
    Csv(#[from] csv::Error),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Install libpdfium for your platform, then either:\n\
  • place it next to the binary or on the system library path, or\n\
  • set PDFIUM_LIB_PATH=/path/to/libpdfium.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl VoterListError {
    /// Whether re-running the same job unchanged could succeed.
    ///
    /// Input and structure errors need a different file; a total extraction
    /// failure may have been caused by a provider outage.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VoterListError::Extraction { .. } | VoterListError::Cancelled { .. }
        )
    }
}

/// Informational: some but not all pages failed extraction.
///
/// The job still succeeds with the records of the remaining pages. Surfaced
/// by [`crate::record::ExtractionOutcome::partial_loss`].
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
#[error("{}/{total_pages} pages produced no records (pages {failed_pages:?})", .failed_pages.len())]
pub struct PartialExtractionLoss {
    /// 1-based indices of the pages that contributed zero records.
    pub failed_pages: Vec<usize>,
    pub total_pages: usize,
}

/// A non-fatal error for a single page.
///
/// The page contributes zero records; the job continues unless ALL pages fail.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The inference call failed (after retries for transient errors).
    #[error("Page {page}: inference failed after {attempts} attempt(s): {detail}")]
    InferenceFailed {
        page: usize,
        attempts: u32,
        detail: String,
    },

    /// Every attempt timed out.
    #[error("Page {page}: inference timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },

    /// The response could not be parsed into a record list.
    #[error("Page {page}: response is not a record list: {detail}")]
    Unparseable { page: usize, detail: String },
}

impl PageError {
    /// 1-based page the error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::InferenceFailed { page, .. }
            | PageError::Timeout { page, .. }
            | PageError::Unparseable { page, .. } => *page,
        }
    }
}
