//! # voterlist-extract
//!
//! Extract structured voter records from scanned Marathi voter-list PDFs
//! using Vision Language Models (VLMs).
//!
//! Electoral rolls are published as image-only PDFs: three columns of small
//! Devanagari text per page, no text layer. This crate rasterises each page
//! and asks a vision model to read the elector boxes, then merges the
//! answers into one ordered list of [`VoterRecord`]s ready for CSV export.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF bytes
//!  │
//!  ├─ 1. Validate   %PDF- signature check, before any work
//!  ├─ 2. Rasterise  pdfium, one page at a time, progress 0–30 %
//!  ├─ 3. Infer      concurrent VLM calls, one per page, with retry/backoff
//!  ├─ 4. Parse      tolerant JSON → VoterRecord list per page
//!  ├─ 5. Merge      page order, failed pages contribute nothing, 30–99 %
//!  └─ 6. Export     CSV: Name, Age, Gender, Address, EPIC Number
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use voterlist_extract::{extract_file, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / GEMINI_API_KEY / …
//!     let config = ExtractionConfig::default();
//!     let outcome = extract_file("ward-12.pdf", &config).await?;
//!     if let Some(loss) = outcome.partial_loss() {
//!         eprintln!("warning: {loss}");
//!     }
//!     print!("{}", voterlist_extract::to_csv_string(&outcome.records, false)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `voterlist` binary (clap + anyhow + indicatif + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod csv_export;
pub mod document;
pub mod error;
pub mod job;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod record;
pub mod state;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionConfig, ExtractionConfigBuilder};
pub use csv_export::{output_file_name, to_csv_string, write_csv, write_csv_file, CSV_HEADER};
pub use document::Document;
pub use error::{PageError, PartialExtractionLoss, VoterListError};
pub use job::{extract, extract_file, extract_sync, extract_to_csv, inspect, Pipeline};
pub use pipeline::aggregate::Aggregator;
pub use pipeline::inference::{InferenceCapability, InferenceError, VisionLlmInference};
pub use pipeline::rasterize::{
    CancelToken, OpenError, PageImage, PageSource, PdfiumBackend, RasterBackend, RasterOptions,
    RasterProgress, Rasterizer,
};
pub use progress::{NoopProgressListener, ProgressCallback, ProgressListener};
pub use record::{Age, ExtractionOutcome, PageReport, VoterRecord};
pub use state::{JobEvent, JobStage, JobStatus, PipelineState, SharedState};
