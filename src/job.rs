//! End-to-end extraction jobs: PDF in, ordered voter records out.
//!
//! A job runs two stages strictly in sequence:
//!
//! ```text
//! Document ──validate──▶ Rasterizer ──Vec<PageImage>──▶ Aggregator ──▶ ExtractionOutcome
//!            (signature)   0–30 %                          30–99 %          100 %
//! ```
//!
//! Extraction never starts before every page has rendered; a rendering
//! failure fails the whole job with no partial output.

use crate::config::ExtractionConfig;
use crate::csv_export;
use crate::document::{default_output_path, Document};
use crate::error::VoterListError;
use crate::pipeline::aggregate::Aggregator;
use crate::pipeline::inference::{InferenceCapability, VisionLlmInference};
use crate::pipeline::rasterize::{PdfiumBackend, RasterBackend, RasterOptions, Rasterizer};
use crate::progress::{Fanout, ProgressCallback, ProgressReporter};
use crate::record::ExtractionOutcome;
use crate::state::{JobEvent, JobStage, SharedState};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// A configured rasterizer + aggregator pair, reusable across documents.
#[derive(Clone)]
pub struct Pipeline {
    rasterizer: Rasterizer,
    aggregator: Aggregator,
    raster_options: RasterOptions,
    progress_callback: Option<ProgressCallback>,
}

impl Pipeline {
    /// Assemble a pipeline from explicit backends.
    pub fn new(
        backend: Arc<dyn RasterBackend>,
        inference: Arc<dyn InferenceCapability>,
        config: &ExtractionConfig,
    ) -> Self {
        Self {
            rasterizer: Rasterizer::new(backend),
            aggregator: Aggregator::new(inference, config),
            raster_options: RasterOptions {
                password: config.password.clone(),
                cancel: config.cancel_token.clone(),
            },
            progress_callback: config.progress_callback.clone(),
        }
    }

    /// Bind pdfium and resolve the LLM provider from `config`.
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, VoterListError> {
        let backend = PdfiumBackend::bind(config.dpi, config.max_rendered_pixels)?;
        let inference = VisionLlmInference::from_config(config)?;
        Ok(Self::new(Arc::new(backend), Arc::new(inference), config))
    }

    /// Run a job on `document`.
    ///
    /// Returns `Ok` even when some pages failed; see
    /// [`ExtractionOutcome::partial_loss`].
    pub async fn run(&self, document: &Document) -> Result<ExtractionOutcome, VoterListError> {
        let reporter = Arc::new(ProgressReporter::new(self.progress_callback.clone()));
        self.run_with(document, reporter).await
    }

    /// Run a job while driving `state` through its transitions.
    ///
    /// Fails with [`VoterListError::JobInProgress`] if `state` already has a
    /// job in flight.
    pub async fn run_tracked(
        &self,
        document: &Document,
        state: &SharedState,
    ) -> Result<ExtractionOutcome, VoterListError> {
        state
            .apply(JobEvent::Start {
                file_name: Some(document.name().to_string()),
            })
            .map_err(|e| VoterListError::JobInProgress {
                status: e.from.to_string(),
            })?;

        let tracker: ProgressCallback = Arc::new(state.clone());
        let mut listeners = vec![tracker];
        listeners.extend(self.progress_callback.clone());
        let fanout: ProgressCallback = Arc::new(Fanout(listeners));
        let reporter = Arc::new(ProgressReporter::new(Some(fanout)));

        let result = self.run_with(document, reporter).await;
        let event = match &result {
            Ok(outcome) => JobEvent::Completed(outcome.clone()),
            Err(e) => JobEvent::Failed(e.to_string()),
        };
        if let Err(e) = state.apply(event) {
            warn!("Job state not updated: {}", e);
        }
        result
    }

    async fn run_with(
        &self,
        document: &Document,
        reporter: Arc<ProgressReporter>,
    ) -> Result<ExtractionOutcome, VoterListError> {
        let start = Instant::now();
        document.validate()?;
        info!(
            "Starting extraction: {} ({} bytes)",
            document.name(),
            document.len()
        );

        // ── Stage 1: rasterise ───────────────────────────────────────────
        reporter.stage(JobStage::ReadingPdf);
        reporter.report(0);
        let raster_reporter = Arc::clone(&reporter);
        let images = self
            .rasterizer
            .rasterize(document, &self.raster_options, move |p| {
                raster_reporter.page_rendered(p.rendered, p.total);
                raster_reporter.report_raster_fraction(p.fraction());
            })
            .await?;

        // ── Stage 2: extract + merge ─────────────────────────────────────
        reporter.stage(JobStage::Extracting);
        let outcome = self.aggregator.extract(&images, &reporter).await?;
        reporter.report(100);

        info!(
            "Extraction complete: {} records, {}/{} pages, {}ms total",
            outcome.len(),
            outcome.pages.len() - outcome.failed_pages().len(),
            outcome.pages.len(),
            start.elapsed().as_millis()
        );
        Ok(outcome)
    }
}

/// Extract voter records from an in-memory document.
///
/// The document is validated before pdfium is bound or a provider resolved,
/// so a non-PDF fails fast without needing an API key.
pub async fn extract(
    document: &Document,
    config: &ExtractionConfig,
) -> Result<ExtractionOutcome, VoterListError> {
    document.validate()?;
    Pipeline::from_config(config)?.run(document).await
}

/// Extract voter records from a PDF on disk.
///
/// # Errors
/// Fatal errors only: unreadable file, not a PDF, locked or corrupt PDF,
/// rendering failure, or every page failing extraction.
pub async fn extract_file(
    path: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutcome, VoterListError> {
    let document = Document::from_path(path).await?;
    extract(&document, config).await
}

/// Extract and write the CSV export.
///
/// With `output` unset the CSV lands next to the input as
/// `<stem>_extracted.csv`. Returns the path written.
pub async fn extract_to_csv(
    input: impl AsRef<Path>,
    output: Option<&Path>,
    bom: bool,
    config: &ExtractionConfig,
) -> Result<(PathBuf, ExtractionOutcome), VoterListError> {
    let input = input.as_ref();
    let outcome = extract_file(input, config).await?;
    let path = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_output_path(input));
    csv_export::write_csv_file(&path, &outcome.records, bom).await?;
    Ok((path, outcome))
}

/// Synchronous wrapper around [`extract_file`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync(
    path: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutcome, VoterListError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| VoterListError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract_file(path, config))
}

/// Count the pages of a PDF without rendering or calling any model.
///
/// Does not require an LLM provider or API key.
pub async fn inspect(
    path: impl AsRef<Path>,
    password: Option<&str>,
) -> Result<usize, VoterListError> {
    let document = Document::from_path(path).await?;
    document.validate()?;
    let config = ExtractionConfig::default();
    let backend = PdfiumBackend::bind(config.dpi, config.max_rendered_pixels)?;
    Rasterizer::new(Arc::new(backend))
        .page_count(&document, password.map(str::to_string))
        .await
}
