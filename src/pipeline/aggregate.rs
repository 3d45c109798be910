//! Extraction aggregation: run inference on every page, parse, merge.
//!
//! Pages are dispatched concurrently (up to `concurrency` in flight) but the
//! results are merged strictly in page order, so the final record list is
//! `page 1 records ++ page 2 records ++ …` regardless of which call finished
//! first.
//!
//! A failing page never aborts the job. It is recorded in its
//! [`PageReport`] and contributes zero records; only when every page fails
//! does the run return [`VoterListError::Extraction`].
//!
//! Retries: transient inference failures and timeouts are retried with
//! exponential backoff (`retry_backoff_ms * 2^(attempt-1)`, the exponent
//! capped at [`MAX_BACKOFF_DOUBLINGS`]). A response that
//! arrives but cannot be parsed is final for that page; asking again at
//! temperature 0 gives the same answer.

use crate::config::ExtractionConfig;
use crate::error::{PageError, VoterListError};
use crate::pipeline::inference::{InferenceCapability, InferenceError};
use crate::pipeline::parse::parse_records;
use crate::pipeline::rasterize::{CancelToken, PageImage};
use crate::progress::ProgressReporter;
use crate::record::{ExtractionOutcome, PageReport, VoterRecord};
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// Backoff stops doubling after this many retries.
pub const MAX_BACKOFF_DOUBLINGS: u32 = 10;

/// Delay before retry number `retry` (1-based).
fn backoff_ms(base_ms: u64, retry: u32) -> u64 {
    let doublings = retry.saturating_sub(1).min(MAX_BACKOFF_DOUBLINGS);
    base_ms.saturating_mul(1u64 << doublings)
}

/// Result of one page before merging.
struct PageResult {
    records: Vec<VoterRecord>,
    report: PageReport,
}

/// Stage 2 of the pipeline.
#[derive(Clone)]
pub struct Aggregator {
    inference: Arc<dyn InferenceCapability>,
    concurrency: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
    cancel: Option<CancelToken>,
}

impl Aggregator {
    pub fn new(inference: Arc<dyn InferenceCapability>, config: &ExtractionConfig) -> Self {
        Self {
            inference,
            concurrency: config.concurrency.max(1),
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            cancel: config.cancel_token.clone(),
        }
    }

    /// Extract records from `images` and merge them in page order.
    ///
    /// `images` must already be in ascending page order, as produced by
    /// [`crate::pipeline::rasterize::Rasterizer::rasterize`].
    pub async fn extract(
        &self,
        images: &[PageImage],
        progress: &ProgressReporter,
    ) -> Result<ExtractionOutcome, VoterListError> {
        let total = images.len();
        if total == 0 {
            return Err(VoterListError::Extraction {
                total: 0,
                first_error: "no pages to extract".into(),
            });
        }

        info!(
            "Extracting {} pages (concurrency: {})",
            total, self.concurrency
        );
        let done = AtomicUsize::new(0);

        let results: Vec<Option<PageResult>> = stream::iter(images.iter().map(|image| {
            let done = &done;
            async move {
                if self.is_cancelled() {
                    return None;
                }
                let result = self.extract_page(image).await;
                let page = result.report.page;
                match &result.report.error {
                    None => progress.page_extracted(page, total, result.records.len()),
                    Some(e) => progress.page_failed(page, total, &e.to_string()),
                }
                let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
                progress.report_extraction(finished, total);
                Some(result)
            }
        }))
        .buffered(self.concurrency)
        .collect()
        .await;

        if results.iter().any(Option::is_none) {
            return Err(VoterListError::Cancelled {
                completed: done.load(Ordering::SeqCst),
                total,
            });
        }

        let mut outcome = ExtractionOutcome::default();
        for result in results.into_iter().flatten() {
            outcome.records.extend(result.records);
            outcome.pages.push(result.report);
        }

        if outcome.pages.iter().all(|p| !p.succeeded()) {
            let first_error = outcome
                .page_errors()
                .next()
                .map(|e| e.to_string())
                .unwrap_or_default();
            return Err(VoterListError::Extraction { total, first_error });
        }

        if let Some(loss) = outcome.partial_loss() {
            warn!("Partial extraction: {}", loss);
        }
        info!(
            "Extracted {} records from {} pages",
            outcome.len(),
            total
        );
        Ok(outcome)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }

    /// Infer, retry if worthwhile, then parse a single page.
    async fn extract_page(&self, image: &PageImage) -> PageResult {
        let page = image.page();
        let start = Instant::now();
        let mut attempts = 0u32;

        let outcome: Result<Vec<VoterRecord>, PageError> = loop {
            if attempts > 0 {
                let backoff = backoff_ms(self.retry_backoff_ms, attempts);
                warn!(
                    "Page {}: retry {}/{} after {}ms",
                    page, attempts, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }
            attempts += 1;

            match self.inference.infer(image).await {
                Ok(raw) => {
                    break parse_records(&raw).map_err(|e| PageError::Unparseable {
                        page,
                        detail: e.to_string(),
                    })
                }
                Err(e) => {
                    warn!("Page {}: attempt {} failed: {}", page, attempts, e);
                    if e.is_retryable() && attempts <= self.max_retries {
                        continue;
                    }
                    break Err(match e {
                        InferenceError::Timeout { secs } => PageError::Timeout { page, secs },
                        other => PageError::InferenceFailed {
                            page,
                            attempts,
                            detail: other.to_string(),
                        },
                    });
                }
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        match outcome {
            Ok(records) => {
                debug!("Page {}: {} records in {}ms", page, records.len(), duration_ms);
                PageResult {
                    report: PageReport {
                        page,
                        record_count: records.len(),
                        attempts,
                        duration_ms,
                        error: None,
                    },
                    records,
                }
            }
            Err(error) => {
                warn!("{}", error);
                PageResult {
                    records: Vec::new(),
                    report: PageReport {
                        page,
                        record_count: 0,
                        attempts,
                        duration_ms,
                        error: Some(error),
                    },
                }
            }
        }
    }
}
