//! Progress-callback trait for job status and percentage events.
//!
//! Inject an [`Arc<dyn ProgressListener>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the job rasterises and extracts each page.
//!
//! The percentage contract is simple: an integer 0–100 that never decreases.
//! Rasterisation covers 0–30, extraction 30–99, and 100 is sent only once the
//! merged record set is ready. [`ProgressReporter`] enforces the contract so
//! listeners never see a value go backwards, even when pages finish
//! concurrently.
//!
//! # Example
//!
//! ```rust
//! use voterlist_extract::{ExtractionConfig, ProgressListener};
//! use std::sync::{Arc, atomic::{AtomicU8, Ordering}};
//!
//! struct LastPercent(AtomicU8);
//!
//! impl ProgressListener for LastPercent {
//!     fn on_progress(&self, percent: u8) {
//!         self.0.store(percent, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(Arc::new(LastPercent(AtomicU8::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::state::JobStage;
use std::sync::{Arc, Mutex};

/// Upper bound of the rasterisation share of the progress bar.
pub const RASTER_SHARE: u8 = 30;
/// Highest value reported before the job has fully completed.
pub const EXTRACTION_CEILING: u8 = 99;

/// Called by the pipeline as the job advances.
///
/// Implementations must be `Send + Sync`: extraction may finish pages on
/// different tasks. All methods have default no-op implementations so
/// callers only override what they care about.
pub trait ProgressListener: Send + Sync {
    /// The job entered a new stage.
    fn on_stage(&self, stage: JobStage) {
        let _ = stage;
    }

    /// Overall completion percentage, 0–100, never decreasing.
    fn on_progress(&self, percent: u8) {
        let _ = percent;
    }

    /// A page finished rasterising.
    fn on_page_rendered(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// A page's records were extracted.
    fn on_page_extracted(&self, page_num: usize, total_pages: usize, records: usize) {
        let _ = (page_num, total_pages, records);
    }

    /// A page contributed zero records because extraction failed.
    fn on_page_failed(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressListener;

impl ProgressListener for NoopProgressListener {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ProgressListener>;

/// Delivers every event to each listener in turn.
pub(crate) struct Fanout(pub(crate) Vec<ProgressCallback>);

impl ProgressListener for Fanout {
    fn on_stage(&self, stage: JobStage) {
        self.0.iter().for_each(|l| l.on_stage(stage));
    }

    fn on_progress(&self, percent: u8) {
        self.0.iter().for_each(|l| l.on_progress(percent));
    }

    fn on_page_rendered(&self, page_num: usize, total_pages: usize) {
        self.0
            .iter()
            .for_each(|l| l.on_page_rendered(page_num, total_pages));
    }

    fn on_page_extracted(&self, page_num: usize, total_pages: usize, records: usize) {
        self.0
            .iter()
            .for_each(|l| l.on_page_extracted(page_num, total_pages, records));
    }

    fn on_page_failed(&self, page_num: usize, total_pages: usize, error: &str) {
        self.0
            .iter()
            .for_each(|l| l.on_page_failed(page_num, total_pages, error));
    }
}

/// Forwards events to an optional listener, clamping percentages so they
/// never decrease and never exceed 100.
pub struct ProgressReporter {
    listener: Option<ProgressCallback>,
    // Held while the listener runs so concurrent reports arrive in order.
    last: Mutex<Option<u8>>,
}

impl ProgressReporter {
    pub fn new(listener: Option<ProgressCallback>) -> Self {
        Self {
            listener,
            last: Mutex::new(None),
        }
    }

    /// Report `percent`; dropped if it is not above the last reported value.
    pub fn report(&self, percent: u8) {
        let percent = percent.min(100);
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(*last, Some(prev) if percent <= prev) {
            return;
        }
        *last = Some(percent);
        if let Some(ref l) = self.listener {
            l.on_progress(percent);
        }
    }

    /// Map a rasterisation fraction (0.0–1.0) onto 0–[`RASTER_SHARE`].
    pub fn report_raster_fraction(&self, fraction: f64) {
        let fraction = fraction.clamp(0.0, 1.0);
        // Epsilon absorbs k/n rounding, e.g. (1/3) * 30 = 9.999…
        self.report((fraction * f64::from(RASTER_SHARE) + 1e-9).floor() as u8);
    }

    /// Map `done` of `total` extracted pages onto [`RASTER_SHARE`]–[`EXTRACTION_CEILING`].
    pub fn report_extraction(&self, done: usize, total: usize) {
        if total == 0 {
            return;
        }
        let span = f64::from(EXTRACTION_CEILING - RASTER_SHARE);
        let share = (done.min(total) as f64 / total as f64) * span;
        self.report(RASTER_SHARE + share.floor() as u8);
    }

    /// Last value delivered, if any.
    pub fn current(&self) -> Option<u8> {
        *self.last.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn stage(&self, stage: JobStage) {
        if let Some(ref l) = self.listener {
            l.on_stage(stage);
        }
    }

    pub fn page_rendered(&self, page_num: usize, total_pages: usize) {
        if let Some(ref l) = self.listener {
            l.on_page_rendered(page_num, total_pages);
        }
    }

    pub fn page_extracted(&self, page_num: usize, total_pages: usize, records: usize) {
        if let Some(ref l) = self.listener {
            l.on_page_extracted(page_num, total_pages, records);
        }
    }

    pub fn page_failed(&self, page_num: usize, total_pages: usize, error: &str) {
        if let Some(ref l) = self.listener {
            l.on_page_failed(page_num, total_pages, error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recording {
        values: Mutex<Vec<u8>>,
    }

    impl ProgressListener for Recording {
        fn on_progress(&self, percent: u8) {
            self.values.lock().unwrap().push(percent);
        }
    }

    #[test]
    fn noop_listener_does_not_panic() {
        let l = NoopProgressListener;
        l.on_stage(JobStage::ReadingPdf);
        l.on_progress(10);
        l.on_page_rendered(1, 3);
        l.on_page_extracted(1, 3, 12);
        l.on_page_failed(2, 3, "timeout");
    }

    #[test]
    fn reporter_never_goes_backwards() {
        let rec = Arc::new(Recording::default());
        let reporter = ProgressReporter::new(Some(rec.clone() as ProgressCallback));

        reporter.report(10);
        reporter.report(5);
        reporter.report(10);
        reporter.report(40);
        reporter.report(250);

        assert_eq!(*rec.values.lock().unwrap(), vec![10, 40, 100]);
        assert_eq!(reporter.current(), Some(100));
    }

    #[test]
    fn raster_fraction_maps_into_first_thirty_percent() {
        let rec = Arc::new(Recording::default());
        let reporter = ProgressReporter::new(Some(rec.clone() as ProgressCallback));

        reporter.report_raster_fraction(1.0 / 3.0);
        reporter.report_raster_fraction(2.0 / 3.0);
        reporter.report_raster_fraction(1.0);

        assert_eq!(*rec.values.lock().unwrap(), vec![10, 20, 30]);
    }

    #[test]
    fn extraction_share_stops_below_completion() {
        let rec = Arc::new(Recording::default());
        let reporter = ProgressReporter::new(Some(rec.clone() as ProgressCallback));

        reporter.report_raster_fraction(1.0);
        reporter.report_extraction(1, 2);
        reporter.report_extraction(2, 2);

        let values = rec.values.lock().unwrap().clone();
        assert_eq!(values, vec![30, 64, 99]);
    }

    #[test]
    fn reporter_without_listener_still_tracks() {
        let reporter = ProgressReporter::new(None);
        assert_eq!(reporter.current(), None);
        reporter.report(0);
        assert_eq!(reporter.current(), Some(0));
    }
}
