//! Caller-owned job state machine.
//!
//! The pipeline never owns this state; it only reports into it through the
//! [`crate::progress::ProgressListener`] events. A presentation layer holds a
//! [`PipelineState`] (or a [`SharedState`] when events arrive from several
//! tasks) and renders whatever [`JobStatus`] it is in.
//!
//! ```text
//!  Idle ──Start──▶ ReadingPdf ──Stage(Extracting)──▶ Extracting ──Completed──▶ Completed
//!   ▲                  │                                  │                       │
//!   │                  └──────────Failed──────────────────┴──────▶ Error          │
//!   └───────────────────────────────Reset─────────────────────────────┴───────────┘
//! ```
//!
//! A terminal state (`Completed` / `Error`) may be restarted directly with
//! `Start`; nothing from the previous run is resumed.

use crate::progress::ProgressListener;
use crate::record::{ExtractionOutcome, VoterRecord};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Active stage of a running job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobStage {
    ReadingPdf,
    Extracting,
}

/// Current status, with the payload that belongs to it.
#[derive(Debug, Clone, Default, Serialize)]
pub enum JobStatus {
    #[default]
    Idle,
    ReadingPdf {
        progress: u8,
    },
    Extracting {
        progress: u8,
    },
    Completed {
        outcome: ExtractionOutcome,
    },
    Error {
        message: String,
    },
}

impl JobStatus {
    pub fn is_busy(&self) -> bool {
        matches!(self, JobStatus::ReadingPdf { .. } | JobStatus::Extracting { .. })
    }

    fn name(&self) -> &'static str {
        match self {
            JobStatus::Idle => "Idle",
            JobStatus::ReadingPdf { .. } => "ReadingPdf",
            JobStatus::Extracting { .. } => "Extracting",
            JobStatus::Completed { .. } => "Completed",
            JobStatus::Error { .. } => "Error",
        }
    }
}

/// Inputs that drive [`PipelineState`] transitions.
#[derive(Debug, Clone)]
pub enum JobEvent {
    Start { file_name: Option<String> },
    Stage(JobStage),
    Progress(u8),
    Completed(ExtractionOutcome),
    Failed(String),
    Reset,
}

/// Rejected transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot apply {event} while {from}")]
pub struct InvalidTransition {
    pub from: &'static str,
    pub event: &'static str,
}

/// Status plus the name of the file being processed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineState {
    status: JobStatus,
    file_name: Option<String>,
}

impl PipelineState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> &JobStatus {
        &self.status
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    /// Percentage to display; 100 once completed, 0 when idle or failed.
    pub fn progress(&self) -> u8 {
        match self.status {
            JobStatus::ReadingPdf { progress } | JobStatus::Extracting { progress } => progress,
            JobStatus::Completed { .. } => 100,
            JobStatus::Idle | JobStatus::Error { .. } => 0,
        }
    }

    /// Records of a completed job; empty in every other state.
    pub fn records(&self) -> &[VoterRecord] {
        match &self.status {
            JobStatus::Completed { outcome } => &outcome.records,
            _ => &[],
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.status {
            JobStatus::Error { message } => Some(message),
            _ => None,
        }
    }

    /// Apply one event.
    pub fn apply(&mut self, event: JobEvent) -> Result<(), InvalidTransition> {
        let from = self.status.name();
        let reject = |event: &'static str| InvalidTransition { from, event };

        match event {
            JobEvent::Start { file_name } => {
                if self.status.is_busy() {
                    return Err(reject("Start"));
                }
                self.file_name = file_name;
                self.status = JobStatus::ReadingPdf { progress: 0 };
            }
            JobEvent::Stage(JobStage::ReadingPdf) => {
                if !matches!(self.status, JobStatus::ReadingPdf { .. }) {
                    return Err(reject("Stage(ReadingPdf)"));
                }
            }
            JobEvent::Stage(JobStage::Extracting) => match self.status {
                JobStatus::ReadingPdf { progress } | JobStatus::Extracting { progress } => {
                    self.status = JobStatus::Extracting { progress };
                }
                _ => return Err(reject("Stage(Extracting)")),
            },
            JobEvent::Progress(p) => match &mut self.status {
                JobStatus::ReadingPdf { progress } | JobStatus::Extracting { progress } => {
                    *progress = (*progress).max(p.min(100));
                }
                _ => return Err(reject("Progress")),
            },
            JobEvent::Completed(outcome) => {
                if !self.status.is_busy() {
                    return Err(reject("Completed"));
                }
                self.status = JobStatus::Completed { outcome };
            }
            JobEvent::Failed(message) => {
                // Failure may arrive before any stage event, e.g. a rejected upload.
                self.status = JobStatus::Error { message };
            }
            JobEvent::Reset => {
                self.status = JobStatus::Idle;
                self.file_name = None;
            }
        }
        Ok(())
    }
}

/// [`PipelineState`] behind a mutex, usable as a progress listener.
#[derive(Debug, Clone, Default)]
pub struct SharedState {
    inner: Arc<Mutex<PipelineState>>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, PipelineState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn apply(&self, event: JobEvent) -> Result<(), InvalidTransition> {
        self.lock().apply(event)
    }

    pub fn snapshot(&self) -> PipelineState {
        self.lock().clone()
    }
}

impl ProgressListener for SharedState {
    fn on_stage(&self, stage: JobStage) {
        if let Err(e) = self.apply(JobEvent::Stage(stage)) {
            tracing::debug!("ignored stage event: {e}");
        }
    }

    fn on_progress(&self, percent: u8) {
        if let Err(e) = self.apply(JobEvent::Progress(percent)) {
            tracing::debug!("ignored progress event: {e}");
        }
    }
}
