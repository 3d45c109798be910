//! Integration tests for voterlist-extract.
//!
//! The pipeline runs against an in-memory raster backend and a scripted
//! inference capability, so these tests need neither pdfium nor network.
//! One live test at the bottom is gated behind `E2E_ENABLED` and
//! `VOTERLIST_TEST_PDF`.
//!
//! Run with:
//!   cargo test --test pipeline -- --nocapture

use async_trait::async_trait;
use image::{DynamicImage, Rgba, RgbaImage};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use voterlist_extract::{
    write_csv_file, Document, ExtractionConfig, InferenceCapability, InferenceError, JobStage,
    JobEvent, JobStatus, OpenError, PageError, PageImage, PageSource, Pipeline, ProgressCallback,
    ProgressListener, RasterBackend, SharedState, VoterListError, CSV_HEADER,
};

// ── Test helpers ─────────────────────────────────────────────────────────────

/// In-memory "PDF" with `pages` pages; `fail_at` (1-based) cannot render.
struct MemoryBackend {
    pages: usize,
    fail_at: Option<usize>,
}

struct MemorySource(usize, Option<usize>);

impl PageSource for MemorySource {
    fn page_count(&self) -> usize {
        self.0
    }

    fn render_page(&self, index: usize) -> Result<DynamicImage, String> {
        if self.1 == Some(index + 1) {
            return Err("render failed".into());
        }
        Ok(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            8,
            8,
            Rgba([255, 255, 255, 255]),
        )))
    }
}

impl RasterBackend for MemoryBackend {
    fn with_document(
        &self,
        _bytes: &[u8],
        _password: Option<&str>,
        session: &mut dyn FnMut(&dyn PageSource),
    ) -> Result<(), OpenError> {
        session(&MemorySource(self.pages, self.fail_at));
        Ok(())
    }
}

/// Answers each page with a fixed reply.
struct ScriptedInference {
    replies: HashMap<usize, Result<String, InferenceError>>,
    calls: Mutex<Vec<usize>>,
}

impl ScriptedInference {
    fn new(replies: Vec<(usize, Result<String, InferenceError>)>) -> Arc<Self> {
        Arc::new(Self {
            replies: replies.into_iter().collect(),
            calls: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl InferenceCapability for ScriptedInference {
    async fn infer(&self, page: &PageImage) -> Result<String, InferenceError> {
        self.calls.lock().unwrap().push(page.page());
        self.replies
            .get(&page.page())
            .cloned()
            .unwrap_or_else(|| Ok("[]".into()))
    }
}

#[derive(Default)]
struct Recorder {
    percents: Mutex<Vec<u8>>,
    stages: Mutex<Vec<JobStage>>,
}

impl ProgressListener for Recorder {
    fn on_stage(&self, stage: JobStage) {
        self.stages.lock().unwrap().push(stage);
    }

    fn on_progress(&self, percent: u8) {
        self.percents.lock().unwrap().push(percent);
    }
}

fn json_page(records: &[(&str, &str, &str, &str, &str)]) -> Result<String, InferenceError> {
    let items: Vec<serde_json::Value> = records
        .iter()
        .map(|(name, age, gender, address, epic)| {
            serde_json::json!({
                "name": name, "age": age, "gender": gender,
                "address": address, "epic_number": epic,
            })
        })
        .collect();
    Ok(serde_json::to_string(&items).unwrap())
}

fn pdf(name: &str) -> Document {
    Document::new(b"%PDF-1.5\n%\xE2\xE3\xCF\xD3\n".to_vec(), name)
}

fn pipeline(
    pages: usize,
    fail_at: Option<usize>,
    inference: Arc<ScriptedInference>,
    listener: Option<ProgressCallback>,
) -> Pipeline {
    let mut builder = ExtractionConfig::builder()
        .concurrency(2)
        .max_retries(0)
        .retry_backoff_ms(1);
    if let Some(l) = listener {
        builder = builder.progress_callback(l);
    }
    Pipeline::new(
        Arc::new(MemoryBackend { pages, fail_at }),
        inference,
        &builder.build().unwrap(),
    )
}

fn three_page_script() -> Arc<ScriptedInference> {
    ScriptedInference::new(vec![
        (
            1,
            json_page(&[
                ("राम पाटील", "45", "पुरुष", "घर क्र. 12, शिवाजी नगर", "ABC1234567"),
                ("सीता पाटील", "४१", "स्त्री", "घर क्र. 12, शिवाजी नगर", "ABC1234568"),
            ]),
        ),
        (2, Err(InferenceError::Timeout { secs: 120 })),
        (
            3,
            Ok(format!(
                "```json\n{}\n```",
                json_page(&[
                    ("गणेश जाधव", "33", "पुरुष", "7", "XYZ7654321"),
                    ("लता जाधव", "", "स्त्री", "7", ""),
                ])
                .unwrap()
            )),
        ),
    ])
}

// ── Pipeline ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_three_pages_with_one_timeout() {
    let recorder = Arc::new(Recorder::default());
    let outcome = pipeline(3, None, three_page_script(), Some(recorder.clone()))
        .run(&pdf("ward-12.pdf"))
        .await
        .expect("partial failure is still a success");

    let names: Vec<&str> = outcome.records.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["राम पाटील", "सीता पाटील", "गणेश जाधव", "लता जाधव"]);
    assert_eq!(outcome.records[1].age.years(), Some(41));
    assert!(outcome.records[3].age.is_empty());
    assert_eq!(outcome.records[3].epic_number, "");

    assert_eq!(outcome.failed_pages(), vec![2]);
    assert!(matches!(
        outcome.page_errors().next(),
        Some(PageError::Timeout { page: 2, .. })
    ));
    let loss = outcome.partial_loss().expect("page 2 lost");
    assert_eq!(loss.failed_pages, vec![2]);
    assert!(matches!(
        outcome.clone().into_strict(),
        Err(VoterListError::PartialExtractionLoss(_))
    ));

    let percents = recorder.percents.lock().unwrap().clone();
    assert!(percents.windows(2).all(|w| w[0] < w[1]), "{percents:?}");
    assert_eq!(percents.first(), Some(&0));
    assert!(percents.contains(&30));
    assert_eq!(percents.last(), Some(&100));
    assert_eq!(
        *recorder.stages.lock().unwrap(),
        vec![JobStage::ReadingPdf, JobStage::Extracting]
    );
}

#[tokio::test]
async fn test_wrong_file_type_fires_no_progress() {
    let recorder = Arc::new(Recorder::default());
    let inference = ScriptedInference::new(vec![]);
    let doc = Document::new(b"\x89PNG\r\n\x1a\n....".to_vec(), "photo.png");

    let err = pipeline(3, None, Arc::clone(&inference), Some(recorder.clone()))
        .run(&doc)
        .await
        .unwrap_err();

    assert!(matches!(err, VoterListError::InvalidFormat { .. }));
    assert!(recorder.percents.lock().unwrap().is_empty());
    assert!(inference.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_render_failure_aborts_before_extraction() {
    let inference = three_page_script();
    let err = pipeline(3, Some(2), Arc::clone(&inference), None)
        .run(&pdf("ward-12.pdf"))
        .await
        .unwrap_err();

    assert!(matches!(err, VoterListError::Render { page: 2, .. }));
    assert!(inference.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_all_pages_failing_is_fatal() {
    let inference = ScriptedInference::new(vec![
        (1, Ok("Sorry, I can't help with that.".into())),
        (2, Err(InferenceError::Rejected("401 Unauthorized".into()))),
    ]);
    let err = pipeline(2, None, inference, None)
        .run(&pdf("ward-12.pdf"))
        .await
        .unwrap_err();

    assert!(matches!(err, VoterListError::Extraction { total: 2, .. }));
}

#[tokio::test]
async fn test_tracked_run_drives_state() {
    let state = SharedState::new();
    let p = pipeline(3, None, three_page_script(), None);

    let outcome = p.run_tracked(&pdf("ward-12.pdf"), &state).await.unwrap();
    let snapshot = state.snapshot();
    assert!(matches!(snapshot.status(), JobStatus::Completed { .. }));
    assert_eq!(snapshot.progress(), 100);
    assert_eq!(snapshot.records().len(), outcome.len());
    assert_eq!(snapshot.file_name(), Some("ward-12.pdf"));

    let err = pipeline(3, Some(1), three_page_script(), None)
        .run_tracked(&pdf("other.pdf"), &state)
        .await
        .unwrap_err();
    assert!(matches!(err, VoterListError::Render { page: 1, .. }));
    assert!(state.snapshot().error().is_some());
}

#[tokio::test]
async fn test_tracked_run_rejects_a_second_job() {
    let state = SharedState::new();
    state
        .apply(JobEvent::Start {
            file_name: Some("first.pdf".into()),
        })
        .unwrap();
    let inference = three_page_script();

    let err = pipeline(3, None, Arc::clone(&inference), None)
        .run_tracked(&pdf("second.pdf"), &state)
        .await
        .unwrap_err();

    assert!(matches!(err, VoterListError::JobInProgress { .. }), "{err:?}");
    assert!(inference.calls.lock().unwrap().is_empty());
    assert_eq!(state.snapshot().file_name(), Some("first.pdf"));
}

// ── CSV ──────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_csv_round_trip() {
    let outcome = pipeline(3, None, three_page_script(), None)
        .run(&pdf("ward-12.pdf"))
        .await
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path: PathBuf = dir
        .path()
        .join(voterlist_extract::output_file_name("ward-12.pdf"));
    write_csv_file(&path, &outcome.records, false).await.unwrap();
    assert!(path.ends_with("ward-12_extracted.csv"));

    let mut rdr = csv::Reader::from_path(&path).unwrap();
    assert_eq!(
        rdr.headers().unwrap().iter().collect::<Vec<_>>(),
        CSV_HEADER.to_vec()
    );
    let rows: Vec<csv::StringRecord> = rdr.records().map(Result::unwrap).collect();
    assert_eq!(rows.len(), outcome.len());
    for (row, record) in rows.iter().zip(&outcome.records) {
        assert_eq!(&row[0], record.name);
        assert_eq!(&row[1], record.age.to_string());
        assert_eq!(&row[2], record.gender);
        assert_eq!(&row[3], record.address);
        assert_eq!(&row[4], record.epic_number);
    }
    assert_eq!(&rows[0][3], "घर क्र. 12, शिवाजी नगर");
}

// ── Live (gated) ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_live_extraction() {
    if std::env::var("E2E_ENABLED").is_err() {
        println!("SKIP — set E2E_ENABLED=1 to run e2e tests");
        return;
    }
    let Ok(path) = std::env::var("VOTERLIST_TEST_PDF") else {
        println!("SKIP — set VOTERLIST_TEST_PDF to a voter-list PDF");
        return;
    };

    let outcome = voterlist_extract::extract_file(&path, &ExtractionConfig::default())
        .await
        .expect("live extraction should succeed");
    println!(
        "{} records from {} pages",
        outcome.len(),
        outcome.pages.len()
    );
    assert!(!outcome.is_empty());
}
