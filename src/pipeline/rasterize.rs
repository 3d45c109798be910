//! PDF rasterisation: render every page to an image, in page order.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which is CPU-bound
//! and not async-aware. `tokio::task::spawn_blocking` moves the work onto the
//! blocking pool so Tokio worker threads never stall during rendering.
//!
//! ## Contract
//!
//! 1. The PDF signature is checked before any rendering work starts.
//! 2. The page count is probed before the first page renders, so progress
//!    fractions are exact: `rendered / total`, reaching 1.0 on the last page.
//! 3. Pages render one at a time, ascending. Any page failure aborts the
//!    whole run; no partial image list is returned.
//! 4. A [`CancelToken`] is checked between pages, never mid-page.
//!
//! The pdfium specifics live behind [`RasterBackend`] so the ordering,
//! progress, and failure rules can be tested without a native library.

use crate::document::Document;
use crate::error::VoterListError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// A rendered page. The pixel buffer is shared, never mutated.
#[derive(Debug, Clone)]
pub struct PageImage {
    page: usize,
    image: Arc<DynamicImage>,
}

impl PageImage {
    /// `page` is 1-based.
    pub fn new(page: usize, image: DynamicImage) -> Self {
        Self {
            page,
            image: Arc::new(image),
        }
    }

    /// 1-based page number, matching PDF page order.
    pub fn page(&self) -> usize {
        self.page
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }
}

/// Pages rendered so far out of the document total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterProgress {
    pub rendered: usize,
    pub total: usize,
}

impl RasterProgress {
    /// `rendered / total`; exactly 1.0 once the last page is done.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.rendered as f64 / self.total as f64
    }
}

/// Cooperative cancellation flag, checked between pages.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why a backend could not open a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenError {
    PasswordRequired,
    WrongPassword,
    Corrupt(String),
    /// The rendering engine itself is unavailable.
    Backend(String),
}

/// An opened document that can render its pages.
pub trait PageSource {
    fn page_count(&self) -> usize;

    /// Render the page at 0-based `index`.
    fn render_page(&self, index: usize) -> Result<DynamicImage, String>;
}

/// Opens PDF bytes for rendering.
///
/// The opened document only lives for the duration of `session`, so engines
/// whose documents borrow a library handle can keep that handle local.
pub trait RasterBackend: Send + Sync {
    fn with_document(
        &self,
        bytes: &[u8],
        password: Option<&str>,
        session: &mut dyn FnMut(&dyn PageSource),
    ) -> Result<(), OpenError>;
}

/// Options for one rasterisation run.
#[derive(Debug, Clone, Default)]
pub struct RasterOptions {
    pub password: Option<String>,
    pub cancel: Option<CancelToken>,
}

/// Stage 1 of the pipeline.
#[derive(Clone)]
pub struct Rasterizer {
    backend: Arc<dyn RasterBackend>,
}

impl Rasterizer {
    pub fn new(backend: Arc<dyn RasterBackend>) -> Self {
        Self { backend }
    }

    /// Count pages without rendering anything.
    pub async fn page_count(
        &self,
        document: &Document,
        password: Option<String>,
    ) -> Result<usize, VoterListError> {
        document.validate()?;
        let backend = Arc::clone(&self.backend);
        let bytes = document.shared_bytes();
        let name = document.name().to_string();

        tokio::task::spawn_blocking(move || {
            let mut count = 0;
            backend
                .with_document(&bytes, password.as_deref(), &mut |source| {
                    count = source.page_count()
                })
                .map_err(|e| open_error(&name, e))?;
            Ok(count)
        })
        .await
        .map_err(|e| VoterListError::Internal(format!("Page-count task panicked: {}", e)))?
    }

    /// Render every page of `document`, reporting progress after each one.
    ///
    /// Returns images for pages `1..=N` in order, or the first error.
    pub async fn rasterize<F>(
        &self,
        document: &Document,
        options: &RasterOptions,
        mut on_progress: F,
    ) -> Result<Vec<PageImage>, VoterListError>
    where
        F: FnMut(RasterProgress) + Send + 'static,
    {
        // Fail fast, before a blocking thread is even scheduled.
        document.validate()?;

        let backend = Arc::clone(&self.backend);
        let bytes = document.shared_bytes();
        let name = document.name().to_string();
        let password = options.password.clone();
        let cancel = options.cancel.clone();

        tokio::task::spawn_blocking(move || {
            rasterize_blocking(
                backend.as_ref(),
                &bytes,
                &name,
                password.as_deref(),
                cancel.as_ref(),
                &mut on_progress,
            )
        })
        .await
        .map_err(|e| VoterListError::Internal(format!("Render task panicked: {}", e)))?
    }
}

/// Blocking implementation of page rendering.
fn rasterize_blocking(
    backend: &dyn RasterBackend,
    bytes: &[u8],
    name: &str,
    password: Option<&str>,
    cancel: Option<&CancelToken>,
    on_progress: &mut dyn FnMut(RasterProgress),
) -> Result<Vec<PageImage>, VoterListError> {
    let mut result = None;
    backend
        .with_document(bytes, password, &mut |source| {
            result = Some(render_pages(source, name, cancel, &mut *on_progress));
        })
        .map_err(|e| open_error(name, e))?;

    result.unwrap_or_else(|| {
        Err(VoterListError::Internal(
            "raster backend returned without opening the document".into(),
        ))
    })
}

fn render_pages(
    source: &dyn PageSource,
    name: &str,
    cancel: Option<&CancelToken>,
    on_progress: &mut dyn FnMut(RasterProgress),
) -> Result<Vec<PageImage>, VoterListError> {
    let total = source.page_count();
    if total == 0 {
        return Err(VoterListError::CorruptDocument {
            name: name.to_string(),
            detail: "document has no pages".into(),
        });
    }
    info!("PDF '{}' loaded: {} pages", name, total);

    let mut images = Vec::with_capacity(total);
    for index in 0..total {
        if cancel.is_some_and(CancelToken::is_cancelled) {
            return Err(VoterListError::Cancelled {
                completed: index,
                total,
            });
        }

        let page = index + 1;
        let image = source
            .render_page(index)
            .map_err(|detail| VoterListError::Render { page, detail })?;
        debug!(
            "Rendered page {} → {}x{} px",
            page,
            image.width(),
            image.height()
        );

        images.push(PageImage::new(page, image));
        on_progress(RasterProgress {
            rendered: page,
            total,
        });
    }

    Ok(images)
}

fn open_error(name: &str, e: OpenError) -> VoterListError {
    let name = name.to_string();
    match e {
        OpenError::PasswordRequired => VoterListError::PasswordRequired { name },
        OpenError::WrongPassword => VoterListError::WrongPassword { name },
        OpenError::Corrupt(detail) => VoterListError::CorruptDocument { name, detail },
        OpenError::Backend(detail) => VoterListError::PdfiumBindingFailed(detail),
    }
}

// ── pdfium backend ───────────────────────────────────────────────────────

/// Production backend over the pdfium C++ library.
///
/// pdfium is bound afresh for every document, inside the blocking task that
/// renders it; documents borrow the binding and never cross threads.
#[derive(Debug, Clone)]
pub struct PdfiumBackend {
    dpi: u32,
    max_pixels: u32,
}

impl PdfiumBackend {
    /// Check that pdfium can be bound, so a missing library fails before
    /// any job starts.
    pub fn bind(dpi: u32, max_pixels: u32) -> Result<Self, VoterListError> {
        bind_pdfium().map_err(VoterListError::PdfiumBindingFailed)?;
        Ok(Self { dpi, max_pixels })
    }

    fn render_config(&self) -> PdfRenderConfig {
        PdfRenderConfig::new()
            .scale_page_by_factor(self.dpi as f32 / 72.0)
            .set_maximum_width(self.max_pixels as i32)
            .set_maximum_height(self.max_pixels as i32)
    }
}

/// `PDFIUM_LIB_PATH` if set, else a library in the working directory, else
/// the system library path.
fn bind_pdfium() -> Result<Pdfium, String> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(path) if !path.is_empty() => Pdfium::bind_to_library(PathBuf::from(path)),
        _ => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| format!("{:?}", e))?;
    Ok(Pdfium::new(bindings))
}

impl RasterBackend for PdfiumBackend {
    fn with_document(
        &self,
        bytes: &[u8],
        password: Option<&str>,
        session: &mut dyn FnMut(&dyn PageSource),
    ) -> Result<(), OpenError> {
        let pdfium = bind_pdfium().map_err(OpenError::Backend)?;
        let document = pdfium
            .load_pdf_from_byte_slice(bytes, password)
            .map_err(|e| {
                let err_str = format!("{:?}", e);
                if err_str.contains("Password") || err_str.contains("password") {
                    if password.is_some() {
                        OpenError::WrongPassword
                    } else {
                        OpenError::PasswordRequired
                    }
                } else {
                    OpenError::Corrupt(err_str)
                }
            })?;

        session(&PdfiumSource {
            document,
            config: self.render_config(),
        });
        Ok(())
    }
}

struct PdfiumSource<'a> {
    document: PdfDocument<'a>,
    config: PdfRenderConfig,
}

impl PageSource for PdfiumSource<'_> {
    fn page_count(&self) -> usize {
        self.document.pages().len() as usize
    }

    fn render_page(&self, index: usize) -> Result<DynamicImage, String> {
        let page = self
            .document
            .pages()
            .get(index as u16)
            .map_err(|e| format!("{:?}", e))?;
        let bitmap = page
            .render_with_config(&self.config)
            .map_err(|e| format!("{:?}", e))?;
        Ok(bitmap.as_image())
    }
}
