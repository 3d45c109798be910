//! Source document: the uploaded PDF bytes plus their display name.
//!
//! The bytes are shared behind an `Arc` so the blocking render task can hold
//! them without copying; nothing in the pipeline ever mutates them. The PDF
//! signature is checked here, before any rendering work starts, so a wrong
//! file type fails immediately with [`VoterListError::InvalidFormat`].

use crate::error::VoterListError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Every PDF starts with `%PDF-` followed by the version.
const PDF_SIGNATURE: &[u8] = b"%PDF-";

/// Readers tolerate junk before the header as long as it starts within this
/// many bytes; so do we.
const SIGNATURE_SEARCH_WINDOW: usize = 1024;

/// An immutable PDF byte blob with the name it was uploaded under.
#[derive(Clone)]
pub struct Document {
    bytes: Arc<[u8]>,
    name: String,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("name", &self.name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl Document {
    pub fn new(bytes: impl Into<Arc<[u8]>>, name: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            name: name.into(),
        }
    }

    /// Read a document from disk; the display name is the file name.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, VoterListError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => VoterListError::PermissionDenied {
                path: path.to_path_buf(),
            },
            std::io::ErrorKind::NotFound => VoterListError::FileNotFound {
                path: path.to_path_buf(),
            },
            _ => VoterListError::Internal(format!("reading {}: {e}", path.display())),
        })?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        debug!("Loaded '{}' ({} bytes)", name, bytes.len());
        Ok(Self::new(bytes, name))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn shared_bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Check the PDF container signature.
    pub fn validate(&self) -> Result<(), VoterListError> {
        if has_pdf_signature(&self.bytes) {
            return Ok(());
        }
        Err(VoterListError::InvalidFormat {
            name: self.name.clone(),
            magic: self.bytes.iter().take(4).copied().collect(),
        })
    }
}

/// True when `%PDF-` appears within the first kilobyte.
pub fn has_pdf_signature(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(SIGNATURE_SEARCH_WINDOW)];
    window
        .windows(PDF_SIGNATURE.len())
        .any(|w| w == PDF_SIGNATURE)
}

/// Path next to `input` for the CSV export, following [`crate::csv_export::output_file_name`].
pub fn default_output_path(input: &Path) -> PathBuf {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    input.with_file_name(crate::csv_export::output_file_name(&name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_pdf_header() {
        let doc = Document::new(b"%PDF-1.7\n...".to_vec(), "list.pdf");
        assert!(doc.validate().is_ok());
    }

    #[test]
    fn accepts_header_after_leading_junk() {
        let mut bytes = vec![b' '; 100];
        bytes.extend_from_slice(b"%PDF-1.4");
        assert!(has_pdf_signature(&bytes));
    }

    #[test]
    fn rejects_header_outside_window() {
        let mut bytes = vec![0u8; 2048];
        bytes.extend_from_slice(b"%PDF-1.4");
        assert!(!has_pdf_signature(&bytes));
    }

    #[test]
    fn rejects_png_with_magic_bytes() {
        let doc = Document::new(b"\x89PNG\r\n\x1a\n".to_vec(), "scan.png");
        match doc.validate() {
            Err(VoterListError::InvalidFormat { name, magic }) => {
                assert_eq!(name, "scan.png");
                assert_eq!(magic, b"\x89PNG".to_vec());
            }
            other => panic!("expected InvalidFormat, got {other:?}"),
        }
    }

    #[test]
    fn rejects_empty_and_short_input() {
        assert!(Document::new(Vec::new(), "empty.pdf").validate().is_err());
        assert!(Document::new(b"%PD".to_vec(), "short.pdf").validate().is_err());
    }

    #[tokio::test]
    async fn from_path_reports_missing_file() {
        let err = Document::from_path("/definitely/not/here.pdf")
            .await
            .unwrap_err();
        assert!(matches!(err, VoterListError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn from_path_uses_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ward 7.pdf");
        std::fs::write(&path, b"%PDF-1.5\n").unwrap();
        let doc = Document::from_path(&path).await.unwrap();
        assert_eq!(doc.name(), "ward 7.pdf");
        assert_eq!(doc.len(), 9);
    }

    #[test]
    fn default_output_path_sits_next_to_input() {
        let out = default_output_path(Path::new("/data/ward-12.pdf"));
        assert_eq!(out, PathBuf::from("/data/ward-12_extracted.csv"));
    }
}
