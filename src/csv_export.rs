//! CSV export of extracted voter records.
//!
//! Columns, in order: `Name, Age, Gender, Address, EPIC Number`. Quoting and
//! escaping follow RFC 4180 via the `csv` crate, so addresses containing
//! commas, quotes or newlines round-trip through any CSV reader.

use crate::error::VoterListError;
use crate::record::VoterRecord;
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Header row of every export.
pub const CSV_HEADER: [&str; 5] = ["Name", "Age", "Gender", "Address", "EPIC Number"];

/// UTF-8 byte-order mark; spreadsheet apps need it to detect Devanagari.
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Fallback stem when the source name is unknown or empty.
const FALLBACK_STEM: &str = "voter_data";

/// Write `records` as CSV to `writer`, header first.
pub fn write_csv<W: Write>(
    mut writer: W,
    records: &[VoterRecord],
    bom: bool,
) -> Result<(), VoterListError> {
    if bom {
        writer.write_all(UTF8_BOM).map_err(csv::Error::from)?;
    }

    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(CSV_HEADER)?;
    for r in records {
        let age = r.age.to_string();
        wtr.write_record([
            r.name.as_str(),
            age.as_str(),
            r.gender.as_str(),
            r.address.as_str(),
            r.epic_number.as_str(),
        ])?;
    }
    wtr.flush().map_err(csv::Error::from)?;
    Ok(())
}

/// Render `records` to an in-memory CSV string.
pub fn to_csv_string(records: &[VoterRecord], bom: bool) -> Result<String, VoterListError> {
    let mut buf = Vec::new();
    write_csv(&mut buf, records, bom)?;
    String::from_utf8(buf).map_err(|e| VoterListError::Internal(format!("CSV not UTF-8: {e}")))
}

/// Download name for the export: `<stem>_extracted.csv`.
///
/// `ward-12.pdf` → `ward-12_extracted.csv`; an empty name gives
/// `voter_data_extracted.csv`.
pub fn output_file_name(source_name: &str) -> String {
    let stem = Path::new(source_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| FALLBACK_STEM.to_string());
    format!("{stem}_extracted.csv")
}

/// Write the CSV to `path` atomically: temp file first, then rename.
pub async fn write_csv_file(
    path: &Path,
    records: &[VoterRecord],
    bom: bool,
) -> Result<(), VoterListError> {
    let content = to_csv_string(records, bom)?;
    let io_err = |source| VoterListError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }

    let tmp_path = path.with_extension("csv.tmp");
    tokio::fs::write(&tmp_path, content.as_bytes())
        .await
        .map_err(io_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(io_err)?;

    info!("Wrote {} records to {}", records.len(), path.display());
    Ok(())
}
