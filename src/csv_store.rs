//! Metadata CSV persistence
//!
//! Rows are appended as books finish so an interrupted run loses nothing.
//! The header is written only when the file is new or empty. A partial last
//! row left by an interrupted write is cut before anything is appended.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use csv::{ByteRecord, StringRecord};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{LibraryError, Result};
use crate::extractor::BookMetadata;

/// Append records to a CSV file
///
/// # Returns
/// Number of rows written
///
/// Fails with `LibraryError::Config` when the file already has a header
/// with different columns.
pub fn append_records<T: Serialize>(path: &Path, records: &[T]) -> Result<usize> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    drop_partial_row(path)?;

    let needs_header = fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
    if let (false, Some(first)) = (needs_header, records.first()) {
        let expected = header_of(first)?;
        let found = existing_header(path)?;
        if found.as_ref() != Some(&expected) {
            return Err(LibraryError::Config(format!(
                "{} has columns [{}], expected [{}]",
                path.display(),
                found.map(|h| h.iter().collect::<Vec<_>>().join(",")).unwrap_or_default(),
                expected.iter().collect::<Vec<_>>().join(","),
            )));
        }
    }

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(needs_header)
        .from_writer(file);

    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;

    Ok(records.len())
}

/// Column names `record` serialises to
fn header_of<T: Serialize>(record: &T) -> Result<StringRecord> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.serialize(record)?;
    let data = writer
        .into_inner()
        .map_err(|e| LibraryError::Config(format!("CSV header: {}", e)))?;
    let mut reader = csv::Reader::from_reader(data.as_slice());
    Ok(reader.headers()?.clone())
}

/// Header row of an existing CSV file, `None` when the file is empty or missing
fn existing_header(path: &Path) -> Result<Option<StringRecord>> {
    if fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true) {
        return Ok(None);
    }
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    Ok(Some(reader.headers()?.clone()))
}

/// Cut a last row that lacks its line terminator
///
/// Every complete row ends in a newline, so a file that does not was cut
/// short mid-row. The fragment is removed so the book is extracted again.
///
/// # Returns
/// Number of bytes removed
pub fn drop_partial_row(path: &Path) -> Result<u64> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(0);
    }

    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(0);
    }

    // Offset where the last row starts; the header counts as a row here
    file.seek(SeekFrom::Start(0))?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(file);
    let mut row = ByteRecord::new();
    let mut last_start = 0u64;
    loop {
        let start = reader.position().byte();
        if !reader.read_byte_record(&mut row)? {
            break;
        }
        last_start = start;
    }

    OpenOptions::new().write(true).open(path)?.set_len(last_start)?;
    warn!(
        "Removed an incomplete last row ({} bytes) from {}",
        len - last_start,
        path.display()
    );
    Ok(len - last_start)
}

/// Make an existing metadata CSV safe to resume
///
/// Cuts a partial last row, then rewrites the file under the current column
/// set when its header differs (for example a CSV from an older export).
pub fn prepare_metadata_csv(path: &Path) -> Result<()> {
    drop_partial_row(path)?;

    let Some(found) = existing_header(path)? else {
        return Ok(());
    };
    let expected = header_of(&BookMetadata::default())?;
    if found == expected {
        return Ok(());
    }

    let rows = read_metadata_rows(path)?;
    write_records(path, &rows.records)?;
    info!(
        "Rewrote {} with the current columns ({} rows kept, {} skipped)",
        path.display(),
        rows.records.len(),
        rows.skipped
    );
    Ok(())
}

/// Overwrite a CSV file with `records`
pub fn write_records<T: Serialize>(path: &Path, records: &[T]) -> Result<usize> {
    if path.exists() {
        fs::remove_file(path)?;
    }
    append_records(path, records)
}

/// Read every row, matching columns by header name
///
/// Missing columns take their default value; a missing file is an empty list.
pub fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let mut records = Vec::new();
    for row in reader.deserialize() {
        records.push(row?);
    }
    Ok(records)
}

/// Metadata rows plus the number of rows that could not be read
#[derive(Debug, Default)]
pub struct MetadataRows {
    pub records: Vec<BookMetadata>,
    pub skipped: usize,
}

/// Read a metadata CSV, skipping rows that do not parse
pub fn read_metadata_rows(path: &Path) -> Result<MetadataRows> {
    let mut rows = MetadataRows::default();
    if !path.exists() {
        return Ok(rows);
    }

    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    for (index, row) in reader.deserialize::<BookMetadata>().enumerate() {
        match row {
            Ok(record) => rows.records.push(record),
            Err(e) if e.is_io_error() => return Err(e.into()),
            Err(e) => {
                warn!("Skipping record {} of {}: {}", index + 1, path.display(), e);
                rows.skipped += 1;
            }
        }
    }
    Ok(rows)
}

pub fn read_metadata(path: &Path) -> Result<Vec<BookMetadata>> {
    Ok(read_metadata_rows(path)?.records)
}

/// File stems already present in a metadata CSV
///
/// Reads only the `filename` column.
pub fn processed_stems(path: &Path) -> Result<HashSet<String>> {
    let mut stems = HashSet::new();
    if !path.exists() {
        return Ok(stems);
    }

    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let column = match reader.headers()?.iter().position(|h| h == "filename") {
        Some(idx) => idx,
        None => return Ok(stems),
    };

    for row in reader.records() {
        let row = row?;
        if let Some(name) = row.get(column) {
            let stem = Path::new(name)
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| name.to_string());
            if !stem.is_empty() {
                stems.insert(stem);
            }
        }
    }

    Ok(stems)
}
