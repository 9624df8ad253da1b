use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::ExtractionConfig;
use crate::error::{LibraryError, Result};

pub mod epub_source;
pub mod pdf_source;

/// Document information dictionary
///
/// Whatever the file itself declares about the book. PDFs keep it in the
/// Info dictionary, EPUBs in the OPF metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub creation_date: Option<String>,
}

/// Raw material read from one book file
#[derive(Debug, Clone, Default)]
pub struct SourceDocument {
    /// Declared metadata
    pub info: DocumentInfo,
    /// Total number of pages (spine items for EPUB)
    pub page_count: usize,
    /// Plain text of the leading pages, at most `max_pages` entries
    pub pages: Vec<String>,
    /// Identifiers declared by the file (EPUB dc:identifier)
    pub identifiers: Vec<String>,
    /// Methods that produced text, in order of use
    pub methods: Vec<String>,
    /// Errors met along the way; not fatal
    pub errors: Vec<String>,
    /// Embedded cover image and its media type
    pub cover: Option<(Vec<u8>, String)>,
}

impl SourceDocument {
    /// True when no page carries any text
    pub fn is_empty(&self) -> bool {
        self.pages.iter().all(|p| p.trim().is_empty())
    }
}

/// A reader for one book format
///
/// Every supported format implements this trait.
pub trait MetadataSource: Send + Sync {
    /// Read metadata and leading page text
    ///
    /// # Arguments
    /// - `path`: book file
    /// - `config`: extraction limits
    ///
    /// # Returns
    /// Partial failures are recorded in `SourceDocument::errors`; an `Err`
    /// means the file could not be read at all.
    fn extract(&self, path: &Path, config: &ExtractionConfig) -> Result<SourceDocument>;

    /// Short name used in logs
    fn format_name(&self) -> &'static str;

    /// Extensions handled by this source
    fn supported_extensions(&self) -> Vec<&str>;
}

/// Source router
///
/// Chooses the source by file extension.
pub struct SourceRouter {
    sources: HashMap<String, Box<dyn MetadataSource>>,
}

impl SourceRouter {
    /// Router with every built-in source registered
    pub fn new() -> Self {
        let mut sources: HashMap<String, Box<dyn MetadataSource>> = HashMap::new();

        let pdf = pdf_source::PdfSource::new();
        for ext in pdf.supported_extensions() {
            sources.insert(ext.to_string(), Box::new(pdf.clone()));
        }

        let epub = epub_source::EpubSource::new();
        for ext in epub.supported_extensions() {
            sources.insert(ext.to_string(), Box::new(epub.clone()));
        }

        Self { sources }
    }

    /// Source for `file_path`
    ///
    /// # Returns
    /// `UnsupportedFormat` when no source handles the extension
    pub fn route(&self, file_path: &Path) -> Result<&dyn MetadataSource> {
        let ext = file_path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase())
            .ok_or_else(|| LibraryError::UnsupportedFormat(file_path.display().to_string()))?;

        self.sources
            .get(&ext)
            .map(|s| s.as_ref())
            .ok_or(LibraryError::UnsupportedFormat(ext))
    }

    /// Whether the extension is supported (case-insensitive)
    pub fn supports(&self, ext: &str) -> bool {
        self.sources.contains_key(&ext.to_lowercase())
    }

    /// Whether the path has a supported extension
    pub fn supports_path(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|s| s.to_str())
            .map(|ext| self.supports(ext))
            .unwrap_or(false)
    }

    /// All registered extensions, sorted
    pub fn supported_extensions(&self) -> Vec<String> {
        let mut exts: Vec<String> = self.sources.keys().cloned().collect();
        exts.sort();
        exts
    }
}

impl Default for SourceRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// Truncate an error message for the record's error column
pub(crate) fn short_error(err: impl std::fmt::Display) -> String {
    crate::text::truncate_chars(&err.to_string(), 100).to_string()
}
