use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use lopdf::{Dictionary, Document, Object};
use tracing::debug;

use super::*;

/// PDF source
///
/// Reads the Info dictionary and per-page text with lopdf. Falls back to
/// pdf-extract on the whole document when lopdf cannot load the file or
/// finds no text. Scanned PDFs without a text layer come back empty.
#[derive(Clone)]
pub struct PdfSource;

impl PdfSource {
    pub fn new() -> Self {
        Self
    }

    /// Per-page text through lopdf
    fn read_pages(&self, doc: &Document, max_pages: usize, errors: &mut Vec<String>) -> Vec<String> {
        let page_numbers: Vec<u32> = doc.get_pages().keys().copied().take(max_pages).collect();
        let mut pages = Vec::with_capacity(page_numbers.len());

        for number in page_numbers {
            match doc.extract_text(&[number]) {
                Ok(text) => pages.push(text),
                Err(e) => {
                    debug!(page = number, error = %e, "Failed to extract page text");
                    errors.push(format!("page {}: {}", number, short_error(e)));
                    pages.push(String::new());
                }
            }
        }

        pages
    }

    /// Whole-document text through pdf-extract
    ///
    /// Pages are split on form feeds when the output carries them.
    fn fallback_pages(&self, bytes: &[u8], max_pages: usize) -> std::result::Result<Vec<String>, String> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem(bytes)));

        match outcome {
            Ok(Ok(text)) => Ok(text
                .split('\u{c}')
                .take(max_pages)
                .map(|p| p.to_string())
                .collect()),
            Ok(Err(e)) => Err(short_error(e)),
            Err(_) => Err("pdf-extract panicked".to_string()),
        }
    }
}

impl MetadataSource for PdfSource {
    fn extract(&self, path: &Path, config: &ExtractionConfig) -> Result<SourceDocument> {
        let bytes = fs::read(path)?;
        let mut document = SourceDocument::default();

        match Document::load_mem(&bytes) {
            Ok(doc) => {
                document.page_count = doc.get_pages().len();
                document.info = read_info(&doc);
                document.pages = self.read_pages(&doc, config.max_pages, &mut document.errors);
                if !document.is_empty() {
                    document.methods.push("lopdf".to_string());
                }
            }
            Err(e) => {
                document.errors.push(format!("lopdf: {}", short_error(e)));
            }
        }

        if document.is_empty() {
            match self.fallback_pages(&bytes, config.max_pages) {
                Ok(pages) => {
                    if document.page_count == 0 {
                        document.page_count = pages.len();
                    }
                    document.pages = pages;
                    if !document.is_empty() {
                        document.methods.push("pdf-extract".to_string());
                    } else {
                        document.errors.push("no text layer".to_string());
                    }
                }
                Err(e) => document.errors.push(format!("pdf-extract: {}", e)),
            }
        }

        debug!(
            path = %path.display(),
            pages = document.page_count,
            methods = ?document.methods,
            "PDF read"
        );

        Ok(document)
    }

    fn format_name(&self) -> &'static str {
        "pdf"
    }

    fn supported_extensions(&self) -> Vec<&str> {
        vec!["pdf"]
    }
}

impl Default for PdfSource {
    fn default() -> Self {
        Self::new()
    }
}

// ====== Info dictionary ======

/// Read the trailer's Info dictionary
pub fn read_info(doc: &Document) -> DocumentInfo {
    let dict = match doc.trailer.get(b"Info") {
        Ok(Object::Reference(id)) => doc.get_object(*id).ok().and_then(|o| o.as_dict().ok()),
        Ok(Object::Dictionary(d)) => Some(d),
        _ => None,
    };

    let dict = match dict {
        Some(d) => d,
        None => return DocumentInfo::default(),
    };

    DocumentInfo {
        title: info_field(doc, dict, b"Title"),
        author: info_field(doc, dict, b"Author"),
        subject: info_field(doc, dict, b"Subject"),
        creator: info_field(doc, dict, b"Creator"),
        producer: info_field(doc, dict, b"Producer"),
        creation_date: info_field(doc, dict, b"CreationDate"),
    }
}

fn info_field(doc: &Document, dict: &Dictionary, key: &[u8]) -> Option<String> {
    let obj = match dict.get(key).ok()? {
        Object::Reference(id) => doc.get_object(*id).ok()?,
        other => other,
    };

    let value = match obj {
        Object::String(bytes, _) => decode_pdf_string(bytes),
        Object::Name(bytes) => decode_pdf_string(bytes),
        _ => return None,
    };

    let value = value.trim().to_string();
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Decode a PDF text string
///
/// UTF-16BE when it starts with a byte order mark, otherwise PDFDocEncoding
/// read as Latin-1.
pub fn decode_pdf_string(bytes: &[u8]) -> String {
    let text = if bytes.starts_with(&[0xFE, 0xFF]) {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        bytes.iter().map(|&b| b as char).collect()
    };
    text.replace('\0', "")
}
