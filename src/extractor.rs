/// Per-book metadata extraction
///
/// Routes a book file to its source, classifies the leading pages, runs
/// bibliographic recognition and scores the result. One `BookMetadata`
/// is one row of the metadata CSV.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

use crate::assets;
use crate::biblio::{validate_isbn, BiblioExtractor, PageTexts};
use crate::config::ExtractionConfig;
use crate::error::{LibraryError, Result};
use crate::source::{short_error, SourceDocument, SourceRouter};
use crate::text::{clean_text, strip_control};

/// Classification value used when the legacy database has no row for a book
pub const NOT_FOUND: &str = "Not Found";
/// Classification value used when a legacy row has an empty column
pub const UNKNOWN: &str = "Unknown";
/// Extraction method recorded when no source produced text
pub const METHOD_FAILED: &str = "Failed";

/// One metadata CSV row
///
/// Field order is the CSV column order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookMetadata {
    pub filename: String,
    #[serde(deserialize_with = "lenient_f64")]
    pub file_size_mb: f64,
    #[serde(deserialize_with = "lenient_count")]
    pub page_count: usize,
    pub database_category: String,
    pub database_subject: String,
    pub pdf_title: String,
    pub pdf_author: String,
    pub pdf_subject: String,
    pub pdf_creator: String,
    pub pdf_producer: String,
    pub pdf_creation_date: String,
    pub extracted_isbn: String,
    pub extracted_lccn: String,
    pub extracted_issn: String,
    pub extracted_oclc: String,
    #[serde(deserialize_with = "lenient_year")]
    pub extracted_year: Option<i32>,
    pub extracted_publisher: String,
    pub extracted_edition: String,
    pub extracted_doi: String,
    pub first_page_text: String,
    pub title_page_text: String,
    pub copyright_page_text: String,
    pub table_of_contents: String,
    pub full_text_sample: String,
    pub abstract_text: String,
    pub extraction_method: String,
    #[serde(deserialize_with = "lenient_score")]
    pub extraction_quality_score: u32,
    #[serde(deserialize_with = "lenient_f64")]
    pub processing_time_seconds: f64,
    pub errors: String,
}

impl BookMetadata {
    /// File name without extension
    pub fn stem(&self) -> String {
        Path::new(&self.filename)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.filename.clone())
    }

    pub fn has_title(&self) -> bool {
        !self.pdf_title.trim().is_empty()
    }

    pub fn has_author(&self) -> bool {
        !self.pdf_author.trim().is_empty()
    }

    pub fn has_isbn(&self) -> bool {
        !self.extracted_isbn.trim().is_empty()
    }

    pub fn has_year(&self) -> bool {
        self.extracted_year.is_some()
    }

    pub fn has_publisher(&self) -> bool {
        !self.extracted_publisher.trim().is_empty()
    }

    pub fn extraction_failed(&self) -> bool {
        self.extraction_method == METHOD_FAILED
    }
}

// ====== Lenient numeric cells ======

/// A numeric CSV cell as spreadsheets and older exports write it
///
/// `2008`, `2008.0` and ` 2008 ` all read as 2008; text that is not a
/// number reads as absent.
#[derive(Deserialize)]
#[serde(untagged)]
enum NumberCell {
    Int(i64),
    Float(f64),
    Text(String),
}

impl NumberCell {
    fn value(&self) -> Option<f64> {
        let value = match self {
            NumberCell::Int(i) => *i as f64,
            NumberCell::Float(f) => *f,
            NumberCell::Text(t) => t.trim().parse::<f64>().ok()?,
        };
        value.is_finite().then_some(value)
    }
}

fn number_cell<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<f64>, D::Error> {
    Ok(Option::<NumberCell>::deserialize(d)?.and_then(|cell| cell.value()))
}

fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<f64, D::Error> {
    Ok(number_cell(d)?.unwrap_or(0.0))
}

fn lenient_count<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<usize, D::Error> {
    Ok(number_cell(d)?.filter(|v| *v >= 0.0).map(|v| v as usize).unwrap_or(0))
}

fn lenient_score<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u32, D::Error> {
    Ok(number_cell(d)?.filter(|v| *v >= 0.0).map(|v| v as u32).unwrap_or(0))
}

fn lenient_year<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<i32>, D::Error> {
    Ok(number_cell(d)?.map(|v| v as i32).filter(|y| *y > 0))
}

/// Extraction quality score, 0 to 100
///
/// Points for each recognised field and each classified page, plus up to
/// 15 points for the amount of sampled text.
pub fn quality_score(record: &BookMetadata) -> u32 {
    let present = |s: &str| !s.trim().is_empty();
    let mut score = 0u32;

    if record.has_title() { score += 10; }
    if record.has_author() { score += 10; }
    if record.has_isbn() { score += 20; }
    if present(&record.extracted_lccn) { score += 15; }
    if present(&record.extracted_issn) { score += 10; }
    if present(&record.extracted_oclc) { score += 5; }
    if record.has_year() { score += 10; }
    if record.has_publisher() { score += 10; }
    if present(&record.first_page_text) { score += 15; }
    if present(&record.title_page_text) { score += 10; }
    if present(&record.copyright_page_text) { score += 10; }
    if present(&record.full_text_sample) { score += 5; }
    if present(&record.abstract_text) { score += 5; }

    let text_points = (record.full_text_sample.chars().count() / 150).min(15) as u32;
    (score + text_points).min(100)
}

// ====== Legacy classification ======

/// Category and subject assigned by the previous library system, by file stem
#[derive(Debug, Clone, Default)]
pub struct LegacyClassification {
    entries: HashMap<String, (String, String)>,
}

impl LegacyClassification {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a book; empty values become `Unknown`
    pub fn insert(&mut self, title: &str, category: Option<String>, subject: Option<String>) {
        let or_unknown = |v: Option<String>| match v {
            Some(s) if !s.trim().is_empty() => s.trim().to_string(),
            _ => UNKNOWN.to_string(),
        };
        self.entries
            .insert(title.trim().to_string(), (or_unknown(category), or_unknown(subject)));
    }

    /// Category and subject for a file stem, `Not Found` when absent
    pub fn lookup(&self, stem: &str) -> (String, String) {
        self.entries
            .get(stem)
            .cloned()
            .unwrap_or_else(|| (NOT_FOUND.to_string(), NOT_FOUND.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ====== Page classification ======

/// Leading pages sorted into the roles the catalog cares about
#[derive(Debug, Default)]
struct ClassifiedPages<'a> {
    first: &'a str,
    title: &'a str,
    copyright: &'a str,
    toc: &'a str,
    all: String,
    front_matter: String,
}

fn classify_pages(pages: &[String]) -> ClassifiedPages<'_> {
    let page = |i: usize| pages.get(i).map(|s| s.as_str()).unwrap_or("");

    let copyright = pages
        .iter()
        .take(5)
        .find(|p| {
            let lower = p.to_lowercase();
            lower.contains("copyright") || p.contains('©') || lower.contains("all rights reserved")
        })
        .map(|s| s.as_str())
        .unwrap_or("");

    let toc = pages
        .iter()
        .take(10)
        .find(|p| p.to_lowercase().contains("contents"))
        .map(|s| s.as_str())
        .unwrap_or("");

    ClassifiedPages {
        first: page(0),
        title: page(1),
        copyright,
        toc,
        all: pages.join("\n"),
        front_matter: pages.iter().take(5).cloned().collect::<Vec<_>>().join("\n"),
    }
}

// ====== Extractor ======

/// Metadata extractor
///
/// Shared by all pipeline workers.
pub struct MetadataExtractor {
    router: SourceRouter,
    biblio: BiblioExtractor,
    legacy: LegacyClassification,
    config: ExtractionConfig,
    covers_dir: Option<PathBuf>,
}

impl MetadataExtractor {
    /// Create an extractor
    ///
    /// # Arguments
    /// - `config`: extraction limits
    /// - `legacy`: classification from the previous library system
    pub fn new(config: ExtractionConfig, legacy: LegacyClassification) -> Self {
        Self {
            router: SourceRouter::new(),
            biblio: BiblioExtractor::new(),
            legacy,
            config,
            covers_dir: None,
        }
    }

    /// Save embedded covers into `dir` when the config allows it
    pub fn with_covers_dir(mut self, dir: PathBuf) -> Self {
        self.covers_dir = Some(dir);
        self
    }

    pub fn router(&self) -> &SourceRouter {
        &self.router
    }

    /// Extract one book
    ///
    /// # Returns
    /// A record even when no text could be read; `Err` only when the file
    /// itself is unreadable or of an unsupported type.
    pub fn extract_file(&self, path: &Path) -> Result<BookMetadata> {
        let started = Instant::now();

        let filename = path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .ok_or_else(|| LibraryError::NotFound(path.display().to_string()))?;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| filename.clone());

        let size_bytes = std::fs::metadata(path)?.len();
        let source = self.router.route(path)?;

        let mut document = match source.extract(path, &self.config) {
            Ok(doc) => doc,
            Err(LibraryError::Io(e)) => return Err(LibraryError::Io(e)),
            Err(e) => {
                warn!("{} could not be opened: {}", filename, e);
                SourceDocument {
                    errors: vec![short_error(e)],
                    ..SourceDocument::default()
                }
            }
        };

        self.save_cover(&stem, &mut document);

        let (category, subject) = self.legacy.lookup(&stem);
        let mut record = self.build_record(filename, size_bytes, category, subject, &document);

        record.processing_time_seconds = round2(started.elapsed().as_secs_f64());
        debug!(
            file = %record.filename,
            score = record.extraction_quality_score,
            method = %record.extraction_method,
            "Extracted"
        );

        Ok(record)
    }

    fn build_record(
        &self,
        filename: String,
        size_bytes: u64,
        category: String,
        subject: String,
        document: &SourceDocument,
    ) -> BookMetadata {
        let cfg = &self.config;
        let pages = classify_pages(&document.pages);

        let texts = PageTexts {
            copyright: pages.copyright,
            title: pages.title,
            all: &pages.all,
        };
        let biblio = self.biblio.extract(&texts, &pages.front_matter);

        let declared_isbn = document
            .identifiers
            .iter()
            .filter_map(|id| validate_isbn(id.rsplit(':').next().unwrap_or(id)))
            .next();

        let info = &document.info;
        let field = |v: &Option<String>| v.as_deref().map(|s| strip_control(s).trim().to_string()).unwrap_or_default();

        let mut record = BookMetadata {
            filename,
            file_size_mb: round2(size_bytes as f64 / (1024.0 * 1024.0)),
            page_count: document.page_count,
            database_category: category,
            database_subject: subject,
            pdf_title: field(&info.title),
            pdf_author: field(&info.author),
            pdf_subject: field(&info.subject),
            pdf_creator: field(&info.creator),
            pdf_producer: field(&info.producer),
            pdf_creation_date: field(&info.creation_date),
            extracted_isbn: declared_isbn.or(biblio.isbn).unwrap_or_default(),
            extracted_lccn: biblio.lccn.unwrap_or_default(),
            extracted_issn: biblio.issn.unwrap_or_default(),
            extracted_oclc: biblio.oclc.unwrap_or_default(),
            extracted_year: biblio.year,
            extracted_publisher: biblio.publisher.unwrap_or_default(),
            extracted_edition: biblio.edition.unwrap_or_default(),
            extracted_doi: biblio.doi.unwrap_or_default(),
            first_page_text: clean_text(pages.first, cfg.first_page_length),
            title_page_text: clean_text(pages.title, cfg.first_page_length),
            copyright_page_text: clean_text(pages.copyright, cfg.first_page_length),
            table_of_contents: clean_text(pages.toc, cfg.toc_length),
            full_text_sample: clean_text(&pages.all, cfg.max_text_length),
            abstract_text: biblio.abstract_text.unwrap_or_default(),
            extraction_method: if document.methods.is_empty() {
                METHOD_FAILED.to_string()
            } else {
                document.methods.join("+")
            },
            extraction_quality_score: 0,
            processing_time_seconds: 0.0,
            errors: document.errors.join("; "),
        };

        record.extraction_quality_score = quality_score(&record);
        record
    }

    fn save_cover(&self, stem: &str, document: &mut SourceDocument) {
        if !self.config.save_covers {
            return;
        }
        let (dir, (bytes, mime)) = match (&self.covers_dir, &document.cover) {
            (Some(dir), Some(cover)) => (dir, cover),
            _ => return,
        };
        if let Err(e) = assets::save_cover(dir, stem, bytes, mime) {
            document.errors.push(format!("cover: {}", short_error(e)));
        }
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
