//! Metadata CSV to catalog migration

use std::fmt;
use std::fs;

use regex::Regex;
use rusqlite::Connection;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::assets::{file_hash, AssetLocator};
use crate::catalog::{self, BookContent, CreatedCounts, NameCache, NewBook};
use crate::config::{DataLayout, MigrationConfig};
use crate::error::Result;
use crate::extractor::{BookMetadata, NOT_FOUND, UNKNOWN};
use crate::text::{collapse_whitespace, truncate_chars};

/// Scores below this are flagged `low_quality`
const LOW_QUALITY_SCORE: u32 = 40;
/// Text samples shorter than this are flagged `needs_ocr`
const OCR_SAMPLE_CHARS: usize = 100;
const EARLIEST_YEAR: i32 = 1800;
const LATEST_YEAR: i32 = 2030;

/// Everything a migration needs besides the records
pub struct MigrationContext<'a> {
    pub layout: &'a DataLayout,
    pub locator: &'a AssetLocator,
    pub config: &'a MigrationConfig,
}

/// Outcome of a migration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationStats {
    pub total: usize,
    pub migrated: usize,
    pub duplicates: usize,
    pub errors: usize,
    pub created: CreatedCounts,
    /// Migrated books at or above the high-confidence threshold
    pub high_confidence: usize,
    pub with_cover: usize,
    pub with_thumbnail: usize,
}

impl MigrationStats {
    fn share(&self, count: usize) -> f64 {
        if self.migrated == 0 {
            0.0
        } else {
            count as f64 / self.migrated as f64 * 100.0
        }
    }
}

impl fmt::Display for MigrationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Migration complete")?;
        writeln!(f, "  Records:            {}", self.total)?;
        writeln!(f, "  Migrated:           {}", self.migrated)?;
        writeln!(f, "  Duplicates skipped: {}", self.duplicates)?;
        writeln!(f, "  Errors:             {}", self.errors)?;
        writeln!(
            f,
            "  Created: {} authors, {} publishers, {} categories, {} subjects",
            self.created.authors, self.created.publishers, self.created.categories, self.created.subjects
        )?;
        writeln!(
            f,
            "  High confidence:    {} ({:.1}%)",
            self.high_confidence,
            self.share(self.high_confidence)
        )?;
        writeln!(f, "  With cover:         {} ({:.1}%)", self.with_cover, self.share(self.with_cover))?;
        write!(
            f,
            "  With thumbnail:     {} ({:.1}%)",
            self.with_thumbnail,
            self.share(self.with_thumbnail)
        )
    }
}

/// Year parsing for PDF creation dates
struct YearParser {
    pdf_date: Regex,
    bare: Regex,
}

impl YearParser {
    fn new() -> Self {
        Self {
            pdf_date: Regex::new(r"^D:((?:19|20)\d{2})").unwrap(),
            bare: Regex::new(r"\b((?:19|20)\d{2})\b").unwrap(),
        }
    }

    /// First plausible year in a creation date such as `D:20080115` or `2008-01-15`
    fn parse(&self, date: &str) -> Option<i32> {
        let date = date.trim();
        let plausible = |y: &i32| (EARLIEST_YEAR..=LATEST_YEAR).contains(y);

        if let Some(year) = self
            .pdf_date
            .captures(date)
            .and_then(|c| c[1].parse::<i32>().ok())
            .filter(plausible)
        {
            return Some(year);
        }

        self.bare
            .captures_iter(date)
            .filter_map(|c| c[1].parse::<i32>().ok())
            .find(plausible)
    }
}

/// A name worth storing, or `None` for blanks and placeholders
fn meaningful(value: &str) -> Option<String> {
    let value = collapse_whitespace(value);
    if value.is_empty() || value == UNKNOWN || value == NOT_FOUND {
        None
    } else {
        Some(value)
    }
}

fn optional(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Processing flags for a record
pub fn processing_flags(record: &BookMetadata) -> Vec<String> {
    let mut flags = Vec::new();
    if !record.errors.trim().is_empty() {
        flags.push("extraction_errors");
    }
    if record.extraction_failed() {
        flags.push("extraction_failed");
    }
    if record.extraction_quality_score < LOW_QUALITY_SCORE {
        flags.push("low_quality");
    }
    if !record.has_title() {
        flags.push("missing_title");
    }
    if record.full_text_sample.trim().chars().count() < OCR_SAMPLE_CHARS {
        flags.push("needs_ocr");
    }
    flags.into_iter().map(String::from).collect()
}

/// Migrate metadata records into the catalog
///
/// Each record runs in its own savepoint, so a failing record leaves no
/// partial rows behind and does not stop the rest.
///
/// # Arguments
/// - `conn`: an initialised catalog connection
/// - `records`: rows from the metadata CSV
/// - `ctx`: data layout, asset locator and limits
pub fn migrate_csv(conn: &mut Connection, records: &[BookMetadata], ctx: &MigrationContext<'_>) -> Result<MigrationStats> {
    let years = YearParser::new();
    let mut cache = NameCache::new();
    let mut stats = MigrationStats {
        total: records.len(),
        ..MigrationStats::default()
    };

    let mut tx = conn.transaction()?;

    for (index, record) in records.iter().enumerate() {
        if catalog::book_exists(&tx, &record.filename)? {
            debug!("{} already in catalog", record.filename);
            stats.duplicates += 1;
            continue;
        }

        let snapshot = cache.clone();
        let savepoint = tx.savepoint()?;
        match migrate_record(&savepoint, record, ctx, &years, &mut cache) {
            Ok(book) => {
                savepoint.commit()?;
                stats.migrated += 1;
                if book.overall_confidence >= ctx.config.high_confidence {
                    stats.high_confidence += 1;
                }
                if book.cover_path.is_some() {
                    stats.with_cover += 1;
                }
                if book.thumbnail_path.is_some() {
                    stats.with_thumbnail += 1;
                }
            }
            Err(e) => {
                drop(savepoint);
                cache = snapshot;
                warn!("Could not migrate {}: {}", record.filename, e);
                stats.errors += 1;
            }
        }

        if (index + 1) % 100 == 0 {
            info!("Migrated {}/{} records", index + 1, records.len());
        }
    }

    tx.commit()?;
    stats.created = cache.created.clone();

    info!(
        "Migration finished: {} migrated, {} duplicates, {} errors",
        stats.migrated, stats.duplicates, stats.errors
    );
    Ok(stats)
}

fn migrate_record(
    conn: &Connection,
    record: &BookMetadata,
    ctx: &MigrationContext<'_>,
    years: &YearParser,
    cache: &mut NameCache,
) -> Result<NewBook> {
    let stem = record.stem();
    let limit = ctx.config.content_limit;

    let title = optional(&record.pdf_title).unwrap_or_else(|| stem.clone());
    let author = meaningful(&record.pdf_author);
    let publisher = meaningful(&record.extracted_publisher);
    let category = meaningful(&record.database_category);
    let subject = meaningful(&record.database_subject);

    let author_id = author.as_deref().map(|a| cache.author(conn, a)).transpose()?;
    let publisher_id = publisher.as_deref().map(|p| cache.publisher(conn, p)).transpose()?;
    let category_id = category.as_deref().map(|c| cache.category(conn, c)).transpose()?;
    let subject_id = match (&subject, category_id) {
        (Some(s), Some(cat)) => Some(cache.subject(conn, s, cat)?),
        _ => None,
    };

    let book_path = ctx.layout.books_dir().join(&record.filename);
    let (file_path, file_size, file_hash) = if book_path.is_file() {
        let size = fs::metadata(&book_path)?.len() as i64;
        let hash = file_hash(&book_path)?;
        (Some(ctx.layout.relative(&book_path)), size, Some(hash))
    } else {
        (None, (record.file_size_mb * 1024.0 * 1024.0) as i64, None)
    };

    let publication_year = record
        .extracted_year
        .or_else(|| years.parse(&record.pdf_creation_date));

    let book = NewBook {
        file_name: record.filename.clone(),
        file_path,
        file_size,
        file_hash,
        page_count: record.page_count as i64,
        title: title.clone(),
        author_id,
        publisher_id,
        category_id,
        subject_id,
        publication_year,
        isbn: optional(&record.extracted_isbn),
        lccn: optional(&record.extracted_lccn),
        issn: optional(&record.extracted_issn),
        oclc: optional(&record.extracted_oclc),
        doi: optional(&record.extracted_doi),
        edition: optional(&record.extracted_edition),
        pdf_title: optional(&record.pdf_title),
        pdf_author: optional(&record.pdf_author),
        pdf_subject: optional(&record.pdf_subject),
        pdf_creator: optional(&record.pdf_creator),
        pdf_producer: optional(&record.pdf_producer),
        pdf_creation_date: optional(&record.pdf_creation_date),
        extraction_method: record.extraction_method.clone(),
        quality_score: record.extraction_quality_score as i64,
        overall_confidence: record.extraction_quality_score.min(100) as f64 / 100.0,
        cover_path: ctx.locator.find_cover(&stem),
        thumbnail_path: ctx.locator.find_thumbnail(&stem),
        processing_flags: processing_flags(record),
    };

    let book_id = catalog::insert_book(conn, &book)?;

    let cut = |text: &str| truncate_chars(text, limit).to_string();
    catalog::insert_content(
        conn,
        book_id,
        &BookContent {
            first_page: cut(&record.first_page_text),
            title_page: cut(&record.title_page_text),
            copyright_page: cut(&record.copyright_page_text),
            table_of_contents: cut(&record.table_of_contents),
            abstract_text: cut(&record.abstract_text),
        },
    )?;

    catalog::index_full_text(
        conn,
        book_id,
        &title,
        author.as_deref().unwrap_or(""),
        publisher.as_deref().unwrap_or(""),
        category.as_deref().unwrap_or(""),
        truncate_chars(&record.full_text_sample, limit),
    )?;

    catalog::record_event(
        conn,
        book_id,
        "migration",
        &json!({
            "source": "metadata_csv",
            "quality_score": record.extraction_quality_score,
            "flags": book.processing_flags,
        }),
    )?;

    Ok(book)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use tempfile::TempDir;

    fn record(name: &str, title: &str, author: &str, category: &str, score: u32) -> BookMetadata {
        BookMetadata {
            filename: name.to_string(),
            file_size_mb: 1.0,
            page_count: 120,
            database_category: category.to_string(),
            database_subject: "Rust".to_string(),
            pdf_title: title.to_string(),
            pdf_author: author.to_string(),
            extracted_publisher: "No Starch".to_string(),
            extracted_isbn: "9780596520687".to_string(),
            full_text_sample: "ownership borrowing lifetimes ".repeat(10),
            extraction_method: "lopdf".to_string(),
            extraction_quality_score: score,
            ..BookMetadata::default()
        }
    }

    struct Fixture {
        _temp: TempDir,
        layout: DataLayout,
        config: MigrationConfig,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let layout = DataLayout::new(temp.path().join("Data"));
        layout.create_all().unwrap();
        Fixture { _temp: temp, layout, config: MigrationConfig::default() }
    }

    #[test]
    fn test_year_parser() {
        let years = YearParser::new();
        assert_eq!(years.parse("D:20080115093000Z"), Some(2008));
        assert_eq!(years.parse("Created 1999-04-01"), Some(1999));
        assert_eq!(years.parse("2099"), None);
        assert_eq!(years.parse(""), None);
    }

    #[test]
    fn test_processing_flags() {
        let mut r = record("a.pdf", "", "", "", 20);
        r.full_text_sample = "short".to_string();
        r.errors = "lopdf: bad xref".to_string();
        r.extraction_method = crate::extractor::METHOD_FAILED.to_string();
        assert_eq!(
            processing_flags(&r),
            vec!["extraction_errors", "extraction_failed", "low_quality", "missing_title", "needs_ocr"]
        );
        assert!(processing_flags(&record("b.pdf", "T", "A", "", 90)).is_empty());
    }

    #[test]
    fn test_migrate_records() {
        let fx = fixture();
        fs::write(fx.layout.books_dir().join("Rust Book.pdf"), b"%PDF-1.4 fake").unwrap();
        fs::write(fx.layout.thumbs_dir().join("Rust Book.png"), b"png").unwrap();
        let locator = AssetLocator::new(&fx.layout);
        let ctx = MigrationContext { layout: &fx.layout, locator: &locator, config: &fx.config };

        let mut conn = db::init_memory_db().unwrap();
        let mut second = record("Other.pdf", "", "  Ann   Author ", "Not Found", 30);
        second.pdf_creation_date = "D:20110304".to_string();
        let records = vec![
            record("Rust Book.pdf", "The Rust Book", "Ann Author", "Programming", 85),
            second,
        ];

        let stats = migrate_csv(&mut conn, &records, &ctx).unwrap();
        assert_eq!(stats.migrated, 2);
        assert_eq!(stats.errors, 0);
        assert_eq!(stats.created.authors, 1);
        assert_eq!(stats.created.categories, 1);
        assert_eq!(stats.created.subjects, 1);
        assert_eq!(stats.high_confidence, 1);
        assert_eq!(stats.with_thumbnail, 1);
        assert!(stats.to_string().contains("50.0%"));

        let books = catalog::list_books(&conn, None).unwrap();
        assert_eq!(books.len(), 2);

        let first = books.iter().find(|b| b.title == "The Rust Book").unwrap();
        let detail = catalog::get_book(&conn, first.book_id).unwrap().unwrap();
        assert_eq!(detail.category.as_deref(), Some("Programming"));
        assert_eq!(detail.subject.as_deref(), Some("Rust"));
        assert_eq!(detail.file_size, 13);
        assert_eq!(detail.file_hash.as_ref().map(|h| h.len()), Some(64));
        assert_eq!(detail.thumbnail_path.as_deref(), Some("Thumbs/Rust Book.png"));
        assert!((detail.overall_confidence - 0.85).abs() < 1e-9);

        let other = books.iter().find(|b| b.title == "Other").unwrap();
        let detail = catalog::get_book(&conn, other.book_id).unwrap().unwrap();
        assert_eq!(detail.category, None);
        assert_eq!(detail.author.as_deref(), Some("Ann Author"));
        assert_eq!(detail.year, Some(2011));
        assert_eq!(detail.file_size, 1024 * 1024);
        assert!(detail.processing_flags.contains(&"low_quality".to_string()));

        assert_eq!(catalog::count_events(&conn, "migration").unwrap(), 2);
        assert_eq!(catalog::search(&conn, "lifetimes", 10).unwrap().len(), 2);
    }

    #[test]
    fn test_duplicates_skipped_on_rerun() {
        let fx = fixture();
        let locator = AssetLocator::new(&fx.layout);
        let ctx = MigrationContext { layout: &fx.layout, locator: &locator, config: &fx.config };
        let mut conn = db::init_memory_db().unwrap();
        let records = vec![record("a.pdf", "A", "X", "Cat", 50)];

        migrate_csv(&mut conn, &records, &ctx).unwrap();
        let stats = migrate_csv(&mut conn, &records, &ctx).unwrap();
        assert_eq!(stats.migrated, 0);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(catalog::list_books(&conn, None).unwrap().len(), 1);
    }

    #[test]
    fn test_content_truncated() {
        let fx = fixture();
        let locator = AssetLocator::new(&fx.layout);
        let config = MigrationConfig { content_limit: 10, ..MigrationConfig::default() };
        let ctx = MigrationContext { layout: &fx.layout, locator: &locator, config: &config };
        let mut conn = db::init_memory_db().unwrap();

        let mut r = record("long.pdf", "Long", "", "", 50);
        r.first_page_text = "x".repeat(500);
        migrate_csv(&mut conn, &[r], &ctx).unwrap();

        let id = catalog::list_books(&conn, None).unwrap()[0].book_id;
        let content = catalog::get_content(&conn, id).unwrap().unwrap();
        assert_eq!(content.first_page.len(), 10);
    }
}
