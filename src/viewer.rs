//! Text views over the catalog for the command line
//!
//! Every renderer returns a `String`; printing is left to the caller.

use std::fmt::{self, Write};

use crate::assets::ThumbnailAudit;
use crate::catalog::{BookContent, BookDetail, BookSummary, CategoryGroup, SearchHit, ThumbnailSummary, UNCATEGORIZED};
use crate::text::{collapse_whitespace, ellipsize, truncate_chars};
use crate::thumbnails::format_file_size;

const WIDE_RULE: usize = 70;
const PREVIEW_CHARS: usize = 300;

fn yes_no(flag: bool) -> &'static str {
    if flag { "Yes" } else { "No" }
}

fn tick(flag: bool) -> &'static str {
    if flag { "✓" } else { "✗" }
}

fn or_unknown(value: &Option<String>) -> &str {
    value.as_deref().filter(|v| !v.is_empty()).unwrap_or("Unknown")
}

fn or_missing(value: &Option<String>) -> &str {
    value.as_deref().filter(|v| !v.is_empty()).unwrap_or("Not Available")
}

fn render(write: impl FnOnce(&mut String) -> fmt::Result) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail
    let _ = write(&mut out);
    out
}

// ====== Single book ======

/// Full record of one book
pub fn render_book(book: &BookDetail, content: Option<&BookContent>) -> String {
    render(|out| {
        let rule = "=".repeat(WIDE_RULE);
        writeln!(out, "{}", rule)?;
        writeln!(out, "BOOK RECORD #{}", book.book_id)?;
        writeln!(out, "{}", rule)?;
        writeln!(out)?;

        writeln!(out, "CLASSIFICATION & ASSETS")?;
        writeln!(out, "Category:      {}", book.category.as_deref().unwrap_or(UNCATEGORIZED))?;
        writeln!(out, "Subject:       {}", book.subject.as_deref().unwrap_or("Not Specified"))?;
        writeln!(out, "Has Cover:     {}", yes_no(book.has_cover))?;
        writeln!(out, "Has Thumbnail: {}", yes_no(book.has_thumbnail))?;
        if let Some(path) = &book.thumbnail_path {
            writeln!(out, "Thumbnail:     {}", path)?;
        }
        writeln!(out)?;

        writeln!(out, "BIBLIOGRAPHIC DETAILS")?;
        writeln!(out, "Title:            {}", book.title)?;
        writeln!(out, "Author:           {}", or_unknown(&book.author))?;
        writeln!(out, "Publisher:        {}", or_unknown(&book.publisher))?;
        match book.year {
            Some(year) => writeln!(out, "Publication Year: {}", year)?,
            None => writeln!(out, "Publication Year: Unknown")?,
        }
        writeln!(out, "Edition:          {}", or_unknown(&book.edition))?;
        writeln!(out, "ISBN:             {}", or_missing(&book.isbn))?;
        writeln!(out, "LCCN:             {}", or_missing(&book.lccn))?;
        writeln!(out, "ISSN:             {}", or_missing(&book.issn))?;
        writeln!(out, "OCLC:             {}", or_missing(&book.oclc))?;
        writeln!(out, "DOI:              {}", or_missing(&book.doi))?;
        writeln!(out)?;

        writeln!(out, "FILE INFORMATION")?;
        writeln!(out, "File Name:    {}", book.file_name)?;
        writeln!(out, "Page Count:   {}", book.page_count)?;
        writeln!(out, "File Size:    {}", format_file_size(book.file_size.max(0) as u64))?;
        writeln!(out, "Access Level: {}", book.access_level)?;
        writeln!(out, "Extraction:   {}", or_unknown(&book.extraction_method))?;
        writeln!(
            out,
            "Quality:      {} (confidence {:.2})",
            book.quality_score, book.overall_confidence
        )?;
        if !book.processing_flags.is_empty() {
            writeln!(out, "Flags:        {}", book.processing_flags.join(", "))?;
        }
        writeln!(out, "Added:        {}", book.date_added)?;

        if let Some(content) = content {
            let preview = [
                ("Abstract", &content.abstract_text),
                ("Title page", &content.title_page),
                ("First page", &content.first_page),
            ]
            .into_iter()
            .find(|(_, text)| !text.trim().is_empty());

            if let Some((label, text)) = preview {
                writeln!(out)?;
                writeln!(out, "CONTENT PREVIEW ({})", label)?;
                writeln!(out, "{}", truncate_chars(&collapse_whitespace(text), PREVIEW_CHARS))?;
            }
        }

        writeln!(out)?;
        write!(out, "{}", rule)
    })
}

// ====== Listings ======

/// One line per book with asset markers
pub fn render_list(books: &[BookSummary]) -> String {
    render(|out| {
        let rule = "-".repeat(82);
        writeln!(out, "{}", rule)?;
        writeln!(
            out,
            "{:>5} | {:<30} | {:<16} | {:<14} | Cover | Thumb",
            "ID", "Title", "Author", "Category"
        )?;
        writeln!(out, "{}", rule)?;
        for book in books {
            writeln!(
                out,
                "{:>5} | {:<30} | {:<16} | {:<14} | {:^5} | {:^5}",
                book.book_id,
                ellipsize(&book.title, 30),
                ellipsize(book.author.as_deref().unwrap_or(""), 16),
                ellipsize(book.category.as_deref().unwrap_or(UNCATEGORIZED), 14),
                tick(book.has_cover()),
                tick(book.has_thumbnail()),
            )?;
        }
        writeln!(out, "{}", rule)?;
        write!(out, "{} books  (✓ = present, ✗ = missing)", books.len())
    })
}

pub fn render_categories(groups: &[CategoryGroup]) -> String {
    render(|out| {
        writeln!(out, "BOOKS BY CATEGORY")?;
        write!(out, "{}", "=".repeat(WIDE_RULE))?;
        for group in groups {
            writeln!(out)?;
            write!(out, "\n{} ({} books)", group.name, group.count)?;
            for title in &group.samples {
                write!(out, "\n   - {}", ellipsize(title, 60))?;
            }
        }
        Ok(())
    })
}

pub fn render_thumbnails(summary: &ThumbnailSummary) -> String {
    render(|out| {
        writeln!(out, "THUMBNAIL STATUS")?;
        writeln!(out, "{}", "=".repeat(50))?;
        writeln!(out, "Books:              {}", summary.total)?;
        writeln!(out, "With thumbnails:    {}", summary.with_thumbnail)?;
        write!(out, "Without thumbnails: {}", summary.without_thumbnail)?;
        if !summary.samples.is_empty() {
            write!(out, "\n\nSample books with thumbnails:")?;
            for (title, path) in &summary.samples {
                write!(out, "\n   {:<40} {}", ellipsize(title, 40), path)?;
            }
        }
        Ok(())
    })
}

pub fn render_search(query: &str, hits: &[SearchHit]) -> String {
    render(|out| {
        if hits.is_empty() {
            return write!(out, "No books match \"{}\"", query);
        }
        writeln!(out, "{} results for \"{}\"", hits.len(), query)?;
        writeln!(out, "{}", "-".repeat(WIDE_RULE))?;
        for (i, hit) in hits.iter().enumerate() {
            if i > 0 {
                writeln!(out)?;
            }
            write!(
                out,
                "{:>5} | {:<34} | {:<16} | {}",
                hit.book_id,
                ellipsize(&hit.title, 34),
                ellipsize(hit.author.as_deref().unwrap_or(""), 16),
                hit.category.as_deref().unwrap_or(UNCATEGORIZED),
            )?;
        }
        Ok(())
    })
}

/// Thumbnail audit with expected paths, near matches and orphans
pub fn render_audit(audit: &ThumbnailAudit) -> String {
    render(|out| {
        writeln!(out, "THUMBNAIL AUDIT")?;
        writeln!(out, "{}", "=".repeat(WIDE_RULE))?;
        writeln!(out, "Books in catalog:       {}", audit.db_total)?;
        writeln!(out, "With thumbnail link:    {}", audit.db_with_thumbnail)?;
        writeln!(out, "Without thumbnail link: {}", audit.db_without_thumbnail)?;
        write!(out, "Thumbnail files:        {}", audit.files_on_disk)?;

        if !audit.missing.is_empty() {
            write!(out, "\n\nBooks without a linked thumbnail:")?;
            for missing in &audit.missing {
                write!(out, "\n  #{} {}", missing.book_id, ellipsize(&missing.title, 50))?;
                write!(
                    out,
                    "\n     expected {} [{}]",
                    missing.expected,
                    if missing.expected_exists { "exists" } else { "missing" }
                )?;
                for similar in &missing.similar {
                    write!(out, "\n     similar: {}", similar)?;
                }
            }
        }

        if !audit.orphans.is_empty() {
            write!(out, "\n\nThumbnails not linked to any book ({}):", audit.orphans.len())?;
            for orphan in &audit.orphans {
                write!(out, "\n  {}", orphan)?;
            }
        }
        Ok(())
    })
}
