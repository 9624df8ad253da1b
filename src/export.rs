//! Static site data export
//!
//! Writes the catalog summary the web front end loads as `site_data.json`.

use std::fs;
use std::path::Path;

use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::catalog::{self, UNCATEGORIZED};
use crate::error::Result;
use crate::extractor::round2;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteCategory {
    pub name: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteBook {
    pub id: i64,
    pub title: String,
    pub author: Option<String>,
    pub category: String,
    pub confidence: f64,
    pub size_mb: f64,
    pub pages: i64,
    pub year: Option<i32>,
    pub thumbnail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteData {
    pub generated_at: String,
    pub total_books: i64,
    pub total_size_mb: f64,
    pub average_confidence: f64,
    pub categories: Vec<SiteCategory>,
    pub books: Vec<SiteBook>,
}

/// Collect the site data from the catalog
pub fn build_site_data(conn: &Connection) -> Result<SiteData> {
    let stats = catalog::library_stats(conn)?;

    let books = catalog::list_books(conn, None)?
        .into_iter()
        .map(|b| SiteBook {
            id: b.book_id,
            title: b.title,
            author: b.author,
            category: b.category.unwrap_or_else(|| UNCATEGORIZED.to_string()),
            confidence: round2(b.overall_confidence),
            size_mb: round2(b.file_size as f64 / BYTES_PER_MB),
            pages: b.page_count,
            year: b.year,
            thumbnail: b.thumbnail_path,
        })
        .collect();

    Ok(SiteData {
        generated_at: Utc::now().to_rfc3339(),
        total_books: stats.total_books,
        total_size_mb: round2(stats.total_size as f64 / BYTES_PER_MB),
        average_confidence: round2(stats.average_confidence),
        categories: stats
            .categories
            .into_iter()
            .map(|(name, count)| SiteCategory { name, count })
            .collect(),
        books,
    })
}

/// Write the site data as pretty JSON
pub fn write_site_data(path: &Path, data: &SiteData) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, serde_json::to_string_pretty(data)?)?;
    info!("Wrote {} books to {}", data.books.len(), path.display());
    Ok(())
}
