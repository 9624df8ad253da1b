use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::catalog;
use crate::config::DataLayout;
use crate::error::Result;

/// Extensions tried, in order, when looking for an exact cover or thumbnail match
const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// SHA-256 of a file, read in 4096-byte chunks
pub fn file_hash(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 4096];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Save an embedded cover as `<stem>.<ext>`
///
/// # Arguments
/// - `covers_dir`: destination folder
/// - `stem`: book file stem
/// - `data`: image bytes
/// - `mime`: media type, used to pick the extension
///
/// # Returns
/// The cover path; an existing cover is left untouched
pub fn save_cover(covers_dir: &Path, stem: &str, data: &[u8], mime: &str) -> Result<PathBuf> {
    let ext = match mime {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/bmp" => "bmp",
        _ => "png",
    };

    fs::create_dir_all(covers_dir)?;
    let path = covers_dir.join(format!("{}.{}", stem, ext));
    if !path.exists() {
        fs::write(&path, data)?;
        debug!("Saved cover {}", path.display());
    }
    Ok(path)
}

/// Lower-case stem with whitespace collapsed
fn normalize_stem(stem: &str) -> String {
    crate::text::collapse_whitespace(stem).to_lowercase()
}

/// Image files of a folder indexed by normalised stem
#[derive(Debug, Default)]
struct ImageIndex {
    dir: PathBuf,
    by_stem: HashMap<String, PathBuf>,
    files: Vec<PathBuf>,
}

impl ImageIndex {
    fn scan(dir: &Path) -> Self {
        let mut index = ImageIndex {
            dir: dir.to_path_buf(),
            ..ImageIndex::default()
        };

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => return index,
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                index.by_stem.entry(normalize_stem(stem)).or_insert_with(|| path.clone());
            }
            index.files.push(path);
        }
        index.files.sort();
        index
    }

    fn find(&self, stem: &str) -> Option<PathBuf> {
        for ext in IMAGE_EXTENSIONS {
            let exact = self.dir.join(format!("{}.{}", stem, ext));
            if exact.is_file() {
                return Some(exact);
            }
        }
        self.by_stem.get(&normalize_stem(stem)).cloned()
    }

    /// Files whose stem contains `stem` or is contained in it, case-insensitive
    fn similar(&self, stem: &str, limit: usize) -> Vec<PathBuf> {
        let needle = normalize_stem(stem);
        if needle.is_empty() {
            return Vec::new();
        }
        self.files
            .iter()
            .filter(|p| {
                let candidate = p
                    .file_stem()
                    .map(|s| normalize_stem(&s.to_string_lossy()))
                    .unwrap_or_default();
                !candidate.is_empty() && (candidate.contains(&needle) || needle.contains(&candidate))
            })
            .take(limit)
            .cloned()
            .collect()
    }
}

/// Cover and thumbnail locator
///
/// Tries `<stem>.png`, `.jpg`, `.jpeg`, then a file whose stem matches once
/// whitespace and case are normalised.
pub struct AssetLocator {
    layout: DataLayout,
    covers: ImageIndex,
    thumbs: ImageIndex,
}

impl AssetLocator {
    pub fn new(layout: &DataLayout) -> Self {
        Self {
            covers: ImageIndex::scan(&layout.covers_dir()),
            thumbs: ImageIndex::scan(&layout.thumbs_dir()),
            layout: layout.clone(),
        }
    }

    /// Cover path relative to the data directory
    pub fn find_cover(&self, stem: &str) -> Option<String> {
        self.covers.find(stem).map(|p| self.layout.relative(&p))
    }

    /// Thumbnail path relative to the data directory
    pub fn find_thumbnail(&self, stem: &str) -> Option<String> {
        self.thumbs.find(stem).map(|p| self.layout.relative(&p))
    }

    pub fn thumbnail_files(&self) -> usize {
        self.thumbs.files.len()
    }

    pub fn cover_files(&self) -> usize {
        self.covers.files.len()
    }
}

// ==================== Thumbnail audit ====================

/// A catalog book without a linked thumbnail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissingThumbnail {
    pub book_id: i64,
    pub file_name: String,
    pub title: String,
    /// `Thumbs/<stem>.png`
    pub expected: String,
    pub expected_exists: bool,
    pub similar: Vec<String>,
}

/// Catalog and disk disagreement about thumbnails
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThumbnailAudit {
    pub db_total: i64,
    pub db_with_thumbnail: i64,
    pub db_without_thumbnail: i64,
    pub files_on_disk: usize,
    pub missing: Vec<MissingThumbnail>,
    /// Thumbnail files no book refers to
    pub orphans: Vec<String>,
}

fn stem_of(file_name: &str) -> String {
    Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| file_name.to_string())
}

/// Compare catalog thumbnail links with the thumbnails folder
///
/// # Arguments
/// - `limit`: maximum books without thumbnail to inspect
pub fn audit_thumbnails(conn: &Connection, locator: &AssetLocator, limit: usize) -> Result<ThumbnailAudit> {
    let summary = catalog::thumbnail_summary(conn)?;

    let mut missing = Vec::new();
    for (book_id, file_name, title) in catalog::books_missing_thumbnail(conn, Some(limit))? {
        let stem = stem_of(&file_name);
        let expected_path = locator.thumbs.dir.join(format!("{}.png", stem));
        missing.push(MissingThumbnail {
            book_id,
            file_name,
            title,
            expected: locator.layout.relative(&expected_path),
            expected_exists: expected_path.is_file(),
            similar: locator
                .thumbs
                .similar(&stem, 3)
                .iter()
                .map(|p| locator.layout.relative(p))
                .collect(),
        });
    }

    let referenced: HashSet<String> = catalog::thumbnail_paths(conn)?
        .iter()
        .filter_map(|p| Path::new(p).file_name().map(|n| n.to_string_lossy().to_string()))
        .collect();
    let orphans = locator
        .thumbs
        .files
        .iter()
        .filter(|p| {
            p.file_name()
                .map(|n| !referenced.contains(&*n.to_string_lossy()))
                .unwrap_or(false)
        })
        .map(|p| locator.layout.relative(p))
        .collect();

    Ok(ThumbnailAudit {
        db_total: summary.total,
        db_with_thumbnail: summary.with_thumbnail,
        db_without_thumbnail: summary.without_thumbnail,
        files_on_disk: locator.thumbnail_files(),
        missing,
        orphans,
    })
}

/// Link books to thumbnails that now exist on disk
///
/// # Returns
/// Number of books updated
pub fn repair_thumbnail_links(conn: &Connection, locator: &AssetLocator) -> Result<usize> {
    let mut repaired = 0;
    for (book_id, file_name, _) in catalog::books_missing_thumbnail(conn, None)? {
        if let Some(path) = locator.find_thumbnail(&stem_of(&file_name)) {
            catalog::set_thumbnail(conn, book_id, &path)?;
            repaired += 1;
        }
    }
    info!("Repaired {} thumbnail links", repaired);
    Ok(repaired)
}
