//! Library configuration and on-disk data layout

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::{LibraryError, Result};

/// Environment variable overriding the data directory
pub const ENV_DATA_DIR: &str = "ALEXANDRIA_DATA_DIR";
/// Environment variable overriding the catalog database path
pub const ENV_DB_PATH: &str = "ALEXANDRIA_DB_PATH";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Folder layout of the library
    pub layout: DataLayout,
    /// Metadata extraction settings
    pub extraction: ExtractionConfig,
    /// Thumbnail generation settings
    pub thumbnails: ThumbnailConfig,
    /// CSV to catalog migration settings
    pub migration: MigrationConfig,
    /// Static site export settings
    pub export: ExportConfig,
}

/// Folder layout under the data directory.
///
/// Every folder can be overridden on its own; unset folders resolve
/// relative to `data_dir`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataLayout {
    pub data_dir: PathBuf,
    pub books_dir: Option<PathBuf>,
    pub covers_dir: Option<PathBuf>,
    pub thumbs_dir: Option<PathBuf>,
    pub database_path: Option<PathBuf>,
    pub metadata_csv: Option<PathBuf>,
    pub lc_queue_csv: Option<PathBuf>,
    /// Classification database of the previous library system
    pub legacy_database: Option<PathBuf>,
}

/// Extraction limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Characters kept in the full text sample
    pub max_text_length: usize,
    /// Characters kept from the first page
    pub first_page_length: usize,
    /// Characters kept from the table of contents
    pub toc_length: usize,
    /// Pages read per document
    pub max_pages: usize,
    /// Hard limit per file
    pub file_timeout_secs: u64,
    /// Files processed concurrently
    pub workers: usize,
    /// Log progress every N files
    pub progress_interval: usize,
    /// Save EPUB covers into the covers folder
    pub save_covers: bool,
}

/// Thumbnail settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    pub width: u32,
    pub height: u32,
    /// Write a gray placeholder when a cover cannot be decoded
    pub placeholder_on_error: bool,
}

/// Migration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Characters kept per BookContent text column
    pub content_limit: usize,
    /// OverallConfidence at or above which a book counts as high confidence
    pub high_confidence: f64,
}

/// Export settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub output: PathBuf,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            layout: DataLayout::default(),
            extraction: ExtractionConfig::default(),
            thumbnails: ThumbnailConfig::default(),
            migration: MigrationConfig::default(),
            export: ExportConfig::default(),
        }
    }
}

impl Default for DataLayout {
    fn default() -> Self {
        Self::new("Data")
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_text_length: 20_000,
            first_page_length: 1_000,
            toc_length: 15_000,
            max_pages: 12,
            file_timeout_secs: 120,
            workers: 3,
            progress_interval: 5,
            save_covers: true,
        }
    }
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            width: 64,
            height: 85,
            placeholder_on_error: true,
        }
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            content_limit: 10_000,
            high_confidence: 0.8,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output: PathBuf::from("site_data.json"),
        }
    }
}

// ====== Layout ======

impl DataLayout {
    /// Layout rooted at `data_dir` with no overrides
    pub fn new<P: Into<PathBuf>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.into(),
            books_dir: None,
            covers_dir: None,
            thumbs_dir: None,
            database_path: None,
            metadata_csv: None,
            lc_queue_csv: None,
            legacy_database: None,
        }
    }

    pub fn books_dir(&self) -> PathBuf {
        self.books_dir.clone().unwrap_or_else(|| self.data_dir.join("Books"))
    }

    pub fn covers_dir(&self) -> PathBuf {
        self.covers_dir.clone().unwrap_or_else(|| self.data_dir.join("Covers"))
    }

    pub fn thumbs_dir(&self) -> PathBuf {
        self.thumbs_dir.clone().unwrap_or_else(|| self.data_dir.join("Thumbs"))
    }

    pub fn database_dir(&self) -> PathBuf {
        self.data_dir.join("Database")
    }

    pub fn system_dir(&self) -> PathBuf {
        self.data_dir.join("System")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.data_dir.join("Backups")
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| self.database_dir().join("Alexandria.db"))
    }

    pub fn metadata_csv(&self) -> PathBuf {
        self.metadata_csv
            .clone()
            .unwrap_or_else(|| self.system_dir().join("book_metadata.csv"))
    }

    pub fn lc_queue_csv(&self) -> PathBuf {
        self.lc_queue_csv
            .clone()
            .unwrap_or_else(|| self.system_dir().join("lc_enhancement_queue.csv"))
    }

    pub fn legacy_database(&self) -> Option<PathBuf> {
        self.legacy_database.clone()
    }

    /// Create every folder of the layout
    ///
    /// # Returns
    /// The folders that did not exist before
    pub fn create_all(&self) -> Result<Vec<PathBuf>> {
        let mut created = Vec::new();
        let mut dirs = vec![
            self.books_dir(),
            self.covers_dir(),
            self.thumbs_dir(),
            self.database_dir(),
            self.system_dir(),
            self.backups_dir(),
        ];
        if let Some(parent) = self.database_path().parent() {
            dirs.push(parent.to_path_buf());
        }

        for dir in dirs {
            if !dir.exists() {
                std::fs::create_dir_all(&dir)?;
                created.push(dir);
            }
        }
        Ok(created)
    }

    /// Site data file; a relative `export.output` lives under the data directory
    pub fn site_data_path(&self, export: &ExportConfig) -> PathBuf {
        if export.output.is_absolute() {
            export.output.clone()
        } else {
            self.data_dir.join(&export.output)
        }
    }

    /// Path relative to the data directory when it lives inside it
    pub fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.data_dir)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

// ====== Loading ======

impl LibraryConfig {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "BowersWorld", "Alexandria")
            .map(|dirs| dirs.config_dir().join("config.json"))
    }

    /// Load configuration
    ///
    /// # Arguments
    /// - `path`: explicit config file; falls back to the platform config dir
    ///
    /// A missing file yields defaults. Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::default_path(),
        };

        let mut config = match path {
            Some(p) if p.exists() => {
                let content = std::fs::read_to_string(&p)?;
                let config: Self = serde_json::from_str(&content)
                    .map_err(|e| LibraryError::Config(format!("{}: {}", p.display(), e)))?;
                tracing::debug!("Loaded config from: {}", p.display());
                config
            }
            _ => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply environment overrides through a lookup function
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_DATA_DIR).filter(|v| !v.is_empty()) {
            self.layout.data_dir = PathBuf::from(dir);
        }
        if let Some(db) = lookup(ENV_DB_PATH).filter(|v| !v.is_empty()) {
            self.layout.database_path = Some(PathBuf::from(db));
        }
    }

    /// Save configuration to `path`, or the default location
    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()
                .ok_or_else(|| LibraryError::Config("Could not determine config directory".to_string()))?,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, content)?;

        tracing::info!("Saved config to: {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_defaults() {
        let layout = DataLayout::new("/lib");
        assert_eq!(layout.books_dir(), PathBuf::from("/lib/Books"));
        assert_eq!(layout.thumbs_dir(), PathBuf::from("/lib/Thumbs"));
        assert_eq!(layout.database_path(), PathBuf::from("/lib/Database/Alexandria.db"));
        assert_eq!(layout.metadata_csv(), PathBuf::from("/lib/System/book_metadata.csv"));
        assert!(layout.legacy_database().is_none());
    }

    #[test]
    fn test_layout_overrides() {
        let mut layout = DataLayout::new("/lib");
        layout.books_dir = Some(PathBuf::from("/mnt/pdfs"));
        assert_eq!(layout.books_dir(), PathBuf::from("/mnt/pdfs"));
        assert_eq!(layout.covers_dir(), PathBuf::from("/lib/Covers"));
    }

    #[test]
    fn test_create_all_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let layout = DataLayout::new(temp.path().join("Data"));

        let created = layout.create_all().unwrap();
        assert!(created.len() >= 6);
        assert!(layout.books_dir().is_dir());
        assert!(layout.system_dir().is_dir());

        let again = layout.create_all().unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn test_relative_path() {
        let layout = DataLayout::new("/lib");
        assert_eq!(layout.relative(Path::new("/lib/Thumbs/a.png")), "Thumbs/a.png");
        assert_eq!(layout.relative(Path::new("/other/a.png")), "/other/a.png");
    }

    #[test]
    fn test_site_data_path() {
        let layout = DataLayout::new("/lib");
        assert_eq!(layout.site_data_path(&ExportConfig::default()), PathBuf::from("/lib/site_data.json"));

        let absolute = ExportConfig { output: PathBuf::from("/srv/www/site_data.json") };
        assert_eq!(layout.site_data_path(&absolute), PathBuf::from("/srv/www/site_data.json"));
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let temp = TempDir::new().unwrap();
        let config = LibraryConfig::load(Some(&temp.path().join("none.json"))).unwrap();
        assert_eq!(config.extraction.workers, 3);
        assert_eq!(config.thumbnails.width, 64);
        assert_eq!(config.thumbnails.height, 85);
    }

    #[test]
    fn test_save_and_load_partial() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, r#"{"extraction": {"workers": 8}}"#).unwrap();

        let config = LibraryConfig::load(Some(&path)).unwrap();
        assert_eq!(config.extraction.workers, 8);
        assert_eq!(config.extraction.max_pages, 12);

        let saved = config.save(Some(&path)).unwrap();
        let reloaded = LibraryConfig::load(Some(&saved)).unwrap();
        assert_eq!(reloaded.extraction.workers, 8);
    }

    #[test]
    fn test_invalid_config_is_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(LibraryConfig::load(Some(&path)), Err(LibraryError::Config(_))));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = LibraryConfig::default();
        config.apply_env(|key| match key {
            ENV_DATA_DIR => Some("/srv/library".to_string()),
            ENV_DB_PATH => Some("/tmp/catalog.db".to_string()),
            _ => None,
        });
        assert_eq!(config.layout.data_dir, PathBuf::from("/srv/library"));
        assert_eq!(config.layout.database_path(), PathBuf::from("/tmp/catalog.db"));
    }
}
