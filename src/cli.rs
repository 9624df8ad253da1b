//! Command line interface

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;

use crate::analysis::{self, CollectionReport, PriorityBreakdown};
use crate::assets::{self, AssetLocator};
use crate::catalog;
use crate::config::LibraryConfig;
use crate::csv_store;
use crate::db;
use crate::export;
use crate::extractor::LegacyClassification;
use crate::migrate::{self, MigrationContext};
use crate::pipeline::{self, ExtractionOptions};
use crate::thumbnails;
use crate::viewer;

#[derive(Parser, Debug)]
#[command(name = "alexandria", version, about = "Book metadata extraction and catalog toolkit")]
pub struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Library data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn log_level(&self) -> LevelFilter {
        match (self.quiet, self.verbose) {
            (true, _) => LevelFilter::WARN,
            (false, 0) => LevelFilter::INFO,
            (false, 1) => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the data folders and an empty catalog
    Init,

    /// Extract metadata from every book into the metadata CSV
    Extract {
        #[arg(long)]
        books: Option<PathBuf>,
        #[arg(long)]
        csv: Option<PathBuf>,
        /// Previous library database holding categories and subjects
        #[arg(long)]
        legacy_db: Option<PathBuf>,
        #[arg(long)]
        workers: Option<usize>,
        /// Discard the CSV and start over
        #[arg(long)]
        restart: bool,
    },

    /// Summarise the metadata CSV
    Analyze {
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Build the Library of Congress enhancement queue
    LcQueue {
        #[arg(long)]
        csv: Option<PathBuf>,
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Generate cover thumbnails
    Thumbs {
        #[arg(long)]
        covers: Option<PathBuf>,
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        width: Option<u32>,
        #[arg(long)]
        height: Option<u32>,
    },

    /// Load the metadata CSV into the catalog
    Migrate {
        #[arg(long)]
        csv: Option<PathBuf>,
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Show one book
    View { id: i64 },

    /// List books
    List {
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Books grouped by category
    Categories,

    /// Thumbnail coverage
    Thumbnails,

    /// Full-text search
    Search {
        query: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Compare catalog thumbnail links with the files on disk
    AuditThumbs {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Link books whose thumbnail file now exists
        #[arg(long)]
        repair: bool,
    },

    /// Write the static site data file
    Export {
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Show or write the configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write the effective configuration to the config file
    Init,
}

/// Effective configuration: file, then environment, then flags
pub fn resolve_config(cli: &Cli) -> anyhow::Result<LibraryConfig> {
    let mut config = LibraryConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(dir) = &cli.data_dir {
        config.layout.data_dir = dir.clone();
    }
    Ok(config)
}

fn open_catalog(path: &Path) -> anyhow::Result<Connection> {
    if !path.exists() {
        bail!("Catalog not found at {}; run `alexandria migrate` first", path.display());
    }
    db::init_db(path).with_context(|| format!("Failed to open catalog {}", path.display()))
}

/// Run a parsed command line
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = resolve_config(&cli)?;
    let layout = config.layout.clone();

    match cli.command {
        Command::Init => {
            let created = layout.create_all().context("Failed to create data folders")?;
            for dir in &created {
                info!("Created {}", dir.display());
            }
            db::init_db(layout.database_path()).context("Failed to create catalog")?;
            println!(
                "Library ready at {} ({} folders created)",
                layout.data_dir.display(),
                created.len()
            );
        }

        Command::Extract { books, csv, legacy_db, workers, restart } => {
            if let Some(n) = workers {
                config.extraction.workers = n.max(1);
            }

            let legacy = match legacy_db.or_else(|| layout.legacy_database()) {
                Some(path) => db::load_legacy_classification(&path)
                    .with_context(|| format!("Failed to read legacy database {}", path.display()))?,
                None => LegacyClassification::new(),
            };

            let options = ExtractionOptions {
                books_dir: books.unwrap_or_else(|| layout.books_dir()),
                csv_path: csv.unwrap_or_else(|| layout.metadata_csv()),
                covers_dir: config.extraction.save_covers.then(|| layout.covers_dir()),
                restart,
            };

            let report = pipeline::run_extraction(&config.extraction, legacy, &options)
                .await
                .context("Extraction failed")?;
            println!("{}", report);
        }

        Command::Analyze { csv } => {
            let path = csv.unwrap_or_else(|| layout.metadata_csv());
            let records = csv_store::read_metadata(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            if records.is_empty() {
                warn!("No records in {}", path.display());
            }
            println!("{}", CollectionReport::from_records(&records));
        }

        Command::LcQueue { csv, output } => {
            let path = csv.unwrap_or_else(|| layout.metadata_csv());
            let records = csv_store::read_metadata(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let queue = analysis::build_lc_queue(&records);
            let output = output.unwrap_or_else(|| layout.lc_queue_csv());
            analysis::write_lc_queue(&output, &queue)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!("Wrote {} entries to {}", queue.len(), output.display());
            println!("{}", PriorityBreakdown::of(&queue));
        }

        Command::Thumbs { covers, output, width, height } => {
            let mut settings = config.thumbnails.clone();
            if let Some(w) = width {
                settings.width = w;
            }
            if let Some(h) = height {
                settings.height = h;
            }
            let covers = covers.unwrap_or_else(|| layout.covers_dir());
            let output = output.unwrap_or_else(|| layout.thumbs_dir());

            let report = tokio::task::spawn_blocking(move || {
                thumbnails::generate_thumbnails(&covers, &output, &settings)
            })
            .await
            .context("Thumbnail worker stopped")?
            .context("Thumbnail generation failed")?;
            println!("{}", report);
        }

        Command::Migrate { csv, db: db_path } => {
            let csv = csv.unwrap_or_else(|| layout.metadata_csv());
            let db_path = db_path.unwrap_or_else(|| layout.database_path());

            let rows = csv_store::read_metadata_rows(&csv)
                .with_context(|| format!("Failed to read {}", csv.display()))?;
            let mut conn = db::init_db(&db_path)
                .with_context(|| format!("Failed to open catalog {}", db_path.display()))?;
            let locator = AssetLocator::new(&layout);
            let ctx = MigrationContext {
                layout: &layout,
                locator: &locator,
                config: &config.migration,
            };

            let mut stats = migrate::migrate_csv(&mut conn, &rows.records, &ctx).context("Migration failed")?;
            stats.total += rows.skipped;
            stats.errors += rows.skipped;
            println!("{}", stats);
        }

        Command::View { id } => {
            let conn = open_catalog(&layout.database_path())?;
            let Some(book) = catalog::get_book(&conn, id)? else {
                bail!("Book #{} not found", id);
            };
            let content = catalog::get_content(&conn, id)?;
            println!("{}", viewer::render_book(&book, content.as_ref()));
        }

        Command::List { limit } => {
            let conn = open_catalog(&layout.database_path())?;
            println!("{}", viewer::render_list(&catalog::list_books(&conn, limit)?));
        }

        Command::Categories => {
            let conn = open_catalog(&layout.database_path())?;
            println!("{}", viewer::render_categories(&catalog::category_groups(&conn)?));
        }

        Command::Thumbnails => {
            let conn = open_catalog(&layout.database_path())?;
            println!("{}", viewer::render_thumbnails(&catalog::thumbnail_summary(&conn)?));
        }

        Command::Search { query, limit } => {
            let conn = open_catalog(&layout.database_path())?;
            let hits = catalog::search(&conn, &query, limit)?;
            println!("{}", viewer::render_search(&query, &hits));
        }

        Command::AuditThumbs { limit, repair } => {
            let conn = open_catalog(&layout.database_path())?;
            let locator = AssetLocator::new(&layout);
            if repair {
                let linked = assets::repair_thumbnail_links(&conn, &locator)?;
                println!("Linked {} thumbnails", linked);
            }
            let audit = assets::audit_thumbnails(&conn, &locator, limit)?;
            println!("{}", viewer::render_audit(&audit));
        }

        Command::Export { output } => {
            let conn = open_catalog(&layout.database_path())?;
            let output = output.unwrap_or_else(|| layout.site_data_path(&config.export));
            let data = export::build_site_data(&conn)?;
            export::write_site_data(&output, &data)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!("Exported {} books to {}", data.total_books, output.display());
        }

        Command::Config { action: ConfigAction::Show } => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }

        Command::Config { action: ConfigAction::Init } => {
            let path = config.save(cli.config.as_deref())?;
            println!("Wrote {}", path.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_extract_flags() {
        let cli = Cli::parse_from([
            "alexandria", "--data-dir", "/lib", "-v", "extract", "--workers", "5", "--restart",
        ]);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/lib")));
        assert_eq!(cli.log_level(), LevelFilter::DEBUG);
        match cli.command {
            Command::Extract { workers, restart, books, .. } => {
                assert_eq!(workers, Some(5));
                assert!(restart);
                assert!(books.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_query_commands() {
        let cli = Cli::parse_from(["alexandria", "search", "rust ownership"]);
        assert!(matches!(cli.command, Command::Search { ref query, limit: 20 } if query == "rust ownership"));

        let cli = Cli::parse_from(["alexandria", "-q", "audit-thumbs", "--repair", "--limit", "5"]);
        assert_eq!(cli.log_level(), LevelFilter::WARN);
        assert!(matches!(cli.command, Command::AuditThumbs { limit: 5, repair: true }));

        let cli = Cli::parse_from(["alexandria", "config", "show"]);
        assert!(matches!(cli.command, Command::Config { action: ConfigAction::Show }));
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["alexandria", "-q", "-v", "list"]).is_err());
    }

    #[tokio::test]
    async fn test_init_and_query_empty_catalog() {
        let temp = tempfile::TempDir::new().unwrap();
        let data = temp.path().join("Data");
        let config = temp.path().join("config.json");
        let args = |cmd: &[&str]| {
            let mut v = vec![
                "alexandria".to_string(),
                "--config".to_string(),
                config.display().to_string(),
                "--data-dir".to_string(),
                data.display().to_string(),
            ];
            v.extend(cmd.iter().map(|s| s.to_string()));
            Cli::parse_from(v)
        };

        assert!(run(args(&["list"])).await.is_err());
        run(args(&["init"])).await.unwrap();
        assert!(data.join("Books").is_dir());
        assert!(data.join("Database").join("Alexandria.db").is_file());

        run(args(&["list"])).await.unwrap();
        assert!(run(args(&["view", "1"])).await.is_err());
        run(args(&["config", "init"])).await.unwrap();
        assert!(config.is_file());

        run(args(&["export"])).await.unwrap();
        let site = data.join("site_data.json");
        assert!(site.is_file());
        assert!(std::fs::read_to_string(&site).unwrap().contains("\"total_books\": 0"));
    }
}
