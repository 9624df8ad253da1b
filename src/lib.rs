//! Digital Alexandria
//!
//! Turns a folder of PDF and EPUB books into a metadata CSV, a searchable
//! SQLite catalog, cover thumbnails and a static site data file.

pub mod analysis;
pub mod assets;
pub mod biblio;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod csv_store;
pub mod db;
pub mod error;
pub mod export;
pub mod extraction_queue;
pub mod extractor;
pub mod migrate;
pub mod pipeline;
pub mod source;
pub mod text;
pub mod thumbnails;
pub mod viewer;

pub use config::{DataLayout, LibraryConfig};
pub use error::{LibraryError, Result};

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialise logging to stderr at `level`
pub fn init_tracing(level: LevelFilter) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(level)
        .init();
}
