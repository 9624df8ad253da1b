/// Inspect what the extractor sees in one book
///
/// Prints the document info, the first pages of text and the resulting
/// metadata record. Useful when a book scores lower than expected.

use std::path::PathBuf;

use alexandria_lib::config::ExtractionConfig;
use alexandria_lib::extractor::{LegacyClassification, MetadataExtractor};
use alexandria_lib::source::SourceRouter;
use alexandria_lib::text::{collapse_whitespace, ellipsize};

fn main() {
    let Some(path) = std::env::args().nth(1).map(PathBuf::from) else {
        eprintln!("Usage: explore_pdf <book.pdf|book.epub>");
        std::process::exit(2);
    };

    if !path.exists() {
        eprintln!("File not found: {}", path.display());
        std::process::exit(1);
    }

    let config = ExtractionConfig::default();
    let router = SourceRouter::new();
    let source = match router.route(&path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    println!("Reading {} with the {} source\n", path.display(), source.format_name());

    match source.extract(&path, &config) {
        Ok(doc) => {
            println!("=== Document info ===");
            println!("  Title:    {:?}", doc.info.title);
            println!("  Author:   {:?}", doc.info.author);
            println!("  Subject:  {:?}", doc.info.subject);
            println!("  Creator:  {:?}", doc.info.creator);
            println!("  Producer: {:?}", doc.info.producer);
            println!("  Created:  {:?}", doc.info.creation_date);
            println!("  Pages:    {}", doc.page_count);
            println!("  Methods:  {}", doc.methods.join(", "));
            if !doc.identifiers.is_empty() {
                println!("  Identifiers: {}", doc.identifiers.join(", "));
            }
            if let Some((bytes, mime)) = &doc.cover {
                println!("  Cover:    {} bytes ({})", bytes.len(), mime);
            }
            for error in &doc.errors {
                println!("  Error:    {}", error);
            }
            println!();

            println!("=== Page text ===");
            for (i, page) in doc.pages.iter().enumerate() {
                println!("  [{}] {}", i + 1, ellipsize(&collapse_whitespace(page), 100));
            }
            println!();
        }
        Err(e) => println!("Source failed: {}\n", e),
    }

    let extractor = MetadataExtractor::new(config, LegacyClassification::new());
    match extractor.extract_file(&path) {
        Ok(record) => {
            println!("=== Metadata record ===");
            match serde_json::to_string_pretty(&record) {
                Ok(json) => println!("{}", json),
                Err(e) => eprintln!("Could not render record: {}", e),
            }
        }
        Err(e) => eprintln!("Extraction failed: {}", e),
    }
}
