use epub::doc::EpubDoc;
use scraper::{Html, Selector};
use tracing::debug;

use super::*;

/// EPUB source
///
/// Metadata comes from the OPF package; each spine chapter counts as a page.
#[derive(Clone)]
pub struct EpubSource;

impl EpubSource {
    pub fn new() -> Self {
        Self
    }

    /// Plain text of an XHTML chapter, one line per text node
    pub fn html_to_text(&self, html: &str) -> String {
        let document = Html::parse_document(html);
        let body_selector = Selector::parse("body").unwrap();

        let lines: Vec<String> = match document.select(&body_selector).next() {
            Some(body) => body.text().map(collapse_line).filter(|l| !l.is_empty()).collect(),
            None => document.root_element().text().map(collapse_line).filter(|l| !l.is_empty()).collect(),
        };

        lines.join("\n")
    }
}

fn collapse_line(text: &str) -> String {
    crate::text::collapse_whitespace(text)
}

/// Text value of an OPF metadata entry
fn meta<R: std::io::Read + std::io::Seek>(doc: &EpubDoc<R>, property: &str) -> Option<String> {
    doc.mdata(property)
        .map(|item| item.value.trim().to_string())
        .filter(|value| !value.is_empty())
}

impl MetadataSource for EpubSource {
    fn extract(&self, path: &Path, config: &ExtractionConfig) -> Result<SourceDocument> {
        let mut doc = EpubDoc::new(path).map_err(|e| LibraryError::Epub {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let mut document = SourceDocument {
            info: DocumentInfo {
                title: meta(&doc, "title"),
                author: meta(&doc, "creator"),
                subject: meta(&doc, "subject"),
                creator: meta(&doc, "contributor"),
                producer: meta(&doc, "publisher"),
                creation_date: meta(&doc, "date"),
            },
            ..SourceDocument::default()
        };

        if let Some(identifier) = meta(&doc, "identifier") {
            document.identifiers.push(identifier);
        }

        let num_chapters = doc.get_num_chapters();
        document.page_count = num_chapters;

        for i in 0..num_chapters.min(config.max_pages) {
            if !doc.set_current_chapter(i) {
                document.errors.push(format!("chapter {}: not readable", i));
                continue;
            }
            match doc.get_current_str() {
                Some((html, _mime)) => document.pages.push(self.html_to_text(&html)),
                None => document.errors.push(format!("chapter {}: empty", i)),
            }
        }

        if !document.is_empty() {
            document.methods.push("epub".to_string());
        }

        document.cover = doc.get_cover();

        debug!(
            path = %path.display(),
            chapters = num_chapters,
            has_cover = document.cover.is_some(),
            "EPUB read"
        );

        Ok(document)
    }

    fn format_name(&self) -> &'static str {
        "epub"
    }

    fn supported_extensions(&self) -> Vec<&str> {
        vec!["epub"]
    }
}

impl Default for EpubSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod sample {
    //! Small generated EPUBs for tests

    use std::fs::File;
    use std::io::Write;
    use std::path::Path;

    use zip::write::SimpleFileOptions;
    use zip::{CompressionMethod, ZipWriter};

    /// Bytes stored as the cover image; never decoded
    pub const COVER_BYTES: &[u8] = b"\xFF\xD8\xFF\xE0not-really-a-jpeg";

    const CONTAINER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

    const OPF: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="bookid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="bookid">urn:isbn:9780596520687</dc:identifier>
    <dc:title>Sample Book</dc:title>
    <dc:creator>Ada Writer</dc:creator>
    <dc:contributor>Bob Editor</dc:contributor>
    <dc:subject>Testing</dc:subject>
    <dc:publisher>Example Press</dc:publisher>
    <dc:date>2019-05-01</dc:date>
    <dc:language>en</dc:language>
    <meta name="cover" content="cover-img"/>
  </metadata>
  <manifest>
    <item id="cover-img" href="cover.jpg" media-type="image/jpeg" properties="cover-image"/>
    <item id="ch1" href="ch1.xhtml" media-type="application/xhtml+xml"/>
    <item id="ch2" href="ch2.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
  <spine>
    <itemref idref="ch1"/>
    <itemref idref="ch2"/>
  </spine>
</package>"#;

    fn chapter(lines: &[&str]) -> String {
        let body: String = lines.iter().map(|l| format!("<p>{}</p>", l)).collect();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml"><head><title>x</title></head><body>{}</body></html>"#,
            body
        )
    }

    /// Write a two-chapter EPUB with full OPF metadata and a JPEG cover
    pub fn write_epub(path: &Path) {
        let file = File::create(path).unwrap();
        let mut zip = ZipWriter::new(file);
        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

        let entries: Vec<(&str, Vec<u8>)> = vec![
            ("mimetype", b"application/epub+zip".to_vec()),
            ("META-INF/container.xml", CONTAINER.as_bytes().to_vec()),
            ("OEBPS/content.opf", OPF.as_bytes().to_vec()),
            ("OEBPS/ch1.xhtml", chapter(&["Sample Book", "Ada Writer"]).into_bytes()),
            (
                "OEBPS/ch2.xhtml",
                chapter(&["Copyright © 2019 Example Press", "ISBN 978-0-596-52068-7", "Second Edition"]).into_bytes(),
            ),
            ("OEBPS/cover.jpg", COVER_BYTES.to_vec()),
        ];

        for (name, data) in entries {
            zip.start_file(name, stored).unwrap();
            zip.write_all(&data).unwrap();
        }
        zip.finish().unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_to_text() {
        let source = EpubSource::new();
        let html = r#"<html><head><title>ignored</title></head>
            <body><h1>Contents</h1><p>Chapter   1
            Getting started</p><p>Chapter 2</p></body></html>"#;

        let text = source.html_to_text(html);
        assert_eq!(text, "Contents\nChapter 1 Getting started\nChapter 2");
    }

    #[test]
    fn test_html_fragment_without_body() {
        let source = EpubSource::new();
        assert_eq!(source.html_to_text("<p>Copyright © 2020</p>"), "Copyright © 2020");
    }

    #[test]
    fn test_missing_epub_is_error() {
        let result = EpubSource::new().extract(Path::new("/no/such/book.epub"), &ExtractionConfig::default());
        assert!(matches!(result, Err(LibraryError::Epub { .. })));
    }

    #[test]
    fn test_extract_epub_metadata_and_chapters() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("Sample Book.epub");
        sample::write_epub(&path);

        let doc = EpubSource::new().extract(&path, &ExtractionConfig::default()).unwrap();
        assert_eq!(doc.info.title.as_deref(), Some("Sample Book"));
        assert_eq!(doc.info.author.as_deref(), Some("Ada Writer"));
        assert_eq!(doc.info.creator.as_deref(), Some("Bob Editor"));
        assert_eq!(doc.info.subject.as_deref(), Some("Testing"));
        assert_eq!(doc.info.producer.as_deref(), Some("Example Press"));
        assert_eq!(doc.info.creation_date.as_deref(), Some("2019-05-01"));
        assert_eq!(doc.identifiers, vec!["urn:isbn:9780596520687".to_string()]);

        assert_eq!(doc.page_count, 2);
        assert_eq!(doc.pages.len(), 2);
        assert_eq!(doc.pages[0], "Sample Book\nAda Writer");
        assert!(doc.pages[1].contains("ISBN 978-0-596-52068-7"));
        assert_eq!(doc.methods, vec!["epub".to_string()]);

        let (bytes, mime) = doc.cover.expect("cover");
        assert_eq!(bytes, sample::COVER_BYTES);
        assert_eq!(mime, "image/jpeg");
    }

    #[test]
    fn test_extract_epub_respects_max_pages() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("Short.epub");
        sample::write_epub(&path);

        let config = ExtractionConfig { max_pages: 1, ..ExtractionConfig::default() };
        let doc = EpubSource::new().extract(&path, &config).unwrap();
        assert_eq!(doc.page_count, 2);
        assert_eq!(doc.pages.len(), 1);
    }
}
