use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::text::{collapse_whitespace, truncate_chars};

/// Earliest publication year accepted from free text
pub const MIN_YEAR: i32 = 1900;
/// Latest publication year accepted from free text
pub const MAX_YEAR: i32 = 2030;

/// Characters of the full text searched as the lowest-priority source
const ALL_TEXT_WINDOW: usize = 25_000;
/// Longest abstract kept
const ABSTRACT_LENGTH: usize = 2_000;

/// Bibliographic details recognised in the text of a book
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BiblioRecord {
    pub isbn: Option<String>,
    pub lccn: Option<String>,
    pub issn: Option<String>,
    pub oclc: Option<String>,
    pub doi: Option<String>,
    pub year: Option<i32>,
    pub publisher: Option<String>,
    pub edition: Option<String>,
    pub abstract_text: Option<String>,
}

/// Page texts handed to the recogniser, highest priority first
#[derive(Debug, Clone, Copy, Default)]
pub struct PageTexts<'a> {
    /// Copyright page (priority 3)
    pub copyright: &'a str,
    /// Title page (priority 2)
    pub title: &'a str,
    /// Everything read from the book (priority 1)
    pub all: &'a str,
}

impl<'a> PageTexts<'a> {
    /// Non-empty texts with their priority, highest first
    fn prioritised(&self) -> Vec<(&'a str, u8)> {
        [
            (self.copyright, 3),
            (self.title, 2),
            (truncate_chars(self.all, ALL_TEXT_WINDOW), 1),
        ]
        .into_iter()
        .filter(|(text, _)| !text.trim().is_empty())
        .collect()
    }
}

/// Bibliographic recogniser
///
/// Holds every identifier, year, publisher and edition pattern, compiled once.
pub struct BiblioExtractor {
    isbn_patterns: Vec<Regex>,
    lccn_patterns: Vec<Regex>,
    issn_patterns: Vec<Regex>,
    oclc_patterns: Vec<Regex>,
    doi_patterns: Vec<Regex>,
    year_patterns: Vec<Regex>,
    publisher_patterns: Vec<Regex>,
    edition_patterns: Vec<Regex>,
    abstract_heading: Regex,
}

impl BiblioExtractor {
    /// Compile all recognition patterns
    pub fn new() -> Self {
        let isbn_patterns = vec![
            Regex::new(r"(?i)ISBN(?:-1[03])?[:\s]*([0-9][0-9X\- ]{8,16}[0-9X])").unwrap(),
            Regex::new(r"(?i)International Standard Book Number[:\s]*([0-9][0-9X\- ]{8,16}[0-9X])").unwrap(),
            Regex::new(r"\b(97[89][\- ]?\d{1,5}[\- ]?\d{1,7}[\- ]?\d{1,7}[\- ]?\d)\b").unwrap(),
        ];

        let lccn_patterns = vec![
            Regex::new(r"(?i)LCCN[:\s]*(\d{2,4}[\-\s/]?\d{4,8})").unwrap(),
            Regex::new(r"(?i)Library of Congress Control Number[:\s]*(\d{2,4}[\-\s/]?\d{4,8})").unwrap(),
            Regex::new(r"(?i)LC Control (?:No\.?|Number)[:\s]*(\d{2,4}[\-\s/]?\d{4,8})").unwrap(),
        ];

        let issn_patterns = vec![
            Regex::new(r"(?i)ISSN[:\s]*(\d{4}[\- ]?\d{3}[\dX])").unwrap(),
        ];

        let oclc_patterns = vec![
            Regex::new(r"(?i)OCLC(?:\s*(?:No\.?|Number|#))?[:\s]*(\d{8,12})\b").unwrap(),
            Regex::new(r"(?i)WorldCat[^.\n]{0,40}?(\d{8,12})\b").unwrap(),
        ];

        let doi_patterns = vec![
            Regex::new(r"(?i)\bDOI[:\s]*(10\.\d{4,9}/\S{1,100})").unwrap(),
            Regex::new(r"(?i)doi\.org/(10\.\d{4,9}/\S{1,100})").unwrap(),
            Regex::new(r"\b(10\.\d{4,9}/[-._;()/:A-Za-z0-9]{1,100})").unwrap(),
        ];

        let year_patterns = vec![
            Regex::new(r"(?i)(?:©|\(c\)|copyright)\s*(?:©\s*)?(\d{4})").unwrap(),
            Regex::new(r"(?i)(?:first\s+)?(?:published|printed)[^\d\n]{0,20}(\d{4})").unwrap(),
            Regex::new(r"\b((?:19|20)\d{2})\b").unwrap(),
        ];

        let publisher_patterns = vec![
            Regex::new(r"(?i)published by[:\s]*([^.\n\r]{5,50})").unwrap(),
            Regex::new(r"(?i)publisher[:\s]+([^.\n\r]{5,50})").unwrap(),
            Regex::new(
                r"(?i)\b(O['’]?Reilly(?: Media)?|John Wiley & Sons|Wiley|Springer(?:-Verlag)?|Pearson(?: Education)?|Addison[- ]Wesley|Manning(?: Publications)?|Packt(?: Publishing)?|Apress|Elsevier|McGraw[- ]Hill|MIT Press|Cambridge University Press|Oxford University Press|No Starch Press|Pragmatic Bookshelf|Microsoft Press)\b",
            )
            .unwrap(),
        ];

        let edition_patterns = vec![
            Regex::new(r"(?i)\b\d{1,2}(?:st|nd|rd|th)\s+edition\b").unwrap(),
            Regex::new(r"(?i)\b(?:first|second|third|fourth|fifth|sixth|seventh|eighth|ninth|tenth)\s+edition\b").unwrap(),
            Regex::new(r"(?i)\b(?:revised|updated|expanded)\s+edition\b").unwrap(),
        ];

        let abstract_heading = Regex::new(r"(?im)^\s*(?:abstract|summary|overview)\b[:.]?\s*").unwrap();

        Self {
            isbn_patterns,
            lccn_patterns,
            issn_patterns,
            oclc_patterns,
            doi_patterns,
            year_patterns,
            publisher_patterns,
            edition_patterns,
            abstract_heading,
        }
    }

    /// Recognise everything at once
    ///
    /// # Arguments
    /// - `texts`: copyright page, title page and full text
    /// - `front_matter`: text of the first pages, searched for an abstract
    pub fn extract(&self, texts: &PageTexts<'_>, front_matter: &str) -> BiblioRecord {
        BiblioRecord {
            isbn: self.find_isbn(texts),
            lccn: self.find_identifier(texts, &self.lccn_patterns, validate_lccn),
            issn: self.find_identifier(texts, &self.issn_patterns, validate_issn),
            oclc: self.find_identifier(texts, &self.oclc_patterns, validate_oclc),
            doi: self.find_identifier(texts, &self.doi_patterns, validate_doi),
            year: self.find_year(texts),
            publisher: self.find_publisher(texts),
            edition: self.find_edition(texts),
            abstract_text: self.find_abstract(front_matter),
        }
    }

    // ====== Identifiers ======

    /// First valid ISBN, searching texts in priority order
    pub fn find_isbn(&self, texts: &PageTexts<'_>) -> Option<String> {
        self.find_identifier(texts, &self.isbn_patterns, validate_isbn)
    }

    fn find_identifier(
        &self,
        texts: &PageTexts<'_>,
        patterns: &[Regex],
        validate: fn(&str) -> Option<String>,
    ) -> Option<String> {
        for (text, _) in texts.prioritised() {
            for pattern in patterns {
                for caps in pattern.captures_iter(text) {
                    if let Some(valid) = caps.get(1).and_then(|m| validate(m.as_str())) {
                        return Some(valid);
                    }
                }
            }
        }
        None
    }

    // ====== Year / publisher / edition ======

    /// Publication year
    ///
    /// Candidates within MIN_YEAR..=MAX_YEAR; highest priority wins, then the latest year.
    pub fn find_year(&self, texts: &PageTexts<'_>) -> Option<i32> {
        let mut best: Option<(u8, i32)> = None;

        for (text, priority) in texts.prioritised() {
            for pattern in &self.year_patterns {
                for caps in pattern.captures_iter(text) {
                    let year = match caps.get(1).and_then(|m| m.as_str().parse::<i32>().ok()) {
                        Some(y) if (MIN_YEAR..=MAX_YEAR).contains(&y) => y,
                        _ => continue,
                    };
                    if best.map_or(true, |b| (priority, year) > b) {
                        best = Some((priority, year));
                    }
                }
            }
        }

        best.map(|(_, year)| year)
    }

    /// Publisher name from the highest-priority text that names one
    pub fn find_publisher(&self, texts: &PageTexts<'_>) -> Option<String> {
        for (text, _) in texts.prioritised() {
            for pattern in &self.publisher_patterns {
                if let Some(m) = pattern.captures(text).and_then(|c| c.get(1)) {
                    let name = clean_publisher(m.as_str());
                    if name.chars().count() >= 3 {
                        return Some(name);
                    }
                }
            }
        }
        None
    }

    /// Edition statement, lower-cased with whitespace collapsed
    pub fn find_edition(&self, texts: &PageTexts<'_>) -> Option<String> {
        for (text, _) in texts.prioritised() {
            for pattern in &self.edition_patterns {
                if let Some(m) = pattern.find(text) {
                    return Some(collapse_whitespace(m.as_str()).to_lowercase());
                }
            }
        }
        None
    }

    /// Text following an Abstract / Summary / Overview heading
    pub fn find_abstract(&self, text: &str) -> Option<String> {
        let m = self.abstract_heading.find(text)?;
        let body = collapse_whitespace(truncate_chars(&text[m.end()..], ABSTRACT_LENGTH * 2));
        let body = truncate_chars(&body, ABSTRACT_LENGTH).to_string();
        if body.chars().count() >= 50 {
            Some(body)
        } else {
            None
        }
    }
}

impl Default for BiblioExtractor {
    fn default() -> Self {
        Self::new()
    }
}

// ====== Validators ======

/// Normalise and validate an ISBN candidate
///
/// # Returns
/// The bare 10 or 13 character ISBN when the checksum holds
pub fn validate_isbn(raw: &str) -> Option<String> {
    let clean: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect::<String>()
        .to_uppercase();

    match clean.len() {
        10 if is_isbn10(&clean) => Some(clean),
        13 if is_isbn13(&clean) => Some(clean),
        11..=17 if clean.is_ascii() => {
            // Candidate ran into neighbouring digits; look for an embedded ISBN.
            for start in 0..clean.len() {
                for len in [13, 10] {
                    if let Some(window) = clean.get(start..start + len) {
                        if (len == 13 && is_isbn13(window)) || (len == 10 && is_isbn10(window)) {
                            return Some(window.to_string());
                        }
                    }
                }
            }
            None
        }
        _ => None,
    }
}

fn is_isbn10(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() != 10 {
        return false;
    }
    let mut sum = 0u32;
    for (i, &b) in bytes.iter().enumerate() {
        let value = match b {
            b'0'..=b'9' => (b - b'0') as u32,
            b'X' if i == 9 => 10,
            _ => return false,
        };
        sum += (10 - i as u32) * value;
    }
    sum % 11 == 0
}

fn is_isbn13(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() != 13 || !bytes.iter().all(u8::is_ascii_digit) {
        return false;
    }
    let sum: u32 = bytes
        .iter()
        .enumerate()
        .map(|(i, &b)| (b - b'0') as u32 * if i % 2 == 0 { 1 } else { 3 })
        .sum();
    sum % 10 == 0
}

/// LCCN: 8 to 12 digits once separators are removed
pub fn validate_lccn(raw: &str) -> Option<String> {
    let clean: String = raw.chars().filter(|c| !matches!(c, ' ' | '-' | '/')).collect();
    if (8..=12).contains(&clean.len()) && clean.chars().all(|c| c.is_ascii_digit()) {
        Some(clean)
    } else {
        None
    }
}

/// ISSN in `NNNN-NNNC` form
pub fn validate_issn(raw: &str) -> Option<String> {
    let mut clean: String = raw.chars().filter(|c| !c.is_whitespace()).collect::<String>().to_uppercase();
    if clean.len() == 8 && !clean.contains('-') {
        clean.insert(4, '-');
    }
    let bytes = clean.as_bytes();
    let valid = bytes.len() == 9
        && bytes[..4].iter().all(u8::is_ascii_digit)
        && bytes[4] == b'-'
        && bytes[5..8].iter().all(u8::is_ascii_digit)
        && (bytes[8].is_ascii_digit() || bytes[8] == b'X');
    if valid {
        Some(clean)
    } else {
        None
    }
}

/// OCLC number: 8 to 12 digits
pub fn validate_oclc(raw: &str) -> Option<String> {
    let clean = raw.trim();
    if (8..=12).contains(&clean.len()) && clean.chars().all(|c| c.is_ascii_digit()) {
        Some(clean.to_string())
    } else {
        None
    }
}

/// DOI with trailing sentence punctuation removed
pub fn validate_doi(raw: &str) -> Option<String> {
    let doi = raw.trim().trim_end_matches(|c| matches!(c, '.' | ',' | ';' | ')'));
    if doi.starts_with("10.") && doi.contains('/') && doi.len() >= 10 {
        Some(doi.to_string())
    } else {
        None
    }
}

fn clean_publisher(raw: &str) -> String {
    collapse_whitespace(raw)
        .trim_matches(|c: char| c == ',' || c == ';' || c == ':' || c.is_whitespace())
        .to_string()
}
