//! Collection analysis and the Library of Congress enhancement queue

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::csv_store;
use crate::error::Result;
use crate::extractor::BookMetadata;
use crate::text::clean_text;

/// Longest value a spreadsheet cell accepts
pub const CELL_LIMIT: usize = 32767;

const TIMELINE_MIN: i32 = 1000;
const TIMELINE_MAX: i32 = 2100;
const RECENT_DECADES: usize = 6;
const SAMPLE_COUNT: usize = 5;

// ====== Confidence tiers ======

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConfidenceTier {
    /// Title, author and an ISBN or year
    Excellent,
    High,
    Medium,
    Low,
}

impl ConfidenceTier {
    pub fn of(record: &BookMetadata) -> Self {
        let title = record.has_title();
        let author = record.has_author();
        let isbn = record.has_isbn();
        let year = record.has_year();

        if title && author && (isbn || year) {
            ConfidenceTier::Excellent
        } else if title && (author || isbn || year) {
            ConfidenceTier::High
        } else if title || (author && year) || isbn {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::Low
        }
    }
}

/// Number of records and percentage of the collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FieldRate {
    pub count: usize,
    pub percent: f64,
}

impl FieldRate {
    fn new(count: usize, total: usize) -> Self {
        Self { count, percent: percent(count, total) }
    }
}

impl fmt::Display for FieldRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:.1}%)", self.count, self.percent)
    }
}

fn percent(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64 * 100.0
    }
}

/// Publication years across the collection
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct YearTimeline {
    /// Records with any year
    pub with_year: usize,
    /// Years inside the plausible range
    pub valid: usize,
    pub earliest: Option<i32>,
    pub latest: Option<i32>,
    pub median: Option<i32>,
    /// (decade, count) for the most recent decades, oldest first
    pub recent_decades: Vec<(i32, usize)>,
}

impl YearTimeline {
    fn from_years(years: &[i32]) -> Self {
        let mut valid: Vec<i32> = years
            .iter()
            .copied()
            .filter(|y| (TIMELINE_MIN..=TIMELINE_MAX).contains(y))
            .collect();
        valid.sort_unstable();

        let median = if valid.is_empty() {
            None
        } else if valid.len() % 2 == 1 {
            Some(valid[valid.len() / 2])
        } else {
            let upper = valid.len() / 2;
            Some((valid[upper - 1] + valid[upper]) / 2)
        };

        let mut decades: BTreeMap<i32, usize> = BTreeMap::new();
        for year in &valid {
            *decades.entry(year / 10 * 10).or_default() += 1;
        }
        let skip = decades.len().saturating_sub(RECENT_DECADES);

        Self {
            with_year: years.len(),
            valid: valid.len(),
            earliest: valid.first().copied(),
            latest: valid.last().copied(),
            median,
            recent_decades: decades.into_iter().skip(skip).collect(),
        }
    }
}

/// Short description of an Excellent-tier record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleRecord {
    pub filename: String,
    pub title: String,
    pub author: String,
    pub isbn: String,
    pub year: Option<i32>,
    pub publisher: String,
}

// ====== Collection report ======

/// Summary of a metadata CSV
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CollectionReport {
    pub total_books: usize,
    pub total_size_gb: f64,
    pub average_size_mb: f64,
    pub total_pages: u64,
    pub average_pages: f64,

    pub titles: FieldRate,
    pub authors: FieldRate,
    pub isbns: FieldRate,
    pub years: FieldRate,
    pub publishers: FieldRate,

    pub timeline: YearTimeline,

    pub excellent: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,

    pub isbn_books: usize,
    pub title_author_books: usize,
    pub title_only_books: usize,
    /// Expected number of successful catalog lookups
    pub estimated_lc_matches: f64,

    pub average_quality: f64,
    pub samples: Vec<SampleRecord>,
}

impl CollectionReport {
    pub fn from_records(records: &[BookMetadata]) -> Self {
        let total = records.len();
        let count = |pred: fn(&BookMetadata) -> bool| records.iter().filter(|r| pred(r)).count();

        let total_mb: f64 = records.iter().map(|r| r.file_size_mb).sum();
        let total_pages: u64 = records.iter().map(|r| r.page_count as u64).sum();
        let quality_sum: u64 = records.iter().map(|r| r.extraction_quality_score as u64).sum();
        let average = |sum: f64| if total == 0 { 0.0 } else { sum / total as f64 };

        let years: Vec<i32> = records.iter().filter_map(|r| r.extracted_year).collect();

        let mut tiers: BTreeMap<ConfidenceTier, usize> = BTreeMap::new();
        for record in records {
            *tiers.entry(ConfidenceTier::of(record)).or_default() += 1;
        }
        let tier = |t: ConfidenceTier| tiers.get(&t).copied().unwrap_or(0);

        let isbn_books = count(|r| r.has_isbn());
        let title_author_books = count(|r| r.has_title() && r.has_author());
        let title_only_books = count(|r| r.has_title() && !r.has_author());
        let estimated_lc_matches = isbn_books as f64 * 0.85
            + title_author_books as f64 * 0.75
            + title_only_books as f64 * 0.50;

        let samples = records
            .iter()
            .filter(|r| ConfidenceTier::of(r) == ConfidenceTier::Excellent)
            .take(SAMPLE_COUNT)
            .map(|r| SampleRecord {
                filename: r.filename.clone(),
                title: r.pdf_title.trim().to_string(),
                author: r.pdf_author.trim().to_string(),
                isbn: r.extracted_isbn.trim().to_string(),
                year: r.extracted_year,
                publisher: r.extracted_publisher.trim().to_string(),
            })
            .collect();

        Self {
            total_books: total,
            total_size_gb: total_mb / 1024.0,
            average_size_mb: average(total_mb),
            total_pages,
            average_pages: average(total_pages as f64),
            titles: FieldRate::new(count(|r| r.has_title()), total),
            authors: FieldRate::new(count(|r| r.has_author()), total),
            isbns: FieldRate::new(isbn_books, total),
            years: FieldRate::new(years.len(), total),
            publishers: FieldRate::new(count(|r| r.has_publisher()), total),
            timeline: YearTimeline::from_years(&years),
            excellent: tier(ConfidenceTier::Excellent),
            high: tier(ConfidenceTier::High),
            medium: tier(ConfidenceTier::Medium),
            low: tier(ConfidenceTier::Low),
            isbn_books,
            title_author_books,
            title_only_books,
            estimated_lc_matches,
            average_quality: average(quality_sum as f64),
            samples,
        }
    }

    /// Estimated lookups as a share of the collection
    pub fn estimated_lc_percent(&self) -> f64 {
        if self.total_books == 0 {
            return 0.0;
        }
        self.estimated_lc_matches / self.total_books as f64 * 100.0
    }
}

impl fmt::Display for CollectionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "-".repeat(50);

        writeln!(f, "COLLECTION OVERVIEW")?;
        writeln!(f, "{}", rule)?;
        writeln!(f, "Total books:        {}", self.total_books)?;
        writeln!(f, "Collection size:    {:.1} GB", self.total_size_gb)?;
        writeln!(f, "Average file size:  {:.1} MB", self.average_size_mb)?;
        writeln!(f, "Total pages:        {}", self.total_pages)?;
        writeln!(f, "Average pages:      {:.0}", self.average_pages)?;
        writeln!(f, "Average quality:    {:.1}", self.average_quality)?;
        writeln!(f)?;

        writeln!(f, "METADATA SUCCESS RATES")?;
        writeln!(f, "{}", rule)?;
        writeln!(f, "Titles:     {}", self.titles)?;
        writeln!(f, "Authors:    {}", self.authors)?;
        writeln!(f, "ISBNs:      {}", self.isbns)?;
        writeln!(f, "Years:      {}", self.years)?;
        writeln!(f, "Publishers: {}", self.publishers)?;
        writeln!(f)?;

        writeln!(f, "PUBLICATION TIMELINE")?;
        writeln!(f, "{}", rule)?;
        match (self.timeline.earliest, self.timeline.latest, self.timeline.median) {
            (Some(earliest), Some(latest), Some(median)) => {
                writeln!(
                    f,
                    "Years extracted: {} ({} valid)",
                    self.timeline.with_year, self.timeline.valid
                )?;
                writeln!(f, "Earliest: {}  Latest: {}  Median: {}", earliest, latest, median)?;
                for (decade, count) in &self.timeline.recent_decades {
                    writeln!(f, "  {}s: {} books", decade, count)?;
                }
            }
            _ => writeln!(f, "No valid years extracted")?,
        }
        writeln!(f)?;

        writeln!(f, "CATALOG READINESS")?;
        writeln!(f, "{}", rule)?;
        writeln!(f, "Excellent (title + author + ISBN/year): {}", self.excellent)?;
        writeln!(f, "High:   {}", self.high)?;
        writeln!(f, "Medium: {}", self.medium)?;
        writeln!(f, "Low:    {}", self.low)?;
        writeln!(f)?;

        writeln!(f, "LC ENHANCEMENT ESTIMATE")?;
        writeln!(f, "{}", rule)?;
        writeln!(f, "With ISBN:           {} (85% expected)", self.isbn_books)?;
        writeln!(f, "With title + author: {} (75% expected)", self.title_author_books)?;
        writeln!(f, "Title only:          {} (50% expected)", self.title_only_books)?;
        writeln!(
            f,
            "Estimated matches:   ~{:.0} ({:.1}%)",
            self.estimated_lc_matches,
            self.estimated_lc_percent()
        )?;

        if !self.samples.is_empty() {
            writeln!(f)?;
            writeln!(f, "SAMPLE HIGH-QUALITY RECORDS")?;
            writeln!(f, "{}", rule)?;
            for sample in &self.samples {
                writeln!(f, "{}", sample.filename)?;
                writeln!(f, "  Title:     {}", sample.title)?;
                writeln!(f, "  Author:    {}", sample.author)?;
                if !sample.isbn.is_empty() {
                    writeln!(f, "  ISBN:      {}", sample.isbn)?;
                }
                if let Some(year) = sample.year {
                    writeln!(f, "  Year:      {}", year)?;
                }
                if !sample.publisher.is_empty() {
                    writeln!(f, "  Publisher: {}", sample.publisher)?;
                }
            }
        }
        Ok(())
    }
}

// ====== LC enhancement queue ======

/// One row of the enhancement queue
///
/// The `lc_*` columns are filled in later by the lookup workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LcQueueEntry {
    pub filename: String,
    pub lc_priority_score: u32,
    pub pdf_title: String,
    pub pdf_author: String,
    pub extracted_isbn: String,
    pub extracted_year: Option<i32>,
    pub extracted_publisher: String,
    pub lc_search_query: String,
    pub lc_api_status: String,
    pub lc_match_found: String,
    pub lc_confidence: String,
    pub lc_title: String,
    pub lc_author: String,
    pub lc_subjects: String,
    pub lc_classification: String,
    pub lc_isbn: String,
    pub lc_publisher: String,
    pub lc_year: String,
    pub lc_description: String,
    pub manual_notes: String,
    pub verification_status: String,
    pub file_size_mb: f64,
    pub page_count: usize,
    pub extraction_method: String,
}

/// Lookup priority: title 10, author 10, ISBN 20, year 5, publisher 5
pub fn priority_score(record: &BookMetadata) -> u32 {
    let mut score = 0;
    if record.has_title() { score += 10; }
    if record.has_author() { score += 10; }
    if record.has_isbn() { score += 20; }
    if record.has_year() { score += 5; }
    if record.has_publisher() { score += 5; }
    score
}

/// Build the enhancement queue, highest priority first
///
/// Ties keep CSV order.
pub fn build_lc_queue(records: &[BookMetadata]) -> Vec<LcQueueEntry> {
    let cell = |s: &str| clean_text(s, CELL_LIMIT);
    let pending = "pending".to_string();

    let mut queue: Vec<LcQueueEntry> = records
        .iter()
        .map(|r| LcQueueEntry {
            filename: cell(&r.filename),
            lc_priority_score: priority_score(r),
            pdf_title: cell(&r.pdf_title),
            pdf_author: cell(&r.pdf_author),
            extracted_isbn: cell(&r.extracted_isbn),
            extracted_year: r.extracted_year,
            extracted_publisher: cell(&r.extracted_publisher),
            lc_api_status: pending.clone(),
            verification_status: pending.clone(),
            file_size_mb: r.file_size_mb,
            page_count: r.page_count,
            extraction_method: cell(&r.extraction_method),
            ..LcQueueEntry::default()
        })
        .collect();

    queue.sort_by(|a, b| b.lc_priority_score.cmp(&a.lc_priority_score));
    queue
}

/// Write the queue as CSV, replacing any previous file
pub fn write_lc_queue(path: &Path, queue: &[LcQueueEntry]) -> Result<usize> {
    csv_store::write_records(path, queue)
}

/// Queue entries by priority band
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PriorityBreakdown {
    /// 30 points or more
    pub high: usize,
    /// 20 to 29 points
    pub medium: usize,
    /// Under 20 points
    pub low: usize,
}

impl PriorityBreakdown {
    pub fn of(queue: &[LcQueueEntry]) -> Self {
        let mut breakdown = Self::default();
        for entry in queue {
            match entry.lc_priority_score {
                s if s >= 30 => breakdown.high += 1,
                s if s >= 20 => breakdown.medium += 1,
                _ => breakdown.low += 1,
            }
        }
        breakdown
    }
}

impl fmt::Display for PriorityBreakdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "High priority (30+ points):    {} books", self.high)?;
        writeln!(f, "Medium priority (20-29 points): {} books", self.medium)?;
        write!(f, "Low priority (<20 points):     {} books", self.low)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn book(name: &str, title: &str, author: &str, isbn: &str, year: Option<i32>, publisher: &str) -> BookMetadata {
        BookMetadata {
            filename: name.to_string(),
            file_size_mb: 2.0,
            page_count: 100,
            pdf_title: title.to_string(),
            pdf_author: author.to_string(),
            extracted_isbn: isbn.to_string(),
            extracted_year: year,
            extracted_publisher: publisher.to_string(),
            extraction_quality_score: 50,
            ..BookMetadata::default()
        }
    }

    fn collection() -> Vec<BookMetadata> {
        vec![
            book("a.pdf", "A", "Ann", "9780596520687", Some(2008), "O'Reilly"),
            book("b.pdf", "B", "", "", Some(1995), ""),
            book("c.pdf", "", "Cid", "", Some(1972), ""),
            book("d.pdf", "", "", "", None, ""),
            book("e.pdf", "E", "Eve", "", None, ""),
        ]
    }

    #[test]
    fn test_confidence_tiers() {
        let books = collection();
        let tiers: Vec<ConfidenceTier> = books.iter().map(ConfidenceTier::of).collect();
        assert_eq!(
            tiers,
            vec![
                ConfidenceTier::Excellent,
                ConfidenceTier::High,
                ConfidenceTier::Medium,
                ConfidenceTier::Low,
                ConfidenceTier::High,
            ]
        );
    }

    #[test]
    fn test_collection_report() {
        let report = CollectionReport::from_records(&collection());
        assert_eq!(report.total_books, 5);
        assert_eq!(report.total_pages, 500);
        assert_eq!(report.average_size_mb, 2.0);
        assert_eq!(report.titles.count, 3);
        assert_eq!(report.titles.percent, 60.0);
        assert_eq!(report.years.count, 3);
        assert_eq!((report.excellent, report.high, report.medium, report.low), (1, 2, 1, 1));
        assert_eq!(report.timeline.earliest, Some(1972));
        assert_eq!(report.timeline.latest, Some(2008));
        assert_eq!(report.timeline.median, Some(1995));
        assert_eq!(report.timeline.recent_decades, vec![(1970, 1), (1990, 1), (2000, 1)]);
        // 1 isbn, 2 title+author, 1 title only
        assert!((report.estimated_lc_matches - 2.85).abs() < 1e-9);
        assert_eq!(report.samples.len(), 1);
        assert_eq!(report.samples[0].filename, "a.pdf");
        assert_eq!(report.average_quality, 50.0);
    }

    #[test]
    fn test_timeline_limits_decades_and_range() {
        let years = vec![950, 1900, 1910, 1920, 1930, 1940, 1950, 1960, 2200];
        let timeline = YearTimeline::from_years(&years);
        assert_eq!(timeline.with_year, 9);
        assert_eq!(timeline.valid, 7);
        assert_eq!(timeline.recent_decades.len(), 6);
        assert_eq!(timeline.recent_decades[0], (1910, 1));
    }

    #[test]
    fn test_empty_report() {
        let report = CollectionReport::from_records(&[]);
        assert_eq!(report.total_books, 0);
        assert_eq!(report.average_pages, 0.0);
        assert_eq!(report.estimated_lc_percent(), 0.0);
        assert!(report.to_string().contains("No valid years extracted"));
    }

    #[test]
    fn test_lc_queue_ordering() {
        let queue = build_lc_queue(&collection());
        let order: Vec<&str> = queue.iter().map(|e| e.filename.as_str()).collect();
        // Scores 50, 15, 15, 0, 20; equal scores keep input order
        assert_eq!(order, vec!["a.pdf", "e.pdf", "b.pdf", "c.pdf", "d.pdf"]);
        assert_eq!(queue[0].lc_priority_score, 50);
        assert_eq!(queue[0].lc_api_status, "pending");
        assert_eq!(queue[0].verification_status, "pending");
        assert!(queue[0].lc_title.is_empty());
    }

    #[test]
    fn test_lc_queue_cleans_cells() {
        let mut record = book("x.pdf", "Bad\u{0}Title", "", "", None, "");
        record.pdf_author = "a".repeat(CELL_LIMIT + 10);
        record.page_count = 321;
        let queue = build_lc_queue(&[record]);
        assert_eq!(queue[0].page_count, 321);
        assert_eq!(queue[0].pdf_title, "BadTitle");
        assert_eq!(queue[0].pdf_author.chars().count(), CELL_LIMIT);
    }

    #[test]
    fn test_priority_breakdown_and_write() {
        let queue = build_lc_queue(&collection());
        let breakdown = PriorityBreakdown::of(&queue);
        assert_eq!(breakdown, PriorityBreakdown { high: 1, medium: 1, low: 3 });

        let temp = TempDir::new().unwrap();
        let path = temp.path().join("lc.csv");
        assert_eq!(write_lc_queue(&path, &queue).unwrap(), 5);
        let back: Vec<LcQueueEntry> = csv_store::read_records(&path).unwrap();
        assert_eq!(back, queue);
    }
}
