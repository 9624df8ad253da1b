use rusqlite::{params, Connection, OptionalExtension, Result, Row};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Category name reported for books without one
pub const UNCATEGORIZED: &str = "Uncategorized";

/// A book ready to be inserted into the catalog
#[derive(Debug, Clone, Default)]
pub struct NewBook {
    pub file_name: String,
    pub file_path: Option<String>,
    pub file_size: i64,
    pub file_hash: Option<String>,
    pub page_count: i64,
    pub title: String,
    pub author_id: Option<i64>,
    pub publisher_id: Option<i64>,
    pub category_id: Option<i64>,
    pub subject_id: Option<i64>,
    pub publication_year: Option<i32>,
    pub isbn: Option<String>,
    pub lccn: Option<String>,
    pub issn: Option<String>,
    pub oclc: Option<String>,
    pub doi: Option<String>,
    pub edition: Option<String>,
    pub pdf_title: Option<String>,
    pub pdf_author: Option<String>,
    pub pdf_subject: Option<String>,
    pub pdf_creator: Option<String>,
    pub pdf_producer: Option<String>,
    pub pdf_creation_date: Option<String>,
    pub extraction_method: String,
    pub quality_score: i64,
    pub overall_confidence: f64,
    pub cover_path: Option<String>,
    pub thumbnail_path: Option<String>,
    pub processing_flags: Vec<String>,
}

/// Text kept per book for display
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookContent {
    pub first_page: String,
    pub title_page: String,
    pub copyright_page: String,
    pub table_of_contents: String,
    pub abstract_text: String,
}

/// Full record from the BookDetails view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookDetail {
    pub book_id: i64,
    pub file_name: String,
    pub file_path: Option<String>,
    pub file_size: i64,
    pub file_hash: Option<String>,
    pub page_count: i64,
    pub title: String,
    pub author: Option<String>,
    pub publisher: Option<String>,
    pub category: Option<String>,
    pub subject: Option<String>,
    pub year: Option<i32>,
    pub isbn: Option<String>,
    pub lccn: Option<String>,
    pub issn: Option<String>,
    pub oclc: Option<String>,
    pub doi: Option<String>,
    pub edition: Option<String>,
    pub extraction_method: Option<String>,
    pub quality_score: i64,
    pub overall_confidence: f64,
    pub cover_path: Option<String>,
    pub thumbnail_path: Option<String>,
    pub has_cover: bool,
    pub has_thumbnail: bool,
    pub processing_flags: Vec<String>,
    pub access_level: String,
    pub date_added: String,
}

/// One row of a book listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookSummary {
    pub book_id: i64,
    pub title: String,
    pub author: Option<String>,
    pub category: Option<String>,
    pub year: Option<i32>,
    pub page_count: i64,
    pub file_size: i64,
    pub overall_confidence: f64,
    pub cover_path: Option<String>,
    pub thumbnail_path: Option<String>,
}

impl BookSummary {
    pub fn has_cover(&self) -> bool {
        self.cover_path.is_some()
    }

    pub fn has_thumbnail(&self) -> bool {
        self.thumbnail_path.is_some()
    }
}

/// Books of one category
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryGroup {
    pub name: String,
    pub count: i64,
    pub samples: Vec<String>,
}

/// Thumbnail coverage of the catalog
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThumbnailSummary {
    pub total: i64,
    pub with_thumbnail: i64,
    pub without_thumbnail: i64,
    /// (title, thumbnail path)
    pub samples: Vec<(String, String)>,
}

/// Full-text search result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub book_id: i64,
    pub title: String,
    pub author: Option<String>,
    pub category: Option<String>,
    /// bm25 score; lower is better
    pub score: f64,
}

/// Catalog-wide numbers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LibraryStats {
    pub total_books: i64,
    pub total_size: i64,
    pub average_confidence: f64,
    /// (category, count), largest first
    pub categories: Vec<(String, i64)>,
}

// ==================== Lookup tables ====================

fn get_or_create(conn: &Connection, insert: &str, select: &str, name: &str) -> Result<(i64, bool)> {
    let created = conn.execute(insert, [name])? > 0;
    let id = conn.query_row(select, [name], |row| row.get(0))?;
    Ok((id, created))
}

/// Category id, creating the row when missing
///
/// # Returns
/// (id, whether the row was created)
pub fn get_or_create_category(conn: &Connection, name: &str) -> Result<(i64, bool)> {
    get_or_create(
        conn,
        "INSERT OR IGNORE INTO Categories (CategoryName) VALUES (?1)",
        "SELECT CategoryID FROM Categories WHERE CategoryName = ?1",
        name,
    )
}

pub fn get_or_create_author(conn: &Connection, name: &str) -> Result<(i64, bool)> {
    get_or_create(
        conn,
        "INSERT OR IGNORE INTO Authors (AuthorName) VALUES (?1)",
        "SELECT AuthorID FROM Authors WHERE AuthorName = ?1",
        name,
    )
}

pub fn get_or_create_publisher(conn: &Connection, name: &str) -> Result<(i64, bool)> {
    get_or_create(
        conn,
        "INSERT OR IGNORE INTO Publishers (PublisherName) VALUES (?1)",
        "SELECT PublisherID FROM Publishers WHERE PublisherName = ?1",
        name,
    )
}

/// Subject id within a category
pub fn get_or_create_subject(conn: &Connection, name: &str, category_id: i64) -> Result<(i64, bool)> {
    let created = conn.execute(
        "INSERT OR IGNORE INTO Subjects (SubjectName, CategoryID) VALUES (?1, ?2)",
        params![name, category_id],
    )? > 0;
    let id = conn.query_row(
        "SELECT SubjectID FROM Subjects WHERE SubjectName = ?1 AND CategoryID = ?2",
        params![name, category_id],
        |row| row.get(0),
    )?;
    Ok((id, created))
}

/// Rows created through a `NameCache`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreatedCounts {
    pub authors: usize,
    pub publishers: usize,
    pub categories: usize,
    pub subjects: usize,
}

/// Memoised lookup-table ids for one batch of inserts
///
/// Ids must not outlive a rolled-back savepoint; keep a clone to restore from.
#[derive(Debug, Clone, Default)]
pub struct NameCache {
    authors: HashMap<String, i64>,
    publishers: HashMap<String, i64>,
    categories: HashMap<String, i64>,
    subjects: HashMap<(String, i64), i64>,
    pub created: CreatedCounts,
}

impl NameCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn author(&mut self, conn: &Connection, name: &str) -> Result<i64> {
        if let Some(id) = self.authors.get(name) {
            return Ok(*id);
        }
        let (id, created) = get_or_create_author(conn, name)?;
        if created {
            self.created.authors += 1;
        }
        self.authors.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn publisher(&mut self, conn: &Connection, name: &str) -> Result<i64> {
        if let Some(id) = self.publishers.get(name) {
            return Ok(*id);
        }
        let (id, created) = get_or_create_publisher(conn, name)?;
        if created {
            self.created.publishers += 1;
        }
        self.publishers.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn category(&mut self, conn: &Connection, name: &str) -> Result<i64> {
        if let Some(id) = self.categories.get(name) {
            return Ok(*id);
        }
        let (id, created) = get_or_create_category(conn, name)?;
        if created {
            self.created.categories += 1;
        }
        self.categories.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn subject(&mut self, conn: &Connection, name: &str, category_id: i64) -> Result<i64> {
        let key = (name.to_string(), category_id);
        if let Some(id) = self.subjects.get(&key) {
            return Ok(*id);
        }
        let (id, created) = get_or_create_subject(conn, name, category_id)?;
        if created {
            self.created.subjects += 1;
        }
        self.subjects.insert(key, id);
        Ok(id)
    }
}

// ==================== Books ====================

pub fn book_exists(conn: &Connection, file_name: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT BookID FROM Books WHERE FileName = ?1", [file_name], |row| row.get(0))
        .optional()?;
    Ok(found.is_some())
}

/// Insert a book
///
/// # Returns
/// The new BookID
pub fn insert_book(conn: &Connection, book: &NewBook) -> Result<i64> {
    let flags = serde_json::to_string(&book.processing_flags).unwrap_or_else(|_| "[]".to_string());
    conn.execute(
        "INSERT INTO Books (
            FileName, FilePath, FileSize, FileHash, PageCount, Title,
            AuthorID, PublisherID, CategoryID, SubjectID, PublicationYear,
            ISBN, LCCN, ISSN, OCLC, DOI, Edition,
            PDFTitle, PDFAuthor, PDFSubject, PDFCreator, PDFProducer, PDFCreationDate,
            ExtractionMethod, QualityScore, OverallConfidence,
            CoverPath, ThumbnailPath, HasCover, HasThumbnail, ProcessingFlags
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6,
            ?7, ?8, ?9, ?10, ?11,
            ?12, ?13, ?14, ?15, ?16, ?17,
            ?18, ?19, ?20, ?21, ?22, ?23,
            ?24, ?25, ?26,
            ?27, ?28, ?29, ?30, ?31
        )",
        params![
            book.file_name,
            book.file_path,
            book.file_size,
            book.file_hash,
            book.page_count,
            book.title,
            book.author_id,
            book.publisher_id,
            book.category_id,
            book.subject_id,
            book.publication_year,
            book.isbn,
            book.lccn,
            book.issn,
            book.oclc,
            book.doi,
            book.edition,
            book.pdf_title,
            book.pdf_author,
            book.pdf_subject,
            book.pdf_creator,
            book.pdf_producer,
            book.pdf_creation_date,
            book.extraction_method,
            book.quality_score,
            book.overall_confidence,
            book.cover_path,
            book.thumbnail_path,
            book.cover_path.is_some(),
            book.thumbnail_path.is_some(),
            flags,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_content(conn: &Connection, book_id: i64, content: &BookContent) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO BookContent
            (BookID, FirstPageText, TitlePageText, CopyrightPageText, TableOfContents, AbstractText)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            book_id,
            content.first_page,
            content.title_page,
            content.copyright_page,
            content.table_of_contents,
            content.abstract_text,
        ],
    )?;
    Ok(())
}

pub fn get_content(conn: &Connection, book_id: i64) -> Result<Option<BookContent>> {
    conn.query_row(
        "SELECT FirstPageText, TitlePageText, CopyrightPageText, TableOfContents, AbstractText
         FROM BookContent WHERE BookID = ?1",
        [book_id],
        |row| {
            Ok(BookContent {
                first_page: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                title_page: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                copyright_page: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                table_of_contents: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                abstract_text: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
            })
        },
    )
    .optional()
}

/// Add a book to the full-text index; the FTS rowid is the BookID
pub fn index_full_text(
    conn: &Connection,
    book_id: i64,
    title: &str,
    author: &str,
    publisher: &str,
    category: &str,
    content: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO BooksFullText (rowid, Title, Author, Publisher, Category, Content)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![book_id, title, author, publisher, category, content],
    )?;
    Ok(())
}

pub fn record_event(conn: &Connection, book_id: i64, event_type: &str, data: &serde_json::Value) -> Result<()> {
    conn.execute(
        "INSERT INTO BookAnalytics (BookID, EventType, EventData) VALUES (?1, ?2, ?3)",
        params![book_id, event_type, data.to_string()],
    )?;
    Ok(())
}

pub fn count_events(conn: &Connection, event_type: &str) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM BookAnalytics WHERE EventType = ?1",
        [event_type],
        |row| row.get(0),
    )
}

fn detail_from_row(row: &Row<'_>) -> Result<BookDetail> {
    let flags: Option<String> = row.get(25)?;
    Ok(BookDetail {
        book_id: row.get(0)?,
        file_name: row.get(1)?,
        file_path: row.get(2)?,
        file_size: row.get::<_, Option<i64>>(3)?.unwrap_or(0),
        file_hash: row.get(4)?,
        page_count: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
        title: row.get(6)?,
        author: row.get(7)?,
        publisher: row.get(8)?,
        category: row.get(9)?,
        subject: row.get(10)?,
        year: row.get(11)?,
        isbn: row.get(12)?,
        lccn: row.get(13)?,
        issn: row.get(14)?,
        oclc: row.get(15)?,
        doi: row.get(16)?,
        edition: row.get(17)?,
        extraction_method: row.get(18)?,
        quality_score: row.get::<_, Option<i64>>(19)?.unwrap_or(0),
        overall_confidence: row.get::<_, Option<f64>>(20)?.unwrap_or(0.0),
        cover_path: row.get(21)?,
        thumbnail_path: row.get(22)?,
        has_cover: row.get::<_, Option<bool>>(23)?.unwrap_or(false),
        has_thumbnail: row.get::<_, Option<bool>>(24)?.unwrap_or(false),
        processing_flags: flags
            .and_then(|f| serde_json::from_str(&f).ok())
            .unwrap_or_default(),
        access_level: row.get::<_, Option<String>>(26)?.unwrap_or_else(|| "public".to_string()),
        date_added: row.get::<_, Option<String>>(27)?.unwrap_or_default(),
    })
}

/// One book with its names resolved
pub fn get_book(conn: &Connection, book_id: i64) -> Result<Option<BookDetail>> {
    conn.query_row(
        "SELECT BookID, FileName, FilePath, FileSize, FileHash, PageCount,
                Title, AuthorName, PublisherName, CategoryName, SubjectName,
                PublicationYear, ISBN, LCCN, ISSN, OCLC, DOI, Edition,
                ExtractionMethod, QualityScore, OverallConfidence,
                CoverPath, ThumbnailPath, HasCover, HasThumbnail,
                ProcessingFlags, AccessLevel, DateAdded
         FROM BookDetails WHERE BookID = ?1",
        [book_id],
        detail_from_row,
    )
    .optional()
}

/// Books ordered by title
///
/// # Arguments
/// - `limit`: maximum rows; `None` for all
pub fn list_books(conn: &Connection, limit: Option<usize>) -> Result<Vec<BookSummary>> {
    let mut stmt = conn.prepare(
        "SELECT b.BookID, b.Title, a.AuthorName, c.CategoryName, b.PublicationYear,
                b.PageCount, b.FileSize, b.OverallConfidence, b.CoverPath, b.ThumbnailPath
         FROM Books b
         LEFT JOIN Authors a ON b.AuthorID = a.AuthorID
         LEFT JOIN Categories c ON b.CategoryID = c.CategoryID
         ORDER BY b.Title COLLATE NOCASE
         LIMIT ?1",
    )?;

    let limit = limit.map(|l| l as i64).unwrap_or(-1);
    let books = stmt
        .query_map([limit], |row| {
            Ok(BookSummary {
                book_id: row.get(0)?,
                title: row.get(1)?,
                author: row.get(2)?,
                category: row.get(3)?,
                year: row.get(4)?,
                page_count: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
                file_size: row.get::<_, Option<i64>>(6)?.unwrap_or(0),
                overall_confidence: row.get::<_, Option<f64>>(7)?.unwrap_or(0.0),
                cover_path: row.get(8)?,
                thumbnail_path: row.get(9)?,
            })
        })?
        .collect::<Result<Vec<_>>>()?;

    Ok(books)
}

/// Books grouped by category, largest group first, with up to 3 sample titles
pub fn category_groups(conn: &Connection) -> Result<Vec<CategoryGroup>> {
    let mut stmt = conn.prepare(
        "SELECT COALESCE(c.CategoryName, ?1) AS Name, COUNT(*) AS Total
         FROM Books b
         LEFT JOIN Categories c ON b.CategoryID = c.CategoryID
         GROUP BY Name
         ORDER BY Total DESC, Name",
    )?;
    let groups: Vec<(String, i64)> = stmt
        .query_map([UNCATEGORIZED], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>>>()?;

    let mut sample_stmt = conn.prepare(
        "SELECT b.Title
         FROM Books b
         LEFT JOIN Categories c ON b.CategoryID = c.CategoryID
         WHERE COALESCE(c.CategoryName, ?1) = ?2
         ORDER BY b.Title COLLATE NOCASE
         LIMIT 3",
    )?;

    let mut result = Vec::with_capacity(groups.len());
    for (name, count) in groups {
        let samples = sample_stmt
            .query_map(params![UNCATEGORIZED, name], |row| row.get(0))?
            .collect::<Result<Vec<String>>>()?;
        result.push(CategoryGroup { name, count, samples });
    }
    Ok(result)
}

pub fn thumbnail_summary(conn: &Connection) -> Result<ThumbnailSummary> {
    let (total, with_thumbnail): (i64, i64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(CASE WHEN HasThumbnail = 1 THEN 1 ELSE 0 END), 0) FROM Books",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    let mut stmt = conn.prepare(
        "SELECT Title, ThumbnailPath FROM Books
         WHERE HasThumbnail = 1 AND ThumbnailPath IS NOT NULL
         ORDER BY Title COLLATE NOCASE LIMIT 10",
    )?;
    let samples = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>>>()?;

    Ok(ThumbnailSummary {
        total,
        with_thumbnail,
        without_thumbnail: total - with_thumbnail,
        samples,
    })
}

/// (BookID, FileName, Title) of books without a thumbnail
pub fn books_missing_thumbnail(conn: &Connection, limit: Option<usize>) -> Result<Vec<(i64, String, String)>> {
    let mut stmt = conn.prepare(
        "SELECT BookID, FileName, Title FROM Books
         WHERE HasThumbnail = 0 OR ThumbnailPath IS NULL
         ORDER BY BookID LIMIT ?1",
    )?;
    let limit = limit.map(|l| l as i64).unwrap_or(-1);
    let rows = stmt
        .query_map([limit], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<Result<Vec<_>>>()?;
    Ok(rows)
}

/// Every thumbnail path referenced by a book
pub fn thumbnail_paths(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT ThumbnailPath FROM Books WHERE ThumbnailPath IS NOT NULL")?;
    let paths = stmt.query_map([], |row| row.get(0))?.collect::<Result<Vec<String>>>()?;
    Ok(paths)
}

pub fn set_thumbnail(conn: &Connection, book_id: i64, path: &str) -> Result<()> {
    conn.execute(
        "UPDATE Books SET ThumbnailPath = ?1, HasThumbnail = 1, LastModified = CURRENT_TIMESTAMP
         WHERE BookID = ?2",
        params![path, book_id],
    )?;
    Ok(())
}

// ==================== Search & stats ====================

/// Quote each term so user input cannot break FTS5 query syntax
fn fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|term| term.replace('"', ""))
        .filter(|term| !term.is_empty())
        .map(|term| format!("\"{}\"", term))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Full-text search ranked by bm25
pub fn search(conn: &Connection, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
    let match_expr = fts_query(query);
    if match_expr.is_empty() {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare(
        "SELECT b.BookID, b.Title, a.AuthorName, c.CategoryName, bm25(BooksFullText) AS Score
         FROM BooksFullText
         JOIN Books b ON b.BookID = BooksFullText.rowid
         LEFT JOIN Authors a ON b.AuthorID = a.AuthorID
         LEFT JOIN Categories c ON b.CategoryID = c.CategoryID
         WHERE BooksFullText MATCH ?1
         ORDER BY Score
         LIMIT ?2",
    )?;

    let hits = stmt
        .query_map(params![match_expr, limit as i64], |row| {
            Ok(SearchHit {
                book_id: row.get(0)?,
                title: row.get(1)?,
                author: row.get(2)?,
                category: row.get(3)?,
                score: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>>>()?;

    Ok(hits)
}

pub fn library_stats(conn: &Connection) -> Result<LibraryStats> {
    let (total_books, total_size, average_confidence): (i64, i64, f64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(FileSize), 0), COALESCE(AVG(OverallConfidence), 0.0) FROM Books",
        [],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;

    let categories = category_groups(conn)?
        .into_iter()
        .map(|g| (g.name, g.count))
        .collect();

    Ok(LibraryStats {
        total_books,
        total_size,
        average_confidence,
        categories,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_db;

    fn book(name: &str, title: &str) -> NewBook {
        NewBook {
            file_name: name.to_string(),
            title: title.to_string(),
            extraction_method: "lopdf".to_string(),
            file_size: 1024,
            page_count: 10,
            ..NewBook::default()
        }
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let conn = init_memory_db().unwrap();
        let (id1, created1) = get_or_create_category(&conn, "Programming").unwrap();
        let (id2, created2) = get_or_create_category(&conn, "Programming").unwrap();
        assert_eq!(id1, id2);
        assert!(created1);
        assert!(!created2);

        let (s1, _) = get_or_create_subject(&conn, "Python", id1).unwrap();
        let (other_cat, _) = get_or_create_category(&conn, "Science").unwrap();
        let (s2, created) = get_or_create_subject(&conn, "Python", other_cat).unwrap();
        assert_ne!(s1, s2);
        assert!(created);
    }

    #[test]
    fn test_name_cache_counts_created_rows() {
        let conn = init_memory_db().unwrap();
        get_or_create_author(&conn, "Existing Author").unwrap();

        let mut cache = NameCache::new();
        let a = cache.author(&conn, "Existing Author").unwrap();
        let b = cache.author(&conn, "New Author").unwrap();
        let b2 = cache.author(&conn, "New Author").unwrap();
        assert_ne!(a, b);
        assert_eq!(b, b2);
        assert_eq!(cache.created.authors, 1);

        let cat = cache.category(&conn, "History").unwrap();
        cache.subject(&conn, "Rome", cat).unwrap();
        cache.publisher(&conn, "Example Press").unwrap();
        assert_eq!(
            cache.created,
            CreatedCounts { authors: 1, publishers: 1, categories: 1, subjects: 1 }
        );
    }

    #[test]
    fn test_insert_and_get_book() {
        let conn = init_memory_db().unwrap();
        let (author_id, _) = get_or_create_author(&conn, "Mark Lutz").unwrap();
        let (cat_id, _) = get_or_create_category(&conn, "Programming").unwrap();

        let mut new_book = book("Learning Python.pdf", "Learning Python");
        new_book.author_id = Some(author_id);
        new_book.category_id = Some(cat_id);
        new_book.publication_year = Some(2008);
        new_book.thumbnail_path = Some("Thumbs/Learning Python.png".to_string());
        new_book.processing_flags = vec!["low_quality".to_string()];
        new_book.overall_confidence = 0.75;

        let id = insert_book(&conn, &new_book).unwrap();
        assert!(book_exists(&conn, "Learning Python.pdf").unwrap());
        assert!(!book_exists(&conn, "Other.pdf").unwrap());

        let detail = get_book(&conn, id).unwrap().unwrap();
        assert_eq!(detail.title, "Learning Python");
        assert_eq!(detail.author.as_deref(), Some("Mark Lutz"));
        assert_eq!(detail.category.as_deref(), Some("Programming"));
        assert_eq!(detail.year, Some(2008));
        assert!(detail.has_thumbnail);
        assert!(!detail.has_cover);
        assert_eq!(detail.processing_flags, vec!["low_quality"]);
        assert_eq!(detail.access_level, "public");

        assert!(get_book(&conn, id + 100).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_file_name_rejected() {
        let conn = init_memory_db().unwrap();
        insert_book(&conn, &book("a.pdf", "A")).unwrap();
        assert!(insert_book(&conn, &book("a.pdf", "A again")).is_err());
    }

    #[test]
    fn test_content_roundtrip() {
        let conn = init_memory_db().unwrap();
        let id = insert_book(&conn, &book("a.pdf", "A")).unwrap();
        assert!(get_content(&conn, id).unwrap().is_none());

        let content = BookContent {
            first_page: "First".to_string(),
            table_of_contents: "Contents".to_string(),
            ..BookContent::default()
        };
        insert_content(&conn, id, &content).unwrap();
        let stored = get_content(&conn, id).unwrap().unwrap();
        assert_eq!(stored.first_page, "First");
        assert_eq!(stored.table_of_contents, "Contents");
    }

    #[test]
    fn test_list_and_categories() {
        let conn = init_memory_db().unwrap();
        let (prog, _) = get_or_create_category(&conn, "Programming").unwrap();
        for (name, title) in [("b.pdf", "Beta"), ("a.pdf", "alpha"), ("c.pdf", "Gamma")] {
            let mut b = book(name, title);
            b.category_id = Some(prog);
            insert_book(&conn, &b).unwrap();
        }
        insert_book(&conn, &book("d.pdf", "Delta")).unwrap();

        let all = list_books(&conn, None).unwrap();
        let titles: Vec<&str> = all.iter().map(|b| b.title.as_str()).collect();
        assert_eq!(titles, vec!["alpha", "Beta", "Delta", "Gamma"]);
        assert_eq!(list_books(&conn, Some(2)).unwrap().len(), 2);

        let groups = category_groups(&conn).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].name, "Programming");
        assert_eq!(groups[0].count, 3);
        assert_eq!(groups[0].samples, vec!["alpha", "Beta", "Gamma"]);
        assert_eq!(groups[1].name, UNCATEGORIZED);
        assert_eq!(groups[1].samples, vec!["Delta"]);
    }

    #[test]
    fn test_thumbnails() {
        let conn = init_memory_db().unwrap();
        let mut with = book("a.pdf", "A");
        with.thumbnail_path = Some("Thumbs/a.png".to_string());
        insert_book(&conn, &with).unwrap();
        let missing = insert_book(&conn, &book("b.pdf", "B")).unwrap();

        let summary = thumbnail_summary(&conn).unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.with_thumbnail, 1);
        assert_eq!(summary.without_thumbnail, 1);
        assert_eq!(summary.samples, vec![("A".to_string(), "Thumbs/a.png".to_string())]);

        let rows = books_missing_thumbnail(&conn, Some(10)).unwrap();
        assert_eq!(rows, vec![(missing, "b.pdf".to_string(), "B".to_string())]);

        set_thumbnail(&conn, missing, "Thumbs/b.png").unwrap();
        assert!(books_missing_thumbnail(&conn, None).unwrap().is_empty());
        assert_eq!(thumbnail_paths(&conn).unwrap().len(), 2);
    }

    #[test]
    fn test_fts_query_quoting() {
        assert_eq!(fts_query("rust  book"), "\"rust\" \"book\"");
        assert_eq!(fts_query("\"AND\" OR"), "\"AND\" \"OR\"");
        assert_eq!(fts_query("   "), "");
    }

    #[test]
    fn test_search() {
        let conn = init_memory_db().unwrap();
        let a = insert_book(&conn, &book("a.pdf", "Programming Rust")).unwrap();
        let b = insert_book(&conn, &book("b.pdf", "Gardening Basics")).unwrap();
        index_full_text(&conn, a, "Programming Rust", "Jim Blandy", "O'Reilly", "Programming", "ownership borrowing").unwrap();
        index_full_text(&conn, b, "Gardening Basics", "Ann Green", "", "Home", "soil seeds").unwrap();

        let hits = search(&conn, "borrowing", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].book_id, a);

        let hits = search(&conn, "rust ownership", 10).unwrap();
        assert_eq!(hits.len(), 1);

        assert!(search(&conn, "nothing-matches-this", 10).unwrap().is_empty());
        assert!(search(&conn, "  ", 10).unwrap().is_empty());
        // FTS operators are treated as plain words
        assert!(search(&conn, "NEAR(", 10).is_ok());
    }

    #[test]
    fn test_events_and_stats() {
        let conn = init_memory_db().unwrap();
        let mut b = book("a.pdf", "A");
        b.overall_confidence = 0.5;
        let id = insert_book(&conn, &b).unwrap();
        let mut b2 = book("b.pdf", "B");
        b2.overall_confidence = 1.0;
        insert_book(&conn, &b2).unwrap();

        record_event(&conn, id, "migration", &serde_json::json!({"source": "csv"})).unwrap();
        assert_eq!(count_events(&conn, "migration").unwrap(), 1);

        let stats = library_stats(&conn).unwrap();
        assert_eq!(stats.total_books, 2);
        assert_eq!(stats.total_size, 2048);
        assert!((stats.average_confidence - 0.75).abs() < 1e-9);
        assert_eq!(stats.categories, vec![(UNCATEGORIZED.to_string(), 2)]);
    }
}
