use rusqlite::{Connection, OpenFlags, OptionalExtension};
use std::path::Path;
use tracing::{info, warn};

use crate::error::Result;
use crate::extractor::LegacyClassification;

/// Catalog schema version stored in SystemConfig
pub const SCHEMA_VERSION: &str = "2";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS Categories (
        CategoryID INTEGER PRIMARY KEY AUTOINCREMENT,
        CategoryName TEXT NOT NULL UNIQUE,
        CreatedDate DATETIME DEFAULT CURRENT_TIMESTAMP
    );

    CREATE TABLE IF NOT EXISTS Subjects (
        SubjectID INTEGER PRIMARY KEY AUTOINCREMENT,
        SubjectName TEXT NOT NULL,
        CategoryID INTEGER REFERENCES Categories(CategoryID),
        CreatedDate DATETIME DEFAULT CURRENT_TIMESTAMP,
        UNIQUE (SubjectName, CategoryID)
    );

    CREATE TABLE IF NOT EXISTS Authors (
        AuthorID INTEGER PRIMARY KEY AUTOINCREMENT,
        AuthorName TEXT NOT NULL UNIQUE
    );

    CREATE TABLE IF NOT EXISTS Publishers (
        PublisherID INTEGER PRIMARY KEY AUTOINCREMENT,
        PublisherName TEXT NOT NULL UNIQUE
    );

    CREATE TABLE IF NOT EXISTS Books (
        BookID INTEGER PRIMARY KEY AUTOINCREMENT,
        FileName TEXT NOT NULL UNIQUE,
        FilePath TEXT,
        FileSize INTEGER,
        FileHash TEXT,
        PageCount INTEGER,
        Title TEXT NOT NULL,
        AuthorID INTEGER REFERENCES Authors(AuthorID),
        PublisherID INTEGER REFERENCES Publishers(PublisherID),
        CategoryID INTEGER REFERENCES Categories(CategoryID),
        SubjectID INTEGER REFERENCES Subjects(SubjectID),
        PublicationYear INTEGER,
        ISBN TEXT,
        LCCN TEXT,
        ISSN TEXT,
        OCLC TEXT,
        DOI TEXT,
        Edition TEXT,
        PDFTitle TEXT,
        PDFAuthor TEXT,
        PDFSubject TEXT,
        PDFCreator TEXT,
        PDFProducer TEXT,
        PDFCreationDate TEXT,
        ExtractionMethod TEXT,
        QualityScore INTEGER DEFAULT 0,
        OverallConfidence REAL DEFAULT 0,
        CoverPath TEXT,
        ThumbnailPath TEXT,
        HasCover INTEGER DEFAULT 0,
        HasThumbnail INTEGER DEFAULT 0,
        ProcessingFlags TEXT DEFAULT '[]',
        AccessLevel TEXT DEFAULT 'public',
        DateAdded DATETIME DEFAULT CURRENT_TIMESTAMP,
        LastModified DATETIME DEFAULT CURRENT_TIMESTAMP
    );

    CREATE TABLE IF NOT EXISTS BookContent (
        BookID INTEGER PRIMARY KEY REFERENCES Books(BookID) ON DELETE CASCADE,
        FirstPageText TEXT,
        TitlePageText TEXT,
        CopyrightPageText TEXT,
        TableOfContents TEXT,
        AbstractText TEXT
    );

    CREATE VIRTUAL TABLE IF NOT EXISTS BooksFullText USING fts5(
        Title, Author, Publisher, Category, Content
    );

    CREATE TABLE IF NOT EXISTS BookAnalytics (
        EventID INTEGER PRIMARY KEY AUTOINCREMENT,
        BookID INTEGER REFERENCES Books(BookID) ON DELETE CASCADE,
        EventType TEXT NOT NULL,
        EventData TEXT,
        Timestamp DATETIME DEFAULT CURRENT_TIMESTAMP
    );

    CREATE TABLE IF NOT EXISTS SystemConfig (
        Key TEXT PRIMARY KEY,
        Value TEXT,
        Description TEXT,
        UpdatedDate DATETIME DEFAULT CURRENT_TIMESTAMP
    );

    CREATE INDEX IF NOT EXISTS idx_books_category ON Books(CategoryID);
    CREATE INDEX IF NOT EXISTS idx_books_author ON Books(AuthorID);
    CREATE INDEX IF NOT EXISTS idx_books_year ON Books(PublicationYear);
    CREATE INDEX IF NOT EXISTS idx_books_isbn ON Books(ISBN);
    CREATE INDEX IF NOT EXISTS idx_analytics_book ON BookAnalytics(BookID);

    CREATE VIEW IF NOT EXISTS BookDetails AS
    SELECT
        b.BookID, b.FileName, b.FilePath, b.FileSize, b.FileHash, b.PageCount,
        b.Title, a.AuthorName, p.PublisherName, c.CategoryName, s.SubjectName,
        b.PublicationYear, b.ISBN, b.LCCN, b.ISSN, b.OCLC, b.DOI, b.Edition,
        b.ExtractionMethod, b.QualityScore, b.OverallConfidence,
        b.CoverPath, b.ThumbnailPath, b.HasCover, b.HasThumbnail,
        b.ProcessingFlags, b.AccessLevel, b.DateAdded
    FROM Books b
    LEFT JOIN Authors a ON b.AuthorID = a.AuthorID
    LEFT JOIN Publishers p ON b.PublisherID = p.PublisherID
    LEFT JOIN Categories c ON b.CategoryID = c.CategoryID
    LEFT JOIN Subjects s ON b.SubjectID = s.SubjectID;
";

/// Open the catalog, creating the schema when needed
pub fn init_db<P: AsRef<Path>>(path: P) -> Result<Connection> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let conn = Connection::open(path)?;
    prepare(&conn)?;
    Ok(conn)
}

/// In-memory catalog for tests and dry runs
pub fn init_memory_db() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    prepare(&conn)?;
    Ok(conn)
}

fn prepare(conn: &Connection) -> Result<()> {
    conn.execute("PRAGMA encoding = 'UTF-8'", [])?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    conn.execute_batch(SCHEMA)?;

    let created = chrono::Utc::now().to_rfc3339();
    let seeds = [
        ("schema_version", SCHEMA_VERSION, "Catalog schema version"),
        ("created_date", created.as_str(), "Catalog creation time"),
        ("library_name", "Digital Alexandria", "Display name of the library"),
    ];
    for (key, value, description) in seeds {
        conn.execute(
            "INSERT OR IGNORE INTO SystemConfig (Key, Value, Description) VALUES (?1, ?2, ?3)",
            rusqlite::params![key, value, description],
        )?;
    }
    Ok(())
}

// ====== SystemConfig ======

pub fn get_system_value(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row("SELECT Value FROM SystemConfig WHERE Key = ?1", [key], |row| row.get(0))
        .optional()?;
    Ok(value)
}

pub fn set_system_value(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO SystemConfig (Key, Value) VALUES (?1, ?2)
         ON CONFLICT(Key) DO UPDATE SET Value = excluded.Value, UpdatedDate = CURRENT_TIMESTAMP",
        rusqlite::params![key, value],
    )?;
    Ok(())
}

// ====== Legacy database ======

/// Read category and subject per book from the previous library database
///
/// The old schema is `books(title, subject_id)`, `subjects(id, subject,
/// category_id)` and `categories(id, category)`. A missing file yields an
/// empty classification.
pub fn load_legacy_classification<P: AsRef<Path>>(path: P) -> Result<LegacyClassification> {
    let path = path.as_ref();
    let mut legacy = LegacyClassification::new();

    if !path.exists() {
        warn!("Legacy database not found: {}", path.display());
        return Ok(legacy);
    }

    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let mut stmt = conn.prepare(
        "SELECT b.title, c.category, s.subject
         FROM books b
         LEFT JOIN subjects s ON b.subject_id = s.id
         LEFT JOIN categories c ON s.category_id = c.id",
    )?;

    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, Option<String>>(0)?,
            row.get::<_, Option<String>>(1)?,
            row.get::<_, Option<String>>(2)?,
        ))
    })?;

    for row in rows {
        let (title, category, subject) = row?;
        if let Some(title) = title {
            legacy.insert(&title, category, subject);
        }
    }

    info!("Loaded {} legacy classifications", legacy.len());
    Ok(legacy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::{NOT_FOUND, UNKNOWN};
    use tempfile::TempDir;

    #[test]
    fn test_init_db_creates_schema() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("Database").join("Alexandria.db");
        let conn = init_db(&path).unwrap();
        assert!(path.exists());

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type IN ('table', 'view') ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();

        for expected in ["Authors", "BookAnalytics", "BookContent", "BookDetails", "Books",
                         "BooksFullText", "Categories", "Publishers", "Subjects", "SystemConfig"] {
            assert!(tables.iter().any(|t| t == expected), "missing {}", expected);
        }
    }

    #[test]
    fn test_init_db_twice_keeps_seeds() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("catalog.db");
        {
            let conn = init_db(&path).unwrap();
            set_system_value(&conn, "library_name", "Anderson's Library").unwrap();
        }
        let conn = init_db(&path).unwrap();
        assert_eq!(get_system_value(&conn, "library_name").unwrap().as_deref(), Some("Anderson's Library"));
        assert_eq!(get_system_value(&conn, "schema_version").unwrap().as_deref(), Some(SCHEMA_VERSION));
        assert_eq!(get_system_value(&conn, "missing").unwrap(), None);
    }

    #[test]
    fn test_load_legacy_classification() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("legacy.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE categories (id INTEGER PRIMARY KEY, category TEXT);
                 CREATE TABLE subjects (id INTEGER PRIMARY KEY, subject TEXT, category_id INTEGER);
                 CREATE TABLE books (id INTEGER PRIMARY KEY, title TEXT, subject_id INTEGER);
                 INSERT INTO categories VALUES (1, 'Programming');
                 INSERT INTO subjects VALUES (1, 'Python', 1);
                 INSERT INTO subjects VALUES (2, NULL, NULL);
                 INSERT INTO books VALUES (1, 'Learning Python', 1);
                 INSERT INTO books VALUES (2, 'Orphan', 2);
                 INSERT INTO books VALUES (3, 'Loose', NULL);",
            )
            .unwrap();
        }

        let legacy = load_legacy_classification(&path).unwrap();
        assert_eq!(legacy.len(), 3);
        assert_eq!(legacy.lookup("Learning Python"), ("Programming".to_string(), "Python".to_string()));
        assert_eq!(legacy.lookup("Orphan"), (UNKNOWN.to_string(), UNKNOWN.to_string()));
        assert_eq!(legacy.lookup("Loose"), (UNKNOWN.to_string(), UNKNOWN.to_string()));
        assert_eq!(legacy.lookup("Nope"), (NOT_FOUND.to_string(), NOT_FOUND.to_string()));
    }

    #[test]
    fn test_missing_legacy_database() {
        let legacy = load_legacy_classification("/no/such/legacy.db").unwrap();
        assert!(legacy.is_empty());
    }
}
