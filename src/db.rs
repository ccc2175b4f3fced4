use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};
use tracing::{info, warn};

use crate::date::DateKey;
use crate::parser::post::PostRecord;

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create database directory {}", dir.display()))?;
    }
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

fn index_name(table: &str) -> String {
    format!("idx_{table}_category_date")
}

/// Columns added after the first schema revision, with their definitions.
const LATE_COLUMNS: &[(&str, &str)] = &[
    ("date_str", "CHAR(8)"),
    ("llm_summary", "TEXT NOT NULL DEFAULT ''"),
    ("is_useful", "BOOLEAN NOT NULL DEFAULT 0"),
    ("has_tts", "BOOLEAN NOT NULL DEFAULT 0"),
];

/// Create the posts table, or bring an older one up to date. Safe to call
/// on every start.
pub fn init_schema(conn: &Connection, table: &str) -> Result<()> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        [table],
        |r| r.get(0),
    )?;

    if !exists {
        conn.execute_batch(&format!(
            "
            CREATE TABLE {table} (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                date_str    CHAR(8),
                category    TEXT NOT NULL,
                post_url    TEXT NOT NULL,
                post_title  TEXT NOT NULL DEFAULT '',
                post_body   TEXT NOT NULL DEFAULT '',
                comments    TEXT NOT NULL DEFAULT '[]',
                llm_summary TEXT NOT NULL DEFAULT '',
                is_useful   BOOLEAN NOT NULL DEFAULT 0,
                has_tts     BOOLEAN NOT NULL DEFAULT 0,
                created_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX {idx} ON {table} (category, date_str);
            ",
            idx = index_name(table),
        ))?;
        info!("{} table created", table);
        return Ok(());
    }

    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
    let columns = stmt
        .query_map([table], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    for (name, definition) in LATE_COLUMNS {
        if !columns.iter().any(|c| c == name) {
            conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {name} {definition}"))?;
            info!("Added {} column to {}", name, table);
        }
    }

    let idx = index_name(table);
    let has_index: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'index' AND name = ?1)",
        [&idx],
        |r| r.get(0),
    )?;
    if !has_index {
        conn.execute_batch(&format!("CREATE INDEX {idx} ON {table} (category, date_str)"))?;
        info!("Created index {} on {}", idx, table);
    }
    Ok(())
}

// ── Writing ──

pub struct PostRow {
    pub date_str: String,
    pub category: String,
    pub post_url: String,
    pub post_title: String,
    pub post_body: String,
    pub comments: Vec<String>,
    pub llm_summary: String,
}

impl PostRow {
    /// `None` for threads without replies; those are never stored.
    pub fn from_record(
        record: PostRecord,
        category: &str,
        date: DateKey,
        llm_summary: Option<String>,
    ) -> Option<Self> {
        if record.is_empty() {
            return None;
        }
        Some(Self {
            date_str: date.storage(),
            category: category.to_string(),
            post_url: record.url,
            post_title: record.title,
            post_body: record.body,
            comments: record.comments,
            llm_summary: llm_summary.unwrap_or_default(),
        })
    }
}

pub fn insert_post(conn: &Connection, table: &str, row: &PostRow) -> Result<()> {
    let comments = serde_json::to_string(&row.comments)?;
    conn.execute(
        &format!(
            "INSERT INTO {table}
             (date_str, category, post_url, post_title, post_body, comments, llm_summary)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
        ),
        rusqlite::params![
            row.date_str,
            row.category,
            row.post_url,
            row.post_title,
            row.post_body,
            comments,
            row.llm_summary,
        ],
    )?;
    Ok(())
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct InsertStats {
    pub attempted: usize,
    pub inserted: usize,
}

/// Insert rows one at a time; a failed row is logged and skipped.
pub fn insert_posts(conn: &Connection, table: &str, rows: &[PostRow]) -> InsertStats {
    let mut stats = InsertStats::default();
    for row in rows {
        stats.attempted += 1;
        match insert_post(conn, table, row) {
            Ok(()) => stats.inserted += 1,
            Err(e) => warn!("Failed to insert {}: {:#}", row.post_url, e),
        }
    }
    info!("Inserted {} of {} posts", stats.inserted, stats.attempted);
    stats
}

// ── Reading ──

/// Newest stored date for a category.
pub fn latest_date_key(conn: &Connection, table: &str, category: &str) -> Result<Option<DateKey>> {
    let max: Option<String> = conn
        .query_row(
            &format!("SELECT MAX(date_str) FROM {table} WHERE category = ?1"),
            [category],
            |r| r.get(0),
        )
        .optional()?
        .flatten();
    max.map(|s| {
        DateKey::parse_storage(&s).with_context(|| format!("Bad date_str in {table}: {s:?}"))
    })
    .transpose()
}

pub fn count_posts(conn: &Connection, table: &str, category: Option<&str>) -> Result<usize> {
    let count = match category {
        Some(c) => conn.query_row(
            &format!("SELECT COUNT(*) FROM {table} WHERE category = ?1"),
            [c],
            |r| r.get(0),
        )?,
        None => conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?,
    };
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "wxc_posts";

    fn memory() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn, TABLE).unwrap();
        conn
    }

    fn row(url: &str, date: &str) -> PostRow {
        PostRow {
            date_str: date.to_string(),
            category: "znjy".to_string(),
            post_url: url.to_string(),
            post_title: "标题".to_string(),
            post_body: "内容".to_string(),
            comments: vec!["第一条".to_string(), "second \"quoted\"".to_string()],
            llm_summary: String::new(),
        }
    }

    fn index_count(conn: &Connection) -> i64 {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND tbl_name = ?1",
            [TABLE],
            |r| r.get(0),
        )
        .unwrap()
    }

    #[test]
    fn init_schema_twice_is_noop() {
        let conn = memory();
        init_schema(&conn, TABLE).unwrap();
        assert_eq!(index_count(&conn), 1);
    }

    #[test]
    fn init_schema_upgrades_old_table() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE wxc_posts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                category TEXT NOT NULL,
                post_url TEXT NOT NULL,
                post_title TEXT NOT NULL DEFAULT '',
                post_body TEXT NOT NULL DEFAULT '',
                comments TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            INSERT INTO wxc_posts (category, post_url) VALUES ('znjy', 'old');",
        )
        .unwrap();

        init_schema(&conn, TABLE).unwrap();
        init_schema(&conn, TABLE).unwrap();

        let (useful, tts, summary): (bool, bool, String) = conn
            .query_row(
                "SELECT is_useful, has_tts, llm_summary FROM wxc_posts WHERE post_url = 'old'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert!(!useful && !tts);
        assert_eq!(summary, "");
        assert_eq!(index_count(&conn), 1);
        insert_post(&conn, TABLE, &row("new", "20250218")).unwrap();
    }

    #[test]
    fn stores_comments_as_utf8_json() {
        let conn = memory();
        insert_post(&conn, TABLE, &row("u1", "20250218")).unwrap();
        let (comments, useful): (String, bool) = conn
            .query_row("SELECT comments, is_useful FROM wxc_posts", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!(comments, r#"["第一条","second \"quoted\""]"#);
        assert!(!useful);
    }

    #[test]
    fn failed_insert_does_not_stop_the_batch() {
        let conn = memory();
        conn.execute_batch(
            "CREATE TRIGGER reject_u3 BEFORE INSERT ON wxc_posts
             WHEN NEW.post_url = 'u3'
             BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
        )
        .unwrap();

        let rows: Vec<PostRow> = (1..=5).map(|i| row(&format!("u{i}"), "20250218")).collect();
        let stats = insert_posts(&conn, TABLE, &rows);
        assert_eq!(stats, InsertStats { attempted: 5, inserted: 4 });
        assert_eq!(count_posts(&conn, TABLE, Some("znjy")).unwrap(), 4);
    }

    #[test]
    fn latest_date_key_per_category() {
        let conn = memory();
        assert_eq!(latest_date_key(&conn, TABLE, "znjy").unwrap(), None);

        insert_post(&conn, TABLE, &row("a", "20250215")).unwrap();
        insert_post(&conn, TABLE, &row("b", "20250218")).unwrap();
        let mut other = row("c", "20250301");
        other.category = "other".to_string();
        insert_post(&conn, TABLE, &other).unwrap();

        let latest = latest_date_key(&conn, TABLE, "znjy").unwrap().unwrap();
        assert_eq!(latest.storage(), "20250218");
        assert_eq!(count_posts(&conn, TABLE, None).unwrap(), 3);
    }

    #[test]
    fn empty_threads_never_become_rows() {
        let date = DateKey::from_ymd(2025, 2, 18).unwrap();
        let empty = PostRecord {
            url: "u".into(),
            title: "t".into(),
            body: "b".into(),
            comments: vec![],
        };
        assert!(PostRow::from_record(empty.clone(), "znjy", date, None).is_none());

        let full = PostRecord {
            comments: vec!["c".into()],
            ..empty
        };
        let row = PostRow::from_record(full, "znjy", date, Some("摘要".into())).unwrap();
        assert_eq!(row.date_str, "20250218");
        assert_eq!(row.llm_summary, "摘要");
    }

    #[test]
    fn connect_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("wxc.sqlite");
        let conn = connect(&path).unwrap();
        init_schema(&conn, TABLE).unwrap();
        assert!(path.exists());
    }
}
