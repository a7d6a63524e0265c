use std::collections::BTreeSet;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{AppError, Result};
use crate::models::{Article, NewArticle};

pub(super) const ARTICLE_COLUMNS: &str = "id, url, title, normalized_title, publication_date, source, \
     full_text, text_length, content_hash, token_set, duplicate_of, similarity, created_at";

/// Inclusive publication-date range for similarity candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl DateWindow {
    pub fn around(date: DateTime<Utc>, days: i64) -> Self {
        let half = Duration::days(days);
        Self {
            from: date - half,
            to: date + half,
        }
    }
}

/// Article operations over one SQLite connection. The repository hands one
/// of these to callers inside an immediate transaction, so a sequence of
/// lookups and a write through the same `Archive` is atomic.
pub struct Archive<'a> {
    conn: &'a Connection,
}

impl<'a> Archive<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn find_by_url(&self, url: &str) -> Result<Option<Article>> {
        let sql = format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE url = ?1");
        let article = self
            .conn
            .query_row(&sql, params![url], article_from_row)
            .optional()?;
        Ok(article)
    }

    pub fn find_by_content_hash(&self, content_hash: &str) -> Result<Vec<Article>> {
        let sql = format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE content_hash = ?1 ORDER BY id");
        self.query_articles(&sql, params![content_hash])
    }

    pub fn find_by_normalized_title(&self, normalized_title: &str) -> Result<Vec<Article>> {
        let sql = format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE normalized_title = ?1 ORDER BY id");
        self.query_articles(&sql, params![normalized_title])
    }

    /// The bounded working set for Jaccard comparison: articles published
    /// inside `window`, optionally restricted to one source, nearest the end
    /// of the window first, at most `limit` rows.
    pub fn candidates_for_similarity(
        &self,
        source: Option<&str>,
        window: DateWindow,
        limit: usize,
    ) -> Result<Vec<Article>> {
        let from = format_datetime(&window.from);
        let to = format_datetime(&window.to);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        match source {
            Some(source) => {
                let sql = format!(
                    "SELECT {ARTICLE_COLUMNS} FROM articles
                     WHERE source = ?1 AND publication_date BETWEEN ?2 AND ?3
                     ORDER BY publication_date DESC, id LIMIT ?4"
                );
                self.query_articles(&sql, params![source, from, to, limit])
            }
            None => {
                let sql = format!(
                    "SELECT {ARTICLE_COLUMNS} FROM articles
                     WHERE publication_date BETWEEN ?1 AND ?2
                     ORDER BY publication_date DESC, id LIMIT ?3"
                );
                self.query_articles(&sql, params![from, to, limit])
            }
        }
    }

    pub fn insert_new(&self, article: &NewArticle) -> Result<i64> {
        self.insert(article, None, None)
    }

    /// Insert `article` as a duplicate of `canonical_id`. The target must exist
    /// and must itself be canonical; resolving a duplicate to its canonical
    /// row is the caller's job.
    pub fn insert_duplicate(
        &self,
        article: &NewArticle,
        canonical_id: i64,
        similarity: Option<f64>,
    ) -> Result<i64> {
        let target: Option<Option<i64>> = self
            .conn
            .query_row(
                "SELECT duplicate_of FROM articles WHERE id = ?1",
                params![canonical_id],
                |row| row.get(0),
            )
            .optional()?;

        let integrity = |reason: String| AppError::Integrity {
            url: article.url.clone(),
            content_hash: article.content_hash.clone(),
            canonical_id,
            reason,
        };

        match target {
            None => Err(integrity("canonical article does not exist".to_string())),
            Some(Some(parent)) => Err(integrity(format!(
                "canonical article is itself a duplicate of {parent}"
            ))),
            Some(None) => self.insert(article, Some(canonical_id), similarity),
        }
    }

    fn insert(
        &self,
        article: &NewArticle,
        duplicate_of: Option<i64>,
        similarity: Option<f64>,
    ) -> Result<i64> {
        let token_set = serde_json::to_string(&article.token_set)?;
        self.conn.execute(
            r#"INSERT INTO articles (url, title, normalized_title, publication_date, source,
                                     full_text, text_length, content_hash, token_set,
                                     duplicate_of, similarity)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
            params![
                article.url,
                article.title,
                article.normalized_title,
                format_datetime(&article.publication_date),
                article.source,
                article.full_text,
                article.full_text.chars().count() as i64,
                article.content_hash,
                token_set,
                duplicate_of,
                similarity,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn query_articles(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Article>> {
        let mut stmt = self.conn.prepare(sql)?;
        let articles = stmt
            .query_map(params, article_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(articles)
    }
}

/// Fixed-width UTC RFC 3339, so text comparison in SQL orders by time.
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // Try RFC3339 first (e.g., "2026-01-11T12:34:56+00:00")
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Try SQLite datetime format (e.g., "2026-01-11 12:34:56")
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

pub(super) fn datetime_column(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_datetime(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("invalid timestamp {raw:?}").into(),
        )
    })
}

pub(super) fn article_from_row(row: &Row) -> rusqlite::Result<Article> {
    let token_json: String = row.get(9)?;
    let token_set: BTreeSet<String> = serde_json::from_str(&token_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(9, Type::Text, Box::new(e)))?;

    Ok(Article {
        id: row.get(0)?,
        url: row.get(1)?,
        title: row.get(2)?,
        normalized_title: row.get(3)?,
        publication_date: datetime_column(row, 4)?,
        source: row.get(5)?,
        full_text: row.get(6)?,
        text_length: row.get(7)?,
        content_hash: row.get(8)?,
        token_set,
        duplicate_of: row.get(10)?,
        similarity: row.get(11)?,
        created_at: datetime_column(row, 12)?,
    })
}
