use chrono::{Duration, Utc};
use rusqlite::{params, params_from_iter, OptionalExtension, TransactionBehavior};
use tokio_rusqlite::Connection;

use crate::error::{AppError, Result};
use crate::models::{
    ArchiveStats, Article, ArticleFilter, RunRecord, RunStats, RunStatus, SourceStats,
};

use super::archive::{
    article_from_row, datetime_column, format_datetime, parse_datetime, Archive, ARTICLE_COLUMNS,
};
#[cfg(test)]
use super::archive::DateWindow;
#[cfg(test)]
use crate::models::NewArticle;
use super::schema::SCHEMA;

/// The archive store. All access goes through one `tokio-rusqlite`
/// connection, whose background thread serializes every call.
pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    /// Run `f` inside a `BEGIN IMMEDIATE` transaction. The write lock is taken
    /// up front, so lookups made through the `Archive` cannot be invalidated by
    /// another writer before the commit. Any error rolls everything back.
    pub async fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Archive<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.conn
            .call(move |conn| Ok(run_in_transaction(conn, f)))
            .await?
    }

    async fn read<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Archive<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.conn
            .call(move |conn| Ok(f(&Archive::new(conn))))
            .await?
    }

    // Article operations

    pub async fn find_by_url(&self, url: &str) -> Result<Option<Article>> {
        let url = url.to_string();
        self.read(move |archive| archive.find_by_url(&url)).await
    }

    #[cfg(test)]
    pub async fn find_by_content_hash(&self, content_hash: &str) -> Result<Vec<Article>> {
        let content_hash = content_hash.to_string();
        self.read(move |archive| archive.find_by_content_hash(&content_hash))
            .await
    }

    #[cfg(test)]
    pub async fn find_by_normalized_title(&self, normalized_title: &str) -> Result<Vec<Article>> {
        let normalized_title = normalized_title.to_string();
        self.read(move |archive| archive.find_by_normalized_title(&normalized_title))
            .await
    }

    #[cfg(test)]
    pub async fn candidates_for_similarity(
        &self,
        source: Option<String>,
        window: DateWindow,
        limit: usize,
    ) -> Result<Vec<Article>> {
        self.read(move |archive| archive.candidates_for_similarity(source.as_deref(), window, limit))
            .await
    }

    #[cfg(test)]
    pub async fn insert_new(&self, article: NewArticle) -> Result<i64> {
        self.transaction(move |archive| archive.insert_new(&article))
            .await
    }

    #[cfg(test)]
    pub async fn insert_duplicate(
        &self,
        article: NewArticle,
        canonical_id: i64,
        similarity: Option<f64>,
    ) -> Result<i64> {
        self.transaction(move |archive| archive.insert_duplicate(&article, canonical_id, similarity))
            .await
    }

    /// Articles ordered newest publication first.
    pub async fn list_articles(&self, filter: ArticleFilter) -> Result<Vec<Article>> {
        let articles = self
            .conn
            .call(move |conn| {
                let mut sql = format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE 1=1");
                let mut values: Vec<String> = Vec::new();

                if !filter.include_duplicates {
                    sql.push_str(" AND duplicate_of IS NULL");
                }
                if let Some(source) = filter.source {
                    values.push(source);
                    sql.push_str(&format!(" AND source = ?{}", values.len()));
                }
                if let Some(since) = filter.since {
                    values.push(format_datetime(&since));
                    sql.push_str(&format!(" AND publication_date >= ?{}", values.len()));
                }
                if let Some(until) = filter.until {
                    values.push(format_datetime(&until));
                    sql.push_str(&format!(" AND publication_date <= ?{}", values.len()));
                }
                sql.push_str(" ORDER BY publication_date DESC, id DESC");

                let mut stmt = conn.prepare(&sql)?;
                let articles = stmt
                    .query_map(params_from_iter(values.iter()), article_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(articles)
            })
            .await?;
        Ok(articles)
    }

    pub async fn stats(&self) -> Result<ArchiveStats> {
        let stats = self
            .conn
            .call(|conn| {
                let (total, duplicates): (i64, Option<i64>) = conn.query_row(
                    "SELECT COUNT(*), SUM(duplicate_of IS NOT NULL) FROM articles",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?;

                let (canonical, earliest, latest, avg_length, total_chars): (
                    i64,
                    Option<String>,
                    Option<String>,
                    Option<f64>,
                    Option<i64>,
                ) = conn.query_row(
                    r#"SELECT COUNT(*), MIN(publication_date), MAX(publication_date),
                              AVG(text_length), SUM(text_length)
                       FROM articles WHERE duplicate_of IS NULL"#,
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
                )?;

                let mut stmt = conn.prepare(
                    r#"SELECT source, COUNT(*), AVG(text_length)
                       FROM articles WHERE duplicate_of IS NULL
                       GROUP BY source
                       ORDER BY COUNT(*) DESC, source"#,
                )?;
                let by_source = stmt
                    .query_map([], |row| {
                        Ok(SourceStats {
                            source: row.get(0)?,
                            count: row.get(1)?,
                            avg_length: row.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;

                Ok(ArchiveStats {
                    total,
                    canonical,
                    duplicates: duplicates.unwrap_or(0),
                    earliest: earliest.as_deref().and_then(parse_datetime),
                    latest: latest.as_deref().and_then(parse_datetime),
                    avg_length: avg_length.unwrap_or(0.0),
                    total_chars: total_chars.unwrap_or(0),
                    by_source,
                })
            })
            .await?;
        Ok(stats)
    }

    // Single-writer lock

    /// Claim the archive for one run. Fails with `StoreLocked` while another
    /// holder's lock is younger than `stale_after`; an older lock is taken over.
    pub async fn acquire_lock(&self, holder: &str, stale_after: Duration) -> Result<()> {
        let holder = holder.to_string();
        self.conn
            .call(move |conn| Ok(acquire_lock(conn, &holder, stale_after)))
            .await?
    }

    pub async fn release_lock(&self, holder: &str) -> Result<()> {
        let holder = holder.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM run_lock WHERE id = 1 AND holder = ?1",
                    params![holder],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // Run tracking

    pub async fn begin_run(&self) -> Result<i64> {
        let id = self
            .conn
            .call(|conn| {
                conn.execute(
                    "INSERT INTO collection_runs (started_at, status) VALUES (datetime('now'), ?1)",
                    params![RunStatus::Running.as_str()],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    pub async fn finish_run(&self, run_id: i64, status: RunStatus, stats: RunStats) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"UPDATE collection_runs SET
                           finished_at = datetime('now'),
                           status = ?2,
                           fetched = ?3,
                           new_articles = ?4,
                           duplicates = ?5,
                           near_duplicates = ?6,
                           skipped_existing = ?7,
                           skipped_old = ?8,
                           failed = ?9,
                           extraction_failed = ?10
                       WHERE id = ?1"#,
                    params![
                        run_id,
                        status.as_str(),
                        stats.fetched,
                        stats.new,
                        stats.duplicates,
                        stats.near_duplicates,
                        stats.skipped_existing,
                        stats.skipped_old,
                        stats.failed,
                        stats.extraction_failed,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn last_run(&self) -> Result<Option<RunRecord>> {
        let run = self
            .conn
            .call(|conn| {
                let run = conn
                    .query_row(
                        r#"SELECT id, started_at, finished_at, status, fetched, new_articles,
                                  duplicates, near_duplicates, skipped_existing, skipped_old,
                                  failed, extraction_failed
                           FROM collection_runs ORDER BY id DESC LIMIT 1"#,
                        [],
                        |row| {
                            Ok(RunRecord {
                                id: row.get(0)?,
                                started_at: datetime_column(row, 1)?,
                                finished_at: row
                                    .get::<_, Option<String>>(2)?
                                    .and_then(|s| parse_datetime(&s)),
                                status: RunStatus::parse(&row.get::<_, String>(3)?),
                                stats: RunStats {
                                    fetched: row.get(4)?,
                                    new: row.get(5)?,
                                    duplicates: row.get(6)?,
                                    near_duplicates: row.get(7)?,
                                    skipped_existing: row.get(8)?,
                                    skipped_old: row.get(9)?,
                                    failed: row.get(10)?,
                                    extraction_failed: row.get(11)?,
                                },
                            })
                        },
                    )
                    .optional()?;
                Ok(run)
            })
            .await?;
        Ok(run)
    }
}

fn run_in_transaction<F, T>(conn: &mut rusqlite::Connection, f: F) -> Result<T>
where
    F: FnOnce(&Archive<'_>) -> Result<T>,
{
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let value = f(&Archive::new(&tx))?;
    tx.commit()?;
    Ok(value)
}

fn acquire_lock(conn: &mut rusqlite::Connection, holder: &str, stale_after: Duration) -> Result<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let current: Option<(String, String)> = tx
        .query_row(
            "SELECT holder, acquired_at FROM run_lock WHERE id = 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let now = Utc::now();
    if let Some((other, acquired_at)) = current {
        let acquired = parse_datetime(&acquired_at);
        let fresh = acquired.is_some_and(|at| now - at < stale_after);
        if fresh {
            return Err(AppError::StoreLocked(format!(
                "held by {other} since {acquired_at}"
            )));
        }
        tracing::warn!(holder = %other, acquired_at = %acquired_at, "Taking over stale run lock");
    }

    tx.execute(
        "INSERT OR REPLACE INTO run_lock (id, holder, acquired_at) VALUES (1, ?1, ?2)",
        params![holder, format_datetime(&now)],
    )?;

    // With the lock held, a run still marked running belongs to a process
    // that died before closing it.
    let abandoned = tx.execute(
        "UPDATE collection_runs SET status = ?1, finished_at = datetime('now') WHERE status = ?2",
        params![RunStatus::Failed.as_str(), RunStatus::Running.as_str()],
    )?;
    if abandoned > 0 {
        tracing::warn!(abandoned, "Marked abandoned runs as failed");
    }

    tx.commit()?;
    Ok(())
}
