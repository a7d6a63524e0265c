use std::path::{Path, PathBuf};

use chrono::Local;
use serde::Serialize;

use crate::error::Result;
use crate::models::{ArchiveStats, Article, RunRecord};

use super::report::render_statistics;

/// Writes archive snapshots into the export directory. Every file name carries
/// a local timestamp so repeated exports never overwrite each other.
pub struct CsvExporter {
    dir: PathBuf,
}

#[derive(Serialize)]
struct ArticleRow<'a> {
    id: i64,
    url: &'a str,
    title: &'a str,
    source: &'a str,
    publication_date: String,
    text_length: i64,
    full_text: &'a str,
    is_duplicate: bool,
    duplicate_of: Option<i64>,
    created_at: String,
}

#[derive(Serialize)]
struct SummaryRow<'a> {
    id: i64,
    url: &'a str,
    title: &'a str,
    source: &'a str,
    publication_date: String,
    text_length: i64,
    is_duplicate: bool,
    duplicate_of: Option<i64>,
    created_at: String,
}

impl<'a> From<&'a Article> for ArticleRow<'a> {
    fn from(a: &'a Article) -> Self {
        Self {
            id: a.id,
            url: &a.url,
            title: &a.title,
            source: &a.source,
            publication_date: a.publication_date.to_rfc3339(),
            text_length: a.text_length,
            full_text: &a.full_text,
            is_duplicate: a.is_duplicate(),
            duplicate_of: a.duplicate_of,
            created_at: a.created_at.to_rfc3339(),
        }
    }
}

impl<'a> From<&'a Article> for SummaryRow<'a> {
    fn from(a: &'a Article) -> Self {
        Self {
            id: a.id,
            url: &a.url,
            title: &a.title,
            source: &a.source,
            publication_date: a.publication_date.to_rfc3339(),
            text_length: a.text_length,
            is_duplicate: a.is_duplicate(),
            duplicate_of: a.duplicate_of,
            created_at: a.created_at.to_rfc3339(),
        }
    }
}

impl CsvExporter {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Full export including article text. Returns `None` and writes nothing
    /// when there are no articles.
    pub fn export_articles(
        &self,
        articles: &[Article],
        source: Option<&str>,
    ) -> Result<Option<PathBuf>> {
        if articles.is_empty() {
            tracing::warn!("No articles to export");
            return Ok(None);
        }

        let path = self.dir.join(file_name(source, "articles", "csv"));
        write_rows(&path, articles.iter().map(ArticleRow::from))?;

        tracing::info!(count = articles.len(), path = %path.display(), "Exported articles");
        Ok(Some(path))
    }

    /// Same rows as [`export_articles`](Self::export_articles) without
    /// `full_text`.
    pub fn export_summary(
        &self,
        articles: &[Article],
        source: Option<&str>,
    ) -> Result<Option<PathBuf>> {
        if articles.is_empty() {
            tracing::warn!("No articles to export");
            return Ok(None);
        }

        let path = self.dir.join(file_name(source, "articles_summary", "csv"));
        write_rows(&path, articles.iter().map(SummaryRow::from))?;

        tracing::info!(count = articles.len(), path = %path.display(), "Exported article summary");
        Ok(Some(path))
    }

    pub fn export_statistics(
        &self,
        stats: &ArchiveStats,
        last_run: Option<&RunRecord>,
    ) -> Result<PathBuf> {
        let path = self.dir.join(file_name(None, "statistics", "txt"));
        std::fs::write(&path, render_statistics(stats, last_run))?;

        tracing::info!(path = %path.display(), "Exported statistics");
        Ok(path)
    }
}

fn write_rows<T: Serialize>(path: &Path, rows: impl Iterator<Item = T>) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// `[source_]stem_YYYYmmdd_HHMMSS.ext`, with the source lowercased and spaces
/// replaced so "Hollywood Reporter" becomes `hollywood_reporter`.
fn file_name(source: Option<&str>, stem: &str, ext: &str) -> String {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    match source {
        Some(source) => {
            let prefix: String = source
                .trim()
                .to_lowercase()
                .chars()
                .map(|c| if c.is_alphanumeric() { c } else { '_' })
                .collect();
            format!("{prefix}_{stem}_{timestamp}.{ext}")
        }
        None => format!("{stem}_{timestamp}.{ext}"),
    }
}
