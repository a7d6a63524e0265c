use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use url::Url;

use crate::error::{AppError, Result};

/// An article as handed over by a feed adapter. Fields are whatever the feed
/// happened to carry; nothing here has been checked yet.
#[derive(Debug, Clone, Default)]
pub struct RawCandidate {
    pub url: String,
    pub title: Option<String>,
    pub publication_date: Option<DateTime<Utc>>,
    pub source: String,
    pub full_text: Option<String>,
}

/// A validated candidate. Every field the classifier relies on is present.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateArticle {
    pub url: String,
    pub title: String,
    pub publication_date: DateTime<Utc>,
    pub source: String,
    pub full_text: String,
}

impl CandidateArticle {
    pub fn from_raw(raw: RawCandidate) -> Result<Self> {
        let url = raw.url.trim().to_string();
        if url.is_empty() {
            return Err(AppError::validation(url, "missing url"));
        }

        let parsed = Url::parse(&url).map_err(|e| AppError::validation(&url, e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(AppError::validation(&url, "url must be absolute http(s)"));
        }

        let title = raw
            .title
            .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::validation(&url, "missing title"))?;

        let source = raw.source.trim().to_string();
        if source.is_empty() {
            return Err(AppError::validation(&url, "missing source"));
        }

        let publication_date = raw
            .publication_date
            .ok_or_else(|| AppError::validation(&url, "missing publication date"))?;

        Ok(Self {
            url,
            title,
            publication_date,
            source,
            full_text: raw.full_text.map(|t| t.trim().to_string()).unwrap_or_default(),
        })
    }
}

/// A fingerprinted article ready to be written to the archive.
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub url: String,
    pub title: String,
    pub normalized_title: String,
    pub publication_date: DateTime<Utc>,
    pub source: String,
    pub full_text: String,
    pub content_hash: String,
    pub token_set: BTreeSet<String>,
}

/// An archived article.
#[derive(Debug, Clone, Serialize)]
pub struct Article {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub normalized_title: String,
    pub publication_date: DateTime<Utc>,
    pub source: String,
    pub full_text: String,
    pub text_length: i64,
    pub content_hash: String,
    #[serde(skip)]
    pub token_set: BTreeSet<String>,
    pub duplicate_of: Option<i64>,
    pub similarity: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl Article {
    pub fn is_duplicate(&self) -> bool {
        self.duplicate_of.is_some()
    }

    /// The id a new duplicate must link to: this row, or the row it already
    /// duplicates.
    pub fn canonical_id(&self) -> i64 {
        self.duplicate_of.unwrap_or(self.id)
    }
}

/// Query surface for exporters and reports.
#[derive(Debug, Clone, Default)]
pub struct ArticleFilter {
    pub source: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub include_duplicates: bool,
}
