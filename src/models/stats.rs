use chrono::{DateTime, Utc};
use serde::Serialize;

/// Read-only aggregate over the archive.
///
/// `avg_length`, `total_chars`, the date range and `by_source` are computed
/// over canonical articles only, so syndicated copies do not skew them.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ArchiveStats {
    pub total: i64,
    pub canonical: i64,
    pub duplicates: i64,
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
    pub avg_length: f64,
    pub total_chars: i64,
    pub by_source: Vec<SourceStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceStats {
    pub source: String,
    pub count: i64,
    pub avg_length: f64,
}
