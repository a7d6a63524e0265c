use chrono::{DateTime, Utc};
use serde::Serialize;

/// Counters for one collection run, returned by the coordinator and persisted
/// to `collection_runs` when the run ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub fetched: u32,
    pub new: u32,
    pub duplicates: u32,
    pub near_duplicates: u32,
    /// URL already archived (or seen earlier in the same batch).
    pub skipped_existing: u32,
    /// Published before `min_year`.
    pub skipped_old: u32,
    /// Validation or integrity failures; these candidates were not committed.
    pub failed: u32,
    /// Committed with empty text because extraction gave up.
    pub extraction_failed: u32,
}

impl RunStats {
    pub fn skipped(&self) -> u32 {
        self.skipped_existing + self.skipped_old
    }

    pub fn committed(&self) -> u32 {
        self.new + self.duplicates + self.near_duplicates
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "completed" => RunStatus::Completed,
            "running" => RunStatus::Running,
            _ => RunStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub stats: RunStats,
}
