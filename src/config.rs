use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::dedup::{HashScope, SimilarityScope, TitlePolicy};
use crate::error::{AppError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub collection: CollectionConfig,

    #[serde(default)]
    pub dedup: DedupConfig,

    #[serde(default)]
    pub extraction: ExtractionConfig,

    #[serde(default)]
    pub export: ExportConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,

    /// A run lock older than this is treated as abandoned by a crashed run.
    #[serde(default = "default_lock_stale_after")]
    pub lock_stale_after_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub name: String,
    pub url: String,

    /// Overrides `extraction.request_timeout_secs` for this source's articles.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,

    /// Overrides `extraction.retry_attempts` for this source's articles.
    #[serde(default)]
    pub retry_attempts: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Feeds in priority order: earlier feeds are committed first, so their
    /// articles become the canonical copy of syndicated stories.
    #[serde(default = "default_feeds")]
    pub feeds: Vec<FeedConfig>,

    #[serde(default = "default_min_year")]
    pub min_year: i32,

    #[serde(default = "default_delay_between_feeds")]
    pub delay_between_feeds_ms: u64,

    /// Monthly archive pages scraped for article links in addition to the
    /// feeds. An empty list disables archive collection.
    #[serde(default = "default_archives")]
    pub archives: Vec<ArchiveIndexConfig>,
}

/// A site's month index, e.g. `https://deadline.com/{year}/{month}/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveIndexConfig {
    /// Feed name the links are attributed to.
    pub source: String,

    /// `{year}` and `{month}` (zero-padded) are filled in with the current date.
    pub url_template: String,

    #[serde(default = "default_archive_timeout")]
    pub request_timeout_secs: u64,
}

impl ArchiveIndexConfig {
    pub fn url_for(&self, year: i32, month: u32) -> String {
        self.url_template
            .replace("{year}", &year.to_string())
            .replace("{month}", &format!("{month:02}"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    #[serde(default)]
    pub hash_scope: HashScope,

    #[serde(default)]
    pub similarity_scope: SimilarityScope,

    #[serde(default)]
    pub title_policy: TitlePolicy,

    /// Half-width, in days, of the publication-date window compared by Jaccard.
    #[serde(default = "default_candidate_window_days")]
    pub candidate_window_days: i64,

    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,

    /// Below this many normalized characters the body is not trusted for
    /// hashing and the title+url fallback is used instead.
    #[serde(default = "default_min_content_length")]
    pub min_content_length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_delay_between_requests")]
    pub delay_between_requests_ms: u64,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Extracted text shorter than this is discarded as navigation noise.
    #[serde(default = "default_min_content_length")]
    pub min_text_length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_export_dir")]
    pub directory: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// When set, logs are also written to `collector.log` in this directory.
    #[serde(default)]
    pub directory: Option<String>,
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("marquee-collector")
}

fn default_db_path() -> String {
    let data_dir = data_dir();
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("articles.db").to_string_lossy().to_string()
}

fn default_lock_stale_after() -> i64 {
    120
}

fn default_feeds() -> Vec<FeedConfig> {
    [
        ("Deadline", "https://deadline.com/feed/"),
        ("Variety", "https://variety.com/feed/"),
        ("Hollywood Reporter", "https://www.hollywoodreporter.com/feed/"),
    ]
    .into_iter()
    .map(|(name, url)| FeedConfig {
        name: name.to_string(),
        url: url.to_string(),
        request_timeout_secs: None,
        retry_attempts: None,
    })
    .collect()
}

fn default_archives() -> Vec<ArchiveIndexConfig> {
    vec![ArchiveIndexConfig {
        source: "Deadline".to_string(),
        url_template: "https://deadline.com/{year}/{month}/".to_string(),
        request_timeout_secs: default_archive_timeout(),
    }]
}

fn default_archive_timeout() -> u64 {
    15
}

fn default_min_year() -> i32 {
    2025
}

fn default_delay_between_feeds() -> u64 {
    2000
}

fn default_similarity_threshold() -> f64 {
    0.7
}

fn default_candidate_window_days() -> i64 {
    7
}

fn default_candidate_limit() -> usize {
    500
}

fn default_min_content_length() -> usize {
    200
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_backoff_base() -> u64 {
    1000
}

fn default_delay_between_requests() -> u64 {
    1000
}

fn default_max_concurrent() -> usize {
    4
}

fn default_export_dir() -> String {
    "exports".to_string()
}

fn default_interval_minutes() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            lock_stale_after_minutes: default_lock_stale_after(),
        }
    }
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            feeds: default_feeds(),
            min_year: default_min_year(),
            delay_between_feeds_ms: default_delay_between_feeds(),
            archives: default_archives(),
        }
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            hash_scope: HashScope::default(),
            similarity_scope: SimilarityScope::default(),
            title_policy: TitlePolicy::default(),
            candidate_window_days: default_candidate_window_days(),
            candidate_limit: default_candidate_limit(),
            min_content_length: default_min_content_length(),
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            request_timeout_secs: default_request_timeout(),
            retry_attempts: default_retry_attempts(),
            backoff_base_ms: default_backoff_base(),
            delay_between_requests_ms: default_delay_between_requests(),
            max_concurrent: default_max_concurrent(),
            min_text_length: default_min_content_length(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            directory: default_export_dir(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
        }
    }
}

impl Config {
    /// Load the config at `path` (or the default location), writing a default
    /// file when none exists yet.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.map(Path::to_path_buf).unwrap_or_else(Self::config_path);

        let config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            let config = Config::default();
            config.save(&config_path)?;
            config
        };

        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let threshold = self.dedup.similarity_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(AppError::Config(format!(
                "dedup.similarity_threshold must be within 0..=1, got {threshold}"
            )));
        }
        if self.dedup.candidate_window_days < 0 {
            return Err(AppError::Config(
                "dedup.candidate_window_days must not be negative".to_string(),
            ));
        }
        if self.extraction.max_concurrent == 0 {
            return Err(AppError::Config(
                "extraction.max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.collection.feeds.is_empty() {
            return Err(AppError::Config("no feeds configured".to_string()));
        }
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("marquee-collector")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let config: Config = toml::from_str(
            r#"
            [dedup]
            similarity_threshold = 0.8
            hash_scope = "same_source"

            [[collection.feeds]]
            name = "Deadline"
            url = "https://deadline.com/feed/"
            retry_attempts = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.dedup.similarity_threshold, 0.8);
        assert_eq!(config.dedup.hash_scope, HashScope::SameSource);
        assert_eq!(config.dedup.title_policy, TitlePolicy::Corroborated);
        assert_eq!(config.dedup.candidate_window_days, 7);
        assert_eq!(config.collection.min_year, 2025);
        assert_eq!(config.collection.feeds.len(), 1);
        assert_eq!(config.collection.feeds[0].retry_attempts, Some(5));
        assert_eq!(config.collection.feeds[0].request_timeout_secs, None);
        assert_eq!(config.extraction.retry_attempts, 3);
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let mut config = Config::default();
        config.dedup.similarity_threshold = 1.5;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn load_writes_default_file_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load(Some(&path)).unwrap();
        assert!(path.exists());
        assert_eq!(config.collection.feeds.len(), 3);

        let reloaded = Config::load(Some(&path)).unwrap();
        assert_eq!(reloaded.dedup.candidate_limit, config.dedup.candidate_limit);
    }

    #[test]
    fn archive_indexes_default_to_deadline_and_can_be_disabled() {
        let config = Config::default();
        assert_eq!(config.collection.archives.len(), 1);
        assert_eq!(
            config.collection.archives[0].url_for(2025, 6),
            "https://deadline.com/2025/06/"
        );
        assert!(config.logging.directory.is_none());

        let disabled: Config = toml::from_str(
            r#"
            [collection]
            archives = []

            [logging]
            directory = "logs"
            "#,
        )
        .unwrap();
        assert!(disabled.collection.archives.is_empty());
        assert_eq!(disabled.logging.directory.as_deref(), Some("logs"));
    }
}
