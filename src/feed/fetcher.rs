use std::time::Duration;

use chrono::{DateTime, Datelike, Utc};
use feed_rs::parser;
use reqwest::Client;
use url::Url;

use crate::config::{ArchiveIndexConfig, CollectionConfig, ExtractionConfig, FeedConfig};
use crate::error::Result;
use crate::models::RawCandidate;

use super::archive::parse_archive_index;

pub struct FeedFetcher {
    client: Client,
}

/// Everything one polling pass produced.
#[derive(Debug, Default)]
pub struct Collected {
    /// Feed entries in configured feed order, then archive links.
    pub candidates: Vec<RawCandidate>,
    pub sources: usize,
    pub failed_sources: Vec<String>,
}

impl Collected {
    /// True when there was something to poll and none of it answered.
    pub fn all_sources_failed(&self) -> bool {
        self.sources > 0 && self.failed_sources.len() == self.sources
    }
}

impl FeedFetcher {
    pub fn new(config: &ExtractionConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self { client })
    }

    pub async fn fetch_feed(&self, feed: &FeedConfig) -> Result<Vec<RawCandidate>> {
        let response = self.client.get(&feed.url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Failed to fetch feed: HTTP {}", response.status()).into());
        }

        let bytes = response.bytes().await?;
        parse_feed(&bytes, &feed.name)
    }

    /// Fetch the month index built from `archive.url_template` and collect
    /// its article links.
    pub async fn fetch_archive(
        &self,
        archive: &ArchiveIndexConfig,
        year: i32,
        month: u32,
    ) -> Result<Vec<RawCandidate>> {
        let page = Url::parse(&archive.url_for(year, month))
            .map_err(|e| anyhow::anyhow!("Invalid archive URL {}: {}", archive.url_template, e))?;
        let response = self
            .client
            .get(page.clone())
            .timeout(Duration::from_secs(archive.request_timeout_secs))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Failed to fetch archive: HTTP {}", response.status()).into());
        }

        let html = response.text().await?;
        parse_archive_index(&html, &page, year, month, &archive.source)
    }

    /// Poll every feed in configured order, then the archive index of the
    /// month containing `now`, pausing between requests. A source that fails
    /// is logged and contributes nothing.
    pub async fn fetch_all(&self, collection: &CollectionConfig, now: DateTime<Utc>) -> Collected {
        let delay = Duration::from_millis(collection.delay_between_feeds_ms);
        let mut collected = Collected {
            sources: collection.feeds.len() + collection.archives.len(),
            ..Default::default()
        };

        for (i, feed) in collection.feeds.iter().enumerate() {
            if i > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match self.fetch_feed(feed).await {
                Ok(entries) => {
                    tracing::info!(feed = %feed.name, entries = entries.len(), "Fetched feed");
                    collected.candidates.extend(entries);
                }
                Err(e) => {
                    tracing::error!(feed = %feed.name, url = %feed.url, error = %e, "Failed to fetch feed");
                    collected.failed_sources.push(feed.name.clone());
                }
            }
        }

        for archive in &collection.archives {
            if !delay.is_zero() && !collection.feeds.is_empty() {
                tokio::time::sleep(delay).await;
            }

            match self.fetch_archive(archive, now.year(), now.month()).await {
                Ok(links) => {
                    tracing::info!(source = %archive.source, links = links.len(), "Fetched archive index");
                    collected.candidates.extend(links);
                }
                Err(e) => {
                    tracing::error!(source = %archive.source, error = %e, "Failed to fetch archive index");
                    collected.failed_sources.push(format!("{} archive", archive.source));
                }
            }
        }

        collected
    }
}

/// Turn an RSS/Atom document into loose candidates. Nothing is validated here;
/// entries without a link or date are passed on and rejected at ingestion.
pub fn parse_feed(bytes: &[u8], source: &str) -> Result<Vec<RawCandidate>> {
    let feed = parser::parse(bytes)?;

    let candidates = feed
        .entries
        .into_iter()
        .map(|entry| RawCandidate {
            url: entry
                .links
                .first()
                .map(|l| l.href.clone())
                .unwrap_or_default(),
            title: entry.title.map(|t| t.content),
            publication_date: entry.published.or(entry.updated),
            source: source.to_string(),
            full_text: None,
        })
        .collect();

    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Utc};

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Deadline</title>
    <link>https://deadline.com</link>
    <description>Hollywood news</description>
    <item>
      <title>Big Deal Closes</title>
      <link>https://deadline.com/2025/06/big-deal-closes-1235/</link>
      <pubDate>Sun, 01 Jun 2025 14:30:00 +0000</pubDate>
      <description>Teaser text</description>
    </item>
    <item>
      <title>Undated Item</title>
      <link>https://deadline.com/2025/06/undated/</link>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn parses_rss_entries_into_candidates() {
        let candidates = parse_feed(RSS.as_bytes(), "Deadline").unwrap();
        assert_eq!(candidates.len(), 2);

        let first = &candidates[0];
        assert_eq!(first.url, "https://deadline.com/2025/06/big-deal-closes-1235/");
        assert_eq!(first.title.as_deref(), Some("Big Deal Closes"));
        assert_eq!(first.source, "Deadline");
        assert_eq!(
            first.publication_date,
            Some(Utc.with_ymd_and_hms(2025, 6, 1, 14, 30, 0).unwrap())
        );
        assert_eq!(first.publication_date.map(|d| d.year()), Some(2025));
        assert!(first.full_text.is_none());

        assert!(candidates[1].publication_date.is_none());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_feed(b"not a feed", "Deadline").is_err());
    }

    fn offline_collection() -> CollectionConfig {
        CollectionConfig {
            feeds: vec![FeedConfig {
                name: "Offline".to_string(),
                url: "http://127.0.0.1:9/feed".to_string(),
                request_timeout_secs: None,
                retry_attempts: None,
            }],
            delay_between_feeds_ms: 0,
            archives: vec![ArchiveIndexConfig {
                source: "Offline".to_string(),
                url_template: "http://127.0.0.1:9/{year}/{month}/".to_string(),
                request_timeout_secs: 1,
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn failing_sources_contribute_nothing() {
        let fetcher = FeedFetcher::new(&ExtractionConfig::default()).unwrap();
        let collected = fetcher.fetch_all(&offline_collection(), Utc::now()).await;

        assert!(collected.candidates.is_empty());
        assert_eq!(collected.sources, 2);
        assert_eq!(collected.failed_sources, vec!["Offline", "Offline archive"]);
        assert!(collected.all_sources_failed());
    }

    #[test]
    fn nothing_configured_is_not_a_failure() {
        assert!(!Collected::default().all_sources_failed());
    }
}
