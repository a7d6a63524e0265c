//! Collection runs: feed polling, per-article ingestion and run bookkeeping.
//!
//! Each candidate moves through `Fetched → Fingerprinted → Classified →
//! Committed | Rejected`. Cheap rejections (unparseable, too old, URL
//! already archived) happen before any network work. Content extraction runs
//! concurrently and is rate limited. Lookup, classification and the write
//! for one article then run as a single immediate transaction, one article
//! at a time.

use std::collections::HashSet;
use std::future::Future;
use std::time::{Duration, Instant};

use chrono::{Datelike, Utc};
use futures::stream::{self, StreamExt};

use crate::config::{Config, DedupConfig};
use crate::db::{DateWindow, Repository};
use crate::dedup::{fingerprint, Classifier, Decision, MatchKind, Matches, SimilarityScope};
use crate::error::{AppError, Result};
use crate::feed::FeedFetcher;
use crate::models::{CandidateArticle, NewArticle, RawCandidate, RunStats, RunStatus};
use crate::services::{ContentFetcher, FetchPolicy};

/// What happened to a candidate that reached the commit stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Committed { id: i64, decision: Decision },
    Rejected(Rejection),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    /// The URL is already archived; `canonical_id` is the article it belongs to.
    AlreadyArchived { canonical_id: i64 },
    /// The URL already appeared earlier in the same batch.
    RepeatedInBatch,
    TooOld { year: i32 },
}

pub struct Coordinator {
    config: Config,
    repository: Repository,
    feeds: FeedFetcher,
    content: ContentFetcher,
    classifier: Classifier,
}

impl Coordinator {
    pub fn new(config: &Config, repository: Repository) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
            repository,
            feeds: FeedFetcher::new(&config.extraction)?,
            content: ContentFetcher::new(&config.extraction)?,
            classifier: Classifier::from_config(&config.dedup),
        })
    }

    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    /// One complete collection pass. Fails up front with `StoreLocked`, without
    /// touching the archive, when another run holds the lock. A lock this run
    /// acquired is always released.
    ///
    /// The pass stops as soon as `shutdown` completes. An interrupted run is
    /// recorded as failed with the counters it had reached, and returns
    /// `Interrupted`.
    pub async fn run_until(&self, shutdown: impl Future<Output = ()>) -> Result<RunStats> {
        let holder = format!("pid {} at {}", std::process::id(), Utc::now().to_rfc3339());
        let stale_after = chrono::Duration::minutes(self.config.database.lock_stale_after_minutes);
        self.repository.acquire_lock(&holder, stale_after).await?;

        let started = Instant::now();
        let result = self.run_locked(shutdown).await;

        if let Err(e) = self.repository.release_lock(&holder).await {
            tracing::error!(error = %e, "Failed to release run lock");
        }

        let stats = result?;
        self.log_results(&stats, started.elapsed()).await;
        Ok(stats)
    }

    async fn run_locked(&self, shutdown: impl Future<Output = ()>) -> Result<RunStats> {
        let run_id = self.repository.begin_run().await?;
        tracing::info!(run_id, "Collection started");

        let mut stats = RunStats::default();
        let status = tokio::select! {
            biased;
            _ = shutdown => None,
            status = self.collect(&mut stats) => Some(status),
        };

        let recorded = status.unwrap_or(RunStatus::Failed);
        // The counters are still reported when the run record cannot be closed.
        if let Err(e) = self.repository.finish_run(run_id, recorded, stats).await {
            tracing::error!(run_id, error = %e, "Failed to record run outcome");
        }

        match status {
            Some(_) => Ok(stats),
            None => {
                tracing::warn!(run_id, committed = stats.committed(), "Collection interrupted");
                Err(AppError::Interrupted)
            }
        }
    }

    /// Poll every source and ingest what it returned. The run counts as
    /// failed when no source could be reached.
    async fn collect(&self, stats: &mut RunStats) -> RunStatus {
        let collected = self.feeds.fetch_all(&self.config.collection, Utc::now()).await;
        tracing::info!(
            candidates = collected.candidates.len(),
            failed_sources = collected.failed_sources.len(),
            "Sources polled"
        );

        let status = if collected.all_sources_failed() {
            tracing::error!(sources = ?collected.failed_sources, "No source could be reached");
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };

        self.ingest_into(collected.candidates, stats).await;
        status
    }

    #[cfg(test)]
    pub async fn ingest(&self, raw: Vec<RawCandidate>) -> RunStats {
        let mut stats = RunStats::default();
        self.ingest_into(raw, &mut stats).await;
        stats
    }

    /// Ingest a batch of candidates into `stats`. Individual failures are
    /// counted, never propagated. Candidates whose `full_text` is `None` are
    /// extracted first.
    pub async fn ingest_into(&self, raw: Vec<RawCandidate>, stats: &mut RunStats) {
        stats.fetched += raw.len() as u32;

        let admitted = self.admit(raw, stats).await;
        let extracted = self.extract_all(admitted).await;

        for candidate in extracted {
            let url = candidate.url.clone();
            let empty_text = candidate.full_text.is_empty();
            match self.commit(candidate).await {
                Ok(outcome) => record(stats, &url, &outcome, empty_text),
                Err(e @ AppError::Integrity { .. }) => {
                    stats.failed += 1;
                    tracing::error!(url = %url, error = %e, "Integrity violation, article not committed");
                }
                Err(e) => {
                    stats.failed += 1;
                    tracing::error!(url = %url, error = %e, "Failed to commit article");
                }
            }
        }
    }

    /// Validate, order by feed priority and drop everything that can be
    /// rejected without fetching: too old, already archived, repeated in
    /// this batch.
    async fn admit(
        &self,
        raw: Vec<RawCandidate>,
        stats: &mut RunStats,
    ) -> Vec<(CandidateArticle, Option<String>)> {
        let mut valid = Vec::with_capacity(raw.len());
        for mut candidate in raw {
            let text = candidate.full_text.take();
            match CandidateArticle::from_raw(candidate) {
                Ok(c) => valid.push((c, text)),
                Err(e) => {
                    stats.failed += 1;
                    tracing::warn!(error = %e, "Rejected invalid candidate");
                }
            }
        }

        let feeds = &self.config.collection.feeds;
        valid.sort_by_key(|(c, _)| {
            feeds
                .iter()
                .position(|f| f.name == c.source)
                .unwrap_or(feeds.len())
        });

        let mut seen = HashSet::new();
        let mut admitted = Vec::with_capacity(valid.len());
        for (candidate, text) in valid {
            if let Some(rejection) = self.precheck(&candidate, &mut seen).await {
                match rejection {
                    Ok(Rejection::TooOld { .. }) => stats.skipped_old += 1,
                    Ok(Rejection::AlreadyArchived { .. } | Rejection::RepeatedInBatch) => {
                        stats.skipped_existing += 1
                    }
                    Err(e) => {
                        stats.failed += 1;
                        tracing::error!(url = %candidate.url, error = %e, "URL lookup failed");
                    }
                }
                continue;
            }
            admitted.push((candidate, text));
        }
        admitted
    }

    async fn precheck(
        &self,
        candidate: &CandidateArticle,
        seen: &mut HashSet<String>,
    ) -> Option<Result<Rejection>> {
        let year = candidate.publication_date.year();
        if year < self.config.collection.min_year {
            tracing::debug!(url = %candidate.url, year, "Skipping article older than min_year");
            return Some(Ok(Rejection::TooOld { year }));
        }

        if !seen.insert(candidate.url.clone()) {
            tracing::debug!(url = %candidate.url, "Skipping URL repeated in this batch");
            return Some(Ok(Rejection::RepeatedInBatch));
        }

        match self.repository.find_by_url(&candidate.url).await {
            Ok(Some(existing)) => {
                tracing::debug!(url = %candidate.url, id = existing.id, "Skipping archived URL");
                Some(Ok(Rejection::AlreadyArchived {
                    canonical_id: existing.canonical_id(),
                }))
            }
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }

    /// Fill in missing article text. Requests run concurrently up to
    /// `max_concurrent`, spaced by the fetcher's rate limiter; the output keeps
    /// input order so commit order stays deterministic. A failed extraction
    /// yields empty text, never an error.
    async fn extract_all(
        &self,
        admitted: Vec<(CandidateArticle, Option<String>)>,
    ) -> Vec<CandidateArticle> {
        let total = admitted.len();
        stream::iter(admitted.into_iter().enumerate())
            .map(|(i, (mut candidate, text))| async move {
                candidate.full_text = match text {
                    Some(text) => text.trim().to_string(),
                    None => {
                        tracing::info!("[{}/{}] Extracting: {}", i + 1, total, candidate.url);
                        let feed = self
                            .config
                            .collection
                            .feeds
                            .iter()
                            .find(|f| f.name == candidate.source);
                        let policy = FetchPolicy::for_feed(&self.config.extraction, feed);
                        match self.content.fetch_full_content(&candidate.url, policy).await {
                            Ok(text) => text,
                            Err(e) => {
                                tracing::warn!(error = %e, "Extraction failed, keeping feed metadata only");
                                String::new()
                            }
                        }
                    }
                };
                candidate
            })
            .buffered(self.config.extraction.max_concurrent)
            .collect()
            .await
    }

    /// Fingerprint, classify and commit one candidate atomically.
    pub async fn commit(&self, candidate: CandidateArticle) -> Result<Outcome> {
        let year = candidate.publication_date.year();
        if year < self.config.collection.min_year {
            return Ok(Outcome::Rejected(Rejection::TooOld { year }));
        }

        let dedup = &self.config.dedup;
        let fp = fingerprint(&candidate, dedup.min_content_length);
        let classifier = self.classifier;
        let window = DateWindow::around(candidate.publication_date, dedup.candidate_window_days);
        let scope = similarity_source(dedup, &candidate);
        let limit = dedup.candidate_limit;

        self.repository
            .transaction(move |archive| {
                let by_url = archive.find_by_url(&candidate.url)?;
                let matches = if by_url.is_some() {
                    Matches {
                        by_url,
                        ..Default::default()
                    }
                } else {
                    Matches {
                        by_url,
                        by_hash: archive.find_by_content_hash(&fp.content_hash)?,
                        by_title: archive.find_by_normalized_title(&fp.normalized_title)?,
                        window: archive.candidates_for_similarity(scope.as_deref(), window, limit)?,
                    }
                };

                let decision = classifier.classify(&candidate, &fp, &matches);
                tracing::debug!(url = %candidate.url, original = ?decision.original_id(), "Classified");

                let article = NewArticle {
                    url: candidate.url,
                    title: candidate.title,
                    normalized_title: fp.normalized_title,
                    publication_date: candidate.publication_date,
                    source: candidate.source,
                    full_text: candidate.full_text,
                    content_hash: fp.content_hash,
                    token_set: fp.token_set,
                };

                let id = match &decision {
                    Decision::New => archive.insert_new(&article)?,
                    Decision::ExactDuplicate {
                        original_id,
                        matched_by: MatchKind::Url,
                    } => {
                        return Ok(Outcome::Rejected(Rejection::AlreadyArchived {
                            canonical_id: *original_id,
                        }));
                    }
                    Decision::ExactDuplicate { original_id, .. } => {
                        archive.insert_duplicate(&article, *original_id, None)?
                    }
                    Decision::NearDuplicate { original_id, score } => {
                        archive.insert_duplicate(&article, *original_id, Some(*score))?
                    }
                };

                Ok(Outcome::Committed { id, decision })
            })
            .await
    }

    async fn log_results(&self, stats: &RunStats, duration: Duration) {
        tracing::info!(
            duration_secs = %format!("{:.1}", duration.as_secs_f64()),
            fetched = stats.fetched,
            committed = stats.committed(),
            new = stats.new,
            duplicates = stats.duplicates,
            near_duplicates = stats.near_duplicates,
            skipped_existing = stats.skipped_existing,
            skipped_old = stats.skipped_old,
            failed = stats.failed,
            extraction_failed = stats.extraction_failed,
            "Collection complete"
        );

        match self.repository.stats().await {
            Ok(archive) => {
                tracing::info!(
                    canonical = archive.canonical,
                    duplicates = archive.duplicates,
                    earliest = ?archive.earliest,
                    latest = ?archive.latest,
                    avg_length = %format!("{:.0}", archive.avg_length),
                    "Archive statistics"
                );
                for source in &archive.by_source {
                    tracing::info!(source = %source.source, count = source.count, "By source");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Could not read archive statistics"),
        }
    }
}

fn similarity_source(dedup: &DedupConfig, candidate: &CandidateArticle) -> Option<String> {
    match dedup.similarity_scope {
        SimilarityScope::SameSource => Some(candidate.source.clone()),
        SimilarityScope::CrossSource => None,
    }
}

fn record(stats: &mut RunStats, url: &str, outcome: &Outcome, empty_text: bool) {
    if empty_text && matches!(outcome, Outcome::Committed { .. }) {
        stats.extraction_failed += 1;
    }

    match outcome {
        Outcome::Committed { id, decision: Decision::New } => {
            stats.new += 1;
            tracing::info!(id, url, "New article saved");
        }
        Outcome::Committed {
            id,
            decision: Decision::ExactDuplicate { original_id, matched_by },
        } => {
            stats.duplicates += 1;
            tracing::info!(id, url, original_id, ?matched_by, "Duplicate detected");
        }
        Outcome::Committed {
            id,
            decision: Decision::NearDuplicate { original_id, score },
        } => {
            stats.near_duplicates += 1;
            tracing::info!(id, url, original_id, score, "Near-duplicate detected");
        }
        Outcome::Rejected(Rejection::AlreadyArchived { .. } | Rejection::RepeatedInBatch) => {
            stats.skipped_existing += 1
        }
        Outcome::Rejected(Rejection::TooOld { .. }) => stats.skipped_old += 1,
    }
}
