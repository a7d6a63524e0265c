//! Decides whether a candidate is new, an exact duplicate or a near duplicate
//! of something already archived.
//!
//! Checks run cheapest and most certain first: URL, content hash, normalized
//! title, then Jaccard overlap of token sets over a bounded candidate window.
//! Every duplicate decision names a canonical article, never another
//! duplicate.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::config::DedupConfig;
use crate::models::{Article, CandidateArticle};

use super::fingerprint::Fingerprint;

/// Which archived articles a content-hash match may come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashScope {
    /// Only the candidate's own feed. Independent outlets that happen to run
    /// the same wire copy are kept as separate stories.
    SameSource,
    /// Any feed: syndicated wire copy collapses onto the first outlet seen.
    #[default]
    CrossSource,
}

/// Which archived articles enter the Jaccard candidate window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityScope {
    SameSource,
    #[default]
    CrossSource,
}

/// How an identical normalized title is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TitlePolicy {
    /// Identical title alone is an exact duplicate.
    Exact,
    /// Identical title only puts the article in the similarity pool, even when
    /// it falls outside the date window; the token overlap decides.
    #[default]
    Corroborated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatchKind {
    Url,
    ContentHash,
    Title,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Decision {
    New,
    ExactDuplicate { original_id: i64, matched_by: MatchKind },
    NearDuplicate { original_id: i64, score: f64 },
}

impl Decision {
    pub fn original_id(&self) -> Option<i64> {
        match self {
            Decision::New => None,
            Decision::ExactDuplicate { original_id, .. }
            | Decision::NearDuplicate { original_id, .. } => Some(*original_id),
        }
    }
}

/// Archived articles that share a signal with the candidate, as gathered
/// from the store's indexed lookups.
#[derive(Debug, Clone, Default)]
pub struct Matches {
    pub by_url: Option<Article>,
    /// Creation order, earliest first.
    pub by_hash: Vec<Article>,
    /// Creation order, earliest first.
    pub by_title: Vec<Article>,
    /// Bounded window for Jaccard comparison.
    pub window: Vec<Article>,
}

#[derive(Debug, Clone, Copy)]
pub struct Classifier {
    pub similarity_threshold: f64,
    pub hash_scope: HashScope,
    pub title_policy: TitlePolicy,
}

impl Classifier {
    pub fn from_config(config: &DedupConfig) -> Self {
        Self {
            similarity_threshold: config.similarity_threshold,
            hash_scope: config.hash_scope,
            title_policy: config.title_policy,
        }
    }

    pub fn classify(
        &self,
        candidate: &CandidateArticle,
        fingerprint: &Fingerprint,
        matches: &Matches,
    ) -> Decision {
        if let Some(existing) = &matches.by_url {
            return Decision::ExactDuplicate {
                original_id: existing.canonical_id(),
                matched_by: MatchKind::Url,
            };
        }

        let hash_match = matches
            .by_hash
            .iter()
            .filter(|a| a.content_hash == fingerprint.content_hash)
            .find(|a| match self.hash_scope {
                HashScope::CrossSource => true,
                HashScope::SameSource => a.source == candidate.source,
            });
        if let Some(existing) = hash_match {
            return Decision::ExactDuplicate {
                original_id: existing.canonical_id(),
                matched_by: MatchKind::ContentHash,
            };
        }

        let title_matches = matches.by_title.iter().filter(|a| {
            !fingerprint.normalized_title.is_empty()
                && a.normalized_title == fingerprint.normalized_title
        });

        // Under a same-source hash scope, another outlet's copy of identical
        // text is a separate story and must not come back as a 1.0 overlap.
        let comparable = |a: &&Article| match self.hash_scope {
            HashScope::CrossSource => true,
            HashScope::SameSource => {
                a.source == candidate.source || a.content_hash != fingerprint.content_hash
            }
        };

        let mut pool: BTreeMap<i64, &Article> = BTreeMap::new();
        match self.title_policy {
            TitlePolicy::Exact => {
                if let Some(existing) = title_matches.min_by_key(|a| a.id) {
                    return Decision::ExactDuplicate {
                        original_id: existing.canonical_id(),
                        matched_by: MatchKind::Title,
                    };
                }
            }
            TitlePolicy::Corroborated => {
                pool.extend(title_matches.filter(comparable).map(|a| (a.id, a)))
            }
        }
        pool.extend(matches.window.iter().filter(comparable).map(|a| (a.id, a)));

        // Ascending id is creation order, so a strict comparison keeps the
        // earliest article on exact ties.
        let mut best: Option<(&Article, f64)> = None;
        for article in pool.values() {
            let score = jaccard(&fingerprint.token_set, &article.token_set);
            if best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((article, score));
            }
        }

        match best {
            Some((article, score)) if score > 0.0 && score >= self.similarity_threshold => {
                Decision::NearDuplicate {
                    original_id: article.canonical_id(),
                    score,
                }
            }
            _ => Decision::New,
        }
    }
}

/// |A ∩ B| / |A ∪ B|. An empty set is similar to nothing, not even another
/// empty set.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::fingerprint::fingerprint;
    use chrono::{TimeZone, Utc};

    fn tokens(words: &[&str]) -> BTreeSet<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    fn numbered(prefix: &str, range: std::ops::Range<usize>) -> Vec<String> {
        range.map(|i| format!("{prefix}{i:03}")).collect()
    }

    fn candidate(url: &str, title: &str, source: &str, text: &str) -> CandidateArticle {
        CandidateArticle {
            url: url.to_string(),
            title: title.to_string(),
            publication_date: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
            source: source.to_string(),
            full_text: text.to_string(),
        }
    }

    fn archived(id: i64, candidate: &CandidateArticle, duplicate_of: Option<i64>) -> Article {
        let fp = fingerprint(candidate, 200);
        Article {
            id,
            url: candidate.url.clone(),
            title: candidate.title.clone(),
            normalized_title: fp.normalized_title,
            publication_date: candidate.publication_date,
            source: candidate.source.clone(),
            full_text: candidate.full_text.clone(),
            text_length: candidate.full_text.len() as i64,
            content_hash: fp.content_hash,
            token_set: fp.token_set,
            duplicate_of,
            similarity: None,
            created_at: Utc::now(),
        }
    }

    fn classifier() -> Classifier {
        Classifier {
            similarity_threshold: 0.7,
            hash_scope: HashScope::CrossSource,
            title_policy: TitlePolicy::Corroborated,
        }
    }

    #[test]
    fn jaccard_is_symmetric() {
        let a = tokens(&["studio", "deal", "closes", "friday"]);
        let b = tokens(&["studio", "deal", "collapses"]);
        assert_eq!(jaccard(&a, &b), jaccard(&b, &a));
        assert!((jaccard(&a, &b) - 2.0 / 5.0).abs() < 1e-12);
    }

    #[test]
    fn self_similarity_of_non_empty_set_is_one() {
        let a = tokens(&["netflix", "renews", "series"]);
        assert_eq!(jaccard(&a, &a), 1.0);
    }

    #[test]
    fn empty_sets_never_match() {
        let empty = BTreeSet::new();
        assert_eq!(jaccard(&empty, &empty), 0.0);
        assert_eq!(jaccard(&empty, &tokens(&["deal"])), 0.0);
    }

    #[test]
    fn no_candidates_is_new() {
        let c = candidate("https://a.com/1", "Deal", "Deadline", "some text here");
        let fp = fingerprint(&c, 200);
        assert_eq!(classifier().classify(&c, &fp, &Matches::default()), Decision::New);
    }

    #[test]
    fn url_match_wins_regardless_of_content() {
        let first = candidate("https://a.com/1", "Deal Closes", "Deadline", "original body");
        let second = candidate("https://a.com/1", "Totally Different", "Variety", "other body");
        let fp = fingerprint(&second, 200);
        let matches = Matches {
            by_url: Some(archived(1, &first, None)),
            ..Default::default()
        };
        assert_eq!(
            classifier().classify(&second, &fp, &matches),
            Decision::ExactDuplicate { original_id: 1, matched_by: MatchKind::Url }
        );
    }

    #[test]
    fn url_match_on_a_duplicate_links_to_its_canonical() {
        let c = candidate("https://b.com/1", "Deal", "Variety", "body");
        let fp = fingerprint(&c, 200);
        let matches = Matches {
            by_url: Some(archived(7, &c, Some(3))),
            ..Default::default()
        };
        assert_eq!(classifier().classify(&c, &fp, &matches).original_id(), Some(3));
    }

    #[test]
    fn identical_hash_different_url_is_exact_duplicate() {
        let body = "The studio confirmed the acquisition late on Thursday evening. ".repeat(10);
        let first = candidate("https://a.com/1", "Studio Buys Rival", "Deadline", &body);
        let second = candidate("https://b.com/9", "Rival Acquired", "Variety", &body);
        let fp = fingerprint(&second, 200);
        let matches = Matches {
            by_hash: vec![archived(1, &first, None)],
            ..Default::default()
        };
        assert_eq!(
            classifier().classify(&second, &fp, &matches),
            Decision::ExactDuplicate { original_id: 1, matched_by: MatchKind::ContentHash }
        );
    }

    #[test]
    fn same_source_hash_scope_ignores_other_outlets() {
        let body = "Wire copy distributed to every outlet at the same moment. ".repeat(10);
        let first = candidate("https://a.com/1", "Wire Story", "Deadline", &body);
        let second = candidate("https://b.com/1", "Wire Story Two", "Variety", &body);
        let fp = fingerprint(&second, 200);
        let matches = Matches {
            by_hash: vec![archived(1, &first, None)],
            ..Default::default()
        };

        let scoped = Classifier { hash_scope: HashScope::SameSource, ..classifier() };
        assert_eq!(scoped.classify(&second, &fp, &matches), Decision::New);
        assert_eq!(
            classifier().classify(&second, &fp, &matches).original_id(),
            Some(1)
        );
    }

    #[test]
    fn same_source_hash_scope_holds_with_a_populated_window() {
        let body = "Wire copy distributed to every outlet at the same moment. ".repeat(10);
        let wire = candidate("https://a.com/1", "Wire Story", "Deadline", &body);
        let own = candidate("https://b.com/0", "Earlier Variety Piece", "Variety", "unrelated casting news");
        let incoming = candidate("https://b.com/1", "Wire Story", "Variety", &body);
        let fp = fingerprint(&incoming, 200);
        let original = archived(1, &wire, None);
        let matches = Matches {
            by_hash: vec![original.clone()],
            by_title: vec![original.clone()],
            window: vec![original, archived(2, &own, None)],
            ..Default::default()
        };

        let scoped = Classifier { hash_scope: HashScope::SameSource, ..classifier() };
        assert_eq!(scoped.classify(&incoming, &fp, &matches), Decision::New);

        // The same outlet re-running its own copy is still caught.
        let rerun = candidate("https://b.com/2", "Wire Story", "Variety", &body);
        let rerun_fp = fingerprint(&rerun, 200);
        let own_copy = archived(3, &incoming, None);
        let matches = Matches {
            by_hash: vec![own_copy.clone()],
            window: vec![own_copy],
            ..Default::default()
        };
        assert_eq!(
            scoped.classify(&rerun, &rerun_fp, &matches),
            Decision::ExactDuplicate { original_id: 3, matched_by: MatchKind::ContentHash }
        );
    }

    #[test]
    fn exact_title_policy_matches_on_title_alone() {
        let first = candidate("https://a.com/1", "Big Deal Closes", "Deadline", "alpha bravo charlie");
        let second = candidate("https://b.com/1", "Big Deal Closes!!", "Variety", "delta echo foxtrot");
        let fp = fingerprint(&second, 200);
        let matches = Matches {
            by_title: vec![archived(1, &first, None)],
            ..Default::default()
        };

        let exact = Classifier { title_policy: TitlePolicy::Exact, ..classifier() };
        assert_eq!(
            exact.classify(&second, &fp, &matches),
            Decision::ExactDuplicate { original_id: 1, matched_by: MatchKind::Title }
        );
        // Corroborated: the bodies share nothing, so the title is not enough.
        assert_eq!(classifier().classify(&second, &fp, &matches), Decision::New);
    }

    #[test]
    fn near_duplicate_with_eighty_percent_overlap() {
        let shared = numbered("shared", 0..80);
        let mut text_a = shared.clone();
        text_a.extend(numbered("alpha", 0..10));
        let mut text_b = shared;
        text_b.extend(numbered("bravo", 0..10));

        let first = candidate("https://a.com/1", "Big Deal Closes", "Deadline", &text_a.join(" "));
        let second = candidate("https://b.com/1", "Big Deal Closes!!", "Variety", &text_b.join(" "));
        let fp = fingerprint(&second, 200);
        let original = archived(1, &first, None);
        let matches = Matches {
            by_title: vec![original.clone()],
            window: vec![original],
            ..Default::default()
        };

        match classifier().classify(&second, &fp, &matches) {
            Decision::NearDuplicate { original_id, score } => {
                assert_eq!(original_id, 1);
                assert!((score - 0.8).abs() < 1e-9, "score was {score}");
            }
            other => panic!("expected near duplicate, got {other:?}"),
        }
    }

    #[test]
    fn below_threshold_is_new() {
        let mut text_a = numbered("shared", 0..50);
        text_a.extend(numbered("alpha", 0..50));
        let mut text_b = numbered("shared", 0..50);
        text_b.extend(numbered("bravo", 0..50));

        let first = candidate("https://a.com/1", "One", "Deadline", &text_a.join(" "));
        let second = candidate("https://b.com/1", "Two", "Variety", &text_b.join(" "));
        let fp = fingerprint(&second, 200);
        let matches = Matches {
            window: vec![archived(1, &first, None)],
            ..Default::default()
        };
        assert_eq!(classifier().classify(&second, &fp, &matches), Decision::New);
    }

    #[test]
    fn ties_go_to_the_earliest_article_and_resolve_to_canonical() {
        let text = numbered("word", 0..40).join(" ");
        let earlier = candidate("https://a.com/1", "One", "Deadline", &text);
        let later = candidate("https://b.com/1", "Two", "Variety", &text);
        let incoming = candidate("https://c.com/1", "Three", "Hollywood Reporter", &format!("{text} extra"));
        let fp = fingerprint(&incoming, 10_000);

        let matches = Matches {
            window: vec![archived(9, &later, None), archived(4, &earlier, Some(2))],
            ..Default::default()
        };
        match classifier().classify(&incoming, &fp, &matches) {
            Decision::NearDuplicate { original_id, .. } => assert_eq!(original_id, 2),
            other => panic!("expected near duplicate, got {other:?}"),
        }
    }

    #[test]
    fn empty_content_on_both_sides_is_not_a_match() {
        let first = candidate("https://a.com/1", "?!", "Deadline", "");
        let second = candidate("https://b.com/1", "...", "Variety", "");
        let fp = fingerprint(&second, 200);
        let matches = Matches {
            window: vec![archived(1, &first, None)],
            ..Default::default()
        };
        assert!(fp.token_set.is_empty());
        assert_eq!(classifier().classify(&second, &fp, &matches), Decision::New);
    }
}
