//! Stable identifiers derived from an article's text.

use std::collections::BTreeSet;

use sha2::{Digest, Sha256};

use crate::models::CandidateArticle;

/// Tokens shorter than this carry almost no signal for overlap scoring.
const MIN_TOKEN_CHARS: usize = 3;

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "are", "was", "were", "from",
    "has", "have", "had", "but", "not", "its", "his", "her", "they", "their",
    "will", "would", "said", "who", "which", "into", "about", "been", "also",
    "after", "than", "you", "all", "our", "she", "him", "out", "one",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub content_hash: String,
    pub normalized_title: String,
    pub token_set: BTreeSet<String>,
}

/// Lowercase, keep only letters, digits and whitespace, collapse whitespace
/// runs and trim.
pub fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;

    for ch in text.chars().flat_map(char::to_lowercase) {
        if ch.is_whitespace() {
            pending_space = !out.is_empty();
        } else if ch.is_alphanumeric() {
            if pending_space {
                out.push(' ');
                pending_space = false;
            }
            out.push(ch);
        }
    }

    out
}

pub fn normalize_title(title: &str) -> String {
    normalize_text(title)
}

/// Split already-normalized text into its distinct, meaningful words.
pub fn tokenize(normalized: &str) -> BTreeSet<String> {
    normalized
        .split_whitespace()
        .filter(|w| w.chars().count() >= MIN_TOKEN_CHARS)
        .filter(|w| !STOP_WORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// Digest of the normalized body, or of `normalized_title + url` when the body
/// is shorter than `min_content_length` characters. The two inputs are tagged
/// differently so a body can never hash to the same value as a fallback.
pub fn content_hash(
    normalized_text: &str,
    normalized_title: &str,
    url: &str,
    min_content_length: usize,
) -> String {
    let mut hasher = Sha256::new();

    if !normalized_text.is_empty() && normalized_text.chars().count() >= min_content_length {
        hasher.update(b"text\0");
        hasher.update(normalized_text.as_bytes());
    } else {
        hasher.update(b"title\0");
        hasher.update(normalized_title.as_bytes());
        hasher.update(b"\0");
        hasher.update(url.as_bytes());
    }

    format!("{:x}", hasher.finalize())
}

pub fn fingerprint(candidate: &CandidateArticle, min_content_length: usize) -> Fingerprint {
    let normalized_title = normalize_title(&candidate.title);
    let normalized_text = normalize_text(&candidate.full_text);

    let content_hash = content_hash(
        &normalized_text,
        &normalized_title,
        &candidate.url,
        min_content_length,
    );

    let token_set = if normalized_text.is_empty() {
        tokenize(&normalized_title)
    } else {
        tokenize(&normalized_text)
    };

    Fingerprint {
        content_hash,
        normalized_title,
        token_set,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn candidate(url: &str, title: &str, text: &str) -> CandidateArticle {
        CandidateArticle {
            url: url.to_string(),
            title: title.to_string(),
            publication_date: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
            source: "Deadline".to_string(),
            full_text: text.to_string(),
        }
    }

    #[test]
    fn title_normalization() {
        assert_eq!(normalize_title("Big Deal Closes!!"), "big deal closes");
        assert_eq!(
            normalize_title("  ‘Dune: Part Two’ —  Tops\tBox Office  "),
            "dune part two tops box office"
        );
        assert_eq!(normalize_title("Café Society"), "café society");
        assert_eq!(normalize_title("?!"), "");
    }

    #[test]
    fn tokens_drop_short_words_and_stop_words() {
        let tokens = tokenize("the studio and an actor sign a new deal for the studio");
        let expected: BTreeSet<String> = ["studio", "actor", "sign", "new", "deal"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(tokens, expected);
    }

    #[test]
    fn hash_ignores_case_punctuation_and_spacing() {
        let body = "Paramount closed the deal on Friday. ".repeat(20);
        let shouty = body.to_uppercase().replace(' ', "   ");

        let a = fingerprint(&candidate("https://a.com/1", "Deal", &body), 200);
        let b = fingerprint(&candidate("https://b.com/1", "Other", &shouty), 200);
        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(a.content_hash.len(), 64);
    }

    #[test]
    fn short_body_falls_back_to_title_and_url() {
        let a = fingerprint(&candidate("https://a.com/1", "Big Deal", "Too short."), 200);
        let b = fingerprint(&candidate("https://b.com/1", "Big Deal", "Too short."), 200);
        let again = fingerprint(&candidate("https://a.com/1", "Big Deal", ""), 200);

        assert_ne!(a.content_hash, b.content_hash);
        assert_eq!(a.content_hash, again.content_hash);
    }

    #[test]
    fn empty_body_takes_tokens_from_title() {
        let fp = fingerprint(&candidate("https://a.com/1", "Netflix Orders Thriller Series", ""), 200);
        assert!(!fp.content_hash.is_empty());
        assert!(fp.token_set.contains("netflix"));
        assert!(fp.token_set.contains("thriller"));
        assert_eq!(fp.token_set.len(), 4);
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let c = candidate("https://a.com/1", "Title", &"word ".repeat(100));
        assert_eq!(fingerprint(&c, 50), fingerprint(&c, 50));
    }
}
