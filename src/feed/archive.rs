//! Month index pages such as `https://deadline.com/2025/06/`, a second
//! source of candidates next to the feeds.

use std::collections::HashSet;

use chrono::{TimeZone, Utc};
use scraper::{Html, Selector};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::RawCandidate;

/// Shortest absolute URL taken for an article. Index and section pages are
/// shorter.
const MIN_ARTICLE_URL_LEN: usize = 31;

/// Article links found on a month index page. Links are resolved against
/// `base`, deduplicated in page order, and dated the first of the month,
/// since the index carries no per-article timestamp.
pub fn parse_archive_index(
    html: &str,
    base: &Url,
    year: i32,
    month: u32,
    source: &str,
) -> Result<Vec<RawCandidate>> {
    let year_path = format!("/{year}/");
    let selectors = [
        format!("a[href*=\"{year_path}\"]"),
        ".entry-title a".to_string(),
        "h2 a".to_string(),
        "h3 a".to_string(),
    ];
    let published = Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single();

    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    for selector in &selectors {
        let selector = Selector::parse(selector)
            .map_err(|e| AppError::Config(format!("invalid selector {selector:?}: {e}")))?;

        for link in document.select(&selector) {
            let href = link.value().attr("href").unwrap_or_default().trim();
            let title = link.text().collect::<Vec<_>>().join(" ");
            let title = title.split_whitespace().collect::<Vec<_>>().join(" ");
            if href.is_empty() || title.is_empty() || href.contains('#') || !href.contains(&year_path) {
                continue;
            }

            let Ok(url) = base.join(href) else {
                continue;
            };
            if url.as_str().len() < MIN_ARTICLE_URL_LEN || url.path().contains("/page/") {
                continue;
            }
            if !seen.insert(url.to_string()) {
                continue;
            }

            candidates.push(RawCandidate {
                url: url.into(),
                title: Some(title),
                publication_date: published,
                source: source.to_string(),
                full_text: None,
            });
        }
    }

    Ok(candidates)
}
