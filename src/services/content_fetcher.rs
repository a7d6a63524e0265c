use std::time::Duration;

use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, StatusCode};

use crate::config::{ExtractionConfig, FeedConfig};
use crate::error::{AppError, Result};

use super::article_body::BodySelector;
use super::rate_limit::RateLimiter;

/// Lines that start with one of these are calls to action, not article text.
const PROMO_LINE: &str = r"(?i)^(get our alerts|subscribe to|sign up for|newsletter|click here to|read more:|related:)";

/// Heading and list markers that html2text puts in front of a line.
const LINE_MARKUP: &str = r"^(#+|\*|>|-)\s+";

/// Wide enough that html2text never wraps a paragraph.
const TEXT_WIDTH: usize = 10_000;

/// Timeout and retry budget for one article fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPolicy {
    pub timeout: Duration,
    pub attempts: u32,
}

impl FetchPolicy {
    /// Defaults from `[extraction]`, overridden by the feed's own settings.
    pub fn for_feed(config: &ExtractionConfig, feed: Option<&FeedConfig>) -> Self {
        let timeout = feed
            .and_then(|f| f.request_timeout_secs)
            .unwrap_or(config.request_timeout_secs);
        let attempts = feed
            .and_then(|f| f.retry_attempts)
            .unwrap_or(config.retry_attempts);
        Self {
            timeout: Duration::from_secs(timeout),
            attempts: attempts.max(1),
        }
    }
}

pub struct ContentFetcher {
    client: Client,
    limiter: RateLimiter,
    backoff_base: Duration,
    min_text_length: usize,
    body: BodySelector,
    markup: Regex,
    promo: Regex,
}

impl ContentFetcher {
    pub fn new(config: &ExtractionConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let agent = HeaderValue::from_str(&config.user_agent)
            .map_err(|e| AppError::Config(format!("invalid user agent: {e}")))?;
        headers.insert(USER_AGENT, agent);

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        let promo = Regex::new(PROMO_LINE).map_err(|e| AppError::Config(e.to_string()))?;
        let markup = Regex::new(LINE_MARKUP).map_err(|e| AppError::Config(e.to_string()))?;

        Ok(Self {
            client,
            limiter: RateLimiter::new(Duration::from_millis(config.delay_between_requests_ms)),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            min_text_length: config.min_text_length,
            body: BodySelector::new()?,
            markup,
            promo,
        })
    }

    /// Fetch an article page and extract its readable text.
    pub async fn fetch_full_content(&self, article_url: &str, policy: FetchPolicy) -> Result<String> {
        let html = self.fetch_html(article_url, policy).await?;

        self.extract_content(&html, article_url).ok_or_else(|| AppError::Extraction {
            url: article_url.to_string(),
            reason: "no usable text in page".to_string(),
        })
    }

    /// GET with per-request timeout; failed attempts back off exponentially
    /// (base, 2×base, 4×base, ...). Every attempt waits for a rate-limit slot.
    async fn fetch_html(&self, url: &str, policy: FetchPolicy) -> Result<String> {
        let mut last_error = String::new();

        for attempt in 0..policy.attempts {
            self.limiter.wait().await;

            match self.try_fetch(url, policy.timeout).await {
                Ok(html) => {
                    tracing::debug!(url, attempt, "Fetched article page");
                    return Ok(html);
                }
                Err(FetchFailure::Permanent(reason)) => {
                    return Err(AppError::Extraction {
                        url: url.to_string(),
                        reason,
                    });
                }
                Err(FetchFailure::Transient(reason)) => {
                    tracing::warn!(
                        url,
                        attempt = attempt + 1,
                        attempts = policy.attempts,
                        %reason,
                        "Fetch attempt failed"
                    );
                    last_error = reason;
                }
            }

            if attempt + 1 < policy.attempts {
                tokio::time::sleep(self.backoff_base * 2u32.saturating_pow(attempt)).await;
            }
        }

        Err(AppError::Extraction {
            url: url.to_string(),
            reason: format!("gave up after {} attempts: {}", policy.attempts, last_error),
        })
    }

    async fn try_fetch(&self, url: &str, timeout: Duration) -> std::result::Result<String, FetchFailure> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| FetchFailure::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let reason = format!("HTTP {status}");
            return Err(if is_retryable(status) {
                FetchFailure::Transient(reason)
            } else {
                FetchFailure::Permanent(reason)
            });
        }

        response
            .text()
            .await
            .map_err(|e| FetchFailure::Transient(e.to_string()))
    }

    /// Locate the article body, render it as text, drop promotional lines
    /// and collapse whitespace. `None` when what is left is too short to be
    /// an article body.
    pub fn extract_content(&self, html: &str, url: &str) -> Option<String> {
        let fragment = self.body.select(html, url)?;
        let text = match html2text::from_read(fragment.as_bytes(), TEXT_WIDTH) {
            Ok(t) => t,
            Err(e) => {
                tracing::debug!(url, "Failed to convert HTML to text: {}", e);
                return None;
            }
        };

        let body = text
            .lines()
            .map(|line| self.markup.replace(line.trim(), ""))
            .filter(|line| !line.is_empty() && !self.promo.is_match(line))
            .collect::<Vec<_>>()
            .join(" ");
        let cleaned = body.split_whitespace().collect::<Vec<_>>().join(" ");

        if cleaned.chars().count() >= self.min_text_length {
            Some(cleaned)
        } else {
            tracing::debug!(url, "Extracted content too short ({} chars)", cleaned.len());
            None
        }
    }
}

enum FetchFailure {
    Transient(String),
    Permanent(String),
}

fn is_retryable(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher(min_text_length: usize) -> ContentFetcher {
        let config = ExtractionConfig {
            min_text_length,
            delay_between_requests_ms: 0,
            backoff_base_ms: 1,
            ..Default::default()
        };
        ContentFetcher::new(&config).unwrap()
    }

    const URL: &str = "https://news.example.org/story";

    #[test]
    fn extracts_body_and_strips_promotions() {
        let html = r#"<html><body>
            <h1>Studio Closes Deal</h1>
            <p>The studio   closed the deal on Friday.</p>
            <p>Terms were not disclosed.</p>
            <p>Sign up for our newsletter to get more.</p>
            <p>Related: Another studio story</p>
            </body></html>"#;

        let text = fetcher(10).extract_content(html, URL).unwrap();
        assert!(text.starts_with("Studio Closes Deal"));
        assert!(text.contains("The studio closed the deal on Friday."));
        assert!(text.contains("Terms were not disclosed."));
        assert!(!text.contains("Sign up"));
        assert!(!text.contains("Another studio story"));
        assert!(!text.contains("  "));
    }

    #[test]
    fn newsletter_mentioned_mid_story_keeps_the_rest() {
        let html = r#"<html><body><article>
            <p>The trade newsletter first reported the deal on Monday.</p>
            <p>Production starts in the spring with the full cast returning.</p>
            </article></body></html>"#;

        let text = fetcher(10).extract_content(html, URL).unwrap();
        assert!(text.contains("newsletter first reported the deal"));
        assert!(text.contains("Production starts in the spring"));
    }

    #[test]
    fn site_chrome_is_not_part_of_the_text() {
        let story = "The studio confirmed the sequel will shoot in London next year. ".repeat(5);
        let html = format!(
            r#"<html><body>
              <nav>Film TV Awards Box Office</nav>
              <div class="c-content__body"><p>{story}</p>
                <div class="newsletter-signup">Get the best of Deadline</div>
              </div>
              <footer>Penske Media Corporation</footer>
            </body></html>"#
        );

        let text = fetcher(100)
            .extract_content(&html, "https://deadline.com/2025/06/sequel/")
            .unwrap();
        assert!(text.starts_with("The studio confirmed the sequel"));
        assert!(!text.contains("Box Office"));
        assert!(!text.contains("best of Deadline"));
        assert!(!text.contains("Penske"));
    }

    #[test]
    fn short_pages_yield_nothing() {
        assert_eq!(fetcher(200).extract_content("<p>Just a teaser.</p>", URL), None);
    }

    #[test]
    fn feed_overrides_fetch_policy() {
        let config = ExtractionConfig::default();
        let feed = FeedConfig {
            name: "Variety".to_string(),
            url: "https://variety.com/feed/".to_string(),
            request_timeout_secs: Some(30),
            retry_attempts: Some(0),
        };

        let policy = FetchPolicy::for_feed(&config, Some(&feed));
        assert_eq!(policy.timeout, Duration::from_secs(30));
        assert_eq!(policy.attempts, 1);

        let fallback = FetchPolicy::for_feed(&config, None);
        assert_eq!(fallback.timeout, Duration::from_secs(config.request_timeout_secs));
        assert_eq!(fallback.attempts, config.retry_attempts);
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable(StatusCode::BAD_GATEWAY));
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_retryable(StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn unreachable_host_gives_extraction_error() {
        let policy = FetchPolicy {
            timeout: Duration::from_millis(500),
            attempts: 2,
        };
        let result = fetcher(10)
            .fetch_full_content("http://127.0.0.1:9/article", policy)
            .await;
        assert!(matches!(result, Err(AppError::Extraction { .. })));
    }
}
