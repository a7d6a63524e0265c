mod article_body;
mod content_fetcher;
mod rate_limit;

pub use content_fetcher::{ContentFetcher, FetchPolicy};
