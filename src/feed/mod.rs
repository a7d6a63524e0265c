mod archive;
mod fetcher;

pub use fetcher::FeedFetcher;
