mod article;
mod run;
mod stats;

pub use article::{Article, ArticleFilter, CandidateArticle, NewArticle, RawCandidate};
pub use run::{RunRecord, RunStats, RunStatus};
pub use stats::{ArchiveStats, SourceStats};
