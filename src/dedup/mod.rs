mod classifier;
mod fingerprint;

pub use classifier::{
    Classifier, Decision, HashScope, MatchKind, Matches, SimilarityScope, TitlePolicy,
};
pub use fingerprint::fingerprint;
