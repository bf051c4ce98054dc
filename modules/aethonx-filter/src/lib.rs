//! URL reduction pipeline.
//!
//! Historical-URL sources emit 10^5-10^6 raw URLs per target. This crate
//! reduces them to a small high-value set: normalize → Bloom-deduplicate →
//! score → cluster → pattern-prune → score-threshold. Each stage is usable
//! on its own; `FilterEngine` wires them together with stats and
//! cancellation support.

pub mod bloom;
pub mod cluster;
pub mod engine;
pub mod normalize;
pub mod pattern;
pub mod score;

pub use bloom::{BloomFilter, BloomStats};
pub use cluster::{ClusterAlgorithm, ClusterConfig, Clusterer, UrlCluster};
pub use engine::{FilterConfig, FilterEngine, FilterOutcome, FilterStats};
pub use normalize::{NormalizeStrategy, NormalizedUrl, Normalizer};
pub use pattern::{PatternExtractor, PatternGroup};
pub use score::{ScoreWeights, Scorer, UrlScore};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("URL parse error: {0}")]
    Parse(String),

    #[error("Filter configuration error: {0}")]
    Config(String),
}
