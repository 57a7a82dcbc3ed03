//! Search configuration.
//!
//! Defaults match the thresholds the catalog was tuned with. A TOML file can
//! override any subset of fields; CLI flags override the file.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::Path;

use crate::error::{MappingError, Result};

/// Nearest-neighbor capability for every [`FuzzyIndex`](crate::fuzzy_index::FuzzyIndex).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Sparse inverted index with dot-product scoring.
    InvertedIndex,
    /// No backend; indexes stay unbuilt and return no matches.
    Unavailable,
}

/// Tie-break direction on the catalog `score` between equally confident candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreOrder {
    /// Lower scores are more canonical (catalog default).
    LowerFirst,
    HigherFirst,
}

impl ScoreOrder {
    pub fn compare(self, a: i64, b: i64) -> Ordering {
        match self {
            ScoreOrder::LowerFirst => a.cmp(&b),
            ScoreOrder::HigherFirst => b.cmp(&a),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Minimum recording-stage confidence.
    pub recording_confidence: f32,
    /// Minimum release-stage confidence.
    pub release_confidence: f32,
    /// Minimum confidence for catalog-wide artist resolution.
    pub artist_confidence: f32,
    /// Artist threshold for queries against a bulk-built index.
    pub bulk_artist_confidence: f32,
    /// k for every nearest-neighbor query.
    pub neighbors: usize,
    /// Candidates per stage kept for combination / returned without a release.
    pub top_candidates: usize,
    pub score_order: ScoreOrder,
    pub backend: Backend,
    pub num_shards: usize,
    /// Capacity of each shard's request queue.
    pub queue_capacity: usize,
    /// Rows per bulk build batch.
    pub bulk_batch_rows: usize,
    /// Bulk build threads; 0 means available parallelism.
    pub bulk_workers: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            recording_confidence: 0.5,
            release_confidence: 0.5,
            artist_confidence: 0.45,
            bulk_artist_confidence: 0.7,
            neighbors: 3,
            top_candidates: 3,
            score_order: ScoreOrder::LowerFirst,
            backend: Backend::InvertedIndex,
            num_shards: 4,
            queue_capacity: 1024,
            bulk_batch_rows: 100_000,
            bulk_workers: 0,
        }
    }
}

impl SearchConfig {
    /// Load from a TOML file; missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: SearchConfig = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let thresholds = [
            ("recording_confidence", self.recording_confidence),
            ("release_confidence", self.release_confidence),
            ("artist_confidence", self.artist_confidence),
            ("bulk_artist_confidence", self.bulk_artist_confidence),
        ];
        for (name, value) in thresholds {
            if !(0.0..=1.0).contains(&value) {
                return Err(MappingError::Config(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        if self.num_shards == 0 {
            return Err(MappingError::InvalidShardCount);
        }
        if self.neighbors == 0 || self.top_candidates == 0 {
            return Err(MappingError::Config(
                "neighbors and top_candidates must be at least 1".to_string(),
            ));
        }
        if self.queue_capacity == 0 || self.bulk_batch_rows == 0 {
            return Err(MappingError::Config(
                "queue_capacity and bulk_batch_rows must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Bulk build thread count with 0 resolved to the machine's parallelism.
    pub fn effective_bulk_workers(&self) -> usize {
        if self.bulk_workers > 0 {
            self.bulk_workers
        } else {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(8)
        }
    }
}
