use std::time::Duration;

use facevault_embed::FaceSelection;
use facevault_vecstore::HnswConfig;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// HNSW build and search parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswSettings {
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub seed: u64,
}

impl Default for HnswSettings {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 50,
            seed: 0,
        }
    }
}

/// Tunables for enrollment, recognition and index maintenance.
///
/// Every field has a default, so an empty YAML mapping is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Embedding dimension the index is built for.
    pub dimension: usize,
    pub hnsw: HnswSettings,
    /// An enrollment that leaves more than this many entries staged
    /// rebuilds immediately.
    pub rebuild_threshold: usize,
    /// Period of the background rebuild ticker.
    pub rebuild_interval_secs: u64,
    /// Candidates fetched per recognition query.
    pub top_k: usize,
    /// Default minimum similarity for a match, in [-1, 1].
    pub threshold: f32,
    /// Per-attempt timeout for embedder calls.
    pub embed_timeout_ms: u64,
    pub face_selection: FaceSelection,
    /// Capacity of the file-arrival queue.
    pub queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dimension: 512,
            hnsw: HnswSettings::default(),
            rebuild_threshold: 32,
            rebuild_interval_secs: 30,
            top_k: 5,
            threshold: 0.6,
            embed_timeout_ms: 10_000,
            face_selection: FaceSelection::Largest,
            queue_capacity: 64,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.dimension == 0 {
            return Err(PipelineError::Config("dimension must be positive".into()));
        }
        check_threshold(self.threshold)?;
        if self.top_k == 0 {
            return Err(PipelineError::Config("top_k must be positive".into()));
        }
        if self.queue_capacity == 0 {
            return Err(PipelineError::Config("queue_capacity must be positive".into()));
        }
        if self.rebuild_threshold == 0 {
            return Err(PipelineError::Config(
                "rebuild_threshold must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn hnsw_config(&self) -> HnswConfig {
        HnswConfig {
            dim: self.dimension,
            m: self.hnsw.m,
            ef_construction: self.hnsw.ef_construction,
            ef_search: self.hnsw.ef_search,
            seed: self.hnsw.seed,
        }
    }

    pub fn rebuild_interval(&self) -> Duration {
        Duration::from_secs(self.rebuild_interval_secs)
    }

    pub fn embed_timeout(&self) -> Duration {
        Duration::from_millis(self.embed_timeout_ms)
    }
}

/// Reject similarity thresholds outside [-1, 1] (NaN included).
pub fn check_threshold(threshold: f32) -> Result<f32, PipelineError> {
    if (-1.0..=1.0).contains(&threshold) {
        Ok(threshold)
    } else {
        Err(PipelineError::InvalidThreshold(threshold))
    }
}
