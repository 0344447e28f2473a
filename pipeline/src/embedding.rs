use std::sync::Arc;
use std::time::Duration;

use facevault_embed::{FaceEmbedder, FaceSelection, select_face};
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::error::PipelineError;

/// Embedder calls are retried at most once after a timeout.
const MAX_ATTEMPTS: u32 = 2;

/// FaceEncoder turns a photo into the one embedding the pipeline uses for
/// it: embedder call with timeout and one retry, face selection, and
/// dimension and finiteness checks. It has no side effects on failure.
#[derive(Clone)]
pub struct FaceEncoder {
    embedder: Arc<dyn FaceEmbedder>,
    selection: FaceSelection,
    timeout: Duration,
    dimension: usize,
}

impl FaceEncoder {
    pub fn new(embedder: Arc<dyn FaceEmbedder>, cfg: &PipelineConfig) -> Self {
        Self {
            embedder,
            selection: cfg.face_selection,
            timeout: cfg.embed_timeout(),
            dimension: cfg.dimension,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub async fn encode(&self, photo: &[u8]) -> Result<Vec<f32>, PipelineError> {
        let mut attempt = 0;
        let faces = loop {
            attempt += 1;
            match tokio::time::timeout(self.timeout, self.embedder.embed(photo)).await {
                Ok(result) => break result?,
                Err(_) if attempt < MAX_ATTEMPTS => {
                    warn!(attempt, timeout_ms = self.timeout.as_millis() as u64, "pipeline: embedder timed out, retrying");
                }
                Err(_) => {
                    return Err(PipelineError::EmbeddingTimeout { attempts: attempt });
                }
            }
        };

        let detected = faces.len();
        let face = select_face(faces, self.selection)?;
        debug!(detected, "pipeline: face selected");

        if face.embedding.len() != self.dimension {
            return Err(PipelineError::DimensionMismatch {
                got: face.embedding.len(),
                want: self.dimension,
            });
        }
        if !face.embedding.iter().all(|v| v.is_finite()) {
            return Err(PipelineError::NonFiniteEmbedding);
        }
        Ok(face.embedding)
    }
}
