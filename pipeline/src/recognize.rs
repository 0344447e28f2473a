use std::sync::Arc;

use facevault_profile::{Identity, ProfileStore};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{PipelineConfig, check_threshold};
use crate::embedding::FaceEncoder;
use crate::error::PipelineError;
use crate::index::FaceIndex;

/// Answer to "who is this". The match fields are always present in JSON
/// (null when unmatched); the best-candidate fields only when known.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionResult {
    pub matched: bool,
    pub user_id: Option<String>,
    /// index_id of the matched embedding; `None` when the match is still
    /// staged.
    pub face_id: Option<u32>,
    pub similarity_score: Option<f32>,
    pub profile: Option<Identity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_candidate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_similarity: Option<f32>,
}

impl RecognitionResult {
    fn unmatched(best: Option<(String, f32)>) -> Self {
        let (best_candidate, best_similarity) = match best {
            Some((u, s)) => (Some(u), Some(s)),
            None => (None, None),
        };
        Self {
            matched: false,
            user_id: None,
            face_id: None,
            similarity_score: None,
            profile: None,
            best_candidate,
            best_similarity,
        }
    }
}

/// RecognitionService matches a verification photo against enrolled faces.
#[derive(Clone)]
pub struct RecognitionService {
    encoder: FaceEncoder,
    index: Arc<FaceIndex>,
    profiles: Arc<dyn ProfileStore>,
    top_k: usize,
    default_threshold: f32,
}

impl RecognitionService {
    pub fn new(
        encoder: FaceEncoder,
        index: Arc<FaceIndex>,
        profiles: Arc<dyn ProfileStore>,
        cfg: &PipelineConfig,
    ) -> Self {
        Self {
            encoder,
            index,
            profiles,
            top_k: cfg.top_k,
            default_threshold: cfg.threshold,
        }
    }

    pub fn default_threshold(&self) -> f32 {
        self.default_threshold
    }

    /// Recognize the face in `photo`. `threshold` defaults to the configured
    /// value; values outside [-1, 1] are rejected, never clamped.
    pub async fn recognize(
        &self,
        photo: &[u8],
        threshold: Option<f32>,
    ) -> Result<RecognitionResult, PipelineError> {
        let threshold = check_threshold(threshold.unwrap_or(self.default_threshold))?;
        let embedding = self.encoder.encode(photo).await?;

        let hits = self.index.query(&embedding, self.top_k)?;
        let Some(top) = hits.into_iter().next() else {
            debug!("pipeline: index is empty");
            return Ok(RecognitionResult::unmatched(None));
        };
        debug!(user_id = %top.user_id, similarity = top.similarity, threshold, "pipeline: best candidate");

        if top.similarity.is_nan() || top.similarity < threshold {
            return Ok(RecognitionResult::unmatched(Some((top.user_id, top.similarity))));
        }

        match self.identity(&top.user_id) {
            Ok(profile) => Ok(RecognitionResult {
                matched: true,
                user_id: Some(top.user_id),
                face_id: top.index_id,
                similarity_score: Some(top.similarity),
                profile: Some(profile),
                best_candidate: None,
                best_similarity: None,
            }),
            Err(PipelineError::IdentityNotFound(user_id)) => {
                warn!(%user_id, "pipeline: matched embedding has no identity, reporting unmatched");
                Ok(RecognitionResult::unmatched(Some((user_id, top.similarity))))
            }
            Err(e) => Err(e),
        }
    }

    fn identity(&self, user_id: &str) -> Result<Identity, PipelineError> {
        self.profiles
            .get(user_id)?
            .ok_or_else(|| PipelineError::IdentityNotFound(user_id.to_string()))
    }
}
