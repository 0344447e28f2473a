use std::sync::Arc;

use facevault_profile::{ProfileFields, ProfileStore};
use facevault_vecstore::RebuildOutcome;
use serde::Serialize;
use tracing::{info, warn};

use crate::embedding::FaceEncoder;
use crate::error::PipelineError;
use crate::index::FaceIndex;

/// Where an enrolled embedding stands when `enroll` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum IndexState {
    /// Searchable through the staging set; face_id not yet updated.
    Staged,
    /// Folded into the active snapshot.
    Indexed { generation: u64, face_id: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrollResult {
    pub user_id: String,
    /// True if the identity was created by this enrollment.
    pub created: bool,
    pub index: IndexState,
}

/// True if `user_id` is a non-empty token of ASCII letters, digits, `_`
/// and `-`.
pub fn is_valid_user_id(user_id: &str) -> bool {
    !user_id.is_empty()
        && user_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// EnrollmentPipeline registers a face for a user: embed, upsert the
/// identity, stage the embedding, and rebuild once enough is staged.
#[derive(Clone)]
pub struct EnrollmentPipeline {
    encoder: FaceEncoder,
    index: Arc<FaceIndex>,
    profiles: Arc<dyn ProfileStore>,
}

impl EnrollmentPipeline {
    pub fn new(encoder: FaceEncoder, index: Arc<FaceIndex>, profiles: Arc<dyn ProfileStore>) -> Self {
        Self {
            encoder,
            index,
            profiles,
        }
    }

    pub async fn enroll(&self, user_id: &str, photo: &[u8]) -> Result<EnrollResult, PipelineError> {
        self.enroll_with(user_id, photo, &ProfileFields::default())
            .await
    }

    /// Enroll with optional profile metadata. Metadata only fills fields
    /// that are still blank on an existing identity.
    pub async fn enroll_with(
        &self,
        user_id: &str,
        photo: &[u8],
        fields: &ProfileFields,
    ) -> Result<EnrollResult, PipelineError> {
        if !is_valid_user_id(user_id) {
            return Err(PipelineError::InvalidUserId(user_id.to_string()));
        }

        // Nothing is written until the photo has produced a usable embedding.
        let embedding = self.encoder.encode(photo).await?;

        let upserted = self.profiles.upsert(user_id, fields)?;
        let threshold_exceeded = self.index.stage(user_id, &embedding);
        info!(
            user_id,
            created = upserted.created,
            "pipeline: enrolled face"
        );

        if threshold_exceeded {
            match self.index.rebuild().await {
                Ok(RebuildOutcome::Rebuilt(report)) => {
                    info!(generation = report.generation, "pipeline: threshold rebuild finished");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "pipeline: threshold rebuild failed"),
            }
        }

        Ok(EnrollResult {
            user_id: user_id.to_string(),
            created: upserted.created,
            index: self.index_state(user_id),
        })
    }

    fn index_state(&self, user_id: &str) -> IndexState {
        if self.index.is_staged(user_id) {
            return IndexState::Staged;
        }
        let snapshot = self.index.snapshot();
        match snapshot.index_id_of(user_id) {
            Some(face_id) => IndexState::Indexed {
                generation: snapshot.generation(),
                face_id,
            },
            None => IndexState::Staged,
        }
    }
}
