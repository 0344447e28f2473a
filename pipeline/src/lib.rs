//! Face enrollment and recognition.
//!
//! ```text
//! Watcher ──► EnrollWorker ──► EnrollmentPipeline ─┐
//!                                                  ├─► FaceEncoder (embedder)
//! API ──────────────────────► RecognitionService ──┼─► FaceIndex (VectorIndex)
//!                                                  └─► ProfileStore
//! ```

pub mod config;
pub mod embedding;
pub mod enroll;
pub mod error;
pub mod index;
pub mod recognize;
pub mod watcher;


use std::path::PathBuf;
use std::sync::Arc;

use facevault_embed::FaceEmbedder;
use facevault_profile::ProfileStore;

pub use config::{HnswSettings, PipelineConfig, check_threshold};
pub use embedding::FaceEncoder;
pub use enroll::{EnrollResult, EnrollmentPipeline, IndexState, is_valid_user_id};
pub use error::{ErrorKind, PipelineError};
pub use index::FaceIndex;
pub use recognize::{RecognitionResult, RecognitionService};
pub use watcher::{
    DirWatcher, EnrollWorker, IMAGE_EXTENSIONS, PhotoArrival, WorkerSummary, drain, is_image,
    parse_user_id, scan_dir,
};

/// Pipeline wires the embedder, index and profile store into the
/// enrollment and recognition services.
#[derive(Clone)]
pub struct Pipeline {
    pub config: PipelineConfig,
    pub index: Arc<FaceIndex>,
    pub profiles: Arc<dyn ProfileStore>,
    pub enrollment: EnrollmentPipeline,
    pub recognition: RecognitionService,
}

impl Pipeline {
    pub fn open(
        config: PipelineConfig,
        embedder: Arc<dyn FaceEmbedder>,
        profiles: Arc<dyn ProfileStore>,
        snapshot_path: Option<PathBuf>,
    ) -> Result<Self, PipelineError> {
        if embedder.dimension() != config.dimension {
            return Err(PipelineError::Config(format!(
                "embedder dimension {} does not match index dimension {}",
                embedder.dimension(),
                config.dimension
            )));
        }
        let index = Arc::new(FaceIndex::open(&config, Arc::clone(&profiles), snapshot_path)?);
        let encoder = FaceEncoder::new(embedder, &config);
        let enrollment =
            EnrollmentPipeline::new(encoder.clone(), Arc::clone(&index), Arc::clone(&profiles));
        let recognition =
            RecognitionService::new(encoder, Arc::clone(&index), Arc::clone(&profiles), &config);
        Ok(Self {
            config,
            index,
            profiles,
            enrollment,
            recognition,
        })
    }
}
