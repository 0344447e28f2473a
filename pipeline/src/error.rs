use std::path::PathBuf;

use facevault_embed::EmbedError;
use facevault_profile::ProfileError;
use facevault_vecstore::VecError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("pipeline: no face detected")]
    NoFaceDetected,

    #[error("pipeline: {count} faces detected and face selection is strict")]
    AmbiguousFace { count: usize },

    #[error("pipeline: embedding timed out after {attempts} attempts")]
    EmbeddingTimeout { attempts: u32 },

    #[error("pipeline: embedding dimension mismatch: got {got}, want {want}")]
    DimensionMismatch { got: usize, want: usize },

    #[error("pipeline: embedding has non-finite components")]
    NonFiniteEmbedding,

    #[error("pipeline: rebuild dropped {} staged entries: {user_ids:?}", .user_ids.len())]
    RebuildAborted { user_ids: Vec<String> },

    #[error("pipeline: identity not found: {0}")]
    IdentityNotFound(String),

    #[error("pipeline: threshold {0} outside [-1, 1]")]
    InvalidThreshold(f32),

    #[error("pipeline: invalid user_id {0:?}")]
    InvalidUserId(String),

    #[error("pipeline: malformed photo filename {0}")]
    MalformedFilename(PathBuf),

    #[error("pipeline: config: {0}")]
    Config(String),

    #[error("pipeline: io: {0}")]
    Io(#[from] std::io::Error),

    #[error("pipeline: watch: {0}")]
    Watch(#[from] notify::Error),

    #[error("pipeline: embed error: {0}")]
    Embed(EmbedError),

    #[error("pipeline: index error: {0}")]
    Index(VecError),

    #[error("pipeline: profile error: {0}")]
    Profile(#[from] ProfileError),

    #[error("pipeline: task failed: {0}")]
    Task(String),
}

impl From<EmbedError> for PipelineError {
    fn from(e: EmbedError) -> Self {
        match e {
            EmbedError::NoFaceDetected => PipelineError::NoFaceDetected,
            EmbedError::AmbiguousFace { count } => PipelineError::AmbiguousFace { count },
            other => PipelineError::Embed(other),
        }
    }
}

impl From<VecError> for PipelineError {
    fn from(e: VecError) -> Self {
        match e {
            VecError::DimensionMismatch { got, want } => {
                PipelineError::DimensionMismatch { got, want }
            }
            VecError::RebuildAborted { user_ids, .. } => PipelineError::RebuildAborted { user_ids },
            other => PipelineError::Index(other),
        }
    }
}

/// Coarse classification for API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The photo contained no usable face.
    NoFace,
    /// The request itself was invalid.
    BadRequest,
    Internal,
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::NoFaceDetected | PipelineError::AmbiguousFace { .. } => ErrorKind::NoFace,
            PipelineError::InvalidThreshold(_)
            | PipelineError::InvalidUserId(_)
            | PipelineError::MalformedFilename(_)
            | PipelineError::DimensionMismatch { .. }
            | PipelineError::Embed(EmbedError::EmptyInput) => ErrorKind::BadRequest,
            _ => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embed_errors_map_to_taxonomy() {
        assert!(matches!(
            PipelineError::from(EmbedError::NoFaceDetected),
            PipelineError::NoFaceDetected
        ));
        assert!(matches!(
            PipelineError::from(EmbedError::AmbiguousFace { count: 3 }),
            PipelineError::AmbiguousFace { count: 3 }
        ));
        assert_eq!(
            PipelineError::from(EmbedError::Api("boom".into())).kind(),
            ErrorKind::Internal
        );
        assert_eq!(PipelineError::from(EmbedError::EmptyInput).kind(), ErrorKind::BadRequest);
    }

    #[test]
    fn test_kinds() {
        assert_eq!(PipelineError::NoFaceDetected.kind(), ErrorKind::NoFace);
        assert_eq!(PipelineError::InvalidThreshold(2.0).kind(), ErrorKind::BadRequest);
        assert_eq!(
            PipelineError::EmbeddingTimeout { attempts: 2 }.kind(),
            ErrorKind::Internal
        );
        let e: PipelineError = VecError::DimensionMismatch { got: 3, want: 4 }.into();
        assert!(matches!(e, PipelineError::DimensionMismatch { got: 3, want: 4 }));
    }
}
