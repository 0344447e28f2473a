use crate::error::EmbedError;
use crate::face::DetectedFace;

/// FaceEmbedder locates faces in an encoded photo and returns one feature
/// vector per face.
///
/// An empty result means no face was found; it is not an error at this
/// level. Implementations must be safe for concurrent use (Send + Sync).
#[async_trait::async_trait]
pub trait FaceEmbedder: Send + Sync {
    /// Detect and embed every face in `photo` (PNG, JPEG, ... bytes).
    async fn embed(&self, photo: &[u8]) -> Result<Vec<DetectedFace>, EmbedError>;

    /// Return the dimensionality of the output vectors.
    fn dimension(&self) -> usize;
}
