pub mod config;
pub mod embedder;
pub mod error;
pub mod face;
pub mod hash;
pub mod http;

pub use config::EmbedConfig;
pub use embedder::FaceEmbedder;
pub use error::EmbedError;
pub use face::{BoundingBox, DetectedFace, FaceSelection, select_face};
pub use hash::HashEmbedder;
pub use http::HttpEmbedder;
