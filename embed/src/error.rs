use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("embed: empty input")]
    EmptyInput,

    #[error("embed: no face detected")]
    NoFaceDetected,

    #[error("embed: {count} faces detected, expected exactly one")]
    AmbiguousFace { count: usize },

    #[error("embed: API error: {0}")]
    Api(String),

    #[error("embed: invalid response: {0}")]
    InvalidResponse(String),
}
