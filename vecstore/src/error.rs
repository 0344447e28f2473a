use thiserror::Error;

#[derive(Error, Debug)]
pub enum VecError {
    #[error("vecstore: dimension mismatch: got {got}, want {want}")]
    DimensionMismatch { got: usize, want: usize },

    #[error("vecstore: rebuild aborted for {dropped} staged entries: {user_ids:?}")]
    RebuildAborted { dropped: usize, user_ids: Vec<String> },

    #[error("vecstore: {0}")]
    Io(String),

    #[error("vecstore: invalid format: {0}")]
    InvalidFormat(String),
}

impl From<std::io::Error> for VecError {
    fn from(e: std::io::Error) -> Self {
        VecError::Io(e.to_string())
    }
}
