use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("profile: identity not found: {0}")]
    NotFound(String),

    #[error("profile: storage error: {0}")]
    Storage(String),

    #[error("profile: serialization error: {0}")]
    Serialization(String),
}

pub type ProfileResult<T> = Result<T, ProfileError>;
