use thiserror::Error;

use crate::types::EntityIndexId;

pub type Result<T> = std::result::Result<T, WeaveError>;

#[derive(Debug, Error)]
pub enum WeaveError {
    #[error("manifest already registered for entity index {0}")]
    DuplicateManifest(EntityIndexId),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[cfg(feature = "database")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("storage: {0}")]
    Storage(#[from] anyhow::Error),
}

impl WeaveError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
