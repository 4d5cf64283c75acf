//! Error types for the trade/chat compatibility layer

use thiserror::Error;

/// Failures raised by a [`DocumentStore`](crate::db::DocumentStore) backend.
///
/// These travel through the compatibility services untouched so that the
/// caller's retry policy sees exactly what the store reported.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store connection error: {0}")]
    Connection(String),

    #[error("Store query failed: {0}")]
    Query(String),

    #[error("Store write failed: {0}")]
    Write(String),

    #[error("Failed to decode stored document: {0}")]
    Decode(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum CompatError {
    #[error("Migration registry is not initialized: {0}")]
    NotInitialized(String),

    #[error("Migration registry initialization failed: {0}")]
    Initialization(String),

    #[error("Invalid {collection} record '{id}': {reason}")]
    Validation {
        collection: String,
        id: String,
        reason: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CompatError {
    pub(crate) fn validation(
        collection: impl Into<String>,
        id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Validation {
            collection: collection.into(),
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Message safe to show an end user
    pub fn user_message(&self) -> &'static str {
        match self {
            CompatError::NotInitialized(_)
            | CompatError::Initialization(_)
            | CompatError::Store(_)
            | CompatError::Config(_) => "Service temporarily unavailable",
            CompatError::Validation { .. } => "This record could not be loaded",
        }
    }

    /// Whether an outer retry policy may try the operation again.
    /// Nothing inside this crate retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CompatError::Store(_))
    }
}

pub type Result<T> = std::result::Result<T, CompatError>;
