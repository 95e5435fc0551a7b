//! Domain error type.
//!
//! Modules whose callers need to branch on the failure kind (extraction
//! fallback, registry validation, HTTP status mapping) return
//! [`ContractError`]. Orchestration code wraps these in `anyhow::Error`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContractError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("vector store error: {0}")]
    VectorStore(String),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("model error: {0}")]
    ModelLoading(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl ContractError {
    /// True for errors caused by the caller's input rather than the system.
    pub fn is_client_error(&self) -> bool {
        matches!(self, ContractError::Validation(_))
    }
}

pub type Result<T, E = ContractError> = std::result::Result<T, E>;
