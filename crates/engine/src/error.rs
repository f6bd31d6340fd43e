//! The top-level §7 error-kind taxonomy the engine exposes to its host.
//! Every collaborator crate's error is folded into one of these six kinds
//! at the call site; library crates keep their own narrower error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("input error: {0}")]
    Input(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("auth error: {0}")]
    Auth(String),

    #[error("transient external error: {0}")]
    TransientExternal(String),

    #[error("data integrity error: {0}")]
    DataIntegrity(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl From<taste_core::CoreError> for EngineError {
    fn from(e: taste_core::CoreError) -> Self {
        match e {
            taste_core::CoreError::Input(s) => EngineError::Input(s),
            taste_core::CoreError::NotFound(s) => EngineError::NotFound(s),
            taste_core::CoreError::Auth(s) => EngineError::Auth(s),
            taste_core::CoreError::TransientExternal(s) => EngineError::TransientExternal(s),
            taste_core::CoreError::DataIntegrity(s) => EngineError::DataIntegrity(s),
            taste_core::CoreError::Internal(s) => EngineError::Internal(s),
        }
    }
}

impl From<taste_catalog::provider::CatalogError> for EngineError {
    fn from(e: taste_catalog::provider::CatalogError) -> Self {
        match e {
            taste_catalog::provider::CatalogError::NotFound(s) => EngineError::NotFound(s),
            taste_catalog::provider::CatalogError::Backend(s) => EngineError::TransientExternal(s),
        }
    }
}

impl From<taste_embedding::EmbeddingError> for EngineError {
    fn from(e: taste_embedding::EmbeddingError) -> Self {
        EngineError::Internal(e.to_string())
    }
}

impl From<taste_vector_index::IndexError> for EngineError {
    fn from(e: taste_vector_index::IndexError) -> Self {
        EngineError::Internal(e.to_string())
    }
}

impl From<taste_retrieval::RetrievalError> for EngineError {
    fn from(e: taste_retrieval::RetrievalError) -> Self {
        EngineError::TransientExternal(e.to_string())
    }
}

impl From<taste_history::HistoryError> for EngineError {
    fn from(e: taste_history::HistoryError) -> Self {
        EngineError::TransientExternal(e.to_string())
    }
}

impl From<taste_cache::CacheError> for EngineError {
    fn from(e: taste_cache::CacheError) -> Self {
        EngineError::TransientExternal(e.to_string())
    }
}

impl From<taste_lexical::LexicalError> for EngineError {
    fn from(e: taste_lexical::LexicalError) -> Self {
        EngineError::Internal(e.to_string())
    }
}
