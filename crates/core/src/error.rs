//! The §7 error-kind taxonomy, shared by every crate so library-boundary
//! errors convert cleanly into it via `#[from]`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

/// Top-level error kinds. Library crates define their own narrower error
/// enums and convert into this one at the orchestration boundary.
#[derive(Debug, Error)]
pub enum CoreError {
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

impl CoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::TransientExternal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_is_retryable() {
        assert!(CoreError::TransientExternal("timeout".into()).is_retryable());
        assert!(!CoreError::Input("bad".into()).is_retryable());
    }
}
