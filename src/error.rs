use thiserror::Error;

/// Errors raised while loading inputs, standards tables or registries.
/// Rule bodies never produce these; data-quality problems are findings.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("standards table: {0}")]
    Standards(String),
}

impl From<String> for AuditError {
    fn from(err: String) -> Self {
        AuditError::InvalidInput(err)
    }
}
