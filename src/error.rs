use serde::Serialize;

/// Top-level error type for the orchestrator binary.
///
/// Mirrors the teacher's per-subsystem `#[from]` composition: each
/// subsystem gets its own error enum (`RuntimeError`, `ConfigError`,
/// `ForensicsError`) and this type funnels them to the control API and
/// the main loop's log-and-continue handling (§7 of the spec).
#[derive(Debug, thiserror::Error)]
pub enum LabyrinthError {
    #[error("runtime error: {0}")]
    Runtime(#[from] crate::runtime::RuntimeError),

    #[error("config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("forensics error: {0}")]
    Forensics(#[from] crate::forensics::ForensicsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("unknown mode: {0}")]
    UnknownMode(String),

    #[error("{0}")]
    Other(String),
}

impl Serialize for LabyrinthError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl From<LabyrinthError> for axum::http::StatusCode {
    fn from(err: LabyrinthError) -> Self {
        match err {
            LabyrinthError::SessionNotFound(_) => axum::http::StatusCode::NOT_FOUND,
            LabyrinthError::UnknownMode(_) => axum::http::StatusCode::BAD_REQUEST,
            _ => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type LabyrinthResult<T> = Result<T, LabyrinthError>;
