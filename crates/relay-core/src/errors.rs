use std::time::Duration;

/// Core error type for the relay.
///
/// Adapter crates map their specific errors into this type so the dispatcher
/// can treat every per-request failure the same way (log + fallback reply).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("assistant run ended with status `{status}`")]
    AssistantRunFailed { status: String },

    #[error("assistant run {run_id} still pending after {waited:?}")]
    AssistantRunTimeout { run_id: String, waited: Duration },

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
