//! Agent error types.

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("sync tool failure: {0}")]
    SyncTool(String),

    #[error("coordinator request failed: {0}")]
    Coordinator(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
