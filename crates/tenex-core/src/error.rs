// Error types for the conversation engine

use thiserror::Error;

/// Result type alias for conversation engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// The engine's error taxonomy (spec §6: "Every public Coordinator method
/// fails with one of...").
#[derive(Debug, Error)]
pub enum EngineError {
    /// No conversation exists with the given id.
    #[error("conversation not found: {0}")]
    ConversationNotFound(String),

    /// A signed event was missing its id, or otherwise malformed.
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// The Persistence Adapter failed a save/load/list/archive/search call.
    #[error("persistence error: {0}")]
    PersistenceError(String),

    /// A structurally invalid engine configuration (spec: `EngineConfig::validate`).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Anything else — wrapped rather than matched on by callers.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl EngineError {
    pub fn conversation_not_found(id: impl Into<String>) -> Self {
        EngineError::ConversationNotFound(id.into())
    }

    pub fn invalid_event(msg: impl Into<String>) -> Self {
        EngineError::InvalidEvent(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        EngineError::PersistenceError(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        EngineError::Configuration(msg.into())
    }
}
