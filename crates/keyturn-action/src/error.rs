//! Error types for the action engine.

use keyturn_core::error::KeyturnError;

/// Errors from action registration and execution.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("Improperly configured action: {0}")]
    Configuration(String),
    #[error("Action already registered: {0}")]
    AlreadyRegistered(String),
    #[error("Action not registered: {0}")]
    NotRegistered(String),
    #[error("Action '{0}' does not implement execute")]
    NotImplemented(String),
    #[error("Action handler failed: {0}")]
    HandlerFailed(String),
    #[error("Notification failed: {0}")]
    Notification(String),
    #[error("Storage error: {0}")]
    Storage(#[from] KeyturnError),
}
