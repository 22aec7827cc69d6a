//! Runtime error types.

use assay_core::queue::{CANNOT_CONNECT, FAILED_TO_READ, UNEXPECTED_REPLY};
use assay_core::{ConfigError, EngineError, QueueReply};
use thiserror::Error;

/// Failures talking to the external grading queue.
///
/// Every variant maps onto a canonical `(1, content)` reply so the engine can
/// record it against the waiting input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("cannot connect to server: {0}")]
    Connect(String),

    #[error("failed to read from the server: {0}")]
    Read(String),

    #[error("unexpected HTTP status code [{0}]")]
    Status(u16),

    #[error("unexpected reply from server: {0}")]
    Reply(String),

    /// The login round trip was refused; carries the queue's reply content.
    #[error("queue login failed: {0}")]
    Login(String),

    #[error("cannot read submitted file '{filename}': {message}")]
    File { filename: String, message: String },
}

impl QueueError {
    /// The reply the engine records for this failure.
    pub fn to_reply(&self) -> QueueReply {
        match self {
            QueueError::Connect(_) => QueueReply::failure(CANNOT_CONNECT),
            QueueError::Read(_) => QueueReply::failure(FAILED_TO_READ),
            QueueError::Status(status) => QueueReply::unexpected_status(*status),
            QueueError::Reply(_) => QueueReply::failure(UNEXPECTED_REPLY),
            QueueError::Login(content) => QueueReply::failure(content.clone()),
            QueueError::File { filename, .. } => {
                QueueReply::failure(format!("cannot read submitted file '{}'", filename))
            }
        }
    }
}

/// Errors from the runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Invalid callback: {0}")]
    InvalidCallback(String),

    #[error("Queue credentials missing: {0}")]
    MissingCredentials(String),

    #[error("Failed to initialize tracing: {0}")]
    Telemetry(String),
}
