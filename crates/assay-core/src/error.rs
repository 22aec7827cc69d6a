//! Error taxonomy for problem loading, grading, and lifecycle operations.
//!
//! Grading errors are recovered by the engine and surfaced to the learner as
//! soft failures. Problem errors are fatal at load time. Engine errors are the
//! failure modes of the public lifecycle operations.

use thiserror::Error;

/// Errors raised by the sandbox service while executing author scripts.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SandboxError {
    #[error("Sandboxed script execution is not available")]
    Unavailable,

    #[error("Script execution failed: {0}")]
    Execution(String),

    #[error("Script produced invalid globals: {0}")]
    InvalidGlobals(String),
}

/// Errors raised by response graders while evaluating answers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GradingError {
    /// The learner-supplied value couldn't be parsed or evaluated.
    #[error("{0}")]
    StudentInput(String),

    /// The grader couldn't complete the evaluation.
    #[error("{0}")]
    Response(String),

    /// The authored problem can't be graded as written.
    #[error("{0}")]
    Problem(String),
}

impl GradingError {
    /// The bare message carried by this error.
    pub fn message(&self) -> &str {
        match self {
            GradingError::StudentInput(msg)
            | GradingError::Response(msg)
            | GradingError::Problem(msg) => msg,
        }
    }

    /// The message shown to a learner without staff access.
    ///
    /// Response errors can carry a script traceback; only the message of
    /// its last line is kept.
    pub fn learner_message(&self) -> &str {
        match self {
            GradingError::Response(msg) => last_line_message(msg),
            other => other.message(),
        }
    }

    /// Short label used in failure events.
    pub fn kind(&self) -> &'static str {
        match self {
            GradingError::StudentInput(_) => "student_input",
            GradingError::Response(_) => "response",
            GradingError::Problem(_) => "problem",
        }
    }
}

/// `"...\nValueError: bad input"` becomes `"bad input"`.
fn last_line_message(msg: &str) -> &str {
    let line = msg
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .unwrap_or(msg);
    match line.split_once(": ") {
        Some((_, rest)) if !rest.trim().is_empty() => rest.trim(),
        _ => line,
    }
}

impl From<SandboxError> for GradingError {
    fn from(err: SandboxError) -> Self {
        GradingError::Response(err.to_string())
    }
}

/// Errors that can occur when loading an authored problem.
#[derive(Error, Debug)]
pub enum ProblemError {
    #[error("Failed to read problem file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Problem schema validation failed: {}", .0.join("; "))]
    Schema(Vec<String>),

    #[error("Problem validation failed: {0}")]
    Validation(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Problem configuration error: {0}")]
    Configuration(String),

    #[error("Problem script failed: {0}")]
    Sandbox(#[from] SandboxError),
}

/// Errors returned by the lifecycle engine's public operations.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Operation preconditions not met (closed, unreset, unavailable).
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    RescoreUnsupported(String),

    #[error("Grading failed: {0}")]
    Grading(#[from] GradingError),

    #[error("Problem error: {0}")]
    Problem(#[from] ProblemError),

    #[error("Field store error: {0}")]
    Store(String),

    #[error("Stale attempt state: {0}")]
    Conflict(String),

    #[error("Render error: {0}")]
    Render(String),
}

impl From<crate::services::StoreError> for EngineError {
    fn from(err: crate::services::StoreError) -> Self {
        EngineError::Store(err.to_string())
    }
}

impl From<crate::services::RenderError> for EngineError {
    fn from(err: crate::services::RenderError) -> Self {
        EngineError::Render(err.to_string())
    }
}
