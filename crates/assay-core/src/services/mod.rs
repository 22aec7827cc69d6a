//! Collaborator services consumed by the engine.
//!
//! The engine never touches storage, templates, analytics sinks, or script
//! execution directly. Hosts supply implementations of the traits here; the
//! [`memory`] module carries in-process implementations used by tests and by
//! hosts that don't need anything richer.
//!
//! ## Services
//!
//! - [`FieldStore`]: per-learner persisted state fields
//! - [`RenderService`]: template rendering and URL rewriting
//! - [`EventPublisher`]: fire-and-forget analytics events
//! - [`Sandbox`]: isolated execution of author scripts
//! - [`Clock`]: current time

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::error::SandboxError;
use crate::types::FileHandle;

pub mod memory;

pub use memory::{
    FixedClock, MemoryFieldStore, NoSandbox, RecordingPublisher, SystemClock, TemplateRenderer,
    TracingPublisher,
};

/// Name bindings passed into and returned from a sandbox run.
pub type Globals = serde_json::Map<String, JsonValue>;

/// Errors from the field store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Field store unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid value for field '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

/// Errors from the render service.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    #[error("Unknown template: {0}")]
    UnknownTemplate(String),

    #[error("Template '{name}' failed: {message}")]
    Failed { name: String, message: String },
}

/// Per-learner key-value store for attempt state fields.
pub trait FieldStore: Send + Sync {
    /// Read a field; `None` when never written.
    fn get(&self, field: &str) -> Result<Option<JsonValue>, StoreError>;

    fn set(&self, field: &str, value: JsonValue) -> Result<(), StoreError>;

    /// Write `value` only if the field currently equals `expected`.
    ///
    /// Returns `false` without writing when the stored value differs.
    fn compare_and_set(
        &self,
        field: &str,
        expected: Option<&JsonValue>,
        value: JsonValue,
    ) -> Result<bool, StoreError>;
}

/// Template rendering and URL rewriting.
pub trait RenderService: Send + Sync {
    fn render_template(&self, name: &str, context: &JsonValue) -> Result<String, RenderError>;

    /// Rewrite static and cross-link references in an html fragment.
    fn replace_urls(&self, html: &str) -> String;
}

/// Analytics sink. Publishing must not block or fail the caller.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event_name: &str, payload: JsonValue);
}

/// Isolated executor for author-supplied scripts.
pub trait Sandbox: Send + Sync {
    /// Whether scripts run unsandboxed; such results must not be cached.
    fn can_execute_unsafe_code(&self) -> bool;

    /// Run `code` with the given globals and return the resulting globals.
    ///
    /// `files` are learner uploads the code may read; `None` for author
    /// scripts.
    fn execute(
        &self,
        code: &str,
        globals: Globals,
        files: Option<&[FileHandle]>,
    ) -> Result<Globals, SandboxError>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}
