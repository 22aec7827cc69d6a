//! In-process service implementations.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::collections::HashMap;

use super::{
    Clock, EventPublisher, FieldStore, Globals, RenderError, RenderService, Sandbox, StoreError,
};
use crate::error::SandboxError;
use crate::types::FileHandle;

// ============================================================================
// Field store
// ============================================================================

/// Field store backed by a mutex-guarded map.
#[derive(Debug, Default)]
pub struct MemoryFieldStore {
    fields: Mutex<HashMap<String, JsonValue>>,
}

impl MemoryFieldStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored field.
    pub fn snapshot(&self) -> HashMap<String, JsonValue> {
        self.fields.lock().clone()
    }
}

impl FieldStore for MemoryFieldStore {
    fn get(&self, field: &str) -> Result<Option<JsonValue>, StoreError> {
        Ok(self.fields.lock().get(field).cloned())
    }

    fn set(&self, field: &str, value: JsonValue) -> Result<(), StoreError> {
        self.fields.lock().insert(field.to_string(), value);
        Ok(())
    }

    fn compare_and_set(
        &self,
        field: &str,
        expected: Option<&JsonValue>,
        value: JsonValue,
    ) -> Result<bool, StoreError> {
        let mut fields = self.fields.lock();
        if fields.get(field) != expected {
            return Ok(false);
        }
        fields.insert(field.to_string(), value);
        Ok(true)
    }
}

// ============================================================================
// Event publishers
// ============================================================================

/// Publisher that keeps every event for later inspection.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<(String, JsonValue)>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, JsonValue)> {
        self.events.lock().clone()
    }

    /// Payloads of every event with the given name, oldest first.
    pub fn named(&self, name: &str) -> Vec<JsonValue> {
        self.events
            .lock()
            .iter()
            .filter(|(event, _)| event == name)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, event_name: &str, payload: JsonValue) {
        self.events.lock().push((event_name.to_string(), payload));
    }
}

/// Publisher that emits events as tracing records.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPublisher;

impl EventPublisher for TracingPublisher {
    fn publish(&self, event_name: &str, payload: JsonValue) {
        tracing::info!(event = event_name, payload = %payload, "Problem event");
    }
}

// ============================================================================
// Rendering
// ============================================================================

/// Renderer with `{key}` substitution templates.
///
/// Unregistered templates render as a generic `<div>` dump of their context
/// unless the renderer is strict, in which case they fail.
#[derive(Debug, Default)]
pub struct TemplateRenderer {
    templates: HashMap<String, String>,
    static_prefix: Option<String>,
    strict: bool,
}

impl TemplateRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail on templates that were not registered.
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    pub fn with_template(mut self, name: impl Into<String>, body: impl Into<String>) -> Self {
        self.templates.insert(name.into(), body.into());
        self
    }

    /// Rewrite `/static/` references under this prefix.
    pub fn with_static_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.static_prefix = Some(prefix.into());
        self
    }

    fn substitute(body: &str, context: &JsonValue) -> String {
        let mut out = body.to_string();
        if let JsonValue::Object(map) = context {
            for (key, value) in map {
                let text = match value {
                    JsonValue::String(s) => s.clone(),
                    other => other.to_string(),
                };
                out = out.replace(&format!("{{{}}}", key), &text);
            }
        }
        out
    }
}

impl RenderService for TemplateRenderer {
    fn render_template(&self, name: &str, context: &JsonValue) -> Result<String, RenderError> {
        match self.templates.get(name) {
            Some(body) => Ok(Self::substitute(body, context)),
            None if self.strict => Err(RenderError::UnknownTemplate(name.to_string())),
            None => Ok(format!(
                "<div class=\"{}\">{}</div>",
                name.trim_end_matches(".html"),
                context
            )),
        }
    }

    fn replace_urls(&self, html: &str) -> String {
        match &self.static_prefix {
            Some(prefix) => html
                .replace("\"/static/", &format!("\"{}/", prefix.trim_end_matches('/')))
                .replace("'/static/", &format!("'{}/", prefix.trim_end_matches('/'))),
            None => html.to_string(),
        }
    }
}

// ============================================================================
// Clocks
// ============================================================================

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

// ============================================================================
// Sandbox
// ============================================================================

/// Build variant without script execution.
///
/// Problems that need a script or a custom grader fail against it.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSandbox;

impl Sandbox for NoSandbox {
    fn can_execute_unsafe_code(&self) -> bool {
        false
    }

    fn execute(
        &self,
        _code: &str,
        _globals: Globals,
        _files: Option<&[FileHandle]>,
    ) -> Result<Globals, SandboxError> {
        Err(SandboxError::Unavailable)
    }
}
