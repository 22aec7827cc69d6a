//! Author script execution and the resulting evaluation context.
//!
//! A problem's embedded scripts run once, with the problem seed, through the
//! [`Sandbox`] service. The globals they leave behind become the context that
//! graders evaluate against: numeric answers may name a script variable, and
//! custom graders call script functions.
//!
//! Results are cached on (script digest, seed) when the sandbox is a real
//! isolation boundary. When unsafe code is permitted the script may have side
//! effects, so every build executes it afresh.

use lazy_static::lazy_static;
use moka::sync::Cache;
use regex::Regex;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::error::SandboxError;
use crate::services::{Globals, Sandbox};

lazy_static! {
    static ref VARIABLE_REF: Regex =
        Regex::new(r"\$(?:\{(?P<braced>[A-Za-z_][A-Za-z0-9_]*)\}|(?P<bare>[A-Za-z_][A-Za-z0-9_]*))")
            .expect("variable reference pattern is valid");
}

/// Cache of sandbox results keyed by script digest and seed.
#[derive(Clone)]
pub struct ScriptCache {
    cache: Cache<(String, u32), Arc<Globals>>,
}

impl std::fmt::Debug for ScriptCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptCache")
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

impl ScriptCache {
    /// Create a new cache with the given capacity and time-to-live.
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();
        Self { cache }
    }

    pub fn get(&self, digest: &str, seed: u32) -> Option<Arc<Globals>> {
        self.cache.get(&(digest.to_string(), seed))
    }

    pub fn insert(&self, digest: &str, seed: u32, globals: Arc<Globals>) {
        self.cache.insert((digest.to_string(), seed), globals);
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for ScriptCache {
    fn default() -> Self {
        Self::new(10_000, Duration::from_secs(3600))
    }
}

/// Name bindings produced by a problem's scripts under one seed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScriptContext {
    pub seed: u32,
    /// Concatenated script source, kept for graders that call into it.
    pub script_code: String,
    bindings: Arc<Globals>,
}

impl ScriptContext {
    /// Context for a problem without scripts.
    pub fn empty(seed: u32) -> Self {
        Self {
            seed,
            script_code: String::new(),
            bindings: Arc::new(base_globals(seed)),
        }
    }

    /// Context over bindings computed elsewhere.
    pub fn with_bindings(seed: u32, bindings: Globals) -> Self {
        let mut all = base_globals(seed);
        all.extend(bindings);
        Self {
            seed,
            script_code: String::new(),
            bindings: Arc::new(all),
        }
    }

    /// Execute `code` under `seed` and capture the resulting bindings.
    ///
    /// Empty code never reaches the sandbox.
    ///
    /// # Errors
    ///
    /// Returns the sandbox's error when execution fails.
    pub fn build(
        code: &str,
        seed: u32,
        sandbox: &dyn Sandbox,
        cache: Option<&ScriptCache>,
    ) -> Result<Self, SandboxError> {
        if code.trim().is_empty() {
            return Ok(Self::empty(seed));
        }

        let cache = cache.filter(|_| !sandbox.can_execute_unsafe_code());
        let digest = script_digest(code);

        if let Some(hit) = cache.and_then(|c| c.get(&digest, seed)) {
            tracing::debug!(seed, digest = %digest, "Script context cache hit");
            return Ok(Self {
                seed,
                script_code: code.to_string(),
                bindings: hit,
            });
        }

        let globals = sandbox.execute(code, base_globals(seed), None)?;
        let bindings = Arc::new(globals);
        if let Some(cache) = cache {
            cache.insert(&digest, seed, bindings.clone());
        }

        Ok(Self {
            seed,
            script_code: code.to_string(),
            bindings,
        })
    }

    pub fn has_script(&self) -> bool {
        !self.script_code.trim().is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&JsonValue> {
        self.bindings.get(name)
    }

    pub fn bindings(&self) -> &Globals {
        &self.bindings
    }

    /// Numeric value of a binding, if it has one.
    pub fn get_number(&self, name: &str) -> Option<f64> {
        match self.bindings.get(name)? {
            JsonValue::Number(n) => n.as_f64(),
            JsonValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Replace `$name` and `${name}` references with bound values.
    ///
    /// Unbound references are left as written.
    pub fn contextualize(&self, text: &str) -> String {
        if !text.contains('$') {
            return text.to_string();
        }

        VARIABLE_REF
            .replace_all(text, |caps: &regex::Captures<'_>| {
                let name = caps
                    .name("braced")
                    .or_else(|| caps.name("bare"))
                    .map(|m| m.as_str())
                    .unwrap_or_default();
                match self.bindings.get(name) {
                    Some(JsonValue::String(s)) => s.clone(),
                    Some(JsonValue::Null) | None => caps[0].to_string(),
                    Some(other) => other.to_string(),
                }
            })
            .into_owned()
    }
}

/// Globals every script starts with.
pub fn base_globals(seed: u32) -> Globals {
    let mut globals = Globals::new();
    globals.insert("seed".to_string(), JsonValue::from(seed));
    globals.insert("random_seed".to_string(), JsonValue::from(seed));
    globals
}

fn script_digest(code: &str) -> String {
    hex::encode(Sha256::digest(code.as_bytes()))
}
