//! Core value types shared across the engine.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Raw points earned against raw points possible.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Score {
    pub raw_earned: f64,
    pub raw_possible: f64,
}

impl Score {
    /// Create a score.
    pub fn new(raw_earned: f64, raw_possible: f64) -> Self {
        Self {
            raw_earned,
            raw_possible,
        }
    }

    /// Whether every possible point was earned.
    pub fn is_full(&self) -> bool {
        self.raw_possible > 0.0 && self.raw_earned >= self.raw_possible
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.raw_earned, self.raw_possible)
    }
}

/// An uploaded file, opaque to the engine.
///
/// `location` is whatever the host uses to find the bytes again (a path,
/// an object-store key). The runtime reads it when dispatching to a queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHandle {
    pub filename: String,
    pub location: String,
}

/// A raw submitted value for one input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Text(String),
    List(Vec<String>),
    Files(Vec<FileHandle>),
    Dict(BTreeMap<String, String>),
}

impl AnswerValue {
    /// The scalar text of this answer, if it is one.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AnswerValue::Text(text) => Some(text),
            _ => None,
        }
    }

    /// The answer as a list of strings. Scalars become a one-element list.
    pub fn as_list(&self) -> Vec<String> {
        match self {
            AnswerValue::Text(text) if text.is_empty() => Vec::new(),
            AnswerValue::Text(text) => vec![text.clone()],
            AnswerValue::List(items) => items.clone(),
            AnswerValue::Files(files) => files.iter().map(|f| f.filename.clone()).collect(),
            AnswerValue::Dict(map) => map.values().cloned().collect(),
        }
    }

    /// Uploaded files carried by this answer.
    pub fn files(&self) -> &[FileHandle] {
        match self {
            AnswerValue::Files(files) => files,
            _ => &[],
        }
    }

    pub fn is_files(&self) -> bool {
        matches!(self, AnswerValue::Files(_))
    }

    pub fn is_empty(&self) -> bool {
        match self {
            AnswerValue::Text(text) => text.trim().is_empty(),
            AnswerValue::List(items) => items.is_empty(),
            AnswerValue::Files(files) => files.is_empty(),
            AnswerValue::Dict(map) => map.is_empty(),
        }
    }

    /// Replace file handles with their filenames, for history and events.
    pub fn without_files(&self) -> AnswerValue {
        match self {
            AnswerValue::Files(files) => {
                AnswerValue::List(files.iter().map(|f| f.filename.clone()).collect())
            }
            other => other.clone(),
        }
    }

    /// Flat display form used in analytics.
    pub fn display(&self) -> String {
        match self {
            AnswerValue::Text(text) => text.clone(),
            other => other.as_list().join(", "),
        }
    }
}

impl From<&str> for AnswerValue {
    fn from(value: &str) -> Self {
        AnswerValue::Text(value.to_string())
    }
}

impl From<String> for AnswerValue {
    fn from(value: String) -> Self {
        AnswerValue::Text(value)
    }
}

impl From<Vec<&str>> for AnswerValue {
    fn from(values: Vec<&str>) -> Self {
        AnswerValue::List(values.into_iter().map(String::from).collect())
    }
}

/// Submitted answers keyed by input id.
pub type StudentAnswers = BTreeMap<String, AnswerValue>;

/// Opaque per-input ancillary state (queue tokens, ungraded queue replies).
pub type InputState = BTreeMap<String, serde_json::Value>;

/// Strip file handles from a whole answer set.
pub fn answers_without_files(answers: &StudentAnswers) -> StudentAnswers {
    answers
        .iter()
        .map(|(id, value)| (id.clone(), value.without_files()))
        .collect()
}
