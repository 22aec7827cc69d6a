//! Per-learner attempt state and its field-store encoding.
//!
//! Each attribute lives in its own store field. Writes go through an
//! optimistic check on `attempts`: the value read at load time must still be
//! in the store, otherwise a concurrent submit got there first.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use crate::correctness::CorrectnessMap;
use crate::error::EngineError;
use crate::problem::{AuthoredProblem, ProblemState};
use crate::services::{FieldStore, StoreError};
use crate::types::{InputState, Score, StudentAnswers};

pub const FIELD_SEED: &str = "seed";
pub const FIELD_ATTEMPTS: &str = "attempts";
pub const FIELD_DONE: &str = "done";
pub const FIELD_HAS_SAVED_ANSWERS: &str = "has_saved_answers";
pub const FIELD_STUDENT_ANSWERS: &str = "student_answers";
pub const FIELD_CORRECT_MAP: &str = "correct_map";
pub const FIELD_CORRECT_MAP_HISTORY: &str = "correct_map_history";
pub const FIELD_STUDENT_ANSWERS_HISTORY: &str = "student_answers_history";
pub const FIELD_SCORE: &str = "score";
pub const FIELD_SCORE_HISTORY: &str = "score_history";
pub const FIELD_INPUT_STATE: &str = "input_state";
pub const FIELD_LAST_SUBMISSION_TIME: &str = "last_submission_time";

/// Attempt state for one learner on one problem.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AttemptState {
    pub seed: Option<u32>,
    pub attempts: u32,
    pub done: bool,
    pub has_saved_answers: bool,
    pub student_answers: StudentAnswers,
    pub correct_map: CorrectnessMap,
    pub student_answers_history: Vec<StudentAnswers>,
    pub correct_map_history: Vec<CorrectnessMap>,
    pub score: Option<Score>,
    pub score_history: Vec<Score>,
    pub input_state: InputState,
    pub last_submission_time: Option<DateTime<Utc>>,
}

fn read<T: DeserializeOwned + Default>(
    store: &dyn FieldStore,
    field: &str,
) -> Result<T, StoreError> {
    match store.get(field)? {
        None | Some(JsonValue::Null) => Ok(T::default()),
        Some(value) => serde_json::from_value(value).map_err(|e| StoreError::InvalidValue {
            field: field.to_string(),
            message: e.to_string(),
        }),
    }
}

impl AttemptState {
    /// Read every field, defaulting the ones never written.
    pub fn load(store: &dyn FieldStore) -> Result<Self, StoreError> {
        Ok(Self {
            seed: read(store, FIELD_SEED)?,
            attempts: read(store, FIELD_ATTEMPTS)?,
            done: read(store, FIELD_DONE)?,
            has_saved_answers: read(store, FIELD_HAS_SAVED_ANSWERS)?,
            student_answers: read(store, FIELD_STUDENT_ANSWERS)?,
            correct_map: read(store, FIELD_CORRECT_MAP)?,
            student_answers_history: read(store, FIELD_STUDENT_ANSWERS_HISTORY)?,
            correct_map_history: read(store, FIELD_CORRECT_MAP_HISTORY)?,
            score: read(store, FIELD_SCORE)?,
            score_history: read(store, FIELD_SCORE_HISTORY)?,
            input_state: read(store, FIELD_INPUT_STATE)?,
            last_submission_time: read(store, FIELD_LAST_SUBMISSION_TIME)?,
        })
    }

    /// Write every field.
    ///
    /// `expected_attempts` is the raw `attempts` value observed at load time.
    ///
    /// # Errors
    ///
    /// [`EngineError::Conflict`] when the stored attempt count moved since it
    /// was read; nothing is written in that case.
    pub fn save(
        &self,
        store: &dyn FieldStore,
        expected_attempts: Option<&JsonValue>,
    ) -> Result<(), EngineError> {
        let attempts = json!(self.attempts);
        if !store.compare_and_set(FIELD_ATTEMPTS, expected_attempts, attempts)? {
            return Err(EngineError::Conflict(format!(
                "attempts changed since load (expected {})",
                expected_attempts.map_or_else(|| "none".to_string(), |v| v.to_string())
            )));
        }

        let fields = [
            (FIELD_SEED, json!(self.seed)),
            (FIELD_DONE, json!(self.done)),
            (FIELD_HAS_SAVED_ANSWERS, json!(self.has_saved_answers)),
            (FIELD_STUDENT_ANSWERS, json!(self.student_answers)),
            (FIELD_CORRECT_MAP, self.correct_map.get_dict()),
            (FIELD_STUDENT_ANSWERS_HISTORY, json!(self.student_answers_history)),
            (FIELD_CORRECT_MAP_HISTORY, json!(self.correct_map_history)),
            (FIELD_SCORE, json!(self.score)),
            (FIELD_SCORE_HISTORY, json!(self.score_history)),
            (FIELD_INPUT_STATE, json!(self.input_state)),
            (FIELD_LAST_SUBMISSION_TIME, json!(self.last_submission_time)),
        ];
        for (field, value) in fields {
            store.set(field, value)?;
        }
        Ok(())
    }

    /// The part of the state a problem instance is built from.
    pub fn problem_state(&self) -> ProblemState {
        ProblemState {
            student_answers: self.student_answers.clone(),
            correct_map: self.correct_map.clone(),
            done: self.done,
            input_state: self.input_state.clone(),
        }
    }

    /// Copy a problem's learner-facing state back.
    pub fn absorb(&mut self, problem: &AuthoredProblem) {
        self.student_answers = problem.student_answers.clone();
        self.correct_map = problem.correct_map.clone();
        self.done = problem.done;
        self.input_state = problem.input_state.clone();
    }

    /// Clear everything a reset discards; counters and histories stay.
    pub fn clear_answers(&mut self) {
        self.student_answers.clear();
        self.correct_map = CorrectnessMap::new();
        self.done = false;
        self.has_saved_answers = false;
        self.input_state.clear();
    }

    /// Summary recorded in reset events.
    pub fn summary(&self) -> JsonValue {
        json!({
            "seed": self.seed,
            "attempts": self.attempts,
            "done": self.done,
            "student_answers": self.student_answers,
            "correct_map": self.correct_map.get_dict(),
            "input_state": self.input_state,
        })
    }
}
