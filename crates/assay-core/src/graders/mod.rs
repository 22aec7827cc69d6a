//! Response graders.
//!
//! Each authored response owns one or more inputs and a grader that turns the
//! submitted values into a [`CorrectnessMap`]. Grader kinds form a closed set,
//! represented by the [`Grader`] enum; the shared capability surface is the
//! [`ResponseGrader`] trait.
//!
//! ## Kinds
//!
//! | Kind | Grader |
//! |------|--------|
//! | `numerical` | [`NumericalGrader`] |
//! | `multiple_choice` | [`ChoiceGrader`] |
//! | `checkbox` | [`CheckboxGrader`] |
//! | `option` | [`DropdownGrader`] |
//! | `string` | [`StringGrader`] |
//! | `formula` | [`FormulaGrader`] |
//! | `custom` | [`CustomGrader`] |
//! | `code`, `file` | [`QueuedGrader`] |
//! | `image` | [`ImageGrader`] |
//!
//! Graders must be deterministic given the script context and seed. Queued
//! graders are the exception: they emit a submission into the grading
//! context's outbox and mark their input incomplete.

use chrono::{DateTime, Utc};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

use crate::correctness::CorrectnessMap;
use crate::error::{GradingError, ProblemError};
use crate::problem::definition::{GraderSpec, InputSpec};
use crate::queue::QueueSubmission;
use crate::script::ScriptContext;
use crate::services::Sandbox;
use crate::types::{AnswerValue, StudentAnswers};

mod checkbox;
mod choice;
mod custom;
mod dropdown;
pub mod feedback;
mod formula;
mod image;
mod numerical;
mod queued;
mod string;

pub use checkbox::{CheckboxChoice, CheckboxGrader, CheckboxSpec, CompoundHint};
pub use choice::{ChoiceCorrectness, ChoiceGrader, ChoiceOption, ChoiceSpec};
pub use custom::{CustomGrader, CustomSpec};
pub use dropdown::{DropdownGrader, DropdownOption, DropdownSpec};
pub use formula::{FormulaGrader, FormulaSpec};
pub use image::{ImageGrader, ImageSpec};
pub use numerical::{NumericalGrader, NumericalSpec};
pub use queued::{QueuedGrader, QueuedSpec};
pub use string::{StringGrader, StringHint, StringSpec};

/// An alternative accepted answer with optional feedback.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AdditionalAnswer {
    pub answer: String,

    #[serde(default)]
    pub hint: Option<String>,
}

/// An input bound to a grader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputBinding {
    pub id: String,
    pub input_type: String,
    #[serde(default)]
    pub label: Option<String>,
}

/// Identity shared by every grader kind.
#[derive(Debug, Clone, PartialEq)]
pub struct GraderBase {
    pub id: String,
    /// Kind name as authored (`numerical`, `option`, ...).
    pub kind: &'static str,
    pub inputs: Vec<InputBinding>,
    pub label: Option<String>,
}

impl GraderBase {
    pub fn input_ids(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().map(|i| i.id.as_str())
    }

    /// Id of the first input; single-input graders grade only this one.
    pub fn answer_id(&self) -> &str {
        self.inputs.first().map(|i| i.id.as_str()).unwrap_or("")
    }

    pub fn owns_input(&self, input_id: &str) -> bool {
        self.inputs.iter().any(|i| i.id == input_id)
    }
}

/// Queue routing known to the engine.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueueContext {
    pub callback_url: String,
    pub default_queue_name: Option<String>,
    pub anonymous_id: String,
}

/// Per-grading-call context handed to graders.
pub struct GradingContext<'a> {
    pub script: &'a ScriptContext,
    pub sandbox: &'a dyn Sandbox,
    pub seed: u32,
    /// Attempt number this submission will become.
    pub attempt: u32,
    pub now: DateTime<Utc>,
    pub queue: &'a QueueContext,
    /// Submissions emitted by queued graders during this call.
    pub outbox: Vec<QueueSubmission>,
}

impl<'a> GradingContext<'a> {
    pub fn new(
        script: &'a ScriptContext,
        sandbox: &'a dyn Sandbox,
        attempt: u32,
        now: DateTime<Utc>,
        queue: &'a QueueContext,
    ) -> Self {
        Self {
            script,
            sandbox,
            seed: script.seed,
            attempt,
            now,
            queue,
            outbox: Vec::new(),
        }
    }
}

/// Capability surface shared by all grader kinds.
pub trait ResponseGrader {
    fn base(&self) -> &GraderBase;

    /// Grade the submitted answers for this grader's inputs.
    ///
    /// # Arguments
    ///
    /// * `answers` - All submitted answers; graders read only their inputs
    /// * `old` - The correctness map before this submission
    /// * `ctx` - Script bindings, sandbox, clock, and queue routing
    fn evaluate_answers(
        &self,
        answers: &StudentAnswers,
        old: &CorrectnessMap,
        ctx: &mut GradingContext<'_>,
    ) -> Result<CorrectnessMap, GradingError>;

    /// Canonical answer per input, for answer disclosure.
    fn get_answers(&self) -> BTreeMap<String, JsonValue>;

    /// Raw points available; one per graded input.
    fn get_max_score(&self) -> u32 {
        self.base().inputs.len() as u32
    }

    fn supports_rescoring(&self) -> bool {
        true
    }

    fn has_mask(&self) -> bool {
        false
    }

    fn has_shuffle(&self) -> bool {
        false
    }

    fn has_answerpool(&self) -> bool {
        false
    }

    /// Canonical name behind a displayed (possibly masked) name.
    fn unmask_name(&self, name: &str) -> String {
        name.to_string()
    }

    /// Canonical names in display order.
    fn unmask_order(&self) -> Vec<String> {
        Vec::new()
    }

    /// Human-readable form of a learner's answer.
    fn answer_text(&self, _input_id: &str, answer: &AnswerValue) -> String {
        answer.display()
    }

    /// Human-readable form of the correct answer.
    fn correct_answer_text(&self, input_id: &str) -> Option<String> {
        self.get_answers().get(input_id).map(|value| match value {
            JsonValue::String(s) => s.clone(),
            JsonValue::Array(items) => items
                .iter()
                .map(|i| i.as_str().map(String::from).unwrap_or_else(|| i.to_string()))
                .collect::<Vec<_>>()
                .join(", "),
            other => other.to_string(),
        })
    }
}

/// A grader of any kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Grader {
    Numerical(NumericalGrader),
    MultipleChoice(ChoiceGrader),
    Checkbox(CheckboxGrader),
    Dropdown(DropdownGrader),
    StringMatch(StringGrader),
    Formula(FormulaGrader),
    Custom(CustomGrader),
    Queued(QueuedGrader),
    Image(ImageGrader),
}

macro_rules! dispatch {
    ($self:ident, $g:ident => $body:expr) => {
        match $self {
            Grader::Numerical($g) => $body,
            Grader::MultipleChoice($g) => $body,
            Grader::Checkbox($g) => $body,
            Grader::Dropdown($g) => $body,
            Grader::StringMatch($g) => $body,
            Grader::Formula($g) => $body,
            Grader::Custom($g) => $body,
            Grader::Queued($g) => $body,
            Grader::Image($g) => $body,
        }
    };
}

impl ResponseGrader for Grader {
    fn base(&self) -> &GraderBase {
        dispatch!(self, g => g.base())
    }

    fn evaluate_answers(
        &self,
        answers: &StudentAnswers,
        old: &CorrectnessMap,
        ctx: &mut GradingContext<'_>,
    ) -> Result<CorrectnessMap, GradingError> {
        dispatch!(self, g => g.evaluate_answers(answers, old, ctx))
    }

    fn get_answers(&self) -> BTreeMap<String, JsonValue> {
        dispatch!(self, g => g.get_answers())
    }

    fn get_max_score(&self) -> u32 {
        dispatch!(self, g => g.get_max_score())
    }

    fn supports_rescoring(&self) -> bool {
        dispatch!(self, g => g.supports_rescoring())
    }

    fn has_mask(&self) -> bool {
        dispatch!(self, g => g.has_mask())
    }

    fn has_shuffle(&self) -> bool {
        dispatch!(self, g => g.has_shuffle())
    }

    fn has_answerpool(&self) -> bool {
        dispatch!(self, g => g.has_answerpool())
    }

    fn unmask_name(&self, name: &str) -> String {
        dispatch!(self, g => g.unmask_name(name))
    }

    fn unmask_order(&self) -> Vec<String> {
        dispatch!(self, g => g.unmask_order())
    }

    fn answer_text(&self, input_id: &str, answer: &AnswerValue) -> String {
        dispatch!(self, g => g.answer_text(input_id, answer))
    }

    fn correct_answer_text(&self, input_id: &str) -> Option<String> {
        dispatch!(self, g => g.correct_answer_text(input_id))
    }
}

impl Grader {
    /// Materialize a grader from its authored form.
    ///
    /// # Arguments
    ///
    /// * `spec` - The authored grader
    /// * `base` - Grader id and bound inputs, ids already assigned
    /// * `inputs` - The authored inputs, parallel to `base.inputs`
    /// * `script` - Script bindings used to contextualize authored answers
    /// * `rng` - Problem-wide generator for shuffles and answer pools
    pub fn build(
        spec: &GraderSpec,
        base: GraderBase,
        inputs: &[InputSpec],
        script: &ScriptContext,
        rng: &mut ChaCha20Rng,
    ) -> Result<Self, ProblemError> {
        let grader = match spec {
            GraderSpec::Numerical(s) => Grader::Numerical(NumericalGrader::new(s, base, script)?),
            GraderSpec::MultipleChoice(s) => {
                Grader::MultipleChoice(ChoiceGrader::new(s, base, script, rng)?)
            }
            GraderSpec::Checkbox(s) => Grader::Checkbox(CheckboxGrader::new(s, base, script)?),
            GraderSpec::Dropdown(_) => Grader::Dropdown(DropdownGrader::new(base, inputs, script)?),
            GraderSpec::StringMatch(s) => Grader::StringMatch(StringGrader::new(s, base, script)?),
            GraderSpec::Formula(s) => Grader::Formula(FormulaGrader::new(s, base, script)?),
            GraderSpec::Custom(s) => Grader::Custom(CustomGrader::new(s, base, script)?),
            GraderSpec::Code(s) => Grader::Queued(QueuedGrader::new(s, base, false)),
            GraderSpec::File(s) => Grader::Queued(QueuedGrader::new(s, base, true)),
            GraderSpec::Image(_) => Grader::Image(ImageGrader::new(base, inputs)?),
        };
        Ok(grader)
    }

    /// Whether grading goes through the external queue.
    pub fn is_queued(&self) -> bool {
        matches!(self, Grader::Queued(_))
    }

    /// Whether any input accepts uploaded files.
    pub fn accepts_files(&self) -> bool {
        match self {
            Grader::Queued(g) => g.accepts_files(),
            _ => false,
        }
    }

    /// Explanation id of the correct choice picked by an answer pool.
    pub fn selected_explanation(&self) -> Option<&str> {
        match self {
            Grader::MultipleChoice(g) => g.selected_explanation(),
            _ => None,
        }
    }

    /// Rendering data for the grader's inputs, in display order.
    pub fn display_context(&self) -> JsonValue {
        match self {
            Grader::MultipleChoice(g) => g.display_context(),
            Grader::Checkbox(g) => g.display_context(),
            Grader::Dropdown(g) => g.display_context(),
            _ => JsonValue::Null,
        }
    }
}

/// Map a calculator failure on a learner's expression to a grading error.
pub(crate) fn student_calc_error(input: &str, err: crate::calc::CalcError) -> GradingError {
    use crate::calc::CalcError;
    let escaped = feedback::html_escape(input);
    match err {
        CalcError::UndefinedVariable(_)
        | CalcError::UndefinedFunction(_)
        | CalcError::UnmatchedParenthesis => GradingError::StudentInput(err.to_string()),
        CalcError::Syntax(_) => {
            GradingError::StudentInput(format!("Invalid math syntax: '{}'", escaped))
        }
        CalcError::Domain(ref name) if name.starts_with("fact") => GradingError::StudentInput(
            format!("Factorial function evaluated outside its domain:'{}'", escaped),
        ),
        CalcError::Domain(_) | CalcError::Empty => GradingError::StudentInput(format!(
            "Could not interpret '{}' as a number.",
            escaped
        )),
    }
}

/// Parse a comma-separated `partial_credit` attribute; `false` means none.
pub(crate) fn parse_credit_types(
    raw: Option<&str>,
    allowed: &[&str],
) -> Result<Vec<String>, ProblemError> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    let types: Vec<String> = raw
        .split(',')
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty() && t != "false")
        .collect();
    for credit in &types {
        if !allowed.contains(&credit.as_str()) {
            return Err(ProblemError::Configuration(format!(
                "partial_credit attribute should be one of: {}",
                allowed.join(",")
            )));
        }
    }
    Ok(types)
}
