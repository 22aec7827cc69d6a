//! Multiple-choice grading with shuffle, answer pools, and name masking.
//!
//! Shuffle and answer-pool permutations are drawn from the problem-wide
//! generator so that several choice groups in one problem don't all land the
//! correct choice in the same slot. When either is active the choices are
//! shown under masked names (`mask_N`) and unmasked again for analytics.

use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value as JsonValue};
use std::collections::BTreeMap;

use super::feedback::single_hint;
use super::{parse_credit_types, GraderBase, GradingContext, ResponseGrader};
use crate::correctness::{Correctness, CorrectnessEntry, CorrectnessMap};
use crate::error::{GradingError, ProblemError};
use crate::script::ScriptContext;
use crate::types::{AnswerValue, StudentAnswers};

const DEFAULT_POINT_VALUE: f64 = 0.5;

/// Authored correctness of a choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChoiceCorrectness {
    True,
    #[default]
    False,
    /// Worth `point_value` under `partial_credit: points`.
    Partial,
}

impl ChoiceCorrectness {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "true" => ChoiceCorrectness::True,
            "partial" => ChoiceCorrectness::Partial,
            _ => ChoiceCorrectness::False,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChoiceCorrectness::True => "true",
            ChoiceCorrectness::False => "false",
            ChoiceCorrectness::Partial => "partial",
        }
    }
}

impl Serialize for ChoiceCorrectness {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ChoiceCorrectness {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Flag(bool),
            Text(String),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Flag(true) => ChoiceCorrectness::True,
            Repr::Flag(false) => ChoiceCorrectness::False,
            Repr::Text(text) => ChoiceCorrectness::parse(&text),
        })
    }
}

/// An authored choice.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChoiceOption {
    /// Name suffix; unnamed choices are numbered in order.
    #[serde(default)]
    pub name: Option<String>,

    pub text: String,

    #[serde(default)]
    pub correct: ChoiceCorrectness,

    #[serde(default)]
    pub point_value: Option<f64>,

    #[serde(default)]
    pub hint: Option<String>,

    /// Solution shown when this choice is the pooled correct answer.
    #[serde(default)]
    pub explanation_id: Option<String>,

    /// Held in place by shuffling when at the head or tail.
    #[serde(default)]
    pub fixed: bool,
}

/// Authored multiple-choice response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChoiceSpec {
    pub choices: Vec<ChoiceOption>,

    #[serde(default)]
    pub shuffle: bool,

    /// Number of choices shown: one correct plus the rest incorrect.
    #[serde(default)]
    pub answer_pool: Option<usize>,

    #[serde(default)]
    pub partial_credit: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
struct Choice {
    canonical: String,
    display: String,
    text: String,
    correct: ChoiceCorrectness,
    point_value: f64,
    hint: Option<String>,
    explanation_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChoiceGrader {
    base: GraderBase,
    /// Displayed choices, in display order.
    choices: Vec<Choice>,
    shuffled: bool,
    pooled: bool,
    points_credit: bool,
    selected_explanation: Option<String>,
}

impl ChoiceGrader {
    pub fn new(
        spec: &ChoiceSpec,
        base: GraderBase,
        script: &ScriptContext,
        rng: &mut ChaCha20Rng,
    ) -> Result<Self, ProblemError> {
        let pool_size = spec.answer_pool.unwrap_or(0);
        if spec.shuffle && pool_size > 0 {
            return Err(ProblemError::Configuration(
                "Do not use shuffle and answer-pool at the same time".to_string(),
            ));
        }
        let credit = parse_credit_types(spec.partial_credit.as_deref(), &["points"])?;

        let mut unnamed = 0;
        let all: Vec<Choice> = spec
            .choices
            .iter()
            .map(|option| {
                let canonical = match &option.name {
                    Some(name) => format!("choice_{}", name),
                    None => {
                        let name = format!("choice_{}", unnamed);
                        unnamed += 1;
                        name
                    }
                };
                Choice {
                    display: canonical.clone(),
                    canonical,
                    text: script.contextualize(&option.text),
                    correct: option.correct,
                    point_value: option.point_value.unwrap_or(DEFAULT_POINT_VALUE),
                    hint: option.hint.clone(),
                    explanation_id: option.explanation_id.clone(),
                }
            })
            .collect();

        let mut order: Vec<usize> = (0..all.len()).collect();
        let mut selected_explanation = None;

        if spec.shuffle {
            order = shuffle_with_fixed(&spec.choices, rng);
        } else if pool_size > 0 {
            let (picked, explanation) = sample_answer_pool(&all, pool_size, rng)?;
            order = picked;
            selected_explanation = explanation;
        }

        let masked = spec.shuffle || pool_size > 0;
        let mut mask_ids: Vec<usize> = (0..all.len()).collect();
        if masked {
            mask_ids.shuffle(rng);
        }

        let choices = order
            .into_iter()
            .map(|index| {
                let mut choice = all[index].clone();
                if masked {
                    choice.display = format!("mask_{}", mask_ids[index]);
                }
                choice
            })
            .collect();

        Ok(Self {
            base,
            choices,
            shuffled: spec.shuffle,
            pooled: pool_size > 0,
            points_credit: !credit.is_empty(),
            selected_explanation,
        })
    }

    pub fn selected_explanation(&self) -> Option<&str> {
        self.selected_explanation.as_deref()
    }

    /// Displayed name of a canonical choice, if it is shown.
    pub fn display_name(&self, canonical: &str) -> Option<&str> {
        self.choices
            .iter()
            .find(|c| c.canonical == canonical)
            .map(|c| c.display.as_str())
    }

    fn find_displayed(&self, display: &str) -> Option<&Choice> {
        self.choices.iter().find(|c| c.display == display)
    }

    pub fn display_context(&self) -> JsonValue {
        JsonValue::Array(
            self.choices
                .iter()
                .map(|c| json!({ "name": c.display, "text": c.text }))
                .collect(),
        )
    }
}

/// Shuffle the middle run of choices, keeping fixed head and tail runs.
///
/// A fixed choice stranded in the middle joins the tail.
fn shuffle_with_fixed(options: &[ChoiceOption], rng: &mut ChaCha20Rng) -> Vec<usize> {
    let mut head = Vec::new();
    let mut middle = Vec::new();
    let mut tail = Vec::new();
    let mut at_head = true;

    for (index, option) in options.iter().enumerate() {
        if at_head && option.fixed {
            head.push(index);
            continue;
        }
        at_head = false;
        if option.fixed {
            tail.push(index);
        } else {
            middle.push(index);
        }
    }

    middle.shuffle(rng);
    head.into_iter().chain(middle).chain(tail).collect()
}

/// Pick one correct choice and up to `size - 1` incorrect ones.
fn sample_answer_pool(
    all: &[Choice],
    size: usize,
    rng: &mut ChaCha20Rng,
) -> Result<(Vec<usize>, Option<String>), ProblemError> {
    let correct: Vec<usize> = (0..all.len())
        .filter(|i| all[*i].correct == ChoiceCorrectness::True)
        .collect();
    let mut incorrect: Vec<usize> = (0..all.len())
        .filter(|i| all[*i].correct != ChoiceCorrectness::True)
        .collect();

    if correct.is_empty() || incorrect.is_empty() {
        return Err(ProblemError::Configuration(
            "Choicegroup must include at least 1 correct and 1 incorrect choice".to_string(),
        ));
    }

    let num_incorrect = (size - 1).min(incorrect.len());
    let chosen = correct[rng.gen_range(0..correct.len())];
    incorrect.shuffle(rng);

    let mut subset = vec![chosen];
    subset.extend(incorrect.into_iter().take(num_incorrect));
    subset.shuffle(rng);

    Ok((subset, all[chosen].explanation_id.clone()))
}

impl ResponseGrader for ChoiceGrader {
    fn base(&self) -> &GraderBase {
        &self.base
    }

    fn evaluate_answers(
        &self,
        answers: &StudentAnswers,
        _old: &CorrectnessMap,
        _ctx: &mut GradingContext<'_>,
    ) -> Result<CorrectnessMap, GradingError> {
        let id = self.base.answer_id();
        let picked = answers
            .get(id)
            .and_then(|a| a.as_list().into_iter().next())
            .and_then(|name| self.find_displayed(&name));

        let mut entry = match picked {
            Some(choice) if choice.correct == ChoiceCorrectness::True => {
                CorrectnessEntry::new(Correctness::Correct)
            }
            Some(choice) if self.points_credit && choice.correct == ChoiceCorrectness::Partial => {
                CorrectnessEntry::new(Correctness::PartiallyCorrect).with_npoints(choice.point_value)
            }
            _ => CorrectnessEntry::new(Correctness::Incorrect),
        };

        if let Some(choice) = picked {
            if let Some(hint) = &choice.hint {
                entry.msg.push_str(&single_hint(
                    hint,
                    choice.correct == ChoiceCorrectness::True,
                ));
            }
        }
        Ok(CorrectnessMap::single(id, entry))
    }

    fn get_answers(&self) -> BTreeMap<String, JsonValue> {
        let correct: Vec<JsonValue> = self
            .choices
            .iter()
            .filter(|c| c.correct == ChoiceCorrectness::True)
            .map(|c| JsonValue::String(c.display.clone()))
            .collect();
        let mut answers = BTreeMap::new();
        answers.insert(self.base.answer_id().to_string(), JsonValue::Array(correct));
        answers
    }

    fn has_mask(&self) -> bool {
        self.shuffled || self.pooled
    }

    fn has_shuffle(&self) -> bool {
        self.shuffled
    }

    fn has_answerpool(&self) -> bool {
        self.pooled
    }

    fn unmask_name(&self, name: &str) -> String {
        self.find_displayed(name)
            .map(|c| c.canonical.clone())
            .unwrap_or_else(|| name.to_string())
    }

    fn unmask_order(&self) -> Vec<String> {
        self.choices.iter().map(|c| c.canonical.clone()).collect()
    }

    fn answer_text(&self, _input_id: &str, answer: &AnswerValue) -> String {
        answer
            .as_list()
            .iter()
            .map(|name| {
                self.find_displayed(name)
                    .map(|c| c.text.clone())
                    .unwrap_or_else(|| name.clone())
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn correct_answer_text(&self, _input_id: &str) -> Option<String> {
        let texts: Vec<&str> = self
            .choices
            .iter()
            .filter(|c| c.correct == ChoiceCorrectness::True)
            .map(|c| c.text.as_str())
            .collect();
        if texts.is_empty() {
            None
        } else {
            Some(texts.join(", "))
        }
    }
}
