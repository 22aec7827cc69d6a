//! Dropdown (option) grading.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::collections::BTreeMap;

use super::feedback::single_hint;
use super::{GraderBase, GradingContext, ResponseGrader};
use crate::correctness::{Correctness, CorrectnessEntry, CorrectnessMap};
use crate::error::{GradingError, ProblemError};
use crate::problem::definition::InputSpec;
use crate::script::ScriptContext;
use crate::types::StudentAnswers;

/// One entry of a dropdown input.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DropdownOption {
    pub text: String,

    #[serde(default)]
    pub correct: bool,

    #[serde(default)]
    pub hint: Option<String>,
}

/// Dropdown responses carry their options on the inputs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DropdownSpec {}

#[derive(Debug, Clone, PartialEq)]
struct DropdownInput {
    id: String,
    options: Vec<DropdownOption>,
    correct: String,
    answervariable: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DropdownGrader {
    base: GraderBase,
    inputs: Vec<DropdownInput>,
}

impl DropdownGrader {
    pub fn new(
        base: GraderBase,
        specs: &[InputSpec],
        script: &ScriptContext,
    ) -> Result<Self, ProblemError> {
        let mut inputs = Vec::with_capacity(base.inputs.len());
        for (binding, spec) in base.inputs.iter().zip(specs) {
            let correct: Vec<&DropdownOption> = spec.options.iter().filter(|o| o.correct).collect();
            let raw = match correct.as_slice() {
                [only] => only.text.trim().to_string(),
                [] => {
                    return Err(ProblemError::Validation(format!(
                        "Dropdown input {} has no correct option",
                        binding.id
                    )))
                }
                _ => {
                    return Err(ProblemError::Validation(
                        "Dropdown questions can only have one correct answer.".to_string(),
                    ))
                }
            };

            let options = spec
                .options
                .iter()
                .map(|o| DropdownOption {
                    text: script.contextualize(o.text.trim()),
                    correct: o.correct,
                    hint: o.hint.clone(),
                })
                .collect();

            inputs.push(DropdownInput {
                id: binding.id.clone(),
                options,
                correct: script.contextualize(&raw),
                answervariable: raw.starts_with('$').then(|| raw.clone()),
            });
        }
        Ok(Self { base, inputs })
    }

    pub fn display_context(&self) -> JsonValue {
        JsonValue::Array(
            self.inputs
                .iter()
                .map(|input| {
                    json!({
                        "id": input.id,
                        "options": input.options.iter().map(|o| o.text.clone()).collect::<Vec<_>>(),
                    })
                })
                .collect(),
        )
    }
}

impl ResponseGrader for DropdownGrader {
    fn base(&self) -> &GraderBase {
        &self.base
    }

    fn evaluate_answers(
        &self,
        answers: &StudentAnswers,
        _old: &CorrectnessMap,
        _ctx: &mut GradingContext<'_>,
    ) -> Result<CorrectnessMap, GradingError> {
        let mut map = CorrectnessMap::new();
        for input in &self.inputs {
            let given = answers
                .get(&input.id)
                .map(|a| a.display().trim().to_string())
                .unwrap_or_default();

            let verdict = if !given.is_empty() && given == input.correct {
                Correctness::Correct
            } else {
                Correctness::Incorrect
            };
            let mut entry = CorrectnessEntry::new(verdict);
            if let Some(variable) = &input.answervariable {
                entry = entry.with_answervariable(variable.clone());
            }
            if let Some(option) = input.options.iter().find(|o| o.text == given) {
                if let Some(hint) = &option.hint {
                    entry.msg.push_str(&single_hint(hint, option.correct));
                }
            }
            map.set(input.id.clone(), entry);
        }
        Ok(map)
    }

    fn get_answers(&self) -> BTreeMap<String, JsonValue> {
        self.inputs
            .iter()
            .map(|input| (input.id.clone(), JsonValue::String(input.correct.clone())))
            .collect()
    }
}
