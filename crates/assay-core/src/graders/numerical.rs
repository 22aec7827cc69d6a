//! Numerical response grading.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

use super::feedback::single_hint;
use super::{
    parse_credit_types, student_calc_error, AdditionalAnswer, GraderBase, GradingContext,
    ResponseGrader,
};
use crate::calc::{evaluate, Tolerance};
use crate::correctness::{Correctness, CorrectnessEntry, CorrectnessMap};
use crate::error::{GradingError, ProblemError};
use crate::script::ScriptContext;
use crate::types::StudentAnswers;

const STAFF_ANSWER_ERROR: &str = "There was a problem with the staff answer to this problem.";
const PARTIAL_SCORE: f64 = 0.5;
const DEFAULT_PARTIAL_RANGE: f64 = 2.0;

/// Authored numerical response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NumericalSpec {
    /// A number or expression, or a range such as `[1, 2)`.
    pub answer: String,

    #[serde(default)]
    pub tolerance: Option<String>,

    /// Comma-separated subset of `close` and `list`.
    #[serde(default)]
    pub partial_credit: Option<String>,

    /// Tolerance multiplier for `close` credit.
    #[serde(default)]
    pub partial_range: Option<f64>,

    #[serde(default)]
    pub partial_answers: Vec<String>,

    #[serde(default)]
    pub additional_answers: Vec<AdditionalAnswer>,

    #[serde(default)]
    pub correct_hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
enum NumericAnswer {
    Exact(String),
    Range {
        bounds: [String; 2],
        inclusive: [bool; 2],
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct NumericalGrader {
    base: GraderBase,
    answer: NumericAnswer,
    display_answer: String,
    tolerance: Tolerance,
    credit: Vec<String>,
    partial_range: f64,
    partial_answers: Vec<String>,
    additional_answers: Vec<AdditionalAnswer>,
    correct_hint: Option<String>,
}

impl NumericalGrader {
    pub fn new(
        spec: &NumericalSpec,
        base: GraderBase,
        script: &ScriptContext,
    ) -> Result<Self, ProblemError> {
        let raw = spec.answer.trim();
        let (answer, display_answer) = if (raw.starts_with('[') || raw.starts_with('('))
            && (raw.ends_with(']') || raw.ends_with(')'))
            && raw.len() >= 2
        {
            let inner = &raw[1..raw.len() - 1];
            let parts: Vec<String> = inner
                .split(',')
                .map(|p| script.contextualize(p.trim()))
                .collect();
            if parts.len() != 2 {
                return Err(ProblemError::Configuration(STAFF_ANSWER_ERROR.to_string()));
            }
            let display = format!(
                "{}{}, {}{}",
                &raw[..1],
                parts[0],
                parts[1],
                &raw[raw.len() - 1..]
            );
            (
                NumericAnswer::Range {
                    bounds: [parts[0].clone(), parts[1].clone()],
                    inclusive: [raw.starts_with('['), raw.ends_with(']')],
                },
                display,
            )
        } else {
            let exact = script.contextualize(raw);
            (NumericAnswer::Exact(exact.clone()), exact)
        };

        let tolerance = match &spec.tolerance {
            Some(t) => Tolerance::parse(&script.contextualize(t)).map_err(|e| {
                ProblemError::Configuration(format!("Invalid tolerance '{}': {}", t, e))
            })?,
            None => Tolerance::default(),
        };

        Ok(Self {
            base,
            answer,
            display_answer,
            tolerance,
            credit: parse_credit_types(spec.partial_credit.as_deref(), &["list", "close"])?,
            partial_range: spec.partial_range.unwrap_or(DEFAULT_PARTIAL_RANGE),
            partial_answers: spec
                .partial_answers
                .iter()
                .map(|a| script.contextualize(a.trim()))
                .collect(),
            additional_answers: spec
                .additional_answers
                .iter()
                .map(|a| AdditionalAnswer {
                    answer: script.contextualize(a.answer.trim()),
                    hint: a.hint.clone(),
                })
                .collect(),
            correct_hint: spec.correct_hint.clone(),
        })
    }

    fn staff_value(answer: &str) -> Result<f64, GradingError> {
        evaluate(answer, &BTreeMap::new(), true)
            .map_err(|_| GradingError::StudentInput(STAFF_ANSWER_ERROR.to_string()))
    }

    fn has_credit(&self, kind: &str) -> bool {
        self.credit.iter().any(|c| c == kind)
    }

    fn grade_range(
        &self,
        student: f64,
        bounds: &[String; 2],
        inclusive: &[bool; 2],
    ) -> Result<(Correctness, f64), GradingError> {
        let lower = Self::staff_value(&bounds[0])?;
        let upper = Self::staff_value(&bounds[1])?;
        let edge = Tolerance::Relative(f64::EPSILON);

        for (boundary, include) in [(lower, inclusive[0]), (upper, inclusive[1])] {
            if edge.accepts(student, boundary) {
                let verdict = if include {
                    Correctness::Correct
                } else {
                    Correctness::Incorrect
                };
                return Ok((verdict, PARTIAL_SCORE));
            }
        }

        if lower < student && student < upper {
            return Ok((Correctness::Correct, PARTIAL_SCORE));
        }

        if self.has_credit("close") {
            let width = upper - lower;
            let low = lower - self.partial_range * width;
            let high = upper + self.partial_range * width;
            if low < student && student < high {
                return Ok((Correctness::PartiallyCorrect, PARTIAL_SCORE));
            }
        }
        Ok((Correctness::Incorrect, PARTIAL_SCORE))
    }

    fn grade_exact(&self, student: f64, answer: &str) -> Result<(Correctness, f64), GradingError> {
        let correct = Self::staff_value(answer)?;
        if self.tolerance.accepts(student, correct) {
            return Ok((Correctness::Correct, PARTIAL_SCORE));
        }

        let expanded = self.tolerance.scaled(self.partial_range);
        if self.has_credit("list") {
            for partial in &self.partial_answers {
                let value = Self::staff_value(partial)?;
                if self.tolerance.accepts(student, value) {
                    return Ok((Correctness::PartiallyCorrect, PARTIAL_SCORE));
                }
            }
            if self.has_credit("close") {
                if expanded.accepts(student, correct) {
                    return Ok((Correctness::PartiallyCorrect, PARTIAL_SCORE));
                }
                for partial in &self.partial_answers {
                    let value = Self::staff_value(partial)?;
                    if expanded.accepts(student, value) {
                        return Ok((Correctness::PartiallyCorrect, PARTIAL_SCORE * PARTIAL_SCORE));
                    }
                }
            }
        } else if self.has_credit("close") && expanded.accepts(student, correct) {
            return Ok((Correctness::PartiallyCorrect, PARTIAL_SCORE));
        }
        Ok((Correctness::Incorrect, PARTIAL_SCORE))
    }
}

impl ResponseGrader for NumericalGrader {
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
        let Some(answer) = answers.get(id) else {
            return Ok(CorrectnessMap::single(
                id,
                CorrectnessEntry::new(Correctness::Incorrect),
            ));
        };

        let text = answer.display();
        let student = evaluate(&text, &BTreeMap::new(), true)
            .map_err(|e| student_calc_error(&text, e))?;

        let (mut verdict, partial) = match &self.answer {
            NumericAnswer::Range { bounds, inclusive } => {
                self.grade_range(student, bounds, inclusive)?
            }
            NumericAnswer::Exact(answer) => self.grade_exact(student, answer)?,
        };

        let mut additional_hint = None;
        if verdict == Correctness::Incorrect {
            for additional in &self.additional_answers {
                if Self::staff_value(&additional.answer)? == student {
                    verdict = Correctness::Correct;
                    additional_hint = Some(additional.hint.clone().unwrap_or_default());
                    break;
                }
            }
        }

        let mut entry = CorrectnessEntry::new(verdict);
        if verdict == Correctness::PartiallyCorrect {
            entry = entry.with_npoints(partial);
        }
        if verdict == Correctness::Correct {
            let hint = match additional_hint {
                Some(hint) => hint,
                None => self.correct_hint.clone().unwrap_or_default(),
            };
            entry.msg.push_str(&single_hint(&hint, true));
        }

        tracing::debug!(
            grader = %self.base.id,
            input = %id,
            correctness = %verdict,
            "Graded numerical response"
        );
        Ok(CorrectnessMap::single(id, entry))
    }

    fn get_answers(&self) -> BTreeMap<String, JsonValue> {
        let mut all = vec![self.display_answer.clone()];
        all.extend(self.additional_answers.iter().map(|a| a.answer.clone()));
        let mut answers = BTreeMap::new();
        answers.insert(
            self.base.answer_id().to_string(),
            JsonValue::String(all.join(" <b>or</b> ")),
        );
        answers
    }
}
