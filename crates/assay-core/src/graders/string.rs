//! String response grading.
//!
//! Answers match exactly, case-insensitively, or as anchored regular
//! expressions. Hints are chosen in a fixed order: the correct hint for the
//! primary answer, then an additional answer's hint, then string hints, then
//! regular-expression hints.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

use super::feedback::single_hint;
use super::{AdditionalAnswer, GraderBase, GradingContext, ResponseGrader};
use crate::correctness::{Correctness, CorrectnessEntry, CorrectnessMap};
use crate::error::{GradingError, ProblemError};
use crate::script::ScriptContext;
use crate::types::StudentAnswers;

/// Feedback shown when the learner's answer matches `answer`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StringHint {
    pub answer: String,
    pub hint: String,

    /// Treat `answer` as a regular expression.
    #[serde(default)]
    pub regexp: bool,
}

/// Authored string response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StringSpec {
    pub answer: String,

    #[serde(default)]
    pub additional_answers: Vec<AdditionalAnswer>,

    #[serde(default)]
    pub case_insensitive: bool,

    #[serde(default)]
    pub regexp: bool,

    #[serde(default)]
    pub hints: Vec<StringHint>,

    #[serde(default)]
    pub correct_hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StringGrader {
    base: GraderBase,
    answer: String,
    additional_answers: Vec<AdditionalAnswer>,
    case_insensitive: bool,
    regexp: bool,
    hints: Vec<StringHint>,
    correct_hint: Option<String>,
}

impl StringGrader {
    pub fn new(
        spec: &StringSpec,
        base: GraderBase,
        script: &ScriptContext,
    ) -> Result<Self, ProblemError> {
        let answer = script.contextualize(spec.answer.trim());
        if answer.is_empty() && spec.additional_answers.is_empty() {
            return Err(ProblemError::Configuration(format!(
                "String response {} has no answer",
                base.id
            )));
        }

        Ok(Self {
            base,
            answer,
            additional_answers: spec
                .additional_answers
                .iter()
                .map(|a| AdditionalAnswer {
                    answer: script.contextualize(a.answer.trim()),
                    hint: a.hint.clone(),
                })
                .collect(),
            case_insensitive: spec.case_insensitive,
            regexp: spec.regexp,
            hints: spec
                .hints
                .iter()
                .map(|h| StringHint {
                    answer: script.contextualize(h.answer.trim()),
                    hint: h.hint.clone(),
                    regexp: h.regexp,
                })
                .collect(),
            correct_hint: spec.correct_hint.clone(),
        })
    }

    fn compile(&self, pattern: &str) -> Result<Regex, GradingError> {
        RegexBuilder::new(&format!("^({})$", pattern))
            .case_insensitive(self.case_insensitive)
            .build()
            .map_err(|e| {
                GradingError::Response(format!(
                    "Invalid regular expression '{}': {}",
                    pattern, e
                ))
            })
    }

    fn equal(&self, expected: &str, given: &str) -> bool {
        if self.case_insensitive {
            expected.to_lowercase() == given.to_lowercase()
        } else {
            expected == given
        }
    }

    fn matches(&self, expected: &str, given: &str, regexp: bool) -> Result<bool, GradingError> {
        if regexp {
            Ok(self.compile(expected)?.is_match(given))
        } else {
            Ok(self.equal(expected, given))
        }
    }

    fn pick_hint(&self, given: &str, verdict: Correctness) -> Result<Option<String>, GradingError> {
        if verdict == Correctness::Correct {
            if self.matches(&self.answer, given, self.regexp)? {
                if let Some(hint) = &self.correct_hint {
                    return Ok(Some(hint.clone()));
                }
            }
            for additional in &self.additional_answers {
                if additional.hint.is_some()
                    && self.matches(&additional.answer, given, self.regexp)?
                {
                    return Ok(additional.hint.clone());
                }
            }
        }

        for hint in self.hints.iter().filter(|h| !h.regexp) {
            if self.equal(&hint.answer, given) {
                return Ok(Some(hint.hint.clone()));
            }
        }
        for hint in self.hints.iter().filter(|h| h.regexp) {
            if self.compile(&hint.answer)?.is_match(given) {
                return Ok(Some(hint.hint.clone()));
            }
        }
        Ok(None)
    }
}

impl ResponseGrader for StringGrader {
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
        let given = answers
            .get(id)
            .map(|a| a.display().trim().to_string())
            .unwrap_or_default();

        let mut correct = false;
        if !given.is_empty() {
            let accepted = std::iter::once(self.answer.as_str())
                .chain(self.additional_answers.iter().map(|a| a.answer.as_str()))
                .filter(|a| !a.is_empty());
            for expected in accepted {
                if self.matches(expected, &given, self.regexp)? {
                    correct = true;
                    break;
                }
            }
        }

        let verdict = if correct {
            Correctness::Correct
        } else {
            Correctness::Incorrect
        };
        let mut entry = CorrectnessEntry::new(verdict);
        if !given.is_empty() {
            if let Some(hint) = self.pick_hint(&given, verdict)? {
                entry.msg = single_hint(&hint, correct);
            }
        }

        tracing::debug!(grader = %self.base.id, input = %id, correctness = %verdict, "Graded string response");
        Ok(CorrectnessMap::single(id, entry))
    }

    fn get_answers(&self) -> BTreeMap<String, JsonValue> {
        let all: Vec<&str> = std::iter::once(self.answer.as_str())
            .chain(self.additional_answers.iter().map(|a| a.answer.as_str()))
            .filter(|a| !a.is_empty())
            .collect();
        let mut answers = BTreeMap::new();
        answers.insert(
            self.base.answer_id().to_string(),
            JsonValue::String(all.join(" <b>or</b> ")),
        );
        answers
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{answers, base, grade};
    use super::*;

    fn grader(spec: StringSpec) -> StringGrader {
        StringGrader::new(&spec, base("string", &["p1_2_1"]), &ScriptContext::empty(1)).unwrap()
    }

    fn spec(answer: &str) -> StringSpec {
        StringSpec {
            answer: answer.to_string(),
            ..Default::default()
        }
    }

    fn check(grader: &StringGrader, input: &str) -> CorrectnessMap {
        grade(grader, &answers(&[("p1_2_1", input.into())])).unwrap()
    }

    // ========================================================================
    // Matching
    // ========================================================================

    #[test]
    fn test_exact_match_is_case_sensitive() {
        let g = grader(spec("Paris"));
        assert!(check(&g, " Paris ").is_correct("p1_2_1"));
        assert!(!check(&g, "paris").is_correct("p1_2_1"));
    }

    #[test]
    fn test_case_insensitive_match() {
        let mut s = spec("Paris");
        s.case_insensitive = true;
        let g = grader(s);
        assert!(check(&g, "PARIS").is_correct("p1_2_1"));
    }

    #[test]
    fn test_regexp_is_anchored() {
        let mut s = spec("colou?r");
        s.regexp = true;
        let g = grader(s);
        assert!(check(&g, "color").is_correct("p1_2_1"));
        assert!(check(&g, "colour").is_correct("p1_2_1"));
        assert!(!check(&g, "colors").is_correct("p1_2_1"));
    }

    #[test]
    fn test_bad_regexp_is_response_error() {
        let mut s = spec("(unclosed");
        s.regexp = true;
        let g = grader(s);
        let err = grade(&g, &answers(&[("p1_2_1", "x".into())])).unwrap_err();
        assert!(matches!(err, GradingError::Response(_)));
    }

    #[test]
    fn test_empty_answer_is_incorrect() {
        let g = grader(spec("Paris"));
        let map = grade(&g, &StudentAnswers::new()).unwrap();
        assert_eq!(map.get_correctness("p1_2_1"), Some(Correctness::Incorrect));
    }

    // ========================================================================
    // Hints
    // ========================================================================

    #[test]
    fn test_hint_precedence() {
        let mut s = spec("Paris");
        s.correct_hint = Some("Capital of France.".to_string());
        s.additional_answers = vec![AdditionalAnswer {
            answer: "Lutetia".to_string(),
            hint: Some("Roman name.".to_string()),
        }];
        s.hints = vec![
            StringHint {
                answer: "London".to_string(),
                hint: "Wrong country.".to_string(),
                regexp: false,
            },
            StringHint {
                answer: "L.*".to_string(),
                hint: "Starts with L, but no.".to_string(),
                regexp: true,
            },
        ];
        let g = grader(s);

        assert!(check(&g, "Paris").get_msg("p1_2_1").contains("Capital of France."));
        let roman = check(&g, "Lutetia");
        assert!(roman.is_correct("p1_2_1"));
        assert!(roman.get_msg("p1_2_1").contains("Roman name."));
        assert!(check(&g, "London").get_msg("p1_2_1").contains("Wrong country."));
        assert!(check(&g, "Lyon").get_msg("p1_2_1").contains("Starts with L"));
        assert!(check(&g, "Berlin").get_msg("p1_2_1").is_empty());
    }

    #[test]
    fn test_answers_joined() {
        let mut s = spec("Paris");
        s.additional_answers = vec![AdditionalAnswer {
            answer: "Lutetia".to_string(),
            hint: None,
        }];
        let g = grader(s);
        assert_eq!(
            g.get_answers()["p1_2_1"],
            JsonValue::String("Paris <b>or</b> Lutetia".to_string())
        );
    }
}
