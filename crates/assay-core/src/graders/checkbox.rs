//! Checkbox (select-all-that-apply) grading.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::collections::{BTreeMap, BTreeSet};

use super::feedback::{hint_div, HintLabel};
use super::{parse_credit_types, GraderBase, GradingContext, ResponseGrader};
use crate::correctness::{Correctness, CorrectnessEntry, CorrectnessMap};
use crate::error::{GradingError, ProblemError};
use crate::script::ScriptContext;
use crate::types::{AnswerValue, StudentAnswers};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CheckboxChoice {
    pub text: String,

    #[serde(default)]
    pub correct: bool,

    /// Letter used by compound hints; defaults to A, B, ... by position.
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub selected_hint: Option<String>,

    #[serde(default)]
    pub unselected_hint: Option<String>,
}

/// Feedback for one exact combination of selected choices.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CompoundHint {
    /// Space-separated choice letters, e.g. `"A C"`.
    pub value: String,

    pub hint: String,

    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CheckboxSpec {
    pub choices: Vec<CheckboxChoice>,

    /// `edc` or `halves`.
    #[serde(default)]
    pub partial_credit: Option<String>,

    #[serde(default)]
    pub compound_hints: Vec<CompoundHint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CreditScheme {
    AllOrNothing,
    EveryDecisionCounts,
    Halves,
}

#[derive(Debug, Clone, PartialEq)]
struct Choice {
    name: String,
    letter: String,
    text: String,
    correct: bool,
    selected_hint: Option<String>,
    unselected_hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckboxGrader {
    base: GraderBase,
    choices: Vec<Choice>,
    scheme: CreditScheme,
    compound_hints: Vec<(BTreeSet<String>, CompoundHint)>,
}

impl CheckboxGrader {
    pub fn new(
        spec: &CheckboxSpec,
        base: GraderBase,
        script: &ScriptContext,
    ) -> Result<Self, ProblemError> {
        let credit = parse_credit_types(spec.partial_credit.as_deref(), &["edc", "halves"])?;
        if credit.len() > 1 {
            return Err(ProblemError::Configuration(
                "Only one type of partial credit is allowed for Checkbox problems.".to_string(),
            ));
        }
        let scheme = match credit.first().map(String::as_str) {
            Some("edc") => CreditScheme::EveryDecisionCounts,
            Some("halves") => CreditScheme::Halves,
            _ => CreditScheme::AllOrNothing,
        };

        let choices = spec
            .choices
            .iter()
            .enumerate()
            .map(|(index, choice)| Choice {
                name: format!("choice_{}", index),
                letter: choice
                    .id
                    .clone()
                    .unwrap_or_else(|| letter_for(index))
                    .to_ascii_uppercase(),
                text: script.contextualize(&choice.text),
                correct: choice.correct,
                selected_hint: choice.selected_hint.clone(),
                unselected_hint: choice.unselected_hint.clone(),
            })
            .collect();

        let compound_hints = spec
            .compound_hints
            .iter()
            .map(|hint| {
                let letters = hint
                    .value
                    .split_whitespace()
                    .map(|l| l.to_ascii_uppercase())
                    .collect();
                (letters, hint.clone())
            })
            .collect();

        Ok(Self {
            base,
            choices,
            scheme,
            compound_hints,
        })
    }

    pub fn display_context(&self) -> JsonValue {
        JsonValue::Array(
            self.choices
                .iter()
                .map(|c| json!({ "name": c.name, "text": c.text }))
                .collect(),
        )
    }

    fn grade(&self, selected: &BTreeSet<String>) -> CorrectnessEntry {
        let total = self.choices.len();
        let correct_selected = self
            .choices
            .iter()
            .filter(|c| c.correct && selected.contains(&c.name))
            .count();
        let correct_omitted = self
            .choices
            .iter()
            .filter(|c| !c.correct && !selected.contains(&c.name))
            .count();
        let errors = total - correct_selected - correct_omitted;

        match self.scheme {
            CreditScheme::AllOrNothing if errors == 0 => CorrectnessEntry::new(Correctness::Correct),
            CreditScheme::AllOrNothing => CorrectnessEntry::new(Correctness::Incorrect),
            CreditScheme::EveryDecisionCounts => {
                let good = correct_selected + correct_omitted;
                if good == total {
                    CorrectnessEntry::new(Correctness::Correct)
                } else if good > 0 {
                    let grade = round_hundredths(good as f64 / total as f64);
                    CorrectnessEntry::new(Correctness::PartiallyCorrect).with_npoints(grade)
                } else {
                    CorrectnessEntry::new(Correctness::Incorrect).with_npoints(0.0)
                }
            }
            CreditScheme::Halves => match errors {
                0 => CorrectnessEntry::new(Correctness::Correct).with_npoints(1.0),
                1 if total > 2 => {
                    CorrectnessEntry::new(Correctness::PartiallyCorrect).with_npoints(0.5)
                }
                2 if total > 4 => {
                    CorrectnessEntry::new(Correctness::PartiallyCorrect).with_npoints(0.25)
                }
                _ => CorrectnessEntry::new(Correctness::Incorrect),
            },
        }
    }

    fn feedback(&self, selected: &BTreeSet<String>, correct: bool) -> String {
        let letters: BTreeSet<String> = self
            .choices
            .iter()
            .filter(|c| selected.contains(&c.name))
            .map(|c| c.letter.clone())
            .collect();

        if let Some((_, compound)) = self.compound_hints.iter().find(|(set, _)| *set == letters) {
            let label = match &compound.label {
                Some(label) => HintLabel::Custom(label.clone()),
                None => HintLabel::Verdict,
            };
            return hint_div(&[compound.hint.clone()], correct, &label, false);
        }

        let texts: Vec<String> = self
            .choices
            .iter()
            .filter_map(|c| {
                if selected.contains(&c.name) {
                    c.selected_hint.clone()
                } else {
                    c.unselected_hint.clone()
                }
            })
            .collect();
        hint_div(&texts, correct, &HintLabel::Verdict, true)
    }
}

fn letter_for(index: usize) -> String {
    char::from_u32('A' as u32 + index as u32)
        .map(String::from)
        .unwrap_or_else(|| index.to_string())
}

fn round_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl ResponseGrader for CheckboxGrader {
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
        let selected: BTreeSet<String> = answers
            .get(id)
            .map(|a| a.as_list().into_iter().collect())
            .unwrap_or_default();

        if selected.is_empty() {
            return Ok(CorrectnessMap::single(
                id,
                CorrectnessEntry::new(Correctness::Incorrect),
            ));
        }

        let mut entry = self.grade(&selected);
        let hint = self.feedback(&selected, entry.correctness == Correctness::Correct);
        entry.msg.push_str(&hint);
        Ok(CorrectnessMap::single(id, entry))
    }

    fn get_answers(&self) -> BTreeMap<String, JsonValue> {
        let correct: Vec<JsonValue> = self
            .choices
            .iter()
            .filter(|c| c.correct)
            .map(|c| JsonValue::String(c.name.clone()))
            .collect();
        let mut answers = BTreeMap::new();
        answers.insert(self.base.answer_id().to_string(), JsonValue::Array(correct));
        answers
    }

    fn answer_text(&self, _input_id: &str, answer: &AnswerValue) -> String {
        answer
            .as_list()
            .iter()
            .map(|name| {
                self.choices
                    .iter()
                    .find(|c| &c.name == name)
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
            .filter(|c| c.correct)
            .map(|c| c.text.as_str())
            .collect();
        Some(texts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{answers, base, grade};
    use super::*;

    fn choice(text: &str, correct: bool) -> CheckboxChoice {
        CheckboxChoice {
            text: text.to_string(),
            correct,
            ..Default::default()
        }
    }

    /// A and C correct out of five.
    fn spec(partial_credit: Option<&str>) -> CheckboxSpec {
        CheckboxSpec {
            choices: vec![
                choice("apple", true),
                choice("brick", false),
                choice("cherry", true),
                choice("door", false),
                choice("egg", false),
            ],
            partial_credit: partial_credit.map(String::from),
            compound_hints: Vec::new(),
        }
    }

    fn grader(spec: &CheckboxSpec) -> CheckboxGrader {
        CheckboxGrader::new(spec, base("checkbox", &["p1_2_1"]), &ScriptContext::empty(1)).unwrap()
    }

    fn graded(g: &CheckboxGrader, picks: Vec<&str>) -> (Correctness, f64, String) {
        let map = grade(g, &answers(&[("p1_2_1", picks.into())])).unwrap();
        (
            map.get_correctness("p1_2_1").unwrap(),
            map.get_npoints("p1_2_1"),
            map.get_msg("p1_2_1").to_string(),
        )
    }

    #[test]
    fn test_all_or_nothing() {
        let g = grader(&spec(None));
        assert_eq!(graded(&g, vec!["choice_0", "choice_2"]).0, Correctness::Correct);
        assert_eq!(graded(&g, vec!["choice_0"]).0, Correctness::Incorrect);
        assert_eq!(graded(&g, vec![]).0, Correctness::Incorrect);
    }

    #[test]
    fn test_every_decision_counts() {
        let g = grader(&spec(Some("edc")));
        // apple right, cherry missed, three incorrect omitted: 4/5
        let (verdict, points, _) = graded(&g, vec!["choice_0"]);
        assert_eq!(verdict, Correctness::PartiallyCorrect);
        assert_eq!(points, 0.8);
    }

    #[test]
    fn test_halves() {
        let g = grader(&spec(Some("halves")));
        assert_eq!(
            graded(&g, vec!["choice_0"]),
            (Correctness::PartiallyCorrect, 0.5, String::new())
        );
        assert_eq!(
            graded(&g, vec!["choice_0", "choice_1"]).0,
            Correctness::PartiallyCorrect
        );
        assert_eq!(graded(&g, vec!["choice_0", "choice_1"]).1, 0.25);
        assert_eq!(graded(&g, vec!["choice_1", "choice_3", "choice_4"]).0, Correctness::Incorrect);
    }

    #[test]
    fn test_per_choice_hints_are_multiline() {
        let mut s = spec(None);
        s.choices[0].selected_hint = Some("Apples are fruit.".to_string());
        s.choices[2].unselected_hint = Some("You missed cherry.".to_string());
        let g = grader(&s);
        let (_, _, msg) = graded(&g, vec!["choice_0"]);
        assert!(msg.contains("feedback-hint-multi"));
        assert!(msg.contains("Apples are fruit."));
        assert!(msg.contains("You missed cherry."));
    }

    #[test]
    fn test_compound_hint_wins() {
        let mut s = spec(None);
        s.choices[0].selected_hint = Some("per-choice".to_string());
        s.compound_hints = vec![CompoundHint {
            value: "c a".to_string(),
            hint: "Both fruit!".to_string(),
            label: None,
        }];
        let g = grader(&s);
        let (verdict, _, msg) = graded(&g, vec!["choice_2", "choice_0"]);
        assert_eq!(verdict, Correctness::Correct);
        assert!(msg.contains("Both fruit!"));
        assert!(!msg.contains("per-choice"));
    }

    #[test]
    fn test_two_credit_schemes_rejected() {
        let err = CheckboxGrader::new(
            &spec(Some("edc,halves")),
            base("checkbox", &["p1_2_1"]),
            &ScriptContext::empty(1),
        )
        .unwrap_err();
        assert!(err.to_string().contains("Only one type of partial credit"));
    }
}
