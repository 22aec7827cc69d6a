//! Authored problems bound to a seed and a learner's answers.
//!
//! [`AuthoredProblem`] owns the parsed definition, the script context computed
//! under the seed, one materialized [`Grader`] per response, and the
//! learner's current answers and correctness map. It is rebuilt from the
//! definition whenever the seed changes.

pub mod definition;
mod schema;

pub use definition::{
    BoundResponse, GraderSpec, InputSpec, ProblemDefinition, ProblemNode, ResponseNode,
};
pub use schema::{is_valid_problem, validate_problem_schema, SchemaError};

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::correctness::{Correctness, CorrectnessEntry, CorrectnessMap};
use crate::error::{GradingError, ProblemError};
use crate::graders::{Grader, GraderBase, GradingContext, InputBinding, ResponseGrader};
use crate::queue::{ScoreMessage, INVALID_GRADER_REPLY};
use crate::script::{ScriptCache, ScriptContext};
use crate::services::{RenderError, RenderService, Sandbox};
use crate::types::{answers_without_files, AnswerValue, InputState, Score, StudentAnswers};

/// Template used to render a problem.
pub const PROBLEM_TEMPLATE: &str = "problem.html";

/// Services needed to build a problem.
#[derive(Clone, Copy)]
pub struct ProblemEnv<'a> {
    pub sandbox: &'a dyn Sandbox,
    pub script_cache: Option<&'a ScriptCache>,
}

/// The part of attempt state a problem instance carries.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProblemState {
    #[serde(default)]
    pub student_answers: StudentAnswers,

    #[serde(default)]
    pub correct_map: CorrectnessMap,

    #[serde(default)]
    pub done: bool,

    #[serde(default)]
    pub input_state: InputState,
}

#[derive(Debug, Clone, PartialEq)]
struct Solution {
    html: String,
    explanation_id: Option<String>,
}

/// A problem ready to grade.
#[derive(Debug, Clone)]
pub struct AuthoredProblem {
    definition: Arc<ProblemDefinition>,
    seed: u32,
    script: ScriptContext,
    graders: Vec<Grader>,
    /// Input id to index into `graders`.
    input_index: BTreeMap<String, usize>,
    solutions: Vec<Solution>,
    pub student_answers: StudentAnswers,
    pub correct_map: CorrectnessMap,
    pub done: bool,
    pub input_state: InputState,
}

impl AuthoredProblem {
    /// Parse a YAML document and build it.
    pub fn from_yaml(
        text: &str,
        seed: u32,
        state: ProblemState,
        env: ProblemEnv<'_>,
    ) -> Result<Self, ProblemError> {
        let definition = ProblemDefinition::from_yaml(text)?;
        Self::new(Arc::new(definition), seed, state, env)
    }

    /// Build a problem under `seed`.
    ///
    /// Runs the problem's scripts through the sandbox, materializes every
    /// grader, and realizes shuffles and answer pools from a generator seeded
    /// with `seed`.
    ///
    /// # Errors
    ///
    /// Script failures and malformed graders are configuration errors.
    pub fn new(
        definition: Arc<ProblemDefinition>,
        seed: u32,
        state: ProblemState,
        env: ProblemEnv<'_>,
    ) -> Result<Self, ProblemError> {
        let script = ScriptContext::build(
            &definition.script_code(),
            seed,
            env.sandbox,
            env.script_cache,
        )?;

        let mut rng = ChaCha20Rng::seed_from_u64(u64::from(seed));
        let mut graders = Vec::new();
        let mut input_index = BTreeMap::new();

        for response in definition.responses() {
            let inputs: Vec<InputBinding> = response
                .node
                .inputs
                .iter()
                .map(|input| InputBinding {
                    id: input.id.clone().unwrap_or_default(),
                    input_type: input.input_type.clone(),
                    label: input.label.clone(),
                })
                .collect();
            for input in &inputs {
                input_index.insert(input.id.clone(), graders.len());
            }

            let base = GraderBase {
                id: response.id.to_string(),
                kind: response.node.grader.kind(),
                inputs,
                label: response.node.label.clone(),
            };
            let grader = Grader::build(
                &response.node.grader,
                base,
                &response.node.inputs,
                &script,
                &mut rng,
            )?;
            graders.push(grader);
        }

        let solutions = definition
            .children
            .iter()
            .filter_map(|child| match child {
                ProblemNode::Solution {
                    html,
                    explanation_id,
                } => Some(Solution {
                    html: script.contextualize(html),
                    explanation_id: explanation_id.clone(),
                }),
                _ => None,
            })
            .collect();

        tracing::debug!(
            problem_id = %definition.problem_id,
            seed,
            graders = graders.len(),
            "Built authored problem"
        );

        Ok(Self {
            definition,
            seed,
            script,
            graders,
            input_index,
            solutions,
            student_answers: state.student_answers,
            correct_map: state.correct_map,
            done: state.done,
            input_state: state.input_state,
        })
    }

    pub fn definition(&self) -> &Arc<ProblemDefinition> {
        &self.definition
    }

    pub fn problem_id(&self) -> &str {
        &self.definition.problem_id
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }

    pub fn script(&self) -> &ScriptContext {
        &self.script
    }

    pub fn graders(&self) -> &[Grader] {
        &self.graders
    }

    /// Grader owning `input_id`.
    pub fn grader_for_input(&self, input_id: &str) -> Option<&Grader> {
        self.input_index.get(input_id).map(|i| &self.graders[*i])
    }

    /// Snapshot of the learner-facing state.
    pub fn state(&self) -> ProblemState {
        ProblemState {
            student_answers: self.student_answers.clone(),
            correct_map: self.correct_map.clone(),
            done: self.done,
            input_state: self.input_state.clone(),
        }
    }

    // ========================================================================
    // Grading
    // ========================================================================

    /// Grade a submission and make it the current state.
    ///
    /// The answers are recorded even when grading fails; the correctness map
    /// and `done` only change on success.
    pub fn grade_answers(
        &mut self,
        answers: &StudentAnswers,
        ctx: &mut GradingContext<'_>,
    ) -> Result<CorrectnessMap, GradingError> {
        self.student_answers = answers_without_files(answers);
        let baseline = self.correct_map.clone();
        let map = self.evaluate(answers, &baseline, ctx)?;
        self.correct_map = map.clone();
        self.done = true;
        Ok(map)
    }

    /// Grade without touching state.
    ///
    /// `answers` defaults to the current answers; `baseline` is the map the
    /// graders see as the previous verdict.
    pub fn get_grade_from_current_answers(
        &self,
        answers: Option<&StudentAnswers>,
        baseline: &CorrectnessMap,
        ctx: &mut GradingContext<'_>,
    ) -> Result<CorrectnessMap, GradingError> {
        let answers = answers.unwrap_or(&self.student_answers);
        self.evaluate(answers, baseline, ctx)
    }

    fn evaluate(
        &self,
        answers: &StudentAnswers,
        baseline: &CorrectnessMap,
        ctx: &mut GradingContext<'_>,
    ) -> Result<CorrectnessMap, GradingError> {
        let mut map = CorrectnessMap::new();
        for grader in &self.graders {
            let results = grader.evaluate_answers(answers, baseline, ctx)?;
            map.update(&results);
        }
        Ok(map)
    }

    /// Points earned in `map` (the current map by default) out of the maximum.
    pub fn calculate_score(&self, map: Option<&CorrectnessMap>) -> Score {
        let map = map.unwrap_or(&self.correct_map);
        let total = f64::from(self.get_max_score());
        let earned: f64 = map
            .iter()
            .filter(|(id, _)| self.input_index.contains_key(*id))
            .map(|(id, _)| map.get_npoints(id).max(0.0))
            .sum();
        Score::new(earned.min(total), total)
    }

    pub fn get_max_score(&self) -> u32 {
        self.graders.iter().map(|g| g.get_max_score()).sum()
    }

    /// Whether every grader can re-grade stored answers.
    pub fn supports_rescoring(&self) -> bool {
        self.graders.iter().all(|g| g.supports_rescoring())
    }

    pub fn is_correct(&self) -> bool {
        self.calculate_score(None).is_full()
    }

    // ========================================================================
    // External grader callbacks
    // ========================================================================

    pub fn is_queued(&self) -> bool {
        self.correct_map.any_queued()
    }

    pub fn get_recentmost_queuetime(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.correct_map.get_queuetime_latest()
    }

    /// Apply a scored callback to the input waiting on `queuekey`.
    ///
    /// Returns the patched input id, or `None` when no input waits on the key.
    pub fn update_score(&mut self, score_msg: &str, queuekey: &str) -> Option<String> {
        let id = self.correct_map.find_queued(queuekey)?.to_string();

        let entry = match ScoreMessage::parse(score_msg) {
            Some(reply) => {
                let verdict = if reply.correct {
                    Correctness::Correct
                } else {
                    Correctness::Incorrect
                };
                CorrectnessEntry::new(verdict)
                    .with_npoints(reply.score.clamp(0.0, 1.0))
                    .with_msg(reply.msg.replace("&nbsp;", "&#160;"))
            }
            None => {
                tracing::warn!(input = %id, lms_key = %queuekey, "Invalid external grader reply");
                CorrectnessEntry::new(Correctness::Incorrect)
                    .with_npoints(0.0)
                    .with_msg(INVALID_GRADER_REPLY)
            }
        };
        self.correct_map.set(id.clone(), entry);
        Some(id)
    }

    /// Store an ungraded callback reply for display; the score is untouched.
    pub fn ungraded_response(&mut self, msg: &str, queuekey: &str) -> Option<String> {
        let id = self.correct_map.find_queued(queuekey)?.to_string();
        if let Some(entry) = self.correct_map.get_mut(&id) {
            entry.queuestate = None;
        }
        self.input_state
            .insert(id.clone(), json!({ "queue_msg": msg }));
        Some(id)
    }

    // ========================================================================
    // Disclosure and reporting
    // ========================================================================

    /// Canonical answers keyed by input id, plus the solutions that apply.
    pub fn get_question_answers(&self) -> BTreeMap<String, JsonValue> {
        let mut answers = BTreeMap::new();
        for grader in &self.graders {
            answers.extend(grader.get_answers());
        }

        let selected: Vec<&str> = self
            .graders
            .iter()
            .filter_map(|g| g.selected_explanation())
            .collect();
        for (index, solution) in self.solutions.iter().enumerate() {
            let shown = match (&solution.explanation_id, selected.is_empty()) {
                (_, true) => true,
                (Some(id), false) => selected.contains(&id.as_str()),
                (None, false) => true,
            };
            if shown {
                let key = solution
                    .explanation_id
                    .clone()
                    .unwrap_or_else(|| format!("{}_solution_{}", self.problem_id(), index + 1));
                answers.insert(key, JsonValue::String(solution.html.clone()));
            }
        }
        answers
    }

    /// Demand hints, contextualized.
    pub fn hints(&self) -> Vec<String> {
        self.definition
            .hints()
            .into_iter()
            .map(|h| self.script.contextualize(h))
            .collect()
    }

    /// Question text for an input: the response label, else the input label.
    pub fn find_question_label(&self, input_id: &str) -> String {
        let Some(grader) = self.grader_for_input(input_id) else {
            return String::new();
        };
        let base = grader.base();
        base.label
            .clone()
            .or_else(|| {
                base.inputs
                    .iter()
                    .find(|i| i.id == input_id)
                    .and_then(|i| i.label.clone())
            })
            .unwrap_or_default()
    }

    /// Human-readable form of a submitted answer.
    pub fn find_answer_text(&self, input_id: &str, current: &AnswerValue) -> String {
        match self.grader_for_input(input_id) {
            Some(grader) => grader.answer_text(input_id, current),
            None => current.display(),
        }
    }

    pub fn find_correct_answer_text(&self, input_id: &str) -> Option<String> {
        self.grader_for_input(input_id)?
            .correct_answer_text(input_id)
    }

    /// Replace masked choice names with canonical ones.
    pub fn unmask_answers(&self, answers: &StudentAnswers) -> StudentAnswers {
        answers
            .iter()
            .map(|(id, value)| {
                let value = match self.grader_for_input(id) {
                    Some(grader) if grader.has_mask() => match value {
                        AnswerValue::Text(name) => AnswerValue::Text(grader.unmask_name(name)),
                        AnswerValue::List(names) => AnswerValue::List(
                            names.iter().map(|n| grader.unmask_name(n)).collect(),
                        ),
                        other => other.clone(),
                    },
                    _ => value.clone(),
                };
                (id.clone(), value)
            })
            .collect()
    }

    /// Display permutations in effect, keyed by input id.
    pub fn permutations(&self) -> BTreeMap<String, JsonValue> {
        let mut permutations = BTreeMap::new();
        for grader in &self.graders {
            let kind = if grader.has_shuffle() {
                "shuffle"
            } else if grader.has_answerpool() {
                "answerpool"
            } else {
                continue;
            };
            for id in grader.base().input_ids() {
                permutations.insert(id.to_string(), json!([kind, grader.unmask_order()]));
            }
        }
        permutations
    }

    /// Per-input submission metadata for analytics events.
    pub fn submission_metadata(
        &self,
        answers: &StudentAnswers,
        map: &CorrectnessMap,
        variant: Option<u32>,
    ) -> BTreeMap<String, JsonValue> {
        answers
            .iter()
            .filter_map(|(id, answer)| {
                let grader = self.grader_for_input(id)?;
                let input_type = grader
                    .base()
                    .inputs
                    .iter()
                    .find(|i| &i.id == id)
                    .map(|i| i.input_type.clone())
                    .unwrap_or_default();
                let metadata = json!({
                    "question": self.find_question_label(id),
                    "answer": self.find_answer_text(id, answer),
                    "response_type": grader.base().kind,
                    "input_type": input_type,
                    "correct": map.is_correct(id),
                    "variant": variant.map(|v| v.to_string()).unwrap_or_default(),
                    "group_label": "",
                });
                Some((id.clone(), metadata))
            })
            .collect()
    }

    // ========================================================================
    // Rendering
    // ========================================================================

    /// Render the problem with its current state.
    ///
    /// Per-input verdicts are included only when `show_correctness` holds.
    pub fn get_html(
        &self,
        renderer: &dyn RenderService,
        show_correctness: bool,
    ) -> Result<String, RenderError> {
        let mut children = Vec::new();
        let mut graders = self.graders.iter();
        for child in &self.definition.children {
            let rendered = match child {
                ProblemNode::Prose { html } => {
                    json!({ "type": "prose", "html": self.script.contextualize(html) })
                }
                ProblemNode::Style { css } => json!({ "type": "style", "css": css }),
                ProblemNode::Response(_) => match graders.next() {
                    Some(grader) => self.response_context(grader, show_correctness),
                    None => continue,
                },
                ProblemNode::Script { .. }
                | ProblemNode::DemandHint { .. }
                | ProblemNode::Solution { .. } => continue,
            };
            children.push(rendered);
        }

        let context = json!({
            "problem_id": self.problem_id(),
            "title": self.definition.title,
            "seed": self.seed,
            "children": children,
            "overall_message": self.correct_map.overall_message(),
        });
        let html = renderer.render_template(PROBLEM_TEMPLATE, &context)?;
        Ok(renderer.replace_urls(&html))
    }

    fn response_context(&self, grader: &Grader, show_correctness: bool) -> JsonValue {
        let inputs: Vec<JsonValue> = grader
            .base()
            .inputs
            .iter()
            .map(|input| {
                let value = self
                    .student_answers
                    .get(&input.id)
                    .map(|a| serde_json::to_value(a).unwrap_or_default())
                    .unwrap_or(JsonValue::Null);
                let mut context = json!({
                    "id": input.id,
                    "input_type": input.input_type,
                    "label": input.label,
                    "value": value,
                    "queued": self.correct_map.is_queued(&input.id),
                });
                if show_correctness {
                    if let Some(entry) = self.correct_map.get(&input.id) {
                        context["correctness"] = json!(entry.correctness);
                        context["msg"] = json!(entry.msg);
                    }
                }
                if let Some(state) = self.input_state.get(&input.id) {
                    context["state"] = state.clone();
                }
                context
            })
            .collect();

        json!({
            "type": "response",
            "id": grader.base().id,
            "kind": grader.base().kind,
            "label": grader.base().label,
            "inputs": inputs,
            "display": grader.display_context(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graders::QueueContext;
    use crate::queue::make_queue_key;
    use crate::services::{NoSandbox, TemplateRenderer};
    use chrono::{TimeZone, Utc};

    const TWO_PART: &str = r#"
problem_id: p1
children:
  - type: prose
    html: "<p>Two questions.</p>"
  - type: response
    label: "Pi to two places"
    grader: { kind: numerical, answer: "3.14" }
    inputs: [{ input_type: textline }]
  - type: response
    label: "Capital of France"
    grader: { kind: string, answer: "Paris" }
    inputs: [{ input_type: textline }]
  - type: solution
    html: "<p>3.14 and Paris</p>"
"#;

    const QUEUED: &str = r#"
problem_id: q1
children:
  - type: response
    grader: { kind: code, queue_name: python }
    inputs: [{ input_type: textbox }]
"#;

    const SHUFFLED: &str = r#"
problem_id: m1
children:
  - type: response
    grader:
      kind: multiple_choice
      shuffle: true
      choices:
        - { text: red, correct: true }
        - { text: green }
        - { text: blue }
        - { text: yellow }
    inputs: [{ input_type: choicegroup }]
"#;

    fn env() -> ProblemEnv<'static> {
        ProblemEnv {
            sandbox: &NoSandbox,
            script_cache: None,
        }
    }

    fn build(text: &str, seed: u32) -> AuthoredProblem {
        AuthoredProblem::from_yaml(text, seed, ProblemState::default(), env()).unwrap()
    }

    fn submit(problem: &mut AuthoredProblem, answers: &StudentAnswers) -> CorrectnessMap {
        let script = problem.script().clone();
        let queue = QueueContext {
            anonymous_id: "anon".to_string(),
            ..Default::default()
        };
        let now = Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).unwrap();
        let mut ctx = GradingContext::new(&script, &NoSandbox, 1, now, &queue);
        problem.grade_answers(answers, &mut ctx).unwrap()
    }

    fn answers(pairs: &[(&str, &str)]) -> StudentAnswers {
        pairs
            .iter()
            .map(|(id, v)| (id.to_string(), AnswerValue::from(*v)))
            .collect()
    }

    // ========================================================================
    // Grading and scoring
    // ========================================================================

    #[test]
    fn test_grade_answers_merges_graders() {
        let mut problem = build(TWO_PART, 1);
        assert_eq!(problem.get_max_score(), 2);

        let map = submit(&mut problem, &answers(&[("p1_2_1", "3.14"), ("p1_3_1", "Rome")]));
        assert!(map.is_correct("p1_2_1"));
        assert!(!map.is_correct("p1_3_1"));
        assert!(problem.done);
        assert_eq!(problem.calculate_score(None), Score::new(1.0, 2.0));
        assert!(!problem.is_correct());
    }

    #[test]
    fn test_regrade_without_mutation() {
        let mut problem = build(TWO_PART, 1);
        submit(&mut problem, &answers(&[("p1_2_1", "3.14"), ("p1_3_1", "Paris")]));
        let before = problem.state();

        let script = problem.script().clone();
        let queue = QueueContext::default();
        let mut ctx = GradingContext::new(&script, &NoSandbox, 1, Utc::now(), &queue);
        let regraded = problem
            .get_grade_from_current_answers(
                Some(&answers(&[("p1_2_1", "0"), ("p1_3_1", "Paris")])),
                &CorrectnessMap::new(),
                &mut ctx,
            )
            .unwrap();
        assert!(!regraded.is_correct("p1_2_1"));
        assert_eq!(problem.state(), before);
    }

    #[test]
    fn test_failed_grading_keeps_previous_map() {
        let mut problem = build(TWO_PART, 1);
        submit(&mut problem, &answers(&[("p1_2_1", "3.14"), ("p1_3_1", "Paris")]));

        let script = problem.script().clone();
        let queue = QueueContext::default();
        let mut ctx = GradingContext::new(&script, &NoSandbox, 2, Utc::now(), &queue);
        let err = problem
            .grade_answers(&answers(&[("p1_2_1", "3 +"), ("p1_3_1", "Paris")]), &mut ctx)
            .unwrap_err();
        assert!(matches!(err, GradingError::StudentInput(_)));
        assert!(problem.correct_map.is_correct("p1_2_1"));
        assert_eq!(
            problem.student_answers.get("p1_2_1"),
            Some(&AnswerValue::from("3 +"))
        );
    }

    #[test]
    fn test_question_answers_and_labels() {
        let problem = build(TWO_PART, 1);
        let answers = problem.get_question_answers();
        assert_eq!(answers["p1_2_1"], json!("3.14"));
        assert_eq!(answers["p1_3_1"], json!("Paris"));
        assert_eq!(answers["p1_solution_1"], json!("<p>3.14 and Paris</p>"));
        assert_eq!(problem.find_question_label("p1_3_1"), "Capital of France");
        assert_eq!(problem.find_correct_answer_text("p1_2_1"), Some("3.14".to_string()));
    }

    // ========================================================================
    // Queue callbacks
    // ========================================================================

    #[test]
    fn test_update_score_matches_key() {
        let mut problem = build(QUEUED, 4);
        let map = submit(&mut problem, &answers(&[("q1_2_1", "print(1)")]));
        assert!(problem.is_queued());
        let key = map.get("q1_2_1").unwrap().queuestate.clone().unwrap().key;
        assert_eq!(key, make_queue_key(4, "20260105080000", "anon", "q1_2_1"));

        assert_eq!(problem.update_score("{}", "not-the-key"), None);
        let body = r#"{"correct": true, "score": 0.75, "msg": "ok"}"#;
        assert_eq!(problem.update_score(body, &key), Some("q1_2_1".to_string()));
        assert!(!problem.is_queued());
        assert_eq!(problem.calculate_score(None), Score::new(0.75, 1.0));

        // The key is consumed.
        assert_eq!(problem.update_score(body, &key), None);
    }

    #[test]
    fn test_invalid_reply_marks_incorrect() {
        let mut problem = build(QUEUED, 4);
        let map = submit(&mut problem, &answers(&[("q1_2_1", "x")]));
        let key = map.get("q1_2_1").unwrap().queuestate.clone().unwrap().key;
        problem.update_score("not json", &key);
        assert_eq!(problem.correct_map.get_msg("q1_2_1"), INVALID_GRADER_REPLY);
        assert_eq!(problem.calculate_score(None).raw_earned, 0.0);
    }

    #[test]
    fn test_ungraded_response_stores_message() {
        let mut problem = build(QUEUED, 4);
        let map = submit(&mut problem, &answers(&[("q1_2_1", "x")]));
        let key = map.get("q1_2_1").unwrap().queuestate.clone().unwrap().key;
        assert!(problem.ungraded_response("Output: 1", &key).is_some());
        assert_eq!(problem.input_state["q1_2_1"]["queue_msg"], "Output: 1");
        assert!(!problem.is_queued());
        assert!(!problem.supports_rescoring());
    }

    // ========================================================================
    // Permutations
    // ========================================================================

    #[test]
    fn test_shuffle_is_seeded_and_unmaskable() {
        let a = build(SHUFFLED, 7);
        let b = build(SHUFFLED, 7);
        let grader = a.grader_for_input("m1_2_1").unwrap();
        assert_eq!(grader.unmask_order(), b.grader_for_input("m1_2_1").unwrap().unmask_order());

        let permutations = a.permutations();
        assert_eq!(permutations["m1_2_1"][0], "shuffle");

        let Grader::MultipleChoice(choice) = grader else {
            panic!("expected a choice grader");
        };
        let shown = choice.display_name("choice_0").unwrap().to_string();
        let unmasked = a.unmask_answers(&answers(&[("m1_2_1", shown.as_str())]));
        assert_eq!(unmasked["m1_2_1"], AnswerValue::from("choice_0"));
    }

    // ========================================================================
    // Rendering
    // ========================================================================

    #[test]
    fn test_get_html_hides_correctness_when_asked() {
        let mut problem = build(TWO_PART, 1);
        submit(&mut problem, &answers(&[("p1_2_1", "3.14"), ("p1_3_1", "Rome")]));
        let renderer = TemplateRenderer::new();

        let shown = problem.get_html(&renderer, true).unwrap();
        assert!(shown.contains("incorrect"));
        let hidden = problem.get_html(&renderer, false).unwrap();
        assert!(!hidden.contains("incorrect"));
    }

    #[test]
    fn test_script_failure_is_configuration_error() {
        let text = r#"
problem_id: s1
children:
  - type: script
    code: "x = 1"
"#;
        let err = AuthoredProblem::from_yaml(text, 1, ProblemState::default(), env()).unwrap_err();
        assert!(matches!(err, ProblemError::Sandbox(_)));
    }
}
