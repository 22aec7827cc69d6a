//! Problem lifecycle engine.
//!
//! One [`ProblemLifecycleEngine`] serves one learner on one problem. It loads
//! attempt state from the field store, builds the [`AuthoredProblem`] under
//! the learner's seed, and runs the public operations: submit, save, reset,
//! rescore, hints, answers, and external grader callbacks.
//!
//! ## Operation flow
//!
//! ```text
//! submit ──▶ preconditions ──▶ grade_answers ──▶ histories ──▶ GradingMethod ──▶ persist ──▶ events
//!                                    │
//!                                    └──▶ queued submissions (returned to the runtime)
//!
//! callback ──▶ lms_key match ──▶ patch map + history ──▶ GradingMethod ──▶ persist ──▶ grade event
//! ```
//!
//! Every mutation ends with an optimistic write keyed on the `attempts`
//! field, so a duplicate submit racing this one fails with
//! [`EngineError::Conflict`] instead of silently overwriting.

pub mod events;
pub mod state;

pub use state::AttemptState;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::{EngineConfig, LearnerContext};
use crate::correctness::{Correctness, CorrectnessEntry, CorrectnessMap};
use crate::disclosure::{should_enable_next_hint, AttemptView, Disclosure, DisclosurePolicy};
use crate::error::{EngineError, ProblemError};
use crate::graders::GradingContext;
use crate::problem::{AuthoredProblem, ProblemDefinition, ProblemEnv, ProblemState};
use crate::queue::{dispatch_failure_message, CallbackKind, CallbackMessage, QueueReply, QueueSubmission};
use crate::script::ScriptCache;
use crate::seed::SeedManager;
use crate::services::{Clock, EventPublisher, FieldStore, RenderService, Sandbox};
use crate::settings::{ProblemSettings, Rerandomize};
use crate::types::{answers_without_files, Score, StudentAnswers};

pub const MSG_CLOSED: &str = "Problem is closed.";
pub const MSG_MUST_RESET: &str = "Problem must be reset before it can be submitted again.";
pub const MSG_SAVE_NEEDS_RESET: &str = "Problem needs to be reset prior to save.";
pub const MSG_SAVED: &str = "Your answers have been saved.";
pub const MSG_SAVED_NOT_GRADED: &str =
    "Your answers have been saved but not graded. Click 'Submit' to grade them.";
pub const MSG_RESET_CLOSED: &str = "You cannot select Reset for a problem that is closed.";
pub const MSG_RESET_NOT_DONE: &str = "You must submit an answer before you can select Reset.";
pub const MSG_RESCORE_UNSUPPORTED: &str = "Problem's definition does not support rescoring.";
pub const MSG_RESCORE_UNANSWERED: &str = "Problem must be answered before it can be graded again.";
pub const MSG_ANSWER_UNAVAILABLE: &str = "Answer is not available";
pub const MSG_NO_HINTS: &str = "This problem has no hints.";

/// Placeholder shown above a problem rebuilt after a render failure.
pub const CORRUPT_STATE_NOTICE: &str = "Problem reset due to corrupt state";

const STATUS_TEMPLATE: &str = "status_span.html";

/// Collaborators the engine talks to.
#[derive(Clone)]
pub struct EngineServices {
    pub store: Arc<dyn FieldStore>,
    pub renderer: Arc<dyn RenderService>,
    pub publisher: Arc<dyn EventPublisher>,
    pub sandbox: Arc<dyn Sandbox>,
    pub clock: Arc<dyn Clock>,
    pub script_cache: Option<Arc<ScriptCache>>,
}

/// Outcome of a submit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitResult {
    /// `correct`, `incorrect`, `partially-correct`, `submitted`, or a
    /// message explaining why nothing was graded.
    pub success: String,

    /// Whether the submission counted as an attempt.
    pub graded: bool,

    pub attempts: u32,
    pub score: Score,

    /// Problem html after grading; empty when nothing was graded.
    pub contents: String,

    /// Work for the external grader runtime.
    pub submissions: Vec<QueueSubmission>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaveResult {
    pub success: bool,
    pub msg: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResetResult {
    pub success: bool,
    pub html: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RescoreResult {
    pub original: Score,
    pub score: Score,
    /// Whether a rescore event was published.
    pub published: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HintResult {
    pub hint_index: usize,
    pub hint_len: usize,
    pub hint_html: String,
    pub should_enable_next_hint: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerResult {
    pub answers: BTreeMap<String, String>,
    pub correct_status_html: String,
}

/// State machine for one learner on one problem.
pub struct ProblemLifecycleEngine {
    definition: Arc<ProblemDefinition>,
    config: Arc<EngineConfig>,
    learner: LearnerContext,
    services: EngineServices,
    seeds: SeedManager,
    state: AttemptState,
    /// Raw `attempts` field as last read or written.
    stored_attempts: Option<JsonValue>,
    problem: AuthoredProblem,
}

impl std::fmt::Debug for ProblemLifecycleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProblemLifecycleEngine")
            .field("problem_id", &self.definition.problem_id)
            .field("learner", &self.learner)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

fn build_problem(
    definition: &Arc<ProblemDefinition>,
    seed: u32,
    state: ProblemState,
    services: &EngineServices,
) -> Result<AuthoredProblem, ProblemError> {
    let env = ProblemEnv {
        sandbox: services.sandbox.as_ref(),
        script_cache: services.script_cache.as_deref(),
    };
    AuthoredProblem::new(definition.clone(), seed, state, env).map_err(|e| {
        tracing::error!(problem_id = %definition.problem_id, seed, error = %e, "Failed to build problem");
        e
    })
}

impl ProblemLifecycleEngine {
    /// Load the learner's state and build the problem.
    pub fn new(
        definition: Arc<ProblemDefinition>,
        config: Arc<EngineConfig>,
        learner: LearnerContext,
        services: EngineServices,
    ) -> Result<Self, EngineError> {
        Self::with_seed_manager(definition, config, learner, services, SeedManager::new())
    }

    /// Like [`new`](Self::new), drawing random seeds from `seeds`.
    ///
    /// A seed is chosen and persisted the first time the learner's state is
    /// seen.
    pub fn with_seed_manager(
        definition: Arc<ProblemDefinition>,
        config: Arc<EngineConfig>,
        learner: LearnerContext,
        services: EngineServices,
        mut seeds: SeedManager,
    ) -> Result<Self, EngineError> {
        let store = services.store.clone();
        let stored_attempts = store.get(state::FIELD_ATTEMPTS)?;
        let mut attempt_state = AttemptState::load(store.as_ref())?;

        let seed = seeds.ensure_seed(
            definition.settings.rerandomize,
            learner.learner_id.as_deref(),
            &definition.problem_id,
            attempt_state.seed,
        );
        let seed_changed = attempt_state.seed != Some(seed);
        attempt_state.seed = Some(seed);

        let problem = build_problem(&definition, seed, attempt_state.problem_state(), &services)?;
        if seed_changed {
            store.set(state::FIELD_SEED, json!(seed))?;
        }

        let mut engine = Self {
            definition,
            config,
            learner,
            services,
            seeds,
            state: attempt_state,
            stored_attempts,
            problem,
        };
        if engine.state.score.is_none() {
            engine.state.score = Some(engine.reported_score());
        }
        Ok(engine)
    }

    pub fn problem(&self) -> &AuthoredProblem {
        &self.problem
    }

    pub fn state(&self) -> &AttemptState {
        &self.state
    }

    pub fn settings(&self) -> &ProblemSettings {
        &self.definition.settings
    }

    pub fn seed(&self) -> u32 {
        self.problem.seed()
    }

    pub fn attempts(&self) -> u32 {
        self.state.attempts
    }

    /// The reported score.
    pub fn score(&self) -> Score {
        self.state.score.unwrap_or_else(|| self.reported_score())
    }

    pub fn is_correct(&self) -> bool {
        self.problem.is_correct()
    }

    /// Controls visible to this learner right now.
    pub fn disclosure(&self) -> Disclosure {
        self.policy(self.now()).evaluate(self.problem.hints().len())
    }

    /// Weighted progress `(earned, possible)`.
    ///
    /// `None` when nothing can be earned or the weight is zero.
    pub fn get_progress(&self) -> Option<(f64, f64)> {
        let score = self.score();
        if score.raw_possible <= 0.0 {
            return None;
        }
        match self.definition.settings.weight {
            Some(weight) if weight <= 0.0 => None,
            Some(weight) => Some((score.raw_earned * weight / score.raw_possible, weight)),
            None => Some((score.raw_earned, score.raw_possible)),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.services.clock.now()
    }

    fn policy(&self, now: DateTime<Utc>) -> DisclosurePolicy<'_> {
        DisclosurePolicy::new(
            &self.definition.settings,
            AttemptView {
                attempts: self.state.attempts,
                done: self.state.done,
                is_correct: self.is_correct(),
            },
            now,
            self.learner.is_staff,
        )
    }

    fn must_reset(&self) -> bool {
        self.state.done && self.definition.settings.rerandomize == Rerandomize::Always
    }

    fn reported_score(&self) -> Score {
        let current = self.problem.calculate_score(None);
        self.definition.settings.grading_method.reported_score(
            &self.state.score_history,
            current,
            f64::from(self.problem.get_max_score()),
        )
    }

    fn variant(&self) -> Option<u32> {
        match self.definition.settings.rerandomize {
            Rerandomize::Never => None,
            _ => self.state.seed,
        }
    }

    /// Publish an event with every answer set reported under canonical names.
    fn publish_unmasked(&self, event: &str, mut payload: JsonValue) {
        self.unmask_payload(&mut payload);
        self.services.publisher.publish(event, payload);
    }

    /// Rewrite masked choice names under `answers`/`student_answers` keys,
    /// at any depth. Canonical names pass through unchanged.
    fn unmask_payload(&self, payload: &mut JsonValue) {
        let JsonValue::Object(fields) = payload else {
            return;
        };
        for (key, field) in fields.iter_mut() {
            match key.as_str() {
                "answers" | "student_answers" => {
                    if let Ok(answers) = serde_json::from_value::<StudentAnswers>(field.clone()) {
                        *field = json!(self.problem.unmask_answers(&answers));
                    }
                }
                _ => self.unmask_payload(field),
            }
        }
    }

    fn persist(&mut self) -> Result<(), EngineError> {
        self.state.absorb(&self.problem);
        self.state
            .save(self.services.store.as_ref(), self.stored_attempts.as_ref())?;
        self.stored_attempts = Some(json!(self.state.attempts));
        Ok(())
    }

    fn soft_failure(&self, msg: String) -> SubmitResult {
        SubmitResult {
            success: msg,
            graded: false,
            attempts: self.state.attempts,
            score: self.score(),
            contents: String::new(),
            submissions: Vec::new(),
        }
    }

    fn success_label(&self, map: &CorrectnessMap) -> &'static str {
        if map.any_queued() {
            return "submitted";
        }
        let score = self.problem.calculate_score(Some(map));
        if score.is_full() {
            Correctness::Correct.as_str()
        } else if score.raw_earned > 0.0 {
            Correctness::PartiallyCorrect.as_str()
        } else {
            Correctness::Incorrect.as_str()
        }
    }

    /// Patch every recorded map whose `input_id` waits on `key`, then
    /// recompute the matching history scores.
    fn patch_history(&mut self, key: &str, input_id: &str, patch: impl Fn(&mut CorrectnessEntry)) {
        let problem = &self.problem;
        for (map, score) in self
            .state
            .correct_map_history
            .iter_mut()
            .zip(self.state.score_history.iter_mut())
        {
            if !map.is_right_queuekey(input_id, key) {
                continue;
            }
            if let Some(entry) = map.get_mut(input_id) {
                patch(entry);
            }
            *score = problem.calculate_score(Some(map));
        }
    }

    // ========================================================================
    // Submit
    // ========================================================================

    /// Grade a submission.
    ///
    /// Closed problems and problems awaiting a reset fail with
    /// [`EngineError::NotFound`]. Cooldowns and grader errors are soft: the
    /// result carries the message, `graded` is false, and the attempt count
    /// is unchanged.
    pub fn submit(&mut self, answers: &StudentAnswers) -> Result<SubmitResult, EngineError> {
        let now = self.now();
        let problem_id = self.definition.problem_id.clone();

        if self.policy(now).closed() {
            self.publish_unmasked(
                events::PROBLEM_CHECK_FAIL,
                events::failure(&problem_id, "closed", Some(answers)),
            );
            return Err(EngineError::NotFound(MSG_CLOSED.to_string()));
        }
        if self.must_reset() {
            self.publish_unmasked(
                events::PROBLEM_CHECK_FAIL,
                events::failure(&problem_id, "unreset", Some(answers)),
            );
            return Err(EngineError::NotFound(MSG_MUST_RESET.to_string()));
        }

        if self.problem.is_queued() {
            if let Some(queued_at) = self.problem.get_recentmost_queuetime() {
                let waittime = self.config.queue.waittime;
                if elapsed_seconds(queued_at, now) < waittime.as_secs_f64() {
                    return Ok(self.soft_failure(format!(
                        "You must wait at least {} seconds between submissions.",
                        waittime.as_secs()
                    )));
                }
            }
        }

        let wait = self.definition.settings.submission_wait_seconds;
        if let Some(last) = self.state.last_submission_time.filter(|_| wait > 0) {
            let elapsed = elapsed_seconds(last, now);
            if elapsed < wait as f64 {
                let remaining = (wait as f64 - elapsed).ceil() as u64;
                return Ok(self.soft_failure(format!(
                    "You must wait at least {} seconds between submissions. {} remaining.",
                    wait,
                    pretty_print_seconds(remaining)
                )));
            }
        }

        let script = self.problem.script().clone();
        let queue = self.config.queue_context(&self.learner);
        let sandbox = self.services.sandbox.clone();
        let mut ctx = GradingContext::new(
            &script,
            sandbox.as_ref(),
            self.state.attempts + 1,
            now,
            &queue,
        );

        match self.problem.grade_answers(answers, &mut ctx) {
            Ok(map) => {
                let submissions = std::mem::take(&mut ctx.outbox);
                let recorded = self.problem.student_answers.clone();
                let attempt_score = self.problem.calculate_score(Some(&map));

                self.state.attempts += 1;
                self.state.student_answers_history.push(recorded.clone());
                self.state.correct_map_history.push(map.clone());
                self.state.score_history.push(attempt_score);
                self.state.last_submission_time = Some(now);
                self.state.has_saved_answers = false;
                let score = self.reported_score();
                self.state.score = Some(score);
                self.persist()?;

                let success = self.success_label(&map);
                tracing::info!(
                    problem_id = %problem_id,
                    attempts = self.state.attempts,
                    score = %score,
                    success,
                    queued = submissions.len(),
                    "Submission graded"
                );
                self.publish_unmasked(
                    events::PROBLEM_CHECK,
                    events::problem_check(
                        &self.problem,
                        &recorded,
                        &map,
                        self.state.attempts,
                        attempt_score,
                        success,
                        self.variant(),
                    ),
                );
                self.publish_unmasked(events::GRADE, events::grade(score, false));

                let contents = self.get_problem_html()?;
                Ok(SubmitResult {
                    success: success.to_string(),
                    graded: true,
                    attempts: self.state.attempts,
                    score,
                    contents,
                    submissions,
                })
            }
            Err(err) => {
                tracing::warn!(
                    problem_id = %problem_id,
                    kind = err.kind(),
                    error = %err,
                    "Submission could not be graded"
                );
                self.state.score = Some(self.reported_score());
                self.persist()?;

                let msg = if self.learner.is_staff && self.config.debug {
                    format!("Staff debug info: {}", err)
                } else {
                    err.learner_message().to_string()
                };
                Ok(self.soft_failure(msg))
            }
        }
    }

    // ========================================================================
    // Save and reset
    // ========================================================================

    /// Store answers without grading them.
    pub fn save(&mut self, answers: &StudentAnswers) -> Result<SaveResult, EngineError> {
        let now = self.now();
        let problem_id = self.definition.problem_id.clone();
        let survey = self.definition.settings.is_survey();

        if self.policy(now).closed() && !survey {
            self.publish_unmasked(
                events::SAVE_PROBLEM_FAIL,
                events::failure(&problem_id, "closed", Some(answers)),
            );
            return Err(EngineError::NotFound(MSG_CLOSED.to_string()));
        }
        if self.must_reset() {
            self.publish_unmasked(
                events::SAVE_PROBLEM_FAIL,
                events::failure(&problem_id, "done", Some(answers)),
            );
            return Err(EngineError::NotFound(MSG_SAVE_NEEDS_RESET.to_string()));
        }

        self.problem.student_answers = answers_without_files(answers);
        self.state.has_saved_answers = true;
        self.persist()?;

        tracing::info!(problem_id = %problem_id, "Answers saved");
        self.publish_unmasked(
            events::SAVE_PROBLEM_SUCCESS,
            json!({ "problem_id": problem_id, "answers": self.problem.student_answers }),
        );

        let msg = if survey { MSG_SAVED } else { MSG_SAVED_NOT_GRADED };
        Ok(SaveResult {
            success: true,
            msg: msg.to_string(),
        })
    }

    /// Clear the learner's answers, reseeding when the policy says so.
    ///
    /// Attempts and histories are kept.
    pub fn reset(&mut self) -> Result<ResetResult, EngineError> {
        let now = self.now();
        let problem_id = self.definition.problem_id.clone();
        let settings = &self.definition.settings;

        if self.policy(now).closed() && !settings.is_survey() {
            self.publish_unmasked(
                events::RESET_PROBLEM_FAIL,
                json!({ "problem_id": problem_id, "old_state": self.state.summary(), "failure": "closed" }),
            );
            return Err(EngineError::NotFound(MSG_RESET_CLOSED.to_string()));
        }
        if !self.state.done {
            self.publish_unmasked(
                events::RESET_PROBLEM_FAIL,
                json!({ "problem_id": problem_id, "old_state": self.state.summary(), "failure": "not_done" }),
            );
            return Err(EngineError::NotFound(MSG_RESET_NOT_DONE.to_string()));
        }

        // Masks change with the seed, so unmask against the outgoing problem.
        let mut old_state = self.state.summary();
        self.unmask_payload(&mut old_state);
        let policy = settings.rerandomize;
        let seed = if policy.reseeds_on_reset() {
            self.seeds
                .choose_seed(policy, self.learner.learner_id.as_deref(), &problem_id)
        } else {
            self.seed()
        };

        self.problem = build_problem(&self.definition, seed, ProblemState::default(), &self.services)?;
        self.state.clear_answers();
        self.state.seed = Some(seed);
        self.state.score = Some(self.problem.calculate_score(None));
        self.persist()?;

        tracing::info!(problem_id = %problem_id, seed, "Problem reset");
        self.publish_unmasked(
            events::RESET_PROBLEM,
            json!({ "problem_id": problem_id, "old_state": old_state, "new_state": self.state.summary() }),
        );

        let html = self.get_problem_html()?;
        Ok(ResetResult {
            success: true,
            html,
        })
    }

    // ========================================================================
    // Rescore
    // ========================================================================

    /// Re-grade every recorded submission against the current answer key.
    ///
    /// With `only_if_higher`, state is still updated but events are only
    /// published when the score went up.
    pub fn rescore(&mut self, only_if_higher: bool) -> Result<RescoreResult, EngineError> {
        let problem_id = self.definition.problem_id.clone();

        if !self.problem.supports_rescoring() {
            self.publish_unmasked(
                events::PROBLEM_RESCORE_FAIL,
                events::failure(&problem_id, "unsupported", None),
            );
            return Err(EngineError::RescoreUnsupported(MSG_RESCORE_UNSUPPORTED.to_string()));
        }
        if !self.state.done {
            self.publish_unmasked(
                events::PROBLEM_RESCORE_FAIL,
                events::failure(&problem_id, "unanswered", None),
            );
            return Err(EngineError::NotFound(MSG_RESCORE_UNANSWERED.to_string()));
        }

        let original = self.score();
        let now = self.now();
        let script = self.problem.script().clone();
        let queue = self.config.queue_context(&self.learner);
        let sandbox = self.services.sandbox.clone();
        let attempt = self.state.attempts.max(1);

        let mut maps = Vec::with_capacity(self.state.student_answers_history.len());
        let empty = CorrectnessMap::new();
        for (index, answers) in self.state.student_answers_history.iter().enumerate() {
            let baseline = self.state.correct_map_history.get(index).unwrap_or(&empty);
            let mut ctx = GradingContext::new(&script, sandbox.as_ref(), attempt, now, &queue);
            match self
                .problem
                .get_grade_from_current_answers(Some(answers), baseline, &mut ctx)
            {
                Ok(map) => maps.push(map),
                Err(err) => {
                    tracing::warn!(problem_id = %problem_id, error = %err, "Rescore failed");
                    self.publish_unmasked(
                        events::PROBLEM_RESCORE_FAIL,
                        events::failure(&problem_id, "input_error", None),
                    );
                    return Err(err.into());
                }
            }
        }

        let current = match maps.last() {
            Some(map) => map.clone(),
            None => {
                let mut ctx = GradingContext::new(&script, sandbox.as_ref(), attempt, now, &queue);
                self.problem
                    .get_grade_from_current_answers(None, &self.problem.correct_map, &mut ctx)?
            }
        };

        self.state.score_history = maps
            .iter()
            .map(|map| self.problem.calculate_score(Some(map)))
            .collect();
        self.state.correct_map_history = maps;
        self.problem.correct_map = current;
        let score = self.reported_score();
        self.state.score = Some(score);
        self.persist()?;

        let published = !only_if_higher || score.raw_earned > original.raw_earned;
        tracing::info!(
            problem_id = %problem_id,
            original = %original,
            score = %score,
            published,
            "Problem rescored"
        );
        if published {
            self.publish_unmasked(
                events::PROBLEM_RESCORE,
                events::rescore(&problem_id, original, score, self.state.attempts),
            );
            self.publish_unmasked(events::GRADE, events::grade(score, only_if_higher));
        }

        Ok(RescoreResult {
            original,
            score,
            published,
        })
    }

    // ========================================================================
    // Hints and answers
    // ========================================================================

    /// Show a demand hint; the index wraps around the hint count.
    pub fn get_hint(&self, hint_index: usize) -> Result<HintResult, EngineError> {
        let hints = self.problem.hints();
        if hints.is_empty() {
            return Err(EngineError::NotFound(MSG_NO_HINTS.to_string()));
        }
        let hint_len = hints.len();
        let index = hint_index % hint_len;
        let text = &hints[index];

        self.publish_unmasked(
            events::DEMANDHINT_DISPLAYED,
            events::demand_hint(&self.definition.problem_id, index, hint_len, text),
        );

        let html = format!(
            "<div class=\"problem-hint\"><strong>Hint ({} of {}): </strong>{}</div>",
            index + 1,
            hint_len,
            text
        );
        Ok(HintResult {
            hint_index: index,
            hint_len,
            hint_html: self.services.renderer.replace_urls(&html),
            should_enable_next_hint: should_enable_next_hint(index, hint_len),
        })
    }

    /// Reveal the authored answers, if the policy allows.
    pub fn get_answer(&self) -> Result<AnswerResult, EngineError> {
        if !self.policy(self.now()).answer_available() {
            return Err(EngineError::NotFound(MSG_ANSWER_UNAVAILABLE.to_string()));
        }
        self.publish_unmasked(
            events::SHOWANSWER,
            json!({ "problem_id": self.definition.problem_id }),
        );

        let renderer = &self.services.renderer;
        let answers = self
            .problem
            .get_question_answers()
            .into_iter()
            .map(|(id, answer)| {
                let text = match answer {
                    JsonValue::String(s) => s,
                    other => other.to_string(),
                };
                (id, renderer.replace_urls(&text))
            })
            .collect();
        let correct_status_html = renderer.render_template(
            STATUS_TEMPLATE,
            &json!({ "status": "correct", "status_text": "Correct" }),
        )?;

        Ok(AnswerResult {
            answers,
            correct_status_html,
        })
    }

    // ========================================================================
    // External grader
    // ========================================================================

    /// Record the queue's reply to a dispatched submission.
    ///
    /// On success the input stays queued and shows the reply. On failure the
    /// input stops waiting and shows why; the attempt is not rolled back.
    pub fn settle_dispatch(
        &mut self,
        submission: &QueueSubmission,
        reply: &QueueReply,
    ) -> Result<(), EngineError> {
        let key = submission.header.lms_key.as_str();
        let input_id = submission.input_id.as_str();
        if !self.problem.correct_map.is_right_queuekey(input_id, key) {
            tracing::debug!(input = %input_id, lms_key = %key, "Dispatch settled for a superseded submission");
            return Ok(());
        }

        let settle = |entry: &mut CorrectnessEntry| {
            if reply.is_success() {
                entry.msg = reply.content.clone();
            } else {
                entry.correctness = Correctness::Incomplete;
                entry.npoints = Some(0.0);
                entry.queuestate = None;
                entry.msg = dispatch_failure_message(&reply.content);
            }
        };

        self.patch_history(key, input_id, &settle);
        if let Some(entry) = self.problem.correct_map.get_mut(input_id) {
            settle(entry);
        }
        if !reply.is_success() {
            tracing::warn!(
                problem_id = %self.definition.problem_id,
                input = %input_id,
                lms_key = %key,
                reason = %reply.content,
                "Submission could not be delivered to the external grader"
            );
        }

        self.state.score = Some(self.reported_score());
        self.persist()
    }

    /// Apply a callback from the external grader.
    ///
    /// Returns `false` without touching state when no input waits on the
    /// callback's key.
    pub fn update_score(
        &mut self,
        kind: CallbackKind,
        message: &CallbackMessage,
    ) -> Result<bool, EngineError> {
        let key = message.lms_key().to_string();
        if self.problem.correct_map.find_queued(&key).is_none() {
            tracing::warn!(
                problem_id = %self.definition.problem_id,
                lms_key = %key,
                "Discarding callback with unknown queue key"
            );
            return Ok(false);
        }

        match kind {
            CallbackKind::ScoreUpdate => {
                let Some(input_id) = self.problem.update_score(&message.body, &key) else {
                    return Ok(false);
                };
                let Some(entry) = self.problem.correct_map.get(&input_id).cloned() else {
                    return Ok(false);
                };
                self.patch_history(&key, &input_id, |e| *e = entry.clone());

                let score = self.reported_score();
                self.state.score = Some(score);
                self.persist()?;
                tracing::info!(
                    problem_id = %self.definition.problem_id,
                    input = %input_id,
                    lms_key = %key,
                    score = %score,
                    "External grader score applied"
                );
                self.publish_unmasked(events::GRADE, events::grade(score, false));
            }
            CallbackKind::UngradedResponse => {
                let Some(input_id) = self.problem.ungraded_response(&message.body, &key) else {
                    return Ok(false);
                };
                self.patch_history(&key, &input_id, |e| e.queuestate = None);
                self.persist()?;
                tracing::info!(
                    problem_id = %self.definition.problem_id,
                    input = %input_id,
                    lms_key = %key,
                    "External grader response stored"
                );
            }
        }
        Ok(true)
    }

    // ========================================================================
    // Rendering
    // ========================================================================

    /// Render the problem for this learner.
    ///
    /// A render failure is treated as corrupt state: the problem is rebuilt
    /// without learner answers and rendered again under a notice.
    pub fn get_problem_html(&mut self) -> Result<String, EngineError> {
        let show_correctness = self.policy(self.now()).correctness_available();
        match self
            .problem
            .get_html(self.services.renderer.as_ref(), show_correctness)
        {
            Ok(html) => Ok(html),
            Err(err) => {
                tracing::warn!(
                    problem_id = %self.definition.problem_id,
                    error = %err,
                    "Problem render failed, re-initializing from a fresh state"
                );
                let seed = self.seed();
                self.problem =
                    build_problem(&self.definition, seed, ProblemState::default(), &self.services)?;
                self.state.clear_answers();
                self.state.score = Some(self.problem.calculate_score(None));
                self.persist()?;

                let html = self
                    .problem
                    .get_html(self.services.renderer.as_ref(), show_correctness)?;
                Ok(format!(
                    "<div class=\"problem-reset\">{}</div>{}",
                    CORRUPT_STATE_NOTICE, html
                ))
            }
        }
    }
}

fn elapsed_seconds(since: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - since).num_milliseconds() as f64 / 1000.0
}

/// Format seconds as `H hours M minutes S seconds`, omitting zero parts.
pub fn pretty_print_seconds(total: u64) -> String {
    if total == 0 {
        return "0 seconds".to_string();
    }
    let unit = |n: u64, one: &str, many: &str| {
        format!("{} {}", n, if n == 1 { one } else { many })
    };
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    let mut parts = Vec::new();
    if hours > 0 {
        parts.push(unit(hours, "hour", "hours"));
    }
    if minutes > 0 {
        parts.push(unit(minutes, "minute", "minutes"));
    }
    if seconds > 0 {
        parts.push(unit(seconds, "second", "seconds"));
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests;
