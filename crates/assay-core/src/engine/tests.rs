use super::*;
use crate::error::SandboxError;
use crate::graders::Grader;
use crate::queue::{make_queue_key, QueueHeader, QueueReply, INVALID_GRADER_REPLY};
use crate::services::{
    FixedClock, Globals, MemoryFieldStore, NoSandbox, RecordingPublisher, RenderError,
    TemplateRenderer,
};
use crate::settings::ShowAnswer;
use crate::types::{AnswerValue, FileHandle};
use chrono::{Duration, TimeZone};
use proptest::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use std::sync::atomic::{AtomicUsize, Ordering};

const NUMERICAL: &str = r#"
problem_id: p1
settings:
  weight: 2
children:
  - type: response
    grader: { kind: numerical, answer: "3.14" }
    inputs: [{ input_type: textline }]
"#;

const TWO_PART: &str = r#"
problem_id: p1
children:
  - type: response
    label: "Pi"
    grader: { kind: numerical, answer: "3.14" }
    inputs: [{ input_type: textline }]
  - type: response
    label: "Capital of France"
    grader: { kind: string, answer: "Paris" }
    inputs: [{ input_type: textline }]
  - type: demand_hint
    html: "It starts with 3."
  - type: demand_hint
    html: "It is a city."
"#;

const QUEUED: &str = r#"
problem_id: q1
children:
  - type: response
    grader: { kind: code, queue_name: python, grader_payload: "{\"grader\": \"ps1.py\"}" }
    inputs: [{ input_type: textbox }]
"#;

const CUSTOM: &str = r#"
problem_id: c1
children:
  - type: response
    grader: { kind: custom, cfn: check, expect: "42" }
    inputs: [{ input_type: textline }]
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

struct Harness {
    store: Arc<MemoryFieldStore>,
    publisher: Arc<RecordingPublisher>,
    clock: Arc<FixedClock>,
    renderer: Arc<dyn RenderService>,
    sandbox: Arc<dyn Sandbox>,
    config: EngineConfig,
    learner: LearnerContext,
}

impl Harness {
    fn new() -> Self {
        Self {
            store: Arc::new(MemoryFieldStore::new()),
            publisher: Arc::new(RecordingPublisher::new()),
            clock: Arc::new(FixedClock::new(
                Utc.with_ymd_and_hms(2026, 4, 1, 10, 0, 0).unwrap(),
            )),
            renderer: Arc::new(TemplateRenderer::new()),
            sandbox: Arc::new(NoSandbox),
            config: EngineConfig::default(),
            learner: LearnerContext::new("learner-1", "anon-1"),
        }
    }

    fn services(&self) -> EngineServices {
        EngineServices {
            store: self.store.clone(),
            renderer: self.renderer.clone(),
            publisher: self.publisher.clone(),
            sandbox: self.sandbox.clone(),
            clock: self.clock.clone(),
            script_cache: None,
        }
    }

    fn engine(&self, text: &str) -> ProblemLifecycleEngine {
        self.try_engine(text).unwrap()
    }

    fn try_engine(&self, text: &str) -> Result<ProblemLifecycleEngine, EngineError> {
        let definition = Arc::new(ProblemDefinition::from_yaml(text)?);
        ProblemLifecycleEngine::with_seed_manager(
            definition,
            Arc::new(self.config.clone()),
            self.learner.clone(),
            self.services(),
            SeedManager::with_rng(ChaCha20Rng::seed_from_u64(3)),
        )
    }

    fn advance(&self, seconds: i64) {
        self.clock.advance(Duration::seconds(seconds));
    }
}

fn answers(pairs: &[(&str, &str)]) -> StudentAnswers {
    pairs
        .iter()
        .map(|(id, v)| (id.to_string(), AnswerValue::from(*v)))
        .collect()
}

fn with_settings(text: &str, settings: &str) -> String {
    if text.contains("settings:\n") {
        text.replacen("settings:\n", &format!("settings:\n{}\n", settings), 1)
    } else {
        text.replacen("children:", &format!("settings:\n{}\nchildren:", settings), 1)
    }
}

fn callback(key: &str, body: &str) -> CallbackMessage {
    CallbackMessage {
        header: QueueHeader {
            lms_callback_url: String::new(),
            lms_key: key.to_string(),
            queue_name: "python".to_string(),
        },
        body: body.to_string(),
    }
}

// ============================================================================
// Submit
// ============================================================================

#[test]
fn test_numerical_submit_with_weight() {
    let h = Harness::new();
    let mut engine = h.engine(NUMERICAL);

    let result = engine.submit(&answers(&[("p1_2_1", "3.14")])).unwrap();
    assert_eq!(result.success, "correct");
    assert!(result.graded);
    assert_eq!(result.attempts, 1);
    assert_eq!(engine.score(), Score::new(1.0, 1.0));
    assert_eq!(engine.get_progress(), Some((2.0, 2.0)));

    let result = engine.submit(&answers(&[("p1_2_1", "0")])).unwrap();
    assert_eq!(result.success, "incorrect");
    assert_eq!(engine.score(), Score::new(0.0, 1.0));
    assert_eq!(engine.get_progress(), Some((0.0, 2.0)));

    let checks = h.publisher.named(events::PROBLEM_CHECK);
    assert_eq!(checks.len(), 2);
    assert_eq!(checks[0]["success"], "correct");
    assert_eq!(checks[0]["submission"]["p1_2_1"]["answer"], "3.14");
    assert_eq!(h.publisher.named(events::GRADE).len(), 2);
}

#[test]
fn test_rerandomize_always_requires_reset() {
    let h = Harness::new();
    let text = with_settings(NUMERICAL, "  rerandomize: always");
    let mut engine = h.engine(&text);

    engine.submit(&answers(&[("p1_2_1", "3.14")])).unwrap();
    let err = engine.submit(&answers(&[("p1_2_1", "3.14")])).unwrap_err();
    assert_eq!(err.to_string(), MSG_MUST_RESET);
    assert_eq!(engine.attempts(), 1);

    let failures = h.publisher.named(events::PROBLEM_CHECK_FAIL);
    assert_eq!(failures[0]["failure"], "unreset");

    engine.reset().unwrap();
    assert!(engine.submit(&answers(&[("p1_2_1", "3.14")])).unwrap().graded);
}

#[test]
fn test_submission_cooldown() {
    let h = Harness::new();
    let text = with_settings(NUMERICAL, "  submission_wait_seconds: 60");
    let mut engine = h.engine(&text);

    engine.submit(&answers(&[("p1_2_1", "1")])).unwrap();
    h.advance(30);
    let result = engine.submit(&answers(&[("p1_2_1", "3.14")])).unwrap();
    assert!(!result.graded);
    assert_eq!(
        result.success,
        "You must wait at least 60 seconds between submissions. 30 seconds remaining."
    );
    assert_eq!(engine.attempts(), 1);

    h.advance(30);
    assert!(engine.submit(&answers(&[("p1_2_1", "3.14")])).unwrap().graded);
    assert_eq!(engine.attempts(), 2);
}

#[test]
fn test_closed_after_max_attempts() {
    let h = Harness::new();
    let text = with_settings(NUMERICAL, "  max_attempts: 1");
    let mut engine = h.engine(&text);

    engine.submit(&answers(&[("p1_2_1", "1")])).unwrap();
    let err = engine.submit(&answers(&[("p1_2_1", "3.14")])).unwrap_err();
    assert!(matches!(err, EngineError::NotFound(ref msg) if msg == MSG_CLOSED));
    assert_eq!(h.publisher.named(events::PROBLEM_CHECK_FAIL)[0]["failure"], "closed");
}

#[test]
fn test_closed_after_due() {
    let h = Harness::new();
    let text = with_settings(NUMERICAL, "  due: 2026-03-31T00:00:00Z");
    let mut engine = h.engine(&text);
    assert!(engine.disclosure().closed);
    assert!(engine.submit(&answers(&[("p1_2_1", "3.14")])).is_err());
}

#[test]
fn test_grader_error_is_soft() {
    let h = Harness::new();
    let mut engine = h.engine(NUMERICAL);

    let result = engine.submit(&answers(&[("p1_2_1", "3 +")])).unwrap();
    assert!(!result.graded);
    assert_eq!(result.success, "Invalid math syntax: '3 +'");
    assert_eq!(engine.attempts(), 0);
    assert!(engine.state().score_history.is_empty());
    assert_eq!(
        engine.state().student_answers.get("p1_2_1"),
        Some(&AnswerValue::from("3 +"))
    );
}

#[test]
fn test_staff_debug_message() {
    let mut h = Harness::new();
    h.config.debug = true;
    h.learner = h.learner.clone().staff();
    let mut engine = h.engine(NUMERICAL);

    let result = engine.submit(&answers(&[("p1_2_1", "3 +")])).unwrap();
    assert!(result.success.starts_with("Staff debug info: "));
}

/// Sandbox whose check function always raises.
struct RaisingSandbox;

impl Sandbox for RaisingSandbox {
    fn can_execute_unsafe_code(&self) -> bool {
        false
    }

    fn execute(
        &self,
        _code: &str,
        _globals: Globals,
        _files: Option<&[FileHandle]>,
    ) -> Result<Globals, SandboxError> {
        Err(SandboxError::Execution(
            "Traceback (most recent call last):\n  File \"<string>\", line 3, in check\nValueError: bad input"
                .to_string(),
        ))
    }
}

#[test]
fn test_traceback_hidden_from_learner() {
    let mut h = Harness::new();
    h.sandbox = Arc::new(RaisingSandbox);
    let mut engine = h.engine(CUSTOM);

    let result = engine.submit(&answers(&[("c1_2_1", "41")])).unwrap();
    assert!(!result.graded);
    assert_eq!(result.success, "bad input");
    assert_eq!(engine.attempts(), 0);
}

#[test]
fn test_staff_debug_shows_traceback() {
    let mut h = Harness::new();
    h.sandbox = Arc::new(RaisingSandbox);
    h.config.debug = true;
    h.learner = h.learner.clone().staff();
    let mut engine = h.engine(CUSTOM);

    let result = engine.submit(&answers(&[("c1_2_1", "41")])).unwrap();
    assert!(result.success.starts_with("Staff debug info: "));
    assert!(result.success.contains("Traceback (most recent call last)"));
}

#[test]
fn test_partially_correct_label() {
    let h = Harness::new();
    let mut engine = h.engine(TWO_PART);
    let result = engine
        .submit(&answers(&[("p1_2_1", "3.14"), ("p1_3_1", "Rome")]))
        .unwrap();
    assert_eq!(result.success, "partially-correct");
    assert_eq!(engine.score(), Score::new(1.0, 2.0));
}

#[test]
fn test_highest_grading_method() {
    let h = Harness::new();
    let text = with_settings(NUMERICAL, "  grading_method: highest");
    let mut engine = h.engine(&text);

    engine.submit(&answers(&[("p1_2_1", "3.14")])).unwrap();
    engine.submit(&answers(&[("p1_2_1", "0")])).unwrap();
    assert_eq!(engine.score(), Score::new(1.0, 1.0));
    assert_eq!(engine.state().score_history.len(), 2);
}

#[test]
fn test_concurrent_submit_conflicts() {
    let h = Harness::new();
    let mut first = h.engine(NUMERICAL);
    let mut second = h.engine(NUMERICAL);

    first.submit(&answers(&[("p1_2_1", "3.14")])).unwrap();
    let err = second.submit(&answers(&[("p1_2_1", "3.14")])).unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));

    let reloaded = h.engine(NUMERICAL);
    assert_eq!(reloaded.attempts(), 1);
}

// ============================================================================
// Save and reset
// ============================================================================

#[test]
fn test_save_then_submit() {
    let h = Harness::new();
    let mut engine = h.engine(NUMERICAL);
    let given = answers(&[("p1_2_1", "3.14")]);

    let saved = engine.save(&given).unwrap();
    assert_eq!(saved.msg, MSG_SAVED_NOT_GRADED);
    assert!(engine.state().has_saved_answers);
    assert_eq!(engine.attempts(), 0);
    assert_eq!(h.publisher.named(events::SAVE_PROBLEM_SUCCESS).len(), 1);

    engine.submit(&given).unwrap();
    assert!(!engine.state().has_saved_answers);

    let other = Harness::new();
    let mut direct = other.engine(NUMERICAL);
    direct.submit(&given).unwrap();
    assert_eq!(engine.state().correct_map, direct.state().correct_map);
}

#[test]
fn test_survey_save_message() {
    let h = Harness::new();
    let text = with_settings(NUMERICAL, "  max_attempts: 0");
    let mut engine = h.engine(&text);
    let saved = engine.save(&answers(&[("p1_2_1", "7")])).unwrap();
    assert_eq!(saved.msg, MSG_SAVED);
}

#[test]
fn test_save_fails_when_reset_needed() {
    let h = Harness::new();
    let text = with_settings(NUMERICAL, "  rerandomize: always");
    let mut engine = h.engine(&text);
    engine.submit(&answers(&[("p1_2_1", "1")])).unwrap();
    let err = engine.save(&answers(&[("p1_2_1", "2")])).unwrap_err();
    assert_eq!(err.to_string(), MSG_SAVE_NEEDS_RESET);
    assert_eq!(h.publisher.named(events::SAVE_PROBLEM_FAIL).len(), 1);
}

#[test]
fn test_reset_preconditions() {
    let h = Harness::new();
    let text = with_settings(NUMERICAL, "  max_attempts: 1");
    let mut engine = h.engine(&text);

    let err = engine.reset().unwrap_err();
    assert_eq!(err.to_string(), MSG_RESET_NOT_DONE);

    engine.submit(&answers(&[("p1_2_1", "1")])).unwrap();
    let err = engine.reset().unwrap_err();
    assert_eq!(err.to_string(), MSG_RESET_CLOSED);

    let failures = h.publisher.named(events::RESET_PROBLEM_FAIL);
    assert_eq!(failures[0]["failure"], "not_done");
    assert_eq!(failures[1]["failure"], "closed");
}

#[test]
fn test_reset_keeps_attempts_and_fixed_seed() {
    let h = Harness::new();
    let mut engine = h.engine(NUMERICAL);
    engine.submit(&answers(&[("p1_2_1", "3.14")])).unwrap();

    engine.reset().unwrap();
    assert_eq!(engine.attempts(), 1);
    assert_eq!(engine.seed(), 1);
    assert!(!engine.state().done);
    assert!(engine.state().student_answers.is_empty());
    assert_eq!(engine.score(), Score::new(0.0, 1.0));

    let events = h.publisher.named(events::RESET_PROBLEM);
    assert_eq!(events[0]["old_state"]["done"], true);
    assert_eq!(events[0]["new_state"]["done"], false);
}

#[test]
fn test_reset_twice_matches_once() {
    let h = Harness::new();
    let text = with_settings(NUMERICAL, "  rerandomize: per_learner");
    let mut engine = h.engine(&text);
    let seed = engine.seed();
    engine.submit(&answers(&[("p1_2_1", "3.14")])).unwrap();

    engine.reset().unwrap();
    let once = engine.state().clone();
    assert!(engine.reset().is_err());
    assert_eq!(engine.state(), &once);
    assert_eq!(engine.seed(), seed);
    assert_eq!(h.engine(&text).state(), &once);
}

#[test]
fn test_onreset_reseeds() {
    let h = Harness::new();
    let text = with_settings(NUMERICAL, "  rerandomize: onreset");
    let mut engine = h.engine(&text);
    let first = engine.seed();
    assert!(first < 1000);

    let mut seeds = vec![first];
    for _ in 0..5 {
        engine.submit(&answers(&[("p1_2_1", "1")])).unwrap();
        engine.reset().unwrap();
        seeds.push(engine.seed());
    }
    seeds.dedup();
    assert!(seeds.len() > 1);
    assert_eq!(h.engine(&text).seed(), engine.seed());
}

// ============================================================================
// Rescore
// ============================================================================

#[test]
fn test_rescore_against_new_answer_key() {
    let h = Harness::new();
    let mut engine = h.engine(NUMERICAL);
    engine.submit(&answers(&[("p1_2_1", "3")])).unwrap();
    assert_eq!(engine.score().raw_earned, 0.0);

    let fixed = NUMERICAL.replace("3.14", "3");
    let mut engine = h.engine(&fixed);
    let result = engine.rescore(false).unwrap();
    assert_eq!(result.original.raw_earned, 0.0);
    assert_eq!(result.score, Score::new(1.0, 1.0));
    assert!(result.published);
    assert_eq!(engine.attempts(), 1);

    let event = &h.publisher.named(events::PROBLEM_RESCORE)[0];
    assert_eq!(event["orig_score"], 0.0);
    assert_eq!(event["new_score"], 1.0);

    let history = engine.state().score_history.clone();
    engine.rescore(false).unwrap();
    assert_eq!(engine.state().score_history, history);
}

#[test]
fn test_rescore_only_if_higher() {
    let h = Harness::new();
    let mut engine = h.engine(NUMERICAL);
    engine.submit(&answers(&[("p1_2_1", "3.14")])).unwrap();
    h.publisher.clear();

    let broken = NUMERICAL.replace("3.14", "2.71");
    let mut engine = h.engine(&broken);
    let result = engine.rescore(true).unwrap();
    assert!(!result.published);
    assert_eq!(engine.score().raw_earned, 0.0);
    assert!(h.publisher.events().is_empty());
}

#[test]
fn test_rescore_failures() {
    let h = Harness::new();
    let mut engine = h.engine(NUMERICAL);
    let err = engine.rescore(false).unwrap_err();
    assert_eq!(err.to_string(), MSG_RESCORE_UNANSWERED);

    let q = Harness::new();
    let mut queued = q.engine(QUEUED);
    let err = queued.rescore(false).unwrap_err();
    assert!(matches!(err, EngineError::RescoreUnsupported(_)));
    assert_eq!(
        q.publisher.named(events::PROBLEM_RESCORE_FAIL)[0]["failure"],
        "unsupported"
    );
}

// ============================================================================
// Hints and answers
// ============================================================================

#[test]
fn test_hints_wrap() {
    let h = Harness::new();
    let engine = h.engine(TWO_PART);

    let first = engine.get_hint(0).unwrap();
    assert_eq!(first.hint_index, 0);
    assert!(first.should_enable_next_hint);
    assert!(first.hint_html.contains("Hint (1 of 2): "));

    let wrapped = engine.get_hint(3).unwrap();
    assert_eq!(wrapped.hint_index, 1);
    assert!(!wrapped.should_enable_next_hint);

    let events = h.publisher.named(events::DEMANDHINT_DISPLAYED);
    assert_eq!(events[1]["hint_len"], 2);
    assert_eq!(events[1]["hint_text"], "It is a city.");

    let bare = Harness::new().engine(NUMERICAL);
    assert!(matches!(bare.get_hint(0), Err(EngineError::NotFound(_))));
}

#[test]
fn test_answer_available_when_answered() {
    let h = Harness::new();
    let text = with_settings(NUMERICAL, "  showanswer: answered");
    let mut engine = h.engine(&text);

    assert_eq!(
        engine.get_answer().unwrap_err().to_string(),
        MSG_ANSWER_UNAVAILABLE
    );
    engine.submit(&answers(&[("p1_2_1", "3.14")])).unwrap();
    let shown = engine.get_answer().unwrap();
    assert_eq!(shown.answers["p1_2_1"], "3.14");
    assert!(shown.correct_status_html.contains("correct"));
    assert_eq!(h.publisher.named(events::SHOWANSWER).len(), 1);
}

#[test]
fn test_disclosure_snapshot() {
    let h = Harness::new();
    let text = with_settings(TWO_PART, "  showanswer: always\n  max_attempts: 2");
    let engine = h.engine(&text);
    let disclosure = engine.disclosure();
    assert!(disclosure.submit_enabled);
    assert!(disclosure.save_shown);
    assert!(disclosure.answer_visible);
    assert!(disclosure.hint_button_visible);
    assert_eq!(engine.settings().showanswer, ShowAnswer::Always);
}

// ============================================================================
// External grader
// ============================================================================

fn queued_submit(h: &Harness) -> (ProblemLifecycleEngine, QueueSubmission) {
    let mut engine = h.engine(QUEUED);
    let result = engine.submit(&answers(&[("q1_2_1", "print(1)")])).unwrap();
    assert_eq!(result.success, "submitted");
    assert_eq!(result.submissions.len(), 1);
    let submission = result.submissions[0].clone();
    (engine, submission)
}

#[test]
fn test_queue_roundtrip() {
    let h = Harness::new();
    let (mut engine, submission) = queued_submit(&h);
    let key = submission.header.lms_key.clone();
    assert_eq!(
        key,
        make_queue_key(engine.seed(), "20260401100000", "anon-1", "q1_2_1")
    );
    assert_eq!(submission.header.queue_name, "python");
    assert!(engine.problem().is_queued());
    assert_eq!(
        engine.state().correct_map.get_correctness("q1_2_1"),
        Some(Correctness::Incomplete)
    );

    engine
        .settle_dispatch(&submission, &QueueReply::success("Queued"))
        .unwrap();
    assert!(engine.problem().is_queued());

    let body = r#"{"correct": false, "score": 0.75, "msg": "<p>Most tests pass</p>"}"#;
    let applied = engine
        .update_score(CallbackKind::ScoreUpdate, &callback(&key, body))
        .unwrap();
    assert!(applied);
    assert_eq!(engine.score(), Score::new(0.75, 1.0));
    assert_eq!(engine.state().score_history, vec![Score::new(0.75, 1.0)]);
    assert_eq!(h.publisher.named(events::GRADE).len(), 2);

    let again = engine
        .update_score(CallbackKind::ScoreUpdate, &callback(&key, body))
        .unwrap();
    assert!(!again);
    assert_eq!(h.publisher.named(events::GRADE).len(), 2);
}

#[test]
fn test_unknown_callback_is_noop() {
    let h = Harness::new();
    let (mut engine, _) = queued_submit(&h);
    let before = h.store.snapshot();
    let events_before = h.publisher.events().len();

    let applied = engine
        .update_score(
            CallbackKind::ScoreUpdate,
            &callback("0123456789abcdef0123456789abcdef", "{}"),
        )
        .unwrap();
    assert!(!applied);
    assert_eq!(h.store.snapshot(), before);
    assert_eq!(h.publisher.events().len(), events_before);
}

#[test]
fn test_invalid_callback_body() {
    let h = Harness::new();
    let (mut engine, submission) = queued_submit(&h);
    engine
        .update_score(
            CallbackKind::ScoreUpdate,
            &callback(&submission.header.lms_key, "garbage"),
        )
        .unwrap();
    assert_eq!(
        engine.state().correct_map.get_msg("q1_2_1"),
        INVALID_GRADER_REPLY
    );
    assert_eq!(engine.score().raw_earned, 0.0);
}

#[test]
fn test_ungraded_callback_keeps_score() {
    let h = Harness::new();
    let (mut engine, submission) = queued_submit(&h);
    let applied = engine
        .update_score(
            CallbackKind::UngradedResponse,
            &callback(&submission.header.lms_key, "Output: 1"),
        )
        .unwrap();
    assert!(applied);
    assert_eq!(engine.state().input_state["q1_2_1"]["queue_msg"], "Output: 1");
    assert_eq!(engine.score().raw_earned, 0.0);
    assert!(!engine.problem().is_queued());
    assert_eq!(h.publisher.named(events::GRADE).len(), 1);
}

#[test]
fn test_failed_dispatch_is_not_rolled_back() {
    let h = Harness::new();
    let (mut engine, submission) = queued_submit(&h);
    engine
        .settle_dispatch(&submission, &QueueReply::failure("cannot connect to server"))
        .unwrap();

    assert_eq!(engine.attempts(), 1);
    assert_eq!(engine.state().correct_map_history.len(), 1);
    assert!(!engine.problem().is_queued());
    assert_eq!(
        engine.state().correct_map.get_msg("q1_2_1"),
        "Unable to deliver your submission to grader (Reason: cannot connect to server). Please try again later."
    );
    assert_eq!(engine.score().raw_earned, 0.0);
}

#[test]
fn test_queue_cooldown() {
    let h = Harness::new();
    let (mut engine, _) = queued_submit(&h);
    h.advance(2);
    let result = engine.submit(&answers(&[("q1_2_1", "print(2)")])).unwrap();
    assert!(!result.graded);
    assert_eq!(
        result.success,
        "You must wait at least 5 seconds between submissions."
    );
    h.advance(5);
    assert!(engine.submit(&answers(&[("q1_2_1", "print(2)")])).unwrap().graded);
}

// ============================================================================
// Rendering
// ============================================================================

/// Renderer failing its first `failures` problem renders.
struct FlakyRenderer {
    failures: AtomicUsize,
    inner: TemplateRenderer,
}

impl RenderService for FlakyRenderer {
    fn render_template(&self, name: &str, context: &JsonValue) -> Result<String, RenderError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(RenderError::Failed {
                name: name.to_string(),
                message: "bad state".to_string(),
            });
        }
        self.inner.render_template(name, context)
    }

    fn replace_urls(&self, html: &str) -> String {
        self.inner.replace_urls(html)
    }
}

#[test]
fn test_render_failure_reinitializes() {
    let mut h = Harness::new();
    h.renderer = Arc::new(FlakyRenderer {
        failures: AtomicUsize::new(0),
        inner: TemplateRenderer::new(),
    });
    let mut engine = h.engine(NUMERICAL);
    engine.save(&answers(&[("p1_2_1", "12")])).unwrap();

    let flaky = FlakyRenderer {
        failures: AtomicUsize::new(1),
        inner: TemplateRenderer::new(),
    };
    h.renderer = Arc::new(flaky);
    let mut engine = h.engine(NUMERICAL);
    let html = engine.get_problem_html().unwrap();
    assert!(html.contains(CORRUPT_STATE_NOTICE));
    assert!(engine.state().student_answers.is_empty());
}

#[test]
fn test_pretty_print_seconds() {
    assert_eq!(pretty_print_seconds(0), "0 seconds");
    assert_eq!(pretty_print_seconds(1), "1 second");
    assert_eq!(pretty_print_seconds(61), "1 minute 1 second");
    assert_eq!(pretty_print_seconds(7200), "2 hours");
    assert_eq!(pretty_print_seconds(3725), "1 hour 2 minutes 5 seconds");
}

#[test]
fn test_missing_learner_id_uses_anonymous_bin() {
    let mut h = Harness::new();
    h.learner.learner_id = None;
    let text = with_settings(NUMERICAL, "  rerandomize: per_learner");
    let engine = h.engine(&text);
    assert_eq!(engine.seed(), crate::seed::per_learner_bin("0", "p1"));
}

#[test]
fn test_broken_problem_is_fatal() {
    let h = Harness::new();
    let text = r#"
problem_id: s1
children:
  - type: script
    code: "x = 1"
"#;
    let err = h.try_engine(text).unwrap_err();
    assert!(matches!(err, EngineError::Problem(ProblemError::Sandbox(_))));
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn test_submit_sequence_invariants(
        picks in proptest::collection::vec((0usize..3, 0usize..2), 1..8),
        method in prop_oneof![
            Just("last"), Just("first"), Just("highest"), Just("average")
        ],
    ) {
        let h = Harness::new();
        let text = with_settings(TWO_PART, &format!("  grading_method: {}", method));
        let mut engine = h.engine(&text);
        let numbers = ["3.14", "0", "2"];
        let cities = ["Paris", "Rome"];

        for (n, (a, b)) in picks.iter().enumerate() {
            let result = engine
                .submit(&answers(&[("p1_2_1", numbers[*a]), ("p1_3_1", cities[*b])]))
                .unwrap();
            prop_assert!(result.graded);

            let state = engine.state();
            prop_assert_eq!(state.attempts as usize, n + 1);
            prop_assert_eq!(state.student_answers_history.len(), n + 1);
            prop_assert_eq!(state.correct_map_history.len(), n + 1);
            prop_assert_eq!(state.score_history.len(), n + 1);

            let score = engine.score();
            let max = f64::from(engine.problem().get_max_score());
            prop_assert!(score.raw_earned >= 0.0);
            prop_assert!(score.raw_earned <= score.raw_possible);
            prop_assert!(score.raw_possible <= max);

            let expected = engine.settings().grading_method.reported_score(
                &state.score_history,
                engine.problem().calculate_score(None),
                max,
            );
            prop_assert_eq!(score, expected);
        }
    }

    #[test]
    fn test_fixed_seed_under_never(resets in 0usize..4) {
        let h = Harness::new();
        let mut engine = h.engine(NUMERICAL);
        for _ in 0..resets {
            engine.submit(&answers(&[("p1_2_1", "1")])).unwrap();
            engine.reset().unwrap();
            prop_assert_eq!(engine.seed(), 1);
        }
        prop_assert_eq!(engine.seed(), 1);
    }

    #[test]
    fn test_same_seed_same_verdicts(learner in "[a-z]{1,8}", answer in "[0-9]{1,3}") {
        let text = with_settings(NUMERICAL, "  rerandomize: per_learner");
        let mut first = Harness::new();
        first.learner = LearnerContext::new(learner.clone(), "anon");
        let mut second = Harness::new();
        second.learner = LearnerContext::new(learner, "anon");

        let mut a = first.engine(&text);
        let mut b = second.engine(&text);
        prop_assert_eq!(a.seed(), b.seed());
        a.submit(&answers(&[("p1_2_1", answer.as_str())])).unwrap();
        b.submit(&answers(&[("p1_2_1", answer.as_str())])).unwrap();
        prop_assert_eq!(&a.state().correct_map, &b.state().correct_map);
        prop_assert_eq!(a.score(), b.score());
    }
}

// ============================================================================
// Event unmasking
// ============================================================================

fn shown_name(engine: &ProblemLifecycleEngine, canonical: &str) -> String {
    let Some(Grader::MultipleChoice(choice)) = engine.problem().grader_for_input("m1_2_1") else {
        panic!("expected a choice grader");
    };
    choice.display_name(canonical).unwrap().to_string()
}

#[test]
fn test_failure_and_save_events_report_canonical_names() {
    let h = Harness::new();
    let text = with_settings(SHUFFLED, "  max_attempts: 1");
    let mut engine = h.engine(&text);
    let shown = shown_name(&engine, "choice_1");
    assert!(shown.starts_with("mask_"));

    engine.save(&answers(&[("m1_2_1", shown.as_str())])).unwrap();
    engine.submit(&answers(&[("m1_2_1", shown.as_str())])).unwrap();
    assert!(engine.submit(&answers(&[("m1_2_1", shown.as_str())])).is_err());
    assert!(engine.reset().is_err());

    let saved = h.publisher.named(events::SAVE_PROBLEM_SUCCESS);
    assert_eq!(saved[0]["answers"]["m1_2_1"], "choice_1");
    let checked = h.publisher.named(events::PROBLEM_CHECK);
    assert_eq!(checked[0]["answers"]["m1_2_1"], "choice_1");
    let failed = h.publisher.named(events::PROBLEM_CHECK_FAIL);
    assert_eq!(failed[0]["failure"], "closed");
    assert_eq!(failed[0]["answers"]["m1_2_1"], "choice_1");
    let reset_failed = h.publisher.named(events::RESET_PROBLEM_FAIL);
    assert_eq!(reset_failed[0]["old_state"]["student_answers"]["m1_2_1"], "choice_1");
}

#[test]
fn test_reset_event_unmasks_against_outgoing_seed() {
    let h = Harness::new();
    let text = with_settings(SHUFFLED, "  rerandomize: onreset");
    let mut engine = h.engine(&text);
    let shown = shown_name(&engine, "choice_2");

    engine.submit(&answers(&[("m1_2_1", shown.as_str())])).unwrap();
    engine.reset().unwrap();

    let events = h.publisher.named(events::RESET_PROBLEM);
    assert_eq!(events[0]["old_state"]["student_answers"]["m1_2_1"], "choice_2");
    assert!(events[0]["new_state"]["student_answers"]
        .as_object()
        .map_or(true, |answers| answers.is_empty()));
}
