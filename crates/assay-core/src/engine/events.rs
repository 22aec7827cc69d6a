//! Analytics event names and payloads.
//!
//! Event names are consumed by downstream analytics and must not change.

use serde_json::{json, Value as JsonValue};

use crate::correctness::CorrectnessMap;
use crate::problem::AuthoredProblem;
use crate::types::{Score, StudentAnswers};

pub const PROBLEM_CHECK: &str = "problem_check";
pub const PROBLEM_CHECK_FAIL: &str = "problem_check_fail";
pub const PROBLEM_RESCORE: &str = "problem_rescore";
pub const PROBLEM_RESCORE_FAIL: &str = "problem_rescore_fail";
pub const SAVE_PROBLEM_SUCCESS: &str = "save_problem_success";
pub const SAVE_PROBLEM_FAIL: &str = "save_problem_fail";
pub const RESET_PROBLEM: &str = "reset_problem";
pub const RESET_PROBLEM_FAIL: &str = "reset_problem_fail";
pub const SHOWANSWER: &str = "showanswer";
pub const DEMANDHINT_DISPLAYED: &str = "demandhint_displayed";
pub const GRADE: &str = "grade";

/// Payload of a graded submission.
///
/// Answers are reported under canonical choice names.
pub fn problem_check(
    problem: &AuthoredProblem,
    answers: &StudentAnswers,
    map: &CorrectnessMap,
    attempts: u32,
    score: Score,
    success: &str,
    variant: Option<u32>,
) -> JsonValue {
    let unmasked = problem.unmask_answers(answers);
    let mut payload = json!({
        "problem_id": problem.problem_id(),
        "attempts": attempts,
        "grade": score.raw_earned,
        "max_grade": score.raw_possible,
        "correct_map": map.get_dict(),
        "answers": unmasked,
        "submission": problem.submission_metadata(&unmasked, map, variant),
        "success": success,
    });
    let permutation = problem.permutations();
    if !permutation.is_empty() {
        payload["permutation"] = json!(permutation);
    }
    payload
}

pub fn failure(problem_id: &str, failure: &str, answers: Option<&StudentAnswers>) -> JsonValue {
    let mut payload = json!({ "problem_id": problem_id, "failure": failure });
    if let Some(answers) = answers {
        payload["answers"] = json!(answers);
    }
    payload
}

pub fn grade(score: Score, only_if_higher: bool) -> JsonValue {
    json!({
        "value": score.raw_earned,
        "max_value": score.raw_possible,
        "only_if_higher": only_if_higher,
    })
}

pub fn rescore(problem_id: &str, original: Score, new: Score, attempts: u32) -> JsonValue {
    json!({
        "problem_id": problem_id,
        "orig_score": original.raw_earned,
        "orig_total": original.raw_possible,
        "new_score": new.raw_earned,
        "new_total": new.raw_possible,
        "attempts": attempts,
        "success": if new.is_full() { "correct" } else { "incorrect" },
    })
}

pub fn demand_hint(problem_id: &str, hint_index: usize, hint_len: usize, hint_text: &str) -> JsonValue {
    json!({
        "module_id": problem_id,
        "hint_index": hint_index,
        "hint_len": hint_len,
        "hint_text": hint_text,
    })
}
