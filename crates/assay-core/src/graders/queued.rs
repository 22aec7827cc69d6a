//! Code and file responses graded by an external queue.
//!
//! Grading emits a [`QueueSubmission`] into the context outbox and leaves the
//! input `incomplete` with a queue state. The verdict arrives later through a
//! callback keyed by the submission's `lms_key`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::collections::BTreeMap;

use super::{GraderBase, GradingContext, ResponseGrader};
use crate::correctness::{Correctness, CorrectnessEntry, CorrectnessMap, QueueState};
use crate::error::GradingError;
use crate::queue::{
    format_queue_time, make_queue_key, QueueHeader, QueueSubmission, NO_GRADER_CONFIGURED,
};
use crate::types::StudentAnswers;

const NO_ANSWER_DISPLAY: &str = "No answer provided.";

/// Authored code or file response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueuedSpec {
    /// Queue to submit to; falls back to the engine's default queue.
    #[serde(default)]
    pub queue_name: Option<String>,

    /// Opaque payload passed through to the external grader.
    #[serde(default)]
    pub grader_payload: String,

    /// Text shown in place of a canonical answer.
    #[serde(default)]
    pub answer_display: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueuedGrader {
    base: GraderBase,
    queue_name: Option<String>,
    grader_payload: String,
    answer_display: String,
    accepts_files: bool,
}

impl QueuedGrader {
    pub fn new(spec: &QueuedSpec, base: GraderBase, accepts_files: bool) -> Self {
        Self {
            base,
            queue_name: spec.queue_name.clone().filter(|q| !q.trim().is_empty()),
            grader_payload: spec.grader_payload.clone(),
            answer_display: spec
                .answer_display
                .clone()
                .unwrap_or_else(|| NO_ANSWER_DISPLAY.to_string()),
            accepts_files,
        }
    }

    pub fn accepts_files(&self) -> bool {
        self.accepts_files
    }
}

impl ResponseGrader for QueuedGrader {
    fn base(&self) -> &GraderBase {
        &self.base
    }

    fn evaluate_answers(
        &self,
        answers: &StudentAnswers,
        _old: &CorrectnessMap,
        ctx: &mut GradingContext<'_>,
    ) -> Result<CorrectnessMap, GradingError> {
        let id = self.base.answer_id();

        let Some(queue_name) = self
            .queue_name
            .clone()
            .or_else(|| ctx.queue.default_queue_name.clone())
        else {
            tracing::warn!(grader = %self.base.id, "No external grader queue configured");
            return Ok(CorrectnessMap::single(
                id,
                CorrectnessEntry::new(Correctness::Incorrect).with_msg(NO_GRADER_CONFIGURED),
            ));
        };

        let qtime = format_queue_time(ctx.now);
        let key = make_queue_key(ctx.seed, &qtime, &ctx.queue.anonymous_id, id);

        let answer = answers.get(id);
        let files = answer.map(|a| a.files().to_vec()).unwrap_or_default();
        let student_response = if self.accepts_files {
            String::new()
        } else {
            answer.map(|a| a.display()).unwrap_or_default()
        };

        let student_info = json!({
            "anonymous_student_id": ctx.queue.anonymous_id,
            "submission_time": qtime,
            "random_seed": ctx.seed,
        });
        let body = json!({
            "grader_payload": self.grader_payload,
            "student_info": student_info.to_string(),
            "student_response": student_response,
        });

        ctx.outbox.push(QueueSubmission {
            input_id: id.to_string(),
            header: QueueHeader {
                lms_callback_url: ctx.queue.callback_url.clone(),
                lms_key: key.clone(),
                queue_name: queue_name.clone(),
            },
            body: body.to_string(),
            files,
        });

        tracing::info!(
            grader = %self.base.id,
            input = %id,
            queue = %queue_name,
            lms_key = %key,
            "Queued submission for external grading"
        );
        Ok(CorrectnessMap::single(
            id,
            CorrectnessEntry::new(Correctness::Incomplete)
                .with_queuestate(QueueState { key, time: qtime }),
        ))
    }

    fn get_answers(&self) -> BTreeMap<String, JsonValue> {
        let mut answers = BTreeMap::new();
        answers.insert(
            self.base.answer_id().to_string(),
            JsonValue::String(self.answer_display.clone()),
        );
        answers
    }

    fn supports_rescoring(&self) -> bool {
        false
    }
}
