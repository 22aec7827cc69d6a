//! External grader coordination.
//!
//! The engine is synchronous: a submit that reaches a queued grader returns
//! the submissions it wants delivered. The coordinator sends them, hands the
//! replies back to the engine, and later routes queue callbacks to it.
//!
//! ```text
//! submit ──▶ engine.submit ──▶ submissions ──▶ ExternalGrader (concurrently)
//!                                                   │
//!                     engine.settle_dispatch ◀──────┘
//!
//! callback ──▶ CallbackMessage::from_json ──▶ engine.update_score
//! ```

use assay_core::{
    CallbackKind, CallbackMessage, ProblemLifecycleEngine, QueueReply, QueueSubmission,
    StudentAnswers, SubmitResult,
};
use futures::future::join_all;
use serde_json::Value as JsonValue;
use std::sync::Arc;

use crate::error::RuntimeError;
use crate::grader::ExternalGrader;

/// Drives submissions to an external grader and applies its callbacks.
#[derive(Clone)]
pub struct ExternalGraderCoordinator {
    grader: Arc<dyn ExternalGrader>,
}

impl std::fmt::Debug for ExternalGraderCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalGraderCoordinator")
            .field("grader", &self.grader.name())
            .finish()
    }
}

impl ExternalGraderCoordinator {
    pub fn new(grader: Arc<dyn ExternalGrader>) -> Self {
        Self { grader }
    }

    /// Submit answers and deliver any queued work.
    ///
    /// The returned result is the engine's; delivery outcomes are recorded
    /// in the engine's state.
    pub async fn submit(
        &self,
        engine: &mut ProblemLifecycleEngine,
        answers: &StudentAnswers,
    ) -> Result<SubmitResult, RuntimeError> {
        let result = engine.submit(answers)?;
        if !result.submissions.is_empty() {
            self.dispatch(engine, &result.submissions).await?;
        }
        Ok(result)
    }

    /// Deliver submissions and settle each reply with the engine.
    ///
    /// Transport failures never abort the batch: they become canonical
    /// failure replies for the affected input.
    pub async fn dispatch(
        &self,
        engine: &mut ProblemLifecycleEngine,
        submissions: &[QueueSubmission],
    ) -> Result<Vec<QueueReply>, RuntimeError> {
        let replies = join_all(submissions.iter().map(|s| self.deliver(s))).await;
        for (submission, reply) in submissions.iter().zip(&replies) {
            engine.settle_dispatch(submission, reply)?;
        }
        Ok(replies)
    }

    async fn deliver(&self, submission: &QueueSubmission) -> QueueReply {
        match self.grader.send_to_queue(submission).await {
            Ok(reply) => {
                tracing::debug!(
                    grader = self.grader.name(),
                    input = %submission.input_id,
                    lms_key = %submission.header.lms_key,
                    return_code = reply.return_code,
                    "Submission delivered"
                );
                reply
            }
            Err(e) => {
                tracing::warn!(
                    grader = self.grader.name(),
                    input = %submission.input_id,
                    lms_key = %submission.header.lms_key,
                    error = %e,
                    "Submission delivery failed"
                );
                e.to_reply()
            }
        }
    }

    /// Apply a queue callback `{xqueue_header, xqueue_body}`.
    ///
    /// Returns `false` when the callback's key matches nothing outstanding.
    pub fn handle_callback(
        &self,
        engine: &mut ProblemLifecycleEngine,
        kind: CallbackKind,
        payload: &JsonValue,
    ) -> Result<bool, RuntimeError> {
        let message = CallbackMessage::from_json(payload).map_err(RuntimeError::InvalidCallback)?;
        Ok(engine.update_score(kind, &message)?)
    }
}
