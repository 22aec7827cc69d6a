//! External grader trait.

use assay_core::{QueueReply, QueueSubmission};
use async_trait::async_trait;

use crate::error::QueueError;

/// A queue that accepts submissions for asynchronous grading.
///
/// Implementations deliver one submission and report the queue's reply.
/// Transport failures come back as [`QueueError`]; the coordinator turns
/// them into canonical failure replies.
#[async_trait]
pub trait ExternalGrader: Send + Sync {
    /// Deliver a submission to its queue.
    async fn send_to_queue(&self, submission: &QueueSubmission) -> Result<QueueReply, QueueError>;

    /// Short name for logs.
    fn name(&self) -> &str;
}
