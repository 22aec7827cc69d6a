//! External grader queue protocol.
//!
//! Queued graders don't grade inline. They emit a [`QueueSubmission`] that the
//! runtime delivers to the external queue, and later the queue calls back with
//! a [`CallbackMessage`] carrying the verdict. The `lms_key` in the header is
//! the only thing tying a callback to the waiting input.
//!
//! ## Wire format
//!
//! ```text
//! xqueue_header: {"lms_callback_url": ..., "lms_key": <32 hex md5>, "queue_name": ...}
//! xqueue_body:   opaque string
//! reply:         {"return_code": 0|1, "content": ...}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::correctness::QUEUE_TIME_FORMAT;
use crate::types::FileHandle;

/// Reply content when the queue can't be reached.
pub const CANNOT_CONNECT: &str = "cannot connect to server";

/// Reply content when the queue accepted the connection but the read failed.
pub const FAILED_TO_READ: &str = "failed to read from the server";

/// Reply content when the body isn't a reply object.
pub const UNEXPECTED_REPLY: &str = "unexpected reply from server";

/// Reply content asking the client to authenticate.
pub const LOGIN_REQUIRED: &str = "login_required";

/// Message stored on an input whose callback can't be parsed.
pub const INVALID_GRADER_REPLY: &str = "Invalid grader reply. Please contact the course staff.";

/// Message stored on an input when no queue is configured.
pub const NO_GRADER_CONFIGURED: &str = "Error: No grader has been set up for this problem.";

/// Routing header sent with every submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueHeader {
    #[serde(default)]
    pub lms_callback_url: String,

    pub lms_key: String,

    #[serde(default)]
    pub queue_name: String,
}

impl QueueHeader {
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// One submission waiting to be delivered to the external queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSubmission {
    /// Input the eventual callback patches.
    pub input_id: String,
    pub header: QueueHeader,
    /// Opaque body, already serialized.
    pub body: String,
    #[serde(default)]
    pub files: Vec<FileHandle>,
}

/// Reply to a submit or login request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueReply {
    pub return_code: i64,
    pub content: String,
}

impl QueueReply {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            return_code: 0,
            content: content.into(),
        }
    }

    pub fn failure(content: impl Into<String>) -> Self {
        Self {
            return_code: 1,
            content: content.into(),
        }
    }

    /// Parse a reply body; anything other than a reply object is a failure.
    pub fn parse(body: &str) -> Self {
        match serde_json::from_str::<QueueReply>(body) {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "Unparsable queue reply");
                Self::failure(UNEXPECTED_REPLY)
            }
        }
    }

    /// Failure for a non-200 HTTP status.
    pub fn unexpected_status(status: u16) -> Self {
        Self::failure(format!("unexpected HTTP status code [{}]", status))
    }

    pub fn is_success(&self) -> bool {
        self.return_code == 0
    }

    pub fn is_login_required(&self) -> bool {
        self.return_code == 1 && self.content == LOGIN_REQUIRED
    }
}

/// Queue key for a submission: md5 hex of seed, time, learner, and input.
pub fn make_queue_key(seed: u32, qtime: &str, anonymous_id: &str, input_id: &str) -> String {
    let material = format!("{}{}{}{}", seed, qtime, anonymous_id, input_id);
    format!("{:x}", md5::compute(material.as_bytes()))
}

pub fn format_queue_time(time: DateTime<Utc>) -> String {
    time.format(QUEUE_TIME_FORMAT).to_string()
}

/// Message for an input whose submission never reached the queue.
pub fn dispatch_failure_message(reason: &str) -> String {
    format!(
        "Unable to deliver your submission to grader (Reason: {}). Please try again later.",
        reason
    )
}

/// What an incoming callback does to the waiting input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackKind {
    /// Patch the verdict and recompute the score.
    ScoreUpdate,
    /// Store the reply for display; the score is untouched.
    UngradedResponse,
}

/// Callback delivered by the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackMessage {
    pub header: QueueHeader,
    /// Body as sent by the grader, unparsed.
    pub body: String,
}

impl CallbackMessage {
    /// Parse `{xqueue_header, xqueue_body}`.
    ///
    /// Either field may arrive as a JSON string or an inline object.
    pub fn from_json(value: &JsonValue) -> Result<Self, String> {
        let header = match value.get("xqueue_header") {
            Some(JsonValue::String(s)) => serde_json::from_str::<QueueHeader>(s),
            Some(other) => serde_json::from_value::<QueueHeader>(other.clone()),
            None => return Err("missing xqueue_header".to_string()),
        }
        .map_err(|e| format!("invalid xqueue_header: {}", e))?;

        let body = match value.get("xqueue_body") {
            Some(JsonValue::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => return Err("missing xqueue_body".to_string()),
        };

        Ok(Self { header, body })
    }

    pub fn lms_key(&self) -> &str {
        &self.header.lms_key
    }
}

/// Graded reply carried in a callback body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreMessage {
    pub correct: bool,
    pub score: f64,
    pub msg: String,
}

impl ScoreMessage {
    /// Parse a callback body; `None` if it isn't a valid score message.
    pub fn parse(body: &str) -> Option<Self> {
        let value: JsonValue = serde_json::from_str(body).ok()?;
        let correct = value.get("correct")?.as_bool()?;
        let score = match value.get("score")? {
            JsonValue::Number(n) => n.as_f64()?,
            JsonValue::String(s) => s.trim().parse().ok()?,
            _ => return None,
        };
        let msg = value.get("msg")?.as_str()?.to_string();
        if !score.is_finite() || score < 0.0 {
            return None;
        }
        Some(Self {
            correct,
            score,
            msg,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_queue_key_is_md5_hex() {
        let key = make_queue_key(1, "20260101120000", "anon", "p1_2_1");
        assert_eq!(key.len(), 32);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(key, make_queue_key(1, "20260101120000", "anon", "p1_2_1"));
        assert_ne!(key, make_queue_key(2, "20260101120000", "anon", "p1_2_1"));
    }

    #[test]
    fn test_format_queue_time() {
        let time = Utc.with_ymd_and_hms(2026, 2, 3, 4, 5, 6).unwrap();
        assert_eq!(format_queue_time(time), "20260203040506");
    }

    #[test]
    fn test_reply_parsing() {
        assert!(QueueReply::parse(r#"{"return_code": 0, "content": "queued"}"#).is_success());
        assert!(QueueReply::parse(r#"{"return_code": 1, "content": "login_required"}"#)
            .is_login_required());
        assert_eq!(
            QueueReply::parse("<html>oops</html>"),
            QueueReply::failure(UNEXPECTED_REPLY)
        );
        assert_eq!(
            QueueReply::unexpected_status(502).content,
            "unexpected HTTP status code [502]"
        );
    }

    #[test]
    fn test_callback_accepts_string_or_object_fields() {
        let stringly = json!({
            "xqueue_header": "{\"lms_key\": \"abc\", \"queue_name\": \"q\"}",
            "xqueue_body": "{\"correct\": true, \"score\": 1, \"msg\": \"ok\"}"
        });
        let inline = json!({
            "xqueue_header": { "lms_key": "abc" },
            "xqueue_body": { "correct": true, "score": 1, "msg": "ok" }
        });
        let a = CallbackMessage::from_json(&stringly).unwrap();
        let b = CallbackMessage::from_json(&inline).unwrap();
        assert_eq!(a.lms_key(), "abc");
        assert_eq!(b.lms_key(), "abc");
        assert_eq!(ScoreMessage::parse(&a.body), ScoreMessage::parse(&b.body));
    }

    #[test]
    fn test_callback_requires_key() {
        let missing = json!({ "xqueue_header": {}, "xqueue_body": "" });
        assert!(CallbackMessage::from_json(&missing).is_err());
    }

    #[test]
    fn test_score_message_validation() {
        let ok = ScoreMessage::parse(r#"{"correct": false, "score": 0.75, "msg": "<p>hi</p>"}"#);
        assert_eq!(
            ok,
            Some(ScoreMessage {
                correct: false,
                score: 0.75,
                msg: "<p>hi</p>".to_string()
            })
        );
        assert_eq!(ScoreMessage::parse(r#"{"correct": true}"#), None);
        assert_eq!(ScoreMessage::parse("not json"), None);
        assert_eq!(
            ScoreMessage::parse(r#"{"correct": true, "score": -1, "msg": ""}"#),
            None
        );
    }
}
