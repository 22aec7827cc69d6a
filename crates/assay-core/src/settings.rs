//! Authored policy attributes of a problem.
//!
//! Policy values arrive as free-form strings from authoring tools, so the
//! enums here parse leniently: legacy aliases are accepted and unrecognized
//! values fall back to the most conservative behaviour with a warning.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::duration_secs;
use crate::grading_method::GradingMethod;

/// When the seed is re-chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Rerandomize {
    /// Fixed seed for every learner.
    #[default]
    Never,
    /// New seed on every reset; a submit must be followed by a reset.
    Always,
    /// New seed when the learner resets.
    OnReset,
    /// Seed derived from the learner and problem ids.
    PerLearner,
}

impl Rerandomize {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "never" | "" => Rerandomize::Never,
            "always" | "true" => Rerandomize::Always,
            "onreset" => Rerandomize::OnReset,
            "per_learner" | "per_student" | "false" => Rerandomize::PerLearner,
            other => {
                tracing::warn!(value = other, "Unrecognized rerandomize policy, treating as never");
                Rerandomize::Never
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Rerandomize::Never => "never",
            Rerandomize::Always => "always",
            Rerandomize::OnReset => "onreset",
            Rerandomize::PerLearner => "per_learner",
        }
    }

    /// Whether a reset picks a fresh seed.
    pub fn reseeds_on_reset(&self) -> bool {
        matches!(self, Rerandomize::Always | Rerandomize::OnReset)
    }
}

impl From<String> for Rerandomize {
    fn from(value: String) -> Self {
        Rerandomize::parse(&value)
    }
}

impl From<Rerandomize> for String {
    fn from(value: Rerandomize) -> Self {
        value.as_str().to_string()
    }
}

/// When the authored answer may be shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ShowAnswer {
    Never,
    Always,
    Answered,
    Attempted,
    AttemptedNoPastDue,
    Closed,
    #[default]
    Finished,
    CorrectOrPastDue,
    PastDue,
    AfterAttempts,
    AfterAllAttempts,
    AfterAllAttemptsOrCorrect,
    /// Anything else; never shows the answer.
    Unrecognized,
}

impl ShowAnswer {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "never" | "" => ShowAnswer::Never,
            "always" => ShowAnswer::Always,
            "answered" => ShowAnswer::Answered,
            "attempted" => ShowAnswer::Attempted,
            "attempted_no_past_due" => ShowAnswer::AttemptedNoPastDue,
            "closed" => ShowAnswer::Closed,
            "finished" => ShowAnswer::Finished,
            "correct_or_past_due" => ShowAnswer::CorrectOrPastDue,
            "past_due" => ShowAnswer::PastDue,
            "after_attempts" => ShowAnswer::AfterAttempts,
            "after_all_attempts" => ShowAnswer::AfterAllAttempts,
            "after_all_attempts_or_correct" => ShowAnswer::AfterAllAttemptsOrCorrect,
            other => {
                tracing::warn!(value = other, "Unrecognized showanswer policy");
                ShowAnswer::Unrecognized
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ShowAnswer::Never => "never",
            ShowAnswer::Always => "always",
            ShowAnswer::Answered => "answered",
            ShowAnswer::Attempted => "attempted",
            ShowAnswer::AttemptedNoPastDue => "attempted_no_past_due",
            ShowAnswer::Closed => "closed",
            ShowAnswer::Finished => "finished",
            ShowAnswer::CorrectOrPastDue => "correct_or_past_due",
            ShowAnswer::PastDue => "past_due",
            ShowAnswer::AfterAttempts => "after_attempts",
            ShowAnswer::AfterAllAttempts => "after_all_attempts",
            ShowAnswer::AfterAllAttemptsOrCorrect => "after_all_attempts_or_correct",
            ShowAnswer::Unrecognized => "unrecognized",
        }
    }
}

impl From<String> for ShowAnswer {
    fn from(value: String) -> Self {
        ShowAnswer::parse(&value)
    }
}

impl From<ShowAnswer> for String {
    fn from(value: ShowAnswer) -> Self {
        value.as_str().to_string()
    }
}

/// When per-input correctness may be shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ShowCorrectness {
    #[default]
    Always,
    PastDue,
    Never,
}

impl ShowCorrectness {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "past_due" => ShowCorrectness::PastDue,
            "never" => ShowCorrectness::Never,
            "always" | "" => ShowCorrectness::Always,
            other => {
                tracing::warn!(value = other, "Unrecognized show_correctness policy, treating as always");
                ShowCorrectness::Always
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ShowCorrectness::Always => "always",
            ShowCorrectness::PastDue => "past_due",
            ShowCorrectness::Never => "never",
        }
    }
}

impl From<String> for ShowCorrectness {
    fn from(value: String) -> Self {
        ShowCorrectness::parse(&value)
    }
}

impl From<ShowCorrectness> for String {
    fn from(value: ShowCorrectness) -> Self {
        value.as_str().to_string()
    }
}

/// Policy attributes attached to an authored problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemSettings {
    #[serde(default)]
    pub rerandomize: Rerandomize,

    #[serde(default)]
    pub showanswer: ShowAnswer,

    #[serde(default)]
    pub show_correctness: ShowCorrectness,

    /// Attempt cap; `None` means unlimited and `Some(0)` marks a survey.
    #[serde(default)]
    pub max_attempts: Option<u32>,

    /// Attempts required before `after_attempts` reveals the answer.
    #[serde(default)]
    pub attempts_before_showanswer: u32,

    /// Minimum seconds between graded submissions.
    #[serde(default)]
    pub submission_wait_seconds: u64,

    #[serde(default)]
    pub due: Option<DateTime<Utc>>,

    /// Extra time after `due` before the problem closes, in seconds.
    #[serde(default, with = "duration_secs::option")]
    pub graceperiod: Option<Duration>,

    #[serde(default)]
    pub weight: Option<f64>,

    #[serde(default)]
    pub grading_method: GradingMethod,

    #[serde(default)]
    pub show_reset_button: bool,

    #[serde(default)]
    pub force_save_button: bool,
}

impl Default for ProblemSettings {
    fn default() -> Self {
        Self {
            rerandomize: Rerandomize::Never,
            showanswer: ShowAnswer::Finished,
            show_correctness: ShowCorrectness::Always,
            max_attempts: None,
            attempts_before_showanswer: 0,
            submission_wait_seconds: 0,
            due: None,
            graceperiod: None,
            weight: None,
            grading_method: GradingMethod::Last,
            show_reset_button: false,
            force_save_button: false,
        }
    }
}

impl ProblemSettings {
    /// Due date extended by the grace period.
    pub fn close_date(&self) -> Option<DateTime<Utc>> {
        let due = self.due?;
        match self.graceperiod {
            Some(grace) => match chrono::Duration::from_std(grace) {
                Ok(grace) => Some(due + grace),
                Err(_) => Some(DateTime::<Utc>::MAX_UTC),
            },
            None => Some(due),
        }
    }

    /// A survey accepts answers but is never graded for attempts.
    pub fn is_survey(&self) -> bool {
        self.max_attempts == Some(0)
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if let Some(weight) = self.weight {
            if weight.is_nan() || weight < 0.0 {
                return Err(format!("weight must be non-negative, got {}", weight));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_rerandomize_aliases() {
        assert_eq!(Rerandomize::parse("true"), Rerandomize::Always);
        assert_eq!(Rerandomize::parse("false"), Rerandomize::PerLearner);
        assert_eq!(Rerandomize::parse("per_student"), Rerandomize::PerLearner);
        assert_eq!(Rerandomize::parse("OnReset"), Rerandomize::OnReset);
        assert_eq!(Rerandomize::parse("sometimes"), Rerandomize::Never);
    }

    #[test]
    fn test_settings_from_yaml_defaults() {
        let settings: ProblemSettings = serde_yaml::from_str("weight: 2").unwrap();
        assert_eq!(settings.rerandomize, Rerandomize::Never);
        assert_eq!(settings.showanswer, ShowAnswer::Finished);
        assert_eq!(settings.grading_method, GradingMethod::Last);
        assert_eq!(settings.weight, Some(2.0));
    }

    #[test]
    fn test_unknown_showanswer_is_unrecognized() {
        let settings: ProblemSettings = serde_yaml::from_str("showanswer: whenever").unwrap();
        assert_eq!(settings.showanswer, ShowAnswer::Unrecognized);
    }

    #[test]
    fn test_close_date_adds_grace() {
        let due = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let settings = ProblemSettings {
            due: Some(due),
            graceperiod: Some(Duration::from_secs(3600)),
            ..Default::default()
        };
        assert_eq!(
            settings.close_date(),
            Some(Utc.with_ymd_and_hms(2026, 3, 1, 13, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_negative_weight_rejected() {
        let settings = ProblemSettings {
            weight: Some(-1.0),
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }
}
