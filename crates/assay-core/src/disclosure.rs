//! Disclosure policy.
//!
//! Pure evaluation of what a learner may see and do, given the authored
//! policy, the attempt state, the clock, and whether the viewer is staff.
//!
//! ## Closure
//!
//! A problem is closed once its attempt cap is used up or once the clock has
//! passed the due date extended by the grace period. A survey
//! (`max_attempts: 0`) is therefore always closed; saving and resetting make
//! an exception for it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::settings::{ProblemSettings, Rerandomize, ShowAnswer, ShowCorrectness};

/// Attempt facts the policy depends on.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AttemptView {
    pub attempts: u32,
    pub done: bool,
    pub is_correct: bool,
}

/// Everything the learner-facing controls need, evaluated at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Disclosure {
    pub closed: bool,
    pub submit_enabled: bool,
    pub reset_shown: bool,
    pub save_shown: bool,
    pub correctness_visible: bool,
    pub answer_visible: bool,
    pub hint_button_visible: bool,
}

/// Disclosure rules bound to one evaluation instant.
#[derive(Debug, Clone, Copy)]
pub struct DisclosurePolicy<'a> {
    settings: &'a ProblemSettings,
    attempt: AttemptView,
    now: DateTime<Utc>,
    staff: bool,
}

impl<'a> DisclosurePolicy<'a> {
    pub fn new(
        settings: &'a ProblemSettings,
        attempt: AttemptView,
        now: DateTime<Utc>,
        staff: bool,
    ) -> Self {
        Self {
            settings,
            attempt,
            now,
            staff,
        }
    }

    pub fn is_past_due(&self) -> bool {
        self.settings
            .close_date()
            .is_some_and(|close| self.now > close)
    }

    pub fn used_all_attempts(&self) -> bool {
        self.settings
            .max_attempts
            .is_some_and(|max| self.attempt.attempts >= max)
    }

    pub fn closed(&self) -> bool {
        self.used_all_attempts() || self.is_past_due()
    }

    fn must_reset(&self) -> bool {
        self.attempt.done && self.settings.rerandomize == Rerandomize::Always
    }

    pub fn submit_enabled(&self) -> bool {
        !self.closed() && !self.must_reset()
    }

    pub fn reset_shown(&self) -> bool {
        if self.closed() && !self.settings.is_survey() {
            return false;
        }
        if self.attempt.done && self.settings.rerandomize.reseeds_on_reset() {
            return true;
        }
        if self.attempt.is_correct {
            return false;
        }
        self.settings.show_reset_button
    }

    pub fn save_shown(&self) -> bool {
        let settings = self.settings;
        if settings.force_save_button {
            let attempts_left = settings
                .max_attempts
                .map_or(true, |max| self.attempt.attempts < max);
            return !self.closed() && attempts_left;
        }
        if settings.max_attempts.is_none() && settings.rerandomize != Rerandomize::Always {
            return false;
        }
        if self.closed() && !settings.is_survey() {
            return false;
        }
        !self.must_reset()
    }

    /// Whether per-input correctness may be shown.
    pub fn correctness_available(&self) -> bool {
        match self.settings.show_correctness {
            ShowCorrectness::Always => true,
            ShowCorrectness::Never => false,
            ShowCorrectness::PastDue => self.staff || self.is_past_due(),
        }
    }

    /// Whether the authored answer may be shown.
    ///
    /// Staff always see the answer unless the policy is `never` or
    /// correctness is withheld.
    pub fn answer_available(&self) -> bool {
        if !self.correctness_available() {
            return false;
        }
        let attempts = self.attempt.attempts;
        match self.settings.showanswer {
            ShowAnswer::Never | ShowAnswer::Unrecognized => false,
            _ if self.staff => true,
            ShowAnswer::Always => true,
            ShowAnswer::Answered => self.attempt.is_correct,
            ShowAnswer::Attempted => attempts >= 1 || self.is_past_due(),
            ShowAnswer::AttemptedNoPastDue => attempts >= 1,
            ShowAnswer::Closed => self.closed(),
            ShowAnswer::Finished => self.closed() || self.attempt.is_correct,
            ShowAnswer::CorrectOrPastDue => self.attempt.is_correct || self.is_past_due(),
            ShowAnswer::PastDue => self.is_past_due(),
            ShowAnswer::AfterAttempts => {
                let mut required = self.settings.attempts_before_showanswer;
                if let Some(max) = self.settings.max_attempts.filter(|m| *m > 0) {
                    required = required.min(max);
                }
                attempts >= required
            }
            ShowAnswer::AfterAllAttempts => self.used_all_attempts(),
            ShowAnswer::AfterAllAttemptsOrCorrect => {
                self.used_all_attempts() || self.attempt.is_correct
            }
        }
    }

    /// Evaluate every control at once.
    pub fn evaluate(&self, hint_count: usize) -> Disclosure {
        Disclosure {
            closed: self.closed(),
            submit_enabled: self.submit_enabled(),
            reset_shown: self.reset_shown(),
            save_shown: self.save_shown(),
            correctness_visible: self.correctness_available(),
            answer_visible: self.answer_available(),
            hint_button_visible: demand_hint_possible(hint_count),
        }
    }
}

pub fn demand_hint_possible(hint_count: usize) -> bool {
    hint_count > 0
}

/// Whether a hint follows the one at `hint_index`.
pub fn should_enable_next_hint(hint_index: usize, hint_count: usize) -> bool {
    hint_index + 1 < hint_count
}
