//! Grading methods.
//!
//! A grading method collapses the per-attempt score history into the score
//! reported to the gradebook. Scores are compared on `raw_earned`.

use serde::{Deserialize, Serialize};

use crate::types::Score;

/// How the score history is reduced to a single reported score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradingMethod {
    #[default]
    Last,
    First,
    Highest,
    Average,
}

impl GradingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            GradingMethod::Last => "last",
            GradingMethod::First => "first",
            GradingMethod::Highest => "highest",
            GradingMethod::Average => "average",
        }
    }

    /// Compute the reported score.
    ///
    /// # Arguments
    ///
    /// * `history` - One score per successful submit, oldest first
    /// * `current` - Score of the current correctness map, used when the history is empty
    /// * `max_score` - Problem maximum, used as `raw_possible` for averages
    pub fn reported_score(&self, history: &[Score], current: Score, max_score: f64) -> Score {
        let fallback = [current];
        let history = if history.is_empty() {
            &fallback[..]
        } else {
            history
        };

        match self {
            GradingMethod::Last => history[history.len() - 1],
            GradingMethod::First => history[0],
            GradingMethod::Highest => history
                .iter()
                .skip(1)
                .fold(history[0], |best, score| {
                    if score.raw_earned > best.raw_earned {
                        *score
                    } else {
                        best
                    }
                }),
            GradingMethod::Average => {
                let total: f64 = history.iter().map(|s| s.raw_earned).sum();
                let mean = total / history.len() as f64;
                Score::new(round_hundredths(mean), max_score)
            }
        }
    }
}

fn round_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn history(earned: &[f64]) -> Vec<Score> {
        earned.iter().map(|e| Score::new(*e, 1.0)).collect()
    }

    #[test]
    fn test_highest_picks_best_attempt() {
        let scores = history(&[0.2, 0.8, 0.5]);
        let reported = GradingMethod::Highest.reported_score(&scores, Score::default(), 1.0);
        assert_eq!(reported.raw_earned, 0.8);
        assert_eq!(reported.raw_possible, 1.0);
    }

    #[test]
    fn test_last_and_first() {
        let scores = history(&[0.2, 0.8, 0.5]);
        assert_eq!(
            GradingMethod::Last.reported_score(&scores, Score::default(), 1.0).raw_earned,
            0.5
        );
        assert_eq!(
            GradingMethod::First.reported_score(&scores, Score::default(), 1.0).raw_earned,
            0.2
        );
    }

    #[test]
    fn test_average_rounds_to_two_places() {
        let scores = history(&[1.0, 0.0, 0.0]);
        let reported = GradingMethod::Average.reported_score(&scores, Score::default(), 1.0);
        assert_eq!(reported.raw_earned, 0.33);
        assert_eq!(reported.raw_possible, 1.0);
    }

    #[test]
    fn test_empty_history_uses_current() {
        let current = Score::new(0.5, 2.0);
        for method in [
            GradingMethod::Last,
            GradingMethod::First,
            GradingMethod::Highest,
        ] {
            assert_eq!(method.reported_score(&[], current, 2.0), current);
        }
        assert_eq!(
            GradingMethod::Average.reported_score(&[], current, 2.0),
            Score::new(0.5, 2.0)
        );
    }

    #[test]
    fn test_deserialize_method_names() {
        let method: GradingMethod = serde_json::from_str("\"highest\"").unwrap();
        assert_eq!(method, GradingMethod::Highest);
    }

    proptest! {
        #[test]
        fn test_reported_score_within_history_bounds(
            earned in proptest::collection::vec(0.0f64..=3.0, 1..12)
        ) {
            let scores: Vec<Score> = earned.iter().map(|e| Score::new(*e, 3.0)).collect();
            let min = earned.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = earned.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            for method in [GradingMethod::Last, GradingMethod::First, GradingMethod::Highest] {
                let reported = method.reported_score(&scores, Score::default(), 3.0);
                prop_assert!(reported.raw_earned >= min && reported.raw_earned <= max);
            }
            let highest = GradingMethod::Highest.reported_score(&scores, Score::default(), 3.0);
            prop_assert_eq!(highest.raw_earned, max);
        }
    }
}
