//! Formula response grading by numeric sampling.
//!
//! The authored and submitted expressions are both evaluated at a set of
//! sample points and must agree within tolerance at every one. Sample points
//! come from a generator seeded with the problem seed and the response id, so
//! a learner sees the same verdict every time they submit the same formula.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use super::{student_calc_error, GraderBase, GradingContext, ResponseGrader};
use crate::calc::{evaluate, Tolerance};
use crate::correctness::{Correctness, CorrectnessEntry, CorrectnessMap};
use crate::error::{GradingError, ProblemError};
use crate::script::ScriptContext;
use crate::types::StudentAnswers;

/// Authored formula response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FormulaSpec {
    pub answer: String,

    /// `vars@lows:highs#count`, e.g. `x,y@1,2:3,4#10`.
    pub samples: String,

    #[serde(default)]
    pub tolerance: Option<String>,

    #[serde(default)]
    pub case_sensitive: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct SampleRange {
    name: String,
    low: f64,
    high: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormulaGrader {
    base: GraderBase,
    answer: String,
    ranges: Vec<SampleRange>,
    count: usize,
    tolerance: Tolerance,
    case_sensitive: bool,
    /// Numeric script bindings visible to both expressions.
    constants: BTreeMap<String, f64>,
}

impl FormulaGrader {
    pub fn new(
        spec: &FormulaSpec,
        base: GraderBase,
        script: &ScriptContext,
    ) -> Result<Self, ProblemError> {
        let (ranges, count) = parse_samples(&script.contextualize(&spec.samples))?;
        let tolerance = match &spec.tolerance {
            Some(t) => Tolerance::parse(&script.contextualize(t)).map_err(|e| {
                ProblemError::Configuration(format!("Invalid tolerance '{}': {}", t, e))
            })?,
            None => Tolerance::default(),
        };

        let constants = script
            .bindings()
            .keys()
            .filter_map(|name| script.get_number(name).map(|v| (name.clone(), v)))
            .collect();

        Ok(Self {
            base,
            answer: script.contextualize(spec.answer.trim()),
            ranges,
            count,
            tolerance,
            case_sensitive: spec.case_sensitive,
            constants,
        })
    }

    /// Sample points for this response under `seed`.
    fn sample_points(&self, seed: u32) -> Vec<BTreeMap<String, f64>> {
        let mut rng = ChaCha20Rng::seed_from_u64(sample_seed(seed, &self.base.id));
        (0..self.count)
            .map(|_| {
                let mut point = self.constants.clone();
                for range in &self.ranges {
                    let value = if range.low < range.high {
                        rng.gen_range(range.low..range.high)
                    } else {
                        range.low
                    };
                    point.insert(range.name.clone(), value);
                }
                point
            })
            .collect()
    }
}

impl ResponseGrader for FormulaGrader {
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
        let given = answers
            .get(id)
            .map(|a| a.display().trim().to_string())
            .unwrap_or_default();
        if given.is_empty() {
            return Ok(CorrectnessMap::single(
                id,
                CorrectnessEntry::new(Correctness::Incorrect),
            ));
        }

        let mut correct = true;
        for point in self.sample_points(ctx.seed) {
            let expected = evaluate(&self.answer, &point, self.case_sensitive).map_err(|e| {
                GradingError::Response(format!(
                    "Error in evaluating the authored formula '{}': {}",
                    self.answer, e
                ))
            })?;
            let student = evaluate(&given, &point, self.case_sensitive)
                .map_err(|e| student_calc_error(&given, e))?;
            if !self.tolerance.accepts(student, expected) {
                correct = false;
                break;
            }
        }

        let verdict = if correct {
            Correctness::Correct
        } else {
            Correctness::Incorrect
        };
        tracing::debug!(grader = %self.base.id, input = %id, correctness = %verdict, "Graded formula response");
        Ok(CorrectnessMap::single(id, CorrectnessEntry::new(verdict)))
    }

    fn get_answers(&self) -> BTreeMap<String, JsonValue> {
        let mut answers = BTreeMap::new();
        answers.insert(
            self.base.answer_id().to_string(),
            JsonValue::String(self.answer.clone()),
        );
        answers
    }
}

fn sample_seed(seed: u32, response_id: &str) -> u64 {
    let digest = Sha256::digest(format!("{}:{}", seed, response_id).as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

fn parse_samples(raw: &str) -> Result<(Vec<SampleRange>, usize), ProblemError> {
    let bad = || ProblemError::Configuration(format!("Bad samples specification '{}'", raw));

    let (vars, rest) = raw.split_once('@').ok_or_else(bad)?;
    let (bounds, count) = rest.split_once('#').ok_or_else(bad)?;
    let (lows, highs) = bounds.split_once(':').ok_or_else(bad)?;

    let names: Vec<&str> = vars
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect();
    let parse_all = |list: &str| -> Result<Vec<f64>, ProblemError> {
        list.split(',')
            .map(|v| evaluate(v.trim(), &BTreeMap::new(), true).map_err(|_| bad()))
            .collect()
    };
    let lows = parse_all(lows)?;
    let highs = parse_all(highs)?;
    let count: usize = count.trim().parse().map_err(|_| bad())?;

    if names.is_empty() || lows.len() != names.len() || highs.len() != names.len() || count == 0 {
        return Err(bad());
    }

    let ranges = names
        .into_iter()
        .zip(lows.into_iter().zip(highs))
        .map(|(name, (low, high))| SampleRange {
            name: name.to_string(),
            low: low.min(high),
            high: low.max(high),
        })
        .collect();
    Ok((ranges, count))
}
