//! Image click responses.
//!
//! A click `[x,y]` is correct when it falls inside any authored rectangle
//! (edges included) or strictly inside the convex hull of any authored region.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::collections::BTreeMap;

use super::{GraderBase, GradingContext, ResponseGrader};
use crate::correctness::{Correctness, CorrectnessEntry, CorrectnessMap};
use crate::error::{GradingError, ProblemError};
use crate::problem::definition::InputSpec;
use crate::types::StudentAnswers;

/// Image responses carry their targets on the inputs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImageSpec {}

type Point = (f64, f64);

#[derive(Debug, Clone, PartialEq)]
struct Rect {
    lower: Point,
    upper: Point,
}

impl Rect {
    fn contains(&self, (x, y): Point) -> bool {
        self.lower.0 <= x && x <= self.upper.0 && self.lower.1 <= y && y <= self.upper.1
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ImageTarget {
    id: String,
    rectangle: Option<String>,
    rects: Vec<Rect>,
    /// Convex hulls, counter-clockwise.
    hulls: Vec<Vec<Point>>,
    regions: Vec<Vec<[f64; 2]>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageGrader {
    base: GraderBase,
    targets: Vec<ImageTarget>,
}

impl ImageGrader {
    pub fn new(base: GraderBase, specs: &[InputSpec]) -> Result<Self, ProblemError> {
        let mut targets = Vec::with_capacity(base.inputs.len());
        for (binding, spec) in base.inputs.iter().zip(specs) {
            let rects = match &spec.rectangle {
                Some(raw) => parse_rectangles(raw)?,
                None => Vec::new(),
            };
            let hulls: Vec<Vec<Point>> = spec
                .regions
                .iter()
                .map(|region| convex_hull(region.iter().map(|p| (p[0], p[1])).collect()))
                .collect();
            if rects.is_empty() && hulls.is_empty() {
                return Err(ProblemError::Configuration(format!(
                    "Image input {} needs a rectangle or regions",
                    binding.id
                )));
            }
            targets.push(ImageTarget {
                id: binding.id.clone(),
                rectangle: spec.rectangle.clone(),
                rects,
                hulls,
                regions: spec.regions.clone(),
            });
        }
        Ok(Self { base, targets })
    }
}

impl ResponseGrader for ImageGrader {
    fn base(&self) -> &GraderBase {
        &self.base
    }

    fn evaluate_answers(
        &self,
        answers: &StudentAnswers,
        _old: &CorrectnessMap,
        _ctx: &mut GradingContext<'_>,
    ) -> Result<CorrectnessMap, GradingError> {
        let mut map = CorrectnessMap::new();
        for target in &self.targets {
            let given = answers.get(&target.id).map(|a| a.display()).unwrap_or_default();
            if given.trim().is_empty() {
                map.set(target.id.clone(), CorrectnessEntry::new(Correctness::Incorrect));
                continue;
            }
            let click = parse_click(&given).ok_or_else(|| {
                GradingError::StudentInput(format!(
                    "error grading {} (input={})",
                    target.id, given
                ))
            })?;

            let hit = target.rects.iter().any(|r| r.contains(click))
                || target.hulls.iter().any(|h| strictly_inside(h, click));
            let verdict = if hit {
                Correctness::Correct
            } else {
                Correctness::Incorrect
            };
            map.set(target.id.clone(), CorrectnessEntry::new(verdict));
        }
        Ok(map)
    }

    fn get_answers(&self) -> BTreeMap<String, JsonValue> {
        self.targets
            .iter()
            .map(|t| {
                let answer = match &t.rectangle {
                    Some(rect) => JsonValue::String(rect.clone()),
                    None => json!(t.regions),
                };
                (t.id.clone(), answer)
            })
            .collect()
    }
}

fn parse_pair(text: &str) -> Option<Point> {
    let (x, y) = text.split_once(',')?;
    Some((x.trim().parse().ok()?, y.trim().parse().ok()?))
}

/// Parse a click of the form `[x,y]`.
fn parse_click(text: &str) -> Option<Point> {
    let inner = text.trim().strip_prefix('[')?.strip_suffix(']')?;
    parse_pair(inner)
}

/// Parse `(x1,y1)-(x2,y2);...`; corners may come in any order.
fn parse_rectangles(raw: &str) -> Result<Vec<Rect>, ProblemError> {
    raw.split(';')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(|rect| {
            let bad =
                || ProblemError::Configuration(format!("Bad rectangle specification '{}'", rect));
            let (a, b) = rect.split_once(")-(").ok_or_else(bad)?;
            let a = parse_pair(a.trim().trim_start_matches('(')).ok_or_else(bad)?;
            let b = parse_pair(b.trim().trim_end_matches(')')).ok_or_else(bad)?;
            Ok(Rect {
                lower: (a.0.min(b.0), a.1.min(b.1)),
                upper: (a.0.max(b.0), a.1.max(b.1)),
            })
        })
        .collect()
}

fn cross(o: Point, a: Point, b: Point) -> f64 {
    (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
}

/// Monotone-chain convex hull, counter-clockwise without collinear points.
fn convex_hull(mut points: Vec<Point>) -> Vec<Point> {
    points.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
    points.dedup();
    if points.len() < 3 {
        return points;
    }

    let mut lower: Vec<Point> = Vec::new();
    for &p in &points {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(p);
    }
    let mut upper: Vec<Point> = Vec::new();
    for &p in points.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(p);
    }
    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

fn strictly_inside(hull: &[Point], p: Point) -> bool {
    if hull.len() < 3 {
        return false;
    }
    (0..hull.len()).all(|i| cross(hull[i], hull[(i + 1) % hull.len()], p) > 0.0)
}
