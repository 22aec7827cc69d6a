//! Per-input grading verdicts.
//!
//! A `CorrectnessMap` maps input ids to the verdict a grader reached for that
//! input, together with feedback, points, and the queue token of a pending
//! external grade. The map is an owned value: the problem owns the current
//! map and graders return fresh maps that are merged into it.
//!
//! The serialized form is a plain object keyed by input id, which is what the
//! field store persists. The overall message is transient and is not stored.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// `strftime` layout of queue timestamps.
pub const QUEUE_TIME_FORMAT: &str = "%Y%m%d%H%M%S";

/// Grading verdict for a single input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Correctness {
    #[serde(rename = "correct")]
    Correct,
    #[default]
    #[serde(rename = "incorrect")]
    Incorrect,
    #[serde(rename = "partially-correct")]
    PartiallyCorrect,
    /// Waiting on an external grader.
    #[serde(rename = "incomplete")]
    Incomplete,
}

impl Correctness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Correctness::Correct => "correct",
            Correctness::Incorrect => "incorrect",
            Correctness::PartiallyCorrect => "partially-correct",
            Correctness::Incomplete => "incomplete",
        }
    }
}

impl fmt::Display for Correctness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token identifying a submission waiting in an external queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueState {
    pub key: String,
    /// Submission time formatted with [`QUEUE_TIME_FORMAT`].
    pub time: String,
}

impl QueueState {
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(&self.time, QUEUE_TIME_FORMAT)
            .ok()
            .map(|naive| naive.and_utc())
    }
}

/// Verdict and feedback for one input.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CorrectnessEntry {
    #[serde(default)]
    pub correctness: Correctness,

    /// Points earned; `None` means derive from the verdict.
    #[serde(default)]
    pub npoints: Option<f64>,

    #[serde(default)]
    pub msg: String,

    #[serde(default)]
    pub hint: String,

    #[serde(default)]
    pub hintmode: Option<String>,

    /// Context variable named by the authored answer, if any.
    #[serde(default)]
    pub answervariable: Option<String>,

    #[serde(default)]
    pub queuestate: Option<QueueState>,
}

impl CorrectnessEntry {
    pub fn new(correctness: Correctness) -> Self {
        Self {
            correctness,
            ..Default::default()
        }
    }

    pub fn with_npoints(mut self, npoints: f64) -> Self {
        self.npoints = Some(npoints);
        self
    }

    pub fn with_msg(mut self, msg: impl Into<String>) -> Self {
        self.msg = msg.into();
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>, hintmode: Option<String>) -> Self {
        self.hint = hint.into();
        self.hintmode = hintmode;
        self
    }

    pub fn with_answervariable(mut self, variable: impl Into<String>) -> Self {
        self.answervariable = Some(variable.into());
        self
    }

    pub fn with_queuestate(mut self, queuestate: QueueState) -> Self {
        self.queuestate = Some(queuestate);
        self
    }
}

/// Mapping from input id to grading verdict.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CorrectnessMap {
    entries: BTreeMap<String, CorrectnessEntry>,
    overall_message: String,
}

impl CorrectnessMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// A map holding a single verdict.
    pub fn single(id: impl Into<String>, entry: CorrectnessEntry) -> Self {
        let mut map = Self::new();
        map.set(id, entry);
        map
    }

    /// Set (replace) the entry for an input.
    pub fn set(&mut self, id: impl Into<String>, entry: CorrectnessEntry) {
        self.entries.insert(id.into(), entry);
    }

    pub fn get(&self, id: &str) -> Option<&CorrectnessEntry> {
        self.entries.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut CorrectnessEntry> {
        self.entries.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get_correctness(&self, id: &str) -> Option<Correctness> {
        self.entries.get(id).map(|e| e.correctness)
    }

    /// Whether the input was graded fully correct.
    pub fn is_correct(&self, id: &str) -> bool {
        self.get_correctness(id) == Some(Correctness::Correct)
    }

    pub fn is_partially_correct(&self, id: &str) -> bool {
        self.get_correctness(id) == Some(Correctness::PartiallyCorrect)
    }

    /// Whether the input is waiting on an external grader.
    pub fn is_queued(&self, id: &str) -> bool {
        self.entries
            .get(id)
            .map(|e| e.queuestate.is_some())
            .unwrap_or(false)
    }

    /// Whether the input is waiting on exactly this queue key.
    pub fn is_right_queuekey(&self, id: &str, key: &str) -> bool {
        self.entries
            .get(id)
            .and_then(|e| e.queuestate.as_ref())
            .map(|q| q.key == key)
            .unwrap_or(false)
    }

    /// Input id waiting on `key`, if any.
    pub fn find_queued(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, e)| e.queuestate.as_ref().map(|q| q.key == key).unwrap_or(false))
            .map(|(id, _)| id.as_str())
    }

    pub fn any_queued(&self) -> bool {
        self.entries.values().any(|e| e.queuestate.is_some())
    }

    /// Points earned on an input.
    ///
    /// An explicit `npoints` wins; otherwise a correct verdict is worth 1 and
    /// anything else 0.
    pub fn get_npoints(&self, id: &str) -> f64 {
        match self.entries.get(id) {
            Some(CorrectnessEntry {
                npoints: Some(points),
                ..
            }) => *points,
            Some(entry) if entry.correctness == Correctness::Correct => 1.0,
            _ => 0.0,
        }
    }

    pub fn get_msg(&self, id: &str) -> &str {
        self.entries.get(id).map(|e| e.msg.as_str()).unwrap_or("")
    }

    pub fn get_hint(&self, id: &str) -> &str {
        self.entries.get(id).map(|e| e.hint.as_str()).unwrap_or("")
    }

    /// Merge another map into this one; entries from `other` win.
    pub fn update(&mut self, other: &CorrectnessMap) {
        for (id, entry) in &other.entries {
            self.entries.insert(id.clone(), entry.clone());
        }
        if !other.overall_message.is_empty() {
            self.overall_message = other.overall_message.clone();
        }
    }

    /// Most recent queue submission time across all entries.
    pub fn get_queuetime_latest(&self) -> Option<DateTime<Utc>> {
        self.entries
            .values()
            .filter_map(|e| e.queuestate.as_ref())
            .filter_map(QueueState::timestamp)
            .max()
    }

    pub fn overall_message(&self) -> &str {
        &self.overall_message
    }

    pub fn set_overall_message(&mut self, msg: impl Into<String>) {
        self.overall_message = msg.into();
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CorrectnessEntry)> {
        self.entries.iter().map(|(id, e)| (id.as_str(), e))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize to the persisted object form.
    pub fn get_dict(&self) -> serde_json::Value {
        serde_json::to_value(&self.entries).unwrap_or_else(|_| serde_json::json!({}))
    }

    /// Rebuild from the persisted object form.
    pub fn from_dict(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        let entries = BTreeMap::<String, CorrectnessEntry>::deserialize(value)?;
        Ok(Self {
            entries,
            overall_message: String::new(),
        })
    }
}

impl Serialize for CorrectnessMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.entries.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CorrectnessMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self {
            entries: BTreeMap::deserialize(deserializer)?,
            overall_message: String::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn queued(key: &str, time: &str) -> CorrectnessEntry {
        CorrectnessEntry::new(Correctness::Incomplete).with_queuestate(QueueState {
            key: key.to_string(),
            time: time.to_string(),
        })
    }

    #[test]
    fn test_npoints_defaults() {
        let mut map = CorrectnessMap::new();
        map.set("1_2_1", CorrectnessEntry::new(Correctness::Correct));
        map.set("1_2_2", CorrectnessEntry::new(Correctness::Incorrect));
        map.set(
            "1_2_3",
            CorrectnessEntry::new(Correctness::PartiallyCorrect).with_npoints(0.25),
        );

        assert_eq!(map.get_npoints("1_2_1"), 1.0);
        assert_eq!(map.get_npoints("1_2_2"), 0.0);
        assert_eq!(map.get_npoints("1_2_3"), 0.25);
        assert_eq!(map.get_npoints("missing"), 0.0);
    }

    #[test]
    fn test_update_right_wins() {
        let mut left = CorrectnessMap::single("a", CorrectnessEntry::new(Correctness::Incorrect));
        left.set("b", CorrectnessEntry::new(Correctness::Correct));
        let right = CorrectnessMap::single(
            "a",
            CorrectnessEntry::new(Correctness::Correct).with_msg("nice"),
        );

        left.update(&right);
        assert!(left.is_correct("a"));
        assert_eq!(left.get_msg("a"), "nice");
        assert!(left.is_correct("b"));
    }

    #[test]
    fn test_queue_tracking() {
        let mut map = CorrectnessMap::new();
        map.set("a", queued("k1", "20260101120000"));
        map.set("b", queued("k2", "20260101120500"));
        map.set("c", CorrectnessEntry::new(Correctness::Correct));

        assert!(map.is_queued("a"));
        assert!(!map.is_queued("c"));
        assert!(map.is_right_queuekey("b", "k2"));
        assert!(!map.is_right_queuekey("b", "k1"));
        assert_eq!(map.find_queued("k1"), Some("a"));
        assert_eq!(map.find_queued("nope"), None);
        assert_eq!(
            map.get_queuetime_latest(),
            Some(Utc.with_ymd_and_hms(2026, 1, 1, 12, 5, 0).unwrap())
        );
    }

    #[test]
    fn test_dict_roundtrip_uses_wire_names() {
        let mut map = CorrectnessMap::new();
        map.set(
            "1_2_1",
            CorrectnessEntry::new(Correctness::PartiallyCorrect).with_npoints(0.5),
        );
        map.set_overall_message("transient");

        let dict = map.get_dict();
        assert_eq!(dict["1_2_1"]["correctness"], "partially-correct");

        let restored = CorrectnessMap::from_dict(&dict).unwrap();
        assert_eq!(restored.get_npoints("1_2_1"), 0.5);
        assert_eq!(restored.overall_message(), "");
    }

    #[test]
    fn test_from_dict_tolerates_sparse_entries() {
        let dict = serde_json::json!({ "1_2_1": { "correctness": "correct" } });
        let map = CorrectnessMap::from_dict(&dict).unwrap();
        assert!(map.is_correct("1_2_1"));
        assert_eq!(map.get_msg("1_2_1"), "");
        assert!(!map.is_queued("1_2_1"));
    }
}
