//! Custom responses checked by author code.
//!
//! Two modes:
//!
//! - **cfn**: the problem's scripts are re-run with a trailing
//!   `cfn_return = <cfn>(expect, ans)` and the returned value is interpreted.
//! - **inline**: the grader's own code runs with `submission`, `expect`,
//!   `correct`, `messages` and `overall_message` bound, and leaves its verdict
//!   in those globals (optionally with `grade_decimals`).
//!
//! All execution goes through the [`Sandbox`](crate::services::Sandbox); a
//! host without one can't grade custom responses.
//!
//! ## Return shapes (cfn mode)
//!
//! | Value | Meaning |
//! |-------|---------|
//! | `true` / `false` | every input correct or incorrect |
//! | `{ok, msg, grade_decimal?}` | every input shares the verdict |
//! | `{overall_message, input_list: [{ok, msg, grade_decimal?}]}` | one verdict per input |
//!
//! An `ok` string containing `partial` means partially correct.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::collections::BTreeMap;

use super::{GraderBase, GradingContext, ResponseGrader};
use crate::correctness::{Correctness, CorrectnessEntry, CorrectnessMap};
use crate::error::{GradingError, ProblemError};
use crate::script::ScriptContext;
use crate::services::Globals;
use crate::types::{FileHandle, StudentAnswers};

const DEFAULT_PARTIAL_CREDIT: f64 = 0.5;

/// Authored custom response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CustomSpec {
    /// Name of a check function defined by the problem's scripts.
    #[serde(default)]
    pub cfn: Option<String>,

    /// Expected answer handed to the check function.
    #[serde(default)]
    pub expect: Option<String>,

    /// Inline check code, used when `cfn` is absent.
    #[serde(default)]
    pub answer_code: Option<String>,

    /// Points for a partially correct verdict without an explicit grade.
    #[serde(default)]
    pub partial_credit: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
enum CheckMode {
    Function(String),
    Inline(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CustomGrader {
    base: GraderBase,
    mode: CheckMode,
    expect: Option<String>,
    partial_credit: f64,
}

/// Verdict for one input as reported by author code.
#[derive(Debug, Clone, PartialEq)]
struct InputVerdict {
    correctness: Correctness,
    msg: String,
    grade_decimal: Option<f64>,
}

impl CustomGrader {
    pub fn new(
        spec: &CustomSpec,
        base: GraderBase,
        script: &ScriptContext,
    ) -> Result<Self, ProblemError> {
        let mode = match (&spec.cfn, &spec.answer_code) {
            (Some(cfn), _) if !cfn.trim().is_empty() => CheckMode::Function(cfn.trim().to_string()),
            (_, Some(code)) if !code.trim().is_empty() => CheckMode::Inline(code.clone()),
            _ => {
                return Err(ProblemError::Configuration(format!(
                    "Custom response {} has neither a check function nor answer code",
                    base.id
                )))
            }
        };

        Ok(Self {
            base,
            mode,
            expect: spec.expect.as_deref().map(|e| script.contextualize(e)),
            partial_credit: spec.partial_credit.unwrap_or(DEFAULT_PARTIAL_CREDIT),
        })
    }

    fn expect_value(&self) -> JsonValue {
        self.expect
            .clone()
            .map(JsonValue::String)
            .unwrap_or(JsonValue::Null)
    }

    fn run_function(
        &self,
        cfn: &str,
        submission: &[JsonValue],
        files: Option<&[FileHandle]>,
        ctx: &GradingContext<'_>,
    ) -> Result<(Vec<InputVerdict>, String), GradingError> {
        let ans = match submission {
            [single] => single.clone(),
            many => JsonValue::Array(many.to_vec()),
        };
        let mut globals: Globals = ctx.script.bindings().clone();
        globals.insert("expect".to_string(), self.expect_value());
        globals.insert("ans".to_string(), ans);

        let code = format!(
            "{}\ncfn_return = {}(expect, ans)\n",
            ctx.script.script_code, cfn
        );
        let out = ctx.sandbox.execute(&code, globals, files)?;
        let returned = out.get("cfn_return").cloned().unwrap_or(JsonValue::Null);
        interpret_return(&returned, submission.len())
    }

    fn run_inline(
        &self,
        code: &str,
        ids: &[&str],
        submission: &[JsonValue],
        files: Option<&[FileHandle]>,
        ctx: &GradingContext<'_>,
    ) -> Result<(Vec<InputVerdict>, String), GradingError> {
        let mut globals: Globals = ctx.script.bindings().clone();
        globals.insert("response_id".to_string(), json!(self.base.id));
        globals.insert("expect".to_string(), self.expect_value());
        globals.insert("submission".to_string(), JsonValue::Array(submission.to_vec()));
        globals.insert("idset".to_string(), json!(ids));
        globals.insert("correct".to_string(), json!(vec!["unknown"; ids.len()]));
        globals.insert("messages".to_string(), json!(vec![""; ids.len()]));
        globals.insert("overall_message".to_string(), json!(""));

        let out = ctx.sandbox.execute(code, globals, files)?;

        let list = |name: &str| -> Vec<JsonValue> {
            out.get(name)
                .and_then(JsonValue::as_array)
                .cloned()
                .unwrap_or_default()
        };
        let correct = list("correct");
        let messages = list("messages");
        let decimals = list("grade_decimals");

        let verdicts = (0..ids.len())
            .map(|k| InputVerdict {
                correctness: correct
                    .get(k)
                    .and_then(JsonValue::as_str)
                    .and_then(|s| serde_json::from_value(json!(s)).ok())
                    .filter(|c| *c != Correctness::Incomplete)
                    .unwrap_or(Correctness::Incorrect),
                msg: messages
                    .get(k)
                    .and_then(JsonValue::as_str)
                    .unwrap_or_default()
                    .to_string(),
                grade_decimal: decimals.get(k).and_then(JsonValue::as_f64),
            })
            .collect();
        let overall = out
            .get("overall_message")
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_string();
        Ok((verdicts, overall))
    }

    fn points(&self, verdict: &InputVerdict) -> f64 {
        match verdict.grade_decimal {
            Some(decimal) => decimal.clamp(0.0, 1.0),
            None => match verdict.correctness {
                Correctness::Correct => 1.0,
                Correctness::PartiallyCorrect => self.partial_credit,
                _ => 0.0,
            },
        }
    }
}

impl ResponseGrader for CustomGrader {
    fn base(&self) -> &GraderBase {
        &self.base
    }

    fn evaluate_answers(
        &self,
        answers: &StudentAnswers,
        _old: &CorrectnessMap,
        ctx: &mut GradingContext<'_>,
    ) -> Result<CorrectnessMap, GradingError> {
        let ids: Vec<&str> = self.base.input_ids().collect();
        let submission: Vec<JsonValue> = ids
            .iter()
            .map(|id| match answers.get(*id) {
                Some(answer) => serde_json::to_value(answer.without_files()).unwrap_or_default(),
                None => JsonValue::String(String::new()),
            })
            .collect();

        if let [id] = ids.as_slice() {
            if answers.get(*id).map_or(true, |a| a.is_empty()) {
                return Ok(CorrectnessMap::single(
                    *id,
                    CorrectnessEntry::new(Correctness::Incorrect),
                ));
            }
        }

        let uploads: Vec<FileHandle> = ids
            .iter()
            .filter_map(|id| answers.get(*id))
            .flat_map(|answer| answer.files().iter().cloned())
            .collect();
        let files = (!uploads.is_empty()).then_some(uploads.as_slice());

        let (verdicts, overall) = match &self.mode {
            CheckMode::Function(cfn) => self.run_function(cfn, &submission, files, ctx)?,
            CheckMode::Inline(code) => self.run_inline(code, &ids, &submission, files, ctx)?,
        };

        let mut map = CorrectnessMap::new();
        map.set_overall_message(overall);
        for (id, verdict) in ids.iter().zip(&verdicts) {
            let entry = CorrectnessEntry::new(verdict.correctness)
                .with_npoints(self.points(verdict))
                .with_msg(verdict.msg.clone());
            map.set(*id, entry);
        }

        tracing::debug!(grader = %self.base.id, inputs = ids.len(), "Graded custom response");
        Ok(map)
    }

    fn get_answers(&self) -> BTreeMap<String, JsonValue> {
        let expect = self.expect.clone().unwrap_or_default();
        self.base
            .input_ids()
            .map(|id| (id.to_string(), JsonValue::String(expect.clone())))
            .collect()
    }
}

/// Verdict encoded by an `ok` value.
fn ok_verdict(ok: &JsonValue) -> Correctness {
    let text = match ok {
        JsonValue::Null => return Correctness::Incorrect,
        JsonValue::Bool(b) => return if *b { Correctness::Correct } else { Correctness::Incorrect },
        JsonValue::Number(n) if n.as_f64() == Some(0.0) => return Correctness::Incorrect,
        JsonValue::String(s) => s.trim().to_lowercase(),
        other => other.to_string().to_lowercase(),
    };
    if text.is_empty() || text == "false" {
        Correctness::Incorrect
    } else if text.contains("partial") {
        Correctness::PartiallyCorrect
    } else {
        Correctness::Correct
    }
}

fn message_of(value: &JsonValue) -> String {
    value
        .get("msg")
        .and_then(JsonValue::as_str)
        .unwrap_or_default()
        .to_string()
}

fn interpret_return(
    returned: &JsonValue,
    inputs: usize,
) -> Result<(Vec<InputVerdict>, String), GradingError> {
    match returned {
        JsonValue::Object(obj) if obj.contains_key("ok") => {
            let verdict = InputVerdict {
                correctness: ok_verdict(&obj["ok"]),
                msg: String::new(),
                grade_decimal: obj.get("grade_decimal").and_then(JsonValue::as_f64),
            };
            let msg = message_of(returned);
            // One input carries the message itself; several share it as the overall message.
            if inputs > 1 {
                Ok((vec![verdict; inputs], msg))
            } else {
                Ok((vec![InputVerdict { msg, ..verdict }], String::new()))
            }
        }
        JsonValue::Object(obj) if obj.contains_key("input_list") => {
            let list = obj["input_list"].as_array().cloned().unwrap_or_default();
            if list.len() != inputs {
                return Err(GradingError::Response(format!(
                    "Check function returned {} results for {} inputs",
                    list.len(),
                    inputs
                )));
            }
            let verdicts = list
                .iter()
                .map(|item| InputVerdict {
                    correctness: ok_verdict(item.get("ok").unwrap_or(&JsonValue::Null)),
                    msg: message_of(item),
                    grade_decimal: item.get("grade_decimal").and_then(JsonValue::as_f64),
                })
                .collect();
            let overall = obj
                .get("overall_message")
                .and_then(JsonValue::as_str)
                .unwrap_or_default()
                .to_string();
            Ok((verdicts, overall))
        }
        JsonValue::Object(_) => Err(GradingError::Response(
            "Check function returned an invalid dictionary".to_string(),
        )),
        other => {
            let verdict = InputVerdict {
                correctness: ok_verdict(other),
                msg: String::new(),
                grade_decimal: None,
            };
            Ok((vec![verdict; inputs], String::new()))
        }
    }
}
