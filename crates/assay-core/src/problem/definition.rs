//! Authored problem documents.
//!
//! A problem is a YAML or JSON document: policy settings plus an ordered list
//! of children (prose, scripts, responses, hints, solutions, styles). Documents
//! are checked against `spec/problem.schema.json` and then semantically.
//!
//! ## Example
//!
//! ```yaml
//! problem_id: p1
//! settings:
//!   max_attempts: 3
//!   weight: 2
//! children:
//!   - type: prose
//!     html: "<p>What is pi to two places?</p>"
//!   - type: response
//!     grader:
//!       kind: numerical
//!       answer: "3.14"
//!     inputs:
//!       - input_type: textline
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use super::schema::validate_problem_schema;
use crate::error::ProblemError;
use crate::graders::{
    CheckboxSpec, ChoiceCorrectness, ChoiceSpec, CustomSpec, DropdownOption, DropdownSpec,
    FormulaSpec, ImageSpec, NumericalSpec, QueuedSpec, StringSpec,
};
use crate::settings::ProblemSettings;

fn default_input_type() -> String {
    "textline".to_string()
}

/// One answer-carrying widget.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InputSpec {
    /// Assigned from the response id when absent.
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default = "default_input_type")]
    pub input_type: String,

    #[serde(default)]
    pub label: Option<String>,

    /// Dropdown options.
    #[serde(default)]
    pub options: Vec<DropdownOption>,

    /// Image targets as `(x1,y1)-(x2,y2);...`.
    #[serde(default)]
    pub rectangle: Option<String>,

    /// Image targets as point lists; each list's convex hull is a region.
    #[serde(default)]
    pub regions: Vec<Vec<[f64; 2]>>,
}

/// Grader kind and its authored answer key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GraderSpec {
    Numerical(NumericalSpec),
    MultipleChoice(ChoiceSpec),
    Checkbox(CheckboxSpec),
    #[serde(rename = "option")]
    Dropdown(DropdownSpec),
    #[serde(rename = "string")]
    StringMatch(StringSpec),
    Formula(FormulaSpec),
    Custom(CustomSpec),
    Code(QueuedSpec),
    File(QueuedSpec),
    Image(ImageSpec),
}

impl GraderSpec {
    /// Kind name as authored.
    pub fn kind(&self) -> &'static str {
        match self {
            GraderSpec::Numerical(_) => "numerical",
            GraderSpec::MultipleChoice(_) => "multiple_choice",
            GraderSpec::Checkbox(_) => "checkbox",
            GraderSpec::Dropdown(_) => "option",
            GraderSpec::StringMatch(_) => "string",
            GraderSpec::Formula(_) => "formula",
            GraderSpec::Custom(_) => "custom",
            GraderSpec::Code(_) => "code",
            GraderSpec::File(_) => "file",
            GraderSpec::Image(_) => "image",
        }
    }
}

/// A response: a grader plus the inputs it owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseNode {
    #[serde(default)]
    pub id: Option<String>,

    /// Question text used in submission metadata.
    #[serde(default)]
    pub label: Option<String>,

    pub inputs: Vec<InputSpec>,

    pub grader: GraderSpec,
}

/// A child of the problem root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProblemNode {
    Prose {
        html: String,
    },
    Script {
        code: String,
    },
    Response(ResponseNode),
    DemandHint {
        html: String,
    },
    Solution {
        html: String,
        #[serde(default)]
        explanation_id: Option<String>,
    },
    Style {
        css: String,
    },
}

/// An authored problem document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemDefinition {
    pub problem_id: String,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub settings: ProblemSettings,

    #[serde(default)]
    pub children: Vec<ProblemNode>,
}

/// A response with its ids resolved.
#[derive(Debug, Clone, Copy)]
pub struct BoundResponse<'a> {
    pub id: &'a str,
    pub node: &'a ResponseNode,
}

impl ProblemDefinition {
    /// Parse a problem from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ProblemError> {
        let value: serde_json::Value = serde_yaml::from_str(yaml)?;
        Self::from_value(value)
    }

    /// Parse a problem from JSON string.
    pub fn from_json(json: &str) -> Result<Self, ProblemError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Parse a problem from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ProblemError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse a problem from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ProblemError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    fn from_value(value: serde_json::Value) -> Result<Self, ProblemError> {
        validate_problem_schema(&value).map_err(ProblemError::Schema)?;
        let mut problem: ProblemDefinition = serde_json::from_value(value)?;
        problem.assign_ids();
        problem.validate()?;
        Ok(problem)
    }

    /// Fill in response and input ids that weren't authored.
    ///
    /// Response `n` becomes `{problem_id}_{n+2}` and its input `k` becomes
    /// `{response_id}_{k+1}`.
    pub fn assign_ids(&mut self) {
        let problem_id = self.problem_id.clone();
        let mut index = 0;
        for child in &mut self.children {
            if let ProblemNode::Response(response) = child {
                let response_id = response
                    .id
                    .get_or_insert_with(|| format!("{}_{}", problem_id, index + 2))
                    .clone();
                for (k, input) in response.inputs.iter_mut().enumerate() {
                    input
                        .id
                        .get_or_insert_with(|| format!("{}_{}", response_id, k + 1));
                }
                index += 1;
            }
        }
    }

    /// Validate the problem structure.
    pub fn validate(&self) -> Result<(), ProblemError> {
        if self.problem_id.trim().is_empty() {
            return Err(ProblemError::MissingField("problem_id".to_string()));
        }
        self.settings
            .validate()
            .map_err(ProblemError::Validation)?;

        self.validate_unique_ids()?;
        for response in self.responses() {
            validate_response(response.id, response.node)?;
        }
        Ok(())
    }

    fn validate_unique_ids(&self) -> Result<(), ProblemError> {
        let mut seen = HashSet::new();
        for response in self.responses() {
            if !seen.insert(response.id) {
                return Err(ProblemError::Validation(format!(
                    "Duplicate response id: {}",
                    response.id
                )));
            }
            for input in &response.node.inputs {
                let id = input
                    .id
                    .as_deref()
                    .ok_or_else(|| ProblemError::MissingField("inputs.id".to_string()))?;
                if !seen.insert(id) {
                    return Err(ProblemError::Validation(format!(
                        "Duplicate input id: {}",
                        id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Responses in document order, with resolved ids.
    pub fn responses(&self) -> impl Iterator<Item = BoundResponse<'_>> {
        self.children.iter().filter_map(|child| match child {
            ProblemNode::Response(node) => Some(BoundResponse {
                id: node.id.as_deref().unwrap_or_default(),
                node,
            }),
            _ => None,
        })
    }

    /// Concatenated source of all script children.
    pub fn script_code(&self) -> String {
        self.children
            .iter()
            .filter_map(|child| match child {
                ProblemNode::Script { code } => Some(code.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn hints(&self) -> Vec<&str> {
        self.children
            .iter()
            .filter_map(|child| match child {
                ProblemNode::DemandHint { html } => Some(html.as_str()),
                _ => None,
            })
            .collect()
    }
}

fn validate_response(id: &str, node: &ResponseNode) -> Result<(), ProblemError> {
    if node.inputs.is_empty() {
        return Err(ProblemError::Validation(format!(
            "Response {} has no inputs",
            id
        )));
    }

    match &node.grader {
        GraderSpec::Dropdown(_) => {
            for input in &node.inputs {
                let correct = input.options.iter().filter(|o| o.correct).count();
                if correct > 1 {
                    return Err(ProblemError::Validation(
                        "Dropdown questions can only have one correct answer.".to_string(),
                    ));
                }
                if correct == 0 {
                    return Err(ProblemError::Validation(format!(
                        "Dropdown input {} has no correct option",
                        input.id.as_deref().unwrap_or(id)
                    )));
                }
            }
        }
        GraderSpec::Checkbox(spec) => {
            if let Some(credit) = spec.partial_credit.as_deref() {
                for name in credit.split(',').map(str::trim).filter(|n| !n.is_empty()) {
                    if !matches!(name.to_ascii_lowercase().as_str(), "edc" | "halves" | "false") {
                        return Err(ProblemError::Validation(format!(
                            "Unknown checkbox partial credit '{}'; expected edc or halves",
                            name
                        )));
                    }
                }
            }
        }
        GraderSpec::MultipleChoice(spec) => {
            let pooled = spec.answer_pool.unwrap_or(0) > 0;
            if spec.shuffle && pooled {
                return Err(ProblemError::Validation(
                    "Do not use shuffle and answer-pool at the same time".to_string(),
                ));
            }
            if pooled {
                let correct = spec
                    .choices
                    .iter()
                    .filter(|c| c.correct == ChoiceCorrectness::True)
                    .count();
                if correct == 0 || correct == spec.choices.len() {
                    return Err(ProblemError::Validation(
                        "Choicegroup must include at least 1 correct and 1 incorrect choice"
                            .to_string(),
                    ));
                }
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NUMERICAL: &str = r#"
problem_id: p1
settings:
  weight: 2
children:
  - type: prose
    html: "<p>Pi?</p>"
  - type: response
    grader:
      kind: numerical
      answer: "3.14"
    inputs:
      - input_type: textline
  - type: demand_hint
    html: "Think of circles."
"#;

    #[test]
    fn test_parse_yaml_assigns_ids() {
        let problem = ProblemDefinition::from_yaml(NUMERICAL).unwrap();
        let responses: Vec<_> = problem.responses().collect();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].id, "p1_2");
        assert_eq!(responses[0].node.inputs[0].id.as_deref(), Some("p1_2_1"));
        assert_eq!(responses[0].node.grader.kind(), "numerical");
        assert_eq!(problem.hints(), vec!["Think of circles."]);
        assert_eq!(problem.settings.weight, Some(2.0));
    }

    #[test]
    fn test_ids_follow_response_order() {
        let yaml = r#"
problem_id: p9
children:
  - type: response
    grader: { kind: string, answer: "a" }
    inputs: [{}, {}]
  - type: script
    code: "x = 1"
  - type: response
    id: custom_id
    grader: { kind: string, answer: "b" }
    inputs: [{}]
"#;
        let problem = ProblemDefinition::from_yaml(yaml).unwrap();
        let ids: Vec<_> = problem
            .responses()
            .flat_map(|r| r.node.inputs.iter().filter_map(|i| i.id.clone()))
            .collect();
        assert_eq!(ids, vec!["p9_2_1", "p9_2_2", "custom_id_1"]);
        assert_eq!(problem.script_code(), "x = 1");
    }

    #[test]
    fn test_json_and_yaml_agree() {
        let from_yaml = ProblemDefinition::from_yaml(NUMERICAL).unwrap();
        let json = serde_json::to_string(&from_yaml).unwrap();
        let from_json = ProblemDefinition::from_json(&json).unwrap();
        assert_eq!(from_yaml, from_json);
    }

    #[test]
    fn test_duplicate_input_ids_rejected() {
        let yaml = r#"
problem_id: p1
children:
  - type: response
    grader: { kind: string, answer: "a" }
    inputs: [{id: x}, {id: x}]
"#;
        let err = ProblemDefinition::from_yaml(yaml).unwrap_err();
        assert_eq!(err.to_string(), "Problem validation failed: Duplicate input id: x");
    }

    #[test]
    fn test_dropdown_needs_one_correct_option() {
        let yaml = r#"
problem_id: p1
children:
  - type: response
    grader: { kind: option }
    inputs:
      - input_type: optioninput
        options:
          - { text: a, correct: true }
          - { text: b, correct: true }
"#;
        let err = ProblemDefinition::from_yaml(yaml).unwrap_err();
        assert!(err
            .to_string()
            .contains("Dropdown questions can only have one correct answer."));
    }

    #[test]
    fn test_shuffle_with_answer_pool_rejected() {
        let yaml = r#"
problem_id: p1
children:
  - type: response
    grader:
      kind: multiple_choice
      shuffle: true
      answer_pool: 2
      choices:
        - { text: a, correct: true }
        - { text: b }
    inputs: [{ input_type: choicegroup }]
"#;
        let err = ProblemDefinition::from_yaml(yaml).unwrap_err();
        assert!(err
            .to_string()
            .contains("Do not use shuffle and answer-pool at the same time"));
    }

    #[test]
    fn test_unknown_checkbox_credit_rejected() {
        let yaml = r#"
problem_id: p1
children:
  - type: response
    grader:
      kind: checkbox
      partial_credit: thirds
      choices: [{ text: a, correct: true }]
    inputs: [{ input_type: checkboxgroup }]
"#;
        assert!(ProblemDefinition::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_response_without_inputs_rejected_by_schema() {
        let yaml = r#"
problem_id: p1
children:
  - type: response
    grader: { kind: string, answer: "a" }
    inputs: []
"#;
        assert!(matches!(
            ProblemDefinition::from_yaml(yaml).unwrap_err(),
            ProblemError::Schema(_)
        ));
    }

    #[test]
    fn test_missing_problem_id_rejected() {
        let err = ProblemDefinition::from_yaml("children: []").unwrap_err();
        assert!(matches!(err, ProblemError::Schema(_)));
    }
}
