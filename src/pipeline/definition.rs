//! Pipeline definition model and loading
//!
//! A pipeline is an ordered, named chain of HTTP request steps. Definitions
//! arrive fully resolved (the request template store is an external
//! collaborator); this module owns their shape, the YAML/TOML loader, and the
//! editing operations that keep step ordering dense. The engine itself never
//! mutates a definition.

use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::context::Context;
use crate::errors::ChainflowError;
use crate::pipeline::rules::{Condition, ExtractionRule, InjectionRule, JsonPath};

/// Maximum definition file size (1 MB) - prevents OOM from malicious files.
const MAX_DEFINITION_FILE_SIZE: u64 = 1024 * 1024;

/// An ordered, named chain of HTTP request steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,

    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Folder association (ownership/visibility, managed externally).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<Uuid>,

    #[serde(default = "default_true")]
    pub active: bool,

    pub steps: Vec<PipelineStep>,
}

/// One stage of a pipeline: a request template plus its data-flow rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStep {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,

    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Position within the pipeline. Dense, strictly increasing, unique;
    /// 0 in a definition file means "assign from file order" at load time.
    #[serde(default)]
    pub step_order: u32,

    pub request: RequestTemplate,

    /// Extraction rules: response value -> context key.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extract: Vec<ExtractionRule>,

    /// Injection rules: context key -> request slot.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inject: Vec<InjectionRule>,

    /// Execution condition; absent means always run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,

    /// Pause after a successful call, in milliseconds.
    #[serde(default)]
    pub delay_after_ms: u64,

    /// Operator-set short-circuit: skip unconditionally.
    #[serde(default)]
    pub skip: bool,

    #[serde(default = "default_true")]
    pub active: bool,

    /// Expected-value assertions checked after the call.
    #[serde(default, skip_serializing_if = "StepExpectations::is_empty")]
    pub expect: StepExpectations,
}

/// An immutable request template: method, URL, headers, body, query params.
/// All string values may contain `{{key}}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestTemplate {
    #[serde(default = "default_method")]
    pub method: String,

    pub url: String,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub headers: IndexMap<String, String>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub query: IndexMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<JsonValue>,
}

impl Default for RequestTemplate {
    fn default() -> Self {
        Self {
            method: default_method(),
            url: String::new(),
            headers: IndexMap::new(),
            query: IndexMap::new(),
            body: None,
        }
    }
}

/// Expected-value assertions for a step.
///
/// A mismatch fails the step even when the HTTP call itself succeeded.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StepExpectations {
    /// Expected status: exact code, range ("200-299") or class ("2xx").
    /// Absent means any 2xx status passes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusExpectation>,

    /// Body value expectations: path into the parsed response body -> value.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub body: IndexMap<JsonPath, JsonValue>,

    /// Header expectations: name -> expected substring.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub headers: IndexMap<String, String>,
}

impl StepExpectations {
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.body.is_empty() && self.headers.is_empty()
    }
}

/// Status expectation (number or pattern string).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum StatusExpectation {
    Exact(u16),
    Pattern(String),
}

impl StatusExpectation {
    /// Whether the pattern grammar is well formed: an exact code, an
    /// inclusive range ("200-299") or a class ("2xx"). Checked at load time
    /// so a typo like "20x" is rejected instead of failing every run.
    pub fn is_well_formed(&self) -> bool {
        match self {
            Self::Exact(_) => true,
            Self::Pattern(pattern) => {
                let pattern = pattern.trim();
                if let Some((low, high)) = pattern.split_once('-') {
                    return low.trim().parse::<u16>().is_ok() && high.trim().parse::<u16>().is_ok();
                }
                if let Some(class) = pattern.strip_suffix("xx") {
                    return class.parse::<u16>().is_ok();
                }
                pattern.parse::<u16>().is_ok()
            }
        }
    }

    /// Whether an actual status satisfies this expectation.
    pub fn matches(&self, actual: u16) -> bool {
        match self {
            Self::Exact(code) => actual == *code,
            Self::Pattern(pattern) => {
                let pattern = pattern.trim();
                if let Some((low, high)) = pattern.split_once('-') {
                    if let (Ok(low), Ok(high)) =
                        (low.trim().parse::<u16>(), high.trim().parse::<u16>())
                    {
                        return (low..=high).contains(&actual);
                    }
                    return false;
                }
                if let Some(class) = pattern.strip_suffix("xx") {
                    if let Ok(class) = class.parse::<u16>() {
                        return actual / 100 == class;
                    }
                    return false;
                }
                pattern.parse::<u16>().map(|code| code == actual).unwrap_or(false)
            }
        }
    }
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_true() -> bool {
    true
}

impl Pipeline {
    /// Active steps in ascending order; what a run iterates over.
    pub fn active_steps(&self) -> Vec<&PipelineStep> {
        let mut steps: Vec<&PipelineStep> = self.steps.iter().filter(|s| s.active).collect();
        steps.sort_by_key(|s| s.step_order);
        steps
    }

    /// Append a step, assigning the next order.
    pub fn add_step(&mut self, mut step: PipelineStep) {
        step.step_order = self.steps.len() as u32 + 1;
        self.steps.push(step);
    }

    /// Remove a step and renumber the remainder densely.
    pub fn remove_step(&mut self, step_id: Uuid) -> Result<PipelineStep, ChainflowError> {
        let index = self.position_of(step_id)?;
        let removed = self.steps.remove(index);
        self.renumber();
        Ok(removed)
    }

    /// Move a step to a 1-based position, renumbering atomically: the new
    /// ordering is computed in full before the pipeline is touched.
    pub fn move_step(&mut self, step_id: Uuid, new_position: u32) -> Result<(), ChainflowError> {
        let index = self.position_of(step_id)?;

        let mut reordered = self.steps.clone();
        reordered.sort_by_key(|s| s.step_order);
        let from = reordered.iter().position(|s| s.id == step_id).unwrap_or(index);
        let step = reordered.remove(from);
        let to = (new_position.max(1) as usize - 1).min(reordered.len());
        reordered.insert(to, step);
        for (i, step) in reordered.iter_mut().enumerate() {
            step.step_order = i as u32 + 1;
        }

        self.steps = reordered;
        Ok(())
    }

    /// Toggle the operator-set skip flag on a step.
    pub fn set_skip(&mut self, step_id: Uuid, skip: bool) -> Result<(), ChainflowError> {
        let index = self.position_of(step_id)?;
        self.steps[index].skip = skip;
        Ok(())
    }

    fn position_of(&self, step_id: Uuid) -> Result<usize, ChainflowError> {
        self.steps
            .iter()
            .position(|s| s.id == step_id)
            .ok_or_else(|| ChainflowError::Pipeline(format!("no step with id {}", step_id)))
    }

    fn renumber(&mut self) {
        self.steps.sort_by_key(|s| s.step_order);
        for (i, step) in self.steps.iter_mut().enumerate() {
            step.step_order = i as u32 + 1;
        }
    }
}

/// Load a pipeline definition from a file (YAML or TOML).
///
/// File size is checked before loading; loaded definitions are normalized
/// (file-order step numbering when `step_order` is unset) and validated.
pub fn load_pipeline(path: &Path) -> Result<Pipeline, ChainflowError> {
    let metadata = fs::metadata(path)?;
    if metadata.len() > MAX_DEFINITION_FILE_SIZE {
        return Err(ChainflowError::Argument(format!(
            "Pipeline definition too large: {} bytes (max {} bytes)",
            metadata.len(),
            MAX_DEFINITION_FILE_SIZE
        )));
    }

    let content = fs::read_to_string(path)?;

    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match extension.to_lowercase().as_str() {
        "yaml" | "yml" => parse_pipeline_yaml(&content),
        "toml" => parse_pipeline_toml(&content),
        _ => parse_pipeline_yaml(&content).or_else(|_| parse_pipeline_toml(&content)),
    }
}

/// Parse, normalize and validate a YAML pipeline definition.
pub fn parse_pipeline_yaml(content: &str) -> Result<Pipeline, ChainflowError> {
    let pipeline: Pipeline = serde_yaml::from_str(content).map_err(|e| {
        ChainflowError::Definition(format!("Failed to parse YAML pipeline: {}", e))
    })?;
    finalize_pipeline(pipeline)
}

/// Parse, normalize and validate a TOML pipeline definition.
pub fn parse_pipeline_toml(content: &str) -> Result<Pipeline, ChainflowError> {
    let pipeline: Pipeline = toml::from_str(content).map_err(|e| {
        ChainflowError::Definition(format!("Failed to parse TOML pipeline: {}", e))
    })?;
    finalize_pipeline(pipeline)
}

fn finalize_pipeline(mut pipeline: Pipeline) -> Result<Pipeline, ChainflowError> {
    normalize_step_orders(&mut pipeline);
    validate_pipeline(&pipeline)?;
    Ok(pipeline)
}

/// Assign file-order numbering when the definition omits `step_order`.
pub fn normalize_step_orders(pipeline: &mut Pipeline) {
    if pipeline.steps.iter().all(|s| s.step_order == 0) {
        for (i, step) in pipeline.steps.iter_mut().enumerate() {
            step.step_order = i as u32 + 1;
        }
    }
}

/// Validate pipeline structure, including the dense-ordering invariant.
pub fn validate_pipeline(pipeline: &Pipeline) -> Result<(), ChainflowError> {
    if pipeline.name.is_empty() {
        return Err(ChainflowError::Definition(
            "Pipeline must have a name".to_string(),
        ));
    }

    if pipeline.steps.is_empty() {
        return Err(ChainflowError::Definition(
            "Pipeline must have at least one step".to_string(),
        ));
    }

    let mut orders: Vec<u32> = Vec::with_capacity(pipeline.steps.len());
    for (i, step) in pipeline.steps.iter().enumerate() {
        if step.name.is_empty() {
            return Err(ChainflowError::Definition(format!(
                "Step {} must have a name",
                i + 1
            )));
        }
        if step.request.url.is_empty() {
            return Err(ChainflowError::Definition(format!(
                "Step {} ({}) must have a URL",
                i + 1,
                step.name
            )));
        }
        if step.request.method.to_uppercase().parse::<reqwest::Method>().is_err() {
            return Err(ChainflowError::Definition(format!(
                "Step {} ({}): invalid HTTP method '{}'",
                i + 1,
                step.name,
                step.request.method
            )));
        }
        if let Some(expected) = &step.expect.status {
            if !expected.is_well_formed() {
                return Err(ChainflowError::Definition(format!(
                    "Step {} ({}): invalid status expectation {:?}",
                    i + 1,
                    step.name,
                    expected
                )));
            }
        }
        orders.push(step.step_order);
    }

    let mut sorted = orders.clone();
    sorted.sort_unstable();
    sorted.dedup();
    let dense: Vec<u32> = (1..=pipeline.steps.len() as u32).collect();
    if sorted != dense {
        return Err(ChainflowError::Definition(format!(
            "Step ordering must be a dense 1..{} sequence, got {:?}",
            pipeline.steps.len(),
            orders
        )));
    }

    Ok(())
}

/// Parse `NAME=VALUE` pairs into a seed context. Values parse as JSON when
/// possible, falling back to plain strings.
pub fn apply_cli_variables(vars: &[String]) -> Result<Context, ChainflowError> {
    let mut ctx = Context::new();
    for var in vars {
        let Some((key, value)) = var.split_once('=') else {
            return Err(ChainflowError::Argument(format!(
                "Invalid variable format: {}. Use NAME=VALUE",
                var
            )));
        };
        let json_value = serde_json::from_str(value)
            .unwrap_or_else(|_| JsonValue::String(value.to_string()));
        ctx.insert(key.to_string(), json_value);
    }
    Ok(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_yaml() -> &'static str {
        r#"
name: "Login chain"
steps:
  - name: "Login"
    request:
      method: POST
      url: "{{base_url}}/login"
      body:
        username: admin
    extract:
      - name: token
        body: response.body.token
    expect:
      status: 200
  - name: "Profile"
    request:
      url: "{{base_url}}/profile"
    inject:
      - key: token
        header: Authorization
    delay_after_ms: 50
"#
    }

    #[test]
    fn test_parse_yaml_pipeline() {
        let mut pipeline: Pipeline = serde_yaml::from_str(sample_yaml()).unwrap();
        normalize_step_orders(&mut pipeline);

        assert_eq!(pipeline.name, "Login chain");
        assert_eq!(pipeline.steps.len(), 2);
        assert_eq!(pipeline.steps[0].request.method, "POST");
        assert_eq!(pipeline.steps[1].request.method, "GET");
        assert_eq!(pipeline.steps[0].step_order, 1);
        assert_eq!(pipeline.steps[1].step_order, 2);
        assert_eq!(pipeline.steps[1].delay_after_ms, 50);
        assert!(pipeline.steps[0].active);
        assert!(!pipeline.steps[0].skip);

        validate_pipeline(&pipeline).unwrap();
    }

    #[test]
    fn test_validation_rejects_sparse_ordering() {
        let mut pipeline: Pipeline = serde_yaml::from_str(sample_yaml()).unwrap();
        pipeline.steps[0].step_order = 1;
        pipeline.steps[1].step_order = 3;

        let err = validate_pipeline(&pipeline).unwrap_err();
        assert!(err.to_string().contains("dense"));
    }

    #[test]
    fn test_validation_rejects_duplicate_ordering() {
        let mut pipeline: Pipeline = serde_yaml::from_str(sample_yaml()).unwrap();
        pipeline.steps[0].step_order = 1;
        pipeline.steps[1].step_order = 1;

        assert!(validate_pipeline(&pipeline).is_err());
    }

    #[test]
    fn test_validation_rejects_malformed_status_pattern() {
        let mut pipeline: Pipeline = serde_yaml::from_str(sample_yaml()).unwrap();
        normalize_step_orders(&mut pipeline);
        pipeline.steps[0].expect.status = Some(StatusExpectation::Pattern("20x".to_string()));

        let err = validate_pipeline(&pipeline).unwrap_err();
        assert!(err.to_string().contains("status expectation"));

        pipeline.steps[0].expect.status = Some(StatusExpectation::Pattern("2xx".to_string()));
        validate_pipeline(&pipeline).unwrap();
    }

    #[test]
    fn test_status_expectation_grammar() {
        assert!(StatusExpectation::Exact(404).is_well_formed());
        assert!(StatusExpectation::Pattern("2xx".to_string()).is_well_formed());
        assert!(StatusExpectation::Pattern("200-299".to_string()).is_well_formed());
        assert!(StatusExpectation::Pattern("418".to_string()).is_well_formed());
        assert!(!StatusExpectation::Pattern("20x".to_string()).is_well_formed());
        assert!(!StatusExpectation::Pattern("a-b".to_string()).is_well_formed());
        assert!(!StatusExpectation::Pattern("bogus".to_string()).is_well_formed());
    }

    #[test]
    fn test_status_expectation_matching() {
        assert!(StatusExpectation::Exact(404).matches(404));
        assert!(!StatusExpectation::Exact(404).matches(200));
        assert!(StatusExpectation::Pattern("2xx".to_string()).matches(204));
        assert!(!StatusExpectation::Pattern("2xx".to_string()).matches(301));
        assert!(StatusExpectation::Pattern("200-299".to_string()).matches(250));
        assert!(!StatusExpectation::Pattern("200-299".to_string()).matches(300));
        assert!(StatusExpectation::Pattern("418".to_string()).matches(418));
    }

    #[test]
    fn test_validation_rejects_bad_method() {
        let mut pipeline: Pipeline = serde_yaml::from_str(sample_yaml()).unwrap();
        normalize_step_orders(&mut pipeline);
        pipeline.steps[0].request.method = "NOT A METHOD".to_string();

        assert!(validate_pipeline(&pipeline).is_err());
    }

    #[test]
    fn test_move_step_renumbers_densely() {
        let mut pipeline: Pipeline = serde_yaml::from_str(sample_yaml()).unwrap();
        normalize_step_orders(&mut pipeline);
        let profile_id = pipeline.steps[1].id;

        pipeline.move_step(profile_id, 1).unwrap();

        let orders: Vec<(String, u32)> = pipeline
            .steps
            .iter()
            .map(|s| (s.name.clone(), s.step_order))
            .collect();
        assert_eq!(
            orders,
            vec![("Profile".to_string(), 1), ("Login".to_string(), 2)]
        );
        validate_pipeline(&pipeline).unwrap();
    }

    #[test]
    fn test_remove_step_renumbers() {
        let mut pipeline: Pipeline = serde_yaml::from_str(sample_yaml()).unwrap();
        normalize_step_orders(&mut pipeline);
        let login_id = pipeline.steps[0].id;

        let removed = pipeline.remove_step(login_id).unwrap();
        assert_eq!(removed.name, "Login");
        assert_eq!(pipeline.steps.len(), 1);
        assert_eq!(pipeline.steps[0].step_order, 1);
    }

    #[test]
    fn test_add_step_assigns_next_order() {
        let mut pipeline: Pipeline = serde_yaml::from_str(sample_yaml()).unwrap();
        normalize_step_orders(&mut pipeline);

        pipeline.add_step(PipelineStep {
            id: Uuid::new_v4(),
            name: "Logout".to_string(),
            description: String::new(),
            step_order: 0,
            request: RequestTemplate {
                url: "/logout".to_string(),
                ..Default::default()
            },
            extract: Vec::new(),
            inject: Vec::new(),
            condition: None,
            delay_after_ms: 0,
            skip: false,
            active: true,
            expect: StepExpectations::default(),
        });

        assert_eq!(pipeline.steps.last().unwrap().step_order, 3);
    }

    #[test]
    fn test_set_skip() {
        let mut pipeline: Pipeline = serde_yaml::from_str(sample_yaml()).unwrap();
        normalize_step_orders(&mut pipeline);
        let id = pipeline.steps[0].id;

        pipeline.set_skip(id, true).unwrap();
        assert!(pipeline.steps[0].skip);

        pipeline.set_skip(id, false).unwrap();
        assert!(!pipeline.steps[0].skip);
    }

    #[test]
    fn test_active_steps_sorted_and_filtered() {
        let mut pipeline: Pipeline = serde_yaml::from_str(sample_yaml()).unwrap();
        normalize_step_orders(&mut pipeline);
        pipeline.steps[0].active = false;

        let active = pipeline.active_steps();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "Profile");
    }

    #[test]
    fn test_load_pipeline_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.yaml");
        std::fs::write(&path, sample_yaml()).unwrap();

        let pipeline = load_pipeline(&path).unwrap();
        assert_eq!(pipeline.steps.len(), 2);
        assert_eq!(pipeline.steps[1].step_order, 2);
    }

    #[test]
    fn test_load_rejects_malformed_rule() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        std::fs::write(
            &path,
            r#"
name: bad
steps:
  - name: step
    request:
      url: /x
    extract:
      - name: broken
        body: "a[[1]"
"#,
        )
        .unwrap();

        assert!(load_pipeline(&path).is_err());
    }

    #[test]
    fn test_apply_cli_variables() {
        let ctx = apply_cli_variables(&[
            "token=secret123".to_string(),
            "count=7".to_string(),
        ])
        .unwrap();

        assert_eq!(ctx.get("token"), Some(&serde_json::json!("secret123")));
        assert_eq!(ctx.get("count"), Some(&serde_json::json!(7)));

        assert!(apply_cli_variables(&["malformed".to_string()]).is_err());
    }
}
