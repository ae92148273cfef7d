//! Data-flow rules for pipeline steps
//!
//! Conditions, extractions and injections are a constrained, data-driven rule
//! format, not a scripting language. Rule documents are parsed into the typed
//! representations below when the pipeline definition is loaded, so malformed
//! rules are rejected at edit time. At run time rule evaluation is fail-soft:
//! an unresolvable path makes a condition false, an extraction store nothing,
//! an injection a no-op. None of these abort a run on their own.
//!
//! # Path grammar
//!
//! Paths use dot-separated keys with optional bracket indexes:
//!
//! ```text
//! token
//! user.id
//! user.items[0].id
//! ```
//!
//! Extraction paths may carry a `response.body.` prefix, which is stripped.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::context::Context;
use crate::errors::ChainflowError;
use crate::pipeline::definition::RequestTemplate;

/// One segment of a value path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// A parsed dot/bracket path into a JSON document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JsonPath {
    raw: String,
    segments: Vec<PathSegment>,
}

impl JsonPath {
    /// Parse a path expression. Errors on empty paths, empty segments and
    /// malformed bracket indexes.
    pub fn parse(raw: &str) -> Result<Self, ChainflowError> {
        let stripped = raw
            .strip_prefix("response.body.")
            .unwrap_or(raw);

        if stripped.is_empty() {
            return Err(ChainflowError::Rule("empty path expression".to_string()));
        }

        let mut segments = Vec::new();
        for part in stripped.split('.') {
            if part.is_empty() {
                return Err(ChainflowError::Rule(format!(
                    "empty segment in path '{}'",
                    raw
                )));
            }

            // Split a trailing run of [n] indexes off the key
            let key_end = part.find('[').unwrap_or(part.len());
            let key = &part[..key_end];
            if !key.is_empty() {
                segments.push(PathSegment::Key(key.to_string()));
            } else if key_end == 0 && segments.is_empty() {
                return Err(ChainflowError::Rule(format!(
                    "path '{}' must start with a key",
                    raw
                )));
            }

            let mut rest = &part[key_end..];
            while !rest.is_empty() {
                if !rest.starts_with('[') {
                    return Err(ChainflowError::Rule(format!(
                        "unexpected characters in path '{}'",
                        raw
                    )));
                }
                let close = rest.find(']').ok_or_else(|| {
                    ChainflowError::Rule(format!("unclosed bracket in path '{}'", raw))
                })?;
                let index: usize = rest[1..close].parse().map_err(|_| {
                    ChainflowError::Rule(format!(
                        "invalid index '{}' in path '{}'",
                        &rest[1..close],
                        raw
                    ))
                })?;
                segments.push(PathSegment::Index(index));
                rest = &rest[close + 1..];
            }
        }

        Ok(Self {
            raw: stripped.to_string(),
            segments,
        })
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Resolve this path against a JSON document.
    pub fn resolve<'a>(&self, root: &'a JsonValue) -> Option<&'a JsonValue> {
        resolve_segments(root, &self.segments)
    }

    /// Write `value` at this path, creating intermediate objects as needed.
    /// Returns false when the path cannot be applied (e.g. indexing past the
    /// end of an array, or descending through a scalar).
    pub fn set(&self, root: &mut JsonValue, value: JsonValue) -> bool {
        let mut current = root;
        for (i, segment) in self.segments.iter().enumerate() {
            let last = i == self.segments.len() - 1;
            match segment {
                PathSegment::Key(key) => {
                    if current.is_null() {
                        *current = JsonValue::Object(serde_json::Map::new());
                    }
                    let Some(map) = current.as_object_mut() else {
                        return false;
                    };
                    if last {
                        map.insert(key.clone(), value);
                        return true;
                    }
                    current = map
                        .entry(key.clone())
                        .or_insert(JsonValue::Object(serde_json::Map::new()));
                }
                PathSegment::Index(index) => {
                    let Some(arr) = current.as_array_mut() else {
                        return false;
                    };
                    if *index > arr.len() {
                        return false;
                    }
                    if *index == arr.len() {
                        arr.push(JsonValue::Null);
                    }
                    if last {
                        arr[*index] = value;
                        return true;
                    }
                    current = &mut arr[*index];
                }
            }
        }
        false
    }
}

impl std::str::FromStr for JsonPath {
    type Err = ChainflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for JsonPath {
    type Error = ChainflowError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<JsonPath> for String {
    fn from(path: JsonPath) -> Self {
        path.raw
    }
}

impl std::fmt::Display for JsonPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Walk a JSON value along a segment list.
pub fn resolve_segments<'a>(root: &'a JsonValue, segments: &[PathSegment]) -> Option<&'a JsonValue> {
    let mut current = root;
    for segment in segments {
        current = match segment {
            PathSegment::Key(key) => current.get(key.as_str())?,
            PathSegment::Index(index) => current.get(index)?,
        };
    }
    Some(current)
}

/// Comparator for condition rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Eq,
    Ne,
    Contains,
    Gt,
    Lt,
    Exists,
    NotExists,
}

/// One predicate over the execution context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConditionRule {
    /// Path into the context (first segment is a context key).
    pub field: JsonPath,
    pub op: Comparator,
    /// Comparison literal; unused for exists/not_exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<JsonValue>,
}

/// Execution condition: every rule must hold (AND semantics).
///
/// A field path that does not resolve in the context makes its rule false
/// (fail-closed), so steps depending on missing data are skipped, not errored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    pub all: Vec<ConditionRule>,
}

impl Condition {
    pub fn evaluate(&self, ctx: &Context) -> bool {
        self.all.iter().all(|rule| rule.evaluate(ctx))
    }
}

impl ConditionRule {
    pub fn evaluate(&self, ctx: &Context) -> bool {
        let actual = ctx.resolve(&self.field);

        match self.op {
            Comparator::Exists => return actual.is_some(),
            Comparator::NotExists => return actual.is_none(),
            _ => {}
        }

        // Fail-closed: unresolvable field or missing literal is false
        let (Some(actual), Some(expected)) = (actual, self.value.as_ref()) else {
            return false;
        };

        match self.op {
            Comparator::Eq => values_equal(actual, expected),
            Comparator::Ne => !values_equal(actual, expected),
            Comparator::Contains => value_contains(actual, expected),
            Comparator::Gt => compare_numeric(actual, expected).map_or(false, |o| o.is_gt()),
            Comparator::Lt => compare_numeric(actual, expected).map_or(false, |o| o.is_lt()),
            Comparator::Exists | Comparator::NotExists => unreachable!(),
        }
    }
}

/// Loose equality: structural match, or matching string forms so that a
/// numeric extraction compares equal to a string literal in the rule.
pub fn values_equal(actual: &JsonValue, expected: &JsonValue) -> bool {
    actual == expected || Context::value_string(actual) == Context::value_string(expected)
}

fn value_contains(actual: &JsonValue, expected: &JsonValue) -> bool {
    match actual {
        JsonValue::String(s) => s.contains(&Context::value_string(expected)),
        JsonValue::Array(items) => items.iter().any(|item| values_equal(item, expected)),
        JsonValue::Object(map) => expected
            .as_str()
            .map(|key| map.contains_key(key))
            .unwrap_or(false),
        _ => false,
    }
}

fn compare_numeric(actual: &JsonValue, expected: &JsonValue) -> Option<std::cmp::Ordering> {
    let a = json_as_f64(actual)?;
    let b = json_as_f64(expected)?;
    a.partial_cmp(&b)
}

fn json_as_f64(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Where an extraction rule reads from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ExtractSource {
    /// Path into the parsed JSON response body.
    Body(JsonPath),
    /// A response header, by name (case-insensitive).
    Header(String),
}

/// Pull a value out of a response into the context under `name`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractionRule {
    pub name: String,
    #[serde(flatten)]
    pub from: ExtractSource,
}

/// Where an injection rule writes to in the outgoing request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum InjectTarget {
    /// Request header, by name.
    Header(String),
    /// Query parameter, by name.
    Query(String),
    /// Path into the JSON request body.
    Body(JsonPath),
}

/// Place a context value into the outgoing request before interpolation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InjectionRule {
    pub key: String,
    #[serde(flatten)]
    pub into: InjectTarget,
}

/// Apply extraction rules against a response.
///
/// Unresolvable paths and absent headers store nothing; the key is simply
/// absent from the result.
pub fn apply_extractions(
    rules: &[ExtractionRule],
    body: &JsonValue,
    headers: &IndexMap<String, String>,
) -> IndexMap<String, JsonValue> {
    let mut extracted = IndexMap::new();

    for rule in rules {
        let value = match &rule.from {
            ExtractSource::Body(path) => path.resolve(body).cloned(),
            ExtractSource::Header(name) => headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| JsonValue::String(v.clone())),
        };
        if let Some(value) = value {
            extracted.insert(rule.name.clone(), value);
        }
    }

    extracted
}

/// Apply injection rules to a request template.
///
/// Injections run before interpolation of the step's own template, so an
/// explicit injection takes precedence over a bare `{{key}}` reference in the
/// same slot. A key absent from the context skips that injection.
pub fn apply_injections(rules: &[InjectionRule], ctx: &Context, request: &mut RequestTemplate) {
    for rule in rules {
        let Some(value) = ctx.get(&rule.key) else {
            tracing::debug!(key = %rule.key, "injection skipped: key absent from context");
            continue;
        };

        match &rule.into {
            InjectTarget::Header(name) => {
                request
                    .headers
                    .insert(name.clone(), Context::value_string(value));
            }
            InjectTarget::Query(name) => {
                request
                    .query
                    .insert(name.clone(), Context::value_string(value));
            }
            InjectTarget::Body(path) => {
                let body = request
                    .body
                    .get_or_insert(JsonValue::Object(serde_json::Map::new()));
                if !path.set(body, value.clone()) {
                    tracing::debug!(path = %path, "injection skipped: body path not applicable");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_simple_path() {
        let path = JsonPath::parse("token").unwrap();
        assert_eq!(path.segments(), &[PathSegment::Key("token".to_string())]);
    }

    #[test]
    fn test_parse_nested_path_with_index() {
        let path = JsonPath::parse("user.items[0].id").unwrap();
        assert_eq!(
            path.segments(),
            &[
                PathSegment::Key("user".to_string()),
                PathSegment::Key("items".to_string()),
                PathSegment::Index(0),
                PathSegment::Key("id".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_strips_response_body_prefix() {
        let path = JsonPath::parse("response.body.token").unwrap();
        assert_eq!(path.as_str(), "token");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(JsonPath::parse("").is_err());
        assert!(JsonPath::parse("a..b").is_err());
        assert!(JsonPath::parse("a[").is_err());
        assert!(JsonPath::parse("a[x]").is_err());
    }

    #[test]
    fn test_resolve() {
        let doc = json!({"user": {"items": [{"id": 7}]}});
        let path = JsonPath::parse("user.items[0].id").unwrap();
        assert_eq!(path.resolve(&doc), Some(&json!(7)));

        let missing = JsonPath::parse("user.items[3].id").unwrap();
        assert_eq!(missing.resolve(&doc), None);
    }

    #[test]
    fn test_set_creates_intermediate_objects() {
        let mut doc = json!({});
        let path = JsonPath::parse("auth.token").unwrap();
        assert!(path.set(&mut doc, json!("abc")));
        assert_eq!(doc, json!({"auth": {"token": "abc"}}));
    }

    #[test]
    fn test_set_fails_on_scalar() {
        let mut doc = json!({"auth": "opaque"});
        let path = JsonPath::parse("auth.token").unwrap();
        assert!(!path.set(&mut doc, json!("abc")));
    }

    #[test]
    fn test_condition_eq_and_fail_closed() {
        let mut ctx = Context::new();
        ctx.insert("token", json!("abc123"));

        let cond = Condition {
            all: vec![ConditionRule {
                field: "token".parse().unwrap(),
                op: Comparator::Eq,
                value: Some(json!("abc123")),
            }],
        };
        assert!(cond.evaluate(&ctx));

        // Missing field: fail-closed, never an error
        let cond = Condition {
            all: vec![ConditionRule {
                field: "missing".parse().unwrap(),
                op: Comparator::Eq,
                value: Some(json!("x")),
            }],
        };
        assert!(!cond.evaluate(&ctx));
    }

    #[test]
    fn test_condition_and_semantics() {
        let mut ctx = Context::new();
        ctx.insert("a", json!(1));
        ctx.insert("b", json!(2));

        let cond = Condition {
            all: vec![
                ConditionRule {
                    field: "a".parse().unwrap(),
                    op: Comparator::Eq,
                    value: Some(json!(1)),
                },
                ConditionRule {
                    field: "b".parse().unwrap(),
                    op: Comparator::Gt,
                    value: Some(json!(5)),
                },
            ],
        };
        assert!(!cond.evaluate(&ctx));
    }

    #[test]
    fn test_condition_numeric_and_exists() {
        let mut ctx = Context::new();
        ctx.insert("count", json!(10));

        let gt = ConditionRule {
            field: "count".parse().unwrap(),
            op: Comparator::Gt,
            value: Some(json!(5)),
        };
        assert!(gt.evaluate(&ctx));

        let exists = ConditionRule {
            field: "count".parse().unwrap(),
            op: Comparator::Exists,
            value: None,
        };
        assert!(exists.evaluate(&ctx));

        let not_exists = ConditionRule {
            field: "other".parse().unwrap(),
            op: Comparator::NotExists,
            value: None,
        };
        assert!(not_exists.evaluate(&ctx));
    }

    #[test]
    fn test_condition_loose_equality() {
        let mut ctx = Context::new();
        ctx.insert("id", json!(42));

        let rule = ConditionRule {
            field: "id".parse().unwrap(),
            op: Comparator::Eq,
            value: Some(json!("42")),
        };
        assert!(rule.evaluate(&ctx));
    }

    #[test]
    fn test_extractions() {
        let body = json!({"token": "abc", "user": {"id": 7}});
        let mut headers = IndexMap::new();
        headers.insert("X-Request-Id".to_string(), "req-1".to_string());

        let rules = vec![
            ExtractionRule {
                name: "token".to_string(),
                from: ExtractSource::Body("token".parse().unwrap()),
            },
            ExtractionRule {
                name: "user_id".to_string(),
                from: ExtractSource::Body("user.id".parse().unwrap()),
            },
            ExtractionRule {
                name: "request_id".to_string(),
                from: ExtractSource::Header("x-request-id".to_string()),
            },
            ExtractionRule {
                name: "absent".to_string(),
                from: ExtractSource::Body("nope.nothing".parse().unwrap()),
            },
        ];

        let extracted = apply_extractions(&rules, &body, &headers);
        assert_eq!(extracted.get("token"), Some(&json!("abc")));
        assert_eq!(extracted.get("user_id"), Some(&json!(7)));
        assert_eq!(extracted.get("request_id"), Some(&json!("req-1")));
        assert!(!extracted.contains_key("absent"));
    }

    #[test]
    fn test_injections() {
        let mut ctx = Context::new();
        ctx.insert("token", json!("abc"));
        ctx.insert("page", json!(3));

        let mut request = RequestTemplate {
            method: "POST".to_string(),
            url: "http://example.com".to_string(),
            ..Default::default()
        };

        let rules = vec![
            InjectionRule {
                key: "token".to_string(),
                into: InjectTarget::Header("Authorization".to_string()),
            },
            InjectionRule {
                key: "page".to_string(),
                into: InjectTarget::Query("page".to_string()),
            },
            InjectionRule {
                key: "token".to_string(),
                into: InjectTarget::Body("auth.token".parse().unwrap()),
            },
            InjectionRule {
                key: "missing".to_string(),
                into: InjectTarget::Header("X-Never".to_string()),
            },
        ];

        apply_injections(&rules, &ctx, &mut request);

        assert_eq!(request.headers.get("Authorization").map(String::as_str), Some("abc"));
        assert_eq!(request.query.get("page").map(String::as_str), Some("3"));
        assert_eq!(request.body, Some(json!({"auth": {"token": "abc"}})));
        assert!(!request.headers.contains_key("X-Never"));
    }

    #[test]
    fn test_rule_yaml_round_trip() {
        let yaml = r#"
- name: token
  body: response.body.token
- name: request_id
  header: X-Request-Id
"#;
        let rules: Vec<ExtractionRule> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(rules.len(), 2);
        assert!(matches!(rules[0].from, ExtractSource::Body(ref p) if p.as_str() == "token"));
        assert!(matches!(rules[1].from, ExtractSource::Header(ref h) if h == "X-Request-Id"));
    }

    #[test]
    fn test_malformed_rule_rejected_at_parse_time() {
        let yaml = r#"
- name: broken
  body: "a[[1]"
"#;
        let parsed: Result<Vec<ExtractionRule>, _> = serde_yaml::from_str(yaml);
        assert!(parsed.is_err());
    }
}
