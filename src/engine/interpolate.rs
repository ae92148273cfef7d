//! Template interpolation
//!
//! Renders `{{key}}` placeholders in request templates against the run's
//! context. Unresolved placeholders are left verbatim so a missing optional
//! extraction does not crash the run; if the result is a malformed URL the
//! step then fails naturally at dispatch and that failure is reported.
//! Substituted values are never re-scanned for placeholders.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::pipeline::definition::RequestTemplate;

// Cached to avoid recompilation in hot paths
static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{\s*(\w+)\s*\}\}").unwrap());

/// A fully interpolated request, ready to dispatch and to snapshot into the
/// step's execution record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConcreteRequest {
    pub method: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub headers: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub query: IndexMap<String, String>,
    /// Rendered body text (JSON for templates with a JSON body).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// Replace each `{{key}}` with the string form of `context[key]`, leaving
/// unresolved placeholders verbatim. Single pass.
pub fn render(template: &str, ctx: &Context) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &Captures| match ctx.get(&caps[1]) {
            Some(value) => Context::value_string(value),
            None => caps[0].to_string(),
        })
        .to_string()
}

/// Interpolate a whole request template. The method passes through unchanged;
/// URL, header values, query values and the serialized body are rendered.
pub fn interpolate_request(template: &RequestTemplate, ctx: &Context) -> ConcreteRequest {
    let headers = template
        .headers
        .iter()
        .map(|(name, value)| (name.clone(), render(value, ctx)))
        .collect();

    let query = template
        .query
        .iter()
        .map(|(name, value)| (name.clone(), render(value, ctx)))
        .collect();

    let body = template
        .body
        .as_ref()
        .map(|body| render(&body.to_string(), ctx));

    ConcreteRequest {
        method: template.method.to_uppercase(),
        url: render(&template.url, ctx),
        headers,
        query,
        body,
    }
}
