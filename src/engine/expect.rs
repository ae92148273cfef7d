//! Expected-value validation
//!
//! Checks a step's declared expectations against the response it got. A
//! mismatch fails the step even when the HTTP exchange itself succeeded.
//! Without a declared status expectation, any 2xx status passes.

use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use crate::pipeline::definition::{StatusExpectation, StepExpectations};
use crate::pipeline::rules::values_equal;

/// Outcome of a single expectation check.
#[derive(Debug, Clone)]
pub struct ExpectationResult {
    /// What was checked, e.g. `status`, `body.user.id`, `header.Content-Type`.
    pub expectation: String,
    pub passed: bool,
    pub message: String,
}

impl ExpectationResult {
    fn pass(expectation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            expectation: expectation.into(),
            passed: true,
            message: message.into(),
        }
    }

    fn fail(expectation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            expectation: expectation.into(),
            passed: false,
            message: message.into(),
        }
    }
}

/// Check all expectations for a step. Always returns at least the status
/// check; body and header checks follow in declaration order.
pub fn check_expectations(
    expect: &StepExpectations,
    status: u16,
    headers: &IndexMap<String, String>,
    body: &str,
) -> Vec<ExpectationResult> {
    let mut results = vec![check_status(expect.status.as_ref(), status)];

    if !expect.body.is_empty() {
        match serde_json::from_str::<JsonValue>(body) {
            Ok(parsed) => {
                for (path, expected) in &expect.body {
                    let name = format!("body.{}", path);
                    match path.resolve(&parsed) {
                        Some(actual) if values_equal(actual, expected) => {
                            results.push(ExpectationResult::pass(name, "matched"));
                        }
                        Some(actual) => {
                            results.push(ExpectationResult::fail(
                                name,
                                format!("expected {expected}, got {actual}"),
                            ));
                        }
                        None => {
                            results.push(ExpectationResult::fail(
                                name,
                                format!("path '{path}' not found in response body"),
                            ));
                        }
                    }
                }
            }
            Err(_) => {
                for (path, _) in &expect.body {
                    results.push(ExpectationResult::fail(
                        format!("body.{}", path),
                        "response body is not valid JSON",
                    ));
                }
            }
        }
    }

    for (name, needle) in &expect.headers {
        let actual = headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str());
        let check = format!("header.{name}");
        match actual {
            Some(value) if value.contains(needle.as_str()) => {
                results.push(ExpectationResult::pass(check, "matched"));
            }
            Some(value) => {
                results.push(ExpectationResult::fail(
                    check,
                    format!("expected '{needle}' in '{value}'"),
                ));
            }
            None => {
                results.push(ExpectationResult::fail(
                    check,
                    format!("header '{name}' not present"),
                ));
            }
        }
    }

    results
}

/// Join the failed checks into one step-level error message.
pub fn failure_message(results: &[ExpectationResult]) -> Option<String> {
    let failed: Vec<String> = results
        .iter()
        .filter(|r| !r.passed)
        .map(|r| format!("{}: {}", r.expectation, r.message))
        .collect();
    if failed.is_empty() {
        None
    } else {
        Some(failed.join("; "))
    }
}

/// Status check. Declared expectations match per `StatusExpectation::matches`
/// (exact, range or class pattern); absent means any 2xx.
fn check_status(expected: Option<&StatusExpectation>, actual: u16) -> ExpectationResult {
    let (passed, wanted) = match expected {
        None => ((200..300).contains(&actual), "2xx".to_string()),
        Some(StatusExpectation::Exact(code)) => (actual == *code, code.to_string()),
        Some(expectation @ StatusExpectation::Pattern(pattern)) => {
            (expectation.matches(actual), pattern.clone())
        }
    };
    if passed {
        ExpectationResult::pass("status", format!("{actual} matched {wanted}"))
    } else {
        ExpectationResult::fail("status", format!("expected {wanted}, got {actual}"))
    }
}
