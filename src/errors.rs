//! Error types for chainflow

use thiserror::Error;

/// Main error type for chainflow
#[derive(Error, Debug)]
pub enum ChainflowError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error("Definition error: {0}")]
    Definition(String),

    #[error("Rule error: {0}")]
    Rule(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Run pool saturated: {0}")]
    PoolSaturated(String),
}

pub type Result<T> = std::result::Result<T, ChainflowError>;
