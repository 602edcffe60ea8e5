// src/error.rs

use std::time::Duration;
use thiserror::Error;

use crate::retry::RetryAttempt;

/// Problems with a schema declaration. Raised when a `SchemaSpec` is built,
/// never while validating records.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("schema declares no fields")]
    Empty,

    #[error("field '{0}' is declared more than once")]
    DuplicateField(String),

    #[error("key '{alias}' of field '{field}' collides with field '{other}'")]
    AliasCollision {
        alias: String,
        field: String,
        other: String,
    },

    #[error("rule '{rule}' references unknown field '{field}'")]
    UnknownField { rule: String, field: String },

    #[error("rule '{rule}' references non-numeric field '{field}'")]
    NonNumericField { rule: String, field: String },

    #[error("rule '{rule}' sums role '{role}' but no field has that role")]
    EmptyRoleSum { rule: String, role: String },

    #[error("cannot parse rule '{expr}': {reason}")]
    InvalidRule { expr: String, reason: String },

    #[error("default for field '{field}' is invalid: {reason}")]
    InvalidDefault { field: String, reason: String },

    #[error("field '{0}' is required and cannot carry a default")]
    DefaultOnRequired(String),

    #[error("field '{0}' declares a text format but is not a string")]
    FormatOnNonString(String),
}

/// Failures of the language-model collaborator.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("LLM API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("empty response from LLM")]
    EmptyResponse,

    #[error("no completion within {0:?}")]
    Timeout(Duration),

    #[error("LLM_API_KEY env var required for remote backend")]
    MissingApiKey,

    #[error("{0}")]
    Unavailable(String),
}

/// Fatal outcome of an extraction request. Distinct from a rejected verdict:
/// a rejection still yields an `ExtractionOutcome`.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("request {request_id}: language model failed on attempt {attempt}: {source}")]
    Collaborator {
        request_id: String,
        attempt: u32,
        #[source]
        source: LlmError,
        /// Attempts that finished before the failure.
        completed: Vec<RetryAttempt>,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
