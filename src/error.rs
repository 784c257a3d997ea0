//! Error types for schema acquisition, document compilation and validation.
//!
//! Ordinary validation failures are not errors: they come back as an invalid
//! [`ValidationResult`](crate::ValidationResult). The types here cover the
//! fatal paths, where the contract corpus itself cannot be assembled.

use std::path::PathBuf;
use thiserror::Error;

/// Errors while loading schema documents from a source.
#[derive(Debug, Error)]
pub enum LoadError {
    // IO errors (exit code 3)
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[cfg(feature = "remote")]
    #[error("GitHub API request failed for \"{url}\" ({}): {source}", auth_label(.authenticated))]
    Transport {
        url: String,
        authenticated: bool,
        #[source]
        source: reqwest::Error,
    },

    #[error("GitHub API request failed for \"{url}\": HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("GitHub API rate limit exceeded for \"{url}\"{}", reset_suffix(.reset))]
    RateLimited { url: String, reset: Option<String> },

    #[error("invalid JSON response from \"{url}\": {source}")]
    InvalidListing {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("GitHub API returned an empty listing for \"{url}\"")]
    EmptyListing { url: String },

    // Configuration errors (exit code 2)
    #[error("invalid GitHub URL format: \"{url}\". Expected: https://github.com/owner/repo/tree/branch/path")]
    InvalidRepositoryUrl { url: String },

    #[error("no OpenAPI schema files were found in the configured GitHub repositories")]
    NoSchemasFound,
}

#[cfg(feature = "remote")]
fn auth_label(authenticated: &bool) -> &'static str {
    if *authenticated {
        "with authentication"
    } else {
        "without authentication"
    }
}

fn reset_suffix(reset: &Option<String>) -> String {
    match reset {
        Some(at) => format!(". Reset at: {}", at),
        None => String::new(),
    }
}

impl LoadError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            LoadError::InvalidRepositoryUrl { .. } | LoadError::NoSchemasFound => 2,
            _ => 3,
        }
    }

    /// True when the failure is a GitHub rate-limit rejection.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, LoadError::RateLimited { .. })
    }
}

/// Errors turning a document's text into request/response matchers.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("invalid YAML in {identifier}: {source}")]
    InvalidYaml {
        identifier: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("{identifier} is not an OpenAPI document: {message}")]
    NotOpenApi { identifier: String, message: String },

    #[error("unresolvable reference \"{reference}\" in {identifier}")]
    BrokenRef {
        identifier: String,
        reference: String,
    },

    #[error("invalid schema at {pointer} in {identifier}: {message}")]
    InvalidSchema {
        identifier: String,
        pointer: String,
        message: String,
    },
}

/// Errors raised by the validation engine before any verdict can be given.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("schema catalog failed to initialize: {message}")]
    InitializationFailed { message: String },
}

impl EngineError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::Load(e) => e.exit_code(),
            EngineError::Compile(_) | EngineError::InitializationFailed { .. } => 2,
        }
    }
}

/// Errors reading the validator configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {source}")]
    Parse {
        #[source]
        source: serde_yaml::Error,
    },
}

impl ConfigError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            ConfigError::Read { .. } => 3,
            ConfigError::Parse { .. } => 2,
        }
    }
}

/// A captured exchange broke the contract.
#[derive(Debug, Error)]
pub enum ContractViolation {
    #[error("OpenAPI validation failed: no request/response captured")]
    NothingCaptured,

    #[error("OpenAPI request validation failed:\n{message}\nSchema: {}", schema_label(.schema))]
    Request {
        message: String,
        schema: Option<String>,
    },

    #[error("OpenAPI response validation failed:\n{message}\nSchema: {}", schema_label(.schema))]
    Response {
        message: String,
        schema: Option<String>,
    },

    #[error(transparent)]
    Engine(#[from] EngineError),
}

fn schema_label(schema: &Option<String>) -> &str {
    schema.as_deref().unwrap_or("unknown")
}
