//! OpenAPI Contract Validator
//!
//! Validates live HTTP request/response pairs against a collection of OpenAPI
//! 3.0 / 3.1 documents.
//!
//! Documents come from a [`SchemaSource`]: local directory trees, GitHub
//! repository trees (feature `remote`), or a [`CompositeSource`] merging
//! several. The [`Engine`] compiles every document the first time it is used
//! and resolves each request to the first loaded document declaring a
//! matching route.
//!
//! # Example
//!
//! ```
//! use openapi_contract::{Engine, HttpRequest, HttpResponse, SchemaSet};
//! use serde_json::json;
//!
//! let schemas: SchemaSet = [(
//!     "users.yaml",
//!     r#"
//! openapi: 3.0.3
//! info: {title: Users, version: "1"}
//! paths:
//!   /users/{id}:
//!     get:
//!       parameters:
//!         - {name: id, in: path, required: true, schema: {type: integer}}
//!       responses:
//!         "200":
//!           description: ok
//!           content:
//!             application/json:
//!               schema:
//!                 type: object
//!                 properties:
//!                   id: {type: integer}
//!                   name: {type: string}
//! "#,
//! )]
//! .into_iter()
//! .collect();
//!
//! let mut engine = Engine::new(schemas);
//! let request = HttpRequest::new("GET", "/users/42");
//!
//! let verdict = engine.validate_request(&request).unwrap();
//! assert!(verdict.is_valid());
//!
//! let response = HttpResponse::new(200).json(&json!({"id": "42"}));
//! let verdict = engine
//!     .validate_response(
//!         &request,
//!         &response,
//!         verdict.operation_address(),
//!         verdict.schema_identifier(),
//!     )
//!     .unwrap();
//!
//! assert!(!verdict.is_valid());
//! assert!(verdict.error_message().unwrap().contains("Field: id"));
//! ```
//!
//! # Diagnostics
//!
//! Failure messages list the innermost cause first, each followed by the
//! `Field: a.b.c` path of the offending value, joined with ` | `:
//!
//! ```text
//! Field: id | Keyword validation failed: "42" is not of type "integer" | Body does not match schema ...
//! ```

mod config;
mod context;
mod diagnostic;
mod document;
mod engine;
mod error;
#[cfg(feature = "remote")]
mod github;
mod loader;
mod matcher;
mod types;

pub use config::{Config, GithubSourceConfig};
pub use context::{
    ContextSettings, ScenarioContext, SKIP_REQUEST_TAG, SKIP_RESPONSE_TAG, SKIP_VALIDATION_TAG,
};
pub use diagnostic::{build_message, Breadcrumb, Mismatch, MESSAGE_DELIMITER};
pub use document::{Dialect, Route};
pub use engine::{Catalog, Engine};
pub use error::{CompileError, ConfigError, ContractViolation, EngineError, LoadError};
pub use loader::{is_schema_file, CompositeSource, LocalSource, SchemaSource, SCHEMA_EXTENSIONS};
pub use matcher::{compile, MatcherPair, RequestMatchError, RequestMatcher, ResponseMatcher};
pub use types::{
    HttpRequest, HttpResponse, OperationAddress, SchemaSet, ValidationResult, HTTP_METHODS,
};

#[cfg(feature = "remote")]
pub use github::{GithubSource, TreeUrl, DEFAULT_API_BASE};
