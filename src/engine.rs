//! Multi-document validation engine.
//!
//! The [`Engine`] owns a schema source and compiles every document it yields
//! into a [`Catalog`] the first time a validation is requested. Documents are
//! never reloaded afterwards.
//!
//! ```no_run
//! use openapi_contract::{Engine, HttpRequest, HttpResponse, LocalSource};
//!
//! let mut engine = Engine::new(LocalSource::new(["openapi"]));
//! let request = HttpRequest::new("GET", "/users/42");
//! let response = HttpResponse::new(200).json(&serde_json::json!({"id": 42, "name": "Ann"}));
//!
//! let verdict = engine.validate_request(&request)?;
//! let verdict = engine.validate_response(
//!     &request,
//!     &response,
//!     verdict.operation_address(),
//!     verdict.schema_identifier(),
//! )?;
//! assert!(verdict.is_valid());
//! # Ok::<(), openapi_contract::EngineError>(())
//! ```

use std::collections::HashMap;

use tracing::{debug, error, info, warn};

use crate::diagnostic::build_message;
use crate::document;
use crate::error::{CompileError, EngineError};
use crate::loader::SchemaSource;
use crate::matcher::{self, RequestMatchError, RequestMatcher, ResponseMatcher};
use crate::types::{HttpRequest, HttpResponse, OperationAddress, SchemaSet, ValidationResult};

/// Compiled matchers for every loaded document. Read-only once built.
#[derive(Debug)]
pub struct Catalog {
    documents: SchemaSet,
    request_matchers: Vec<RequestMatcher>,
    response_matchers: HashMap<String, ResponseMatcher>,
}

impl Catalog {
    /// Compile every document in load order.
    ///
    /// # Errors
    ///
    /// Returns the first `CompileError`; one broken document fails the whole catalog.
    pub fn from_schemas(documents: SchemaSet) -> Result<Self, CompileError> {
        let mut request_matchers = Vec::with_capacity(documents.len());
        let mut response_matchers = HashMap::with_capacity(documents.len());

        for (identifier, text) in documents.iter() {
            let pair = matcher::compile(identifier, text)?;
            request_matchers.push(pair.request);
            response_matchers.insert(identifier.to_string(), pair.response);
        }

        Ok(Self {
            documents,
            request_matchers,
            response_matchers,
        })
    }

    /// Identifiers of the loaded documents, in load order.
    pub fn schema_identifiers(&self) -> impl Iterator<Item = &str> {
        self.documents.identifiers()
    }

    /// Every declared operation with the document that declares it.
    pub fn routes(&self) -> Vec<(&str, &OperationAddress)> {
        self.request_matchers
            .iter()
            .flat_map(|m| m.operations().map(move |op| (m.identifier(), op)))
            .collect()
    }

    /// Resolve `request` to an operation and validate it.
    ///
    /// Documents are tried in load order. The first one whose routes fit the
    /// request decides the verdict, even when its content check fails.
    pub fn validate_request(&self, request: &HttpRequest) -> ValidationResult {
        for matcher in &self.request_matchers {
            match matcher.match_request(request) {
                Ok(operation) => {
                    debug!(schema = matcher.identifier(), %operation, "request matched");
                    return ValidationResult::valid(operation, matcher.identifier());
                }
                Err(RequestMatchError::NoMatchingPath) => continue,
                Err(RequestMatchError::Mismatch(mismatch)) => {
                    return ValidationResult::invalid(
                        build_message(&mismatch),
                        matcher.identifier(),
                        None,
                    );
                }
            }
        }

        ValidationResult::not_found(&request.method(), request.path())
    }

    /// Validate `response` against the operation `request` addressed.
    ///
    /// `operation` and `schema` normally come from an earlier
    /// [`validate_request`](Self::validate_request) verdict. Without them the
    /// operation is re-derived from the request path and method alone.
    pub fn validate_response(
        &self,
        request: &HttpRequest,
        response: &HttpResponse,
        operation: Option<&OperationAddress>,
        schema: Option<&str>,
    ) -> ValidationResult {
        let resolved = self
            .direct(operation, schema)
            .or_else(|| self.rederive(request, schema))
            .or_else(|| self.scan(request));

        let Some((identifier, operation)) = resolved else {
            return ValidationResult::not_found(&request.method(), request.path());
        };
        let Some(matcher) = self.response_matchers.get(identifier) else {
            return ValidationResult::not_found(&request.method(), request.path());
        };

        match matcher.validate(&operation, response) {
            Ok(()) => ValidationResult::valid(operation, identifier),
            Err(mismatch) => {
                ValidationResult::invalid(build_message(&mismatch), identifier, Some(operation))
            }
        }
    }

    fn direct<'a>(
        &'a self,
        operation: Option<&OperationAddress>,
        schema: Option<&str>,
    ) -> Option<(&'a str, OperationAddress)> {
        let (operation, schema) = (operation?, schema?);
        let (identifier, matcher) = self.response_matchers.get_key_value(schema)?;
        matcher
            .declares(operation)
            .then(|| (identifier.as_str(), operation.clone()))
    }

    fn rederive<'a>(
        &'a self,
        request: &HttpRequest,
        schema: Option<&str>,
    ) -> Option<(&'a str, OperationAddress)> {
        let (identifier, text) = self.documents.iter().find(|(id, _)| Some(*id) == schema)?;
        let operation = self.locate(identifier, text, request)?;
        debug!(schema = identifier, %operation, "response operation re-derived from path");
        Some((identifier, operation))
    }

    fn scan<'a>(&'a self, request: &HttpRequest) -> Option<(&'a str, OperationAddress)> {
        let found = self
            .documents
            .iter()
            .find_map(|(id, text)| self.locate(id, text, request).map(|op| (id, op)));
        if let Some((identifier, operation)) = &found {
            warn!(
                schema = *identifier,
                %operation,
                "response operation resolved by scanning all documents"
            );
        }
        found
    }

    fn locate(&self, identifier: &str, text: &str, request: &HttpRequest) -> Option<OperationAddress> {
        let doc = document::parse(identifier, text).ok()?;
        let operation = document::find_operation(&doc, &request.method(), request.path())?;
        self.response_matchers
            .get(identifier)
            .is_some_and(|m| m.declares(&operation))
            .then_some(operation)
    }
}

enum State {
    Uninitialized,
    Ready(Catalog),
    Failed(String),
}

/// Validates exchanges against every document of a schema source.
///
/// The catalog is built on the first call that needs it. `&mut self` on those
/// calls keeps the first use serialized; afterwards [`Engine::catalog`] hands
/// out a shared `&Catalog` that can be used from several threads.
pub struct Engine {
    source: Box<dyn SchemaSource>,
    state: State,
}

impl Engine {
    pub fn new(source: impl SchemaSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            state: State::Uninitialized,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, State::Ready(_))
    }

    /// Load and compile every document on first use.
    ///
    /// # Errors
    ///
    /// Returns the load or compile error on the initializing call. The failure
    /// is remembered and every later call returns
    /// `EngineError::InitializationFailed` without loading again.
    pub fn catalog(&mut self) -> Result<&Catalog, EngineError> {
        if matches!(self.state, State::Uninitialized) {
            match self.initialize() {
                Ok(catalog) => self.state = State::Ready(catalog),
                Err(err) => {
                    error!(error = %err, "schema catalog failed to initialize");
                    self.state = State::Failed(err.to_string());
                    return Err(err);
                }
            }
        }

        match &self.state {
            State::Ready(catalog) => Ok(catalog),
            State::Failed(message) => Err(EngineError::InitializationFailed {
                message: message.clone(),
            }),
            State::Uninitialized => Err(EngineError::InitializationFailed {
                message: "catalog was not built".to_string(),
            }),
        }
    }

    fn initialize(&self) -> Result<Catalog, EngineError> {
        let schemas = self.source.load_schemas()?;
        let catalog = Catalog::from_schemas(schemas)?;
        info!(
            schemas = catalog.documents.len(),
            operations = catalog.routes().len(),
            "schema catalog ready"
        );
        Ok(catalog)
    }

    /// See [`Catalog::validate_request`].
    ///
    /// # Errors
    ///
    /// Fails only when the catalog cannot be built.
    pub fn validate_request(&mut self, request: &HttpRequest) -> Result<ValidationResult, EngineError> {
        Ok(self.catalog()?.validate_request(request))
    }

    /// See [`Catalog::validate_response`].
    ///
    /// # Errors
    ///
    /// Fails only when the catalog cannot be built.
    pub fn validate_response(
        &mut self,
        request: &HttpRequest,
        response: &HttpResponse,
        operation: Option<&OperationAddress>,
        schema: Option<&str>,
    ) -> Result<ValidationResult, EngineError> {
        Ok(self
            .catalog()?
            .validate_response(request, response, operation, schema))
    }
}
