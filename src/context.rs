//! Per-scenario capture and verification of HTTP exchanges.
//!
//! A [`ScenarioContext`] is created by the test harness and passed explicitly
//! to whatever captures traffic; nothing here is global. Each scenario starts
//! with [`ScenarioContext::begin_scenario`], and every request step ends with
//! [`ScenarioContext::after_step`] or a direct [`ScenarioContext::verify`].

use regex::Regex;
use tracing::debug;

use crate::engine::Engine;
use crate::error::ContractViolation;
use crate::types::{HttpRequest, HttpResponse};

/// Scenario tag that skips request and response validation.
pub const SKIP_VALIDATION_TAG: &str = "skipOpenApiValidation";
/// Scenario tag that skips request validation.
pub const SKIP_REQUEST_TAG: &str = "skipOpenApiRequestValidation";
/// Scenario tag that skips response validation.
pub const SKIP_RESPONSE_TAG: &str = "skipOpenApiResponseValidation";

/// Step texts that send a request and are followed by validation.
const REQUEST_STEP_PATTERNS: &[&str] = &[
    r"(?i)I send .+ request to .+ route",
    r"(?i)I send a .+ request to",
    r"(?i)I request ",
];

/// Switches read once when the context is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextSettings {
    pub enabled: bool,
    /// A 4xx response suppresses request validation failures.
    pub skip_request_on_4xx: bool,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            skip_request_on_4xx: true,
        }
    }
}

/// Captured exchange plus the skip directives of the running scenario.
#[derive(Debug)]
pub struct ScenarioContext {
    settings: ContextSettings,
    skip_request: bool,
    skip_response: bool,
    request: Option<HttpRequest>,
    response: Option<HttpResponse>,
    step_patterns: Vec<Regex>,
}

impl ScenarioContext {
    pub fn new(settings: ContextSettings) -> Self {
        Self {
            settings,
            skip_request: false,
            skip_response: false,
            request: None,
            response: None,
            step_patterns: REQUEST_STEP_PATTERNS
                .iter()
                .filter_map(|p| Regex::new(p).ok())
                .collect(),
        }
    }

    pub fn settings(&self) -> ContextSettings {
        self.settings
    }

    /// Reset captures and skip flags, then apply the scenario's tags.
    ///
    /// Feature and scenario tags may be passed together.
    pub fn begin_scenario<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.skip_request = false;
        self.skip_response = false;
        self.reset();

        for tag in tags {
            match tag.as_ref().trim_start_matches('@') {
                SKIP_VALIDATION_TAG => {
                    self.skip_request = true;
                    self.skip_response = true;
                }
                SKIP_REQUEST_TAG => self.skip_request = true,
                SKIP_RESPONSE_TAG => self.skip_response = true,
                _ => {}
            }
        }
    }

    pub fn disable_validation(&mut self) {
        self.skip_request = true;
        self.skip_response = true;
    }

    pub fn disable_request_validation(&mut self) {
        self.skip_request = true;
    }

    pub fn disable_response_validation(&mut self) {
        self.skip_response = true;
    }

    pub fn is_request_skipped(&self) -> bool {
        self.skip_request
    }

    pub fn is_response_skipped(&self) -> bool {
        self.skip_response
    }

    /// Record the latest exchange, replacing any earlier one.
    pub fn capture(&mut self, request: HttpRequest, response: HttpResponse) {
        self.request = Some(request);
        self.response = Some(response);
    }

    pub fn capture_request(&mut self, request: HttpRequest) {
        self.request = Some(request);
    }

    pub fn capture_response(&mut self, response: HttpResponse) {
        self.response = Some(response);
    }

    pub fn reset(&mut self) {
        self.request = None;
        self.response = None;
    }

    /// Whether a step's text is one that sends an HTTP request.
    pub fn is_request_step(&self, step: &str) -> bool {
        self.step_patterns.iter().any(|p| p.is_match(step))
    }

    /// Verify the captured exchange after a step, if the step sent a request.
    ///
    /// # Errors
    ///
    /// See [`ScenarioContext::verify`].
    pub fn after_step(&mut self, step: &str, engine: &mut Engine) -> Result<(), ContractViolation> {
        if !self.settings.enabled || !self.is_request_step(step) {
            return Ok(());
        }
        self.verify(engine)
    }

    /// Validate the captured exchange and clear it.
    ///
    /// The request is always validated, since its verdict carries the
    /// operation used for the response. Its failure is only reported when
    /// request validation is not skipped and the 4xx policy does not apply.
    ///
    /// # Errors
    ///
    /// Returns `ContractViolation::NothingCaptured` when no complete exchange
    /// was captured, `Request` or `Response` for a failed verdict, and
    /// `Engine` when the schemas cannot be loaded.
    pub fn verify(&mut self, engine: &mut Engine) -> Result<(), ContractViolation> {
        if !self.settings.enabled {
            return Ok(());
        }

        let (Some(request), Some(response)) = (self.request.take(), self.response.take()) else {
            self.reset();
            return Err(ContractViolation::NothingCaptured);
        };

        let skip_request =
            self.skip_request || (response.is_client_error() && self.settings.skip_request_on_4xx);

        let request_result = engine.validate_request(&request)?;
        if !skip_request && !request_result.is_valid() {
            return Err(ContractViolation::Request {
                message: request_result.error_message().unwrap_or_default().to_string(),
                schema: request_result.schema_identifier().map(str::to_string),
            });
        }

        if self.skip_response {
            debug!(path = request.path(), "response validation skipped");
            return Ok(());
        }

        let response_result = engine.validate_response(
            &request,
            &response,
            request_result.operation_address(),
            request_result.schema_identifier(),
        )?;
        if response_result.is_valid() {
            return Ok(());
        }

        Err(ContractViolation::Response {
            message: response_result.error_message().unwrap_or_default().to_string(),
            schema: response_result.schema_identifier().map(str::to_string),
        })
    }
}

impl Default for ScenarioContext {
    fn default() -> Self {
        Self::new(ContextSettings::default())
    }
}
