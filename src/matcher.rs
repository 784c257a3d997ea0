//! Request and response matchers compiled from one OpenAPI document.
//!
//! [`compile`] turns document text into a [`MatcherPair`]. Every JSON Schema
//! in the document (parameters, request bodies, responses, headers) is compiled
//! up front with `jsonschema`, so a malformed document fails at compile time
//! rather than on the first request that happens to reach it.

use std::collections::HashMap;
use std::fmt;

use percent_encoding::percent_decode_str;
use serde_json::{json, Value};
use tracing::debug;

use crate::diagnostic::{Breadcrumb, Mismatch};
use crate::document::{self, Dialect, Route};
use crate::error::CompileError;
use crate::types::{HttpRequest, HttpResponse, OperationAddress, HTTP_METHODS};

/// Request and response matchers for one document.
#[derive(Debug)]
pub struct MatcherPair {
    pub request: RequestMatcher,
    pub response: ResponseMatcher,
}

/// Why a request could not be matched to an operation of a document.
#[derive(Debug)]
pub enum RequestMatchError {
    /// No declared route fits the request path and method.
    NoMatchingPath,
    /// A route fits but the request content does not conform to it.
    Mismatch(Mismatch),
}

/// Compile a document into its matcher pair.
///
/// # Errors
///
/// Returns `CompileError` if the text is not an OpenAPI document, a `$ref`
/// cannot be resolved, or any embedded schema is rejected by the validator.
pub fn compile(identifier: &str, text: &str) -> Result<MatcherPair, CompileError> {
    let doc = document::parse(identifier, text)?;
    let compiler = Compiler::new(identifier, &doc);

    let mut request_ops = Vec::new();
    let mut responses = HashMap::new();

    let paths = doc.get("paths").and_then(Value::as_object);

    for (template, item) in paths.into_iter().flatten() {
        let item = document::follow_ref(identifier, &doc, item)?;
        let route = Route::parse(template);
        let item_base = format!("/paths/{}", document::escape_pointer(template));
        let shared_params = item.get("parameters");

        for method in HTTP_METHODS {
            let Some(operation) = item.get(*method) else {
                continue;
            };
            let address = OperationAddress::new(template.as_str(), method);
            let base = format!("{}/{}", item_base, method);

            request_ops.push(RequestOperation {
                address: address.clone(),
                route: route.clone(),
                parameters: compiler.parameters(
                    [(item_base.as_str(), shared_params), (base.as_str(), operation.get("parameters"))],
                )?,
                body: compiler.request_body(operation.get("requestBody"), &base)?,
            });
            responses.insert(address, compiler.responses(operation.get("responses"), &base)?);
        }
    }

    debug!(
        schema = identifier,
        operations = request_ops.len(),
        "compiled OpenAPI document"
    );

    Ok(MatcherPair {
        request: RequestMatcher {
            identifier: identifier.to_string(),
            bases: document::server_base_paths(&doc),
            operations: request_ops,
        },
        response: ResponseMatcher {
            identifier: identifier.to_string(),
            operations: responses,
        },
    })
}

/// Matches concrete requests to the operations of one document.
#[derive(Debug)]
pub struct RequestMatcher {
    identifier: String,
    bases: Vec<String>,
    operations: Vec<RequestOperation>,
}

impl RequestMatcher {
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Every operation this document declares, in declaration order.
    pub fn operations(&self) -> impl Iterator<Item = &OperationAddress> {
        self.operations.iter().map(|op| &op.address)
    }

    /// Resolve `request` to an operation and validate its parameters and body.
    pub fn match_request(&self, request: &HttpRequest) -> Result<OperationAddress, RequestMatchError> {
        let method = request.method().to_lowercase();
        let candidates = self
            .operations
            .iter()
            .filter(|op| op.address.method() == method)
            .map(|op| (&op.route, op));

        let operation = document::select_route(candidates, &self.bases, request.path())
            .ok_or(RequestMatchError::NoMatchingPath)?;

        operation
            .validate(request, &self.bases)
            .map_err(RequestMatchError::Mismatch)?;

        Ok(operation.address.clone())
    }
}

/// Validates responses against a known operation of one document.
#[derive(Debug)]
pub struct ResponseMatcher {
    identifier: String,
    operations: HashMap<OperationAddress, Vec<ResponseSpec>>,
}

impl ResponseMatcher {
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn declares(&self, address: &OperationAddress) -> bool {
        self.operations.contains_key(address)
    }

    /// Validate `response` against the responses declared for `address`.
    pub fn validate(&self, address: &OperationAddress, response: &HttpResponse) -> Result<(), Mismatch> {
        let label = format!(
            "Response [{} {} {}]",
            address.method(),
            address.path(),
            response.status()
        );

        let specs = self.operations.get(address).ok_or_else(|| {
            Mismatch::new(format!(
                "Operation {} is not declared in {}",
                address, self.identifier
            ))
        })?;

        let spec = select_response(specs, response.status()).ok_or_else(|| {
            Mismatch::new(format!("Response status is not declared for {}", label))
        })?;

        for header in &spec.headers {
            match response.header_value(&header.name) {
                None if header.required => {
                    return Err(Mismatch::new(format!(
                        "Missing required header \"{}\" for {}",
                        header.name, label
                    )));
                }
                None => {}
                Some(value) => {
                    if let Some(schema) = &header.schema {
                        check_scalar(schema, &[value], &header.name, "header", &label)?;
                    }
                }
            }
        }

        if spec.content.is_empty() {
            return Ok(());
        }

        let body = response
            .body_text()
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| Mismatch::new(format!("Body is missing for {}", label)))?;

        check_body(&spec.content, response.header_value("content-type"), body, &label)
    }
}

// --- Compiled operation parts ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Location {
    Path,
    Query,
    Header,
    Cookie,
}

impl Location {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "path" => Some(Location::Path),
            "query" => Some(Location::Query),
            "header" => Some(Location::Header),
            "cookie" => Some(Location::Cookie),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Location::Path => "path",
            Location::Query => "query",
            Location::Header => "header",
            Location::Cookie => "cookie",
        }
    }
}

struct CompiledSchema {
    validator: jsonschema::Validator,
    /// Declared `type`, used to coerce string-encoded parameter values.
    primary_type: Option<String>,
    item_type: Option<String>,
}

impl fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledSchema")
            .field("primary_type", &self.primary_type)
            .field("item_type", &self.item_type)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct Parameter {
    name: String,
    location: Location,
    required: bool,
    schema: Option<CompiledSchema>,
}

#[derive(Debug)]
struct MediaSchema {
    media_type: String,
    schema: Option<CompiledSchema>,
}

#[derive(Debug)]
struct RequestBody {
    required: bool,
    content: Vec<MediaSchema>,
}

#[derive(Debug)]
struct RequestOperation {
    address: OperationAddress,
    route: Route,
    parameters: Vec<Parameter>,
    body: Option<RequestBody>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusKey {
    Exact(u16),
    /// `2XX` style range, keyed by the leading digit.
    Range(u16),
    Default,
}

impl StatusKey {
    fn parse(key: &str) -> Option<Self> {
        if key == "default" {
            return Some(StatusKey::Default);
        }
        let upper = key.to_ascii_uppercase();
        if upper.len() == 3 && upper.ends_with("XX") {
            return upper[..1].parse().ok().map(StatusKey::Range);
        }
        key.parse().ok().map(StatusKey::Exact)
    }
}

#[derive(Debug)]
struct ResponseHeader {
    name: String,
    required: bool,
    schema: Option<CompiledSchema>,
}

#[derive(Debug)]
struct ResponseSpec {
    status: StatusKey,
    headers: Vec<ResponseHeader>,
    content: Vec<MediaSchema>,
}

fn select_response(specs: &[ResponseSpec], status: u16) -> Option<&ResponseSpec> {
    specs
        .iter()
        .find(|s| s.status == StatusKey::Exact(status))
        .or_else(|| specs.iter().find(|s| s.status == StatusKey::Range(status / 100)))
        .or_else(|| specs.iter().find(|s| s.status == StatusKey::Default))
}

// --- Compilation ---

struct Compiler<'a> {
    identifier: &'a str,
    document: &'a Value,
    dialect: Dialect,
    components: Value,
}

impl<'a> Compiler<'a> {
    fn new(identifier: &'a str, document: &'a Value) -> Self {
        let dialect = document::dialect(document);
        let mut components = document.get("components").cloned().unwrap_or(json!({}));
        if dialect == Dialect::OpenApi30 {
            document::normalize_schema(&mut components);
        }
        Self {
            identifier,
            document,
            dialect,
            components,
        }
    }

    fn resolve(&self, value: &'a Value) -> Result<&'a Value, CompileError> {
        document::follow_ref(self.identifier, self.document, value)
    }

    fn schema(&self, schema: &'a Value, pointer: &str) -> Result<CompiledSchema, CompileError> {
        let resolved = self.resolve(schema)?;
        let primary_type = declared_type(resolved.get("type"));
        let item_type = resolved
            .get("items")
            .map(|items| self.resolve(items))
            .transpose()?
            .and_then(|items| declared_type(items.get("type")));

        let mut schema = schema.clone();
        if self.dialect == Dialect::OpenApi30 {
            document::normalize_schema(&mut schema);
        }

        // Components ride along at the root so `#/components/...` refs resolve.
        let root = json!({
            "allOf": [schema],
            "components": self.components,
        });

        let validator = jsonschema::options()
            .with_draft(self.dialect.draft())
            .build(&root)
            .map_err(|e| CompileError::InvalidSchema {
                identifier: self.identifier.to_string(),
                pointer: pointer.to_string(),
                message: e.to_string(),
            })?;

        Ok(CompiledSchema {
            validator,
            primary_type,
            item_type,
        })
    }

    /// Merge path-item and operation parameters; operation entries win.
    fn parameters(&self, scopes: [(&str, Option<&'a Value>); 2]) -> Result<Vec<Parameter>, CompileError> {
        let mut merged: Vec<Parameter> = Vec::new();

        for (base, list) in scopes {
            let Some(list) = list.and_then(Value::as_array) else {
                continue;
            };
            for (idx, raw) in list.iter().enumerate() {
                let param = self.resolve(raw)?;
                let (Some(name), Some(location)) = (
                    param.get("name").and_then(Value::as_str),
                    param.get("in").and_then(Value::as_str).and_then(Location::parse),
                ) else {
                    continue;
                };

                let pointer = format!("{}/parameters/{}", base, idx);
                let schema = match param_schema(param) {
                    Some(schema) => Some(self.schema(schema, &pointer)?),
                    None => None,
                };
                let required = location == Location::Path
                    || param.get("required").and_then(Value::as_bool).unwrap_or(false);

                merged.retain(|p| !(p.name == name && p.location == location));
                merged.push(Parameter {
                    name: name.to_string(),
                    location,
                    required,
                    schema,
                });
            }
        }

        Ok(merged)
    }

    fn request_body(
        &self,
        body: Option<&'a Value>,
        base: &str,
    ) -> Result<Option<RequestBody>, CompileError> {
        let Some(body) = body else {
            return Ok(None);
        };
        let body = self.resolve(body)?;
        let pointer = format!("{}/requestBody", base);

        Ok(Some(RequestBody {
            required: body.get("required").and_then(Value::as_bool).unwrap_or(false),
            content: self.content(body.get("content"), &pointer)?,
        }))
    }

    fn content(&self, content: Option<&'a Value>, base: &str) -> Result<Vec<MediaSchema>, CompileError> {
        let Some(content) = content.and_then(Value::as_object) else {
            return Ok(Vec::new());
        };

        content
            .iter()
            .map(|(media_type, media)| {
                let pointer = format!(
                    "{}/content/{}/schema",
                    base,
                    document::escape_pointer(media_type)
                );
                let schema = match media.get("schema") {
                    Some(schema) => Some(self.schema(schema, &pointer)?),
                    None => None,
                };
                Ok(MediaSchema {
                    media_type: essence(media_type),
                    schema,
                })
            })
            .collect()
    }

    fn responses(&self, responses: Option<&'a Value>, base: &str) -> Result<Vec<ResponseSpec>, CompileError> {
        let Some(responses) = responses.and_then(Value::as_object) else {
            return Ok(Vec::new());
        };

        let mut specs = Vec::new();
        for (key, raw) in responses {
            let Some(status) = StatusKey::parse(key) else {
                debug!(schema = self.identifier, status = %key, "ignoring unrecognized response key");
                continue;
            };
            let response = self.resolve(raw)?;
            let pointer = format!("{}/responses/{}", base, document::escape_pointer(key));

            specs.push(ResponseSpec {
                status,
                headers: self.response_headers(response.get("headers"), &pointer)?,
                content: self.content(response.get("content"), &pointer)?,
            });
        }
        Ok(specs)
    }

    fn response_headers(
        &self,
        headers: Option<&'a Value>,
        base: &str,
    ) -> Result<Vec<ResponseHeader>, CompileError> {
        let Some(headers) = headers.and_then(Value::as_object) else {
            return Ok(Vec::new());
        };

        let mut compiled = Vec::new();
        for (name, raw) in headers {
            // Content-Type is described by `content`, not by header objects.
            if name.eq_ignore_ascii_case("content-type") {
                continue;
            }
            let header = self.resolve(raw)?;
            let pointer = format!("{}/headers/{}", base, document::escape_pointer(name));
            let schema = match param_schema(header) {
                Some(schema) => Some(self.schema(schema, &pointer)?),
                None => None,
            };
            compiled.push(ResponseHeader {
                name: name.clone(),
                required: header.get("required").and_then(Value::as_bool).unwrap_or(false),
                schema,
            });
        }
        Ok(compiled)
    }
}

/// A parameter or header schema: `schema`, or the first `content` entry's schema.
fn param_schema(param: &Value) -> Option<&Value> {
    param.get("schema").or_else(|| {
        param
            .get("content")
            .and_then(Value::as_object)
            .and_then(|content| content.values().next())
            .and_then(|media| media.get("schema"))
    })
}

fn declared_type(ty: Option<&Value>) -> Option<String> {
    match ty? {
        Value::String(ty) => Some(ty.clone()),
        Value::Array(types) => types
            .iter()
            .filter_map(Value::as_str)
            .find(|t| *t != "null")
            .map(String::from),
        _ => None,
    }
}

// --- Request validation ---

impl RequestOperation {
    fn validate(&self, request: &HttpRequest, bases: &[String]) -> Result<(), Mismatch> {
        let label = format!("Request [{} {}]", self.address.method(), self.address.path());

        let path_values = document::relative_path(bases, &self.route, request.path())
            .and_then(|path| self.route.captures(path))
            .unwrap_or_default()
            .into_iter()
            .map(|(name, value)| (name, decode_component(&value)))
            .collect::<Vec<_>>();
        let query = parse_query(request.query().unwrap_or(""));
        let cookies = parse_cookies(request.header_value("cookie").unwrap_or(""));

        for param in &self.parameters {
            let values: Vec<&str> = match param.location {
                Location::Path => path_values
                    .iter()
                    .filter(|(name, _)| *name == param.name)
                    .map(|(_, value)| value.as_str())
                    .collect(),
                Location::Query => lookup_all(&query, &param.name),
                Location::Cookie => lookup_all(&cookies, &param.name),
                Location::Header => request.header_value(&param.name).into_iter().collect(),
            };

            if values.is_empty() {
                if param.required {
                    return Err(Mismatch::new(format!(
                        "Missing required {} parameter \"{}\" for {}",
                        param.location.as_str(),
                        param.name,
                        label
                    )));
                }
                continue;
            }

            if let Some(schema) = &param.schema {
                check_scalar(schema, &values, &param.name, param.location.as_str(), &label)?;
            }
        }

        let Some(body) = &self.body else {
            return Ok(());
        };

        match request.body_text().filter(|b| !b.trim().is_empty()) {
            None if body.required => Err(Mismatch::new(format!("Required body is missing for {}", label))),
            None => Ok(()),
            Some(text) => check_body(&body.content, request.header_value("content-type"), text, &label),
        }
    }
}

fn parse_query(query: &str) -> Vec<(String, String)> {
    url::form_urlencoded::parse(query.as_bytes()).into_owned().collect()
}

fn parse_cookies(header: &str) -> Vec<(String, String)> {
    header
        .split(';')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(key), decode_component(value))
        })
        .collect()
}

/// Percent-decode a path segment or cookie value. `+` stays literal.
fn decode_component(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

fn lookup_all<'p>(pairs: &'p [(String, String)], name: &str) -> Vec<&'p str> {
    pairs
        .iter()
        .filter(|(key, _)| key == name || key.strip_suffix("[]") == Some(name))
        .map(|(_, value)| value.as_str())
        .collect()
}

/// Coerce string-encoded parameter values to the declared type and validate them.
fn check_scalar(
    schema: &CompiledSchema,
    values: &[&str],
    name: &str,
    location: &str,
    label: &str,
) -> Result<(), Mismatch> {
    let instance = match schema.primary_type.as_deref() {
        Some("array") => {
            let items: Vec<&str> = if values.len() == 1 {
                values[0].split(',').collect()
            } else {
                values.to_vec()
            };
            Value::Array(
                items
                    .into_iter()
                    .map(|item| coerce(item, schema.item_type.as_deref()))
                    .collect(),
            )
        }
        ty => coerce(values[0], ty),
    };

    let failures = keyword_failures(schema, &instance, &[name.to_string()]);
    if failures.is_empty() {
        return Ok(());
    }
    Err(Mismatch::new(format!(
        "Value \"{}\" for {} parameter \"{}\" is invalid for {}",
        values.join(","),
        location,
        name,
        label
    ))
    .with_causes(failures))
}

fn coerce(raw: &str, ty: Option<&str>) -> Value {
    let parsed = match ty {
        Some("integer") => raw.parse::<i64>().ok().map(Value::from),
        Some("number") => raw
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
        Some("boolean") => match raw {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        _ => None,
    };
    parsed.unwrap_or_else(|| Value::String(raw.to_string()))
}

// --- Shared body checks ---

fn check_body(
    content: &[MediaSchema],
    content_type: Option<&str>,
    body: &str,
    label: &str,
) -> Result<(), Mismatch> {
    if content.is_empty() {
        return Ok(());
    }

    let media = select_media(content, content_type).ok_or_else(|| {
        Mismatch::new(format!(
            "Content-Type \"{}\" is not expected for {}",
            content_type.unwrap_or_default(),
            label
        ))
    })?;

    let effective = content_type.map(essence).unwrap_or_else(|| media.media_type.clone());
    let Some(schema) = media.schema.as_ref().filter(|_| is_json(&effective)) else {
        return Ok(());
    };

    let payload: Value = serde_json::from_str(body).map_err(|e| {
        Mismatch::new(format!("JSON parsing failed with \"{}\" for {}", e, label))
    })?;

    let failures = keyword_failures(schema, &payload, &[]);
    if failures.is_empty() {
        return Ok(());
    }
    Err(Mismatch::new(format!(
        "Body does not match schema for content-type \"{}\" for {}",
        media.media_type, label
    ))
    .with_causes(failures))
}

fn keyword_failures(schema: &CompiledSchema, instance: &Value, prefix: &[String]) -> Vec<Mismatch> {
    schema
        .validator
        .iter_errors(instance)
        .map(|e| {
            let mut crumbs = prefix.to_vec();
            crumbs.extend(
                Breadcrumb::from_pointer(&e.instance_path.to_string())
                    .chain()
                    .iter()
                    .cloned(),
            );
            Mismatch::keyword(
                format!("Keyword validation failed: {}", e),
                Breadcrumb::new(crumbs),
            )
        })
        .collect()
}

fn select_media<'m>(content: &'m [MediaSchema], content_type: Option<&str>) -> Option<&'m MediaSchema> {
    let Some(content_type) = content_type else {
        return content.first();
    };
    let actual = essence(content_type);
    let wildcard = match actual.split_once('/') {
        Some((main, _)) => format!("{}/*", main),
        None => String::new(),
    };

    content
        .iter()
        .find(|m| m.media_type == actual)
        .or_else(|| content.iter().find(|m| m.media_type == wildcard))
        .or_else(|| content.iter().find(|m| m.media_type == "*/*"))
}

/// Media type without parameters, lowercased.
fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn is_json(media_type: &str) -> bool {
    media_type == "application/json" || media_type.ends_with("+json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::build_message;

    const USERS: &str = r##"
openapi: 3.0.3
info:
  title: Users
  version: "1"
paths:
  /users:
    parameters:
      - name: X-Tenant
        in: header
        schema:
          type: string
    get:
      parameters:
        - name: limit
          in: query
          required: true
          schema:
            type: integer
            maximum: 100
        - name: tags
          in: query
          schema:
            type: array
            items:
              type: string
      responses:
        "200":
          description: list
          headers:
            X-Total:
              required: true
              schema:
                type: integer
          content:
            application/json:
              schema:
                type: array
                items:
                  $ref: "#/components/schemas/User"
    post:
      requestBody:
        $ref: "#/components/requestBodies/NewUser"
      responses:
        "201":
          description: created
          content:
            application/json:
              schema:
                $ref: "#/components/schemas/User"
        4XX:
          description: client error
          content:
            application/problem+json:
              schema:
                type: object
                required: [title]
        default:
          description: anything else
  /users/{id}:
    get:
      parameters:
        - name: id
          in: path
          required: true
          schema:
            type: integer
      responses:
        "200":
          description: one
          content:
            application/json:
              schema:
                $ref: "#/components/schemas/User"
components:
  requestBodies:
    NewUser:
      required: true
      content:
        application/json:
          schema:
            type: object
            required: [name]
            properties:
              name:
                type: string
              nickname:
                type: string
                nullable: true
  schemas:
    User:
      type: object
      required: [id, name]
      properties:
        id:
          type: integer
        name:
          type: string
"##;

    fn users() -> MatcherPair {
        compile("users.yaml", USERS).unwrap()
    }

    fn mismatch_message(result: Result<OperationAddress, RequestMatchError>) -> String {
        match result {
            Err(RequestMatchError::Mismatch(m)) => build_message(&m),
            other => panic!("expected mismatch, got {:?}", other),
        }
    }

    #[test]
    fn matches_operation_with_valid_body() {
        let pair = users();
        let request = HttpRequest::new("POST", "/users").json(&json!({"name": "Ann", "nickname": null}));
        let address = pair.request.match_request(&request).unwrap();
        assert_eq!(address, OperationAddress::new("/users", "post"));
    }

    #[test]
    fn unknown_route_is_no_matching_path() {
        let pair = users();
        let request = HttpRequest::new("GET", "/orders");
        assert!(matches!(
            pair.request.match_request(&request),
            Err(RequestMatchError::NoMatchingPath)
        ));

        let request = HttpRequest::new("DELETE", "/users/1");
        assert!(matches!(
            pair.request.match_request(&request),
            Err(RequestMatchError::NoMatchingPath)
        ));
    }

    #[test]
    fn missing_required_body() {
        let pair = users();
        let message = mismatch_message(pair.request.match_request(&HttpRequest::new("POST", "/users")));
        assert_eq!(message, "Required body is missing for Request [post /users]");
    }

    #[test]
    fn body_mismatch_carries_field_path() {
        let pair = users();
        let request = HttpRequest::new("POST", "/users").json(&json!({"name": 7}));
        let message = mismatch_message(pair.request.match_request(&request));
        assert!(message.starts_with("Field: name | Keyword validation failed:"), "{}", message);
        assert!(message.ends_with(
            "Body does not match schema for content-type \"application/json\" for Request [post /users]"
        ));
    }

    #[test]
    fn invalid_json_body() {
        let pair = users();
        let request = HttpRequest::new("POST", "/users")
            .header("Content-Type", "application/json")
            .body("{not json");
        let message = mismatch_message(pair.request.match_request(&request));
        assert!(message.starts_with("JSON parsing failed"), "{}", message);
    }

    #[test]
    fn unexpected_content_type() {
        let pair = users();
        let request = HttpRequest::new("POST", "/users")
            .header("Content-Type", "text/plain")
            .body("name=Ann");
        let message = mismatch_message(pair.request.match_request(&request));
        assert_eq!(
            message,
            "Content-Type \"text/plain\" is not expected for Request [post /users]"
        );
    }

    #[test]
    fn content_type_parameters_are_ignored() {
        let pair = users();
        let request = HttpRequest::new("POST", "/users")
            .header("Content-Type", "application/json; charset=utf-8")
            .body(r#"{"name":"Ann"}"#);
        assert!(pair.request.match_request(&request).is_ok());
    }

    #[test]
    fn path_parameter_is_type_checked() {
        let pair = users();
        assert!(pair
            .request
            .match_request(&HttpRequest::new("GET", "/users/42"))
            .is_ok());

        let message = mismatch_message(pair.request.match_request(&HttpRequest::new("GET", "/users/abc")));
        assert!(message.starts_with("Field: id |"), "{}", message);
        assert!(message.ends_with(
            "Value \"abc\" for path parameter \"id\" is invalid for Request [get /users/{id}]"
        ));
    }

    #[test]
    fn required_query_parameter() {
        let pair = users();
        let message = mismatch_message(pair.request.match_request(&HttpRequest::new("GET", "/users")));
        assert_eq!(
            message,
            "Missing required query parameter \"limit\" for Request [get /users]"
        );

        assert!(pair
            .request
            .match_request(&HttpRequest::new("GET", "/users?limit=10&tags=a,b"))
            .is_ok());

        let message = mismatch_message(
            pair.request
                .match_request(&HttpRequest::new("GET", "/users?limit=500")),
        );
        assert!(message.contains("Field: limit"), "{}", message);
    }

    #[test]
    fn response_matches_declared_schema() {
        let pair = users();
        let address = OperationAddress::new("/users/{id}", "get");
        let response = HttpResponse::new(200).json(&json!({"id": 42, "name": "Ann"}));
        assert!(pair.response.validate(&address, &response).is_ok());
    }

    #[test]
    fn response_body_mismatch() {
        let pair = users();
        let address = OperationAddress::new("/users/{id}", "get");
        let response = HttpResponse::new(200).json(&json!({"id": "42", "name": "Ann"}));
        let message = build_message(&pair.response.validate(&address, &response).unwrap_err());
        assert!(message.starts_with("Field: id |"), "{}", message);
        assert!(message.ends_with("for Response [get /users/{id} 200]"));
    }

    #[test]
    fn response_status_range_and_default() {
        let pair = users();
        let address = OperationAddress::new("/users", "post");

        let problem = HttpResponse::new(422)
            .header("Content-Type", "application/problem+json")
            .body(r#"{"title":"invalid"}"#);
        assert!(pair.response.validate(&address, &problem).is_ok());

        let bad_problem = HttpResponse::new(409)
            .header("Content-Type", "application/problem+json")
            .body("{}");
        assert!(pair.response.validate(&address, &bad_problem).is_err());

        // `default` declares no content, so any body passes.
        let server_error = HttpResponse::new(500).body("oops");
        assert!(pair.response.validate(&address, &server_error).is_ok());
    }

    #[test]
    fn undeclared_status_without_default() {
        let pair = users();
        let address = OperationAddress::new("/users/{id}", "get");
        let err = pair.response.validate(&address, &HttpResponse::new(404)).unwrap_err();
        assert_eq!(
            err.message(),
            "Response status is not declared for Response [get /users/{id} 404]"
        );
    }

    #[test]
    fn required_response_header() {
        let pair = users();
        let address = OperationAddress::new("/users", "get");
        let body = json!([{"id": 1, "name": "Ann"}]);

        let missing = HttpResponse::new(200).json(&body);
        let err = pair.response.validate(&address, &missing).unwrap_err();
        assert_eq!(
            err.message(),
            "Missing required header \"X-Total\" for Response [get /users 200]"
        );

        let present = HttpResponse::new(200).header("x-total", "1").json(&body);
        assert!(pair.response.validate(&address, &present).is_ok());
    }

    #[test]
    fn server_prefix_is_honored() {
        let text = r#"
openapi: 3.1.0
info: { title: t, version: "1" }
servers:
  - url: https://api.example.com/v1
paths:
  /ping:
    get:
      responses:
        "204": { description: pong }
"#;
        let pair = compile("ping.yaml", text).unwrap();
        assert!(pair.request.match_request(&HttpRequest::new("GET", "/v1/ping")).is_ok());
        assert!(matches!(
            pair.request.match_request(&HttpRequest::new("GET", "/ping")),
            Err(RequestMatchError::NoMatchingPath)
        ));
    }

    #[test]
    fn encoded_path_and_query_values_are_decoded() {
        let text = r#"
openapi: 3.0.3
info: { title: files, version: "1" }
paths:
  /files/{name}:
    get:
      parameters:
        - { name: name, in: path, required: true, schema: { type: string, enum: ["a b", "c+d"] } }
        - { name: q, in: query, schema: { type: string, enum: ["x y"] } }
      responses:
        "200": { description: ok }
"#;
        let pair = compile("files.yaml", text).unwrap();
        for target in ["/files/a%20b", "/files/c+d", "/files/a%20b?q=x+y", "/files/a%20b?q=x%20y"] {
            assert!(
                pair.request.match_request(&HttpRequest::new("GET", target)).is_ok(),
                "{}",
                target
            );
        }

        let message = mismatch_message(pair.request.match_request(&HttpRequest::new("GET", "/files/a+b")));
        assert!(message.contains("Field: name"), "{}", message);
    }

    #[test]
    fn broken_reference_fails_compilation() {
        let text = r##"
openapi: 3.0.0
info: { title: t, version: "1" }
paths:
  /x:
    post:
      requestBody:
        $ref: "#/components/requestBodies/Missing"
      responses: {}
"##;
        let result = compile("broken.yaml", text);
        assert!(matches!(result, Err(CompileError::BrokenRef { .. })));
    }

    #[test]
    fn invalid_schema_fails_compilation() {
        let text = r#"
openapi: 3.0.0
info: { title: t, version: "1" }
paths:
  /x:
    get:
      responses:
        "200":
          description: ok
          content:
            application/json:
              schema:
                type: 12
"#;
        let result = compile("bad-schema.yaml", text);
        assert!(matches!(result, Err(CompileError::InvalidSchema { .. })));
    }

    #[test]
    fn operations_listed_in_declaration_order() {
        let pair = users();
        let ops: Vec<String> = pair.request.operations().map(|op| op.to_string()).collect();
        assert_eq!(ops, vec!["get /users", "post /users", "get /users/{id}"]);
    }

    #[test]
    fn query_and_cookie_decoding() {
        assert_eq!(
            parse_query("q=a%20b+c&tag[]=x&flag"),
            vec![
                ("q".to_string(), "a b c".to_string()),
                ("tag[]".to_string(), "x".to_string()),
                ("flag".to_string(), String::new()),
            ]
        );
        assert_eq!(
            parse_cookies("session=a%3Db+c; theme=dark"),
            vec![
                ("session".to_string(), "a=b+c".to_string()),
                ("theme".to_string(), "dark".to_string()),
            ]
        );
        assert_eq!(decode_component("100%"), "100%");
    }

    #[test]
    fn status_key_parsing() {
        assert_eq!(StatusKey::parse("200"), Some(StatusKey::Exact(200)));
        assert_eq!(StatusKey::parse("4XX"), Some(StatusKey::Range(4)));
        assert_eq!(StatusKey::parse("5xx"), Some(StatusKey::Range(5)));
        assert_eq!(StatusKey::parse("default"), Some(StatusKey::Default));
        assert_eq!(StatusKey::parse("x-extension"), None);
    }
}
