//! Core value types shared by schema sources, the matcher and the engine.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// HTTP methods an OpenAPI path item may declare, lowercase as they appear in documents.
pub const HTTP_METHODS: &[&str] = &[
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

/// Ordered mapping from schema identifier to raw document text.
///
/// Iteration follows first-insertion order. Inserting an identifier that is
/// already present replaces its text but keeps its original position, so a
/// later source overrides an earlier one without reshuffling load order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaSet {
    entries: Vec<(String, String)>,
    index: HashMap<String, usize>,
}

impl SchemaSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a document. Returns the previous text, if any.
    pub fn insert(&mut self, identifier: impl Into<String>, text: impl Into<String>) -> Option<String> {
        let identifier = identifier.into();
        let text = text.into();
        match self.index.get(&identifier) {
            Some(&pos) => Some(std::mem::replace(&mut self.entries[pos].1, text)),
            None => {
                self.index.insert(identifier.clone(), self.entries.len());
                self.entries.push((identifier, text));
                None
            }
        }
    }

    /// Merge another set into this one, later entries overriding.
    pub fn extend(&mut self, other: SchemaSet) {
        for (identifier, text) in other.entries {
            self.insert(identifier, text);
        }
    }

    pub fn get(&self, identifier: &str) -> Option<&str> {
        self.index
            .get(identifier)
            .map(|&pos| self.entries[pos].1.as_str())
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.index.contains_key(identifier)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(identifier, text)` pairs in load order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(id, text)| (id.as_str(), text.as_str()))
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(id, _)| id.as_str())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SchemaSet {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut set = SchemaSet::new();
        for (identifier, text) in iter {
            set.insert(identifier, text);
        }
        set
    }
}

/// A captured HTTP request. The validator only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawHttpRequest")]
pub struct HttpRequest {
    method: String,
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    query: Option<String>,
    headers: BTreeMap<String, String>,
    body: Option<String>,
}

/// Exchange-file shape of a request, before the path is normalized.
#[derive(Deserialize)]
struct RawHttpRequest {
    method: String,
    path: String,
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "deserialize_body")]
    body: Option<String>,
}

impl From<RawHttpRequest> for HttpRequest {
    fn from(raw: RawHttpRequest) -> Self {
        let (path, query) = match raw.query {
            Some(query) => (raw.path, Some(query)),
            None => split_target(&raw.path),
        };
        Self {
            method: raw.method,
            path,
            query,
            headers: raw.headers,
            body: raw.body,
        }
    }
}

impl HttpRequest {
    /// Create a request. A `?query` suffix on `target` is split off into the query string.
    pub fn new(method: impl AsRef<str>, target: impl AsRef<str>) -> Self {
        let (path, query) = split_target(target.as_ref());
        Self {
            method: method.as_ref().to_uppercase(),
            path,
            query,
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set a JSON body, adding `Content-Type: application/json` unless one is set.
    pub fn json(mut self, body: &Value) -> Self {
        if self.header_value("content-type").is_none() {
            self.headers
                .insert("Content-Type".to_string(), "application/json".to_string());
        }
        self.body = Some(body.to_string());
        self
    }

    /// Upper-case HTTP method.
    pub fn method(&self) -> String {
        self.method.to_uppercase()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Case-insensitive header lookup.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn body_text(&self) -> Option<&str> {
        self.body.as_deref()
    }
}

/// A captured HTTP response. The validator only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    status: u16,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "deserialize_body")]
    body: Option<String>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set a JSON body, adding `Content-Type: application/json` unless one is set.
    pub fn json(mut self, body: &Value) -> Self {
        if self.header_value("content-type").is_none() {
            self.headers
                .insert("Content-Type".to_string(), "application/json".to_string());
        }
        self.body = Some(body.to_string());
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// Case-insensitive header lookup.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn body_text(&self) -> Option<&str> {
        self.body.as_deref()
    }
}

fn find_header<'a>(headers: &'a BTreeMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

fn split_target(target: &str) -> (String, Option<String>) {
    match target.split_once('?') {
        Some((path, query)) if !query.is_empty() => (path.to_string(), Some(query.to_string())),
        Some((path, _)) => (path.to_string(), None),
        None => (target.to_string(), None),
    }
}

/// Bodies in exchange files may be written as JSON values or as raw strings.
fn deserialize_body<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text),
        Some(other) => Some(other.to_string()),
    })
}

/// A documented endpoint: path template plus lowercase HTTP method.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationAddress {
    path: String,
    method: String,
}

impl OperationAddress {
    pub fn new(path: impl Into<String>, method: impl AsRef<str>) -> Self {
        Self {
            path: path.into(),
            method: method.as_ref().to_lowercase(),
        }
    }

    /// The path template as declared, e.g. `/users/{id}`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Lowercase method, e.g. `get`.
    pub fn method(&self) -> &str {
        &self.method
    }
}

impl fmt::Display for OperationAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// Verdict of a single request or response validation.
///
/// Constructed only through [`ValidationResult::valid`],
/// [`ValidationResult::invalid`] and [`ValidationResult::not_found`], which
/// keep two invariants: a valid result carries no error message, and an
/// operation address is never present without its schema identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    operation: Option<OperationAddress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema: Option<String>,
}

impl ValidationResult {
    pub fn valid(operation: OperationAddress, schema: impl Into<String>) -> Self {
        Self {
            valid: true,
            error: None,
            operation: Some(operation),
            schema: Some(schema.into()),
        }
    }

    /// The route was found in `schema` but the content did not conform.
    pub fn invalid(
        message: impl Into<String>,
        schema: impl Into<String>,
        operation: Option<OperationAddress>,
    ) -> Self {
        Self {
            valid: false,
            error: Some(message.into()),
            operation,
            schema: Some(schema.into()),
        }
    }

    /// No loaded document declares the endpoint.
    pub fn not_found(method: &str, path: &str) -> Self {
        Self {
            valid: false,
            error: Some(format!(
                "no schema found for endpoint {} {}",
                method.to_uppercase(),
                path
            )),
            operation: None,
            schema: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn operation_address(&self) -> Option<&OperationAddress> {
        self.operation.as_ref()
    }

    pub fn schema_identifier(&self) -> Option<&str> {
        self.schema.as_deref()
    }
}
