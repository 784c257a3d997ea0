//! OpenAPI document handling: parsing, schema normalization and route matching.

use regex::Regex;
use serde_json::Value;

use crate::error::CompileError;
use crate::types::{OperationAddress, HTTP_METHODS};

/// Maximum number of `$ref` hops followed before a reference is considered circular.
const MAX_REF_DEPTH: usize = 32;

/// JSON Schema dialect used to compile a document's schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// OpenAPI 3.0: Draft 4 with `nullable`.
    OpenApi30,
    /// OpenAPI 3.1: JSON Schema 2020-12.
    OpenApi31,
}

impl Dialect {
    pub fn draft(self) -> jsonschema::Draft {
        match self {
            Dialect::OpenApi30 => jsonschema::Draft::Draft4,
            Dialect::OpenApi31 => jsonschema::Draft::Draft202012,
        }
    }
}

/// Parse document text (YAML or JSON) and check it looks like an OpenAPI document.
pub fn parse(identifier: &str, text: &str) -> Result<Value, CompileError> {
    let yaml: serde_yaml::Value =
        serde_yaml::from_str(text).map_err(|source| CompileError::InvalidYaml {
            identifier: identifier.to_string(),
            source,
        })?;

    // Going through serde_yaml::Value turns numeric mapping keys (`200:`) into strings.
    let document = serde_json::to_value(yaml).map_err(|e| CompileError::NotOpenApi {
        identifier: identifier.to_string(),
        message: e.to_string(),
    })?;

    let not_openapi = |message: &str| CompileError::NotOpenApi {
        identifier: identifier.to_string(),
        message: message.to_string(),
    };

    if !document.is_object() {
        return Err(not_openapi("document root is not a mapping"));
    }
    if !document.get("openapi").map(Value::is_string).unwrap_or(false) {
        return Err(not_openapi("missing \"openapi\" version string"));
    }
    if !document.get("paths").map(Value::is_object).unwrap_or(false) {
        return Err(not_openapi("missing \"paths\" mapping"));
    }

    Ok(document)
}

/// Determine the schema dialect from the `openapi` version field.
pub fn dialect(document: &Value) -> Dialect {
    match document.get("openapi").and_then(Value::as_str) {
        Some(version) if version.starts_with("3.1") => Dialect::OpenApi31,
        _ => Dialect::OpenApi30,
    }
}

/// Rewrite OpenAPI 3.0 schema extensions into plain JSON Schema.
///
/// `nullable: true` becomes a `"null"` member of `type` (and of `enum`, when present).
pub fn normalize_schema(value: &mut Value) {
    match value {
        Value::Object(map) => {
            let nullable = map.get("nullable").and_then(Value::as_bool).unwrap_or(false);
            if nullable {
                match map.get_mut("type") {
                    Some(Value::String(ty)) => {
                        let ty = std::mem::take(ty);
                        map.insert(
                            "type".to_string(),
                            Value::Array(vec![Value::String(ty), Value::String("null".into())]),
                        );
                    }
                    Some(Value::Array(types)) => {
                        if !types.iter().any(|t| t == "null") {
                            types.push(Value::String("null".into()));
                        }
                    }
                    _ => {}
                }
                if let Some(Value::Array(values)) = map.get_mut("enum") {
                    if !values.iter().any(Value::is_null) {
                        values.push(Value::Null);
                    }
                }
            }

            for child in map.values_mut() {
                normalize_schema(child);
            }
        }
        Value::Array(items) => {
            for item in items {
                normalize_schema(item);
            }
        }
        _ => {}
    }
}

/// Follow local `$ref`s until reaching a non-reference value.
pub fn follow_ref<'a>(
    identifier: &str,
    document: &'a Value,
    value: &'a Value,
) -> Result<&'a Value, CompileError> {
    let mut current = value;
    for _ in 0..MAX_REF_DEPTH {
        let Some(reference) = current.get("$ref").and_then(Value::as_str) else {
            return Ok(current);
        };
        current = reference
            .strip_prefix('#')
            .and_then(|pointer| document.pointer(pointer))
            .ok_or_else(|| CompileError::BrokenRef {
                identifier: identifier.to_string(),
                reference: reference.to_string(),
            })?;
    }
    Err(CompileError::BrokenRef {
        identifier: identifier.to_string(),
        reference: current
            .get("$ref")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

/// Escape a key for use inside a JSON Pointer.
pub fn escape_pointer(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

/// Path prefixes contributed by the document's `servers` entries.
///
/// Server variables are replaced by their defaults. Without servers the only
/// base path is the empty one.
pub fn server_base_paths(document: &Value) -> Vec<String> {
    let mut bases: Vec<String> = document
        .get("servers")
        .and_then(Value::as_array)
        .map(|servers| {
            servers
                .iter()
                .filter_map(|server| {
                    let url = server.get("url")?.as_str()?;
                    Some(server_path(url, server.get("variables")))
                })
                .collect()
        })
        .unwrap_or_default();

    if bases.is_empty() {
        bases.push(String::new());
    }
    bases.dedup();
    bases
}

fn server_path(url: &str, variables: Option<&Value>) -> String {
    let mut url = url.to_string();
    if let Some(Value::Object(vars)) = variables {
        for (name, var) in vars {
            if let Some(default) = var.get("default").and_then(Value::as_str) {
                url = url.replace(&format!("{{{}}}", name), default);
            }
        }
    }

    let path = match url.split_once("://") {
        Some((_, rest)) => rest.find('/').map(|idx| &rest[idx..]).unwrap_or(""),
        None => url.as_str(),
    };
    path.trim_end_matches('/').to_string()
}

/// Strip a server base path from a request path, if it applies.
fn strip_base<'a>(path: &'a str, base: &str) -> Option<&'a str> {
    if base.is_empty() {
        return Some(path);
    }
    let rest = path.strip_prefix(base)?;
    if rest.is_empty() {
        Some("/")
    } else if rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    /// A whole-segment parameter, e.g. `{id}`.
    Param(String),
    /// A segment mixing literals and parameters, e.g. `{name}.json`.
    Pattern { regex: Regex, names: Vec<String> },
}

/// A compiled OpenAPI path template.
#[derive(Debug, Clone)]
pub struct Route {
    template: String,
    segments: Vec<Segment>,
}

impl Route {
    pub fn parse(template: &str) -> Self {
        let segments = split_path(template)
            .map(|segment| {
                if !segment.contains('{') {
                    return Segment::Literal(segment.to_string());
                }
                if segment.starts_with('{')
                    && segment.ends_with('}')
                    && segment[1..segment.len() - 1].find(&['{', '}'][..]).is_none()
                {
                    return Segment::Param(segment[1..segment.len() - 1].to_string());
                }
                compile_pattern(segment)
            })
            .collect();

        Self {
            template: template.to_string(),
            segments,
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Number of literal segments; more literals means a more specific route.
    pub fn specificity(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count()
    }

    pub fn matches(&self, path: &str) -> bool {
        self.captures(path).is_some()
    }

    /// Match a concrete path, returning the path parameter values by name.
    pub fn captures(&self, path: &str) -> Option<Vec<(String, String)>> {
        let parts: Vec<&str> = split_path(path).collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut params = Vec::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(literal) => {
                    if literal != part {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    if part.is_empty() {
                        return None;
                    }
                    params.push((name.clone(), part.to_string()));
                }
                Segment::Pattern { regex, names } => {
                    let caps = regex.captures(part)?;
                    for (idx, name) in names.iter().enumerate() {
                        let value = caps.get(idx + 1)?.as_str();
                        params.push((name.clone(), value.to_string()));
                    }
                }
            }
        }
        Some(params)
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    let trimmed = path.trim_start_matches('/');
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    trimmed.split('/')
}

fn compile_pattern(segment: &str) -> Segment {
    let mut pattern = String::from("^");
    let mut names = Vec::new();
    let mut rest = segment;

    while let Some(open) = rest.find('{') {
        pattern.push_str(&regex::escape(&rest[..open]));
        match rest[open..].find('}') {
            Some(close) => {
                names.push(rest[open + 1..open + close].to_string());
                pattern.push_str("([^/]+?)");
                rest = &rest[open + close + 1..];
            }
            None => {
                rest = &rest[open..];
                break;
            }
        }
    }
    pattern.push_str(&regex::escape(rest));
    pattern.push('$');

    match Regex::new(&pattern) {
        Ok(regex) => Segment::Pattern { regex, names },
        // Escaped literals and fixed groups always compile; keep the raw text as a literal otherwise.
        Err(_) => Segment::Literal(segment.to_string()),
    }
}

/// Pick the best route for `path` among `candidates`.
///
/// Server base paths are stripped first. The most specific route wins; ties
/// go to the earliest declared.
pub fn select_route<'a, T>(
    candidates: impl IntoIterator<Item = (&'a Route, T)>,
    bases: &[String],
    path: &str,
) -> Option<T> {
    let relative: Vec<&str> = bases.iter().filter_map(|b| strip_base(path, b)).collect();
    let mut best: Option<(usize, T)> = None;

    for (route, item) in candidates {
        if !relative.iter().any(|p| route.matches(p)) {
            continue;
        }
        let score = route.specificity();
        if best.as_ref().map(|(s, _)| score > *s).unwrap_or(true) {
            best = Some((score, item));
        }
    }
    best.map(|(_, item)| item)
}

/// Strip whichever base path applies and return the route-relative path.
pub fn relative_path<'a>(bases: &[String], route: &Route, path: &'a str) -> Option<&'a str> {
    bases
        .iter()
        .filter_map(|b| strip_base(path, b))
        .find(|p| route.matches(p))
}

/// Find an operation by path pattern and method alone, ignoring any content.
pub fn find_operation(document: &Value, method: &str, path: &str) -> Option<OperationAddress> {
    let method = method.to_lowercase();
    let paths = document.get("paths")?.as_object()?;
    let bases = server_base_paths(document);

    let routes: Vec<Route> = paths
        .iter()
        .filter(|(_, item)| item.get(&method).is_some())
        .map(|(template, _)| Route::parse(template))
        .collect();

    select_route(routes.iter().map(|r| (r, r)), &bases, path)
        .map(|route| OperationAddress::new(route.template(), &method))
}

/// List every `(path template, method)` declared by the document.
pub fn declared_operations(document: &Value) -> Vec<OperationAddress> {
    let Some(paths) = document.get("paths").and_then(Value::as_object) else {
        return Vec::new();
    };
    paths
        .iter()
        .flat_map(|(template, item)| {
            HTTP_METHODS
                .iter()
                .filter(move |m| item.get(**m).is_some())
                .map(move |m| OperationAddress::new(template.as_str(), m))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PETSTORE: &str = r#"
openapi: 3.0.3
info:
  title: Pets
  version: "1"
paths:
  /pets:
    get:
      responses:
        200:
          description: ok
  /pets/{id}:
    get:
      responses:
        "200":
          description: ok
    delete:
      responses:
        "204":
          description: gone
  /pets/mine:
    get:
      responses:
        "200":
          description: ok
"#;

    #[test]
    fn parse_turns_numeric_keys_into_strings() {
        let doc = parse("pets.yaml", PETSTORE).unwrap();
        assert!(doc["paths"]["/pets"]["get"]["responses"].get("200").is_some());
    }

    #[test]
    fn parse_rejects_invalid_yaml() {
        let result = parse("broken.yaml", "openapi: [unclosed");
        assert!(matches!(result, Err(CompileError::InvalidYaml { .. })));
    }

    #[test]
    fn parse_rejects_non_openapi() {
        let result = parse("other.yaml", "name: not an api\n");
        assert!(matches!(result, Err(CompileError::NotOpenApi { .. })));

        let result = parse("nopaths.yaml", "openapi: 3.0.0\n");
        assert!(matches!(result, Err(CompileError::NotOpenApi { .. })));
    }

    #[test]
    fn dialect_from_version() {
        assert_eq!(dialect(&json!({"openapi": "3.1.0"})), Dialect::OpenApi31);
        assert_eq!(dialect(&json!({"openapi": "3.0.3"})), Dialect::OpenApi30);
    }

    #[test]
    fn normalize_nullable_type() {
        let mut schema = json!({
            "type": "object",
            "properties": {
                "nickname": { "type": "string", "nullable": true },
                "status": { "type": "string", "nullable": true, "enum": ["a", "b"] },
                "plain": { "type": "integer" }
            }
        });
        normalize_schema(&mut schema);

        assert_eq!(schema["properties"]["nickname"]["type"], json!(["string", "null"]));
        assert_eq!(schema["properties"]["status"]["enum"], json!(["a", "b", null]));
        assert_eq!(schema["properties"]["plain"]["type"], json!("integer"));
    }

    #[test]
    fn follow_ref_resolves_chain() {
        let doc = json!({
            "components": {
                "requestBodies": {
                    "Alias": { "$ref": "#/components/requestBodies/Pet" },
                    "Pet": { "required": true }
                }
            }
        });
        let start = json!({ "$ref": "#/components/requestBodies/Alias" });
        let resolved = follow_ref("doc", &doc, &start).unwrap();
        assert_eq!(resolved["required"], json!(true));
    }

    #[test]
    fn follow_ref_reports_broken_reference() {
        let doc = json!({});
        let start = json!({ "$ref": "#/components/parameters/Missing" });
        let result = follow_ref("doc", &doc, &start);
        assert!(matches!(result, Err(CompileError::BrokenRef { .. })));
    }

    #[test]
    fn follow_ref_detects_cycles() {
        let doc = json!({ "a": { "$ref": "#/b" }, "b": { "$ref": "#/a" } });
        let start = json!({ "$ref": "#/a" });
        assert!(follow_ref("doc", &doc, &start).is_err());
    }

    #[test]
    fn route_matches_literal_and_params() {
        let route = Route::parse("/users/{id}");
        assert!(route.matches("/users/42"));
        assert!(!route.matches("/users"));
        assert!(!route.matches("/users/42/posts"));
        assert!(!route.matches("/accounts/42"));
        assert!(!route.matches("/users/"));
    }

    #[test]
    fn route_captures_params() {
        let route = Route::parse("/users/{userId}/posts/{postId}");
        let params = route.captures("/users/7/posts/99").unwrap();
        assert_eq!(
            params,
            vec![
                ("userId".to_string(), "7".to_string()),
                ("postId".to_string(), "99".to_string())
            ]
        );
    }

    #[test]
    fn route_matches_mixed_segment() {
        let route = Route::parse("/files/{name}.json");
        assert_eq!(
            route.captures("/files/report.json"),
            Some(vec![("name".to_string(), "report".to_string())])
        );
        assert!(!route.matches("/files/report.xml"));
        assert!(!route.matches("/files/.json"));
    }

    #[test]
    fn route_ignores_trailing_slash() {
        let route = Route::parse("/users");
        assert!(route.matches("/users/"));
        assert!(Route::parse("/").matches("/"));
    }

    #[test]
    fn literal_route_preferred_over_param() {
        let doc = parse("pets.yaml", PETSTORE).unwrap();
        let op = find_operation(&doc, "GET", "/pets/mine").unwrap();
        assert_eq!(op.path(), "/pets/mine");

        let op = find_operation(&doc, "GET", "/pets/5").unwrap();
        assert_eq!(op.path(), "/pets/{id}");
    }

    #[test]
    fn find_operation_requires_declared_method() {
        let doc = parse("pets.yaml", PETSTORE).unwrap();
        assert!(find_operation(&doc, "POST", "/pets/5").is_none());
        let op = find_operation(&doc, "delete", "/pets/5").unwrap();
        assert_eq!(op.method(), "delete");
    }

    #[test]
    fn server_base_path_is_stripped() {
        let doc = json!({
            "openapi": "3.0.0",
            "servers": [{ "url": "https://api.example.com/{version}", "variables": { "version": { "default": "v2" } } }],
            "paths": { "/pets": { "get": {} } }
        });
        assert_eq!(server_base_paths(&doc), vec!["/v2".to_string()]);
        assert!(find_operation(&doc, "GET", "/v2/pets").is_some());
        assert!(find_operation(&doc, "GET", "/pets").is_none());
        assert!(find_operation(&doc, "GET", "/v2pets").is_none());
    }

    #[test]
    fn root_server_url_adds_no_prefix() {
        let doc = json!({ "servers": [{ "url": "/" }, { "url": "http://localhost:8080" }] });
        assert_eq!(server_base_paths(&doc), vec![String::new()]);
    }

    #[test]
    fn declared_operations_lists_methods() {
        let doc = parse("pets.yaml", PETSTORE).unwrap();
        let ops: Vec<String> = declared_operations(&doc)
            .iter()
            .map(|op| op.to_string())
            .collect();
        assert_eq!(
            ops,
            vec!["get /pets", "get /pets/{id}", "delete /pets/{id}", "get /pets/mine"]
        );
    }
}
