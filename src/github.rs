//! Schema source backed by GitHub repository trees.
//!
//! Each configured entry is a tree URL such as
//! `https://github.com/acme/contracts/tree/main/openapi`. The directory is
//! walked through the contents API; every `.yaml`/`.yml` file found is
//! downloaded and registered under its repository-relative path.
//!
//! Failures are strict: a malformed URL, a transport error or a non-success
//! status aborts loading. A run that finds no documents at all is an error
//! too, while entries that contribute nothing are fine as long as another
//! entry does.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::config::GithubSourceConfig;
use crate::error::LoadError;
use crate::loader::{is_schema_file, SchemaSource};
use crate::types::SchemaSet;

/// Default timeout for HTTP requests (10 seconds).
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Public GitHub REST API root.
pub const DEFAULT_API_BASE: &str = "https://api.github.com";

const USER_AGENT: &str = "openapi-contract";
const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

fn tree_url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^https?://github\.com/([^/]+)/([^/]+)/tree/([^/]+)/(.+)$")
            .expect("tree URL pattern is valid")
    })
}

/// The parts of a `github.com/{owner}/{repo}/tree/{ref}/{path}` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeUrl {
    pub owner: String,
    pub repo: String,
    pub reference: String,
    pub path: String,
}

impl TreeUrl {
    /// Parse a tree URL. Returns `None` for anything that is not a tree URL.
    pub fn parse(url: &str) -> Option<Self> {
        let caps = tree_url_pattern().captures(url)?;
        let path = caps[4].trim_end_matches('/');
        if path.is_empty() {
            return None;
        }
        Some(Self {
            owner: caps[1].to_string(),
            repo: caps[2].to_string(),
            reference: caps[3].to_string(),
            path: path.to_string(),
        })
    }
}

/// One item of a contents API directory listing.
#[derive(Debug, Deserialize)]
struct ContentEntry {
    name: String,
    path: String,
    #[serde(rename = "type")]
    kind: String,
    download_url: Option<String>,
}

/// Loads OpenAPI documents from GitHub repository directories.
#[derive(Debug, Clone)]
pub struct GithubSource {
    sources: Vec<GithubSourceConfig>,
    client: Client,
    api_base: String,
}

impl GithubSource {
    /// Create a source using a default blocking client with a 10 second timeout.
    ///
    /// # Errors
    ///
    /// Returns `LoadError::Transport` if the HTTP client cannot be built.
    pub fn new(sources: Vec<GithubSourceConfig>) -> Result<Self, LoadError> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|source| LoadError::Transport {
                url: DEFAULT_API_BASE.to_string(),
                authenticated: false,
                source,
            })?;
        Ok(Self::with_client(sources, client))
    }

    /// Create a source that sends requests through `client`.
    pub fn with_client(sources: Vec<GithubSourceConfig>, client: Client) -> Self {
        Self {
            sources,
            client,
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }

    /// Point the contents API at another host (GitHub Enterprise, test servers).
    pub fn api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    fn load_entry(&self, entry: &GithubSourceConfig, schemas: &mut SchemaSet) -> Result<(), LoadError> {
        let tree = TreeUrl::parse(&entry.url).ok_or_else(|| LoadError::InvalidRepositoryUrl {
            url: entry.url.clone(),
        })?;
        let token = entry.token();

        // Worklist of directories still to list, processed breadth-first.
        let mut pending = VecDeque::from([tree.path.clone()]);

        while let Some(dir) = pending.pop_front() {
            for item in self.list_directory(&tree, &dir, token.as_deref())? {
                match (item.kind.as_str(), item.download_url) {
                    ("file", Some(download_url)) if is_schema_file(Path::new(&item.name)) => {
                        let content = self.fetch_file(&download_url, token.as_deref())?;
                        debug!(schema = %item.path, "loaded GitHub schema");
                        schemas.insert(item.path, content);
                    }
                    ("dir", _) => pending.push_back(item.path),
                    _ => {}
                }
            }
        }

        Ok(())
    }

    fn list_directory(
        &self,
        tree: &TreeUrl,
        dir: &str,
        token: Option<&str>,
    ) -> Result<Vec<ContentEntry>, LoadError> {
        let url = format!(
            "{}/repos/{}/{}/contents/{}?ref={}",
            self.api_base, tree.owner, tree.repo, dir, tree.reference
        );
        let request = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/vnd.github.v3+json");

        let response = send(authorize(request, token), &url, token.is_some())?;
        let body = response.text().map_err(|source| LoadError::Transport {
            url: url.clone(),
            authenticated: token.is_some(),
            source,
        })?;

        let entries: Vec<ContentEntry> =
            serde_json::from_str(&body).map_err(|source| LoadError::InvalidListing {
                url: url.clone(),
                source,
            })?;

        if entries.is_empty() {
            return Err(LoadError::EmptyListing { url });
        }
        Ok(entries)
    }

    fn fetch_file(&self, url: &str, token: Option<&str>) -> Result<String, LoadError> {
        let request = self.client.get(url);
        let response = send(authorize(request, token), url, token.is_some())?;
        response.text().map_err(|source| LoadError::Transport {
            url: url.to_string(),
            authenticated: token.is_some(),
            source,
        })
    }
}

impl SchemaSource for GithubSource {
    fn load_schemas(&self) -> Result<SchemaSet, LoadError> {
        let mut schemas = SchemaSet::new();
        for entry in &self.sources {
            self.load_entry(entry, &mut schemas)?;
        }

        if schemas.is_empty() {
            return Err(LoadError::NoSchemasFound);
        }
        Ok(schemas)
    }
}

fn authorize(request: RequestBuilder, token: Option<&str>) -> RequestBuilder {
    let request = request.header(reqwest::header::USER_AGENT, USER_AGENT);
    match token {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

fn send(request: RequestBuilder, url: &str, authenticated: bool) -> Result<Response, LoadError> {
    let response = request.send().map_err(|source| LoadError::Transport {
        url: url.to_string(),
        authenticated,
        source,
    })?;
    check_status(response, url)
}

/// Map non-success statuses to errors, singling out exhausted rate limits.
fn check_status(response: Response, url: &str) -> Result<Response, LoadError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let header = |name: &str| {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    if status == StatusCode::FORBIDDEN && header(RATE_LIMIT_REMAINING).as_deref() == Some("0") {
        return Err(LoadError::RateLimited {
            url: url.to_string(),
            reset: header(RATE_LIMIT_RESET).and_then(|reset| format_reset(&reset)),
        });
    }

    Err(LoadError::Status {
        url: url.to_string(),
        status: status.as_u16(),
    })
}

/// Render an epoch-seconds reset header as a UTC timestamp.
fn format_reset(reset: &str) -> Option<String> {
    let seconds: i64 = reset.trim().parse().ok()?;
    chrono::DateTime::from_timestamp(seconds, 0).map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tree_url() {
        let tree = TreeUrl::parse("https://github.com/acme/contracts/tree/main/openapi/v1").unwrap();
        assert_eq!(
            tree,
            TreeUrl {
                owner: "acme".into(),
                repo: "contracts".into(),
                reference: "main".into(),
                path: "openapi/v1".into(),
            }
        );
    }

    #[test]
    fn parse_tree_url_trims_trailing_slash() {
        let tree = TreeUrl::parse("http://github.com/acme/contracts/tree/v2/schemas/").unwrap();
        assert_eq!(tree.path, "schemas");
        assert_eq!(tree.reference, "v2");
    }

    #[test]
    fn parse_rejects_non_tree_urls() {
        assert!(TreeUrl::parse("https://example.com/invalid").is_none());
        assert!(TreeUrl::parse("https://github.com/acme/contracts").is_none());
        assert!(TreeUrl::parse("https://github.com/acme/contracts/blob/main/api.yaml").is_none());
        assert!(TreeUrl::parse("https://github.com/acme/contracts/tree/main/").is_none());
    }

    #[test]
    fn tree_url_pattern_is_compiled_once() {
        let first = tree_url_pattern();
        assert!(first.is_match("https://github.com/acme/contracts/tree/main/openapi"));
        assert!(std::ptr::eq(first, tree_url_pattern()));
    }

    #[test]
    fn format_reset_epoch() {
        assert_eq!(format_reset("0").as_deref(), Some("1970-01-01 00:00:00"));
        assert_eq!(format_reset("1700000000").as_deref(), Some("2023-11-14 22:13:20"));
        assert_eq!(format_reset("soon"), None);
    }

    #[test]
    fn invalid_url_fails_fast() {
        let source = GithubSource::new(vec![GithubSourceConfig::new("https://example.com/invalid")]).unwrap();
        let err = source.load_schemas().unwrap_err();
        assert!(matches!(err, LoadError::InvalidRepositoryUrl { .. }));
        assert!(err.to_string().contains("invalid GitHub URL format"));
    }
}
