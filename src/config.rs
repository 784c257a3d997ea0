//! Validator configuration.
//!
//! ```yaml
//! enabled: true
//! skip_request_on_4xx: true
//! local_paths:
//!   - openapi
//!   - vendor/contracts
//! github_sources:
//!   - url: https://github.com/acme/contracts/tree/main/openapi
//!     token_env: GITHUB_TOKEN
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::context::ContextSettings;
use crate::error::ConfigError;
use crate::loader::{CompositeSource, LocalSource};

/// Validator settings, read once at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Master switch for exchange validation.
    pub enabled: bool,
    /// Report request failures for 4xx responses as well.
    pub skip_request_on_4xx: bool,
    /// Directory roots searched recursively for `.yaml`/`.yml` documents.
    pub local_paths: Vec<PathBuf>,
    /// GitHub tree URLs to fetch documents from.
    pub github_sources: Vec<GithubSourceConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            skip_request_on_4xx: true,
            local_paths: Vec::new(),
            github_sources: Vec::new(),
        }
    }
}

/// A GitHub tree URL plus the environment variable holding its token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GithubSourceConfig {
    pub url: String,
    #[serde(default)]
    pub token_env: Option<String>,
}

impl GithubSourceConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token_env: None,
        }
    }

    pub fn token_env(mut self, name: impl Into<String>) -> Self {
        self.token_env = Some(name.into());
        self
    }

    /// Read the token from the configured variable. Unset or empty means anonymous.
    pub fn token(&self) -> Option<String> {
        let name = self.token_env.as_deref()?;
        std::env::var(name).ok().filter(|token| !token.is_empty())
    }
}

impl Config {
    /// Parse configuration from YAML text.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` if the text is not a valid configuration.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|source| ConfigError::Parse { source })
    }

    /// Load configuration from a YAML file.
    ///
    /// Relative `local_paths` are resolved against the file's directory.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Read` if the file cannot be read, or
    /// `ConfigError::Parse` if its content is invalid.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_yaml_str(&content)?;

        let base = path.parent().unwrap_or(Path::new("."));
        for local in &mut config.local_paths {
            if local.is_relative() {
                *local = base.join(&*local);
            }
        }
        Ok(config)
    }

    /// Settings for a [`ScenarioContext`](crate::ScenarioContext).
    pub fn context_settings(&self) -> ContextSettings {
        ContextSettings {
            enabled: self.enabled,
            skip_request_on_4xx: self.skip_request_on_4xx,
        }
    }

    /// Build the schema source: local roots first, then GitHub repositories.
    ///
    /// # Errors
    ///
    /// Returns `LoadError::Transport` if the GitHub HTTP client cannot be created.
    pub fn schema_source(&self) -> Result<CompositeSource, crate::LoadError> {
        let mut source = CompositeSource::new().with(LocalSource::new(self.local_paths.clone()));

        if !self.github_sources.is_empty() {
            #[cfg(feature = "remote")]
            {
                source.push(Box::new(crate::github::GithubSource::new(
                    self.github_sources.clone(),
                )?));
            }
            #[cfg(not(feature = "remote"))]
            {
                warn!(
                    count = self.github_sources.len(),
                    "GitHub sources configured but the `remote` feature is disabled"
                );
            }
        }

        if self.local_paths.is_empty() && self.github_sources.is_empty() {
            warn!("no schema locations configured");
        }

        Ok(source)
    }
}
