//! Update workflow configuration.
//!
//! [`UpdateConfig`] is passed explicitly into the coordinator; nothing here is
//! read from process-wide state after construction. The environment is only
//! consulted by [`UpdateConfig::from_env`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::domain::ConfigError;

/// Built-in repository used when nothing is configured.
pub const DEFAULT_REPOSITORY: &str = "http://localhost:8080/repository";

/// Comma-separated list of repository locations.
pub const ENV_REPOSITORIES: &str = "SELFUPDATE_REPOSITORIES";
/// Directory the application is installed in.
pub const ENV_INSTALL_ROOT: &str = "SELFUPDATE_INSTALL_ROOT";
/// `true`/`false`: whether pre-release versions are update candidates.
pub const ENV_INCLUDE_PRERELEASE: &str = "SELFUPDATE_INCLUDE_PRERELEASE";

/// Configuration for one coordinator instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UpdateConfig {
    /// Raw repository location strings, validated at the start of each check.
    pub repositories: Vec<String>,
    /// Currently installed version (semver).
    pub current_version: String,
    /// Root directory of the installed application.
    pub install_root: PathBuf,
    /// Treat pre-release versions as candidates.
    pub include_prerelease: bool,
    /// Per-request timeout for repository access (milliseconds).
    pub request_timeout_ms: u64,
    /// User agent sent to remote repositories.
    pub user_agent: String,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            repositories: vec![DEFAULT_REPOSITORY.to_string()],
            current_version: "0.0.0".to_string(),
            install_root: PathBuf::from("."),
            include_prerelease: false,
            request_timeout_ms: 30_000,
            user_agent: format!("selfupdate/{}", crate::VERSION),
        }
    }
}

impl UpdateConfig {
    /// Create a config for the given installed version with built-in defaults.
    pub fn new(current_version: impl Into<String>) -> Self {
        Self {
            current_version: current_version.into(),
            ..Self::default()
        }
    }

    /// Built-in defaults overlaid with `SELFUPDATE_*` environment values.
    pub fn from_env(current_version: impl Into<String>) -> Result<Self, ConfigError> {
        let mut config = Self::new(current_version);
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load a JSON config file. Missing fields fall back to defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Overlay values from a key lookup (the environment in production).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_REPOSITORIES) {
            self.repositories = split_locations(&raw);
        }
        if let Some(root) = lookup(ENV_INSTALL_ROOT) {
            self.install_root = PathBuf::from(root);
        }
        if let Some(flag) = lookup(ENV_INCLUDE_PRERELEASE) {
            self.include_prerelease = match flag.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" | "" => false,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: ENV_INCLUDE_PRERELEASE.to_string(),
                        value: flag,
                    })
                }
            };
        }
        Ok(())
    }

    /// Replace the repository list.
    pub fn with_repositories<I, S>(mut self, repositories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.repositories = repositories.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_install_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.install_root = root.into();
        self
    }

    pub fn with_prerelease(mut self, include: bool) -> Self {
        self.include_prerelease = include;
        self
    }

    /// Parsed installed version.
    pub fn current_version(&self) -> Result<Version, ConfigError> {
        Version::parse(self.current_version.trim()).map_err(|source| {
            ConfigError::InvalidVersion {
                value: self.current_version.clone(),
                source,
            }
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Check the values that do not depend on the network or filesystem.
    ///
    /// Repository locations are validated at the start of each check cycle,
    /// not here.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.current_version()?;
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "request_timeout_ms".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

fn split_locations(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
