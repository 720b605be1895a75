//! Repository locations and their validation.

use std::fmt;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::config::UpdateConfig;
use crate::domain::InvalidLocation;

const SUPPORTED_SCHEMES: &[&str] = &["http", "https", "file"];

/// A validated, immutable repository address.
///
/// The inner URL is private so every instance has passed [`RepositoryLocation::parse`].
/// Paths always end in `/` so relative artifact URLs join underneath it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepositoryLocation(Url);

impl RepositoryLocation {
    /// Parse and validate a location string.
    pub fn parse(input: &str) -> Result<Self, InvalidLocation> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(InvalidLocation::new(input, "location is empty"));
        }

        let mut url =
            Url::parse(trimmed).map_err(|e| InvalidLocation::new(input, e.to_string()))?;

        if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
            return Err(InvalidLocation::new(
                input,
                format!("unsupported scheme '{}'", url.scheme()),
            ));
        }
        if url.scheme() != "file" && url.host_str().map_or(true, str::is_empty) {
            return Err(InvalidLocation::new(input, "missing host"));
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(InvalidLocation::new(
                input,
                "query strings and fragments are not allowed",
            ));
        }

        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }

        Ok(Self(url))
    }

    pub fn url(&self) -> &Url {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_file(&self) -> bool {
        self.0.scheme() == "file"
    }

    /// Resolve a path or URL relative to this location.
    pub fn join(&self, relative: &str) -> Result<Url, InvalidLocation> {
        self.0
            .join(relative)
            .map_err(|e| InvalidLocation::new(relative, e.to_string()))
    }
}

impl fmt::Display for RepositoryLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for RepositoryLocation {
    type Error = InvalidLocation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RepositoryLocation> for String {
    fn from(location: RepositoryLocation) -> Self {
        location.0.into()
    }
}

/// Supplies the repository locations for a check cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositorySource {
    raw: Vec<String>,
}

impl RepositorySource {
    pub fn new<I, S>(locations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            raw: locations.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(config: &UpdateConfig) -> Self {
        Self::new(config.repositories.iter().cloned())
    }

    /// Validate a single location string. Pure.
    pub fn validate(location: &str) -> Result<RepositoryLocation, InvalidLocation> {
        RepositoryLocation::parse(location)
    }

    /// Validate every configured location; the first failure wins.
    pub fn locations(&self) -> Result<Vec<RepositoryLocation>, InvalidLocation> {
        self.raw.iter().map(|s| Self::validate(s)).collect()
    }

    pub fn raw(&self) -> &[String] {
        &self.raw
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_http_https_file() {
        for input in [
            "http://localhost:8080/repository",
            "https://updates.example.com/stable",
            "file:///srv/updates",
        ] {
            assert!(RepositorySource::validate(input).is_ok(), "{input}");
        }
    }

    #[test]
    fn test_validate_appends_trailing_slash() {
        let loc = RepositorySource::validate("https://updates.example.com/stable").unwrap();
        assert_eq!(loc.as_str(), "https://updates.example.com/stable/");
        assert_eq!(
            loc.join("index.json").unwrap().as_str(),
            "https://updates.example.com/stable/index.json"
        );
    }

    #[test]
    fn test_validate_rejects_malformed() {
        let cases = [
            ("", "empty"),
            ("   ", "empty"),
            ("not a url", "relative URL"),
            ("ftp://updates.example.com/", "unsupported scheme"),
            ("https://updates.example.com/?channel=beta", "query"),
        ];
        for (input, expected) in cases {
            let err = RepositorySource::validate(input).unwrap_err();
            assert!(
                err.reason.contains(expected),
                "{input:?}: expected reason containing {expected:?}, got {:?}",
                err.reason
            );
        }
    }

    #[test]
    fn test_locations_first_failure_wins() {
        let source = RepositorySource::new(["https://ok.example.com", "bogus", "also bogus"]);
        let err = source.locations().unwrap_err();
        assert_eq!(err.location, "bogus");
    }

    #[test]
    fn test_empty_source_yields_no_locations() {
        let source = RepositorySource::default();
        assert!(source.is_empty());
        assert!(source.locations().unwrap().is_empty());
    }

    #[test]
    fn test_location_serde_validates() {
        let loc: RepositoryLocation =
            serde_json::from_str("\"https://updates.example.com\"").unwrap();
        assert!(!loc.is_file());
        assert!(serde_json::from_str::<RepositoryLocation>("\"nope\"").is_err());
    }
}
