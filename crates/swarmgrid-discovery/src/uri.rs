//! Discovery URI parsing: `scheme://address[,address...]/path`.

use crate::error::{DiscoveryError, DiscoveryResult};

/// Scheme used when the URI has none (a bare comma-separated address list).
pub const DEFAULT_SCHEME: &str = "nodes";

/// A parsed discovery URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryUri {
    /// Selects the backend.
    pub scheme: String,
    /// Backend addresses (everything before the first `/`, split on `,`).
    pub addresses: Vec<String>,
    /// Backend-specific namespace (after the first `/`, slashes trimmed).
    pub path: String,
    /// Everything after `scheme://`, untouched.
    pub rest: String,
}

impl DiscoveryUri {
    pub fn parse(uri: &str) -> DiscoveryResult<Self> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(DiscoveryError::Configuration(
                "discovery URI is empty".to_string(),
            ));
        }

        let (scheme, rest) = match uri.split_once("://") {
            Some((scheme, rest)) => (scheme, rest),
            None => (DEFAULT_SCHEME, uri),
        };

        if scheme.is_empty()
            || !scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
        {
            return Err(DiscoveryError::Configuration(format!(
                "invalid discovery scheme in {uri:?}"
            )));
        }

        let (hosts, path) = rest.split_once('/').unwrap_or((rest, ""));
        let addresses = hosts
            .split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            addresses,
            path: path.trim_matches('/').to_string(),
            rest: rest.to_string(),
        })
    }

    /// The namespace path, failing when the backend requires one.
    pub fn require_path(&self) -> DiscoveryResult<&str> {
        if self.path.is_empty() {
            return Err(DiscoveryError::Configuration(format!(
                "{} discovery requires a path, e.g. {}://host:port/swarm",
                self.scheme, self.scheme
            )));
        }
        Ok(&self.path)
    }

    /// The backend addresses, failing when none were given.
    pub fn require_addresses(&self) -> DiscoveryResult<&[String]> {
        if self.addresses.is_empty() {
            return Err(DiscoveryError::Configuration(format!(
                "{} discovery requires at least one address",
                self.scheme
            )));
        }
        Ok(&self.addresses)
    }
}
