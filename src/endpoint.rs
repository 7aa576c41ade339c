//! Redundant service endpoints and the selection seam in front of them.

use rand::seq::SliceRandom;
use reqwest::Url;
use std::fmt;
use thiserror::Error;

/// Base URL of one interchangeable service instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    url: String,
}

impl Endpoint {
    /// Validates and wraps an `http(s)` base URL. Trailing slashes are dropped.
    pub fn new(url: impl Into<String>) -> Result<Self, EndpointError> {
        let url = url.into();
        let trimmed = url.trim().trim_end_matches('/');
        let valid = match Url::parse(trimmed) {
            Ok(parsed) => {
                matches!(parsed.scheme(), "http" | "https")
                    && parsed.host_str().is_some_and(|host| !host.is_empty())
            }
            Err(_) => false,
        };
        if !valid {
            return Err(EndpointError::InvalidUrl(url));
        }
        Ok(Self {
            url: trimmed.to_string(),
        })
    }

    /// Base URL without trailing slash.
    pub fn as_str(&self) -> &str {
        &self.url
    }

    /// Joins an API path onto the base URL.
    pub fn join(&self, path: &str) -> String {
        format!("{}/{}", self.url, path.trim_start_matches('/'))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// Policy deciding which endpoint serves the next call.
pub trait EndpointSelector: Send + Sync {
    /// Endpoint for the next call.
    fn select(&self) -> &Endpoint;

    /// Every endpoint the policy may return.
    fn endpoints(&self) -> &[Endpoint];
}

/// Uniform random choice per call, with no stickiness after failures.
#[derive(Debug, Clone)]
pub struct RandomEndpointPool {
    endpoints: Vec<Endpoint>,
}

impl RandomEndpointPool {
    /// Builds a pool; at least one endpoint is required.
    pub fn new(endpoints: Vec<Endpoint>) -> Result<Self, EndpointError> {
        if endpoints.is_empty() {
            return Err(EndpointError::Empty);
        }
        Ok(Self { endpoints })
    }

    /// Parses and pools a list of base URLs.
    pub fn from_urls<I, S>(urls: I) -> Result<Self, EndpointError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let endpoints = urls
            .into_iter()
            .map(Endpoint::new)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(endpoints)
    }

    /// Picks one endpoint uniformly at random.
    pub fn pick(&self) -> &Endpoint {
        self.endpoints
            .choose(&mut rand::thread_rng())
            .unwrap_or(&self.endpoints[0])
    }
}

impl EndpointSelector for RandomEndpointPool {
    fn select(&self) -> &Endpoint {
        self.pick()
    }

    fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }
}

/// Errors raised while building endpoint pools.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    #[error("endpoint pool is empty")]
    /// No endpoints were configured.
    Empty,
    #[error("invalid endpoint url: {0}")]
    /// URL lacked an http(s) scheme or host.
    InvalidUrl(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn endpoint_requires_scheme_and_host() {
        assert!(Endpoint::new("https://eos.example").is_ok());
        assert!(Endpoint::new("http://127.0.0.1:8888/").is_ok());
        assert_eq!(
            Endpoint::new("eos.example"),
            Err(EndpointError::InvalidUrl("eos.example".into()))
        );
        assert!(Endpoint::new("https://").is_err());
        assert!(Endpoint::new("https:// bad").is_err());
        assert!(Endpoint::new("ftp://eos.example").is_err());
        assert!(Endpoint::new("https://eos.example:notaport").is_err());
    }

    #[test]
    fn join_normalizes_slashes() {
        let ep = Endpoint::new("https://node.example/").unwrap();
        assert_eq!(ep.join("/v1/chain/get_account"), "https://node.example/v1/chain/get_account");
        assert_eq!(ep.join("v1/chain/get_info"), "https://node.example/v1/chain/get_info");
    }

    #[test]
    fn empty_pool_is_rejected() {
        assert_eq!(RandomEndpointPool::new(Vec::new()).unwrap_err(), EndpointError::Empty);
        assert!(RandomEndpointPool::from_urls(["not a url"]).is_err());
    }

    #[test]
    fn random_pick_eventually_reaches_every_endpoint() {
        let pool =
            RandomEndpointPool::from_urls(["https://a.example", "https://b.example", "https://c.example"])
                .unwrap();
        let mut seen = HashSet::new();
        for _ in 0..500 {
            seen.insert(pool.select().as_str().to_string());
        }
        assert_eq!(seen.len(), 3);
        assert_eq!(pool.endpoints().len(), 3);
    }
}
