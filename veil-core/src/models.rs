//! Proxy and circuit data models

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An unvalidated proxy scraped from a public listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyCandidate {
    /// `host:port`
    pub address: String,
    /// ISO 3166-1 alpha-2 code as printed by the listing (e.g. "JP")
    pub country_code: String,
    /// Whether the listing marks this proxy as HTTPS-capable
    pub supports_https: bool,
}

impl ProxyCandidate {
    pub fn new(host: &str, port: u16, country_code: &str, supports_https: bool) -> Self {
        Self {
            address: format!("{}:{}", host, port),
            country_code: country_code.to_string(),
            supports_https,
        }
    }

    /// URL suitable for use as an HTTP forward proxy
    pub fn proxy_url(&self) -> String {
        format!("http://{}", self.address)
    }

    /// Whether this candidate is in the given country (case-insensitive)
    pub fn in_country(&self, country_code: &str) -> bool {
        self.country_code.eq_ignore_ascii_case(country_code)
    }
}

impl fmt::Display for ProxyCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.address, self.country_code)
    }
}

/// Which scraped rows survive into a [`ProxyListing`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingFilter {
    pub country_code: String,
}

impl ListingFilter {
    pub fn country(country_code: &str) -> Self {
        Self {
            country_code: country_code.to_string(),
        }
    }

    /// A row is kept when its liveness marker is affirmative and the country matches
    pub fn accepts(&self, candidate: &ProxyCandidate) -> bool {
        candidate.supports_https && candidate.in_country(&self.country_code)
    }
}

/// Candidates retained from one fetch of a listing source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyListing {
    candidates: Vec<ProxyCandidate>,
}

impl ProxyListing {
    /// Build a listing, keeping only candidates the filter accepts
    pub fn filtered<I>(rows: I, filter: &ListingFilter) -> Self
    where
        I: IntoIterator<Item = ProxyCandidate>,
    {
        Self {
            candidates: rows.into_iter().filter(|c| filter.accepts(c)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProxyCandidate> {
        self.candidates.iter()
    }

    pub fn contains_address(&self, address: &str) -> bool {
        self.candidates.iter().any(|c| c.address == address)
    }

    /// Uniformly sample one candidate, `None` when the listing is empty
    pub fn choose_random(&self) -> Option<&ProxyCandidate> {
        self.candidates.choose(&mut rand::thread_rng())
    }
}

/// A candidate that relayed a 200 from the target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedProxy {
    pub address: String,
}

impl ValidatedProxy {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    pub fn into_address(self) -> String {
        self.address
    }
}

impl From<ProxyCandidate> for ValidatedProxy {
    fn from(candidate: ProxyCandidate) -> Self {
        Self::new(candidate.address)
    }
}

impl fmt::Display for ValidatedProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

/// State of one circuit monitoring session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitState {
    /// Failed probes since the last success or forced renewal
    pub consecutive_failures: u32,
    /// Status of the latest probe, `None` when it never got a response
    pub last_status: Option<u16>,
    /// Renewals requested after a failed probe
    pub renewals: u32,
    /// Extra renewals issued when the retry budget ran out
    pub forced_renewals: u32,
}

impl CircuitState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self, status: u16) {
        self.last_status = Some(status);
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self, status: Option<u16>) {
        self.last_status = status;
        self.consecutive_failures += 1;
    }

    pub fn budget_exhausted(&self, retry_budget: u32) -> bool {
        self.consecutive_failures >= retry_budget
    }
}
