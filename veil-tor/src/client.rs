//! HTTP clients for probes and fetches
//!
//! Probe clients talk to untrusted, scraped proxies or through Tor and skip
//! certificate verification when [`ProbeConfig::accept_invalid_certs`] is
//! set. Fetch clients (listing pages, User-Agent lists) always verify.

use reqwest::{Client, Method, Proxy};
use std::time::Duration;
use tracing::trace;

use veil_core::{FetchError, ProbeOutcome, TargetUrl, PROBE_CONNECT_TIMEOUT, PROBE_TIMEOUT};

/// Timeouts and TLS policy for validation and health probes
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// TCP/TLS connect timeout
    pub connect_timeout: Duration,
    /// Overall request timeout
    pub timeout: Duration,
    /// Skip certificate verification on probe requests
    pub accept_invalid_certs: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            connect_timeout: PROBE_CONNECT_TIMEOUT,
            timeout: PROBE_TIMEOUT,
            accept_invalid_certs: true,
        }
    }
}

impl ProbeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }
}

/// Create a client for a single probe
///
/// `proxy_url` is either a forward proxy (`http://ip:port`) or Tor's SOCKS
/// listener (`socks5h://...`); `None` goes direct, ignoring proxy
/// environment variables.
pub fn build_probe_client(
    config: &ProbeConfig,
    proxy_url: Option<&str>,
    user_agent: &str,
) -> Result<Client, FetchError> {
    let mut builder = Client::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.timeout)
        .user_agent(user_agent)
        .danger_accept_invalid_certs(config.accept_invalid_certs);

    builder = match proxy_url {
        Some(url) => {
            let proxy = Proxy::all(url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
            builder.proxy(proxy)
        }
        None => builder.no_proxy(),
    };

    builder
        .build()
        .map_err(|e| FetchError::ClientBuild(e.to_string()))
}

/// Create a certificate-verifying client for listing and User-Agent fetches
///
/// `proxy_url` keeps the fetch on the same egress as the probes (Tor's SOCKS
/// listener in circuit mode); `None` goes direct.
pub fn build_fetch_client(
    timeout: Duration,
    user_agent: &str,
    proxy_url: Option<&str>,
) -> Result<Client, FetchError> {
    let builder = Client::builder()
        .connect_timeout(timeout.min(PROBE_CONNECT_TIMEOUT))
        .timeout(timeout)
        .user_agent(user_agent);

    let builder = match proxy_url {
        Some(url) => {
            let proxy = Proxy::all(url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
            builder.proxy(proxy)
        }
        None => builder.no_proxy(),
    };

    builder
        .build()
        .map_err(|e| FetchError::ClientBuild(e.to_string()))
}

/// Send one request and report only what loop control needs
pub async fn probe(client: &Client, method: Method, target: &TargetUrl) -> ProbeOutcome {
    match client.request(method.clone(), target.url().clone()).send().await {
        Ok(response) => {
            let status = response.status().as_u16();
            trace!("{} {} -> {}", method, target, status);
            ProbeOutcome::Status(status)
        }
        Err(e) if e.is_timeout() => ProbeOutcome::Transport(format!("timed out: {}", e)),
        Err(e) => ProbeOutcome::Transport(e.to_string()),
    }
}

/// GET a URL and return its body, treating non-success statuses as errors
pub async fn fetch_text(client: &Client, url: &str) -> Result<String, FetchError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| request_error(url, e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    response.text().await.map_err(|e| request_error(url, e))
}

fn request_error(url: &str, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout(url.to_string())
    } else {
        FetchError::Request {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}
