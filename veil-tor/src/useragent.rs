//! Randomised User-Agent pool
//!
//! The pool is a newline-delimited list downloaded once per process. A failed
//! or empty download degrades to [`DEFAULT_USER_AGENT`]. In circuit mode the
//! download goes through the same SOCKS listener as the probes, so the list
//! host never sees the real address.

use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use veil_core::{FetchError, DEFAULT_USER_AGENT};

use crate::client::{build_fetch_client, fetch_text};

/// Newline-delimited User-Agent list used when none is configured
pub const DEFAULT_USER_AGENTS_URL: &str =
    "https://gist.githubusercontent.com/pzb/b4b6f57144aea7827ae4/raw/user-agents.txt";

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Parse a plain-text list: one agent per line, blanks and `#` comments skipped
pub fn parse_user_agent_list(body: &str) -> Vec<String> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect()
}

/// Download the pool, optionally through an egress proxy
pub async fn fetch_user_agent_pool(
    url: &str,
    timeout: Duration,
    proxy_url: Option<&str>,
) -> Result<Vec<String>, FetchError> {
    let client = build_fetch_client(timeout, DEFAULT_USER_AGENT, proxy_url)?;
    let body = fetch_text(&client, url).await?;
    Ok(parse_user_agent_list(&body))
}

/// Download the pool, falling back to the single default agent
pub async fn load_user_agent_pool(url: &str, timeout: Duration, proxy_url: Option<&str>) -> Vec<String> {
    match fetch_user_agent_pool(url, timeout, proxy_url).await {
        Ok(pool) if !pool.is_empty() => {
            debug!("Loaded {} user agents from {}", pool.len(), url);
            pool
        }
        Ok(_) => {
            warn!("User-Agent list at {} is empty, using default", url);
            vec![DEFAULT_USER_AGENT.to_string()]
        }
        Err(e) => {
            warn!("Failed to fetch User-Agent list: {} (using default)", e);
            vec![DEFAULT_USER_AGENT.to_string()]
        }
    }
}

/// Uniformly pick one agent; an empty pool yields the default
pub fn pick_random(pool: &[String]) -> &str {
    use rand::seq::SliceRandom;
    pool.choose(&mut rand::thread_rng())
        .map(String::as_str)
        .unwrap_or(DEFAULT_USER_AGENT)
}

/// Process-wide pool, fetched lazily on first use
#[derive(Debug)]
pub struct UserAgents {
    source_url: Option<String>,
    proxy_url: Option<String>,
    timeout: Duration,
    pool: OnceCell<Vec<String>>,
}

impl UserAgents {
    /// Pool downloaded from `source_url` on first use
    pub fn remote(source_url: &str) -> Self {
        Self {
            source_url: Some(source_url.to_string()),
            proxy_url: None,
            timeout: FETCH_TIMEOUT,
            pool: OnceCell::new(),
        }
    }

    /// Pool with fixed contents, never touching the network
    pub fn fixed(agents: Vec<String>) -> Self {
        let agents = if agents.is_empty() {
            vec![DEFAULT_USER_AGENT.to_string()]
        } else {
            agents
        };
        Self {
            source_url: None,
            proxy_url: None,
            timeout: FETCH_TIMEOUT,
            pool: OnceCell::new_with(Some(agents)),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Route the download through `proxy_url` (e.g. `socks5h://127.0.0.1:9050`)
    pub fn with_proxy(mut self, proxy_url: Option<String>) -> Self {
        self.proxy_url = proxy_url;
        self
    }

    pub fn proxy_url(&self) -> Option<&str> {
        self.proxy_url.as_deref()
    }

    pub async fn pool(&self) -> &[String] {
        self.pool_via(None).await
    }

    /// Pool loaded through `egress` unless a proxy was configured explicitly
    ///
    /// Only the first call downloads; later calls reuse the cached pool
    /// whatever egress they pass.
    pub async fn pool_via(&self, egress: Option<&str>) -> &[String] {
        self.pool
            .get_or_init(|| async {
                match &self.source_url {
                    Some(url) => {
                        let proxy_url = self.proxy_url.as_deref().or(egress);
                        load_user_agent_pool(url, self.timeout, proxy_url).await
                    }
                    None => vec![DEFAULT_USER_AGENT.to_string()],
                }
            })
            .await
    }

    pub async fn random(&self) -> String {
        self.random_via(None).await
    }

    pub async fn random_via(&self, egress: Option<&str>) -> String {
        pick_random(self.pool_via(egress).await).to_string()
    }
}

impl Default for UserAgents {
    fn default() -> Self {
        Self::remote(DEFAULT_USER_AGENTS_URL)
    }
}
