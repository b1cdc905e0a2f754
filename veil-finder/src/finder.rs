//! Proxy selector and validator
//!
//! Scrape, sample one candidate, probe the target through it, repeat. There
//! is no attempt limit: callers wanting bounded latency wrap the call in
//! their own deadline.

use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use veil_core::{
    InvalidTargetError, ListingFilter, ProbeOutcome, ProxyCandidate, TargetUrl, ValidatedProxy,
    DEFAULT_LISTING_LIMIT,
};
use veil_tor::{build_probe_client, probe, ProbeConfig, UserAgents};

use crate::listing::ListingSource;

/// Probes the target through one candidate
#[async_trait]
pub trait ProxyValidator: Send + Sync {
    async fn validate(&self, target: &TargetUrl, candidate: &ProxyCandidate) -> ProbeOutcome;
}

/// GET the target with the candidate as HTTP forward proxy
pub struct HttpProxyValidator {
    config: ProbeConfig,
    user_agents: Arc<UserAgents>,
}

impl HttpProxyValidator {
    pub fn new(config: ProbeConfig, user_agents: Arc<UserAgents>) -> Self {
        Self {
            config,
            user_agents,
        }
    }
}

#[async_trait]
impl ProxyValidator for HttpProxyValidator {
    async fn validate(&self, target: &TargetUrl, candidate: &ProxyCandidate) -> ProbeOutcome {
        let user_agent = self.user_agents.random().await;
        match build_probe_client(&self.config, Some(&candidate.proxy_url()), &user_agent) {
            Ok(client) => probe(&client, reqwest::Method::GET, target).await,
            Err(e) => ProbeOutcome::Transport(e.to_string()),
        }
    }
}

/// Finder behaviour
#[derive(Debug, Clone)]
pub struct FinderConfig {
    /// Leading listing rows considered per scrape
    pub listing_limit: usize,
    /// Pause between attempts, plus up to 50% random jitter; `None` retries immediately
    pub retry_delay: Option<Duration>,
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            listing_limit: DEFAULT_LISTING_LIMIT,
            retry_delay: None,
        }
    }
}

impl FinderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listing_limit(mut self, limit: usize) -> Self {
        self.listing_limit = limit;
        self
    }

    pub fn with_retry_delay(mut self, delay: Option<Duration>) -> Self {
        self.retry_delay = delay;
        self
    }
}

/// Finds one working proxy from a scraped listing
pub struct ProxyFinder<S, V> {
    source: S,
    validator: V,
    config: FinderConfig,
}

impl<S: ListingSource, V: ProxyValidator> ProxyFinder<S, V> {
    pub fn new(source: S, validator: V, config: FinderConfig) -> Self {
        Self {
            source,
            validator,
            config,
        }
    }

    pub fn config(&self) -> &FinderConfig {
        &self.config
    }

    /// Loop until a candidate in `country_code` relays a 200 from `target`
    ///
    /// The target is checked before anything touches the network.
    pub async fn select_and_validate(
        &self,
        target: &str,
        country_code: &str,
    ) -> Result<ValidatedProxy, InvalidTargetError> {
        let target = TargetUrl::parse(target)?;
        let filter = ListingFilter::country(country_code);
        info!("Searching for a {} proxy that reaches {}", country_code, target);

        let mut attempt: u64 = 0;
        loop {
            attempt += 1;

            if let Some(candidate) = self.next_candidate(&filter).await {
                let outcome = self.validator.validate(&target, &candidate).await;
                if outcome.is_ok() {
                    info!(attempt, "Validated proxy {}", candidate.address);
                    return Ok(candidate.into());
                }
                debug!(attempt, "Candidate {} rejected: {}", candidate, outcome);
            }

            self.pause().await;
        }
    }

    /// Scrape a fresh listing and sample one candidate
    async fn next_candidate(&self, filter: &ListingFilter) -> Option<ProxyCandidate> {
        match self
            .source
            .fetch_listing(self.config.listing_limit, filter)
            .await
        {
            Ok(listing) => {
                let candidate = listing.choose_random().cloned();
                if candidate.is_none() {
                    warn!("No live {} candidates in listing, refetching", filter.country_code);
                }
                candidate
            }
            Err(e) => {
                warn!("Listing fetch failed: {}", e);
                None
            }
        }
    }

    async fn pause(&self) {
        let Some(delay) = self.config.retry_delay else {
            return;
        };
        let half = (delay.as_millis() / 2) as u64;
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=half));
        tokio::time::sleep(delay + jitter).await;
    }
}
