//! Proxy listing fetcher
//!
//! Rows are recognised by content, not by column position:
//! - an IPv4 address followed by a port (`1.2.3.4:8080` or `1.2.3.4 | 8080`)
//! - the first two-letter uppercase token is the country
//! - the last `yes`/`no` token is the liveness marker (the HTTPS column on
//!   free-proxy-list style tables)
//!
//! Both HTML tables and plain whitespace-separated text are accepted. Only
//! data rows count toward the row limit: `<tr>`s with `<td>` cells in HTML,
//! lines carrying an IPv4-shaped token in text, so headers and banners never
//! use up the budget.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use veil_core::{FetchError, ListingFilter, ProxyCandidate, ProxyListing};
use veil_tor::{build_fetch_client, fetch_text, UserAgents};

/// Public listing scraped when none is configured
pub const DEFAULT_LISTING_URL: &str = "https://free-proxy-list.net/";

/// Timeout for fetching the listing page
const DEFAULT_TIMEOUT_SECS: u64 = 15;

static IP_PORT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}):(\d{1,5})$").expect("Invalid IP:PORT regex")
});

static IPV4_TOKEN_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}(:\d+)?$").expect("Invalid IPv4 token regex")
});

static COUNTRY_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]{2}$").expect("Invalid country regex"));

static ROW_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("tr").expect("Invalid row selector"));

static CELL_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("td").expect("Invalid cell selector"));

/// Turns a fetched listing page into candidate rows
pub trait ListingParser: Send + Sync {
    /// Parse at most `limit` leading data rows; rows without a usable address are dropped
    fn parse(&self, body: &str, limit: usize) -> Vec<ProxyCandidate>;
}

/// Content-pattern parser for HTML tables and plain-text tables
#[derive(Debug, Clone, Copy, Default)]
pub struct TableParser;

impl TableParser {
    /// Split a page into rows of cell strings
    fn rows(body: &str) -> Vec<Vec<String>> {
        if body.contains("<tr") || body.contains("<TR") {
            let document = Html::parse_document(body);
            document
                .select(&ROW_SELECTOR)
                .map(|row| {
                    row.select(&CELL_SELECTOR)
                        .map(|cell| cell.text().collect::<String>().trim().to_string())
                        .collect::<Vec<_>>()
                })
                .filter(|cells| !cells.is_empty())
                .collect()
        } else {
            body.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(|line| line.split_whitespace().map(String::from).collect::<Vec<_>>())
                .filter(|cells| cells.iter().any(|cell| IPV4_TOKEN_REGEX.is_match(cell)))
                .collect()
        }
    }

    /// Recognise one row
    pub fn parse_row(cells: &[String]) -> Option<ProxyCandidate> {
        let (host, port) = find_address(cells)?;

        let country = cells
            .iter()
            .find(|cell| COUNTRY_REGEX.is_match(cell))
            .map(String::as_str)
            .unwrap_or_default();

        let live = cells
            .iter()
            .rev()
            .find_map(|cell| {
                if cell.eq_ignore_ascii_case("yes") {
                    Some(true)
                } else if cell.eq_ignore_ascii_case("no") {
                    Some(false)
                } else {
                    None
                }
            })
            .unwrap_or(false);

        Some(ProxyCandidate::new(&host.to_string(), port, country, live))
    }
}

impl ListingParser for TableParser {
    fn parse(&self, body: &str, limit: usize) -> Vec<ProxyCandidate> {
        Self::rows(body)
            .iter()
            .take(limit)
            .filter_map(|cells| Self::parse_row(cells))
            .collect()
    }
}

fn find_address(cells: &[String]) -> Option<(Ipv4Addr, u16)> {
    for (i, cell) in cells.iter().enumerate() {
        if let Some(caps) = IP_PORT_REGEX.captures(cell) {
            if let (Ok(ip), Some(port)) = (caps[1].parse::<Ipv4Addr>(), parse_port(&caps[2])) {
                return Some((ip, port));
            }
        }

        if let Ok(ip) = cell.parse::<Ipv4Addr>() {
            if let Some(port) = cells.get(i + 1).and_then(|next| parse_port(next)) {
                return Some((ip, port));
            }
        }
    }
    None
}

fn parse_port(s: &str) -> Option<u16> {
    match s.parse::<u16>() {
        Ok(0) | Err(_) => None,
        Ok(port) => Some(port),
    }
}

/// Anything that can produce a fresh, filtered listing
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Fetch once and keep the live candidates the filter accepts
    async fn fetch_listing(
        &self,
        limit: usize,
        filter: &ListingFilter,
    ) -> Result<ProxyListing, FetchError>;
}

/// Configuration for the HTTP listing source
#[derive(Debug, Clone)]
pub struct ListingConfig {
    /// Page to scrape
    pub url: String,
    /// Timeout for the page fetch
    pub timeout: Duration,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_LISTING_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl ListingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Scrapes a listing page over HTTP on every call
pub struct HttpListingSource {
    config: ListingConfig,
    parser: Box<dyn ListingParser>,
    user_agents: Arc<UserAgents>,
}

impl HttpListingSource {
    pub fn new(config: ListingConfig, user_agents: Arc<UserAgents>) -> Self {
        Self {
            config,
            parser: Box::new(TableParser),
            user_agents,
        }
    }

    pub fn with_parser(mut self, parser: Box<dyn ListingParser>) -> Self {
        self.parser = parser;
        self
    }
}

#[async_trait]
impl ListingSource for HttpListingSource {
    async fn fetch_listing(
        &self,
        limit: usize,
        filter: &ListingFilter,
    ) -> Result<ProxyListing, FetchError> {
        let user_agent = self.user_agents.random().await;
        let client = build_fetch_client(self.config.timeout, &user_agent, None)?;
        let body = fetch_text(&client, &self.config.url).await?;

        let rows = self.parser.parse(&body, limit);
        let scraped = rows.len();
        let listing = ProxyListing::filtered(rows, filter);

        debug!(
            "Scraped {} rows from {}, {} live in {}",
            scraped,
            self.config.url,
            listing.len(),
            filter.country_code
        );
        Ok(listing)
    }
}
