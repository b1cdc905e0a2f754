//! Veil Core - Domain model for anonymized egress
//!
//! This crate provides the foundational primitives shared by the proxy
//! finder and the Tor circuit monitor:
//! - Proxy candidates, listings and validated proxies
//! - Per-session circuit state
//! - Probe outcomes and target URL validation
//! - The error taxonomy

pub mod error;
pub mod models;
pub mod probe;
pub mod target;

pub use error::*;
pub use models::*;
pub use probe::*;
pub use target::*;

use std::time::Duration;

/// Number of leading listing rows considered per scrape
pub const DEFAULT_LISTING_LIMIT: usize = 300;

/// Country filter applied when the caller gives none
pub const DEFAULT_COUNTRY: &str = "JP";

/// Target probed by the circuit monitor when the caller gives none
pub const DEFAULT_HEALTH_TARGET: &str = "https://ifconfig.me";

/// Consecutive failures tolerated before a forced renewal
pub const DEFAULT_RETRY_BUDGET: u32 = 5;

/// Connect timeout for probes
pub const PROBE_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Overall timeout for probes
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause after a new circuit has been requested
pub const RENEWAL_SETTLE: Duration = Duration::from_secs(2);

/// User-Agent used whenever the remote pool is unavailable
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36";
