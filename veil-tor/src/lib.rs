//! Veil Tor Layer
//!
//! Networking shared by both Veil subsystems, plus the circuit monitor:
//! - Probe and fetch HTTP clients (direct, forward proxy, or SOCKS5h via Tor)
//! - Randomised User-Agent pool
//! - Tor ControlPort client for circuit renewal
//! - Circuit health monitor with bounded escalation

pub mod client;
pub mod control;
pub mod monitor;
pub mod useragent;

pub use client::*;
pub use control::*;
pub use monitor::*;
pub use useragent::*;

/// Tor's SOCKS listener, resolving DNS through the circuit
pub const DEFAULT_SOCKS_ADDR: &str = "socks5h://127.0.0.1:9050";

/// Tor's ControlPort
pub const DEFAULT_CONTROL_ADDR: &str = "127.0.0.1:9051";
