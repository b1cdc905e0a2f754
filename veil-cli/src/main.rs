//! Veil CLI
//!
//! Front door for both subsystems: find a working proxy from a public
//! listing, or keep the Tor circuit healthy for a target.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use veil_core::{TargetUrl, DEFAULT_COUNTRY, DEFAULT_HEALTH_TARGET, DEFAULT_LISTING_LIMIT, DEFAULT_RETRY_BUDGET};
use veil_finder::{FinderConfig, HttpListingSource, HttpProxyValidator, ListingConfig, ProxyFinder, DEFAULT_LISTING_URL};
use veil_tor::{
    CircuitMonitor, ControlAuth, ControlConfig, HealthProbe, MonitorConfig, ProbeConfig,
    TorController, TorHealthProbe, UserAgents, DEFAULT_CONTROL_ADDR, DEFAULT_SOCKS_ADDR,
    DEFAULT_SOFT_FAILURE_STATUS, DEFAULT_USER_AGENTS_URL,
};

#[derive(Parser)]
#[command(name = "veil")]
#[command(author, version, about = "Veil: scraped proxy discovery and Tor circuit health", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level (0-3); RUST_LOG overrides when set
    #[arg(short, long, default_value = "1", global = true)]
    verbose: u8,

    /// Newline-delimited User-Agent list fetched once per run
    #[arg(long, env = "VEIL_USER_AGENTS_URL", default_value = DEFAULT_USER_AGENTS_URL, global = true)]
    user_agents_url: String,

    /// Skip the User-Agent download and use the built-in default
    #[arg(long, global = true)]
    no_user_agents: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Find a working proxy for a target URL
    Find {
        /// URL the proxy must be able to reach
        #[arg(short, long)]
        url: String,

        /// Two-letter country code of the proxy
        #[arg(short, long, default_value = DEFAULT_COUNTRY)]
        country: String,

        /// Leading listing rows considered per scrape
        #[arg(long, default_value_t = DEFAULT_LISTING_LIMIT)]
        limit: usize,

        /// Proxy listing page to scrape
        #[arg(long, env = "VEIL_LISTING_URL", default_value = DEFAULT_LISTING_URL)]
        listing_url: String,

        /// Milliseconds to wait between attempts (jittered)
        #[arg(long)]
        retry_delay_ms: Option<u64>,

        /// Verify certificates on probe requests
        #[arg(long)]
        verify_tls: bool,

        /// Give up after this many seconds
        #[arg(long)]
        deadline: Option<u64>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Make sure the Tor circuit reaches a target, renewing it if needed
    Tor {
        /// URL that must be reachable through Tor
        #[arg(short, long, default_value = DEFAULT_HEALTH_TARGET)]
        url: String,

        #[command(flatten)]
        tor: TorArgs,

        /// Consecutive failures before a forced renewal
        #[arg(long, default_value_t = DEFAULT_RETRY_BUDGET)]
        retry_budget: u32,

        /// Fail after this many forced renewals instead of looping forever
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        max_forced_renewals: Option<u32>,

        /// Seconds to wait after each renewal
        #[arg(long, default_value = "2")]
        settle: u64,

        /// HEAD status treated as "still broken" after a renewal
        #[arg(long, default_value_t = DEFAULT_SOFT_FAILURE_STATUS)]
        soft_failure_status: u16,

        /// Skip the HEAD check after renewals
        #[arg(long)]
        no_head_check: bool,

        /// Give up after this many seconds
        #[arg(long)]
        deadline: Option<u64>,

        /// Print the session state as JSON
        #[arg(long)]
        json: bool,
    },

    /// Probe a target through Tor once, without renewing
    Status {
        /// URL to probe
        #[arg(short, long, default_value = DEFAULT_HEALTH_TARGET)]
        url: String,

        #[command(flatten)]
        tor: TorArgs,
    },
}

#[derive(Args)]
struct TorArgs {
    /// Tor SOCKS listener
    #[arg(long, default_value = DEFAULT_SOCKS_ADDR)]
    socks: String,

    /// Connect directly instead of through SOCKS (process already routed through Tor)
    #[arg(long)]
    no_socks: bool,

    /// Tor ControlPort address
    #[arg(long, default_value = DEFAULT_CONTROL_ADDR)]
    control_addr: String,

    /// ControlPort password
    #[arg(long, env = "VEIL_TOR_CONTROL_PASSWORD", hide_env_values = true, conflicts_with = "cookie_file")]
    control_password: Option<String>,

    /// ControlPort auth cookie file
    #[arg(long)]
    cookie_file: Option<PathBuf>,
}

impl TorArgs {
    fn socks_addr(&self) -> Option<String> {
        (!self.no_socks).then(|| self.socks.clone())
    }

    fn control_config(&self) -> ControlConfig {
        let auth = match (&self.control_password, &self.cookie_file) {
            (Some(password), _) => ControlAuth::Password(password.clone()),
            (None, Some(path)) => ControlAuth::Cookie(path.clone()),
            (None, None) => ControlAuth::None,
        };
        ControlConfig::new().with_addr(&self.control_addr).with_auth(auth)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Find {
            url,
            country,
            limit,
            listing_url,
            retry_delay_ms,
            verify_tls,
            deadline,
            json,
        } => {
            let user_agents = user_agent_pool(&cli.user_agents_url, cli.no_user_agents, None);
            let finder = ProxyFinder::new(
                HttpListingSource::new(ListingConfig::new().with_url(&listing_url), user_agents.clone()),
                HttpProxyValidator::new(
                    ProbeConfig::new().with_accept_invalid_certs(!verify_tls),
                    user_agents,
                ),
                FinderConfig::new()
                    .with_listing_limit(limit)
                    .with_retry_delay(retry_delay_ms.map(Duration::from_millis)),
            );

            let proxy = with_deadline(deadline, finder.select_and_validate(&url, &country)).await??;

            if json {
                println!("{}", serde_json::to_string(&proxy)?);
            } else {
                println!("{}", proxy);
            }
        }
        Commands::Tor {
            url,
            tor,
            retry_budget,
            max_forced_renewals,
            settle,
            soft_failure_status,
            no_head_check,
            deadline,
            json,
        } => {
            let user_agents = user_agent_pool(&cli.user_agents_url, cli.no_user_agents, tor.socks_addr());
            let monitor = CircuitMonitor::new(
                TorHealthProbe::new(tor.socks_addr(), ProbeConfig::default(), user_agents),
                TorController::new(tor.control_config()),
                MonitorConfig::new()
                    .with_retry_budget(retry_budget)
                    .with_settle(Duration::from_secs(settle))
                    .with_soft_failure_status((!no_head_check).then_some(soft_failure_status))
                    .with_max_forced_renewals(max_forced_renewals),
            );

            let state = with_deadline(deadline, monitor.run(&url)).await??;

            if json {
                println!("{}", serde_json::to_string(&state)?);
            } else {
                println!(
                    "✅ Circuit healthy ({} renewals, {} forced)",
                    state.renewals, state.forced_renewals
                );
            }
        }
        Commands::Status { url, tor } => {
            let user_agents = user_agent_pool(&cli.user_agents_url, cli.no_user_agents, tor.socks_addr());
            check_status(&url, &tor, user_agents).await?;
        }
    }

    Ok(())
}

/// In Tor mode the list download shares the probes' SOCKS egress
fn user_agent_pool(url: &str, disabled: bool, egress: Option<String>) -> Arc<UserAgents> {
    Arc::new(if disabled {
        UserAgents::fixed(Vec::new())
    } else {
        UserAgents::remote(url).with_proxy(egress)
    })
}

fn init_logging(verbose: u8) {
    let log_level = match verbose {
        0 => Level::ERROR,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    // stdout carries only the result
    let builder = FmtSubscriber::builder()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .compact();

    if std::env::var_os("RUST_LOG").is_some() {
        builder.with_env_filter(EnvFilter::from_default_env()).init();
    } else {
        builder.with_max_level(log_level).init();
    }
}

async fn with_deadline<F, T>(deadline: Option<u64>, operation: F) -> Result<T>
where
    F: Future<Output = T>,
{
    match deadline {
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs), operation)
            .await
            .map_err(|_| anyhow!("Gave up after {}s", secs)),
        None => Ok(operation.await),
    }
}

async fn check_status(url: &str, tor: &TorArgs, user_agents: Arc<UserAgents>) -> Result<()> {
    let target = TargetUrl::parse(url)?;
    let probe = TorHealthProbe::new(tor.socks_addr(), ProbeConfig::default(), user_agents);

    println!("🔌 Probing {} through {}...", target, tor.socks_addr().as_deref().unwrap_or("direct"));

    let outcome = probe.get(&target).await;
    if outcome.is_ok() {
        println!("✅ Tor path is healthy ({})", outcome);
        Ok(())
    } else {
        println!("❌ Tor path is unhealthy ({})", outcome);
        println!("   Expected SOCKS proxy at: {}", tor.socks);
        println!("   Run `veil tor` to renew the circuit");
        Err(anyhow!("target unreachable through Tor"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_find_defaults() {
        let cli = Cli::try_parse_from(["veil", "find", "--url", "https://example.test/"]).unwrap();
        match cli.command {
            Commands::Find { country, limit, deadline, .. } => {
                assert_eq!(country, "JP");
                assert_eq!(limit, 300);
                assert_eq!(deadline, None);
            }
            _ => panic!("expected find"),
        }
    }

    #[test]
    fn test_tor_auth_selection() {
        let cli = Cli::try_parse_from(["veil", "tor", "--cookie-file", "/run/tor/control.authcookie"]).unwrap();
        match cli.command {
            Commands::Tor { url, tor, retry_budget, .. } => {
                assert_eq!(url, "https://ifconfig.me");
                assert_eq!(retry_budget, 5);
                assert_eq!(
                    tor.control_config().auth,
                    ControlAuth::Cookie(PathBuf::from("/run/tor/control.authcookie"))
                );
                assert_eq!(tor.socks_addr().as_deref(), Some("socks5h://127.0.0.1:9050"));
            }
            _ => panic!("expected tor"),
        }
    }

    #[test]
    fn test_password_conflicts_with_cookie() {
        let result = Cli::try_parse_from([
            "veil",
            "tor",
            "--control-password",
            "secret",
            "--cookie-file",
            "/tmp/cookie",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_no_socks() {
        let cli = Cli::try_parse_from(["veil", "status", "--no-socks"]).unwrap();
        match cli.command {
            Commands::Status { tor, .. } => assert_eq!(tor.socks_addr(), None),
            _ => panic!("expected status"),
        }
    }

    #[test]
    fn test_zero_max_forced_renewals_rejected() {
        assert!(Cli::try_parse_from(["veil", "tor", "--max-forced-renewals", "0"]).is_err());

        let cli = Cli::try_parse_from(["veil", "tor", "--max-forced-renewals", "1"]).unwrap();
        match cli.command {
            Commands::Tor { max_forced_renewals, .. } => assert_eq!(max_forced_renewals, Some(1)),
            _ => panic!("expected tor"),
        }
    }

    #[test]
    fn test_user_agent_pool_egress() {
        let pool = user_agent_pool(DEFAULT_USER_AGENTS_URL, false, Some(DEFAULT_SOCKS_ADDR.to_string()));
        assert_eq!(pool.proxy_url(), Some(DEFAULT_SOCKS_ADDR));

        let pool = user_agent_pool(DEFAULT_USER_AGENTS_URL, false, None);
        assert_eq!(pool.proxy_url(), None);
    }

    #[tokio::test]
    async fn test_deadline_expires() {
        let result = with_deadline(Some(0), std::future::pending::<()>()).await;
        assert!(result.is_err());
        assert_eq!(with_deadline(None, async { 7 }).await.unwrap(), 7);
    }
}
