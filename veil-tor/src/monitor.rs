//! Circuit health monitor
//!
//! Probes a target through Tor and renews the circuit until the probe
//! returns 200:
//!
//! ```text
//! Probing --200--> Healthy
//!    |                ^
//!  !200               |
//!    v                |
//! Renewing ----------'  (re-probe; every `retry_budget` failures one extra
//!                        forced renewal is issued and the counter resets)
//! ```

use async_trait::async_trait;
use reqwest::Method;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn, Instrument};

use veil_core::{
    CircuitState, InvalidTargetError, ProbeOutcome, TargetUrl, DEFAULT_RETRY_BUDGET,
    RENEWAL_SETTLE,
};

use crate::client::{build_probe_client, probe, ProbeConfig};
use crate::control::CircuitControl;
use crate::useragent::UserAgents;
use crate::DEFAULT_SOCKS_ADDR;

/// HEAD status treated as "circuit still broken" by default
pub const DEFAULT_SOFT_FAILURE_STATUS: u16 = 415;

/// Errors that end a monitoring session
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    InvalidTarget(#[from] InvalidTargetError),

    #[error("Circuit still unhealthy after {forced_renewals} forced renewals")]
    RetryBudgetExhausted { forced_renewals: u32 },
}

/// Monitor behaviour
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Consecutive failures before a forced renewal
    pub retry_budget: u32,
    /// Pause after each renewal so Tor can build the new circuit
    pub settle: Duration,
    /// Status of a bare HEAD that marks the circuit as still broken; `None` skips the HEAD
    pub soft_failure_status: Option<u16>,
    /// Give up after this many forced renewals (at least 1); `None` keeps going forever
    pub max_forced_renewals: Option<u32>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            retry_budget: DEFAULT_RETRY_BUDGET,
            settle: RENEWAL_SETTLE,
            soft_failure_status: Some(DEFAULT_SOFT_FAILURE_STATUS),
            max_forced_renewals: None,
        }
    }
}

impl MonitorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry_budget(mut self, budget: u32) -> Self {
        self.retry_budget = budget.max(1);
        self
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn with_soft_failure_status(mut self, status: Option<u16>) -> Self {
        self.soft_failure_status = status;
        self
    }

    pub fn with_max_forced_renewals(mut self, max: Option<u32>) -> Self {
        self.max_forced_renewals = max.map(|max| max.max(1));
        self
    }
}

/// How the monitor reaches the target
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn get(&self, target: &TargetUrl) -> ProbeOutcome;

    async fn head(&self, target: &TargetUrl) -> ProbeOutcome;
}

/// Probe through Tor's SOCKS listener with a fresh client per request
///
/// A new client per probe means no pooled connection outlives a renewal, so
/// every probe after `NEWNYM` rides a new circuit.
pub struct TorHealthProbe {
    socks_addr: Option<String>,
    config: ProbeConfig,
    user_agents: Arc<UserAgents>,
}

impl TorHealthProbe {
    pub fn new(socks_addr: Option<String>, config: ProbeConfig, user_agents: Arc<UserAgents>) -> Self {
        Self {
            socks_addr,
            config,
            user_agents,
        }
    }

    async fn send(&self, method: Method, target: &TargetUrl) -> ProbeOutcome {
        let user_agent = self.user_agents.random_via(self.socks_addr.as_deref()).await;
        match build_probe_client(&self.config, self.socks_addr.as_deref(), &user_agent) {
            Ok(client) => probe(&client, method, target).await,
            Err(e) => ProbeOutcome::Transport(e.to_string()),
        }
    }
}

impl Default for TorHealthProbe {
    fn default() -> Self {
        Self::new(
            Some(DEFAULT_SOCKS_ADDR.to_string()),
            ProbeConfig::default(),
            Arc::new(UserAgents::default()),
        )
    }
}

#[async_trait]
impl HealthProbe for TorHealthProbe {
    async fn get(&self, target: &TargetUrl) -> ProbeOutcome {
        self.send(Method::GET, target).await
    }

    async fn head(&self, target: &TargetUrl) -> ProbeOutcome {
        self.send(Method::HEAD, target).await
    }
}

/// Keeps the Tor path usable for one target
pub struct CircuitMonitor<P, C> {
    probe: P,
    control: C,
    config: MonitorConfig,
}

impl<P: HealthProbe, C: CircuitControl> CircuitMonitor<P, C> {
    pub fn new(probe: P, control: C, config: MonitorConfig) -> Self {
        Self {
            probe,
            control,
            config,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Run one session against `target`, returning the final session state
    pub async fn run(&self, target: &str) -> Result<CircuitState, MonitorError> {
        let target = TargetUrl::parse(target)?;
        let mut state = CircuitState::new();

        let session = uuid::Uuid::new_v4().to_string()[..8].to_string();
        let span = info_span!("circuit", session = %session);
        self.ensure_healthy(&target, &mut state).instrument(span).await?;

        Ok(state)
    }

    /// Probe and renew until the target answers 200
    pub async fn ensure_healthy(
        &self,
        target: &TargetUrl,
        state: &mut CircuitState,
    ) -> Result<(), MonitorError> {
        info!("Checking circuit against {}", target);

        loop {
            let outcome = self.probe.get(target).await;
            if outcome.is_ok() {
                state.record_success(200);
                info!(
                    renewals = state.renewals,
                    forced = state.forced_renewals,
                    "Circuit healthy"
                );
                return Ok(());
            }

            state.record_failure(outcome.status());
            warn!(
                failures = state.consecutive_failures,
                "Probe failed ({}), requesting new circuit", outcome
            );
            self.renew().await;
            state.renewals += 1;

            if state.budget_exhausted(self.config.retry_budget) {
                warn!(
                    "{} consecutive failures, forcing circuit renewal",
                    state.consecutive_failures
                );
                self.renew().await;
                state.forced_renewals += 1;
                state.consecutive_failures = 0;

                if let Some(max) = self.config.max_forced_renewals {
                    if state.forced_renewals >= max {
                        error!("Giving up after {} forced renewals", state.forced_renewals);
                        return Err(MonitorError::RetryBudgetExhausted {
                            forced_renewals: state.forced_renewals,
                        });
                    }
                }
            }

            if let Some(soft) = self.config.soft_failure_status {
                let head = self.probe.head(target).await;
                if head.status() == Some(soft) {
                    warn!("HEAD returned {}, circuit still broken", soft);
                } else {
                    debug!("HEAD after renewal: {}", head);
                }
            }
        }
    }

    /// Request a new circuit and let it settle; failures are logged, never fatal
    async fn renew(&self) {
        match self.control.request_new_circuit().await {
            Ok(()) => debug!("New circuit requested"),
            Err(e) => warn!("Circuit renewal failed: {} (continuing)", e),
        }

        if !self.config.settle.is_zero() {
            tokio::time::sleep(self.config.settle).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ControlError;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Replays scripted GET outcomes, then answers 200 forever
    struct ScriptedProbe {
        gets: Mutex<VecDeque<ProbeOutcome>>,
        head_status: u16,
        get_calls: Mutex<u32>,
        head_calls: Mutex<u32>,
    }

    impl ScriptedProbe {
        fn failing(times: usize) -> Self {
            let gets = (0..times)
                .map(|i| {
                    if i % 2 == 0 {
                        ProbeOutcome::Status(503)
                    } else {
                        ProbeOutcome::Transport("connection reset".to_string())
                    }
                })
                .collect();
            Self {
                gets: Mutex::new(gets),
                head_status: 415,
                get_calls: Mutex::new(0),
                head_calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl HealthProbe for ScriptedProbe {
        async fn get(&self, _target: &TargetUrl) -> ProbeOutcome {
            *self.get_calls.lock() += 1;
            self.gets.lock().pop_front().unwrap_or(ProbeOutcome::Status(200))
        }

        async fn head(&self, _target: &TargetUrl) -> ProbeOutcome {
            *self.head_calls.lock() += 1;
            ProbeOutcome::Status(self.head_status)
        }
    }

    #[derive(Default)]
    struct CountingControl {
        calls: Mutex<u32>,
        fail: bool,
    }

    #[async_trait]
    impl CircuitControl for CountingControl {
        async fn request_new_circuit(&self) -> Result<(), ControlError> {
            *self.calls.lock() += 1;
            if self.fail {
                Err(ControlError::Authentication("515 Authentication failed".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn config() -> MonitorConfig {
        MonitorConfig::new().with_settle(Duration::ZERO)
    }

    #[test]
    fn test_default_config() {
        let config = MonitorConfig::default();
        assert_eq!(config.retry_budget, 5);
        assert_eq!(config.settle, Duration::from_secs(2));
        assert_eq!(config.soft_failure_status, Some(415));
        assert_eq!(config.max_forced_renewals, None);
    }

    #[test]
    fn test_retry_budget_floor() {
        assert_eq!(MonitorConfig::new().with_retry_budget(0).retry_budget, 1);
    }

    #[tokio::test]
    async fn test_zero_max_forced_renewals_means_one() {
        let config = config().with_retry_budget(2).with_max_forced_renewals(Some(0));
        assert_eq!(config.max_forced_renewals, Some(1));
        assert_eq!(MonitorConfig::new().with_max_forced_renewals(None).max_forced_renewals, None);

        let monitor = CircuitMonitor::new(ScriptedProbe::failing(100), CountingControl::default(), config);
        let err = monitor.run("https://ifconfig.me").await.unwrap_err();
        assert!(matches!(err, MonitorError::RetryBudgetExhausted { forced_renewals: 1 }));
        assert_eq!(*monitor.control.calls.lock(), 3);
    }

    #[tokio::test]
    async fn test_healthy_on_first_probe() {
        let monitor = CircuitMonitor::new(ScriptedProbe::failing(0), CountingControl::default(), config());
        let state = monitor.run("https://ifconfig.me").await.unwrap();

        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.last_status, Some(200));
        assert_eq!(*monitor.control.calls.lock(), 0);
        assert_eq!(*monitor.probe.head_calls.lock(), 0);
    }

    #[tokio::test]
    async fn test_renews_once_per_failure() {
        for n in 1..5 {
            let monitor =
                CircuitMonitor::new(ScriptedProbe::failing(n), CountingControl::default(), config());
            let state = monitor.run("https://ifconfig.me").await.unwrap();

            assert_eq!(state.renewals, n as u32);
            assert_eq!(state.forced_renewals, 0);
            assert_eq!(*monitor.control.calls.lock(), n as u32);
            assert_eq!(*monitor.probe.get_calls.lock(), n as u32 + 1);
            assert_eq!(state.consecutive_failures, 0);
        }
    }

    #[tokio::test]
    async fn test_forced_renewal_at_budget() {
        let monitor = CircuitMonitor::new(ScriptedProbe::failing(5), CountingControl::default(), config());
        let state = monitor.run("https://ifconfig.me").await.unwrap();

        assert_eq!(state.renewals, 5);
        assert_eq!(state.forced_renewals, 1);
        assert_eq!(*monitor.control.calls.lock(), 6);
    }

    #[tokio::test]
    async fn test_counter_resets_after_forced_renewal() {
        let monitor = CircuitMonitor::new(
            ScriptedProbe::failing(7),
            CountingControl::default(),
            config().with_retry_budget(3),
        );
        let state = monitor.run("https://ifconfig.me").await.unwrap();

        // failures 3 and 6 each trigger one extra renewal
        assert_eq!(state.renewals, 7);
        assert_eq!(state.forced_renewals, 2);
        assert_eq!(*monitor.control.calls.lock(), 9);
    }

    #[tokio::test]
    async fn test_control_errors_are_not_fatal() {
        let control = CountingControl {
            fail: true,
            ..Default::default()
        };
        let monitor = CircuitMonitor::new(ScriptedProbe::failing(2), control, config());
        let state = monitor.run("https://ifconfig.me").await.unwrap();

        assert_eq!(state.renewals, 2);
        assert_eq!(*monitor.control.calls.lock(), 2);
    }

    #[tokio::test]
    async fn test_max_forced_renewals_is_fatal() {
        let monitor = CircuitMonitor::new(
            ScriptedProbe::failing(100),
            CountingControl::default(),
            config().with_retry_budget(2).with_max_forced_renewals(Some(1)),
        );
        let err = monitor.run("https://ifconfig.me").await.unwrap_err();

        assert!(matches!(err, MonitorError::RetryBudgetExhausted { forced_renewals: 1 }));
        assert_eq!(*monitor.probe.get_calls.lock(), 2);
    }

    #[tokio::test]
    async fn test_head_check_after_each_renewal() {
        let monitor = CircuitMonitor::new(ScriptedProbe::failing(3), CountingControl::default(), config());
        monitor.run("https://ifconfig.me").await.unwrap();
        assert_eq!(*monitor.probe.head_calls.lock(), 3);
    }

    #[tokio::test]
    async fn test_head_check_disabled() {
        let monitor = CircuitMonitor::new(
            ScriptedProbe::failing(3),
            CountingControl::default(),
            config().with_soft_failure_status(None),
        );
        monitor.run("https://ifconfig.me").await.unwrap();
        assert_eq!(*monitor.probe.head_calls.lock(), 0);
    }

    #[tokio::test]
    async fn test_invalid_target() {
        let monitor = CircuitMonitor::new(ScriptedProbe::failing(0), CountingControl::default(), config());
        let err = monitor.run("ifconfig.me").await.unwrap_err();

        assert!(matches!(err, MonitorError::InvalidTarget(_)));
        assert_eq!(*monitor.probe.get_calls.lock(), 0);
    }

    #[tokio::test]
    async fn test_tor_probe_keeps_user_agent_download_on_socks() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use tokio::net::TcpListener;

        // Accept and hang up, counting connections
        async fn counting_listener() -> (std::net::SocketAddr, Arc<AtomicUsize>) {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let count = Arc::new(AtomicUsize::new(0));
            let counter = count.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    counter.fetch_add(1, Ordering::SeqCst);
                    drop(stream);
                }
            });
            (addr, count)
        }

        let (socks_addr, socks_connections) = counting_listener().await;
        let (list_addr, direct_connections) = counting_listener().await;

        let agents = UserAgents::remote(&format!("http://{}/ua.txt", list_addr))
            .with_timeout(Duration::from_secs(2));
        let probe = TorHealthProbe::new(
            Some(format!("socks5h://{}", socks_addr)),
            ProbeConfig::default().with_timeout(Duration::from_secs(2)),
            Arc::new(agents),
        );

        let target = TargetUrl::parse("https://ifconfig.me").unwrap();
        assert!(!probe.get(&target).await.is_ok());

        assert_eq!(direct_connections.load(Ordering::SeqCst), 0);
        // one for the agent list, one for the probe itself
        assert!(socks_connections.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_tor_probe_without_socks_reaches_target() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let _ = stream
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                    .await;
            }
        });

        let probe = TorHealthProbe::new(
            None,
            ProbeConfig::default(),
            Arc::new(UserAgents::fixed(vec!["test-agent".to_string()])),
        );
        let target = TargetUrl::parse(&format!("http://{}/", addr)).unwrap();
        assert_eq!(probe.get(&target).await, ProbeOutcome::Status(200));
        assert_eq!(probe.head(&target).await, ProbeOutcome::Status(200));
    }
}
