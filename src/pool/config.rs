//! Pool-wide limits and timeouts.

use std::time::Duration;

/// Tunables for a [`super::Pool`]. Constructed directly or via the
/// builder methods; loading these from a file or environment is an
/// external collaborator this crate does not own.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Cap on physical sockets opened to one [`super::Target`].
    pub max_transports_per_target: usize,
    /// Cap on multiplexed Sessions per Transport.
    pub max_sessions_per_transport: usize,
    /// Initial and replenishment row-chunk window for streamed results.
    pub default_query_token: u32,
    /// Upper bound on an `acquire` wait before failing with `AcquireTimeout`.
    pub acquire_timeout: Duration,
    /// Idle Sessions older than this are reaped by the background sweep.
    pub idle_session_ttl: Duration,
    /// Capture an acquire-site stack and warn if it's still open at release.
    pub enable_trx_leak_check: bool,
    /// Default per-call network wait, used when a Handle's own timeout is zero.
    pub network_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_transports_per_target: 4,
            max_sessions_per_transport: 64,
            default_query_token: 64,
            acquire_timeout: Duration::from_secs(30),
            idle_session_ttl: Duration::from_secs(5 * 60),
            enable_trx_leak_check: false,
            network_timeout: Duration::from_secs(60),
        }
    }
}

impl PoolConfig {
    pub fn with_max_transports_per_target(mut self, n: usize) -> Self {
        self.max_transports_per_target = n;
        self
    }

    pub fn with_max_sessions_per_transport(mut self, n: usize) -> Self {
        self.max_sessions_per_transport = n;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_idle_session_ttl(mut self, ttl: Duration) -> Self {
        self.idle_session_ttl = ttl;
        self
    }

    pub fn with_trx_leak_check(mut self, enabled: bool) -> Self {
        self.enable_trx_leak_check = enabled;
        self
    }
}
