//! Caller-visible lease on a [`Session`](crate::session::Session).
//!
//! A thin, thread-safe adapter: operational calls hold a shared read
//! lease on the underlying Session reference, `close()` takes the
//! exclusive write lease and clears it. Once cleared, every subsequent
//! operation fails with [`DriverError::Closed`] and no further frames are
//! emitted on the Handle's behalf.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex as PlMutex;
use tokio::sync::RwLock;

use crate::error::{DriverError, Result};
use crate::pool::{Lease, Pool, Target};
use crate::result::ResultStream;
use crate::session::{IsolationLevel, Request, Session, TxnState};

/// A lease on a Session, acquired from a [`Pool`] and returned to it on
/// [`close`](Handle::close).
pub struct Handle {
    pool: Arc<Pool>,
    target: Target,
    state: RwLock<Option<Lease>>,
    initialized: AtomicBool,

    stream_mode: AtomicBool,
    compact_metadata: AtomicBool,
    with_feedback: AtomicBool,
    default_token_count: AtomicU32,
    network_timeout_nanos: AtomicU64,
    trace_seq: AtomicU64,

    last_warnings: PlMutex<Vec<String>>,
}

impl Handle {
    pub(crate) fn new(pool: Arc<Pool>, target: Target, lease: Lease) -> Self {
        let default_token_count = pool.config().default_query_token;
        Self {
            pool,
            target,
            state: RwLock::new(Some(lease)),
            initialized: AtomicBool::new(false),
            stream_mode: AtomicBool::new(false),
            compact_metadata: AtomicBool::new(false),
            with_feedback: AtomicBool::new(false),
            default_token_count: AtomicU32::new(default_token_count),
            network_timeout_nanos: AtomicU64::new(0),
            trace_seq: AtomicU64::new(0),
            last_warnings: PlMutex::new(Vec::new()),
        }
    }

    /// Bound the one-time readiness check with `timeout_nanos` (or the
    /// process default when zero) without mutating the Handle's own
    /// network timeout — the timeout here scopes this call only.
    pub async fn init(&self, timeout_nanos: u64) -> Result<()> {
        let session = self.session().await?;
        let timeout = if timeout_nanos == 0 {
            self.effective_network_timeout()
        } else {
            Duration::from_nanos(timeout_nanos)
        };

        tokio::time::timeout(timeout, session.flush_network())
            .await
            .map_err(|_| DriverError::Timeout {
                waited_nanos: timeout.as_nanos() as u64,
            })??;

        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn exec_query(
        &self,
        sql: &str,
        params: Vec<Vec<u8>>,
        hint: Option<String>,
        digest: Option<Vec<u8>>,
        ignore_result: bool,
        returning: bool,
    ) -> Result<Option<ResultStream>> {
        self.ensure_initialized()?;
        let session = self.session().await?;
        let _span = tracing::debug_span!("exec_query", trace_id = self.next_trace_id()).entered();

        let stream = self.stream_mode.load(Ordering::SeqCst);
        let token_window = if stream { self.default_token_count.load(Ordering::SeqCst) } else { 0 };

        let result = session
            .exec_sql(sql, params, hint, digest, ignore_result, returning, stream, token_window)
            .await?;
        self.remember_warnings(&result, stream);
        Ok(result)
    }

    pub async fn exec_update(
        &self,
        sql: &str,
        params: Vec<Vec<u8>>,
        hint: Option<String>,
        digest: Option<Vec<u8>>,
        ignore_result: bool,
    ) -> Result<Option<ResultStream>> {
        self.ensure_initialized()?;
        let session = self.session().await?;
        let _span = tracing::debug_span!("exec_update", trace_id = self.next_trace_id()).entered();

        let result = session
            .exec_sql(sql, params, hint, digest, ignore_result, false, false, 0)
            .await?;
        self.remember_warnings(&result, false);
        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn exec_galaxy_prepare(
        &self,
        sql: &str,
        hint: Option<String>,
        digest: Option<Vec<u8>>,
        tables: Vec<String>,
        packed_params: Vec<u8>,
        param_num: u32,
        ignore_result: bool,
        is_update: bool,
    ) -> Result<Option<ResultStream>> {
        self.ensure_initialized()?;
        let session = self.session().await?;
        session
            .exec_galaxy_prepare(sql, hint, digest, tables, packed_params, param_num, ignore_result, is_update)
            .await
    }

    /// Global timestamp allocator RPC.
    pub async fn get_tso(&self, count: u32) -> Result<Vec<u64>> {
        self.ensure_initialized()?;
        let session = self.session().await?;
        session.transport().get_tso(count).await
    }

    pub async fn flush_network(&self) -> Result<()> {
        self.session().await?.flush_network().await
    }

    pub async fn set_auto_commit(&self, value: bool) -> Result<()> {
        self.session().await?.set_auto_commit(value).await
    }

    pub async fn set_transaction_isolation(&self, level: IsolationLevel) -> Result<()> {
        self.session().await?.set_isolation(level).await
    }

    pub async fn set_default_db(&self, schema: &str) -> Result<()> {
        self.session().await?.set_default_schema(schema).await
    }

    pub async fn set_session_variables(&self, vars: HashMap<String, String>) -> Result<()> {
        let session = self.session().await?;
        for (name, value) in vars {
            session.set_session_variable(&name, &value).await?;
        }
        Ok(())
    }

    pub async fn set_global_variables(&self, vars: HashMap<String, String>) -> Result<()> {
        let session = self.session().await?;
        for (name, value) in vars {
            session.set_global_variable(&name, &value).await?;
        }
        Ok(())
    }

    pub async fn set_lazy_cts_transaction(&self) -> Result<()> {
        self.session().await?.set_lazy_cts_transaction();
        Ok(())
    }

    pub async fn set_lazy_snapshot_seq(&self, seq: u64) -> Result<()> {
        self.session().await?.set_lazy_snapshot_seq(seq);
        Ok(())
    }

    pub async fn set_lazy_commit_seq(&self, seq: u64) -> Result<()> {
        self.session().await?.set_lazy_commit_seq(seq);
        Ok(())
    }

    pub async fn cancel(&self) -> Result<()> {
        self.session().await?.cancel().await
    }

    /// Kill the underlying Session, optionally poisoning it so pending
    /// waiters see `SessionKilled`, optionally closing this Handle too.
    pub async fn kill(&self, push_killed: bool, with_close: bool) -> Result<()> {
        self.session().await?.kill(push_killed).await?;
        if with_close {
            self.close().await?;
        }
        Ok(())
    }

    pub async fn get_connection_id(&self) -> Result<u64> {
        Ok(self.session().await?.connection_id)
    }

    pub async fn get_last_user_request(&self) -> Result<Option<Request>> {
        Ok(self.session().await?.last_user_request())
    }

    /// The most recent error observed on this Handle's Session, whether
    /// from a failed send or an error terminal on a completed Request
    /// (e.g. a cancelled query) — mirrored there by `ResultStream::finish`.
    pub async fn get_last_exception(&self) -> Result<Option<String>> {
        Ok(self.session().await?.last_exception())
    }

    pub fn get_warnings(&self) -> Vec<String> {
        self.last_warnings.lock().clone()
    }

    /// Grant the server more row-chunk credit on whichever Request is
    /// currently in flight on this Handle's Session.
    pub async fn token_offer(&self, count: u32) -> Result<()> {
        self.session().await?.send_fetch_more(count).await
    }

    pub fn set_stream_mode(&self, enabled: bool) {
        self.stream_mode.store(enabled, Ordering::SeqCst);
    }

    pub fn set_compact_metadata(&self, enabled: bool) {
        self.compact_metadata.store(enabled, Ordering::SeqCst);
    }

    pub fn set_with_feedback(&self, enabled: bool) {
        self.with_feedback.store(enabled, Ordering::SeqCst);
    }

    pub fn set_default_token_count(&self, count: u32) {
        self.default_token_count.store(count, Ordering::SeqCst);
    }

    /// Zero means "use the Pool's configured default".
    pub fn set_network_timeout_nanos(&self, nanos: u64) {
        self.network_timeout_nanos.store(nanos, Ordering::SeqCst);
    }

    /// Roll back any open transaction, flush pending ignorable frames,
    /// and return the Session to the Pool (reused if it's clean, dropped
    /// otherwise). Idempotent: closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        let mut guard = self.state.write().await;
        let Some(lease) = guard.take() else {
            return Ok(());
        };
        drop(guard);

        let reusable = self.finalize_lease(&lease).await;
        self.pool.release(&self.target, lease, reusable);
        Ok(())
    }

    async fn finalize_lease(&self, lease: &Lease) -> bool {
        if !matches!(lease.session.txn_state(), TxnState::AutoCommit) {
            if let Err(e) = lease
                .session
                .exec_sql("ROLLBACK", Vec::new(), None, None, true, false, false, 0)
                .await
            {
                tracing::warn!(session_id = lease.session.id, error = %e, "rollback on close failed");
            }
        }
        if let Err(e) = lease.session.flush_network().await {
            tracing::warn!(session_id = lease.session.id, error = %e, "flush on close failed");
        }
        !lease.session.is_killed() && lease.session.is_good_and_done()
    }

    async fn session(&self) -> Result<Arc<Session>> {
        let guard = self.state.read().await;
        guard.as_ref().map(|lease| lease.session.clone()).ok_or(DriverError::Closed)
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DriverError::NotInitialized)
        }
    }

    fn effective_network_timeout(&self) -> Duration {
        match self.network_timeout_nanos.load(Ordering::SeqCst) {
            0 => self.pool.config().network_timeout,
            nanos => Duration::from_nanos(nanos),
        }
    }

    fn next_trace_id(&self) -> u64 {
        self.trace_seq.fetch_add(1, Ordering::SeqCst)
    }

    fn remember_warnings(&self, result: &Option<ResultStream>, streaming: bool) {
        if streaming {
            return;
        }
        if let Some(result) = result {
            *self.last_warnings.lock() = result.warnings().to_vec();
        }
    }
}
