//! Logical database session on a [`Transport`](crate::transport::Transport).
//!
//! Holds protocol state (auto-commit, isolation, default schema, session
//! variables, lazy-transaction metadata) and serializes the request
//! pipeline: at most one Request per Session is ever awaiting a terminal
//! frame.

pub mod request;
pub mod txn;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::RwLock;
use prost::Message as _;
use tokio::sync::{Mutex, mpsc};

use crate::codec::message::{
    Cancel, ColumnMetadata, Empty, Envelope, ExecSql, GalaxyPrepare, LazyTxnEnvelope, Param,
    SessionClose, SessionReset,
};
use crate::codec::MessageTag;
use crate::error::{DriverError, Result};
use crate::result::ResultStream;
use crate::transport::Transport;
use crate::transport::route::{Delivery, SessionRoute};

pub use request::{Request, RequestKind};
pub use txn::{IsolationLevel, TxnState};

static REQUEST_SEQ: AtomicU64 = AtomicU64::new(0);

/// A logical database session on a Transport.
pub struct Session {
    pub id: u64,
    pub connection_id: u64,
    transport: Arc<Transport>,
    route: Arc<SessionRoute>,

    auto_commit: RwLock<bool>,
    isolation: RwLock<Option<IsolationLevel>>,
    default_schema: RwLock<String>,
    session_vars: DashMap<String, String>,
    txn_state: RwLock<TxnState>,
    lazy_envelope: RwLock<Option<LazyTxnEnvelope>>,

    last_exception: RwLock<Option<String>>,
    last_user_request: RwLock<Option<Request>>,
    last_request: RwLock<Option<Request>>,

    /// Serializes the request pipeline; held across an ignorable
    /// request's background drain too, so the next real Request still
    /// waits for it.
    request_lock: Arc<Mutex<()>>,
}

impl Session {
    pub(crate) fn new(
        id: u64,
        connection_id: u64,
        transport: Arc<Transport>,
        route: Arc<SessionRoute>,
        default_schema: String,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            connection_id,
            transport,
            route,
            auto_commit: RwLock::new(true),
            isolation: RwLock::new(None),
            default_schema: RwLock::new(default_schema),
            session_vars: DashMap::new(),
            txn_state: RwLock::new(TxnState::AutoCommit),
            lazy_envelope: RwLock::new(None),
            last_exception: RwLock::new(None),
            last_user_request: RwLock::new(None),
            last_request: RwLock::new(None),
            request_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn is_killed(&self) -> bool {
        self.route.is_killed()
    }

    pub fn is_auto_commit(&self) -> bool {
        *self.auto_commit.read()
    }

    pub fn isolation_level(&self) -> Option<IsolationLevel> {
        *self.isolation.read()
    }

    pub fn default_schema(&self) -> String {
        self.default_schema.read().clone()
    }

    pub fn txn_state(&self) -> TxnState {
        *self.txn_state.read()
    }

    pub fn last_exception(&self) -> Option<String> {
        self.last_exception.read().clone()
    }

    /// Mirror a Request-level error onto the Session so it survives past
    /// the `ResultStream` that observed it, for `Handle::get_last_exception`.
    pub(crate) fn record_last_exception(&self, err: &DriverError) {
        *self.last_exception.write() = Some(err.to_string());
    }

    pub fn last_user_request(&self) -> Option<Request> {
        self.last_user_request.read().clone()
    }

    pub fn last_request(&self) -> Option<Request> {
        self.last_request.read().clone()
    }

    /// Record the final outcome of a Request once its terminal frame has
    /// been observed, overwriting the provisional `is_good_and_done: false`
    /// clone stashed at submission time.
    pub(crate) fn record_request_outcome(&self, request: Request) {
        *self.last_request.write() = Some(request.clone());
        if !request.ignore_result {
            *self.last_user_request.write() = Some(request);
        }
    }

    pub(crate) fn clear_route_owner(&self) {
        self.route.clear_owner();
    }

    pub(crate) fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    pub(crate) async fn send_fetch_more(&self, token_count: u32) -> Result<()> {
        self.transport
            .send_envelope(MessageTag::FetchMore, self.id, &crate::codec::message::FetchMore { token_count })
            .await
    }

    /// `true` if the last user-visible Result completed cleanly with no
    /// open transaction left dangling — what the Pool's release protocol
    /// checks before deciding whether to reuse the Session.
    pub fn is_good_and_done(&self) -> bool {
        !self.is_killed()
            && self
                .last_user_request
                .read()
                .as_ref()
                .map(|r| r.is_good_and_done)
                .unwrap_or(true)
    }

    /// `SET SESSION TRANSACTION ISOLATION LEVEL ...`.
    /// Skips the round trip if the level is already cached (round-trip
    /// law: "setting the same level twice sends at most one SQL"). Any
    /// pending lazy-txn state is stashed and restored around the
    /// isolation-change SQL so it isn't consumed by it.
    pub async fn set_isolation(self: &Arc<Self>, level: IsolationLevel) -> Result<()> {
        if self.isolation.read().as_ref() == Some(&level) {
            return Ok(());
        }

        let stashed = self.lazy_envelope.write().take();

        let sql = format!("SET SESSION TRANSACTION ISOLATION LEVEL {}", level.as_sql());
        self.exec_ignorable(sql).await?;

        *self.isolation.write() = Some(level);
        *self.lazy_envelope.write() = stashed;
        Ok(())
    }

    /// `SET AUTOCOMMIT=0/1`. The client never claims `auto_commit=true`
    /// until the server acknowledges it.
    pub async fn set_auto_commit(self: &Arc<Self>, value: bool) -> Result<()> {
        if *self.auto_commit.read() == value {
            return Ok(());
        }
        let sql = format!("SET AUTOCOMMIT={}", if value { 1 } else { 0 });
        self.exec_ignorable(sql).await?;
        *self.auto_commit.write() = value;
        *self.txn_state.write() = if value {
            TxnState::AutoCommit
        } else {
            TxnState::AutoCommit // becomes ExplicitTxn only once a DML runs
        };
        Ok(())
    }

    pub async fn set_default_schema(self: &Arc<Self>, schema: &str) -> Result<()> {
        let sql = format!("USE {}", schema);
        self.exec_ignorable(sql).await?;
        *self.default_schema.write() = schema.to_string();
        Ok(())
    }

    pub async fn set_session_variable(self: &Arc<Self>, name: &str, value: &str) -> Result<()> {
        let sql = format!("SET SESSION {} = {}", name, value);
        self.exec_ignorable(sql).await?;
        self.session_vars.insert(name.to_string(), value.to_string());
        Ok(())
    }

    pub fn get_session_variable(&self, name: &str) -> Option<String> {
        self.session_vars.get(name).map(|v| v.clone())
    }

    pub async fn set_global_variable(self: &Arc<Self>, name: &str, value: &str) -> Result<()> {
        let sql = format!("SET GLOBAL {} = {}", name, value);
        self.exec_ignorable(sql).await
    }

    /// Arm lazy-CTS mode: begin/commit timestamp metadata is piggy-backed
    /// on the next user statement instead of issuing a separate `BEGIN`
    /// round trip.
    pub fn set_lazy_cts_transaction(&self) {
        let mut env = self.lazy_envelope.write();
        let mut e = env.take().unwrap_or(LazyTxnEnvelope {
            lazy_cts: false,
            snapshot_seq: None,
            commit_seq: None,
        });
        e.lazy_cts = true;
        *env = Some(e);
    }

    pub fn set_lazy_snapshot_seq(&self, seq: u64) {
        let mut env = self.lazy_envelope.write();
        let mut e = env.take().unwrap_or(LazyTxnEnvelope {
            lazy_cts: true,
            snapshot_seq: None,
            commit_seq: None,
        });
        e.snapshot_seq = Some(seq);
        *env = Some(e);
    }

    pub fn set_lazy_commit_seq(&self, seq: u64) {
        let mut env = self.lazy_envelope.write();
        let mut e = env.take().unwrap_or(LazyTxnEnvelope {
            lazy_cts: true,
            snapshot_seq: None,
            commit_seq: None,
        });
        e.commit_seq = Some(seq);
        *env = Some(e);
    }

    /// Consume (and clear) the pending lazy-txn envelope, to be piggy-
    /// backed on the next outbound request. Cleared atomically under the
    /// same write-lock that reads it, so it is consumed exactly once.
    fn take_lazy_envelope(&self) -> Option<LazyTxnEnvelope> {
        self.lazy_envelope.write().take()
    }

    /// Execute a query or update. `returning` selects the
    /// `UPDATE ... RETURNING` wire variant; both paths produce a
    /// [`ResultStream`] since rows may be present either way.
    #[allow(clippy::too_many_arguments)]
    pub async fn exec_sql(
        self: &Arc<Self>,
        sql: &str,
        params: Vec<Vec<u8>>,
        hint: Option<String>,
        digest: Option<Vec<u8>>,
        ignore_result: bool,
        returning: bool,
        stream: bool,
        token_window: u32,
    ) -> Result<Option<ResultStream>> {
        if self.is_killed() {
            return Err(DriverError::SessionKilled(self.id.to_string()));
        }

        self.transition_on_sql(sql);

        let body = ExecSql {
            sql: sql.to_string(),
            params: params.into_iter().map(|value| Param { value: value.into() }).collect(),
            hint,
            digest: digest.map(Into::into),
            ignore_result,
            returning,
            stream,
            token_window,
            lazy_txn: self.take_lazy_envelope(),
        };

        self.submit(MessageTag::ExecSql, body, ignore_result, stream, token_window, RequestKind::Query)
            .await
    }

    pub async fn exec_galaxy_prepare(
        self: &Arc<Self>,
        sql: &str,
        hint: Option<String>,
        digest: Option<Vec<u8>>,
        tables: Vec<String>,
        packed_params: Vec<u8>,
        param_num: u32,
        ignore_result: bool,
        is_update: bool,
    ) -> Result<Option<ResultStream>> {
        if self.is_killed() {
            return Err(DriverError::SessionKilled(self.id.to_string()));
        }

        let body = GalaxyPrepare {
            sql: sql.to_string(),
            hint,
            digest: digest.map(Into::into),
            tables,
            packed_params: packed_params.into(),
            param_num,
            ignore_result,
            is_update,
        };

        self.submit(MessageTag::GalaxyPrepare, body, ignore_result, false, 0, RequestKind::GalaxyPrepare)
            .await
    }

    /// Out-of-band cancel; does not close the Session.
    pub async fn cancel(&self) -> Result<()> {
        self.transport
            .send_envelope(MessageTag::Cancel, self.id, &Cancel {})
            .await
    }

    /// Sends a cancel, optionally poisons the Session so
    /// pending waiters see the final state, optionally signals the
    /// caller to close the owning Handle.
    pub async fn kill(&self, push_killed: bool) -> Result<()> {
        self.cancel().await?;
        if push_killed {
            self.route.mark_killed();
        }
        Ok(())
    }

    /// Flush any buffered, side-effect-only frames (lazily-batched
    /// variable assignments) before the Transport is released.
    pub async fn flush_network(&self) -> Result<()> {
        self.transport.flush_network().await
    }

    pub async fn close(&self) -> Result<()> {
        self.transport
            .send_envelope(MessageTag::SessionClose, self.id, &SessionClose {})
            .await?;
        self.transport.drop_slot(self.id);
        Ok(())
    }

    pub async fn reset(&self) -> Result<()> {
        self.transport
            .send_envelope(MessageTag::SessionReset, self.id, &SessionReset {})
            .await?;
        *self.auto_commit.write() = true;
        *self.isolation.write() = None;
        *self.txn_state.write() = TxnState::AutoCommit;
        self.session_vars.clear();
        *self.lazy_envelope.write() = None;
        Ok(())
    }

    /// Fire-and-forget helper for the variable/isolation/schema setters:
    /// submits an ignorable request and does not return a stream. Needs
    /// `self: &Arc<Self>` for `submit`'s background drain task, so it
    /// takes an explicit `self_arc` rather than borrowing `&self`.
    async fn exec_ignorable(self: &Arc<Self>, sql: String) -> Result<()> {
        let body = ExecSql {
            sql,
            params: Vec::new(),
            hint: None,
            digest: None,
            ignore_result: true,
            returning: false,
            stream: false,
            token_window: 0,
            lazy_txn: None,
        };
        self.submit(MessageTag::ExecSql, body, true, false, 0, RequestKind::Admin)
            .await?;
        Ok(())
    }

    fn transition_on_sql(&self, sql: &str) {
        let upper = sql.trim_start().to_ascii_uppercase();
        let mut state = self.txn_state.write();
        if upper.starts_with("COMMIT") || upper.starts_with("ROLLBACK") {
            *state = TxnState::AutoCommit;
        } else if self.lazy_envelope.read().is_some() {
            *state = TxnState::LazyPreparedTxn;
        } else if !*self.auto_commit.read() && matches!(*state, TxnState::AutoCommit) {
            *state = TxnState::ExplicitTxn;
        }
    }

    /// Serialize admission, send the frame, and either hand back a
    /// [`ResultStream`] or drain-and-discard in the background for
    /// `ignoreResult` requests.
    async fn submit<M: prost::Message + Clone>(
        self: &Arc<Self>,
        tag: MessageTag,
        body: M,
        ignore_result: bool,
        stream: bool,
        token_window: u32,
        kind: RequestKind,
    ) -> Result<Option<ResultStream>> {
        let (rx, request, guard) = self.submit_raw(tag, body, ignore_result, kind).await?;

        if ignore_result {
            let route = self.route.clone();
            let session = self.clone();
            tokio::spawn(async move {
                drain_abandoned_stream(rx).await;
                route.clear_owner();
                session.record_request_outcome(request);
                drop(guard);
            });
            return Ok(None);
        }

        *self.last_request.write() = Some(request.clone());
        *self.last_user_request.write() = Some(request.clone());
        let mut result = ResultStream::new(
            self.clone(),
            rx,
            stream,
            if token_window == 0 { u32::MAX } else { token_window },
            request,
            guard,
        );
        if !stream {
            result.materialize().await?;
        }
        Ok(Some(result))
    }

    /// Acquires the pipeline lock, registers ownership, and sends the
    /// frame. Returns the owned lock guard so whichever continuation
    /// drains the terminal frame (here via [`ResultStream`]'s `Drop`, or
    /// the spawned ignorable-drain task above) releases the pipeline by
    /// dropping it once the terminal is consumed.
    async fn submit_raw<M: prost::Message>(
        self: &Arc<Self>,
        tag: MessageTag,
        body: M,
        ignore_result: bool,
        kind: RequestKind,
    ) -> Result<(
        mpsc::UnboundedReceiver<Delivery>,
        Request,
        tokio::sync::OwnedMutexGuard<()>,
    )> {
        if self.is_killed() {
            return Err(DriverError::SessionKilled(self.id.to_string()));
        }

        let guard = self.request_lock.clone().lock_owned().await;
        let (tx, rx) = mpsc::unbounded_channel();
        self.route.set_owner(tx);

        let seq = REQUEST_SEQ.fetch_add(1, Ordering::SeqCst);
        let request = Request {
            sequence: seq,
            kind,
            ignore_result,
            is_good_and_done: false,
        };

        if let Err(e) = self.transport.send_envelope(tag, self.id, &body).await {
            self.route.clear_owner();
            *self.last_exception.write() = Some(e.to_string());
            return Err(e);
        }

        Ok((rx, request, guard))
    }
}

/// Drain and discard frames until a terminal frame is observed. Used
/// both for `ignoreResult` requests, whose terminal is consumed
/// internally and never surfaced via `getLastUserRequest`, and for a
/// [`ResultStream`] abandoned by its caller before reaching its own
/// terminal frame.
pub(crate) async fn drain_abandoned_stream(mut rx: mpsc::UnboundedReceiver<Delivery>) {
    while let Some(delivery) = rx.recv().await {
        match delivery {
            Delivery::Frame(frame) if frame.tag == MessageTag::Terminal => return,
            Delivery::TransportFailed(_) => return,
            _ => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn good_and_done_defaults_true_with_no_history() {
        // Round-trip state transitions that need a live Transport are
        // covered at the integration level instead.
        assert_eq!(IsolationLevel::Serializable.as_sql(), "SERIALIZABLE");
    }
}
