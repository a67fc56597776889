//! Per-target directory of Transports and Sessions.
//!
//! Grants Sessions to callers, enforces the configured caps, probes
//! liveness, and decides on release whether a Session is recycled or
//! dropped. One [`Pool`] is typically a process-lifetime singleton
//! shared behind an `Arc`.

pub mod config;
pub mod target;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex as PlMutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

pub use config::PoolConfig;
pub use target::Target;

use crate::error::{DriverError, Result};
use crate::session::Session;
use crate::transport::Transport;

/// One physical connection slot within a [`PerTargetPool`], tracking how
/// many Sessions are currently multiplexed onto it.
struct TransportSlot {
    transport: Arc<Transport>,
    session_count: AtomicUsize,
}

/// A Session sitting idle, available for reuse, plus the bookkeeping
/// needed to return it and its slot to circulation.
struct IdleEntry {
    session: Arc<Session>,
    slot: Arc<TransportSlot>,
    idle_since: Instant,
}

/// A Session handed out by `acquire`, along with the slot it is pinned
/// to so `release` can find its way back.
pub(crate) struct Lease {
    pub(crate) session: Arc<Session>,
    slot: Arc<TransportSlot>,
    /// Captured at acquire time when `enable_trx_leak_check` is set;
    /// emitted if the Session still has an open transaction at release.
    pub(crate) leak_site: Option<std::backtrace::Backtrace>,
}

struct PerTargetPool {
    target: Target,
    transports: PlMutex<Vec<Arc<TransportSlot>>>,
    idle: PlMutex<VecDeque<IdleEntry>>,
    waiters: PlMutex<VecDeque<Arc<Notify>>>,
}

impl PerTargetPool {
    fn new(target: Target) -> Self {
        Self {
            target,
            transports: PlMutex::new(Vec::new()),
            idle: PlMutex::new(VecDeque::new()),
            waiters: PlMutex::new(VecDeque::new()),
        }
    }

    fn wake_one_waiter(&self) {
        if let Some(notify) = self.waiters.lock().pop_front() {
            notify.notify_one();
        }
    }
}

/// Per-process directory of Targets, each with its own Transports and
/// Sessions.
pub struct Pool {
    config: PoolConfig,
    targets: DashMap<Target, Arc<PerTargetPool>>,
    reaper: PlMutex<Option<JoinHandle<()>>>,
}

impl Pool {
    pub fn new(config: PoolConfig) -> Arc<Self> {
        let pool = Arc::new(Self {
            config,
            targets: DashMap::new(),
            reaper: PlMutex::new(None),
        });
        let weak = Arc::downgrade(&pool);
        let handle = tokio::spawn(Self::reap_loop(weak));
        *pool.reaper.lock() = Some(handle);
        pool
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Acquire a [`crate::handle::Handle`] on a Session for `target`,
    /// following the acquire protocol: reuse an idle Session, else open
    /// one on a Transport with spare capacity, else open a new Transport,
    /// else block on the target's waiter queue until one frees up or
    /// `acquireTimeoutNanos` elapses.
    pub async fn acquire(self: &Arc<Self>, target: Target) -> Result<crate::handle::Handle> {
        let lease = self.acquire_lease(&target).await?;
        Ok(crate::handle::Handle::new(self.clone(), target, lease))
    }

    fn directory(&self, target: &Target) -> Arc<PerTargetPool> {
        self.targets
            .entry(target.clone())
            .or_insert_with(|| Arc::new(PerTargetPool::new(target.clone())))
            .clone()
    }

    /// Grant a Session for `target`, opening a new Transport/Session as
    /// capacity allows, or blocking on the target's waiter queue until
    /// one is released or `acquireTimeoutNanos` elapses.
    async fn acquire_lease(&self, target: &Target) -> Result<Lease> {
        let directory = self.directory(target);

        loop {
            loop {
                let Some(entry) = directory.idle.lock().pop_front() else { break };
                if entry.slot.transport.is_dead() {
                    entry.slot.session_count.fetch_sub(1, Ordering::SeqCst);
                    let session = entry.session;
                    tokio::spawn(async move {
                        let _ = session.close().await;
                    });
                    continue;
                }
                return Ok(self.into_lease(entry.session, entry.slot));
            }

            if let Some(slot) = self.find_spare_slot(&directory) {
                let session = self.open_session_on(target, &slot).await?;
                return Ok(self.into_lease(session, slot));
            }

            if let Some(slot) = self.try_open_transport(target, &directory).await? {
                let session = self.open_session_on(target, &slot).await?;
                return Ok(self.into_lease(session, slot));
            }

            let notify = Arc::new(Notify::new());
            directory.waiters.lock().push_back(notify.clone());

            match tokio::time::timeout(self.config.acquire_timeout, notify.notified()).await {
                Ok(()) => continue,
                Err(_) => {
                    directory.waiters.lock().retain(|w| !Arc::ptr_eq(w, &notify));
                    return Err(DriverError::AcquireTimeout {
                        waited_nanos: self.config.acquire_timeout.as_nanos() as u64,
                    });
                }
            }
        }
    }

    fn find_spare_slot(&self, directory: &PerTargetPool) -> Option<Arc<TransportSlot>> {
        let transports = directory.transports.lock();
        transports
            .iter()
            .find(|slot| {
                !slot.transport.is_dead()
                    && slot.session_count.load(Ordering::SeqCst) < self.config.max_sessions_per_transport
            })
            .cloned()
    }

    async fn try_open_transport(&self, target: &Target, directory: &PerTargetPool) -> Result<Option<Arc<TransportSlot>>> {
        {
            let transports = directory.transports.lock();
            let live = transports.iter().filter(|s| !s.transport.is_dead()).count();
            if live >= self.config.max_transports_per_target {
                return Ok(None);
            }
        }
        let transport = Transport::connect(target.addr).await?;
        let slot = Arc::new(TransportSlot {
            transport,
            session_count: AtomicUsize::new(0),
        });
        directory.transports.lock().push(slot.clone());
        Ok(Some(slot))
    }

    async fn open_session_on(&self, target: &Target, slot: &Arc<TransportSlot>) -> Result<Arc<Session>> {
        slot.session_count.fetch_add(1, Ordering::SeqCst);
        match slot
            .transport
            .open_session(&target.default_schema, &target.username, &target.credential)
            .await
        {
            Ok((session_id, connection_id, route)) => Ok(Session::new(
                session_id,
                connection_id,
                slot.transport.clone(),
                route,
                target.default_schema.clone(),
            )),
            Err(e) => {
                slot.session_count.fetch_sub(1, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn into_lease(&self, session: Arc<Session>, slot: Arc<TransportSlot>) -> Lease {
        let leak_site = self.config.enable_trx_leak_check.then(std::backtrace::Backtrace::capture);
        Lease { session, slot, leak_site }
    }

    /// Return a Session to circulation, or drop it if it's no longer
    /// reusable (killed, dirty, or its Transport died underneath it).
    pub(crate) fn release(&self, target: &Target, lease: Lease, reusable: bool) {
        let directory = self.directory(target);
        let Lease { session, slot, leak_site } = lease;

        if let Some(stack) = leak_site {
            if !session.is_good_and_done() {
                tracing::warn!(session_id = session.id, backtrace = %stack, "session released with an open transaction");
            }
        }

        if reusable && !slot.transport.is_dead() {
            directory.idle.lock().push_back(IdleEntry {
                session,
                slot,
                idle_since: Instant::now(),
            });
        } else {
            slot.session_count.fetch_sub(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let _ = session.close().await;
            });
        }

        directory.wake_one_waiter();
    }

    async fn reap_loop(pool: std::sync::Weak<Pool>) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(10));
        loop {
            ticker.tick().await;
            let Some(pool) = pool.upgrade() else { return };

            for entry in pool.targets.iter() {
                let directory = entry.value().clone();
                let now = Instant::now();
                let ttl = pool.config.idle_session_ttl;

                let mut expired = Vec::new();
                let mut survivors = Vec::new();
                {
                    let mut idle = directory.idle.lock();
                    while let Some(entry) = idle.pop_front() {
                        if now.duration_since(entry.idle_since) >= ttl {
                            expired.push(entry);
                        } else {
                            survivors.push(entry);
                        }
                    }
                }

                // Cheap ping probe, once per distinct Transport rather than
                // once per idle Session, before handing survivors back to
                // the idle queue: a Transport that died while every Session
                // on it sat idle would otherwise only be noticed once the
                // full TTL elapsed, or handed out to a caller as if healthy.
                let mut live_transports: HashMap<usize, bool> = HashMap::new();
                for entry in &survivors {
                    let key = Arc::as_ptr(&entry.slot.transport) as usize;
                    if let std::collections::hash_map::Entry::Vacant(v) = live_transports.entry(key) {
                        v.insert(entry.slot.transport.probe_liveness().await);
                    }
                }

                let mut keep = VecDeque::with_capacity(survivors.len());
                for entry in survivors {
                    let key = Arc::as_ptr(&entry.slot.transport) as usize;
                    if live_transports[&key] {
                        keep.push_back(entry);
                    } else {
                        expired.push(entry);
                    }
                }
                *directory.idle.lock() = keep;

                for entry in expired {
                    entry.slot.session_count.fetch_sub(1, Ordering::SeqCst);
                    tracing::debug!(session_id = entry.session.id, "reaping idle session past TTL or dead transport");
                    tokio::spawn(async move {
                        let _ = entry.session.close().await;
                    });
                }
            }
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        if let Some(handle) = self.reaper.lock().take() {
            handle.abort();
        }
    }
}
