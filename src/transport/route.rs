//! Packet-ownership bookkeeping shared between a Transport and the
//! Session it belongs to.
//!
//! At most one Request per Session is the "packet owner" of the
//! Transport's session-id slot at any time.
//! `SessionRoute` is the shared cell both sides mutate: the Session sets
//! `current_owner` when it submits a Request and clears it once the
//! terminal frame arrives; the Transport's reader loop reads it to know
//! where to deliver an inbound frame.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};

use crate::codec::Frame;

/// A single inbound frame or a transport-fatal error, as delivered to
/// whichever Request currently owns the session-id slot.
#[derive(Debug)]
pub enum Delivery {
    Frame(Frame),
    TransportFailed(String),
}

pub struct SessionRoute {
    current_owner: Mutex<Option<mpsc::UnboundedSender<Delivery>>>,
    killed: AtomicBool,
    pub(crate) killed_notify: Notify,
}

impl SessionRoute {
    pub fn new() -> Self {
        Self {
            current_owner: Mutex::new(None),
            killed: AtomicBool::new(false),
            killed_notify: Notify::new(),
        }
    }

    /// Register the given channel as packet owner, returning the
    /// previous owner if one was still registered (a protocol violation
    /// the caller should treat as a bug: the pipeline guarantees at most
    /// one Request is awaiting a terminal frame at a time).
    pub fn set_owner(&self, tx: mpsc::UnboundedSender<Delivery>) -> Option<mpsc::UnboundedSender<Delivery>> {
        self.current_owner.lock().replace(tx)
    }

    /// Release ownership. Called once the owning Request's terminal
    /// frame has been processed.
    pub fn clear_owner(&self) {
        self.current_owner.lock().take();
    }

    /// Deliver a frame to the current owner, if any. Returns `false` if
    /// there was no owner (the frame is dropped; the Transport logs it).
    pub fn deliver(&self, delivery: Delivery) -> bool {
        let guard = self.current_owner.lock();
        match guard.as_ref() {
            Some(tx) => tx.send(delivery).is_ok(),
            None => false,
        }
    }

    pub fn mark_killed(&self) {
        self.killed.store(true, Ordering::SeqCst);
        self.killed_notify.notify_waiters();
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}

impl Default for SessionRoute {
    fn default() -> Self {
        Self::new()
    }
}
