//! One physical TCP connection to a storage-node [`Target`](crate::pool::Target).
//!
//! Owns a single-writer send path and a single-reader receive path
//! The reader is one spawned task that decodes frames
//! and dispatches them to whichever Session is the current "packet
//! owner" of the frame's session-id slot; connection-scope notices
//! (warnings with no owner, session-killed, keepalive) are handled
//! inline instead of being routed.

pub mod route;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex as PlMutex;
use prost::Message as _;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::codec::message::{Empty, Envelope, Notice, NoticeKind, SessionOpen, SessionOpenAck, TsoRequest, TsoResponse};
use crate::codec::{self, Frame, MessageTag};
use crate::error::{DriverError, Result};
use route::{Delivery, SessionRoute};

/// Reserved session-id slot for connection-scope control RPCs
/// (session-open, TSO) that precede a Session's own assigned id.
const CONTROL_SLOT: u64 = 0;

/// How often the keepalive task pings an idle Transport, and how long
/// it waits for the reply before declaring the Transport dead.
const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_PING_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One physical socket, multiplexing many Sessions.
///
/// The read/write halves are boxed trait objects rather than
/// `TcpStream`-typed halves so that `from_io` can wire up an in-process
/// `tokio::io::duplex` pair for tests, feeding the same frame codec and
/// dispatch path a real socket would.
pub struct Transport {
    peer: SocketAddr,
    writer: Mutex<BoxedWriter>,
    routes: DashMap<u64, Arc<SessionRoute>>,
    next_session_id: AtomicU64,
    last_active: PlMutex<Instant>,
    dead: AtomicBool,
    reader_task: PlMutex<Option<JoinHandle<()>>>,
    keepalive_task: PlMutex<Option<JoinHandle<()>>>,
}

impl Transport {
    /// Connect to `peer` and start the reader and keepalive tasks.
    pub async fn connect(peer: SocketAddr) -> Result<Arc<Self>> {
        let stream = TcpStream::connect(peer).await?;
        stream.set_nodelay(true).ok();
        let (read_half, write_half) = tokio::io::split(stream);
        Ok(Self::from_io(peer, read_half, write_half))
    }

    /// Wrap an already-established duplex I/O pair as a Transport,
    /// skipping the socket connect. Used to drive the real frame codec
    /// and dispatch path over an in-process `tokio::io::duplex` in tests.
    pub fn from_io<R, W>(peer: SocketAddr, read_half: R, write_half: W) -> Arc<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let routes = DashMap::new();
        routes.insert(CONTROL_SLOT, Arc::new(SessionRoute::new()));

        let transport = Arc::new(Transport {
            peer,
            writer: Mutex::new(Box::new(write_half)),
            routes,
            next_session_id: AtomicU64::new(1),
            last_active: PlMutex::new(Instant::now()),
            dead: AtomicBool::new(false),
            reader_task: PlMutex::new(None),
            keepalive_task: PlMutex::new(None),
        });

        let reader = tokio::spawn(Self::reader_loop(transport.clone(), Box::new(read_half)));
        *transport.reader_task.lock() = Some(reader);

        let keepalive = tokio::spawn(Self::keepalive_loop(transport.clone()));
        *transport.keepalive_task.lock() = Some(keepalive);

        tracing::info!(%peer, "transport connected");
        transport
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }

    pub fn last_active(&self) -> Instant {
        *self.last_active.lock()
    }

    /// Cheap liveness probe: ping the Transport and wait up to
    /// `DEFAULT_PING_REPLY_TIMEOUT` for the reader loop to bump
    /// `last_active` in response. Used by the pool's idle-session reaper
    /// to avoid handing out a Session whose Transport died silently while
    /// idle.
    pub async fn probe_liveness(&self) -> bool {
        if self.is_dead() {
            return false;
        }
        if self.send_envelope(MessageTag::Ping, CONTROL_SLOT, &Empty {}).await.is_err() {
            self.fail_all("liveness probe failed to send");
            return false;
        }
        let sent_at = self.last_active();
        tokio::time::sleep(DEFAULT_PING_REPLY_TIMEOUT).await;
        if self.last_active() <= sent_at {
            tracing::warn!(peer = %self.peer, "liveness probe timed out");
            self.fail_all("liveness probe timed out");
            return false;
        }
        true
    }

    /// Allocate the next client-chosen session-id slot and register its
    /// route. The server's `SessionOpenAck` is expected to echo this
    /// same id back; `open_session` enforces that.
    fn allocate_slot(&self) -> (u64, Arc<SessionRoute>) {
        let id = self.next_session_id.fetch_add(1, Ordering::SeqCst);
        let route = Arc::new(SessionRoute::new());
        self.routes.insert(id, route.clone());
        (id, route)
    }

    pub fn drop_slot(&self, session_id: u64) {
        self.routes.remove(&session_id);
    }

    pub fn route(&self, session_id: u64) -> Option<Arc<SessionRoute>> {
        self.routes.get(&session_id).map(|r| r.clone())
    }

    /// Open a new logical session on this Transport.
    pub async fn open_session(
        &self,
        default_schema: &str,
        username: &str,
        credential: &str,
    ) -> Result<(u64, u64, Arc<SessionRoute>)> {
        if self.is_dead() {
            return Err(DriverError::Transport("transport is dead".into()));
        }

        let (session_id, route) = self.allocate_slot();

        let body = SessionOpen {
            default_schema: default_schema.to_string(),
            username: username.to_string(),
            credential: credential.to_string(),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        route.set_owner(tx);

        if let Err(e) = self
            .send_envelope(MessageTag::SessionOpen, session_id, &body)
            .await
        {
            self.drop_slot(session_id);
            return Err(e);
        }

        let delivery = rx_recv_timeout(rx, DEFAULT_PING_REPLY_TIMEOUT * 3).await;
        route.clear_owner();

        match delivery {
            Ok(Delivery::Frame(frame)) if frame.tag == MessageTag::SessionOpenAck => {
                let env = Envelope::decode(frame.payload.clone())
                    .map_err(|e| DriverError::Frame(e.into()))?;
                let ack = SessionOpenAck::decode(env.body)
                    .map_err(|e| DriverError::Frame(e.into()))?;
                tracing::info!(session_id, connection_id = ack.connection_id, "session opened");
                Ok((session_id, ack.connection_id, route))
            }
            Ok(Delivery::Frame(_)) => {
                self.drop_slot(session_id);
                Err(DriverError::Transport("unexpected reply to session-open".into()))
            }
            Ok(Delivery::TransportFailed(msg)) => {
                self.drop_slot(session_id);
                Err(DriverError::Transport(msg))
            }
            Err(_) => {
                self.drop_slot(session_id);
                Err(DriverError::Timeout {
                    waited_nanos: (DEFAULT_PING_REPLY_TIMEOUT * 3).as_nanos() as u64,
                })
            }
        }
    }

    /// Global timestamp allocator RPC. Connection-scope, not tied to any
    /// Session, so it runs over the reserved control slot the same way
    /// the session-open handshake does.
    pub async fn get_tso(&self, count: u32) -> Result<Vec<u64>> {
        if self.is_dead() {
            return Err(DriverError::Transport("transport is dead".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let control = self.route(CONTROL_SLOT).expect("control slot route always present");
        let previous = control.set_owner(tx);
        if previous.is_some() {
            tracing::warn!("control slot already had an owner; TSO requests on one transport must be serialized by the caller");
        }

        let body = TsoRequest { count };
        if let Err(e) = self.send_envelope(MessageTag::Tso, CONTROL_SLOT, &body).await {
            control.clear_owner();
            return Err(e);
        }

        let delivery = rx_recv_timeout(rx, DEFAULT_PING_REPLY_TIMEOUT * 3).await;
        control.clear_owner();

        match delivery {
            Ok(Delivery::Frame(frame)) if frame.tag == MessageTag::Tso => {
                let env = Envelope::decode(frame.payload.clone()).map_err(|e| DriverError::Frame(e.into()))?;
                let resp = TsoResponse::decode(env.body).map_err(|e| DriverError::Frame(e.into()))?;
                Ok(resp.timestamps)
            }
            Ok(Delivery::Frame(_)) => Err(DriverError::Transport("unexpected reply to TSO request".into())),
            Ok(Delivery::TransportFailed(msg)) => Err(DriverError::Transport(msg)),
            Err(_) => Err(DriverError::Timeout {
                waited_nanos: (DEFAULT_PING_REPLY_TIMEOUT * 3).as_nanos() as u64,
            }),
        }
    }

    /// Encode `body` into an [`Envelope`] for `session_id` and send it
    /// as a single frame. This is the single-writer send path: the
    /// writer lock is held only for the duration of the flush.
    pub async fn send_envelope<M: prost::Message>(
        &self,
        tag: MessageTag,
        session_id: u64,
        body: &M,
    ) -> Result<()> {
        if self.is_dead() {
            return Err(DriverError::Transport("transport is dead".into()));
        }
        let envelope = Envelope {
            session_id,
            body: body.encode_to_vec().into(),
        };
        let payload = envelope.encode_to_vec();

        let mut writer = self.writer.lock().await;
        codec::write_frame(&mut *writer, tag, &payload)
            .await
            .map_err(DriverError::from)?;
        writer.flush().await?;
        *self.last_active.lock() = Instant::now();
        Ok(())
    }

    /// Push any buffered, side-effect-only frames before the connection
    /// is released back to the Pool.
    /// A plain writer flush suffices: frames are written whole, never
    /// partially buffered across calls.
    pub async fn flush_network(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.flush().await?;
        Ok(())
    }

    async fn reader_loop(transport: Arc<Transport>, mut read_half: BoxedReader) {
        loop {
            match codec::read_frame(&mut read_half).await {
                Ok(Some(frame)) => {
                    *transport.last_active.lock() = Instant::now();
                    transport.dispatch(frame).await;
                }
                Ok(None) => {
                    tracing::info!(peer = %transport.peer, "transport closed by peer");
                    transport.fail_all("connection closed by peer");
                    break;
                }
                Err(e) => {
                    tracing::error!(peer = %transport.peer, error = %e, "transport read error");
                    transport.fail_all(&e.to_string());
                    break;
                }
            }
        }
    }

    async fn dispatch(&self, frame: Frame) {
        match frame.tag {
            MessageTag::Ping => {
                let _ = self.send_envelope(MessageTag::Pong, CONTROL_SLOT, &Empty {}).await;
            }
            MessageTag::Pong => {
                // liveness already bumped by the caller; nothing else to do.
            }
            MessageTag::Notice => {
                let Ok(env) = Envelope::decode(frame.payload.clone()) else {
                    tracing::warn!("dropping undecodable notice frame");
                    return;
                };
                let Ok(notice) = Notice::decode(env.body) else {
                    tracing::warn!("dropping undecodable notice body");
                    return;
                };
                self.handle_notice(env.session_id, notice);
            }
            _ => {
                let Ok(env) = Envelope::decode(frame.payload.clone()) else {
                    tracing::warn!(tag = ?frame.tag, "dropping undecodable frame");
                    return;
                };
                match self.routes.get(&env.session_id) {
                    Some(route) => {
                        if !route.deliver(Delivery::Frame(frame)) {
                            tracing::debug!(
                                session_id = env.session_id,
                                tag = ?frame.tag,
                                "frame for session with no current packet owner, dropped"
                            );
                        }
                    }
                    None => {
                        tracing::debug!(
                            session_id = env.session_id,
                            tag = ?frame.tag,
                            "frame for unknown session, dropped"
                        );
                    }
                }
            }
        }
    }

    fn handle_notice(&self, session_id: u64, notice: Notice) {
        match NoticeKind::try_from(notice.kind) {
            Ok(NoticeKind::SessionKilled) => {
                if let Some(route) = self.routes.get(&session_id) {
                    tracing::warn!(session_id, "session killed by server push notice");
                    route.mark_killed();
                    route.deliver(Delivery::TransportFailed("session killed".into()));
                }
            }
            Ok(NoticeKind::Warning) | Ok(NoticeKind::SessionState) => {
                match self.routes.get(&session_id) {
                    Some(route) => {
                        // Attach to the owning Request if one is waiting;
                        // otherwise it's logged and dropped.
                        if !route.deliver(Delivery::Frame(Frame {
                            tag: MessageTag::Notice,
                            payload: prost::Message::encode_to_vec(&Envelope {
                                session_id,
                                body: notice.encode_to_vec().into(),
                            })
                            .into(),
                        })) {
                            tracing::debug!(session_id, message = %notice.message, "notice for idle session, dropped");
                        }
                    }
                    None => tracing::debug!(session_id, message = %notice.message, "notice for unknown session"),
                }
            }
            Err(_) => tracing::warn!(kind = notice.kind, "unknown notice kind"),
        }
    }

    /// Fail every in-flight Request on every Session of this Transport
    /// with `TransportError`, mark every Session dead.
    fn fail_all(&self, reason: &str) {
        self.dead.store(true, Ordering::SeqCst);
        for entry in self.routes.iter() {
            entry.value().mark_killed();
            entry.value().deliver(Delivery::TransportFailed(reason.to_string()));
        }
        if let Some(handle) = self.keepalive_task.lock().take() {
            handle.abort();
        }
    }

    async fn keepalive_loop(transport: Arc<Transport>) {
        let mut ticker = tokio::time::interval(DEFAULT_IDLE_INTERVAL);
        loop {
            ticker.tick().await;
            if transport.is_dead() {
                return;
            }
            let idle_for = transport.last_active().elapsed();
            if idle_for < DEFAULT_IDLE_INTERVAL {
                continue;
            }
            if transport
                .send_envelope(MessageTag::Ping, CONTROL_SLOT, &Empty {})
                .await
                .is_err()
            {
                transport.fail_all("keepalive ping failed to send");
                return;
            }
            // `send_envelope` just bumped `last_active` to now; a reply
            // bumps it again via the reader loop, so the baseline for the
            // timeout check has to be taken after the send, not before it.
            let sent_at = transport.last_active();
            tokio::time::sleep(DEFAULT_PING_REPLY_TIMEOUT).await;
            if transport.last_active() <= sent_at {
                tracing::warn!(peer = %transport.peer, "keepalive ping timed out");
                transport.fail_all("keepalive ping timed out");
                return;
            }
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if let Some(handle) = self.reader_task.lock().take() {
            handle.abort();
        }
        if let Some(handle) = self.keepalive_task.lock().take() {
            handle.abort();
        }
    }
}

async fn rx_recv_timeout(
    mut rx: mpsc::UnboundedReceiver<Delivery>,
    timeout: Duration,
) -> std::result::Result<Delivery, ()> {
    match tokio::time::timeout(timeout, rx.recv()).await {
        Ok(Some(delivery)) => Ok(delivery),
        Ok(None) => Err(()),
        Err(_) => Err(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn transport_connect_fails_on_refused_port() {
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let result = Transport::connect(addr).await;
        assert!(result.is_err());
    }
}
