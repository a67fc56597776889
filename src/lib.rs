//! # xrpc — multiplexing RPC driver for distributed SQL storage nodes
//!
//! A client-side driver for a private binary wire protocol: length-
//! prefixed, protobuf-encoded frames multiplexing many logical database
//! sessions onto a small pool of physical TCP connections per storage
//! node. Callers acquire a [`handle::Handle`] from a [`pool::Pool`]; the
//! driver handles framing, demultiplexing, transaction/isolation state,
//! and flow-controlled result streaming underneath it.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │  Handle       — caller-visible lease      │
//! ├───────────────────────────────────────────┤
//! │  Pool         — per-target directory       │
//! ├───────────────────────────────────────────┤
//! │  Session      — protocol state, pipeline    │
//! │  ResultStream — rows, metadata, tokens      │
//! ├───────────────────────────────────────────┤
//! │  Transport    — socket, multiplexing        │
//! │  Codec        — frame/message (de)coding    │
//! └───────────────────────────────────────────┘
//! ```
//!
//! ## Crate layout
//!
//! - [`codec`] — wire framing and the protobuf-shaped message set.
//! - [`transport`] — one physical connection, multiplexed across Sessions.
//! - [`session`] — a logical database session and its request pipeline.
//! - [`result`] — rows, metadata, and flow control for one Request.
//! - [`pool`] — per-target directory of Transports and Sessions.
//! - [`handle`] — the caller-visible lease and public operation surface.
//! - [`error`] — [`error::DriverError`] and [`error::Result`].

pub mod codec;
pub mod error;
pub mod handle;
pub mod pool;
pub mod result;
pub mod session;
pub mod transport;

#[cfg(feature = "jdbc-compat")]
pub mod compat;

pub use error::{DriverError, Result};
pub use handle::Handle;
pub use pool::{Pool, PoolConfig, Target};
pub use result::ResultStream;
pub use session::{IsolationLevel, Session, TxnState};
