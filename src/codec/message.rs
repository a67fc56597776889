//! Protobuf-encoded message bodies carried inside a [`super::Frame`].
//!
//! These mirror a generated-from-`.proto` message set; they're hand-kept
//! here rather than built via `prost-build` since the schema itself is an
//! external collaborator — this crate only needs to
//! speak the wire shapes, not own the `.proto` source of truth.

use bytes::Bytes;
use prost::Message;

/// Every frame's payload is an `Envelope`: a session id plus an opaque,
/// still-encoded body. [`crate::transport`] decodes only this much to
/// demultiplex; the body is decoded by whichever layer understands the
/// frame's [`super::MessageTag`].
#[derive(Clone, PartialEq, Message)]
pub struct Envelope {
    /// Server-assigned session id this frame belongs to. Zero for
    /// connection-scope frames (ping/pong) that have no owning session.
    #[prost(uint64, tag = "1")]
    pub session_id: u64,
    #[prost(bytes = "bytes", tag = "2")]
    pub body: Bytes,
}

#[derive(Clone, PartialEq, Message)]
pub struct SessionOpen {
    #[prost(string, tag = "1")]
    pub default_schema: String,
    #[prost(string, tag = "2")]
    pub username: String,
    #[prost(string, tag = "3")]
    pub credential: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct SessionOpenAck {
    #[prost(uint64, tag = "1")]
    pub session_id: u64,
    #[prost(uint64, tag = "2")]
    pub connection_id: u64,
}

/// No-payload body, used for connection-scope control frames
/// (session-close, cancel, ping/pong) that carry no fields of their own.
#[derive(Clone, PartialEq, Message)]
pub struct Empty {}

#[derive(Clone, PartialEq, Message)]
pub struct SessionClose {}

#[derive(Clone, PartialEq, Message)]
pub struct SessionReset {}

/// A bound parameter value. The driver never interprets SQL types; it
/// forwards whatever encoding the caller supplied.
#[derive(Clone, PartialEq, Message)]
pub struct Param {
    #[prost(bytes = "bytes", tag = "1")]
    pub value: Bytes,
}

/// Piggy-backed lazy-transaction metadata, consumed and cleared
/// atomically once it rides along on the next request.
#[derive(Clone, PartialEq, Message)]
pub struct LazyTxnEnvelope {
    #[prost(bool, tag = "1")]
    pub lazy_cts: bool,
    #[prost(uint64, optional, tag = "2")]
    pub snapshot_seq: Option<u64>,
    #[prost(uint64, optional, tag = "3")]
    pub commit_seq: Option<u64>,
}

/// `execQuery`/`execUpdate`/`UPDATE ... RETURNING` — all the same wire
/// message, distinguished by the `returning` selector passed at
/// submission time.
#[derive(Clone, PartialEq, Message)]
pub struct ExecSql {
    #[prost(string, tag = "1")]
    pub sql: String,
    #[prost(message, repeated, tag = "2")]
    pub params: Vec<Param>,
    #[prost(string, optional, tag = "3")]
    pub hint: Option<String>,
    #[prost(bytes = "bytes", optional, tag = "4")]
    pub digest: Option<Bytes>,
    #[prost(bool, tag = "5")]
    pub ignore_result: bool,
    #[prost(bool, tag = "6")]
    pub returning: bool,
    #[prost(bool, tag = "7")]
    pub stream: bool,
    #[prost(uint32, tag = "8")]
    pub token_window: u32,
    #[prost(message, optional, tag = "9")]
    pub lazy_txn: Option<LazyTxnEnvelope>,
}

#[derive(Clone, PartialEq, Message)]
pub struct GalaxyPrepare {
    #[prost(string, tag = "1")]
    pub sql: String,
    #[prost(string, optional, tag = "2")]
    pub hint: Option<String>,
    #[prost(bytes = "bytes", optional, tag = "3")]
    pub digest: Option<Bytes>,
    #[prost(string, repeated, tag = "4")]
    pub tables: Vec<String>,
    #[prost(bytes = "bytes", tag = "5")]
    pub packed_params: Bytes,
    #[prost(uint32, tag = "6")]
    pub param_num: u32,
    #[prost(bool, tag = "7")]
    pub ignore_result: bool,
    #[prost(bool, tag = "8")]
    pub is_update: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct FetchMore {
    #[prost(uint32, tag = "1")]
    pub token_count: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct Cancel {}

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum NoticeKind {
    Warning = 0,
    SessionState = 1,
    SessionKilled = 2,
}

#[derive(Clone, PartialEq, Message)]
pub struct Notice {
    #[prost(enumeration = "NoticeKind", tag = "1")]
    pub kind: i32,
    #[prost(string, tag = "2")]
    pub message: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct ColumnDesc {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(uint32, tag = "2")]
    pub type_code: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct ColumnMetadata {
    #[prost(message, repeated, tag = "1")]
    pub columns: Vec<ColumnDesc>,
    /// Caller requested `compactMetadata`; the server may omit names.
    #[prost(bool, tag = "2")]
    pub compact: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct Row {
    #[prost(bytes = "bytes", repeated, tag = "1")]
    pub values: Vec<Bytes>,
}

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum TerminalStatus {
    Ok = 0,
    Eof = 1,
    Error = 2,
}

#[derive(Clone, PartialEq, Message)]
pub struct Terminal {
    #[prost(enumeration = "TerminalStatus", tag = "1")]
    pub status: i32,
    #[prost(uint64, tag = "2")]
    pub affected_rows: u64,
    #[prost(uint64, tag = "3")]
    pub last_insert_id: u64,
    #[prost(string, tag = "4")]
    pub sql_state: String,
    #[prost(int32, tag = "5")]
    pub code: i32,
    #[prost(string, tag = "6")]
    pub message: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct TsoRequest {
    #[prost(uint32, tag = "1")]
    pub count: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct TsoResponse {
    #[prost(uint64, repeated, tag = "1")]
    pub timestamps: Vec<u64>,
}
