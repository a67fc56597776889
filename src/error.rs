//! Error types for the driver.
//!
//! One flat enum covers the taxonomy: transport failures are fatal to
//! every Session on the Transport, session errors are server-signalled
//! and not fatal unless the server says so, and the rest are lifecycle
//! or protocol violations raised directly to the caller.

/// Errors that can occur anywhere in the driver.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// Socket failure, frame error, or other protocol-level violation.
    /// Fatal to the owning [`crate::transport::Transport`]; every Session
    /// on it is failed with this error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Underlying I/O error on the socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame decoding failed (bad length, truncated payload, bad tag).
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Server-signalled statement error (SQL-state + vendor code + message).
    #[error("session error [{sql_state}] ({code}): {message}")]
    Session {
        sql_state: String,
        code: i32,
        message: String,
    },

    /// The Session was killed; it is no longer usable.
    #[error("session killed: {0}")]
    SessionKilled(String),

    /// The Pool could not grant a Session within `acquireTimeoutNanos`.
    #[error("acquire timed out after {waited_nanos}ns")]
    AcquireTimeout { waited_nanos: u64 },

    /// A per-request network timeout elapsed; a cancel was issued.
    #[error("network timeout after {waited_nanos}ns")]
    Timeout { waited_nanos: u64 },

    /// Caller requested a JDBC-surface feature outside the private protocol.
    #[error("not supported: {0}")]
    NotSupported(&'static str),

    /// Operation attempted on a Handle after `close()`.
    #[error("handle closed")]
    Closed,

    /// Operation attempted on a Handle before `init()`.
    #[error("handle not initialized")]
    NotInitialized,

    /// Unknown isolation level, negative token count, etc.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),
}

/// Errors from the frame codec. Opaque to message semantics.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame length {0} out of bounds")]
    LengthOutOfBounds(u32),

    #[error("socket half-closed mid-frame (expected {expected} more bytes)")]
    Truncated { expected: usize },

    #[error("unknown message type tag {0:#x}")]
    UnknownTag(u8),

    #[error("protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("protobuf encode error: {0}")]
    Encode(#[from] prost::EncodeError),
}

/// Convenience alias for `Result<T, DriverError>`.
pub type Result<T> = std::result::Result<T, DriverError>;
