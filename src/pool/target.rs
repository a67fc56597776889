//! A storage-node endpoint, interned by the Pool.

use std::net::SocketAddr;

/// A storage-node endpoint: host, port, and the credentials used to open
/// every Session against it. Immutable once constructed; the Pool keys
/// its per-target directory on this value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub addr: SocketAddr,
    pub username: String,
    pub credential: String,
    pub default_schema: String,
}

impl Target {
    pub fn new(addr: SocketAddr, username: impl Into<String>, credential: impl Into<String>, default_schema: impl Into<String>) -> Self {
        Self {
            addr,
            username: username.into(),
            credential: credential.into(),
            default_schema: default_schema.into(),
        }
    }
}
