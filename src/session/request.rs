//! A single request submitted on a [`super::Session`]'s pipeline.

/// What kind of RPC a [`Request`] carries, mostly useful for bookkeeping
/// and for deciding whether `getLastUserRequest` should report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// `execQuery`/`execUpdate`/`UPDATE ... RETURNING`.
    Query,
    /// `execGalaxyPrepare`.
    GalaxyPrepare,
    /// Internal variable/isolation/schema assignment, fire-and-forget.
    Admin,
}

/// A pending or completed command on a Session's request pipeline.
///
/// Cloned into `Session::last_request`/`last_user_request` at submission
/// time and again once its terminal frame resolves, so callers can always
/// inspect the most recent outcome without holding a live reference to the
/// in-flight receiver.
#[derive(Debug, Clone)]
pub struct Request {
    pub sequence: u64,
    pub kind: RequestKind,
    /// Submitted with `ignoreResult=true`: its terminal frame is consumed
    /// internally and never surfaced via `getLastUserRequest`.
    pub ignore_result: bool,
    /// Completed with no open transaction left dangling. `false` until the
    /// terminal frame is observed; a [`super::Session`] reusable by the
    /// pool has its last user request's flag set `true`.
    pub is_good_and_done: bool,
}
