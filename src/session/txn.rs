//! Transaction/isolation state machine for a [`super::Session`].

/// SQL standard isolation levels, as accepted by
/// `SET SESSION TRANSACTION ISOLATION LEVEL ...`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

/// A Session's transaction state.
///
/// `AutoCommit` → `ExplicitTxn` on the first DML under `autocommit=false`;
/// → `LazyPreparedTxn` once a lazy-CTS envelope is armed and a statement
/// carries it; `COMMIT`/`ROLLBACK`/kill always return to `AutoCommit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    AutoCommit,
    ExplicitTxn,
    LazyPreparedTxn,
}
