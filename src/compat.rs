//! Thin, optional JDBC-shaped adapter over [`Handle`].
//!
//! The private operations in [`crate::handle`] are the primary interface;
//! this wrapper exists only for callers migrating off a JDBC-style
//! surface. It carries none of the excluded surface into the core:
//! savepoints, catalog, holdability, client-info, LOBs, type maps, and
//! `CallableStatement` all raise [`DriverError::NotSupported`] rather than
//! being implemented.

use std::any::TypeId;
use std::collections::HashMap;

use crate::error::{DriverError, Result};
use crate::handle::Handle;
use crate::result::ResultStream;

pub struct JdbcConnection<'a> {
    handle: &'a Handle,
}

impl<'a> JdbcConnection<'a> {
    pub fn new(handle: &'a Handle) -> Self {
        Self { handle }
    }

    pub fn create_statement(&self) -> Statement<'a> {
        Statement { handle: self.handle }
    }

    /// `createStatement(resultSetType, resultSetConcurrency, resultSetHoldability)`.
    /// Every combination is outside the private protocol; raises
    /// `NotSupported` instead of silently handing back a statement that
    /// ignores the requested result-set shape.
    pub fn create_statement_with(
        &self,
        _result_set_type: i32,
        _result_set_concurrency: i32,
        _result_set_holdability: i32,
    ) -> Result<Statement<'a>> {
        Err(DriverError::NotSupported("createStatement(type, concurrency, holdability)"))
    }

    pub async fn set_auto_commit(&self, value: bool) -> Result<()> {
        self.handle.set_auto_commit(value).await
    }

    pub async fn commit(&self) -> Result<()> {
        self.handle
            .exec_update("COMMIT", Vec::new(), None, None, false)
            .await
            .map(|_| ())
    }

    pub async fn rollback(&self) -> Result<()> {
        self.handle
            .exec_update("ROLLBACK", Vec::new(), None, None, false)
            .await
            .map(|_| ())
    }

    pub async fn close(&self) -> Result<()> {
        self.handle.close().await
    }

    pub fn set_savepoint(&self) -> Result<()> {
        Err(DriverError::NotSupported("savepoints"))
    }

    pub fn release_savepoint(&self) -> Result<()> {
        Err(DriverError::NotSupported("savepoints"))
    }

    pub fn get_catalog(&self) -> Result<String> {
        Err(DriverError::NotSupported("catalog"))
    }

    pub fn set_catalog(&self, _catalog: &str) -> Result<()> {
        Err(DriverError::NotSupported("catalog"))
    }

    pub fn get_holdability(&self) -> Result<i32> {
        Err(DriverError::NotSupported("holdability"))
    }

    pub fn set_holdability(&self, _holdability: i32) -> Result<()> {
        Err(DriverError::NotSupported("holdability"))
    }

    pub fn set_client_info(&self, _name: &str, _value: &str) -> Result<()> {
        Err(DriverError::NotSupported("client-info"))
    }

    pub fn get_type_map(&self) -> Result<HashMap<String, String>> {
        Err(DriverError::NotSupported("type maps"))
    }

    pub fn set_type_map(&self, _map: HashMap<String, String>) -> Result<()> {
        Err(DriverError::NotSupported("type maps"))
    }

    pub fn prepare_call(&self, _sql: &str) -> Result<()> {
        Err(DriverError::NotSupported("CallableStatement"))
    }

    /// Correct, non-reversed subtype test: `true` iff this connection can
    /// be unwrapped as `T`. The upstream adapter had the comparison
    /// backwards; here `T` is the candidate supertype/interface and the
    /// identity check runs in the direction that actually answers
    /// "is this connection a `T`".
    pub fn is_wrapper_for<T: 'static>(&self) -> bool {
        TypeId::of::<T>() == TypeId::of::<Self>()
    }

    pub fn unwrap<T: 'static>(&self) -> Result<&Self> {
        if self.is_wrapper_for::<T>() {
            Ok(self)
        } else {
            Err(DriverError::NotSupported("unwrap: type not assignable from this connection"))
        }
    }
}

pub struct Statement<'a> {
    handle: &'a Handle,
}

impl<'a> Statement<'a> {
    pub async fn execute_query(&self, sql: &str) -> Result<Option<ResultStream>> {
        self.handle.exec_query(sql, Vec::new(), None, None, false, false).await
    }

    pub async fn execute_update(&self, sql: &str) -> Result<Option<ResultStream>> {
        self.handle.exec_update(sql, Vec::new(), None, None, false).await
    }
}
