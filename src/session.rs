//! Request-scoped unit of work bound to exactly one tenant database.

use std::{future::Future, pin::Pin};

use sea_orm::{DatabaseTransaction, TransactionError, TransactionTrait};
use serde::Serialize;
use tracing::debug;

use crate::directory::EngineHandle;
use crate::error::TenancyError;
use crate::tenant::TenantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No transaction opened yet.
    Idle,
    Active,
    Committed,
    RolledBack,
}

/// A lazily started transaction on one tenant's handle.
///
/// Dropping a session with an open transaction rolls it back.
pub struct ScopedSession {
    tenant: TenantId,
    handle: EngineHandle,
    txn: Option<DatabaseTransaction>,
    state: SessionState,
}

impl ScopedSession {
    pub fn new(tenant: TenantId, handle: EngineHandle) -> Self {
        Self {
            tenant,
            handle,
            txn: None,
            state: SessionState::Idle,
        }
    }

    pub fn tenant(&self) -> TenantId {
        self.tenant
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn handle(&self) -> &EngineHandle {
        &self.handle
    }

    /// The session's transaction, begun on first call.
    pub async fn transaction(&mut self) -> Result<&DatabaseTransaction, TenancyError> {
        let txn = match self.txn.take() {
            Some(txn) => txn,
            None => self
                .handle
                .connection()
                .begin()
                .await
                .map_err(|err| TenancyError::from_tenant_db(self.tenant, err))?,
        };
        self.state = SessionState::Active;
        Ok(self.txn.insert(txn))
    }

    /// Commits pending work and returns the final state. Committing an idle
    /// session is a no-op that still reports `Committed`.
    pub async fn commit(mut self) -> Result<SessionState, TenancyError> {
        if let Some(txn) = self.txn.take() {
            txn.commit()
                .await
                .map_err(|err| TenancyError::from_tenant_db(self.tenant, err))?;
        }
        debug!(tenant_id = %self.tenant, "session committed");
        Ok(SessionState::Committed)
    }

    pub async fn rollback(mut self) -> Result<SessionState, TenancyError> {
        if let Some(txn) = self.txn.take() {
            txn.rollback()
                .await
                .map_err(|err| TenancyError::from_tenant_db(self.tenant, err))?;
        }
        debug!(tenant_id = %self.tenant, "session rolled back");
        Ok(SessionState::RolledBack)
    }
}

impl Drop for ScopedSession {
    fn drop(&mut self) {
        if self.txn.is_some() {
            debug!(
                tenant_id = %self.tenant,
                "session dropped with open transaction; rolling back"
            );
        }
    }
}

/// Runs `f` in a transaction on `handle`: commit on `Ok`, rollback on `Err` or
/// panic.
pub async fn run_in_transaction<F, T, E>(
    tenant: TenantId,
    handle: &EngineHandle,
    f: F,
) -> Result<T, E>
where
    F: for<'c> FnOnce(
            &'c DatabaseTransaction,
        ) -> Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'c>>
        + Send,
    T: Send,
    E: std::error::Error + From<TenancyError> + Send,
{
    handle
        .connection()
        .transaction(f)
        .await
        .map_err(|err| match err {
            TransactionError::Connection(db) => E::from(TenancyError::from_tenant_db(tenant, db)),
            TransactionError::Transaction(err) => err,
        })
}
