//! Tenant directory and engine cache.
//!
//! Maps tenant ids to live connection pools. The hot path is a read lock on a
//! map with no I/O; a miss takes a per-tenant creation lock so concurrent
//! first requests provision and connect exactly once.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use metrics::counter;
use sea_orm::DatabaseConnection;
use tracing::{debug, info, warn};

use crate::config::DegradedPolicy;
use crate::db::{self, PoolSettings};
use crate::error::TenancyError;
use crate::locator::PhysicalDatabase;
use crate::provisioning::Provision;
use crate::tenant::{TenantId, TenantState};

/// A cheaply clonable handle to one pool. Clones share the pool.
#[derive(Debug, Clone)]
pub struct EngineHandle(Arc<HandleInner>);

#[derive(Debug)]
struct HandleInner {
    tenant: Option<TenantId>,
    database: PhysicalDatabase,
    conn: DatabaseConnection,
}

impl EngineHandle {
    /// Handle over a database that every tenant shares.
    pub fn shared(database: PhysicalDatabase, conn: DatabaseConnection) -> Self {
        Self(Arc::new(HandleInner {
            tenant: None,
            database,
            conn,
        }))
    }

    fn for_tenant(tenant: TenantId, database: PhysicalDatabase, conn: DatabaseConnection) -> Self {
        Self(Arc::new(HandleInner {
            tenant: Some(tenant),
            database,
            conn,
        }))
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.0.conn
    }

    pub fn database(&self) -> &PhysicalDatabase {
        &self.0.database
    }

    /// `None` for the shared handle.
    pub fn tenant(&self) -> Option<TenantId> {
        self.0.tenant
    }

    /// True when both handles wrap the same pool.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

enum Mode {
    Shared(EngineHandle),
    Isolated { provisioner: Arc<dyn Provision> },
}

#[derive(Debug)]
struct TenantEntry {
    handle: EngineHandle,
    state: TenantState,
}

pub struct TenantDirectory {
    mode: Mode,
    pool: PoolSettings,
    degraded_policy: DegradedPolicy,
    entries: RwLock<HashMap<TenantId, TenantEntry>>,
    creation_locks: Mutex<HashMap<TenantId, Arc<tokio::sync::Mutex<()>>>>,
}

impl TenantDirectory {
    /// Every tenant is served from `handle`; provisioning never runs.
    pub fn shared(handle: EngineHandle) -> Self {
        Self {
            mode: Mode::Shared(handle),
            pool: PoolSettings::default(),
            degraded_policy: DegradedPolicy::Serve,
            entries: RwLock::new(HashMap::new()),
            creation_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Every tenant gets its own database, provisioned on first access.
    pub fn isolated(
        provisioner: Arc<dyn Provision>,
        pool: PoolSettings,
        degraded_policy: DegradedPolicy,
    ) -> Self {
        Self {
            mode: Mode::Isolated { provisioner },
            pool,
            degraded_policy,
            entries: RwLock::new(HashMap::new()),
            creation_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self.mode, Mode::Shared(_))
    }

    /// Returns the tenant's handle, provisioning and connecting on first use.
    pub async fn get_handle(&self, tenant: TenantId) -> Result<EngineHandle, TenancyError> {
        let provisioner = match &self.mode {
            Mode::Shared(handle) => return Ok(handle.clone()),
            Mode::Isolated { provisioner } => provisioner,
        };

        if let Some(handle) = self.lookup(tenant)? {
            counter!("tenancy_directory_lookups_total", "result" => "hit").increment(1);
            return Ok(handle);
        }
        counter!("tenancy_directory_lookups_total", "result" => "miss").increment(1);

        let lock = self.creation_lock(tenant);
        let result = {
            let _guard = lock.lock().await;
            self.provision_and_cache(tenant, provisioner.as_ref()).await
        };
        self.release_creation_lock(tenant, lock);
        result
    }

    async fn provision_and_cache(
        &self,
        tenant: TenantId,
        provisioner: &dyn Provision,
    ) -> Result<EngineHandle, TenancyError> {
        // Another caller may have finished while we waited.
        if let Some(handle) = self.lookup(tenant)? {
            return Ok(handle);
        }

        let provisioned = provisioner.ensure(tenant).await;
        let state = provisioned.state();
        let conn = db::connect(&provisioned.database.url, self.pool)
            .await
            .map_err(|err| TenancyError::from_tenant_db(tenant, err))?;
        let handle = EngineHandle::for_tenant(tenant, provisioned.database, conn);

        self.write_entries().insert(
            tenant,
            TenantEntry {
                handle: handle.clone(),
                state,
            },
        );
        info!(tenant_id = %tenant, %state, "tenant engine cached");

        self.admit(tenant, handle, state)
    }

    /// Current lifecycle state of a tenant.
    pub fn state(&self, tenant: TenantId) -> TenantState {
        if self.is_shared() {
            return TenantState::Ready;
        }
        if let Some(entry) = self.read_entries().get(&tenant) {
            return entry.state;
        }
        let creating = self
            .lock_table()
            .get(&tenant)
            .is_some_and(|lock| lock.try_lock().is_err());
        if creating {
            TenantState::Provisioning
        } else {
            TenantState::Unprovisioned
        }
    }

    /// Re-runs provisioning for a tenant. A degraded tenant whose provisioning
    /// now succeeds becomes ready; a tenant that was never accessed is cached.
    pub async fn reprovision(&self, tenant: TenantId) -> Result<TenantState, TenancyError> {
        let provisioner = match &self.mode {
            Mode::Shared(_) => return Ok(TenantState::Ready),
            Mode::Isolated { provisioner } => provisioner,
        };

        let lock = self.creation_lock(tenant);
        let result = {
            let _guard = lock.lock().await;
            self.reprovision_locked(tenant, provisioner.as_ref()).await
        };
        self.release_creation_lock(tenant, lock);
        let state = result?;
        info!(tenant_id = %tenant, %state, "tenant reprovisioned");
        Ok(state)
    }

    async fn reprovision_locked(
        &self,
        tenant: TenantId,
        provisioner: &dyn Provision,
    ) -> Result<TenantState, TenancyError> {
        let provisioned = provisioner.ensure(tenant).await;
        let state = provisioned.state();
        let database = provisioned.database;
        let updated = match self.write_entries().get_mut(&tenant) {
            Some(entry) => {
                // Never downgrade a ready tenant because of a transient failure.
                if state == TenantState::Ready {
                    entry.state = TenantState::Ready;
                }
                Some(entry.state)
            }
            None => None,
        };
        if let Some(state) = updated {
            return Ok(state);
        }

        let conn = db::connect(&database.url, self.pool)
            .await
            .map_err(|err| TenancyError::from_tenant_db(tenant, err))?;
        let handle = EngineHandle::for_tenant(tenant, database, conn);
        self.write_entries()
            .insert(tenant, TenantEntry { handle, state });
        Ok(state)
    }

    /// Cached tenants with their states, ordered by id.
    pub fn cached_tenants(&self) -> Vec<(TenantId, TenantState)> {
        let mut tenants: Vec<_> = self
            .read_entries()
            .iter()
            .map(|(id, entry)| (*id, entry.state))
            .collect();
        tenants.sort_by_key(|(id, _)| *id);
        tenants
    }

    /// Closes every distinct pool and empties the cache. Returns the number of
    /// pools closed.
    pub async fn dispose_all(&self) -> usize {
        let mut handles: Vec<EngineHandle> = self
            .write_entries()
            .drain()
            .map(|(_, entry)| entry.handle)
            .collect();
        if let Mode::Shared(handle) = &self.mode {
            handles.push(handle.clone());
        }

        let mut distinct: Vec<EngineHandle> = Vec::with_capacity(handles.len());
        for handle in handles {
            if !distinct.iter().any(|seen| EngineHandle::ptr_eq(seen, &handle)) {
                distinct.push(handle);
            }
        }

        let closed = distinct.len();
        for handle in distinct {
            if let Err(err) = handle.connection().clone().close().await {
                warn!(
                    database = %handle.database().identifier,
                    error = %err,
                    "failed to close tenant pool"
                );
            }
        }
        debug!(closed, "disposed tenant engines");
        closed
    }

    fn lookup(&self, tenant: TenantId) -> Result<Option<EngineHandle>, TenancyError> {
        let entries = self.read_entries();
        let Some(entry) = entries.get(&tenant) else {
            return Ok(None);
        };
        self.admit(tenant, entry.handle.clone(), entry.state)
            .map(Some)
    }

    fn admit(
        &self,
        tenant: TenantId,
        handle: EngineHandle,
        state: TenantState,
    ) -> Result<EngineHandle, TenancyError> {
        if state != TenantState::Degraded {
            return Ok(handle);
        }
        match self.degraded_policy {
            DegradedPolicy::Serve => {
                warn!(tenant_id = %tenant, "serving degraded tenant");
                Ok(handle)
            }
            DegradedPolicy::Reject => Err(TenancyError::TenantUnavailable(tenant)),
        }
    }

    fn creation_lock(&self, tenant: TenantId) -> Arc<tokio::sync::Mutex<()>> {
        self.lock_table()
            .entry(tenant)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Drops the tenant's lock entry once no other caller holds or awaits it.
    fn release_creation_lock(&self, tenant: TenantId, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut table = self.lock_table();
        // Clones are only handed out under the table lock, so the count
        // cannot grow while it is held.
        drop(lock);
        if table
            .get(&tenant)
            .is_some_and(|current| Arc::strong_count(current) == 1)
        {
            table.remove(&tenant);
        }
    }

    /// Tenants with a creation lock outstanding.
    pub fn pending_creations(&self) -> usize {
        self.lock_table().len()
    }

    fn lock_table(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<TenantId, Arc<tokio::sync::Mutex<()>>>> {
        self.creation_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn read_entries(&self) -> std::sync::RwLockReadGuard<'_, HashMap<TenantId, TenantEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_entries(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<TenantId, TenantEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}
