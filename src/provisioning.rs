//! Tenant database provisioning.
//!
//! `ensure` is idempotent: it creates the physical database if needed, applies
//! the tenant schema with `IF NOT EXISTS` semantics and seeds reference data.
//! Failures are logged and reported in [`Provisioned::failure`] rather than
//! returned, so a tenant can still be served in a degraded state.

use std::path::Path;

use async_trait::async_trait;
use metrics::{counter, histogram};
use migration::{SchemaManager, tenant::TenantSchema};
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection, DbErr, Statement};
use tracing::{debug, error, info, instrument};

use crate::config::{AppConfig, ConfigError};
use crate::db::{self, PoolSettings};
use crate::error::{
    PG_DUPLICATE_DATABASE, ProvisioningError, ProvisioningStage, SeedError, TenancyError,
    has_error_code,
};
use crate::locator::{BackendKind, DatabaseLocator, PhysicalDatabase};
use crate::seeds::{SeedCatalog, SeedSummary};
use crate::tenant::{TenantId, TenantState};

/// Outcome of one `ensure` call.
#[derive(Debug)]
pub struct Provisioned {
    pub tenant_id: TenantId,
    pub database: PhysicalDatabase,
    pub failure: Option<ProvisioningError>,
}

impl Provisioned {
    pub fn state(&self) -> TenantState {
        if self.failure.is_some() {
            TenantState::Degraded
        } else {
            TenantState::Ready
        }
    }

    pub fn is_ready(&self) -> bool {
        self.failure.is_none()
    }
}

/// Makes a tenant's physical database exist with schema and reference data.
#[async_trait]
pub trait Provision: Send + Sync {
    async fn ensure(&self, tenant: TenantId) -> Provisioned;
}

#[derive(Debug, Clone)]
pub struct ProvisioningService {
    locator: DatabaseLocator,
    seeds: SeedCatalog,
    pool: PoolSettings,
}

impl ProvisioningService {
    pub fn new(locator: DatabaseLocator, seeds: SeedCatalog, pool: PoolSettings) -> Self {
        Self {
            locator,
            seeds,
            pool,
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            DatabaseLocator::from_config(cfg)?,
            SeedCatalog::from_config(cfg),
            PoolSettings::from_config(cfg),
        ))
    }

    pub fn locator(&self) -> &DatabaseLocator {
        &self.locator
    }

    pub fn seeds(&self) -> &SeedCatalog {
        &self.seeds
    }

    /// Like [`Provision::ensure`] but returns the failure to the caller.
    #[instrument(skip_all, fields(tenant_id = %tenant))]
    pub async fn try_ensure(&self, tenant: TenantId) -> Result<PhysicalDatabase, ProvisioningError> {
        let database = self.locator.physical(tenant);

        let created = self.create_database(tenant, &database).await?;
        debug!(database = %database.identifier, created, "physical database present");

        let conn = db::connect(&database.url, self.pool)
            .await
            .map_err(|err| ProvisioningError::new(tenant, ProvisioningStage::Connect, err))?;

        let result = self.initialize_tenant(tenant, &conn).await;
        if let Err(err) = conn.close().await {
            debug!(error = %err, "closing provisioning connection failed");
        }
        result.map(|_| database)
    }

    /// Applies the tenant schema and seeds to an already open database. Used
    /// directly when tenants share one database.
    pub async fn initialize(&self, db: &DatabaseConnection) -> Result<SeedSummary, TenancyError> {
        apply_schema(db).await?;
        Ok(self.seeds.apply(db).await?)
    }

    /// Seeds reference data only.
    pub async fn seed(&self, db: &DatabaseConnection) -> Result<SeedSummary, SeedError> {
        self.seeds.apply(db).await
    }

    async fn initialize_tenant(
        &self,
        tenant: TenantId,
        conn: &DatabaseConnection,
    ) -> Result<SeedSummary, ProvisioningError> {
        apply_schema(conn).await.map_err(|err| {
            let stage = if db::is_connectivity_error(&err) {
                ProvisioningStage::Connect
            } else {
                ProvisioningStage::ApplySchema
            };
            ProvisioningError::new(tenant, stage, err)
        })?;

        self.seeds
            .apply(conn)
            .await
            .map_err(|err| ProvisioningError::new(tenant, ProvisioningStage::SeedReferenceData, err))
    }

    /// Returns `true` when the database was created by this call.
    async fn create_database(
        &self,
        tenant: TenantId,
        database: &PhysicalDatabase,
    ) -> Result<bool, ProvisioningError> {
        match self.locator.backend() {
            BackendKind::Server => self
                .create_server_database(&database.identifier)
                .await
                .map_err(|err| {
                    ProvisioningError::new(tenant, ProvisioningStage::CreateDatabase, err)
                }),
            BackendKind::Embedded => create_embedded_database(&self.locator.tenant_file(tenant))
                .await
                .map_err(|err| {
                    ProvisioningError::new(tenant, ProvisioningStage::CreateDatabase, err)
                }),
        }
    }

    async fn create_server_database(&self, name: &str) -> Result<bool, DbErr> {
        let admin = db::connect(
            &self.locator.admin_url(),
            PoolSettings {
                max_connections: 1,
                ..self.pool
            },
        )
        .await?;

        let result = create_if_absent(&admin, name).await;
        if let Err(err) = admin.close().await {
            debug!(error = %err, "closing admin connection failed");
        }
        result
    }
}

#[async_trait]
impl Provision for ProvisioningService {
    async fn ensure(&self, tenant: TenantId) -> Provisioned {
        let started = std::time::Instant::now();
        let database = self.locator.physical(tenant);

        let failure = match self.try_ensure(tenant).await {
            Ok(_) => {
                counter!("tenancy_provisioning_total", "outcome" => "ready").increment(1);
                info!(
                    tenant_id = %tenant,
                    database = %database.identifier,
                    "tenant provisioned"
                );
                None
            }
            Err(err) => {
                counter!("tenancy_provisioning_total", "outcome" => "degraded").increment(1);
                error!(
                    tenant_id = %tenant,
                    database = %database.identifier,
                    stage = %err.stage,
                    error = %err,
                    "tenant provisioning failed"
                );
                Some(err)
            }
        };
        histogram!("tenancy_provisioning_duration_ms")
            .record(started.elapsed().as_secs_f64() * 1_000.0);

        Provisioned {
            tenant_id: tenant,
            database,
            failure,
        }
    }
}

/// Create-all over the tenant schema.
pub async fn apply_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    TenantSchema::create_all(&SchemaManager::new(db)).await
}

async fn create_if_absent(admin: &DatabaseConnection, name: &str) -> Result<bool, DbErr> {
    let exists = admin
        .query_one(Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            "SELECT 1 FROM pg_database WHERE datname = $1",
            [name.into()],
        ))
        .await?
        .is_some();
    if exists {
        return Ok(false);
    }

    let create = format!("CREATE DATABASE {}", quote_identifier(name));
    match admin
        .execute(Statement::from_string(DatabaseBackend::Postgres, create))
        .await
    {
        Ok(_) => {
            info!(database = %name, "created tenant database");
            Ok(true)
        }
        // Another process created it between the check and the create.
        Err(err) if has_error_code(&err, PG_DUPLICATE_DATABASE) => Ok(false),
        Err(err) => Err(err),
    }
}

async fn create_embedded_database(path: &Path) -> Result<bool, std::io::Error> {
    if tokio::fs::try_exists(path).await? {
        return Ok(false);
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    // The file itself is created by the first `mode=rwc` connection.
    Ok(true)
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_identifiers() {
        assert_eq!(quote_identifier("ledger_company_1"), "\"ledger_company_1\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }

    #[tokio::test]
    async fn embedded_creation_makes_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("company_1.db");

        assert!(create_embedded_database(&path).await.unwrap());
        assert!(path.parent().unwrap().is_dir());

        std::fs::write(&path, b"").unwrap();
        assert!(!create_embedded_database(&path).await.unwrap());
    }
}
