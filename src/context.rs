//! The service context: owns the control-plane pool and every tenancy
//! component, and is passed by reference to whatever needs them.

use std::{future::Future, pin::Pin, sync::Arc};

use regex::Regex;
use sea_orm::{DatabaseConnection, DatabaseTransaction};
use tracing::{info, warn};

use crate::config::{AppConfig, ConfigError};
use crate::db::{self, DatabaseError, PoolSettings};
use crate::directory::{EngineHandle, TenantDirectory};
use crate::error::TenancyError;
use crate::locator::DatabaseLocator;
use crate::orchestrator::{MigrationOrchestrator, MigrationReport};
use crate::provisioning::{Provision, ProvisioningService};
use crate::resolver::{PathTenantResolver, SingleTenantResolver, TenantResolver};
use crate::session::{ScopedSession, run_in_transaction};
use crate::tenant::{TenantId, TenantState};

pub struct TenancyContext {
    config: AppConfig,
    control_plane: DatabaseConnection,
    locator: DatabaseLocator,
    provisioner: Arc<ProvisioningService>,
    directory: TenantDirectory,
}

impl TenancyContext {
    /// Opens the control-plane pool and wires every component.
    pub async fn connect(config: AppConfig) -> Result<Self, TenancyError> {
        config.validate()?;
        let control_plane = db::init_pool(&config).await.map_err(|err| match err {
            DatabaseError::ConnectionFailed { source } => TenancyError::ControlPlane(source),
            DatabaseError::InvalidConfiguration { .. } => {
                TenancyError::Config(ConfigError::MissingDatabaseUrl)
            }
        })?;
        Self::from_parts(config, control_plane)
    }

    /// Wires the components around an existing control-plane connection.
    pub fn from_parts(
        config: AppConfig,
        control_plane: DatabaseConnection,
    ) -> Result<Self, TenancyError> {
        let locator = DatabaseLocator::from_config(&config)?;
        let provisioner = Arc::new(ProvisioningService::from_config(&config)?);
        let pool = PoolSettings::from_config(&config);

        let directory = if locator.is_isolated() {
            TenantDirectory::isolated(
                provisioner.clone() as Arc<dyn Provision>,
                pool,
                config.degraded_policy,
            )
        } else {
            TenantDirectory::shared(EngineHandle::shared(
                locator.shared(),
                control_plane.clone(),
            ))
        };

        Ok(Self {
            config,
            control_plane,
            locator,
            provisioner,
            directory,
        })
    }

    /// Connects and runs the boot migration. A control-plane migration
    /// failure aborts startup; tenant failures are in the report.
    pub async fn boot(config: AppConfig) -> Result<(Self, MigrationReport), TenancyError> {
        let context = Self::connect(config).await?;
        let report = context.migrate().await?;
        info!(
            tenants = report.tenants.len(),
            failed = report.failed_targets().len(),
            "tenancy context ready"
        );
        Ok((context, report))
    }

    pub async fn migrate(&self) -> Result<MigrationReport, TenancyError> {
        self.orchestrator().run().await
    }

    pub fn orchestrator(&self) -> MigrationOrchestrator {
        MigrationOrchestrator::new(
            self.control_plane.clone(),
            self.locator.clone(),
            self.provisioner.clone(),
            PoolSettings::from_config(&self.config),
        )
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn control_plane(&self) -> &DatabaseConnection {
        &self.control_plane
    }

    pub fn locator(&self) -> &DatabaseLocator {
        &self.locator
    }

    pub fn provisioner(&self) -> &Arc<ProvisioningService> {
        &self.provisioner
    }

    pub fn directory(&self) -> &TenantDirectory {
        &self.directory
    }

    /// The resolver selected by configuration: a fixed tenant when
    /// `single_tenant_id` is set, path-based otherwise.
    pub fn resolver(&self) -> Result<Box<dyn TenantResolver>, TenancyError> {
        if let Some(id) = self.config.single_tenant_id {
            return Ok(Box::new(SingleTenantResolver(TenantId(id))));
        }
        let pattern = Regex::new(&self.config.tenant_path_pattern).map_err(|source| {
            ConfigError::InvalidTenantPathPattern {
                value: self.config.tenant_path_pattern.clone(),
                source,
            }
        })?;
        Ok(Box::new(PathTenantResolver::new(
            pattern,
            self.control_plane.clone(),
        )))
    }

    /// A unit of work on the tenant's database. The transaction starts on
    /// first use.
    pub async fn acquire_session(&self, tenant: TenantId) -> Result<ScopedSession, TenancyError> {
        let handle = self.directory.get_handle(tenant).await?;
        Ok(ScopedSession::new(tenant, handle))
    }

    /// Runs `f` in one transaction on the tenant's database: commit on `Ok`,
    /// rollback on `Err` or panic.
    pub async fn with_session<F, T, E>(&self, tenant: TenantId, f: F) -> Result<T, E>
    where
        F: for<'c> FnOnce(
                &'c DatabaseTransaction,
            ) -> Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'c>>
            + Send,
        T: Send,
        E: std::error::Error + From<TenancyError> + Send,
    {
        let handle = self.directory.get_handle(tenant).await.map_err(E::from)?;
        run_in_transaction(tenant, &handle, f).await
    }

    /// Best-effort provisioning right after a company row is committed.
    pub async fn company_created(&self, tenant: TenantId) -> TenantState {
        if let Err(err) = self.directory.get_handle(tenant).await {
            warn!(tenant_id = %tenant, error = %err, "provisioning new company failed");
        }
        self.directory.state(tenant)
    }

    /// Closes every pool, the control plane included.
    pub async fn shutdown(&self) {
        let closed = self.directory.dispose_all().await;
        if self.locator.is_isolated()
            && let Err(err) = self.control_plane.clone().close().await
        {
            warn!(error = %err, "closing control-plane pool failed");
        }
        info!(closed, "tenancy context shut down");
    }
}
