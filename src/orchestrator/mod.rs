//! Boot-time and on-demand schema migration across all tenants.
//!
//! The control plane is migrated first with the versioned `Migrator`; that is
//! the only failure that aborts a run. Every tenant is then provisioned and
//! upgraded through the step pipeline, with failures isolated per tenant and
//! per step and collected into a [`MigrationReport`].

pub mod ledger;
pub mod steps;

use std::sync::Arc;

use metrics::counter;
use migration::{Migrator, MigratorTrait};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::db::{self, PoolSettings};
use crate::error::{MigrationStepError, TenancyError};
use crate::locator::DatabaseLocator;
use crate::provisioning::{Provision, ProvisioningService};
use crate::repositories::CompanyRepository;
use crate::tenant::TenantId;

pub use steps::{MigrationStep, StepStatus, default_pipeline};

/// What a report entry was run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationTarget {
    /// The single database every tenant shares.
    Shared,
    Tenant(TenantId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum StepResult {
    Applied,
    AlreadyPresent,
    NotApplicable,
    /// Already recorded in the tenant's ledger.
    Skipped,
    Failed { cause: String },
}

impl From<StepStatus> for StepResult {
    fn from(status: StepStatus) -> Self {
        match status {
            StepStatus::Applied => Self::Applied,
            StepStatus::AlreadyPresent => Self::AlreadyPresent,
            StepStatus::NotApplicable => Self::NotApplicable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    pub step: &'static str,
    #[serde(flatten)]
    pub result: StepResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TenantOutcome {
    Migrated,
    /// The pipeline ran but provisioning still reports a failure.
    Degraded,
    Failed { cause: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct TenantReport {
    pub target: MigrationTarget,
    pub database: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provisioning_failure: Option<String>,
    pub steps: Vec<StepOutcome>,
    #[serde(flatten)]
    pub outcome: TenantOutcome,
}

impl TenantReport {
    pub fn step(&self, id: &str) -> Option<&StepResult> {
        self.steps
            .iter()
            .find(|outcome| outcome.step == id)
            .map(|outcome| &outcome.result)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationReport {
    pub tenants: Vec<TenantReport>,
}

impl MigrationReport {
    /// Targets whose migration did not complete cleanly.
    pub fn failed_targets(&self) -> Vec<MigrationTarget> {
        self.tenants
            .iter()
            .filter(|report| report.outcome != TenantOutcome::Migrated)
            .map(|report| report.target)
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.failed_targets().is_empty()
    }

    pub fn for_tenant(&self, tenant: TenantId) -> Option<&TenantReport> {
        self.tenants
            .iter()
            .find(|report| report.target == MigrationTarget::Tenant(tenant))
    }
}

pub struct MigrationOrchestrator {
    control_plane: DatabaseConnection,
    locator: DatabaseLocator,
    provisioner: Arc<ProvisioningService>,
    pool: PoolSettings,
    steps: Vec<Box<dyn MigrationStep>>,
}

impl MigrationOrchestrator {
    pub fn new(
        control_plane: DatabaseConnection,
        locator: DatabaseLocator,
        provisioner: Arc<ProvisioningService>,
        pool: PoolSettings,
    ) -> Self {
        Self {
            control_plane,
            locator,
            provisioner,
            pool,
            steps: default_pipeline(),
        }
    }

    /// Replaces the step pipeline.
    pub fn with_steps(mut self, steps: Vec<Box<dyn MigrationStep>>) -> Self {
        self.steps = steps;
        self
    }

    /// Migrates the control plane, then every tenant. Only a control-plane
    /// failure is returned as an error.
    #[instrument(skip_all)]
    pub async fn run(&self) -> Result<MigrationReport, TenancyError> {
        Migrator::up(&self.control_plane, None)
            .await
            .map_err(TenancyError::ControlPlane)?;
        info!("control-plane schema up to date");

        let mut report = MigrationReport::default();

        if !self.locator.is_isolated() {
            report.tenants.push(self.migrate_shared().await);
        } else {
            let tenants = CompanyRepository::new(&self.control_plane)
                .list_ids()
                .await
                .map_err(TenancyError::ControlPlane)?;
            for tenant in tenants {
                report.tenants.push(self.migrate_tenant(tenant).await);
            }
        }

        let failed = report.failed_targets().len();
        if failed > 0 {
            warn!(
                targets = report.tenants.len(),
                failed, "migration finished with failures"
            );
        } else {
            info!(targets = report.tenants.len(), "migration finished");
        }
        Ok(report)
    }

    /// Provisions and upgrades one tenant database.
    #[instrument(skip_all, fields(tenant_id = %tenant))]
    pub async fn migrate_tenant(&self, tenant: TenantId) -> TenantReport {
        let provisioned = self.provisioner.ensure(tenant).await;
        let database = provisioned.database;
        let mut provisioning_failure = provisioned.failure;

        let conn = match db::connect(&database.url, self.pool).await {
            Ok(conn) => conn,
            Err(err) => {
                error!(
                    tenant_id = %tenant,
                    database = %database.identifier,
                    error = %err,
                    "cannot connect to tenant database; skipping"
                );
                counter!("tenancy_migration_tenants_total", "outcome" => "failed").increment(1);
                return TenantReport {
                    target: MigrationTarget::Tenant(tenant),
                    database: database.identifier,
                    provisioning_failure: provisioning_failure.map(|err| err.to_string()),
                    steps: Vec::new(),
                    outcome: TenantOutcome::Failed {
                        cause: TenancyError::from_tenant_db(tenant, err).to_string(),
                    },
                };
            }
        };

        let target = MigrationTarget::Tenant(tenant);
        let steps = self.run_pipeline(&conn, target).await;
        if let Err(err) = conn.close().await {
            warn!(tenant_id = %tenant, error = %err, "closing tenant connection failed");
        }

        // Databases from older releases can fail create-all or seeding until
        // the pipeline has upgraded them, so provisioning gets a second try.
        if provisioning_failure.is_some() && steps.iter().all(|s| !is_failed(&s.result)) {
            match self.provisioner.try_ensure(tenant).await {
                Ok(_) => {
                    info!(tenant_id = %tenant, "tenant recovered after upgrade");
                    provisioning_failure = None;
                }
                Err(err) => provisioning_failure = Some(err),
            }
        }

        let report = finish(
            target,
            database.identifier,
            provisioning_failure.map(|err| err.to_string()),
            steps,
        );
        record_outcome(&report.outcome);
        report
    }

    async fn migrate_shared(&self) -> TenantReport {
        let database = self.locator.shared();
        let mut provisioning_failure = self.initialize_shared().await;

        let steps = self
            .run_pipeline(&self.control_plane, MigrationTarget::Shared)
            .await;
        if provisioning_failure.is_some() && steps.iter().all(|s| !is_failed(&s.result)) {
            provisioning_failure = self.initialize_shared().await;
        }
        let report = finish(
            MigrationTarget::Shared,
            database.identifier,
            provisioning_failure,
            steps,
        );
        record_outcome(&report.outcome);
        report
    }

    async fn initialize_shared(&self) -> Option<String> {
        match self.provisioner.initialize(&self.control_plane).await {
            Ok(_) => None,
            Err(err) => {
                error!(error = %err, "initializing shared tenant schema failed");
                Some(err.to_string())
            }
        }
    }

    /// Runs every step in order. A failed step is logged and left out of the
    /// ledger; later steps still run.
    async fn run_pipeline(
        &self,
        conn: &DatabaseConnection,
        target: MigrationTarget,
    ) -> Vec<StepOutcome> {
        let label = target_label(target);

        if let Err(err) = ledger::ensure(conn).await {
            error!(migration_target = %label, error = %err, "cannot create schema ledger");
            return self
                .steps
                .iter()
                .map(|step| StepOutcome {
                    step: step.id(),
                    result: StepResult::Failed {
                        cause: err.to_string(),
                    },
                })
                .collect();
        }

        let mut outcomes = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            let result = match run_step(conn, step.as_ref()).await {
                Ok(result) => result,
                Err(source) => {
                    let err = MigrationStepError {
                        step: step.id(),
                        target: label.clone(),
                        source,
                    };
                    error!(
                        migration_target = %label,
                        step = step.id(),
                        error = %err,
                        "migration step failed"
                    );
                    counter!("tenancy_migration_step_failures_total", "step" => step.id())
                        .increment(1);
                    StepResult::Failed {
                        cause: err.to_string(),
                    }
                }
            };
            outcomes.push(StepOutcome {
                step: step.id(),
                result,
            });
        }
        outcomes
    }
}

async fn run_step(
    conn: &DatabaseConnection,
    step: &dyn MigrationStep,
) -> Result<StepResult, sea_orm::DbErr> {
    if ledger::is_recorded(conn, step.id()).await? {
        return Ok(StepResult::Skipped);
    }
    let status = step.apply(conn).await?;
    ledger::record(conn, step.id()).await?;
    if status == StepStatus::Applied {
        info!(step = step.id(), description = step.description(), "migration step applied");
    }
    Ok(status.into())
}

fn finish(
    target: MigrationTarget,
    database: String,
    provisioning_failure: Option<String>,
    steps: Vec<StepOutcome>,
) -> TenantReport {
    let first_failure = steps.iter().find_map(|outcome| match &outcome.result {
        StepResult::Failed { cause } => Some(cause.clone()),
        _ => None,
    });
    let outcome = match (first_failure, &provisioning_failure) {
        (Some(cause), _) => TenantOutcome::Failed { cause },
        (None, Some(_)) => TenantOutcome::Degraded,
        (None, None) => TenantOutcome::Migrated,
    };
    TenantReport {
        target,
        database,
        provisioning_failure,
        steps,
        outcome,
    }
}

fn is_failed(result: &StepResult) -> bool {
    matches!(result, StepResult::Failed { .. })
}

fn record_outcome(outcome: &TenantOutcome) {
    let label = match outcome {
        TenantOutcome::Migrated => "migrated",
        TenantOutcome::Degraded => "degraded",
        TenantOutcome::Failed { .. } => "failed",
    };
    counter!("tenancy_migration_tenants_total", "outcome" => label).increment(1);
}

fn target_label(target: MigrationTarget) -> String {
    match target {
        MigrationTarget::Shared => "shared".to_string(),
        MigrationTarget::Tenant(tenant) => format!("tenant {tenant}"),
    }
}
