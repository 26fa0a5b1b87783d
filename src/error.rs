//! # Error Handling
//!
//! Error types shared by the resolver, directory, provisioning service and
//! migration orchestrator.

use std::{fmt, path::PathBuf};

use sea_orm::{DbErr, RuntimeErr};
use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;
use crate::tenant::TenantId;

/// Top-level error for tenancy operations.
#[derive(Debug, Error)]
pub enum TenancyError {
    #[error("tenant {0} not found in the control-plane directory")]
    TenantNotFound(TenantId),
    #[error("no tenant reference in request: {0}")]
    InvalidTenantReference(String),
    #[error("tenant {0} is degraded and the directory is configured to reject it")]
    TenantUnavailable(TenantId),
    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),
    #[error(transparent)]
    MigrationStep(#[from] MigrationStepError),
    #[error("control-plane migration failed: {0}")]
    ControlPlane(#[source] DbErr),
    #[error("cannot reach database for tenant {tenant_id}: {source}")]
    Connectivity {
        tenant_id: TenantId,
        #[source]
        source: DbErr,
    },
    #[error("database error: {0}")]
    Database(#[from] DbErr),
    #[error(transparent)]
    Seed(#[from] SeedError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl TenancyError {
    /// Wraps a tenant-scoped database error, separating "unreachable" from
    /// "statement failed".
    pub fn from_tenant_db(tenant_id: TenantId, err: DbErr) -> Self {
        if crate::db::is_connectivity_error(&err) {
            Self::Connectivity {
                tenant_id,
                source: err,
            }
        } else {
            Self::Database(err)
        }
    }

    /// True for errors a caller should surface as "not found".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::TenantNotFound(_) | Self::InvalidTenantReference(_)
        )
    }
}

/// The provisioning stage at which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningStage {
    CreateDatabase,
    Connect,
    ApplySchema,
    SeedReferenceData,
}

impl fmt::Display for ProvisioningStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::CreateDatabase => "create database",
            Self::Connect => "connect",
            Self::ApplySchema => "apply schema",
            Self::SeedReferenceData => "seed reference data",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum ProvisioningCause {
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error(transparent)]
    Seed(#[from] SeedError),
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
#[error("provisioning tenant {tenant_id} failed during {stage}: {source}")]
pub struct ProvisioningError {
    pub tenant_id: TenantId,
    pub stage: ProvisioningStage,
    #[source]
    pub source: ProvisioningCause,
}

impl ProvisioningError {
    pub fn new(
        tenant_id: TenantId,
        stage: ProvisioningStage,
        source: impl Into<ProvisioningCause>,
    ) -> Self {
        Self {
            tenant_id,
            stage,
            source: source.into(),
        }
    }
}

#[derive(Debug, Error)]
#[error("migration step '{step}' failed on {target}: {source}")]
pub struct MigrationStepError {
    pub step: &'static str,
    pub target: String,
    #[source]
    pub source: DbErr,
}

/// Failures while loading or applying seed manifests.
#[derive(Debug, Error)]
pub enum SeedError {
    #[error("failed to read seed file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse seed file {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid seed manifest {path}: {message}")]
    InvalidManifest { path: PathBuf, message: String },
    #[error("category '{entry}' in {manifest} references unknown parent '{parent}'")]
    UnresolvedParent {
        manifest: PathBuf,
        entry: String,
        parent: String,
    },
    #[error("categories in {manifest} form a parent cycle: {}", codes.join(" -> "))]
    ParentCycle { manifest: PathBuf, codes: Vec<String> },
    #[error("database error while seeding: {0}")]
    Database(#[from] DbErr),
}

/// True when the error carries the given SQLSTATE (or engine-specific) code.
pub fn has_error_code(error: &DbErr, expected: &str) -> bool {
    let runtime_err = match error {
        DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | DbErr::Exec(RuntimeErr::SqlxError(sqlx_err))
        | DbErr::Conn(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    runtime_err
        .as_database_error()
        .and_then(|db_error| db_error.code())
        .is_some_and(|code| code.as_ref() == expected)
}

/// Postgres `duplicate_database`, raised when two creators race.
pub const PG_DUPLICATE_DATABASE: &str = "42P04";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connectivity_errors_are_separated() {
        let err = TenancyError::from_tenant_db(
            TenantId(3),
            DbErr::Conn(RuntimeErr::Internal("refused".into())),
        );
        assert!(matches!(err, TenancyError::Connectivity { tenant_id, .. } if tenant_id == TenantId(3)));

        let err = TenancyError::from_tenant_db(TenantId(3), DbErr::Custom("bad sql".into()));
        assert!(matches!(err, TenancyError::Database(_)));
    }

    #[test]
    fn resolution_errors_surface_as_not_found() {
        assert!(TenancyError::TenantNotFound(TenantId(1)).is_not_found());
        assert!(TenancyError::InvalidTenantReference("/health".into()).is_not_found());
        assert!(!TenancyError::TenantUnavailable(TenantId(1)).is_not_found());
    }

    #[test]
    fn cycle_message_lists_codes() {
        let err = SeedError::ParentCycle {
            manifest: PathBuf::from("categories.yml"),
            codes: vec!["A".into(), "B".into(), "A".into()],
        };
        assert!(err.to_string().contains("A -> B -> A"));
    }

    #[test]
    fn non_sqlx_errors_have_no_code() {
        assert!(!has_error_code(
            &DbErr::Custom("x".into()),
            PG_DUPLICATE_DATABASE
        ));
    }
}
