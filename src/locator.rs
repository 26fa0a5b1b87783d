//! Physical database naming.
//!
//! Every tenant maps to exactly one physical database, derived purely from the
//! tenant id and the configured control-plane connection string.

use std::path::{Path, PathBuf};

use serde::Serialize;
use url::Url;

use crate::config::{AppConfig, ConfigError, EmbeddedIsolation};
use crate::tenant::TenantId;

/// Which family of database engine backs the deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// File-based engine (SQLite).
    Embedded,
    /// Client/server engine (Postgres).
    Server,
}

/// Where a tenant's data physically lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhysicalDatabase {
    /// Database name on server backends, file path on embedded backends.
    pub identifier: String,
    #[serde(skip)]
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseLocator {
    backend: BackendKind,
    base: Url,
    base_name: String,
    db_path: PathBuf,
    isolation: EmbeddedIsolation,
}

impl DatabaseLocator {
    pub fn from_config(cfg: &AppConfig) -> Result<Self, ConfigError> {
        let base = Url::parse(&cfg.database_url).map_err(|source| {
            ConfigError::InvalidDatabaseUrl {
                value: cfg.database_url.clone(),
                source,
            }
        })?;

        let backend = match base.scheme() {
            "sqlite" => BackendKind::Embedded,
            "postgres" | "postgresql" => BackendKind::Server,
            _ => {
                return Err(ConfigError::UnsupportedDatabaseUrl {
                    value: cfg.database_url.clone(),
                });
            }
        };

        let base_name = base
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|segment| !segment.is_empty())
            .unwrap_or("app")
            .to_string();

        Ok(Self {
            backend,
            base,
            base_name,
            db_path: cfg.db_path.clone(),
            isolation: cfg.embedded_isolation,
        })
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    /// True when every tenant gets its own physical database.
    pub fn is_isolated(&self) -> bool {
        match self.backend {
            BackendKind::Server => true,
            BackendKind::Embedded => self.isolation == EmbeddedIsolation::PerFile,
        }
    }

    /// The shared database used when tenants are not isolated.
    pub fn shared(&self) -> PhysicalDatabase {
        PhysicalDatabase {
            identifier: self.base_name.clone(),
            url: self.base.to_string(),
        }
    }

    /// Derives the tenant's physical database. Pure: the same id always yields
    /// the same result.
    pub fn physical(&self, tenant: TenantId) -> PhysicalDatabase {
        match self.backend {
            BackendKind::Server => {
                let name = format!("{}_company_{}", self.base_name, tenant);
                let mut url = self.base.clone();
                url.set_path(&format!("/{name}"));
                PhysicalDatabase {
                    identifier: name,
                    url: url.to_string(),
                }
            }
            BackendKind::Embedded => {
                let path = self.tenant_file(tenant);
                PhysicalDatabase {
                    identifier: path.display().to_string(),
                    url: sqlite_url(&path),
                }
            }
        }
    }

    /// Path of the tenant's database file on embedded backends.
    pub fn tenant_file(&self, tenant: TenantId) -> PathBuf {
        self.db_path.join(format!("company_{tenant}.db"))
    }

    /// Maintenance URL for issuing `CREATE DATABASE` on server backends.
    pub fn admin_url(&self) -> String {
        let mut url = self.base.clone();
        url.set_path("/postgres");
        url.set_query(None);
        url.to_string()
    }
}

fn sqlite_url(path: &Path) -> String {
    format!("sqlite://{}?mode=rwc", path.display())
}
