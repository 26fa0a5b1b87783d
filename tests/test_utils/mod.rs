//! Test utilities for tenancy integration tests.
//!
//! Every test gets its own temporary directory holding the control-plane
//! database, the per-tenant database files and the seed manifests.

#![allow(dead_code)]

use std::{fs, path::Path};

use anyhow::Result;
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Statement};
use tempfile::TempDir;
use tenancy::config::{AppConfig, DegradedPolicy, EmbeddedIsolation};

pub const DEFAULT_CATEGORIES: &str = r#"
categories:
  - code: HOUSING
    name: Housing
    is_expense: true
  - code: RENT
    name: Rent
    is_expense: true
    parent: HOUSING
  - code: SALARY
    name: Salary
    is_income: true
"#;

pub const PAYROLL_SPEC: &str = r#"
meta:
  code: CL-2025
  currency: CLP
  period_mode: monthly
  active_date: 2025-01-01
  comment: Chilean payroll rules
rules:
  afp_rate: 0.1
"#;

/// A temporary workspace with seed files in place.
pub struct TestEnv {
    pub dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Result<Self> {
        let dir = TempDir::new()?;
        fs::create_dir_all(dir.path().join("seed/categories"))?;
        fs::create_dir_all(dir.path().join("seed/payroll"))?;
        fs::create_dir_all(dir.path().join("data"))?;
        let env = Self { dir };
        env.write_categories("default_categories.yml", DEFAULT_CATEGORIES)?;
        env.write_payroll("cl_2025.yaml", PAYROLL_SPEC)?;
        Ok(env)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn data_dir(&self) -> std::path::PathBuf {
        self.path().join("data")
    }

    /// File-backed SQLite control plane with one database file per tenant.
    pub fn config(&self) -> AppConfig {
        AppConfig {
            database_url: format!("sqlite://{}?mode=rwc", self.data_dir().join("app.db").display()),
            db_max_connections: 1,
            db_path: self.data_dir(),
            seed_dir: self.path().join("seed"),
            embedded_isolation: EmbeddedIsolation::PerFile,
            degraded_policy: DegradedPolicy::Serve,
            ..AppConfig::default()
        }
    }

    /// Same layout, but every tenant shares the control-plane database.
    pub fn shared_config(&self) -> AppConfig {
        AppConfig {
            embedded_isolation: EmbeddedIsolation::Shared,
            ..self.config()
        }
    }

    pub fn write_categories(&self, name: &str, contents: &str) -> Result<()> {
        fs::write(self.path().join("seed/categories").join(name), contents)?;
        Ok(())
    }

    pub fn write_payroll(&self, name: &str, contents: &str) -> Result<()> {
        fs::write(self.path().join("seed/payroll").join(name), contents)?;
        Ok(())
    }

    pub fn tenant_file(&self, id: i32) -> std::path::PathBuf {
        self.data_dir().join(format!("company_{id}.db"))
    }
}

/// Connects to the control plane and applies the control-plane migrations.
pub async fn setup_control_plane(config: &AppConfig) -> Result<DatabaseConnection> {
    let db = Database::connect(&config.database_url).await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// Inserts a company row with a fixed id.
pub async fn insert_company(db: &DatabaseConnection, id: i32) -> Result<()> {
    db.execute(Statement::from_string(
        db.get_database_backend(),
        format!("INSERT INTO company (id, name) VALUES ({id}, 'Company {id}')"),
    ))
    .await?;
    Ok(())
}

/// Opens a tenant database file directly, bypassing the directory.
pub async fn open_tenant(env: &TestEnv, id: i32) -> Result<DatabaseConnection> {
    let url = format!("sqlite://{}?mode=rwc", env.tenant_file(id).display());
    Ok(Database::connect(&url).await?)
}

pub async fn count(db: &DatabaseConnection, table: &str) -> Result<i64> {
    let row = db
        .query_one(Statement::from_string(
            db.get_database_backend(),
            format!("SELECT COUNT(*) AS n FROM {table}"),
        ))
        .await?
        .ok_or_else(|| anyhow::anyhow!("count returned no row"))?;
    Ok(row.try_get("", "n")?)
}
