//! Reference-data seeding for tenant databases.
//!
//! Every newly provisioned tenant receives the category manifests under
//! `{seed_dir}/categories` and the payroll specifications under
//! `{seed_dir}/payroll`. Re-running a seed is a no-op apart from refreshing
//! values that changed in the files.

pub mod categories;
pub mod manifest;
pub mod payroll;

use std::path::PathBuf;

use sea_orm::DatabaseConnection;
use tracing::debug;

use crate::config::AppConfig;
use crate::error::SeedError;

pub use categories::{CategorySeedStats, seed_categories};
pub use manifest::{CategoryEntry, CategoryManifest, find_parent_cycle, manifest_files};
pub use payroll::{PayrollSpecDocument, parse_payroll_spec, seed_payroll_spec};

/// Totals for one full seeding run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub manifests: usize,
    pub categories: usize,
    pub payroll_specs: usize,
}

/// Where seed files are read from.
#[derive(Debug, Clone)]
pub struct SeedCatalog {
    pub category_dir: PathBuf,
    pub payroll_dir: PathBuf,
    /// Seed only this document instead of scanning `payroll_dir`.
    pub default_payroll_spec: Option<PathBuf>,
}

impl SeedCatalog {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            category_dir: cfg.category_seed_dir(),
            payroll_dir: cfg.payroll_seed_dir(),
            default_payroll_spec: cfg.default_payroll_spec.clone(),
        }
    }

    /// Payroll documents that will be seeded.
    pub fn payroll_files(&self) -> Result<Vec<PathBuf>, SeedError> {
        match &self.default_payroll_spec {
            Some(path) => Ok(vec![path.clone()]),
            None => manifest_files(&self.payroll_dir),
        }
    }

    /// Applies every manifest and payroll document, stopping at the first
    /// failure. Each category manifest commits on its own.
    pub async fn apply(&self, db: &DatabaseConnection) -> Result<SeedSummary, SeedError> {
        let mut summary = SeedSummary::default();

        for path in manifest_files(&self.category_dir)? {
            let manifest = CategoryManifest::load(&path)?;
            let stats = seed_categories(db, &manifest).await?;
            summary.manifests += 1;
            summary.categories += stats.upserted;
        }

        for path in self.payroll_files()? {
            seed_payroll_spec(db, &path).await?;
            summary.payroll_specs += 1;
        }

        debug!(?summary, "seed catalog applied");
        Ok(summary)
    }
}
