//! Database migrations for the tenancy service.
//!
//! The control-plane database is versioned through [`Migrator`], which records
//! applied migrations in its own ledger. Tenant databases are not migrated
//! through SeaORM's migrator: [`tenant::TenantSchema`] describes the full
//! tenant schema for create-all provisioning.

pub use sea_orm_migration::prelude::*;

mod m2024_01_01_000001_create_companies;
pub mod tenant;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(m2024_01_01_000001_create_companies::Migration)]
    }
}
