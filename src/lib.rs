//! # Tenancy
//!
//! Tenant resolution, per-tenant database provisioning and routing, and the
//! boot-time migration orchestrator for a database-per-company service.

pub mod config;
pub mod context;
pub mod db;
pub mod directory;
pub mod error;
pub mod locator;
pub mod models;
pub mod orchestrator;
pub mod provisioning;
pub mod repositories;
pub mod resolver;
pub mod seeds;
pub mod session;
pub mod telemetry;
pub mod tenant;
pub use migration;

pub use context::TenancyContext;
pub use error::TenancyError;
pub use tenant::{TenantId, TenantState};
