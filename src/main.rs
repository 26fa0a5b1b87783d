//! # Tenancy maintenance CLI
//!
//! Runs the boot migration and per-tenant maintenance against the configured
//! control plane.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tenancy::{
    TenancyContext, TenantId,
    config::ConfigLoader,
    db,
    provisioning::Provision,
    repositories::CompanyRepository,
    telemetry,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Tenant provisioning and migration tooling.")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Migrate the control plane and every tenant database, printing the report.
    Migrate {
        /// Exit non-zero when any tenant did not migrate cleanly.
        #[arg(long)]
        strict: bool,
    },
    /// Create and initialize one tenant's database.
    Provision { tenant: TenantId },
    /// Re-apply reference data to one tenant's database.
    Seed { tenant: TenantId },
    /// Print where a tenant's data lives.
    Locate { tenant: TenantId },
    /// Check control-plane connectivity.
    Check,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = ConfigLoader::new().load().context("loading configuration")?;
    telemetry::init_tracing(&config).context("initializing tracing")?;
    tracing::debug!(config = %config.redacted_json().unwrap_or_default(), "configuration loaded");

    let context = TenancyContext::connect(config)
        .await
        .context("connecting to the control plane")?;
    let code = run(&context, cli.command).await;
    context.shutdown().await;
    code
}

async fn run(context: &TenancyContext, command: Command) -> Result<ExitCode> {
    match command {
        Command::Migrate { strict } => {
            let report = context.migrate().await.context("migrating control plane")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if strict && !report.is_clean() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Provision { tenant } => {
            ensure_company(context, tenant).await?;
            let provisioned = context.provisioner().ensure(tenant).await;
            println!(
                "tenant {} -> {} ({})",
                tenant,
                provisioned.database.identifier,
                provisioned.state()
            );
            if let Some(failure) = provisioned.failure {
                eprintln!("provisioning failed: {failure}");
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Seed { tenant } => {
            ensure_company(context, tenant).await?;
            let handle = context
                .directory()
                .get_handle(tenant)
                .await
                .with_context(|| format!("opening database for tenant {tenant}"))?;
            let summary = context
                .provisioner()
                .seed(handle.connection())
                .await
                .with_context(|| format!("seeding tenant {tenant}"))?;
            println!(
                "tenant {}: {} manifests, {} categories, {} payroll specs",
                tenant, summary.manifests, summary.categories, summary.payroll_specs
            );
        }
        Command::Locate { tenant } => {
            let database = if context.locator().is_isolated() {
                context.locator().physical(tenant)
            } else {
                context.locator().shared()
            };
            println!("{}", serde_json::to_string_pretty(&database)?);
        }
        Command::Check => {
            db::health_check(context.control_plane())
                .await
                .context("control plane health check")?;
            let companies = CompanyRepository::new(context.control_plane())
                .list_ids()
                .await
                .context("listing companies")?;
            println!(
                "control plane reachable ({:?} backend), {} companies",
                context.locator().backend(),
                companies.len()
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn ensure_company(context: &TenancyContext, tenant: TenantId) -> Result<()> {
    let exists = CompanyRepository::new(context.control_plane())
        .exists(tenant)
        .await
        .context("looking up company")?;
    anyhow::ensure!(exists, "company {tenant} does not exist");
    Ok(())
}
