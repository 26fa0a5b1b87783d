//! End-to-end wiring through `TenancyContext`.

use anyhow::Result;
use tenancy::{
    TenancyContext, TenantId, TenantState,
    orchestrator::TenantOutcome,
    repositories::CompanyRepository,
};

#[path = "test_utils/mod.rs"]
mod test_utils;
use test_utils::{TestEnv, count};

#[tokio::test]
async fn boot_migrates_and_serves_new_companies() -> Result<()> {
    let env = TestEnv::new()?;
    let (ctx, report) = TenancyContext::boot(env.config()).await?;
    assert!(report.tenants.is_empty());

    let company = CompanyRepository::new(ctx.control_plane())
        .create("Acme", Some("Acme SpA"))
        .await?;
    let tenant = TenantId(company.id);

    assert_eq!(ctx.company_created(tenant).await, TenantState::Ready);
    assert!(env.tenant_file(company.id).exists());

    let handle = ctx.directory().get_handle(tenant).await?;
    assert_eq!(count(handle.connection(), "categories").await?, 3);

    let report = ctx.migrate().await?;
    let entry = report.for_tenant(tenant).expect("tenant in report");
    assert_eq!(entry.outcome, TenantOutcome::Migrated);

    ctx.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn failed_seeding_leaves_company_degraded() -> Result<()> {
    let env = TestEnv::new()?;
    env.write_categories("broken.yml", "- code: X\n  name: X\n  parent: NOWHERE\n")?;
    let ctx = TenancyContext::connect(env.config()).await?;
    ctx.migrate().await?;

    let company = CompanyRepository::new(ctx.control_plane())
        .create("Broken", None)
        .await?;

    assert_eq!(
        ctx.company_created(TenantId(company.id)).await,
        TenantState::Degraded
    );
    ctx.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn shared_layout_serves_every_tenant_from_the_control_plane() -> Result<()> {
    let env = TestEnv::new()?;
    let (ctx, report) = TenancyContext::boot(env.shared_config()).await?;
    assert_eq!(report.tenants.len(), 1);
    assert_eq!(report.tenants[0].outcome, TenantOutcome::Migrated);

    assert_eq!(ctx.company_created(TenantId(1)).await, TenantState::Ready);
    assert!(!env.tenant_file(1).exists());
    assert_eq!(count(ctx.control_plane(), "categories").await?, 3);

    ctx.shutdown().await;
    Ok(())
}
