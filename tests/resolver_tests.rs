//! Tenant resolution from request attributes.

use anyhow::Result;
use regex::Regex;
use tenancy::{
    TenancyContext, TenancyError, TenantId,
    resolver::{PathTenantResolver, RequestContext, SingleTenantResolver, TenantResolver},
};

#[path = "test_utils/mod.rs"]
mod test_utils;
use test_utils::{TestEnv, insert_company, setup_control_plane};

const PATTERN: &str = r"/compan(?:y|ies)/(?P<tenant>\d+)";

async fn resolver(env: &TestEnv) -> Result<PathTenantResolver> {
    let control_plane = setup_control_plane(&env.config()).await?;
    insert_company(&control_plane, 42).await?;
    Ok(PathTenantResolver::new(Regex::new(PATTERN)?, control_plane))
}

#[tokio::test]
async fn resolves_tenant_from_path() -> Result<()> {
    let env = TestEnv::new()?;
    let resolver = resolver(&env).await?;

    let tenant = resolver
        .resolve(&RequestContext::new("/api/companies/42/expenses"))
        .await?;
    assert_eq!(tenant, TenantId(42));
    Ok(())
}

#[tokio::test]
async fn falls_back_to_company_id_parameter() -> Result<()> {
    let env = TestEnv::new()?;
    let resolver = resolver(&env).await?;

    let ctx = RequestContext::new("/api/expenses").with_param("company_id", "42");
    assert_eq!(resolver.resolve(&ctx).await?, TenantId(42));
    Ok(())
}

#[tokio::test]
async fn unknown_company_is_not_found() -> Result<()> {
    let env = TestEnv::new()?;
    let resolver = resolver(&env).await?;

    let err = resolver
        .resolve(&RequestContext::new("/api/company/7"))
        .await
        .unwrap_err();
    assert!(matches!(err, TenancyError::TenantNotFound(TenantId(7))));
    assert!(err.is_not_found());
    Ok(())
}

#[tokio::test]
async fn missing_reference_is_invalid() -> Result<()> {
    let env = TestEnv::new()?;
    let resolver = resolver(&env).await?;

    let err = resolver
        .resolve(&RequestContext::new("/health").with_param("company_id", "abc"))
        .await
        .unwrap_err();
    assert!(matches!(err, TenancyError::InvalidTenantReference(_)));
    Ok(())
}

#[tokio::test]
async fn single_tenant_resolver_ignores_request() -> Result<()> {
    let resolver = SingleTenantResolver(TenantId(1));
    let tenant = resolver
        .resolve(&RequestContext::new("/api/companies/99"))
        .await?;
    assert_eq!(tenant, TenantId(1));
    Ok(())
}

#[tokio::test]
async fn context_selects_resolver_from_config() -> Result<()> {
    let env = TestEnv::new()?;
    let mut config = env.config();
    config.single_tenant_id = Some(5);
    let control_plane = setup_control_plane(&config).await?;
    let ctx = TenancyContext::from_parts(config, control_plane)?;

    let tenant = ctx
        .resolver()?
        .resolve(&RequestContext::new("/api/companies/42"))
        .await?;
    assert_eq!(tenant, TenantId(5));
    Ok(())
}
