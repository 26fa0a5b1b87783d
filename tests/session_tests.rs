//! Scoped sessions: commit, rollback on error and rollback on drop.

use anyhow::Result;
use sea_orm::{ConnectionTrait, DbErr};
use tenancy::{TenancyContext, TenancyError, TenantId, session::SessionState};
use thiserror::Error;

#[path = "test_utils/mod.rs"]
mod test_utils;
use test_utils::{TestEnv, count, insert_company, setup_control_plane};

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Tenancy(#[from] TenancyError),
    #[error(transparent)]
    Db(#[from] DbErr),
    #[error("rejected by business rule")]
    Rejected,
}

const INSERT_ACCOUNT: &str =
    "INSERT INTO account (name, account_type) VALUES ('Checking', 'bank')";

async fn context(env: &TestEnv) -> Result<TenancyContext> {
    let config = env.config();
    let control_plane = setup_control_plane(&config).await?;
    insert_company(&control_plane, 1).await?;
    Ok(TenancyContext::from_parts(config, control_plane)?)
}

async fn accounts(ctx: &TenancyContext, tenant: TenantId) -> Result<i64> {
    let handle = ctx.directory().get_handle(tenant).await?;
    count(handle.connection(), "account").await
}

#[tokio::test]
async fn ok_result_commits() -> Result<()> {
    let env = TestEnv::new()?;
    let ctx = context(&env).await?;
    let tenant = TenantId(1);

    ctx.with_session::<_, (), AppError>(tenant, |txn| {
        Box::pin(async move {
            txn.execute_unprepared(INSERT_ACCOUNT).await?;
            Ok(())
        })
    })
    .await?;

    assert_eq!(accounts(&ctx, tenant).await?, 1);
    ctx.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn err_result_rolls_back() -> Result<()> {
    let env = TestEnv::new()?;
    let ctx = context(&env).await?;
    let tenant = TenantId(1);

    let result = ctx
        .with_session::<_, (), AppError>(tenant, |txn| {
            Box::pin(async move {
                txn.execute_unprepared(INSERT_ACCOUNT).await?;
                Err(AppError::Rejected)
            })
        })
        .await;

    assert!(matches!(result, Err(AppError::Rejected)));
    assert_eq!(accounts(&ctx, tenant).await?, 0);
    ctx.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn explicit_commit_persists() -> Result<()> {
    let env = TestEnv::new()?;
    let ctx = context(&env).await?;
    let tenant = TenantId(1);

    let mut session = ctx.acquire_session(tenant).await?;
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.tenant(), tenant);
    session.transaction().await?.execute_unprepared(INSERT_ACCOUNT).await?;
    assert_eq!(session.state(), SessionState::Active);
    assert_eq!(session.commit().await?, SessionState::Committed);

    assert_eq!(accounts(&ctx, tenant).await?, 1);
    ctx.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn dropped_session_rolls_back() -> Result<()> {
    let env = TestEnv::new()?;
    let ctx = context(&env).await?;
    let tenant = TenantId(1);

    {
        let mut session = ctx.acquire_session(tenant).await?;
        session.transaction().await?.execute_unprepared(INSERT_ACCOUNT).await?;
    }

    assert_eq!(accounts(&ctx, tenant).await?, 0);
    ctx.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn explicit_rollback_discards_work() -> Result<()> {
    let env = TestEnv::new()?;
    let ctx = context(&env).await?;
    let tenant = TenantId(1);

    let mut session = ctx.acquire_session(tenant).await?;
    session.transaction().await?.execute_unprepared(INSERT_ACCOUNT).await?;
    assert_eq!(session.rollback().await?, SessionState::RolledBack);

    assert_eq!(accounts(&ctx, tenant).await?, 0);
    ctx.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn idle_session_commit_is_a_noop() -> Result<()> {
    let env = TestEnv::new()?;
    let ctx = context(&env).await?;

    let session = ctx.acquire_session(TenantId(1)).await?;
    assert_eq!(session.commit().await?, SessionState::Committed);
    ctx.shutdown().await;
    Ok(())
}
