//! Smoke tests for the `tenancy` maintenance binary.

use std::process::{Command, Output};

use anyhow::Result;
use serde_json::Value;

#[path = "test_utils/mod.rs"]
mod test_utils;
use test_utils::{TestEnv, insert_company, setup_control_plane};

fn run_cli(env: &TestEnv, args: &[&str]) -> Result<Output> {
    let config = env.config();
    let bin_path = assert_cmd::cargo::cargo_bin!("tenancy");
    Ok(Command::new(bin_path)
        .args(args)
        .current_dir(env.path())
        .env("TENANCY_DATABASE_URL", &config.database_url)
        .env("TENANCY_DB_PATH", &config.db_path)
        .env("TENANCY_SEED_DIR", &config.seed_dir)
        .env("TENANCY_EMBEDDED_ISOLATION", "per_file")
        .env("TENANCY_LOG_LEVEL", "warn")
        .output()?)
}

#[tokio::test]
async fn migrate_prints_a_report() -> Result<()> {
    let env = TestEnv::new()?;
    let control_plane = setup_control_plane(&env.config()).await?;
    insert_company(&control_plane, 3).await?;
    control_plane.close().await?;

    let output = run_cli(&env, &["migrate", "--strict"])?;
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );

    let report: Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(report["tenants"][0]["target"]["tenant"], 3);
    assert_eq!(report["tenants"][0]["outcome"], "migrated");
    assert!(env.tenant_file(3).exists());
    Ok(())
}

#[tokio::test]
async fn locate_prints_the_tenant_file() -> Result<()> {
    let env = TestEnv::new()?;

    let output = run_cli(&env, &["locate", "7"])?;
    assert!(output.status.success());
    let database: Value = serde_json::from_slice(&output.stdout)?;
    let identifier = database["identifier"].as_str().unwrap_or_default();
    assert!(identifier.ends_with("company_7.db"), "{identifier}");
    Ok(())
}

#[tokio::test]
async fn provision_rejects_unknown_company() -> Result<()> {
    let env = TestEnv::new()?;
    let control_plane = setup_control_plane(&env.config()).await?;
    control_plane.close().await?;

    let output = run_cli(&env, &["provision", "99"])?;
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("company 99 does not exist"));
    assert!(!env.tenant_file(99).exists());
    Ok(())
}
