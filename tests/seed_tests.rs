//! Category and payroll seeding against a freshly initialized tenant database.

use anyhow::Result;
use sea_orm::{Database, DatabaseConnection};
use tenancy::{
    error::SeedError,
    provisioning::apply_schema,
    repositories::{CategoryRepository, PayrollSpecRepository},
    seeds::{CategoryManifest, SeedCatalog, seed_categories, seed_payroll_spec},
};

#[path = "test_utils/mod.rs"]
mod test_utils;
use test_utils::{TestEnv, count};

async fn tenant_db(env: &TestEnv) -> Result<DatabaseConnection> {
    let url = format!(
        "sqlite://{}?mode=rwc",
        env.data_dir().join("seed_target.db").display()
    );
    let db = Database::connect(&url).await?;
    apply_schema(&db).await?;
    Ok(db)
}

fn catalog(env: &TestEnv) -> SeedCatalog {
    SeedCatalog::from_config(&env.config())
}

#[tokio::test]
async fn reseeding_does_not_duplicate_rows() -> Result<()> {
    let env = TestEnv::new()?;
    let db = tenant_db(&env).await?;

    let first = catalog(&env).apply(&db).await?;
    assert_eq!(first.manifests, 1);
    assert_eq!(first.categories, 3);
    assert_eq!(first.payroll_specs, 1);

    catalog(&env).apply(&db).await?;
    assert_eq!(count(&db, "categories").await?, 3);
    assert_eq!(count(&db, "payroll_spec").await?, 1);
    Ok(())
}

#[tokio::test]
async fn parent_may_be_declared_after_child() -> Result<()> {
    let env = TestEnv::new()?;
    let db = tenant_db(&env).await?;
    let manifest = CategoryManifest::parse(
        &env.path().join("forward.yml"),
        r#"
- code: FUEL
  name: Fuel
  parent: TRANSPORT
- code: TRANSPORT
  name: Transport
"#,
    )?;

    let stats = seed_categories(&db, &manifest).await?;
    assert_eq!(stats.upserted, 2);
    assert_eq!(stats.parents_linked, 1);

    let repo = CategoryRepository::new(&db);
    let transport = repo.find_by_code("TRANSPORT").await?.expect("transport");
    let fuel = repo.find_by_code("FUEL").await?.expect("fuel");
    assert_eq!(fuel.parent_id, Some(transport.id));
    Ok(())
}

#[tokio::test]
async fn parent_may_come_from_an_earlier_manifest() -> Result<()> {
    let env = TestEnv::new()?;
    let db = tenant_db(&env).await?;
    catalog(&env).apply(&db).await?;

    let manifest = CategoryManifest::parse(
        &env.path().join("extra.yml"),
        "- code: UTILITIES\n  name: Utilities\n  parent: HOUSING\n",
    )?;
    seed_categories(&db, &manifest).await?;

    let repo = CategoryRepository::new(&db);
    let housing = repo.find_by_code("HOUSING").await?.expect("housing");
    let utilities = repo.find_by_code("UTILITIES").await?.expect("utilities");
    assert_eq!(utilities.parent_id, Some(housing.id));
    Ok(())
}

#[tokio::test]
async fn unresolved_parent_rolls_back_the_manifest() -> Result<()> {
    let env = TestEnv::new()?;
    let db = tenant_db(&env).await?;
    let manifest = CategoryManifest::parse(
        &env.path().join("orphan.yml"),
        "- code: OK\n  name: Fine\n- code: ORPHAN\n  name: Orphan\n  parent: GHOST\n",
    )?;

    let err = seed_categories(&db, &manifest).await.unwrap_err();
    match err {
        SeedError::UnresolvedParent { entry, parent, .. } => {
            assert_eq!(entry, "ORPHAN");
            assert_eq!(parent, "GHOST");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(count(&db, "categories").await?, 0);
    Ok(())
}

#[tokio::test]
async fn parent_cycle_is_rejected_before_writing() -> Result<()> {
    let env = TestEnv::new()?;
    env.write_categories(
        "cycle.yml",
        "- {code: A, name: A, parent: B}\n- {code: B, name: B, parent: A}\n",
    )?;
    let db = tenant_db(&env).await?;

    let err = catalog(&env).apply(&db).await.unwrap_err();
    assert!(matches!(err, SeedError::ParentCycle { .. }), "{err}");
    // cycle.yml sorts before default_categories.yml, so nothing was written.
    assert_eq!(count(&db, "categories").await?, 0);
    Ok(())
}

#[tokio::test]
async fn template_manifest_is_skipped() -> Result<()> {
    let env = TestEnv::new()?;
    env.write_categories("template.yml", "- name: ''\n")?;
    let db = tenant_db(&env).await?;

    let summary = catalog(&env).apply(&db).await?;
    assert_eq!(summary.manifests, 1);
    Ok(())
}

#[tokio::test]
async fn legacy_uncoded_row_is_adopted_by_name() -> Result<()> {
    let env = TestEnv::new()?;
    let db = tenant_db(&env).await?;
    sea_orm::ConnectionTrait::execute_unprepared(
        &db,
        "INSERT INTO categories (name, is_expense) VALUES ('Housing', 1)",
    )
    .await?;

    catalog(&env).apply(&db).await?;

    assert_eq!(count(&db, "categories").await?, 3);
    let housing = CategoryRepository::new(&db)
        .find_by_code("HOUSING")
        .await?
        .expect("legacy row adopted");
    assert_eq!(housing.name, "Housing");
    Ok(())
}

#[tokio::test]
async fn payroll_spec_is_updated_in_place() -> Result<()> {
    let env = TestEnv::new()?;
    let db = tenant_db(&env).await?;
    let path = env.path().join("seed/payroll/cl_2025.yaml");
    seed_payroll_spec(&db, &path).await?;

    env.write_payroll(
        "cl_2025.yaml",
        "meta:\n  code: CL-2025\n  currency: CLP\n  active_date: 2025-01-01\n  comment: revised\n",
    )?;
    seed_payroll_spec(&db, &path).await?;

    let repo = PayrollSpecRepository::new(&db);
    assert_eq!(repo.list_all().await?.len(), 1);
    let spec = repo.find("CL", 2025).await?.expect("spec");
    assert_eq!(spec.comment.as_deref(), Some("revised"));
    assert!(spec.spec_yaml.contains("revised"));
    Ok(())
}

#[tokio::test]
async fn payroll_spec_without_code_is_invalid() -> Result<()> {
    let env = TestEnv::new()?;
    env.write_payroll("bad.yaml", "meta:\n  currency: USD\n")?;
    let db = tenant_db(&env).await?;

    let err = seed_payroll_spec(&db, &env.path().join("seed/payroll/bad.yaml"))
        .await
        .unwrap_err();
    assert!(matches!(err, SeedError::InvalidManifest { .. }));
    Ok(())
}
