//! The tenant schema upgrade pipeline.
//!
//! Each step brings databases created by older releases up to the current
//! create-all schema. Steps introspect the live schema, so applying one to a
//! database that already has the change reports `AlreadyPresent`.

use async_trait::async_trait;
use migration::{
    SchemaManager,
    tenant::{PAYROLL_SPEC_UNIQUE_INDEX, TENANT_TABLES, TenantSchema},
};
use sea_orm::{
    ConnectionTrait, DatabaseBackend, DatabaseConnection, DbErr, Statement, TransactionTrait,
    sea_query::{Alias, ColumnDef, Expr, Query, Table},
};
use serde::Serialize;
use tracing::{debug, info};

use crate::seeds::PayrollSpecDocument;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Applied,
    AlreadyPresent,
    /// The step's subject does not exist in this database.
    NotApplicable,
}

/// One idempotent schema upgrade.
#[async_trait]
pub trait MigrationStep: Send + Sync {
    /// Stable identifier recorded in the tenant's schema ledger.
    fn id(&self) -> &'static str;

    fn description(&self) -> &'static str;

    async fn apply(&self, db: &DatabaseConnection) -> Result<StepStatus, DbErr>;
}

/// Every step, in the order they must run.
pub fn default_pipeline() -> Vec<Box<dyn MigrationStep>> {
    vec![
        Box::new(AccountOpeningBalance),
        Box::new(EmployeePayrollTaxDeductions),
        Box::new(TenantTimestamps),
        Box::new(CategoriesTable),
        Box::new(CategoryCode),
        Box::new(PayrollSpecColumns),
        Box::new(PayrollSpecUnique),
        Box::new(PayrollSpecDropName),
    ]
}

pub struct AccountOpeningBalance;

#[async_trait]
impl MigrationStep for AccountOpeningBalance {
    fn id(&self) -> &'static str {
        "account_opening_balance"
    }

    fn description(&self) -> &'static str {
        "add account.opening_balance with a 0.0 default"
    }

    async fn apply(&self, db: &DatabaseConnection) -> Result<StepStatus, DbErr> {
        add_column_if_missing(
            db,
            "account",
            ColumnDef::new(Alias::new("opening_balance"))
                .double()
                .not_null()
                .default(0.0)
                .to_owned(),
        )
        .await
    }
}

pub struct EmployeePayrollTaxDeductions;

#[async_trait]
impl MigrationStep for EmployeePayrollTaxDeductions {
    fn id(&self) -> &'static str {
        "employee_payroll_tax_deductions"
    }

    fn description(&self) -> &'static str {
        "add the nullable employee.payroll_tax_deductions JSON column"
    }

    async fn apply(&self, db: &DatabaseConnection) -> Result<StepStatus, DbErr> {
        add_column_if_missing(
            db,
            "employee",
            ColumnDef::new(Alias::new("payroll_tax_deductions"))
                .json()
                .null()
                .to_owned(),
        )
        .await
    }
}

pub struct TenantTimestamps;

#[async_trait]
impl MigrationStep for TenantTimestamps {
    fn id(&self) -> &'static str {
        "tenant_timestamps"
    }

    fn description(&self) -> &'static str {
        "add created_at/updated_at to every tenant table and backfill created_at"
    }

    async fn apply(&self, db: &DatabaseConnection) -> Result<StepStatus, DbErr> {
        let manager = SchemaManager::new(db);
        let mut changed = false;

        for table in TENANT_TABLES {
            if !manager.has_table(*table).await? {
                continue;
            }

            // SQLite rejects non-constant defaults in ADD COLUMN, so the
            // column is added bare and backfilled.
            if !manager.has_column(*table, "created_at").await? {
                manager
                    .alter_table(
                        Table::alter()
                            .table(Alias::new(*table))
                            .add_column(
                                ColumnDef::new(Alias::new("created_at"))
                                    .timestamp_with_time_zone()
                                    .null(),
                            )
                            .to_owned(),
                    )
                    .await?;
                let backfill = Query::update()
                    .table(Alias::new(*table))
                    .value(Alias::new("created_at"), Expr::current_timestamp())
                    .and_where(Expr::col(Alias::new("created_at")).is_null())
                    .to_owned();
                db.execute(db.get_database_backend().build(&backfill))
                    .await?;
                changed = true;
            }

            if !manager.has_column(*table, "updated_at").await? {
                manager
                    .alter_table(
                        Table::alter()
                            .table(Alias::new(*table))
                            .add_column(
                                ColumnDef::new(Alias::new("updated_at"))
                                    .timestamp_with_time_zone()
                                    .null(),
                            )
                            .to_owned(),
                    )
                    .await?;
                changed = true;
            }
        }

        Ok(applied_if(changed))
    }
}

pub struct CategoriesTable;

#[async_trait]
impl MigrationStep for CategoriesTable {
    fn id(&self) -> &'static str {
        "categories_table"
    }

    fn description(&self) -> &'static str {
        "create categories and copy rows from the legacy expense_category table"
    }

    async fn apply(&self, db: &DatabaseConnection) -> Result<StepStatus, DbErr> {
        let manager = SchemaManager::new(db);
        let mut changed = false;

        if !manager.has_table("categories").await? {
            manager
                .create_table(TenantSchema::categories_table())
                .await?;
            changed = true;
        }

        if manager.has_table("expense_category").await? {
            let copied = db
                .execute_unprepared(
                    "INSERT INTO categories (id, name, is_expense) \
                     SELECT e.id, e.name, TRUE FROM expense_category e \
                     WHERE NOT EXISTS (SELECT 1 FROM categories c WHERE c.id = e.id OR c.name = e.name)",
                )
                .await?
                .rows_affected();
            if copied > 0 {
                if db.get_database_backend() == DatabaseBackend::Postgres {
                    db.execute_unprepared(
                        "SELECT setval(pg_get_serial_sequence('categories', 'id'), \
                         (SELECT COALESCE(MAX(id), 1) FROM categories))",
                    )
                    .await?;
                }
                info!(copied, "copied legacy expense categories");
                changed = true;
            }
        }

        Ok(applied_if(changed))
    }
}

pub struct CategoryCode;

#[async_trait]
impl MigrationStep for CategoryCode {
    fn id(&self) -> &'static str {
        "category_code"
    }

    fn description(&self) -> &'static str {
        "add categories.code"
    }

    async fn apply(&self, db: &DatabaseConnection) -> Result<StepStatus, DbErr> {
        add_column_if_missing(
            db,
            "categories",
            ColumnDef::new(Alias::new("code")).string().null().to_owned(),
        )
        .await
    }
}

pub struct PayrollSpecColumns;

#[async_trait]
impl MigrationStep for PayrollSpecColumns {
    fn id(&self) -> &'static str {
        "payroll_spec_columns"
    }

    fn description(&self) -> &'static str {
        "add payroll_spec meta columns and populate them from spec_yaml"
    }

    async fn apply(&self, db: &DatabaseConnection) -> Result<StepStatus, DbErr> {
        if !SchemaManager::new(db).has_table("payroll_spec").await? {
            return Ok(StepStatus::NotApplicable);
        }

        let columns = [
            ColumnDef::new(Alias::new("code")).string().null().to_owned(),
            ColumnDef::new(Alias::new("currency")).string().null().to_owned(),
            ColumnDef::new(Alias::new("period_mode"))
                .string_len(16)
                .null()
                .to_owned(),
            ColumnDef::new(Alias::new("active_date")).date().null().to_owned(),
            ColumnDef::new(Alias::new("comment")).text().null().to_owned(),
        ];

        let mut added = false;
        for column in columns {
            added |= add_column_if_missing(db, "payroll_spec", column).await? == StepStatus::Applied;
        }

        // Rows left unpopulated by an interrupted earlier run are picked up
        // even when every column already exists.
        let populated = populate_payroll_meta(db).await?;
        debug!(populated, "populated payroll_spec meta columns");

        if added || populated > 0 {
            Ok(StepStatus::Applied)
        } else {
            Ok(StepStatus::AlreadyPresent)
        }
    }
}

pub struct PayrollSpecUnique;

#[async_trait]
impl MigrationStep for PayrollSpecUnique {
    fn id(&self) -> &'static str {
        "payroll_spec_unique"
    }

    fn description(&self) -> &'static str {
        "unique index on payroll_spec (jurisdiction, active_date)"
    }

    async fn apply(&self, db: &DatabaseConnection) -> Result<StepStatus, DbErr> {
        let manager = SchemaManager::new(db);
        if !manager.has_table("payroll_spec").await? {
            return Ok(StepStatus::NotApplicable);
        }
        if manager
            .has_index("payroll_spec", PAYROLL_SPEC_UNIQUE_INDEX)
            .await?
        {
            return Ok(StepStatus::AlreadyPresent);
        }
        manager
            .create_index(TenantSchema::payroll_spec_unique_index())
            .await?;
        Ok(StepStatus::Applied)
    }
}

pub struct PayrollSpecDropName;

#[async_trait]
impl MigrationStep for PayrollSpecDropName {
    fn id(&self) -> &'static str {
        "payroll_spec_drop_name"
    }

    fn description(&self) -> &'static str {
        "remove the legacy payroll_spec.name column"
    }

    async fn apply(&self, db: &DatabaseConnection) -> Result<StepStatus, DbErr> {
        let manager = SchemaManager::new(db);
        if !manager.has_table("payroll_spec").await? {
            return Ok(StepStatus::NotApplicable);
        }
        if !manager.has_column("payroll_spec", "name").await? {
            return Ok(StepStatus::AlreadyPresent);
        }

        match db.get_database_backend() {
            DatabaseBackend::Sqlite => rebuild_payroll_spec_without_name(db).await?,
            _ => {
                manager
                    .alter_table(
                        Table::alter()
                            .table(Alias::new("payroll_spec"))
                            .drop_column(Alias::new("name"))
                            .to_owned(),
                    )
                    .await?
            }
        }
        Ok(StepStatus::Applied)
    }
}

fn applied_if(changed: bool) -> StepStatus {
    if changed {
        StepStatus::Applied
    } else {
        StepStatus::AlreadyPresent
    }
}

async fn add_column_if_missing(
    db: &DatabaseConnection,
    table: &str,
    column: ColumnDef,
) -> Result<StepStatus, DbErr> {
    let manager = SchemaManager::new(db);
    if !manager.has_table(table).await? {
        return Ok(StepStatus::NotApplicable);
    }
    let name = column.get_column_name();
    if manager.has_column(table, &name).await? {
        return Ok(StepStatus::AlreadyPresent);
    }

    manager
        .alter_table(
            Table::alter()
                .table(Alias::new(table))
                .add_column(column)
                .to_owned(),
        )
        .await?;
    info!(table, column = %name, "added column");
    Ok(StepStatus::Applied)
}

/// Lifts `meta` fields out of every row's `spec_yaml`. Rows whose document
/// does not parse are left untouched.
async fn populate_payroll_meta(db: &DatabaseConnection) -> Result<usize, DbErr> {
    let backend = db.get_database_backend();
    let rows = db
        .query_all(Statement::from_string(
            backend,
            "SELECT id, spec_yaml FROM payroll_spec WHERE code IS NULL AND spec_yaml IS NOT NULL"
                .to_string(),
        ))
        .await?;

    let mut updated = 0;
    for row in rows {
        let id: i32 = row.try_get("", "id")?;
        let Some(raw) = row.try_get::<Option<String>>("", "spec_yaml")? else {
            continue;
        };
        let Ok(doc) = PayrollSpecDocument::from_yaml(&raw) else {
            debug!(id, "skipping payroll spec with unparseable yaml");
            continue;
        };
        // Without a code the row would be selected again on every run.
        if doc.meta.code.is_none() {
            debug!(id, "skipping payroll spec without meta.code");
            continue;
        }

        let update = Query::update()
            .table(Alias::new("payroll_spec"))
            .value(Alias::new("code"), doc.meta.code.clone())
            .value(Alias::new("currency"), doc.meta.currency.clone())
            .value(Alias::new("period_mode"), doc.meta.period_mode.clone())
            .value(Alias::new("active_date"), doc.active_date())
            .value(Alias::new("comment"), doc.comment().map(str::to_owned))
            .and_where(Expr::col(Alias::new("id")).eq(id))
            .to_owned();
        db.execute(backend.build(&update)).await?;
        updated += 1;
    }
    Ok(updated)
}

struct SqliteColumn {
    name: String,
    declared_type: String,
    not_null: bool,
    default: Option<String>,
    primary_key: bool,
}

impl SqliteColumn {
    fn definition(&self) -> String {
        let mut def = quote(&self.name);
        if !self.declared_type.is_empty() {
            def.push(' ');
            def.push_str(&self.declared_type);
        }
        if self.primary_key {
            def.push_str(" PRIMARY KEY");
        }
        if self.not_null {
            def.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default {
            def.push_str(" DEFAULT ");
            def.push_str(default);
        }
        def
    }
}

async fn sqlite_columns(db: &DatabaseConnection, table: &str) -> Result<Vec<SqliteColumn>, DbErr> {
    let rows = db
        .query_all(Statement::from_string(
            DatabaseBackend::Sqlite,
            format!("PRAGMA table_info({})", quote(table)),
        ))
        .await?;

    rows.into_iter()
        .map(|row| {
            Ok(SqliteColumn {
                name: row.try_get("", "name")?,
                declared_type: row.try_get::<Option<String>>("", "type")?.unwrap_or_default(),
                not_null: row.try_get::<i32>("", "notnull")? != 0,
                default: row.try_get("", "dflt_value")?,
                primary_key: row.try_get::<i32>("", "pk")? != 0,
            })
        })
        .collect()
}

/// SQLite has no portable DROP COLUMN for constrained tables, so the table is
/// recreated without the column and the data copied across in one transaction.
async fn rebuild_payroll_spec_without_name(db: &DatabaseConnection) -> Result<(), DbErr> {
    let kept: Vec<SqliteColumn> = sqlite_columns(db, "payroll_spec")
        .await?
        .into_iter()
        .filter(|column| column.name != "name")
        .collect();

    let definitions = kept
        .iter()
        .map(SqliteColumn::definition)
        .collect::<Vec<_>>()
        .join(", ");
    let names = kept
        .iter()
        .map(|column| quote(&column.name))
        .collect::<Vec<_>>()
        .join(", ");
    let has_active_date = kept.iter().any(|column| column.name == "active_date");

    let txn = db.begin().await?;
    txn.execute_unprepared("DROP TABLE IF EXISTS payroll_spec_rebuild")
        .await?;
    txn.execute_unprepared(&format!("CREATE TABLE payroll_spec_rebuild ({definitions})"))
        .await?;
    txn.execute_unprepared(&format!(
        "INSERT INTO payroll_spec_rebuild ({names}) SELECT {names} FROM payroll_spec"
    ))
    .await?;
    txn.execute_unprepared("DROP TABLE payroll_spec").await?;
    txn.execute_unprepared("ALTER TABLE payroll_spec_rebuild RENAME TO payroll_spec")
        .await?;
    if has_active_date {
        // Indexes are dropped with the old table.
        txn.execute(
            DatabaseBackend::Sqlite.build(&TenantSchema::payroll_spec_unique_index()),
        )
        .await?;
    }
    txn.commit().await?;

    info!("rebuilt payroll_spec without the name column");
    Ok(())
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_order_is_fixed() {
        let ids: Vec<_> = default_pipeline().iter().map(|step| step.id()).collect();
        assert_eq!(
            ids,
            vec![
                "account_opening_balance",
                "employee_payroll_tax_deductions",
                "tenant_timestamps",
                "categories_table",
                "category_code",
                "payroll_spec_columns",
                "payroll_spec_unique",
                "payroll_spec_drop_name",
            ]
        );
    }

    #[test]
    fn sqlite_column_definitions() {
        let id = SqliteColumn {
            name: "id".into(),
            declared_type: "INTEGER".into(),
            not_null: true,
            default: None,
            primary_key: true,
        };
        let balance = SqliteColumn {
            name: "opening_balance".into(),
            declared_type: "REAL".into(),
            not_null: true,
            default: Some("0.0".into()),
            primary_key: false,
        };
        assert_eq!(id.definition(), "\"id\" INTEGER PRIMARY KEY NOT NULL");
        assert_eq!(
            balance.definition(),
            "\"opening_balance\" REAL NOT NULL DEFAULT 0.0"
        );
    }
}
