//! Tenant database schema.
//!
//! Tenant databases are initialized with create-all semantics: every table is
//! created with `IF NOT EXISTS`, so applying the schema to an existing tenant
//! database is a no-op for tables that are already present. Additive changes
//! to databases created by older releases are handled by the migration
//! pipeline in the main crate, not here.

use sea_orm_migration::prelude::*;

/// Name of the per-tenant table recording applied pipeline steps.
pub const LEDGER_TABLE: &str = "tenant_schema_ledger";

/// Name of the unique index guarding overlapping payroll specs.
pub const PAYROLL_SPEC_UNIQUE_INDEX: &str = "idx_payroll_spec_jur_active";

/// Business tables owned by every tenant database, in creation order.
pub const TENANT_TABLES: &[&str] = &[
    "account",
    "categories",
    "employee",
    "employee_item",
    "project",
    "project_wbs2",
    "project_wbs3",
    "project_wbs4",
    "expense",
    "expense_item",
    "invoice",
    "invoice_item",
    "ledger",
    "timesheet",
    "payroll_spec",
];

/// Declarative tenant schema.
pub struct TenantSchema;

impl TenantSchema {
    /// Creates every tenant table, the payroll spec unique index and the
    /// schema ledger. Safe to call repeatedly.
    pub async fn create_all(manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        for table in Self::tables() {
            manager.create_table(table).await?;
        }

        // Older payroll_spec tables lack active_date until the pipeline adds it.
        if manager.has_column("payroll_spec", "active_date").await? {
            manager
                .create_index(Self::payroll_spec_unique_index())
                .await?;
        }

        Self::create_ledger(manager).await
    }

    /// Unique index on `payroll_spec (jurisdiction, active_date)`.
    pub fn payroll_spec_unique_index() -> IndexCreateStatement {
        Index::create()
            .if_not_exists()
            .name(PAYROLL_SPEC_UNIQUE_INDEX)
            .table(PayrollSpec::Table)
            .col(PayrollSpec::Jurisdiction)
            .col(PayrollSpec::ActiveDate)
            .unique()
            .to_owned()
    }

    /// Creates the schema ledger table if it does not exist yet.
    pub async fn create_ledger(manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(TenantSchemaLedger::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TenantSchemaLedger::StepId)
                            .string_len(128)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(TenantSchemaLedger::AppliedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    /// Returns the `categories` table definition on its own. The migration
    /// pipeline uses it to add the table to databases that predate it.
    pub fn categories_table() -> TableCreateStatement {
        with_timestamps(
            Table::create()
                .table(Categories::Table)
                .if_not_exists()
                .col(id_column(Categories::Id))
                .col(ColumnDef::new(Categories::Code).string().null())
                .col(ColumnDef::new(Categories::Name).string().not_null())
                .col(ColumnDef::new(Categories::ParentId).integer().null())
                .col(ColumnDef::new(Categories::IsExpense).boolean().default(true))
                .col(ColumnDef::new(Categories::IsIncome).boolean().default(false))
                .col(ColumnDef::new(Categories::Comment).text().null())
                .foreign_key(
                    ForeignKey::create()
                        .name("fk_categories_parent")
                        .from(Categories::Table, Categories::ParentId)
                        .to(Categories::Table, Categories::Id),
                ),
        )
    }

    fn tables() -> Vec<TableCreateStatement> {
        vec![
            with_timestamps(
                Table::create()
                    .table(Account::Table)
                    .if_not_exists()
                    .col(id_column(Account::Id))
                    .col(ColumnDef::new(Account::Name).string().not_null())
                    .col(ColumnDef::new(Account::Institution).string().null())
                    .col(ColumnDef::new(Account::CurrencyCode).string().null())
                    .col(ColumnDef::new(Account::AccountType).string().not_null())
                    .col(
                        ColumnDef::new(Account::OpeningBalance)
                            .double()
                            .not_null()
                            .default(0.0),
                    ),
            ),
            Self::categories_table(),
            with_timestamps(
                Table::create()
                    .table(Employee::Table)
                    .if_not_exists()
                    .col(id_column(Employee::Id))
                    .col(ColumnDef::new(Employee::FirstName).string().not_null())
                    .col(ColumnDef::new(Employee::LastName).string().not_null())
                    .col(ColumnDef::new(Employee::Email).string().null())
                    .col(ColumnDef::new(Employee::Phone).string().null())
                    .col(ColumnDef::new(Employee::Address).string().null())
                    .col(ColumnDef::new(Employee::Sin).string().null())
                    .col(ColumnDef::new(Employee::PayrollTaxDeductions).json().null())
                    .col(ColumnDef::new(Employee::IsActive).boolean().default(true)),
            ),
            with_timestamps(
                Table::create()
                    .table(EmployeeItem::Table)
                    .if_not_exists()
                    .col(id_column(EmployeeItem::Id))
                    .col(ColumnDef::new(EmployeeItem::EmployeeId).integer().not_null())
                    .col(ColumnDef::new(EmployeeItem::Filename).string().not_null())
                    .col(ColumnDef::new(EmployeeItem::Category).string().null())
                    .col(ColumnDef::new(EmployeeItem::Date).timestamp().null())
                    .col(ColumnDef::new(EmployeeItem::Blob).blob().null())
                    .col(ColumnDef::new(EmployeeItem::Notes).string().null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_employee_item_employee")
                            .from(EmployeeItem::Table, EmployeeItem::EmployeeId)
                            .to(Employee::Table, Employee::Id),
                    ),
            ),
            with_timestamps(
                Table::create()
                    .table(Project::Table)
                    .if_not_exists()
                    .col(id_column(Project::Id)),
            ),
            with_timestamps(
                Table::create()
                    .table(ProjectWbs2::Table)
                    .if_not_exists()
                    .col(id_column(ProjectWbs2::Id))
                    .col(ColumnDef::new(ProjectWbs2::ProjectId).integer().not_null())
                    .col(ColumnDef::new(ProjectWbs2::Name).string().not_null())
                    .col(ColumnDef::new(ProjectWbs2::Description).text().null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_project_wbs2_project")
                            .from(ProjectWbs2::Table, ProjectWbs2::ProjectId)
                            .to(Project::Table, Project::Id),
                    ),
            ),
            with_timestamps(
                Table::create()
                    .table(ProjectWbs3::Table)
                    .if_not_exists()
                    .col(id_column(ProjectWbs3::Id))
                    .col(ColumnDef::new(ProjectWbs3::Wbs2Id).integer().not_null())
                    .col(ColumnDef::new(ProjectWbs3::Name).string().not_null())
                    .col(ColumnDef::new(ProjectWbs3::Description).text().null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_project_wbs3_wbs2")
                            .from(ProjectWbs3::Table, ProjectWbs3::Wbs2Id)
                            .to(ProjectWbs2::Table, ProjectWbs2::Id),
                    ),
            ),
            with_timestamps(
                Table::create()
                    .table(ProjectWbs4::Table)
                    .if_not_exists()
                    .col(id_column(ProjectWbs4::Id))
                    .col(ColumnDef::new(ProjectWbs4::Wbs3Id).integer().not_null())
                    .col(ColumnDef::new(ProjectWbs4::Name).string().not_null())
                    .col(ColumnDef::new(ProjectWbs4::Description).text().null())
                    .col(ColumnDef::new(ProjectWbs4::BudgetHours).double().null())
                    .col(ColumnDef::new(ProjectWbs4::BudgetCost).double().null())
                    .col(ColumnDef::new(ProjectWbs4::StartDate).date().null())
                    .col(ColumnDef::new(ProjectWbs4::CompletionDate).date().null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_project_wbs4_wbs3")
                            .from(ProjectWbs4::Table, ProjectWbs4::Wbs3Id)
                            .to(ProjectWbs3::Table, ProjectWbs3::Id),
                    ),
            ),
            with_timestamps(
                Table::create()
                    .table(Expense::Table)
                    .if_not_exists()
                    .col(id_column(Expense::Id))
                    .col(ColumnDef::new(Expense::ProjectId).integer().null())
                    .col(ColumnDef::new(Expense::EmployeeId).integer().null())
                    .col(ColumnDef::new(Expense::Wbs4Id).integer().null())
                    .col(ColumnDef::new(Expense::DueDate).timestamp().null())
                    .col(ColumnDef::new(Expense::SubmittedDate).timestamp().null())
                    .col(ColumnDef::new(Expense::Status).string().null())
                    .col(ColumnDef::new(Expense::Total).double().null())
                    .col(ColumnDef::new(Expense::Notes).text().null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_expense_project")
                            .from(Expense::Table, Expense::ProjectId)
                            .to(Project::Table, Project::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_expense_employee")
                            .from(Expense::Table, Expense::EmployeeId)
                            .to(Employee::Table, Employee::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_expense_wbs4")
                            .from(Expense::Table, Expense::Wbs4Id)
                            .to(ProjectWbs4::Table, ProjectWbs4::Id),
                    ),
            ),
            with_timestamps(
                Table::create()
                    .table(ExpenseItem::Table)
                    .if_not_exists()
                    .col(id_column(ExpenseItem::Id))
                    .col(ColumnDef::new(ExpenseItem::ExpenseId).integer().not_null())
                    .col(ColumnDef::new(ExpenseItem::Value).double().not_null())
                    .col(ColumnDef::new(ExpenseItem::TaxRate).double().null())
                    .col(ColumnDef::new(ExpenseItem::ExpenseCategoryId).integer().null())
                    .col(ColumnDef::new(ExpenseItem::Description).string().null())
                    .col(ColumnDef::new(ExpenseItem::IsRemittance).boolean().default(false))
                    .col(ColumnDef::new(ExpenseItem::DueDate).timestamp().null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_expense_item_expense")
                            .from(ExpenseItem::Table, ExpenseItem::ExpenseId)
                            .to(Expense::Table, Expense::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_expense_item_category")
                            .from(ExpenseItem::Table, ExpenseItem::ExpenseCategoryId)
                            .to(Categories::Table, Categories::Id),
                    ),
            ),
            with_timestamps(
                Table::create()
                    .table(Invoice::Table)
                    .if_not_exists()
                    .col(id_column(Invoice::Id))
                    .col(ColumnDef::new(Invoice::ProjectId).integer().null())
                    .col(ColumnDef::new(Invoice::EmployeeId).integer().null())
                    .col(ColumnDef::new(Invoice::DueDate).timestamp().null())
                    .col(ColumnDef::new(Invoice::IssuedDate).timestamp().null())
                    .col(ColumnDef::new(Invoice::Status).string().null())
                    .col(ColumnDef::new(Invoice::Total).double().null())
                    .col(ColumnDef::new(Invoice::Notes).text().null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_invoice_project")
                            .from(Invoice::Table, Invoice::ProjectId)
                            .to(Project::Table, Project::Id),
                    ),
            ),
            with_timestamps(
                Table::create()
                    .table(InvoiceItem::Table)
                    .if_not_exists()
                    .col(id_column(InvoiceItem::Id))
                    .col(ColumnDef::new(InvoiceItem::InvoiceId).integer().not_null())
                    .col(ColumnDef::new(InvoiceItem::Value).double().not_null())
                    .col(ColumnDef::new(InvoiceItem::TaxRate).double().null())
                    .col(ColumnDef::new(InvoiceItem::Description).string().null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_invoice_item_invoice")
                            .from(InvoiceItem::Table, InvoiceItem::InvoiceId)
                            .to(Invoice::Table, Invoice::Id),
                    ),
            ),
            with_timestamps(
                Table::create()
                    .table(Ledger::Table)
                    .if_not_exists()
                    .col(id_column(Ledger::Id))
                    .col(ColumnDef::new(Ledger::AccountId).integer().not_null())
                    .col(ColumnDef::new(Ledger::Amount).double().not_null())
                    .col(
                        ColumnDef::new(Ledger::Date)
                            .timestamp_with_time_zone()
                            .null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(Ledger::Description).string().null())
                    .col(ColumnDef::new(Ledger::RelatedExpenseId).integer().null())
                    .col(ColumnDef::new(Ledger::RelatedIncomeId).integer().null())
                    .col(ColumnDef::new(Ledger::RelatedInvoiceId).integer().null())
                    .col(ColumnDef::new(Ledger::EntryType).string_len(16).not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_ledger_account")
                            .from(Ledger::Table, Ledger::AccountId)
                            .to(Account::Table, Account::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_ledger_expense")
                            .from(Ledger::Table, Ledger::RelatedExpenseId)
                            .to(Expense::Table, Expense::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_ledger_invoice")
                            .from(Ledger::Table, Ledger::RelatedInvoiceId)
                            .to(Invoice::Table, Invoice::Id),
                    ),
            ),
            with_timestamps(
                Table::create()
                    .table(Timesheet::Table)
                    .if_not_exists()
                    .col(id_column(Timesheet::Id))
                    .col(ColumnDef::new(Timesheet::EmployeeId).integer().not_null())
                    .col(ColumnDef::new(Timesheet::ProjectId).integer().not_null())
                    .col(ColumnDef::new(Timesheet::Wbs4Id).integer().null())
                    .col(ColumnDef::new(Timesheet::Date).date().not_null())
                    .col(ColumnDef::new(Timesheet::Hours).double().not_null())
                    .col(ColumnDef::new(Timesheet::Notes).text().null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_timesheet_employee")
                            .from(Timesheet::Table, Timesheet::EmployeeId)
                            .to(Employee::Table, Employee::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_timesheet_project")
                            .from(Timesheet::Table, Timesheet::ProjectId)
                            .to(Project::Table, Project::Id),
                    ),
            ),
            with_timestamps(
                Table::create()
                    .table(PayrollSpec::Table)
                    .if_not_exists()
                    .col(id_column(PayrollSpec::Id))
                    .col(ColumnDef::new(PayrollSpec::Code).string().not_null())
                    .col(ColumnDef::new(PayrollSpec::Currency).string().null())
                    .col(ColumnDef::new(PayrollSpec::PeriodMode).string_len(16).null())
                    .col(ColumnDef::new(PayrollSpec::ActiveDate).date().null())
                    .col(ColumnDef::new(PayrollSpec::Comment).text().null())
                    .col(ColumnDef::new(PayrollSpec::Year).integer().not_null())
                    .col(ColumnDef::new(PayrollSpec::Jurisdiction).string().not_null())
                    .col(ColumnDef::new(PayrollSpec::SpecYaml).text().not_null()),
            ),
        ]
    }
}

fn id_column<T: IntoIden>(name: T) -> ColumnDef {
    ColumnDef::new(name)
        .integer()
        .not_null()
        .auto_increment()
        .primary_key()
        .to_owned()
}

fn with_timestamps(table: &mut TableCreateStatement) -> TableCreateStatement {
    table
        .col(
            ColumnDef::new(Timestamps::CreatedAt)
                .timestamp_with_time_zone()
                .null()
                .default(Expr::current_timestamp()),
        )
        .col(
            ColumnDef::new(Timestamps::UpdatedAt)
                .timestamp_with_time_zone()
                .null(),
        )
        .to_owned()
}

#[derive(DeriveIden)]
enum Timestamps {
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum TenantSchemaLedger {
    Table,
    StepId,
    AppliedAt,
}

#[derive(DeriveIden)]
enum Account {
    Table,
    Id,
    Name,
    Institution,
    CurrencyCode,
    AccountType,
    OpeningBalance,
}

#[derive(DeriveIden)]
enum Categories {
    Table,
    Id,
    Code,
    Name,
    ParentId,
    IsExpense,
    IsIncome,
    Comment,
}

#[derive(DeriveIden)]
enum Employee {
    Table,
    Id,
    FirstName,
    LastName,
    Email,
    Phone,
    Address,
    Sin,
    PayrollTaxDeductions,
    IsActive,
}

#[derive(DeriveIden)]
enum EmployeeItem {
    Table,
    Id,
    EmployeeId,
    Filename,
    Category,
    Date,
    Blob,
    Notes,
}

#[derive(DeriveIden)]
enum Project {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum ProjectWbs2 {
    #[sea_orm(iden = "project_wbs2")]
    Table,
    Id,
    ProjectId,
    Name,
    Description,
}

#[derive(DeriveIden)]
enum ProjectWbs3 {
    #[sea_orm(iden = "project_wbs3")]
    Table,
    Id,
    #[sea_orm(iden = "wbs2_id")]
    Wbs2Id,
    Name,
    Description,
}

#[derive(DeriveIden)]
enum ProjectWbs4 {
    #[sea_orm(iden = "project_wbs4")]
    Table,
    Id,
    #[sea_orm(iden = "wbs3_id")]
    Wbs3Id,
    Name,
    Description,
    BudgetHours,
    BudgetCost,
    StartDate,
    CompletionDate,
}

#[derive(DeriveIden)]
enum Expense {
    Table,
    Id,
    ProjectId,
    EmployeeId,
    #[sea_orm(iden = "wbs4_id")]
    Wbs4Id,
    DueDate,
    SubmittedDate,
    Status,
    Total,
    Notes,
}

#[derive(DeriveIden)]
enum ExpenseItem {
    Table,
    Id,
    ExpenseId,
    Value,
    TaxRate,
    ExpenseCategoryId,
    Description,
    IsRemittance,
    DueDate,
}

#[derive(DeriveIden)]
enum Invoice {
    Table,
    Id,
    ProjectId,
    EmployeeId,
    DueDate,
    IssuedDate,
    Status,
    Total,
    Notes,
}

#[derive(DeriveIden)]
enum InvoiceItem {
    Table,
    Id,
    InvoiceId,
    Value,
    TaxRate,
    Description,
}

#[derive(DeriveIden)]
enum Ledger {
    Table,
    Id,
    AccountId,
    Amount,
    Date,
    Description,
    RelatedExpenseId,
    RelatedIncomeId,
    RelatedInvoiceId,
    EntryType,
}

#[derive(DeriveIden)]
enum Timesheet {
    Table,
    Id,
    EmployeeId,
    ProjectId,
    #[sea_orm(iden = "wbs4_id")]
    Wbs4Id,
    Date,
    Hours,
    Notes,
}

#[derive(DeriveIden)]
enum PayrollSpec {
    Table,
    Id,
    Code,
    Currency,
    PeriodMode,
    ActiveDate,
    Comment,
    Year,
    Jurisdiction,
    SpecYaml,
}
