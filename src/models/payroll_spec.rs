//! Payroll specification entity model

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "payroll_spec")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Document code, e.g. `CA-ON-2026`. Null on rows predating the column.
    pub code: Option<String>,

    pub currency: Option<String>,

    /// Pay period mode, e.g. `biweekly`
    pub period_mode: Option<String>,

    pub active_date: Option<Date>,

    #[sea_orm(column_type = "Text", nullable)]
    pub comment: Option<String>,

    pub year: i32,

    pub jurisdiction: String,

    /// The full YAML document as loaded from disk
    #[sea_orm(column_type = "Text")]
    pub spec_yaml: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
