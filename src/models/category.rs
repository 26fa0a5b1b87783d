//! Category entity model
//!
//! Seeded reference data. Categories form a tree through `parent_id` and are
//! keyed naturally by `code`, or by `name` for legacy rows without one.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "categories")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Stable natural key from the seed manifest
    pub code: Option<String>,

    pub name: String,

    /// Parent category id; `None` for roots
    pub parent_id: Option<i32>,

    pub is_expense: Option<bool>,

    pub is_income: Option<bool>,

    pub comment: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
