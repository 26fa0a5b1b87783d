//! Company entity model
//!
//! The control-plane directory of tenants. Each company owns one tenant
//! database.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "company")]
pub struct Model {
    /// Tenant identifier (primary key)
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Short display name, unique across the directory
    #[sea_orm(unique)]
    pub name: String,

    /// Registered legal name (optional)
    pub legal_name: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
