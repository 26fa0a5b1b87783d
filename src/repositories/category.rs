//! # Category Repository
//!
//! Natural-key lookups and upserts over the tenant `categories` table.

use std::collections::HashMap;

use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, IntoActiveModel, NotSet,
    QueryFilter, QueryOrder, Set,
};

use crate::models::category::{self, Entity as Category};
use crate::seeds::CategoryEntry;

pub struct CategoryRepository<'a, C: ConnectionTrait> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> CategoryRepository<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    pub async fn find_by_code(&self, code: &str) -> Result<Option<category::Model>, DbErr> {
        Category::find()
            .filter(category::Column::Code.eq(code))
            .one(self.conn)
            .await
    }

    /// Finds a row by name. When `uncoded_only` is set, rows that already carry
    /// a code are ignored so they cannot be claimed by a different code.
    pub async fn find_by_name(
        &self,
        name: &str,
        uncoded_only: bool,
    ) -> Result<Option<category::Model>, DbErr> {
        let mut query = Category::find().filter(category::Column::Name.eq(name));
        if uncoded_only {
            query = query.filter(category::Column::Code.is_null());
        }
        query.order_by_asc(category::Column::Id).one(self.conn).await
    }

    /// Upserts one manifest entry by `code`, falling back to `name`, and returns
    /// the row id. Parent links are left untouched; they are wired afterwards.
    pub async fn upsert(&self, entry: &CategoryEntry) -> Result<i32, DbErr> {
        let existing = match entry.code.as_deref() {
            Some(code) => match self.find_by_code(code).await? {
                Some(row) => Some(row),
                // Legacy rows predate codes; adopt them by name.
                None => self.find_by_name(&entry.name, true).await?,
            },
            None => self.find_by_name(&entry.name, false).await?,
        };

        match existing {
            Some(row) => {
                let id = row.id;
                let mut active = row.into_active_model();
                if entry.code.is_some() {
                    active.code = Set(entry.code.clone());
                }
                active.name = Set(entry.name.clone());
                active.is_expense = Set(Some(entry.is_expense));
                active.is_income = Set(Some(entry.is_income));
                active.comment = Set(entry.comment.clone());
                active.update(self.conn).await?;
                Ok(id)
            }
            None => {
                let row = category::ActiveModel {
                    id: NotSet,
                    code: Set(entry.code.clone()),
                    name: Set(entry.name.clone()),
                    parent_id: Set(None),
                    is_expense: Set(Some(entry.is_expense)),
                    is_income: Set(Some(entry.is_income)),
                    comment: Set(entry.comment.clone()),
                }
                .insert(self.conn)
                .await?;
                Ok(row.id)
            }
        }
    }

    pub async fn set_parent(&self, id: i32, parent_id: Option<i32>) -> Result<(), DbErr> {
        let Some(row) = Category::find_by_id(id).one(self.conn).await? else {
            return Err(DbErr::RecordNotFound(format!("categories.id = {id}")));
        };
        if row.parent_id == parent_id {
            return Ok(());
        }
        let mut active = row.into_active_model();
        active.parent_id = Set(parent_id);
        active.update(self.conn).await?;
        Ok(())
    }

    /// Map of every coded category to its id.
    pub async fn code_map(&self) -> Result<HashMap<String, i32>, DbErr> {
        let rows = Category::find()
            .filter(category::Column::Code.is_not_null())
            .all(self.conn)
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.code.map(|code| (code, row.id)))
            .collect())
    }

    pub async fn list_all(&self) -> Result<Vec<category::Model>, DbErr> {
        Category::find()
            .order_by_asc(category::Column::Id)
            .all(self.conn)
            .await
    }
}
