//! # Payroll Spec Repository

use chrono::NaiveDate;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, IntoActiveModel, NotSet,
    QueryFilter, Set,
};

use crate::models::payroll_spec::{self, Entity as PayrollSpec};

/// Column values extracted from one payroll specification document.
#[derive(Debug, Clone, PartialEq)]
pub struct PayrollSpecInput {
    pub code: String,
    pub jurisdiction: String,
    pub year: i32,
    pub currency: Option<String>,
    pub period_mode: Option<String>,
    pub active_date: Option<NaiveDate>,
    pub comment: Option<String>,
    pub spec_yaml: String,
}

pub struct PayrollSpecRepository<'a, C: ConnectionTrait> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> PayrollSpecRepository<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    pub async fn find(
        &self,
        jurisdiction: &str,
        year: i32,
    ) -> Result<Option<payroll_spec::Model>, DbErr> {
        PayrollSpec::find()
            .filter(payroll_spec::Column::Jurisdiction.eq(jurisdiction))
            .filter(payroll_spec::Column::Year.eq(year))
            .one(self.conn)
            .await
    }

    /// Upserts by `(jurisdiction, year)` and returns the row id.
    pub async fn upsert(&self, input: &PayrollSpecInput) -> Result<i32, DbErr> {
        match self.find(&input.jurisdiction, input.year).await? {
            Some(row) => {
                let id = row.id;
                let mut active = row.into_active_model();
                active.code = Set(Some(input.code.clone()));
                active.currency = Set(input.currency.clone());
                active.period_mode = Set(input.period_mode.clone());
                active.active_date = Set(input.active_date);
                active.comment = Set(input.comment.clone());
                active.spec_yaml = Set(input.spec_yaml.clone());
                active.update(self.conn).await?;
                Ok(id)
            }
            None => {
                let row = payroll_spec::ActiveModel {
                    id: NotSet,
                    code: Set(Some(input.code.clone())),
                    currency: Set(input.currency.clone()),
                    period_mode: Set(input.period_mode.clone()),
                    active_date: Set(input.active_date),
                    comment: Set(input.comment.clone()),
                    year: Set(input.year),
                    jurisdiction: Set(input.jurisdiction.clone()),
                    spec_yaml: Set(input.spec_yaml.clone()),
                }
                .insert(self.conn)
                .await?;
                Ok(row.id)
            }
        }
    }

    pub async fn list_all(&self) -> Result<Vec<payroll_spec::Model>, DbErr> {
        PayrollSpec::find().all(self.conn).await
    }
}
