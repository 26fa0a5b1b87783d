//! Per-tenant record of applied pipeline steps.

use migration::{SchemaManager, tenant::TenantSchema};
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, Set, sea_query::OnConflict,
};

use crate::models::schema_ledger::{self, Entity as SchemaLedger};

/// Creates the ledger table in databases that predate it.
pub async fn ensure(db: &DatabaseConnection) -> Result<(), DbErr> {
    TenantSchema::create_ledger(&SchemaManager::new(db)).await
}

pub async fn is_recorded<C: ConnectionTrait>(db: &C, step_id: &str) -> Result<bool, DbErr> {
    Ok(SchemaLedger::find_by_id(step_id.to_string())
        .one(db)
        .await?
        .is_some())
}

/// Records a step; recording an already recorded step is a no-op.
pub async fn record<C: ConnectionTrait>(db: &C, step_id: &str) -> Result<(), DbErr> {
    SchemaLedger::insert(schema_ledger::ActiveModel {
        step_id: Set(step_id.to_string()),
    })
    .on_conflict(
        OnConflict::column(schema_ledger::Column::StepId)
            .do_nothing()
            .to_owned(),
    )
    .do_nothing()
    .exec(db)
    .await?;
    Ok(())
}

pub async fn recorded_steps<C: ConnectionTrait>(db: &C) -> Result<Vec<String>, DbErr> {
    Ok(SchemaLedger::find()
        .all(db)
        .await?
        .into_iter()
        .map(|row| row.step_id)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::Database;

    #[tokio::test]
    async fn records_steps_once() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        ensure(&db).await.unwrap();

        assert!(!is_recorded(&db, "account_opening_balance").await.unwrap());
        record(&db, "account_opening_balance").await.unwrap();
        record(&db, "account_opening_balance").await.unwrap();

        assert!(is_recorded(&db, "account_opening_balance").await.unwrap());
        assert_eq!(
            recorded_steps(&db).await.unwrap(),
            vec!["account_opening_balance".to_string()]
        );
    }
}
