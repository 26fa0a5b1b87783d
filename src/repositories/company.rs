//! # Company Repository
//!
//! Read access to the control-plane company directory, plus a `create` helper
//! for maintenance tooling and tests.

use sea_orm::{
    ActiveModelTrait, DatabaseConnection, DbErr, EntityTrait, NotSet, QueryOrder, QuerySelect, Set,
};

use crate::models::company::{self, Entity as Company};
use crate::tenant::TenantId;

/// Repository for the control-plane `company` table
pub struct CompanyRepository<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> CompanyRepository<'a> {
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }

    /// Inserts a company and returns the stored row.
    pub async fn create(
        &self,
        name: &str,
        legal_name: Option<&str>,
    ) -> Result<company::Model, DbErr> {
        company::ActiveModel {
            id: NotSet,
            name: Set(name.to_string()),
            legal_name: Set(legal_name.map(str::to_string)),
        }
        .insert(self.db)
        .await
    }

    pub async fn find(&self, id: TenantId) -> Result<Option<company::Model>, DbErr> {
        Company::find_by_id(id.get()).one(self.db).await
    }

    pub async fn exists(&self, id: TenantId) -> Result<bool, DbErr> {
        Ok(self.find(id).await?.is_some())
    }

    /// Every tenant id in ascending order.
    pub async fn list_ids(&self) -> Result<Vec<TenantId>, DbErr> {
        let ids: Vec<i32> = Company::find()
            .select_only()
            .column(company::Column::Id)
            .order_by_asc(company::Column::Id)
            .into_tuple()
            .all(self.db)
            .await?;
        Ok(ids.into_iter().map(TenantId).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;

    #[tokio::test]
    async fn lists_ids_in_ascending_order() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        let repo = CompanyRepository::new(&db);

        let b = repo.create("Beta", None).await.unwrap();
        let a = repo.create("Alpha", Some("Alpha Holdings Inc.")).await.unwrap();

        assert_eq!(
            repo.list_ids().await.unwrap(),
            vec![TenantId(b.id), TenantId(a.id)]
        );
        assert!(repo.exists(TenantId(a.id)).await.unwrap());
        assert!(!repo.exists(TenantId(999)).await.unwrap());
        assert_eq!(
            repo.find(TenantId(a.id)).await.unwrap().unwrap().legal_name.as_deref(),
            Some("Alpha Holdings Inc.")
        );
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        let repo = CompanyRepository::new(&db);

        repo.create("Acme", None).await.unwrap();
        assert!(repo.create("Acme", None).await.is_err());
    }
}
