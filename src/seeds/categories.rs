//! Category seeding
//!
//! Applies a manifest in two passes inside one transaction. The first pass
//! upserts every entry and records its row id; the second wires parents, so an
//! entry may name a parent declared further down the file.

use std::collections::HashMap;

use sea_orm::{DatabaseConnection, TransactionTrait};
use tracing::{debug, info};

use crate::error::SeedError;
use crate::repositories::CategoryRepository;

use super::manifest::CategoryManifest;

/// Row counts for one applied manifest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategorySeedStats {
    pub upserted: usize,
    pub parents_linked: usize,
}

pub async fn seed_categories(
    db: &DatabaseConnection,
    manifest: &CategoryManifest,
) -> Result<CategorySeedStats, SeedError> {
    let txn = db.begin().await?;
    let repo = CategoryRepository::new(&txn);

    let mut ids = Vec::with_capacity(manifest.entries.len());
    let mut by_code: HashMap<&str, i32> = HashMap::new();
    for entry in &manifest.entries {
        let id = repo.upsert(entry).await?;
        if let Some(code) = entry.code.as_deref() {
            by_code.insert(code, id);
        }
        ids.push(id);
    }

    // Parents outside this manifest must already exist in the database.
    let known = repo.code_map().await?;

    let mut stats = CategorySeedStats {
        upserted: ids.len(),
        parents_linked: 0,
    };
    for (entry, id) in manifest.entries.iter().zip(&ids) {
        let Some(parent) = entry.parent.as_deref() else {
            continue;
        };
        let parent_id = by_code
            .get(parent)
            .or_else(|| known.get(parent))
            .copied()
            .ok_or_else(|| SeedError::UnresolvedParent {
                manifest: manifest.path.clone(),
                entry: entry.label().to_string(),
                parent: parent.to_string(),
            })?;
        repo.set_parent(*id, Some(parent_id)).await?;
        stats.parents_linked += 1;
    }

    txn.commit().await?;

    debug!(manifest = %manifest.path.display(), ?stats, "category manifest applied");
    info!(
        manifest = %manifest.path.display(),
        categories = stats.upserted,
        "seeded categories"
    );
    Ok(stats)
}
