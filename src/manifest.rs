//! Manifest: type classification for an entity index, and the handle callers see.

use tracing::debug;

use crate::error::{Result, WeaveError};
use crate::store::WeaveTransaction;
use crate::types::{EntityIndexId, EntityType, ManifestId};

/// Bind exactly one manifest to `entity_index_id` and return its handle.
///
/// A second registration for the same index fails with `DuplicateManifest`;
/// the caller must abandon the enclosing transaction.
pub async fn register(
    tx: &mut dyn WeaveTransaction,
    entity_index_id: EntityIndexId,
    entity_type: EntityType,
) -> Result<ManifestId> {
    if tx.manifest_for_index(entity_index_id).await?.is_some() {
        return Err(WeaveError::DuplicateManifest(entity_index_id));
    }
    let manifest = tx.insert_manifest(entity_index_id, entity_type).await?;
    debug!(
        entity_index_id = %entity_index_id,
        entity_id = %manifest.id,
        type_id = entity_type.type_id(),
        "registered manifest"
    );
    Ok(manifest.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry;
    use crate::store::memory::InMemoryWeaveStore;
    use crate::store::WeaveStore;

    #[tokio::test]
    async fn second_manifest_for_index_is_rejected() {
        let store = InMemoryWeaveStore::new();
        let mut tx = store.begin().await.unwrap();
        let index = registry::allocate(tx.as_mut()).await.unwrap();
        register(tx.as_mut(), index, EntityType::Container)
            .await
            .unwrap();

        let err = register(tx.as_mut(), index, EntityType::Leaf)
            .await
            .unwrap_err();
        assert!(matches!(err, WeaveError::DuplicateManifest(i) if i == index));
    }

    #[tokio::test]
    async fn handle_is_distinct_from_index() {
        let store = InMemoryWeaveStore::new();
        let mut tx = store.begin().await.unwrap();
        let first = registry::allocate(tx.as_mut()).await.unwrap();
        let second = registry::allocate(tx.as_mut()).await.unwrap();
        let id = register(tx.as_mut(), second, EntityType::Leaf).await.unwrap();
        tx.commit().await.unwrap();

        let manifest = store.manifest(id).await.unwrap().unwrap();
        assert_eq!(manifest.entity_index_id, second);
        assert_ne!(manifest.entity_index_id, first);
        assert_eq!(manifest.entity_type.type_id(), 1);
    }
}
