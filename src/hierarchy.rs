//! Hierarchy table: parent to child links with 1-based sibling ordering.
//!
//! `sort_order` is the parent's child count plus one at insertion time and is
//! never renumbered. The count and the insert run under a per-parent lock held
//! for the rest of the transaction, so two writers cannot claim the same slot.

use tracing::debug;

use crate::error::{Result, WeaveError};
use crate::store::{LockKey, WeaveStore, WeaveTransaction};
use crate::types::*;

/// Append `child_id` under `parent_id` and return its `sort_order`.
pub async fn link(
    tx: &mut dyn WeaveTransaction,
    entity_index_id: EntityIndexId,
    parent_id: ManifestId,
    child_id: ManifestId,
) -> Result<u32> {
    match tx.manifest(parent_id).await? {
        Some(parent) if parent.entity_type == EntityType::Container => {}
        Some(_) => {
            return Err(WeaveError::InvalidInput(format!(
                "parent {} is not a container",
                parent_id
            )))
        }
        None => {
            return Err(WeaveError::InvalidInput(format!(
                "parent {} has no manifest",
                parent_id
            )))
        }
    }

    tx.lock(&LockKey::Parent(parent_id)).await?;
    let count = tx.count_children(parent_id).await?;
    let sort_order = u32::try_from(count + 1).map_err(|_| {
        WeaveError::InvalidInput(format!("parent {} has too many children", parent_id))
    })?;

    tx.insert_hierarchy(&HierarchyLink {
        entity_index_id,
        parent_id,
        child_id,
        sort_order,
    })
    .await?;
    debug!(parent_id = %parent_id, child_id = %child_id, sort_order, "linked child");
    Ok(sort_order)
}

/// Children of `parent_id`, ascending by `sort_order`.
pub async fn children_of(
    store: &dyn WeaveStore,
    parent_id: ManifestId,
) -> Result<Vec<HierarchyLink>> {
    store.children_of(parent_id).await
}

pub async fn distinct_parents(store: &dyn WeaveStore) -> Result<Vec<ManifestId>> {
    store.distinct_parents().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryWeaveStore;
    use crate::{manifest, registry};

    async fn new_entity(
        tx: &mut dyn WeaveTransaction,
        entity_type: EntityType,
    ) -> (EntityIndexId, ManifestId) {
        let index = registry::allocate(tx).await.unwrap();
        let id = manifest::register(tx, index, entity_type).await.unwrap();
        (index, id)
    }

    #[tokio::test]
    async fn nth_child_gets_sort_order_n() {
        let store = InMemoryWeaveStore::new();
        let mut tx = store.begin().await.unwrap();
        let (_, parent) = new_entity(tx.as_mut(), EntityType::Container).await;

        let mut orders = Vec::new();
        for _ in 0..4 {
            let (index, child) = new_entity(tx.as_mut(), EntityType::Leaf).await;
            orders.push(link(tx.as_mut(), index, parent, child).await.unwrap());
        }
        tx.commit().await.unwrap();

        assert_eq!(orders, vec![1, 2, 3, 4]);
        let children = children_of(&store, parent).await.unwrap();
        let stored: Vec<u32> = children.iter().map(|c| c.sort_order).collect();
        assert_eq!(stored, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn ordering_is_per_parent() {
        let store = InMemoryWeaveStore::new();
        let mut tx = store.begin().await.unwrap();
        let (_, a) = new_entity(tx.as_mut(), EntityType::Container).await;
        let (_, b) = new_entity(tx.as_mut(), EntityType::Container).await;

        let (i1, c1) = new_entity(tx.as_mut(), EntityType::Leaf).await;
        let (i2, c2) = new_entity(tx.as_mut(), EntityType::Leaf).await;
        let (i3, c3) = new_entity(tx.as_mut(), EntityType::Leaf).await;
        assert_eq!(link(tx.as_mut(), i1, a, c1).await.unwrap(), 1);
        assert_eq!(link(tx.as_mut(), i2, b, c2).await.unwrap(), 1);
        assert_eq!(link(tx.as_mut(), i3, a, c3).await.unwrap(), 2);
        tx.commit().await.unwrap();

        assert_eq!(distinct_parents(&store).await.unwrap(), vec![a, b]);
    }

    #[tokio::test]
    async fn leaf_parent_is_rejected() {
        let store = InMemoryWeaveStore::new();
        let mut tx = store.begin().await.unwrap();
        let (_, leaf) = new_entity(tx.as_mut(), EntityType::Leaf).await;
        let (index, child) = new_entity(tx.as_mut(), EntityType::Leaf).await;

        let err = link(tx.as_mut(), index, leaf, child).await.unwrap_err();
        assert!(matches!(err, WeaveError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn unknown_parent_is_rejected() {
        let store = InMemoryWeaveStore::new();
        let mut tx = store.begin().await.unwrap();
        let (index, child) = new_entity(tx.as_mut(), EntityType::Leaf).await;

        let err = link(tx.as_mut(), index, ManifestId(777), child)
            .await
            .unwrap_err();
        assert!(matches!(err, WeaveError::InvalidInput(_)));
    }
}
