//! Metadata store: name/value attributes in a private and a public namespace,
//! plus the write-once flat projection of a leaf's public attributes.
//!
//! Writes are append-only and never deduplicated. When an entity carries more
//! than one row for a name, readers here resolve to the most recently written
//! row.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{Result, WeaveError};
use crate::store::{WeaveStore, WeaveTransaction};
use crate::types::*;

// ==========================================
// WRITES
// ==========================================

pub async fn set_private(
    tx: &mut dyn WeaveTransaction,
    entity_index_id: EntityIndexId,
    entity_id: ManifestId,
    name: &str,
    value: &str,
) -> Result<()> {
    set(tx, MetaNamespace::Private, entity_index_id, entity_id, name, value).await
}

pub async fn set_public(
    tx: &mut dyn WeaveTransaction,
    entity_index_id: EntityIndexId,
    entity_id: ManifestId,
    name: &str,
    value: &str,
) -> Result<()> {
    set(tx, MetaNamespace::Public, entity_index_id, entity_id, name, value).await
}

async fn set(
    tx: &mut dyn WeaveTransaction,
    namespace: MetaNamespace,
    entity_index_id: EntityIndexId,
    entity_id: ManifestId,
    name: &str,
    value: &str,
) -> Result<()> {
    let row = MetaRow::new(entity_index_id, entity_id, name, value);
    tx.insert_meta(namespace, &row).await?;
    debug!(?namespace, entity_id = %entity_id, name, "meta row written");
    Ok(())
}

/// Write exactly one flat projection row from the supplied attributes. No
/// check is made that the full expected attribute set is present.
pub async fn write_flat_projection<'a, I>(
    tx: &mut dyn WeaveTransaction,
    entity_index_id: EntityIndexId,
    entity_id: ManifestId,
    attributes: I,
) -> Result<FlatPublicMeta>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let flat = FlatPublicMeta::from_attributes(entity_index_id, entity_id, attributes);
    tx.insert_flat(&flat).await?;
    Ok(flat)
}

// ==========================================
// READS
// ==========================================

/// Public attributes of an entity, one value per name (most recent wins),
/// plus `weaveEntityId`. An unknown entity yields just `weaveEntityId`.
pub async fn public_attributes(
    store: &dyn WeaveStore,
    entity_id: ManifestId,
) -> Result<BTreeMap<String, String>> {
    let rows = store.public_meta(entity_id).await?;
    let mut attributes: BTreeMap<String, String> = rows
        .into_iter()
        .map(|row| (row.meta_name, row.meta_value))
        .collect();
    attributes.insert(attr::WEAVE_ENTITY_ID.to_string(), entity_id.to_string());
    Ok(attributes)
}

/// Find the entity that owns a public `title` row equal to `title`.
pub async fn lookup_entity_by_title(store: &dyn WeaveStore, title: &str) -> Result<TitleMatch> {
    store
        .find_by_title(title, None)
        .await?
        .ok_or_else(|| WeaveError::not_found(format!("entity titled '{}'", title)))
}

/// A single public attribute, failing with `NotFound` when absent.
pub async fn required_public_value(
    store: &dyn WeaveStore,
    entity_id: ManifestId,
    name: &str,
) -> Result<String> {
    let rows = store.public_meta(entity_id).await?;
    latest_value(&rows, name)
        .map(str::to_string)
        .ok_or_else(|| missing_attribute(entity_id, name))
}

/// The flat projection as written at insertion time.
pub async fn flat_projection(
    store: &dyn WeaveStore,
    entity_id: ManifestId,
) -> Result<Option<FlatPublicMeta>> {
    store.flat_projection(entity_id).await
}

/// A flat projection recomputed from the current public rows. `None` when
/// the entity has no manifest.
pub async fn derive_flat_projection(
    store: &dyn WeaveStore,
    entity_id: ManifestId,
) -> Result<Option<FlatPublicMeta>> {
    let Some(manifest) = store.manifest(entity_id).await? else {
        return Ok(None);
    };
    let rows = store.public_meta(entity_id).await?;
    Ok(Some(FlatPublicMeta::from_attributes(
        manifest.entity_index_id,
        entity_id,
        rows.iter()
            .map(|row| (row.meta_name.as_str(), row.meta_value.as_str())),
    )))
}

/// Attribute records for every child of `parent_id`, in sort order.
///
/// `title` and `dataType` are required on each child; `object_id` is optional.
pub async fn hierarchy_items(
    store: &dyn WeaveStore,
    parent_id: ManifestId,
) -> Result<Vec<HierarchyItem>> {
    let mut items = Vec::new();
    for link in store.children_of(parent_id).await? {
        let rows = store.public_meta(link.child_id).await?;
        let title = latest_value(&rows, attr::TITLE)
            .ok_or_else(|| missing_attribute(link.child_id, attr::TITLE))?;
        let datatype = latest_value(&rows, attr::DATA_TYPE)
            .ok_or_else(|| missing_attribute(link.child_id, attr::DATA_TYPE))?;

        let mut item = HierarchyItem::new(title, datatype).with_weave_entity_id(link.child_id.0);
        if let Some(object_id) = latest_value(&rows, attr::OBJECT_ID) {
            item = item.with_object_id(object_id);
        }
        items.push(item);
    }
    Ok(items)
}

fn latest_value<'a>(rows: &'a [MetaRow], name: &str) -> Option<&'a str> {
    rows.iter()
        .rev()
        .find(|row| row.meta_name == name)
        .map(|row| row.meta_value.as_str())
}

fn missing_attribute(entity_id: ManifestId, name: &str) -> WeaveError {
    WeaveError::not_found(format!("public attribute '{}' for entity {}", name, entity_id))
}
