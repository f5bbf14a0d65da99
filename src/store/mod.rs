//! Storage port traits for the Weave tables.
//!
//! The data components and the ingestion service depend only on these traits.
//! `InMemoryWeaveStore` backs tests and embedded use; `PgWeaveStore` (feature
//! `database`) is the Postgres adapter.
//!
//! Reads go straight to the store. Writes go through a [`WeaveTransaction`]
//! obtained from [`WeaveStore::begin`]: nothing it writes is visible to
//! readers until `commit`, and dropping it without committing discards it.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::*;

pub mod memory;

/// Serialization key for read-count-then-insert sequences.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum LockKey {
    /// Child ordering under one parent.
    Parent(ManifestId),
    /// Title claim during get-or-create.
    Title(String),
}

#[async_trait]
pub trait WeaveStore: Send + Sync {
    /// Open a unit of work.
    async fn begin(&self) -> Result<Box<dyn WeaveTransaction>>;

    // ── Reads ──

    /// Earliest public `title` row equal to `title`, optionally restricted
    /// to manifests of one type.
    async fn find_by_title(
        &self,
        title: &str,
        entity_type: Option<EntityType>,
    ) -> Result<Option<TitleMatch>>;

    async fn manifest(&self, id: ManifestId) -> Result<Option<Manifest>>;

    /// All public rows for an entity, in insertion order.
    async fn public_meta(&self, entity_id: ManifestId) -> Result<Vec<MetaRow>>;

    /// Children of `parent_id` sorted by `sort_order` ascending.
    async fn children_of(&self, parent_id: ManifestId) -> Result<Vec<HierarchyLink>>;

    /// Distinct parent ids, ascending.
    async fn distinct_parents(&self) -> Result<Vec<ManifestId>>;

    async fn flat_projection(&self, entity_id: ManifestId) -> Result<Option<FlatPublicMeta>>;

    async fn row_counts(&self) -> Result<RowCounts>;

    // ── Destructive ──

    /// Delete every entity index and everything referencing one.
    /// Returns the number of entity index rows removed.
    async fn clear_all(&self) -> Result<u64>;
}

#[async_trait]
pub trait WeaveTransaction: Send {
    async fn insert_entity_index(&mut self) -> Result<EntityIndexId>;

    async fn manifest_for_index(&mut self, entity_index_id: EntityIndexId)
        -> Result<Option<Manifest>>;

    /// Fails with `DuplicateManifest` if the index already has one.
    async fn insert_manifest(
        &mut self,
        entity_index_id: EntityIndexId,
        entity_type: EntityType,
    ) -> Result<Manifest>;

    async fn manifest(&mut self, id: ManifestId) -> Result<Option<Manifest>>;

    async fn insert_meta(&mut self, namespace: MetaNamespace, row: &MetaRow) -> Result<()>;

    async fn find_by_title(
        &mut self,
        title: &str,
        entity_type: Option<EntityType>,
    ) -> Result<Option<TitleMatch>>;

    /// Hold `key` until the transaction ends.
    async fn lock(&mut self, key: &LockKey) -> Result<()>;

    async fn count_children(&mut self, parent_id: ManifestId) -> Result<u64>;

    async fn insert_hierarchy(&mut self, link: &HierarchyLink) -> Result<()>;

    async fn insert_flat(&mut self, flat: &FlatPublicMeta) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
