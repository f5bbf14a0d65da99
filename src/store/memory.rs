//! In-process Weave store.
//!
//! A transaction owns the writer lock for its whole lifetime and writes to a
//! staged copy of the committed tables; `commit` swaps the copy in, drop or
//! `rollback` throws it away. Writers are therefore fully serialized, which
//! also serializes child ordering under every parent. Reads only touch the
//! committed tables for as long as the query takes, so they never wait on an
//! open transaction. Id sequences live outside the tables and are never
//! rolled back, matching database sequence semantics.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use super::{LockKey, WeaveStore, WeaveTransaction};
use crate::error::{Result, WeaveError};
use crate::types::*;

#[derive(Debug, Clone, Default)]
struct Tables {
    entity_index: BTreeSet<EntityIndexId>,
    manifests: Vec<Manifest>,
    meta_private: Vec<MetaRow>,
    meta_public: Vec<MetaRow>,
    hierarchy: Vec<HierarchyLink>,
    flat: Vec<FlatPublicMeta>,
}

impl Tables {
    fn manifest(&self, id: ManifestId) -> Option<&Manifest> {
        self.manifests.iter().find(|m| m.id == id)
    }

    fn find_by_title(&self, title: &str, entity_type: Option<EntityType>) -> Option<TitleMatch> {
        self.meta_public
            .iter()
            .filter(|row| row.meta_name == attr::TITLE && row.meta_value == title)
            .filter(|row| self.entity_index.contains(&row.entity_index_id))
            .find(|row| match entity_type {
                None => true,
                Some(kind) => self
                    .manifest(row.entity_id)
                    .is_some_and(|m| m.entity_type == kind),
            })
            .map(|row| TitleMatch {
                entity_index_id: row.entity_index_id,
                entity_id: row.entity_id,
            })
    }

    fn require_index(&self, entity_index_id: EntityIndexId) -> Result<()> {
        if self.entity_index.contains(&entity_index_id) {
            Ok(())
        } else {
            Err(WeaveError::Storage(anyhow::anyhow!(
                "foreign key violation: entity index {} does not exist",
                entity_index_id
            )))
        }
    }
}

#[derive(Debug, Default)]
struct Sequences {
    entity_index: AtomicU64,
    manifest: AtomicU64,
}

impl Sequences {
    fn next(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryWeaveStore {
    writer: Arc<Mutex<()>>,
    tables: Arc<Mutex<Tables>>,
    sequences: Arc<Sequences>,
}

impl InMemoryWeaveStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WeaveStore for InMemoryWeaveStore {
    async fn begin(&self) -> Result<Box<dyn WeaveTransaction>> {
        let writer = self.writer.clone().lock_owned().await;
        let staged = self.tables.lock().await.clone();
        Ok(Box::new(MemoryTransaction {
            _writer: writer,
            tables: self.tables.clone(),
            staged,
            sequences: self.sequences.clone(),
        }))
    }

    async fn find_by_title(
        &self,
        title: &str,
        entity_type: Option<EntityType>,
    ) -> Result<Option<TitleMatch>> {
        Ok(self.tables.lock().await.find_by_title(title, entity_type))
    }

    async fn manifest(&self, id: ManifestId) -> Result<Option<Manifest>> {
        Ok(self.tables.lock().await.manifest(id).cloned())
    }

    async fn public_meta(&self, entity_id: ManifestId) -> Result<Vec<MetaRow>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .meta_public
            .iter()
            .filter(|row| row.entity_id == entity_id)
            .cloned()
            .collect())
    }

    async fn children_of(&self, parent_id: ManifestId) -> Result<Vec<HierarchyLink>> {
        let tables = self.tables.lock().await;
        let mut children: Vec<HierarchyLink> = tables
            .hierarchy
            .iter()
            .filter(|link| link.parent_id == parent_id)
            .cloned()
            .collect();
        children.sort_by_key(|link| link.sort_order);
        Ok(children)
    }

    async fn distinct_parents(&self) -> Result<Vec<ManifestId>> {
        let tables = self.tables.lock().await;
        let parents: BTreeSet<ManifestId> =
            tables.hierarchy.iter().map(|link| link.parent_id).collect();
        Ok(parents.into_iter().collect())
    }

    async fn flat_projection(&self, entity_id: ManifestId) -> Result<Option<FlatPublicMeta>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .flat
            .iter()
            .find(|flat| flat.weave_entity_id == Some(entity_id))
            .cloned())
    }

    async fn row_counts(&self) -> Result<RowCounts> {
        let tables = self.tables.lock().await;
        Ok(RowCounts {
            entity_index: tables.entity_index.len() as u64,
            manifest: tables.manifests.len() as u64,
            meta_private: tables.meta_private.len() as u64,
            meta_public: tables.meta_public.len() as u64,
            hierarchy: tables.hierarchy.len() as u64,
            flat_public_meta: tables.flat.len() as u64,
        })
    }

    async fn clear_all(&self) -> Result<u64> {
        // a transaction committing afterwards would resurrect its snapshot
        let _writer = self.writer.lock().await;
        let mut tables = self.tables.lock().await;
        let removed = tables.entity_index.len() as u64;
        // every other row references an entity index, so the cascade empties them all
        *tables = Tables::default();
        Ok(removed)
    }
}

struct MemoryTransaction {
    _writer: OwnedMutexGuard<()>,
    tables: Arc<Mutex<Tables>>,
    staged: Tables,
    sequences: Arc<Sequences>,
}

#[async_trait]
impl WeaveTransaction for MemoryTransaction {
    async fn insert_entity_index(&mut self) -> Result<EntityIndexId> {
        let id = EntityIndexId(Sequences::next(&self.sequences.entity_index));
        self.staged.entity_index.insert(id);
        Ok(id)
    }

    async fn manifest_for_index(
        &mut self,
        entity_index_id: EntityIndexId,
    ) -> Result<Option<Manifest>> {
        Ok(self
            .staged
            .manifests
            .iter()
            .find(|m| m.entity_index_id == entity_index_id)
            .cloned())
    }

    async fn insert_manifest(
        &mut self,
        entity_index_id: EntityIndexId,
        entity_type: EntityType,
    ) -> Result<Manifest> {
        self.staged.require_index(entity_index_id)?;
        if self.manifest_for_index(entity_index_id).await?.is_some() {
            return Err(WeaveError::DuplicateManifest(entity_index_id));
        }
        let manifest = Manifest {
            id: ManifestId(Sequences::next(&self.sequences.manifest)),
            entity_index_id,
            entity_type,
        };
        self.staged.manifests.push(manifest.clone());
        Ok(manifest)
    }

    async fn manifest(&mut self, id: ManifestId) -> Result<Option<Manifest>> {
        Ok(self.staged.manifest(id).cloned())
    }

    async fn insert_meta(&mut self, namespace: MetaNamespace, row: &MetaRow) -> Result<()> {
        self.staged.require_index(row.entity_index_id)?;
        let table = match namespace {
            MetaNamespace::Private => &mut self.staged.meta_private,
            MetaNamespace::Public => &mut self.staged.meta_public,
        };
        table.push(row.clone());
        Ok(())
    }

    async fn find_by_title(
        &mut self,
        title: &str,
        entity_type: Option<EntityType>,
    ) -> Result<Option<TitleMatch>> {
        Ok(self.staged.find_by_title(title, entity_type))
    }

    async fn lock(&mut self, key: &LockKey) -> Result<()> {
        // the writer guard already excludes every other transaction
        debug!(?key, "in-memory lock");
        Ok(())
    }

    async fn count_children(&mut self, parent_id: ManifestId) -> Result<u64> {
        Ok(self
            .staged
            .hierarchy
            .iter()
            .filter(|link| link.parent_id == parent_id)
            .count() as u64)
    }

    async fn insert_hierarchy(&mut self, link: &HierarchyLink) -> Result<()> {
        self.staged.require_index(link.entity_index_id)?;
        let taken = self
            .staged
            .hierarchy
            .iter()
            .any(|l| l.parent_id == link.parent_id && l.sort_order == link.sort_order);
        if taken {
            return Err(WeaveError::Storage(anyhow::anyhow!(
                "unique violation: parent {} already has sort_order {}",
                link.parent_id,
                link.sort_order
            )));
        }
        self.staged.hierarchy.push(link.clone());
        Ok(())
    }

    async fn insert_flat(&mut self, flat: &FlatPublicMeta) -> Result<()> {
        if let Some(index) = flat.entity_index_id {
            self.staged.require_index(index)?;
        }
        self.staged.flat.push(flat.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction {
            _writer,
            tables,
            staged,
            ..
        } = *self;
        *tables.lock().await = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
