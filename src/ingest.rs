//! Ingestion Service - the Weave write path
//!
//! Every operation here runs as one transaction against the store: the entity
//! index, its manifest, its metadata rows and (for leaves) the hierarchy link
//! and flat projection are committed together or not at all.

use std::iter;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::WeaveConfig;
use crate::error::{Result, WeaveError};
use crate::store::{LockKey, WeaveStore, WeaveTransaction};
use crate::types::*;
use crate::{hierarchy, manifest, metadata, registry};

/// `dataType` values are normalized so the client sees `number`, not `numeric`.
pub fn normalize_data_type(data_type: &str) -> &str {
    match data_type {
        "numeric" => "number",
        other => other,
    }
}

pub struct IngestionService {
    store: Arc<dyn WeaveStore>,
    config: WeaveConfig,
}

impl IngestionService {
    pub fn new(store: Arc<dyn WeaveStore>, config: WeaveConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &WeaveConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn WeaveStore> {
        &self.store
    }

    // ==========================================
    // TABLES
    // ==========================================

    /// Return the entity titled `title`, creating a container if none exists.
    ///
    /// Creation writes one entity index, one manifest (`type_id = 0`), the four
    /// private provenance attributes and the public `title`. Concurrent calls
    /// for the same title are serialized on a title lock, so exactly one of
    /// them creates the entity.
    pub async fn get_or_create_table(&self, title: &str) -> Result<ManifestId> {
        let mut tx = self.store.begin().await?;
        let result = self.get_or_create_table_in(tx.as_mut(), title).await;
        match result {
            Ok((id, false)) => {
                tx.rollback().await?;
                debug!(entity_id = %id, title, "data table already registered");
                Ok(id)
            }
            Ok((id, true)) => {
                tx.commit().await?;
                info!(entity_id = %id, title, "created data table");
                Ok(id)
            }
            Err(err) => abort(tx, "get_or_create_table", err).await,
        }
    }

    async fn get_or_create_table_in(
        &self,
        tx: &mut dyn WeaveTransaction,
        title: &str,
    ) -> Result<(ManifestId, bool)> {
        tx.lock(&LockKey::Title(title.to_string())).await?;
        // same match as `metadata::lookup_entity_by_title`: any entity with this title
        if let Some(found) = tx.find_by_title(title, None).await? {
            return Ok((found.entity_id, false));
        }

        let index = registry::allocate(tx).await?;
        let id = manifest::register(tx, index, EntityType::Container).await?;

        let private = [
            (attr::IMPORT_METHOD, self.config.import_method.as_str()),
            (attr::SQL_SCHEMA, self.config.sql_schema.as_str()),
            (attr::SQL_TABLE, self.config.sql_table.as_str()),
            (attr::CONNECTION, self.config.connection.as_str()),
        ];
        for (name, value) in private {
            metadata::set_private(tx, index, id, name, value).await?;
        }
        metadata::set_public(tx, index, id, attr::TITLE, title).await?;

        Ok((id, true))
    }

    // ==========================================
    // DATA ROWS
    // ==========================================

    /// Insert one leaf under `row.parent_id`.
    ///
    /// Writes one entity index, one manifest (`type_id = 1`), one hierarchy
    /// link, five private attributes, eight public attributes (nine when
    /// `data_table` is given) and one flat projection row.
    pub async fn insert_data_row(&self, row: NewDataRow) -> Result<InsertedRow> {
        let mut tx = self.store.begin().await?;
        let result = self.insert_data_row_in(tx.as_mut(), &row).await;
        match result {
            Ok(inserted) => {
                tx.commit().await?;
                info!(
                    parent_id = %row.parent_id,
                    entity_id = %inserted.entity_id,
                    sort_order = inserted.sort_order,
                    title = %row.title,
                    "inserted data row"
                );
                Ok(inserted)
            }
            Err(err) => abort(tx, "insert_data_row", err).await,
        }
    }

    async fn insert_data_row_in(
        &self,
        tx: &mut dyn WeaveTransaction,
        row: &NewDataRow,
    ) -> Result<InsertedRow> {
        let data_type = normalize_data_type(&row.data_type);

        let index = registry::allocate(tx).await?;
        let id = manifest::register(tx, index, EntityType::Leaf).await?;
        let sort_order = hierarchy::link(tx, index, row.parent_id, id).await?;

        let private = [
            (attr::SQL_QUERY, row.sql_query.as_str()),
            (attr::SQL_SCHEMA, self.config.sql_schema.as_str()),
            (attr::SQL_TABLE, self.config.sql_table.as_str()),
            (attr::IMPORT_METHOD, self.config.import_method.as_str()),
            (attr::CONNECTION, self.config.connection.as_str()),
        ];
        for (name, value) in private {
            metadata::set_private(tx, index, id, name, value).await?;
        }

        let mut public: Vec<(&str, &str)> = vec![
            (attr::TITLE, row.title.as_str()),
            (attr::NAME, row.name.as_str()),
            (attr::DATA_TYPE, data_type),
            (attr::OBJECT_ID, row.object_id.as_str()),
            (attr::YEAR, row.year.as_str()),
            (attr::MIN, row.min.as_deref().unwrap_or("")),
            (attr::MAX, row.max.as_deref().unwrap_or("")),
            (attr::KEY_TYPE, row.key_type.as_str()),
        ];
        if let Some(data_table) = row.data_table.as_deref() {
            public.push((attr::DATA_TABLE, data_table));
        }
        for &(name, value) in &public {
            metadata::set_public(tx, index, id, name, value).await?;
        }

        let weave_entity_id = id.to_string();
        let flat_attributes = public
            .iter()
            .copied()
            .chain(iter::once((attr::WEAVE_ENTITY_ID, weave_entity_id.as_str())));
        metadata::write_flat_projection(tx, index, id, flat_attributes).await?;

        Ok(InsertedRow {
            entity_index_id: index,
            entity_id: id,
            sort_order,
        })
    }

    // ==========================================
    // BULK CLEAR
    // ==========================================

    /// Irreversibly delete every entity and everything attached to one.
    pub async fn clear_all(&self) -> Result<u64> {
        let removed = self.store.clear_all().await?;
        info!(removed, "cleared all weave metadata");
        Ok(removed)
    }
}

async fn abort<T>(
    tx: Box<dyn WeaveTransaction>,
    operation: &'static str,
    err: WeaveError,
) -> Result<T> {
    warn!(operation, error = %err, "rolling back weave transaction");
    if let Err(rollback_err) = tx.rollback().await {
        warn!(operation, error = %rollback_err, "rollback failed");
    }
    Err(err)
}
