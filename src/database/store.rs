//! `WeaveStore` over a sqlx `PgPool`.
//!
//! Every table references `weave_entity_index` with `ON DELETE CASCADE`, so
//! `clear_all` is a single delete. Child ordering and title claims are
//! serialized with transaction-scoped advisory locks.

use async_trait::async_trait;
use sqlx::{FromRow, PgExecutor, PgPool, Postgres, Transaction};
use tracing::{debug, info};

use crate::error::{Result, WeaveError};
use crate::store::{LockKey, WeaveStore, WeaveTransaction};
use crate::types::*;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS weave_entity_index (
        id BIGSERIAL PRIMARY KEY
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS weave_manifest (
        entity_id BIGSERIAL PRIMARY KEY,
        entity_index_id BIGINT NOT NULL UNIQUE
            REFERENCES weave_entity_index(id) ON DELETE CASCADE,
        type_id SMALLINT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS weave_meta_private (
        id BIGSERIAL PRIMARY KEY,
        entity_index_id BIGINT NOT NULL
            REFERENCES weave_entity_index(id) ON DELETE CASCADE,
        entity_id BIGINT NOT NULL,
        meta_name TEXT NOT NULL,
        meta_value TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS weave_meta_public (
        id BIGSERIAL PRIMARY KEY,
        entity_index_id BIGINT NOT NULL
            REFERENCES weave_entity_index(id) ON DELETE CASCADE,
        entity_id BIGINT NOT NULL,
        meta_name TEXT NOT NULL,
        meta_value TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS weave_meta_public_entity_idx ON weave_meta_public (entity_id, meta_name)",
    "CREATE INDEX IF NOT EXISTS weave_meta_public_value_idx ON weave_meta_public (meta_name, meta_value)",
    r#"
    CREATE TABLE IF NOT EXISTS weave_hierarchy (
        id BIGSERIAL PRIMARY KEY,
        entity_index_id BIGINT NOT NULL
            REFERENCES weave_entity_index(id) ON DELETE CASCADE,
        parent_id BIGINT NOT NULL,
        child_id BIGINT NOT NULL,
        sort_order INTEGER NOT NULL,
        UNIQUE (parent_id, sort_order)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS weave_flat_public_meta (
        id BIGSERIAL PRIMARY KEY,
        entity_index_id BIGINT
            REFERENCES weave_entity_index(id) ON DELETE CASCADE,
        weave_entity_id BIGINT,
        title TEXT,
        name TEXT,
        data_type TEXT,
        object_id TEXT,
        year TEXT,
        min TEXT,
        max TEXT,
        key_type TEXT,
        data_table TEXT
    )
    "#,
];

/// Advisory lock classes (first key of the two-key form).
const PARENT_LOCK_CLASS: i32 = 0x5745_0001;
const TITLE_LOCK_CLASS: i32 = 0x5745_0002;

#[derive(Clone)]
pub struct PgWeaveStore {
    pool: PgPool,
}

impl PgWeaveStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &super::DatabaseConfig) -> Result<Self> {
        Ok(Self::new(super::connect(config).await?))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the Weave tables and indexes if they do not exist.
    pub async fn ensure_schema(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for statement in SCHEMA {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        info!("weave schema ready");
        Ok(())
    }
}

// ==========================================
// ROW MAPPING
// ==========================================

fn to_db(id: u64) -> Result<i64> {
    i64::try_from(id).map_err(|_| WeaveError::InvalidInput(format!("id {} out of range", id)))
}

fn from_db(id: i64) -> Result<u64> {
    u64::try_from(id).map_err(|_| WeaveError::Storage(anyhow::anyhow!("negative id {}", id)))
}

#[derive(FromRow)]
struct ManifestRow {
    entity_id: i64,
    entity_index_id: i64,
    type_id: i16,
}

impl TryFrom<ManifestRow> for Manifest {
    type Error = WeaveError;

    fn try_from(row: ManifestRow) -> Result<Self> {
        let entity_type = u8::try_from(row.type_id)
            .ok()
            .and_then(EntityType::from_type_id)
            .ok_or_else(|| {
                WeaveError::Storage(anyhow::anyhow!("unknown manifest type_id {}", row.type_id))
            })?;
        Ok(Manifest {
            id: ManifestId(from_db(row.entity_id)?),
            entity_index_id: EntityIndexId(from_db(row.entity_index_id)?),
            entity_type,
        })
    }
}

#[derive(FromRow)]
struct MetaDbRow {
    entity_index_id: i64,
    entity_id: i64,
    meta_name: String,
    meta_value: String,
}

impl TryFrom<MetaDbRow> for MetaRow {
    type Error = WeaveError;

    fn try_from(row: MetaDbRow) -> Result<Self> {
        Ok(MetaRow {
            entity_index_id: EntityIndexId(from_db(row.entity_index_id)?),
            entity_id: ManifestId(from_db(row.entity_id)?),
            meta_name: row.meta_name,
            meta_value: row.meta_value,
        })
    }
}

#[derive(FromRow)]
struct HierarchyRow {
    entity_index_id: i64,
    parent_id: i64,
    child_id: i64,
    sort_order: i32,
}

impl TryFrom<HierarchyRow> for HierarchyLink {
    type Error = WeaveError;

    fn try_from(row: HierarchyRow) -> Result<Self> {
        Ok(HierarchyLink {
            entity_index_id: EntityIndexId(from_db(row.entity_index_id)?),
            parent_id: ManifestId(from_db(row.parent_id)?),
            child_id: ManifestId(from_db(row.child_id)?),
            sort_order: u32::try_from(row.sort_order).map_err(|_| {
                WeaveError::Storage(anyhow::anyhow!("negative sort_order {}", row.sort_order))
            })?,
        })
    }
}

#[derive(FromRow)]
struct FlatRow {
    entity_index_id: Option<i64>,
    weave_entity_id: Option<i64>,
    title: Option<String>,
    name: Option<String>,
    data_type: Option<String>,
    object_id: Option<String>,
    year: Option<String>,
    min: Option<String>,
    max: Option<String>,
    key_type: Option<String>,
    data_table: Option<String>,
}

impl TryFrom<FlatRow> for FlatPublicMeta {
    type Error = WeaveError;

    fn try_from(row: FlatRow) -> Result<Self> {
        Ok(FlatPublicMeta {
            entity_index_id: row.entity_index_id.map(from_db).transpose()?.map(EntityIndexId),
            weave_entity_id: row.weave_entity_id.map(from_db).transpose()?.map(ManifestId),
            title: row.title,
            name: row.name,
            data_type: row.data_type,
            object_id: row.object_id,
            year: row.year,
            min: row.min,
            max: row.max,
            key_type: row.key_type,
            data_table: row.data_table,
        })
    }
}

fn meta_table(namespace: MetaNamespace) -> &'static str {
    match namespace {
        MetaNamespace::Private => "weave_meta_private",
        MetaNamespace::Public => "weave_meta_public",
    }
}

// ==========================================
// SHARED QUERIES (pool or transaction)
// ==========================================

async fn find_by_title<'e, E: PgExecutor<'e>>(
    executor: E,
    title: &str,
    entity_type: Option<EntityType>,
) -> Result<Option<TitleMatch>> {
    let row: Option<(i64, i64)> = sqlx::query_as(
        r#"
        SELECT p.entity_index_id, p.entity_id
        FROM weave_meta_public p
        LEFT JOIN weave_manifest m ON m.entity_id = p.entity_id
        WHERE p.meta_name = 'title'
          AND p.meta_value = $1
          AND p.entity_index_id IS NOT NULL
          AND ($2::SMALLINT IS NULL OR m.type_id = $2)
        ORDER BY p.id
        LIMIT 1
        "#,
    )
    .bind(title)
    .bind(entity_type.map(|t| i16::from(t.type_id())))
    .fetch_optional(executor)
    .await?;

    row.map(|(entity_index_id, entity_id)| {
        Ok(TitleMatch {
            entity_index_id: EntityIndexId(from_db(entity_index_id)?),
            entity_id: ManifestId(from_db(entity_id)?),
        })
    })
    .transpose()
}

async fn manifest_by_id<'e, E: PgExecutor<'e>>(
    executor: E,
    id: ManifestId,
) -> Result<Option<Manifest>> {
    let row: Option<ManifestRow> = sqlx::query_as(
        "SELECT entity_id, entity_index_id, type_id FROM weave_manifest WHERE entity_id = $1",
    )
    .bind(to_db(id.0)?)
    .fetch_optional(executor)
    .await?;
    row.map(Manifest::try_from).transpose()
}

// ==========================================
// STORE
// ==========================================

#[async_trait]
impl WeaveStore for PgWeaveStore {
    async fn begin(&self) -> Result<Box<dyn WeaveTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgWeaveTransaction { tx }))
    }

    async fn find_by_title(
        &self,
        title: &str,
        entity_type: Option<EntityType>,
    ) -> Result<Option<TitleMatch>> {
        find_by_title(&self.pool, title, entity_type).await
    }

    async fn manifest(&self, id: ManifestId) -> Result<Option<Manifest>> {
        manifest_by_id(&self.pool, id).await
    }

    async fn public_meta(&self, entity_id: ManifestId) -> Result<Vec<MetaRow>> {
        let rows: Vec<MetaDbRow> = sqlx::query_as(
            r#"
            SELECT entity_index_id, entity_id, meta_name, meta_value
            FROM weave_meta_public
            WHERE entity_id = $1
            ORDER BY id
            "#,
        )
        .bind(to_db(entity_id.0)?)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(MetaRow::try_from).collect()
    }

    async fn children_of(&self, parent_id: ManifestId) -> Result<Vec<HierarchyLink>> {
        let rows: Vec<HierarchyRow> = sqlx::query_as(
            r#"
            SELECT entity_index_id, parent_id, child_id, sort_order
            FROM weave_hierarchy
            WHERE parent_id = $1
            ORDER BY sort_order
            "#,
        )
        .bind(to_db(parent_id.0)?)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(HierarchyLink::try_from).collect()
    }

    async fn distinct_parents(&self) -> Result<Vec<ManifestId>> {
        let rows: Vec<i64> =
            sqlx::query_scalar("SELECT DISTINCT parent_id FROM weave_hierarchy ORDER BY parent_id")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter()
            .map(|id| from_db(id).map(ManifestId))
            .collect()
    }

    async fn flat_projection(&self, entity_id: ManifestId) -> Result<Option<FlatPublicMeta>> {
        let row: Option<FlatRow> = sqlx::query_as(
            r#"
            SELECT entity_index_id, weave_entity_id, title, name, data_type, object_id,
                   year, min, max, key_type, data_table
            FROM weave_flat_public_meta
            WHERE weave_entity_id = $1
            ORDER BY id
            LIMIT 1
            "#,
        )
        .bind(to_db(entity_id.0)?)
        .fetch_optional(&self.pool)
        .await?;
        row.map(FlatPublicMeta::try_from).transpose()
    }

    async fn row_counts(&self) -> Result<RowCounts> {
        let (entity_index, manifest, meta_private, meta_public, hierarchy, flat): (
            i64,
            i64,
            i64,
            i64,
            i64,
            i64,
        ) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM weave_entity_index),
                (SELECT COUNT(*) FROM weave_manifest),
                (SELECT COUNT(*) FROM weave_meta_private),
                (SELECT COUNT(*) FROM weave_meta_public),
                (SELECT COUNT(*) FROM weave_hierarchy),
                (SELECT COUNT(*) FROM weave_flat_public_meta)
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(RowCounts {
            entity_index: from_db(entity_index)?,
            manifest: from_db(manifest)?,
            meta_private: from_db(meta_private)?,
            meta_public: from_db(meta_public)?,
            hierarchy: from_db(hierarchy)?,
            flat_public_meta: from_db(flat)?,
        })
    }

    async fn clear_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM weave_entity_index")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// ==========================================
// TRANSACTION
// ==========================================

struct PgWeaveTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl WeaveTransaction for PgWeaveTransaction {
    async fn insert_entity_index(&mut self) -> Result<EntityIndexId> {
        let id: i64 = sqlx::query_scalar("INSERT INTO weave_entity_index DEFAULT VALUES RETURNING id")
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(EntityIndexId(from_db(id)?))
    }

    async fn manifest_for_index(
        &mut self,
        entity_index_id: EntityIndexId,
    ) -> Result<Option<Manifest>> {
        let row: Option<ManifestRow> = sqlx::query_as(
            "SELECT entity_id, entity_index_id, type_id FROM weave_manifest WHERE entity_index_id = $1",
        )
        .bind(to_db(entity_index_id.0)?)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(Manifest::try_from).transpose()
    }

    async fn insert_manifest(
        &mut self,
        entity_index_id: EntityIndexId,
        entity_type: EntityType,
    ) -> Result<Manifest> {
        let row: ManifestRow = sqlx::query_as(
            r#"
            INSERT INTO weave_manifest (entity_index_id, type_id)
            VALUES ($1, $2)
            RETURNING entity_id, entity_index_id, type_id
            "#,
        )
        .bind(to_db(entity_index_id.0)?)
        .bind(i16::from(entity_type.type_id()))
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                WeaveError::DuplicateManifest(entity_index_id)
            }
            _ => WeaveError::Database(e),
        })?;
        Manifest::try_from(row)
    }

    async fn manifest(&mut self, id: ManifestId) -> Result<Option<Manifest>> {
        manifest_by_id(&mut *self.tx, id).await
    }

    async fn insert_meta(&mut self, namespace: MetaNamespace, row: &MetaRow) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (entity_index_id, entity_id, meta_name, meta_value) VALUES ($1, $2, $3, $4)",
            meta_table(namespace)
        );
        sqlx::query(&sql)
            .bind(to_db(row.entity_index_id.0)?)
            .bind(to_db(row.entity_id.0)?)
            .bind(&row.meta_name)
            .bind(&row.meta_value)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn find_by_title(
        &mut self,
        title: &str,
        entity_type: Option<EntityType>,
    ) -> Result<Option<TitleMatch>> {
        find_by_title(&mut *self.tx, title, entity_type).await
    }

    async fn lock(&mut self, key: &LockKey) -> Result<()> {
        match key {
            LockKey::Parent(parent_id) => {
                // truncation only widens the lock, it never splits one parent
                sqlx::query("SELECT pg_advisory_xact_lock($1, $2)")
                    .bind(PARENT_LOCK_CLASS)
                    .bind(parent_id.0 as i32)
                    .execute(&mut *self.tx)
                    .await?;
            }
            LockKey::Title(title) => {
                sqlx::query("SELECT pg_advisory_xact_lock($1, hashtext($2))")
                    .bind(TITLE_LOCK_CLASS)
                    .bind(title)
                    .execute(&mut *self.tx)
                    .await?;
            }
        }
        debug!(?key, "advisory lock acquired");
        Ok(())
    }

    async fn count_children(&mut self, parent_id: ManifestId) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM weave_hierarchy WHERE parent_id = $1")
            .bind(to_db(parent_id.0)?)
            .fetch_one(&mut *self.tx)
            .await?;
        from_db(count)
    }

    async fn insert_hierarchy(&mut self, link: &HierarchyLink) -> Result<()> {
        let sort_order = i32::try_from(link.sort_order).map_err(|_| {
            WeaveError::InvalidInput(format!("sort_order {} out of range", link.sort_order))
        })?;
        sqlx::query(
            r#"
            INSERT INTO weave_hierarchy (entity_index_id, parent_id, child_id, sort_order)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(to_db(link.entity_index_id.0)?)
        .bind(to_db(link.parent_id.0)?)
        .bind(to_db(link.child_id.0)?)
        .bind(sort_order)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_flat(&mut self, flat: &FlatPublicMeta) -> Result<()> {
        let entity_index_id = flat.entity_index_id.map(|id| to_db(id.0)).transpose()?;
        let weave_entity_id = flat.weave_entity_id.map(|id| to_db(id.0)).transpose()?;
        sqlx::query(
            r#"
            INSERT INTO weave_flat_public_meta (
                entity_index_id, weave_entity_id, title, name, data_type, object_id,
                year, min, max, key_type, data_table
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(entity_index_id)
        .bind(weave_entity_id)
        .bind(&flat.title)
        .bind(&flat.name)
        .bind(&flat.data_type)
        .bind(&flat.object_id)
        .bind(&flat.year)
        .bind(&flat.min)
        .bind(&flat.max)
        .bind(&flat.key_type)
        .bind(&flat.data_table)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let PgWeaveTransaction { tx } = *self;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let PgWeaveTransaction { tx } = *self;
        tx.rollback().await?;
        Ok(())
    }
}
