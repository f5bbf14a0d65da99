use serde::{Deserialize, Serialize};
use std::fmt;

// ─── Identifiers ──────────────────────────────────────────────

/// Opaque identity allocated by the entity registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityIndexId(pub u64);

/// Manifest handle. This is the "weave entity id" handed to callers, stored
/// in metadata rows and used as the hierarchy node id.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManifestId(pub u64);

impl fmt::Display for EntityIndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ManifestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ─── Manifest ─────────────────────────────────────────────────

/// Manifest type classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// Top-level grouping node (a data table), `type_id = 0`.
    Container,
    /// Child data item (an indicator/column), `type_id = 1`.
    Leaf,
}

impl EntityType {
    pub fn type_id(self) -> u8 {
        match self {
            EntityType::Container => 0,
            EntityType::Leaf => 1,
        }
    }

    pub fn from_type_id(type_id: u8) -> Option<Self> {
        match type_id {
            0 => Some(EntityType::Container),
            1 => Some(EntityType::Leaf),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub id: ManifestId,
    pub entity_index_id: EntityIndexId,
    pub entity_type: EntityType,
}

// ─── Metadata ─────────────────────────────────────────────────

/// Metadata namespace. Private rows carry import provenance and are never
/// returned by public read paths.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetaNamespace {
    Private,
    Public,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaRow {
    pub entity_index_id: EntityIndexId,
    pub entity_id: ManifestId,
    pub meta_name: String,
    pub meta_value: String,
}

impl MetaRow {
    pub fn new(
        entity_index_id: EntityIndexId,
        entity_id: ManifestId,
        meta_name: impl Into<String>,
        meta_value: impl Into<String>,
    ) -> Self {
        Self {
            entity_index_id,
            entity_id,
            meta_name: meta_name.into(),
            meta_value: meta_value.into(),
        }
    }
}

/// Well-known attribute names.
pub mod attr {
    pub const TITLE: &str = "title";
    pub const NAME: &str = "name";
    pub const DATA_TYPE: &str = "dataType";
    pub const OBJECT_ID: &str = "object_id";
    pub const YEAR: &str = "year";
    pub const MIN: &str = "min";
    pub const MAX: &str = "max";
    pub const KEY_TYPE: &str = "keyType";
    pub const DATA_TABLE: &str = "dataTable";
    pub const WEAVE_ENTITY_ID: &str = "weaveEntityId";

    pub const IMPORT_METHOD: &str = "importMethod";
    pub const SQL_SCHEMA: &str = "sqlSchema";
    pub const SQL_TABLE: &str = "sqlTable";
    pub const SQL_QUERY: &str = "sqlQuery";
    pub const CONNECTION: &str = "connection";
}

/// Result of a title lookup against public metadata.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleMatch {
    pub entity_index_id: EntityIndexId,
    pub entity_id: ManifestId,
}

// ─── Flat projection ──────────────────────────────────────────

/// Denormalized snapshot of a leaf's known public attributes.
///
/// Written once at insertion time and never refreshed. Later edits to public
/// metadata leave it stale; use `metadata::derive_flat_projection` for a view
/// recomputed from the public rows.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatPublicMeta {
    pub entity_index_id: Option<EntityIndexId>,
    pub weave_entity_id: Option<ManifestId>,
    pub title: Option<String>,
    pub name: Option<String>,
    pub data_type: Option<String>,
    pub object_id: Option<String>,
    pub year: Option<String>,
    pub min: Option<String>,
    pub max: Option<String>,
    pub key_type: Option<String>,
    pub data_table: Option<String>,
}

impl FlatPublicMeta {
    /// Collapse name/value pairs into the fixed column set. Values are copied
    /// verbatim; names outside the column set are skipped, and a repeated name
    /// keeps its last value.
    pub fn from_attributes<'a, I>(
        entity_index_id: EntityIndexId,
        entity_id: ManifestId,
        attributes: I,
    ) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut flat = FlatPublicMeta {
            entity_index_id: Some(entity_index_id),
            weave_entity_id: Some(entity_id),
            ..Default::default()
        };
        for (name, value) in attributes {
            let slot = match name {
                attr::TITLE => &mut flat.title,
                attr::NAME => &mut flat.name,
                attr::DATA_TYPE => &mut flat.data_type,
                attr::OBJECT_ID => &mut flat.object_id,
                attr::YEAR => &mut flat.year,
                attr::MIN => &mut flat.min,
                attr::MAX => &mut flat.max,
                attr::KEY_TYPE => &mut flat.key_type,
                attr::DATA_TABLE => &mut flat.data_table,
                _ => continue,
            };
            *slot = Some(value.to_string());
        }
        flat
    }
}

// ─── Hierarchy ────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyLink {
    pub entity_index_id: EntityIndexId,
    pub parent_id: ManifestId,
    pub child_id: ManifestId,
    /// 1-based, assigned as existing child count + 1. Never renumbered.
    pub sort_order: u32,
}

/// One `<attribute>` entry of a rendered category.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyItem {
    pub title: String,
    pub datatype: String,
    pub weave_entity_id: Option<u64>,
    pub object_id: Option<String>,
}

impl HierarchyItem {
    pub fn new(title: impl Into<String>, datatype: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            datatype: datatype.into(),
            ..Default::default()
        }
    }

    pub fn with_weave_entity_id(mut self, id: u64) -> Self {
        self.weave_entity_id = Some(id);
        self
    }

    pub fn with_object_id(mut self, object_id: impl Into<String>) -> Self {
        self.object_id = Some(object_id.into());
        self
    }
}

// ─── Ingestion requests/results ───────────────────────────────

/// Arguments for inserting one leaf row under a container.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDataRow {
    pub parent_id: ManifestId,
    pub title: String,
    pub name: String,
    pub data_type: String,
    pub sql_query: String,
    pub object_id: String,
    pub year: String,
    pub key_type: String,
    pub data_table: Option<String>,
    pub min: Option<String>,
    pub max: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertedRow {
    pub entity_index_id: EntityIndexId,
    pub entity_id: ManifestId,
    pub sort_order: u32,
}

/// Per-table row counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowCounts {
    pub entity_index: u64,
    pub manifest: u64,
    pub meta_private: u64,
    pub meta_public: u64,
    pub hierarchy: u64,
    pub flat_public_meta: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_type_round_trips_type_id() {
        assert_eq!(EntityType::Container.type_id(), 0);
        assert_eq!(EntityType::Leaf.type_id(), 1);
        assert_eq!(EntityType::from_type_id(1), Some(EntityType::Leaf));
        assert_eq!(EntityType::from_type_id(2), None);
    }

    #[test]
    fn flat_projection_picks_known_columns() {
        let attrs = [
            ("title", "GDP"),
            ("dataType", "number"),
            ("min", ""),
            ("colour", "blue"),
            ("weaveEntityId", "3"),
        ];
        let flat = FlatPublicMeta::from_attributes(EntityIndexId(9), ManifestId(3), attrs);
        assert_eq!(flat.weave_entity_id, Some(ManifestId(3)));
        assert_eq!(flat.entity_index_id, Some(EntityIndexId(9)));
        assert_eq!(flat.title.as_deref(), Some("GDP"));
        assert_eq!(flat.data_type.as_deref(), Some("number"));
        assert_eq!(flat.min.as_deref(), Some(""));
        assert_eq!(flat.max, None);
        assert_eq!(flat.data_table, None);
    }

    #[test]
    fn ids_serialize_as_plain_numbers() {
        let json = serde_yaml::to_string(&ManifestId(42)).unwrap();
        assert_eq!(json.trim(), "42");
    }
}
