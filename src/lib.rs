//! Weave metadata store
//!
//! Generic entity/attribute metadata layered over a relational store. Entities
//! describe hierarchical data tables (containers) and their indicators (leaves)
//! for the Weave visualization client.
//!
//! ## Write path
//! All writes flow through [`IngestionService`], which composes the entity
//! registry, manifest, metadata store and hierarchy table into one transaction:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use weave_meta::{InMemoryWeaveStore, IngestionService, WeaveConfig};
//!
//! # async fn demo() -> weave_meta::Result<()> {
//! let store = Arc::new(InMemoryWeaveStore::new());
//! let service = IngestionService::new(store.clone(), WeaveConfig::default());
//! let table = service.get_or_create_table("Countries").await?;
//! let xml = weave_meta::xml::render_full_hierarchy(&*store).await?;
//! # let _ = (table, xml);
//! # Ok(())
//! # }
//! ```
//!
//! ## Read path
//! [`metadata`] and [`xml`] only read; they never open a transaction.

// Core error handling
pub mod error;

// Shared row and id types
pub mod types;

// Settings passed explicitly into the write path
pub mod config;
pub mod telemetry;

// Storage collaborator ports and backends
pub mod store;

// Postgres backend (when enabled)
#[cfg(feature = "database")]
pub mod database;

// Data components
pub mod hierarchy;
pub mod manifest;
pub mod metadata;
pub mod registry;

// Write path and XML rendering
pub mod ingest;
pub mod xml;

pub use config::WeaveConfig;
pub use error::{Result, WeaveError};
pub use ingest::IngestionService;
pub use store::memory::InMemoryWeaveStore;
pub use store::{LockKey, WeaveStore, WeaveTransaction};
pub use types::*;

#[cfg(feature = "database")]
pub use database::{DatabaseConfig, PgWeaveStore};
