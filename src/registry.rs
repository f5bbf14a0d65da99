//! Entity registry: hands out entity index ids and nothing else.

use tracing::debug;

use crate::error::Result;
use crate::store::WeaveTransaction;
use crate::types::EntityIndexId;

/// Create a new payload-free entity index row. Every call yields a distinct id,
/// including repeated calls inside one transaction.
pub async fn allocate(tx: &mut dyn WeaveTransaction) -> Result<EntityIndexId> {
    let id = tx.insert_entity_index().await?;
    debug!(entity_index_id = %id, "allocated entity index");
    Ok(id)
}
