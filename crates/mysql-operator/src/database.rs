//! Database synchronization
//!
//! Ensures the managed schema exists with the declared character set and
//! collation. An existing schema gets the defaults re-applied on every pass,
//! so out-of-band changes are corrected.

use crate::backend::Backend;
use crate::error::Result;
use tracing::{debug, info};

/// What the synchronizer did to the schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseOutcome {
    /// Schema did not exist and was created
    Created,
    /// Schema existed and its defaults were re-applied
    Altered,
}

/// Create the schema or re-apply its character set and collation
pub async fn sync_database(
    backend: &dyn Backend,
    name: &str,
    character_set: &str,
    collation: &str,
) -> Result<DatabaseOutcome> {
    if backend.schema_exists(name).await? {
        debug!(database = %name, "Database exists, re-applying defaults");
        backend.alter_schema(name, character_set, collation).await?;
        Ok(DatabaseOutcome::Altered)
    } else {
        backend.create_schema(name, character_set, collation).await?;
        info!(
            database = %name,
            character_set = %character_set,
            collation = %collation,
            "Created database"
        );
        Ok(DatabaseOutcome::Created)
    }
}
