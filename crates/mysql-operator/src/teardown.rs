//! Teardown of the managed database and account
//!
//! The account goes first: while it exists, clients may still hold sessions
//! on the schema. A failed user drop leaves the schema in place so the next
//! pass retries both steps.

use crate::backend::Backend;
use crate::error::Result;
use tracing::{info, warn};

/// Drop the account, then the schema. Already-absent objects are success.
pub async fn teardown(backend: &dyn Backend, user: &str, host: &str, database: &str) -> Result<()> {
    if let Err(e) = backend.drop_user(user, host).await {
        warn!(user = %user, host = %host, error = %e, "Failed to drop user, keeping database");
        return Err(e);
    }
    info!(user = %user, host = %host, "Dropped user");

    backend.drop_schema(database).await?;
    info!(database = %database, "Dropped database");

    metrics::counter!("mysql_operator_teardowns_total").increment(1);
    Ok(())
}
