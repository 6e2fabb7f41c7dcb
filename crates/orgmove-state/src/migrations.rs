//! SurrealDB schema migrations and initialization
//!
//! Sets up the `checkpoints` table with its unique plan index.

use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Initialize all orgmove tables in SurrealDB
///
/// Safe to call multiple times (idempotent).
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing orgmove SurrealDB schema");
    init_checkpoints_table(db).await?;
    info!("orgmove schema initialization complete");
    Ok(())
}

/// Initialize `checkpoints` table with constraints and indexes
///
/// Schema:
/// ```text
/// TABLE checkpoints {
///   plan_id:     STRING (unique)
///   stage:       INT (0..=4)
///   status:      STRING (running | failed | succeeded | overridden | rolled_back)
///   last_error:  STRING?
///   updated_at:  DATETIME (indexed)
/// }
/// ```
///
/// Constraints:
/// - `plan_id` is unique; writers replace the row instead of appending
/// - `stage` only moves forward except on rollback (enforced via app logic)
async fn init_checkpoints_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing checkpoints table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS checkpoints
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update FULL
                FOR delete FULL;

        DEFINE INDEX IF NOT EXISTS idx_checkpoint_plan ON TABLE checkpoints COLUMNS plan_id UNIQUE;

        DEFINE INDEX IF NOT EXISTS idx_checkpoint_updated_at ON TABLE checkpoints COLUMNS updated_at;
    "#;

    db.query(sql).await?;
    info!("checkpoints table initialized");
    Ok(())
}
