//! Database schema definitions

use rusqlite::Connection;
use tracing::info;

use crate::error::ReplicaError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<(), ReplicaError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        migrate_schema(conn, current_version)?;
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32, ReplicaError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )?;

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .unwrap_or(0);

    Ok(version)
}

/// Set schema version
fn set_schema_version(conn: &Connection, version: i32) -> Result<(), ReplicaError> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])?;
    Ok(())
}

/// Create all tables
fn create_tables(conn: &Connection) -> Result<(), ReplicaError> {
    conn.execute_batch(RECORDS_SCHEMA)?;
    conn.execute_batch(QUEUE_SCHEMA)?;
    conn.execute_batch(INDEXES_SCHEMA)?;
    Ok(())
}

/// Migrate schema from older version
fn migrate_schema(conn: &Connection, from_version: i32) -> Result<(), ReplicaError> {
    // Add migration steps here as schema evolves
    match from_version {
        _ => {}
    }

    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}

/// Replicated record tables
const RECORDS_SCHEMA: &str = r#"
-- One row per installed user. user_id is the handle every other
-- table is scoped by.
CREATE TABLE IF NOT EXISTS debtors (
    user_id INTEGER PRIMARY KEY AUTOINCREMENT,
    uri TEXT NOT NULL UNIQUE,

    -- Reference to the debtor's config, kept as received
    config_uri TEXT NOT NULL
);

-- The debtor's configuration. Updates with a stale latest_update_id
-- are skipped during reconciliation.
CREATE TABLE IF NOT EXISTS configs (
    uri TEXT PRIMARY KEY NOT NULL,
    user_id INTEGER NOT NULL UNIQUE,
    latest_update_id INTEGER NOT NULL,
    rate REAL NOT NULL,

    -- ConfigInfo as JSON: a document URI string, or an inline document
    info_json TEXT NOT NULL
);

-- Transfers initiated by the user. A concluded transfer (result set,
-- or aborted) is immutable except for deletion scheduling.
CREATE TABLE IF NOT EXISTS transfers (
    uri TEXT PRIMARY KEY NOT NULL,
    user_id INTEGER NOT NULL,
    recipient_uri TEXT NOT NULL,
    amount INTEGER NOT NULL,
    note_format TEXT NOT NULL,
    note TEXT NOT NULL,
    initiated_at TEXT NOT NULL,

    -- TransferResult as JSON, NULL while the transfer is in flight
    result_json TEXT,
    aborted INTEGER NOT NULL DEFAULT 0
);

-- Immutable documents (debtor info), addressed by URI
CREATE TABLE IF NOT EXISTS documents (
    uri TEXT PRIMARY KEY NOT NULL,
    user_id INTEGER NOT NULL,
    content BLOB NOT NULL,
    content_type TEXT NOT NULL
);
"#;

/// Action queue and cleanup bookkeeping
const QUEUE_SCHEMA: &str = r#"
-- Pending local mutations. A row with error_json set is resolved-failed
-- and stays for UI inspection; successful resolution deletes the row.
CREATE TABLE IF NOT EXISTS actions (
    action_id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    action_type TEXT NOT NULL,
    initiated_at TEXT NOT NULL,
    error_json TEXT,

    -- Type-specific payload as JSON, discriminated by actionType
    payload_json TEXT NOT NULL
);

-- Concluded remote resources awaiting cleanup by the sync layer
CREATE TABLE IF NOT EXISTS scheduled_deletions (
    uri TEXT PRIMARY KEY NOT NULL,
    user_id INTEGER NOT NULL,
    resource_type TEXT NOT NULL DEFAULT 'Transfer'
);
"#;

/// Index definitions for fast queries
const INDEXES_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_transfers_user_id ON transfers(user_id);
CREATE INDEX IF NOT EXISTS idx_transfers_initiated_at ON transfers(initiated_at);
CREATE INDEX IF NOT EXISTS idx_documents_user_id ON documents(user_id);
CREATE INDEX IF NOT EXISTS idx_actions_user_id ON actions(user_id);
CREATE INDEX IF NOT EXISTS idx_scheduled_deletions_user_id ON scheduled_deletions(user_id);
"#;
