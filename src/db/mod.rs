//! SQLite database module for the local replica
//!
//! One database file per client installation, holding the replicated
//! records and the action queue for every installed user. All
//! multi-table mutations run inside a single transaction, so a failed
//! reconciliation pass leaves no partial state behind.
//!
//! ## Tables
//!
//! - `debtors` - one row per installed user
//! - `configs` - debtor configuration, guarded by `latest_update_id`
//! - `transfers` - transfers initiated by the user
//! - `documents` - immutable debtor-info documents
//! - `actions` - queued local mutations awaiting sync
//! - `scheduled_deletions` - concluded resources awaiting cleanup

pub mod schema;
pub mod debtors;
pub mod transfers;
pub mod actions;
pub mod reconcile;

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::ReplicaError;
use crate::records::{
    AccountSnapshot, ActionId, ActionRecord, ConfigRecord, DebtorRecord, DocumentRecord,
    ScheduledDeletionRecord, TransferRecord, UserId,
};

/// SQLite-backed replica store
pub struct ReplicaDb {
    conn: Mutex<Connection>,
}

impl ReplicaDb {
    /// Open or create the database under the given data directory
    pub fn open(data_dir: &Path) -> Result<Self, ReplicaError> {
        std::fs::create_dir_all(data_dir)?;
        Self::open_file(&data_dir.join("debtors.db"))
    }

    /// Open using the paths from a [`Config`]
    pub fn open_with(config: &Config) -> Result<Self, ReplicaError> {
        std::fs::create_dir_all(&config.data_dir)?;
        Self::open_file(&config.db_path())
    }

    fn open_file(db_path: &Path) -> Result<Self, ReplicaError> {
        info!("Opening SQLite database at {:?}", db_path);

        let conn = Connection::open(db_path)?;

        // WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, ReplicaError> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;

        Ok(db)
    }

    fn init_schema(&self) -> Result<(), ReplicaError> {
        self.with_conn(|conn| schema::init_schema(conn))
    }

    /// Run a read operation against the connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, ReplicaError>
    where
        F: FnOnce(&Connection) -> Result<T, ReplicaError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ReplicaError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Run a write operation with exclusive access (for transactions)
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T, ReplicaError>
    where
        F: FnOnce(&mut Connection) -> Result<T, ReplicaError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| ReplicaError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&mut conn)
    }

    // =========================================================================
    // Reconciliation and installation
    // =========================================================================

    /// Merge a fetched account snapshot into the replica, installing the
    /// user on first contact. Returns the user id.
    pub fn install_or_update(&self, snapshot: &AccountSnapshot) -> Result<UserId, ReplicaError> {
        let now = Utc::now();
        self.with_conn_mut(|conn| reconcile::install_or_update(conn, snapshot, now))
    }

    /// Install a snapshot under a caller-chosen user id (restore path);
    /// fails with `AlreadyInstalled` when the id is taken
    pub fn install_user(
        &self,
        user_id: UserId,
        snapshot: &AccountSnapshot,
    ) -> Result<UserId, ReplicaError> {
        let now = Utc::now();
        self.with_conn_mut(|conn| reconcile::install_user(conn, user_id, snapshot, now))
    }

    /// Remove every record belonging to a user, in one transaction
    pub fn uninstall_user(&self, user_id: UserId) -> Result<(), ReplicaError> {
        self.with_conn_mut(|conn| reconcile::uninstall_user(conn, user_id))
    }

    /// Look up the user installed for a debtor URI
    pub fn user_id_for_debtor(&self, debtor_uri: &str) -> Result<Option<UserId>, ReplicaError> {
        self.with_conn(|conn| debtors::get_user_id(conn, debtor_uri))
    }

    pub fn is_user_installed(&self, user_id: UserId) -> Result<bool, ReplicaError> {
        self.with_conn(|conn| debtors::is_user_installed(conn, user_id))
    }

    // =========================================================================
    // Record lookups
    // =========================================================================

    /// Get the debtor record; `NotFound` when the user is not installed
    pub fn debtor_record(&self, user_id: UserId) -> Result<DebtorRecord, ReplicaError> {
        self.with_conn(|conn| {
            debtors::get_debtor(conn, user_id)?.ok_or_else(|| {
                ReplicaError::NotFound(format!("DebtorRecord(userId={})", user_id))
            })
        })
    }

    /// Get the config record; `NotFound` when the user is not installed
    pub fn config_record(&self, user_id: UserId) -> Result<ConfigRecord, ReplicaError> {
        self.with_conn(|conn| {
            debtors::get_config_for_user(conn, user_id)?.ok_or_else(|| {
                ReplicaError::NotFound(format!("ConfigRecord(userId={})", user_id))
            })
        })
    }

    /// List the user's transfers. An empty list is valid for an installed
    /// user; `NotFound` only when the user is not installed.
    pub fn transfer_records(&self, user_id: UserId) -> Result<Vec<TransferRecord>, ReplicaError> {
        self.with_conn(|conn| {
            let records = transfers::list_transfers_for_user(conn, user_id)?;
            if records.is_empty() && !debtors::is_user_installed(conn, user_id)? {
                return Err(ReplicaError::NotFound(format!(
                    "DebtorRecord(userId={})",
                    user_id
                )));
            }
            Ok(records)
        })
    }

    /// Get a transfer by URI; absence is not an error
    pub fn transfer_record(&self, uri: &str) -> Result<Option<TransferRecord>, ReplicaError> {
        self.with_conn(|conn| transfers::get_transfer(conn, uri))
    }

    pub fn is_concluded_transfer(&self, uri: &str) -> Result<bool, ReplicaError> {
        self.with_conn(|conn| transfers::is_concluded(conn, uri))
    }

    /// Get a stored document by URI; absence is not an error
    pub fn document_record(&self, uri: &str) -> Result<Option<DocumentRecord>, ReplicaError> {
        self.with_conn(|conn| debtors::get_document(conn, uri))
    }

    // =========================================================================
    // Transfer conclusion
    // =========================================================================

    /// Conclude a transfer after the remote service confirmed its abort:
    /// mark it aborted and schedule its deletion, atomically
    pub fn abort_transfer(&self, uri: &str) -> Result<(), ReplicaError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let record = transfers::get_transfer(&tx, uri)?.ok_or_else(|| {
                ReplicaError::NotFound(format!("TransferRecord(uri={})", uri))
            })?;
            transfers::set_aborted(&tx, uri)?;
            transfers::put_scheduled_deletion(&tx, record.user_id, uri)?;
            tx.commit()?;
            info!(user_id = record.user_id, uri, "Aborted transfer");
            Ok(())
        })
    }

    // =========================================================================
    // Action queue
    // =========================================================================

    /// Queue a new action. The record must not carry an action id yet;
    /// the store assigns one and returns it.
    pub fn create_action(&self, action: &ActionRecord) -> Result<ActionId, ReplicaError> {
        if action.action_id.is_some() {
            return Err(ReplicaError::Precondition(
                "actionId must be unassigned on create".to_string(),
            ));
        }
        self.with_conn(|conn| actions::insert_action(conn, action))
    }

    /// Get an action by id; absence is not an error
    pub fn action_record(&self, action_id: ActionId) -> Result<Option<ActionRecord>, ReplicaError> {
        self.with_conn(|conn| actions::get_action(conn, action_id))
    }

    /// List the user's actions. An empty list is valid for an installed
    /// user; `NotFound` only when the user is not installed.
    pub fn action_records(&self, user_id: UserId) -> Result<Vec<ActionRecord>, ReplicaError> {
        self.with_conn(|conn| {
            let records = actions::list_actions_for_user(conn, user_id)?;
            if records.is_empty() && !debtors::is_user_installed(conn, user_id)? {
                return Err(ReplicaError::NotFound(format!(
                    "DebtorRecord(userId={})",
                    user_id
                )));
            }
            Ok(records)
        })
    }

    /// Overwrite an existing action wholesale; `NotFound` when no action
    /// with this id exists
    pub fn replace_action(&self, action: &ActionRecord) -> Result<(), ReplicaError> {
        let action_id = action.action_id.ok_or_else(|| {
            ReplicaError::Precondition("actionId required on replace".to_string())
        })?;
        self.with_conn(|conn| {
            if !actions::replace_action(conn, action_id, action)? {
                return Err(ReplicaError::NotFound(format!(
                    "ActionRecord(actionId={})",
                    action_id
                )));
            }
            Ok(())
        })
    }

    /// Delete an action; deleting a missing action is a no-op
    pub fn delete_action(&self, action_id: ActionId) -> Result<(), ReplicaError> {
        self.with_conn(|conn| {
            actions::delete_action(conn, action_id)?;
            Ok(())
        })
    }

    /// Resolve a pending action with the outcome the sync layer observed.
    ///
    /// Success (`error = None`) removes the record. Failure writes the
    /// error and keeps the record for inspection. Resolving a missing or
    /// already-failed action fails with `AlreadyResolved`.
    pub fn resolve_action(
        &self,
        action_id: ActionId,
        error: Option<Value>,
    ) -> Result<(), ReplicaError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let record = match actions::get_action(&tx, action_id)? {
                Some(record) => record,
                None => return Err(ReplicaError::AlreadyResolved(action_id)),
            };
            if record.error.is_some() {
                return Err(ReplicaError::AlreadyResolved(action_id));
            }
            match error {
                None => {
                    actions::delete_action(&tx, action_id)?;
                    debug!(action_id, "Action resolved, record removed");
                }
                Some(error) => {
                    actions::set_action_error(&tx, action_id, &error)?;
                    debug!(action_id, "Action failed, error recorded");
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    // =========================================================================
    // Scheduled deletions
    // =========================================================================

    /// List concluded resources awaiting cleanup for a user
    pub fn scheduled_deletions(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ScheduledDeletionRecord>, ReplicaError> {
        self.with_conn(|conn| transfers::list_scheduled_deletions_for_user(conn, user_id))
    }

    /// Drop a deletion marker once the cleanup went through
    pub fn delete_scheduled_deletion(&self, uri: &str) -> Result<(), ReplicaError> {
        self.with_conn(|conn| {
            transfers::delete_scheduled_deletion(conn, uri)?;
            Ok(())
        })
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats, ReplicaError> {
        self.with_conn(|conn| {
            let debtor_count: i64 =
                conn.query_row("SELECT COUNT(*) FROM debtors", [], |row| row.get(0))?;
            let config_count: i64 =
                conn.query_row("SELECT COUNT(*) FROM configs", [], |row| row.get(0))?;
            let transfer_count: i64 =
                conn.query_row("SELECT COUNT(*) FROM transfers", [], |row| row.get(0))?;
            let document_count: i64 =
                conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
            let action_count: i64 =
                conn.query_row("SELECT COUNT(*) FROM actions", [], |row| row.get(0))?;
            let scheduled_deletion_count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM scheduled_deletions",
                [],
                |row| row.get(0),
            )?;

            Ok(DbStats {
                debtor_count: debtor_count as u64,
                config_count: config_count as u64,
                transfer_count: transfer_count as u64,
                document_count: document_count as u64,
                action_count: action_count as u64,
                scheduled_deletion_count: scheduled_deletion_count as u64,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub debtor_count: u64,
    pub config_count: u64,
    pub transfer_count: u64,
    pub document_count: u64,
    pub action_count: u64,
    pub scheduled_deletion_count: u64,
}

// Shared column readers for the table modules

pub(crate) fn json_column<T: DeserializeOwned>(
    row: &Row,
    column: &str,
) -> Result<T, rusqlite::Error> {
    let raw: String = row.get(column)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn opt_json_column<T: DeserializeOwned>(
    row: &Row,
    column: &str,
) -> Result<Option<T>, rusqlite::Error> {
    let raw: Option<String> = row.get(column)?;
    match raw {
        Some(raw) => serde_json::from_str(&raw).map(Some).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        }),
        None => Ok(None),
    }
}

pub(crate) fn timestamp_column(row: &Row, column: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    let raw: String = row.get(column)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}
