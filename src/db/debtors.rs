//! Debtor, config and document table operations

use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use crate::db::json_column;
use crate::error::ReplicaError;
use crate::records::{ConfigRecord, DebtorRecord, DocumentRecord, UserId};

fn debtor_from_row(row: &Row) -> Result<DebtorRecord, rusqlite::Error> {
    Ok(DebtorRecord {
        user_id: row.get("user_id")?,
        uri: row.get("uri")?,
        config_uri: row.get("config_uri")?,
    })
}

fn config_from_row(row: &Row) -> Result<ConfigRecord, rusqlite::Error> {
    Ok(ConfigRecord {
        user_id: row.get("user_id")?,
        uri: row.get("uri")?,
        latest_update_id: row.get("latest_update_id")?,
        rate: row.get("rate")?,
        info: json_column(row, "info_json")?,
    })
}

fn document_from_row(row: &Row) -> Result<DocumentRecord, rusqlite::Error> {
    Ok(DocumentRecord {
        user_id: row.get("user_id")?,
        uri: row.get("uri")?,
        content: row.get("content")?,
        content_type: row.get("content_type")?,
    })
}

/// Look up the user installed for a debtor URI
pub fn get_user_id(conn: &Connection, debtor_uri: &str) -> Result<Option<UserId>, ReplicaError> {
    let user_id = conn
        .query_row(
            "SELECT user_id FROM debtors WHERE uri = ?",
            params![debtor_uri],
            |row| row.get(0),
        )
        .optional()?;
    Ok(user_id)
}

pub fn is_user_installed(conn: &Connection, user_id: UserId) -> Result<bool, ReplicaError> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM debtors WHERE user_id = ?",
            params![user_id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(exists.is_some())
}

/// Insert a new debtor row, letting SQLite assign the user id
pub fn insert_debtor(
    conn: &Connection,
    uri: &str,
    config_uri: &str,
) -> Result<UserId, ReplicaError> {
    conn.execute(
        "INSERT INTO debtors (uri, config_uri) VALUES (?, ?)",
        params![uri, config_uri],
    )?;
    let user_id = conn.last_insert_rowid();
    debug!(user_id, uri, "Installed new debtor");
    Ok(user_id)
}

/// Insert a debtor row under a caller-chosen user id (restore path)
pub fn insert_debtor_with_id(
    conn: &Connection,
    user_id: UserId,
    uri: &str,
    config_uri: &str,
) -> Result<(), ReplicaError> {
    conn.execute(
        "INSERT INTO debtors (user_id, uri, config_uri) VALUES (?, ?, ?)",
        params![user_id, uri, config_uri],
    )?;
    debug!(user_id, uri, "Installed debtor under explicit user id");
    Ok(())
}

pub fn update_debtor(
    conn: &Connection,
    user_id: UserId,
    uri: &str,
    config_uri: &str,
) -> Result<(), ReplicaError> {
    conn.execute(
        "UPDATE debtors SET uri = ?, config_uri = ? WHERE user_id = ?",
        params![uri, config_uri, user_id],
    )?;
    Ok(())
}

pub fn get_debtor(conn: &Connection, user_id: UserId) -> Result<Option<DebtorRecord>, ReplicaError> {
    let record = conn
        .query_row(
            "SELECT * FROM debtors WHERE user_id = ?",
            params![user_id],
            debtor_from_row,
        )
        .optional()?;
    Ok(record)
}

pub fn get_config_for_user(
    conn: &Connection,
    user_id: UserId,
) -> Result<Option<ConfigRecord>, ReplicaError> {
    let record = conn
        .query_row(
            "SELECT * FROM configs WHERE user_id = ?",
            params![user_id],
            config_from_row,
        )
        .optional()?;
    Ok(record)
}

/// Upsert a config row by URI.
///
/// A config whose URI changed while another row still holds the user's
/// unique slot surfaces as a constraint error and aborts the enclosing
/// transaction.
pub fn put_config(conn: &Connection, record: &ConfigRecord) -> Result<(), ReplicaError> {
    let info_json = serde_json::to_string(&record.info)?;
    conn.execute(
        "INSERT INTO configs (uri, user_id, latest_update_id, rate, info_json)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT(uri) DO UPDATE SET
             user_id = excluded.user_id,
             latest_update_id = excluded.latest_update_id,
             rate = excluded.rate,
             info_json = excluded.info_json",
        params![
            record.uri,
            record.user_id,
            record.latest_update_id,
            record.rate,
            info_json,
        ],
    )?;
    debug!(
        user_id = record.user_id,
        latest_update_id = record.latest_update_id,
        "Applied config update"
    );
    Ok(())
}

pub fn get_document(conn: &Connection, uri: &str) -> Result<Option<DocumentRecord>, ReplicaError> {
    let record = conn
        .query_row(
            "SELECT * FROM documents WHERE uri = ?",
            params![uri],
            document_from_row,
        )
        .optional()?;
    Ok(record)
}

/// Upsert a document row by URI
pub fn put_document(conn: &Connection, record: &DocumentRecord) -> Result<(), ReplicaError> {
    conn.execute(
        "INSERT INTO documents (uri, user_id, content, content_type)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(uri) DO UPDATE SET
             user_id = excluded.user_id,
             content = excluded.content,
             content_type = excluded.content_type",
        params![record.uri, record.user_id, record.content, record.content_type],
    )?;
    Ok(())
}

/// Delete every debtor-side row belonging to a user
pub fn delete_user_rows(conn: &Connection, user_id: UserId) -> Result<(), ReplicaError> {
    conn.execute("DELETE FROM debtors WHERE user_id = ?", params![user_id])?;
    conn.execute("DELETE FROM configs WHERE user_id = ?", params![user_id])?;
    conn.execute("DELETE FROM documents WHERE user_id = ?", params![user_id])?;
    Ok(())
}
