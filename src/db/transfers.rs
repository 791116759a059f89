//! Transfer and scheduled-deletion table operations

use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use crate::db::{opt_json_column, timestamp_column};
use crate::error::ReplicaError;
use crate::records::{ResourceType, ScheduledDeletionRecord, TransferRecord, UserId};

fn transfer_from_row(row: &Row) -> Result<TransferRecord, rusqlite::Error> {
    Ok(TransferRecord {
        user_id: row.get("user_id")?,
        uri: row.get("uri")?,
        recipient_uri: row.get("recipient_uri")?,
        amount: row.get("amount")?,
        note_format: row.get("note_format")?,
        note: row.get("note")?,
        initiated_at: timestamp_column(row, "initiated_at")?,
        result: opt_json_column(row, "result_json")?,
        aborted: row.get("aborted")?,
    })
}

pub fn get_transfer(conn: &Connection, uri: &str) -> Result<Option<TransferRecord>, ReplicaError> {
    let record = conn
        .query_row(
            "SELECT * FROM transfers WHERE uri = ?",
            params![uri],
            transfer_from_row,
        )
        .optional()?;
    Ok(record)
}

pub fn list_transfers_for_user(
    conn: &Connection,
    user_id: UserId,
) -> Result<Vec<TransferRecord>, ReplicaError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM transfers WHERE user_id = ? ORDER BY initiated_at",
    )?;
    let records = stmt
        .query_map(params![user_id], transfer_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

/// Whether a transfer has a result or was aborted (unknown URIs are not
/// concluded)
pub fn is_concluded(conn: &Connection, uri: &str) -> Result<bool, ReplicaError> {
    let concluded: Option<bool> = conn
        .query_row(
            "SELECT result_json IS NOT NULL OR aborted FROM transfers WHERE uri = ?",
            params![uri],
            |row| row.get(0),
        )
        .optional()?;
    Ok(concluded.unwrap_or(false))
}

/// Insert or replace a transfer row by URI
pub fn upsert_transfer(conn: &Connection, record: &TransferRecord) -> Result<(), ReplicaError> {
    let result_json = match &record.result {
        Some(result) => Some(serde_json::to_string(result)?),
        None => None,
    };
    conn.execute(
        "INSERT INTO transfers
             (uri, user_id, recipient_uri, amount, note_format, note,
              initiated_at, result_json, aborted)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(uri) DO UPDATE SET
             user_id = excluded.user_id,
             recipient_uri = excluded.recipient_uri,
             amount = excluded.amount,
             note_format = excluded.note_format,
             note = excluded.note,
             initiated_at = excluded.initiated_at,
             result_json = excluded.result_json,
             aborted = excluded.aborted",
        params![
            record.uri,
            record.user_id,
            record.recipient_uri,
            record.amount,
            record.note_format,
            record.note,
            record.initiated_at.to_rfc3339(),
            result_json,
            record.aborted,
        ],
    )?;
    Ok(())
}

/// Update an existing transfer row in place; returns false when no row
/// with this URI exists
pub fn update_transfer(conn: &Connection, record: &TransferRecord) -> Result<bool, ReplicaError> {
    let result_json = match &record.result {
        Some(result) => Some(serde_json::to_string(result)?),
        None => None,
    };
    let changes = conn.execute(
        "UPDATE transfers SET
             user_id = ?,
             recipient_uri = ?,
             amount = ?,
             note_format = ?,
             note = ?,
             initiated_at = ?,
             result_json = ?,
             aborted = ?
         WHERE uri = ?",
        params![
            record.user_id,
            record.recipient_uri,
            record.amount,
            record.note_format,
            record.note,
            record.initiated_at.to_rfc3339(),
            result_json,
            record.aborted,
            record.uri,
        ],
    )?;
    Ok(changes > 0)
}

/// Mark a transfer aborted; returns false when no row with this URI exists
pub fn set_aborted(conn: &Connection, uri: &str) -> Result<bool, ReplicaError> {
    let changes = conn.execute("UPDATE transfers SET aborted = 1 WHERE uri = ?", params![uri])?;
    Ok(changes > 0)
}

fn scheduled_deletion_from_row(row: &Row) -> Result<ScheduledDeletionRecord, rusqlite::Error> {
    Ok(ScheduledDeletionRecord {
        user_id: row.get("user_id")?,
        uri: row.get("uri")?,
        resource_type: ResourceType::Transfer, // the only resource type scheduled today
    })
}

/// Schedule a concluded transfer for cleanup
pub fn put_scheduled_deletion(
    conn: &Connection,
    user_id: UserId,
    uri: &str,
) -> Result<(), ReplicaError> {
    conn.execute(
        "INSERT INTO scheduled_deletions (uri, user_id, resource_type)
         VALUES (?, ?, 'Transfer')
         ON CONFLICT(uri) DO UPDATE SET user_id = excluded.user_id",
        params![uri, user_id],
    )?;
    debug!(user_id, uri, "Scheduled transfer deletion");
    Ok(())
}

pub fn list_scheduled_deletions_for_user(
    conn: &Connection,
    user_id: UserId,
) -> Result<Vec<ScheduledDeletionRecord>, ReplicaError> {
    let mut stmt = conn.prepare("SELECT * FROM scheduled_deletions WHERE user_id = ?")?;
    let records = stmt
        .query_map(params![user_id], scheduled_deletion_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

pub fn delete_scheduled_deletion(conn: &Connection, uri: &str) -> Result<bool, ReplicaError> {
    let changes = conn.execute("DELETE FROM scheduled_deletions WHERE uri = ?", params![uri])?;
    Ok(changes > 0)
}

/// Delete every transfer-side row belonging to a user
pub fn delete_user_rows(conn: &Connection, user_id: UserId) -> Result<(), ReplicaError> {
    conn.execute("DELETE FROM transfers WHERE user_id = ?", params![user_id])?;
    conn.execute(
        "DELETE FROM scheduled_deletions WHERE user_id = ?",
        params![user_id],
    )?;
    Ok(())
}
