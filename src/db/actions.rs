//! Action queue table operations

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use tracing::debug;

use crate::db::{json_column, opt_json_column, timestamp_column};
use crate::error::ReplicaError;
use crate::records::{ActionId, ActionRecord, UserId};

fn action_from_row(row: &Row) -> Result<ActionRecord, rusqlite::Error> {
    Ok(ActionRecord {
        action_id: Some(row.get("action_id")?),
        user_id: row.get("user_id")?,
        initiated_at: timestamp_column(row, "initiated_at")?,
        error: opt_json_column(row, "error_json")?,
        payload: json_column(row, "payload_json")?,
    })
}

/// Insert a new action, letting SQLite assign the action id
pub fn insert_action(conn: &Connection, action: &ActionRecord) -> Result<ActionId, ReplicaError> {
    let error_json = match &action.error {
        Some(error) => Some(serde_json::to_string(error)?),
        None => None,
    };
    let payload_json = serde_json::to_string(&action.payload)?;
    conn.execute(
        "INSERT INTO actions (user_id, action_type, initiated_at, error_json, payload_json)
         VALUES (?, ?, ?, ?, ?)",
        params![
            action.user_id,
            action.payload.action_type(),
            action.initiated_at.to_rfc3339(),
            error_json,
            payload_json,
        ],
    )?;
    let action_id = conn.last_insert_rowid();
    debug!(
        action_id,
        user_id = action.user_id,
        action_type = action.payload.action_type(),
        "Queued action"
    );
    Ok(action_id)
}

pub fn get_action(conn: &Connection, action_id: ActionId) -> Result<Option<ActionRecord>, ReplicaError> {
    let record = conn
        .query_row(
            "SELECT * FROM actions WHERE action_id = ?",
            params![action_id],
            action_from_row,
        )
        .optional()?;
    Ok(record)
}

pub fn list_actions_for_user(
    conn: &Connection,
    user_id: UserId,
) -> Result<Vec<ActionRecord>, ReplicaError> {
    let mut stmt = conn.prepare("SELECT * FROM actions WHERE user_id = ? ORDER BY action_id")?;
    let records = stmt
        .query_map(params![user_id], action_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

/// Overwrite an action wholesale; returns false when no row with this id
/// exists
pub fn replace_action(
    conn: &Connection,
    action_id: ActionId,
    action: &ActionRecord,
) -> Result<bool, ReplicaError> {
    let error_json = match &action.error {
        Some(error) => Some(serde_json::to_string(error)?),
        None => None,
    };
    let payload_json = serde_json::to_string(&action.payload)?;
    let changes = conn.execute(
        "UPDATE actions SET
             user_id = ?,
             action_type = ?,
             initiated_at = ?,
             error_json = ?,
             payload_json = ?
         WHERE action_id = ?",
        params![
            action.user_id,
            action.payload.action_type(),
            action.initiated_at.to_rfc3339(),
            error_json,
            payload_json,
            action_id,
        ],
    )?;
    Ok(changes > 0)
}

pub fn delete_action(conn: &Connection, action_id: ActionId) -> Result<bool, ReplicaError> {
    let changes = conn.execute("DELETE FROM actions WHERE action_id = ?", params![action_id])?;
    Ok(changes > 0)
}

/// Record a failure outcome on an action
pub fn set_action_error(
    conn: &Connection,
    action_id: ActionId,
    error: &Value,
) -> Result<bool, ReplicaError> {
    let error_json = serde_json::to_string(error)?;
    let changes = conn.execute(
        "UPDATE actions SET error_json = ? WHERE action_id = ?",
        params![error_json, action_id],
    )?;
    Ok(changes > 0)
}

/// Whether an unresolved AbortTransfer action already targets this
/// transfer. Failure-resolved aborts are inert history and do not count.
pub fn has_unresolved_abort(
    conn: &Connection,
    user_id: UserId,
    transfer_uri: &str,
) -> Result<bool, ReplicaError> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM actions
             WHERE user_id = ?
               AND action_type = 'AbortTransfer'
               AND error_json IS NULL
               AND json_extract(payload_json, '$.uri') = ?
             LIMIT 1",
            params![user_id, transfer_uri],
            |_| Ok(()),
        )
        .optional()?;
    Ok(exists.is_some())
}

/// Delete every action belonging to a user
pub fn delete_user_rows(conn: &Connection, user_id: UserId) -> Result<(), ReplicaError> {
    conn.execute("DELETE FROM actions WHERE user_id = ?", params![user_id])?;
    Ok(())
}
