//! Snapshot reconciliation and user install/uninstall
//!
//! Everything here runs inside a single transaction: either the whole
//! snapshot applies, or nothing does.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{debug, info};
use url::Url;

use crate::db::{actions, debtors, transfers};
use crate::error::ReplicaError;
use crate::records::{
    AccountSnapshot, ActionPayload, ActionRecord, ConfigRecord, DocumentRecord, TransferState,
    UserId,
};

/// Merge a fetched snapshot into the replica.
///
/// Installs the user on first contact, otherwise updates in place.
/// Abort actions and deletion schedules are derived from the transfer
/// outcomes the snapshot carries. Returns the user id.
pub fn install_or_update(
    conn: &mut Connection,
    snapshot: &AccountSnapshot,
    now: DateTime<Utc>,
) -> Result<UserId, ReplicaError> {
    let tx = conn.transaction()?;

    let debtor = &snapshot.debtor;
    let user_id = match debtors::get_user_id(&tx, &debtor.uri)? {
        Some(user_id) => {
            debtors::update_debtor(&tx, user_id, &debtor.uri, &debtor.config.uri)?;
            user_id
        }
        None => debtors::insert_debtor(&tx, &debtor.uri, &debtor.config.uri)?,
    };

    apply_snapshot(&tx, user_id, snapshot, now)?;

    tx.commit()?;
    info!(
        user_id,
        transfers = snapshot.transfers.len(),
        "Reconciled account snapshot"
    );
    Ok(user_id)
}

/// Install a snapshot under a caller-chosen user id (restore path).
///
/// Fails with `AlreadyInstalled` when the id is taken.
pub fn install_user(
    conn: &mut Connection,
    user_id: UserId,
    snapshot: &AccountSnapshot,
    now: DateTime<Utc>,
) -> Result<UserId, ReplicaError> {
    let tx = conn.transaction()?;

    if debtors::is_user_installed(&tx, user_id)? {
        return Err(ReplicaError::AlreadyInstalled(user_id));
    }
    let debtor = &snapshot.debtor;
    debtors::insert_debtor_with_id(&tx, user_id, &debtor.uri, &debtor.config.uri)?;

    apply_snapshot(&tx, user_id, snapshot, now)?;

    tx.commit()?;
    info!(user_id, "Installed user from snapshot");
    Ok(user_id)
}

/// Delete a user's rows from every table
pub fn uninstall_user(conn: &mut Connection, user_id: UserId) -> Result<(), ReplicaError> {
    let tx = conn.transaction()?;
    debtors::delete_user_rows(&tx, user_id)?;
    transfers::delete_user_rows(&tx, user_id)?;
    actions::delete_user_rows(&tx, user_id)?;
    tx.commit()?;
    info!(user_id, "Uninstalled user");
    Ok(())
}

fn apply_snapshot(
    tx: &Connection,
    user_id: UserId,
    snapshot: &AccountSnapshot,
    now: DateTime<Utc>,
) -> Result<(), ReplicaError> {
    let config = &snapshot.debtor.config;

    // The config update applies only when its revision is strictly newer
    // than what we hold. The inline document travels with it.
    let apply_config = match debtors::get_config_for_user(tx, user_id)? {
        Some(existing) => existing.latest_update_id < config.latest_update_id,
        None => true,
    };
    if apply_config {
        let uri = resolve_config_uri(&snapshot.debtor.uri, &config.uri)?;
        debtors::put_config(
            tx,
            &ConfigRecord {
                user_id,
                uri,
                latest_update_id: config.latest_update_id,
                rate: config.rate,
                info: config.info.clone(),
            },
        )?;
        if let Some(document) = &snapshot.document {
            debtors::put_document(
                tx,
                &DocumentRecord {
                    user_id,
                    uri: document.uri.clone(),
                    content: document.content.clone(),
                    content_type: document.content_type.clone(),
                },
            )?;
        }
    } else {
        debug!(
            user_id,
            latest_update_id = config.latest_update_id,
            "Skipped stale config update"
        );
    }

    for transfer in &snapshot.transfers {
        // Concluded transfers never change again
        if transfers::is_concluded(tx, &transfer.uri)? {
            continue;
        }
        match transfer.state(now) {
            TransferState::Unsuccessful | TransferState::Delayed => {
                transfers::upsert_transfer(tx, &transfer.to_record(user_id))?;
                if !actions::has_unresolved_abort(tx, user_id, &transfer.uri)? {
                    actions::insert_action(
                        tx,
                        &ActionRecord {
                            action_id: None,
                            user_id,
                            initiated_at: now,
                            error: None,
                            payload: ActionPayload::AbortTransfer {
                                uri: transfer.uri.clone(),
                            },
                        },
                    )?;
                }
            }
            TransferState::Successful => {
                // A confirmed outcome for an unknown transfer means the
                // local record was lost; fail the whole pass.
                if !transfers::update_transfer(tx, &transfer.to_record(user_id))? {
                    return Err(ReplicaError::NotFound(format!(
                        "TransferRecord(uri={})",
                        transfer.uri
                    )));
                }
                transfers::put_scheduled_deletion(tx, user_id, &transfer.uri)?;
            }
            TransferState::Waiting => {}
        }
    }

    Ok(())
}

/// Resolve the config URI against the debtor URI; the server may hand
/// out relative references.
fn resolve_config_uri(debtor_uri: &str, config_uri: &str) -> Result<String, ReplicaError> {
    let base = Url::parse(debtor_uri)
        .map_err(|e| ReplicaError::Precondition(format!("debtor URI must be absolute: {}", e)))?;
    let resolved = base
        .join(config_uri)
        .map_err(|e| ReplicaError::Precondition(format!("config URI does not resolve: {}", e)))?;
    Ok(resolved.into())
}
