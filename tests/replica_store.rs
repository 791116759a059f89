//! Integration tests for the replica store
//!
//! These tests drive a [`ReplicaDb`] through whole reconciliation
//! passes the way the sync layer would, then check the outcome through
//! the public read surface.

use chrono::{DateTime, Duration, Utc};
use debtor_replica::db::reconcile;
use debtor_replica::records::{
    AccountSnapshot, ActionPayload, ActionRecord, ConfigInfo, ConfigSnapshot, DebtorSnapshot,
    InfoDocument, ResourceType, TransferError, TransferResult, TransferSnapshot, UserId,
    TRANSFER_WAIT_SECONDS,
};
use debtor_replica::{ReplicaDb, ReplicaError};
use serde_json::json;
use tempfile::TempDir;

const DEBTOR_URI: &str = "https://example.com/debtors/1/";

/// Helper to create a store backed by a temporary directory.
///
/// Run with `RUST_LOG=debug` to see the store's tracing output.
fn create_store() -> (ReplicaDb, TempDir) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let temp_dir = TempDir::new().unwrap();
    let db = ReplicaDb::open(temp_dir.path()).unwrap();
    (db, temp_dir)
}

/// Helper to run a reconciliation pass with a pinned clock
fn reconcile_at(
    db: &ReplicaDb,
    snapshot: &AccountSnapshot,
    now: DateTime<Utc>,
) -> Result<UserId, ReplicaError> {
    db.with_conn_mut(|conn| reconcile::install_or_update(conn, snapshot, now))
}

fn base_snapshot() -> AccountSnapshot {
    AccountSnapshot {
        debtor: DebtorSnapshot {
            uri: DEBTOR_URI.to_string(),
            config: ConfigSnapshot {
                uri: "config".to_string(),
                latest_update_id: 1,
                rate: 0.0,
                info: ConfigInfo::Uri("https://example.com/documents/1".to_string()),
            },
        },
        transfers: vec![],
        document: None,
    }
}

fn transfer_snapshot(
    tail: &str,
    initiated_at: DateTime<Utc>,
    result: Option<TransferResult>,
) -> TransferSnapshot {
    TransferSnapshot {
        uri: format!("{}transfers/{}", DEBTOR_URI, tail),
        recipient_uri: "swpt:1/2".to_string(),
        amount: 1000,
        note_format: "payeeref".to_string(),
        note: "ref-1".to_string(),
        initiated_at,
        result,
    }
}

fn failed_result(finalized_at: DateTime<Utc>) -> TransferResult {
    TransferResult {
        finalized_at,
        committed_amount: 0,
        error: Some(TransferError {
            error_code: "CANCELED_BY_THE_SENDER".to_string(),
            total_locked_amount: None,
        }),
    }
}

fn ok_result(finalized_at: DateTime<Utc>, committed_amount: i64) -> TransferResult {
    TransferResult {
        finalized_at,
        committed_amount,
        error: None,
    }
}

/// Test that a first pass installs the user with every record in place
#[test]
fn test_install_creates_all_records() {
    let (db, _temp) = create_store();
    let mut snapshot = base_snapshot();
    snapshot.document = Some(InfoDocument {
        uri: "https://example.com/documents/1".to_string(),
        content: b"{\"type\":\"CoinInfo\"}".to_vec(),
        content_type: "application/vnd.swaptacular.coin-info+json".to_string(),
    });

    let user_id = db.install_or_update(&snapshot).unwrap();

    let debtor = db.debtor_record(user_id).unwrap();
    assert_eq!(debtor.uri, DEBTOR_URI);
    // The reference is stored as received
    assert_eq!(debtor.config_uri, "config");

    // The config URI is resolved against the debtor URI
    let config = db.config_record(user_id).unwrap();
    assert_eq!(config.uri, "https://example.com/debtors/1/config");
    assert_eq!(config.latest_update_id, 1);

    let document = db
        .document_record("https://example.com/documents/1")
        .unwrap()
        .unwrap();
    assert_eq!(document.user_id, user_id);
    assert_eq!(document.content, b"{\"type\":\"CoinInfo\"}");

    assert_eq!(db.user_id_for_debtor(DEBTOR_URI).unwrap(), Some(user_id));
    assert!(db.is_user_installed(user_id).unwrap());
}

/// Test that repeating the same pass changes nothing
#[test]
fn test_repeated_pass_is_idempotent() {
    let (db, _temp) = create_store();
    let snapshot = base_snapshot();

    let first = db.install_or_update(&snapshot).unwrap();
    let second = db.install_or_update(&snapshot).unwrap();
    assert_eq!(first, second);

    let stats = db.stats().unwrap();
    assert_eq!(stats.debtor_count, 1);
    assert_eq!(stats.config_count, 1);
}

/// Test that a config update applies only when strictly newer
#[test]
fn test_config_applies_only_when_strictly_newer() {
    let (db, _temp) = create_store();
    let mut snapshot = base_snapshot();
    snapshot.debtor.config.latest_update_id = 5;
    snapshot.debtor.config.rate = 1.0;
    let user_id = db.install_or_update(&snapshot).unwrap();

    // Same revision: skipped, even though the content differs
    snapshot.debtor.config.rate = 9.0;
    db.install_or_update(&snapshot).unwrap();
    assert_eq!(db.config_record(user_id).unwrap().rate, 1.0);

    // Lower revision: skipped
    snapshot.debtor.config.latest_update_id = 4;
    db.install_or_update(&snapshot).unwrap();
    assert_eq!(db.config_record(user_id).unwrap().latest_update_id, 5);

    // Higher revision: applied
    snapshot.debtor.config.latest_update_id = 6;
    db.install_or_update(&snapshot).unwrap();
    let config = db.config_record(user_id).unwrap();
    assert_eq!(config.latest_update_id, 6);
    assert_eq!(config.rate, 9.0);
}

/// Test that the inline document is stored only when its config applies
#[test]
fn test_stale_config_does_not_store_document() {
    let (db, _temp) = create_store();
    let snapshot = base_snapshot();
    db.install_or_update(&snapshot).unwrap();

    // Same revision, now with a document riding along
    let mut stale = base_snapshot();
    stale.document = Some(InfoDocument {
        uri: "https://example.com/documents/9".to_string(),
        content: b"{}".to_vec(),
        content_type: "application/vnd.swaptacular.coin-info+json".to_string(),
    });
    db.install_or_update(&stale).unwrap();
    assert!(db
        .document_record("https://example.com/documents/9")
        .unwrap()
        .is_none());

    // Newer revision: the document is stored with it
    stale.debtor.config.latest_update_id = 2;
    db.install_or_update(&stale).unwrap();
    assert!(db
        .document_record("https://example.com/documents/9")
        .unwrap()
        .is_some());
}

/// Test that a delayed transfer queues exactly one abort action across
/// repeated passes
#[test]
fn test_delayed_transfer_queues_single_abort() {
    let (db, _temp) = create_store();
    let now = Utc::now();
    let initiated = now - Duration::seconds(TRANSFER_WAIT_SECONDS + 3600);

    let mut snapshot = base_snapshot();
    snapshot.transfers = vec![transfer_snapshot("t1", initiated, None)];

    let user_id = reconcile_at(&db, &snapshot, now).unwrap();
    let actions = db.action_records(user_id).unwrap();
    assert_eq!(actions.len(), 1);
    match &actions[0].payload {
        ActionPayload::AbortTransfer { uri } => {
            assert_eq!(uri, &format!("{}transfers/t1", DEBTOR_URI))
        }
        other => panic!("unexpected payload: {:?}", other),
    }

    // Second and third pass see the pending abort and add nothing
    reconcile_at(&db, &snapshot, now + Duration::minutes(5)).unwrap();
    reconcile_at(&db, &snapshot, now + Duration::minutes(10)).unwrap();
    assert_eq!(db.action_records(user_id).unwrap().len(), 1);
}

/// Test that a failed abort action no longer suppresses a fresh one
#[test]
fn test_failed_abort_action_is_queued_again() {
    let (db, _temp) = create_store();
    let now = Utc::now();
    let initiated = now - Duration::seconds(2 * TRANSFER_WAIT_SECONDS);

    let mut snapshot = base_snapshot();
    snapshot.transfers = vec![transfer_snapshot("t1", initiated, None)];
    let user_id = reconcile_at(&db, &snapshot, now).unwrap();

    let action_id = db.action_records(user_id).unwrap()[0].action_id.unwrap();
    db.resolve_action(action_id, Some(json!({ "code": "HTTP 500" })))
        .unwrap();

    // The failed record stays for inspection, and the next pass queues
    // a new pending abort
    reconcile_at(&db, &snapshot, now + Duration::minutes(5)).unwrap();
    let actions = db.action_records(user_id).unwrap();
    assert_eq!(actions.len(), 2);
    assert!(actions[0].error.is_some());
    assert!(actions[1].error.is_none());
}

/// Test that an unsuccessful transfer is stored concluded, with one
/// abort action queued
#[test]
fn test_unsuccessful_transfer_is_stored_concluded() {
    let (db, _temp) = create_store();
    let now = Utc::now();
    let initiated = now - Duration::hours(1);

    let mut snapshot = base_snapshot();
    snapshot.transfers = vec![transfer_snapshot(
        "t1",
        initiated,
        Some(failed_result(now)),
    )];
    let user_id = reconcile_at(&db, &snapshot, now).unwrap();

    let uri = format!("{}transfers/t1", DEBTOR_URI);
    assert!(db.is_concluded_transfer(&uri).unwrap());
    assert_eq!(db.action_records(user_id).unwrap().len(), 1);

    // Concluded rows never change again
    snapshot.transfers[0].amount = 9999;
    reconcile_at(&db, &snapshot, now + Duration::minutes(5)).unwrap();
    let record = db.transfer_record(&uri).unwrap().unwrap();
    assert_eq!(record.amount, 1000);
    assert_eq!(db.action_records(user_id).unwrap().len(), 1);
}

/// Test that a waiting transfer is not stored yet
#[test]
fn test_waiting_transfer_is_not_stored() {
    let (db, _temp) = create_store();
    let now = Utc::now();

    let mut snapshot = base_snapshot();
    snapshot.transfers = vec![transfer_snapshot("t1", now - Duration::hours(1), None)];
    let user_id = reconcile_at(&db, &snapshot, now).unwrap();

    assert_eq!(db.transfer_records(user_id).unwrap().len(), 0);
    assert_eq!(db.action_records(user_id).unwrap().len(), 0);
}

/// Test that a successful outcome updates the known row and schedules
/// its deletion
#[test]
fn test_successful_transfer_schedules_deletion() {
    let (db, _temp) = create_store();
    let now = Utc::now();
    let initiated = now - Duration::seconds(2 * TRANSFER_WAIT_SECONDS);
    let uri = format!("{}transfers/t1", DEBTOR_URI);

    // First pass: the delayed transfer gets a local row
    let mut snapshot = base_snapshot();
    snapshot.transfers = vec![transfer_snapshot("t1", initiated, None)];
    let user_id = reconcile_at(&db, &snapshot, now).unwrap();

    // Second pass: the outcome arrived after all
    snapshot.transfers[0].result = Some(ok_result(now, 1000));
    reconcile_at(&db, &snapshot, now + Duration::minutes(5)).unwrap();

    let record = db.transfer_record(&uri).unwrap().unwrap();
    assert_eq!(record.result.unwrap().committed_amount, 1000);
    assert!(db.is_concluded_transfer(&uri).unwrap());

    let deletions = db.scheduled_deletions(user_id).unwrap();
    assert_eq!(deletions.len(), 1);
    assert_eq!(deletions[0].uri, uri);
    assert_eq!(deletions[0].resource_type, ResourceType::Transfer);

    // The sync layer consumes the marker once the remote delete went through
    db.delete_scheduled_deletion(&uri).unwrap();
    assert_eq!(db.scheduled_deletions(user_id).unwrap().len(), 0);
}

/// Test that a successful outcome for an unknown transfer fails the
/// whole pass, leaving no partial state
#[test]
fn test_successful_unknown_transfer_aborts_the_pass() {
    let (db, _temp) = create_store();
    let now = Utc::now();
    let snapshot = base_snapshot();
    let user_id = db.install_or_update(&snapshot).unwrap();

    // A newer config and a confirmed outcome for a transfer we never saw
    let mut broken = base_snapshot();
    broken.debtor.config.latest_update_id = 2;
    broken.transfers = vec![transfer_snapshot(
        "ghost",
        now - Duration::hours(1),
        Some(ok_result(now, 1000)),
    )];

    let err = reconcile_at(&db, &broken, now).unwrap_err();
    assert!(matches!(err, ReplicaError::NotFound(_)));

    // The config update from the failed pass was rolled back
    assert_eq!(db.config_record(user_id).unwrap().latest_update_id, 1);
    assert_eq!(db.stats().unwrap().transfer_count, 0);
    assert_eq!(db.stats().unwrap().scheduled_deletion_count, 0);
}

/// Test that a locally aborted transfer is shielded from later snapshots
#[test]
fn test_aborted_transfer_is_shielded() {
    let (db, _temp) = create_store();
    let now = Utc::now();
    let initiated = now - Duration::seconds(2 * TRANSFER_WAIT_SECONDS);
    let uri = format!("{}transfers/t1", DEBTOR_URI);

    let mut snapshot = base_snapshot();
    snapshot.transfers = vec![transfer_snapshot("t1", initiated, None)];
    let user_id = reconcile_at(&db, &snapshot, now).unwrap();

    // The remote service confirmed the abort
    db.abort_transfer(&uri).unwrap();
    assert!(db.is_concluded_transfer(&uri).unwrap());
    assert_eq!(db.scheduled_deletions(user_id).unwrap().len(), 1);

    // A late snapshot claiming success is ignored
    snapshot.transfers[0].result = Some(ok_result(now, 1000));
    reconcile_at(&db, &snapshot, now + Duration::minutes(5)).unwrap();
    let record = db.transfer_record(&uri).unwrap().unwrap();
    assert!(record.aborted);
    assert_eq!(record.result, None);
}

/// Test aborting a transfer that does not exist
#[test]
fn test_abort_unknown_transfer_is_not_found() {
    let (db, _temp) = create_store();
    db.install_or_update(&base_snapshot()).unwrap();
    assert!(matches!(
        db.abort_transfer("https://example.com/transfers/none"),
        Err(ReplicaError::NotFound(_))
    ));
}

/// Test that resolving an action is terminal
#[test]
fn test_resolve_action_is_terminal() {
    let (db, _temp) = create_store();
    let now = Utc::now();
    let initiated = now - Duration::seconds(2 * TRANSFER_WAIT_SECONDS);

    let mut snapshot = base_snapshot();
    snapshot.transfers = vec![
        transfer_snapshot("t1", initiated, None),
        transfer_snapshot("t2", initiated, None),
    ];
    let user_id = reconcile_at(&db, &snapshot, now).unwrap();
    let actions = db.action_records(user_id).unwrap();
    assert_eq!(actions.len(), 2);

    // Success removes the record
    let first = actions[0].action_id.unwrap();
    db.resolve_action(first, None).unwrap();
    assert!(db.action_record(first).unwrap().is_none());
    assert!(matches!(
        db.resolve_action(first, None),
        Err(ReplicaError::AlreadyResolved(_))
    ));

    // Failure keeps the record, but only once
    let second = actions[1].action_id.unwrap();
    db.resolve_action(second, Some(json!({ "code": "TIMEOUT" })))
        .unwrap();
    let record = db.action_record(second).unwrap().unwrap();
    assert_eq!(record.error, Some(json!({ "code": "TIMEOUT" })));
    assert!(matches!(
        db.resolve_action(second, Some(json!({ "code": "AGAIN" }))),
        Err(ReplicaError::AlreadyResolved(_))
    ));
}

/// Test creating, replacing and deleting queued actions
#[test]
fn test_action_queue_crud() {
    let (db, _temp) = create_store();
    let user_id = db.install_or_update(&base_snapshot()).unwrap();

    let mut action = ActionRecord {
        action_id: None,
        user_id,
        initiated_at: Utc::now(),
        error: None,
        payload: ActionPayload::AbortTransfer {
            uri: "https://example.com/transfers/x".to_string(),
        },
    };

    let action_id = db.create_action(&action).unwrap();
    let stored = db.action_record(action_id).unwrap().unwrap();
    assert_eq!(stored.action_id, Some(action_id));
    assert_eq!(stored.payload, action.payload);

    // Creating with an assigned id is a caller bug
    action.action_id = Some(action_id);
    assert!(matches!(
        db.create_action(&action),
        Err(ReplicaError::Precondition(_))
    ));

    // Replace overwrites the payload wholesale
    action.payload = ActionPayload::AbortTransfer {
        uri: "https://example.com/transfers/y".to_string(),
    };
    db.replace_action(&action).unwrap();
    let stored = db.action_record(action_id).unwrap().unwrap();
    assert_eq!(stored.payload, action.payload);

    // Replace without an id, or of a missing record, fails
    let mut unsaved = action.clone();
    unsaved.action_id = None;
    assert!(matches!(
        db.replace_action(&unsaved),
        Err(ReplicaError::Precondition(_))
    ));
    unsaved.action_id = Some(action_id + 100);
    assert!(matches!(
        db.replace_action(&unsaved),
        Err(ReplicaError::NotFound(_))
    ));

    // Deleting is idempotent
    db.delete_action(action_id).unwrap();
    db.delete_action(action_id).unwrap();
    assert!(db.action_record(action_id).unwrap().is_none());
}

/// Test the NotFound-versus-empty-list read contract
#[test]
fn test_reads_for_unknown_user_are_not_found() {
    let (db, _temp) = create_store();

    let err = db.debtor_record(42).unwrap_err();
    assert_eq!(err.to_string(), "Record does not exist: DebtorRecord(userId=42)");
    assert!(matches!(db.config_record(42), Err(ReplicaError::NotFound(_))));
    assert!(matches!(db.transfer_records(42), Err(ReplicaError::NotFound(_))));
    assert!(matches!(db.action_records(42), Err(ReplicaError::NotFound(_))));

    // An installed user with nothing queued reads as empty, not missing
    let user_id = db.install_or_update(&base_snapshot()).unwrap();
    assert_eq!(db.transfer_records(user_id).unwrap().len(), 0);
    assert_eq!(db.action_records(user_id).unwrap().len(), 0);

    // Point lookups report absence as None
    assert!(db.transfer_record("https://example.com/none").unwrap().is_none());
    assert!(db.document_record("https://example.com/none").unwrap().is_none());
    assert!(db.action_record(999).unwrap().is_none());
    assert_eq!(db.user_id_for_debtor("https://example.com/other/").unwrap(), None);
}

/// Test installing under a caller-chosen user id
#[test]
fn test_install_user_with_chosen_id() {
    let (db, _temp) = create_store();
    let snapshot = base_snapshot();

    let user_id = db.install_user(7, &snapshot).unwrap();
    assert_eq!(user_id, 7);
    assert_eq!(db.user_id_for_debtor(DEBTOR_URI).unwrap(), Some(7));

    assert!(matches!(
        db.install_user(7, &snapshot),
        Err(ReplicaError::AlreadyInstalled(7))
    ));

    // Fresh installs keep counting from past the chosen id
    let mut other = base_snapshot();
    other.debtor.uri = "https://example.com/debtors/2/".to_string();
    let next = db.install_or_update(&other).unwrap();
    assert!(next > 7);
}

/// Test that uninstalling removes every record the user owned
#[test]
fn test_uninstall_removes_everything() {
    let (db, _temp) = create_store();
    let now = Utc::now();
    let initiated = now - Duration::seconds(2 * TRANSFER_WAIT_SECONDS);

    let mut snapshot = base_snapshot();
    snapshot.document = Some(InfoDocument {
        uri: "https://example.com/documents/1".to_string(),
        content: b"{}".to_vec(),
        content_type: "application/vnd.swaptacular.coin-info+json".to_string(),
    });
    snapshot.transfers = vec![transfer_snapshot("t1", initiated, None)];
    let user_id = reconcile_at(&db, &snapshot, now).unwrap();
    db.abort_transfer(&format!("{}transfers/t1", DEBTOR_URI)).unwrap();

    db.uninstall_user(user_id).unwrap();

    assert!(!db.is_user_installed(user_id).unwrap());
    assert!(matches!(db.debtor_record(user_id), Err(ReplicaError::NotFound(_))));
    let stats = db.stats().unwrap();
    assert_eq!(stats.debtor_count, 0);
    assert_eq!(stats.config_count, 0);
    assert_eq!(stats.transfer_count, 0);
    assert_eq!(stats.document_count, 0);
    assert_eq!(stats.action_count, 0);
    assert_eq!(stats.scheduled_deletion_count, 0);
}

/// Test that a pass with an unresolvable debtor URI installs nothing
#[test]
fn test_relative_debtor_uri_rolls_back_install() {
    let (db, _temp) = create_store();
    let mut snapshot = base_snapshot();
    snapshot.debtor.uri = "debtors/1/".to_string();

    let err = db.install_or_update(&snapshot).unwrap_err();
    assert!(matches!(err, ReplicaError::Precondition(_)));
    assert_eq!(db.stats().unwrap().debtor_count, 0);
}

/// Test that the replica survives a close and reopen
#[test]
fn test_reopen_preserves_records() {
    let temp_dir = TempDir::new().unwrap();
    let user_id = {
        let db = ReplicaDb::open(temp_dir.path()).unwrap();
        db.install_or_update(&base_snapshot()).unwrap()
    };

    let db = ReplicaDb::open(temp_dir.path()).unwrap();
    let debtor = db.debtor_record(user_id).unwrap();
    assert_eq!(debtor.uri, DEBTOR_URI);
}
