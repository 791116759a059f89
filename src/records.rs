//! Record model for the local replica
//!
//! Every record is scoped by `user_id`. A user's records are created and
//! destroyed together (install/uninstall), and all URIs stored here are
//! absolute. The wire-facing shapes keep the camelCase field names of the
//! remote service, so records can be handed to a UI without translation.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type UserId = i64;
pub type ActionId = i64;

pub const TRANSFER_WAIT_SECONDS: i64 = 86_400; // 24 hours

/// State of a transfer as seen by the reconciliation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Waiting,
    Delayed,
    Successful,
    Unsuccessful,
}

/// Classify a transfer from its result and initiation time.
///
/// `now` is passed in so that a whole reconciliation pass sees a single
/// clock reading.
pub fn transfer_state(
    result: Option<&TransferResult>,
    initiated_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> TransferState {
    match result {
        None => {
            let deadline = initiated_at + Duration::seconds(TRANSFER_WAIT_SECONDS);
            if now <= deadline {
                TransferState::Waiting
            } else {
                TransferState::Delayed
            }
        }
        Some(result) => {
            if result.error.is_some() {
                TransferState::Unsuccessful
            } else {
                TransferState::Successful
            }
        }
    }
}

/// Debtor row: one per installed user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebtorRecord {
    pub user_id: UserId,
    pub uri: String,
    /// Reference to the debtor's config, as received (may be relative)
    pub config_uri: String,
}

/// Config row: the debtor's configuration, guarded by `latest_update_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigRecord {
    pub user_id: UserId,
    pub uri: String,
    pub latest_update_id: i64,
    pub rate: f64,
    pub info: ConfigInfo,
}

/// Debtor info carried by a config: either a reference or an inline document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigInfo {
    Uri(String),
    Document(DocumentData),
}

/// Raw document bytes with their content type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentData {
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
    pub content_type: String,
}

/// Document row: immutable content stored under its URI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    pub user_id: UserId,
    pub uri: String,
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
    pub content_type: String,
}

/// Transfer row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    pub user_id: UserId,
    pub uri: String,
    pub recipient_uri: String,
    pub amount: i64,
    pub note_format: String,
    pub note: String,
    pub initiated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TransferResult>,
    #[serde(default)]
    pub aborted: bool,
}

impl TransferRecord {
    pub fn state(&self, now: DateTime<Utc>) -> TransferState {
        transfer_state(self.result.as_ref(), self.initiated_at, now)
    }

    /// A concluded transfer never changes again (except deletion scheduling)
    pub fn is_concluded(&self) -> bool {
        self.result.is_some() || self.aborted
    }
}

/// Final outcome reported by the remote service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResult {
    pub finalized_at: DateTime<Utc>,
    pub committed_amount: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TransferError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferError {
    pub error_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_locked_amount: Option<i64>,
}

/// Queued local mutation, pending until the sync layer resolves it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    /// Assigned by the store on creation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_id: Option<ActionId>,
    pub user_id: UserId,
    pub initiated_at: DateTime<Utc>,
    /// Set when the action resolved with a failure; pending while `None`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
    #[serde(flatten)]
    pub payload: ActionPayload,
}

/// Type-specific action payload, discriminated by `actionType` on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "actionType")]
pub enum ActionPayload {
    UpdateConfig(ConfigData),
    CreateTransfer(CreateTransferData),
    AbortTransfer { uri: String },
}

impl ActionPayload {
    pub fn action_type(&self) -> &'static str {
        match self {
            ActionPayload::UpdateConfig(_) => "UpdateConfig",
            ActionPayload::CreateTransfer(_) => "CreateTransfer",
            ActionPayload::AbortTransfer { .. } => "AbortTransfer",
        }
    }
}

/// Payload of an UpdateConfig action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigData {
    pub rate: f64,
    pub info: ConfigInfo,
}

/// Payload of a CreateTransfer action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransferData {
    pub creation_request: TransferCreationRequest,
    pub payment_info: PaymentInfo,
}

/// The request submitted to the remote service when the action runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferCreationRequest {
    pub recipient_uri: String,
    pub amount: i64,
    pub transfer_uuid: Uuid,
    pub note_format: String,
    pub note: String,
}

/// Presentation details kept next to the creation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInfo {
    pub payee_name: String,
    /// The original request document, kept for display and audit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_request: Option<DocumentData>,
}

/// Marks a concluded remote resource for cleanup by the sync layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledDeletionRecord {
    pub user_id: UserId,
    pub uri: String,
    pub resource_type: ResourceType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceType {
    Transfer,
}

// ---------------------------------------------------------------------------
// Snapshot shapes (reconciliation input)
// ---------------------------------------------------------------------------

/// Everything the transport fetched for one account, in one piece.
///
/// The debtor and transfer URIs must already be absolute; the config URI
/// may be relative and is resolved against the debtor URI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSnapshot {
    pub debtor: DebtorSnapshot,
    pub transfers: Vec<TransferSnapshot>,
    /// Inline info document, stored when the config update applies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<InfoDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebtorSnapshot {
    pub uri: String,
    pub config: ConfigSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSnapshot {
    pub uri: String,
    pub latest_update_id: i64,
    pub rate: f64,
    pub info: ConfigInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSnapshot {
    pub uri: String,
    pub recipient_uri: String,
    pub amount: i64,
    pub note_format: String,
    pub note: String,
    pub initiated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TransferResult>,
}

impl TransferSnapshot {
    pub fn state(&self, now: DateTime<Utc>) -> TransferState {
        transfer_state(self.result.as_ref(), self.initiated_at, now)
    }

    pub fn to_record(&self, user_id: UserId) -> TransferRecord {
        TransferRecord {
            user_id,
            uri: self.uri.clone(),
            recipient_uri: self.recipient_uri.clone(),
            amount: self.amount,
            note_format: self.note_format.clone(),
            note: self.note.clone(),
            initiated_at: self.initiated_at,
            result: self.result.clone(),
            aborted: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoDocument {
    pub uri: String,
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
    pub content_type: String,
}

/// Binary content as base64 inside JSON payloads
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded.as_bytes()).map_err(serde::de::Error::custom)
    }
}
