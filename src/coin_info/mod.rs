//! Coin-info document codec
//!
//! Serializes and parses "application/vnd.swaptacular.coin-info+json"
//! documents, the immutable JSON format a currency's parameters are
//! published in. Documents are content-addressed by a SHA-256 hash in
//! uppercase hex.
//!
//! Parsing tolerates more than serialization produces: integer fields
//! may arrive as non-integral JSON numbers (rounded up here), unknown
//! properties are dropped, and an unparsable `willNotChangeUntil` is
//! treated as absent. Serialization refuses data the schema would
//! reject.

pub mod schema;

use chrono::{DateTime, Datelike, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use sha2::{Digest, Sha256};

use crate::error::DocumentError;
use crate::records::DocumentData;

/// Content type of coin-info documents
pub const MIME_TYPE_COIN_INFO: &str = "application/vnd.swaptacular.coin-info+json";

/// Largest document `parse_document` will look at
pub const MAX_DOCUMENT_CONTENT_SIZE: usize = 5 * 1024 * 1024;

// `willNotChangeUntil` dates outside this window are not meaningful
const MIN_DATE_YEAR: i32 = 1970;
const MAX_DATE_YEAR: i32 = 9998;

/// The information a coin-info document carries about a debtor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebtorData {
    pub debtor_identity: DebtorIdentity,
    pub revision: i64,
    pub latest_debtor_info: ResourceRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub will_not_change_until: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub debtor_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debtor_homepage: Option<ResourceRef>,
    pub amount_divisor: f64,
    pub decimal_places: i64,
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peg: Option<Peg>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub localization: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebtorIdentity {
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Peg {
    pub exchange_rate: f64,
    pub debtor_identity: DebtorIdentity,
    pub latest_debtor_info: ResourceRef,
    pub display: PegDisplay,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PegDisplay {
    pub amount_divisor: f64,
    pub decimal_places: i64,
    pub unit: String,
}

/// A serialized document together with its content address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentWithHash {
    pub content: Vec<u8>,
    pub content_type: String,
    /// SHA-256 of `content`, uppercase hex
    pub sha256: String,
}

impl DocumentWithHash {
    pub fn as_document_data(&self) -> DocumentData {
        DocumentData {
            content: self.content.clone(),
            content_type: self.content_type.clone(),
        }
    }
}

/// SHA-256 of `content` as uppercase hex
pub fn sha256_hex(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode_upper(hasher.finalize())
}

/// Serialize `data` into a schema-valid coin-info document.
///
/// Fails with [`DocumentError::Schema`] when a field would not pass
/// validation, with `willNotChangeUntil` checked first the way the
/// reference serializer does it.
pub fn generate_document(data: &DebtorData) -> Result<DocumentWithHash, DocumentError> {
    if let Some(date) = &data.will_not_change_until {
        let year = date.year();
        if !(MIN_DATE_YEAR..=MAX_DATE_YEAR).contains(&year) {
            return Err(DocumentError::Schema {
                path: "/willNotChangeUntil".to_string(),
                message: "must be a valid Date".to_string(),
            });
        }
    }

    let wire = WireCoinInfo::from_data(data);
    let value = serde_json::to_value(&wire).map_err(|_| DocumentError::Parse)?;
    if let Some(violation) = schema::validate(&value).into_iter().next() {
        return Err(DocumentError::Schema {
            path: violation.path,
            message: violation.message,
        });
    }
    let content = serde_json::to_vec(&value).map_err(|_| DocumentError::Parse)?;
    let sha256 = sha256_hex(&content);

    Ok(DocumentWithHash {
        content,
        content_type: MIME_TYPE_COIN_INFO.to_string(),
        sha256,
    })
}

/// Parse a coin-info document back into [`DebtorData`].
///
/// Checks run in a fixed order: content type, size, UTF-8, JSON
/// well-formedness, then schema validation.
pub fn parse_document(document: &DocumentData) -> Result<DebtorData, DocumentError> {
    if document.content_type != MIME_TYPE_COIN_INFO {
        return Err(DocumentError::UnknownContentType(
            document.content_type.clone(),
        ));
    }
    if document.content.len() > MAX_DOCUMENT_CONTENT_SIZE {
        return Err(DocumentError::TooBig {
            size: document.content.len(),
            max: MAX_DOCUMENT_CONTENT_SIZE,
        });
    }
    let text = std::str::from_utf8(&document.content).map_err(|_| DocumentError::Encoding)?;
    let value: Value = serde_json::from_str(text).map_err(|_| DocumentError::Parse)?;
    if let Some(violation) = schema::validate(&value).into_iter().next() {
        return Err(DocumentError::Schema {
            path: violation.path,
            message: violation.message,
        });
    }
    let wire: WireCoinInfo = serde_json::from_value(value).map_err(|_| DocumentError::Parse)?;
    Ok(wire.into_data())
}

// ===== Wire format =====
//
// The wire structs keep the JSON shape apart from the engine-side
// model: `type` discriminators exist only on the wire, and integer
// fields are `Number` so a lenient peer's `3.0` still parses.

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCoinInfo {
    #[serde(rename = "type")]
    doc_type: String,
    revision: Number,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    will_not_change_until: Option<String>,
    latest_debtor_info: ResourceRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
    debtor_identity: WireDebtorIdentity,
    debtor_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    debtor_homepage: Option<ResourceRef>,
    amount_divisor: f64,
    decimal_places: Number,
    unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    peg: Option<WirePeg>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    localization: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireDebtorIdentity {
    #[serde(rename = "type")]
    doc_type: String,
    uri: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePeg {
    #[serde(rename = "type")]
    doc_type: String,
    exchange_rate: f64,
    debtor_identity: WireDebtorIdentity,
    latest_debtor_info: ResourceRef,
    display: WirePegDisplay,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePegDisplay {
    #[serde(rename = "type")]
    doc_type: String,
    amount_divisor: f64,
    decimal_places: Number,
    unit: String,
}

impl WireCoinInfo {
    fn from_data(data: &DebtorData) -> Self {
        Self {
            doc_type: "CoinInfo".to_string(),
            revision: Number::from(data.revision),
            will_not_change_until: data
                .will_not_change_until
                .map(|date| date.to_rfc3339_opts(SecondsFormat::Millis, true)),
            latest_debtor_info: data.latest_debtor_info.clone(),
            summary: data.summary.clone(),
            debtor_identity: WireDebtorIdentity {
                doc_type: "DebtorIdentity".to_string(),
                uri: data.debtor_identity.uri.clone(),
            },
            debtor_name: data.debtor_name.clone(),
            debtor_homepage: data.debtor_homepage.clone(),
            amount_divisor: data.amount_divisor,
            decimal_places: Number::from(data.decimal_places),
            unit: data.unit.clone(),
            peg: data.peg.as_ref().map(|peg| WirePeg {
                doc_type: "Peg".to_string(),
                exchange_rate: peg.exchange_rate,
                debtor_identity: WireDebtorIdentity {
                    doc_type: "DebtorIdentity".to_string(),
                    uri: peg.debtor_identity.uri.clone(),
                },
                latest_debtor_info: peg.latest_debtor_info.clone(),
                display: WirePegDisplay {
                    doc_type: "PegDisplay".to_string(),
                    amount_divisor: peg.display.amount_divisor,
                    decimal_places: Number::from(peg.display.decimal_places),
                    unit: peg.display.unit.clone(),
                },
            }),
            localization: data.localization.clone(),
        }
    }

    fn into_data(self) -> DebtorData {
        DebtorData {
            debtor_identity: DebtorIdentity {
                uri: self.debtor_identity.uri,
            },
            revision: ceil_to_i64(&self.revision),
            latest_debtor_info: self.latest_debtor_info,
            will_not_change_until: parse_optional_date(self.will_not_change_until.as_deref()),
            summary: self.summary,
            debtor_name: self.debtor_name,
            debtor_homepage: self.debtor_homepage,
            amount_divisor: self.amount_divisor,
            decimal_places: ceil_to_i64(&self.decimal_places),
            unit: self.unit,
            peg: self.peg.map(|peg| Peg {
                exchange_rate: peg.exchange_rate,
                debtor_identity: DebtorIdentity {
                    uri: peg.debtor_identity.uri,
                },
                latest_debtor_info: peg.latest_debtor_info,
                display: PegDisplay {
                    amount_divisor: peg.display.amount_divisor,
                    decimal_places: ceil_to_i64(&peg.display.decimal_places),
                    unit: peg.display.unit,
                },
            }),
            localization: self.localization,
        }
    }
}

fn ceil_to_i64(number: &Number) -> i64 {
    if let Some(i) = number.as_i64() {
        i
    } else if let Some(u) = number.as_u64() {
        u.min(i64::MAX as u64) as i64
    } else {
        // saturating float-to-int cast
        number.as_f64().map(|f| f.ceil() as i64).unwrap_or(0)
    }
}

/// Dates that fail to parse or fall outside the supported year range
/// are treated as "no promise made".
fn parse_optional_date(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw?).ok()?.with_timezone(&Utc);
    if (MIN_DATE_YEAR..=MAX_DATE_YEAR).contains(&parsed.year()) {
        Some(parsed)
    } else {
        None
    }
}
