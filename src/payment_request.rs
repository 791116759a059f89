//! Simple Payment Request (SPR0) decoder
//!
//! Reads "application/vnd.swaptacular.spr0" files, a minimalist text
//! format meant to stay human readable and small enough for a QR code.
//! The first eight newline-terminated lines are fixed:
//!
//! ```text
//! SPR0
//! <optional CRC32, 8 lowercase hex digits>
//! <payee account URI>
//! <payee name>
//! <amount, decimal digits>
//! <optional RFC 3339 deadline>
//! <payee reference>
//! <description format, must be empty>
//! ```
//!
//! Everything after the eighth line is a free-text description and may
//! span any number of lines. Lines may end with CRLF; a carriage
//! return anywhere else in a fixed line is a parse error. The CRC32,
//! when present, covers the raw bytes after the second line
//! terminator.
//!
//! A decoded request becomes a pending `CreateTransfer` action that
//! carries the original document for display and audit.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::PaymentRequestError;
use crate::records::{
    ActionPayload, ActionRecord, CreateTransferData, DocumentData, PaymentInfo,
    TransferCreationRequest, UserId,
};

/// Content type of payment request documents
pub const MIME_TYPE_SPR0: &str = "application/vnd.swaptacular.spr0";

/// Note format identifying the payee reference in a transfer note
pub const NOTE_FORMAT_PAYEEREF: &str = "payeeref";

/// Decode a payment request into a pending [`ActionPayload::CreateTransfer`]
/// action for `user_id`.
///
/// An empty content type is accepted; any other value must be
/// [`MIME_TYPE_SPR0`]. Field text is decoded from UTF-8 with invalid
/// sequences replaced. The deadline is validated but not part of the
/// action payload.
pub fn parse_payment_request(
    user_id: UserId,
    request: &DocumentData,
) -> Result<ActionRecord, PaymentRequestError> {
    if !request.content_type.is_empty() && request.content_type != MIME_TYPE_SPR0 {
        return Err(PaymentRequestError::WrongContentType(
            request.content_type.clone(),
        ));
    }

    let raw = split_request(&request.content).ok_or(PaymentRequestError::Malformed)?;

    if !raw.crc32.is_empty() {
        let computed = format!("{:08x}", crc32fast::hash(raw.body));
        if raw.crc32 != computed {
            return Err(PaymentRequestError::ChecksumMismatch {
                expected: raw.crc32,
                computed,
            });
        }
    }

    let amount = parse_amount(&raw.amount)?;

    if !raw.deadline.is_empty() {
        DateTime::parse_from_rfc3339(&raw.deadline)
            .map_err(|_| PaymentRequestError::InvalidDeadline(raw.deadline.clone()))?;
    }

    if !raw.description_format.is_empty() {
        return Err(PaymentRequestError::UnsupportedDescriptionFormat(
            raw.description_format,
        ));
    }

    Ok(ActionRecord {
        action_id: None,
        user_id,
        initiated_at: Utc::now(),
        error: None,
        payload: ActionPayload::CreateTransfer(CreateTransferData {
            creation_request: TransferCreationRequest {
                recipient_uri: raw.account_uri,
                amount,
                transfer_uuid: Uuid::new_v4(),
                note_format: NOTE_FORMAT_PAYEEREF.to_string(),
                note: raw.payee_reference,
            },
            payment_info: PaymentInfo {
                payee_name: raw.payee_name,
                payment_request: Some(DocumentData {
                    content: request.content.clone(),
                    content_type: MIME_TYPE_SPR0.to_string(),
                }),
            },
        }),
    })
}

struct RawRequest<'a> {
    crc32: String,
    account_uri: String,
    payee_name: String,
    amount: String,
    deadline: String,
    payee_reference: String,
    description_format: String,
    /// Bytes after the second line terminator, the CRC32 input
    body: &'a [u8],
}

/// Split the fixed eight-line header. `None` when the line structure
/// does not hold.
fn split_request(content: &[u8]) -> Option<RawRequest<'_>> {
    let mut rest = content;
    let mut body = content;
    let mut lines: [String; 8] = Default::default();

    for (index, slot) in lines.iter_mut().enumerate() {
        let newline = rest.iter().position(|&b| b == b'\n')?;
        let mut line = &rest[..newline];
        if let [head @ .., b'\r'] = line {
            line = head;
        }
        if line.contains(&b'\r') {
            return None;
        }
        *slot = String::from_utf8_lossy(line).into_owned();
        rest = &rest[newline + 1..];
        if index == 1 {
            body = rest;
        }
    }

    let [magic, crc32, account_uri, payee_name, amount, deadline, payee_reference, description_format] =
        lines;
    if magic != "SPR0" {
        return None;
    }
    if amount.is_empty() || !amount.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    Some(RawRequest {
        crc32,
        account_uri,
        payee_name,
        amount,
        deadline,
        payee_reference,
        description_format,
        body,
    })
}

/// Digits beyond u128 range overflow just the same as values above
/// `i64::MAX`.
fn parse_amount(digits: &str) -> Result<i64, PaymentRequestError> {
    let amount: u128 = digits
        .parse()
        .map_err(|_| PaymentRequestError::AmountOverflow)?;
    if amount > i64::MAX as u128 {
        return Err(PaymentRequestError::AmountOverflow);
    }
    Ok(amount as i64)
}
