//! Debtor Replica - Local state engine for an offline-capable currency issuer client
//!
//! Keeps a per-user replica of server-side debtor state in an embedded
//! SQLite database, reconciles remote account snapshots into it, and
//! queues the user's pending actions while the network is away.
//!
//! ## Data flow
//!
//! ```text
//! remote snapshot ──> reconcile ──> replica tables ──> UI reads
//!                                        │
//! user intent ──> action queue ──────────┘
//! ```
//!
//! - **db**: SQLite-backed replica store, reconciliation and action queue
//! - **coin_info**: codec for published currency-parameters documents
//! - **payment_request**: SPR0 payment request decoder
//!
//! ## Storage layout
//!
//! ```text
//! ~/.local/share/debtor-replica/
//! ├── debtors.db             # Replica database (WAL mode)
//! └── config.toml            # Configuration
//! ```

// Core modules
pub mod config;
pub mod error;
pub mod records;

// Replica store and action queue
pub mod db;

// Document codecs
pub mod coin_info;
pub mod payment_request;

// Re-exports
pub use config::Config;
pub use db::{DbStats, ReplicaDb};
pub use error::{DocumentError, PaymentRequestError, ReplicaError};
pub use records::{
    AccountSnapshot, ActionPayload, ActionRecord, ConfigRecord, DebtorRecord, DocumentData,
    ScheduledDeletionRecord, TransferRecord, TransferState,
};
pub use coin_info::{generate_document, parse_document, DebtorData};
pub use payment_request::parse_payment_request;
