//! # DPR Store
//!
//! The record-store and blob-store adapter boundary for the DPR system.
//!
//! This crate defines the only two seams the core business logic touches:
//!
//! - [`RecordStore`]: documents addressed by slash-separated paths, merge
//!   writes, conditional transactions and long-lived query subscriptions.
//! - [`BlobStore`]: opaque byte uploads with progress reporting.
//!
//! It also ships the in-memory reference implementations ([`MemoryStore`],
//! [`MemoryBlobStore`]) used by the tests and the operator CLI. The hosted
//! multi-tenant store the clinic actually runs on is reached through the same
//! traits; nothing above this crate knows which backend is live.
//!
//! **No business logic**: validation, derivation and cascade policy belong in
//! `dpr-core`.

mod blob;
mod document;
mod memory;
mod query;
mod record;
mod subscription;

pub use blob::{BlobStore, MemoryBlobStore, ProgressFn};
pub use document::{from_document, merge_into, to_document, value_cmp, Document};
pub use memory::MemoryStore;
pub use query::{Direction, Filter, FilterOp, QuerySpec};
pub use record::{new_document_id, RecordStore, StoreTransaction, TransactionFn};
pub use subscription::{Snapshot, Subscription};

/// Errors surfaced by store adapters.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("transaction aborted after {0} attempts")]
    Aborted(u32),
    #[error("invalid document path: {0}")]
    InvalidPath(String),
    #[error("field {0} is not an array")]
    NotAnArray(String),
    #[error("failed to (de)serialize document: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("blob not found: {0}")]
    BlobNotFound(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// True when the error only says the target was already gone, which the
    /// cascade paths in core treat as success.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::BlobNotFound(_))
    }
}
