//! The record-store adapter contract.
//!
//! Core services hold an `Arc<dyn RecordStore>` and never learn which backend
//! is behind it. Paths are plain slash-separated strings built by the caller;
//! composite keys (`{parentId}_{childId}`) are likewise caller-constructed.
//! The store never invents identifiers.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::document::Document;
use crate::query::QuerySpec;
use crate::subscription::Subscription;
use crate::{StoreError, StoreResult};

/// Mint a fresh document id. Ids are created on the client side, never by
/// the store, so a write and the projections derived from it can share one
/// identifier before anything is persisted.
pub fn new_document_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// The body of a conditional transaction. Runs against an isolated snapshot;
/// reads are version-checked and buffered writes applied atomically at
/// commit. The adapter retries the whole body on conflicting concurrent
/// writers, so it must be safe to run more than once.
pub type TransactionFn = Box<dyn FnMut(&mut StoreTransaction) -> StoreResult<Value> + Send>;

/// Asynchronous document store: merge writes, conditional transactions and
/// snapshot subscriptions over path-addressed JSON documents.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch one document, or [`StoreError::NotFound`].
    async fn get_document(&self, path: &str) -> StoreResult<Document>;

    /// Upsert: merge only the given (possibly nested) keys, preserving
    /// untouched sibling fields.
    async fn set_merge(&self, path: &str, fields: Document) -> StoreResult<()>;

    /// Merge fields into an existing document; fails with
    /// [`StoreError::NotFound`] when the document is absent.
    async fn update_fields(&self, path: &str, fields: Document) -> StoreResult<()>;

    /// Physically delete a document. May fail with
    /// [`StoreError::PermissionDenied`] under the external access policy;
    /// callers needing resilience catch that and fall back to a flag write.
    async fn delete_document(&self, path: &str) -> StoreResult<()>;

    /// Set-union `values` into an array field, creating document and field as
    /// needed. Values already present are not duplicated.
    async fn array_union(&self, path: &str, field: &str, values: Vec<Value>) -> StoreResult<()>;

    /// Set-remove `values` from an array field. Absent document or field is
    /// treated as an empty set.
    async fn array_remove(&self, path: &str, field: &str, values: Vec<Value>) -> StoreResult<()>;

    /// Run `body` inside an atomic conditional transaction, transparently
    /// retried on conflicting concurrent writers. Exhausted retries surface
    /// as [`StoreError::Aborted`].
    async fn run_transaction(&self, body: TransactionFn) -> StoreResult<Value>;

    /// One-shot query over the direct documents of a collection.
    async fn query(&self, collection: &str, spec: &QuerySpec) -> StoreResult<Vec<(String, Document)>>;

    /// Long-lived subscription: delivers the current result snapshot
    /// immediately, then a fresh snapshot after every matching change, until
    /// the handle is closed.
    async fn subscribe_query(&self, collection: &str, spec: QuerySpec) -> StoreResult<Subscription>;
}

/// Read-and-buffer view handed to a transaction body.
///
/// Reads come from a snapshot taken when the attempt started and are recorded
/// for commit-time version verification; writes are buffered merges applied
/// only if every read is still current.
pub struct StoreTransaction {
    snapshot: BTreeMap<String, (u64, Document)>,
    reads: BTreeMap<String, u64>,
    writes: Vec<(String, Document)>,
}

impl StoreTransaction {
    pub(crate) fn new(snapshot: BTreeMap<String, (u64, Document)>) -> Self {
        Self {
            snapshot,
            reads: BTreeMap::new(),
            writes: Vec::new(),
        }
    }

    /// Read a document from the attempt snapshot. Absence is recorded too, so
    /// a concurrent create also invalidates the attempt.
    pub fn get(&mut self, path: &str) -> Option<Document> {
        match self.snapshot.get(path) {
            Some((version, doc)) => {
                self.reads.insert(path.to_string(), *version);
                Some(doc.clone())
            }
            None => {
                self.reads.insert(path.to_string(), 0);
                None
            }
        }
    }

    /// Buffer a merge write, applied at commit.
    pub fn set_merge(&mut self, path: &str, fields: Document) {
        self.writes.push((path.to_string(), fields));
    }

    /// Buffer a merge that requires the document to exist in the snapshot.
    pub fn update(&mut self, path: &str, fields: Document) -> StoreResult<()> {
        if self.get(path).is_none() {
            return Err(StoreError::NotFound(path.to_string()));
        }
        self.writes.push((path.to_string(), fields));
        Ok(())
    }

    pub(crate) fn into_parts(self) -> (BTreeMap<String, u64>, Vec<(String, Document)>) {
        (self.reads, self.writes)
    }
}
