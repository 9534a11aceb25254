//! In-memory reference implementation of the store contracts.
//!
//! Documents live in a version-stamped map behind a `tokio::sync::RwLock`;
//! transactions are optimistic (snapshot, run, verify read versions, apply)
//! with bounded retries, serialized against each other by a dedicated lock so
//! two transactions never livelock each other; only plain writes can force a
//! retry. Subscribers get a full recomputed snapshot after every mutation of
//! their collection.
//!
//! This is the store the tests and the operator CLI run against; the hosted
//! backend implements the same traits out-of-tree.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::document::{merge_into, split_path, Document};
use crate::query::QuerySpec;
use crate::record::{RecordStore, StoreTransaction, TransactionFn};
use crate::subscription::{Subscriber, Subscription};
use crate::{StoreError, StoreResult};

const MAX_TRANSACTION_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone)]
struct VersionedDoc {
    version: u64,
    data: Document,
}

#[derive(Default)]
struct State {
    docs: BTreeMap<String, VersionedDoc>,
    subscribers: Vec<Subscriber>,
    next_version: u64,
    deny_physical_deletes: bool,
}

/// In-memory [`RecordStore`].
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    txn_lock: Mutex<()>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the external access policy rejecting physical deletes, the
    /// way the hosted store's declarative rules do for non-admin roles.
    /// Subsequent `delete_document` calls fail with `PermissionDenied`.
    pub async fn set_deny_physical_deletes(&self, deny: bool) {
        self.state.write().await.deny_physical_deletes = deny;
    }

    /// Number of stored documents, for tests and diagnostics.
    pub async fn len(&self) -> usize {
        self.state.read().await.docs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn query_state(state: &State, collection: &str, spec: &QuerySpec) -> Vec<(String, Document)> {
        let prefix = format!("{collection}/");
        let rows: Vec<(String, Document)> = state
            .docs
            .iter()
            .filter(|(path, _)| {
                path.strip_prefix(&prefix)
                    .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
            })
            .filter(|(_, doc)| spec.matches(&doc.data))
            .map(|(path, doc)| {
                let id = path.rsplit('/').next().unwrap_or_default().to_string();
                (id, doc.data.clone())
            })
            .collect();
        spec.arrange(rows)
    }

    fn apply_merge(state: &mut State, path: &str, fields: &Document) {
        state.next_version += 1;
        let version = state.next_version;
        let entry = state.docs.entry(path.to_string()).or_insert_with(|| VersionedDoc {
            version,
            data: Document::new(),
        });
        merge_into(&mut entry.data, fields);
        entry.version = version;
    }

    /// Recompute and push snapshots for every live subscriber of `collection`,
    /// pruning the dead ones.
    fn notify(state: &mut State, collection: &str) {
        let snapshots: Vec<Option<Vec<(String, Document)>>> = state
            .subscribers
            .iter()
            .map(|sub| {
                (sub.collection == collection)
                    .then(|| Self::query_state(state, collection, &sub.spec))
            })
            .collect();

        let mut results = snapshots.into_iter();
        state.subscribers.retain(|sub| match results.next().flatten() {
            Some(snapshot) => sub.deliver(snapshot),
            None => !sub.tx.is_closed(),
        });
    }

    fn notify_all(state: &mut State, collections: BTreeSet<String>) {
        for collection in collections {
            Self::notify(state, &collection);
        }
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get_document(&self, path: &str) -> StoreResult<Document> {
        split_path(path)?;
        let state = self.state.read().await;
        state
            .docs
            .get(path)
            .map(|doc| doc.data.clone())
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    async fn set_merge(&self, path: &str, fields: Document) -> StoreResult<()> {
        let (collection, _) = split_path(path)?;
        let collection = collection.to_string();
        let mut state = self.state.write().await;
        Self::apply_merge(&mut state, path, &fields);
        Self::notify(&mut state, &collection);
        Ok(())
    }

    async fn update_fields(&self, path: &str, fields: Document) -> StoreResult<()> {
        let (collection, _) = split_path(path)?;
        let collection = collection.to_string();
        let mut state = self.state.write().await;
        if !state.docs.contains_key(path) {
            return Err(StoreError::NotFound(path.to_string()));
        }
        Self::apply_merge(&mut state, path, &fields);
        Self::notify(&mut state, &collection);
        Ok(())
    }

    async fn delete_document(&self, path: &str) -> StoreResult<()> {
        let (collection, _) = split_path(path)?;
        let collection = collection.to_string();
        let mut state = self.state.write().await;
        if state.deny_physical_deletes {
            return Err(StoreError::PermissionDenied(format!(
                "physical delete rejected by access policy: {path}"
            )));
        }
        if state.docs.remove(path).is_none() {
            return Err(StoreError::NotFound(path.to_string()));
        }
        Self::notify(&mut state, &collection);
        Ok(())
    }

    async fn array_union(&self, path: &str, field: &str, values: Vec<Value>) -> StoreResult<()> {
        let (collection, _) = split_path(path)?;
        let collection = collection.to_string();
        let mut state = self.state.write().await;

        state.next_version += 1;
        let version = state.next_version;
        let entry = state.docs.entry(path.to_string()).or_insert_with(|| VersionedDoc {
            version,
            data: Document::new(),
        });

        let slot = entry.data.entry(field.to_string()).or_insert(Value::Array(Vec::new()));
        let Value::Array(items) = slot else {
            return Err(StoreError::NotAnArray(field.to_string()));
        };
        for value in values {
            if !items.contains(&value) {
                items.push(value);
            }
        }
        entry.version = version;

        Self::notify(&mut state, &collection);
        Ok(())
    }

    async fn array_remove(&self, path: &str, field: &str, values: Vec<Value>) -> StoreResult<()> {
        let (collection, _) = split_path(path)?;
        let collection = collection.to_string();
        let mut state = self.state.write().await;

        let Some(entry) = state.docs.get_mut(path) else {
            return Ok(());
        };
        match entry.data.get_mut(field) {
            Some(Value::Array(items)) => items.retain(|item| !values.contains(item)),
            Some(_) => return Err(StoreError::NotAnArray(field.to_string())),
            None => return Ok(()),
        }
        state.next_version += 1;
        let version = state.next_version;
        if let Some(entry) = state.docs.get_mut(path) {
            entry.version = version;
        }

        Self::notify(&mut state, &collection);
        Ok(())
    }

    async fn run_transaction(&self, mut body: TransactionFn) -> StoreResult<Value> {
        // Transactions are serialized against each other; only interleaved
        // plain writes can invalidate an attempt.
        let _serial = self.txn_lock.lock().await;

        for attempt in 0..MAX_TRANSACTION_ATTEMPTS {
            let snapshot: BTreeMap<String, (u64, Document)> = {
                let state = self.state.read().await;
                state
                    .docs
                    .iter()
                    .map(|(path, doc)| (path.clone(), (doc.version, doc.data.clone())))
                    .collect()
            };

            let mut tx = StoreTransaction::new(snapshot);
            let value = body(&mut tx)?;
            let (reads, writes) = tx.into_parts();

            let mut state = self.state.write().await;
            let current = reads.iter().all(|(path, seen)| {
                let live = state.docs.get(path).map(|doc| doc.version).unwrap_or(0);
                live == *seen
            });
            if !current {
                tracing::debug!(attempt = attempt + 1, "transaction snapshot went stale, retrying");
                continue;
            }

            let mut touched = BTreeSet::new();
            for (path, fields) in &writes {
                let (collection, _) = split_path(path)?;
                touched.insert(collection.to_string());
                Self::apply_merge(&mut state, path, fields);
            }
            Self::notify_all(&mut state, touched);
            return Ok(value);
        }

        Err(StoreError::Aborted(MAX_TRANSACTION_ATTEMPTS))
    }

    async fn query(&self, collection: &str, spec: &QuerySpec) -> StoreResult<Vec<(String, Document)>> {
        let state = self.state.read().await;
        Ok(Self::query_state(&state, collection, spec))
    }

    async fn subscribe_query(&self, collection: &str, spec: QuerySpec) -> StoreResult<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let alive = Arc::new(AtomicBool::new(true));

        let mut state = self.state.write().await;
        let initial = Self::query_state(&state, collection, &spec);
        let subscriber = Subscriber {
            collection: collection.to_string(),
            spec,
            tx,
            alive: alive.clone(),
        };
        subscriber.deliver(initial);
        state.subscribers.push(subscriber);

        Ok(Subscription::new(rx, alive))
    }
}
