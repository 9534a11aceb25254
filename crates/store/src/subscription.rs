//! Subscription handles with explicit teardown.
//!
//! A subscription is an owned handle that must be closed (or dropped)
//! before the owning scope goes away. The store side checks the shared
//! liveness flag before every delivery, so nothing is pushed to a listener
//! that has already been torn down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::document::Document;

/// One delivery: the full result set of the subscribed query at a point in
/// time, as `(document_id, document)` pairs.
pub type Snapshot = Vec<(String, Document)>;

/// An open query subscription. Closing (explicitly or on drop) stops all
/// further deliveries.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Snapshot>,
    alive: Arc<AtomicBool>,
}

impl Subscription {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<Snapshot>, alive: Arc<AtomicBool>) -> Self {
        Self { rx, alive }
    }

    /// Await the next snapshot. `None` once the subscription is closed and
    /// all buffered snapshots have been drained.
    pub async fn next_snapshot(&mut self) -> Option<Snapshot> {
        if !self.alive.load(Ordering::Acquire) {
            // Drain what was delivered before close, then stop.
            return self.rx.try_recv().ok();
        }
        self.rx.recv().await
    }

    /// Non-blocking variant: the most recent undelivered snapshot, if any.
    pub fn try_next_snapshot(&mut self) -> Option<Snapshot> {
        let mut latest = None;
        while let Ok(snap) = self.rx.try_recv() {
            latest = Some(snap);
        }
        latest
    }

    /// Tear down the subscription. Idempotent; no deliveries happen after
    /// this returns.
    pub fn close(&mut self) {
        self.alive.store(false, Ordering::Release);
        self.rx.close();
    }

    pub fn is_closed(&self) -> bool {
        !self.alive.load(Ordering::Acquire)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

/// Store-side half of a subscription.
pub(crate) struct Subscriber {
    pub collection: String,
    pub spec: crate::query::QuerySpec,
    pub tx: mpsc::UnboundedSender<Snapshot>,
    pub alive: Arc<AtomicBool>,
}

impl Subscriber {
    /// Deliver a snapshot if the handle is still live. Returns false when the
    /// subscriber is gone and should be pruned.
    pub fn deliver(&self, snapshot: Snapshot) -> bool {
        if !self.alive.load(Ordering::Acquire) {
            return false;
        }
        self.tx.send(snapshot).is_ok()
    }
}
