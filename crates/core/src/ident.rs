//! Patient record-code allocation.
//!
//! Record codes (`CDO-000123`) come from a single per-clinic counter
//! document. Allocation runs in a store transaction so two concurrent
//! registrations can never be handed the same number; the counter document
//! is created lazily by the first allocation.

use serde_json::{json, Value};
use std::sync::Arc;

use dpr_store::{to_document, RecordStore, StoreError};

use crate::config::ClinicConfig;
use crate::{paths, ClinicError, ClinicResult};

/// Render a record number in the clinic's code format. Numbers below one
/// render as all zeroes; they never come out of the allocator but can appear
/// in imported legacy data.
pub fn format_record_code(number: i64, prefix: &str, width: usize) -> String {
    let number = number.max(0);
    format!("{prefix}-{number:0width$}")
}

pub struct RecordCodeAllocator {
    store: Arc<dyn RecordStore>,
    config: Arc<ClinicConfig>,
}

impl RecordCodeAllocator {
    pub fn new(store: Arc<dyn RecordStore>, config: Arc<ClinicConfig>) -> Self {
        Self { store, config }
    }

    /// Reserve the next record number and return it formatted.
    ///
    /// An absent counter means no patient has ever been registered: the
    /// first allocation returns number 1 and persists 2 as the next. A
    /// transaction that keeps losing to concurrent writers surfaces as
    /// [`ClinicError::AllocationConflict`] with nothing reserved.
    pub async fn allocate(&self) -> ClinicResult<String> {
        let path = paths::patient_counter(self.config.clinic_id());
        let result = self
            .store
            .run_transaction(Box::new(move |tx| {
                let current = tx
                    .get(&path)
                    .and_then(|doc| doc.get("next_record_number").and_then(Value::as_i64))
                    .unwrap_or(1);
                tx.set_merge(&path, to_document(&json!({ "next_record_number": current + 1 }))?);
                Ok(Value::from(current))
            }))
            .await;

        let number = match result {
            Ok(value) => value.as_i64().unwrap_or(0),
            Err(StoreError::Aborted(_)) => return Err(ClinicError::AllocationConflict),
            Err(err) => return Err(err.into()),
        };
        Ok(format_record_code(
            number,
            self.config.record_code_prefix(),
            self.config.record_code_width(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dpr_store::MemoryStore;

    fn allocator(store: Arc<MemoryStore>) -> RecordCodeAllocator {
        RecordCodeAllocator::new(store, Arc::new(ClinicConfig::default()))
    }

    #[test]
    fn formatting_pads_and_clamps() {
        assert_eq!(format_record_code(1, "CDO", 6), "CDO-000001");
        assert_eq!(format_record_code(123456, "CDO", 6), "CDO-123456");
        assert_eq!(format_record_code(1234567, "CDO", 6), "CDO-1234567");
        assert_eq!(format_record_code(0, "CDO", 6), "CDO-000000");
        assert_eq!(format_record_code(-5, "CDO", 6), "CDO-000000");
    }

    #[tokio::test]
    async fn first_allocation_creates_the_counter() {
        let store = Arc::new(MemoryStore::new());
        let allocator = allocator(store.clone());

        assert_eq!(allocator.allocate().await.unwrap(), "CDO-000001");
        assert_eq!(allocator.allocate().await.unwrap(), "CDO-000002");

        let counter = store
            .get_document(&paths::patient_counter("clinica-principal"))
            .await
            .unwrap();
        assert_eq!(counter["next_record_number"], json!(3));
    }

    #[tokio::test]
    async fn concurrent_allocations_are_unique() {
        let store = Arc::new(MemoryStore::new());
        let allocator = Arc::new(allocator(store));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let allocator = allocator.clone();
            handles.push(tokio::spawn(async move { allocator.allocate().await.unwrap() }));
        }

        let mut codes = Vec::new();
        for handle in handles {
            codes.push(handle.await.unwrap());
        }
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), 10, "every registration got its own code");
    }
}
