//! Binary attachment storage, separate from the document store.
//!
//! Attachments upload in chunks so callers can surface progress; the returned
//! URL is opaque to the rest of the system and only ever stored or handed to
//! a viewer.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::{StoreError, StoreResult};

/// Progress callback: `(bytes_transferred, total_bytes)`.
pub type ProgressFn = Box<dyn Fn(u64, u64) + Send + Sync>;

const UPLOAD_CHUNK_BYTES: usize = 256 * 1024;

/// Blob storage contract for file attachments.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `path` and return a download URL. The progress
    /// callback, when given, fires at least once per chunk and once at
    /// completion.
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
        on_progress: Option<ProgressFn>,
    ) -> StoreResult<String>;

    /// Delete the blob at `path`, or [`StoreError::BlobNotFound`].
    async fn delete_blob(&self, path: &str) -> StoreResult<()>;
}

struct StoredBlob {
    bytes: Vec<u8>,
    content_type: String,
}

/// In-memory [`BlobStore`]. URLs are `memory://{path}`.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, StoredBlob>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, path: &str) -> bool {
        self.blobs.read().await.contains_key(path)
    }

    pub async fn size_of(&self, path: &str) -> Option<u64> {
        self.blobs.read().await.get(path).map(|b| b.bytes.len() as u64)
    }

    pub async fn content_type_of(&self, path: &str) -> Option<String> {
        self.blobs.read().await.get(path).map(|b| b.content_type.clone())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
        on_progress: Option<ProgressFn>,
    ) -> StoreResult<String> {
        let total = bytes.len() as u64;
        if let Some(progress) = &on_progress {
            let mut transferred = 0u64;
            progress(0, total);
            for chunk in bytes.chunks(UPLOAD_CHUNK_BYTES) {
                transferred += chunk.len() as u64;
                progress(transferred, total);
            }
        }

        self.blobs.write().await.insert(
            path.to_string(),
            StoredBlob {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(format!("memory://{path}"))
    }

    async fn delete_blob(&self, path: &str) -> StoreResult<()> {
        self.blobs
            .write()
            .await
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| StoreError::BlobNotFound(path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn upload_reports_progress_and_returns_a_url() {
        let store = MemoryBlobStore::new();
        let calls = Arc::new(AtomicU64::new(0));
        let last = Arc::new(AtomicU64::new(u64::MAX));

        let progress: ProgressFn = {
            let calls = calls.clone();
            let last = last.clone();
            Box::new(move |done, _total| {
                calls.fetch_add(1, Ordering::SeqCst);
                last.store(done, Ordering::SeqCst);
            })
        };

        let bytes = vec![0u8; UPLOAD_CHUNK_BYTES + 10];
        let url = store
            .upload("patient_files/c1/p1/xray.png", bytes, "image/png", Some(progress))
            .await
            .unwrap();

        assert_eq!(url, "memory://patient_files/c1/p1/xray.png");
        // One initial zero call plus one per chunk.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(last.load(Ordering::SeqCst), (UPLOAD_CHUNK_BYTES + 10) as u64);
        assert_eq!(
            store.size_of("patient_files/c1/p1/xray.png").await,
            Some((UPLOAD_CHUNK_BYTES + 10) as u64)
        );
    }

    #[tokio::test]
    async fn delete_is_exact_and_reports_missing_blobs() {
        let store = MemoryBlobStore::new();
        store
            .upload("patient_files/c1/p1/doc.pdf", b"pdf".to_vec(), "application/pdf", None)
            .await
            .unwrap();

        store.delete_blob("patient_files/c1/p1/doc.pdf").await.unwrap();
        let err = store.delete_blob("patient_files/c1/p1/doc.pdf").await.unwrap_err();
        assert!(matches!(err, StoreError::BlobNotFound(_)));
    }
}
