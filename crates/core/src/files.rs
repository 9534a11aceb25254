//! Patient file attachments.
//!
//! An attachment is a blob plus a metadata record, uploaded blob-first so a
//! failed upload never leaves a record pointing at nothing. Attachments are
//! the one entity the system hard-deletes. Records can be linked to history
//! entries; the link set lives on the file record so one radiograph can back
//! several treatments.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use dpr_store::{
    from_document, new_document_id, to_document, BlobStore, ProgressFn, QuerySpec, RecordStore,
};
use dpr_types::Instant;

use crate::config::ClinicConfig;
use crate::validation::safe_file_name;
use crate::{paths, Actor, ClinicError, ClinicResult};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileAttachment {
    #[serde(skip_serializing, default)]
    pub id: String,
    pub name: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub url: String,
    pub storage_path: String,
    pub linked_history_ids: Vec<String>,
    pub uploaded_at: Option<Instant>,
    pub uploaded_by: String,
    pub uploaded_by_name: String,
}

pub struct FilesService {
    store: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
    config: Arc<ClinicConfig>,
}

impl FilesService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
        config: Arc<ClinicConfig>,
    ) -> Self {
        Self {
            store,
            blobs,
            config,
        }
    }

    /// Upload a file for a patient: blob first, then the metadata record.
    /// A blob failure is terminal for the whole action.
    pub async fn upload(
        &self,
        actor: &Actor,
        patient_id: &str,
        name: &str,
        content_type: &str,
        bytes: Vec<u8>,
        on_progress: Option<ProgressFn>,
    ) -> ClinicResult<FileAttachment> {
        actor.require_write("file upload")?;
        if name.trim().is_empty() {
            return Err(ClinicError::validation("name", "cannot be empty"));
        }

        let clinic = self.config.clinic_id();
        let file_id = new_document_id();
        let safe = safe_file_name(name);
        let storage_path = paths::blob(clinic, patient_id, &file_id, &safe);
        let size_bytes = bytes.len() as u64;

        let url = self
            .blobs
            .upload(&storage_path, bytes, content_type, on_progress)
            .await?;

        let attachment = FileAttachment {
            id: file_id.clone(),
            name: name.trim().to_string(),
            content_type: content_type.to_string(),
            size_bytes,
            url,
            storage_path,
            linked_history_ids: Vec::new(),
            uploaded_at: Some(Instant::now()),
            uploaded_by: actor.uid.clone(),
            uploaded_by_name: actor.display_name.clone(),
        };
        let path = paths::file(clinic, patient_id, &file_id);
        self.store.set_merge(&path, to_document(&attachment)?).await?;
        Ok(attachment)
    }

    /// Hard-delete an attachment: blob first (absence is success), then the
    /// record.
    pub async fn delete(&self, actor: &Actor, patient_id: &str, file_id: &str) -> ClinicResult<()> {
        actor.require_write("file delete")?;

        let clinic = self.config.clinic_id();
        let path = paths::file(clinic, patient_id, file_id);
        let doc = match self.store.get_document(&path).await {
            Ok(doc) => doc,
            Err(err) if err.is_not_found() => {
                return Err(ClinicError::NotFound(format!("file {file_id}")));
            }
            Err(err) => return Err(err.into()),
        };
        let attachment: FileAttachment = from_document(&doc)?;

        // An orphaned blob is acceptable; a dangling record is worse. The
        // record delete goes ahead whatever happened to the blob.
        match self.blobs.delete_blob(&attachment.storage_path).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {
                tracing::warn!(file = %file_id, "blob already gone, removing record anyway");
            }
            Err(err) => {
                tracing::warn!(file = %file_id, error = %err, "blob delete failed, removing record anyway");
            }
        }

        match self.store.delete_document(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Link an attachment to a history entry of the same patient. Set
    /// semantics: linking twice is one link.
    pub async fn associate(
        &self,
        actor: &Actor,
        patient_id: &str,
        file_id: &str,
        history_id: &str,
    ) -> ClinicResult<()> {
        actor.require_write("file associate")?;

        // The only cross-entity existence check in the module: the link target
        // must be a treatment of the same patient.
        let clinic = self.config.clinic_id();
        let treatment = paths::treatment(clinic, patient_id, history_id);
        match self.store.get_document(&treatment).await {
            Ok(_) => {}
            Err(err) if err.is_not_found() => {
                return Err(ClinicError::NotFound(format!(
                    "history entry {patient_id}/{history_id}"
                )));
            }
            Err(err) => return Err(err.into()),
        }

        let path = paths::file(clinic, patient_id, file_id);
        self.store
            .array_union(&path, "linked_history_ids", vec![json!(history_id)])
            .await?;
        Ok(())
    }

    /// Remove a link. Unlinking something that was never linked is a no-op.
    pub async fn dissociate(
        &self,
        actor: &Actor,
        patient_id: &str,
        file_id: &str,
        history_id: &str,
    ) -> ClinicResult<()> {
        actor.require_write("file dissociate")?;
        let path = paths::file(self.config.clinic_id(), patient_id, file_id);
        self.store
            .array_remove(&path, "linked_history_ids", vec![json!(history_id)])
            .await?;
        Ok(())
    }

    pub async fn list(&self, patient_id: &str) -> ClinicResult<Vec<FileAttachment>> {
        let rows = self
            .store
            .query(
                &paths::files(self.config.clinic_id(), patient_id),
                &QuerySpec::new(),
            )
            .await?;
        let mut attachments = Vec::with_capacity(rows.len());
        for (id, doc) in rows {
            let mut attachment: FileAttachment = from_document(&doc)?;
            attachment.id = id;
            attachments.push(attachment);
        }
        Ok(attachments)
    }
}
