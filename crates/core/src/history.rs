//! Treatment history and the projections derived from it.
//!
//! A treatment entry is the single source of truth. Two clinic-wide
//! projections are derived from it on every save:
//!
//! - `agenda/{pid}_{eid}` exists exactly while the entry has a future
//!   `next_appointment_at`;
//! - `history_global/{pid}_{eid}` mirrors the entry unconditionally.
//!
//! The primary write commits first and is never rolled back. Projection
//! failures are collected and surfaced as
//! [`ClinicError::PartialProjection`] so a caller can re-run
//! [`HistoryService::rebuild_projections`] later; the composite keys make
//! every derivation idempotent.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;

use dpr_store::{
    from_document, new_document_id, to_document, Direction, FilterOp, QuerySpec, RecordStore,
    StoreError,
};
use dpr_types::{Amount, Instant, PaymentMethod};

use crate::config::ClinicConfig;
use crate::patient::Patient;
use crate::{paths, Actor, ClinicError, ClinicResult};

/// Caller-supplied fields for a history entry. Payment fields are raw user
/// strings; they are normalised on save and never rejected for bad syntax.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryDraft {
    pub title: String,
    pub appointment_at: Option<Instant>,
    pub next_appointment_at: Option<Instant>,
    pub tooth: String,
    pub notes: String,
    pub payment_amount: String,
    pub payment_deposit: String,
    pub payment_method: Option<PaymentMethod>,
}

/// A stored treatment entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryEntry {
    #[serde(skip_serializing, default)]
    pub id: String,
    pub patient_id: String,
    pub patient_name: String,
    pub patient_record_code: String,
    pub title: String,
    pub appointment_at: Instant,
    pub next_appointment_at: Option<Instant>,
    pub tooth: String,
    pub notes: String,
    pub payment_amount: Amount,
    pub payment_deposit: Amount,
    pub payment_method: Option<PaymentMethod>,
    pub deleted: bool,
    pub created_at: Instant,
    pub created_by: String,
    pub created_by_name: String,
    pub updated_at: Instant,
    pub updated_by: String,
    pub updated_by_name: String,
}

impl Default for HistoryEntry {
    fn default() -> Self {
        Self {
            id: String::new(),
            patient_id: String::new(),
            patient_name: String::new(),
            patient_record_code: String::new(),
            title: String::new(),
            appointment_at: Instant::epoch(),
            next_appointment_at: None,
            tooth: String::new(),
            notes: String::new(),
            payment_amount: Amount::Unset,
            payment_deposit: Amount::Unset,
            payment_method: None,
            deleted: false,
            created_at: Instant::epoch(),
            created_by: String::new(),
            created_by_name: String::new(),
            updated_at: Instant::epoch(),
            updated_by: String::new(),
            updated_by_name: String::new(),
        }
    }
}

/// One agenda projection row.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgendaEntry {
    #[serde(skip_serializing, default)]
    pub id: String,
    pub patient_id: String,
    pub patient_name: String,
    pub patient_record_code: String,
    pub title: String,
    pub next_appointment_at: Option<Instant>,
    pub deleted: bool,
    pub patient_deleted: bool,
}

/// One flattened clinic-wide history row.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryGlobalEntry {
    #[serde(skip_serializing, default)]
    pub id: String,
    pub patient_id: String,
    pub patient_name: String,
    pub patient_record_code: String,
    pub title: String,
    pub appointment_at: Option<Instant>,
    pub payment_amount: Amount,
    pub payment_method: Option<PaymentMethod>,
    pub deleted: bool,
}

/// Apply the deposit normalisation rules to raw payment input.
///
/// Rejects `Amount::Invalid` on either field. A deposit without an amount
/// becomes the amount; a deposit equal to the amount is treated as paid in
/// full and cleared; a deposit larger than the amount is a validation error.
pub fn resolve_payment(amount_raw: &str, deposit_raw: &str) -> ClinicResult<(Amount, Amount)> {
    let amount = Amount::parse(amount_raw);
    let deposit = Amount::parse(deposit_raw);

    if amount.is_invalid() {
        return Err(ClinicError::validation(
            "payment_amount",
            format!("{amount_raw:?} is not a non-negative number"),
        ));
    }
    if deposit.is_invalid() {
        return Err(ClinicError::validation(
            "payment_deposit",
            format!("{deposit_raw:?} is not a non-negative number"),
        ));
    }

    match (amount.get(), deposit.get()) {
        (None, Some(_)) => Ok((deposit, Amount::Unset)),
        (Some(a), Some(d)) if d > a => Err(ClinicError::validation(
            "payment_deposit",
            "deposit cannot exceed the amount",
        )),
        (Some(a), Some(d)) if d == a => Ok((amount, Amount::Unset)),
        _ => Ok((amount, deposit)),
    }
}

pub struct HistoryService {
    store: Arc<dyn RecordStore>,
    config: Arc<ClinicConfig>,
}

impl HistoryService {
    pub fn new(store: Arc<dyn RecordStore>, config: Arc<ClinicConfig>) -> Self {
        Self { store, config }
    }

    /// Load a patient record regardless of its `deleted` flag.
    async fn load_patient_record(&self, patient_id: &str) -> ClinicResult<Patient> {
        let path = paths::patient(self.config.clinic_id(), patient_id);
        let doc = match self.store.get_document(&path).await {
            Ok(doc) => doc,
            Err(err) if err.is_not_found() => {
                return Err(ClinicError::NotFound(format!("patient {patient_id}")));
            }
            Err(err) => return Err(err.into()),
        };
        let mut patient: Patient = from_document(&doc)?;
        patient.id = patient_id.to_string();
        Ok(patient)
    }

    /// Load a visible patient; a soft-deleted one reads as absent.
    async fn load_patient(&self, patient_id: &str) -> ClinicResult<Patient> {
        let patient = self.load_patient_record(patient_id).await?;
        if patient.deleted {
            return Err(ClinicError::NotFound(format!("patient {patient_id}")));
        }
        Ok(patient)
    }

    /// Create or update a treatment entry and re-derive its projections.
    ///
    /// The returned entry carries the assigned id. A `PartialProjection`
    /// error means the entry itself IS saved; only the named projections
    /// need reconciling.
    pub async fn upsert(
        &self,
        actor: &Actor,
        patient_id: &str,
        entry_id: Option<&str>,
        draft: HistoryDraft,
    ) -> ClinicResult<HistoryEntry> {
        actor.require_write("history upsert")?;

        let title = draft.title.trim().to_string();
        if title.is_empty() {
            return Err(ClinicError::validation("title", "cannot be empty"));
        }
        let appointment_at = draft
            .appointment_at
            .ok_or_else(|| ClinicError::validation("appointment_at", "required"))?;
        let (payment_amount, payment_deposit) =
            resolve_payment(&draft.payment_amount, &draft.payment_deposit)?;

        let patient = self.load_patient(patient_id).await?;

        let clinic = self.config.clinic_id();
        let entry_id = entry_id.map(str::to_string).unwrap_or_else(new_document_id);
        let entry_path = paths::treatment(clinic, patient_id, &entry_id);
        let existing: Option<HistoryEntry> = match self.store.get_document(&entry_path).await {
            Ok(doc) => Some(from_document(&doc)?),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err.into()),
        };

        let now = Instant::now();
        let mut entry = HistoryEntry {
            id: entry_id.clone(),
            patient_id: patient_id.to_string(),
            patient_name: patient.display_name(),
            patient_record_code: patient.record_code.clone(),
            title: title.clone(),
            appointment_at,
            next_appointment_at: draft.next_appointment_at,
            tooth: draft.tooth,
            notes: draft.notes,
            payment_amount,
            payment_deposit,
            payment_method: draft.payment_method,
            deleted: false,
            created_at: now,
            created_by: actor.uid.clone(),
            created_by_name: actor.display_name.clone(),
            updated_at: now,
            updated_by: actor.uid.clone(),
            updated_by_name: actor.display_name.clone(),
        };
        if let Some(previous) = existing {
            entry.created_at = previous.created_at;
            entry.created_by = previous.created_by;
            entry.created_by_name = previous.created_by_name;
        }

        // Primary write. Everything after this point is derivation.
        self.store.set_merge(&entry_path, to_document(&entry)?).await?;

        let mut failed = Vec::new();
        if let Err(err) = self.derive_agenda(&patient, &entry).await {
            tracing::warn!(entry = %entry_id, error = %err, "agenda derivation failed");
            failed.push("agenda".to_string());
        }
        if let Err(err) = self.derive_history_global(&patient, &entry).await {
            tracing::warn!(entry = %entry_id, error = %err, "history_global derivation failed");
            failed.push("history_global".to_string());
        }

        // Catalog growth is best-effort and never fails the save.
        let catalog = paths::treatment_catalog(clinic);
        if let Err(err) = self
            .store
            .array_union(&catalog, "items", vec![json!(title)])
            .await
        {
            tracing::warn!(error = %err, "treatment catalog update failed");
        }

        if failed.is_empty() {
            Ok(entry)
        } else {
            Err(ClinicError::PartialProjection {
                entry_id,
                failed,
            })
        }
    }

    async fn derive_agenda(&self, patient: &Patient, entry: &HistoryEntry) -> ClinicResult<()> {
        let clinic = self.config.clinic_id();
        let path = paths::agenda_entry(clinic, &entry.patient_id, &entry.id);

        let upcoming = entry
            .next_appointment_at
            .is_some_and(|next| next > Instant::now());
        if !upcoming || entry.deleted {
            return match self.store.delete_document(&path).await {
                Ok(()) => Ok(()),
                Err(err) if err.is_not_found() => Ok(()),
                Err(err) => Err(err.into()),
            };
        }

        let agenda = AgendaEntry {
            id: String::new(),
            patient_id: entry.patient_id.clone(),
            patient_name: patient.display_name(),
            patient_record_code: patient.record_code.clone(),
            title: entry.title.clone(),
            next_appointment_at: entry.next_appointment_at,
            deleted: false,
            patient_deleted: false,
        };
        self.store.set_merge(&path, to_document(&agenda)?).await?;
        Ok(())
    }

    async fn derive_history_global(
        &self,
        patient: &Patient,
        entry: &HistoryEntry,
    ) -> ClinicResult<()> {
        let clinic = self.config.clinic_id();
        let path = paths::history_global_entry(clinic, &entry.patient_id, &entry.id);
        let row = HistoryGlobalEntry {
            id: String::new(),
            patient_id: entry.patient_id.clone(),
            patient_name: patient.display_name(),
            patient_record_code: patient.record_code.clone(),
            title: entry.title.clone(),
            appointment_at: Some(entry.appointment_at),
            payment_amount: entry.payment_amount,
            payment_method: entry.payment_method,
            deleted: entry.deleted,
        };
        self.store.set_merge(&path, to_document(&row)?).await?;
        Ok(())
    }

    /// Soft-delete a treatment entry and retract its projections.
    ///
    /// The agenda retraction is best-effort: absence is success and a failed
    /// delete never fails the operation, it falls back to an in-place
    /// `deleted=true` flag so the row drops out of every agenda view. The
    /// history_global row is deleted with the same flag fallback, but a
    /// failure there is surfaced as [`ClinicError::PartialProjection`].
    pub async fn soft_delete(
        &self,
        actor: &Actor,
        patient_id: &str,
        entry_id: &str,
    ) -> ClinicResult<()> {
        actor.require_write("history delete")?;

        let clinic = self.config.clinic_id();
        let entry_path = paths::treatment(clinic, patient_id, entry_id);
        let now = Instant::now();
        let flags = to_document(&json!({
            "deleted": true,
            "updated_at": now,
            "updated_by": actor.uid,
            "updated_by_name": actor.display_name,
        }))?;
        match self.store.update_fields(&entry_path, flags).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {
                return Err(ClinicError::NotFound(format!(
                    "history entry {patient_id}/{entry_id}"
                )));
            }
            Err(err) => return Err(err.into()),
        }

        let mut failed = Vec::new();

        let agenda_path = paths::agenda_entry(clinic, patient_id, entry_id);
        match self.store.delete_document(&agenda_path).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(StoreError::PermissionDenied(_)) => {
                tracing::warn!(
                    entry = %entry_id,
                    "agenda delete rejected by access policy, flagging instead"
                );
                let flag = to_document(&json!({ "deleted": true }))?;
                if let Err(err) = self.store.set_merge(&agenda_path, flag).await {
                    tracing::warn!(entry = %entry_id, error = %err, "agenda flag failed");
                }
            }
            Err(err) => {
                tracing::warn!(entry = %entry_id, error = %err, "agenda retraction failed");
            }
        }

        let global_path = paths::history_global_entry(clinic, patient_id, entry_id);
        match self.store.delete_document(&global_path).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(StoreError::PermissionDenied(_)) => {
                tracing::warn!(
                    entry = %entry_id,
                    "history_global delete rejected by access policy, flagging instead"
                );
                let flag = to_document(&json!({ "deleted": true }))?;
                if let Err(err) = self.store.set_merge(&global_path, flag).await {
                    tracing::warn!(entry = %entry_id, error = %err, "history_global flag failed");
                    failed.push("history_global".to_string());
                }
            }
            Err(err) => {
                tracing::warn!(entry = %entry_id, error = %err, "history_global retraction failed");
                failed.push("history_global".to_string());
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(ClinicError::PartialProjection {
                entry_id: entry_id.to_string(),
                failed,
            })
        }
    }

    /// Non-deleted treatment entries for one patient, most recent first.
    pub async fn list(&self, patient_id: &str) -> ClinicResult<Vec<HistoryEntry>> {
        let clinic = self.config.clinic_id();
        let spec = QuerySpec::new()
            .filter("deleted", FilterOp::Eq, json!(false))
            .order_by("appointment_at", Direction::Desc);
        let rows = self
            .store
            .query(&paths::treatments(clinic, patient_id), &spec)
            .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for (id, doc) in rows {
            let mut entry: HistoryEntry = from_document(&doc)?;
            entry.id = id;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Reconcile both projections for one patient against the treatment
    /// source of truth: re-derive every live entry and purge projection rows
    /// whose source is deleted or missing. For a soft-deleted patient every
    /// projection row is stale, so nothing is replayed and all of them are
    /// purged. Returns how many source entries were replayed.
    pub async fn rebuild_projections(&self, patient_id: &str) -> ClinicResult<usize> {
        let patient = self.load_patient_record(patient_id).await?;
        let clinic = self.config.clinic_id();

        let rows = self
            .store
            .query(&paths::treatments(clinic, patient_id), &QuerySpec::new())
            .await?;

        let mut live = BTreeSet::new();
        let mut replayed = 0usize;
        if !patient.deleted {
            for (id, doc) in &rows {
                let mut entry: HistoryEntry = from_document(doc)?;
                entry.id = id.clone();
                if entry.deleted {
                    continue;
                }
                live.insert(paths::composite_key(patient_id, id));
                self.derive_agenda(&patient, &entry).await?;
                self.derive_history_global(&patient, &entry).await?;
                replayed += 1;
            }
        }

        for collection in [paths::agenda(clinic), paths::history_global(clinic)] {
            let spec = QuerySpec::new().filter("patient_id", FilterOp::Eq, json!(patient_id));
            for (key, _) in self.store.query(&collection, &spec).await? {
                if live.contains(&key) {
                    continue;
                }
                let path = format!("{collection}/{key}");
                match self.store.delete_document(&path).await {
                    Ok(()) => {}
                    Err(err) if err.is_not_found() => {}
                    Err(StoreError::PermissionDenied(_)) => {
                        tracing::warn!(row = %key, "stale projection delete rejected, flagging");
                        let flag = to_document(&json!({ "deleted": true }))?;
                        self.store.set_merge(&path, flag).await?;
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }

        Ok(replayed)
    }
}
