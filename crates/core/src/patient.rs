//! Patient record lifecycle.
//!
//! Patients are soft-deleted, never physically removed: a delete flags the
//! record and then purges the clinic agenda of every appointment derived
//! from that patient's history. The purge is two-tier because the hosted
//! store's access policy may forbid physical deletes for the calling role;
//! in that case the entry is flagged instead and the fallback is logged.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use dpr_store::{
    from_document, new_document_id, to_document, FilterOp, QuerySpec, RecordStore,
};
use dpr_types::{Gender, Instant};

use crate::config::ClinicConfig;
use crate::ident::RecordCodeAllocator;
use crate::questionnaire::MedicalQuestionnaire;
use crate::validation::{check_national_id, check_non_empty, normalize_national_id};
use crate::{paths, Actor, ClinicError, ClinicResult};

/// Fields a caller supplies when creating or updating a patient.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PatientDraft {
    /// Only honoured on create, and only for imported legacy records; a
    /// normal registration leaves this unset and gets an allocated code.
    pub record_code: Option<String>,
    pub national_id: String,
    pub first_names: String,
    pub last_names: String,
    pub gender: Gender,
    pub birth_date: Option<Instant>,
    pub mobile_phone: String,
    pub home_phone: String,
    pub email: String,
    pub province: String,
    pub canton: String,
    pub district: String,
    pub address: String,
    pub notes: String,
    pub questionnaire: MedicalQuestionnaire,
}

/// A stored patient record.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Patient {
    #[serde(skip_serializing, default)]
    pub id: String,
    pub record_code: String,
    pub national_id: String,
    pub first_names: String,
    pub last_names: String,
    pub gender: Gender,
    pub birth_date: Option<Instant>,
    pub mobile_phone: String,
    pub home_phone: String,
    pub email: String,
    pub province: String,
    pub canton: String,
    pub district: String,
    pub address: String,
    pub notes: String,
    pub questionnaire: MedicalQuestionnaire,
    pub deleted: bool,
    pub created_at: Instant,
    pub created_by: String,
    pub created_by_name: String,
    pub updated_at: Instant,
    pub updated_by: String,
    pub updated_by_name: String,
    pub deleted_at: Option<Instant>,
    pub deleted_by: Option<String>,
    pub deleted_by_name: Option<String>,
}

impl Default for Patient {
    fn default() -> Self {
        Self {
            id: String::new(),
            record_code: String::new(),
            national_id: String::new(),
            first_names: String::new(),
            last_names: String::new(),
            gender: Gender::default(),
            birth_date: None,
            mobile_phone: String::new(),
            home_phone: String::new(),
            email: String::new(),
            province: String::new(),
            canton: String::new(),
            district: String::new(),
            address: String::new(),
            notes: String::new(),
            questionnaire: MedicalQuestionnaire::default(),
            deleted: false,
            created_at: Instant::epoch(),
            created_by: String::new(),
            created_by_name: String::new(),
            updated_at: Instant::epoch(),
            updated_by: String::new(),
            updated_by_name: String::new(),
            deleted_at: None,
            deleted_by: None,
            deleted_by_name: None,
        }
    }
}

impl Patient {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_names.trim(), self.last_names.trim())
            .trim()
            .to_string()
    }
}

/// Outcome of an agenda purge: how many entries went away physically and how
/// many had to be soft-flagged instead.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PurgeOutcome {
    pub removed: usize,
    pub flagged: usize,
}

pub struct PatientService {
    store: Arc<dyn RecordStore>,
    config: Arc<ClinicConfig>,
    allocator: RecordCodeAllocator,
}

impl PatientService {
    pub fn new(store: Arc<dyn RecordStore>, config: Arc<ClinicConfig>) -> Self {
        let allocator = RecordCodeAllocator::new(store.clone(), config.clone());
        Self {
            store,
            config,
            allocator,
        }
    }

    fn validate(draft: &PatientDraft) -> ClinicResult<String> {
        check_non_empty("first_names", &draft.first_names)?;
        check_non_empty("last_names", &draft.last_names)?;
        let national_id = normalize_national_id(&draft.national_id);
        check_national_id(&national_id)?;
        draft.questionnaire.validate()?;
        Ok(national_id)
    }

    /// Register a new patient. Nothing is written when validation fails;
    /// the record code is allocated only after the draft is known good.
    pub async fn create(&self, actor: &Actor, draft: PatientDraft) -> ClinicResult<Patient> {
        actor.require_write("patient create")?;
        let national_id = Self::validate(&draft)?;

        let record_code = match draft.record_code.as_deref().map(str::trim) {
            Some(code) if !code.is_empty() => code.to_string(),
            _ => self.allocator.allocate().await?,
        };

        let now = Instant::now();
        let patient = Patient {
            id: new_document_id(),
            record_code,
            national_id,
            first_names: draft.first_names.trim().to_string(),
            last_names: draft.last_names.trim().to_string(),
            gender: draft.gender,
            birth_date: draft.birth_date,
            mobile_phone: draft.mobile_phone,
            home_phone: draft.home_phone,
            email: draft.email,
            province: draft.province,
            canton: draft.canton,
            district: draft.district,
            address: draft.address,
            notes: draft.notes,
            questionnaire: draft.questionnaire,
            deleted: false,
            created_at: now,
            created_by: actor.uid.clone(),
            created_by_name: actor.display_name.clone(),
            updated_at: now,
            updated_by: actor.uid.clone(),
            updated_by_name: actor.display_name.clone(),
            deleted_at: None,
            deleted_by: None,
            deleted_by_name: None,
        };

        let path = paths::patient(self.config.clinic_id(), &patient.id);
        self.store.set_merge(&path, to_document(&patient)?).await?;
        Ok(patient)
    }

    /// Update an existing patient. The stored record code always wins over
    /// whatever the draft carries.
    pub async fn update(
        &self,
        actor: &Actor,
        patient_id: &str,
        draft: PatientDraft,
    ) -> ClinicResult<Patient> {
        actor.require_write("patient update")?;
        let national_id = Self::validate(&draft)?;

        let existing = self.get(patient_id).await?;
        if existing.deleted {
            return Err(ClinicError::NotFound(format!("patient {patient_id}")));
        }
        let now = Instant::now();
        let patient = Patient {
            id: existing.id,
            record_code: existing.record_code,
            national_id,
            first_names: draft.first_names.trim().to_string(),
            last_names: draft.last_names.trim().to_string(),
            gender: draft.gender,
            birth_date: draft.birth_date,
            mobile_phone: draft.mobile_phone,
            home_phone: draft.home_phone,
            email: draft.email,
            province: draft.province,
            canton: draft.canton,
            district: draft.district,
            address: draft.address,
            notes: draft.notes,
            questionnaire: draft.questionnaire,
            deleted: existing.deleted,
            created_at: existing.created_at,
            created_by: existing.created_by,
            created_by_name: existing.created_by_name,
            updated_at: now,
            updated_by: actor.uid.clone(),
            updated_by_name: actor.display_name.clone(),
            deleted_at: existing.deleted_at,
            deleted_by: existing.deleted_by,
            deleted_by_name: existing.deleted_by_name,
        };

        let path = paths::patient(self.config.clinic_id(), patient_id);
        self.store.set_merge(&path, to_document(&patient)?).await?;
        Ok(patient)
    }

    pub async fn get(&self, patient_id: &str) -> ClinicResult<Patient> {
        let path = paths::patient(self.config.clinic_id(), patient_id);
        let doc = self.store.get_document(&path).await?;
        let mut patient: Patient = from_document(&doc)?;
        patient.id = patient_id.to_string();
        Ok(patient)
    }

    /// Active patients, ordered by last name. Soft-deleted records are
    /// invisible here but remain readable through [`Self::get`].
    pub async fn list(&self) -> ClinicResult<Vec<Patient>> {
        let spec = QuerySpec::new()
            .filter("deleted", FilterOp::Eq, json!(false))
            .order_by("last_names", dpr_store::Direction::Asc);
        let rows = self
            .store
            .query(&paths::patients(self.config.clinic_id()), &spec)
            .await?;

        let mut patients = Vec::with_capacity(rows.len());
        for (id, doc) in rows {
            let mut patient: Patient = from_document(&doc)?;
            patient.id = id;
            patients.push(patient);
        }
        Ok(patients)
    }

    /// Soft-delete a patient, then purge their appointments from the agenda.
    /// The patient flag commits first; a failing purge leaves the record
    /// deleted and the agenda partially cleaned, which the purge can finish
    /// on a later retry.
    pub async fn soft_delete(&self, actor: &Actor, patient_id: &str) -> ClinicResult<PurgeOutcome> {
        actor.require_write("patient delete")?;

        let path = paths::patient(self.config.clinic_id(), patient_id);
        let now = Instant::now();
        let flags = to_document(&json!({
            "deleted": true,
            "deleted_at": now,
            "deleted_by": actor.uid,
            "deleted_by_name": actor.display_name,
            "updated_at": now,
            "updated_by": actor.uid,
            "updated_by_name": actor.display_name,
        }))?;
        match self.store.update_fields(&path, flags).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {
                return Err(ClinicError::NotFound(format!("patient {patient_id}")));
            }
            Err(err) => return Err(err.into()),
        }

        self.purge_agenda_for_patient(patient_id).await
    }

    /// Remove every agenda entry belonging to `patient_id`, page by page.
    ///
    /// Entries the access policy refuses to delete are soft-flagged with
    /// `deleted` and `patient_deleted` so every agenda consumer can filter
    /// them out; the dashboard treats both tiers the same.
    pub async fn purge_agenda_for_patient(&self, patient_id: &str) -> ClinicResult<PurgeOutcome> {
        let collection = paths::agenda(self.config.clinic_id());
        let page_size = self.config.agenda_page_size();
        let mut outcome = PurgeOutcome::default();

        // Already-flagged rows carry `deleted=true`, so filtering on it keeps
        // them out of every page and each pass strictly shrinks the result
        // set: delete removes the row, the fallback flags it out of the query.
        loop {
            let spec = QuerySpec::new()
                .filter("patient_id", FilterOp::Eq, json!(patient_id))
                .filter("deleted", FilterOp::Eq, json!(false))
                .limit(page_size);
            let page = self.store.query(&collection, &spec).await?;
            if page.is_empty() {
                break;
            }

            for (entry_id, _) in page {
                let path = format!("{collection}/{entry_id}");
                match self.store.delete_document(&path).await {
                    Ok(()) => outcome.removed += 1,
                    Err(err) if err.is_not_found() => {}
                    Err(dpr_store::StoreError::PermissionDenied(_)) => {
                        tracing::warn!(
                            entry = %entry_id,
                            patient = %patient_id,
                            "agenda delete rejected by access policy, soft-flagging instead"
                        );
                        let flags = to_document(&json!({
                            "deleted": true,
                            "patient_deleted": true,
                        }))?;
                        self.store.set_merge(&path, flags).await?;
                        outcome.flagged += 1;
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dpr_store::MemoryStore;

    fn service(store: Arc<MemoryStore>) -> PatientService {
        PatientService::new(store, Arc::new(ClinicConfig::default()))
    }

    fn draft(national_id: &str) -> PatientDraft {
        PatientDraft {
            national_id: national_id.to_string(),
            first_names: "Ana María".to_string(),
            last_names: "Rojas".to_string(),
            ..Default::default()
        }
    }

    fn dra_ramirez() -> Actor {
        Actor::clinician("u-draR", "Dra. Ramírez")
    }

    #[tokio::test]
    async fn create_allocates_sequential_record_codes() {
        let store = Arc::new(MemoryStore::new());
        let svc = service(store);
        let actor = dra_ramirez();

        let first = svc.create(&actor, draft("104560789")).await.unwrap();
        let second = svc.create(&actor, draft("2-0333-0444")).await.unwrap();

        assert_eq!(first.record_code, "CDO-000001");
        assert_eq!(second.record_code, "CDO-000002");
        assert_eq!(first.national_id, "1-0456-0789");
        assert!(!first.deleted);
    }

    #[tokio::test]
    async fn invalid_draft_writes_nothing_and_burns_no_code() {
        let store = Arc::new(MemoryStore::new());
        let svc = service(store.clone());
        let actor = dra_ramirez();

        let mut bad = draft("104560789");
        bad.first_names = "  ".to_string();
        assert!(matches!(
            svc.create(&actor, bad).await.unwrap_err(),
            ClinicError::Validation { .. }
        ));
        assert!(store.is_empty().await, "no patient and no counter document");

        let ok = svc.create(&actor, draft("104560789")).await.unwrap();
        assert_eq!(ok.record_code, "CDO-000001");
    }

    #[tokio::test]
    async fn update_preserves_the_record_code() {
        let store = Arc::new(MemoryStore::new());
        let svc = service(store);
        let actor = dra_ramirez();

        let created = svc.create(&actor, draft("104560789")).await.unwrap();

        let mut change = draft("104560789");
        change.record_code = Some("CDO-999999".to_string());
        change.last_names = "Rojas Mora".to_string();
        let updated = svc.update(&actor, &created.id, change).await.unwrap();

        assert_eq!(updated.record_code, created.record_code);
        assert_eq!(updated.last_names, "Rojas Mora");
        assert_eq!(updated.created_at, created.created_at);
    }

    #[tokio::test]
    async fn read_only_actors_cannot_mutate() {
        let store = Arc::new(MemoryStore::new());
        let svc = service(store);
        let viewer = Actor::read_only("u-view", "Recepción");

        assert!(matches!(
            svc.create(&viewer, draft("104560789")).await.unwrap_err(),
            ClinicError::PermissionDenied(_)
        ));
    }

    #[tokio::test]
    async fn soft_delete_flags_and_purges_the_agenda() {
        let store = Arc::new(MemoryStore::new());
        let svc = service(store.clone());
        let actor = dra_ramirez();

        let patient = svc.create(&actor, draft("104560789")).await.unwrap();
        for entry in ["e1", "e2"] {
            store
                .set_merge(
                    &paths::agenda_entry("clinica-principal", &patient.id, entry),
                    to_document(&json!({
                        "patient_id": patient.id,
                        "title": "control",
                        "next_appointment_at": "2026-09-15T10:00:00.000Z",
                        "deleted": false,
                    }))
                    .unwrap(),
                )
                .await
                .unwrap();
        }
        // Another patient's appointment must survive the purge.
        store
            .set_merge(
                &paths::agenda_entry("clinica-principal", "other", "e9"),
                to_document(&json!({ "patient_id": "other", "title": "limpieza", "deleted": false }))
                    .unwrap(),
            )
            .await
            .unwrap();

        let outcome = svc.soft_delete(&actor, &patient.id).await.unwrap();
        assert_eq!(outcome, PurgeOutcome { removed: 2, flagged: 0 });

        assert!(svc.get(&patient.id).await.unwrap().deleted);
        assert!(svc.list().await.unwrap().is_empty());
        let err = svc
            .update(&actor, &patient.id, draft("104560789"))
            .await
            .unwrap_err();
        assert!(err.is_not_found(), "hidden patients are not editable");
        let remaining = store
            .query(&paths::agenda("clinica-principal"), &QuerySpec::new())
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].0, "other_e9");
    }

    #[tokio::test]
    async fn purge_falls_back_to_soft_flags_when_deletes_are_denied() {
        let store = Arc::new(MemoryStore::new());
        let svc = service(store.clone());
        let actor = dra_ramirez();

        let patient = svc.create(&actor, draft("104560789")).await.unwrap();
        store
            .set_merge(
                &paths::agenda_entry("clinica-principal", &patient.id, "e1"),
                to_document(&json!({ "patient_id": patient.id, "title": "control", "deleted": false }))
                    .unwrap(),
            )
            .await
            .unwrap();

        store.set_deny_physical_deletes(true).await;
        let outcome = svc.purge_agenda_for_patient(&patient.id).await.unwrap();
        assert_eq!(outcome, PurgeOutcome { removed: 0, flagged: 1 });

        let flagged = store
            .get_document(&paths::agenda_entry("clinica-principal", &patient.id, "e1"))
            .await
            .unwrap();
        assert_eq!(flagged["deleted"], json!(true));
        assert_eq!(flagged["patient_deleted"], json!(true));
        assert_eq!(flagged["title"], json!("control"), "payload survives the flag");

        // Purge again: already-flagged entries are not reprocessed.
        let outcome = svc.purge_agenda_for_patient(&patient.id).await.unwrap();
        assert_eq!(outcome, PurgeOutcome::default());
    }

    #[tokio::test]
    async fn purge_flags_every_entry_across_pages_when_deletes_are_denied() {
        let store = Arc::new(MemoryStore::new());
        let config = ClinicConfig::new("clinica-principal", "CDO", 6, 1).unwrap();
        let svc = PatientService::new(store.clone(), Arc::new(config));
        let actor = dra_ramirez();

        let patient = svc.create(&actor, draft("104560789")).await.unwrap();
        for entry in ["e1", "e2", "e3"] {
            store
                .set_merge(
                    &paths::agenda_entry("clinica-principal", &patient.id, entry),
                    to_document(
                        &json!({ "patient_id": patient.id, "title": "control", "deleted": false }),
                    )
                    .unwrap(),
                )
                .await
                .unwrap();
        }

        store.set_deny_physical_deletes(true).await;
        let outcome = svc.purge_agenda_for_patient(&patient.id).await.unwrap();
        assert_eq!(outcome, PurgeOutcome { removed: 0, flagged: 3 });

        let rows = store
            .query(&paths::agenda("clinica-principal"), &QuerySpec::new())
            .await
            .unwrap();
        for (key, doc) in rows {
            assert_eq!(doc["deleted"], json!(true), "{key} still visible");
            assert_eq!(doc["patient_deleted"], json!(true));
        }
    }

    #[tokio::test]
    async fn deleting_a_missing_patient_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let svc = service(store);
        let err = svc
            .soft_delete(&dra_ramirez(), "nope")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
