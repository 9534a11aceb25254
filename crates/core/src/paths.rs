//! Document path construction.
//!
//! All collections hang off one clinic document, so every builder takes the
//! clinic id first. Composite keys for the derived projections are
//! `{patient_id}_{entry_id}`, which makes them deterministic: re-deriving a
//! projection overwrites the previous derivation instead of duplicating it.

/// Collection of patient documents.
pub fn patients(clinic_id: &str) -> String {
    format!("clinics/{clinic_id}/patients")
}

pub fn patient(clinic_id: &str, patient_id: &str) -> String {
    format!("clinics/{clinic_id}/patients/{patient_id}")
}

/// Per-patient treatment history collection.
pub fn treatments(clinic_id: &str, patient_id: &str) -> String {
    format!("clinics/{clinic_id}/patients/{patient_id}/treatments")
}

pub fn treatment(clinic_id: &str, patient_id: &str, entry_id: &str) -> String {
    format!("clinics/{clinic_id}/patients/{patient_id}/treatments/{entry_id}")
}

/// Per-patient file attachment collection.
pub fn files(clinic_id: &str, patient_id: &str) -> String {
    format!("clinics/{clinic_id}/patients/{patient_id}/files")
}

pub fn file(clinic_id: &str, patient_id: &str, file_id: &str) -> String {
    format!("clinics/{clinic_id}/patients/{patient_id}/files/{file_id}")
}

/// Clinic-wide agenda projection (upcoming appointments).
pub fn agenda(clinic_id: &str) -> String {
    format!("clinics/{clinic_id}/agenda")
}

pub fn agenda_entry(clinic_id: &str, patient_id: &str, entry_id: &str) -> String {
    format!(
        "clinics/{clinic_id}/agenda/{}",
        composite_key(patient_id, entry_id)
    )
}

/// Clinic-wide flattened history projection.
pub fn history_global(clinic_id: &str) -> String {
    format!("clinics/{clinic_id}/history_global")
}

pub fn history_global_entry(clinic_id: &str, patient_id: &str, entry_id: &str) -> String {
    format!(
        "clinics/{clinic_id}/history_global/{}",
        composite_key(patient_id, entry_id)
    )
}

/// The single patient record-number counter document.
pub fn patient_counter(clinic_id: &str) -> String {
    format!("clinics/{clinic_id}/counters/patients")
}

/// The shared treatment title catalog document.
pub fn treatment_catalog(clinic_id: &str) -> String {
    format!("clinics/{clinic_id}/meta/treatment_catalog")
}

/// Key shared by a treatment entry and the projections derived from it.
pub fn composite_key(patient_id: &str, entry_id: &str) -> String {
    format!("{patient_id}_{entry_id}")
}

/// Recover `(patient_id, entry_id)` from a projection document id.
/// Patient ids never contain underscores; entry ids may.
pub fn split_composite_key(key: &str) -> Option<(&str, &str)> {
    key.split_once('_')
}

/// Blob path for an uploaded attachment. Lives in the blob namespace, which
/// is separate from the document namespace even though it mirrors its shape.
pub fn blob(clinic_id: &str, patient_id: &str, file_id: &str, safe_name: &str) -> String {
    format!("clinics/{clinic_id}/patients/{patient_id}/files/{file_id}-{safe_name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projection_keys_are_deterministic() {
        assert_eq!(
            agenda_entry("c1", "p9", "e3"),
            "clinics/c1/agenda/p9_e3"
        );
        assert_eq!(
            history_global_entry("c1", "p9", "e3"),
            "clinics/c1/history_global/p9_e3"
        );
        assert_eq!(split_composite_key("p9_e3"), Some(("p9", "e3")));
        assert_eq!(split_composite_key("p9_e3_extra"), Some(("p9", "e3_extra")));
    }
}
