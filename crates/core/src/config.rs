//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and passed into core
//! services as an `Arc<ClinicConfig>`. Services never read environment
//! variables during request handling.

use dpr_types::NonEmptyText;

use crate::{ClinicError, ClinicResult};

/// Per-clinic configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct ClinicConfig {
    clinic_id: NonEmptyText,
    record_code_prefix: NonEmptyText,
    record_code_width: usize,
    agenda_page_size: usize,
}

impl Default for ClinicConfig {
    fn default() -> Self {
        Self::new("clinica-principal", "CDO", 6, 400).expect("default configuration is valid")
    }
}

impl ClinicConfig {
    pub fn new(
        clinic_id: &str,
        record_code_prefix: &str,
        record_code_width: usize,
        agenda_page_size: usize,
    ) -> ClinicResult<Self> {
        let clinic_id = NonEmptyText::new(clinic_id)
            .map_err(|e| ClinicError::validation("clinic_id", e.to_string()))?;
        let record_code_prefix = NonEmptyText::new(record_code_prefix)
            .map_err(|e| ClinicError::validation("record_code_prefix", e.to_string()))?;
        if record_code_width == 0 {
            return Err(ClinicError::validation(
                "record_code_width",
                "must be at least 1",
            ));
        }
        if agenda_page_size == 0 {
            return Err(ClinicError::validation(
                "agenda_page_size",
                "must be at least 1",
            ));
        }

        Ok(Self {
            clinic_id,
            record_code_prefix,
            record_code_width,
            agenda_page_size,
        })
    }

    pub fn clinic_id(&self) -> &str {
        self.clinic_id.as_str()
    }

    pub fn record_code_prefix(&self) -> &str {
        self.record_code_prefix.as_str()
    }

    pub fn record_code_width(&self) -> usize {
        self.record_code_width
    }

    /// Page size used by the agenda purge cascade.
    pub fn agenda_page_size(&self) -> usize {
        self.agenda_page_size
    }
}
