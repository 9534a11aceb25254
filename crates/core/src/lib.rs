//! # DPR Core
//!
//! Business logic for the dental patient record system: the patient
//! lifecycle, the treatment history with its derived agenda and
//! clinic-wide history projections, file attachments and the dashboard
//! folds. Everything here talks to storage exclusively through the
//! `dpr-store` traits and is deterministic given a store, a clock value and
//! an [`Actor`].

mod actor;
pub mod config;
pub mod dashboard;
mod error;
pub mod files;
pub mod history;
pub mod ident;
pub mod paths;
pub mod patient;
pub mod questionnaire;
pub mod validation;

pub use actor::Actor;
pub use config::ClinicConfig;
pub use error::{ClinicError, ClinicResult};
pub use files::FilesService;
pub use history::{HistoryDraft, HistoryService};
pub use ident::{format_record_code, RecordCodeAllocator};
pub use patient::{PatientDraft, PatientService, PurgeOutcome};
pub use questionnaire::MedicalQuestionnaire;
