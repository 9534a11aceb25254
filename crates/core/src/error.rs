use dpr_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ClinicError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },
    #[error("not permitted: {0}")]
    PermissionDenied(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("record number allocation kept conflicting with concurrent registrations")]
    AllocationConflict,
    #[error(
        "history entry {entry_id} saved, but derived projections failed: {}",
        .failed.join(", ")
    )]
    PartialProjection {
        entry_id: String,
        failed: Vec<String>,
    },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub type ClinicResult<T> = std::result::Result<T, ClinicError>;

impl ClinicError {
    pub(crate) fn validation(field: &str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// True when the operation failed only because its target no longer
    /// exists. Cascades treat this as success.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Store(err) => err.is_not_found(),
            _ => false,
        }
    }
}
