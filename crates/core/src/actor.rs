//! Who is performing an operation.
//!
//! Every mutating service call takes an [`Actor`] so audit stamps and write
//! gating have one source of truth. Reads are open to any authenticated
//! actor; only writes check the flag.

use crate::{ClinicError, ClinicResult};

/// An authenticated user of the clinic system.
#[derive(Clone, Debug)]
pub struct Actor {
    pub uid: String,
    pub display_name: String,
    pub can_write: bool,
}

impl Actor {
    pub fn clinician(uid: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            display_name: display_name.into(),
            can_write: true,
        }
    }

    pub fn read_only(uid: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            display_name: display_name.into(),
            can_write: false,
        }
    }

    pub(crate) fn require_write(&self, operation: &str) -> ClinicResult<()> {
        if self.can_write {
            Ok(())
        } else {
            Err(ClinicError::PermissionDenied(format!(
                "{} requires write access (actor {})",
                operation, self.uid
            )))
        }
    }
}
