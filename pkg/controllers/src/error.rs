use pkg_state::StoreError;
use thiserror::Error;

use crate::identity::IdentityError;

/// Why a reconciliation pass did not complete.
///
/// A failed pass is re-scheduled by its controller; nothing here is retried
/// in place.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// Some of the independent steps of a pass failed; `failed` names the
    /// namespaces or children involved.
    #[error("{} of {total} steps failed for {object}: {}", failed.len(), failed.join(", "))]
    Incomplete {
        object: String,
        failed: Vec<String>,
        total: usize,
    },
}

impl ReconcileError {
    /// The pass raced a concurrent write and should simply be re-run.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ReconcileError::Store(e) if e.is_conflict())
    }

    /// The object the pass was writing to no longer exists.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ReconcileError::Store(e) if e.is_not_found())
    }
}
