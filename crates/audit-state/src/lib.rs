//! Canonical in-memory collection of audit records and the active-record pointer.

mod restore;
mod store;
mod validate;

pub use restore::{RestoreOutcome, RestoreReport};
pub use store::{AuditStateStore, StateChange};
pub use validate::{validate_record, ValidationIssue};
