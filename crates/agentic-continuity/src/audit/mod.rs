//! Append-only, hash-chained audit log.
//!
//! Every mutating operation in the other components appends here inside
//! its critical section; if the append fails, the mutation fails with it.

pub mod log;
pub mod types;

pub use self::log::{AuditIter, AuditLog};
pub use types::{
    event_types, ArchiveReport, AuditEntry, AuditOutcome, AuditRecord, ChainBreak,
    ChainVerification, EventId,
};
