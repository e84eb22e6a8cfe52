/// Hash chain primitives, storage, and the ledger facade
pub mod chain;
pub mod ledger;
pub mod store;

pub use chain::{
    IntegrityRecord, IntegrityViolation, VerificationReport, ViolationKind, GENESIS_HASH,
};
pub use ledger::{AuditLedger, QueryFilter};
pub use store::LedgerRecord;
