//! Hash chain primitives for the audit ledger
//!
//! Every appended event is linked to its predecessor through
//! `hash_chain = SHA-256(previous_hash || canonical_json(event))`, so changing
//! any stored event invalidates its recorded hash and `verify_records` can
//! point at the exact position of the edit.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::LedgerError;
use crate::events::AuditEvent;

use super::store::LedgerRecord;

/// Sentinel `previous_hash` for the first record of every ledger.
///
/// Versioned so a future change to the chaining format is detectable from
/// the first record alone.
pub const GENESIS_HASH: &str = "warden-genesis-v1";

/// Integrity link stored alongside each audit event
///
/// One record per event, ordered by append time, forming a singly-linked
/// chain back to [`GENESIS_HASH`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntegrityRecord {
    /// Event this record belongs to
    pub event_id: String,
    /// SHA-256 (hex) over `previous_hash || canonical_json(event)`
    pub hash_chain: String,
    /// `hash_chain` of the predecessor, or the genesis sentinel
    pub previous_hash: String,
}

/// Canonical byte serialization of an event
///
/// serde_json writes struct fields in declaration order and the metadata map
/// is sorted, so the same event always produces the same bytes regardless of
/// which process serializes it.
pub fn canonical_json(event: &AuditEvent) -> Result<Vec<u8>, LedgerError> {
    Ok(serde_json::to_vec(event)?)
}

/// Compute the chain hash for an event given its predecessor's hash
pub fn chain_hash(previous_hash: &str, event: &AuditEvent) -> Result<String, LedgerError> {
    let canonical = canonical_json(event)?;
    let mut hasher = Sha256::new();
    hasher.update(previous_hash.as_bytes());
    hasher.update(&canonical);
    Ok(hex::encode(hasher.finalize()))
}

/// Why a record failed verification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// The stored `previous_hash` does not match the predecessor's stored `hash_chain`
    BrokenLink,
    /// Recomputing the hash over the stored content does not reproduce the stored `hash_chain`
    HashMismatch,
}

/// A single verification failure, anchored to its position in the ledger
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IntegrityViolation {
    /// Zero-based position of the record in append order
    pub position: usize,
    /// Event the violation concerns
    pub event_id: String,
    pub kind: ViolationKind,
    /// Hash the chain required at this point
    pub expected: String,
    /// Hash actually found in the record
    pub actual: String,
}

/// Outcome of walking the full chain
#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    /// Number of records checked
    pub total: usize,
    /// Number of records that passed both checks
    pub verified: usize,
    /// All failures, in ledger order
    pub violations: Vec<IntegrityViolation>,
}

impl VerificationReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty() && self.verified == self.total
    }
}

/// Walk records in append order and collect every integrity violation.
///
/// Two checks per record: the stored `previous_hash` must equal the
/// predecessor's stored `hash_chain` (genesis for the first record), and
/// recomputing the hash over the stored content must reproduce the stored
/// `hash_chain`. Verification continues past violations, so one tampered
/// record cannot hide later ones. The running expectation follows the
/// STORED hashes, which keeps a payload edit localized to exactly one
/// reported position.
pub fn verify_records(records: &[LedgerRecord]) -> Result<VerificationReport, LedgerError> {
    let mut report = VerificationReport {
        total: records.len(),
        verified: 0,
        violations: Vec::new(),
    };

    let mut expected_previous = GENESIS_HASH.to_string();
    for (position, record) in records.iter().enumerate() {
        let mut intact = true;

        if record.integrity.previous_hash != expected_previous {
            report.violations.push(IntegrityViolation {
                position,
                event_id: record.event.event_id.clone(),
                kind: ViolationKind::BrokenLink,
                expected: expected_previous.clone(),
                actual: record.integrity.previous_hash.clone(),
            });
            intact = false;
        }

        let recomputed = chain_hash(&record.integrity.previous_hash, &record.event)?;
        if recomputed != record.integrity.hash_chain {
            report.violations.push(IntegrityViolation {
                position,
                event_id: record.event.event_id.clone(),
                kind: ViolationKind::HashMismatch,
                expected: recomputed,
                actual: record.integrity.hash_chain.clone(),
            });
            intact = false;
        }

        if intact {
            report.verified += 1;
        }
        expected_previous = record.integrity.hash_chain.clone();
    }

    Ok(report)
}
