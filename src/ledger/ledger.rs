//! Append-only audit ledger
//!
//! The ledger is the durable record of everything the engine observed and
//! did. `append` is the only mutating operation; records are chained with
//! SHA-256 links and `verify_integrity` reports every position where the
//! stored chain no longer matches its content.

use std::path::Path;
use std::sync::Mutex;

use crate::error::LedgerError;
use crate::events::{AuditEvent, EventType, Severity, Timestamp};

use super::chain::{self, IntegrityRecord, VerificationReport};
use super::store::LedgerStore;

/// Optional predicates for [`AuditLedger::query`]
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub organization_id: Option<String>,
    pub framework: Option<String>,
    pub event_type: Option<EventType>,
    pub severity: Option<Severity>,
    pub since: Option<Timestamp>,
}

impl QueryFilter {
    fn matches(&self, event: &AuditEvent) -> bool {
        if let Some(org) = &self.organization_id {
            if &event.organization_id != org {
                return false;
            }
        }
        if let Some(framework) = &self.framework {
            if &event.framework != framework {
                return false;
            }
        }
        if let Some(event_type) = self.event_type {
            if event.event_type != event_type {
                return false;
            }
        }
        if let Some(severity) = self.severity {
            if event.severity != severity {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.timestamp < since {
                return false;
            }
        }
        true
    }
}

/// Tamper-evident audit ledger over a JSONL file
///
/// All access goes through one mutex, so concurrent appends queue up and
/// apply strictly one at a time. That single writer is what keeps the hash
/// chain linear: each append reads the current `last_hash`, links the new
/// event to it and persists both halves as one line.
pub struct AuditLedger {
    store: Mutex<LedgerStore>,
}

impl AuditLedger {
    /// Open (or create) the ledger at `path`.
    ///
    /// Loads every intact record and resumes the chain from the most recent
    /// integrity record. Failure here is fatal to the caller: an engine
    /// without a ledger has nothing to append to.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        Ok(Self {
            store: Mutex::new(LedgerStore::open(path)?),
        })
    }

    /// Append one event and return its `event_id`.
    ///
    /// The event and its integrity record are persisted together; after a
    /// crash either both are present or neither is.
    pub fn append(&self, event: AuditEvent) -> Result<String, LedgerError> {
        let mut store = self.store.lock().unwrap();
        let previous = store.last_hash().to_string();
        let hash = chain::chain_hash(&previous, &event)?;
        let event_id = event.event_id.clone();
        let integrity = IntegrityRecord {
            event_id: event_id.clone(),
            hash_chain: hash,
            previous_hash: previous,
        };
        store.append(event, integrity)?;
        Ok(event_id)
    }

    /// Events matching `filter`, newest first, with pagination.
    pub fn query(&self, filter: &QueryFilter, limit: usize, offset: usize) -> Vec<AuditEvent> {
        let store = self.store.lock().unwrap();
        let mut events: Vec<AuditEvent> = store
            .records()
            .iter()
            .map(|r| &r.event)
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        events.into_iter().skip(offset).take(limit).collect()
    }

    /// Walk the whole chain and report every violation.
    ///
    /// Violations are data, not errors: a damaged history is reported while
    /// the ledger keeps accepting new events chained from the stored
    /// `last_hash`.
    pub fn verify_integrity(&self) -> Result<VerificationReport, LedgerError> {
        let store = self.store.lock().unwrap();
        chain::verify_records(store.records())
    }

    /// Number of records in the ledger
    pub fn len(&self) -> usize {
        self.store.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.lock().unwrap().is_empty()
    }

    /// `hash_chain` of the most recent record, or the genesis sentinel
    pub fn last_hash(&self) -> String {
        self.store.lock().unwrap().last_hash().to_string()
    }
}
