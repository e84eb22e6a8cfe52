//! Durable JSONL storage for the audit ledger
//!
//! Each line holds one event together with its integrity record, written in
//! a single flushed `writeln!`. A crash can only lose the line being written,
//! never half of a pair, and the torn tail is detected and dropped on the
//! next open.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::events::AuditEvent;

use super::chain::{IntegrityRecord, GENESIS_HASH};

/// One ledger line: an audit event plus its chain link
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerRecord {
    pub event: AuditEvent,
    pub integrity: IntegrityRecord,
}

/// Append-only file store keeping a full in-memory copy of the ledger
///
/// Not internally synchronized; [`super::AuditLedger`] serializes all access
/// behind one mutex so appends apply strictly one at a time.
pub struct LedgerStore {
    path: PathBuf,
    writer: BufWriter<File>,
    records: Vec<LedgerRecord>,
}

impl LedgerStore {
    /// Open or create the ledger file and load every intact record.
    ///
    /// A trailing chunk without a newline is an append that never completed:
    /// it is logged and truncated away so the next append starts on a clean
    /// line. Complete lines that fail to parse are logged and skipped; the
    /// damage they represent surfaces through integrity verification.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut records = Vec::new();
        let mut valid_len = 0u64;
        let mut torn = 0usize;
        if path.exists() {
            let content = String::from_utf8_lossy(&fs::read(&path)?).into_owned();
            let complete = content.rfind('\n').map(|i| i + 1).unwrap_or(0);
            valid_len = complete as u64;
            torn = content.len() - complete;
            if torn > 0 {
                warn!(
                    "Discarding {} bytes of torn trailing write in {}",
                    torn,
                    path.display()
                );
            }
            for (number, line) in content[..complete].lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<LedgerRecord>(line) {
                    Ok(record) => records.push(record),
                    Err(e) => warn!(
                        "Skipping unparseable ledger line {} in {}: {}",
                        number + 1,
                        path.display(),
                        e
                    ),
                }
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(true)
            .open(&path)?;
        if torn > 0 {
            file.set_len(valid_len)?;
        }

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            records,
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record: a single serialized line, flushed before returning.
    pub fn append(&mut self, event: AuditEvent, integrity: IntegrityRecord) -> Result<(), LedgerError> {
        let record = LedgerRecord { event, integrity };
        let json = serde_json::to_string(&record)?;
        writeln!(self.writer, "{json}")?;
        self.writer.flush()?;
        self.records.push(record);
        Ok(())
    }

    /// All records in append order
    pub fn records(&self) -> &[LedgerRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// `hash_chain` of the most recent record, or the genesis sentinel
    pub fn last_hash(&self) -> &str {
        self.records
            .last()
            .map(|r| r.integrity.hash_chain.as_str())
            .unwrap_or(GENESIS_HASH)
    }
}
