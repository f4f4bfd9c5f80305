// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Write-ahead log for durable storage.
//!
//! One JSON line per committed transaction. Each line carries the batch of
//! operations as an embedded JSON string plus a CRC32 of that string, so a
//! torn or corrupted tail is detected on replay.

use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;
use tw_core::Operation;

/// Errors that can occur in WAL operations
#[derive(Debug, Error)]
pub enum WalError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Write-ahead log for durable operation storage
pub struct Wal {
    file: File,
    path: PathBuf,
    sequence: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct WalEntry {
    seq: u64,
    crc: u32,
    ops: String,
}

/// Result of scanning a log file
struct Scan {
    batches: Vec<Vec<Operation>>,
    sequence: u64,
    /// Byte length of the intact prefix
    valid_len: u64,
    file_len: u64,
}

impl Wal {
    /// Open or create a WAL, truncating any corrupt tail
    pub fn open(path: &Path) -> Result<Self, WalError> {
        let scan = scan(path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)?;
        if scan.valid_len < scan.file_len {
            warn!(
                path = %path.display(),
                dropped_bytes = scan.file_len - scan.valid_len,
                "truncating corrupt WAL tail"
            );
            file.set_len(scan.valid_len)?;
            file.sync_all()?;
        }
        Ok(Self {
            file,
            path: path.to_path_buf(),
            sequence: scan.sequence,
        })
    }

    /// Append one transaction's operations as a single entry
    pub fn append(&mut self, ops: &[Operation]) -> Result<u64, WalError> {
        let line = encode_entry(self.sequence + 1, ops)?;
        self.file.write_all(line.as_bytes())?;
        self.file.sync_data()?;
        self.sequence += 1;
        Ok(self.sequence)
    }

    /// Get the current sequence number
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replay all intact operations from the log, in commit order
    pub fn replay(path: &Path) -> Result<Vec<Operation>, WalError> {
        Ok(scan(path)?.batches.into_iter().flatten().collect())
    }

    /// Atomically replace the log with a single entry holding `ops`
    pub fn rewrite(path: &Path, ops: &[Operation]) -> Result<Self, WalError> {
        let tmp = path.with_extension("wal.tmp");
        {
            let mut file = File::create(&tmp)?;
            if !ops.is_empty() {
                file.write_all(encode_entry(1, ops)?.as_bytes())?;
            }
            file.sync_all()?;
        }
        std::fs::rename(&tmp, path)?;
        Self::open(path)
    }
}

fn encode_entry(seq: u64, ops: &[Operation]) -> Result<String, WalError> {
    let ops = serde_json::to_string(ops)?;
    let entry = WalEntry {
        seq,
        crc: crc32fast::hash(ops.as_bytes()),
        ops,
    };
    let mut line = serde_json::to_string(&entry)?;
    line.push('\n');
    Ok(line)
}

fn scan(path: &Path) -> Result<Scan, WalError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Ok(Scan {
                batches: Vec::new(),
                sequence: 0,
                valid_len: 0,
                file_len: 0,
            })
        }
        Err(e) => return Err(e.into()),
    };
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let mut scan = Scan {
        batches: Vec::new(),
        sequence: 0,
        valid_len: 0,
        file_len,
    };

    let mut line = String::new();
    loop {
        line.clear();
        let read = match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                warn!(path = %path.display(), "WAL contains invalid UTF-8, stopping replay");
                break;
            }
            Err(e) => return Err(e.into()),
        };
        if !line.ends_with('\n') {
            warn!(path = %path.display(), "WAL ends with a partial entry, stopping replay");
            break;
        }
        let trimmed = line.trim_end();
        if !trimmed.is_empty() {
            match decode_entry(trimmed) {
                Some((seq, ops)) => {
                    scan.sequence = seq;
                    scan.batches.push(ops);
                }
                None => {
                    warn!(
                        path = %path.display(),
                        offset = scan.valid_len,
                        "WAL entry failed verification, stopping replay"
                    );
                    break;
                }
            }
        }
        scan.valid_len += read as u64;
    }
    Ok(scan)
}

fn decode_entry(line: &str) -> Option<(u64, Vec<Operation>)> {
    let entry: WalEntry = serde_json::from_str(line).ok()?;
    if crc32fast::hash(entry.ops.as_bytes()) != entry.crc {
        return None;
    }
    let ops = serde_json::from_str(&entry.ops).ok()?;
    Some((entry.seq, ops))
}

#[cfg(test)]
#[path = "wal_tests.rs"]
mod tests;
