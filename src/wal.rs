//! Write-ahead log
//!
//! Newline-delimited text log of mutating operations. Each record is one
//! line, `OP|PAYLOAD\n`, written and fsynced before the in-memory mutation is
//! considered committed. On open, an existing log is replayed through a
//! caller-supplied callback before any new appends are accepted.
//!
//! Appends are serialized by an internal mutex; the on-disk order equals the
//! order in which `append` calls return. `checkpoint` truncates the log
//! atomically (rename-over-empty) once the caller has folded all prior
//! records into durable state.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WalError {
    #[error("WAL I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid WAL record: {0}")]
    InvalidRecord(String),
}

/// Error a replay callback may report for a single record.
///
/// Either way the record is skipped and recovery continues; the distinction
/// only affects the [`ReplayStats`] accounting.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("unrecognized operation {0:?}")]
    UnknownOp(String),

    #[error("corrupt payload: {0}")]
    Corrupt(String),
}

/// Diagnostic statistics from a WAL replay.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayStats {
    /// Records applied by the callback.
    pub applied: usize,
    /// Records skipped: malformed lines or unrecognized operations.
    pub skipped: usize,
    /// Records whose payload the callback could not apply.
    pub corrupt: usize,
}

struct WalInner {
    path: PathBuf,
    file: File,
}

/// Serial, durable log of mutating operations.
pub struct Wal {
    inner: Mutex<WalInner>,
}

impl Wal {
    /// Open (or create) the log at `path`.
    ///
    /// If the file exists and is non-empty, every record is replayed in file
    /// order through `replay` before this returns. Malformed lines and
    /// records the callback rejects are skipped with a warning; recovery
    /// never fails on record content.
    pub fn open<P, F>(path: P, mut replay: F) -> Result<(Self, ReplayStats), WalError>
    where
        P: AsRef<Path>,
        F: FnMut(&str, &str) -> Result<(), RecordError>,
    {
        let path = path.as_ref().to_path_buf();
        let mut stats = ReplayStats::default();

        let existing = match File::open(&path) {
            Ok(file) => Some(file),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        if let Some(existing) = existing {
            let reader = BufReader::new(existing);
            for line in reader.lines() {
                let line = line?;
                if line.is_empty() {
                    continue;
                }
                let Some((op, payload)) = line.split_once('|') else {
                    tracing::warn!(line = %line, "skipping malformed WAL line");
                    stats.skipped += 1;
                    continue;
                };
                match replay(op, payload) {
                    Ok(()) => stats.applied += 1,
                    Err(RecordError::UnknownOp(op)) => {
                        tracing::warn!(op = %op, "skipping unrecognized WAL operation");
                        stats.skipped += 1;
                    }
                    Err(RecordError::Corrupt(reason)) => {
                        tracing::warn!(%reason, "skipping corrupt WAL record");
                        stats.corrupt += 1;
                    }
                }
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok((
            Self {
                inner: Mutex::new(WalInner { path, file }),
            },
            stats,
        ))
    }

    /// Append one record and force it to durable storage before returning.
    ///
    /// On error the caller must treat the mutation the record describes as
    /// not performed.
    pub fn append(&self, op: &str, payload: &str) -> Result<(), WalError> {
        validate_field("operation", op)?;
        validate_field("payload", payload)?;

        let mut inner = self.inner.lock();
        inner.file.write_all(format!("{op}|{payload}\n").as_bytes())?;
        inner.file.sync_all()?;
        Ok(())
    }

    /// Truncate the log atomically.
    ///
    /// The caller guarantees every prior record has been folded into durable
    /// index state. Implemented as rename-over-empty so a crash mid-checkpoint
    /// leaves either the full log or an empty one.
    pub fn checkpoint(&self) -> Result<(), WalError> {
        let mut inner = self.inner.lock();

        let tmp = inner.path.with_extension("tmp");
        let empty = File::create(&tmp)?;
        empty.sync_all()?;
        std::fs::rename(&tmp, &inner.path)?;
        sync_parent(&inner.path)?;

        inner.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&inner.path)?;
        tracing::info!(path = ?inner.path, "WAL checkpoint complete");
        Ok(())
    }
}

fn validate_field(what: &str, value: &str) -> Result<(), WalError> {
    if value.contains('\n') || value.contains('|') {
        return Err(WalError::InvalidRecord(format!(
            "{what} must not contain '|' or newline"
        )));
    }
    Ok(())
}

/// Ensure directory-entry durability after a rename on POSIX filesystems.
fn sync_parent(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            File::open(parent)?.sync_all()?;
        }
    }
    Ok(())
}
