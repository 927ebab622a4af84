// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSONL key-value operation log.
//!
//! Each entry is a single line of JSON:
//! `{"op":"put","key":K,"value":V}` or `{"op":"delete","key":K}`.
//! Opening replays the log with last-operation-per-key-wins semantics.
//! Record ordering in storage is not significant; replay reconstructs
//! the index.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Errors that can occur in table operations
#[derive(Debug, Error)]
pub enum TableError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Deserialization helper for reading log entries.
#[derive(Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum TableOp {
    Put { key: String, value: Value },
    Delete { key: String },
}

/// Serialization helper for writing log entries without cloning the value.
#[derive(Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum TableOpRef<'a> {
    Put { key: &'a str, value: &'a Value },
    Delete { key: &'a str },
}

/// Append-only key-value table backed by a JSONL operation log.
///
/// Writes are appended and flushed per operation; `sync` is the
/// durability point. `compact` rewrites the log to the live record set
/// so tombstones and overwrites do not accumulate.
pub struct Table {
    file: BufWriter<File>,
    path: PathBuf,
}

impl Table {
    /// Open or create a table, replaying its operation log.
    ///
    /// Returns the table handle and the live records. A corrupt tail is
    /// preserved to a rotated `.bak` file, the log is rewritten with only
    /// the valid prefix, and a warning is surfaced.
    pub fn open(path: &Path) -> Result<(Self, Vec<(String, Value)>), TableError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let (live, valid_lines, corrupt) = Self::replay(&file)?;
        drop(file);

        if corrupt {
            let bak_path = rotate_bak_path(path);
            warn!(
                path = %path.display(),
                bak = %bak_path.display(),
                valid_entries = valid_lines.len(),
                "corrupt table tail detected, truncating at last good record",
            );
            fs::rename(path, &bak_path)?;

            let mut clean = File::create(path)?;
            for line in &valid_lines {
                clean.write_all(line.as_bytes())?;
                clean.write_all(b"\n")?;
            }
            clean.sync_all()?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok((
            Self {
                file: BufWriter::new(file),
                path: path.to_owned(),
            },
            live.into_iter().collect(),
        ))
    }

    /// Replay the log: last operation per key wins.
    ///
    /// Returns `(live records, valid raw lines, corrupt)` where `corrupt`
    /// is true if an unparseable entry was encountered (not just EOF).
    fn replay(file: &File) -> Result<(IndexMap<String, Value>, Vec<String>, bool), TableError> {
        let mut reader = BufReader::new(file.try_clone()?);
        let mut live = IndexMap::new();
        let mut valid_lines = Vec::new();
        let mut corrupt = false;
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    corrupt = true;
                    break;
                }
                Err(e) => return Err(e.into()),
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            // Stop at the first unparseable entry
            let op: TableOp = match serde_json::from_str(trimmed) {
                Ok(op) => op,
                Err(_) => {
                    corrupt = true;
                    break;
                }
            };

            match op {
                TableOp::Put { key, value } => {
                    live.insert(key, value);
                }
                TableOp::Delete { key } => {
                    live.shift_remove(&key);
                }
            }
            valid_lines.push(trimmed.to_string());
        }

        Ok((live, valid_lines, corrupt))
    }

    /// Append an overwrite of `key`.
    pub fn put(&mut self, key: &str, value: &Value) -> Result<(), TableError> {
        self.append(&TableOpRef::Put { key, value })
    }

    /// Append a deletion of `key`. Deleting an absent key is harmless.
    pub fn delete(&mut self, key: &str) -> Result<(), TableError> {
        self.append(&TableOpRef::Delete { key })
    }

    fn append(&mut self, op: &TableOpRef<'_>) -> Result<(), TableError> {
        let mut json_bytes = serde_json::to_vec(op)?;
        json_bytes.push(b'\n');
        self.file.write_all(&json_bytes)?;
        self.file.flush()?;
        Ok(())
    }

    /// Re-read the log and return the live records.
    ///
    /// Used by callers that need a fresh view outside of `open` (e.g.
    /// during cleanup). Stops at a corrupt tail without rewriting it.
    pub fn scan(&mut self) -> Result<Vec<(String, Value)>, TableError> {
        self.file.flush()?;
        let file = File::open(&self.path)?;
        let (live, _, _) = Self::replay(&file)?;
        Ok(live.into_iter().collect())
    }

    /// Rewrite the log to contain exactly the given live records.
    ///
    /// Writes to a temp file and atomically renames, so a crash mid-compact
    /// leaves the old log intact.
    pub fn compact(&mut self, live: &[(String, Value)]) -> Result<(), TableError> {
        self.file.flush()?;

        let tmp_path = self.path.with_extension("tmp");
        {
            let mut tmp = BufWriter::new(File::create(&tmp_path)?);
            for (key, value) in live {
                let mut json_bytes = serde_json::to_vec(&TableOpRef::Put { key, value })?;
                json_bytes.push(b'\n');
                tmp.write_all(&json_bytes)?;
            }
            let tmp = tmp.into_inner().map_err(|e| e.into_error())?;
            tmp.sync_all()?;
        }

        fs::rename(&tmp_path, &self.path)?;

        self.file = BufWriter::new(OpenOptions::new().create(true).append(true).open(&self.path)?);
        Ok(())
    }

    /// Flush buffered writes and fsync the log. This is the durability
    /// point.
    pub fn sync(&mut self) -> Result<(), TableError> {
        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        Ok(())
    }
}

const MAX_BAK_FILES: u32 = 3;

/// Pick the next `.bak` / `.bak.N` path, rotating older backups out.
///
/// Keeps up to [`MAX_BAK_FILES`] backups: `.bak`, `.bak.2`, `.bak.3`.
/// The oldest backup is removed when the limit is reached.
fn rotate_bak_path(path: &Path) -> PathBuf {
    let bak = |n: u32| {
        if n == 1 {
            path.with_extension("bak")
        } else {
            path.with_extension(format!("bak.{n}"))
        }
    };

    let oldest = bak(MAX_BAK_FILES);
    if oldest.exists() {
        let _ = fs::remove_file(&oldest);
    }

    for n in (1..MAX_BAK_FILES).rev() {
        let src = bak(n);
        if src.exists() {
            let _ = fs::rename(&src, bak(n + 1));
        }
    }

    bak(1)
}

#[cfg(test)]
#[path = "table_tests.rs"]
mod tests;
