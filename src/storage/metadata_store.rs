//! Append-only JSONL metadata log, replayed into an in-memory index on open.
//!
//! No WAL/CRC framing. A later line for the same id shadows an earlier one;
//! this lets `tombstone` and future corrections append rather than rewrite.
//! `retract` is the exception: it appends a line meaning "this id never
//! happened," which replay honors by dropping the id entirely rather than
//! shadowing it, so [`crate::database::Database::insert`] can durably undo
//! a `store` call if a later step in the same insert fails.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::metadata::MetadataRecord;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LogLine {
    id: u32,
    #[serde(default)]
    tombstone: bool,
    /// Compensating marker: `id` should be dropped from the index entirely
    /// on replay, as though no line for it had ever been appended. Distinct
    /// from `tombstone`, which keeps the id counted as historical.
    #[serde(default)]
    retracted: bool,
    #[serde(default, flatten)]
    record: MetadataRecord,
}

struct Entry {
    record: MetadataRecord,
    tombstoned: bool,
}

/// Append-only metadata log plus its replayed in-memory index.
pub struct MetadataStore {
    path: PathBuf,
    file: RwLock<File>,
    index: RwLock<HashMap<u32, Entry>>,
}

impl MetadataStore {
    /// Creates a fresh, empty metadata log at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be created.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| Error::io(&path, e))?;
        Ok(Self {
            path,
            file: RwLock::new(file),
            index: RwLock::new(HashMap::new()),
        })
    }

    /// Opens an existing metadata log, replaying every line into the index.
    ///
    /// Malformed trailing lines (e.g. from a crash mid-write) are tolerated:
    /// replay stops at the first line that fails to parse, rather than
    /// rejecting the whole log, matching the append-only truncate-on-failure
    /// durability model.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be opened.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| Error::io(&path, e))?;

        let mut index = HashMap::new();
        let reader = BufReader::new(&file);
        for line in reader.lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            let Ok(parsed) = serde_json::from_str::<LogLine>(&line) else {
                tracing::warn!(path = %path.display(), "stopping metadata replay at malformed line");
                break;
            };
            if parsed.retracted {
                index.remove(&parsed.id);
                continue;
            }
            index.insert(
                parsed.id,
                Entry {
                    record: parsed.record,
                    tombstoned: parsed.tombstone,
                },
            );
        }

        Ok(Self {
            path,
            file: RwLock::new(file),
            index: RwLock::new(index),
        })
    }

    /// Appends a metadata record for `id`, overwriting any prior entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the append write fails.
    pub fn store(&self, id: u32, record: MetadataRecord) -> Result<()> {
        self.append_line(&LogLine {
            id,
            tombstone: false,
            retracted: false,
            record: record.clone(),
        })?;
        self.index.write().insert(
            id,
            Entry {
                record,
                tombstoned: false,
            },
        );
        Ok(())
    }

    /// Durably undoes a prior `store(id, ..)` as though it never happened:
    /// removes `id` from the in-memory index and appends a compensating log
    /// line so replay after a crash drops it too, rather than resurrecting
    /// an orphaned record. Used by [`crate::database::Database::insert`]
    /// when a later step of the same insert fails.
    ///
    /// A no-op (but still durable) if `id` has no entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the append write fails.
    pub fn retract(&self, id: u32) -> Result<()> {
        self.append_line(&LogLine {
            id,
            tombstone: false,
            retracted: true,
            record: MetadataRecord::empty(),
        })?;
        self.index.write().remove(&id);
        Ok(())
    }

    /// Marks `id` as tombstoned: it is excluded from future search results
    /// but its storage (arena slot, graph node) is not reclaimed until
    /// `optimize` runs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the append write fails.
    pub fn tombstone(&self, id: u32) -> Result<()> {
        let record = self
            .index
            .read()
            .get(&id)
            .map(|e| e.record.clone())
            .unwrap_or_default();
        self.append_line(&LogLine {
            id,
            tombstone: true,
            retracted: false,
            record: record.clone(),
        })?;
        self.index.write().insert(
            id,
            Entry {
                record,
                tombstoned: true,
            },
        );
        Ok(())
    }

    /// Reads `id`'s metadata record, if it exists and isn't tombstoned.
    #[must_use]
    pub fn get(&self, id: u32) -> Option<MetadataRecord> {
        let index = self.index.read();
        let entry = index.get(&id)?;
        if entry.tombstoned {
            None
        } else {
            Some(entry.record.clone())
        }
    }

    /// Whether `id` is live (present and not tombstoned).
    #[must_use]
    pub fn is_live(&self, id: u32) -> bool {
        self.index
            .read()
            .get(&id)
            .is_some_and(|e| !e.tombstoned)
    }

    /// Number of ids with a live (non-tombstoned) record.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.index.read().values().filter(|e| !e.tombstoned).count()
    }

    /// Number of ids currently tombstoned.
    #[must_use]
    pub fn tombstoned_count(&self) -> usize {
        self.index.read().values().filter(|e| e.tombstoned).count()
    }

    /// A snapshot of every live id's metadata record, in arbitrary order.
    #[must_use]
    pub fn iter_live(&self) -> Vec<(u32, MetadataRecord)> {
        self.index
            .read()
            .iter()
            .filter(|(_, e)| !e.tombstoned)
            .map(|(id, e)| (*id, e.record.clone()))
            .collect()
    }

    /// Rewrites the log to contain exactly the current live entries,
    /// dropping tombstoned ids and superseded history. Used by
    /// [`crate::Database::optimize`] to reclaim log growth without
    /// renumbering anything.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the rewrite or rename fails, or
    /// [`Error::Internal`] if a record fails to serialize.
    pub fn compact(&self) -> Result<()> {
        let mut index = self.index.write();
        index.retain(|_, entry| !entry.tombstoned);

        let tmp_path = self.path.with_extension("jsonl.compact");
        {
            let mut tmp = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)
                .map_err(|e| Error::io(&tmp_path, e))?;
            for (id, entry) in index.iter() {
                let line = LogLine {
                    id: *id,
                    tombstone: false,
                    retracted: false,
                    record: entry.record.clone(),
                };
                let serialized = serde_json::to_string(&line)
                    .map_err(|e| Error::Internal(format!("metadata serialization failed: {e}")))?;
                writeln!(tmp, "{serialized}").map_err(|e| Error::io(&tmp_path, e))?;
            }
            tmp.sync_all().map_err(|e| Error::io(&tmp_path, e))?;
        }

        std::fs::rename(&tmp_path, &self.path).map_err(|e| Error::io(&self.path, e))?;
        *self.file.write() = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| Error::io(&self.path, e))?;
        Ok(())
    }

    /// Flushes the log to durable storage.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the flush fails.
    pub fn flush(&self) -> Result<()> {
        self.file.read().sync_all().map_err(|e| Error::io(&self.path, e))
    }

    fn append_line(&self, line: &LogLine) -> Result<()> {
        let serialized = serde_json::to_string(line)
            .map_err(|e| Error::Internal(format!("metadata serialization failed: {e}")))?;
        let mut file = self.file.write();
        writeln!(file, "{serialized}").map_err(|e| Error::io(&self.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn store_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::create(dir.path().join("metadata.jsonl")).unwrap();
        let record = MetadataRecord {
            doc_type: Some("journal".into()),
            ..MetadataRecord::empty()
        };
        store.store(0, record.clone()).unwrap();
        assert_eq!(store.get(0), Some(record));
    }

    #[test]
    fn tombstone_hides_record_but_keeps_history() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::create(dir.path().join("metadata.jsonl")).unwrap();
        store.store(0, MetadataRecord::empty()).unwrap();
        store.tombstone(0).unwrap();
        assert_eq!(store.get(0), None);
        assert!(!store.is_live(0));
        assert_eq!(store.live_count(), 0);
        assert_eq!(store.tombstoned_count(), 1);
    }

    #[test]
    fn later_line_shadows_earlier_for_same_id() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metadata.jsonl");
        let store = MetadataStore::create(&path).unwrap();
        store
            .store(
                0,
                MetadataRecord {
                    doc_type: Some("journal".into()),
                    ..MetadataRecord::empty()
                },
            )
            .unwrap();
        store
            .store(
                0,
                MetadataRecord {
                    doc_type: Some("chart".into()),
                    ..MetadataRecord::empty()
                },
            )
            .unwrap();
        store.flush().unwrap();
        drop(store);

        let reopened = MetadataStore::open(&path).unwrap();
        assert_eq!(
            reopened.get(0).and_then(|r| r.doc_type),
            Some("chart".into())
        );
    }

    #[test]
    fn retract_removes_the_entry_in_process() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::create(dir.path().join("metadata.jsonl")).unwrap();
        store.store(0, MetadataRecord::empty()).unwrap();
        store.retract(0).unwrap();
        assert_eq!(store.get(0), None);
        assert!(!store.is_live(0));
        assert_eq!(store.live_count(), 0);
        assert_eq!(store.tombstoned_count(), 0);
    }

    #[test]
    fn retract_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metadata.jsonl");
        {
            let store = MetadataStore::create(&path).unwrap();
            store.store(0, MetadataRecord::empty()).unwrap();
            store.retract(0).unwrap();
            store.flush().unwrap();
        }
        let reopened = MetadataStore::open(&path).unwrap();
        assert_eq!(reopened.get(0), None);
        assert!(!reopened.is_live(0));
        assert_eq!(reopened.live_count(), 0);
        assert_eq!(reopened.tombstoned_count(), 0);
    }

    #[test]
    fn replay_stops_at_malformed_trailing_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metadata.jsonl");
        {
            let store = MetadataStore::create(&path).unwrap();
            store.store(0, MetadataRecord::empty()).unwrap();
            store.flush().unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            writeln!(f, "{{not valid json").unwrap();
        }
        let reopened = MetadataStore::open(&path).unwrap();
        assert!(reopened.is_live(0));
    }
}
