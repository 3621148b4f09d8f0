use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::admin::admin_intent::AdminIntent;

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("cannot read intent journal {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot write intent journal {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("intent journal {} is corrupt: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: u64,
    pub started_at: DateTime<Utc>,
    /// Output directory holding the display folders the intent touches.
    pub base_dir: PathBuf,
    pub intent: AdminIntent,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct JournalFile {
    next_id: u64,
    entries: Vec<JournalEntry>,
}

/// Durable list of administrative changes in flight.
///
/// An entry is written before the first side effect and removed after the
/// last one. Anything still listed on startup was interrupted and is
/// replayed by the orchestrator.
pub struct IntentJournal {
    path: PathBuf,
    state: Mutex<JournalFile>,
}

impl IntentJournal {
    pub fn open(path: &Path) -> Result<Self, JournalError> {
        let state = match fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| JournalError::Corrupt {
                path: path.to_path_buf(),
                source,
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => JournalFile::default(),
            Err(source) => {
                return Err(JournalError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persists `intent` and returns its entry id.
    pub fn record(&self, base_dir: &Path, intent: AdminIntent) -> Result<u64, JournalError> {
        let mut state = self.state();
        let mut next = state.clone();
        let id = next.next_id;
        next.next_id += 1;
        log::debug!("Recording intent {id}: {}", intent.describe());
        next.entries.push(JournalEntry {
            id,
            started_at: Utc::now(),
            base_dir: base_dir.to_path_buf(),
            intent,
        });
        self.persist(&next)?;
        *state = next;
        Ok(id)
    }

    /// Removes a completed entry. Returns whether it was present.
    pub fn clear(&self, id: u64) -> Result<bool, JournalError> {
        let mut state = self.state();
        if !state.entries.iter().any(|e| e.id == id) {
            return Ok(false);
        }
        let mut next = state.clone();
        next.entries.retain(|e| e.id != id);
        self.persist(&next)?;
        *state = next;
        Ok(true)
    }

    /// Entries not yet cleared, oldest first.
    pub fn pending(&self) -> Vec<JournalEntry> {
        self.state().entries.clone()
    }

    fn state(&self) -> MutexGuard<'_, JournalFile> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, file: &JournalFile) -> Result<(), JournalError> {
        let write_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: io::Error| JournalError::Write { path, source }
        };
        let json = serde_json::to_vec_pretty(file).map_err(|source| JournalError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err(parent))?;
        }
        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, json).map_err(write_err(&temp_path))?;
        fs::rename(&temp_path, &self.path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            write_err(&self.path)(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::domain::person::PersonId;
    use tempfile::TempDir;

    fn rename_intent(name: &str) -> AdminIntent {
        AdminIntent::Rename {
            person_id: PersonId::from("P1"),
            previous_label: None,
            previous_folder: "P1".into(),
            new_name: name.into(),
        }
    }

    #[test]
    fn test_missing_file_has_no_pending() {
        let tmp = TempDir::new().unwrap();
        let journal = IntentJournal::open(&tmp.path().join("intents.json")).unwrap();
        assert!(journal.pending().is_empty());
    }

    #[test]
    fn test_record_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state").join("intents.json");
        let base = tmp.path().join("out");
        {
            let journal = IntentJournal::open(&path).unwrap();
            journal.record(&base, rename_intent("Alice")).unwrap();
            journal.record(&base, rename_intent("Bob")).unwrap();
        }

        let pending = IntentJournal::open(&path).unwrap().pending();

        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].intent, rename_intent("Alice"));
        assert_eq!(pending[1].base_dir, base);
        assert!(pending[0].id < pending[1].id);
    }

    #[test]
    fn test_clear_removes_only_that_entry() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("intents.json");
        let journal = IntentJournal::open(&path).unwrap();
        let first = journal.record(tmp.path(), rename_intent("Alice")).unwrap();
        let second = journal.record(tmp.path(), rename_intent("Bob")).unwrap();

        assert!(journal.clear(first).unwrap());
        assert!(!journal.clear(first).unwrap());

        let pending = IntentJournal::open(&path).unwrap().pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, second);
    }

    #[test]
    fn test_ids_are_not_reused_after_clear() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("intents.json");
        let journal = IntentJournal::open(&path).unwrap();
        let first = journal.record(tmp.path(), rename_intent("Alice")).unwrap();
        journal.clear(first).unwrap();

        let reopened = IntentJournal::open(&path).unwrap();
        let second = reopened.record(tmp.path(), rename_intent("Bob")).unwrap();

        assert_ne!(first, second);
    }

    #[test]
    fn test_corrupt_journal_is_reported() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("intents.json");
        fs::write(&path, b"[oops").unwrap();

        let result = IntentJournal::open(&path);

        assert!(matches!(result, Err(JournalError::Corrupt { .. })));
    }

    #[test]
    fn test_failed_write_keeps_memory_unchanged() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("intents.json");
        let journal = IntentJournal::open(&path).unwrap();
        fs::create_dir(path.with_extension("tmp")).unwrap();

        let result = journal.record(tmp.path(), rename_intent("Alice"));

        assert!(matches!(result, Err(JournalError::Write { .. })));
        assert!(journal.pending().is_empty());
    }
}
