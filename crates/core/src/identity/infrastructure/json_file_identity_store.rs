use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::identity::domain::embedding::Embedding;
use crate::identity::domain::identity_store::{IdentityStore, PersonUpdate, StoreError};
use crate::identity::domain::person::{Person, PersonId};
use crate::identity::infrastructure::in_memory_identity_store::PersonTable;

const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    persons: Vec<Person>,
}

/// Durable person store backed by one JSON document.
///
/// The file is loaded once on open. Each mutation is applied to a copy of
/// the table, written to `<path>.tmp`, and renamed over `<path>`; memory is
/// only updated after the rename lands, so a failed write changes nothing.
pub struct JsonFileIdentityStore {
    path: PathBuf,
    table: Mutex<PersonTable>,
}

impl JsonFileIdentityStore {
    /// Opens (or starts) the store at `path`. A missing file is an empty store.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let table = match fs::read(path) {
            Ok(bytes) => {
                let file: StoreFile = serde_json::from_slice(&bytes).map_err(|e| {
                    StoreError::Unavailable(format!("cannot parse {}: {e}", path.display()))
                })?;
                if file.version != FORMAT_VERSION {
                    return Err(StoreError::Unavailable(format!(
                        "unsupported store version {} in {}",
                        file.version,
                        path.display()
                    )));
                }
                PersonTable::from_persons(file.persons)?
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => PersonTable::default(),
            Err(e) => return Err(unavailable(path, e)),
        };
        log::debug!("Opened identity store {} ({} persons)", path.display(), table.len());
        Ok(Self {
            path: path.to_path_buf(),
            table: Mutex::new(table),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn table(&self) -> Result<MutexGuard<'_, PersonTable>, StoreError> {
        self.table
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("Lock poisoned: {e}")))
    }

    /// Runs `mutate` on a copy of the table and commits it to disk.
    fn commit<T>(
        &self,
        mutate: impl FnOnce(&mut PersonTable) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut table = self.table()?;
        let mut next = table.clone();
        let result = mutate(&mut next)?;
        self.persist(&next)?;
        *table = next;
        Ok(result)
    }

    fn persist(&self, table: &PersonTable) -> Result<(), StoreError> {
        let file = StoreFile {
            version: FORMAT_VERSION,
            persons: table.all(),
        };
        let json = serde_json::to_vec_pretty(&file)
            .map_err(|e| StoreError::Unavailable(format!("cannot serialize store: {e}")))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| unavailable(parent, e))?;
        }
        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, json).map_err(|e| unavailable(&temp_path, e))?;
        fs::rename(&temp_path, &self.path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            unavailable(&self.path, e)
        })
    }
}

fn unavailable(path: &Path, e: io::Error) -> StoreError {
    StoreError::Unavailable(format!("{}: {e}", path.display()))
}

impl IdentityStore for JsonFileIdentityStore {
    fn get(&self, id: &PersonId) -> Result<Option<Person>, StoreError> {
        Ok(self.table()?.get(id))
    }

    fn scan_all(&self) -> Result<Vec<Person>, StoreError> {
        Ok(self.table()?.all())
    }

    fn create(&self, person: Person) -> Result<(), StoreError> {
        self.commit(|t| t.create(person))
    }

    fn append_evidence(
        &self,
        id: &PersonId,
        embedding: Embedding,
        image_path: PathBuf,
    ) -> Result<(), StoreError> {
        self.commit(|t| t.append_evidence(id, embedding, image_path))
    }

    fn set_fields(&self, id: &PersonId, update: PersonUpdate) -> Result<(), StoreError> {
        self.commit(|t| t.set_fields(id, update))
    }

    fn delete_many(&self, ids: &[PersonId]) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.commit(|t| Ok(t.delete_many(ids)))
    }
}
