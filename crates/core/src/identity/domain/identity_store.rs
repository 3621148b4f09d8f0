use std::path::PathBuf;

use thiserror::Error;

use crate::identity::domain::embedding::Embedding;
use crate::identity::domain::person::{Person, PersonId};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("person {0} not found")]
    NotFound(PersonId),
    #[error("person {0} already exists")]
    Conflict(PersonId),
    #[error("invalid person record: {0}")]
    Invalid(String),
    #[error("identity store unavailable: {0}")]
    Unavailable(String),
}

/// Partial update applied by [`IdentityStore::set_fields`].
///
/// `None` leaves a field as it is. `name_label: Some(None)` clears the label.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PersonUpdate {
    pub name_label: Option<Option<String>>,
    pub evidence: Option<(Vec<Embedding>, Vec<PathBuf>)>,
    pub representative_embedding: Option<Embedding>,
}

impl PersonUpdate {
    pub fn name_label(label: Option<String>) -> Self {
        Self {
            name_label: Some(label),
            ..Self::default()
        }
    }

    pub fn evidence(embeddings: Vec<Embedding>, paths: Vec<PathBuf>) -> Self {
        Self {
            evidence: Some((embeddings, paths)),
            ..Self::default()
        }
    }

    pub fn representative(embedding: Embedding) -> Self {
        Self {
            representative_embedding: Some(embedding),
            ..Self::default()
        }
    }

    /// Applies the update to `person` without validating the result.
    pub fn apply_to(self, person: &mut Person) {
        if let Some(label) = self.name_label {
            person.name_label = label;
        }
        if let Some((embeddings, paths)) = self.evidence {
            person.embeddings = embeddings;
            person.representative_image_paths = paths;
        }
        if let Some(rep) = self.representative_embedding {
            person.representative_embedding = rep;
        }
    }
}

/// Persistence contract for person records.
///
/// Implementations validate every record they accept (see
/// [`Person::validate`]) and hand out owned snapshots, so a reader never
/// observes a half-applied write. `scan_all` returns records ordered by id.
/// Cross-call atomicity is the caller's job; see
/// [`WriteGate`](crate::identity::domain::write_gate::WriteGate).
pub trait IdentityStore: Send + Sync {
    fn get(&self, id: &PersonId) -> Result<Option<Person>, StoreError>;

    fn scan_all(&self) -> Result<Vec<Person>, StoreError>;

    fn contains(&self, id: &PersonId) -> Result<bool, StoreError> {
        Ok(self.get(id)?.is_some())
    }

    /// Inserts a new record. Fails with `Conflict` if the id is taken.
    fn create(&self, person: Person) -> Result<(), StoreError>;

    /// Appends one observation to both parallel evidence sequences.
    fn append_evidence(
        &self,
        id: &PersonId,
        embedding: Embedding,
        image_path: PathBuf,
    ) -> Result<(), StoreError>;

    fn set_fields(&self, id: &PersonId, update: PersonUpdate) -> Result<(), StoreError>;

    /// Removes every listed record that exists; returns how many were removed.
    fn delete_many(&self, ids: &[PersonId]) -> Result<usize, StoreError>;
}
