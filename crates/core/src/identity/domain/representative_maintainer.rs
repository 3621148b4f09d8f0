use std::sync::Arc;

use thiserror::Error;

use crate::identity::domain::embedding::{normalized_mean, ComputationError, Embedding};
use crate::identity::domain::identity_store::{IdentityStore, PersonUpdate, StoreError};
use crate::identity::domain::person::PersonId;

#[derive(Error, Debug)]
pub enum MaintainerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("cannot recompute representative for {person_id}: {source}")]
    Computation {
        person_id: PersonId,
        #[source]
        source: ComputationError,
    },
}

/// Keeps each person's representative embedding equal to the unit-normalized
/// mean of its evidence.
///
/// When the mean cannot be normalized (no evidence, or embeddings that
/// cancel out exactly) the stored representative is left as it was and a
/// [`MaintainerError::Computation`] is returned.
pub struct RepresentativeMaintainer {
    store: Arc<dyn IdentityStore>,
}

impl RepresentativeMaintainer {
    pub fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self { store }
    }

    /// Recomputes and persists the representative for `person_id`.
    ///
    /// Reads one snapshot of the record; callers hold the write gate so no
    /// append can land between the read and the write.
    pub fn recompute(&self, person_id: &PersonId) -> Result<Embedding, MaintainerError> {
        let person = self
            .store
            .get(person_id)?
            .ok_or_else(|| StoreError::NotFound(person_id.clone()))?;

        let representative =
            normalized_mean(&person.embeddings).map_err(|source| MaintainerError::Computation {
                person_id: person_id.clone(),
                source,
            })?;

        self.store
            .set_fields(person_id, PersonUpdate::representative(representative.clone()))?;
        log::debug!(
            "Recomputed representative for {person_id} from {} embeddings",
            person.embeddings.len()
        );
        Ok(representative)
    }
}
