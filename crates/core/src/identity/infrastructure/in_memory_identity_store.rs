use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use crate::identity::domain::embedding::Embedding;
use crate::identity::domain::identity_store::{IdentityStore, PersonUpdate, StoreError};
use crate::identity::domain::person::{Person, PersonId};

/// Process-local store keyed by person id.
///
/// Shares the mutation rules of the durable store (validation, conflict
/// and not-found handling) through [`PersonTable`].
#[derive(Default)]
pub struct InMemoryIdentityStore {
    table: Mutex<PersonTable>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> Result<MutexGuard<'_, PersonTable>, StoreError> {
        self.table
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("Lock poisoned: {e}")))
    }
}

impl IdentityStore for InMemoryIdentityStore {
    fn get(&self, id: &PersonId) -> Result<Option<Person>, StoreError> {
        Ok(self.table()?.get(id))
    }

    fn scan_all(&self) -> Result<Vec<Person>, StoreError> {
        Ok(self.table()?.all())
    }

    fn create(&self, person: Person) -> Result<(), StoreError> {
        self.table()?.create(person)
    }

    fn append_evidence(
        &self,
        id: &PersonId,
        embedding: Embedding,
        image_path: PathBuf,
    ) -> Result<(), StoreError> {
        self.table()?.append_evidence(id, embedding, image_path)
    }

    fn set_fields(&self, id: &PersonId, update: PersonUpdate) -> Result<(), StoreError> {
        self.table()?.set_fields(id, update)
    }

    fn delete_many(&self, ids: &[PersonId]) -> Result<usize, StoreError> {
        Ok(self.table()?.delete_many(ids))
    }
}

/// Ordered person collection with validated mutations.
///
/// Every mutation checks the resulting record before touching the table,
/// so a rejected write leaves the table unchanged.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PersonTable {
    persons: BTreeMap<PersonId, Person>,
}

impl PersonTable {
    pub fn from_persons(persons: Vec<Person>) -> Result<Self, StoreError> {
        let mut table = Self::default();
        for person in persons {
            table.create(person)?;
        }
        Ok(table)
    }

    pub fn get(&self, id: &PersonId) -> Option<Person> {
        self.persons.get(id).cloned()
    }

    pub fn all(&self) -> Vec<Person> {
        self.persons.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.persons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.persons.is_empty()
    }

    pub fn create(&mut self, person: Person) -> Result<(), StoreError> {
        person.validate().map_err(StoreError::Invalid)?;
        if self.persons.contains_key(&person.person_id) {
            return Err(StoreError::Conflict(person.person_id));
        }
        self.persons.insert(person.person_id.clone(), person);
        Ok(())
    }

    pub fn append_evidence(
        &mut self,
        id: &PersonId,
        embedding: Embedding,
        image_path: PathBuf,
    ) -> Result<(), StoreError> {
        let mut updated = self.existing(id)?.clone();
        updated.embeddings.push(embedding);
        updated.representative_image_paths.push(image_path);
        self.replace(updated)
    }

    pub fn set_fields(&mut self, id: &PersonId, update: PersonUpdate) -> Result<(), StoreError> {
        let mut updated = self.existing(id)?.clone();
        update.apply_to(&mut updated);
        self.replace(updated)
    }

    pub fn delete_many(&mut self, ids: &[PersonId]) -> usize {
        let mut removed = 0;
        for id in ids {
            if self.persons.remove(id).is_some() {
                removed += 1;
            }
        }
        removed
    }

    fn existing(&self, id: &PersonId) -> Result<&Person, StoreError> {
        self.persons
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    fn replace(&mut self, person: Person) -> Result<(), StoreError> {
        person.validate().map_err(StoreError::Invalid)?;
        self.persons.insert(person.person_id.clone(), person);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(id: &str, e: Vec<f32>) -> Person {
        Person::seeded(PersonId::from(id), e, format!("{id}.jpg").into())
    }

    #[test]
    fn test_create_and_get() {
        let store = InMemoryIdentityStore::new();
        store.create(person("P1", vec![1.0, 0.0])).unwrap();

        let p = store.get(&PersonId::from("P1")).unwrap().unwrap();
        assert_eq!(p.person_id.as_str(), "P1");
        assert!(store.get(&PersonId::from("P2")).unwrap().is_none());
        assert!(store.contains(&PersonId::from("P1")).unwrap());
    }

    #[test]
    fn test_create_duplicate_is_conflict() {
        let store = InMemoryIdentityStore::new();
        store.create(person("P1", vec![1.0])).unwrap();
        let err = store.create(person("P1", vec![0.5])).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn test_scan_all_is_ordered_by_id() {
        let store = InMemoryIdentityStore::new();
        for id in ["P3", "P1", "P2"] {
            store.create(person(id, vec![1.0])).unwrap();
        }
        let ids: Vec<String> = store
            .scan_all()
            .unwrap()
            .into_iter()
            .map(|p| p.person_id.to_string())
            .collect();
        assert_eq!(ids, vec!["P1", "P2", "P3"]);
    }

    #[test]
    fn test_append_evidence_keeps_sequences_parallel() {
        let store = InMemoryIdentityStore::new();
        let id = PersonId::from("P1");
        store.create(person("P1", vec![1.0, 0.0])).unwrap();

        store
            .append_evidence(&id, vec![0.0, 1.0], "b.jpg".into())
            .unwrap();

        let p = store.get(&id).unwrap().unwrap();
        assert_eq!(p.embeddings, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert_eq!(
            p.representative_image_paths,
            vec![PathBuf::from("P1.jpg"), PathBuf::from("b.jpg")]
        );
    }

    #[test]
    fn test_append_to_missing_is_not_found() {
        let store = InMemoryIdentityStore::new();
        let err = store
            .append_evidence(&PersonId::from("nope"), vec![1.0], "a.jpg".into())
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_invalid_append_leaves_record_unchanged() {
        let store = InMemoryIdentityStore::new();
        let id = PersonId::from("P1");
        store.create(person("P1", vec![1.0, 0.0])).unwrap();

        let err = store
            .append_evidence(&id, vec![1.0, 0.0, 0.0], "c.jpg".into())
            .unwrap_err();

        assert!(matches!(err, StoreError::Invalid(_)));
        assert_eq!(store.get(&id).unwrap().unwrap().evidence_count(), 1);
    }

    #[test]
    fn test_set_fields_on_missing_is_not_found() {
        let store = InMemoryIdentityStore::new();
        let err = store
            .set_fields(&PersonId::from("nope"), PersonUpdate::name_label(Some("x".into())))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_delete_many_ignores_absent_ids() {
        let store = InMemoryIdentityStore::new();
        store.create(person("P1", vec![1.0])).unwrap();
        store.create(person("P2", vec![1.0])).unwrap();

        let removed = store
            .delete_many(&[PersonId::from("P1"), PersonId::from("ghost")])
            .unwrap();

        assert_eq!(removed, 1);
        assert_eq!(store.scan_all().unwrap().len(), 1);
    }

    #[test]
    fn test_table_from_persons_rejects_duplicates() {
        let result = PersonTable::from_persons(vec![person("P1", vec![1.0]), person("P1", vec![1.0])]);
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }
}
