use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::identity::domain::embedding::{cosine_similarity, l2_norm, ComputationError};
use crate::identity::domain::identity_store::{IdentityStore, StoreError};
use crate::identity::domain::person::{Person, PersonId};
use crate::identity::domain::person_id_generator::{IdAllocationError, PersonIdGenerator};
use crate::identity::domain::representative_maintainer::{
    MaintainerError, RepresentativeMaintainer,
};
use crate::identity::domain::write_gate::WriteGate;

/// Inclusive cosine-similarity cutoff for accepting a match.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.8;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    IdAllocation(#[from] IdAllocationError),
    #[error("invalid embedding: {0}")]
    InvalidEmbedding(String),
    #[error("embedding has dimension {actual} but {person_id} uses {expected}")]
    DimensionMismatch {
        person_id: PersonId,
        expected: usize,
        actual: usize,
    },
}

/// Outcome of resolving one face. Neither variant is an error.
#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    /// Appended to an existing person whose representative scored `similarity`.
    Matched { person_id: PersonId, similarity: f64 },
    /// No person reached the threshold; a new one was created.
    Created { person_id: PersonId },
}

impl Resolution {
    pub fn person_id(&self) -> &PersonId {
        match self {
            Resolution::Matched { person_id, .. } | Resolution::Created { person_id } => {
                person_id
            }
        }
    }

    pub fn is_new_person(&self) -> bool {
        matches!(self, Resolution::Created { .. })
    }
}

/// Decides whether a face belongs to a known person or starts a new one.
///
/// Each call scans every stored person (linear in the number of identities)
/// under the write gate, so concurrent resolutions of the same face cannot
/// both create a person.
pub struct IdentityResolver {
    store: Arc<dyn IdentityStore>,
    gate: Arc<WriteGate>,
    generator: PersonIdGenerator,
    maintainer: RepresentativeMaintainer,
    threshold: f64,
}

impl IdentityResolver {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        gate: Arc<WriteGate>,
        generator: PersonIdGenerator,
        maintainer: RepresentativeMaintainer,
        threshold: f64,
    ) -> Self {
        Self {
            store,
            gate,
            generator,
            maintainer,
            threshold,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Resolves `embedding` observed in `image_path` using the configured threshold.
    pub fn resolve(
        &self,
        embedding: &[f32],
        image_path: &Path,
    ) -> Result<Resolution, ResolveError> {
        self.resolve_with_threshold(embedding, self.threshold, image_path)
    }

    pub fn resolve_with_threshold(
        &self,
        embedding: &[f32],
        threshold: f64,
        image_path: &Path,
    ) -> Result<Resolution, ResolveError> {
        validate_embedding(embedding)?;

        let _guard = self.gate.enter();
        let persons = self.store.scan_all()?;

        match best_match(embedding, &persons)? {
            Some((person_id, similarity)) if similarity >= threshold => {
                self.store.append_evidence(
                    &person_id,
                    embedding.to_vec(),
                    image_path.to_path_buf(),
                )?;
                self.refresh_representative(&person_id)?;
                log::debug!("Face in {} matched {person_id} ({similarity:.3})", image_path.display());
                Ok(Resolution::Matched {
                    person_id,
                    similarity,
                })
            }
            best => {
                let person_id = self.generator.generate()?;
                self.store.create(Person::seeded(
                    person_id.clone(),
                    embedding.to_vec(),
                    image_path.to_path_buf(),
                ))?;
                match best {
                    Some((closest, similarity)) => log::info!(
                        "New person {person_id} from {} (closest {closest} at {similarity:.3})",
                        image_path.display()
                    ),
                    None => log::info!("New person {person_id} from {}", image_path.display()),
                }
                Ok(Resolution::Created { person_id })
            }
        }
    }

    /// A degenerate mean keeps the previous representative; store failures propagate.
    fn refresh_representative(&self, person_id: &PersonId) -> Result<(), ResolveError> {
        match self.maintainer.recompute(person_id) {
            Ok(_) => Ok(()),
            Err(MaintainerError::Computation { source, .. }) => {
                log::warn!("Kept previous representative for {person_id}: {source}");
                Ok(())
            }
            Err(MaintainerError::Store(e)) => Err(e.into()),
        }
    }
}

/// Highest-similarity person for `embedding`; equal scores go to the lowest id.
pub fn best_match(
    embedding: &[f32],
    persons: &[Person],
) -> Result<Option<(PersonId, f64)>, ResolveError> {
    let mut best: Option<(&PersonId, f64)> = None;
    for person in persons {
        let similarity = cosine_similarity(embedding, &person.representative_embedding)
            .map_err(|e| match e {
                ComputationError::DimensionMismatch { expected, actual } => {
                    ResolveError::DimensionMismatch {
                        person_id: person.person_id.clone(),
                        expected,
                        actual,
                    }
                }
                other => ResolveError::InvalidEmbedding(other.to_string()),
            })?;

        let better = match best {
            None => true,
            Some((best_id, best_sim)) => {
                similarity > best_sim || (similarity == best_sim && person.person_id < *best_id)
            }
        };
        if better {
            best = Some((&person.person_id, similarity));
        }
    }
    Ok(best.map(|(id, sim)| (id.clone(), sim)))
}

fn validate_embedding(embedding: &[f32]) -> Result<(), ResolveError> {
    if embedding.is_empty() {
        return Err(ResolveError::InvalidEmbedding("embedding is empty".into()));
    }
    if embedding.iter().any(|x| !x.is_finite()) {
        return Err(ResolveError::InvalidEmbedding(
            "embedding has non-finite components".into(),
        ));
    }
    if l2_norm(embedding) == 0.0 {
        return Err(ResolveError::InvalidEmbedding("embedding has zero norm".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::domain::person_id_generator::TimestampFn;
    use crate::identity::infrastructure::in_memory_identity_store::InMemoryIdentityStore;
    use approx::assert_relative_eq;
    use rstest::rstest;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn resolver_over(store: Arc<InMemoryIdentityStore>) -> IdentityResolver {
        let counter = Arc::new(AtomicUsize::new(0));
        let clock: TimestampFn = Box::new(|| "20240101120000".to_string());
        let generator = PersonIdGenerator::new(store.clone()).with_sources(
            clock,
            Box::new(move || format!("{:06x}", counter.fetch_add(1, Ordering::SeqCst))),
        );
        IdentityResolver::new(
            store.clone(),
            Arc::new(WriteGate::new()),
            generator,
            RepresentativeMaintainer::new(store),
            DEFAULT_SIMILARITY_THRESHOLD,
        )
    }

    fn seed(store: &InMemoryIdentityStore, id: &str, embedding: Vec<f32>) {
        store
            .create(Person::seeded(PersonId::from(id), embedding, format!("{id}.jpg").into()))
            .unwrap();
    }

    #[test]
    fn test_similar_face_resolves_to_existing_person() {
        let store = Arc::new(InMemoryIdentityStore::new());
        seed(&store, "A", vec![1.0, 0.0]);
        let resolver = resolver_over(store.clone());

        let result = resolver
            .resolve(&[0.9, 0.436], Path::new("in/e1.jpg"))
            .unwrap();

        match &result {
            Resolution::Matched {
                person_id,
                similarity,
            } => {
                assert_eq!(person_id.as_str(), "A");
                assert_relative_eq!(*similarity, 0.9, epsilon = 1e-3);
            }
            other => panic!("expected match, got {other:?}"),
        }
        let a = store.get(&PersonId::from("A")).unwrap().unwrap();
        assert_eq!(a.embeddings, vec![vec![1.0, 0.0], vec![0.9, 0.436]]);
        assert_eq!(
            a.representative_image_paths,
            vec![PathBuf::from("A.jpg"), PathBuf::from("in/e1.jpg")]
        );
        assert_relative_eq!(l2_norm(&a.representative_embedding), 1.0, epsilon = 1e-6);
        assert!(a.representative_embedding[1] > 0.0);
    }

    #[test]
    fn test_dissimilar_face_creates_new_person() {
        let store = Arc::new(InMemoryIdentityStore::new());
        seed(&store, "A", vec![1.0, 0.0]);
        let resolver = resolver_over(store.clone());

        let result = resolver.resolve(&[0.0, 1.0], Path::new("in/e2.jpg")).unwrap();

        assert!(result.is_new_person());
        let b = store.get(result.person_id()).unwrap().unwrap();
        assert_eq!(b.embeddings, vec![vec![0.0, 1.0]]);
        assert_eq!(b.representative_embedding, vec![0.0, 1.0]);
        assert_ne!(b.person_id.as_str(), "A");
        assert_eq!(store.scan_all().unwrap().len(), 2);
    }

    #[test]
    fn test_first_face_creates_unit_normalized_person() {
        let store = Arc::new(InMemoryIdentityStore::new());
        let resolver = resolver_over(store.clone());

        let result = resolver.resolve(&[3.0, 4.0], Path::new("a.jpg")).unwrap();

        let p = store.get(result.person_id()).unwrap().unwrap();
        assert_eq!(p.embeddings, vec![vec![3.0, 4.0]]);
        assert_relative_eq!(p.representative_embedding[0], 0.6, epsilon = 1e-6);
        assert_relative_eq!(p.representative_embedding[1], 0.8, epsilon = 1e-6);
    }

    #[rstest]
    #[case::score_equals_threshold(1.0, true)]
    #[case::score_above_threshold(0.999, true)]
    fn test_threshold_is_inclusive(#[case] threshold: f64, #[case] matched: bool) {
        let store = Arc::new(InMemoryIdentityStore::new());
        seed(&store, "A", vec![1.0, 0.0]);
        let resolver = resolver_over(store);

        let result = resolver
            .resolve_with_threshold(&[2.0, 0.0], threshold, Path::new("x.jpg"))
            .unwrap();

        assert_eq!(!result.is_new_person(), matched);
    }

    #[test]
    fn test_just_below_threshold_creates_person() {
        let store = Arc::new(InMemoryIdentityStore::new());
        seed(&store, "A", vec![1.0, 0.0]);
        let resolver = resolver_over(store);

        // cos = 0.6 / 1.0
        let result = resolver
            .resolve_with_threshold(&[0.6, 0.8], 0.6001, Path::new("x.jpg"))
            .unwrap();

        assert!(result.is_new_person());
    }

    #[test]
    fn test_tie_goes_to_lowest_person_id() {
        let store = Arc::new(InMemoryIdentityStore::new());
        seed(&store, "P3", vec![1.0, 0.0]);
        seed(&store, "P1", vec![1.0, 0.0]);
        seed(&store, "P2", vec![1.0, 0.0]);
        let resolver = resolver_over(store);

        let result = resolver.resolve(&[1.0, 0.0], Path::new("x.jpg")).unwrap();

        assert_eq!(result.person_id().as_str(), "P1");
    }

    #[test]
    fn test_best_match_is_order_independent() {
        let a = Person::seeded(PersonId::from("b"), vec![1.0, 0.0], "1.jpg".into());
        let b = Person::seeded(PersonId::from("a"), vec![1.0, 0.0], "2.jpg".into());
        let c = Person::seeded(PersonId::from("c"), vec![0.0, 1.0], "3.jpg".into());

        let forward = best_match(&[1.0, 0.1], &[a.clone(), b.clone(), c.clone()]).unwrap();
        let backward = best_match(&[1.0, 0.1], &[c, b, a]).unwrap();

        assert_eq!(forward, backward);
        assert_eq!(forward.unwrap().0.as_str(), "a");
    }

    #[test]
    fn test_best_match_empty_store() {
        assert_eq!(best_match(&[1.0], &[]).unwrap(), None);
    }

    #[test]
    fn test_rejects_dimension_mismatch() {
        let store = Arc::new(InMemoryIdentityStore::new());
        seed(&store, "A", vec![1.0, 0.0]);
        let resolver = resolver_over(store);

        let err = resolver
            .resolve(&[1.0, 0.0, 0.0], Path::new("x.jpg"))
            .unwrap_err();

        assert!(matches!(
            err,
            ResolveError::DimensionMismatch {
                expected: 2,
                actual: 3,
                ..
            }
        ));
    }

    #[rstest]
    #[case::empty(vec![])]
    #[case::nan(vec![f32::NAN, 1.0])]
    #[case::infinite(vec![f32::INFINITY, 0.0])]
    #[case::zero(vec![0.0, 0.0])]
    fn test_rejects_invalid_embedding(#[case] embedding: Vec<f32>) {
        let store = Arc::new(InMemoryIdentityStore::new());
        let resolver = resolver_over(store.clone());

        let err = resolver.resolve(&embedding, Path::new("x.jpg")).unwrap_err();

        assert!(matches!(err, ResolveError::InvalidEmbedding(_)));
        assert!(store.scan_all().unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_resolutions_do_not_duplicate_person() {
        let store = Arc::new(InMemoryIdentityStore::new());
        let resolver = Arc::new(resolver_over(store.clone()));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let resolver = resolver.clone();
                thread::spawn(move || {
                    resolver
                        .resolve(&[0.2, 0.9, 0.1], Path::new(&format!("{i}.jpg")))
                        .unwrap()
                })
            })
            .collect();
        let results: Vec<Resolution> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let persons = store.scan_all().unwrap();
        assert_eq!(persons.len(), 1);
        assert_eq!(persons[0].evidence_count(), 8);
        assert_eq!(results.iter().filter(|r| r.is_new_person()).count(), 1);
    }
}
