use std::sync::Arc;

use rand::Rng;
use thiserror::Error;

use crate::identity::domain::identity_store::{IdentityStore, StoreError};
use crate::identity::domain::person::PersonId;

pub const DEFAULT_MAX_ATTEMPTS: usize = 16;

const SUFFIX_LEN: usize = 6;
const HEX_DIGITS: &[u8] = b"0123456789abcdef";

#[derive(Error, Debug)]
pub enum IdAllocationError {
    #[error("could not allocate a unique person id after {attempts} attempts")]
    Exhausted { attempts: usize },
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type TimestampFn = Box<dyn Fn() -> String + Send + Sync>;
pub type SuffixFn = Box<dyn Fn() -> String + Send + Sync>;

/// Allocates person ids of the form `P<YYYYMMDDHHMMSS><6 hex chars>`.
///
/// The timestamp is taken once per allocation; only the suffix is redrawn
/// on collision, at most `max_attempts` times.
pub struct PersonIdGenerator {
    store: Arc<dyn IdentityStore>,
    max_attempts: usize,
    timestamp: TimestampFn,
    suffix: SuffixFn,
}

impl PersonIdGenerator {
    pub fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self {
            store,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            timestamp: Box::new(|| chrono::Local::now().format("%Y%m%d%H%M%S").to_string()),
            suffix: Box::new(random_suffix),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Replaces the clock and suffix sources (deterministic ids in tests).
    pub fn with_sources(mut self, timestamp: TimestampFn, suffix: SuffixFn) -> Self {
        self.timestamp = timestamp;
        self.suffix = suffix;
        self
    }

    pub fn generate(&self) -> Result<PersonId, IdAllocationError> {
        let timestamp = (self.timestamp)();
        for attempt in 1..=self.max_attempts {
            let candidate = PersonId::new(format!("P{timestamp}{}", (self.suffix)()));
            if !self.store.contains(&candidate)? {
                return Ok(candidate);
            }
            log::debug!("Person id {candidate} taken (attempt {attempt})");
        }
        Err(IdAllocationError::Exhausted {
            attempts: self.max_attempts,
        })
    }
}

fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..SUFFIX_LEN)
        .map(|_| HEX_DIGITS[rng.gen_range(0..HEX_DIGITS.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::domain::person::Person;
    use crate::identity::infrastructure::in_memory_identity_store::InMemoryIdentityStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn store_with(ids: &[&str]) -> Arc<InMemoryIdentityStore> {
        let store = Arc::new(InMemoryIdentityStore::new());
        for id in ids {
            store
                .create(Person::seeded(PersonId::from(*id), vec![1.0], "x.jpg".into()))
                .unwrap();
        }
        store
    }

    fn fixed_clock() -> TimestampFn {
        Box::new(|| "20240101120000".to_string())
    }

    #[test]
    fn test_id_format() {
        let generator = PersonIdGenerator::new(store_with(&[]));
        let id = generator.generate().unwrap();
        let s = id.as_str();
        assert_eq!(s.len(), 1 + 14 + SUFFIX_LEN);
        assert!(s.starts_with('P'));
        assert!(s[1..15].chars().all(|c| c.is_ascii_digit()));
        assert!(s[15..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_regenerates_suffix_on_collision() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let generator = PersonIdGenerator::new(store_with(&["P20240101120000aaaaaa"]))
            .with_sources(
                fixed_clock(),
                Box::new(move || {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        "aaaaaa".to_string()
                    } else {
                        "bbbbbb".to_string()
                    }
                }),
            );

        let id = generator.generate().unwrap();

        assert_eq!(id.as_str(), "P20240101120000bbbbbb");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_exhausts_after_bounded_attempts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let generator = PersonIdGenerator::new(store_with(&["P20240101120000aaaaaa"]))
            .with_max_attempts(3)
            .with_sources(
                fixed_clock(),
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    "aaaaaa".to_string()
                }),
            );

        let err = generator.generate().unwrap_err();

        assert!(matches!(err, IdAllocationError::Exhausted { attempts: 3 }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_zero_attempts_is_clamped_to_one() {
        let generator = PersonIdGenerator::new(store_with(&[])).with_max_attempts(0);
        assert!(generator.generate().is_ok());
    }
}
