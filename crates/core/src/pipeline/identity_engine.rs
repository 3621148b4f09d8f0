use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::admin::intent_journal::{IntentJournal, JournalError};
use crate::admin::merge_rename_orchestrator::MergeRenameOrchestrator;
use crate::config::FacesortConfig;
use crate::identity::domain::identity_resolver::{IdentityResolver, Resolution, ResolveError};
use crate::identity::domain::identity_store::{IdentityStore, StoreError};
use crate::identity::domain::person::Person;
use crate::identity::domain::person_id_generator::PersonIdGenerator;
use crate::identity::domain::representative_maintainer::RepresentativeMaintainer;
use crate::identity::domain::write_gate::WriteGate;
use crate::identity::infrastructure::json_file_identity_store::JsonFileIdentityStore;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Journal(#[from] JournalError),
}

/// One store, one write gate, and the components that share them.
///
/// Every resolver and orchestrator handed out by an engine serializes its
/// writes through the same gate.
pub struct IdentityEngine {
    store: Arc<dyn IdentityStore>,
    gate: Arc<WriteGate>,
    journal: Arc<IntentJournal>,
    resolver: Arc<IdentityResolver>,
}

impl IdentityEngine {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        journal: Arc<IntentJournal>,
        similarity_threshold: f64,
        max_id_attempts: usize,
    ) -> Self {
        let gate = Arc::new(WriteGate::new());
        let resolver = IdentityResolver::new(
            store.clone(),
            gate.clone(),
            PersonIdGenerator::new(store.clone()).with_max_attempts(max_id_attempts),
            RepresentativeMaintainer::new(store.clone()),
            similarity_threshold,
        );
        Self {
            store,
            gate,
            journal,
            resolver: Arc::new(resolver),
        }
    }

    /// Opens the JSON store and intent journal named by `config`.
    pub fn open(config: &FacesortConfig) -> Result<Self, EngineError> {
        let store = JsonFileIdentityStore::open(&config.store_path)?;
        let journal = IntentJournal::open(&config.journal_path)?;
        log::info!("Using identity store {}", store.path().display());
        Ok(Self::new(
            Arc::new(store),
            Arc::new(journal),
            config.similarity_threshold,
            config.max_id_attempts,
        ))
    }

    pub fn store(&self) -> Arc<dyn IdentityStore> {
        self.store.clone()
    }

    pub fn resolver(&self) -> Arc<IdentityResolver> {
        self.resolver.clone()
    }

    pub fn resolve(&self, embedding: &[f32], image_path: &Path) -> Result<Resolution, ResolveError> {
        self.resolver.resolve(embedding, image_path)
    }

    /// All persons, ordered by id.
    pub fn persons(&self) -> Result<Vec<Person>, StoreError> {
        self.store.scan_all()
    }

    /// Rename/merge orchestrator for the display folders under `base_dir`.
    pub fn orchestrator(&self, base_dir: impl Into<PathBuf>) -> MergeRenameOrchestrator {
        MergeRenameOrchestrator::new(
            self.store.clone(),
            self.gate.clone(),
            self.journal.clone(),
            base_dir,
        )
    }

    pub fn pending_intents(&self) -> usize {
        self.journal.pending().len()
    }
}
