use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::admin::admin_intent::AdminIntent;
use crate::admin::intent_journal::{IntentJournal, JournalEntry, JournalError};
use crate::folders::folder_synchronizer::{validate_display_name, FolderError, FolderSynchronizer};
use crate::identity::domain::identity_store::{IdentityStore, PersonUpdate, StoreError};
use crate::identity::domain::person::{Person, PersonId};
use crate::identity::domain::representative_maintainer::{MaintainerError, RepresentativeMaintainer};
use crate::identity::domain::write_gate::WriteGate;

/// Failures that stop an administrative operation midway.
///
/// Everything the caller can act on without aborting the session is an
/// outcome variant instead.
#[derive(Error, Debug)]
pub enum AdminError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Journal(#[from] JournalError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenameRejection {
    PersonNotFound(PersonId),
    InvalidName(String),
    FolderMissing(PathBuf),
    FolderExists(PathBuf),
    /// Earlier operations on this output directory could not be completed.
    PendingIntents(Vec<String>),
}

impl std::fmt::Display for RenameRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RenameRejection::PersonNotFound(id) => write!(f, "person {id} not found"),
            RenameRejection::InvalidName(name) => write!(f, "invalid name {name:?}"),
            RenameRejection::FolderMissing(p) => write!(f, "folder {} does not exist", p.display()),
            RenameRejection::FolderExists(p) => write!(f, "folder {} already exists", p.display()),
            RenameRejection::PendingIntents(pending) => {
                write!(f, "unfinished operations pending: {}", pending.join("; "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenameOutcome {
    /// Label and folder both updated.
    Renamed {
        previous_name: String,
        new_name: String,
    },
    /// Label updated, folder rename failed. The intent stays pending so
    /// recovery can finish the folder step.
    RecordOnly {
        previous_name: String,
        new_name: String,
        error: String,
    },
    /// Nothing was changed.
    Rejected(RenameRejection),
}

#[derive(Debug, Clone, PartialEq)]
pub enum MergeRejection {
    TargetNotFound(PersonId),
    TargetInSources(PersonId),
    NoSources,
    DimensionMismatch {
        person_id: PersonId,
        expected: usize,
        actual: usize,
    },
    PendingIntents(Vec<String>),
}

impl std::fmt::Display for MergeRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeRejection::TargetNotFound(id) => write!(f, "target {id} not found"),
            MergeRejection::TargetInSources(id) => {
                write!(f, "target {id} is also listed as a source")
            }
            MergeRejection::NoSources => write!(f, "no source persons given"),
            MergeRejection::DimensionMismatch {
                person_id,
                expected,
                actual,
            } => write!(
                f,
                "{person_id} has {actual}-d embeddings, target has {expected}-d"
            ),
            MergeRejection::PendingIntents(pending) => {
                write!(f, "unfinished operations pending: {}", pending.join("; "))
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeReport {
    /// Sources whose records were absorbed, in request order.
    pub merged: Vec<PersonId>,
    /// Requested sources with no record in the store.
    pub missing_records: Vec<PersonId>,
    /// Source display folders that did not exist.
    pub missing_folders: Vec<String>,
    /// Files that could not be moved; their source folders were kept.
    pub folder_failures: Vec<(PathBuf, String)>,
    pub files_copied: usize,
    /// Target evidence count after the merge.
    pub evidence_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    Merged(MergeReport),
    Rejected(MergeRejection),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecoveryReport {
    /// Intents completed and cleared.
    pub replayed: Vec<String>,
    /// Intents whose folder step still fails; left pending.
    pub still_pending: Vec<String>,
    /// Intents recorded against another output directory; left pending.
    pub other_base_dir: usize,
}

/// Runs rename and merge across the identity store and the display folders.
///
/// Both operations hold the write gate for their whole duration and are
/// bracketed by an [`IntentJournal`] entry, so an interrupted operation can
/// be completed by [`recover`](Self::recover).
pub struct MergeRenameOrchestrator {
    store: Arc<dyn IdentityStore>,
    gate: Arc<WriteGate>,
    maintainer: RepresentativeMaintainer,
    journal: Arc<IntentJournal>,
    folders: FolderSynchronizer,
}

impl MergeRenameOrchestrator {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        gate: Arc<WriteGate>,
        journal: Arc<IntentJournal>,
        base_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            maintainer: RepresentativeMaintainer::new(store.clone()),
            store,
            gate,
            journal,
            folders: FolderSynchronizer::new(base_dir),
        }
    }

    pub fn folders(&self) -> &FolderSynchronizer {
        &self.folders
    }

    /// Sets the person's label to `new_name` and renames their display folder.
    ///
    /// Interrupted operations for this output directory are completed
    /// first; if any cannot be, the rename is rejected. The store is updated
    /// before the folder, and a folder failure after that point is reported
    /// as [`RenameOutcome::RecordOnly`].
    pub fn rename(&self, person_id: &PersonId, new_name: &str) -> Result<RenameOutcome, AdminError> {
        let _guard = self.gate.enter();

        let leftover = self.replay_pending()?;
        if !leftover.still_pending.is_empty() {
            return Ok(RenameOutcome::Rejected(RenameRejection::PendingIntents(
                leftover.still_pending,
            )));
        }
        let Some(person) = self.store.get(person_id)? else {
            return Ok(RenameOutcome::Rejected(RenameRejection::PersonNotFound(
                person_id.clone(),
            )));
        };
        let new_name = new_name.trim();
        if validate_display_name(new_name).is_err() {
            return Ok(RenameOutcome::Rejected(RenameRejection::InvalidName(
                new_name.to_string(),
            )));
        }
        let previous_name = person.display_name().to_string();
        if let Err(e) = self.folders.check_rename(&previous_name, new_name) {
            return Ok(RenameOutcome::Rejected(match e {
                FolderError::Missing(p) => RenameRejection::FolderMissing(p),
                FolderError::AlreadyExists(p) => RenameRejection::FolderExists(p),
                other => RenameRejection::InvalidName(other.to_string()),
            }));
        }

        let intent_id = self.journal.record(
            self.folders.base_dir(),
            AdminIntent::Rename {
                person_id: person_id.clone(),
                previous_label: person.name_label.clone(),
                previous_folder: previous_name.clone(),
                new_name: new_name.to_string(),
            },
        )?;

        if let Err(e) = self
            .store
            .set_fields(person_id, PersonUpdate::name_label(Some(new_name.to_string())))
        {
            self.abandon(intent_id);
            return Err(e.into());
        }

        match self.folders.rename_folder(&previous_name, new_name) {
            Ok(()) => {
                self.journal.clear(intent_id)?;
                log::info!("Renamed {person_id} from '{previous_name}' to '{new_name}'");
                Ok(RenameOutcome::Renamed {
                    previous_name,
                    new_name: new_name.to_string(),
                })
            }
            Err(e) => {
                log::warn!("Label of {person_id} is now '{new_name}' but its folder was not renamed: {e}");
                Ok(RenameOutcome::RecordOnly {
                    previous_name,
                    new_name: new_name.to_string(),
                    error: e.to_string(),
                })
            }
        }
    }

    /// Folds `source_ids` into `target_id`.
    ///
    /// Source folders are copied into the target folder and deleted, then
    /// the sources' evidence is appended to the target in request order,
    /// the source records are deleted and the representative recomputed.
    /// Sources without a record or folder are skipped and reported.
    /// Interrupted operations for this output directory are completed
    /// first, as in [`rename`](Self::rename).
    pub fn merge(
        &self,
        target_id: &PersonId,
        source_ids: &[PersonId],
    ) -> Result<MergeOutcome, AdminError> {
        if source_ids.contains(target_id) {
            return Ok(MergeOutcome::Rejected(MergeRejection::TargetInSources(
                target_id.clone(),
            )));
        }
        let mut requested: Vec<PersonId> = Vec::with_capacity(source_ids.len());
        for id in source_ids {
            if !requested.contains(id) {
                requested.push(id.clone());
            }
        }
        if requested.is_empty() {
            return Ok(MergeOutcome::Rejected(MergeRejection::NoSources));
        }

        let _guard = self.gate.enter();

        let leftover = self.replay_pending()?;
        if !leftover.still_pending.is_empty() {
            return Ok(MergeOutcome::Rejected(MergeRejection::PendingIntents(
                leftover.still_pending,
            )));
        }

        let Some(target) = self.store.get(target_id)? else {
            return Ok(MergeOutcome::Rejected(MergeRejection::TargetNotFound(
                target_id.clone(),
            )));
        };

        let mut report = MergeReport::default();
        let mut sources: Vec<Person> = Vec::new();
        for id in requested {
            match self.store.get(&id)? {
                Some(source) if source.dimension() != target.dimension() => {
                    return Ok(MergeOutcome::Rejected(MergeRejection::DimensionMismatch {
                        person_id: id,
                        expected: target.dimension(),
                        actual: source.dimension(),
                    }));
                }
                Some(source) => sources.push(source),
                None => {
                    log::warn!("Merge source {id} not found, skipping");
                    report.missing_records.push(id);
                }
            }
        }
        if sources.is_empty() {
            report.evidence_count = target.evidence_count();
            return Ok(MergeOutcome::Merged(report));
        }

        let target_folder = target.display_name().to_string();
        let source_ids: Vec<PersonId> = sources.iter().map(|p| p.person_id.clone()).collect();
        let source_folders: Vec<String> =
            sources.iter().map(|p| p.display_name().to_string()).collect();

        let intent_id = self.journal.record(
            self.folders.base_dir(),
            AdminIntent::Merge {
                target_id: target_id.clone(),
                source_ids: source_ids.clone(),
                target_folder: target_folder.clone(),
                source_folders: source_folders.clone(),
                target_evidence_len: target.evidence_count(),
            },
        )?;

        self.merge_folders(&target_folder, &source_folders, &mut report);
        report.evidence_count = self.absorb(target_id, &source_ids, target.evidence_count())?;
        report.merged = source_ids;
        self.journal.clear(intent_id)?;

        log::info!(
            "Merged {} person(s) into {target_id}; it now has {} embeddings",
            report.merged.len(),
            report.evidence_count
        );
        Ok(MergeOutcome::Merged(report))
    }

    /// Completes every interrupted operation recorded for this output directory.
    pub fn recover(&self) -> Result<RecoveryReport, AdminError> {
        let _guard = self.gate.enter();
        self.replay_pending()
    }

    /// Caller holds the write gate.
    fn replay_pending(&self) -> Result<RecoveryReport, AdminError> {
        let mut report = RecoveryReport::default();

        for entry in self.journal.pending() {
            if !self.folders.manages(&entry.base_dir) {
                log::warn!(
                    "Intent {} belongs to {}, leaving it pending",
                    entry.id,
                    entry.base_dir.display()
                );
                report.other_base_dir += 1;
                continue;
            }
            let description = entry.intent.describe();
            log::info!("Replaying interrupted {description}");
            if self.replay(&entry)? {
                self.journal.clear(entry.id)?;
                report.replayed.push(description);
            } else {
                report.still_pending.push(description);
            }
        }
        Ok(report)
    }

    /// Returns whether the intent is now complete.
    fn replay(&self, entry: &JournalEntry) -> Result<bool, AdminError> {
        match &entry.intent {
            AdminIntent::Rename {
                person_id,
                previous_folder,
                new_name,
                ..
            } => {
                let Some(person) = self.store.get(person_id)? else {
                    log::warn!("Person {person_id} no longer exists, dropping rename");
                    return Ok(true);
                };
                if person.name_label.as_deref() != Some(new_name.as_str()) {
                    self.store
                        .set_fields(person_id, PersonUpdate::name_label(Some(new_name.clone())))?;
                }
                let old_present = matches!(self.folders.folder_exists(previous_folder), Ok(true));
                if previous_folder == new_name || !old_present {
                    return Ok(true);
                }
                match self.folders.rename_folder(previous_folder, new_name) {
                    Ok(()) => Ok(true),
                    Err(e) => {
                        log::warn!("Folder for {person_id} still cannot be renamed: {e}");
                        Ok(false)
                    }
                }
            }
            AdminIntent::Merge {
                target_id,
                source_ids,
                target_folder,
                source_folders,
                target_evidence_len,
            } => {
                if self.store.get(target_id)?.is_none() {
                    log::warn!("Merge target {target_id} no longer exists, dropping merge");
                    return Ok(true);
                }
                let mut report = MergeReport::default();
                self.merge_folders(target_folder, source_folders, &mut report);
                self.absorb(target_id, source_ids, *target_evidence_len)?;
                Ok(true)
            }
        }
    }

    /// Journal entry is dropped after a failure that left nothing to replay.
    fn abandon(&self, intent_id: u64) {
        if let Err(e) = self.journal.clear(intent_id) {
            log::warn!("Could not clear intent {intent_id}: {e}");
        }
    }

    fn merge_folders(&self, target_folder: &str, source_folders: &[String], report: &mut MergeReport) {
        for source_folder in source_folders {
            match self.folders.copy_into(source_folder, target_folder) {
                Ok(copy) => {
                    if copy.source_missing {
                        report.missing_folders.push(source_folder.clone());
                    }
                    report.files_copied += copy.copied.len();
                    report.folder_failures.extend(copy.failed);
                }
                Err(e) => {
                    log::warn!("Could not merge folder '{source_folder}': {e}");
                    report
                        .folder_failures
                        .push((self.folders.base_dir().join(source_folder), e.to_string()));
                }
            }
        }
    }

    /// Store half of a merge. Safe to run again after an interruption.
    ///
    /// The target record is written before the sources are deleted. A
    /// source is only deleted once the target holds its evidence: either
    /// the target already carries the sources' evidence at
    /// `target_evidence_len`, or it is appended now.
    fn absorb(
        &self,
        target_id: &PersonId,
        source_ids: &[PersonId],
        target_evidence_len: usize,
    ) -> Result<usize, AdminError> {
        let target = self
            .store
            .get(target_id)?
            .ok_or_else(|| StoreError::NotFound(target_id.clone()))?;

        let mut remaining = Vec::new();
        for id in source_ids {
            if let Some(source) = self.store.get(id)? {
                remaining.push(source);
            }
        }

        let mut evidence_count = target.evidence_count();
        if !remaining.is_empty() && !holds_evidence_at(&target, target_evidence_len, &remaining) {
            if target.evidence_count() != target_evidence_len {
                log::warn!(
                    "{target_id} changed since the merge was recorded, appending sources to its current evidence"
                );
            }
            let mut embeddings = target.embeddings;
            let mut paths = target.representative_image_paths;
            for source in &remaining {
                embeddings.extend(source.embeddings.iter().cloned());
                paths.extend(source.representative_image_paths.iter().cloned());
            }
            evidence_count = embeddings.len();
            self.store
                .set_fields(target_id, PersonUpdate::evidence(embeddings, paths))?;
        }

        let ids: Vec<PersonId> = remaining.into_iter().map(|p| p.person_id).collect();
        self.store.delete_many(&ids)?;

        match self.maintainer.recompute(target_id) {
            Ok(_) => {}
            Err(MaintainerError::Computation { source, .. }) => {
                log::warn!("Kept previous representative for {target_id}: {source}");
            }
            Err(MaintainerError::Store(e)) => return Err(e.into()),
        }
        Ok(evidence_count)
    }
}

/// Whether `target` carries the evidence of `sources`, in order, starting at `offset`.
fn holds_evidence_at(target: &Person, offset: usize, sources: &[Person]) -> bool {
    let mut at = offset;
    for source in sources {
        let end = at + source.evidence_count();
        if target.embeddings.get(at..end) != Some(source.embeddings.as_slice())
            || target.representative_image_paths.get(at..end)
                != Some(source.representative_image_paths.as_slice())
        {
            return false;
        }
        at = end;
    }
    true
}
