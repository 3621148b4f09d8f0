use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::detection::domain::face_detector::FaceDetector;
use crate::folders::folder_synchronizer::FolderSynchronizer;
use crate::identity::domain::embedding::Embedding;
use crate::identity::domain::embedding_provider::EmbeddingProvider;
use crate::identity::domain::identity_resolver::{IdentityResolver, ResolveError};
use crate::identity::domain::identity_store::{IdentityStore, StoreError};
use crate::identity::domain::person::PersonId;
use crate::media::domain::image_reader::ImageReader;
use crate::shared::constants::{is_image_path, ERRORS_DIR, NO_FACES_DIR, UNRECOGNIZED_DIR};
use crate::shared::face_box::FaceBox;
use crate::shared::frame::Frame;

/// Default fraction of the face size added on every side before embedding.
pub const DEFAULT_FACE_PADDING: f64 = 0.2;

pub type ProgressFn = Box<dyn Fn(usize, usize) -> bool + Send>;

#[derive(Error, Debug)]
pub enum OrganizeError {
    #[error("input directory {} does not exist", .0.display())]
    InputMissing(PathBuf),
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrganizeStats {
    /// Supported image files found in the input directory.
    pub total_files: usize,
    /// Photos filed under at least one person.
    pub processed_files: usize,
    pub no_faces: usize,
    pub errors: usize,
    pub faces_detected: usize,
    /// Faces that could not be embedded or resolved.
    pub unrecognized_faces: usize,
    pub new_persons: usize,
    pub matched_faces: usize,
}

/// What happened to a single photo.
enum PhotoOutcome {
    Unreadable,
    NoFaces,
    Resolved(BTreeSet<PersonId>),
}

/// Sorts the photos of one directory into per-person display folders.
///
/// Every detected face is embedded and resolved against the identity store;
/// the photo is then copied into the folder of each distinct person found in
/// it. Photos that cannot be decoded, contain no faces, or contain only
/// unrecognizable faces go to `_errors`, `_no_faces` and `_unrecognized`.
pub struct OrganizePhotosUseCase {
    reader: Box<dyn ImageReader>,
    detector: Box<dyn FaceDetector>,
    embedder: Box<dyn EmbeddingProvider>,
    resolver: Arc<IdentityResolver>,
    store: Arc<dyn IdentityStore>,
    face_padding: f64,
    on_progress: Option<ProgressFn>,
}

impl OrganizePhotosUseCase {
    pub fn new(
        reader: Box<dyn ImageReader>,
        detector: Box<dyn FaceDetector>,
        embedder: Box<dyn EmbeddingProvider>,
        resolver: Arc<IdentityResolver>,
        store: Arc<dyn IdentityStore>,
        face_padding: f64,
        on_progress: Option<ProgressFn>,
    ) -> Self {
        Self {
            reader,
            detector,
            embedder,
            resolver,
            store,
            face_padding,
            on_progress,
        }
    }

    /// Processes every supported photo directly inside `input_dir`, in file
    /// name order, copying results under `output_dir`.
    ///
    /// Store failures abort the run; per-photo failures are counted.
    pub fn execute(
        &mut self,
        input_dir: &Path,
        output_dir: &Path,
    ) -> Result<OrganizeStats, OrganizeError> {
        if !input_dir.is_dir() {
            return Err(OrganizeError::InputMissing(input_dir.to_path_buf()));
        }
        fs::create_dir_all(output_dir).map_err(|source| OrganizeError::Io {
            path: output_dir.to_path_buf(),
            source,
        })?;

        let photos = list_photos(input_dir)?;
        let folders = FolderSynchronizer::new(output_dir);
        let mut stats = OrganizeStats {
            total_files: photos.len(),
            ..OrganizeStats::default()
        };
        log::info!("Organizing {} photo(s) from {}", photos.len(), input_dir.display());

        for (i, photo) in photos.iter().enumerate() {
            match self.process_photo(photo, &mut stats)? {
                PhotoOutcome::Unreadable => {
                    stats.errors += 1;
                    file_photo(&folders, ERRORS_DIR, photo);
                }
                PhotoOutcome::NoFaces => {
                    log::info!("No faces in {}", photo.display());
                    stats.no_faces += 1;
                    file_photo(&folders, NO_FACES_DIR, photo);
                }
                PhotoOutcome::Resolved(persons) if persons.is_empty() => {
                    log::info!("No recognizable faces in {}", photo.display());
                    file_photo(&folders, UNRECOGNIZED_DIR, photo);
                }
                PhotoOutcome::Resolved(persons) => {
                    let mut filed = false;
                    for person_id in &persons {
                        let folder = self.display_name(person_id)?;
                        filed |= file_photo(&folders, &folder, photo);
                    }
                    if filed {
                        stats.processed_files += 1;
                    }
                }
            }
            self.report_progress(i + 1, photos.len())?;
        }

        log::info!(
            "Organized {}/{} photo(s): {} new, {} matched, {} without faces, {} errors",
            stats.processed_files,
            stats.total_files,
            stats.new_persons,
            stats.matched_faces,
            stats.no_faces,
            stats.errors
        );
        Ok(stats)
    }

    fn process_photo(
        &mut self,
        photo: &Path,
        stats: &mut OrganizeStats,
    ) -> Result<PhotoOutcome, OrganizeError> {
        let frame = match self.reader.read(photo) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("Could not read {}: {e}", photo.display());
                return Ok(PhotoOutcome::Unreadable);
            }
        };
        let boxes = match self.detector.detect(&frame) {
            Ok(boxes) => boxes,
            Err(e) => {
                log::warn!("Face detection failed on {}: {e}", photo.display());
                return Ok(PhotoOutcome::Unreadable);
            }
        };
        if boxes.is_empty() {
            return Ok(PhotoOutcome::NoFaces);
        }

        let mut persons = BTreeSet::new();
        for face in &boxes {
            stats.faces_detected += 1;
            let Some(embedding) = self.embed_face(&frame, face, photo) else {
                stats.unrecognized_faces += 1;
                continue;
            };
            match self.resolver.resolve(&embedding, photo) {
                Ok(resolution) => {
                    if resolution.is_new_person() {
                        stats.new_persons += 1;
                    } else {
                        stats.matched_faces += 1;
                    }
                    persons.insert(resolution.person_id().clone());
                }
                Err(e @ (ResolveError::InvalidEmbedding(_) | ResolveError::DimensionMismatch { .. })) => {
                    log::warn!("Skipping a face in {}: {e}", photo.display());
                    stats.unrecognized_faces += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(PhotoOutcome::Resolved(persons))
    }

    fn embed_face(
        &self,
        frame: &Frame,
        face: &FaceBox,
        photo: &Path,
    ) -> Option<Embedding> {
        let padded = face.padded(self.face_padding, frame.width(), frame.height());
        let crop = frame.crop(&padded)?;
        match self.embedder.embed(&crop) {
            Ok(embedding) => Some(embedding),
            Err(e) => {
                log::warn!("Could not embed a face in {}: {e}", photo.display());
                None
            }
        }
    }

    fn display_name(&self, person_id: &PersonId) -> Result<String, OrganizeError> {
        Ok(self
            .store
            .get(person_id)?
            .map(|p| p.display_name().to_string())
            .unwrap_or_else(|| person_id.to_string()))
    }

    fn report_progress(&self, current: usize, total: usize) -> Result<(), OrganizeError> {
        if let Some(ref callback) = self.on_progress {
            if !callback(current, total) {
                return Err(OrganizeError::Cancelled);
            }
        }
        Ok(())
    }
}

/// Supported photos directly inside `dir`, sorted by file name.
fn list_photos(dir: &Path) -> Result<Vec<PathBuf>, OrganizeError> {
    let io_err = |source| OrganizeError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut photos = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if !path.is_file() {
            continue;
        }
        if is_image_path(&path) {
            photos.push(path);
        } else {
            log::debug!("Skipping unsupported file {}", path.display());
        }
    }
    photos.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(photos)
}

fn file_photo(folders: &FolderSynchronizer, folder: &str, photo: &Path) -> bool {
    match folders.file_into(folder, photo) {
        Ok(dest) => {
            log::debug!("Filed {} as {}", photo.display(), dest.display());
            true
        }
        Err(e) => {
            log::warn!("Could not file {} under '{folder}': {e}", photo.display());
            false
        }
    }
}
