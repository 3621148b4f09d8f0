use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

use crate::shared::constants::is_image_path;

#[derive(Error, Debug)]
pub enum FolderError {
    #[error("folder {} does not exist", .0.display())]
    Missing(PathBuf),
    #[error("folder {} already exists", .0.display())]
    AlreadyExists(PathBuf),
    #[error("invalid display name {0:?}")]
    InvalidName(String),
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> FolderError + '_ {
    move |source| FolderError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Result of folding one display folder into another.
#[derive(Debug, Default, PartialEq)]
pub struct CopyReport {
    /// File names copied into the target (overwriting same-named files).
    pub copied: Vec<String>,
    /// Non-image files left behind and removed with the source folder.
    pub skipped_non_images: usize,
    /// Image files that could not be copied, with the reason.
    pub failed: Vec<(PathBuf, String)>,
    /// The source folder did not exist; nothing was done.
    pub source_missing: bool,
    /// The source folder was deleted after a complete copy.
    pub source_removed: bool,
}

/// Keeps per-person display folders under one base directory.
///
/// A display folder is named after the person's label (or id when
/// unlabeled). This type only touches the filesystem; callers update the
/// identity store and decide what a failure means for the operation.
pub struct FolderSynchronizer {
    base_dir: PathBuf,
}

impl FolderSynchronizer {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Whether `dir` names this synchronizer's base directory.
    pub fn manages(&self, dir: &Path) -> bool {
        dir == self.base_dir || same_entry(dir, &self.base_dir)
    }

    /// Path of the display folder for `display_name`, rejecting names that
    /// would escape the base directory.
    pub fn folder_path(&self, display_name: &str) -> Result<PathBuf, FolderError> {
        validate_display_name(display_name)?;
        Ok(self.base_dir.join(display_name))
    }

    pub fn folder_exists(&self, display_name: &str) -> Result<bool, FolderError> {
        Ok(self.folder_path(display_name)?.is_dir())
    }

    /// Renames `base/old_name` to `base/new_name` in one filesystem rename.
    ///
    /// Fails if the old folder is missing or the new one already exists
    /// (a case-only rename of the same directory is allowed).
    pub fn rename_folder(&self, old_name: &str, new_name: &str) -> Result<(), FolderError> {
        self.check_rename(old_name, new_name)?;
        if old_name == new_name {
            return Ok(());
        }
        let old_path = self.folder_path(old_name)?;
        let new_path = self.folder_path(new_name)?;

        fs::rename(&old_path, &new_path).map_err(io_err(&new_path))?;
        log::info!("Renamed folder '{old_name}' to '{new_name}'");
        Ok(())
    }

    /// Checks that [`rename_folder`](Self::rename_folder) would be allowed,
    /// without touching anything.
    pub fn check_rename(&self, old_name: &str, new_name: &str) -> Result<(), FolderError> {
        let old_path = self.folder_path(old_name)?;
        let new_path = self.folder_path(new_name)?;
        if old_name == new_name {
            return Ok(());
        }
        if !old_path.is_dir() {
            return Err(FolderError::Missing(old_path));
        }
        if new_path.exists() && !same_entry(&old_path, &new_path) {
            return Err(FolderError::AlreadyExists(new_path));
        }
        Ok(())
    }

    /// Copies every image in `base/source_name` into `base/target_name`, then
    /// deletes the source folder.
    ///
    /// Same-named files in the target are overwritten (last copy wins). A
    /// missing source is skipped with a warning. If any image fails to copy
    /// the source folder is kept so nothing is lost.
    pub fn copy_into(
        &self,
        source_name: &str,
        target_name: &str,
    ) -> Result<CopyReport, FolderError> {
        let source_path = self.folder_path(source_name)?;
        let target_path = self.folder_path(target_name)?;
        let mut report = CopyReport::default();

        if !source_path.is_dir() {
            log::warn!(
                "Source folder {} does not exist, skipping",
                source_path.display()
            );
            report.source_missing = true;
            return Ok(report);
        }
        if source_name == target_name || same_entry(&source_path, &target_path) {
            log::info!("Folder '{source_name}' is already the target folder");
            return Ok(report);
        }

        fs::create_dir_all(&target_path).map_err(io_err(&target_path))?;

        for entry in sorted_entries(&source_path)? {
            if !entry.is_file() {
                continue;
            }
            if !is_image_path(&entry) {
                report.skipped_non_images += 1;
                continue;
            }
            let Some(file_name) = entry.file_name() else {
                continue;
            };
            match fs::copy(&entry, target_path.join(file_name)) {
                Ok(_) => {
                    log::debug!("Copied {} into {}", entry.display(), target_path.display());
                    report.copied.push(file_name.to_string_lossy().into_owned());
                }
                Err(e) => {
                    log::warn!("Could not copy {}: {e}", entry.display());
                    report.failed.push((entry.clone(), e.to_string()));
                }
            }
        }

        if !report.failed.is_empty() {
            log::warn!(
                "Kept {} because {} image(s) failed to copy",
                source_path.display(),
                report.failed.len()
            );
            return Ok(report);
        }
        if report.skipped_non_images > 0 {
            log::warn!(
                "Dropping {} non-image file(s) with {}",
                report.skipped_non_images,
                source_path.display()
            );
        }

        fs::remove_dir_all(&source_path).map_err(io_err(&source_path))?;
        report.source_removed = true;
        log::info!(
            "Merged {} file(s) from '{source_name}' into '{target_name}'",
            report.copied.len()
        );
        Ok(report)
    }

    /// Copies a photo into the display folder `display_name`, creating it if needed.
    ///
    /// Returns the destination path. Copying a file onto itself is a no-op.
    pub fn file_into(&self, display_name: &str, photo: &Path) -> Result<PathBuf, FolderError> {
        let folder = self.folder_path(display_name)?;
        let file_name = photo
            .file_name()
            .ok_or_else(|| FolderError::InvalidName(photo.display().to_string()))?;
        fs::create_dir_all(&folder).map_err(io_err(&folder))?;

        let dest = folder.join(file_name);
        if dest.exists() && same_entry(photo, &dest) {
            return Ok(dest);
        }
        fs::copy(photo, &dest).map_err(io_err(&dest))?;
        log::debug!("Copied {} to {}", photo.display(), folder.display());
        Ok(dest)
    }

    /// File names of the images currently in a display folder, sorted.
    pub fn list_images(&self, display_name: &str) -> Result<Vec<String>, FolderError> {
        let folder = self.folder_path(display_name)?;
        if !folder.is_dir() {
            return Err(FolderError::Missing(folder));
        }
        Ok(sorted_entries(&folder)?
            .into_iter()
            .filter(|p| p.is_file() && is_image_path(p))
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect())
    }
}

/// A display name must be exactly one normal path component.
pub fn validate_display_name(name: &str) -> Result<(), FolderError> {
    let invalid = || FolderError::InvalidName(name.to_string());
    if name.trim().is_empty() || name.contains('\0') || name.contains(['/', '\\']) {
        return Err(invalid());
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(invalid()),
    }
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, FolderError> {
    let mut entries = fs::read_dir(dir)
        .map_err(io_err(dir))?
        .map(|e| e.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_err(dir))?;
    entries.sort();
    Ok(entries)
}

fn same_entry(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn setup() -> (TempDir, FolderSynchronizer) {
        let tmp = TempDir::new().unwrap();
        let sync = FolderSynchronizer::new(tmp.path());
        (tmp, sync)
    }

    fn write_files(dir: &Path, names: &[&str]) {
        fs::create_dir_all(dir).unwrap();
        for name in names {
            fs::write(dir.join(name), name.as_bytes()).unwrap();
        }
    }

    #[test]
    fn test_rename_moves_folder_with_contents() {
        let (tmp, sync) = setup();
        write_files(&tmp.path().join("P1"), &["a.jpg", "b.png"]);

        sync.rename_folder("P1", "Alice").unwrap();

        assert!(!tmp.path().join("P1").exists());
        assert_eq!(sync.list_images("Alice").unwrap(), vec!["a.jpg", "b.png"]);
    }

    #[test]
    fn test_rename_missing_folder_fails() {
        let (_tmp, sync) = setup();
        let err = sync.rename_folder("P1", "Alice").unwrap_err();
        assert!(matches!(err, FolderError::Missing(_)));
    }

    #[test]
    fn test_rename_onto_existing_folder_fails() {
        let (tmp, sync) = setup();
        write_files(&tmp.path().join("P1"), &["a.jpg"]);
        write_files(&tmp.path().join("Alice"), &["z.jpg"]);

        let err = sync.rename_folder("P1", "Alice").unwrap_err();

        assert!(matches!(err, FolderError::AlreadyExists(_)));
        assert_eq!(sync.list_images("P1").unwrap(), vec!["a.jpg"]);
    }

    #[test]
    fn test_rename_to_same_name_is_noop() {
        let (tmp, sync) = setup();
        write_files(&tmp.path().join("Alice"), &["a.jpg"]);
        sync.rename_folder("Alice", "Alice").unwrap();
        assert!(tmp.path().join("Alice").is_dir());
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case(".")]
    #[case("..")]
    #[case("a/b")]
    #[case("a\\b")]
    #[case("nul\0byte")]
    fn test_invalid_display_names(#[case] name: &str) {
        assert!(matches!(
            validate_display_name(name),
            Err(FolderError::InvalidName(_))
        ));
    }

    #[test]
    fn test_copy_into_merges_images_and_removes_source() {
        let (tmp, sync) = setup();
        write_files(&tmp.path().join("Bob"), &["a.jpg", "notes.txt"]);
        write_files(&tmp.path().join("Alice"), &["c.jpg"]);

        let report = sync.copy_into("Bob", "Alice").unwrap();

        assert_eq!(report.copied, vec!["a.jpg"]);
        assert_eq!(report.skipped_non_images, 1);
        assert!(report.source_removed);
        assert!(!tmp.path().join("Bob").exists());
        assert_eq!(sync.list_images("Alice").unwrap(), vec!["a.jpg", "c.jpg"]);
    }

    #[test]
    fn test_copy_into_overwrites_on_collision() {
        let (tmp, sync) = setup();
        fs::create_dir_all(tmp.path().join("Bob")).unwrap();
        fs::create_dir_all(tmp.path().join("Alice")).unwrap();
        fs::write(tmp.path().join("Bob").join("same.jpg"), b"from bob").unwrap();
        fs::write(tmp.path().join("Alice").join("same.jpg"), b"from alice").unwrap();

        sync.copy_into("Bob", "Alice").unwrap();

        let content = fs::read(tmp.path().join("Alice").join("same.jpg")).unwrap();
        assert_eq!(content, b"from bob");
    }

    #[test]
    fn test_copy_into_creates_missing_target() {
        let (tmp, sync) = setup();
        write_files(&tmp.path().join("P2"), &["x.jpeg"]);

        sync.copy_into("P2", "P1").unwrap();

        assert_eq!(sync.list_images("P1").unwrap(), vec!["x.jpeg"]);
    }

    #[test]
    fn test_copy_into_missing_source_is_skipped() {
        let (_tmp, sync) = setup();
        let report = sync.copy_into("ghost", "Alice").unwrap();
        assert!(report.source_missing);
        assert!(!report.source_removed);
    }

    #[test]
    fn test_copy_into_same_folder_keeps_files() {
        let (tmp, sync) = setup();
        write_files(&tmp.path().join("Alice"), &["a.jpg"]);

        let report = sync.copy_into("Alice", "Alice").unwrap();

        assert!(!report.source_removed);
        assert_eq!(sync.list_images("Alice").unwrap(), vec!["a.jpg"]);
    }

    #[test]
    fn test_file_into_creates_folder_and_copies() {
        let (tmp, sync) = setup();
        let photo = tmp.path().join("input.jpg");
        fs::write(&photo, b"pixels").unwrap();

        let dest = sync.file_into("P1", &photo).unwrap();

        assert_eq!(dest, tmp.path().join("P1").join("input.jpg"));
        assert_eq!(fs::read(dest).unwrap(), b"pixels");
        assert!(photo.exists());
    }

    #[test]
    fn test_file_into_missing_photo_is_io_error() {
        let (tmp, sync) = setup();
        let err = sync.file_into("P1", &tmp.path().join("nope.jpg")).unwrap_err();
        assert!(matches!(err, FolderError::Io { .. }));
    }
}
