// The resume marker for an in-flight apply pass.
//
// The marker is written *before* each file operation, so after a crash it
// names the operation that may or may not have happened. Every operation the
// applier performs is safe to repeat, so resuming simply re-attempts it.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use super::disk_io;
use crate::file_errors::{FileOperation, IoResultExt};
use crate::manifest::OperationClass;
use crate::updater::UpdateError;
use crate::version::VersionKey;

/// Name of the marker file inside the installed tree.
pub const PROGRESS_FILE_NAME: &str = "update_file";

/// Where an apply pass got to. `last_index` is the index (within the
/// `operation` list) of the next entry to process, not the last one finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateProgress {
    pub old_version: VersionKey,
    pub new_version: VersionKey,
    pub operation: OperationClass,
    pub last_index: usize,
}

impl UpdateProgress {
    /// Whether the entry `index` of `class` was already handled by the run
    /// that wrote this marker.
    pub fn already_applied(&self, class: OperationClass, index: usize) -> bool {
        class < self.operation || (class == self.operation && index < self.last_index)
    }

    pub fn is_for(&self, old_version: &VersionKey, new_version: &VersionKey) -> bool {
        &self.old_version == old_version && &self.new_version == new_version
    }
}

/// Reads and writes the marker for one installed tree.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    marker_path: PathBuf,
}

impl ProgressTracker {
    pub fn for_tree(tree: &Path) -> Self {
        Self {
            marker_path: tree.join(PROGRESS_FILE_NAME),
        }
    }

    /// Whether an apply pass was interrupted. Cheaper than `load` and does not
    /// care whether the marker is readable.
    pub fn is_in_flight(&self) -> bool {
        self.marker_path.exists()
    }

    /// Returns the marker if one exists. A marker that exists but can't be
    /// read is an error rather than `None`: its presence alone means the tree
    /// is half-updated.
    pub fn load(&self) -> anyhow::Result<Option<UpdateProgress>> {
        if !self.marker_path.exists() {
            return Ok(None);
        }
        let progress = disk_io::read(&self.marker_path).with_context(|| {
            UpdateError::InvalidState(format!(
                "An update was interrupted but its progress file {} is unreadable. \
                Reinstall to repair the installation.",
                self.marker_path.display()
            ))
        })?;
        Ok(Some(progress))
    }

    pub fn save(&self, progress: &UpdateProgress) -> anyhow::Result<()> {
        disk_io::write(progress, &self.marker_path)
    }

    pub fn clear(&self) -> anyhow::Result<()> {
        match std::fs::remove_file(&self.marker_path) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            result => result.with_file_context(FileOperation::DeleteFile, &self.marker_path),
        }
    }
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::{ProgressTracker, UpdateProgress, PROGRESS_FILE_NAME};
    use crate::manifest::OperationClass;
    use crate::version::VersionKey;
    use crate::UpdateError;

    fn progress(operation: OperationClass, last_index: usize) -> UpdateProgress {
        UpdateProgress {
            old_version: VersionKey::new(0, 7, 0).with_hotfix(true),
            new_version: VersionKey::new(0, 7, 1),
            operation,
            last_index,
        }
    }

    #[test]
    fn load_returns_none_without_marker() {
        let tmp_dir = TempDir::new("progress").unwrap();
        let tracker = ProgressTracker::for_tree(tmp_dir.path());
        assert!(!tracker.is_in_flight());
        assert_eq!(tracker.load().unwrap(), None);
    }

    #[test]
    fn save_then_load_round_trips() {
        let tmp_dir = TempDir::new("progress").unwrap();
        let tracker = ProgressTracker::for_tree(tmp_dir.path());
        tracker.save(&progress(OperationClass::Remove, 3)).unwrap();
        assert!(tracker.is_in_flight());
        assert_eq!(
            tracker.load().unwrap(),
            Some(progress(OperationClass::Remove, 3))
        );

        // Later saves overwrite.
        tracker.save(&progress(OperationClass::Add, 0)).unwrap();
        assert_eq!(tracker.load().unwrap(), Some(progress(OperationClass::Add, 0)));
    }

    #[test]
    fn clear_removes_marker_and_tolerates_absence() {
        let tmp_dir = TempDir::new("progress").unwrap();
        let tracker = ProgressTracker::for_tree(tmp_dir.path());
        tracker.save(&progress(OperationClass::Modify, 0)).unwrap();
        tracker.clear().unwrap();
        assert!(!tmp_dir.path().join(PROGRESS_FILE_NAME).exists());
        tracker.clear().unwrap();
    }

    #[test]
    fn unreadable_marker_is_invalid_state() {
        let tmp_dir = TempDir::new("progress").unwrap();
        std::fs::write(tmp_dir.path().join(PROGRESS_FILE_NAME), [0u8, 72, 0, 73]).unwrap();
        let tracker = ProgressTracker::for_tree(tmp_dir.path());
        assert!(tracker.is_in_flight());
        let err = tracker.load().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<UpdateError>(),
            Some(UpdateError::InvalidState(_))
        ));
    }

    #[test]
    fn already_applied_respects_class_order() {
        let marker = progress(OperationClass::Remove, 2);
        assert!(marker.already_applied(OperationClass::Modify, 100));
        assert!(marker.already_applied(OperationClass::Remove, 1));
        assert!(!marker.already_applied(OperationClass::Remove, 2));
        assert!(!marker.already_applied(OperationClass::Add, 0));
    }
}
