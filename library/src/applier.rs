// This file's job is to turn a DiffManifest into changes on the installed
// tree, one file at a time, in a way that can be picked up again after a
// crash.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::bail;

use crate::file_errors::{FileOperation, IoResultExt};
use crate::manifest::{DiffManifest, OperationClass};
use crate::state::{ProgressTracker, UpdateProgress};
use crate::updater::UpdateError;
use crate::version::VersionKey;

/// The filesystem mutations the applier performs. Both must be idempotent:
/// repeating a call after it already succeeded leaves the tree unchanged.
#[cfg_attr(test, mockall::automock)]
pub trait TreeOps {
    /// Replaces `dest` with a copy of `source`, creating missing parent
    /// directories. Overwrites `dest` if it exists.
    fn copy_over(&self, source: &Path, dest: &Path) -> anyhow::Result<()>;

    /// Deletes `dest`. A missing file is not an error.
    fn remove_if_present(&self, dest: &Path) -> anyhow::Result<()>;
}

/// TreeOps on the real filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskTreeOps;

impl TreeOps for DiskTreeOps {
    fn copy_over(&self, source: &Path, dest: &Path) -> anyhow::Result<()> {
        let parent = match dest.parent() {
            Some(parent) => parent,
            None => bail!(UpdateError::InvalidArgument(
                "dest".to_string(),
                dest.display().to_string()
            )),
        };
        fs::create_dir_all(parent).with_file_context(FileOperation::CreateDir, parent)?;

        let mut input = File::open(source).with_file_context(FileOperation::CopyFile, source)?;
        // Copy next to the destination and rename over it, so an interrupted
        // copy never leaves a truncated file at `dest`.
        let mut temp = tempfile::NamedTempFile::new_in(parent)
            .with_file_context(FileOperation::CreateFile, parent)?;
        std::io::copy(&mut input, temp.as_file_mut())
            .with_file_context(FileOperation::WriteFile, temp.path())?;
        let permissions = input
            .metadata()
            .with_file_context(FileOperation::ReadFile, source)?
            .permissions();
        temp.as_file()
            .set_permissions(permissions)
            .with_file_context(FileOperation::WriteFile, temp.path())?;
        temp.persist(dest)
            .map_err(|e| e.error)
            .with_file_context(FileOperation::RenameFile, dest)?;
        Ok(())
    }

    fn remove_if_present(&self, dest: &Path) -> anyhow::Result<()> {
        match fs::remove_file(dest) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            result => result.with_file_context(FileOperation::DeleteFile, dest),
        }
    }
}

/// Result of looking a path up in the staging tree.
#[derive(Debug, PartialEq, Eq)]
enum StagedFile {
    Found(PathBuf),
    /// The diff names the file but the new build doesn't ship it.
    NotFoundInStaging,
}

fn lookup_staged(staging_tree: &Path, relative: &str) -> StagedFile {
    let path = tree_path(staging_tree, relative);
    if path.is_file() {
        StagedFile::Found(path)
    } else {
        StagedFile::NotFoundInStaging
    }
}

/// Joins a `/`-separated manifest path onto `root` component by component.
fn tree_path(root: &Path, relative: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    path.extend(relative.split('/'));
    path
}

/// What was done for one manifest entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    /// The installed file was overwritten with the staged copy.
    Replaced,
    /// A modified file was missing from the new build, so the installed copy
    /// was deleted instead.
    RemovedStale,
    Removed,
    Added,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedStep {
    pub operation: OperationClass,
    pub index: usize,
    pub path: String,
    pub action: StepAction,
}

/// The steps an apply call performed, in the order it performed them.
/// Entries skipped because of a resume marker are not listed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub steps: Vec<AppliedStep>,
}

pub struct PatchApplier<'a> {
    installed_tree: &'a Path,
    staging_tree: &'a Path,
    tracker: &'a ProgressTracker,
    old_version: VersionKey,
    new_version: VersionKey,
    ops: &'a dyn TreeOps,
    debug_log_path: Option<PathBuf>,
}

static DISK_TREE_OPS: DiskTreeOps = DiskTreeOps;

impl<'a> PatchApplier<'a> {
    pub fn new(
        installed_tree: &'a Path,
        staging_tree: &'a Path,
        tracker: &'a ProgressTracker,
        old_version: VersionKey,
        new_version: VersionKey,
    ) -> Self {
        Self {
            installed_tree,
            staging_tree,
            tracker,
            old_version,
            new_version,
            ops: &DISK_TREE_OPS,
            debug_log_path: None,
        }
    }

    pub fn with_tree_ops(mut self, ops: &'a dyn TreeOps) -> Self {
        self.ops = ops;
        self
    }

    /// Appends a "Modified: <path>" style line per step to `path`.
    pub fn with_debug_log(mut self, path: PathBuf) -> Self {
        self.debug_log_path = Some(path);
        self
    }

    /// Applies `manifest`: every modified file, then every removed file, then
    /// every added file. With `resume`, entries the interrupted run already
    /// got past are skipped and the entry it was on is attempted again.
    ///
    /// On error the pass stops immediately and the progress marker is left
    /// pointing at the failed entry. On success the marker is deleted.
    pub fn apply(
        &self,
        manifest: &DiffManifest,
        resume: Option<&UpdateProgress>,
    ) -> anyhow::Result<ApplyReport> {
        if let Some(progress) = resume {
            if !progress.is_for(&self.old_version, &self.new_version) {
                bail!(UpdateError::InvalidState(format!(
                    "Interrupted update was {} -> {}, not {} -> {}",
                    progress.old_version,
                    progress.new_version,
                    self.old_version,
                    self.new_version
                )));
            }
            tree_info!(
                "Resuming update at {:?} entry {}",
                progress.operation,
                progress.last_index
            );
        }

        let mut debug_log = self.open_debug_log()?;
        let mut report = ApplyReport::default();
        for class in OperationClass::APPLY_ORDER {
            for (index, relative) in manifest.entries(class).iter().enumerate() {
                if resume.map_or(false, |p| p.already_applied(class, index)) {
                    continue;
                }
                self.tracker.save(&UpdateProgress {
                    old_version: self.old_version,
                    new_version: self.new_version,
                    operation: class,
                    last_index: index,
                })?;
                let action = self.apply_entry(class, relative)?;
                if let Some(log) = debug_log.as_mut() {
                    let label = match action {
                        StepAction::RemovedStale => OperationClass::Remove,
                        _ => class,
                    };
                    // Best effort; the log is only for diagnosing updates.
                    let _ = writeln!(log, "{}: {}", label, relative);
                }
                report.steps.push(AppliedStep {
                    operation: class,
                    index,
                    path: relative.clone(),
                    action,
                });
            }
        }
        self.tracker.clear()?;
        tree_info!("Applied {} file operations", report.steps.len());
        Ok(report)
    }

    fn apply_entry(&self, class: OperationClass, relative: &str) -> anyhow::Result<StepAction> {
        let installed = tree_path(self.installed_tree, relative);
        match class {
            OperationClass::Modify => match lookup_staged(self.staging_tree, relative) {
                StagedFile::Found(source) => {
                    tree_debug!("Modified: {}", relative);
                    self.ops.copy_over(&source, &installed)?;
                    Ok(StepAction::Replaced)
                }
                StagedFile::NotFoundInStaging => {
                    tree_warn!(
                        "{} is marked modified but is not in the new build, removing it",
                        relative
                    );
                    self.ops.remove_if_present(&installed)?;
                    Ok(StepAction::RemovedStale)
                }
            },
            OperationClass::Remove => {
                tree_debug!("Removed: {}", relative);
                self.ops.remove_if_present(&installed)?;
                Ok(StepAction::Removed)
            }
            OperationClass::Add => {
                tree_debug!("Added: {}", relative);
                let source = tree_path(self.staging_tree, relative);
                self.ops.copy_over(&source, &installed)?;
                Ok(StepAction::Added)
            }
        }
    }

    fn open_debug_log(&self) -> anyhow::Result<Option<File>> {
        let Some(path) = &self.debug_log_path else {
            return Ok(None);
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_file_context(FileOperation::CreateDir, parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_file_context(FileOperation::CreateFile, path)?;
        writeln!(file, "{}-{}", self.old_version, self.new_version)
            .with_file_context(FileOperation::WriteFile, path)?;
        Ok(Some(file))
    }
}
