// This file's job is to be the Rust API for the updater.

use std::fmt::{Display, Formatter};
use std::fs;
use std::path::Path;

use anyhow::{bail, Context};

use crate::applier::{DiskTreeOps, PatchApplier, TreeOps};
use crate::archive::{ArchiveExtractor, Extract};
use crate::config::UpdateConfig;
use crate::file_errors::{FileOperation, IoResultExt};
use crate::locator::Locator;
use crate::manifest::DiffManifest;
use crate::network::{download_to_path, NetworkHooks};
use crate::prompt::Prompt;
use crate::state::{ProgressTracker, UpdateProgress};
use crate::updater_lock::{TreeLease, LEASE_FILE_NAME};
use crate::version::VersionKey;
use crate::vpk::VpkDirectory;
use crate::yaml::YamlConfig;

/// Extensions of scratch files the game leaves in its tree.
const TEMP_FILE_EXTENSIONS: [&str; 2] = ["cache", "tmp"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    NoUpdate,
    UpdateInstalled,
    Installed,
    InstallCancelled,
    NotInstalled,
    UpdateAlreadyInProgress,
    UpdateHadError,
}

impl Display for UpdateStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateStatus::NoUpdate => write!(f, "No update"),
            UpdateStatus::UpdateInstalled => write!(f, "Update installed"),
            UpdateStatus::Installed => write!(f, "Installed"),
            UpdateStatus::InstallCancelled => write!(f, "Install cancelled"),
            UpdateStatus::NotInstalled => write!(f, "Not installed"),
            UpdateStatus::UpdateAlreadyInProgress => write!(f, "Update already in progress"),
            UpdateStatus::UpdateHadError => write!(f, "Update had error"),
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum UpdateError {
    InvalidArgument(String, String),
    InvalidState(String),
    MalformedVersion(String),
    MalformedDiff { line: usize, reason: String },
    Filesystem(String),
    Network(String),
    NotInstalled,
    UpdateAlreadyInProgress,
}

impl std::error::Error for UpdateError {}

impl Display for UpdateError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            UpdateError::InvalidArgument(name, value) => {
                write!(f, "Invalid Argument: {} -> {}", name, value)
            }
            UpdateError::InvalidState(msg) => write!(f, "Invalid State: {}", msg),
            UpdateError::MalformedVersion(version) => {
                write!(f, "Malformed version: {:?}", version)
            }
            UpdateError::MalformedDiff { line, reason } => {
                write!(f, "Malformed diff at line {}: {}", line, reason)
            }
            UpdateError::Filesystem(msg) => write!(f, "{}", msg),
            UpdateError::Network(msg) => write!(f, "Network error: {}", msg),
            UpdateError::NotInstalled => write!(f, "Not installed"),
            UpdateError::UpdateAlreadyInProgress => {
                write!(f, "Update already in progress")
            }
        }
    }
}

/// Where an UpdateSession is. `Idle` between operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Checking,
    UpToDate,
    NeedsUpdate,
    Fetching,
    Extracting,
    Patching,
}

/// Result of comparing the installed tree with the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateCheck {
    NotInstalled,
    /// A previous apply pass did not finish. Nothing was compared; the
    /// interrupted pass has to be finished first.
    Interrupted(UpdateProgress),
    UpToDate {
        local: VersionKey,
    },
    NeedsUpdate {
        local: VersionKey,
        remote: VersionKey,
    },
}

/// Everything needed to check and update one installed tree.
pub struct UpdateSession {
    config: UpdateConfig,
    extractor: Box<dyn Extract>,
    tree_ops: Box<dyn TreeOps>,
    state: SessionState,
}

impl UpdateSession {
    pub fn new(config: UpdateConfig) -> Self {
        Self {
            config,
            extractor: Box::new(ArchiveExtractor),
            tree_ops: Box::new(DiskTreeOps),
            state: SessionState::Idle,
        }
    }

    /// Builds a session from the contents of updater.yaml.
    pub fn from_yaml(
        yaml: &str,
        locators: &[&dyn Locator],
        network_hooks: NetworkHooks,
    ) -> anyhow::Result<Self> {
        let yaml = YamlConfig::from_yaml(yaml)
            .map_err(|err| UpdateError::InvalidArgument("yaml".to_string(), err.to_string()))?;
        let config = UpdateConfig::resolve(&yaml, locators, network_hooks)?;
        Ok(Self::new(config))
    }

    pub fn with_extractor(mut self, extractor: Box<dyn Extract>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_tree_ops(mut self, tree_ops: Box<dyn TreeOps>) -> Self {
        self.tree_ops = tree_ops;
        self
    }

    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, state: SessionState) {
        tree_debug!("{:?} -> {:?}", self.state, state);
        self.state = state;
    }

    fn tracker(&self) -> ProgressTracker {
        ProgressTracker::for_tree(&self.config.installed_tree())
    }

    /// Whether the installed tree exists and has every required file.
    pub fn is_installed(&self) -> bool {
        let tree = self.config.installed_tree();
        if !tree.is_dir() {
            return false;
        }
        match self
            .config
            .required_files
            .iter()
            .find(|file| !tree.join(file).exists())
        {
            Some(missing) => {
                tree_info!("{} is missing {}", tree.display(), missing);
                false
            }
            None => true,
        }
    }

    /// The installed build's version, flagged as a hotfix when its marker
    /// file is present.
    pub fn local_version(&self) -> anyhow::Result<VersionKey> {
        let contents = self.local_version_file()?;
        let version = VersionKey::from_version_file(&contents)?;
        let is_hotfix = self
            .config
            .hotfix_marker(&version)
            .map_or(false, |marker| self.config.installed_tree().join(marker).exists());
        Ok(version.with_hotfix(version.hotfix || is_hotfix))
    }

    /// Older builds keep the version file inside `version_vpk`. The loose
    /// file is read when there is no such package or it lacks the entry.
    fn local_version_file(&self) -> anyhow::Result<String> {
        if let Some(vpk_path) = self.config.local_version_vpk_path() {
            if vpk_path.is_file() {
                let vpk = VpkDirectory::open(&vpk_path)?;
                if let Some(bytes) = vpk.read_file(&self.config.version_file)? {
                    tree_debug!("Reading version from {}", vpk_path.display());
                    return String::from_utf8(bytes).map_err(|_| {
                        UpdateError::MalformedVersion(format!(
                            "{} in {} is not utf-8",
                            self.config.version_file,
                            vpk_path.display()
                        ))
                        .into()
                    });
                }
                tree_debug!(
                    "{} has no {}, using the loose file",
                    vpk_path.display(),
                    self.config.version_file
                );
            }
        }
        let path = self.config.local_version_path();
        fs::read_to_string(&path).with_file_context(FileOperation::ReadFile, &path)
    }

    pub fn remote_version(&self) -> anyhow::Result<VersionKey> {
        let url = self.config.version_url();
        let contents = (self.config.network_hooks.fetch_text_fn)(&url)
            .with_context(|| format!("Failed to fetch remote version from {url}"))?;
        Ok(VersionKey::from_version_file(&contents)?)
    }

    /// Compares the installed tree with the server. An interrupted apply pass
    /// is reported before anything else.
    pub fn check(&mut self) -> anyhow::Result<UpdateCheck> {
        self.transition(SessionState::Checking);
        let result = self.check_internal();
        let next = match &result {
            Ok(UpdateCheck::UpToDate { .. }) => SessionState::UpToDate,
            Ok(UpdateCheck::NeedsUpdate { .. } | UpdateCheck::Interrupted(_)) => {
                SessionState::NeedsUpdate
            }
            Ok(UpdateCheck::NotInstalled) | Err(_) => SessionState::Idle,
        };
        self.transition(next);
        result
    }

    fn check_internal(&self) -> anyhow::Result<UpdateCheck> {
        if let Some(progress) = self.tracker().load()? {
            tree_warn!(
                "Found an interrupted update from {} to {}",
                progress.old_version,
                progress.new_version
            );
            return Ok(UpdateCheck::Interrupted(progress));
        }
        if !self.is_installed() {
            return Ok(UpdateCheck::NotInstalled);
        }
        let local = self.local_version()?;
        let remote = self.remote_version()?;
        tree_info!("Installed version: {}, latest version: {}", local, remote);
        if remote > local {
            Ok(UpdateCheck::NeedsUpdate { local, remote })
        } else {
            Ok(UpdateCheck::UpToDate { local })
        }
    }

    /// Brings the installed tree up to date, finishing an interrupted update
    /// first if there is one.
    pub fn try_update(&mut self) -> anyhow::Result<UpdateStatus> {
        let result = match self.check()? {
            UpdateCheck::NotInstalled => bail!(UpdateError::NotInstalled),
            UpdateCheck::UpToDate { .. } => Ok(UpdateStatus::NoUpdate),
            UpdateCheck::Interrupted(progress) => self.continue_update(&progress),
            UpdateCheck::NeedsUpdate { local, remote } => self.update_from(local, remote),
        };
        self.transition(SessionState::Idle);
        result
    }

    /// Synchronously checks for an update and installs it if available.
    pub fn update(&mut self) -> UpdateStatus {
        match self.try_update() {
            Ok(status) => status,
            Err(err) => status_for_error(&err),
        }
    }

    fn update_from(&mut self, local: VersionKey, remote: VersionKey) -> anyhow::Result<UpdateStatus> {
        let tree = self.config.installed_tree();
        let _lease = TreeLease::acquire(&tree)?;
        tree_info!("Updating {} from {} to {}", tree.display(), local, remote);

        self.transition(SessionState::Fetching);
        let archive = self.config.archive_path();
        self.download(&self.config.archive_url(), &archive)?;
        let patch = self.config.patch_path(&local, &remote);
        self.download(&self.config.patch_url(&local, &remote), &patch)?;
        // Parse before touching anything so a bad diff leaves the tree alone.
        let manifest = read_manifest(&patch)?;

        self.transition(SessionState::Extracting);
        self.extract(&archive)?;

        self.transition(SessionState::Patching);
        self.apply(&manifest, local, remote, None)?;
        self.cleanup();
        tree_info!("Updated to {}", remote);
        Ok(UpdateStatus::UpdateInstalled)
    }

    /// Finishes an interrupted update. The archive, diff and extracted build
    /// are reused if still in the work dir and fetched again if not.
    pub fn continue_update(&mut self, progress: &UpdateProgress) -> anyhow::Result<UpdateStatus> {
        let tree = self.config.installed_tree();
        let _lease = TreeLease::acquire(&tree)?;
        let (old, new) = (progress.old_version, progress.new_version);
        tree_info!("Continuing interrupted update from {} to {}", old, new);

        self.transition(SessionState::Fetching);
        let archive = self.config.archive_path();
        let staging = self.config.staging_tree();
        if !staging.is_dir() && !archive.exists() {
            self.download(&self.config.archive_url(), &archive)?;
        }
        let patch = self.config.patch_path(&old, &new);
        if !patch.exists() {
            self.download(&self.config.patch_url(&old, &new), &patch)?;
        }
        let manifest = read_manifest(&patch)?;

        self.transition(SessionState::Extracting);
        if !staging.is_dir() {
            self.extract(&archive)?;
        }

        self.transition(SessionState::Patching);
        self.apply(&manifest, old, new, Some(progress))?;
        self.cleanup();
        tree_info!("Updated to {}", new);
        Ok(UpdateStatus::UpdateInstalled)
    }

    fn download(&self, url: &str, path: &Path) -> anyhow::Result<()> {
        download_to_path(&self.config.network_hooks, url, path)
    }

    /// Unpacks the archive into the staging root. Unpacks to a side
    /// directory first, so the staging root existing means it is complete.
    fn extract(&self, archive: &Path) -> anyhow::Result<()> {
        let staging_root = self.config.staging_root();
        let partial = self.config.work_dir.join("staging.partial");
        remove_dir_if_present(&partial)?;
        remove_dir_if_present(&staging_root)?;
        self.extractor.extract(archive, &partial)?;
        fs::rename(&partial, &staging_root)
            .with_file_context(FileOperation::RenameFile, &staging_root)?;

        let staging_tree = self.config.staging_tree();
        if !staging_tree.is_dir() {
            bail!(UpdateError::InvalidState(format!(
                "{} does not contain {}",
                archive.display(),
                self.config.staging_subdir
            )));
        }
        Ok(())
    }

    fn apply(
        &self,
        manifest: &DiffManifest,
        old: VersionKey,
        new: VersionKey,
        resume: Option<&UpdateProgress>,
    ) -> anyhow::Result<()> {
        let tree = self.config.installed_tree();
        let staging = self.config.staging_tree();
        let tracker = self.tracker();
        let mut applier = PatchApplier::new(&tree, &staging, &tracker, old, new)
            .with_tree_ops(self.tree_ops.as_ref());
        if let Some(path) = self.config.debug_log_path() {
            applier = applier.with_debug_log(path);
        }
        let report = applier.apply(manifest, resume)?;
        tree_debug!("Apply report: {:?}", report);
        Ok(())
    }

    /// Installs a fresh copy of the build, replacing whatever is in the
    /// installed tree. Asks first if there is something to replace.
    pub fn try_install(&mut self, prompt: &dyn Prompt) -> anyhow::Result<UpdateStatus> {
        let tree = self.config.installed_tree();
        if has_contents(&tree)? {
            let question = format!(
                "Everything in {} will be deleted and replaced. Continue?",
                tree.display()
            );
            if !prompt.confirm(&question) {
                return Ok(UpdateStatus::InstallCancelled);
            }
        }
        fs::create_dir_all(&tree).with_file_context(FileOperation::CreateDir, &tree)?;
        let _lease = TreeLease::acquire(&tree)?;

        let result = self.install_locked(&tree);
        self.transition(SessionState::Idle);
        result?;
        self.cleanup();
        tree_info!("Installed into {}", tree.display());
        Ok(UpdateStatus::Installed)
    }

    pub fn install(&mut self, prompt: &dyn Prompt) -> UpdateStatus {
        match self.try_install(prompt) {
            Ok(status) => status,
            Err(err) => status_for_error(&err),
        }
    }

    fn install_locked(&mut self, tree: &Path) -> anyhow::Result<()> {
        self.transition(SessionState::Fetching);
        let archive = self.config.archive_path();
        self.download(&self.config.archive_url(), &archive)?;

        self.transition(SessionState::Extracting);
        self.extract(&archive)?;

        tree_info!("Replacing contents of {}", tree.display());
        clear_dir_except(tree, LEASE_FILE_NAME)?;
        let staging = self.config.staging_tree();
        for entry in walkdir::WalkDir::new(&staging) {
            let entry = entry.with_context(|| format!("Failed to walk {}", staging.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&staging)
                .context("walkdir entry outside of staging tree")?;
            self.tree_ops.copy_over(entry.path(), &tree.join(relative))?;
        }
        Ok(())
    }

    /// Removes the extracted build, archive and downloaded diffs from the
    /// work dir. Failures are logged, not returned.
    pub fn cleanup(&self) {
        let work_dir = &self.config.work_dir;
        for dir in [self.config.staging_root(), work_dir.join("staging.partial")] {
            if let Err(e) = remove_dir_if_present(&dir) {
                tree_warn!("{:?}", e);
            }
        }
        let entries = match fs::read_dir(work_dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        let archive_name = std::ffi::OsStr::new(&self.config.archive_name);
        for entry in entries.flatten() {
            let path = entry.path();
            let is_download = path.file_name() == Some(archive_name)
                || path.extension().map_or(false, |ext| ext == "patch");
            if is_download && path.is_file() {
                if let Err(e) = fs::remove_file(&path) {
                    tree_warn!("Failed to remove {}: {}", path.display(), e);
                }
            }
        }
    }

    /// Deletes scratch files (`*.cache`, `*.tmp`) from the installed tree and
    /// returns how many were removed.
    pub fn delete_temp_files(&self) -> anyhow::Result<usize> {
        let tree = self.config.installed_tree();
        if !tree.is_dir() {
            bail!(UpdateError::NotInstalled);
        }
        let _lease = TreeLease::acquire(&tree)?;
        let mut removed = 0;
        for entry in walkdir::WalkDir::new(&tree) {
            let entry = entry.with_context(|| format!("Failed to walk {}", tree.display()))?;
            let is_temp = entry.file_type().is_file()
                && entry
                    .path()
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map_or(false, |ext| TEMP_FILE_EXTENSIONS.contains(&ext));
            if is_temp {
                tree_debug!("Deleting {}", entry.path().display());
                fs::remove_file(entry.path())
                    .with_file_context(FileOperation::DeleteFile, entry.path())?;
                removed += 1;
            }
        }
        tree_info!("Deleted {} temporary files", removed);
        Ok(removed)
    }
}

fn status_for_error(err: &anyhow::Error) -> UpdateStatus {
    match err.downcast_ref::<UpdateError>() {
        Some(UpdateError::NotInstalled) => {
            tree_warn!("Nothing is installed at the configured location");
            UpdateStatus::NotInstalled
        }
        Some(UpdateError::UpdateAlreadyInProgress) => {
            tree_warn!("Another update is already running");
            UpdateStatus::UpdateAlreadyInProgress
        }
        _ => {
            tree_error!("Problem updating: {:?}", err);
            UpdateStatus::UpdateHadError
        }
    }
}

fn read_manifest(patch: &Path) -> anyhow::Result<DiffManifest> {
    let diff = fs::read_to_string(patch).with_file_context(FileOperation::ReadFile, patch)?;
    let manifest = DiffManifest::parse(&diff)?;
    tree_info!(
        "{}: {} modified, {} removed, {} added",
        patch.display(),
        manifest.modified.len(),
        manifest.removed.len(),
        manifest.added.len()
    );
    Ok(manifest)
}

fn remove_dir_if_present(dir: &Path) -> anyhow::Result<()> {
    match fs::remove_dir_all(dir) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        result => result.with_file_context(FileOperation::DeleteDir, dir),
    }
}

fn has_contents(dir: &Path) -> anyhow::Result<bool> {
    match fs::read_dir(dir) {
        Ok(mut entries) => Ok(entries.next().is_some()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).with_file_context(FileOperation::ReadFile, dir),
    }
}

/// Deletes everything in `dir` except the entry named `keep`.
fn clear_dir_except(dir: &Path, keep: &str) -> anyhow::Result<()> {
    for entry in fs::read_dir(dir).with_file_context(FileOperation::ReadFile, dir)? {
        let entry = entry.with_file_context(FileOperation::ReadFile, dir)?;
        if entry.file_name() == keep {
            continue;
        }
        let path = entry.path();
        let file_type = entry
            .file_type()
            .with_file_context(FileOperation::ReadFile, &path)?;
        if file_type.is_dir() {
            fs::remove_dir_all(&path).with_file_context(FileOperation::DeleteDir, &path)?;
        } else {
            fs::remove_file(&path).with_file_context(FileOperation::DeleteFile, &path)?;
        }
    }
    Ok(())
}
