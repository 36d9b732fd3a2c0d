// This file's job is to make sure only one updater touches an installed tree
// at a time.
//
// The lease is a file inside the tree. On Unix it is also flock()ed for as
// long as the lease is held, and the kernel drops that lock when the process
// dies, so a lease file nobody has locked was left behind by a crash and can
// be taken over. A lock only counts while the locked file is still the one at
// the lease path. Elsewhere the file's existence alone is the lock.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use anyhow::bail;
use serde::{Deserialize, Serialize};

use crate::file_errors::{FileOperation, IoResultExt};
use crate::updater::UpdateError;

#[cfg(test)]
use mock_instant::thread_local::SystemTime;
#[cfg(not(test))]
use std::time::SystemTime;

pub const LEASE_FILE_NAME: &str = "update.lock";

/// Who holds the lease. Informational only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseOwner {
    pub pid: u32,
    /// Seconds since the Unix epoch.
    pub started_at: u64,
}

/// Held while an installed tree is being modified. Released on drop.
#[derive(Debug)]
pub struct TreeLease {
    path: PathBuf,
    // Keeps the flock alive.
    _file: File,
}

impl TreeLease {
    /// Takes the lease for `tree`, which must exist. Fails with
    /// `UpdateAlreadyInProgress` if another updater holds it.
    pub fn acquire(tree: &Path) -> anyhow::Result<Self> {
        let path = tree.join(LEASE_FILE_NAME);
        let mut file = open_exclusive(&path)?;

        let mut previous = String::new();
        // An unreadable leftover is still a leftover; we hold the lock now.
        let _ = file.read_to_string(&mut previous);
        if !previous.is_empty() {
            match serde_json::from_str::<LeaseOwner>(&previous) {
                Ok(owner) => tree_warn!(
                    "Taking over stale update lease from pid {} (started at {})",
                    owner.pid,
                    owner.started_at
                ),
                Err(_) => tree_warn!("Taking over unreadable update lease {}", path.display()),
            }
        }

        let owner = LeaseOwner {
            pid: std::process::id(),
            started_at: unix_timestamp(),
        };
        write_owner(&mut file, &owner).with_file_context(FileOperation::WriteFile, &path)?;

        tree_debug!("Acquired update lease {}", path.display());
        Ok(Self { path, _file: file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the current owner of the lease on `tree`, if any.
    pub fn owner(tree: &Path) -> Option<LeaseOwner> {
        let contents = fs::read_to_string(tree.join(LEASE_FILE_NAME)).ok()?;
        serde_json::from_str(&contents).ok()
    }
}

impl Drop for TreeLease {
    fn drop(&mut self) {
        // Remove before the lock is released with the file handle, so nobody
        // can take over a file that is about to vanish.
        if let Err(e) = fs::remove_file(&self.path) {
            tree_warn!("Failed to remove update lease {}: {}", self.path.display(), e);
        }
    }
}

fn write_owner(file: &mut File, owner: &LeaseOwner) -> std::io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    serde_json::to_writer(&mut *file, owner)?;
    file.sync_all()
}

#[cfg(unix)]
fn open_exclusive(path: &Path) -> anyhow::Result<File> {
    loop {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_file_context(FileOperation::LockFile, path)?;
        if let Some(file) = lock_current(file, path)? {
            return Ok(file);
        }
        tree_debug!("Update lease {} was replaced while locking it, retrying", path.display());
    }
}

/// Locks `file` and returns it if it is still the file at `path`. A releasing
/// holder unlinks the lease before its lock goes away, so a lock won on an
/// unlinked file guards nothing.
#[cfg(unix)]
fn lock_current(file: File, path: &Path) -> anyhow::Result<Option<File>> {
    use nix::errno::Errno;
    use nix::fcntl::{flock, FlockArg};
    use std::os::unix::fs::MetadataExt;
    use std::os::unix::io::AsRawFd;

    match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
        Ok(()) => {}
        Err(Errno::EWOULDBLOCK) => bail!(UpdateError::UpdateAlreadyInProgress),
        Err(e) => {
            return Err(std::io::Error::from(e)).with_file_context(FileOperation::LockFile, path)
        }
    }
    let held = file
        .metadata()
        .with_file_context(FileOperation::LockFile, path)?;
    match fs::metadata(path) {
        Ok(current) if current.dev() == held.dev() && current.ino() == held.ino() => Ok(Some(file)),
        Ok(_) => Ok(None),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_file_context(FileOperation::LockFile, path),
    }
}

#[cfg(not(unix))]
fn open_exclusive(path: &Path) -> anyhow::Result<File> {
    match OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(path)
    {
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            tree_error!(
                "{} exists. If no other updater is running, delete it and try again.",
                path.display()
            );
            bail!(UpdateError::UpdateAlreadyInProgress)
        }
        result => result.with_file_context(FileOperation::LockFile, path),
    }
}

/// The number of seconds since the Unix epoch. Returns 0 if the system clock
/// is set before the Unix epoch.
fn unix_timestamp() -> u64 {
    match SystemTime::now().duration_since(SystemTime::UNIX_EPOCH) {
        Ok(n) => n.as_secs(),
        Err(_) => 0,
    }
}
