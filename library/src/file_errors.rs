// Friendlier messages for failed file operations on the installed tree.
// The io::Error alone ("No such file or directory") rarely says which file or
// what we were doing with it.

use std::io::ErrorKind;
use std::path::Path;

use crate::updater::UpdateError;

/// Describes the type of file operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOperation {
    CreateDir,
    CreateFile,
    WriteFile,
    ReadFile,
    CopyFile,
    DeleteFile,
    DeleteDir,
    RenameFile,
    LockFile,
}

impl std::fmt::Display for FileOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileOperation::CreateDir => write!(f, "create directory"),
            FileOperation::CreateFile => write!(f, "create file"),
            FileOperation::WriteFile => write!(f, "write to file"),
            FileOperation::ReadFile => write!(f, "read file"),
            FileOperation::CopyFile => write!(f, "copy file"),
            FileOperation::DeleteFile => write!(f, "delete file"),
            FileOperation::DeleteDir => write!(f, "delete directory"),
            FileOperation::RenameFile => write!(f, "rename/move file"),
            FileOperation::LockFile => write!(f, "lock file"),
        }
    }
}

/// Builds "Failed to <operation> '<path>': <error>" plus a hint line when the
/// error kind suggests a likely cause.
pub fn enhance_io_error(error: &std::io::Error, operation: FileOperation, path: &Path) -> String {
    let base_message = format!(
        "Failed to {} '{}': {}",
        operation,
        path.display(),
        error
    );

    match get_error_hint(error, operation) {
        Some(hint) => format!("{}\nPossible cause: {}", base_message, hint),
        None => base_message,
    }
}

fn get_error_hint(error: &std::io::Error, operation: FileOperation) -> Option<&'static str> {
    match error.kind() {
        ErrorKind::PermissionDenied => Some(match operation {
            FileOperation::ReadFile => "The updater may not have read access to this file.",
            FileOperation::DeleteFile | FileOperation::DeleteDir => {
                "The file may be in use by the running application, or the updater may not have permission to delete it."
            }
            _ => "The updater may not have write access to this location. Is the application still running?",
        }),
        ErrorKind::NotFound => Some(match operation {
            FileOperation::CreateDir | FileOperation::CreateFile | FileOperation::WriteFile => {
                "The parent directory may not exist."
            }
            FileOperation::CopyFile => {
                "The source file may be missing from the downloaded build, or the destination directory may not exist."
            }
            FileOperation::RenameFile => "The source file or destination directory may not exist.",
            _ => "The file or directory does not exist.",
        }),
        ErrorKind::AlreadyExists => Some("A file or directory with this name already exists."),
        ErrorKind::StorageFull => Some("The disk is full. Free up space and try again."),
        ErrorKind::ReadOnlyFilesystem => Some("The filesystem is mounted as read-only."),
        _ => match error.raw_os_error() {
            // ENOSPC / EDQUOT on Linux.
            Some(28) => Some("The disk is full (ENOSPC). Free up space and try again."),
            Some(122) => Some("Disk quota exceeded (EDQUOT)."),
            _ => None,
        },
    }
}

/// A trait extension for adding enhanced context to IO Results.
pub trait IoResultExt<T> {
    /// Wraps the io error in `UpdateError::Filesystem` carrying the enhanced
    /// message; the original io::Error stays reachable through the chain.
    fn with_file_context(self, operation: FileOperation, path: &Path) -> anyhow::Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_file_context(self, operation: FileOperation, path: &Path) -> anyhow::Result<T> {
        self.map_err(|e| {
            let enhanced_message = enhance_io_error(&e, operation, path);
            anyhow::Error::new(e).context(UpdateError::Filesystem(enhanced_message))
        })
    }
}
