// This is a required file for rust libraries which declares what files are
// part of the library and what interfaces are public from the library.

#[macro_use]
mod logging_macros;

mod applier;
mod archive;
mod config;
mod file_errors;
mod locator;
mod logging;
mod manifest;
mod network;
mod prompt;
mod state;
mod updater;
mod updater_lock;
mod version;
mod vpk;
mod yaml;

#[cfg(test)]
mod test_utils;

// Take all public items from the updater namespace and make them public.
pub use self::updater::*;

pub use self::applier::{
    AppliedStep, ApplyReport, DiskTreeOps, PatchApplier, StepAction, TreeOps,
};
pub use self::archive::{ArchiveExtractor, Extract};
pub use self::config::{lib_extension, UpdateConfig};
pub use self::locator::{locate_first, FixedLocator, Locator, SteamLocator};
pub use self::logging::init_logging;
pub use self::manifest::{DiffManifest, OperationClass};
pub use self::network::{
    download_file_default, fetch_text_default, send_get, DownloadFileFn, FetchTextFn,
    NetworkHooks,
};
pub use self::prompt::{AssumeYes, Prompt};
pub use self::state::progress::PROGRESS_FILE_NAME;
pub use self::state::{ProgressTracker, UpdateProgress};
pub use self::updater_lock::{LeaseOwner, TreeLease, LEASE_FILE_NAME};
pub use self::version::VersionKey;
pub use self::vpk::VpkDirectory;
pub use self::yaml::YamlConfig;

#[cfg(test)]
extern crate tempdir;
