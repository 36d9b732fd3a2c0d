// This file handles parsing updater.yaml, the configuration shipped next to
// the updater binary.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

/// The contents of updater.yaml, as written. Optional fields are resolved to
/// their defaults by `UpdateConfig::resolve`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct YamlConfig {
    /// Where the full build archive and remote version file live.
    pub base_url: String,
    pub archive_name: Option<String>,
    pub version_file: Option<String>,
    /// Tree-relative `_dir.vpk` that older builds keep the version file in.
    pub version_vpk: Option<String>,
    /// Where the per-version diff files live.
    pub patch_base_url: String,
    pub patch_prefix: Option<String>,
    /// Folder name of the installed tree under the install root.
    pub game_dir: String,
    /// Folder the archive unpacks to, if different from `game_dir`.
    pub staging_subdir: Option<String>,
    #[serde(default)]
    pub required_files: Vec<String>,
    /// Version string -> tree-relative file whose presence marks the
    /// installed build of that version as a hotfix.
    #[serde(default)]
    pub hotfix_markers: BTreeMap<String, String>,
    pub install_root: Option<PathBuf>,
    pub work_dir: Option<PathBuf>,
    pub debug_log: Option<bool>,
}

impl YamlConfig {
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: YamlConfig = serde_yaml::from_str(yaml)?;
        Ok(config)
    }
}
