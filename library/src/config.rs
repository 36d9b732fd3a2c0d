// This file resolves updater.yaml into the paths and URLs an UpdateSession
// works with.
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::locator::{locate_first, FixedLocator, Locator};
use crate::network::NetworkHooks;
use crate::updater::UpdateError;
use crate::version::VersionKey;
use crate::yaml::YamlConfig;

const DEFAULT_ARCHIVE_NAME: &str = "latest.tar.gz";
const DEFAULT_VERSION_FILE: &str = "version.txt";
const DEFAULT_WORK_DIR_NAME: &str = "tree-updater";
const STAGING_DIR_NAME: &str = "staging";
pub const DEBUG_LOG_FILE_NAME: &str = "update_debug_log.log";

/// Placeholder in `required_files` for the platform's shared library
/// extension.
const LIB_PLACEHOLDER: &str = "{lib}";

// The config an UpdateSession runs with. Immutable once resolved.
#[derive(Debug, Clone)]
pub struct UpdateConfig {
    pub base_url: String,
    pub archive_name: String,
    pub version_file: String,
    /// Tree-relative package checked for `version_file` before the loose file.
    pub version_vpk: Option<String>,
    pub patch_base_url: String,
    pub patch_prefix: String,
    pub install_root: PathBuf,
    pub game_dir: String,
    pub staging_subdir: String,
    /// Tree-relative paths, with `{lib}` already expanded.
    pub required_files: Vec<String>,
    pub hotfix_markers: Vec<(VersionKey, String)>,
    pub work_dir: PathBuf,
    pub debug_log: bool,
    pub network_hooks: NetworkHooks,
}

impl UpdateConfig {
    /// Fills in defaults and finds the install root: `install_root` from the
    /// yaml if set, otherwise the first answer from `locators`.
    pub fn resolve(
        yaml: &YamlConfig,
        locators: &[&dyn Locator],
        network_hooks: NetworkHooks,
    ) -> Result<Self> {
        let configured = yaml.install_root.clone().map(FixedLocator);
        let install_root = match &configured {
            Some(fixed) => fixed.locate(),
            None => locate_first(locators),
        };
        let Some(install_root) = install_root else {
            bail!(UpdateError::InvalidState(
                "Could not find where to install. Set install_root in updater.yaml.".to_string()
            ));
        };

        if yaml.game_dir.is_empty() || yaml.game_dir.contains(['/', '\\']) {
            bail!(UpdateError::InvalidArgument(
                "game_dir".to_string(),
                yaml.game_dir.clone()
            ));
        }

        let hotfix_markers = yaml
            .hotfix_markers
            .iter()
            .map(|(version, marker)| {
                let key = VersionKey::parse(version)
                    .with_context(|| format!("Invalid hotfix_markers key {version:?}"))?;
                Ok((key, marker.clone()))
            })
            .collect::<Result<Vec<_>>>()?;

        let config = UpdateConfig {
            base_url: yaml.base_url.trim_end_matches('/').to_owned(),
            archive_name: yaml
                .archive_name
                .as_deref()
                .unwrap_or(DEFAULT_ARCHIVE_NAME)
                .to_owned(),
            version_file: yaml
                .version_file
                .as_deref()
                .unwrap_or(DEFAULT_VERSION_FILE)
                .to_owned(),
            version_vpk: yaml.version_vpk.clone(),
            patch_base_url: yaml.patch_base_url.trim_end_matches('/').to_owned(),
            patch_prefix: yaml.patch_prefix.clone().unwrap_or_default(),
            install_root,
            game_dir: yaml.game_dir.clone(),
            staging_subdir: yaml
                .staging_subdir
                .clone()
                .unwrap_or_else(|| yaml.game_dir.clone()),
            required_files: yaml
                .required_files
                .iter()
                .map(|file| file.replace(LIB_PLACEHOLDER, lib_extension()))
                .collect(),
            hotfix_markers,
            work_dir: yaml
                .work_dir
                .clone()
                .unwrap_or_else(|| std::env::temp_dir().join(DEFAULT_WORK_DIR_NAME)),
            debug_log: yaml.debug_log.unwrap_or(false),
            network_hooks,
        };
        tree_debug!("Updater configured with: {:?}", config);
        Ok(config)
    }

    pub fn installed_tree(&self) -> PathBuf {
        self.install_root.join(&self.game_dir)
    }

    /// Everything the archive unpacks to.
    pub fn staging_root(&self) -> PathBuf {
        self.work_dir.join(STAGING_DIR_NAME)
    }

    /// The new build inside the staging root.
    pub fn staging_tree(&self) -> PathBuf {
        self.staging_root().join(&self.staging_subdir)
    }

    pub fn archive_path(&self) -> PathBuf {
        self.work_dir.join(&self.archive_name)
    }

    pub fn archive_url(&self) -> String {
        format!("{}/{}", self.base_url, self.archive_name)
    }

    pub fn version_url(&self) -> String {
        format!("{}/{}", self.base_url, self.version_file)
    }

    pub fn local_version_path(&self) -> PathBuf {
        self.installed_tree().join(&self.version_file)
    }

    pub fn local_version_vpk_path(&self) -> Option<PathBuf> {
        self.version_vpk
            .as_ref()
            .map(|vpk| self.installed_tree().join(vpk))
    }

    /// `<prefix><old>[1]-<new>.patch`, where the `1` marks a hotfix base.
    pub fn patch_file_name(&self, old: &VersionKey, new: &VersionKey) -> String {
        format!(
            "{}{}{}-{}.patch",
            self.patch_prefix,
            old.compact(),
            if old.hotfix { "1" } else { "" },
            new.compact()
        )
    }

    pub fn patch_url(&self, old: &VersionKey, new: &VersionKey) -> String {
        format!("{}/{}", self.patch_base_url, self.patch_file_name(old, new))
    }

    pub fn patch_path(&self, old: &VersionKey, new: &VersionKey) -> PathBuf {
        self.work_dir.join(self.patch_file_name(old, new))
    }

    pub fn debug_log_path(&self) -> Option<PathBuf> {
        self.debug_log
            .then(|| self.work_dir.join(DEBUG_LOG_FILE_NAME))
    }

    /// The hotfix marker for `version`, if one is configured.
    pub fn hotfix_marker(&self, version: &VersionKey) -> Option<&Path> {
        let base = version.with_hotfix(false);
        self.hotfix_markers
            .iter()
            .find(|(key, _)| key.with_hotfix(false) == base)
            .map(|(_, marker)| Path::new(marker.as_str()))
    }
}

pub fn lib_extension() -> &'static str {
    #[cfg(windows)]
    static EXTENSION: &str = "dll";
    #[cfg(not(windows))]
    static EXTENSION: &str = "so";
    EXTENSION
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    use super::UpdateConfig;
    use crate::locator::{FixedLocator, Locator};
    use crate::network::NetworkHooks;
    use crate::version::VersionKey;
    use crate::yaml::YamlConfig;
    use crate::UpdateError;

    fn fake_yaml() -> YamlConfig {
        YamlConfig {
            base_url: "https://example.com/builds/".to_string(),
            archive_name: None,
            version_file: None,
            version_vpk: None,
            patch_base_url: "https://example.com/patches".to_string(),
            patch_prefix: Some("pf2_".to_string()),
            game_dir: "pf2".to_string(),
            staging_subdir: None,
            required_files: vec!["gameinfo.txt".to_string(), "bin/server.{lib}".to_string()],
            hotfix_markers: BTreeMap::from([("0.7".to_string(), "maps/hotfix.bsp".to_string())]),
            install_root: Some(PathBuf::from("/games")),
            work_dir: Some(PathBuf::from("/work")),
            debug_log: None,
        }
    }

    fn resolve(yaml: &YamlConfig, locators: &[&dyn Locator]) -> anyhow::Result<UpdateConfig> {
        UpdateConfig::resolve(yaml, locators, NetworkHooks::default())
    }

    #[test]
    fn resolve_fills_in_defaults() {
        let config = resolve(&fake_yaml(), &[]).unwrap();
        assert_eq!(config.archive_name, "latest.tar.gz");
        assert_eq!(config.version_file, "version.txt");
        assert_eq!(config.staging_subdir, "pf2");
        assert!(!config.debug_log);
        assert_eq!(config.debug_log_path(), None);

        assert_eq!(config.installed_tree(), PathBuf::from("/games").join("pf2"));
        assert_eq!(
            config.staging_tree(),
            PathBuf::from("/work").join("staging").join("pf2")
        );
        assert_eq!(
            config.archive_url(),
            "https://example.com/builds/latest.tar.gz"
        );
        assert_eq!(config.version_url(), "https://example.com/builds/version.txt");
        assert_eq!(config.local_version_vpk_path(), None);
    }

    #[test]
    fn version_vpk_is_relative_to_installed_tree() {
        let mut yaml = fake_yaml();
        yaml.version_vpk = Some("pf2_misc_dir.vpk".to_string());
        let config = resolve(&yaml, &[]).unwrap();
        assert_eq!(
            config.local_version_vpk_path(),
            Some(PathBuf::from("/games").join("pf2").join("pf2_misc_dir.vpk"))
        );
    }

    #[test]
    fn expands_lib_placeholder() {
        let config = resolve(&fake_yaml(), &[]).unwrap();
        let expected = if cfg!(windows) {
            "bin/server.dll"
        } else {
            "bin/server.so"
        };
        assert_eq!(config.required_files, vec!["gameinfo.txt", expected]);
    }

    #[test]
    fn patch_names_follow_server_layout() {
        let config = resolve(&fake_yaml(), &[]).unwrap();
        let old = VersionKey::new(0, 7, 2);
        let new = VersionKey::new(0, 7, 3);
        assert_eq!(config.patch_file_name(&old, &new), "pf2_072-073.patch");
        assert_eq!(
            config.patch_file_name(&VersionKey::new(0, 7, 0).with_hotfix(true), &new),
            "pf2_0701-073.patch"
        );
        assert_eq!(
            config.patch_url(&old, &new),
            "https://example.com/patches/pf2_072-073.patch"
        );
        assert_eq!(
            config.patch_path(&old, &new),
            PathBuf::from("/work").join("pf2_072-073.patch")
        );
    }

    #[test]
    fn configured_root_beats_locators() {
        let other = FixedLocator(PathBuf::from("/elsewhere"));
        let config = resolve(&fake_yaml(), &[&other]).unwrap();
        assert_eq!(config.install_root, PathBuf::from("/games"));

        let mut yaml = fake_yaml();
        yaml.install_root = None;
        let config = resolve(&yaml, &[&other]).unwrap();
        assert_eq!(config.install_root, PathBuf::from("/elsewhere"));
    }

    #[test]
    fn no_install_root_is_invalid_state() {
        let mut yaml = fake_yaml();
        yaml.install_root = None;
        let err = resolve(&yaml, &[]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<UpdateError>(),
            Some(UpdateError::InvalidState(_))
        ));
    }

    #[test]
    fn rejects_nested_game_dir() {
        let mut yaml = fake_yaml();
        yaml.game_dir = "../pf2".to_string();
        let err = resolve(&yaml, &[]).unwrap_err();
        assert_eq!(
            err.downcast_ref::<UpdateError>(),
            Some(&UpdateError::InvalidArgument(
                "game_dir".to_string(),
                "../pf2".to_string()
            ))
        );
    }

    #[test]
    fn hotfix_marker_lookup_ignores_hotfix_flag() {
        let config = resolve(&fake_yaml(), &[]).unwrap();
        let marker = config.hotfix_marker(&VersionKey::new(0, 7, 0));
        assert_eq!(marker.and_then(|m| m.to_str()), Some("maps/hotfix.bsp"));
        assert!(config.hotfix_marker(&VersionKey::new(0, 7, 1)).is_none());

        let mut yaml = fake_yaml();
        yaml.hotfix_markers = BTreeMap::from([("seven".to_string(), "x".to_string())]);
        assert!(resolve(&yaml, &[]).is_err());
    }

    #[test]
    fn debug_log_lives_in_work_dir() {
        let mut yaml = fake_yaml();
        yaml.debug_log = Some(true);
        let config = resolve(&yaml, &[]).unwrap();
        assert_eq!(
            config.debug_log_path(),
            Some(PathBuf::from("/work").join("update_debug_log.log"))
        );
    }
}
