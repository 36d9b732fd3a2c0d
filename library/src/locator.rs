// Finding the folder installations live under.

use std::path::{Path, PathBuf};

/// Finds the directory the installed tree lives in (the tree itself is
/// `<root>/<game_dir>`).
pub trait Locator {
    fn locate(&self) -> Option<PathBuf>;
}

/// A root given explicitly, e.g. by `install_root` in updater.yaml.
#[derive(Debug, Clone)]
pub struct FixedLocator(pub PathBuf);

impl Locator for FixedLocator {
    fn locate(&self) -> Option<PathBuf> {
        Some(self.0.clone())
    }
}

/// Steam's sourcemods folder, read from `~/.steam/registry.vdf`.
#[derive(Debug, Clone)]
pub struct SteamLocator {
    home: Option<PathBuf>,
}

const REGISTRY_KEY: &str = "SourceModInstallPath";

impl SteamLocator {
    pub fn new() -> Self {
        Self {
            home: std::env::var_os("HOME").map(PathBuf::from),
        }
    }

    pub fn with_home(home: &Path) -> Self {
        Self {
            home: Some(home.to_path_buf()),
        }
    }

    fn registry_path(&self) -> Option<PathBuf> {
        Some(self.home.as_ref()?.join(".steam").join("registry.vdf"))
    }
}

impl Default for SteamLocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Locator for SteamLocator {
    fn locate(&self) -> Option<PathBuf> {
        if cfg!(windows) {
            // Steam keeps this in the Windows registry, not in a file.
            tree_warn!("Steam lookup is not supported on Windows, set install_root instead");
            return None;
        }
        let registry = self.registry_path()?;
        let contents = match std::fs::read_to_string(&registry) {
            Ok(contents) => contents,
            Err(e) => {
                tree_warn!("Could not read {}: {}", registry.display(), e);
                return None;
            }
        };
        let found = parse_sourcemod_path(&contents);
        if found.is_none() {
            tree_warn!("No {} in {}", REGISTRY_KEY, registry.display());
        }
        found
    }
}

/// Pulls the value out of a `"SourceModInstallPath"  "<path>"` line.
fn parse_sourcemod_path(registry: &str) -> Option<PathBuf> {
    let line = registry.lines().find(|line| line.contains(REGISTRY_KEY))?;
    // ["\t\t", "SourceModInstallPath", "\t\t", "<path>", ""]
    let value = line.split('"').nth(3)?;
    if value.is_empty() {
        return None;
    }
    Some(PathBuf::from(value.replace("\\\\", "/")))
}

/// Tries each locator in turn.
pub fn locate_first(locators: &[&dyn Locator]) -> Option<PathBuf> {
    locators.iter().find_map(|locator| locator.locate())
}
