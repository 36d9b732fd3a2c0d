// This file's job is to turn human-readable build versions ("0.7.3",
// "0.7-HOTFIX") into something we can compare.

use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::updater::UpdateError;

/// Suffix the build pipeline appends to hotfix releases.
const HOTFIX_SUFFIX: &str = "-HOTFIX";

/// A comparable build version.
///
/// Compared as a (major, minor, patch, hotfix) tuple, so a hotfix build sorts
/// directly after the regular build with the same numbers and before any
/// numerically higher build. For the 0.x series this agrees with the legacy
/// "strip the dots and compare integers" ordering used for patch file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionKey {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub hotfix: bool,
}

impl VersionKey {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            hotfix: false,
        }
    }

    /// Parses a dotted version string with an optional `-HOTFIX` suffix.
    /// Missing components are treated as 0 ("0.7" == "0.7.0").
    pub fn parse(version: &str) -> Result<Self, UpdateError> {
        let malformed = || UpdateError::MalformedVersion(version.to_string());

        let trimmed = version.trim();
        let (numbers, hotfix) = match trimmed.strip_suffix(HOTFIX_SUFFIX) {
            Some(base) => (base, true),
            None => (trimmed, false),
        };

        let mut components = [0u32; 3];
        let mut count = 0;
        for part in numbers.split('.') {
            if count == components.len()
                || part.is_empty()
                || !part.bytes().all(|b| b.is_ascii_digit())
            {
                return Err(malformed());
            }
            components[count] = part.parse().map_err(|_| malformed())?;
            count += 1;
        }

        Ok(Self {
            major: components[0],
            minor: components[1],
            patch: components[2],
            hotfix,
        })
    }

    /// Parses the contents of a version file (`key=<version>`). Only the text
    /// after the first `=` is significant; a bare version is accepted too.
    pub fn from_version_file(contents: &str) -> Result<Self, UpdateError> {
        let version = match contents.split_once('=') {
            Some((_, value)) => value,
            None => contents,
        };
        Self::parse(version)
    }

    pub fn with_hotfix(self, hotfix: bool) -> Self {
        Self { hotfix, ..self }
    }

    /// The digits of the version with the dots removed, e.g. "073" for 0.7.3
    /// and "070" for 0.7. Patch files on the server are named with this.
    pub fn compact(&self) -> String {
        format!("{}{}{}", self.major, self.minor, self.patch)
    }

    /// `compact()` read as an integer (73 for 0.7.3).
    #[cfg(test)]
    fn legacy_number(&self) -> u64 {
        // compact() is all digits, so this only fails on overflow, which
        // would need component values far outside anything we ship.
        self.compact().parse().unwrap_or(u64::MAX)
    }

    fn as_tuple(&self) -> (u32, u32, u32, bool) {
        (self.major, self.minor, self.patch, self.hotfix)
    }
}

impl Ord for VersionKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_tuple().cmp(&other.as_tuple())
    }
}

impl PartialOrd for VersionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for VersionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if self.hotfix {
            write!(f, "{}", HOTFIX_SUFFIX)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for VersionKey {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::VersionKey;
    use crate::UpdateError;

    fn key(s: &str) -> VersionKey {
        VersionKey::parse(s).unwrap()
    }

    #[test]
    fn parses_dotted_versions() {
        assert_eq!(key("0.7.3"), VersionKey::new(0, 7, 3));
        assert_eq!(key("0.7"), VersionKey::new(0, 7, 0));
        assert_eq!(key("1"), VersionKey::new(1, 0, 0));
        assert_eq!(key(" 0.7.3\n"), VersionKey::new(0, 7, 3));
    }

    #[test]
    fn parses_hotfix_suffix() {
        let hotfix = key("0.7-HOTFIX");
        assert!(hotfix.hotfix);
        assert_eq!(hotfix, VersionKey::new(0, 7, 0).with_hotfix(true));
    }

    #[test]
    fn rejects_malformed_versions() {
        for bad in ["", "abc", "0..7", "0.7.", "0.7.3.1", "v0.7", "0.7-beta", "-HOTFIX", "0.-1"] {
            assert_eq!(
                VersionKey::parse(bad),
                Err(UpdateError::MalformedVersion(bad.to_string())),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn ordering_follows_release_order() {
        let releases = [
            "0.5", "0.6", "0.6.1", "0.7", "0.7-HOTFIX", "0.7.1", "0.7.2", "0.7.3", "0.7.10",
            "0.8", "1.0.0",
        ];
        for pair in releases.windows(2) {
            assert!(key(pair[0]) < key(pair[1]), "{} < {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn agrees_with_legacy_numbers_for_0x_builds() {
        let releases = ["0.5", "0.6", "0.6.1", "0.7", "0.7.1", "0.7.2", "0.7.3", "0.8"];
        for a in releases {
            for b in releases {
                assert_eq!(
                    key(a).cmp(&key(b)),
                    key(a).legacy_number().cmp(&key(b).legacy_number()),
                    "{a} vs {b}"
                );
            }
        }
    }

    #[test]
    fn parse_is_pure() {
        assert_eq!(key("0.7.2"), key("0.7.2"));
        assert_eq!(key("0.7.2-HOTFIX"), key("0.7.2-HOTFIX"));
    }

    #[test]
    fn compact_matches_patch_file_naming() {
        assert_eq!(key("0.7.3").compact(), "073");
        assert_eq!(key("0.7").compact(), "070");
        assert_eq!(key("0.7").legacy_number(), 70);
        assert_eq!(key("0.7.2").legacy_number(), 72);
    }

    #[test]
    fn reads_version_files() {
        assert_eq!(
            VersionKey::from_version_file("key=0.7.3").unwrap(),
            VersionKey::new(0, 7, 3)
        );
        assert_eq!(
            VersionKey::from_version_file("0.7.3\n").unwrap(),
            VersionKey::new(0, 7, 3)
        );
        // Only the first '=' separates the key.
        assert!(VersionKey::from_version_file("key=0.7=3").is_err());
    }

    #[test]
    fn display_round_trips() {
        for s in ["0.7.3", "0.7.0-HOTFIX", "1.2.3"] {
            assert_eq!(key(s).to_string(), s);
        }
    }
}
