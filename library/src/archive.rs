// Unpacking downloaded builds.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{bail, Context};

use crate::file_errors::{FileOperation, IoResultExt};
use crate::updater::UpdateError;

/// Unpacks a build archive into a directory.
pub trait Extract {
    fn extract(&self, archive: &Path, dest: &Path) -> anyhow::Result<()>;
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum ArchiveKind {
    TarGz,
    Zip,
}

fn archive_kind(path: &Path) -> Option<ArchiveKind> {
    let name = path.file_name()?.to_str()?.to_ascii_lowercase();
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Some(ArchiveKind::TarGz)
    } else if name.ends_with(".zip") {
        Some(ArchiveKind::Zip)
    } else {
        None
    }
}

/// Handles `.tar.gz`/`.tgz` and `.zip`, picked by file name.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArchiveExtractor;

impl Extract for ArchiveExtractor {
    fn extract(&self, archive: &Path, dest: &Path) -> anyhow::Result<()> {
        let kind = match archive_kind(archive) {
            Some(kind) => kind,
            None => bail!(UpdateError::InvalidArgument(
                "archive".to_string(),
                archive.display().to_string()
            )),
        };
        std::fs::create_dir_all(dest).with_file_context(FileOperation::CreateDir, dest)?;
        let file = File::open(archive).with_file_context(FileOperation::ReadFile, archive)?;
        tree_info!("Extracting {} to {}", archive.display(), dest.display());
        match kind {
            ArchiveKind::TarGz => {
                let decoder = flate2::read::GzDecoder::new(BufReader::new(file));
                // unpack() refuses entries that would land outside `dest`.
                tar::Archive::new(decoder)
                    .unpack(dest)
                    .with_context(|| format!("Failed to extract {}", archive.display()))?;
            }
            ArchiveKind::Zip => {
                let mut zip = zip::ZipArchive::new(BufReader::new(file))
                    .with_context(|| format!("Failed to open {}", archive.display()))?;
                zip.extract(dest)
                    .with_context(|| format!("Failed to extract {}", archive.display()))?;
            }
        }
        Ok(())
    }
}
