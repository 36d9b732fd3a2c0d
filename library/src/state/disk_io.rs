use anyhow::{bail, Context};
use serde::{de::DeserializeOwned, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// Serializes `serializable` as json to `path`.
///
/// The json is written to a temporary file in the same directory and renamed
/// over `path`, so a crash mid-write leaves either the old or the new
/// contents, never a truncated file.
pub fn write<S, P>(serializable: &S, path: &P) -> anyhow::Result<()>
where
    S: ?Sized + Serialize,
    P: AsRef<Path>,
{
    tree_debug!("Writing to {:?}", path.as_ref());

    let path_as_ref = path.as_ref();
    let containing_dir = path_as_ref
        .parent()
        .with_context(|| format!("Failed to get parent dir for {:?}", path_as_ref))?;

    std::fs::create_dir_all(containing_dir)
        .with_context(|| format!("Failed to create dir {:?}", containing_dir))?;

    let temp = tempfile::NamedTempFile::new_in(containing_dir)
        .with_context(|| format!("Failed to create temp file in {:?}", containing_dir))?;
    {
        let mut writer = BufWriter::new(temp.as_file());
        serde_json::to_writer_pretty(&mut writer, serializable)
            .with_context(|| format!("failed to serialize to {:?}", path_as_ref))?;
        writer.flush()?;
    }
    temp.as_file()
        .sync_all()
        .with_context(|| format!("failed to sync {:?}", path_as_ref))?;
    temp.persist(path_as_ref)
        .with_context(|| format!("failed to move temp file to {:?}", path_as_ref))?;
    Ok(())
}

pub fn read<D, P>(path: &P) -> anyhow::Result<D>
where
    D: DeserializeOwned,
    P: AsRef<Path>,
{
    tree_debug!("Reading from {:?}", path.as_ref());

    let path_as_ref = path.as_ref();
    if !path_as_ref.exists() {
        bail!("File {} does not exist", path_as_ref.display());
    }

    let file = File::open(path_as_ref)?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader)
        .with_context(|| format!("failed to deserialize from {:?}", &path_as_ref))
}
