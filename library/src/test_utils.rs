/// Helper methods for tests.
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Writes `files` (relative path, contents) under `root`, creating parents.
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (relative, contents) in files {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }
}

/// Every regular file under `root` as relative path -> contents, with `/`
/// separators so snapshots compare equal across platforms.
pub fn snapshot(root: &Path) -> BTreeMap<String, String> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .map(|entry| entry.unwrap())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| {
            let relative = entry.path().strip_prefix(root).unwrap();
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            (key, fs::read_to_string(entry.path()).unwrap())
        })
        .collect()
}

/// One file in a package written by `write_vpk`. `archive_index` 0x7fff keeps
/// `data` in the directory file, anything else in `<stem>_NNN.vpk`.
pub struct VpkFile<'a> {
    pub path: &'a str,
    pub preload: &'a [u8],
    pub data: &'a [u8],
    pub archive_index: u16,
}

impl<'a> VpkFile<'a> {
    pub fn inline(path: &'a str, data: &'a [u8]) -> Self {
        Self {
            path,
            preload: b"",
            data,
            archive_index: 0x7fff,
        }
    }
}

/// Writes a `<stem>_dir.vpk` at `path` (plus numbered archives as needed).
pub fn write_vpk(path: &Path, version: u32, files: &[VpkFile]) {
    // extension -> directory -> entries, the way the tree nests them.
    let mut tree: BTreeMap<&str, BTreeMap<&str, Vec<(&str, &VpkFile)>>> = BTreeMap::new();
    for file in files {
        let (dir, name) = file.path.rsplit_once('/').unwrap_or((" ", file.path));
        let (stem, extension) = name.rsplit_once('.').unwrap_or((name, " "));
        tree.entry(extension)
            .or_default()
            .entry(dir)
            .or_default()
            .push((stem, file));
    }

    let mut inline_data = Vec::new();
    let mut archives: BTreeMap<u16, Vec<u8>> = BTreeMap::new();
    let mut tree_bytes = Vec::new();
    fn push_str(bytes: &mut Vec<u8>, s: &str) {
        bytes.extend_from_slice(s.as_bytes());
        bytes.push(0);
    }
    for (extension, dirs) in &tree {
        push_str(&mut tree_bytes, extension);
        for (dir, entries) in dirs {
            push_str(&mut tree_bytes, dir);
            for (stem, file) in entries {
                push_str(&mut tree_bytes, stem);
                let target = if file.archive_index == 0x7fff {
                    &mut inline_data
                } else {
                    archives.entry(file.archive_index).or_default()
                };
                let offset = target.len() as u32;
                target.extend_from_slice(file.data);
                tree_bytes.extend_from_slice(&0u32.to_le_bytes());
                tree_bytes.extend_from_slice(&(file.preload.len() as u16).to_le_bytes());
                tree_bytes.extend_from_slice(&file.archive_index.to_le_bytes());
                tree_bytes.extend_from_slice(&offset.to_le_bytes());
                tree_bytes.extend_from_slice(&(file.data.len() as u32).to_le_bytes());
                tree_bytes.extend_from_slice(&0xffffu16.to_le_bytes());
                tree_bytes.extend_from_slice(file.preload);
            }
            tree_bytes.push(0);
        }
        tree_bytes.push(0);
    }
    tree_bytes.push(0);

    let mut bytes = Vec::new();
    bytes.extend_from_slice(&0x55aa_1234u32.to_le_bytes());
    bytes.extend_from_slice(&version.to_le_bytes());
    bytes.extend_from_slice(&(tree_bytes.len() as u32).to_le_bytes());
    if version == 2 {
        bytes.extend_from_slice(&(inline_data.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&[0; 12]);
    }
    bytes.extend_from_slice(&tree_bytes);
    bytes.extend_from_slice(&inline_data);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, bytes).unwrap();

    let dir_name = path.file_name().unwrap().to_str().unwrap();
    let stem = dir_name.strip_suffix("_dir.vpk").unwrap();
    for (index, data) in archives {
        fs::write(path.with_file_name(format!("{}_{:03}.vpk", stem, index)), data).unwrap();
    }
}
