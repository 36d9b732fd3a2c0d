use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (relative, contents) in files {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }
}

pub fn snapshot(root: &Path) -> BTreeMap<String, String> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .map(|entry| entry.unwrap())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| {
            let key = entry
                .path()
                .strip_prefix(root)
                .unwrap()
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            (key, fs::read_to_string(entry.path()).unwrap())
        })
        .collect()
}

/// A gzipped tarball of `files`, as the build server would serve it.
pub fn tar_gz(files: &[(&str, &str)]) -> Vec<u8> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, name, contents.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

pub fn updater_yaml(server_url: &str, install_root: &Path, work_dir: &Path) -> String {
    format!(
        "\
base_url: {server_url}/builds
patch_base_url: {server_url}/patches
patch_prefix: pf2_
game_dir: pf2
required_files:
  - gameinfo.txt
install_root: {}
work_dir: {}
",
        install_root.display(),
        work_dir.display()
    )
}
