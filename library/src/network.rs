// This file's job is to deal with the build server side of the updater.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::bail;

use crate::file_errors::{FileOperation, IoResultExt};
use crate::updater::UpdateError;

pub type FetchTextFn = fn(&str) -> anyhow::Result<String>;
pub type DownloadFileFn = fn(&str, &Path) -> anyhow::Result<()>;

/// A container for network callbacks which can be mocked out for testing.
#[derive(Clone, Copy)]
pub struct NetworkHooks {
    /// Fetches a small text resource, e.g. the remote version file.
    pub fetch_text_fn: FetchTextFn,
    /// Downloads a resource to the given path.
    pub download_file_fn: DownloadFileFn,
}

// We have to implement Debug by hand since fn types don't implement it.
impl core::fmt::Debug for NetworkHooks {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkHooks")
            .field("fetch_text_fn", &"<fn>")
            .field("download_file_fn", &"<fn>")
            .finish()
    }
}

impl Default for NetworkHooks {
    fn default() -> Self {
        Self {
            fetch_text_fn: fetch_text_default,
            download_file_fn: download_file_default,
        }
    }
}

/// Sends a GET request to `url`. Failures, including non-success statuses,
/// come back as `UpdateError::Network`.
pub fn send_get(url: &str) -> anyhow::Result<reqwest::blocking::Response> {
    let client = reqwest::blocking::Client::new();
    handle_network_result(client.get(url).send())
}

pub fn fetch_text_default(url: &str) -> anyhow::Result<String> {
    tree_debug!("Fetching {}", url);
    let response = send_get(url)?;
    Ok(response.text()?)
}

pub fn download_file_default(url: &str, path: &Path) -> anyhow::Result<()> {
    tree_info!("Downloading {} to {}", url, path.display());
    let mut response = send_get(url)?;
    let file = File::create(path).with_file_context(FileOperation::CreateFile, path)?;
    // Builds are far too big to buffer in memory.
    let mut writer = BufWriter::new(file);
    response.copy_to(&mut writer)?;
    let file = writer
        .into_inner()
        .map_err(|e| e.into_error())
        .with_file_context(FileOperation::WriteFile, path)?;
    file.sync_all()
        .with_file_context(FileOperation::WriteFile, path)?;
    Ok(())
}

/// Downloads `url` to `path`. The hook writes to a `.part` file next to
/// `path` which is renamed into place only once complete, so `path`
/// existing means the download finished.
pub fn download_to_path(hooks: &NetworkHooks, url: &str, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_file_context(FileOperation::CreateDir, parent)?;
    }
    let partial = partial_path(path);
    (hooks.download_file_fn)(url, &partial)?;
    fs::rename(&partial, path).with_file_context(FileOperation::RenameFile, path)?;
    Ok(())
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Handles the result of a network request, returning the response if it was
/// successful, an error if it was not, or a special error if the network
/// request failed due to a lack of internet connection.
fn handle_network_result(
    result: Result<reqwest::blocking::Response, reqwest::Error>,
) -> anyhow::Result<reqwest::blocking::Response> {
    use std::error::Error;

    match result {
        Ok(response) => {
            if response.status().is_success() {
                Ok(response)
            } else {
                bail!(UpdateError::Network(format!(
                    "Request to {} failed with status: {}",
                    response.url(),
                    response.status()
                )))
            }
        }
        Err(e) => match e.source() {
            Some(source)
                if source
                    .to_string()
                    .contains("failed to lookup address information") =>
            {
                bail!(UpdateError::Network(
                    "Request failed due to network error. Please check your internet connection."
                        .to_string()
                ));
            }
            _ => {
                let message = e.to_string();
                Err(anyhow::Error::new(e).context(UpdateError::Network(message)))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::*;

    fn network_error(err: &anyhow::Error) -> String {
        match err.downcast_ref::<UpdateError>() {
            Some(UpdateError::Network(message)) => message.clone(),
            other => panic!("expected a network error, got {:?}", other),
        }
    }

    #[test]
    fn network_hooks_debug() {
        let network_hooks = NetworkHooks::default();
        let debug = format!("{:?}", network_hooks);
        assert!(debug.contains("fetch_text_fn"));
        assert!(debug.contains("download_file_fn"));
    }

    #[test]
    fn handle_network_result_ok() {
        let http_response = http::response::Builder::new()
            .status(200)
            .body("".to_string())
            .unwrap();
        let response = reqwest::blocking::Response::from(http_response);

        let result = super::handle_network_result(Ok(response));

        assert!(result.is_ok());
    }

    #[test]
    fn handle_network_result_http_status_not_ok() {
        let http_response = http::response::Builder::new()
            .status(500)
            .body("".to_string())
            .unwrap();
        let response = reqwest::blocking::Response::from(http_response);

        let err = super::handle_network_result(Ok(response)).unwrap_err();

        assert!(network_error(&err).ends_with("failed with status: 500 Internal Server Error"));
    }

    #[test]
    fn handle_network_result_no_internet() {
        // A host that doesn't resolve looks the same as having no connection.
        let err = fetch_text_default("http://asdfasdfasdfasdfasdf.asdfasdf/version.txt")
            .unwrap_err();
        assert_eq!(
            network_error(&err),
            "Request failed due to network error. Please check your internet connection."
        );
    }

    #[test]
    fn handle_network_result_unknown_error() {
        // A relative URL fails before any request is made.
        let err = fetch_text_default("version.txt").unwrap_err();
        assert!(network_error(&err).starts_with("builder error"));
    }

    #[test]
    fn fetch_text_returns_body() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/builds/version.txt")
            .with_status(200)
            .with_body("key=0.7.3")
            .create();

        let body = fetch_text_default(&format!("{}/builds/version.txt", server.url())).unwrap();

        assert_eq!(body, "key=0.7.3");
        mock.assert();
    }

    #[test]
    fn fetch_text_reports_missing_file() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/builds/version.txt")
            .with_status(404)
            .create();

        let err = fetch_text_default(&format!("{}/builds/version.txt", server.url()))
            .unwrap_err();

        assert!(network_error(&err).contains("404 Not Found"));
    }

    #[test]
    fn download_to_path_writes_file() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/patches/pf2_072-073.patch")
            .with_status(200)
            .with_body("Binary files a/pf2/x and b/pf2/x differ\n")
            .create();
        let tmp_dir = TempDir::new("network").unwrap();
        let path = tmp_dir.path().join("work").join("pf2_072-073.patch");

        download_to_path(
            &NetworkHooks::default(),
            &format!("{}/patches/pf2_072-073.patch", server.url()),
            &path,
        )
        .unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "Binary files a/pf2/x and b/pf2/x differ\n"
        );
        assert!(!partial_path(&path).exists());
    }

    #[test]
    fn download_writes_every_byte_of_a_large_body() {
        // Several times the BufWriter capacity, and not a multiple of it.
        let body: String = (0..100_003).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/latest.tar.gz")
            .with_status(200)
            .with_body(&body)
            .create();
        let tmp_dir = TempDir::new("network").unwrap();
        let path = tmp_dir.path().join("latest.tar.gz");

        download_file_default(&format!("{}/latest.tar.gz", server.url()), &path).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), body);
    }

    #[test]
    fn send_get_maps_status_to_network_error() {
        let mut server = mockito::Server::new();
        let _mock = server.mock("GET", "/latest.tar.gz").with_status(404).create();

        let err = send_get(&format!("{}/latest.tar.gz", server.url())).unwrap_err();

        assert!(network_error(&err).contains("404 Not Found"));
    }

    #[test]
    fn failed_download_leaves_no_file() {
        let mut server = mockito::Server::new();
        let _mock = server.mock("GET", "/latest.tar.gz").with_status(503).create();
        let tmp_dir = TempDir::new("network").unwrap();
        let path = tmp_dir.path().join("latest.tar.gz");

        let result = download_to_path(
            &NetworkHooks::default(),
            &format!("{}/latest.tar.gz", server.url()),
            &path,
        );

        assert!(result.is_err());
        assert!(!path.exists());
    }
}
