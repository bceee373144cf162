//! Uploader (`spec.md` §4.7 "interface only").
//!
//! `Upload(path, remote_key) -> {ok, fail, disabled}`. Grounded in
//! `examples/original_source/pixieveil/storage/remote_storage.py::upload_file`
//! (bearer header, multipart body, `base_url` absence disables the feature),
//! corrected per `SPEC_FULL.md` §4 from the Python client's collapsed boolean
//! return into the three-valued outcome `spec.md` §4.6/§4.7 require, so the
//! completion tracker can distinguish "nothing to do" from "try again next
//! tick". No retry logic lives here; retries are the tracker re-running the
//! pipeline on its next tick (`spec.md` §4.7).

use reqwest::multipart;
use tokio::fs;
use tracing::{error, info, warn};

use crate::config::RemoteStorageConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Ok,
    Fail,
    Disabled,
}

pub struct Uploader {
    client: reqwest::Client,
    base_url: Option<String>,
    auth_token: String,
}

impl Uploader {
    pub fn new(config: &RemoteStorageConfig) -> Self {
        Uploader {
            client: reqwest::Client::new(),
            base_url: config.base_url.clone(),
            auth_token: config.auth_token.clone().unwrap_or_default(),
        }
    }

    /// Posts `local_path` to `{base_url}/upload` as multipart, with a
    /// `remote_path` field carrying `remote_key` (`spec.md` §6 "Remote
    /// upload").
    pub async fn upload(&self, local_path: &std::path::Path, remote_key: &str) -> UploadOutcome {
        let Some(base_url) = &self.base_url else {
            warn!("remote storage not configured; upload disabled");
            return UploadOutcome::Disabled;
        };

        let bytes = match fs::read(local_path).await {
            Ok(bytes) => bytes,
            Err(error) => {
                error!(%error, path = %local_path.display(), "could not read archive for upload");
                return UploadOutcome::Fail;
            }
        };

        let file_name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "archive.zip".to_string());

        let form = multipart::Form::new()
            .text("remote_path", remote_key.to_string())
            .part("file", multipart::Part::bytes(bytes).file_name(file_name));

        let response = self
            .client
            .post(format!("{base_url}/upload"))
            .bearer_auth(&self.auth_token)
            .multipart(form)
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => {
                info!(path = %local_path.display(), remote_key, "uploaded archive");
                UploadOutcome::Ok
            }
            Ok(response) => {
                error!(status = %response.status(), "upload rejected by remote storage");
                UploadOutcome::Fail
            }
            Err(error) => {
                error!(%error, "upload transport error");
                UploadOutcome::Fail
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_base_url_disables_uploads() {
        let uploader = Uploader::new(&RemoteStorageConfig::default());
        assert!(uploader.base_url.is_none());
    }

    #[tokio::test]
    async fn disabled_uploader_never_reads_the_file() {
        let uploader = Uploader::new(&RemoteStorageConfig::default());
        let outcome = uploader
            .upload(std::path::Path::new("/does/not/exist.zip"), "0001.zip")
            .await;
        assert_eq!(outcome, UploadOutcome::Disabled);
    }

    #[tokio::test]
    async fn successful_response_yields_ok() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/upload")
            .with_status(200)
            .create_async()
            .await;

        let config = RemoteStorageConfig {
            base_url: Some(server.url()),
            auth_token: Some("secret".to_string()),
        };
        let uploader = Uploader::new(&config);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0001.zip");
        std::fs::write(&path, b"zip-bytes").unwrap();

        let outcome = uploader.upload(&path, "0001.zip").await;
        assert_eq!(outcome, UploadOutcome::Ok);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_success_response_yields_fail() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/upload")
            .with_status(500)
            .create_async()
            .await;

        let config = RemoteStorageConfig {
            base_url: Some(server.url()),
            auth_token: None,
        };
        let uploader = Uploader::new(&config);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0001.zip");
        std::fs::write(&path, b"zip-bytes").unwrap();

        let outcome = uploader.upload(&path, "0001.zip").await;
        assert_eq!(outcome, UploadOutcome::Fail);
    }
}
