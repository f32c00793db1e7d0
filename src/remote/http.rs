//! Production HTTP client for the platform data store.

use async_trait::async_trait;
use reqwest::Response;
use serde::Serialize;
use std::path::Path;
use url::Url;

use super::{FileRef, ManifestEntry, RemoteError, RemoteFile, RemoteStore, RunHierarchy};

/// HTTP implementation of [`RemoteStore`].
///
/// Credentials use the platform's `<host>:<secret>` key format; the host part
/// names the site the store lives on.
pub struct HttpRemoteStore {
    base: Url,
    secret: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ManifestQuery<'a> {
    subjects: &'a [String],
    sessions: Option<&'a [String]>,
}

impl HttpRemoteStore {
    /// Build a client from a `<host>:<secret>` api key.
    pub fn from_key(key: &str) -> Result<Self, RemoteError> {
        let (host, secret) = key.rsplit_once(':').ok_or(RemoteError::MalformedKey)?;
        if host.is_empty() || secret.is_empty() {
            return Err(RemoteError::MalformedKey);
        }
        let base = Url::parse(&format!("https://{host}/api/"))?;
        Ok(Self {
            base,
            secret: secret.to_string(),
            client: reqwest::Client::new(),
        })
    }

    /// Build a client against an explicit base URL, mainly for tests.
    pub fn new(base: Url, secret: impl Into<String>) -> Self {
        Self {
            base,
            secret: secret.into(),
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, RemoteError> {
        Ok(self.base.join(path)?)
    }

    async fn get(&self, url: Url) -> Result<Response, RemoteError> {
        let resp = self
            .client
            .get(url.clone())
            .header("Authorization", format!("scitran-user {}", self.secret))
            .send()
            .await?;
        Self::check_status(resp, &url)
    }

    fn check_status(resp: Response, url: &Url) -> Result<Response, RemoteError> {
        if resp.status().is_success() {
            Ok(resp)
        } else {
            Err(RemoteError::Status {
                status: resp.status().as_u16(),
                url: url.to_string(),
            })
        }
    }

    async fn download(&self, url: Url, dest: &Path) -> Result<(), RemoteError> {
        let bytes = self.get(url).await?.bytes().await?;
        tokio::fs::write(dest, &bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn resolve_hierarchy(&self, run_id: &str) -> Result<RunHierarchy, RemoteError> {
        let url = self.endpoint(&format!("analyses/{run_id}/hierarchy"))?;
        Ok(self.get(url).await?.json().await?)
    }

    async fn resolve_manifest(
        &self,
        project_label: &str,
        subjects: &[String],
        sessions: Option<&[String]>,
    ) -> Result<Vec<ManifestEntry>, RemoteError> {
        let url = self.endpoint(&format!("projects/{project_label}/manifest"))?;
        let resp = self
            .client
            .post(url.clone())
            .header("Authorization", format!("scitran-user {}", self.secret))
            .json(&ManifestQuery { subjects, sessions })
            .send()
            .await?;
        Ok(Self::check_status(resp, &url)?.json().await?)
    }

    async fn fetch_file(&self, file: &FileRef, dest: &Path) -> Result<(), RemoteError> {
        let url = self.endpoint(&format!(
            "containers/{}/files/{}",
            file.container_id, file.name
        ))?;
        self.download(url, dest).await
    }

    async fn lookup_file(
        &self,
        container_id: &str,
        name: &str,
    ) -> Result<Vec<RemoteFile>, RemoteError> {
        let mut url = self.endpoint(&format!("containers/{container_id}/files"))?;
        url.query_pairs_mut().append_pair("name", name);
        Ok(self.get(url).await?.json().await?)
    }

    async fn fetch_sidecar(&self, file: &FileRef, dest: &Path) -> Result<(), RemoteError> {
        let url = self.endpoint(&format!(
            "containers/{}/files/{}/sidecar",
            file.container_id, file.name
        ))?;
        self.download(url, dest).await
    }
}
