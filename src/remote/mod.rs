//! Remote data store contract.
//!
//! Staging talks to the platform's data store exclusively through the
//! [`RemoteStore`] trait so the rest of the crate stays testable without
//! network access. [`HttpRemoteStore`] is the production client;
//! [`MockRemoteStore`] is the scripted in-memory double used by tests.

pub mod http;
pub mod mock;

pub use http::HttpRemoteStore;
pub use mock::MockRemoteStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("malformed api key, expected <host>:<secret>")]
    MalformedKey,

    #[error("remote query failed: {0}")]
    Query(String),

    #[error("remote returned status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid store URL: {0}")]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Reference to a single file held by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileRef {
    /// Container (acquisition) the file lives in.
    pub container_id: String,
    /// File name within the container.
    pub name: String,
}

impl FileRef {
    pub fn new(container_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            name: name.into(),
        }
    }
}

/// One manifest entry: a remote file and where it lands under the staging root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub file: FileRef,
    /// Destination path relative to the staging root.
    pub dest: PathBuf,
}

/// File metadata returned by a single-file lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteFile {
    pub file: FileRef,
    /// The file's self-described placement inside a BIDS dataset, when the
    /// store has curated it.
    pub bids_path: Option<String>,
}

/// Container labels resolved for a run destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunHierarchy {
    pub project_label: String,
    pub subject_label: String,
    pub session_label: String,
}

/// The narrow contract the orchestrator needs from the platform data store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Resolve the project/subject/session labels a run destination belongs to.
    async fn resolve_hierarchy(&self, run_id: &str) -> Result<RunHierarchy, RemoteError>;

    /// List every file belonging to the given subjects and sessions, with its
    /// BIDS-relative destination. `sessions = None` means all sessions.
    /// An empty result is not an error.
    async fn resolve_manifest(
        &self,
        project_label: &str,
        subjects: &[String],
        sessions: Option<&[String]>,
    ) -> Result<Vec<ManifestEntry>, RemoteError>;

    /// Fetch one file's content to a local path.
    async fn fetch_file(&self, file: &FileRef, dest: &Path) -> Result<(), RemoteError>;

    /// Look up files named `name` in a container. Zero or several matches are
    /// a valid answer; the caller decides what counts as an error.
    async fn lookup_file(
        &self,
        container_id: &str,
        name: &str,
    ) -> Result<Vec<RemoteFile>, RemoteError>;

    /// Fetch the sidecar metadata document for a file to a local path.
    async fn fetch_sidecar(&self, file: &FileRef, dest: &Path) -> Result<(), RemoteError>;
}
