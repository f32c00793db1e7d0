//! Scripted in-memory store for tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::{FileRef, ManifestEntry, RemoteError, RemoteFile, RemoteStore, RunHierarchy};

/// In-memory [`RemoteStore`] double. Script its answers with the `with_*`
/// builders, then hand clones to the code under test; all clones share state
/// so call history stays observable.
#[derive(Clone, Default)]
pub struct MockRemoteStore {
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    hierarchy: Option<RunHierarchy>,
    manifest: Vec<ManifestEntry>,
    manifest_error: Option<String>,
    contents: HashMap<FileRef, Vec<u8>>,
    sidecars: HashMap<FileRef, Vec<u8>>,
    lookups: HashMap<(String, String), Vec<RemoteFile>>,
    failing_fetches: HashSet<FileRef>,
    calls: Vec<String>,
}

impl MockRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hierarchy(self, hierarchy: RunHierarchy) -> Self {
        self.state.lock().unwrap().hierarchy = Some(hierarchy);
        self
    }

    /// Add a manifest entry together with the bytes `fetch_file` serves for it.
    pub fn with_manifest_entry(self, entry: ManifestEntry, content: &[u8]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.contents.insert(entry.file.clone(), content.to_vec());
            state.manifest.push(entry);
        }
        self
    }

    /// Make manifest resolution itself fail.
    pub fn failing_manifest(self, message: &str) -> Self {
        self.state.lock().unwrap().manifest_error = Some(message.to_string());
        self
    }

    /// Script the answer of a single-file lookup.
    pub fn with_lookup(self, container_id: &str, name: &str, matches: Vec<RemoteFile>) -> Self {
        self.state
            .lock()
            .unwrap()
            .lookups
            .insert((container_id.to_string(), name.to_string()), matches);
        self
    }

    pub fn with_content(self, file: FileRef, content: &[u8]) -> Self {
        self.state
            .lock()
            .unwrap()
            .contents
            .insert(file, content.to_vec());
        self
    }

    pub fn with_sidecar(self, file: FileRef, content: &[u8]) -> Self {
        self.state
            .lock()
            .unwrap()
            .sidecars
            .insert(file, content.to_vec());
        self
    }

    /// Make fetches of one specific file fail.
    pub fn failing_fetch(self, file: FileRef) -> Self {
        self.state.lock().unwrap().failing_fetches.insert(file);
        self
    }

    /// Every call recorded in order, for assertions on sequencing.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.starts_with("fetch_file"))
            .count()
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl RemoteStore for MockRemoteStore {
    async fn resolve_hierarchy(&self, run_id: &str) -> Result<RunHierarchy, RemoteError> {
        self.record(format!("resolve_hierarchy {run_id}"));
        self.state
            .lock()
            .unwrap()
            .hierarchy
            .clone()
            .ok_or_else(|| RemoteError::Query("no hierarchy scripted".to_string()))
    }

    async fn resolve_manifest(
        &self,
        project_label: &str,
        subjects: &[String],
        sessions: Option<&[String]>,
    ) -> Result<Vec<ManifestEntry>, RemoteError> {
        self.record(format!(
            "resolve_manifest {project_label} subjects={subjects:?} sessions={sessions:?}"
        ));
        let state = self.state.lock().unwrap();
        match &state.manifest_error {
            Some(message) => Err(RemoteError::Query(message.clone())),
            None => Ok(state.manifest.clone()),
        }
    }

    async fn fetch_file(&self, file: &FileRef, dest: &Path) -> Result<(), RemoteError> {
        self.record(format!("fetch_file {}/{}", file.container_id, file.name));
        let content = {
            let state = self.state.lock().unwrap();
            if state.failing_fetches.contains(file) {
                return Err(RemoteError::Query(format!(
                    "scripted fetch failure for {}",
                    file.name
                )));
            }
            state.contents.get(file).cloned()
        };
        match content {
            Some(bytes) => {
                tokio::fs::write(dest, bytes).await?;
                Ok(())
            }
            None => Err(RemoteError::Query(format!(
                "no content scripted for {}/{}",
                file.container_id, file.name
            ))),
        }
    }

    async fn lookup_file(
        &self,
        container_id: &str,
        name: &str,
    ) -> Result<Vec<RemoteFile>, RemoteError> {
        self.record(format!("lookup_file {container_id}/{name}"));
        let state = self.state.lock().unwrap();
        Ok(state
            .lookups
            .get(&(container_id.to_string(), name.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_sidecar(&self, file: &FileRef, dest: &Path) -> Result<(), RemoteError> {
        self.record(format!("fetch_sidecar {}/{}", file.container_id, file.name));
        let content = self.state.lock().unwrap().sidecars.get(file).cloned();
        match content {
            Some(bytes) => {
                tokio::fs::write(dest, bytes).await?;
                Ok(())
            }
            None => Err(RemoteError::Query(format!(
                "no sidecar scripted for {}/{}",
                file.container_id, file.name
            ))),
        }
    }
}
