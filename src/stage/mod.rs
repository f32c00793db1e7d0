//! Data staging.
//!
//! Materializes the run's input dataset into the canonical BIDS layout:
//! resolves a download manifest from the remote store, fetches every entry
//! with an atomic per-file write, injects any auxiliary anatomy the platform
//! provided, and validates that the staged dataset actually contains
//! diffusion data before the pipeline is allowed to start.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::context::{AuxiliaryInput, RunContext};
use crate::remote::{FileRef, ManifestEntry, RemoteError, RemoteStore};

#[derive(Debug, Error)]
pub enum StageError {
    #[error("manifest resolution failed: {0}")]
    Manifest(#[source] RemoteError),

    #[error("download of {name} failed: {source}")]
    Download {
        name: String,
        #[source]
        source: RemoteError,
    },

    #[error("placement of auxiliary {modality} failed: {reason}")]
    AuxiliaryPlacement { modality: String, reason: String },

    #[error("staged dataset at {0} contains no diffusion series")]
    EmptyDataset(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The resolved list of remote files staging must fetch, with the selection
/// it covers. Produced once per run, consumed once, never persisted.
#[derive(Debug, Clone)]
pub struct DownloadManifest {
    pub entries: Vec<ManifestEntry>,
    pub subjects: Vec<String>,
    pub sessions: Option<Vec<String>>,
}

/// Stages input data for a run. Holds the remote store; all destination
/// paths come from the caller.
pub struct Stager {
    store: Arc<dyn RemoteStore>,
}

impl Stager {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    /// Run the whole staging sequence for a context. The first failing
    /// sub-operation aborts staging; partially staged data stays on disk
    /// for later debugging.
    pub async fn stage(&self, ctx: &RunContext) -> Result<(), StageError> {
        let manifest = self.resolve_manifest(ctx).await?;
        info!(
            "resolved manifest: {} files for subjects {:?}",
            manifest.entries.len(),
            manifest.subjects
        );

        self.materialize(&manifest, &ctx.paths.bids_dataset).await?;

        for aux in [&ctx.inputs.t1_anatomy, &ctx.inputs.t2_anatomy]
            .into_iter()
            .flatten()
        {
            self.place_auxiliary(aux, &ctx.paths.bids_dataset).await?;
        }

        self.validate(&ctx.paths.bids_dataset)?;
        log_staged_tree(&ctx.paths.bids_dataset);
        Ok(())
    }

    /// Ask the store for every file belonging to the run's selection. An
    /// empty manifest is a valid answer; a failed query is not.
    pub async fn resolve_manifest(&self, ctx: &RunContext) -> Result<DownloadManifest, StageError> {
        let subjects = ctx.staging_subjects();
        let sessions = ctx.staging_sessions();
        let entries = self
            .store
            .resolve_manifest(&ctx.project_label, &subjects, sessions.as_deref())
            .await
            .map_err(StageError::Manifest)?;
        Ok(DownloadManifest {
            entries,
            subjects,
            sessions,
        })
    }

    /// Fetch every manifest entry under `dataset_root`. Each file goes
    /// through a temp file in its destination directory and is renamed into
    /// place, so a failed fetch never leaves a half-written destination.
    /// Re-running over a partial tree converges to the same final tree.
    pub async fn materialize(
        &self,
        manifest: &DownloadManifest,
        dataset_root: &Path,
    ) -> Result<(), StageError> {
        std::fs::create_dir_all(dataset_root)?;
        for entry in &manifest.entries {
            let dest = dataset_root.join(&entry.dest);
            self.fetch_into(&entry.file, &dest).await?;
        }
        Ok(())
    }

    /// Inject one auxiliary anatomical scan at its self-described place
    /// inside the staged dataset, sidecar metadata next to it. The remote
    /// lookup must name exactly one file; an existing destination is
    /// overwritten with a warning, never silently.
    pub async fn place_auxiliary(
        &self,
        aux: &AuxiliaryInput,
        dataset_root: &Path,
    ) -> Result<(), StageError> {
        info!("adding external {} image", aux.modality);
        let matches = self
            .store
            .lookup_file(&aux.container_id, &aux.name)
            .await
            .map_err(|e| aux_error(aux, format!("lookup failed: {e}")))?;
        if matches.len() != 1 {
            return Err(aux_error(
                aux,
                format!(
                    "expected exactly one remote match for {}, found {}",
                    aux.name,
                    matches.len()
                ),
            ));
        }

        let found = &matches[0];
        let bids_path = found
            .bids_path
            .as_deref()
            .ok_or_else(|| aux_error(aux, "remote file has no curated placement".to_string()))?;
        let dest = dataset_root.join(bids_path);
        if dest.exists() {
            warn!(
                "overwriting existing {} image at {}",
                aux.modality,
                dest.display()
            );
        }
        self.fetch_into(&found.file, &dest).await?;

        let sidecar = sidecar_path(&dest);
        self.store
            .fetch_sidecar(&found.file, &sidecar)
            .await
            .map_err(|e| aux_error(aux, format!("sidecar fetch failed: {e}")))?;
        Ok(())
    }

    /// The staged dataset must hold at least one diffusion-weighted file:
    /// anything under a `dwi/` directory or carrying a `_dwi.` suffix.
    pub fn validate(&self, dataset_root: &Path) -> Result<(), StageError> {
        let has_dwi = WalkDir::new(dataset_root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .any(|e| is_diffusion_file(e.path()));
        if has_dwi {
            Ok(())
        } else {
            Err(StageError::EmptyDataset(dataset_root.to_path_buf()))
        }
    }

    async fn fetch_into(&self, file: &FileRef, dest: &Path) -> Result<(), StageError> {
        let parent = match dest.parent() {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                parent
            }
            None => Path::new("."),
        };
        let tmp = NamedTempFile::new_in(parent)?;
        self.store
            .fetch_file(file, tmp.path())
            .await
            .map_err(|source| StageError::Download {
                name: file.name.clone(),
                source,
            })?;
        tmp.persist(dest).map_err(|e| StageError::Io(e.error))?;
        Ok(())
    }
}

fn aux_error(aux: &AuxiliaryInput, reason: String) -> StageError {
    StageError::AuxiliaryPlacement {
        modality: aux.modality.clone(),
        reason,
    }
}

fn is_diffusion_file(path: &Path) -> bool {
    let in_dwi_dir = path
        .parent()
        .and_then(|p| p.file_name())
        .is_some_and(|name| name == "dwi");
    let named_dwi = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.contains("_dwi."));
    in_dwi_dir || named_dwi
}

/// Derive the sidecar metadata path for an imaging file: the imaging
/// extension is replaced by `.json`.
pub fn sidecar_path(image: &Path) -> PathBuf {
    let name = image.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let stem = name
        .strip_suffix(".nii.gz")
        .or_else(|| name.strip_suffix(".nii"))
        .unwrap_or(name);
    image.with_file_name(format!("{stem}.json"))
}

fn log_staged_tree(root: &Path) {
    info!("staged dataset at {}", root.display());
    for entry in WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
    {
        let name = entry.file_name().to_string_lossy();
        info!("{}{}", "  ".repeat(entry.depth()), name);
    }
}
