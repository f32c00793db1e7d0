//! Run context resolution.
//!
//! Everything a run needs (identifiers, paths, the configuration bag, and
//! platform-provided input files) is resolved exactly once at startup into
//! an immutable [`RunContext`]. The orchestrator owns it; every other
//! component only reads it.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::remote::{RemoteError, RemoteStore};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read gear config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("gear config is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("gear config names no destination run id")]
    MissingRunId,

    #[error("api key credential input is missing")]
    MissingApiKey,

    #[error("auxiliary input {0} is missing its remote reference")]
    IncompleteAuxiliary(String),

    #[error("failed to resolve run hierarchy: {0}")]
    Hierarchy(#[from] RemoteError),
}

/// The raw gear configuration document as the platform writes it: a `config`
/// bag of options, an `inputs` map of provided files, and the destination
/// container the run belongs to.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GearDoc {
    #[serde(default)]
    pub config: GearOptions,
    #[serde(default)]
    pub inputs: HashMap<String, GearInput>,
    #[serde(default)]
    pub destination: Option<Destination>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Destination {
    pub id: String,
}

/// One platform-provided input file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GearInput {
    /// Credential value, for key-type inputs.
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub hierarchy: Option<InputHierarchy>,
    #[serde(default)]
    pub location: Option<InputLocation>,
    #[serde(default)]
    pub object: Option<InputObject>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InputHierarchy {
    pub id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InputLocation {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InputObject {
    #[serde(default)]
    pub modality: Option<String>,
}

/// The configuration bag. Field names and defaults follow the processing
/// pipeline's documented options; unknown keys are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GearOptions {
    /// Space-separated correction steps to skip.
    pub ignore: String,
    /// Space-separated target output spaces; empty means pipeline default.
    pub output_space: String,
    /// Builtin reconstruction workflow name; wins over the recon_spec input.
    pub recon_builtin: Option<String>,
    /// Stage every session of the subject, not just the run's own session.
    pub use_all_sessions: bool,
    pub b0_motion_corr_to: String,
    pub b0_threshold: u32,
    pub combine_all_dwis: bool,
    pub denoise_before_combining: bool,
    pub do_reconall: bool,
    pub dwi_denoise_window: u32,
    pub fmap_bspline: bool,
    pub fmap_no_demean: bool,
    pub force_spatial_normalization: bool,
    pub force_syn: bool,
    pub hmc_model: String,
    pub hmc_transform: String,
    pub impute_slice_threshold: u32,
    pub intramodal_template_iters: u32,
    pub intramodal_template_transform: String,
    pub longitudinal: bool,
    pub notrack: bool,
    pub output_resolution: Option<f64>,
    pub prefer_dedicated_fmaps: bool,
    pub shoreline_iters: u32,
    pub skip_bids_validation: bool,
    pub skull_strip_fixed_seed: bool,
    pub skull_strip_template: String,
    pub sloppy: bool,
    /// Abort the pipeline on the first crashed node. Defaults on for
    /// unattended runs.
    pub stop_on_first_crash: bool,
    pub template: String,
    pub use_plugin: Option<String>,
    pub use_syn_sdc: bool,
    pub write_local_bvecs: bool,
    /// Retention flag: archive the working directory after the run.
    pub save_intermediate_work: bool,
    /// Retention flag: on failure, still archive partial outputs and logs.
    pub save_partial_outputs: bool,
}

impl Default for GearOptions {
    fn default() -> Self {
        Self {
            ignore: String::new(),
            output_space: String::new(),
            recon_builtin: None,
            use_all_sessions: false,
            b0_motion_corr_to: "iterative".to_string(),
            b0_threshold: 100,
            combine_all_dwis: false,
            denoise_before_combining: false,
            do_reconall: false,
            dwi_denoise_window: 5,
            fmap_bspline: false,
            fmap_no_demean: true,
            force_spatial_normalization: false,
            force_syn: false,
            hmc_model: "eddy".to_string(),
            hmc_transform: "Affine".to_string(),
            impute_slice_threshold: 0,
            intramodal_template_iters: 0,
            intramodal_template_transform: "BSplineSyN".to_string(),
            longitudinal: false,
            notrack: false,
            output_resolution: None,
            prefer_dedicated_fmaps: false,
            shoreline_iters: 2,
            skip_bids_validation: false,
            skull_strip_fixed_seed: false,
            skull_strip_template: "OASIS".to_string(),
            sloppy: false,
            stop_on_first_crash: true,
            template: "MNI152NLin2009cAsym".to_string(),
            use_plugin: None,
            use_syn_sdc: false,
            write_local_bvecs: false,
            save_intermediate_work: false,
            save_partial_outputs: false,
        }
    }
}

impl GearOptions {
    pub fn ignore_list(&self) -> Vec<String> {
        self.ignore.split_whitespace().map(String::from).collect()
    }

    pub fn output_space_list(&self) -> Vec<String> {
        self.output_space
            .split_whitespace()
            .map(String::from)
            .collect()
    }
}

/// An external anatomical scan to inject into the staged dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxiliaryInput {
    pub container_id: String,
    pub name: String,
    pub modality: String,
}

/// Platform-provided input files, resolved out of the inputs map.
#[derive(Debug, Clone, Default)]
pub struct RunInputs {
    pub api_key: String,
    pub freesurfer_license: Option<PathBuf>,
    pub eddy_config: Option<PathBuf>,
    /// Builtin workflow name or a provided spec file path.
    pub recon_spec: Option<String>,
    pub t1_anatomy: Option<AuxiliaryInput>,
    pub t2_anatomy: Option<AuxiliaryInput>,
}

/// Every path a run touches, derived once from the platform output directory
/// and the run id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
    /// Platform upload directory; archives land here and survive cleanup.
    pub output_dir: PathBuf,
    /// Per-run root, removed by terminal cleanup.
    pub run_root: PathBuf,
    pub derivatives_dir: PathBuf,
    pub working_dir: PathBuf,
    pub bids_root: PathBuf,
    pub bids_dataset: PathBuf,
}

impl RunPaths {
    pub fn derive(output_dir: &Path, run_id: &str) -> Self {
        let run_root = output_dir.join(run_id);
        Self {
            output_dir: output_dir.to_path_buf(),
            derivatives_dir: run_root.join("derivatives"),
            working_dir: run_root.join("work"),
            bids_root: run_root.join("BIDS"),
            bids_dataset: run_root.join("BIDS").join("bids_dataset"),
            run_root,
        }
    }
}

/// Frozen parameters of a single run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub project_label: String,
    pub subject_label: String,
    pub session_label: String,
    pub paths: RunPaths,
    pub options: GearOptions,
    pub inputs: RunInputs,
}

impl GearDoc {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    fn input_path(&self, name: &str) -> Option<PathBuf> {
        self.inputs
            .get(name)
            .and_then(|input| input.location.as_ref())
            .and_then(|location| location.path.clone())
    }

    fn auxiliary(&self, name: &str) -> Result<Option<AuxiliaryInput>, ConfigError> {
        let Some(input) = self.inputs.get(name) else {
            return Ok(None);
        };
        let container_id = input
            .hierarchy
            .as_ref()
            .map(|h| h.id.clone())
            .ok_or_else(|| ConfigError::IncompleteAuxiliary(name.to_string()))?;
        let file_name = input
            .location
            .as_ref()
            .and_then(|l| l.name.clone())
            .ok_or_else(|| ConfigError::IncompleteAuxiliary(name.to_string()))?;
        let modality = input
            .object
            .as_ref()
            .and_then(|o| o.modality.clone())
            .ok_or_else(|| ConfigError::IncompleteAuxiliary(name.to_string()))?;
        Ok(Some(AuxiliaryInput {
            container_id,
            name: file_name,
            modality,
        }))
    }
}

impl RunContext {
    /// Resolve a frozen context from the gear config document: required
    /// identifiers, the run hierarchy, derived paths, and input files.
    /// Configuration errors are fatal and never retried.
    pub async fn resolve(
        doc: GearDoc,
        output_dir: &Path,
        store: &dyn RemoteStore,
    ) -> Result<Self, ConfigError> {
        let run_id = doc
            .destination
            .as_ref()
            .map(|d| d.id.clone())
            .filter(|id| !id.is_empty())
            .ok_or(ConfigError::MissingRunId)?;

        let api_key = doc
            .inputs
            .get("api_key")
            .and_then(|input| input.key.clone())
            .filter(|key| !key.is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        let hierarchy = store.resolve_hierarchy(&run_id).await?;

        // The builtin reconstruction name beats a provided spec file.
        let recon_spec = doc
            .config
            .recon_builtin
            .clone()
            .filter(|name| !name.is_empty())
            .or_else(|| {
                doc.input_path("recon_spec")
                    .map(|p| p.display().to_string())
            });

        let inputs = RunInputs {
            api_key,
            freesurfer_license: doc.input_path("freesurfer_license"),
            eddy_config: doc.input_path("eddy_config"),
            recon_spec,
            t1_anatomy: doc.auxiliary("t1_anatomy")?,
            t2_anatomy: doc.auxiliary("t2_anatomy")?,
        };

        Ok(Self {
            run_id: run_id.clone(),
            project_label: hierarchy.project_label,
            subject_label: hierarchy.subject_label,
            session_label: hierarchy.session_label,
            paths: RunPaths::derive(output_dir, &run_id),
            options: doc.config,
            inputs,
        })
    }

    /// Subject selection for staging: always the run's own subject.
    pub fn staging_subjects(&self) -> Vec<String> {
        vec![self.subject_label.clone()]
    }

    /// Session selection for staging; `None` widens to all sessions.
    pub fn staging_sessions(&self) -> Option<Vec<String>> {
        if self.options.use_all_sessions {
            None
        } else {
            Some(vec![self.session_label.clone()])
        }
    }
}
