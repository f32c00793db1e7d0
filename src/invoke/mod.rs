//! Pipeline invocation.
//!
//! The orchestrator never builds a command line for the processing pipeline;
//! it derives a [`PipelineParams`] record from the run context and hands it
//! to the [`Pipeline`] entry point as data. [`ProcessPipeline`] is the
//! production adapter for the packaged pipeline process; [`MockPipeline`]
//! is the scripted double used by tests.

pub mod mock;
pub mod process;

pub use mock::MockPipeline;
pub use process::ProcessPipeline;

use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

use crate::context::RunContext;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to launch pipeline: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("pipeline exited with code {0}")]
    Exit(i32),

    #[error("pipeline terminated by signal {0}")]
    Signal(i32),

    #[error("failed to encode pipeline parameters: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The full parameter record the external pipeline's entry point accepts.
/// Derived from the run context by a pure mapping; every field the pipeline
/// documents is represented so nothing rides on its own defaults silently.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineParams {
    pub analysis_level: String,
    pub bids_dir: PathBuf,
    pub output_dir: PathBuf,
    pub work_dir: PathBuf,
    pub run_uuid: String,
    pub ignore: Vec<String>,
    pub output_space: Vec<String>,
    pub b0_motion_corr_to: String,
    pub b0_threshold: u32,
    pub b0_to_t1w_transform: String,
    pub anat_only: bool,
    pub boilerplate: bool,
    pub combine_all_dwis: bool,
    pub denoise_before_combining: bool,
    pub do_reconall: bool,
    pub dwi_denoise_window: u32,
    pub eddy_config: Option<PathBuf>,
    pub fmap_bspline: bool,
    pub fmap_no_demean: bool,
    pub force_spatial_normalization: bool,
    pub force_syn: bool,
    pub fs_license_file: Option<PathBuf>,
    pub hmc_model: String,
    pub hmc_transform: String,
    pub impute_slice_threshold: u32,
    pub intramodal_template_iters: u32,
    pub intramodal_template_transform: String,
    pub longitudinal: bool,
    pub low_mem: bool,
    pub mem_mb: u32,
    pub notrack: bool,
    pub nthreads: Option<u32>,
    pub omp_nthreads: u32,
    pub output_resolution: Option<f64>,
    pub prefer_dedicated_fmaps: bool,
    pub recon_only: bool,
    pub recon_spec: Option<String>,
    pub reports_only: bool,
    pub resource_monitor: bool,
    pub shoreline_iters: u32,
    pub skip_bids_validation: bool,
    pub skull_strip_fixed_seed: bool,
    pub skull_strip_template: String,
    pub sloppy: bool,
    pub stop_on_first_crash: bool,
    pub template: String,
    pub use_plugin: Option<String>,
    pub use_syn_sdc: bool,
    pub verbose_count: u8,
    pub write_graph: bool,
    pub write_local_bvecs: bool,
}

impl PipelineParams {
    /// Pure mapping from the frozen run context to the pipeline's parameter
    /// shape. Single-subject analysis with fixed verbosity; everything else
    /// comes from the configuration bag and resolved inputs.
    pub fn from_context(ctx: &RunContext) -> Self {
        let options = &ctx.options;
        Self {
            analysis_level: "participant".to_string(),
            bids_dir: ctx.paths.bids_dataset.clone(),
            output_dir: ctx.paths.derivatives_dir.clone(),
            work_dir: ctx.paths.working_dir.clone(),
            run_uuid: ctx.run_id.clone(),
            ignore: options.ignore_list(),
            output_space: options.output_space_list(),
            b0_motion_corr_to: options.b0_motion_corr_to.clone(),
            b0_threshold: options.b0_threshold,
            b0_to_t1w_transform: "Rigid".to_string(),
            anat_only: false,
            boilerplate: false,
            combine_all_dwis: options.combine_all_dwis,
            denoise_before_combining: options.denoise_before_combining,
            do_reconall: options.do_reconall,
            dwi_denoise_window: options.dwi_denoise_window,
            eddy_config: ctx.inputs.eddy_config.clone(),
            fmap_bspline: options.fmap_bspline,
            fmap_no_demean: options.fmap_no_demean,
            force_spatial_normalization: options.force_spatial_normalization,
            force_syn: options.force_syn,
            fs_license_file: ctx.inputs.freesurfer_license.clone(),
            hmc_model: options.hmc_model.clone(),
            hmc_transform: options.hmc_transform.clone(),
            impute_slice_threshold: options.impute_slice_threshold,
            intramodal_template_iters: options.intramodal_template_iters,
            intramodal_template_transform: options.intramodal_template_transform.clone(),
            longitudinal: options.longitudinal,
            low_mem: false,
            mem_mb: 0,
            notrack: options.notrack,
            nthreads: None,
            omp_nthreads: 0,
            output_resolution: options.output_resolution,
            prefer_dedicated_fmaps: options.prefer_dedicated_fmaps,
            recon_only: false,
            recon_spec: ctx.inputs.recon_spec.clone(),
            reports_only: false,
            resource_monitor: false,
            shoreline_iters: options.shoreline_iters,
            skip_bids_validation: options.skip_bids_validation,
            skull_strip_fixed_seed: options.skull_strip_fixed_seed,
            skull_strip_template: options.skull_strip_template.clone(),
            sloppy: options.sloppy,
            stop_on_first_crash: options.stop_on_first_crash,
            template: options.template.clone(),
            use_plugin: options.use_plugin.clone(),
            use_syn_sdc: options.use_syn_sdc,
            verbose_count: 2,
            write_graph: false,
            write_local_bvecs: options.write_local_bvecs,
        }
    }
}

/// The processing pipeline's programmatic entry point. One blocking call per
/// run; whatever parallelism the pipeline uses internally is opaque here.
#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn run(&self, params: &PipelineParams) -> Result<(), PipelineError>;
}
