//! Result packaging.
//!
//! After invocation (or after a staging failure) the run's outputs are
//! bundled into category-specific zip archives in the platform upload
//! directory. Categories are independent: each one either produces an
//! archive, skips with a logged reason, or fails with a logged error, and a
//! failure in one never stops the others. The orchestrator gets the full
//! per-category outcome list back.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::context::RunContext;

#[derive(Debug, Error)]
pub enum PackageError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveCategory {
    Reports,
    Derivatives,
    DebugDerivatives,
    WorkingDir,
    ErrorLog,
}

impl ArchiveCategory {
    pub const ALL: [ArchiveCategory; 5] = [
        ArchiveCategory::Reports,
        ArchiveCategory::Derivatives,
        ArchiveCategory::DebugDerivatives,
        ArchiveCategory::WorkingDir,
        ArchiveCategory::ErrorLog,
    ];

    pub fn stem(&self) -> &'static str {
        match self {
            ArchiveCategory::Reports => "reports",
            ArchiveCategory::Derivatives => "derivatives",
            ArchiveCategory::DebugDerivatives => "debug_derivatives",
            ArchiveCategory::WorkingDir => "working_dir",
            ArchiveCategory::ErrorLog => "error_log",
        }
    }
}

/// One category's packaging recipe: where to scan, which members to take
/// (paths relative to the source root), and where the archive lands.
pub struct ArchiveSpec {
    pub category: ArchiveCategory,
    pub source_root: PathBuf,
    pub dest: PathBuf,
    select: Box<dyn Fn(&Path) -> bool + Send + Sync>,
}

#[derive(Debug)]
pub enum ArchiveStatus {
    Created(PathBuf),
    Skipped(String),
    Failed(PackageError),
}

impl std::fmt::Display for ArchiveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArchiveStatus::Created(path) => write!(f, "created {}", path.display()),
            ArchiveStatus::Skipped(reason) => write!(f, "skipped ({reason})"),
            ArchiveStatus::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

#[derive(Debug)]
pub struct PackagingOutcome {
    pub category: ArchiveCategory,
    pub status: ArchiveStatus,
}

impl PackagingOutcome {
    pub fn created(&self) -> bool {
        matches!(self.status, ArchiveStatus::Created(_))
    }
}

pub struct Packager;

impl Packager {
    pub fn new() -> Self {
        Self
    }

    /// Attempt every archive category for the run. Always returns one
    /// outcome per category, in a fixed order, so callers can assert that
    /// everything was attempted.
    pub fn package_all(&self, ctx: &RunContext, failed: bool) -> Vec<PackagingOutcome> {
        ArchiveCategory::ALL
            .iter()
            .map(|&category| match self.spec_for(category, ctx, failed) {
                Ok(spec) => self.attempt(spec),
                Err(reason) => {
                    info!("skipping {} archive: {}", category.stem(), reason);
                    PackagingOutcome {
                        category,
                        status: ArchiveStatus::Skipped(reason),
                    }
                }
            })
            .collect()
    }

    /// Decide whether a category applies to this run; `Err` carries the
    /// skip reason.
    fn spec_for(
        &self,
        category: ArchiveCategory,
        ctx: &RunContext,
        failed: bool,
    ) -> Result<ArchiveSpec, String> {
        let dest = ctx
            .paths
            .output_dir
            .join(format!("{}_{}.zip", category.stem(), ctx.run_id));
        match category {
            ArchiveCategory::Reports => Ok(ArchiveSpec {
                category,
                source_root: ctx.paths.derivatives_dir.clone(),
                dest,
                select: Box::new(is_report_member),
            }),
            ArchiveCategory::Derivatives => {
                if failed && !ctx.options.save_partial_outputs {
                    Err("run failed and partial-output retention is off".to_string())
                } else {
                    Ok(ArchiveSpec {
                        category,
                        source_root: ctx.paths.derivatives_dir.clone(),
                        dest,
                        select: Box::new(|_| true),
                    })
                }
            }
            ArchiveCategory::DebugDerivatives => {
                if failed {
                    Ok(ArchiveSpec {
                        category,
                        source_root: ctx.paths.derivatives_dir.clone(),
                        dest,
                        select: Box::new(|_| true),
                    })
                } else {
                    Err("run succeeded".to_string())
                }
            }
            ArchiveCategory::WorkingDir => {
                if ctx.options.save_intermediate_work {
                    Ok(ArchiveSpec {
                        category,
                        source_root: ctx.paths.working_dir.clone(),
                        dest,
                        select: Box::new(|_| true),
                    })
                } else {
                    Err("intermediate-work retention is off".to_string())
                }
            }
            ArchiveCategory::ErrorLog => {
                if failed && ctx.options.save_partial_outputs {
                    Ok(ArchiveSpec {
                        category,
                        source_root: ctx.paths.working_dir.clone(),
                        dest,
                        select: Box::new(is_error_log_member),
                    })
                } else {
                    Err("only collected for failed runs with partial-output retention".to_string())
                }
            }
        }
    }

    /// Run one spec, containing any error in the outcome.
    fn attempt(&self, spec: ArchiveSpec) -> PackagingOutcome {
        let category = spec.category;
        match self.build_archive(&spec) {
            Ok(Some(dest)) => {
                info!("wrote {} archive to {}", category.stem(), dest.display());
                PackagingOutcome {
                    category,
                    status: ArchiveStatus::Created(dest),
                }
            }
            Ok(None) => {
                info!("skipping {} archive: nothing to collect", category.stem());
                PackagingOutcome {
                    category,
                    status: ArchiveStatus::Skipped("nothing to collect".to_string()),
                }
            }
            Err(e) => {
                warn!("failed to write {} archive: {e}", category.stem());
                PackagingOutcome {
                    category,
                    status: ArchiveStatus::Failed(e),
                }
            }
        }
    }

    fn build_archive(&self, spec: &ArchiveSpec) -> Result<Option<PathBuf>, PackageError> {
        if !spec.source_root.is_dir() {
            return Ok(None);
        }
        let members = collect_members(&spec.source_root, &spec.select)?;
        if members.is_empty() {
            return Ok(None);
        }
        write_zip(&spec.dest, &spec.source_root, &members)?;
        Ok(Some(spec.dest.clone()))
    }
}

impl Default for Packager {
    fn default() -> Self {
        Self::new()
    }
}

/// Report bundle: top-level report documents plus their figure directories.
fn is_report_member(rel: &Path) -> bool {
    let is_html = rel.extension().is_some_and(|ext| ext == "html");
    let shallow = rel.components().count() <= 2;
    let in_figures = rel.components().any(|c| c.as_os_str() == "figures");
    (is_html && shallow) || in_figures
}

/// Error-log bundle: crash dumps and log files the pipeline left behind.
fn is_error_log_member(rel: &Path) -> bool {
    let name = rel.file_name().and_then(|n| n.to_str()).unwrap_or("");
    name.starts_with("crash") || name.ends_with(".log")
}

fn collect_members<F>(root: &Path, select: &F) -> Result<Vec<PathBuf>, PackageError>
where
    F: Fn(&Path) -> bool,
{
    let mut members = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .expect("walked path is under its root")
            .to_path_buf();
        if select(&rel) {
            members.push(rel);
        }
    }
    Ok(members)
}

/// Write a flat re-rooted zip: member names are the paths relative to the
/// category root.
fn write_zip(dest: &Path, root: &Path, members: &[PathBuf]) -> Result<(), PackageError> {
    let file = File::create(dest)?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default();
    for rel in members {
        let name = rel
            .iter()
            .map(|c| c.to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        zip.start_file(name, options)?;
        let mut source = File::open(root.join(rel))?;
        io::copy(&mut source, &mut zip)?;
    }
    zip.finish()?;
    Ok(())
}
