//! Production adapter for the packaged pipeline process.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use super::{Pipeline, PipelineError, PipelineParams};

/// Runs the packaged pipeline entry point as a child process. The parameter
/// record is injected as a single JSON document on stdin; the entry point
/// never parses an argument line. Stdout and stderr stay attached to the
/// run's own log stream.
pub struct ProcessPipeline {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessPipeline {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}

#[async_trait]
impl Pipeline for ProcessPipeline {
    async fn run(&self, params: &PipelineParams) -> Result<(), PipelineError> {
        let payload = serde_json::to_string(params)?;
        info!(
            "invoking pipeline entry point {} for run {}",
            self.program.display(),
            params.run_uuid
        );
        debug!("pipeline parameter record: {payload}");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .spawn()
            .map_err(PipelineError::Spawn)?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(payload.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let status = child.wait().await?;
        if status.success() {
            info!("pipeline completed");
            return Ok(());
        }
        match status.code() {
            Some(code) => Err(PipelineError::Exit(code)),
            None => Err(signal_error(status)),
        }
    }
}

#[cfg(unix)]
fn signal_error(status: std::process::ExitStatus) -> PipelineError {
    use std::os::unix::process::ExitStatusExt;
    match status.signal() {
        Some(signal) => PipelineError::Signal(signal),
        None => PipelineError::Exit(-1),
    }
}

#[cfg(not(unix))]
fn signal_error(_status: std::process::ExitStatus) -> PipelineError {
    PipelineError::Exit(-1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{GearOptions, RunContext, RunInputs, RunPaths};
    use std::path::Path;
    use tempfile::TempDir;

    fn params() -> PipelineParams {
        PipelineParams::from_context(&RunContext {
            run_id: "run-42".to_string(),
            project_label: "TestProject".to_string(),
            subject_label: "01".to_string(),
            session_label: "A".to_string(),
            paths: RunPaths::derive(Path::new("/out"), "run-42"),
            options: GearOptions::default(),
            inputs: RunInputs::default(),
        })
    }

    fn shell(script: &str) -> ProcessPipeline {
        ProcessPipeline::new("sh").with_args(vec!["-c".to_string(), script.to_string()])
    }

    #[tokio::test]
    async fn succeeds_when_entry_point_exits_zero() {
        shell("cat > /dev/null").run(&params()).await.unwrap();
    }

    #[tokio::test]
    async fn reports_the_exit_code() {
        let err = shell("cat > /dev/null; exit 3")
            .run(&params())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Exit(3)));
    }

    #[tokio::test]
    async fn missing_entry_point_is_a_spawn_error() {
        let pipeline = ProcessPipeline::new("dwigear-no-such-entry-point");
        let err = pipeline.run(&params()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Spawn(_)));
    }

    #[tokio::test]
    async fn injects_the_parameter_record_on_stdin() {
        let tmp = TempDir::new().unwrap();
        let capture = tmp.path().join("params.json");
        let pipeline = shell(&format!("cat > {}", capture.display()));

        pipeline.run(&params()).await.unwrap();

        let received: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(capture).unwrap()).unwrap();
        assert_eq!(received["analysis_level"], "participant");
        assert_eq!(received["run_uuid"], "run-42");
        assert_eq!(received["stop_on_first_crash"], true);
    }
}
