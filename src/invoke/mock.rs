//! Scripted pipeline double for tests.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use super::{Pipeline, PipelineError, PipelineParams};

type Behavior = dyn Fn(&PipelineParams) -> Result<(), PipelineError> + Send + Sync;

/// In-memory [`Pipeline`] double. Succeeds by default; script a failure or a
/// side effect (for example writing fake derivatives) with the constructors.
/// Clones share the invocation record.
#[derive(Clone)]
pub struct MockPipeline {
    invocations: Arc<Mutex<Vec<PipelineParams>>>,
    behavior: Arc<Behavior>,
}

impl MockPipeline {
    pub fn new() -> Self {
        Self::with_behavior(|_| Ok(()))
    }

    /// A pipeline that always fails with the given exit code.
    pub fn failing(code: i32) -> Self {
        Self::with_behavior(move |_| Err(PipelineError::Exit(code)))
    }

    pub fn with_behavior<F>(behavior: F) -> Self
    where
        F: Fn(&PipelineParams) -> Result<(), PipelineError> + Send + Sync + 'static,
    {
        Self {
            invocations: Arc::new(Mutex::new(Vec::new())),
            behavior: Arc::new(behavior),
        }
    }

    pub fn invocations(&self) -> Vec<PipelineParams> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }
}

impl Default for MockPipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Pipeline for MockPipeline {
    async fn run(&self, params: &PipelineParams) -> Result<(), PipelineError> {
        self.invocations.lock().unwrap().push(params.clone());
        (self.behavior)(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{GearOptions, RunContext, RunInputs, RunPaths};
    use std::path::Path;

    fn params() -> PipelineParams {
        PipelineParams::from_context(&RunContext {
            run_id: "run-42".to_string(),
            project_label: "p".to_string(),
            subject_label: "01".to_string(),
            session_label: "A".to_string(),
            paths: RunPaths::derive(Path::new("/out"), "run-42"),
            options: GearOptions::default(),
            inputs: RunInputs::default(),
        })
    }

    #[tokio::test]
    async fn records_every_invocation() {
        let pipeline = MockPipeline::new();
        pipeline.run(&params()).await.unwrap();
        pipeline.run(&params()).await.unwrap();
        assert_eq!(pipeline.invocation_count(), 2);
        assert_eq!(pipeline.invocations()[0].run_uuid, "run-42");
    }

    #[tokio::test]
    async fn scripted_failure_surfaces() {
        let pipeline = MockPipeline::failing(9);
        let err = pipeline.run(&params()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Exit(9)));
        assert_eq!(pipeline.invocation_count(), 1);
    }
}
