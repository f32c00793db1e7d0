mod common;

use std::fs;
use std::sync::Arc;

use tempfile::TempDir;

use dwigear::invoke::MockPipeline;
use dwigear::orchestrator::{Orchestrator, RunOutcome};
use dwigear::package::{ArchiveCategory, ArchiveStatus, PackagingOutcome};
use dwigear::remote::MockRemoteStore;

fn status_of(outcomes: &[PackagingOutcome], category: ArchiveCategory) -> &ArchiveStatus {
    &outcomes
        .iter()
        .find(|o| o.category == category)
        .expect("category missing from outcome list")
        .status
}

fn assert_all_categories_attempted_once(outcomes: &[PackagingOutcome]) {
    assert_eq!(outcomes.len(), ArchiveCategory::ALL.len());
    for category in ArchiveCategory::ALL {
        assert_eq!(
            outcomes.iter().filter(|o| o.category == category).count(),
            1,
            "category {:?} not attempted exactly once",
            category
        );
    }
}

/// A pipeline double that writes a realistic output tree: a report document,
/// its figures, and one derivative file.
fn producing_pipeline() -> MockPipeline {
    MockPipeline::with_behavior(|params| {
        let pipeline_dir = params.output_dir.join("qsiprep");
        fs::create_dir_all(pipeline_dir.join("sub-01/figures")).unwrap();
        fs::create_dir_all(pipeline_dir.join("sub-01/dwi")).unwrap();
        fs::write(pipeline_dir.join("sub-01.html"), b"<html>report</html>").unwrap();
        fs::write(pipeline_dir.join("sub-01/figures/carpet.svg"), b"<svg/>").unwrap();
        fs::write(
            pipeline_dir.join("sub-01/dwi/sub-01_desc-preproc_dwi.nii.gz"),
            b"preproc",
        )
        .unwrap();
        Ok(())
    })
}

#[tokio::test]
async fn successful_run_stages_invokes_and_packages() {
    let tmp = TempDir::new().unwrap();
    let ctx = common::context(tmp.path());
    let store = common::three_file_store();
    let pipeline = producing_pipeline();
    let orchestrator = Orchestrator::new(Arc::new(store.clone()), Arc::new(pipeline.clone()));

    let report = orchestrator.execute(&ctx).await;

    assert!(!report.failed);
    assert_eq!(report.staging, RunOutcome::Succeeded);
    assert_eq!(report.invocation, RunOutcome::Succeeded);
    assert_all_categories_attempted_once(&report.packaging);

    // the pipeline saw the staged dataset, not a command line
    let invocations = pipeline.invocations();
    assert_eq!(invocations.len(), 1);
    assert_eq!(invocations[0].bids_dir, ctx.paths.bids_dataset);
    assert_eq!(invocations[0].run_uuid, common::RUN_ID);

    // session-scoped staging: subject 01, session A only
    let manifest_call = store
        .calls()
        .into_iter()
        .find(|c| c.starts_with("resolve_manifest"))
        .unwrap();
    assert!(manifest_call.contains(r#"subjects=["01"]"#));
    assert!(manifest_call.contains(r#"sessions=Some(["A"])"#));

    // reports and derivatives land in the upload dir; gated bundles do not
    assert!(matches!(
        status_of(&report.packaging, ArchiveCategory::Reports),
        ArchiveStatus::Created(_)
    ));
    assert!(matches!(
        status_of(&report.packaging, ArchiveCategory::Derivatives),
        ArchiveStatus::Created(_)
    ));
    assert!(matches!(
        status_of(&report.packaging, ArchiveCategory::DebugDerivatives),
        ArchiveStatus::Skipped(_)
    ));
    assert!(matches!(
        status_of(&report.packaging, ArchiveCategory::WorkingDir),
        ArchiveStatus::Skipped(_)
    ));
    assert!(tmp.path().join("reports_run-42.zip").exists());
    assert!(tmp.path().join("derivatives_run-42.zip").exists());
    assert!(!tmp.path().join("working_dir_run-42.zip").exists());

    // terminal cleanup released the run root but kept the archives
    assert!(!ctx.paths.run_root.exists());
}

#[tokio::test]
async fn manifest_failure_skips_invocation_but_still_packages() {
    let tmp = TempDir::new().unwrap();
    let mut ctx = common::context(tmp.path());
    ctx.options.save_partial_outputs = true;
    let store = MockRemoteStore::new().failing_manifest("query exploded");
    let pipeline = MockPipeline::new();
    let orchestrator = Orchestrator::new(Arc::new(store), Arc::new(pipeline.clone()));

    let report = orchestrator.execute(&ctx).await;

    assert!(report.failed);
    assert!(matches!(report.staging, RunOutcome::Failed(_)));
    assert_eq!(report.invocation, RunOutcome::Skipped);
    assert_eq!(pipeline.invocation_count(), 0);

    // packaging still ran once over every category; the derivatives
    // categories skip because no output tree ever existed
    assert_all_categories_attempted_once(&report.packaging);
    assert!(matches!(
        status_of(&report.packaging, ArchiveCategory::Derivatives),
        ArchiveStatus::Skipped(_)
    ));
    assert!(matches!(
        status_of(&report.packaging, ArchiveCategory::DebugDerivatives),
        ArchiveStatus::Skipped(_)
    ));
}

#[tokio::test]
async fn empty_manifest_is_an_empty_dataset_failure() {
    let tmp = TempDir::new().unwrap();
    let ctx = common::context(tmp.path());
    let pipeline = MockPipeline::new();
    let orchestrator =
        Orchestrator::new(Arc::new(MockRemoteStore::new()), Arc::new(pipeline.clone()));

    let report = orchestrator.execute(&ctx).await;

    assert!(report.failed);
    assert!(
        matches!(&report.staging, RunOutcome::Failed(reason) if reason.contains("no diffusion"))
    );
    assert_eq!(pipeline.invocation_count(), 0);
}

#[tokio::test]
async fn download_failure_marks_the_run_failed() {
    let tmp = TempDir::new().unwrap();
    let ctx = common::context(tmp.path());
    let dwi = common::entry(
        "acq-1",
        "dwi.nii.gz",
        "sub-01/ses-A/dwi/sub-01_ses-A_dwi.nii.gz",
    );
    let store = MockRemoteStore::new()
        .with_manifest_entry(dwi.clone(), b"unreachable")
        .failing_fetch(dwi.file);
    let pipeline = MockPipeline::new();
    let orchestrator = Orchestrator::new(Arc::new(store), Arc::new(pipeline.clone()));

    let report = orchestrator.execute(&ctx).await;

    assert!(report.failed);
    assert!(matches!(&report.staging, RunOutcome::Failed(reason) if reason.contains("download")));
    assert_eq!(report.invocation, RunOutcome::Skipped);
    assert_all_categories_attempted_once(&report.packaging);
}

#[tokio::test]
async fn pipeline_failure_packages_debug_and_error_bundles() {
    let tmp = TempDir::new().unwrap();
    let mut ctx = common::context(tmp.path());
    ctx.options.save_partial_outputs = true;
    let store = common::three_file_store();
    // writes partial outputs and a crash dump, then fails
    let pipeline = MockPipeline::with_behavior(|params| {
        fs::create_dir_all(params.output_dir.join("qsiprep")).unwrap();
        fs::write(
            params.output_dir.join("qsiprep/partial.nii.gz"),
            b"truncated",
        )
        .unwrap();
        fs::create_dir_all(&params.work_dir).unwrap();
        fs::write(params.work_dir.join("crash-node0.txt"), b"traceback").unwrap();
        Err(dwigear::invoke::PipelineError::Exit(1))
    });
    let orchestrator = Orchestrator::new(Arc::new(store), Arc::new(pipeline.clone()));

    let report = orchestrator.execute(&ctx).await;

    assert!(report.failed);
    assert!(matches!(&report.invocation, RunOutcome::Failed(reason) if reason.contains("code 1")));
    assert_all_categories_attempted_once(&report.packaging);
    assert!(matches!(
        status_of(&report.packaging, ArchiveCategory::DebugDerivatives),
        ArchiveStatus::Created(_)
    ));
    // partial-output retention keeps the plain bundle and the crash logs
    assert!(matches!(
        status_of(&report.packaging, ArchiveCategory::Derivatives),
        ArchiveStatus::Created(_)
    ));
    assert!(matches!(
        status_of(&report.packaging, ArchiveCategory::ErrorLog),
        ArchiveStatus::Created(_)
    ));
    assert!(tmp.path().join("debug_derivatives_run-42.zip").exists());
    assert!(!ctx.paths.run_root.exists());
}

#[tokio::test]
async fn working_dir_bundle_follows_the_retention_flag() {
    let tmp = TempDir::new().unwrap();
    let mut ctx = common::context(tmp.path());
    ctx.options.save_intermediate_work = true;
    let store = common::three_file_store();
    let pipeline = MockPipeline::with_behavior(|params| {
        fs::create_dir_all(params.work_dir.join("node0")).unwrap();
        fs::write(params.work_dir.join("node0/buffer.nii.gz"), b"scratch").unwrap();
        Ok(())
    });
    let orchestrator = Orchestrator::new(Arc::new(store), Arc::new(pipeline));

    let report = orchestrator.execute(&ctx).await;

    assert!(!report.failed);
    assert!(matches!(
        status_of(&report.packaging, ArchiveCategory::WorkingDir),
        ArchiveStatus::Created(_)
    ));
    assert!(tmp.path().join("working_dir_run-42.zip").exists());
}
