#![allow(dead_code)]

use std::path::{Path, PathBuf};

use dwigear::context::{GearOptions, RunContext, RunInputs, RunPaths};
use dwigear::remote::{FileRef, ManifestEntry, MockRemoteStore};

pub const RUN_ID: &str = "run-42";

/// A run context matching the standard test selection: subject 01, session A.
pub fn context(output_dir: &Path) -> RunContext {
    RunContext {
        run_id: RUN_ID.to_string(),
        project_label: "TestProject".to_string(),
        subject_label: "01".to_string(),
        session_label: "A".to_string(),
        paths: RunPaths::derive(output_dir, RUN_ID),
        options: GearOptions::default(),
        inputs: RunInputs::default(),
    }
}

pub fn entry(container: &str, name: &str, dest: &str) -> ManifestEntry {
    ManifestEntry {
        file: FileRef::new(container, name),
        dest: PathBuf::from(dest),
    }
}

/// A store holding three staged files, one of them a diffusion series.
pub fn three_file_store() -> MockRemoteStore {
    MockRemoteStore::new()
        .with_manifest_entry(
            entry(
                "acq-1",
                "dwi.nii.gz",
                "sub-01/ses-A/dwi/sub-01_ses-A_dwi.nii.gz",
            ),
            b"dwi-bytes",
        )
        .with_manifest_entry(
            entry(
                "acq-1",
                "dwi.bval",
                "sub-01/ses-A/dwi/sub-01_ses-A_dwi.bval",
            ),
            b"0 1000 1000",
        )
        .with_manifest_entry(
            entry(
                "acq-2",
                "t1.nii.gz",
                "sub-01/ses-A/anat/sub-01_ses-A_T1w.nii.gz",
            ),
            b"t1-bytes",
        )
}
