// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::types::FileClass;

use super::script::{SUBMIT_SCRIPT_NAME, WRAPPER_SCRIPT_NAME};

pub const METADATA_FILE_NAME: &str = "metadata.json";

pub const CONTROL_FILES: &[&str] = &[SUBMIT_SCRIPT_NAME, WRAPPER_SCRIPT_NAME, METADATA_FILE_NAME];

/// Suffix of a download still being written.
pub const PARTIAL_SUFFIX: &str = ".partial";

pub fn is_partial_download(name: &str) -> bool {
    name.ends_with(PARTIAL_SUFFIX)
}

/// Classifies a path relative to the job workspace.
pub fn classify(relative_path: &str) -> FileClass {
    let name = relative_path.rsplit('/').next().unwrap_or(relative_path);
    if is_scheduler_log(name) {
        FileClass::Log
    } else if CONTROL_FILES.contains(&relative_path) || is_partial_download(name) {
        FileClass::Control
    } else {
        FileClass::Output
    }
}

/// `slurm_<id>.out` / `slurm_<id>.err`
fn is_scheduler_log(name: &str) -> bool {
    name.starts_with("slurm_") && (name.ends_with(".out") || name.ends_with(".err"))
}
