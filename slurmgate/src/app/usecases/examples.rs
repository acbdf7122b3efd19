// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes, not_found};
use crate::app::services::random::default_job_name;
use crate::app::types::{ExamplePreset, Identity, JobRecord, SubmitRequest};

use super::UseCases;

const EXAMPLE_STRUCTURE: &str = "1a7x.pdb";
const EXAMPLE_LIGAND: &str = "1a7x_C_FKA.sdf";
const EXAMPLE_CHAIN: &str = "1A7X_A";
const EXAMPLE_LIGAND_ID: &str = "FKA_B";

fn example_request(preset: ExamplePreset, example_dir: &Path) -> SubmitRequest {
    let input_path = example_dir.join(EXAMPLE_STRUCTURE);
    match preset {
        ExamplePreset::Basic => SubmitRequest {
            job_name: Some(default_job_name("example_basic")),
            input_path,
            chain_id: EXAMPLE_CHAIN.to_string(),
            ligand_id: None,
            secondary_input: None,
        },
        ExamplePreset::Ligand => SubmitRequest {
            job_name: Some(default_job_name("example_ligand")),
            input_path,
            chain_id: EXAMPLE_CHAIN.to_string(),
            ligand_id: Some(EXAMPLE_LIGAND_ID.to_string()),
            secondary_input: Some(example_dir.join(EXAMPLE_LIGAND)),
        },
    }
}

impl UseCases {
    /// Submits one of the bundled example structures on behalf of `owner`.
    #[tracing::instrument(skip(self, owner), fields(owner = %owner.user_id))]
    pub async fn submit_example(
        &self,
        owner: &Identity,
        preset: ExamplePreset,
    ) -> AppResult<JobRecord> {
        let example_dir = self.settings.job.example_dir.as_deref().ok_or_else(|| {
            AppError::with_message(
                AppErrorKind::Unavailable,
                codes::UNAVAILABLE,
                "no example directory is configured",
            )
        })?;
        let request = example_request(preset, example_dir);
        for path in std::iter::once(&request.input_path).chain(request.secondary_input.iter()) {
            let present = tokio::fs::metadata(path)
                .await
                .map(|meta| meta.is_file())
                .unwrap_or(false);
            if !present {
                return Err(not_found(format!(
                    "example file {} not found",
                    path.display()
                )));
            }
        }
        self.submit_job(owner, request).await
    }
}
