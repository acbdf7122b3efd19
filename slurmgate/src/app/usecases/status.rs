// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::services::slurm;
use crate::app::types::JobStatus;

use super::UseCases;

impl UseCases {
    /// Resolves a scheduler job id to its current state.
    ///
    /// The live queue is asked first and wins whenever it answers with a state;
    /// only a job that has left the queue falls through to accounting. Failures
    /// are folded into the returned status and never surface as errors.
    #[tracing::instrument(skip(self))]
    pub async fn job_status(&self, job_id: &str) -> JobStatus {
        let job_id = job_id.trim();
        if !slurm::is_valid_job_id(job_id) {
            return JobStatus::Error("invalid job id".to_string());
        }
        let timeout = self.settings.remote.command_timeout;

        match self
            .transport
            .execute(&slurm::squeue_command(job_id), timeout)
            .await
        {
            Ok(capture) if capture.exit_code == 0 => {
                if let Some(state) = slurm::parse_squeue_state(&capture.stdout_lossy()) {
                    return JobStatus::from_scheduler(&state);
                }
            }
            Ok(capture) => {
                tracing::debug!("squeue for job {job_id} exited with {}", capture.exit_code);
            }
            Err(err) => {
                tracing::warn!("squeue for job {job_id} failed: {err}");
                return JobStatus::Error(err.to_string());
            }
        }

        match self
            .transport
            .execute(&slurm::sacct_command(job_id), timeout)
            .await
        {
            Ok(capture) if capture.exit_code == 0 => {
                slurm::parse_sacct_state(&capture.stdout_lossy())
                    .map(|state| JobStatus::from_scheduler(&state))
                    .unwrap_or(JobStatus::Unknown)
            }
            Ok(capture) => {
                tracing::warn!("sacct for job {job_id} exited with {}", capture.exit_code);
                JobStatus::Unknown
            }
            Err(err) => {
                tracing::warn!("sacct for job {job_id} failed: {err}");
                JobStatus::Error(err.to_string())
            }
        }
    }
}
