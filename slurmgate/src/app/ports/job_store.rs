// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::PathBuf;

use async_trait::async_trait;

use crate::app::errors::AppResult;
use crate::app::types::JobRecord;

#[async_trait]
/// Durable per-job metadata, keyed by the job uuid.
/// The stored record is the only authority for ownership checks.
pub trait JobStorePort: Send + Sync {
    /// Local cache directory a job with this name and uuid lives in.
    fn job_dir(&self, job_name: &str, job_uuid: &str) -> PathBuf;
    async fn uuid_in_use(&self, job_uuid: &str) -> AppResult<bool>;
    async fn insert_job(&self, record: &JobRecord) -> AppResult<()>;
    async fn get_job(&self, job_uuid: &str) -> AppResult<Option<JobRecord>>;
    async fn list_jobs(&self) -> AppResult<Vec<JobRecord>>;
}
