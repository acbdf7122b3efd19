// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::app::errors::{AppError, AppErrorKind, AppResult, access_denied, invalid_argument, not_found};
use crate::app::ports::{ClockPort, JobStorePort, TransportPort};
use crate::app::services::random;
use crate::app::types::{Identity, JobRecord};

mod examples;
mod files;
mod sessions;
mod status;
mod submit;

#[cfg(test)]
pub(crate) mod testing;

#[derive(Debug, Clone)]
pub struct RemoteSettings {
    /// Root under which job workspaces are created.
    pub work_dir: String,
    pub module_init: String,
    pub easybuild_prefix: Option<String>,
    pub tool_repo: Option<String>,
    /// Upper bound for scheduler queries and submission.
    pub command_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct JobSettings {
    pub executable: String,
    pub time: String,
    pub memory: String,
    pub cpus: u32,
    pub modules: Vec<String>,
    pub notify_command: String,
    pub details_url: Option<String>,
    pub default_name_prefix: String,
    pub example_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct VisualizationSettings {
    pub enabled: bool,
    pub session_root: PathBuf,
    /// Where `session_root` is mounted inside the viewer container.
    pub container_root: String,
    pub viewer_url: String,
    pub session_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct UseCaseSettings {
    pub remote: RemoteSettings,
    pub job: JobSettings,
    pub visualization: VisualizationSettings,
}

/// Per-(owner, job) async locks serializing visualization session creation.
#[derive(Default)]
pub(crate) struct SessionLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionLocks {
    pub(crate) fn lock_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

#[derive(Clone)]
pub struct UseCases {
    pub(crate) transport: Arc<dyn TransportPort>,
    pub(crate) jobs: Arc<dyn JobStorePort>,
    pub(crate) clock: Arc<dyn ClockPort>,
    pub(crate) settings: Arc<UseCaseSettings>,
    pub(crate) session_locks: Arc<SessionLocks>,
}

impl UseCases {
    pub fn new(
        transport: Arc<dyn TransportPort>,
        jobs: Arc<dyn JobStorePort>,
        clock: Arc<dyn ClockPort>,
        settings: UseCaseSettings,
    ) -> Self {
        Self {
            transport,
            jobs,
            clock,
            settings: Arc::new(settings),
            session_locks: Arc::new(SessionLocks::default()),
        }
    }

    /// Loads a job record and checks that `requester` may act on it.
    pub(crate) async fn accessible_job(
        &self,
        requester: &Identity,
        job_uuid: &str,
    ) -> AppResult<JobRecord> {
        if !random::is_job_uuid(job_uuid) {
            return Err(invalid_argument(format!("invalid job uuid '{job_uuid}'")));
        }
        let record = self
            .jobs
            .get_job(job_uuid)
            .await?
            .ok_or_else(|| not_found(format!("job {job_uuid} not found")))?;
        if !requester.may_access(&record.owner_id) {
            return Err(access_denied("access denied"));
        }
        Ok(record)
    }
}

/// Re-labels a port error as a failure of `kind`, keeping its code and message.
pub(crate) fn as_component_error(kind: AppErrorKind, err: AppError, step: &str) -> AppError {
    let context = match err.context() {
        Some(ctx) => format!("{step}: {ctx}"),
        None => step.to_string(),
    };
    AppError::with_message(kind, err.code(), err.message().to_string()).with_context(context)
}
