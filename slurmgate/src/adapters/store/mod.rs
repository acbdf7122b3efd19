// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Job metadata kept next to the job's cached files.
//!
//! Every job directory `<cache>/<job_name>_<job_uuid>` carries one
//! `metadata.json` document. The directory name is the index: lookups by uuid
//! scan the cache root for the `_<uuid>` suffix.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;

use crate::app::errors::{AppResult, local_error};
use crate::app::ports::JobStorePort;
use crate::app::services::classify::METADATA_FILE_NAME;
use crate::app::types::{JobRecord, job_dir_name};

#[derive(Debug, Clone)]
pub struct JsonJobStore {
    cache_dir: PathBuf,
}

impl JsonJobStore {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    /// Job directories whose name ends with `_<uuid>`, in no particular order.
    async fn dirs_for_uuid(&self, job_uuid: &str) -> AppResult<Vec<PathBuf>> {
        let suffix = format!("_{job_uuid}");
        Ok(self
            .job_dirs()
            .await?
            .into_iter()
            .filter(|dir| {
                dir.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.ends_with(&suffix))
            })
            .collect())
    }

    async fn job_dirs(&self) -> AppResult<Vec<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(&self.cache_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(local_error(format!(
                    "failed to read cache directory {}: {err}",
                    self.cache_dir.display()
                )));
            }
        };
        let mut dirs = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    return Err(local_error(format!(
                        "failed to read cache directory {}: {err}",
                        self.cache_dir.display()
                    )));
                }
            };
            let is_dir = entry
                .file_type()
                .await
                .map(|kind| kind.is_dir())
                .unwrap_or(false);
            if is_dir {
                dirs.push(entry.path());
            }
        }
        Ok(dirs)
    }
}

async fn read_record(dir: &Path) -> AppResult<Option<JobRecord>> {
    let path = dir.join(METADATA_FILE_NAME);
    let raw = match tokio::fs::read(&path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(local_error(format!(
                "failed to read {}: {err}",
                path.display()
            )));
        }
    };
    serde_json::from_slice(&raw)
        .map(Some)
        .map_err(|err| local_error(format!("failed to parse {}: {err}", path.display())))
}

fn write_record(dir: &Path, record: &JobRecord) -> AppResult<()> {
    std::fs::create_dir_all(dir)
        .map_err(|err| local_error(format!("failed to create {}: {err}", dir.display())))?;
    let body = serde_json::to_vec_pretty(record)
        .map_err(|err| local_error(format!("failed to encode job record: {err}")))?;
    let mut tmp = NamedTempFile::new_in(dir)
        .map_err(|err| local_error(format!("failed to stage job record: {err}")))?;
    tmp.write_all(&body)
        .map_err(|err| local_error(format!("failed to write job record: {err}")))?;
    let path = dir.join(METADATA_FILE_NAME);
    tmp.persist(&path)
        .map_err(|err| local_error(format!("failed to persist {}: {err}", path.display())))?;
    Ok(())
}

#[async_trait]
impl JobStorePort for JsonJobStore {
    fn job_dir(&self, job_name: &str, job_uuid: &str) -> PathBuf {
        self.cache_dir.join(job_dir_name(job_name, job_uuid))
    }

    #[tracing::instrument(name = "store", level = "debug", skip(self), fields(op = "uuid_in_use"))]
    async fn uuid_in_use(&self, job_uuid: &str) -> AppResult<bool> {
        Ok(!self.dirs_for_uuid(job_uuid).await?.is_empty())
    }

    #[tracing::instrument(
        name = "store",
        level = "debug",
        skip(self, record),
        fields(op = "insert_job", job_uuid = %record.job_uuid)
    )]
    async fn insert_job(&self, record: &JobRecord) -> AppResult<()> {
        let dir = self.job_dir(&record.job_name, &record.job_uuid);
        let record = record.clone();
        tokio::task::spawn_blocking(move || write_record(&dir, &record))
            .await
            .map_err(|err| local_error(format!("job record writer failed: {err}")))?
    }

    #[tracing::instrument(name = "store", level = "debug", skip(self), fields(op = "get_job"))]
    async fn get_job(&self, job_uuid: &str) -> AppResult<Option<JobRecord>> {
        let mut dirs = self.dirs_for_uuid(job_uuid).await?;
        dirs.sort();
        for dir in dirs {
            if let Some(record) = read_record(&dir).await? {
                if record.job_uuid == job_uuid {
                    return Ok(Some(record));
                }
            }
        }
        Ok(None)
    }

    #[tracing::instrument(name = "store", level = "debug", skip(self), fields(op = "list_jobs"))]
    async fn list_jobs(&self) -> AppResult<Vec<JobRecord>> {
        let mut dirs = self.job_dirs().await?;
        dirs.sort();
        let mut records = Vec::new();
        for dir in dirs {
            match read_record(&dir).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(err) => tracing::warn!("skipping unreadable job record: {err}"),
            }
        }
        Ok(records)
    }
}
