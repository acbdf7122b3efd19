// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use crate::app::errors::{AppResult, access_denied, invalid_argument, local_error, not_found};
use crate::app::ports::FileChannel;
use crate::app::services::archive::{ArchiveSource, write_job_archive};
use crate::app::services::classify::classify;
use crate::app::services::names::secure_relative_path;
use crate::app::services::sync::{is_already_synced, list_remote_files, sync_tree};
use crate::app::types::{
    ArchiveSummary, EntryKind, FileClass, Identity, JobDetails, JobRecord, RemoteFile, SyncReport,
};

use super::UseCases;

/// Logs at or above this size are not inlined into job details.
pub const LOG_SIZE_LIMIT: usize = 1024 * 1024;

async fn close_channel(channel: Box<dyn FileChannel>) {
    if let Err(err) = channel.close().await {
        tracing::debug!("failed to close file channel: {err}");
    }
}

async fn read_log(channel: &dyn FileChannel, remote_path: &str, size: u64) -> String {
    if size >= LOG_SIZE_LIMIT as u64 {
        return "Log file too large".to_string();
    }
    match channel.read(remote_path, LOG_SIZE_LIMIT).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(err) => format!("Unable to read log file: {err}"),
    }
}

impl UseCases {
    /// Jobs visible to `requester`, newest submission first.
    pub async fn list_jobs(&self, requester: &Identity) -> AppResult<Vec<JobRecord>> {
        let mut jobs: Vec<JobRecord> = self
            .jobs
            .list_jobs()
            .await?
            .into_iter()
            .filter(|record| requester.may_access(&record.owner_id))
            .collect();
        jobs.sort_by(|a, b| {
            b.submitted_at
                .cmp(&a.submitted_at)
                .then_with(|| b.job_uuid.cmp(&a.job_uuid))
        });
        Ok(jobs)
    }

    #[tracing::instrument(skip(self, requester), fields(requester = %requester.user_id))]
    pub async fn job_details(&self, requester: &Identity, job_uuid: &str) -> AppResult<JobDetails> {
        let record = self.accessible_job(requester, job_uuid).await?;
        let status = self.job_status(&record.job_id).await;

        let mut outputs: Vec<RemoteFile> = Vec::new();
        let mut logs = BTreeMap::new();
        let mut fetch_error = None;

        match self.transport.open_file_channel().await {
            Ok(channel) => {
                match list_remote_files(channel.as_ref(), &record.remote_job_dir).await {
                    Ok((files, failures)) => {
                        for file in files {
                            match classify(&file.path) {
                                FileClass::Output => outputs.push(file),
                                FileClass::Log if requester.is_admin => {
                                    let remote_path =
                                        format!("{}/{}", record.remote_job_dir, file.path);
                                    let content =
                                        read_log(channel.as_ref(), &remote_path, file.size).await;
                                    logs.insert(file.path, content);
                                }
                                FileClass::Log | FileClass::Control => {}
                            }
                        }
                        if !failures.is_empty() {
                            let listed = failures
                                .iter()
                                .map(|failure| format!("{}: {}", failure.path, failure.message))
                                .collect::<Vec<_>>()
                                .join("; ");
                            fetch_error = Some(format!("Could not list some remote directories: {listed}"));
                        }
                    }
                    Err(err) => {
                        tracing::warn!("listing {} failed: {err}", record.remote_job_dir);
                        fetch_error = Some(format!("Could not list remote files: {err}"));
                    }
                }
                close_channel(channel).await;
            }
            Err(err) => {
                tracing::warn!("could not open file channel: {err}");
                fetch_error = Some(format!("Could not connect to remote host: {err}"));
            }
        }

        Ok(JobDetails {
            record,
            status,
            outputs,
            logs,
            fetch_error,
        })
    }

    /// Mirrors the job's remote workspace into its local cache directory.
    #[tracing::instrument(skip(self, requester), fields(requester = %requester.user_id))]
    pub async fn sync_job(&self, requester: &Identity, job_uuid: &str) -> AppResult<SyncReport> {
        let record = self.accessible_job(requester, job_uuid).await?;
        self.sync_record(&record).await
    }

    pub(crate) async fn sync_record(&self, record: &JobRecord) -> AppResult<SyncReport> {
        let channel = self.transport.open_file_channel().await?;
        let report = sync_tree(
            channel.as_ref(),
            &record.remote_job_dir,
            &record.local_job_dir,
        )
        .await;
        close_channel(channel).await;
        tracing::info!(
            "synced {}: {} downloaded, {} skipped, {} failed",
            record.dir_name(),
            report.downloaded.len(),
            report.skipped,
            report.failures.len()
        );
        Ok(report)
    }

    /// Returns the local path of one workspace file, downloading it first when
    /// the cache has no usable copy.
    #[tracing::instrument(skip(self, requester), fields(requester = %requester.user_id))]
    pub async fn fetch_output(
        &self,
        requester: &Identity,
        job_uuid: &str,
        relative_path: &str,
    ) -> AppResult<PathBuf> {
        let record = self.accessible_job(requester, job_uuid).await?;
        let relative = secure_relative_path(relative_path)?;
        match classify(&relative) {
            FileClass::Control => {
                return Err(access_denied(format!("{relative} is not downloadable")));
            }
            FileClass::Log if !requester.is_admin => {
                return Err(access_denied("log files are only available to administrators"));
            }
            FileClass::Log | FileClass::Output => {}
        }

        let local_path = record.local_job_dir.join(&relative);
        if !is_already_synced(&local_path).await {
            let remote_path = format!("{}/{}", record.remote_job_dir, relative);
            let channel = self.transport.open_file_channel().await?;
            let fetched = download_file(channel.as_ref(), &remote_path, &local_path).await;
            close_channel(channel).await;
            fetched?;
        }

        if !is_already_synced(&local_path).await {
            return Err(not_found(format!("{relative} is empty or does not exist")));
        }
        Ok(local_path)
    }

    /// Packs the selected jobs into one `tar.zst`, syncing each first on a
    /// best-effort basis. Unknown or foreign jobs are skipped.
    #[tracing::instrument(skip(self, requester, job_uuids), fields(requester = %requester.user_id))]
    pub async fn export_archive(
        &self,
        requester: &Identity,
        job_uuids: &[String],
        archive_path: &Path,
    ) -> AppResult<ArchiveSummary> {
        let mut sources = Vec::new();
        let mut jobs = Vec::new();
        let mut skipped = Vec::new();
        let mut used_names = HashSet::new();

        for job_uuid in job_uuids {
            let record = match self.accessible_job(requester, job_uuid).await {
                Ok(record) => record,
                Err(err) => {
                    tracing::warn!("skipping job {job_uuid}: {err}");
                    skipped.push(job_uuid.clone());
                    continue;
                }
            };
            match self.sync_record(&record).await {
                Ok(report) if report.is_partial() => {
                    tracing::warn!(
                        "archive of {} proceeds with {} unsynced entries",
                        record.dir_name(),
                        report.failures.len()
                    );
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!("archive of {} uses cached files only: {err}", record.dir_name());
                }
            }
            if !record.local_job_dir.is_dir() {
                tracing::warn!("skipping job {job_uuid}: no local files");
                skipped.push(job_uuid.clone());
                continue;
            }
            let root_name = if used_names.insert(record.job_name.clone()) {
                record.job_name.clone()
            } else {
                record.dir_name()
            };
            sources.push(ArchiveSource {
                root_name,
                dir: record.local_job_dir.clone(),
            });
            jobs.push(record.job_uuid.clone());
        }

        if sources.is_empty() {
            return Err(invalid_argument("none of the selected jobs can be archived"));
        }
        let include_logs = requester.is_admin;
        let dest = archive_path.to_path_buf();
        let files = tokio::task::spawn_blocking(move || {
            write_job_archive(&sources, &dest, include_logs)
        })
        .await
        .map_err(|err| local_error(format!("archive task failed: {err}")))??;

        Ok(ArchiveSummary {
            archive: archive_path.to_path_buf(),
            jobs,
            skipped,
            files,
        })
    }
}

async fn download_file(
    channel: &dyn FileChannel,
    remote_path: &str,
    local_path: &Path,
) -> AppResult<()> {
    let entry = channel.stat(remote_path).await?;
    if entry.kind != EntryKind::File {
        return Err(invalid_argument(
            "cannot download directories; sync the job to fetch their contents",
        ));
    }
    if let Some(parent) = local_path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|err| {
            local_error(format!("failed to create {}: {err}", parent.display()))
        })?;
    }
    channel.get(remote_path, local_path).await
}
