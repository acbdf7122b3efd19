// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fs;
use std::path::{Path, PathBuf};

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use walkdir::WalkDir;

use crate::app::errors::{
    AppError, AppErrorKind, AppResult, access_denied, codes, invalid_argument, local_error,
    not_found,
};
use crate::app::services::classify::is_partial_download;
use crate::app::services::load_script::{
    LOAD_SCRIPT_NAME, README_NAME, SESSION_DATA_DIR, SESSION_DESCRIPTOR_NAME, STARTUP_SCRIPT_NAME,
    render_load_script, render_readme, render_startup_script,
};
use crate::app::services::names::secure_filename;
use crate::app::types::{CleanupOutcome, Identity, JobRecord, SessionDescriptor, SessionHandle};

use super::UseCases;

const VIEWER_PATH: &str = "vnc.html?autoconnect=true&resize=scale";

fn visualization_disabled() -> AppError {
    AppError::with_message(
        AppErrorKind::Unavailable,
        codes::UNAVAILABLE,
        "visualization is not enabled",
    )
}

fn session_prefix(owner_id: &str, job_uuid: &str) -> String {
    format!("{owner_id}_{job_uuid}_")
}

fn validate_session_id(session_id: &str) -> AppResult<()> {
    if session_id.is_empty() || secure_filename(session_id) != session_id {
        return Err(invalid_argument(format!("invalid session id '{session_id}'")));
    }
    Ok(())
}

/// Owner ids become part of session directory names.
fn validate_owner_id(owner_id: &str) -> AppResult<()> {
    if owner_id.is_empty() || secure_filename(owner_id) != owner_id {
        return Err(invalid_argument(format!(
            "user id '{owner_id}' cannot own a visualization session"
        )));
    }
    Ok(())
}

/// Deep copy of `source` into `dest`; symlinks are not followed and
/// interrupted downloads are left behind.
fn copy_tree(source: &Path, dest: &Path) -> AppResult<usize> {
    let mut copied = 0;
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(|err| local_error(format!("failed to walk job cache: {err}")))?;
        let rel = entry
            .path()
            .strip_prefix(source)
            .map_err(|_| local_error("failed to compute session relative path".to_string()))?;
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|err| {
                local_error(format!("failed to create {}: {err}", target.display()))
            })?;
        } else if entry.file_type().is_file() {
            if is_partial_download(&entry.file_name().to_string_lossy()) {
                continue;
            }
            fs::copy(entry.path(), &target).map_err(|err| {
                local_error(format!("failed to copy into {}: {err}", target.display()))
            })?;
            copied += 1;
        }
    }
    Ok(copied)
}

async fn write_file(path: &Path, contents: impl AsRef<[u8]>) -> AppResult<()> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|err| local_error(format!("failed to write {}: {err}", path.display())))
}

async fn read_descriptor(session_dir: &Path) -> Option<SessionDescriptor> {
    let path = session_dir.join(SESSION_DESCRIPTOR_NAME);
    let raw = tokio::fs::read_to_string(&path).await.ok()?;
    match serde_json::from_str(&raw) {
        Ok(descriptor) => Some(descriptor),
        Err(err) => {
            tracing::warn!("unreadable session descriptor {}: {err}", path.display());
            None
        }
    }
}

impl UseCases {
    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.settings.visualization.session_root.join(session_id)
    }

    /// Removes every session of this (owner, job) pair. Failures are logged only.
    async fn remove_superseded_sessions(&self, prefix: &str) {
        let root = &self.settings.visualization.session_root;
        let mut entries = match tokio::fs::read_dir(root).await {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!("cannot scan session root {}: {err}", root.display());
                return;
            }
        };
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!("cannot scan session root {}: {err}", root.display());
                    break;
                }
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(prefix) {
                continue;
            }
            let is_dir = entry
                .file_type()
                .await
                .map(|kind| kind.is_dir())
                .unwrap_or(false);
            if !is_dir {
                continue;
            }
            match tokio::fs::remove_dir_all(entry.path()).await {
                Ok(()) => tracing::info!("removed superseded session {name}"),
                Err(err) => tracing::warn!("failed to remove session {name}: {err}"),
            }
        }
    }

    /// Builds a fresh viewer session for a job, replacing any earlier session of
    /// the same requester and job. Creation is serialized per (requester, job).
    #[tracing::instrument(skip(self, requester), fields(requester = %requester.user_id))]
    pub async fn create_session(
        &self,
        requester: &Identity,
        job_uuid: &str,
    ) -> AppResult<SessionHandle> {
        let viz = &self.settings.visualization;
        if !viz.enabled {
            return Err(visualization_disabled());
        }
        validate_owner_id(&requester.user_id)?;
        let record = self.accessible_job(requester, job_uuid).await?;

        let report = self.sync_record(&record).await?;
        if report.is_partial() {
            tracing::warn!(
                "session for {} built from a partial sync ({} failures)",
                record.dir_name(),
                report.failures.len()
            );
        }

        tokio::fs::create_dir_all(&viz.session_root).await.map_err(|err| {
            local_error(format!(
                "failed to create session root {}: {err}",
                viz.session_root.display()
            ))
        })?;
        let prefix = session_prefix(&requester.user_id, &record.job_uuid);
        let lock = self.session_locks.lock_for(&prefix);
        let _guard = lock.lock().await;

        self.remove_superseded_sessions(&prefix).await;

        let now = self.clock.now_utc();
        let session_id = format!("{prefix}{}", now.unix_timestamp());
        let session_dir = self.session_dir(&session_id);
        match self
            .populate_session(&record, &requester.user_id, &session_id, &session_dir, now)
            .await
        {
            Ok(handle) => {
                tracing::info!("created session {session_id}");
                Ok(handle)
            }
            Err(err) => {
                if let Err(cleanup_err) = tokio::fs::remove_dir_all(&session_dir).await {
                    tracing::debug!("failed to discard partial session {session_id}: {cleanup_err}");
                }
                Err(err)
            }
        }
    }

    async fn populate_session(
        &self,
        record: &JobRecord,
        owner_id: &str,
        session_id: &str,
        session_dir: &Path,
        now: OffsetDateTime,
    ) -> AppResult<SessionHandle> {
        let viz = &self.settings.visualization;
        tokio::fs::create_dir_all(session_dir).await.map_err(|err| {
            local_error(format!("failed to create {}: {err}", session_dir.display()))
        })?;

        let data_dir = session_dir.join(SESSION_DATA_DIR);
        let source = record.local_job_dir.clone();
        let dest = data_dir.clone();
        let copied = tokio::task::spawn_blocking(move || copy_tree(&source, &dest))
            .await
            .map_err(|err| local_error(format!("session copy task failed: {err}")))??;
        tracing::debug!("copied {copied} files into {}", data_dir.display());

        let container_session = format!(
            "{}/{}",
            viz.container_root.trim_end_matches('/'),
            session_id
        );
        let container_data = format!("{container_session}/{SESSION_DATA_DIR}");
        let script_path = format!("{container_session}/{LOAD_SCRIPT_NAME}");

        let ttl = viz.session_ttl.as_secs();
        let expires = now + time::Duration::seconds(ttl as i64);
        let descriptor = SessionDescriptor {
            session_id: session_id.to_string(),
            owner_id: owner_id.to_string(),
            job_uuid: record.job_uuid.clone(),
            job_name: record.job_name.clone(),
            created_at: now
                .format(&Rfc3339)
                .map_err(|err| local_error(format!("failed to format session time: {err}")))?,
            expires_at: expires.unix_timestamp(),
        };
        let expires_display = expires
            .format(format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"))
            .map_err(|err| local_error(format!("failed to format expiry: {err}")))?;

        write_file(
            &session_dir.join(LOAD_SCRIPT_NAME),
            render_load_script(&container_data, record, &data_dir),
        )
        .await?;
        write_file(
            &session_dir.join(README_NAME),
            render_readme(&record.job_name, &container_session, &expires_display),
        )
        .await?;
        let descriptor_json = serde_json::to_string_pretty(&descriptor)
            .map_err(|err| local_error(format!("failed to encode session descriptor: {err}")))?;
        write_file(&session_dir.join(SESSION_DESCRIPTOR_NAME), descriptor_json).await?;
        write_file(
            &session_dir.join(STARTUP_SCRIPT_NAME),
            render_startup_script(&script_path),
        )
        .await?;

        Ok(SessionHandle {
            session_id: session_id.to_string(),
            session_dir: session_dir.to_path_buf(),
            viewer_url: format!("{}/{VIEWER_PATH}", viz.viewer_url.trim_end_matches('/')),
            script_path,
            expires_in: ttl,
        })
    }

    pub async fn inspect_session(
        &self,
        requester: &Identity,
        session_id: &str,
    ) -> AppResult<SessionDescriptor> {
        validate_session_id(session_id)?;
        let session_dir = self.session_dir(session_id);
        if !session_dir.is_dir() {
            return Err(not_found(format!("session {session_id} not found")));
        }
        let descriptor = read_descriptor(&session_dir)
            .await
            .ok_or_else(|| not_found(format!("session {session_id} has no descriptor")))?;
        if !requester.may_access(&descriptor.owner_id) {
            return Err(access_denied("access denied"));
        }
        Ok(descriptor)
    }

    /// Removes a session directory. A session without a readable descriptor
    /// can only be removed by an administrator.
    #[tracing::instrument(skip(self, requester), fields(requester = %requester.user_id))]
    pub async fn cleanup_session(
        &self,
        requester: &Identity,
        session_id: &str,
    ) -> AppResult<CleanupOutcome> {
        if !self.settings.visualization.enabled {
            return Err(visualization_disabled());
        }
        validate_session_id(session_id)?;
        let session_dir = self.session_dir(session_id);
        if !session_dir.exists() {
            return Ok(CleanupOutcome::AlreadyGone);
        }
        let allowed = match read_descriptor(&session_dir).await {
            Some(descriptor) => requester.may_access(&descriptor.owner_id),
            None => requester.is_admin,
        };
        if !allowed {
            return Err(access_denied("access denied"));
        }
        match tokio::fs::remove_dir_all(&session_dir).await {
            Ok(()) => {
                tracing::info!("removed session {session_id}");
                Ok(CleanupOutcome::Removed)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(CleanupOutcome::AlreadyGone),
            Err(err) => Err(local_error(format!(
                "failed to remove session {session_id}: {err}"
            ))),
        }
    }

    /// Removes every session whose expiry lies at or before `now`. Sessions
    /// without a readable descriptor are left alone.
    pub async fn sweep_expired(&self, now: OffsetDateTime) -> AppResult<Vec<String>> {
        let root = &self.settings.visualization.session_root;
        let mut removed = Vec::new();
        let mut entries = match tokio::fs::read_dir(root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(removed),
            Err(err) => {
                return Err(local_error(format!(
                    "cannot scan session root {}: {err}",
                    root.display()
                )));
            }
        };
        let now_unix = now.unix_timestamp();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| local_error(format!("cannot scan session root: {err}")))?
        {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(descriptor) = read_descriptor(&path).await else {
                continue;
            };
            if !descriptor.is_expired(now_unix) {
                continue;
            }
            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => {
                    tracing::info!("swept expired session {}", descriptor.session_id);
                    removed.push(descriptor.session_id);
                }
                Err(err) => tracing::warn!("failed to sweep {}: {err}", path.display()),
            }
        }
        removed.sort();
        Ok(removed)
    }
}
