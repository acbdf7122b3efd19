// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use russh_sftp::client::SftpSession;
use russh_sftp::client::error::Error as SftpError;
use russh_sftp::protocol::{FileAttributes, StatusCode};
use tokio::fs as tokiofs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::FileChannel;
use crate::app::services::classify::PARTIAL_SUFFIX;
use crate::app::types::{DirOutcome, EntryKind, RemoteEntry};

use super::TimedOut;
use super::pool::{PooledSession, SessionPool};

/// SFTP subsystem on a pooled connection. The connection goes back to the
/// pool on [`FileChannel::close`].
pub struct SftpChannel {
    sftp: SftpSession,
    session: PooledSession,
    pool: Arc<SessionPool>,
    transfer_timeout: Duration,
}

impl SftpChannel {
    pub(crate) async fn open(pool: Arc<SessionPool>, session: PooledSession) -> Result<Self> {
        let channel = session.handle().channel_open_session().await?;
        channel.request_subsystem(true, "sftp").await?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .context("starting sftp subsystem")?;
        let transfer_timeout = pool.params().transfer_timeout;
        Ok(Self {
            sftp,
            session,
            pool,
            transfer_timeout,
        })
    }

    async fn bounded<T, F>(&self, operation: &'static str, path: &str, fut: F) -> AppResult<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.transfer_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(map_sftp_error(operation, path, err)),
            Err(_) => Err(map_sftp_error(
                operation,
                path,
                TimedOut {
                    operation,
                    secs: self.transfer_timeout.as_secs(),
                }
                .into(),
            )),
        }
    }
}

fn partial_path(local_path: &Path) -> PathBuf {
    let mut name = local_path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(PARTIAL_SUFFIX);
    local_path.with_file_name(name)
}

/// Download staging file, removed on drop unless the download was committed.
/// Dropping covers futures abandoned by a timeout as well as plain errors.
struct StagingFile {
    path: PathBuf,
    committed: bool,
}

impl StagingFile {
    fn for_target(local_path: &Path) -> Self {
        Self {
            path: partial_path(local_path),
            committed: false,
        }
    }

    async fn commit(mut self, local_path: &Path) -> Result<()> {
        tokiofs::rename(&self.path, local_path)
            .await
            .with_context(|| format!("moving download into {}", local_path.display()))?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

fn base_name(remote_path: &str) -> String {
    remote_path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(remote_path)
        .to_string()
}

fn entry_kind(attrs: &FileAttributes) -> EntryKind {
    if attrs.is_dir() {
        EntryKind::Directory
    } else if attrs.is_regular() {
        EntryKind::File
    } else {
        EntryKind::Other
    }
}

fn to_remote_entry(name: String, attrs: &FileAttributes) -> RemoteEntry {
    RemoteEntry {
        name,
        kind: entry_kind(attrs),
        size: attrs.size.unwrap_or(0),
        permissions: attrs.permissions.map(|mode| mode & 0o7777),
    }
}

fn has_sftp_status(err: &anyhow::Error, code: StatusCode) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<SftpError>(),
            Some(SftpError::Status(status)) if status.status_code == code
        )
    })
}

fn map_sftp_error(operation: &str, path: &str, err: anyhow::Error) -> AppError {
    if err.chain().any(|cause| cause.is::<TimedOut>()) {
        return AppError::with_message(
            AppErrorKind::Transport,
            codes::TIMEOUT,
            format!("sftp {operation} {path} timed out"),
        );
    }
    let (kind, code) = if has_sftp_status(&err, StatusCode::NoSuchFile) {
        (AppErrorKind::NotFound, codes::NOT_FOUND)
    } else if has_sftp_status(&err, StatusCode::PermissionDenied) {
        (AppErrorKind::AccessDenied, codes::ACCESS_DENIED)
    } else {
        (AppErrorKind::Transport, codes::REMOTE_ERROR)
    };
    AppError::with_message(kind, code, format!("sftp {operation} {path} failed: {err:#}"))
}

async fn upload(sftp: &SftpSession, local_path: &Path, remote_path: &str) -> Result<()> {
    log::debug!("uploading {} -> {remote_path}", local_path.display());
    let mut local = tokiofs::File::open(local_path)
        .await
        .with_context(|| format!("opening local file {}", local_path.display()))?;
    let mut remote = sftp.create(remote_path).await?;
    tokio::io::copy(&mut local, &mut remote).await?;
    remote.flush().await?;
    remote.shutdown().await?;
    Ok(())
}

async fn download(sftp: &SftpSession, remote_path: &str, local_path: &Path) -> Result<()> {
    if let Some(parent) = local_path.parent() {
        tokiofs::create_dir_all(parent).await?;
    }
    let staging = StagingFile::for_target(local_path);
    let mut remote = sftp.open(remote_path).await?;
    let mut local = tokiofs::File::create(&staging.path).await?;
    tokio::io::copy(&mut remote, &mut local).await?;
    local.flush().await?;
    local.sync_all().await?;
    drop(local);
    staging.commit(local_path).await
}

#[async_trait]
impl FileChannel for SftpChannel {
    #[tracing::instrument(name = "sftp", level = "debug", skip(self, local_path), fields(op = "put"))]
    async fn put(&self, local_path: &Path, remote_path: &str) -> AppResult<()> {
        self.bounded("put", remote_path, upload(&self.sftp, local_path, remote_path))
            .await
    }

    #[tracing::instrument(name = "sftp", level = "debug", skip(self, contents), fields(op = "put_bytes"))]
    async fn put_bytes(&self, contents: &[u8], remote_path: &str) -> AppResult<()> {
        self.bounded("put", remote_path, async {
            let mut remote = self.sftp.create(remote_path).await?;
            remote.write_all(contents).await?;
            remote.flush().await?;
            remote.shutdown().await?;
            Ok(())
        })
        .await
    }

    #[tracing::instrument(name = "sftp", level = "debug", skip(self, local_path), fields(op = "get"))]
    async fn get(&self, remote_path: &str, local_path: &Path) -> AppResult<()> {
        self.bounded("get", remote_path, download(&self.sftp, remote_path, local_path))
            .await
    }

    #[tracing::instrument(name = "sftp", level = "debug", skip(self), fields(op = "read"))]
    async fn read(&self, remote_path: &str, limit: usize) -> AppResult<Vec<u8>> {
        self.bounded("read", remote_path, async {
            let remote = self.sftp.open(remote_path).await?;
            let mut buf = Vec::new();
            remote.take(limit as u64).read_to_end(&mut buf).await?;
            Ok(buf)
        })
        .await
    }

    #[tracing::instrument(name = "sftp", level = "debug", skip(self), fields(op = "list_dir"))]
    async fn list_dir(&self, remote_path: &str) -> AppResult<Vec<RemoteEntry>> {
        self.bounded("list", remote_path, async {
            let entries = self.sftp.read_dir(remote_path).await?;
            Ok(entries
                .map(|entry| to_remote_entry(entry.file_name(), &entry.metadata()))
                .collect())
        })
        .await
    }

    #[tracing::instrument(name = "sftp", level = "debug", skip(self), fields(op = "ensure_dir"))]
    async fn ensure_dir(&self, remote_path: &str) -> AppResult<DirOutcome> {
        self.bounded("mkdir", remote_path, async {
            match self.sftp.metadata(remote_path).await {
                Ok(meta) if meta.is_dir() => return Ok(DirOutcome::AlreadyPresent),
                Ok(_) => {
                    return Err(anyhow!(
                        "remote path exists but is not a directory: {remote_path}"
                    ));
                }
                Err(err) => log::debug!("metadata for {remote_path} unavailable: {err}"),
            }
            match self.sftp.create_dir(remote_path).await {
                Ok(()) => Ok(DirOutcome::Created),
                Err(err) => match self.sftp.metadata(remote_path).await {
                    // another writer created it in between
                    Ok(meta) if meta.is_dir() => Ok(DirOutcome::AlreadyPresent),
                    _ => Err(anyhow::Error::new(err)
                        .context(format!("creating directory {remote_path}"))),
                },
            }
        })
        .await
    }

    #[tracing::instrument(name = "sftp", level = "debug", skip(self), fields(op = "make_dir"))]
    async fn make_dir(&self, remote_path: &str) -> AppResult<()> {
        self.bounded("mkdir", remote_path, async {
            self.sftp
                .create_dir(remote_path)
                .await
                .with_context(|| format!("creating directory {remote_path}"))
        })
        .await
    }

    #[tracing::instrument(name = "sftp", level = "debug", skip(self), fields(op = "stat"))]
    async fn stat(&self, remote_path: &str) -> AppResult<RemoteEntry> {
        self.bounded("stat", remote_path, async {
            let meta = self.sftp.metadata(remote_path).await?;
            Ok(to_remote_entry(base_name(remote_path), &meta))
        })
        .await
    }

    #[tracing::instrument(name = "sftp", level = "debug", skip(self), fields(op = "chmod"))]
    async fn chmod(&self, remote_path: &str, mode: u32) -> AppResult<()> {
        let attrs = FileAttributes {
            permissions: Some(mode),
            ..Default::default()
        };
        self.bounded("chmod", remote_path, async {
            self.sftp.set_metadata(remote_path, attrs).await?;
            Ok(())
        })
        .await
    }

    async fn close(self: Box<Self>) -> AppResult<()> {
        let SftpChannel {
            sftp,
            session,
            pool,
            ..
        } = *self;
        if let Err(err) = sftp.close().await {
            log::debug!("error while closing sftp session: {err}");
        }
        pool.release(session).await;
        Ok(())
    }
}
