// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::app::errors::AppResult;
use crate::app::types::{DirOutcome, RemoteEntry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecCapture {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
}

impl ExecCapture {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

#[async_trait]
/// Authenticated access to the single remote host.
/// Every call is one logical operation; failures surface as `AppErrorKind::Transport`.
pub trait TransportPort: Send + Sync {
    /// Runs `command` remotely, giving up after `timeout`.
    async fn execute(&self, command: &str, timeout: Duration) -> AppResult<ExecCapture>;

    /// Opens a file-transfer channel. The channel owns its connection until `close`.
    async fn open_file_channel(&self) -> AppResult<Box<dyn FileChannel>>;
}

#[async_trait]
/// Path-addressed file operations against the remote filesystem.
pub trait FileChannel: Send + Sync {
    async fn put(&self, local_path: &Path, remote_path: &str) -> AppResult<()>;

    async fn put_bytes(&self, contents: &[u8], remote_path: &str) -> AppResult<()>;

    async fn get(&self, remote_path: &str, local_path: &Path) -> AppResult<()>;

    /// Reads at most `limit` bytes from the start of a remote file.
    async fn read(&self, remote_path: &str, limit: usize) -> AppResult<Vec<u8>>;

    async fn list_dir(&self, remote_path: &str) -> AppResult<Vec<RemoteEntry>>;

    /// Creates a directory; an existing directory is success, anything else at the path is not.
    async fn ensure_dir(&self, remote_path: &str) -> AppResult<DirOutcome>;

    /// Creates a directory, failing if anything already exists at the path.
    async fn make_dir(&self, remote_path: &str) -> AppResult<()>;

    async fn stat(&self, remote_path: &str) -> AppResult<RemoteEntry>;

    async fn chmod(&self, remote_path: &str, mode: u32) -> AppResult<()>;

    async fn close(self: Box<Self>) -> AppResult<()>;
}
