// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{ExecCapture, FileChannel, TransportPort};

mod error;
mod pool;
mod session;
mod sftp;

pub use error::{AuthenticationFailure, TimedOut};
pub use pool::{PooledSession, SessionPool};
pub use session::SshParams;
pub use sftp::SftpChannel;

/// Remote command execution and file transfer over one pooled SSH target.
#[derive(Clone)]
pub struct SshTransport {
    pool: Arc<SessionPool>,
}

impl SshTransport {
    pub fn new(params: SshParams) -> Self {
        Self {
            pool: Arc::new(SessionPool::new(params)),
        }
    }

    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}

fn ssh_error_code(err: &anyhow::Error) -> &'static str {
    if err.chain().any(|cause| cause.is::<AuthenticationFailure>()) {
        codes::AUTHENTICATION_FAILURE
    } else if err.chain().any(|cause| cause.is::<TimedOut>()) {
        codes::TIMEOUT
    } else {
        codes::CONNECTION_FAILURE
    }
}

fn map_connect_error(err: anyhow::Error) -> AppError {
    AppError::with_message(
        AppErrorKind::Transport,
        ssh_error_code(&err),
        format!("ssh connect failed: {err:#}"),
    )
}

fn map_exec_error(err: anyhow::Error) -> AppError {
    AppError::with_message(
        AppErrorKind::Transport,
        codes::REMOTE_ERROR,
        format!("ssh exec failed: {err:#}"),
    )
}

fn command_timeout(timeout: Duration) -> AppError {
    AppError::with_message(
        AppErrorKind::Transport,
        codes::TIMEOUT,
        format!("remote command timed out after {}s", timeout.as_secs()),
    )
}

#[async_trait]
impl TransportPort for SshTransport {
    #[tracing::instrument(
        name = "ssh",
        level = "debug",
        skip(self, command),
        fields(op = "execute", host = %self.pool.params().host, user = %self.pool.params().username)
    )]
    async fn execute(&self, command: &str, timeout: Duration) -> AppResult<ExecCapture> {
        let run = async {
            let pooled = self.pool.acquire().await.map_err(map_connect_error)?;
            let result = session::exec_capture(pooled.handle(), command).await;
            self.pool.release(pooled).await;
            let (stdout, stderr, exit_code) = result.map_err(map_exec_error)?;
            Ok(ExecCapture {
                stdout,
                stderr,
                exit_code,
            })
        };
        match tokio::time::timeout(timeout, run).await {
            Ok(result) => result,
            Err(_) => {
                log::warn!("remote command exceeded {}s", timeout.as_secs());
                Err(command_timeout(timeout))
            }
        }
    }

    #[tracing::instrument(
        name = "sftp",
        level = "debug",
        skip(self),
        fields(op = "open", host = %self.pool.params().host, user = %self.pool.params().username)
    )]
    async fn open_file_channel(&self) -> AppResult<Box<dyn FileChannel>> {
        let session = self.pool.acquire().await.map_err(map_connect_error)?;
        let channel = SftpChannel::open(self.pool.clone(), session)
            .await
            .map_err(|err| {
                AppError::with_message(
                    AppErrorKind::Transport,
                    codes::CONNECTION_FAILURE,
                    format!("sftp subsystem unavailable: {err:#}"),
                )
            })?;
        Ok(Box::new(channel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use tempfile::tempdir;

    #[test]
    fn connect_errors_keep_their_cause() {
        let auth = anyhow::Error::from(AuthenticationFailure).context("loading key");
        assert_eq!(map_connect_error(auth).code(), codes::AUTHENTICATION_FAILURE);

        let timed_out = anyhow::Error::from(TimedOut {
            operation: "ssh connect",
            secs: 10,
        });
        assert_eq!(map_connect_error(timed_out).code(), codes::TIMEOUT);

        let refused = anyhow!("connection refused").context("SSH connect failed");
        let err = map_connect_error(refused);
        assert_eq!(err.code(), codes::CONNECTION_FAILURE);
        assert!(err.is_transport());
        assert!(err.message().contains("connection refused"));
    }

    #[test]
    fn command_timeout_is_a_transport_error() {
        let err = command_timeout(Duration::from_secs(10));
        assert_eq!(err.kind(), AppErrorKind::Transport);
        assert_eq!(err.code(), codes::TIMEOUT);
        assert_eq!(err.message(), "remote command timed out after 10s");
    }

    #[tokio::test]
    async fn unusable_identity_fails_before_touching_the_network() {
        let tmp = tempdir().expect("tempdir");
        let transport = SshTransport::new(SshParams {
            host: "login.cluster.invalid".to_string(),
            port: 22,
            username: "alice".to_string(),
            identity_path: tmp.path().join("id_ed25519"),
            known_hosts_path: Some(tmp.path().join("known_hosts")),
            connect_timeout: Duration::from_secs(2),
            transfer_timeout: Duration::from_secs(2),
            max_sessions: 1,
            max_idle_sessions: 0,
        });

        let err = transport
            .execute("squeue -j 1 -h -o %T", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::AUTHENTICATION_FAILURE);

        let err = transport.open_file_channel().await.err().expect("no channel");
        assert_eq!(err.code(), codes::AUTHENTICATION_FAILURE);
    }
}
