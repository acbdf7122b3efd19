// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;

use anyhow::{Result, anyhow};
use russh::client::{Config, Handle};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

use super::TimedOut;
use super::session::{ClientHandler, SshParams, client_config, connect};

/// Bounded set of authenticated connections to the cluster.
///
/// `max_sessions` caps how many connections may be checked out at once.
/// Released connections are parked for reuse up to `max_idle_sessions`
/// and health-checked before they are handed out again.
pub struct SessionPool {
    params: SshParams,
    config: Arc<Config>,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<Handle<ClientHandler>>>,
}

/// A checked-out connection. Dropping it closes the connection; hand it back
/// with [`SessionPool::release`] to allow reuse.
pub struct PooledSession {
    handle: Handle<ClientHandler>,
    _permit: OwnedSemaphorePermit,
}

impl PooledSession {
    pub(crate) fn handle(&self) -> &Handle<ClientHandler> {
        &self.handle
    }
}

impl SessionPool {
    pub fn new(params: SshParams) -> Self {
        let permits = Arc::new(Semaphore::new(params.max_sessions.max(1)));
        Self {
            params,
            config: Arc::new(client_config()),
            permits,
            idle: Mutex::new(Vec::new()),
        }
    }

    pub fn params(&self) -> &SshParams {
        &self.params
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    pub async fn idle_count(&self) -> usize {
        self.idle.lock().await.len()
    }

    pub async fn acquire(&self) -> Result<PooledSession> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| anyhow!("session pool is shut down"))?;

        while let Some(handle) = self.idle.lock().await.pop() {
            if handle.is_closed() {
                log::debug!("discarding closed idle session to {}", self.params.host);
                continue;
            }
            log::debug!("reusing idle session to {}", self.params.host);
            return Ok(PooledSession {
                handle,
                _permit: permit,
            });
        }

        let timeout = self.params.connect_timeout;
        let handle = tokio::time::timeout(timeout, connect(&self.params, self.config.clone()))
            .await
            .map_err(|_| TimedOut {
                operation: "ssh connect",
                secs: timeout.as_secs(),
            })??;
        Ok(PooledSession {
            handle,
            _permit: permit,
        })
    }

    /// Parks a healthy connection for reuse, or disconnects it when the idle
    /// set is full or reuse is disabled.
    pub async fn release(&self, session: PooledSession) {
        let PooledSession { handle, _permit } = session;
        if !handle.is_closed() {
            let mut idle = self.idle.lock().await;
            if idle.len() < self.params.max_idle_sessions {
                idle.push(handle);
                return;
            }
        }
        disconnect(handle).await;
    }

    pub async fn shutdown(&self) {
        self.permits.close();
        let handles: Vec<_> = self.idle.lock().await.drain(..).collect();
        for handle in handles {
            disconnect(handle).await;
        }
    }
}

async fn disconnect(handle: Handle<ClientHandler>) {
    if handle.is_closed() {
        return;
    }
    if let Err(err) = handle
        .disconnect(russh::Disconnect::ByApplication, "", "en")
        .await
    {
        log::debug!("error while disconnecting: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn params(max_sessions: usize) -> SshParams {
        SshParams {
            host: "127.0.0.1".to_string(),
            port: 22,
            username: "alice".to_string(),
            identity_path: "/nonexistent/id_ed25519".into(),
            known_hosts_path: None,
            connect_timeout: Duration::from_secs(1),
            transfer_timeout: Duration::from_secs(1),
            max_sessions,
            max_idle_sessions: 0,
        }
    }

    #[tokio::test]
    async fn failed_connect_returns_its_permit() {
        let pool = SessionPool::new(params(2));
        assert_eq!(pool.available_permits(), 2);

        assert!(pool.acquire().await.is_err());
        assert_eq!(pool.available_permits(), 2);
        assert_eq!(pool.idle_count().await, 0);
    }

    #[tokio::test]
    async fn zero_max_sessions_still_allows_one() {
        let pool = SessionPool::new(params(0));
        assert_eq!(pool.available_permits(), 1);
    }

    #[tokio::test]
    async fn shutdown_rejects_new_sessions() {
        let pool = SessionPool::new(params(1));
        pool.shutdown().await;
        let err = pool.acquire().await.err().expect("pool is closed");
        assert!(err.to_string().contains("shut down"));
    }
}
