// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use russh::ChannelMsg;
use russh::client::{AuthResult, Config, Handle};
use russh::keys::PrivateKeyWithHashAlg;
use russh::keys::known_hosts::{learn_known_hosts, learn_known_hosts_path};

use super::AuthenticationFailure;

/// Minimal russh client handler; only host key checking is customised.
#[derive(Clone, Debug)]
pub(crate) struct ClientHandler {
    host: String,
    addr: SocketAddr,
    known_hosts_path: Option<PathBuf>,
}

impl ClientHandler {
    fn new(host: String, addr: SocketAddr, known_hosts_path: Option<PathBuf>) -> Self {
        Self {
            host,
            addr,
            known_hosts_path,
        }
    }
}

impl russh::client::Handler for ClientHandler {
    type Error = anyhow::Error;
    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        verify_server_key(
            &self.host,
            self.addr,
            server_public_key,
            self.known_hosts_path.as_deref(),
        )
    }
}

/// Parameters for reaching the cluster login node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SshParams {
    /// Hostname or IP; also the known_hosts lookup key.
    pub host: String,
    pub port: u16,
    pub username: String,
    pub identity_path: PathBuf,
    /// Falls back to `~/.ssh/known_hosts` when unset.
    pub known_hosts_path: Option<PathBuf>,
    pub connect_timeout: Duration,
    pub transfer_timeout: Duration,
    pub max_sessions: usize,
    /// 0 disables reuse: every operation gets a fresh connection.
    pub max_idle_sessions: usize,
}

pub(crate) fn client_config() -> Config {
    Config {
        inactivity_timeout: Some(Duration::from_secs(30)),
        keepalive_interval: Some(Duration::from_secs(10)),
        channel_buffer_size: 64,
        window_size: 1024 * 1024,
        ..Default::default()
    }
}

fn check_known_hosts_for(
    host: &str,
    port: u16,
    key: &russh::keys::ssh_key::PublicKey,
    known_hosts_path: Option<&Path>,
) -> std::result::Result<bool, russh::keys::Error> {
    match known_hosts_path {
        Some(path) => russh::keys::check_known_hosts_path(host, port, key, path),
        None => russh::keys::check_known_hosts(host, port, key),
    }
}

fn learn_known_hosts_for(
    host: &str,
    port: u16,
    key: &russh::keys::ssh_key::PublicKey,
    known_hosts_path: Option<&Path>,
) -> std::result::Result<(), russh::keys::Error> {
    match known_hosts_path {
        Some(path) => learn_known_hosts_path(host, port, key, path),
        None => learn_known_hosts(host, port, key),
    }
}

/// Accepts keys already in known_hosts (by name, then by IP), learns unknown
/// hosts and rejects keys that changed.
fn verify_server_key(
    host: &str,
    addr: SocketAddr,
    key: &russh::keys::ssh_key::PublicKey,
    known_hosts_path: Option<&Path>,
) -> std::result::Result<bool, anyhow::Error> {
    let port = addr.port();
    let ip_host = addr.ip().to_string();
    let mut candidates = vec![host.to_string()];
    if ip_host != host {
        candidates.push(ip_host);
    }

    for candidate in &candidates {
        match check_known_hosts_for(candidate, port, key, known_hosts_path) {
            Ok(true) => return Ok(true),
            Ok(false) => {}
            Err(err) => {
                log::warn!("server key validation failed for {host}:{port}: {err}");
                return Err(anyhow!(
                    "server key validation failed for {host}:{port}: {err}"
                ));
            }
        }
    }

    log::info!(
        "server key for {host}:{port} is not present in known_hosts (tried {}); learning",
        candidates.join(", ")
    );
    learn_known_hosts_for(host, port, key, known_hosts_path).map_err(|err| {
        log::warn!("failed to learn server key for {host}:{port}: {err}");
        anyhow!("failed to learn server key for {host}:{port}: {err}")
    })?;
    Ok(true)
}

/// Opens a TCP + SSH connection and authenticates with the configured key.
pub(crate) async fn connect(params: &SshParams, config: Arc<Config>) -> Result<Handle<ClientHandler>> {
    let key = russh::keys::load_secret_key(&params.identity_path, None).map_err(|err| {
        anyhow::Error::from(AuthenticationFailure).context(format!(
            "failed to load secret key at {}: {err}",
            params.identity_path.display()
        ))
    })?;

    let addr = tokio::net::lookup_host((params.host.as_str(), params.port))
        .await
        .with_context(|| format!("failed to resolve {}:{}", params.host, params.port))?
        .next()
        .ok_or_else(|| anyhow!("no address found for {}:{}", params.host, params.port))?;

    log::info!("connecting to {}@{}", params.username, addr);
    let handler = ClientHandler::new(params.host.clone(), addr, params.known_hosts_path.clone());
    let mut handle = russh::client::connect(config, addr, handler)
        .await
        .context("SSH connect failed")?;

    let pk = PrivateKeyWithHashAlg::new(
        Arc::new(key),
        handle.best_supported_rsa_hash().await?.flatten(),
    );
    let result = handle
        .authenticate_publickey(params.username.clone(), pk)
        .await?;
    if !matches!(result, AuthResult::Success) {
        log::debug!("public key rejected for {}@{}", params.username, addr);
        return Err(AuthenticationFailure.into());
    }
    log::debug!("authenticated as {}@{}", params.username, addr);
    Ok(handle)
}

fn handle_capture_message(
    msg: &ChannelMsg,
    out: &mut Vec<u8>,
    err: &mut Vec<u8>,
    code: &mut i32,
) -> bool {
    match msg {
        ChannelMsg::Data { data } => {
            out.extend_from_slice(data);
            false
        }
        ChannelMsg::ExtendedData { data, ext: 1 } => {
            err.extend_from_slice(data);
            false
        }
        ChannelMsg::ExitStatus { exit_status } => {
            *code = *exit_status as i32;
            false
        }
        ChannelMsg::Close => true,
        _ => false,
    }
}

/// Runs one command on its own channel, collecting stdout, stderr and the exit code.
pub(crate) async fn exec_capture(
    handle: &Handle<ClientHandler>,
    cmd: &str,
) -> Result<(Vec<u8>, Vec<u8>, i32)> {
    let mut chan = handle.channel_open_session().await?;
    log::debug!("executing '{cmd}'");
    chan.exec(true, cmd).await.context("exec request")?;
    let mut out = Vec::new();
    let mut err = Vec::new();
    let mut code: i32 = 0;
    while let Some(msg) = chan.wait().await {
        if handle_capture_message(&msg, &mut out, &mut err, &mut code) {
            break;
        }
    }
    let _ = chan.close().await;
    Ok((out, err, code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use russh::CryptoVec;
    use std::fs;
    use tempfile::tempdir;

    const KEY_B64: &str = "AAAAC3NzaC1lZDI1NTE5AAAAIJdD7y3aLq454yWBdwLWbieU1ebz9/cu7/QEXn9OIeZJ";
    const CHANGED_KEY_B64: &str =
        "AAAAC3NzaC1lZDI1NTE5AAAAILIG2T/B0l0gaqj3puu510tu9N1OkQ4znY3LYuEm5zCF";

    fn cluster_addr() -> SocketAddr {
        "203.0.113.10:22".parse().expect("addr")
    }

    #[test]
    fn handle_capture_message_accumulates_output() {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let mut code = 0;

        let msg = ChannelMsg::Data {
            data: CryptoVec::from_slice(b"Submitted"),
        };
        assert!(!handle_capture_message(&msg, &mut out, &mut err, &mut code));
        assert_eq!(out, b"Submitted");

        let msg = ChannelMsg::ExtendedData {
            data: CryptoVec::from_slice(b"sbatch: error"),
            ext: 1,
        };
        assert!(!handle_capture_message(&msg, &mut out, &mut err, &mut code));
        assert_eq!(err, b"sbatch: error");

        let msg = ChannelMsg::ExtendedData {
            data: CryptoVec::from_slice(b"ignored"),
            ext: 2,
        };
        assert!(!handle_capture_message(&msg, &mut out, &mut err, &mut code));
        assert_eq!(err, b"sbatch: error");

        let msg = ChannelMsg::ExitStatus { exit_status: 1 };
        assert!(!handle_capture_message(&msg, &mut out, &mut err, &mut code));
        assert_eq!(code, 1);

        assert!(handle_capture_message(
            &ChannelMsg::Close,
            &mut out,
            &mut err,
            &mut code
        ));
    }

    #[test]
    fn verify_server_key_accepts_known_host() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("known_hosts");
        fs::write(&path, format!("login.cluster.example ssh-ed25519 {KEY_B64}\n"))
            .expect("write known_hosts");
        let key = russh::keys::parse_public_key_base64(KEY_B64).expect("key");

        let ok = verify_server_key("login.cluster.example", cluster_addr(), &key, Some(&path))
            .expect("verify");
        assert!(ok);
    }

    #[test]
    fn verify_server_key_accepts_ip_entry() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("known_hosts");
        fs::write(&path, format!("203.0.113.10 ssh-ed25519 {KEY_B64}\n"))
            .expect("write known_hosts");
        let key = russh::keys::parse_public_key_base64(KEY_B64).expect("key");

        let ok = verify_server_key("login.cluster.example", cluster_addr(), &key, Some(&path))
            .expect("verify");
        assert!(ok);
    }

    #[test]
    fn verify_server_key_learns_unknown_host() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("known_hosts");
        let key = russh::keys::parse_public_key_base64(KEY_B64).expect("key");

        let ok = verify_server_key("new.cluster.example", cluster_addr(), &key, Some(&path))
            .expect("verify");
        assert!(ok);

        let contents = fs::read_to_string(&path).expect("read known_hosts");
        assert!(contents.contains("new.cluster.example"));
        assert!(contents.contains(KEY_B64));
    }

    #[test]
    fn verify_server_key_rejects_changed_key() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("known_hosts");
        fs::write(&path, format!("login.cluster.example ssh-ed25519 {KEY_B64}\n"))
            .expect("write known_hosts");
        let changed = russh::keys::parse_public_key_base64(CHANGED_KEY_B64).expect("key");

        let result =
            verify_server_key("login.cluster.example", cluster_addr(), &changed, Some(&path));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn missing_identity_is_an_authentication_failure() {
        let tmp = tempdir().expect("tempdir");
        let params = SshParams {
            host: "127.0.0.1".to_string(),
            port: 22,
            username: "alice".to_string(),
            identity_path: tmp.path().join("id_missing"),
            known_hosts_path: None,
            connect_timeout: Duration::from_secs(1),
            transfer_timeout: Duration::from_secs(1),
            max_sessions: 1,
            max_idle_sessions: 0,
        };

        let err = connect(&params, Arc::new(client_config()))
            .await
            .err()
            .expect("connect must fail");
        assert!(err.chain().any(|cause| cause.is::<AuthenticationFailure>()));
    }
}
