// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::adapters::ssh::SshParams;
use crate::app::usecases::{JobSettings, RemoteSettings, UseCaseSettings, VisualizationSettings};

const APP_DIR_NAME: &str = "slurmgate";
const CONFIG_FILE_NAME: &str = "slurmgate.toml";
const CONFIG_ENV_VAR: &str = "SLURMGATE_CONFIG_PATH";
const OUTPUTS_DIR_NAME: &str = "outputs";
const SESSIONS_DIR_NAME: &str = "sessions";

const DEFAULT_SSH_PORT: u16 = 22;
const DEFAULT_IDENTITY_PATH: &str = "~/.ssh/id_rsa";
const DEFAULT_MODULE_INIT: &str = "/etc/profile.d/modules.sh";
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 10;
const DEFAULT_TRANSFER_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_SESSIONS: usize = 8;

const DEFAULT_EXECUTABLE: &str = "masif-preprocess";
const DEFAULT_TIME: &str = "02:00:00";
const DEFAULT_MEMORY: &str = "8G";
const DEFAULT_CPUS: u32 = 4;
const DEFAULT_MODULES: &[&str] = &["Singularity/3.11.3", "MaSIF-neosurf/1.0"];
const DEFAULT_NOTIFY_COMMAND: &str = "/usr/bin/mail";
const DEFAULT_NAME_PREFIX: &str = "masif";

const DEFAULT_CONTAINER_ROOT: &str = "/data";
const DEFAULT_VIEWER_URL: &str = "http://localhost:6080";
const DEFAULT_SESSION_TTL_SECS: u64 = 3600;

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    cache_dir: Option<String>,
    verbose: Option<bool>,
    #[serde(default)]
    remote: FileRemoteConfig,
    #[serde(default)]
    job: FileJobConfig,
    #[serde(default)]
    visualization: FileVisualizationConfig,
}

#[derive(Debug, Default, Deserialize)]
struct FileRemoteConfig {
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    identity_path: Option<String>,
    known_hosts_path: Option<String>,
    work_dir: Option<String>,
    module_init: Option<String>,
    easybuild_prefix: Option<String>,
    tool_repo: Option<String>,
    connect_timeout_secs: Option<u64>,
    command_timeout_secs: Option<u64>,
    transfer_timeout_secs: Option<u64>,
    max_idle_sessions: Option<usize>,
    max_sessions: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct FileJobConfig {
    executable: Option<String>,
    time: Option<String>,
    memory: Option<String>,
    cpus: Option<u32>,
    modules: Option<Vec<String>>,
    notify_command: Option<String>,
    details_url: Option<String>,
    default_name_prefix: Option<String>,
    example_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FileVisualizationConfig {
    enabled: Option<bool>,
    session_root: Option<String>,
    container_root: Option<String>,
    viewer_url: Option<String>,
    session_ttl_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub identity_path: PathBuf,
    pub known_hosts_path: Option<PathBuf>,
    pub work_dir: String,
    pub module_init: String,
    pub easybuild_prefix: Option<String>,
    pub tool_repo: Option<String>,
    pub connect_timeout_secs: u64,
    pub command_timeout_secs: u64,
    pub transfer_timeout_secs: u64,
    pub max_idle_sessions: usize,
    pub max_sessions: usize,
}

#[derive(Debug, Clone)]
pub struct JobConfig {
    pub executable: String,
    pub time: String,
    pub memory: String,
    pub cpus: u32,
    pub modules: Vec<String>,
    pub notify_command: String,
    pub details_url: Option<String>,
    pub default_name_prefix: String,
    /// Directory holding the bundled example structures.
    pub example_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct VisualizationConfig {
    pub enabled: bool,
    pub session_root: PathBuf,
    pub container_root: String,
    pub viewer_url: String,
    pub session_ttl_secs: u64,
}

#[derive(Debug)]
pub struct Config {
    pub cache_dir: PathBuf,
    pub verbose: bool,
    pub remote: RemoteConfig,
    pub job: JobConfig,
    pub visualization: VisualizationConfig,
    pub config_path: Option<PathBuf>,
}

impl Config {
    /// Checks the settings every remote operation depends on.
    pub fn validate_remote(&self) -> Result<()> {
        if self.remote.host.trim().is_empty() {
            anyhow::bail!("remote.host must be set to reach the cluster");
        }
        if self.remote.username.trim().is_empty() {
            anyhow::bail!("remote.username must be set to reach the cluster");
        }
        if self.remote.work_dir.trim().is_empty() {
            anyhow::bail!("remote.work_dir must be set to reach the cluster");
        }
        Ok(())
    }

    pub fn ssh_params(&self) -> SshParams {
        SshParams {
            host: self.remote.host.trim().to_string(),
            port: self.remote.port,
            username: self.remote.username.trim().to_string(),
            identity_path: self.remote.identity_path.clone(),
            known_hosts_path: self.remote.known_hosts_path.clone(),
            connect_timeout: Duration::from_secs(self.remote.connect_timeout_secs),
            transfer_timeout: Duration::from_secs(self.remote.transfer_timeout_secs),
            max_sessions: self.remote.max_sessions,
            max_idle_sessions: self.remote.max_idle_sessions,
        }
    }

    pub fn usecase_settings(&self) -> UseCaseSettings {
        UseCaseSettings {
            remote: RemoteSettings {
                work_dir: self.remote.work_dir.trim_end_matches('/').to_string(),
                module_init: self.remote.module_init.clone(),
                easybuild_prefix: self.remote.easybuild_prefix.clone(),
                tool_repo: self.remote.tool_repo.clone(),
                command_timeout: Duration::from_secs(self.remote.command_timeout_secs),
            },
            job: JobSettings {
                executable: self.job.executable.clone(),
                time: self.job.time.clone(),
                memory: self.job.memory.clone(),
                cpus: self.job.cpus,
                modules: self.job.modules.clone(),
                notify_command: self.job.notify_command.clone(),
                details_url: self.job.details_url.clone(),
                default_name_prefix: self.job.default_name_prefix.clone(),
                example_dir: self.job.example_dir.clone(),
            },
            visualization: VisualizationSettings {
                enabled: self.visualization.enabled,
                session_root: self.visualization.session_root.clone(),
                container_root: self.visualization.container_root.trim_end_matches('/').to_string(),
                viewer_url: self.visualization.viewer_url.trim_end_matches('/').to_string(),
                session_ttl: Duration::from_secs(self.visualization.session_ttl_secs),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Override,
    Env,
    ConfigFile,
    Default,
}

impl ConfigSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigSource::Override => "override",
            ConfigSource::Env => "env",
            ConfigSource::ConfigFile => "config",
            ConfigSource::Default => "default",
        }
    }
}

#[derive(Debug)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

#[derive(Debug)]
pub struct ConfigReport {
    pub config_path: Option<PathBuf>,
    pub config_path_source: Option<ConfigSource>,
    pub config_file_present: bool,
    pub cache_dir: ConfigValue<PathBuf>,
    pub verbose: ConfigValue<bool>,
    pub remote_host: ConfigValue<String>,
    pub work_dir: ConfigValue<String>,
    pub max_idle_sessions: ConfigValue<usize>,
    pub visualization_enabled: ConfigValue<bool>,
    pub session_root: ConfigValue<PathBuf>,
}

#[derive(Debug)]
pub struct LoadResult {
    pub config: Config,
    pub report: ConfigReport,
}

#[derive(Debug, Default)]
pub struct Overrides {
    pub cache_dir: Option<PathBuf>,
    pub verbose: Option<bool>,
}

fn from_file_or<T>(file_value: Option<T>, default: T) -> ConfigValue<T> {
    match file_value {
        Some(value) => ConfigValue {
            value,
            source: ConfigSource::ConfigFile,
        },
        None => ConfigValue {
            value: default,
            source: ConfigSource::Default,
        },
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn load(config_path_override: Option<PathBuf>, overrides: Overrides) -> Result<Config> {
    Ok(load_with_report(config_path_override, overrides)?.config)
}

pub fn load_with_report(
    config_path_override: Option<PathBuf>,
    overrides: Overrides,
) -> Result<LoadResult> {
    let (config_path, config_path_source, required) = match config_path_override {
        Some(path) => (Some(expand_path(path)), Some(ConfigSource::Override), true),
        None => match config_path_from_env()? {
            Some(path) => (Some(expand_path(path)), Some(ConfigSource::Env), true),
            None => match default_config_path().ok() {
                Some(path) => (Some(path), Some(ConfigSource::Default), false),
                None => (None, None, false),
            },
        },
    };
    let config_file_present = config_path
        .as_deref()
        .map(|path| path.exists())
        .unwrap_or(false);

    let file_config = match config_path.as_deref() {
        Some(path) => read_config_file(path, required)?,
        None => FileConfig::default(),
    };
    let base_dir = config_path.as_deref().and_then(|path| path.parent());
    let FileConfig {
        cache_dir: file_cache_dir,
        verbose: file_verbose,
        remote: file_remote,
        job: file_job,
        visualization: file_viz,
    } = file_config;

    let cache_dir = match overrides.cache_dir {
        Some(path) => ConfigValue {
            value: expand_path(path),
            source: ConfigSource::Override,
        },
        None => match file_cache_dir {
            Some(raw) => ConfigValue {
                value: resolve_path(&raw, base_dir),
                source: ConfigSource::ConfigFile,
            },
            None => ConfigValue {
                value: default_data_dir()
                    .with_context(|| {
                        "failed to resolve default cache directory; specify --cache-dir or set cache_dir in the config file"
                    })?
                    .join(OUTPUTS_DIR_NAME),
                source: ConfigSource::Default,
            },
        },
    };

    let verbose = match overrides.verbose {
        Some(verbose) => ConfigValue {
            value: verbose,
            source: ConfigSource::Override,
        },
        None => from_file_or(file_verbose, false),
    };

    let remote_host = from_file_or(non_empty(file_remote.host), String::new());
    let work_dir = from_file_or(non_empty(file_remote.work_dir), String::new());
    let max_idle_sessions = from_file_or(file_remote.max_idle_sessions, 0);
    let port = file_remote.port.unwrap_or(DEFAULT_SSH_PORT);
    if port == 0 {
        anyhow::bail!("remote.port must be between 1 and 65535");
    }
    let connect_timeout_secs = file_remote
        .connect_timeout_secs
        .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS);
    let command_timeout_secs = file_remote
        .command_timeout_secs
        .unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS);
    let transfer_timeout_secs = file_remote
        .transfer_timeout_secs
        .unwrap_or(DEFAULT_TRANSFER_TIMEOUT_SECS);
    if connect_timeout_secs == 0 || command_timeout_secs == 0 || transfer_timeout_secs == 0 {
        anyhow::bail!("remote timeouts must be greater than zero");
    }
    let max_sessions = file_remote.max_sessions.unwrap_or(DEFAULT_MAX_SESSIONS);
    if max_sessions == 0 {
        anyhow::bail!("remote.max_sessions must be greater than zero");
    }

    let remote = RemoteConfig {
        host: remote_host.value.clone(),
        port,
        username: non_empty(file_remote.username).unwrap_or_default(),
        identity_path: resolve_path(
            file_remote
                .identity_path
                .as_deref()
                .unwrap_or(DEFAULT_IDENTITY_PATH),
            base_dir,
        ),
        known_hosts_path: non_empty(file_remote.known_hosts_path)
            .map(|raw| resolve_path(&raw, base_dir)),
        work_dir: work_dir.value.clone(),
        module_init: file_remote
            .module_init
            .unwrap_or_else(|| DEFAULT_MODULE_INIT.to_string()),
        easybuild_prefix: non_empty(file_remote.easybuild_prefix),
        tool_repo: non_empty(file_remote.tool_repo),
        connect_timeout_secs,
        command_timeout_secs,
        transfer_timeout_secs,
        max_idle_sessions: max_idle_sessions.value,
        max_sessions,
    };

    let cpus = file_job.cpus.unwrap_or(DEFAULT_CPUS);
    if cpus == 0 {
        anyhow::bail!("job.cpus must be greater than zero");
    }
    let job = JobConfig {
        executable: file_job
            .executable
            .unwrap_or_else(|| DEFAULT_EXECUTABLE.to_string()),
        time: file_job.time.unwrap_or_else(|| DEFAULT_TIME.to_string()),
        memory: file_job.memory.unwrap_or_else(|| DEFAULT_MEMORY.to_string()),
        cpus,
        modules: file_job
            .modules
            .unwrap_or_else(|| DEFAULT_MODULES.iter().map(|m| m.to_string()).collect()),
        notify_command: file_job
            .notify_command
            .unwrap_or_else(|| DEFAULT_NOTIFY_COMMAND.to_string()),
        details_url: non_empty(file_job.details_url),
        default_name_prefix: file_job
            .default_name_prefix
            .unwrap_or_else(|| DEFAULT_NAME_PREFIX.to_string()),
        example_dir: non_empty(file_job.example_dir).map(|raw| resolve_path(&raw, base_dir)),
    };

    let visualization_enabled = from_file_or(file_viz.enabled, false);
    let session_root = match file_viz.session_root {
        Some(raw) => ConfigValue {
            value: resolve_path(&raw, base_dir),
            source: ConfigSource::ConfigFile,
        },
        None => ConfigValue {
            value: default_data_dir()
                .with_context(|| {
                    "failed to resolve default session directory; set visualization.session_root in the config file"
                })?
                .join(SESSIONS_DIR_NAME),
            source: ConfigSource::Default,
        },
    };
    let session_ttl_secs = file_viz.session_ttl_secs.unwrap_or(DEFAULT_SESSION_TTL_SECS);
    if session_ttl_secs == 0 {
        anyhow::bail!("visualization.session_ttl_secs must be greater than zero");
    }
    let visualization = VisualizationConfig {
        enabled: visualization_enabled.value,
        session_root: session_root.value.clone(),
        container_root: file_viz
            .container_root
            .unwrap_or_else(|| DEFAULT_CONTAINER_ROOT.to_string()),
        viewer_url: file_viz
            .viewer_url
            .unwrap_or_else(|| DEFAULT_VIEWER_URL.to_string()),
        session_ttl_secs,
    };

    let config = Config {
        cache_dir: cache_dir.value.clone(),
        verbose: verbose.value,
        remote,
        job,
        visualization,
        config_path: config_path.clone(),
    };

    let report = ConfigReport {
        config_path,
        config_path_source,
        config_file_present,
        cache_dir,
        verbose,
        remote_host,
        work_dir,
        max_idle_sessions,
        visualization_enabled,
        session_root,
    };

    Ok(LoadResult { config, report })
}

pub fn ensure_cache_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .with_context(|| format!("failed to create cache directory {}", path.display()))
}

fn read_config_file(path: &Path, required: bool) -> Result<FileConfig> {
    if !path.exists() {
        if required {
            anyhow::bail!("config file not found at {}", path.display());
        }
        return Ok(FileConfig::default());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

fn resolve_path(raw: &str, base_dir: Option<&Path>) -> PathBuf {
    let expanded = shellexpand::tilde(raw);
    let path = PathBuf::from(expanded.as_ref());
    if path.is_absolute() {
        return path;
    }
    match base_dir {
        Some(dir) => dir.join(path),
        None => path,
    }
}

fn expand_path(path: PathBuf) -> PathBuf {
    let path_string = path.to_string_lossy().to_string();
    let expanded = shellexpand::tilde(&path_string);
    PathBuf::from(expanded.as_ref())
}

fn config_path_from_env() -> Result<Option<PathBuf>> {
    match std::env::var_os(CONFIG_ENV_VAR) {
        Some(value) => {
            if value.is_empty() {
                anyhow::bail!("{CONFIG_ENV_VAR} is set but empty");
            }
            Ok(Some(PathBuf::from(value)))
        }
        None => Ok(None),
    }
}

fn default_config_path() -> Result<PathBuf> {
    Ok(default_config_dir()?.join(CONFIG_FILE_NAME))
}

fn default_config_dir() -> Result<PathBuf> {
    let base = dirs::config_dir().context("failed to resolve config directory")?;
    Ok(base.join(APP_DIR_NAME))
}

fn default_data_dir() -> Result<PathBuf> {
    let base = dirs::data_dir().context("failed to resolve data directory")?;
    Ok(base.join(APP_DIR_NAME))
}
