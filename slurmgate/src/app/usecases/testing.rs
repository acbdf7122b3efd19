// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! In-memory fakes of the ports for use-case and service tests.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use time::OffsetDateTime;
use time::macros::datetime;

use crate::adapters::store::JsonJobStore;
use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{ClockPort, ExecCapture, FileChannel, JobStorePort, TransportPort};
use crate::app::types::{DirOutcome, EntryKind, JobRecord, RemoteEntry};

use super::{JobSettings, RemoteSettings, UseCaseSettings, UseCases, VisualizationSettings};

fn remote_error(message: impl Into<String>) -> AppError {
    AppError::with_message(AppErrorKind::Transport, codes::REMOTE_ERROR, message)
}

fn parent_of(path: &str) -> String {
    match path.rsplit_once('/') {
        Some(("", _)) | None => "/".to_string(),
        Some((parent, _)) => parent.to_string(),
    }
}

pub(crate) fn capture(stdout: &str, stderr: &str, exit_code: i32) -> AppResult<ExecCapture> {
    Ok(ExecCapture {
        stdout: stdout.as_bytes().to_vec(),
        stderr: stderr.as_bytes().to_vec(),
        exit_code,
    })
}

#[derive(Default)]
struct RemoteTree {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    modes: BTreeMap<String, u32>,
}

impl RemoteTree {
    fn add_dir_all(&mut self, path: &str) {
        let mut current = path.trim_end_matches('/').to_string();
        while !current.is_empty() && current != "/" {
            self.dirs.insert(current.clone());
            current = parent_of(&current);
        }
    }

    fn dir_exists(&self, path: &str) -> bool {
        path == "/" || self.dirs.contains(path)
    }
}

#[derive(Default)]
struct FakeState {
    tree: Mutex<RemoteTree>,
    /// Expected command prefix and the result to hand back, in order.
    script: Mutex<VecDeque<(String, AppResult<ExecCapture>)>>,
    commands: Mutex<Vec<String>>,
    failing_gets: Mutex<HashSet<String>>,
    failing_lists: Mutex<HashSet<String>>,
    channel_error: Mutex<Option<AppError>>,
    gets: AtomicUsize,
}

/// Remote host fake: a file tree in memory plus a queue of scripted command results.
#[derive(Clone, Default)]
pub(crate) struct FakeTransport {
    state: Arc<FakeState>,
}

impl FakeTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_file(&self, path: &str, contents: &[u8]) {
        let mut tree = self.state.tree.lock().expect("tree lock");
        tree.add_dir_all(&parent_of(path));
        tree.files.insert(path.to_string(), contents.to_vec());
    }

    pub(crate) fn add_dir(&self, path: &str) {
        self.state.tree.lock().expect("tree lock").add_dir_all(path);
    }

    pub(crate) fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.tree.lock().expect("tree lock").files.get(path).cloned()
    }

    pub(crate) fn dirs(&self) -> Vec<String> {
        self.state
            .tree
            .lock()
            .expect("tree lock")
            .dirs
            .iter()
            .cloned()
            .collect()
    }

    pub(crate) fn mode(&self, path: &str) -> Option<u32> {
        self.state.tree.lock().expect("tree lock").modes.get(path).copied()
    }

    pub(crate) fn expect_command(&self, prefix: &str, result: AppResult<ExecCapture>) {
        self.state
            .script
            .lock()
            .expect("script lock")
            .push_back((prefix.to_string(), result));
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.state.commands.lock().expect("commands lock").clone()
    }

    pub(crate) fn remaining_commands(&self) -> usize {
        self.state.script.lock().expect("script lock").len()
    }

    pub(crate) fn fail_get(&self, path: &str) {
        self.state
            .failing_gets
            .lock()
            .expect("failing gets lock")
            .insert(path.to_string());
    }

    pub(crate) fn fail_list(&self, path: &str) {
        self.state
            .failing_lists
            .lock()
            .expect("failing lists lock")
            .insert(path.to_string());
    }

    pub(crate) fn fail_channel(&self, err: AppError) {
        *self.state.channel_error.lock().expect("channel error lock") = Some(err);
    }

    pub(crate) fn get_count(&self) -> usize {
        self.state.gets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportPort for FakeTransport {
    async fn execute(&self, command: &str, _timeout: Duration) -> AppResult<ExecCapture> {
        self.state
            .commands
            .lock()
            .expect("commands lock")
            .push(command.to_string());
        let mut script = self.state.script.lock().expect("script lock");
        let Some((expected, result)) = script.pop_front() else {
            panic!("unexpected command: {command}");
        };
        assert!(
            command.starts_with(&expected),
            "command {command:?} does not start with {expected:?}"
        );
        result
    }

    async fn open_file_channel(&self) -> AppResult<Box<dyn FileChannel>> {
        if let Some(err) = self.state.channel_error.lock().expect("channel error lock").clone() {
            return Err(err);
        }
        Ok(Box::new(FakeChannel {
            state: self.state.clone(),
        }))
    }
}

struct FakeChannel {
    state: Arc<FakeState>,
}

impl FakeChannel {
    fn store(&self, remote_path: &str, contents: Vec<u8>) -> AppResult<()> {
        let mut tree = self.state.tree.lock().expect("tree lock");
        if !tree.dir_exists(&parent_of(remote_path)) {
            return Err(remote_error(format!("no such directory for {remote_path}")));
        }
        if tree.dirs.contains(remote_path) {
            return Err(remote_error(format!("{remote_path} is a directory")));
        }
        tree.files.insert(remote_path.to_string(), contents);
        Ok(())
    }
}

#[async_trait]
impl FileChannel for FakeChannel {
    async fn put(&self, local_path: &Path, remote_path: &str) -> AppResult<()> {
        let contents = fs::read(local_path).map_err(|err| remote_error(err.to_string()))?;
        self.store(remote_path, contents)
    }

    async fn put_bytes(&self, contents: &[u8], remote_path: &str) -> AppResult<()> {
        self.store(remote_path, contents.to_vec())
    }

    async fn get(&self, remote_path: &str, local_path: &Path) -> AppResult<()> {
        if self
            .state
            .failing_gets
            .lock()
            .expect("failing gets lock")
            .contains(remote_path)
        {
            return Err(remote_error(format!("permission denied: {remote_path}")));
        }
        let contents = self
            .state
            .tree
            .lock()
            .expect("tree lock")
            .files
            .get(remote_path)
            .cloned()
            .ok_or_else(|| remote_error(format!("no such file: {remote_path}")))?;
        fs::write(local_path, contents).map_err(|err| remote_error(err.to_string()))?;
        self.state.gets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn read(&self, remote_path: &str, limit: usize) -> AppResult<Vec<u8>> {
        let tree = self.state.tree.lock().expect("tree lock");
        let contents = tree
            .files
            .get(remote_path)
            .ok_or_else(|| remote_error(format!("no such file: {remote_path}")))?;
        Ok(contents.iter().take(limit).copied().collect())
    }

    async fn list_dir(&self, remote_path: &str) -> AppResult<Vec<RemoteEntry>> {
        if self
            .state
            .failing_lists
            .lock()
            .expect("failing lists lock")
            .contains(remote_path)
        {
            return Err(remote_error(format!("permission denied: {remote_path}")));
        }
        let tree = self.state.tree.lock().expect("tree lock");
        if !tree.dir_exists(remote_path) {
            return Err(remote_error(format!("no such directory: {remote_path}")));
        }
        let mut entries = Vec::new();
        for dir in tree.dirs.iter().filter(|d| parent_of(d) == remote_path) {
            entries.push(RemoteEntry {
                name: dir.rsplit('/').next().unwrap_or(dir).to_string(),
                kind: EntryKind::Directory,
                size: 0,
                permissions: Some(0o755),
            });
        }
        for (path, contents) in tree.files.iter().filter(|(p, _)| parent_of(p) == remote_path) {
            entries.push(RemoteEntry {
                name: path.rsplit('/').next().unwrap_or(path).to_string(),
                kind: EntryKind::File,
                size: contents.len() as u64,
                permissions: tree.modes.get(path).copied(),
            });
        }
        Ok(entries)
    }

    async fn ensure_dir(&self, remote_path: &str) -> AppResult<DirOutcome> {
        let mut tree = self.state.tree.lock().expect("tree lock");
        if tree.dir_exists(remote_path) {
            return Ok(DirOutcome::AlreadyPresent);
        }
        if tree.files.contains_key(remote_path) {
            return Err(remote_error(format!("{remote_path} exists and is not a directory")));
        }
        if !tree.dir_exists(&parent_of(remote_path)) {
            return Err(remote_error(format!("no such directory for {remote_path}")));
        }
        tree.dirs.insert(remote_path.to_string());
        Ok(DirOutcome::Created)
    }

    async fn make_dir(&self, remote_path: &str) -> AppResult<()> {
        let mut tree = self.state.tree.lock().expect("tree lock");
        if tree.dir_exists(remote_path) || tree.files.contains_key(remote_path) {
            return Err(remote_error(format!("{remote_path} already exists")));
        }
        if !tree.dir_exists(&parent_of(remote_path)) {
            return Err(remote_error(format!("no such directory for {remote_path}")));
        }
        tree.dirs.insert(remote_path.to_string());
        Ok(())
    }

    async fn stat(&self, remote_path: &str) -> AppResult<RemoteEntry> {
        let tree = self.state.tree.lock().expect("tree lock");
        let name = remote_path.rsplit('/').next().unwrap_or(remote_path).to_string();
        if let Some(contents) = tree.files.get(remote_path) {
            return Ok(RemoteEntry {
                name,
                kind: EntryKind::File,
                size: contents.len() as u64,
                permissions: tree.modes.get(remote_path).copied(),
            });
        }
        if tree.dir_exists(remote_path) {
            return Ok(RemoteEntry {
                name,
                kind: EntryKind::Directory,
                size: 0,
                permissions: Some(0o755),
            });
        }
        Err(remote_error(format!("no such file: {remote_path}")))
    }

    async fn chmod(&self, remote_path: &str, mode: u32) -> AppResult<()> {
        let mut tree = self.state.tree.lock().expect("tree lock");
        if !tree.files.contains_key(remote_path) {
            return Err(remote_error(format!("no such file: {remote_path}")));
        }
        tree.modes.insert(remote_path.to_string(), mode);
        Ok(())
    }

    async fn close(self: Box<Self>) -> AppResult<()> {
        Ok(())
    }
}

pub(crate) struct FixedClock {
    now: Mutex<OffsetDateTime>,
}

impl FixedClock {
    pub(crate) fn new(now: OffsetDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub(crate) fn advance(&self, seconds: i64) {
        let mut now = self.now.lock().expect("clock lock");
        *now += time::Duration::seconds(seconds);
    }
}

impl ClockPort for FixedClock {
    fn now_utc(&self) -> OffsetDateTime {
        *self.now.lock().expect("clock lock")
    }
}

pub(crate) const WORK_DIR: &str = "/work";

pub(crate) fn test_settings(session_root: PathBuf) -> UseCaseSettings {
    UseCaseSettings {
        remote: RemoteSettings {
            work_dir: WORK_DIR.to_string(),
            module_init: "/etc/profile.d/modules.sh".to_string(),
            easybuild_prefix: None,
            tool_repo: None,
            command_timeout: Duration::from_secs(10),
        },
        job: JobSettings {
            executable: "masif-preprocess".to_string(),
            time: "02:00:00".to_string(),
            memory: "8G".to_string(),
            cpus: 4,
            modules: vec!["MaSIF-neosurf/1.0".to_string()],
            notify_command: "/usr/bin/mail".to_string(),
            details_url: None,
            default_name_prefix: "masif".to_string(),
            example_dir: None,
        },
        visualization: VisualizationSettings {
            enabled: true,
            session_root,
            container_root: "/data".to_string(),
            viewer_url: "http://localhost:6080".to_string(),
            session_ttl: Duration::from_secs(3600),
        },
    }
}

/// Use cases wired to fakes, with temporary cache and session roots.
pub(crate) struct Harness {
    pub(crate) usecases: UseCases,
    pub(crate) remote: FakeTransport,
    pub(crate) clock: Arc<FixedClock>,
    pub(crate) store: Arc<JsonJobStore>,
    pub(crate) cache: TempDir,
    pub(crate) sessions: TempDir,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::with_settings(|_| {})
    }

    pub(crate) fn with_settings(adjust: impl FnOnce(&mut UseCaseSettings)) -> Self {
        let cache = tempfile::tempdir().expect("cache dir");
        let sessions = tempfile::tempdir().expect("sessions dir");
        let remote = FakeTransport::new();
        let clock = Arc::new(FixedClock::new(datetime!(2026-01-15 12:00:00 UTC)));
        let store = Arc::new(JsonJobStore::new(cache.path().to_path_buf()));
        let mut settings = test_settings(sessions.path().to_path_buf());
        adjust(&mut settings);
        let usecases = UseCases::new(
            Arc::new(remote.clone()),
            store.clone(),
            clock.clone(),
            settings,
        );
        Self {
            usecases,
            remote,
            clock,
            store,
            cache,
            sessions,
        }
    }

    /// Stores a record for job `demo_<uuid>` owned by `owner`.
    pub(crate) async fn insert_job(&self, owner: &str, job_uuid: &str) -> JobRecord {
        let record = sample_record(&self.store.job_dir("demo", job_uuid), owner, job_uuid);
        self.store.insert_job(&record).await.expect("insert job");
        record
    }
}

pub(crate) fn sample_record(local_job_dir: &Path, owner: &str, job_uuid: &str) -> JobRecord {
    JobRecord {
        job_id: "42".to_string(),
        job_uuid: job_uuid.to_string(),
        job_name: "demo".to_string(),
        owner_id: owner.to_string(),
        owner_email: None,
        local_job_dir: local_job_dir.to_path_buf(),
        remote_job_dir: format!("{WORK_DIR}/demo_{job_uuid}"),
        input_file: "protein.pdb".to_string(),
        secondary_file: None,
        chain_id: "A".to_string(),
        ligand_id: None,
        submitted_at: "2026-01-15T12:00:00Z".to_string(),
        command: format!(
            "masif-preprocess {WORK_DIR}/demo_{job_uuid}/protein.pdb A -o {WORK_DIR}/demo_{job_uuid}"
        ),
    }
}
