// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize, Serializer};

/// Durable record of a submitted job, persisted only after the scheduler accepted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Scheduler-assigned identifier.
    pub job_id: String,
    /// Short locally generated identifier used in paths and lookups.
    pub job_uuid: String,
    pub job_name: String,
    #[serde(rename = "user_id")]
    pub owner_id: String,
    #[serde(rename = "user_email", default)]
    pub owner_email: Option<String>,
    pub local_job_dir: PathBuf,
    pub remote_job_dir: String,
    #[serde(rename = "pdb_file")]
    pub input_file: String,
    #[serde(rename = "sdf_file", default)]
    pub secondary_file: Option<String>,
    pub chain_id: String,
    #[serde(default)]
    pub ligand_id: Option<String>,
    /// RFC3339
    pub submitted_at: String,
    /// Exact command line placed in the submission script.
    pub command: String,
}

impl JobRecord {
    pub fn dir_name(&self) -> String {
        job_dir_name(&self.job_name, &self.job_uuid)
    }
}

pub fn job_dir_name(job_name: &str, job_uuid: &str) -> String {
    format!("{job_name}_{job_uuid}")
}

/// Who is asking. Administrators may act on any job or session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub email: Option<String>,
    pub is_admin: bool,
}

impl Identity {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: None,
            is_admin: false,
        }
    }

    pub fn admin(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: None,
            is_admin: true,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn may_access(&self, owner_id: &str) -> bool {
        self.is_admin || self.user_id == owner_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRequest {
    pub job_name: Option<String>,
    /// Primary structural input (`.pdb` / `.sdf`).
    pub input_path: PathBuf,
    pub chain_id: String,
    pub ligand_id: Option<String>,
    pub secondary_input: Option<PathBuf>,
}

/// Bundled demonstration submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExamplePreset {
    /// Protein surface only.
    Basic,
    /// Protein with its bound ligand.
    Ligand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
    Other,
}

/// One entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
    pub permissions: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirOutcome {
    Created,
    AlreadyPresent,
}

/// Canonical job lifecycle value, independent of which scheduler view produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
    NodeFail,
    /// Any other scheduler state, verbatim.
    Other(String),
    Unknown,
    Error(String),
}

impl JobStatus {
    pub fn from_scheduler(state: &str) -> Self {
        match state.trim() {
            "PENDING" => JobStatus::Pending,
            "RUNNING" => JobStatus::Running,
            "COMPLETED" => JobStatus::Completed,
            "FAILED" => JobStatus::Failed,
            "CANCELLED" => JobStatus::Cancelled,
            "TIMEOUT" => JobStatus::Timeout,
            "NODE_FAIL" => JobStatus::NodeFail,
            other => JobStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => f.write_str("PENDING"),
            JobStatus::Running => f.write_str("RUNNING"),
            JobStatus::Completed => f.write_str("COMPLETED"),
            JobStatus::Failed => f.write_str("FAILED"),
            JobStatus::Cancelled => f.write_str("CANCELLED"),
            JobStatus::Timeout => f.write_str("TIMEOUT"),
            JobStatus::NodeFail => f.write_str("NODE_FAIL"),
            JobStatus::Other(state) => f.write_str(state),
            JobStatus::Unknown => f.write_str("UNKNOWN"),
            JobStatus::Error(message) => write!(f, "ERROR: {message}"),
        }
    }
}

impl Serialize for JobStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    pub path: String,
    pub message: String,
}

/// Outcome of one mirror pass. Failures are per entry and never abort the pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub downloaded: Vec<String>,
    pub skipped: usize,
    pub directories: usize,
    pub failures: Vec<SyncFailure>,
}

impl SyncReport {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileClass {
    /// Scheduler stdout/stderr; administrators only.
    Log,
    /// Scripts and the metadata record; never offered for download.
    Control,
    Output,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteFile {
    pub path: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobDetails {
    pub record: JobRecord,
    pub status: JobStatus,
    pub outputs: Vec<RemoteFile>,
    pub logs: BTreeMap<String, String>,
    pub fetch_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveSummary {
    pub archive: PathBuf,
    /// Uuids of the jobs packed into the archive.
    pub jobs: Vec<String>,
    /// Uuids that were unknown or not accessible.
    pub skipped: Vec<String>,
    pub files: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    pub session_id: String,
    #[serde(rename = "user_id")]
    pub owner_id: String,
    pub job_uuid: String,
    pub job_name: String,
    /// RFC3339
    pub created_at: String,
    /// Unix seconds.
    pub expires_at: i64,
}

impl SessionDescriptor {
    pub fn is_expired(&self, now_unix: i64) -> bool {
        now_unix >= self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionHandle {
    pub session_id: String,
    pub session_dir: PathBuf,
    pub viewer_url: String,
    pub script_path: String,
    pub expires_in: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupOutcome {
    Removed,
    AlreadyGone,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_states_map_to_canonical_values() {
        assert_eq!(JobStatus::from_scheduler("PENDING"), JobStatus::Pending);
        assert_eq!(JobStatus::from_scheduler("RUNNING\n"), JobStatus::Running);
        assert_eq!(JobStatus::from_scheduler("NODE_FAIL"), JobStatus::NodeFail);
        assert_eq!(
            JobStatus::from_scheduler("COMPLETING"),
            JobStatus::Other("COMPLETING".to_string())
        );
    }

    #[test]
    fn status_display_passes_other_states_through() {
        assert_eq!(JobStatus::Other("SUSPENDED".into()).to_string(), "SUSPENDED");
        assert_eq!(JobStatus::Unknown.to_string(), "UNKNOWN");
        assert_eq!(
            JobStatus::Error("ssh connect failed".into()).to_string(),
            "ERROR: ssh connect failed"
        );
    }

    #[test]
    fn admin_may_access_any_owner() {
        assert!(Identity::admin("root").may_access("alice"));
        assert!(Identity::user("alice").may_access("alice"));
        assert!(!Identity::user("bob").may_access("alice"));
    }

    #[test]
    fn job_record_uses_legacy_field_names() {
        let record = JobRecord {
            job_id: "42".into(),
            job_uuid: "ab12cd34".into(),
            job_name: "demo".into(),
            owner_id: "alice".into(),
            owner_email: None,
            local_job_dir: PathBuf::from("/cache/demo_ab12cd34"),
            remote_job_dir: "/work/demo_ab12cd34".into(),
            input_file: "protein.pdb".into(),
            secondary_file: None,
            chain_id: "A".into(),
            ligand_id: None,
            submitted_at: "2026-01-01T00:00:00Z".into(),
            command: "masif-preprocess /work/demo_ab12cd34/protein.pdb A -o /work/demo_ab12cd34"
                .into(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["user_id"], "alice");
        assert_eq!(json["pdb_file"], "protein.pdb");
        assert_eq!(record.dir_name(), "demo_ab12cd34");
        let back: JobRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
