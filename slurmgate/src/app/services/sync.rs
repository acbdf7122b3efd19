// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! One-way, additive mirroring of a remote job workspace into the local cache.
//!
//! A local regular file with non-zero size counts as already synchronized and is
//! never fetched again; empty files are treated as leftovers of a failed download.
//! Nothing is ever deleted locally. A failure on one entry is recorded in the
//! report and the traversal carries on with its siblings.

use std::path::{Path, PathBuf};

use tokio::fs as tokiofs;

use crate::app::errors::AppResult;
use crate::app::ports::FileChannel;
use crate::app::types::{EntryKind, RemoteEntry, RemoteFile, SyncFailure, SyncReport};

struct PendingDir {
    remote: String,
    local: PathBuf,
    relative: String,
}

fn child_relative(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

fn display_relative(relative: &str) -> String {
    if relative.is_empty() {
        ".".to_string()
    } else {
        relative.to_string()
    }
}

fn is_traversable_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains('/')
}

fn sorted_entries(mut entries: Vec<RemoteEntry>) -> Vec<RemoteEntry> {
    entries.retain(|entry| is_traversable_name(&entry.name));
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    entries
}

pub async fn is_already_synced(local_path: &Path) -> bool {
    match tokiofs::metadata(local_path).await {
        Ok(meta) => meta.is_file() && meta.len() > 0,
        Err(_) => false,
    }
}

/// Mirrors `remote_root` into `local_root`.
pub async fn sync_tree(
    channel: &dyn FileChannel,
    remote_root: &str,
    local_root: &Path,
) -> SyncReport {
    let mut report = SyncReport::default();
    let mut stack = vec![PendingDir {
        remote: remote_root.trim_end_matches('/').to_string(),
        local: local_root.to_path_buf(),
        relative: String::new(),
    }];

    while let Some(dir) = stack.pop() {
        if let Err(err) = tokiofs::create_dir_all(&dir.local).await {
            tracing::warn!("failed to create local directory {}: {err}", dir.local.display());
            report.failures.push(SyncFailure {
                path: display_relative(&dir.relative),
                message: format!("create local directory: {err}"),
            });
            continue;
        }
        let entries = match channel.list_dir(&dir.remote).await {
            Ok(entries) => sorted_entries(entries),
            Err(err) => {
                tracing::warn!("failed to list remote directory {}: {err}", dir.remote);
                report.failures.push(SyncFailure {
                    path: display_relative(&dir.relative),
                    message: err.to_string(),
                });
                continue;
            }
        };

        for entry in entries {
            let relative = child_relative(&dir.relative, &entry.name);
            let remote_child = format!("{}/{}", dir.remote, entry.name);
            let local_child = dir.local.join(&entry.name);
            match entry.kind {
                EntryKind::Directory => {
                    report.directories += 1;
                    stack.push(PendingDir {
                        remote: remote_child,
                        local: local_child,
                        relative,
                    });
                }
                EntryKind::File => {
                    if is_already_synced(&local_child).await {
                        report.skipped += 1;
                        continue;
                    }
                    match channel.get(&remote_child, &local_child).await {
                        Ok(()) => {
                            tracing::debug!("downloaded {relative}");
                            report.downloaded.push(relative);
                        }
                        Err(err) => {
                            tracing::warn!("failed to download {remote_child}: {err}");
                            report.failures.push(SyncFailure {
                                path: relative,
                                message: err.to_string(),
                            });
                        }
                    }
                }
                EntryKind::Other => {
                    tracing::debug!("skipping non-regular remote entry {remote_child}");
                }
            }
        }
    }
    report
}

/// Lists every regular file below `remote_root` with its size, sorted by path.
/// Only a failure to list the root itself is an error.
pub async fn list_remote_files(
    channel: &dyn FileChannel,
    remote_root: &str,
) -> AppResult<(Vec<RemoteFile>, Vec<SyncFailure>)> {
    let root = remote_root.trim_end_matches('/').to_string();
    let mut files = Vec::new();
    let mut failures = Vec::new();
    let mut stack = vec![(root.clone(), String::new())];

    while let Some((remote_dir, relative_dir)) = stack.pop() {
        let entries = match channel.list_dir(&remote_dir).await {
            Ok(entries) => sorted_entries(entries),
            Err(err) if relative_dir.is_empty() => return Err(err),
            Err(err) => {
                tracing::warn!("failed to list remote directory {remote_dir}: {err}");
                failures.push(SyncFailure {
                    path: relative_dir,
                    message: err.to_string(),
                });
                continue;
            }
        };
        for entry in entries {
            let relative = child_relative(&relative_dir, &entry.name);
            match entry.kind {
                EntryKind::Directory => {
                    stack.push((format!("{}/{}", remote_dir, entry.name), relative));
                }
                EntryKind::File => files.push(RemoteFile {
                    path: relative,
                    size: entry.size,
                }),
                EntryKind::Other => {}
            }
        }
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok((files, failures))
}
