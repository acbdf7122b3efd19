// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use tar::Builder;
use walkdir::WalkDir;
use zstd::stream::Encoder;

use crate::app::errors::{AppResult, invalid_argument, local_error};
use crate::app::types::FileClass;

use super::classify::classify;

/// One job directory to pack under `root_name/`.
#[derive(Debug, Clone)]
pub struct ArchiveSource {
    pub root_name: String,
    pub dir: PathBuf,
}

fn collect_files(source_root: &Path, include_logs: bool) -> AppResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(source_root).follow_links(false) {
        let entry = entry.map_err(|err| local_error(format!("failed to walk job directory: {err}")))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(source_root)
            .map_err(|_| local_error("failed to compute archive relative path".to_string()))?;
        let rel_str = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        match classify(&rel_str) {
            FileClass::Control => continue,
            FileClass::Log if !include_logs => continue,
            _ => files.push(rel.to_path_buf()),
        }
    }
    files.sort();
    Ok(files)
}

/// Writes a zstd-compressed tarball holding every source's downloadable files.
/// Returns the number of files written.
pub fn write_job_archive(
    sources: &[ArchiveSource],
    archive_path: &Path,
    include_logs: bool,
) -> AppResult<usize> {
    if sources.is_empty() {
        return Err(invalid_argument("no accessible jobs to archive"));
    }
    for source in sources {
        if !source.dir.is_dir() {
            return Err(invalid_argument(format!(
                "job directory '{}' is not a directory",
                source.dir.display()
            )));
        }
    }
    if let Some(parent) = archive_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|err| {
                local_error(format!(
                    "failed to create archive directory {}: {err}",
                    parent.display()
                ))
            })?;
        }
    }

    let file = File::create(archive_path).map_err(|err| {
        local_error(format!(
            "failed to create archive {}: {err}",
            archive_path.display()
        ))
    })?;
    let encoder = Encoder::new(file, 0)
        .map_err(|err| local_error(format!("failed to start archive encoder: {err}")))?;
    let mut builder = Builder::new(encoder);

    let mut written = 0;
    for source in sources {
        for rel in collect_files(&source.dir, include_logs)? {
            let dest = Path::new(&source.root_name).join(&rel);
            builder
                .append_path_with_name(source.dir.join(&rel), dest)
                .map_err(|err| local_error(format!("failed to add file: {err}")))?;
            written += 1;
        }
    }

    let encoder = builder
        .into_inner()
        .map_err(|err| local_error(format!("failed to finalize archive: {err}")))?;
    encoder
        .finish()
        .map_err(|err| local_error(format!("failed to finish archive: {err}")))?;
    Ok(written)
}
