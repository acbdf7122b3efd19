// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::{Path, PathBuf};

use time::format_description::well_known::Rfc3339;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes, invalid_argument, local_error};
use crate::app::ports::FileChannel;
use crate::app::services::names::{has_allowed_extension, secure_filename};
use crate::app::services::random::{default_job_name, generate_job_uuid};
use crate::app::services::script::{
    SUBMIT_SCRIPT_NAME, ScriptParams, WRAPPER_SCRIPT_NAME, render_submit_script,
    render_wrapper_script,
};
use crate::app::services::shell::join_command;
use crate::app::services::slurm::{parse_submitted_job_id, submit_command};
use crate::app::types::{Identity, JobRecord, SubmitRequest, job_dir_name};

use super::{UseCases, as_component_error};

const MAX_UUID_ATTEMPTS: usize = 16;
const EXECUTABLE_MODE: u32 = 0o755;

/// A local input copied into the job cache, and where it goes remotely.
struct StagedInput {
    local_path: PathBuf,
    remote_path: String,
}

struct WorkspaceUpload<'a> {
    workspace: &'a str,
    inputs: &'a [StagedInput],
    wrapper: Option<String>,
    script: &'a str,
    script_path: &'a str,
}

async fn validated_input_name(path: &Path, label: &str) -> AppResult<String> {
    let raw = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| invalid_argument(format!("{label} path has no file name")))?;
    let name = secure_filename(raw);
    if name.is_empty() || !has_allowed_extension(&name) {
        return Err(invalid_argument(format!(
            "{label} '{raw}' must be a .pdb or .sdf file"
        )));
    }
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(name),
        _ => Err(invalid_argument(format!(
            "{label} '{}' is not a readable file",
            path.display()
        ))),
    }
}

async fn stage_input(
    source: &Path,
    local_job_dir: &Path,
    file_name: &str,
    workspace: &str,
) -> AppResult<StagedInput> {
    let local_path = local_job_dir.join(file_name);
    tokio::fs::copy(source, &local_path).await.map_err(|err| {
        local_error(format!(
            "failed to stage {} into {}: {err}",
            source.display(),
            local_path.display()
        ))
    })?;
    Ok(StagedInput {
        local_path,
        remote_path: format!("{workspace}/{file_name}"),
    })
}

fn submission_error(message: impl Into<String>) -> AppError {
    AppError::with_message(AppErrorKind::Submission, codes::SUBMISSION_FAILED, message)
}

async fn upload_workspace(
    channel: &dyn FileChannel,
    work_dir: &str,
    upload: &WorkspaceUpload<'_>,
) -> AppResult<()> {
    let step = |step: &'static str| move |err| as_component_error(AppErrorKind::Submission, err, step);

    let outcome = channel
        .ensure_dir(work_dir)
        .await
        .map_err(step("create work directory"))?;
    tracing::debug!("work directory {work_dir}: {outcome:?}");
    channel
        .make_dir(upload.workspace)
        .await
        .map_err(step("create job workspace"))?;

    for input in upload.inputs {
        channel
            .put(&input.local_path, &input.remote_path)
            .await
            .map_err(step("upload input"))?;
    }

    if let Some(wrapper) = &upload.wrapper {
        let wrapper_path = format!("{}/{}", upload.workspace, WRAPPER_SCRIPT_NAME);
        channel
            .put_bytes(wrapper.as_bytes(), &wrapper_path)
            .await
            .map_err(step("upload wrapper script"))?;
        channel
            .chmod(&wrapper_path, EXECUTABLE_MODE)
            .await
            .map_err(step("mark wrapper script executable"))?;
    }

    channel
        .put_bytes(upload.script.as_bytes(), upload.script_path)
        .await
        .map_err(step("upload submission script"))?;
    channel
        .chmod(upload.script_path, EXECUTABLE_MODE)
        .await
        .map_err(step("mark submission script executable"))?;
    Ok(())
}

impl UseCases {
    async fn allocate_job_uuid(&self) -> AppResult<String> {
        for _ in 0..MAX_UUID_ATTEMPTS {
            let candidate = generate_job_uuid();
            if !self.jobs.uuid_in_use(&candidate).await? {
                return Ok(candidate);
            }
            tracing::debug!("job uuid {candidate} already in use, regenerating");
        }
        Err(AppError::with_message(
            AppErrorKind::Internal,
            codes::INTERNAL_ERROR,
            "could not allocate a unique job uuid",
        ))
    }

    /// Stages inputs, uploads them with a generated batch script and hands the
    /// script to the scheduler. The record is stored only once the scheduler
    /// has acknowledged the job. A failed attempt discards its local job cache;
    /// remote leftovers are not rolled back.
    #[tracing::instrument(skip_all, fields(owner = %owner.user_id))]
    pub async fn submit_job(&self, owner: &Identity, request: SubmitRequest) -> AppResult<JobRecord> {
        let input_name = validated_input_name(&request.input_path, "input").await?;
        let secondary_name = match &request.secondary_input {
            Some(path) => Some(validated_input_name(path, "secondary input").await?),
            None => None,
        };
        let chain_id = request.chain_id.trim();
        if chain_id.is_empty() {
            return Err(invalid_argument("chain identifier is required"));
        }
        let ligand_id = request
            .ligand_id
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty());
        let job_name = request
            .job_name
            .as_deref()
            .map(secure_filename)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| default_job_name(&self.settings.job.default_name_prefix));

        let job_uuid = self.allocate_job_uuid().await?;
        let remote = &self.settings.remote;
        let work_dir = remote.work_dir.trim_end_matches('/');
        let workspace = format!("{work_dir}/{}", job_dir_name(&job_name, &job_uuid));

        let local_job_dir = self.jobs.job_dir(&job_name, &job_uuid);
        tokio::fs::create_dir_all(&local_job_dir).await.map_err(|err| {
            local_error(format!(
                "failed to create job cache {}: {err}",
                local_job_dir.display()
            ))
        })?;
        let submitted = async {
            let mut inputs = vec![
                stage_input(&request.input_path, &local_job_dir, &input_name, &workspace).await?,
            ];
            if let (Some(path), Some(name)) = (&request.secondary_input, &secondary_name) {
                inputs.push(stage_input(path, &local_job_dir, name, &workspace).await?);
            }

            let mut args = vec![
                self.settings.job.executable.clone(),
                inputs[0].remote_path.clone(),
                chain_id.to_string(),
            ];
            if let (Some(ligand), Some(secondary)) = (ligand_id, inputs.get(1)) {
                args.extend([
                    "-l".to_string(),
                    ligand.to_string(),
                    "-s".to_string(),
                    secondary.remote_path.clone(),
                ]);
            }
            args.extend(["-o".to_string(), workspace.clone()]);
            let command = join_command(&args);

            let details_url = self
                .settings
                .job
                .details_url
                .as_deref()
                .map(|base| format!("{}/job/{}", base.trim_end_matches('/'), job_uuid));
            let script_path = format!("{workspace}/{SUBMIT_SCRIPT_NAME}");
            let script = render_submit_script(&ScriptParams {
                job_name: &job_name,
                workspace: &workspace,
                time: &self.settings.job.time,
                memory: &self.settings.job.memory,
                cpus: self.settings.job.cpus,
                module_init: &remote.module_init,
                modules: &self.settings.job.modules,
                easybuild_prefix: remote.easybuild_prefix.as_deref(),
                tool_repo: remote.tool_repo.as_deref(),
                notify_command: &self.settings.job.notify_command,
                notify_email: owner.email.as_deref(),
                details_url: details_url.as_deref(),
                command: &command,
            })?;

            let upload = WorkspaceUpload {
                workspace: &workspace,
                inputs: &inputs,
                wrapper: remote.tool_repo.as_deref().map(render_wrapper_script),
                script: &script,
                script_path: &script_path,
            };
            let channel = self
                .transport
                .open_file_channel()
                .await
                .map_err(|err| as_component_error(AppErrorKind::Submission, err, "open file channel"))?;
            let uploaded = upload_workspace(channel.as_ref(), work_dir, &upload).await;
            if let Err(err) = channel.close().await {
                tracing::debug!("failed to close file channel: {err}");
            }
            uploaded?;

            let capture = self
                .transport
                .execute(&submit_command(&script_path), remote.command_timeout)
                .await
                .map_err(|err| as_component_error(AppErrorKind::Submission, err, "run sbatch"))?;
            if capture.exit_code != 0 {
                let stderr = capture.stderr_lossy();
                let message = if stderr.trim().is_empty() {
                    format!("sbatch exited with status {}", capture.exit_code)
                } else {
                    stderr.trim().to_string()
                };
                tracing::warn!("submission of {workspace} rejected: {message}");
                return Err(submission_error(message));
            }
            let job_id = parse_submitted_job_id(&capture.stdout_lossy())
                .ok_or_else(|| submission_error("scheduler returned no job id"))?;

            let submitted_at = self
                .clock
                .now_utc()
                .format(&Rfc3339)
                .map_err(|err| local_error(format!("failed to format submission time: {err}")))?;
            let record = JobRecord {
                job_id,
                job_uuid,
                job_name,
                owner_id: owner.user_id.clone(),
                owner_email: owner.email.clone(),
                local_job_dir: local_job_dir.clone(),
                remote_job_dir: workspace,
                input_file: input_name,
                secondary_file: secondary_name,
                chain_id: chain_id.to_string(),
                ligand_id: ligand_id.map(str::to_string),
                submitted_at,
                command,
            };
            self.jobs.insert_job(&record).await?;
            tracing::info!(
                "submitted job {} as scheduler job {}",
                record.dir_name(),
                record.job_id
            );
            Ok::<_, AppError>(record)
        }
        .await;
        if submitted.is_err() {
            if let Err(err) = tokio::fs::remove_dir_all(&local_job_dir).await {
                tracing::debug!("failed to discard job cache {}: {err}", local_job_dir.display());
            }
        }
        submitted
    }
}
