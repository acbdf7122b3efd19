// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;

use slurmgate::adapters::cli::{self, Command, VizCommand};
use slurmgate::adapters::ssh::SshTransport;
use slurmgate::adapters::store::JsonJobStore;
use slurmgate::adapters::time::SystemClock;
use slurmgate::app::ports::ClockPort;
use slurmgate::app::usecases::UseCases;
use slurmgate::{config, logging};

fn log_config_report(report: &config::ConfigReport) {
    match (&report.config_path, report.config_path_source) {
        (Some(path), Some(source)) => {
            tracing::info!(
                "config path: {} (source={}, present={})",
                path.display(),
                source.as_str(),
                report.config_file_present
            );
        }
        (Some(path), None) => {
            tracing::info!(
                "config path: {} (present={})",
                path.display(),
                report.config_file_present
            );
        }
        (None, _) => {
            tracing::info!("config path: (none)");
        }
    }
    tracing::info!(
        "config cache_dir: {} (source={})",
        report.cache_dir.value.display(),
        report.cache_dir.source.as_str()
    );
    tracing::info!(
        "config remote.host: {} (source={})",
        report.remote_host.value,
        report.remote_host.source.as_str()
    );
    tracing::info!(
        "config remote.work_dir: {} (source={})",
        report.work_dir.value,
        report.work_dir.source.as_str()
    );
    tracing::info!(
        "config remote.max_idle_sessions: {} (source={})",
        report.max_idle_sessions.value,
        report.max_idle_sessions.source.as_str()
    );
    tracing::info!(
        "config visualization.enabled: {} (source={})",
        report.visualization_enabled.value,
        report.visualization_enabled.source.as_str()
    );
    tracing::info!(
        "config visualization.session_root: {} (source={})",
        report.session_root.value.display(),
        report.session_root.source.as_str()
    );
    tracing::info!(
        "config verbose: {} (source={})",
        report.verbose.value,
        report.verbose.source.as_str()
    );
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(usecases: &UseCases, clock: &dyn ClockPort, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Submit(args) => {
            let record = usecases.submit_job(&args.identity(), args.request()).await?;
            print_json(&record)
        }
        Command::SubmitExample {
            who,
            email,
            example,
        } => {
            let owner = cli::identity_with_email(&who, email.as_deref());
            print_json(&usecases.submit_example(&owner, example.into()).await?)
        }
        Command::Status { job_id } => {
            let status = usecases.job_status(&job_id).await;
            print_json(&json!({ "job_id": job_id, "status": status }))
        }
        Command::Jobs { who } => print_json(&usecases.list_jobs(&who.identity()).await?),
        Command::Show { who, job_uuid } => {
            print_json(&usecases.job_details(&who.identity(), &job_uuid).await?)
        }
        Command::Sync { who, job_uuid } => {
            let report = usecases.sync_job(&who.identity(), &job_uuid).await?;
            if report.is_partial() {
                tracing::warn!(
                    "sync of {job_uuid} finished with {} failed entries",
                    report.failures.len()
                );
            }
            print_json(&report)
        }
        Command::Fetch {
            who,
            job_uuid,
            path,
        } => {
            let local = usecases
                .fetch_output(&who.identity(), &job_uuid, &path)
                .await?;
            print_json(&json!({ "path": local }))
        }
        Command::Archive {
            who,
            job_uuids,
            out,
        } => print_json(
            &usecases
                .export_archive(&who.identity(), &job_uuids, &out)
                .await?,
        ),
        Command::Viz(VizCommand::Create { who, job_uuid }) => {
            print_json(&usecases.create_session(&who.identity(), &job_uuid).await?)
        }
        Command::Viz(VizCommand::Inspect { who, session_id }) => {
            print_json(&usecases.inspect_session(&who.identity(), &session_id).await?)
        }
        Command::Viz(VizCommand::Cleanup { who, session_id }) => {
            let outcome = usecases.cleanup_session(&who.identity(), &session_id).await?;
            print_json(&json!({ "session_id": session_id, "outcome": outcome }))
        }
        Command::Viz(VizCommand::Sweep) => {
            let removed = usecases.sweep_expired(clock.now_utc()).await?;
            print_json(&json!({ "removed": removed }))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let parsed = cli::parse_opts();
    let opts = parsed.opts;
    let verbose_override = parsed.verbose_override;
    let config::LoadResult { config, report } = config::load_with_report(
        opts.config,
        config::Overrides {
            cache_dir: opts.cache_dir,
            verbose: verbose_override,
        },
    )?;
    logging::init(config.verbose);
    log_config_report(&report);
    if opts.command.needs_remote() {
        config.validate_remote()?;
    }
    config::ensure_cache_dir(&config.cache_dir)?;

    let transport = Arc::new(SshTransport::new(config.ssh_params()));
    let store = Arc::new(JsonJobStore::new(config.cache_dir.clone()));
    let clock = Arc::new(SystemClock::new());
    let usecases = UseCases::new(
        transport.clone(),
        store,
        clock.clone(),
        config.usecase_settings(),
    );

    let result = run(&usecases, clock.as_ref(), opts.command).await;
    transport.shutdown().await;
    result
}
