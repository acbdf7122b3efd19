// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::PathBuf;

use clap::{Args, CommandFactory, FromArgMatches, Parser, Subcommand, ValueEnum};

use crate::app::types::{ExamplePreset, Identity, SubmitRequest};

#[derive(Parser, Debug)]
#[command(
    name = "slurmgate",
    version,
    about,
    long_about = None,
    after_help = "Configuration precedence: defaults < config file < command-line flags.\n\
Config path precedence: defaults < SLURMGATE_CONFIG_PATH < command-line flags.\n\
If --config is omitted, slurmgate tries SLURMGATE_CONFIG_PATH, then the default config file location; missing default config is OK.\n\
Paths in the config file are resolved relative to the config file directory; paths passed as flags are resolved relative to the current working directory.\n\
Results are printed to stdout as JSON; logs go to stderr."
)]
pub struct Opts {
    #[arg(
        short,
        long,
        global = true,
        value_name = "PATH",
        help = "Path to a TOML config file. When omitted, slurmgate uses SLURMGATE_CONFIG_PATH if set, otherwise the default config file location if available."
    )]
    pub config: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        help = "Local cache directory holding job inputs and synced outputs. Overrides `cache_dir` from the config file."
    )]
    pub cache_dir: Option<PathBuf>,
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::SetTrue,
        help = "Enable debug logging. Overrides `verbose` from the config file."
    )]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

/// Who the command acts for.
#[derive(Args, Debug, Clone)]
pub struct IdentityArgs {
    #[arg(long = "user", value_name = "ID", help = "Identity the command acts for.")]
    pub user_id: String,
    #[arg(long, help = "Act with administrator rights.")]
    pub admin: bool,
}

impl IdentityArgs {
    pub fn identity(&self) -> Identity {
        Identity {
            user_id: self.user_id.clone(),
            email: None,
            is_admin: self.admin,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Upload an input structure and submit a preprocessing job.
    Submit(SubmitArgs),
    /// Submit one of the bundled example structures.
    SubmitExample {
        #[command(flatten)]
        who: IdentityArgs,
        #[arg(long, help = "Address notified when the job finishes.")]
        email: Option<String>,
        #[arg(value_enum)]
        example: ExampleArg,
    },
    /// Show the scheduler state of a job id.
    Status {
        job_id: String,
    },
    /// List the jobs visible to a user, newest first.
    Jobs {
        #[command(flatten)]
        who: IdentityArgs,
    },
    /// Show a job with its status, remote outputs and (for administrators) logs.
    Show {
        #[command(flatten)]
        who: IdentityArgs,
        job_uuid: String,
    },
    /// Mirror a job's remote workspace into the local cache.
    Sync {
        #[command(flatten)]
        who: IdentityArgs,
        job_uuid: String,
    },
    /// Download one output file on demand and print its local path.
    Fetch {
        #[command(flatten)]
        who: IdentityArgs,
        job_uuid: String,
        path: String,
    },
    /// Bundle the outputs of one or more jobs into a tar.zst archive.
    Archive {
        #[command(flatten)]
        who: IdentityArgs,
        #[arg(required = true)]
        job_uuids: Vec<String>,
        #[arg(long, value_name = "FILE")]
        out: PathBuf,
    },
    /// Manage molecular-viewer sessions.
    #[command(subcommand)]
    Viz(VizCommand),
}

#[derive(Args, Debug)]
pub struct SubmitArgs {
    #[command(flatten)]
    pub who: IdentityArgs,
    #[arg(long, help = "Address notified when the job finishes.")]
    pub email: Option<String>,
    #[arg(long, help = "Job name; defaults to a timestamped name.")]
    pub name: Option<String>,
    #[arg(value_name = "INPUT", help = "Primary structure (.pdb or .sdf).")]
    pub input: PathBuf,
    #[arg(value_name = "CHAIN", help = "Chain identifier to process.")]
    pub chain: String,
    #[arg(long, help = "Ligand identifier; used together with --secondary.")]
    pub ligand: Option<String>,
    #[arg(long, value_name = "FILE", help = "Secondary ligand structure (.pdb or .sdf).")]
    pub secondary: Option<PathBuf>,
}

impl SubmitArgs {
    pub fn identity(&self) -> Identity {
        identity_with_email(&self.who, self.email.as_deref())
    }

    pub fn request(&self) -> SubmitRequest {
        SubmitRequest {
            job_name: self.name.clone(),
            input_path: self.input.clone(),
            chain_id: self.chain.clone(),
            ligand_id: self.ligand.clone(),
            secondary_input: self.secondary.clone(),
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExampleArg {
    Basic,
    Ligand,
}

impl From<ExampleArg> for ExamplePreset {
    fn from(arg: ExampleArg) -> Self {
        match arg {
            ExampleArg::Basic => ExamplePreset::Basic,
            ExampleArg::Ligand => ExamplePreset::Ligand,
        }
    }
}

/// Identity carrying an optional notification address.
pub fn identity_with_email(who: &IdentityArgs, email: Option<&str>) -> Identity {
    let identity = who.identity();
    match email.map(str::trim).filter(|e| !e.is_empty()) {
        Some(email) => identity.with_email(email),
        None => identity,
    }
}

#[derive(Subcommand, Debug)]
pub enum VizCommand {
    /// Snapshot a job's outputs into a fresh viewer session.
    Create {
        #[command(flatten)]
        who: IdentityArgs,
        job_uuid: String,
    },
    /// Show a session descriptor.
    Inspect {
        #[command(flatten)]
        who: IdentityArgs,
        session_id: String,
    },
    /// Remove a session directory.
    Cleanup {
        #[command(flatten)]
        who: IdentityArgs,
        session_id: String,
    },
    /// Remove every session past its expiry.
    Sweep,
}

impl Command {
    /// Whether the command talks to the cluster.
    pub fn needs_remote(&self) -> bool {
        match self {
            Command::Jobs { .. } => false,
            Command::Viz(VizCommand::Create { .. }) => true,
            Command::Viz(_) => false,
            _ => true,
        }
    }
}

pub struct ParsedOpts {
    pub opts: Opts,
    pub verbose_override: Option<bool>,
}

pub fn cli_command() -> clap::Command {
    Opts::command()
}

pub fn parse_opts() -> ParsedOpts {
    let matches = cli_command().get_matches();
    let verbose_override = if matches.get_flag("verbose") {
        Some(true)
    } else {
        None
    };
    let opts = Opts::from_arg_matches(&matches).unwrap_or_else(|err| err.exit());
    ParsedOpts {
        opts,
        verbose_override,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Opts {
        let matches = cli_command()
            .try_get_matches_from(args)
            .expect("arguments parse");
        Opts::from_arg_matches(&matches).expect("opts")
    }

    #[test]
    fn command_definition_is_consistent() {
        cli_command().debug_assert();
    }

    #[test]
    fn submit_collects_identity_and_request() {
        let opts = parse(&[
            "slurmgate",
            "submit",
            "--user",
            "alice",
            "--email",
            "alice@example.org",
            "--ligand",
            "HEM",
            "--secondary",
            "ligand.sdf",
            "protein.pdb",
            "A",
        ]);
        let Command::Submit(args) = opts.command else {
            panic!("expected submit");
        };
        let identity = args.identity();
        assert_eq!(identity.user_id, "alice");
        assert_eq!(identity.email.as_deref(), Some("alice@example.org"));
        assert!(!identity.is_admin);

        let request = args.request();
        assert_eq!(request.input_path, PathBuf::from("protein.pdb"));
        assert_eq!(request.chain_id, "A");
        assert_eq!(request.ligand_id.as_deref(), Some("HEM"));
        assert_eq!(request.secondary_input, Some(PathBuf::from("ligand.sdf")));
        assert!(request.job_name.is_none());
    }

    #[test]
    fn submit_example_takes_a_preset() {
        let opts = parse(&[
            "slurmgate",
            "submit-example",
            "--user",
            "alice",
            "--email",
            "alice@example.org",
            "ligand",
        ]);
        assert!(opts.command.needs_remote());
        let Command::SubmitExample { who, email, example } = opts.command else {
            panic!("expected submit-example");
        };
        assert_eq!(ExamplePreset::from(example), ExamplePreset::Ligand);
        let identity = identity_with_email(&who, email.as_deref());
        assert_eq!(identity.email.as_deref(), Some("alice@example.org"));

        assert!(cli_command()
            .try_get_matches_from(["slurmgate", "submit-example", "--user", "a", "advanced"])
            .is_err());
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let opts = parse(&[
            "slurmgate",
            "jobs",
            "--user",
            "root",
            "--admin",
            "--cache-dir",
            "/tmp/cache",
            "-v",
        ]);
        assert!(opts.verbose);
        assert_eq!(opts.cache_dir, Some(PathBuf::from("/tmp/cache")));
        let Command::Jobs { who } = &opts.command else {
            panic!("expected jobs");
        };
        assert!(who.identity().is_admin);
        assert!(!opts.command.needs_remote());
    }

    #[test]
    fn archive_requires_jobs_and_output() {
        assert!(cli_command()
            .try_get_matches_from(["slurmgate", "archive", "--user", "a", "--out", "x.tar.zst"])
            .is_err());

        let opts = parse(&[
            "slurmgate",
            "archive",
            "--user",
            "alice",
            "ab12cd34",
            "cd34ef56",
            "--out",
            "jobs.tar.zst",
        ]);
        let Command::Archive { job_uuids, out, .. } = opts.command else {
            panic!("expected archive");
        };
        assert_eq!(job_uuids, vec!["ab12cd34", "cd34ef56"]);
        assert_eq!(out, PathBuf::from("jobs.tar.zst"));
    }

    #[test]
    fn only_session_creation_needs_the_cluster() {
        let create = parse(&["slurmgate", "viz", "create", "--user", "alice", "ab12cd34"]);
        assert!(create.command.needs_remote());
        let sweep = parse(&["slurmgate", "viz", "sweep"]);
        assert!(!sweep.command.needs_remote());
        let status = parse(&["slurmgate", "status", "12345"]);
        assert!(status.command.needs_remote());
    }
}
