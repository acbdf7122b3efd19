// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use super::shell::quote_arg;

pub fn submit_command(script_path: &str) -> String {
    format!("sbatch {}", quote_arg(script_path))
}

/// Live-queue view: one state name, no header.
pub fn squeue_command(job_id: &str) -> String {
    format!("squeue -j {job_id} -h -o %T")
}

/// Historical-accounting view: state column only, no header.
pub fn sacct_command(job_id: &str) -> String {
    format!("sacct -j {job_id} -n -o State")
}

/// Scheduler ids are digits, optionally with array (`_`) or step (`.`) separators.
pub fn is_valid_job_id(job_id: &str) -> bool {
    let mut chars = job_id.chars();
    match chars.next() {
        Some(first) if first.is_ascii_digit() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_digit() || c == '_' || c == '.')
}

/// Extracts the job id from an sbatch acknowledgement such as "Submitted batch job 11".
/// The id is the last whitespace-delimited token.
pub fn parse_submitted_job_id(stdout: &str) -> Option<String> {
    stdout.split_whitespace().last().map(str::to_string)
}

pub fn parse_squeue_state(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

/// First reported state token; sacct may append reasons ("CANCELLED by 1000").
pub fn parse_sacct_state(output: &str) -> Option<String> {
    output.split_whitespace().next().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_submitted_job_id_takes_last_token() {
        assert_eq!(
            parse_submitted_job_id("Submitted batch job 42\n").as_deref(),
            Some("42")
        );
        assert_eq!(
            parse_submitted_job_id("Submitted batch job 77 on cluster gpu").as_deref(),
            Some("gpu")
        );
        assert_eq!(parse_submitted_job_id("   \n"), None);
        assert_eq!(parse_submitted_job_id(""), None);
    }

    #[test]
    fn squeue_state_is_first_non_empty_line() {
        assert_eq!(parse_squeue_state("\nRUNNING\n").as_deref(), Some("RUNNING"));
        assert_eq!(parse_squeue_state("   "), None);
    }

    #[test]
    fn sacct_state_is_first_token() {
        assert_eq!(
            parse_sacct_state("  COMPLETED \n COMPLETED\n").as_deref(),
            Some("COMPLETED")
        );
        assert_eq!(
            parse_sacct_state("CANCELLED by 1000\n").as_deref(),
            Some("CANCELLED")
        );
        assert_eq!(parse_sacct_state(""), None);
    }

    #[test]
    fn job_id_validation() {
        assert!(is_valid_job_id("42"));
        assert!(is_valid_job_id("42_3"));
        assert!(!is_valid_job_id(""));
        assert!(!is_valid_job_id("42; rm -rf ~"));
        assert!(!is_valid_job_id("abc"));
    }

    #[test]
    fn commands_are_stable() {
        assert_eq!(squeue_command("42"), "squeue -j 42 -h -o %T");
        assert_eq!(sacct_command("42"), "sacct -j 42 -n -o State");
        assert_eq!(
            submit_command("/work/demo_ab12cd34/run_job.sh"),
            "sbatch /work/demo_ab12cd34/run_job.sh"
        );
        assert_eq!(submit_command("/work/my job/run_job.sh"), "sbatch '/work/my job/run_job.sh'");
    }
}
