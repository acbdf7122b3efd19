// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use tera::Context;

use crate::app::errors::{AppResult, local_error};

use super::shell::quote_arg;

pub const SUBMIT_SCRIPT_NAME: &str = "run_job.sh";
pub const WRAPPER_SCRIPT_NAME: &str = "preprocess_pdb.sh";

const SUBMIT_SCRIPT_TEMPLATE: &str = r#"#!/bin/bash
#SBATCH --job-name={{ job_name }}
#SBATCH --output={{ workspace }}/slurm_%j.out
#SBATCH --error={{ workspace }}/slurm_%j.err
#SBATCH --time={{ time }}
#SBATCH --mem={{ memory }}
#SBATCH --cpus-per-task={{ cpus }}

send_notification() {
    local status=$1
    local job_id=$2
{% if notify_email %}
    local subject
    local message
    if [ "$status" = "COMPLETED" ]; then
        subject="Job Completed - {{ job_name }}"
        message="Your job has completed successfully.

Job Name: {{ job_name }}
Job ID: $job_id
Status: Completed
{% if details_url %}
You can view and download your results at:
{{ details_url }}
{% endif %}"
    else
        subject="Job Failed - {{ job_name }}"
        message="Your job has failed.

Job Name: {{ job_name }}
Job ID: $job_id
Status: $status

Include your Job ID when contacting support."
    fi
    echo "$message" | {{ notify_command }} -s "$subject" {{ notify_email }}
{% else %}
    echo "job $job_id finished with status $status"
{% endif %}
}

trap 'EXIT_CODE=$?; if [ $EXIT_CODE -eq 0 ]; then send_notification "COMPLETED" $SLURM_JOB_ID; else send_notification "FAILED" $SLURM_JOB_ID; fi' EXIT

if [ -f {{ module_init }} ]; then
    source {{ module_init }}
fi

if [ -f ~/.bashrc ]; then
    source ~/.bashrc
fi
{% if easybuild_prefix %}
export EASYBUILD_PREFIX={{ easybuild_prefix }}
export MODULEPATH=$EASYBUILD_PREFIX/modules/all:$MODULEPATH
{% endif %}
{% for module in modules %}module load {{ module }} 2>/dev/null || true
{% endfor %}{% if tool_repo %}
export MASIF_REPO={{ tool_repo }}
{% endif %}
echo "Job directory: {{ workspace }}"
echo "Started at: $(date)"

cd {{ workspace_arg }} || exit 1

{{ command }}

echo "Completed at: $(date)"
"#;

/// Everything the submission script needs; values are rendered as given
/// except where noted.
#[derive(Debug, Clone)]
pub struct ScriptParams<'a> {
    pub job_name: &'a str,
    pub workspace: &'a str,
    pub time: &'a str,
    pub memory: &'a str,
    pub cpus: u32,
    /// Quoted as a single shell word.
    pub module_init: &'a str,
    pub modules: &'a [String],
    pub easybuild_prefix: Option<&'a str>,
    pub tool_repo: Option<&'a str>,
    pub notify_command: &'a str,
    /// Quoted as a single shell word.
    pub notify_email: Option<&'a str>,
    pub details_url: Option<&'a str>,
    /// Already quoted command line.
    pub command: &'a str,
}

pub fn render_submit_script(params: &ScriptParams<'_>) -> AppResult<String> {
    let mut context = Context::new();
    context.insert("job_name", params.job_name);
    context.insert("workspace", params.workspace);
    context.insert("workspace_arg", &quote_arg(params.workspace));
    context.insert("time", params.time);
    context.insert("memory", params.memory);
    context.insert("cpus", &params.cpus);
    context.insert("module_init", &quote_arg(params.module_init));
    context.insert("modules", params.modules);
    context.insert("easybuild_prefix", &params.easybuild_prefix.map(quote_arg));
    context.insert("tool_repo", &params.tool_repo.map(quote_arg));
    context.insert("notify_command", params.notify_command);
    context.insert("notify_email", &params.notify_email.map(quote_arg));
    context.insert("details_url", &params.details_url);
    context.insert("command", params.command);
    tera::Tera::one_off(SUBMIT_SCRIPT_TEMPLATE, &context, false)
        .map_err(|err| local_error(format!("failed to render submission script: {err}")))
}

/// Forwards its arguments to the tool's own entry point inside `tool_repo`.
pub fn render_wrapper_script(tool_repo: &str) -> String {
    format!(
        "#!/bin/bash\ncd {} || exit 1\n./{} \"$@\"\n",
        quote_arg(tool_repo),
        WRAPPER_SCRIPT_NAME
    )
}
