//! CLI subcommand implementations

pub mod advise;
pub mod burst;
pub mod domain;
pub mod history;
pub mod plan;

use anyhow::{bail, Context, Result};
use asba_lib::models::{parse_slurm_time, JobRequest};
use asba_lib::slurm::{parse_batch_script, script_fingerprint};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Command-line overrides layered on top of the parsed script.
#[derive(Default)]
pub struct JobOverrides {
    pub nodes: Option<u32>,
    pub cpus_per_task: Option<u32>,
    pub time_limit: Option<String>,
    pub memory: Option<String>,
    pub gres: Option<String>,
}

impl JobOverrides {
    pub fn apply(&self, job: &mut JobRequest) -> Result<()> {
        if let Some(nodes) = self.nodes {
            job.nodes = nodes;
        }
        if let Some(cpus) = self.cpus_per_task {
            job.cpus_per_task = cpus;
        }
        if let Some(time) = &self.time_limit {
            job.time_limit =
                parse_slurm_time(time).with_context(|| format!("invalid --time value: {time}"))?;
        }
        if let Some(memory) = &self.memory {
            job.memory = memory.clone();
        }
        if let Some(gres) = &self.gres {
            // "gpu:4" or "gpu:a100:4" forms, matching the script directive.
            let parts: Vec<&str> = gres.split(':').collect();
            if parts.len() >= 2 {
                if let Ok(count) = parts[parts.len() - 1].parse() {
                    job.tres.insert(parts[0].to_string(), count);
                }
            }
        }
        job.validate()?;
        Ok(())
    }
}

/// Everything the advise/plan/burst commands need about one submit script.
pub struct JobContext {
    pub job: JobRequest,
    pub target: String,
    pub script_path: PathBuf,
    pub fingerprint: String,
}

/// Parse the submit script and resolve the target partition. The script's
/// own partition directive is the default target.
pub fn load_job(script: &Path, target_override: Option<&str>) -> Result<JobContext> {
    let batch = parse_batch_script(script)
        .with_context(|| format!("failed to parse {}", script.display()))?;

    let target = target_override
        .map(str::to_string)
        .unwrap_or_else(|| batch.partition.clone());
    if target.is_empty() {
        bail!(
            "no target partition: {} has no partition directive and none was given",
            script.display()
        );
    }

    let job = batch.to_job_request();
    job.validate()?;

    let fingerprint = match script_fingerprint(script) {
        Ok(hash) => hash,
        Err(e) => {
            warn!(error = %e, "could not fingerprint script; history matching disabled");
            String::new()
        }
    };

    Ok(JobContext {
        job,
        target,
        script_path: script.to_path_buf(),
        fingerprint,
    })
}
