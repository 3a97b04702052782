//! Accounting-row ingestion and script fingerprinting
//!
//! Turns `sacct --parsable2` rows into run records and computes the
//! normalized content hash that identifies a submit script across runs.

use crate::models::{
    parse_memory_string, parse_slurm_time, Bottleneck, JobEfficiencyData, Venue, WorkloadType,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Parse every usable accounting row. Rows that fail to parse, failed jobs
/// and zero-elapsed entries are skipped; the survivors carry fully derived
/// efficiency fields.
pub(crate) fn parse_efficiency_rows(output: &str, username: &str) -> Vec<JobEfficiencyData> {
    let mut runs = Vec::new();

    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        match parse_efficiency_row(line, username) {
            Ok(Some(run)) => runs.push(run),
            Ok(None) => {}
            Err(message) => {
                warn!(line, message, "skipping unparseable accounting row");
            }
        }
    }

    runs
}

fn parse_efficiency_row(
    line: &str,
    username: &str,
) -> std::result::Result<Option<JobEfficiencyData>, String> {
    let fields: Vec<&str> = line.split('|').collect();
    if fields.len() < 15 {
        return Err(format!("expected 15 fields, got {}", fields.len()));
    }

    // Batch/extern sub-steps repeat the parent job id with a suffix.
    if fields[0].contains('.') {
        return Ok(None);
    }

    let submission_time =
        parse_timestamp(fields[2]).ok_or_else(|| format!("invalid submit time: {}", fields[2]))?;
    let start_time = parse_timestamp(fields[3]);

    let exit_code = parse_exit_code(fields[6]);
    let requested_cpus: u32 = fields[7]
        .parse()
        .map_err(|_| format!("invalid requested CPUs: {}", fields[7]))?;
    let requested_memory_mb =
        parse_memory_string(fields[8]).map_err(|e| format!("invalid requested memory: {e}"))?;
    let requested_time =
        parse_slurm_time(fields[9]).map_err(|e| format!("invalid requested time: {e}"))?;
    let total_cpu_time =
        parse_slurm_time(fields[10]).map_err(|e| format!("invalid total CPU time: {e}"))?;
    let cpu_time_available =
        parse_slurm_time(fields[11]).map_err(|e| format!("invalid CPU time available: {e}"))?;
    let max_memory_used_mb =
        parse_memory_string(fields[12]).map_err(|e| format!("invalid max RSS: {e}"))?;
    let actual_time =
        parse_slurm_time(fields[13]).map_err(|e| format!("invalid elapsed time: {e}"))?;
    let partition = fields[14].to_string();

    // Only completed runs are useful for efficiency statistics.
    if exit_code != 0 || actual_time.is_zero() {
        return Ok(None);
    }

    let queue_wait = match start_time {
        Some(start) if start > submission_time => (start - submission_time)
            .to_std()
            .unwrap_or(Duration::ZERO),
        _ => Duration::ZERO,
    };

    let execution_platform = platform_for_partition(&partition);

    let mut run = JobEfficiencyData {
        job_id: fields[0].to_string(),
        job_name: fields[1].to_string(),
        user: username.to_string(),
        script_path: String::new(),
        script_hash: String::new(),
        submission_time,
        requested_cpus,
        requested_memory_mb,
        requested_gpus: 0,
        requested_time,
        actual_time,
        max_memory_used_mb,
        total_cpu_time,
        cpu_time_available,
        cpu_efficiency: 0.0,
        memory_efficiency: 0.0,
        time_efficiency: 0.0,
        requested_cpu_mem_ratio: 0.0,
        actual_cpu_mem_ratio: 0.0,
        effective_cpus: 0.0,
        partition,
        exit_code,
        queue_wait,
        execution_platform,
        workload_type: WorkloadType::Mixed,
        bottleneck: Bottleneck::Balanced,
    };
    run.calculate_efficiencies();

    if let Err(e) = run.validate() {
        return Err(format!("derived fields out of range: {e}"));
    }

    Ok(Some(run))
}

/// sacct reports exit codes as `code:signal`.
fn parse_exit_code(field: &str) -> i32 {
    let code = field.split(':').next().unwrap_or(field);
    code.parse().unwrap_or(-1)
}

fn parse_timestamp(field: &str) -> Option<DateTime<Utc>> {
    let trimmed = field.trim();
    if trimmed.is_empty() || trimmed == "N/A" || trimmed == "Unknown" || trimmed == "None" {
        return None;
    }

    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }
    None
}

/// Burst partitions are named after their venue by site convention.
fn platform_for_partition(partition: &str) -> Venue {
    let lower = partition.to_lowercase();
    if lower.contains("aws") || lower.contains("cloud") {
        Venue::Cloud
    } else {
        Venue::Local
    }
}

/// Content hash of a normalized submit script: blank lines and ordinary
/// comments are dropped, `#SBATCH` directives and commands are kept, so
/// cosmetic edits do not change a script's identity.
pub fn script_fingerprint(path: &Path) -> std::io::Result<String> {
    let content = std::fs::read_to_string(path)?;
    let normalized = normalize_script(&content);
    let digest = Sha256::digest(normalized.as_bytes());
    Ok(format!("{digest:x}"))
}

/// The normalization underlying `script_fingerprint`.
pub fn normalize_script(content: &str) -> String {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with('#') || line.starts_with("#SBATCH"))
        .collect::<Vec<_>>()
        .join("\n")
}
