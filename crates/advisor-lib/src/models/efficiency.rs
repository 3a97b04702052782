//! Historical run records, per-script patterns and the efficiency math
//!
//! All derivations are pure functions of the raw accounting fields. The
//! classification thresholds are part of the engine's contract and are
//! exercised exhaustively by the tests below.

use crate::error::{AdvisorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Workload classification derived from efficiency thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkloadType {
    CpuBound,
    MemoryBound,
    Balanced,
    OverAllocated,
    Mixed,
}

impl WorkloadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadType::CpuBound => "cpu-bound",
            WorkloadType::MemoryBound => "memory-bound",
            WorkloadType::Balanced => "balanced",
            WorkloadType::OverAllocated => "over-allocated",
            WorkloadType::Mixed => "mixed",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "cpu-bound" => WorkloadType::CpuBound,
            "memory-bound" => WorkloadType::MemoryBound,
            "balanced" => WorkloadType::Balanced,
            "over-allocated" => WorkloadType::OverAllocated,
            _ => WorkloadType::Mixed,
        }
    }
}

/// Primary resource bottleneck of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Bottleneck {
    Cpu,
    Memory,
    TimeLimit,
    CpuOverAllocation,
    MemoryOverAllocation,
    Balanced,
}

impl Bottleneck {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bottleneck::Cpu => "cpu",
            Bottleneck::Memory => "memory",
            Bottleneck::TimeLimit => "time-limit",
            Bottleneck::CpuOverAllocation => "cpu-over-allocation",
            Bottleneck::MemoryOverAllocation => "memory-over-allocation",
            Bottleneck::Balanced => "balanced",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "cpu" => Bottleneck::Cpu,
            "memory" => Bottleneck::Memory,
            "time-limit" => Bottleneck::TimeLimit,
            "cpu-over-allocation" => Bottleneck::CpuOverAllocation,
            "memory-over-allocation" => Bottleneck::MemoryOverAllocation,
            _ => Bottleneck::Balanced,
        }
    }
}

/// First-match-wins classification over cpu and memory efficiency.
pub fn classify_workload(cpu_eff: f64, mem_eff: f64) -> WorkloadType {
    if cpu_eff > 80.0 && mem_eff < 60.0 {
        WorkloadType::CpuBound
    } else if mem_eff > 80.0 && cpu_eff < 60.0 {
        WorkloadType::MemoryBound
    } else if cpu_eff > 70.0 && mem_eff > 70.0 {
        WorkloadType::Balanced
    } else if cpu_eff < 40.0 && mem_eff < 40.0 {
        WorkloadType::OverAllocated
    } else {
        WorkloadType::Mixed
    }
}

/// Bottleneck labelling, separate from the workload table.
pub fn identify_bottleneck(cpu_eff: f64, mem_eff: f64, time_eff: f64) -> Bottleneck {
    if mem_eff > 90.0 {
        Bottleneck::Memory
    } else if cpu_eff > 90.0 {
        Bottleneck::Cpu
    } else if time_eff > 95.0 {
        Bottleneck::TimeLimit
    } else if cpu_eff < 30.0 {
        Bottleneck::CpuOverAllocation
    } else if mem_eff < 30.0 {
        Bottleneck::MemoryOverAllocation
    } else {
        Bottleneck::Balanced
    }
}

/// One historical run with requested resources, measured usage and the
/// efficiency fields derived from them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEfficiencyData {
    pub job_id: String,
    pub job_name: String,
    pub user: String,
    pub script_path: String,
    pub script_hash: String,
    pub submission_time: DateTime<Utc>,

    pub requested_cpus: u32,
    pub requested_memory_mb: i64,
    pub requested_gpus: u32,
    #[serde(with = "super::duration_secs")]
    pub requested_time: Duration,

    #[serde(with = "super::duration_secs")]
    pub actual_time: Duration,
    pub max_memory_used_mb: i64,
    #[serde(with = "super::duration_secs")]
    pub total_cpu_time: Duration,
    #[serde(with = "super::duration_secs")]
    pub cpu_time_available: Duration,

    pub cpu_efficiency: f64,
    pub memory_efficiency: f64,
    pub time_efficiency: f64,
    pub requested_cpu_mem_ratio: f64,
    pub actual_cpu_mem_ratio: f64,
    pub effective_cpus: f64,

    pub partition: String,
    pub exit_code: i32,
    #[serde(with = "super::duration_secs")]
    pub queue_wait: Duration,
    pub execution_platform: super::Venue,

    pub workload_type: WorkloadType,
    pub bottleneck: Bottleneck,
}

impl JobEfficiencyData {
    /// Derives every computed field from the raw accounting values.
    pub fn calculate_efficiencies(&mut self) {
        if !self.cpu_time_available.is_zero() {
            self.cpu_efficiency = self.total_cpu_time.as_secs_f64()
                / self.cpu_time_available.as_secs_f64()
                * 100.0;
        }
        if self.requested_memory_mb > 0 {
            self.memory_efficiency =
                self.max_memory_used_mb as f64 / self.requested_memory_mb as f64 * 100.0;
        }
        if !self.requested_time.is_zero() {
            self.time_efficiency =
                self.actual_time.as_secs_f64() / self.requested_time.as_secs_f64() * 100.0;
        }

        if self.requested_cpus > 0 {
            self.requested_cpu_mem_ratio =
                self.requested_memory_mb as f64 / 1024.0 / self.requested_cpus as f64;
        }

        self.effective_cpus = self.requested_cpus as f64 * self.cpu_efficiency / 100.0;

        // Undefined when no cores were effectively used.
        if self.effective_cpus > 0.0 {
            self.actual_cpu_mem_ratio =
                self.max_memory_used_mb as f64 / 1024.0 / self.effective_cpus;
        }

        self.workload_type = classify_workload(self.cpu_efficiency, self.memory_efficiency);
        self.bottleneck = identify_bottleneck(
            self.cpu_efficiency,
            self.memory_efficiency,
            self.time_efficiency,
        );
    }

    pub fn is_successful(&self) -> bool {
        self.exit_code == 0
    }

    pub fn validate(&self) -> Result<()> {
        if self.job_id.is_empty() {
            return Err(AdvisorError::validation(
                "JobEfficiencyData::validate",
                "job_id cannot be empty",
            ));
        }
        if self.requested_cpus == 0 {
            return Err(AdvisorError::validation(
                "JobEfficiencyData::validate",
                "requested_cpus must be positive",
            ));
        }
        if self.requested_memory_mb <= 0 {
            return Err(AdvisorError::validation(
                "JobEfficiencyData::validate",
                format!(
                    "requested_memory_mb must be positive: {}",
                    self.requested_memory_mb
                ),
            ));
        }
        // Brief bursts above 100% CPU are legitimate; anything beyond 200%
        // indicates broken accounting data.
        if !(0.0..=200.0).contains(&self.cpu_efficiency) {
            return Err(AdvisorError::validation(
                "JobEfficiencyData::validate",
                format!("cpu_efficiency out of range: {:.2}", self.cpu_efficiency),
            ));
        }
        if !(0.0..=100.0).contains(&self.memory_efficiency) {
            return Err(AdvisorError::validation(
                "JobEfficiencyData::validate",
                format!(
                    "memory_efficiency out of range: {:.2}",
                    self.memory_efficiency
                ),
            ));
        }
        Ok(())
    }
}

/// Aggregated statistics for all runs sharing one script fingerprint.
/// Updated incrementally on every insert, never rebuilt from a scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPattern {
    pub script_hash: String,
    pub script_name: String,
    pub run_count: u32,
    pub last_run: DateTime<Utc>,

    pub avg_cpu_efficiency: f64,
    pub typical_effective_cpus: f64,
    pub avg_memory_efficiency: f64,
    pub typical_memory_usage_gb: f64,
    pub avg_requested_ratio: f64,
    pub avg_actual_ratio: f64,
    pub workload_type: WorkloadType,

    #[serde(with = "super::duration_secs")]
    pub avg_runtime: Duration,
    pub success_rate: f64,

    pub local_executions: u32,
    pub cloud_executions: u32,
    pub preferred_platform: super::Venue,
}

impl JobPattern {
    /// Seed a new pattern from its first observed run.
    pub fn from_run(run: &JobEfficiencyData) -> Self {
        let mut pattern = Self {
            script_hash: run.script_hash.clone(),
            script_name: script_basename(&run.script_path),
            run_count: 0,
            last_run: run.submission_time,
            avg_cpu_efficiency: 0.0,
            typical_effective_cpus: 0.0,
            avg_memory_efficiency: 0.0,
            typical_memory_usage_gb: 0.0,
            avg_requested_ratio: 0.0,
            avg_actual_ratio: 0.0,
            workload_type: run.workload_type,
            avg_runtime: Duration::ZERO,
            success_rate: 0.0,
            local_executions: 0,
            cloud_executions: 0,
            preferred_platform: super::Venue::Local,
        };
        pattern.absorb(run);
        pattern
    }

    /// Fold one new run into the running means.
    pub fn absorb(&mut self, run: &JobEfficiencyData) {
        self.run_count += 1;
        let weight = 1.0 / self.run_count as f64;

        if run.submission_time > self.last_run || self.run_count == 1 {
            self.last_run = run.submission_time;
        }

        self.avg_cpu_efficiency =
            self.avg_cpu_efficiency * (1.0 - weight) + run.cpu_efficiency * weight;
        self.typical_effective_cpus =
            self.typical_effective_cpus * (1.0 - weight) + run.effective_cpus * weight;
        self.avg_memory_efficiency =
            self.avg_memory_efficiency * (1.0 - weight) + run.memory_efficiency * weight;
        self.typical_memory_usage_gb = self.typical_memory_usage_gb * (1.0 - weight)
            + run.max_memory_used_mb as f64 / 1024.0 * weight;
        self.avg_requested_ratio =
            self.avg_requested_ratio * (1.0 - weight) + run.requested_cpu_mem_ratio * weight;
        self.avg_actual_ratio =
            self.avg_actual_ratio * (1.0 - weight) + run.actual_cpu_mem_ratio * weight;

        let avg_secs = self.avg_runtime.as_secs_f64() * (1.0 - weight)
            + run.actual_time.as_secs_f64() * weight;
        self.avg_runtime = Duration::from_secs(avg_secs as u64);

        let successes = self.success_rate * (self.run_count - 1) as f64
            + if run.is_successful() { 1.0 } else { 0.0 };
        self.success_rate = successes / self.run_count as f64;

        match run.execution_platform {
            super::Venue::Cloud => self.cloud_executions += 1,
            super::Venue::Local => self.local_executions += 1,
        }
        self.preferred_platform = if self.cloud_executions > self.local_executions {
            super::Venue::Cloud
        } else {
            super::Venue::Local
        };

        // The most recent classification is the dominant one.
        self.workload_type = run.workload_type;
    }
}

fn script_basename(path: &str) -> String {
    std::path::Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

/// Converts scheduler memory strings ("64G", "1024M", "512K", bare MB) to MB.
pub fn parse_memory_string(input: &str) -> Result<i64> {
    let trimmed = input.trim().to_uppercase();
    if trimmed.is_empty() || trimmed == "0" {
        return Ok(0);
    }

    let parse = |digits: &str| -> Result<f64> {
        digits.parse::<f64>().map_err(|_| {
            AdvisorError::validation(
                "parse_memory_string",
                format!("invalid memory format: {input}"),
            )
        })
    };

    if let Some(gb) = trimmed.strip_suffix('T') {
        return Ok((parse(gb)? * 1024.0 * 1024.0) as i64);
    }
    if let Some(gb) = trimmed.strip_suffix('G') {
        return Ok((parse(gb)? * 1024.0) as i64);
    }
    if let Some(mb) = trimmed.strip_suffix('M') {
        return Ok(parse(mb)? as i64);
    }
    if let Some(kb) = trimmed.strip_suffix('K') {
        return Ok((parse(kb)? / 1024.0) as i64);
    }
    Ok(parse(&trimmed)? as i64)
}

/// Renders MB into the shortest human-readable unit.
pub fn format_memory_mb(mb: i64) -> String {
    if mb < 1024 {
        return format!("{mb}M");
    }
    let gb = mb as f64 / 1024.0;
    if gb < 1024.0 {
        return format!("{gb:.1}G");
    }
    format!("{:.2}T", gb / 1024.0)
}

/// Parses scheduler time strings: "SS", "MM:SS", "HH:MM:SS", "DD-HH:MM:SS".
/// Empty and "UNLIMITED" map to zero.
pub fn parse_slurm_time(input: &str) -> Result<Duration> {
    let trimmed = input.trim();
    if trimmed.is_empty() || trimmed == "UNLIMITED" || trimmed == "N/A" {
        return Ok(Duration::ZERO);
    }

    if let Some((days, rest)) = trimmed.split_once('-') {
        let days: u64 = days.parse().map_err(|_| {
            AdvisorError::validation("parse_slurm_time", format!("invalid days in: {input}"))
        })?;
        let rest = parse_slurm_time(rest)?;
        return Ok(Duration::from_secs(days * 24 * 3600) + rest);
    }

    let parts: Vec<&str> = trimmed.split(':').collect();
    let parse = |field: &str| -> Result<u64> {
        field.parse::<u64>().map_err(|_| {
            AdvisorError::validation(
                "parse_slurm_time",
                format!("invalid time format: {input}"),
            )
        })
    };

    match parts.as_slice() {
        [secs] => Ok(Duration::from_secs(parse(secs)?)),
        [mins, secs] => Ok(Duration::from_secs(parse(mins)? * 60 + parse(secs)?)),
        [hours, mins, secs] => Ok(Duration::from_secs(
            parse(hours)? * 3600 + parse(mins)? * 60 + parse(secs)?,
        )),
        _ => Err(AdvisorError::validation(
            "parse_slurm_time",
            format!("unsupported time format: {input}"),
        )),
    }
}

/// Build a run record with the given efficiency percentages, deriving
/// consistent raw accounting fields. Shared by tests across the crate.
#[cfg(test)]
pub(crate) fn test_run(cpu_eff: f64, mem_eff: f64, time_eff: f64) -> JobEfficiencyData {
    use super::Venue;

    let requested_time = Duration::from_secs(4 * 3600);
    let actual_time = Duration::from_secs_f64(requested_time.as_secs_f64() * time_eff / 100.0);
    let requested_cpus = 32u32;
    let cpu_available =
        Duration::from_secs_f64(requested_cpus as f64 * actual_time.as_secs_f64());
    let total_cpu = Duration::from_secs_f64(cpu_available.as_secs_f64() * cpu_eff / 100.0);
    let requested_memory_mb = 256 * 1024i64;
    let max_memory_used_mb = (requested_memory_mb as f64 * mem_eff / 100.0) as i64;

    let mut run = JobEfficiencyData {
        job_id: "1001".to_string(),
        job_name: "sim".to_string(),
        user: "researcher".to_string(),
        script_path: "/home/researcher/run.sbatch".to_string(),
        script_hash: "abc123".to_string(),
        submission_time: Utc::now(),
        requested_cpus,
        requested_memory_mb,
        requested_gpus: 0,
        requested_time,
        actual_time,
        max_memory_used_mb,
        total_cpu_time: total_cpu,
        cpu_time_available: cpu_available,
        cpu_efficiency: 0.0,
        memory_efficiency: 0.0,
        time_efficiency: 0.0,
        requested_cpu_mem_ratio: 0.0,
        actual_cpu_mem_ratio: 0.0,
        effective_cpus: 0.0,
        partition: "cpu".to_string(),
        exit_code: 0,
        queue_wait: Duration::from_secs(120),
        execution_platform: Venue::Local,
        workload_type: WorkloadType::Mixed,
        bottleneck: Bottleneck::Balanced,
    };
    run.calculate_efficiencies();
    run
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Venue;

    fn run_fixture(cpu_eff: f64, mem_eff: f64, time_eff: f64) -> JobEfficiencyData {
        test_run(cpu_eff, mem_eff, time_eff)
    }

    #[test]
    fn test_derived_efficiencies() {
        let run = run_fixture(45.0, 68.0, 80.0);
        assert!((run.cpu_efficiency - 45.0).abs() < 0.5);
        assert!((run.memory_efficiency - 68.0).abs() < 0.5);
        assert!((run.time_efficiency - 80.0).abs() < 0.5);
        assert!((run.effective_cpus - 14.4).abs() < 0.2);
        // 256 GB over 32 CPUs
        assert!((run.requested_cpu_mem_ratio - 8.0).abs() < 1e-6);
        run.validate().unwrap();
    }

    #[test]
    fn test_actual_ratio_undefined_without_effective_cpus() {
        let mut run = run_fixture(50.0, 50.0, 50.0);
        run.total_cpu_time = Duration::ZERO;
        run.actual_cpu_mem_ratio = 0.0;
        run.calculate_efficiencies();
        assert_eq!(run.effective_cpus, 0.0);
        assert_eq!(run.actual_cpu_mem_ratio, 0.0);
    }

    // The workload table is exhaustively testable; cover every rule plus the
    // first-match-wins ordering.
    #[test]
    fn test_workload_classification_table() {
        assert_eq!(classify_workload(85.0, 50.0), WorkloadType::CpuBound);
        assert_eq!(classify_workload(50.0, 85.0), WorkloadType::MemoryBound);
        assert_eq!(classify_workload(75.0, 75.0), WorkloadType::Balanced);
        assert_eq!(classify_workload(30.0, 30.0), WorkloadType::OverAllocated);
        assert_eq!(classify_workload(50.0, 50.0), WorkloadType::Mixed);
        assert_eq!(classify_workload(85.0, 65.0), WorkloadType::Mixed);
        // cpu-bound wins over balanced when both could match
        assert_eq!(classify_workload(85.0, 59.0), WorkloadType::CpuBound);
    }

    #[test]
    fn test_bottleneck_table() {
        assert_eq!(identify_bottleneck(50.0, 95.0, 50.0), Bottleneck::Memory);
        assert_eq!(identify_bottleneck(95.0, 50.0, 50.0), Bottleneck::Cpu);
        assert_eq!(identify_bottleneck(50.0, 50.0, 97.0), Bottleneck::TimeLimit);
        assert_eq!(
            identify_bottleneck(20.0, 50.0, 50.0),
            Bottleneck::CpuOverAllocation
        );
        assert_eq!(
            identify_bottleneck(50.0, 20.0, 50.0),
            Bottleneck::MemoryOverAllocation
        );
        assert_eq!(identify_bottleneck(50.0, 50.0, 50.0), Bottleneck::Balanced);
        // memory bottleneck takes precedence over cpu
        assert_eq!(identify_bottleneck(95.0, 95.0, 50.0), Bottleneck::Memory);
    }

    #[test]
    fn test_validate_rejects_out_of_range_efficiency() {
        let mut run = run_fixture(50.0, 50.0, 50.0);
        run.cpu_efficiency = 250.0;
        assert!(run.validate().is_err());

        let mut run = run_fixture(50.0, 50.0, 50.0);
        run.memory_efficiency = 120.0;
        assert!(run.validate().is_err());
    }

    #[test]
    fn test_pattern_running_means() {
        let first = run_fixture(40.0, 60.0, 70.0);
        let mut second = run_fixture(60.0, 80.0, 90.0);
        second.job_id = "1002".to_string();
        second.execution_platform = Venue::Cloud;

        let mut pattern = JobPattern::from_run(&first);
        assert_eq!(pattern.run_count, 1);
        pattern.absorb(&second);

        assert_eq!(pattern.run_count, 2);
        assert!((pattern.avg_cpu_efficiency - 50.0).abs() < 0.5);
        assert!((pattern.avg_memory_efficiency - 70.0).abs() < 0.5);
        assert!((pattern.success_rate - 1.0).abs() < 1e-9);
        assert_eq!(pattern.local_executions, 1);
        assert_eq!(pattern.cloud_executions, 1);
        assert_eq!(pattern.preferred_platform, Venue::Local);
    }

    #[test]
    fn test_pattern_success_rate_with_failure() {
        let ok = run_fixture(50.0, 50.0, 50.0);
        let mut failed = run_fixture(50.0, 50.0, 50.0);
        failed.job_id = "1002".to_string();
        failed.exit_code = 137;

        let mut pattern = JobPattern::from_run(&ok);
        pattern.absorb(&failed);
        assert!((pattern.success_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_parse_memory_string_units() {
        assert_eq!(parse_memory_string("64G").unwrap(), 64 * 1024);
        assert_eq!(parse_memory_string("1024M").unwrap(), 1024);
        assert_eq!(parse_memory_string("2048K").unwrap(), 2);
        assert_eq!(parse_memory_string("512").unwrap(), 512);
        assert_eq!(parse_memory_string("1.5G").unwrap(), 1536);
        assert_eq!(parse_memory_string("").unwrap(), 0);
        assert!(parse_memory_string("lots").is_err());
    }

    #[test]
    fn test_format_memory_mb() {
        assert_eq!(format_memory_mb(512), "512M");
        assert_eq!(format_memory_mb(2048), "2.0G");
        assert_eq!(format_memory_mb(2 * 1024 * 1024), "2.00T");
    }

    #[test]
    fn test_parse_slurm_time_formats() {
        assert_eq!(parse_slurm_time("90").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_slurm_time("30:00").unwrap(), Duration::from_secs(1800));
        assert_eq!(
            parse_slurm_time("2:00:00").unwrap(),
            Duration::from_secs(7200)
        );
        assert_eq!(
            parse_slurm_time("1-12:30:00").unwrap(),
            Duration::from_secs(24 * 3600 + 12 * 3600 + 1800)
        );
        assert_eq!(parse_slurm_time("UNLIMITED").unwrap(), Duration::ZERO);
        assert!(parse_slurm_time("1:2:3:4").is_err());
    }
}
