//! Async scheduler command client
//!
//! Wraps `sinfo`, `squeue` and `sacct` invocations. Every command runs under
//! its own timeout and is killed when the caller's future is dropped, so an
//! aborted analysis never leaves scheduler queries behind.

use crate::error::{AdvisorError, Result};
use crate::models::JobEfficiencyData;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use super::ingest::parse_efficiency_rows;
use super::{estimate_wait, NodeState, PartitionInfo, PendingJob, QueueInfo};

const DEFAULT_BIN_PATH: &str = "/usr/bin";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SlurmClient {
    bin_path: PathBuf,
    timeout: Duration,
}

impl SlurmClient {
    pub fn new(bin_path: Option<PathBuf>) -> Self {
        Self {
            bin_path: bin_path.unwrap_or_else(|| PathBuf::from(DEFAULT_BIN_PATH)),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.timeout = timeout;
        }
        self
    }

    async fn run(&self, program: &str, args: &[&str], timeout: Duration) -> Result<String> {
        let path = self.bin_path.join(program);
        let child = Command::new(&path)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(timeout, child)
            .await
            .map_err(|_| {
                AdvisorError::scheduler(program, format!("{program} timed out after {timeout:?}"))
            })?
            .map_err(|e| AdvisorError::Scheduler {
                operation: program.to_string(),
                message: format!("failed to run {}", path.display()),
                source: Some(e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AdvisorError::scheduler(
                program,
                format!("{program} exited with {}: {}", output.status, stderr.trim()),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Snapshot of a partition's node capacity via `sinfo`.
    pub async fn partition_info(&self, partition: &str) -> Result<PartitionInfo> {
        if partition.is_empty() {
            return Err(AdvisorError::validation(
                "partition_info",
                "partition name cannot be empty",
            ));
        }

        let output = self
            .run(
                "sinfo",
                &[
                    "-p",
                    partition,
                    "--Format=nodes,cpus,memory,features,state",
                    "--noheader",
                ],
                self.timeout,
            )
            .await?;

        let info = parse_partition_info(partition, &output)?;
        debug!(partition, total = info.total_nodes, idle = info.idle_nodes, "partition snapshot");
        Ok(info)
    }

    /// Snapshot of a partition's queue via `squeue`, including the wait
    /// estimate derived from pending time limits.
    pub async fn queue_info(&self, partition: &str) -> Result<QueueInfo> {
        if partition.is_empty() {
            return Err(AdvisorError::validation(
                "queue_info",
                "partition name cannot be empty",
            ));
        }

        let output = self
            .run(
                "squeue",
                &[
                    "-p",
                    partition,
                    "--Format=jobid,name,username,state,numnodes,numcpus,timelimit,prioritylong",
                    "--noheader",
                ],
                self.timeout,
            )
            .await?;

        Ok(parse_queue_info(partition, &output))
    }

    /// Per-user accounting rows for the efficiency store, via `sacct`.
    /// Accounting queries get triple the short-query timeout.
    pub async fn user_job_efficiency(
        &self,
        username: &str,
        days: u32,
    ) -> Result<Vec<JobEfficiencyData>> {
        if username.is_empty() {
            return Err(AdvisorError::validation(
                "user_job_efficiency",
                "username cannot be empty",
            ));
        }
        if days == 0 || days > 365 {
            return Err(AdvisorError::validation(
                "user_job_efficiency",
                format!("days must be between 1 and 365, got {days}"),
            ));
        }

        let start = chrono::Utc::now() - chrono::Duration::days(days as i64);
        let start_arg = start.format("%Y-%m-%d").to_string();

        let output = self
            .run(
                "sacct",
                &[
                    "--user",
                    username,
                    "--starttime",
                    &start_arg,
                    "--format=JobID,JobName,Submit,Start,End,State,ExitCode,ReqCPUs,ReqMem,ReqTime,TotalCPU,CPUTime,MaxRSS,Elapsed,Partition",
                    "--units=M",
                    "--noheader",
                    "--parsable2",
                ],
                self.timeout * 3,
            )
            .await?;

        Ok(parse_efficiency_rows(&output, username))
    }

    /// Probe whether the scheduler binaries are reachable at all.
    pub async fn test_connection(&self) -> Result<()> {
        self.run("sinfo", &["--version"], self.timeout).await.map(|_| ())
    }
}

fn parse_partition_info(partition: &str, output: &str) -> Result<PartitionInfo> {
    let mut info = PartitionInfo {
        name: partition.to_string(),
        ..Default::default()
    };

    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        if let Err(e) = parse_partition_line(line, &mut info) {
            warn!(line, error = %e, "skipping unparseable sinfo line");
        }
    }

    if info.total_nodes == 0 {
        return Err(AdvisorError::scheduler(
            "partition_info",
            format!("no nodes found in partition {partition}"),
        ));
    }

    Ok(info)
}

fn parse_partition_line(line: &str, info: &mut PartitionInfo) -> Result<()> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 5 {
        return Err(AdvisorError::scheduler(
            "partition_info",
            format!("insufficient fields in sinfo line: {line}"),
        ));
    }

    let nodes = parse_node_count(fields[0]);
    let cpus: u32 = fields[1].parse().map_err(|_| {
        AdvisorError::scheduler("partition_info", format!("invalid CPU count: {}", fields[1]))
    })?;

    info.total_nodes += nodes;
    if info.cpus_per_node == 0 {
        info.cpus_per_node = cpus;
        info.memory_per_node = fields[2].to_string();
        info.features = fields[3].split(',').map(str::to_string).collect();
    }

    match parse_node_state(fields[4]) {
        NodeState::Idle => info.idle_nodes += nodes,
        NodeState::Allocated => info.allocated_nodes += nodes,
        NodeState::Mixed => info.mixed_nodes += nodes,
        NodeState::Down | NodeState::Draining => info.down_nodes += nodes,
    }

    Ok(())
}

fn parse_node_state(state: &str) -> NodeState {
    let upper = state.to_uppercase();
    if upper.contains("IDLE") {
        NodeState::Idle
    } else if upper.contains("MIX") {
        NodeState::Mixed
    } else if upper.contains("ALLOC") {
        NodeState::Allocated
    } else if upper.contains("DRAIN") {
        NodeState::Draining
    } else {
        NodeState::Down
    }
}

fn parse_node_count(spec: &str) -> u32 {
    spec.parse().unwrap_or(1)
}

fn parse_queue_info(partition: &str, output: &str) -> QueueInfo {
    let mut info = QueueInfo {
        partition: partition.to_string(),
        ..Default::default()
    };

    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 7 {
            warn!(line, "skipping short squeue line");
            continue;
        }

        let state = fields[3].to_uppercase();
        if state.starts_with("RUNNING") || state == "R" {
            info.jobs_running += 1;
        } else if state.starts_with("PENDING") || state == "PD" {
            info.jobs_pending += 1;
            info.pending_jobs.push(PendingJob {
                job_id: fields[0].to_string(),
                job_name: fields[1].to_string(),
                user: fields[2].to_string(),
                nodes: fields[4].parse().unwrap_or(0),
                cpus: fields[5].parse().unwrap_or(0),
                time_limit: crate::models::parse_slurm_time(fields[6]).unwrap_or_default(),
                priority: fields.get(7).and_then(|p| p.parse().ok()).unwrap_or(0),
            });
        }
    }

    info.estimated_wait = estimate_wait(&info.pending_jobs);
    info
}
