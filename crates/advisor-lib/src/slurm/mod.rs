//! Scheduler collaborator: batch-script parsing and queue/partition/accounting
//! queries
//!
//! The advisor relies on three facts from this module: queue depth is the
//! count of pending jobs, estimated wait is derived from pending time limits,
//! and accounting rows supply the raw fields the efficiency math needs.

mod batch_parser;
mod client;
mod ingest;

pub use batch_parser::parse_batch_script;
pub use client::SlurmClient;
pub use ingest::{normalize_script, script_fingerprint};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// State of one scheduler node, bucketed from `sinfo` output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeState {
    Idle,
    Allocated,
    Mixed,
    Down,
    Draining,
}

/// Partition capacity snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartitionInfo {
    pub name: String,
    pub total_nodes: u32,
    pub idle_nodes: u32,
    pub allocated_nodes: u32,
    pub mixed_nodes: u32,
    pub down_nodes: u32,
    pub cpus_per_node: u32,
    pub memory_per_node: String,
    pub features: Vec<String>,
    pub tres_per_node: HashMap<String, u32>,
}

impl PartitionInfo {
    /// Nodes a new job could land on right now.
    pub fn available_nodes(&self) -> u32 {
        self.idle_nodes + self.mixed_nodes
    }

    pub fn utilization_percent(&self) -> f64 {
        if self.total_nodes == 0 {
            return 0.0;
        }
        (self.allocated_nodes + self.mixed_nodes) as f64 / self.total_nodes as f64 * 100.0
    }
}

/// Queue snapshot for one partition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueInfo {
    pub partition: String,
    pub jobs_running: u32,
    pub jobs_pending: u32,
    pub pending_jobs: Vec<PendingJob>,
    #[serde(with = "crate::models::duration_secs")]
    pub estimated_wait: Duration,
}

/// One pending queue entry, as much of it as `squeue` reports.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PendingJob {
    pub job_id: String,
    pub job_name: String,
    pub user: String,
    pub nodes: u32,
    pub cpus: u32,
    #[serde(with = "crate::models::duration_secs")]
    pub time_limit: Duration,
    pub priority: i64,
}

/// Estimated wait: pending jobs overlap, so scale the mean time limit by an
/// empirical 0.7 fragmentation factor per queued job.
pub(crate) fn estimate_wait(pending: &[PendingJob]) -> Duration {
    if pending.is_empty() {
        return Duration::ZERO;
    }

    let with_limit: Vec<Duration> = pending
        .iter()
        .map(|job| job.time_limit)
        .filter(|limit| !limit.is_zero())
        .collect();

    if with_limit.is_empty() {
        // No time limits reported; assume an hour per queued job.
        return Duration::from_secs(pending.len() as u64 * 3600);
    }

    let avg_secs =
        with_limit.iter().map(Duration::as_secs_f64).sum::<f64>() / with_limit.len() as f64;
    Duration::from_secs_f64(avg_secs * 0.7 * pending.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(limit_secs: u64) -> PendingJob {
        PendingJob {
            job_id: "1".to_string(),
            time_limit: Duration::from_secs(limit_secs),
            ..Default::default()
        }
    }

    #[test]
    fn test_estimate_wait_scales_with_queue_depth() {
        let queue = vec![pending(3600), pending(3600), pending(3600)];
        // 0.7 * 1h * 3 jobs
        assert_eq!(estimate_wait(&queue), Duration::from_secs_f64(3600.0 * 2.1));
    }

    #[test]
    fn test_estimate_wait_empty_queue() {
        assert_eq!(estimate_wait(&[]), Duration::ZERO);
    }

    #[test]
    fn test_estimate_wait_without_limits_assumes_hour_per_job() {
        let queue = vec![pending(0), pending(0)];
        assert_eq!(estimate_wait(&queue), Duration::from_secs(7200));
    }

    #[test]
    fn test_available_nodes_counts_idle_and_mixed() {
        let info = PartitionInfo {
            total_nodes: 16,
            idle_nodes: 3,
            mixed_nodes: 1,
            allocated_nodes: 10,
            down_nodes: 2,
            ..Default::default()
        };
        assert_eq!(info.available_nodes(), 4);
        assert!((info.utilization_percent() - 68.75).abs() < 1e-9);
    }
}
