//! Job request and parsed submit-script types

use crate::error::{AdvisorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Normalized resource ask for one batch job.
///
/// Produced by the submit-script parser or assembled from CLI flags. The
/// optimizer clones it before applying right-sizing; nothing else mutates it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub job_name: String,
    pub nodes: u32,
    pub ntasks_per_node: u32,
    pub cpus_per_task: u32,
    #[serde(with = "super::duration_secs")]
    pub time_limit: Duration,
    /// Free-form memory string, e.g. "64G" or "8000M".
    pub memory: String,
    /// Trackable resources per node, e.g. `gpu -> 4`.
    pub tres: HashMap<String, u32>,
    pub account: String,
    pub qos: String,
    pub features: Vec<String>,
    pub constraints: Vec<String>,
}

impl JobRequest {
    pub fn validate(&self) -> Result<()> {
        if self.nodes == 0 {
            return Err(AdvisorError::validation(
                "JobRequest::validate",
                "nodes must be positive",
            ));
        }
        if self.ntasks_per_node == 0 {
            return Err(AdvisorError::validation(
                "JobRequest::validate",
                "ntasks_per_node must be positive",
            ));
        }
        if self.cpus_per_task == 0 {
            return Err(AdvisorError::validation(
                "JobRequest::validate",
                "cpus_per_task must be positive",
            ));
        }
        if self.time_limit.is_zero() {
            return Err(AdvisorError::validation(
                "JobRequest::validate",
                "time_limit must be positive",
            ));
        }
        Ok(())
    }

    pub fn total_tasks(&self) -> u32 {
        self.nodes * self.ntasks_per_node
    }

    pub fn total_cpus(&self) -> u32 {
        self.nodes * self.ntasks_per_node * self.cpus_per_task
    }

    pub fn has_gpus(&self) -> bool {
        self.tres.get("gpu").is_some_and(|g| *g > 0)
    }

    pub fn total_gpus(&self) -> u32 {
        self.nodes * self.tres.get("gpu").copied().unwrap_or(0)
    }

    /// Requested memory per node in MB, when the memory string parses.
    pub fn memory_mb(&self) -> Option<i64> {
        super::parse_memory_string(&self.memory).ok().filter(|mb| *mb > 0)
    }

    /// Requested GB of memory per requested CPU, when computable.
    pub fn requested_gb_per_cpu(&self) -> Option<f64> {
        let mb = self.memory_mb()?;
        let cpus = self.total_cpus();
        if cpus == 0 {
            return None;
        }
        Some(mb as f64 / 1024.0 / cpus as f64)
    }
}

/// A parsed submit script: every `#SBATCH` directive the advisor understands,
/// plus the raw directive map for the ones it only needs to carry through.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchScript {
    pub filename: String,
    pub job_name: String,
    pub partition: String,
    pub nodes: u32,
    pub ntasks_per_node: u32,
    pub cpus_per_task: u32,
    #[serde(with = "super::duration_secs")]
    pub time_limit: Duration,
    pub memory: String,
    pub gres: HashMap<String, u32>,
    pub account: String,
    pub qos: String,
    pub features: Vec<String>,
    pub constraints: Vec<String>,
    pub raw_directives: HashMap<String, String>,
}

impl BatchScript {
    pub fn to_job_request(&self) -> JobRequest {
        JobRequest {
            job_name: self.job_name.clone(),
            nodes: self.nodes,
            ntasks_per_node: self.ntasks_per_node.max(1),
            cpus_per_task: self.cpus_per_task.max(1),
            time_limit: self.time_limit,
            memory: self.memory.clone(),
            tres: self.gres.clone(),
            account: self.account.clone(),
            qos: self.qos.clone(),
            features: self.features.clone(),
            constraints: self.constraints.clone(),
        }
    }

    pub fn is_array_job(&self) -> bool {
        self.raw_directives.contains_key("array")
    }

    pub fn is_exclusive(&self) -> bool {
        self.raw_directives.get("exclusive").map(String::as_str) == Some("true")
    }

    pub fn has_dependencies(&self) -> bool {
        self.raw_directives.contains_key("dependency")
    }
}
