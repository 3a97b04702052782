//! Advisor settings
//!
//! Deserialized by the CLI from the optional YAML file plus `ASBA_*`
//! environment overrides; every field has a workable default so the tool
//! runs unconfigured on a stock cluster.

use crate::analyzer::LocalCostRates;
use crate::error::{AdvisorError, Result};
use crate::models::DecisionWeights;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorSettings {
    /// Directory holding the scheduler binaries. None means /usr/bin.
    pub slurm_bin_path: Option<PathBuf>,
    pub cloud: CloudSettings,
    /// Per-partition local cost rates; unlisted partitions use defaults.
    pub local_costs: HashMap<String, LocalCostRates>,
    pub weights: DecisionWeights,
    pub analysis: AnalysisSettings,
    pub budget: BudgetSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudSettings {
    pub region: String,
    pub pricing_endpoint: String,
    pub pricing_cache_minutes: u64,
    /// Instance boot plus scheduler-registration overhead.
    pub startup_minutes: u64,
    /// Burst partition name to instance mapping.
    pub partitions: HashMap<String, CloudPartition>,
}

impl Default for CloudSettings {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            pricing_endpoint: "http://localhost:9090".to_string(),
            pricing_cache_minutes: 15,
            startup_minutes: 3,
            partitions: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudPartition {
    pub instance_type: String,
    /// Region override for this partition.
    pub region: Option<String>,
    pub max_nodes: u32,
}

impl Default for CloudPartition {
    fn default() -> Self {
        Self {
            instance_type: "m5.xlarge".to_string(),
            region: None,
            max_nodes: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    /// Joint deadline for the two partition analyses.
    pub deadline_seconds: u64,
    /// Scheduler short-query timeout.
    pub slurm_timeout_seconds: u64,
    /// Days of accounting history ingested by `history --days`.
    pub history_days: u32,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            deadline_seconds: 30,
            slurm_timeout_seconds: 30,
            history_days: 90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetSettings {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080".to_string(),
            api_key: None,
            timeout_seconds: 30,
        }
    }
}

impl AdvisorSettings {
    pub fn validate(&self) -> Result<()> {
        self.weights.validate()?;
        if self.cloud.region.is_empty() {
            return Err(AdvisorError::validation(
                "AdvisorSettings::validate",
                "cloud.region is required",
            ));
        }
        for (name, partition) in &self.cloud.partitions {
            if partition.instance_type.is_empty() {
                return Err(AdvisorError::validation(
                    "AdvisorSettings::validate",
                    format!("cloud partition '{name}' is missing an instance type"),
                ));
            }
            if partition.max_nodes == 0 {
                return Err(AdvisorError::validation(
                    "AdvisorSettings::validate",
                    format!("cloud partition '{name}' must allow at least one node"),
                ));
            }
        }
        Ok(())
    }

    /// Resolve the burst partition config, falling back to a general-purpose
    /// default when the partition is not listed.
    pub fn cloud_partition(&self, name: &str) -> CloudPartition {
        self.cloud
            .partitions
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn local_rates(&self, partition: &str) -> LocalCostRates {
        self.local_costs
            .get(partition)
            .copied()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        AdvisorSettings::default().validate().unwrap();
    }

    #[test]
    fn test_unlisted_partition_gets_defaults() {
        let settings = AdvisorSettings::default();
        let partition = settings.cloud_partition("gpu-aws");
        assert_eq!(partition.instance_type, "m5.xlarge");
        assert_eq!(partition.max_nodes, 1000);
        let rates = settings.local_rates("cpu");
        assert!((rates.cost_per_cpu_hour - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_partition_rejected() {
        let mut settings = AdvisorSettings::default();
        settings.cloud.partitions.insert(
            "bad".to_string(),
            CloudPartition {
                instance_type: String::new(),
                region: None,
                max_nodes: 8,
            },
        );
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_yaml_round_trip() {
        let mut settings = AdvisorSettings::default();
        settings.cloud.partitions.insert(
            "gpu-aws".to_string(),
            CloudPartition {
                instance_type: "p3.8xlarge".to_string(),
                region: Some("us-west-2".to_string()),
                max_nodes: 64,
            },
        );
        let json = serde_json::to_string(&settings).unwrap();
        let back: AdvisorSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(
            back.cloud_partition("gpu-aws").instance_type,
            "p3.8xlarge"
        );
    }
}
