//! Execution plan document and research-domain classification types
//!
//! The plan JSON is a stable contract with the downstream executor: the key
//! names and enum spellings below are part of the interface, the synthesizer
//! is deterministic, and no extra keys are ever emitted. Plans that stay
//! local carry only metadata and reasoning.

use crate::error::{AdvisorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Closed set of research domains the classifier can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchDomain {
    ClimateModeling,
    MachineLearning,
    Bioinformatics,
    ComputationalPhysics,
    Unknown,
}

impl ResearchDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResearchDomain::ClimateModeling => "climate_modeling",
            ResearchDomain::MachineLearning => "machine_learning",
            ResearchDomain::Bioinformatics => "bioinformatics",
            ResearchDomain::ComputationalPhysics => "computational_physics",
            ResearchDomain::Unknown => "unknown",
        }
    }
}

/// MPI communication shape attached to a domain profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommunicationPattern {
    NearestNeighbor,
    AllReduce,
    EmbarrassinglyParallel,
    TightlyCoupled,
    Unknown,
}

/// Result of classifying one job against the domain rule tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainClassification {
    pub domain: ResearchDomain,
    pub confidence: f64,
    pub detection_methods: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchasingOption {
    #[serde(rename = "spot")]
    Spot,
    #[serde(rename = "on-demand")]
    OnDemand,
    #[serde(rename = "mixed")]
    Mixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlacementGroupType {
    Cluster,
    Partition,
    Spread,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LatencyClass {
    #[serde(rename = "ultra-low")]
    UltraLow,
    #[serde(rename = "low")]
    Low,
    #[serde(rename = "medium")]
    Medium,
    #[serde(rename = "high")]
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BandwidthClass {
    Low,
    Medium,
    High,
    VeryHigh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceModel {
    Linear,
    StrongScaling,
    WeakScaling,
}

/// Identification block present in every plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMetadata {
    pub job_name: String,
    pub script_path: String,
    pub script_hash: String,
    pub user: String,
    pub account: String,
    pub detected_domain: ResearchDomain,
    pub workload_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotConfig {
    pub enable_spot: bool,
    pub spot_fleet_request: bool,
    pub max_spot_price: f64,
    pub spot_interruption_tolerance: f64,
    pub fallback_to_on_demand: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub instance_types: Vec<String>,
    pub instance_count: u32,
    pub purchasing_option: PurchasingOption,
    pub max_spot_price: f64,
    pub placement_group: PlacementGroupType,
    pub availability_zones: Vec<String>,
    pub spot_instance_config: SpotConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MpiConfig {
    pub is_mpi_job: bool,
    pub process_count: u32,
    pub processes_per_node: u32,
    pub communication_pattern: CommunicationPattern,
    pub mpi_library: String,
    /// Opaque tuning keys passed through to the executor. BTreeMap keeps the
    /// serialized order deterministic.
    pub mpi_tuning_params: BTreeMap<String, String>,
    pub requires_gang_scheduling: bool,
    pub requires_efa: bool,
    pub efa_generation: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub placement_group_type: PlacementGroupType,
    pub enhanced_networking: bool,
    pub network_latency_class: LatencyClass,
    pub bandwidth_requirement: BandwidthClass,
    pub enable_efa: bool,
    pub enable_sr_iov: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostConstraints {
    pub max_total_cost: f64,
    pub max_duration_hours: f64,
    pub prefer_spot: bool,
    pub budget_account: String,
    pub cost_tolerance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceTarget {
    #[serde(with = "super::duration_secs")]
    pub expected_runtime: Duration,
    pub scaling_efficiency: f64,
    pub cpu_efficiency_target: f64,
    pub memory_efficiency_target: f64,
    pub performance_model: PerformanceModel,
}

/// Complete execution plan consumed by the downstream executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub should_burst: bool,
    pub asba_version: String,
    pub generated_at: DateTime<Utc>,
    pub job_metadata: JobMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_specification: Option<InstanceSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mpi_configuration: Option<MpiConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_configuration: Option<NetworkConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_constraints: Option<CostConstraints>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performance_target: Option<PerformanceTarget>,
    pub recommendation_reasoning: Vec<String>,
    pub confidence_level: f64,
    pub optimization_applied: Vec<String>,
}

impl ExecutionPlan {
    /// A burst plan must fully specify its instances, MPI shape and scaling
    /// target; local plans only need metadata and reasoning.
    pub fn validate(&self) -> Result<()> {
        if !self.should_burst {
            return Ok(());
        }

        let spec = self.instance_specification.as_ref().ok_or_else(|| {
            AdvisorError::validation(
                "ExecutionPlan::validate",
                "burst plan is missing its instance specification",
            )
        })?;
        if spec.instance_types.is_empty() {
            return Err(AdvisorError::validation(
                "ExecutionPlan::validate",
                "at least one instance type must be specified",
            ));
        }
        if spec.instance_count == 0 {
            return Err(AdvisorError::validation(
                "ExecutionPlan::validate",
                "instance count must be positive",
            ));
        }

        if let Some(mpi) = &self.mpi_configuration {
            if mpi.is_mpi_job {
                if mpi.process_count == 0 {
                    return Err(AdvisorError::validation(
                        "ExecutionPlan::validate",
                        "MPI process count must be positive",
                    ));
                }
                if mpi.processes_per_node == 0 {
                    return Err(AdvisorError::validation(
                        "ExecutionPlan::validate",
                        "processes per node must be positive",
                    ));
                }
            }
        }

        if let Some(cost) = &self.cost_constraints {
            if cost.max_total_cost < 0.0 {
                return Err(AdvisorError::validation(
                    "ExecutionPlan::validate",
                    format!("max total cost cannot be negative: {}", cost.max_total_cost),
                ));
            }
        }

        if let Some(target) = &self.performance_target {
            if !(0.0..=1.0).contains(&target.scaling_efficiency) {
                return Err(AdvisorError::validation(
                    "ExecutionPlan::validate",
                    format!(
                        "scaling efficiency must be between 0 and 1: {}",
                        target.scaling_efficiency
                    ),
                ));
            }
        }

        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            AdvisorError::analysis("ExecutionPlan::to_json", format!("serialization failed: {e}"))
        })
    }

    pub fn from_json(data: &str) -> Result<Self> {
        let plan: ExecutionPlan = serde_json::from_str(data).map_err(|e| {
            AdvisorError::validation(
                "ExecutionPlan::from_json",
                format!("malformed execution plan: {e}"),
            )
        })?;
        plan.validate()?;
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_plan() -> ExecutionPlan {
        ExecutionPlan {
            should_burst: false,
            asba_version: "0.4.2".to_string(),
            generated_at: Utc::now(),
            job_metadata: JobMetadata {
                job_name: "tool".to_string(),
                script_path: "/home/u/tool.sbatch".to_string(),
                script_hash: "deadbeef".to_string(),
                user: "u".to_string(),
                account: "NSF-ABC123".to_string(),
                detected_domain: ResearchDomain::Unknown,
                workload_type: "single-node".to_string(),
            },
            instance_specification: None,
            mpi_configuration: None,
            network_configuration: None,
            cost_constraints: None,
            performance_target: None,
            recommendation_reasoning: vec!["Local cluster is cheaper".to_string()],
            confidence_level: 0.4,
            optimization_applied: vec![],
        }
    }

    fn burst_plan() -> ExecutionPlan {
        let mut plan = local_plan();
        plan.should_burst = true;
        plan.instance_specification = Some(InstanceSpec {
            instance_types: vec!["c5.xlarge".to_string()],
            instance_count: 2,
            purchasing_option: PurchasingOption::Spot,
            max_spot_price: 0.0,
            placement_group: PlacementGroupType::Cluster,
            availability_zones: vec![],
            spot_instance_config: SpotConfig {
                enable_spot: true,
                spot_fleet_request: false,
                max_spot_price: 0.0,
                spot_interruption_tolerance: 0.05,
                fallback_to_on_demand: true,
            },
        });
        plan.mpi_configuration = Some(MpiConfig {
            is_mpi_job: true,
            process_count: 2,
            processes_per_node: 1,
            communication_pattern: CommunicationPattern::AllReduce,
            mpi_library: "NCCL".to_string(),
            mpi_tuning_params: BTreeMap::new(),
            requires_gang_scheduling: true,
            requires_efa: true,
            efa_generation: 2,
        });
        plan.network_configuration = Some(NetworkConfig {
            placement_group_type: PlacementGroupType::Cluster,
            enhanced_networking: true,
            network_latency_class: LatencyClass::UltraLow,
            bandwidth_requirement: BandwidthClass::VeryHigh,
            enable_efa: true,
            enable_sr_iov: true,
        });
        plan.cost_constraints = Some(CostConstraints {
            max_total_cost: 52.96,
            max_duration_hours: 4.0,
            prefer_spot: false,
            budget_account: "NSF-ABC123".to_string(),
            cost_tolerance: 0.1,
        });
        plan.performance_target = Some(PerformanceTarget {
            expected_runtime: Duration::from_secs(4 * 3600),
            scaling_efficiency: 0.8,
            cpu_efficiency_target: 75.0,
            memory_efficiency_target: 80.0,
            performance_model: PerformanceModel::Linear,
        });
        plan
    }

    #[test]
    fn test_local_plan_omits_sections() {
        let plan = local_plan();
        plan.validate().unwrap();
        let json = plan.to_json().unwrap();
        assert!(!json.contains("instance_specification"));
        assert!(!json.contains("mpi_configuration"));
        assert!(!json.contains("network_configuration"));
        assert!(json.contains("\"should_burst\": false"));
        assert!(json.contains("recommendation_reasoning"));
    }

    #[test]
    fn test_burst_plan_round_trip() {
        let plan = burst_plan();
        plan.validate().unwrap();
        let json = plan.to_json().unwrap();
        let back = ExecutionPlan::from_json(&json).unwrap();
        assert_eq!(plan, back);
    }

    #[test]
    fn test_burst_plan_requires_instances() {
        let mut plan = burst_plan();
        plan.instance_specification.as_mut().unwrap().instance_types.clear();
        assert!(plan.validate().is_err());

        let mut plan = burst_plan();
        plan.instance_specification = None;
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_mpi_constraints_enforced() {
        let mut plan = burst_plan();
        plan.mpi_configuration.as_mut().unwrap().process_count = 0;
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_scaling_efficiency_bounds() {
        let mut plan = burst_plan();
        plan.performance_target.as_mut().unwrap().scaling_efficiency = 1.3;
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_enum_spellings_are_contractual() {
        assert_eq!(
            serde_json::to_string(&PurchasingOption::OnDemand).unwrap(),
            r#""on-demand""#
        );
        assert_eq!(
            serde_json::to_string(&LatencyClass::UltraLow).unwrap(),
            r#""ultra-low""#
        );
        assert_eq!(
            serde_json::to_string(&BandwidthClass::VeryHigh).unwrap(),
            r#""very_high""#
        );
        assert_eq!(
            serde_json::to_string(&CommunicationPattern::AllReduce).unwrap(),
            r#""all_reduce""#
        );
        assert_eq!(
            serde_json::to_string(&ResearchDomain::MachineLearning).unwrap(),
            r#""machine_learning""#
        );
        assert_eq!(
            serde_json::to_string(&PerformanceModel::StrongScaling).unwrap(),
            r#""strong_scaling""#
        );
    }
}
