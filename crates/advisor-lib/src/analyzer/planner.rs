//! Execution-plan synthesis
//!
//! Assembles the plan document from the enhanced analysis, the request and
//! the detected domain profile. Deterministic: the same inputs produce the
//! same plan, and an invalid plan is never returned.

use crate::analyzer::optimizer::EnhancedAnalysis;
use crate::domain::{profile_for, DomainProfile, LatencyRequirement};
use crate::error::Result;
use crate::models::{
    BandwidthClass, CostConstraints, DomainClassification, ExecutionPlan, InstanceSpec,
    JobMetadata, JobRequest, LatencyClass, MpiConfig, NetworkConfig, PerformanceModel,
    PerformanceTarget, PlacementGroupType, PurchasingOption, SpotConfig, WorkloadType,
};
use chrono::Utc;
use std::time::Duration;

/// Jobs below four hours ride spot capacity; longer ones buy stability.
const SPOT_TIME_CEILING: Duration = Duration::from_secs(4 * 3600);

/// Node count above which a medium-latency domain still benefits from EFA.
const EFA_NODE_THRESHOLD: u32 = 8;

/// Cloud cost buffer applied to the plan's spending cap.
const COST_CAP_BUFFER: f64 = 1.2;

/// Acceptable cost premium for performance, as a fraction.
const COST_TOLERANCE: f64 = 0.1;

pub struct ExecutionPlanner {
    version: String,
    user: String,
}

impl ExecutionPlanner {
    pub fn new(version: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            user: user.into(),
        }
    }

    /// Build and validate the plan for one analyzed job.
    pub fn generate(
        &self,
        analysis: &EnhancedAnalysis,
        job: &JobRequest,
        script_path: &str,
        script_hash: &str,
        domain: &DomainClassification,
    ) -> Result<ExecutionPlan> {
        let should_burst = analysis.current.recommendation.is_cloud_recommended();
        let recommendation = &analysis.current.recommendation;

        let mut plan = ExecutionPlan {
            should_burst,
            asba_version: self.version.clone(),
            generated_at: Utc::now(),
            job_metadata: JobMetadata {
                job_name: job.job_name.clone(),
                script_path: script_path.to_string(),
                script_hash: script_hash.to_string(),
                user: self.user.clone(),
                account: job.account.clone(),
                detected_domain: domain.domain,
                workload_type: shape_label(job).to_string(),
            },
            instance_specification: None,
            mpi_configuration: None,
            network_configuration: None,
            cost_constraints: None,
            performance_target: None,
            recommendation_reasoning: recommendation.reasoning.clone(),
            confidence_level: recommendation.confidence,
            optimization_applied: analysis
                .resource_optimizations
                .iter()
                .map(|opt| {
                    format!(
                        "{}: {} -> {}",
                        opt.change.label(),
                        opt.change.current_display(),
                        opt.change.suggested_display()
                    )
                })
                .collect(),
        };

        // Staying local: metadata and reasoning are the whole plan.
        if !should_burst {
            return Ok(plan);
        }

        let profile = profile_for(domain.domain);
        let mpi = self.mpi_configuration(job, profile);
        let network = self.network_configuration(job, profile, &mpi);

        plan.instance_specification = Some(self.instance_specification(analysis, job, &network));
        plan.cost_constraints = Some(self.cost_constraints(analysis, job));
        plan.performance_target = Some(self.performance_target(analysis, job));
        plan.mpi_configuration = Some(mpi);
        plan.network_configuration = Some(network);

        plan.validate()?;
        Ok(plan)
    }

    fn instance_specification(
        &self,
        analysis: &EnhancedAnalysis,
        job: &JobRequest,
        network: &NetworkConfig,
    ) -> InstanceSpec {
        // Prefer the history-derived family, then whatever the burst
        // partition is configured to run, then general purpose.
        let instance_types = if let Some(rec) = &analysis.instance_recommendation {
            vec![format!("{}.xlarge", rec.instance_family)]
        } else if let Some(instance_type) = &analysis.current.burst_partition.instance_type {
            vec![instance_type.clone()]
        } else {
            vec!["m5.xlarge".to_string()]
        };

        let purchasing_option = if job.time_limit < SPOT_TIME_CEILING {
            PurchasingOption::Spot
        } else {
            PurchasingOption::OnDemand
        };

        InstanceSpec {
            instance_types,
            instance_count: job.nodes,
            purchasing_option,
            max_spot_price: 0.0,
            placement_group: network.placement_group_type,
            availability_zones: Vec::new(),
            spot_instance_config: SpotConfig {
                enable_spot: purchasing_option == PurchasingOption::Spot,
                spot_fleet_request: false,
                max_spot_price: 0.0,
                spot_interruption_tolerance: 0.05,
                fallback_to_on_demand: true,
            },
        }
    }

    fn mpi_configuration(&self, job: &JobRequest, profile: &DomainProfile) -> MpiConfig {
        let is_mpi_job = job.nodes > 1 || (job.nodes > 1 && job.ntasks_per_node > 1);

        if !is_mpi_job {
            return MpiConfig {
                is_mpi_job: false,
                process_count: job.total_tasks(),
                processes_per_node: job.ntasks_per_node,
                communication_pattern: crate::models::CommunicationPattern::Unknown,
                mpi_library: "OpenMPI".to_string(),
                mpi_tuning_params: Default::default(),
                requires_gang_scheduling: false,
                requires_efa: false,
                efa_generation: 0,
            };
        }

        let requires_efa = profile.requires_efa;
        MpiConfig {
            is_mpi_job: true,
            process_count: job.total_tasks(),
            processes_per_node: job.ntasks_per_node,
            communication_pattern: profile.communication_pattern,
            mpi_library: profile.preferred_mpi_library.to_string(),
            mpi_tuning_params: profile.tuning_params(),
            requires_gang_scheduling: profile.requires_gang_scheduling,
            requires_efa,
            efa_generation: if requires_efa { 2 } else { 0 },
        }
    }

    fn network_configuration(
        &self,
        job: &JobRequest,
        profile: &DomainProfile,
        mpi: &MpiConfig,
    ) -> NetworkConfig {
        if !mpi.is_mpi_job {
            return NetworkConfig {
                placement_group_type: PlacementGroupType::Spread,
                enhanced_networking: true,
                network_latency_class: LatencyClass::Medium,
                bandwidth_requirement: BandwidthClass::Low,
                enable_efa: false,
                enable_sr_iov: false,
            };
        }

        let requirements = profile.communication_requirements();
        let (latency_class, enable_efa, placement) = match requirements.latency {
            LatencyRequirement::UltraLow => {
                (LatencyClass::UltraLow, true, PlacementGroupType::Cluster)
            }
            LatencyRequirement::Low => (LatencyClass::Low, true, PlacementGroupType::Cluster),
            LatencyRequirement::Medium => (
                LatencyClass::Medium,
                job.nodes > EFA_NODE_THRESHOLD,
                PlacementGroupType::Cluster,
            ),
            LatencyRequirement::High => (LatencyClass::High, false, PlacementGroupType::Spread),
        };

        NetworkConfig {
            placement_group_type: placement,
            enhanced_networking: true,
            network_latency_class: latency_class,
            bandwidth_requirement: requirements.bandwidth,
            enable_efa,
            enable_sr_iov: enable_efa || requirements.bandwidth == BandwidthClass::VeryHigh,
        }
    }

    fn cost_constraints(&self, analysis: &EnhancedAnalysis, job: &JobRequest) -> CostConstraints {
        let cloud_total = analysis
            .current
            .burst_partition
            .estimated_cost
            .total_cost;

        CostConstraints {
            max_total_cost: cloud_total * COST_CAP_BUFFER,
            max_duration_hours: job.time_limit.as_secs_f64() / 3600.0,
            prefer_spot: job.time_limit < SPOT_TIME_CEILING,
            budget_account: job.account.clone(),
            cost_tolerance: COST_TOLERANCE,
        }
    }

    fn performance_target(&self, analysis: &EnhancedAnalysis, job: &JobRequest) -> PerformanceTarget {
        let mut target = PerformanceTarget {
            expected_runtime: job.time_limit,
            scaling_efficiency: 0.8,
            cpu_efficiency_target: 75.0,
            memory_efficiency_target: 80.0,
            performance_model: PerformanceModel::Linear,
        };

        let pattern = analysis
            .history_insights
            .as_ref()
            .and_then(|insights| insights.pattern.as_ref());
        if let Some(pattern) = pattern {
            target.expected_runtime = pattern.avg_runtime;
            target.cpu_efficiency_target = pattern.avg_cpu_efficiency;
            target.memory_efficiency_target = pattern.avg_memory_efficiency;

            match pattern.workload_type {
                WorkloadType::CpuBound => {
                    target.performance_model = PerformanceModel::StrongScaling;
                    target.scaling_efficiency = 0.85;
                }
                WorkloadType::MemoryBound => {
                    target.performance_model = PerformanceModel::WeakScaling;
                    target.scaling_efficiency = 0.7;
                }
                _ => {
                    target.performance_model = PerformanceModel::Linear;
                    target.scaling_efficiency = 0.8;
                }
            }
        }

        target
    }
}

/// Coarse shape label for the plan metadata.
fn shape_label(job: &JobRequest) -> &'static str {
    if job.has_gpus() {
        "gpu-bound"
    } else if job.nodes > 4 {
        "distributed"
    } else {
        "single-node"
    }
}

/// Write a plan to disk as pretty-printed JSON.
pub fn save_plan(plan: &ExecutionPlan, path: &std::path::Path) -> Result<()> {
    let json = plan.to_json()?;
    std::fs::write(path, json).map_err(|e| crate::error::AdvisorError::Permission {
        operation: "save_plan".to_string(),
        message: format!("failed to write {}", path.display()),
        source: Some(e),
    })
}

/// Read and validate a plan from disk.
pub fn load_plan(path: &std::path::Path) -> Result<ExecutionPlan> {
    let data = std::fs::read_to_string(path).map_err(|e| crate::error::AdvisorError::Permission {
        operation: "load_plan".to_string(),
        message: format!("failed to read {}", path.display()),
        source: Some(e),
    })?;
    ExecutionPlan::from_json(&data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::HistoryAnalyzer;
    use crate::models::{
        CommunicationPattern, CostBreakdown, DecisionWeights, PartitionAnalysis, ResearchDomain,
        Venue,
    };
    use std::collections::HashMap;

    fn partitions(local_cost: f64, cloud_cost: f64, wait_secs: u64) -> (PartitionAnalysis, PartitionAnalysis) {
        let local = PartitionAnalysis {
            name: "cpu".to_string(),
            venue: Venue::Local,
            queue_depth: 8,
            estimated_wait: Duration::from_secs(wait_secs),
            startup: Duration::ZERO,
            available_nodes: 4,
            total_nodes: 16,
            estimated_cost: CostBreakdown {
                total_cost: local_cost,
                ..Default::default()
            },
            instance_type: None,
            current_price: None,
        };
        let cloud = PartitionAnalysis {
            name: "gpu-aws".to_string(),
            venue: Venue::Cloud,
            queue_depth: 0,
            estimated_wait: Duration::ZERO,
            startup: Duration::from_secs(180),
            available_nodes: 1000,
            total_nodes: 1000,
            estimated_cost: CostBreakdown {
                total_cost: cloud_cost,
                ..Default::default()
            },
            instance_type: Some("p3dn.24xlarge".to_string()),
            current_price: Some(9.8),
        };
        (local, cloud)
    }

    fn ml_job() -> JobRequest {
        JobRequest {
            job_name: "train-resnet".to_string(),
            nodes: 2,
            ntasks_per_node: 1,
            cpus_per_task: 16,
            time_limit: Duration::from_secs(4 * 3600),
            memory: "64G".to_string(),
            tres: HashMap::from([("gpu".to_string(), 4)]),
            account: "NSF-ABC123".to_string(),
            ..Default::default()
        }
    }

    fn analyzed(job: &JobRequest, local_cost: f64, cloud_cost: f64, wait_secs: u64) -> EnhancedAnalysis {
        let (local, cloud) = partitions(local_cost, cloud_cost, wait_secs);
        HistoryAnalyzer::new(DecisionWeights::default(), "test")
            .analyze_with_history(&local, &cloud, job, "", None)
    }

    fn classification(domain: ResearchDomain, confidence: f64) -> DomainClassification {
        DomainClassification {
            domain,
            confidence,
            detection_methods: vec!["script_analysis".to_string()],
        }
    }

    fn planner() -> ExecutionPlanner {
        ExecutionPlanner::new("0.4.2", "alice")
    }

    #[test]
    fn test_ml_all_reduce_plan() {
        let job = ml_job();
        // Long local wait and cheaper cloud: burst wins.
        let analysis = analyzed(&job, 52.0, 44.13, 9900);
        assert!(analysis.current.recommendation.is_cloud_recommended());

        let plan = planner()
            .generate(
                &analysis,
                &job,
                "/home/alice/train.sbatch",
                "deadbeef",
                &classification(ResearchDomain::MachineLearning, 0.6),
            )
            .unwrap();

        assert!(plan.should_burst);

        let mpi = plan.mpi_configuration.as_ref().unwrap();
        assert!(mpi.is_mpi_job);
        assert_eq!(mpi.process_count, 2);
        assert_eq!(mpi.processes_per_node, 1);
        assert_eq!(mpi.mpi_library, "NCCL");
        assert_eq!(mpi.communication_pattern, CommunicationPattern::AllReduce);
        assert!(mpi.requires_efa);
        assert_eq!(mpi.efa_generation, 2);

        let network = plan.network_configuration.as_ref().unwrap();
        assert_eq!(network.placement_group_type, PlacementGroupType::Cluster);
        assert_eq!(network.network_latency_class, LatencyClass::Low);
        assert_eq!(network.bandwidth_requirement, BandwidthClass::VeryHigh);
        assert!(network.enable_efa);
        assert!(network.enable_sr_iov);

        // Exactly four hours is not strictly under the spot ceiling.
        let spec = plan.instance_specification.as_ref().unwrap();
        assert_eq!(spec.purchasing_option, PurchasingOption::OnDemand);
        assert!(!spec.spot_instance_config.enable_spot);
        assert!(spec.spot_instance_config.fallback_to_on_demand);
        assert_eq!(spec.instance_count, 2);
        assert_eq!(spec.instance_types, vec!["p3dn.24xlarge".to_string()]);

        let cost = plan.cost_constraints.as_ref().unwrap();
        assert!((cost.max_total_cost - 44.13 * 1.2).abs() < 1e-9);
        assert!(!cost.prefer_spot);
        assert_eq!(cost.budget_account, "NSF-ABC123");

        plan.validate().unwrap();
    }

    #[test]
    fn test_short_job_prefers_spot() {
        let mut job = ml_job();
        job.time_limit = Duration::from_secs(2 * 3600);
        let analysis = analyzed(&job, 52.0, 20.0, 9900);

        let plan = planner()
            .generate(
                &analysis,
                &job,
                "script.sbatch",
                "hash",
                &classification(ResearchDomain::MachineLearning, 0.6),
            )
            .unwrap();

        let spec = plan.instance_specification.as_ref().unwrap();
        assert_eq!(spec.purchasing_option, PurchasingOption::Spot);
        assert!(spec.spot_instance_config.enable_spot);
        assert!(plan.cost_constraints.as_ref().unwrap().prefer_spot);
    }

    #[test]
    fn test_local_plan_has_no_cloud_sections() {
        let mut job = ml_job();
        job.tres.clear();
        job.nodes = 1;
        job.cpus_per_task = 4;
        job.time_limit = Duration::from_secs(3600);
        job.memory = "8G".to_string();

        // Idle local cluster, cheap local run: stay local.
        let (mut local, cloud) = partitions(1.20, 4.50, 0);
        local.queue_depth = 0;
        local.available_nodes = 16;
        let analysis = HistoryAnalyzer::new(DecisionWeights::default(), "test")
            .analyze_with_history(&local, &cloud, &job, "", None);
        assert!(!analysis.current.recommendation.is_cloud_recommended());

        let plan = planner()
            .generate(
                &analysis,
                &job,
                "tool.sbatch",
                "",
                &classification(ResearchDomain::Unknown, 0.0),
            )
            .unwrap();

        assert!(!plan.should_burst);
        assert!(plan.instance_specification.is_none());
        assert!(plan.mpi_configuration.is_none());
        assert!(plan.network_configuration.is_none());
        assert!(plan.cost_constraints.is_none());
        assert!(plan.performance_target.is_none());
        assert!(!plan.recommendation_reasoning.is_empty());

        let json = plan.to_json().unwrap();
        let round_trip = ExecutionPlan::from_json(&json).unwrap();
        assert_eq!(plan, round_trip);
    }

    #[test]
    fn test_bioinformatics_spreads_without_efa() {
        let mut job = ml_job();
        job.tres.clear();
        job.nodes = 4;
        let analysis = analyzed(&job, 52.0, 20.0, 9900);

        let plan = planner()
            .generate(
                &analysis,
                &job,
                "align.sbatch",
                "hash",
                &classification(ResearchDomain::Bioinformatics, 0.8),
            )
            .unwrap();

        let network = plan.network_configuration.as_ref().unwrap();
        assert_eq!(network.placement_group_type, PlacementGroupType::Spread);
        assert!(!network.enable_efa);
        assert!(!network.enable_sr_iov);
        assert_eq!(network.network_latency_class, LatencyClass::High);

        let mpi = plan.mpi_configuration.as_ref().unwrap();
        assert!(!mpi.requires_gang_scheduling);
        assert_eq!(mpi.mpi_library, "OpenMPI");
    }

    #[test]
    fn test_unknown_domain_medium_latency_efa_by_node_count() {
        let mut job = ml_job();
        job.tres.clear();
        job.nodes = 16;
        let analysis = analyzed(&job, 52.0, 20.0, 9900);

        let plan = planner()
            .generate(
                &analysis,
                &job,
                "big.sbatch",
                "hash",
                &classification(ResearchDomain::Unknown, 0.0),
            )
            .unwrap();

        // Unknown profile is medium latency; 16 nodes crosses the EFA bar.
        let network = plan.network_configuration.as_ref().unwrap();
        assert_eq!(network.network_latency_class, LatencyClass::Medium);
        assert!(network.enable_efa);
        assert_eq!(network.placement_group_type, PlacementGroupType::Cluster);
    }

    #[test]
    fn test_single_node_burst_is_not_mpi() {
        let mut job = ml_job();
        job.nodes = 1;
        job.time_limit = Duration::from_secs(3600);
        let analysis = analyzed(&job, 52.0, 10.0, 9900);

        let plan = planner()
            .generate(
                &analysis,
                &job,
                "one.sbatch",
                "hash",
                &classification(ResearchDomain::MachineLearning, 0.6),
            )
            .unwrap();

        let mpi = plan.mpi_configuration.as_ref().unwrap();
        assert!(!mpi.is_mpi_job);
        let network = plan.network_configuration.as_ref().unwrap();
        assert_eq!(network.placement_group_type, PlacementGroupType::Spread);
        assert_eq!(network.bandwidth_requirement, BandwidthClass::Low);
    }

    #[test]
    fn test_performance_target_defaults_without_history() {
        let job = ml_job();
        let analysis = analyzed(&job, 52.0, 44.13, 9900);
        let plan = planner()
            .generate(
                &analysis,
                &job,
                "train.sbatch",
                "hash",
                &classification(ResearchDomain::MachineLearning, 0.6),
            )
            .unwrap();

        let target = plan.performance_target.as_ref().unwrap();
        assert_eq!(target.expected_runtime, job.time_limit);
        assert_eq!(target.performance_model, PerformanceModel::Linear);
        assert!((target.scaling_efficiency - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_determinism_modulo_timestamp() {
        let job = ml_job();
        let analysis = analyzed(&job, 52.0, 44.13, 9900);
        let class = classification(ResearchDomain::MachineLearning, 0.6);

        let mut first = planner()
            .generate(&analysis, &job, "a.sbatch", "h", &class)
            .unwrap();
        let mut second = planner()
            .generate(&analysis, &job, "a.sbatch", "h", &class)
            .unwrap();
        second.generated_at = first.generated_at;
        first.generated_at = second.generated_at;
        assert_eq!(first, second);
    }
}
