//! Core data models for the burst advisor
//!
//! Every type validates itself; collaborators and engines exchange these by
//! value and never share mutable state.

mod analysis;
pub(crate) mod efficiency;
mod job;
mod plan;

pub use analysis::{
    Analysis, AnalysisMetadata, CostBreakdown, DecisionImpact, DecisionWeights,
    PartitionAnalysis, Recommendation, Venue,
};
pub use efficiency::{
    classify_workload, format_memory_mb, identify_bottleneck, parse_memory_string,
    parse_slurm_time, Bottleneck, JobEfficiencyData, JobPattern, WorkloadType,
};
pub use job::{BatchScript, JobRequest};
pub use plan::{
    BandwidthClass, CommunicationPattern, CostConstraints, DomainClassification, ExecutionPlan,
    InstanceSpec, JobMetadata, LatencyClass, MpiConfig, NetworkConfig, PerformanceModel,
    PerformanceTarget, PlacementGroupType, PurchasingOption, ResearchDomain, SpotConfig,
};

/// Serialize a `std::time::Duration` as whole seconds.
///
/// Wire contracts (the execution plan, the store) carry durations as integer
/// seconds; sub-second precision is meaningless for batch jobs.
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Serialize, Deserialize)]
    struct Wrapper {
        #[serde(with = "super::duration_secs")]
        value: Duration,
    }

    #[test]
    fn test_duration_seconds_round_trip() {
        let json = serde_json::to_string(&Wrapper {
            value: Duration::from_secs(5400),
        })
        .unwrap();
        assert_eq!(json, r#"{"value":5400}"#);
        let back: Wrapper = serde_json::from_str(&json).unwrap();
        assert_eq!(back.value, Duration::from_secs(5400));
    }
}
