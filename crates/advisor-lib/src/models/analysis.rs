//! Venue snapshots, cost breakdowns and recommendation types

use crate::error::{AdvisorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::JobRequest;

/// A candidate execution location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Local,
    Cloud,
}

impl std::fmt::Display for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Venue::Local => write!(f, "local"),
            Venue::Cloud => write!(f, "cloud"),
        }
    }
}

/// Detailed cost estimate. Components a venue does not bill stay zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub compute_cost: f64,
    pub node_cost: f64,
    pub overhead_cost: f64,
    pub data_transfer_cost: f64,
    pub storage_cost: f64,
    pub total_cost: f64,
}

impl CostBreakdown {
    /// Rejects negative components; derives the total from the components
    /// when it was left at zero.
    pub fn validate(&mut self) -> Result<()> {
        for (name, value) in [
            ("compute_cost", self.compute_cost),
            ("node_cost", self.node_cost),
            ("overhead_cost", self.overhead_cost),
            ("data_transfer_cost", self.data_transfer_cost),
            ("storage_cost", self.storage_cost),
            ("total_cost", self.total_cost),
        ] {
            if value < 0.0 {
                return Err(AdvisorError::validation(
                    "CostBreakdown::validate",
                    format!("{name} cannot be negative: {value}"),
                ));
            }
        }

        let component_sum = self.compute_cost
            + self.node_cost
            + self.overhead_cost
            + self.data_transfer_cost
            + self.storage_cost;
        if component_sum > 0.0 && self.total_cost == 0.0 {
            self.total_cost = component_sum;
        }

        Ok(())
    }

    pub fn cost_per_hour(&self, duration: Duration) -> f64 {
        let hours = duration.as_secs_f64() / 3600.0;
        if hours <= 0.0 {
            return self.total_cost;
        }
        self.total_cost / hours
    }
}

/// Snapshot of one venue at decision time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionAnalysis {
    pub name: String,
    #[serde(rename = "type")]
    pub venue: Venue,
    pub queue_depth: u32,
    #[serde(with = "super::duration_secs")]
    pub estimated_wait: Duration,
    #[serde(with = "super::duration_secs")]
    pub startup: Duration,
    pub available_nodes: u32,
    pub total_nodes: u32,
    pub estimated_cost: CostBreakdown,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_price: Option<f64>,
}

impl PartitionAnalysis {
    /// Total time to completion for a job of the given duration on this venue.
    pub fn total_execution_time(&self, job_duration: Duration) -> Duration {
        self.estimated_wait + self.startup + job_duration
    }

    pub fn utilization_rate(&self) -> f64 {
        if self.total_nodes == 0 {
            return 0.0;
        }
        (self.total_nodes - self.available_nodes) as f64 / self.total_nodes as f64
    }

    pub fn validate(&mut self) -> Result<()> {
        if self.name.is_empty() {
            return Err(AdvisorError::validation(
                "PartitionAnalysis::validate",
                "partition name cannot be empty",
            ));
        }
        if self.available_nodes > self.total_nodes {
            return Err(AdvisorError::validation(
                "PartitionAnalysis::validate",
                format!(
                    "available_nodes ({}) cannot exceed total_nodes ({})",
                    self.available_nodes, self.total_nodes
                ),
            ));
        }
        self.estimated_cost.validate()
    }
}

/// Weights for the scored comparison. Each weight lies in [0, 1];
/// `time_value_per_hour` only affects reporting (the break-even line).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionWeights {
    pub cost_weight: f64,
    pub time_weight: f64,
    pub reliability_weight: f64,
    pub time_value_per_hour: f64,
}

impl Default for DecisionWeights {
    fn default() -> Self {
        Self {
            cost_weight: 0.3,
            time_weight: 0.7,
            reliability_weight: 0.1,
            time_value_per_hour: 50.0,
        }
    }
}

impl DecisionWeights {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("cost_weight", self.cost_weight),
            ("time_weight", self.time_weight),
            ("reliability_weight", self.reliability_weight),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(AdvisorError::validation(
                    "DecisionWeights::validate",
                    format!("{name} must be between 0 and 1, got {value}"),
                ));
            }
        }
        if !(0.0..=10_000.0).contains(&self.time_value_per_hour) {
            return Err(AdvisorError::validation(
                "DecisionWeights::validate",
                format!(
                    "time_value_per_hour must be between 0 and 10000, got {}",
                    self.time_value_per_hour
                ),
            ));
        }
        Ok(())
    }
}

/// The decision engine's verdict for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub preferred: Venue,
    /// Positive when the cloud venue finishes sooner, in whole seconds.
    pub time_savings_secs: i64,
    /// Positive when the cloud venue costs more.
    pub cost_difference: f64,
    /// Wait time beyond which the cloud premium pays for itself, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakeven_secs: Option<u64>,
    pub confidence: f64,
    pub reasoning: Vec<String>,
    /// Cloud score minus local score.
    pub score: f64,
}

impl Recommendation {
    pub fn is_cloud_recommended(&self) -> bool {
        self.preferred == Venue::Cloud
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(AdvisorError::validation(
                "Recommendation::validate",
                format!("confidence must be between 0 and 1, got {}", self.confidence),
            ));
        }
        if self.reasoning.is_empty() {
            return Err(AdvisorError::validation(
                "Recommendation::validate",
                "at least one reasoning point must be provided",
            ));
        }
        Ok(())
    }
}

/// Complete result of one advisory invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub target_partition: PartitionAnalysis,
    pub burst_partition: PartitionAnalysis,
    pub recommendation: Recommendation,
    pub timestamp: DateTime<Utc>,
    pub job_request: JobRequest,
    #[serde(default)]
    pub metadata: AnalysisMetadata,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    pub version: String,
    pub data_sources: Vec<String>,
    pub warnings: Vec<String>,
}

impl Analysis {
    pub fn validate(&mut self) -> Result<()> {
        self.target_partition.validate()?;
        self.burst_partition.validate()?;
        self.recommendation.validate()?;
        self.job_request.validate()
    }
}

/// How re-planning with right-sized resources changed the decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionImpact {
    pub original_recommendation: Venue,
    pub optimized_recommendation: Venue,
    pub decision_changed: bool,
    pub impact_description: String,
    pub cost_difference_change: f64,
    pub time_difference_change_secs: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_total_derived_from_components() {
        let mut cost = CostBreakdown {
            compute_cost: 10.0,
            node_cost: 2.5,
            overhead_cost: 1.5,
            ..Default::default()
        };
        cost.validate().unwrap();
        assert!((cost.total_cost - 14.0).abs() < 1e-9);
    }

    #[test]
    fn test_cost_total_kept_when_nonzero() {
        // Components may miss categories the venue does not bill.
        let mut cost = CostBreakdown {
            compute_cost: 10.0,
            total_cost: 12.0,
            ..Default::default()
        };
        cost.validate().unwrap();
        assert!((cost.total_cost - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_cost_rejects_negative_component() {
        let mut cost = CostBreakdown {
            compute_cost: -1.0,
            ..Default::default()
        };
        assert!(cost.validate().is_err());
    }

    #[test]
    fn test_partition_rejects_available_above_total() {
        let mut analysis = PartitionAnalysis {
            name: "cpu".to_string(),
            venue: Venue::Local,
            queue_depth: 0,
            estimated_wait: Duration::ZERO,
            startup: Duration::ZERO,
            available_nodes: 20,
            total_nodes: 16,
            estimated_cost: CostBreakdown::default(),
            instance_type: None,
            current_price: None,
        };
        assert!(analysis.validate().is_err());
    }

    #[test]
    fn test_total_execution_time_sums_wait_startup_and_job() {
        let analysis = PartitionAnalysis {
            name: "gpu-cloud".to_string(),
            venue: Venue::Cloud,
            queue_depth: 0,
            estimated_wait: Duration::from_secs(60),
            startup: Duration::from_secs(180),
            available_nodes: 1000,
            total_nodes: 1000,
            estimated_cost: CostBreakdown::default(),
            instance_type: Some("p3.8xlarge".to_string()),
            current_price: Some(4.1),
        };
        assert_eq!(
            analysis.total_execution_time(Duration::from_secs(3600)),
            Duration::from_secs(3840)
        );
    }

    #[test]
    fn test_weights_validation_bounds() {
        DecisionWeights::default().validate().unwrap();
        let bad = DecisionWeights {
            cost_weight: 1.5,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_recommendation_requires_reasoning() {
        let rec = Recommendation {
            preferred: Venue::Local,
            time_savings_secs: 0,
            cost_difference: 0.0,
            breakeven_secs: None,
            confidence: 0.5,
            reasoning: vec![],
            score: 0.0,
        };
        assert!(rec.validate().is_err());
    }

    #[test]
    fn test_venue_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Venue::Cloud).unwrap(), r#""cloud""#);
        assert_eq!(serde_json::to_string(&Venue::Local).unwrap(), r#""local""#);
    }
}
