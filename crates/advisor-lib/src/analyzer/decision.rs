//! Scored local-vs-cloud comparison
//!
//! Pure: two venue snapshots and a request in, a recommendation out. The
//! engine never fails; degraded inputs produce a low-confidence verdict with
//! an explanatory reason instead of an error.

use crate::models::{
    DecisionWeights, JobRequest, PartitionAnalysis, Recommendation, Venue,
};
use std::time::Duration;

/// Reference cost used to normalize cost scores into [0, 100]. A tunable
/// constant, not a percentile of live data.
const COST_SCORE_CAP: f64 = 100.0;

/// Flat availability score for the cloud venue.
const CLOUD_AVAILABILITY_SCORE: f64 = 90.0;

/// Neutral availability when a local partition reports no node counts.
const NEUTRAL_AVAILABILITY_SCORE: f64 = 50.0;

/// Time deltas below this magnitude are not worth a reasoning sentence.
const TIME_DELTA_FLOOR: Duration = Duration::from_secs(30 * 60);

/// Cost deltas below this magnitude are not worth a reasoning sentence.
const COST_DELTA_FLOOR: f64 = 5.0;

/// Queue depths above this get called out explicitly.
const HEAVY_QUEUE_DEPTH: u32 = 5;

pub struct DecisionEngine {
    weights: DecisionWeights,
}

impl DecisionEngine {
    pub fn new(weights: DecisionWeights) -> Self {
        Self { weights }
    }

    /// Compare the two venues and produce a recommendation. Ties break to
    /// local: the researcher already has those cycles.
    pub fn compare(
        &self,
        local: &PartitionAnalysis,
        cloud: &PartitionAnalysis,
        job: &JobRequest,
    ) -> Recommendation {
        // Wait dominates queue position; job duration cancels on both sides.
        let time_savings_secs =
            local.estimated_wait.as_secs() as i64 - cloud.startup.as_secs() as i64;
        let cost_difference = cloud.estimated_cost.total_cost - local.estimated_cost.total_cost;

        let local_score = self.score(local);
        let cloud_score = self.score(cloud);

        let preferred = if cloud_score > local_score {
            Venue::Cloud
        } else {
            Venue::Local
        };

        let confidence = ((cloud_score - local_score).abs() / 100.0).clamp(0.1, 1.0);
        let reasoning = self.reasoning(local, cloud, job, cost_difference, time_savings_secs);

        Recommendation {
            preferred,
            time_savings_secs,
            cost_difference,
            breakeven_secs: self.breakeven(cost_difference),
            confidence,
            reasoning,
            score: cloud_score - local_score,
        }
    }

    fn score(&self, analysis: &PartitionAnalysis) -> f64 {
        let wait_hours = analysis.estimated_wait.as_secs_f64() / 3600.0;
        let time_score = (100.0 - wait_hours * 10.0).max(0.0);

        let cost_score =
            (100.0 - analysis.estimated_cost.total_cost / COST_SCORE_CAP * 100.0).max(0.0);

        let avail_score = match analysis.venue {
            Venue::Cloud => CLOUD_AVAILABILITY_SCORE,
            Venue::Local if analysis.total_nodes > 0 => {
                analysis.available_nodes as f64 / analysis.total_nodes as f64 * 100.0
            }
            Venue::Local => NEUTRAL_AVAILABILITY_SCORE,
        };

        time_score * self.weights.time_weight
            + cost_score * self.weights.cost_weight
            + avail_score * self.weights.reliability_weight
    }

    /// Wait time at which the cloud premium equals the researcher-time value
    /// it buys. Only meaningful when the cloud both costs more and is faster.
    fn breakeven(&self, cost_difference: f64) -> Option<u64> {
        if cost_difference <= 0.0 || self.weights.time_value_per_hour <= 0.0 {
            return None;
        }
        let hours = cost_difference / self.weights.time_value_per_hour;
        Some((hours * 3600.0) as u64)
    }

    fn reasoning(
        &self,
        local: &PartitionAnalysis,
        cloud: &PartitionAnalysis,
        job: &JobRequest,
        cost_difference: f64,
        time_savings_secs: i64,
    ) -> Vec<String> {
        let mut reasons = Vec::new();

        let floor = TIME_DELTA_FLOOR.as_secs() as i64;
        if time_savings_secs > floor {
            reasons.push(format!(
                "Significant time savings: {} by bursting to {}",
                format_duration_secs(time_savings_secs as u64),
                cloud.name
            ));
        } else if time_savings_secs < -floor {
            reasons.push(format!(
                "Local cluster is faster by {}",
                format_duration_secs((-time_savings_secs) as u64)
            ));
        }

        let local_total = local.estimated_cost.total_cost;
        if cost_difference > COST_DELTA_FLOOR {
            let percent = if local_total > 0.0 {
                cost_difference / local_total * 100.0
            } else {
                100.0
            };
            reasons.push(format!(
                "Cloud costs ${cost_difference:.2} more ({percent:.1}% increase)"
            ));
        } else if cost_difference < -COST_DELTA_FLOOR {
            let percent = if local_total > 0.0 {
                -cost_difference / local_total * 100.0
            } else {
                100.0
            };
            reasons.push(format!(
                "Cloud costs ${:.2} less ({percent:.1}% savings)",
                -cost_difference
            ));
        }

        if local.queue_depth > HEAVY_QUEUE_DEPTH {
            reasons.push(format!(
                "Heavy queue load on local cluster ({} jobs ahead)",
                local.queue_depth
            ));
        }

        if job.has_gpus() {
            if let Some(instance_type) = &cloud.instance_type {
                reasons.push(format!(
                    "GPU job using {instance_type} instances on the burst partition"
                ));
            }
        }

        if reasons.is_empty() {
            reasons.push("Decision based on overall cost/time optimization".to_string());
        }

        reasons
    }
}

pub(crate) fn format_duration_secs(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    if hours > 0 {
        format!("{hours}h{minutes:02}m")
    } else {
        format!("{minutes}m")
    }
}
