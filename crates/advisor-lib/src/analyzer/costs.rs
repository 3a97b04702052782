//! Cost models for the two venues
//!
//! Local clusters bill amortized CPU/node/GPU hourly rates with maintenance
//! and power factors; the cloud venue bills the effective instance rate plus
//! a flat data-transfer estimate and a fixed overhead fraction. Neither aims
//! for billing-grade fidelity; the decision engine only compares totals.

use crate::models::{CostBreakdown, JobRequest};
use crate::pricing::InstancePricing;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hourly rates for one local partition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalCostRates {
    pub cost_per_cpu_hour: f64,
    pub cost_per_node_hour: f64,
    pub cost_per_gpu_hour: f64,
    /// Multiplier covering staffing and hardware refresh, >= 1.
    pub maintenance_factor: f64,
    /// Multiplier covering power and cooling, >= 1.
    pub power_cost_factor: f64,
}

impl Default for LocalCostRates {
    fn default() -> Self {
        Self {
            cost_per_cpu_hour: 0.05,
            cost_per_node_hour: 0.10,
            cost_per_gpu_hour: 2.50,
            maintenance_factor: 1.3,
            power_cost_factor: 1.2,
        }
    }
}

/// Estimated cost of running the job on the local partition.
pub fn local_cost(rates: &LocalCostRates, job: &JobRequest) -> CostBreakdown {
    let runtime_hours = job.time_limit.as_secs_f64() / 3600.0;

    let cpu_cost =
        (job.nodes * job.cpus_per_task) as f64 * rates.cost_per_cpu_hour * runtime_hours;
    let node_cost = job.nodes as f64 * rates.cost_per_node_hour * runtime_hours;
    let gpu_cost = job.total_gpus() as f64 * rates.cost_per_gpu_hour * runtime_hours;

    let base = cpu_cost + gpu_cost + node_cost;
    let maintenance = base * (rates.maintenance_factor - 1.0);
    let power = base * (rates.power_cost_factor - 1.0);

    CostBreakdown {
        compute_cost: cpu_cost + gpu_cost,
        node_cost,
        overhead_cost: maintenance + power,
        data_transfer_cost: 0.0,
        storage_cost: 0.0,
        total_cost: base + maintenance + power,
    }
}

/// Per-node data transfer estimate: $0.09/GB at roughly 2 GB per node.
const DATA_TRANSFER_PER_NODE: f64 = 0.09 * 2.0;
/// Storage, image and networking overhead as a fraction of compute.
const CLOUD_OVERHEAD_FRACTION: f64 = 0.05;

/// Estimated cost of bursting the job to the cloud partition at the
/// pricing collaborator's current effective rate.
pub fn cloud_cost(job: &JobRequest, pricing: &InstancePricing, now: DateTime<Utc>) -> CostBreakdown {
    let runtime_hours = job.time_limit.as_secs_f64() / 3600.0;
    let hourly_rate = pricing.effective_price(now);

    let compute_cost = job.nodes as f64 * hourly_rate * runtime_hours;
    let data_transfer_cost = job.nodes as f64 * DATA_TRANSFER_PER_NODE;
    let overhead_cost = compute_cost * CLOUD_OVERHEAD_FRACTION;

    CostBreakdown {
        compute_cost,
        node_cost: 0.0,
        overhead_cost,
        data_transfer_cost,
        storage_cost: 0.0,
        total_cost: compute_cost + data_transfer_cost + overhead_cost,
    }
}
