//! History-aware re-planning
//!
//! Aggregates similar past runs, proposes right-sized memory/CPU/time
//! requests, applies them to a clone of the request and re-scores the
//! decision. Every sub-step degrades silently: whatever happens, the caller
//! gets the baseline decision back.

use crate::analyzer::decision::format_duration_secs as format_hours;
use crate::analyzer::DecisionEngine;
use crate::history::JobHistoryStore;
use crate::models::{
    format_memory_mb, Analysis, AnalysisMetadata, DecisionImpact, DecisionWeights,
    JobEfficiencyData, JobPattern, JobRequest, PartitionAnalysis,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Below this many successful similar runs no optimization is attempted.
const MIN_SIMILAR_RUNS: usize = 2;

/// Memory suggestions keep a 25% buffer above observed peak usage.
const MEMORY_BUFFER: f64 = 1.25;
/// CPU suggestions keep a 20% buffer above observed effective cores.
const CPU_BUFFER: f64 = 1.2;
/// Time-limit suggestions keep a 30% buffer above observed runtime.
const TIME_BUFFER: f64 = 1.3;

/// Efficiency ceilings that trigger each optimization.
const MEMORY_EFF_THRESHOLD: f64 = 70.0;
const CPU_EFF_THRESHOLD: f64 = 60.0;
const TIME_EFF_THRESHOLD: f64 = 60.0;

/// Mean efficiency shift between run halves that counts as a trend.
const TREND_THRESHOLD: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// One concrete right-sizing proposal, typed by resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "resource", rename_all = "lowercase")]
pub enum ResourceChange {
    Memory { current_mb: i64, suggested_mb: i64 },
    Cpu { current_per_task: u32, suggested_per_task: u32 },
    Time { current_secs: u64, suggested_secs: u64 },
}

impl ResourceChange {
    pub fn current_display(&self) -> String {
        match self {
            ResourceChange::Memory { current_mb, .. } => format_memory_mb(*current_mb),
            ResourceChange::Cpu { current_per_task, .. } => current_per_task.to_string(),
            ResourceChange::Time { current_secs, .. } => format_hours(*current_secs),
        }
    }

    pub fn suggested_display(&self) -> String {
        match self {
            ResourceChange::Memory { suggested_mb, .. } => format_memory_mb(*suggested_mb),
            ResourceChange::Cpu { suggested_per_task, .. } => suggested_per_task.to_string(),
            ResourceChange::Time { suggested_secs, .. } => format_hours(*suggested_secs),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ResourceChange::Memory { .. } => "memory",
            ResourceChange::Cpu { .. } => "cpu",
            ResourceChange::Time { .. } => "time",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceOptimization {
    #[serde(flatten)]
    pub change: ResourceChange,
    pub reasoning: String,
    pub confidence_level: f64,
    pub risk_level: RiskLevel,
}

/// Exactly one instance-family recommendation per analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecommendation {
    pub instance_family: String,
    pub gb_per_vcpu: f64,
    pub reasoning: String,
    pub cost_impact: String,
    pub performance_impact: String,
    pub confidence_level: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Trend {
    Improving,
    Declining,
    Stable,
    InsufficientData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EfficiencyTrends {
    pub cpu_trend: Trend,
    pub memory_trend: Trend,
    pub time_trend: Trend,
    pub cpu_efficiency_avg: f64,
    pub memory_efficiency_avg: f64,
    pub time_efficiency_avg: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryInsights {
    pub similar_jobs_found: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<JobPattern>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trends: Option<EfficiencyTrends>,
    pub confidence: f64,
}

/// Baseline analysis plus everything history added to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhancedAnalysis {
    pub current: Analysis,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimized: Option<Analysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_insights: Option<HistoryInsights>,
    pub resource_optimizations: Vec<ResourceOptimization>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_recommendation: Option<InstanceRecommendation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_impact: Option<DecisionImpact>,
}

pub struct HistoryAnalyzer {
    engine: DecisionEngine,
    version: String,
}

impl HistoryAnalyzer {
    pub fn new(weights: DecisionWeights, version: impl Into<String>) -> Self {
        Self {
            engine: DecisionEngine::new(weights),
            version: version.into(),
        }
    }

    pub fn engine(&self) -> &DecisionEngine {
        &self.engine
    }

    /// Baseline decision, then the optional history pass. A missing store or
    /// any store failure leaves the baseline untouched.
    pub fn analyze_with_history(
        &self,
        local: &PartitionAnalysis,
        cloud: &PartitionAnalysis,
        job: &JobRequest,
        script_fingerprint: &str,
        store: Option<&JobHistoryStore>,
    ) -> EnhancedAnalysis {
        let recommendation = self.engine.compare(local, cloud, job);
        let current = Analysis {
            target_partition: local.clone(),
            burst_partition: cloud.clone(),
            recommendation,
            timestamp: Utc::now(),
            job_request: job.clone(),
            metadata: AnalysisMetadata {
                version: self.version.clone(),
                ..Default::default()
            },
        };

        let mut enhanced = EnhancedAnalysis {
            current,
            optimized: None,
            history_insights: None,
            resource_optimizations: Vec::new(),
            instance_recommendation: None,
            decision_impact: None,
        };

        let Some(store) = store else {
            return enhanced;
        };

        let similar = match store.find_similar(script_fingerprint, job) {
            Ok(similar) => similar,
            Err(e) => {
                warn!(error = %e, "history lookup failed, keeping baseline analysis");
                return enhanced;
            }
        };

        // The store only returns successful runs; two is the floor for any
        // statistics worth acting on.
        if similar.len() < MIN_SIMILAR_RUNS {
            enhanced.history_insights = Some(HistoryInsights {
                similar_jobs_found: similar.len(),
                pattern: None,
                trends: None,
                confidence: 0.0,
            });
            return enhanced;
        }

        let stats = RunStats::from_runs(&similar);
        debug!(
            runs = similar.len(),
            cpu_eff = stats.cpu_eff,
            mem_eff = stats.mem_eff,
            time_eff = stats.time_eff,
            "aggregated similar runs"
        );

        enhanced.history_insights = Some(HistoryInsights {
            similar_jobs_found: similar.len(),
            pattern: generate_pattern(&similar),
            trends: Some(calculate_trends(&similar, &stats)),
            confidence: stats.insight_confidence(),
        });

        enhanced.resource_optimizations = self.resource_optimizations(job, &stats);
        enhanced.instance_recommendation = Some(recommend_instance_family(&stats));

        if !enhanced.resource_optimizations.is_empty() {
            let optimized_job = apply_optimizations(job, &enhanced.resource_optimizations);
            let optimized_rec = self.engine.compare(local, cloud, &optimized_job);

            enhanced.decision_impact = Some(decision_impact(
                &enhanced.current.recommendation,
                &optimized_rec,
            ));
            enhanced.optimized = Some(Analysis {
                target_partition: local.clone(),
                burst_partition: cloud.clone(),
                recommendation: optimized_rec,
                timestamp: Utc::now(),
                job_request: optimized_job,
                metadata: AnalysisMetadata {
                    version: self.version.clone(),
                    data_sources: vec!["job_history".to_string()],
                    ..Default::default()
                },
            });
        }

        enhanced
    }

    fn resource_optimizations(
        &self,
        job: &JobRequest,
        stats: &RunStats,
    ) -> Vec<ResourceOptimization> {
        let mut optimizations = Vec::new();

        if stats.mem_eff < MEMORY_EFF_THRESHOLD {
            if let Some(current_mb) = job.memory_mb() {
                let suggested_mb = (stats.max_rss_gb * MEMORY_BUFFER * 1024.0) as i64;
                if suggested_mb > 0 && suggested_mb < current_mb {
                    optimizations.push(ResourceOptimization {
                        change: ResourceChange::Memory {
                            current_mb,
                            suggested_mb,
                        },
                        reasoning: format!(
                            "Your average usage: {:.1}GB ({:.0}% efficiency)",
                            stats.max_rss_gb, stats.mem_eff
                        ),
                        confidence_level: optimization_confidence(stats.mem_eff, stats.count),
                        risk_level: optimization_risk(stats.mem_eff, stats.count),
                    });
                }
            }
        }

        if stats.cpu_eff < CPU_EFF_THRESHOLD {
            let effective = job.total_cpus() as f64 * stats.cpu_eff / 100.0;
            let suggested_per_task =
                ((effective * CPU_BUFFER / job.nodes as f64).floor() as u32).max(1);
            if suggested_per_task < job.cpus_per_task {
                optimizations.push(ResourceOptimization {
                    change: ResourceChange::Cpu {
                        current_per_task: job.cpus_per_task,
                        suggested_per_task,
                    },
                    reasoning: format!(
                        "Your average CPU efficiency: {:.0}% ({:.1} effective cores)",
                        stats.cpu_eff, effective
                    ),
                    confidence_level: optimization_confidence(stats.cpu_eff, stats.count),
                    risk_level: optimization_risk(stats.cpu_eff, stats.count),
                });
            }
        }

        if stats.time_eff < TIME_EFF_THRESHOLD {
            let suggested_hours = (stats.elapsed_hours * TIME_BUFFER).round().max(1.0) as u64;
            let suggested_secs = suggested_hours * 3600;
            if suggested_secs < job.time_limit.as_secs() {
                optimizations.push(ResourceOptimization {
                    change: ResourceChange::Time {
                        current_secs: job.time_limit.as_secs(),
                        suggested_secs,
                    },
                    reasoning: format!(
                        "Your average runtime: {:.1}h ({:.0}% of time limit)",
                        stats.elapsed_hours, stats.time_eff
                    ),
                    confidence_level: optimization_confidence(stats.time_eff, stats.count),
                    risk_level: optimization_risk(stats.time_eff, stats.count),
                });
            }
        }

        optimizations
    }
}

/// Means and variances over the successful similar runs.
#[derive(Clone, Copy)]
struct RunStats {
    count: usize,
    cpu_eff: f64,
    mem_eff: f64,
    time_eff: f64,
    max_rss_gb: f64,
    actual_ratio: f64,
    elapsed_hours: f64,
    cpu_eff_variance: f64,
    mem_eff_variance: f64,
}

impl RunStats {
    fn from_runs(runs: &[JobEfficiencyData]) -> Self {
        let count = runs.len().max(1);
        let n = count as f64;

        let cpu_eff = runs.iter().map(|r| r.cpu_efficiency).sum::<f64>() / n;
        let mem_eff = runs.iter().map(|r| r.memory_efficiency).sum::<f64>() / n;
        let time_eff = runs.iter().map(|r| r.time_efficiency).sum::<f64>() / n;
        let max_rss_gb =
            runs.iter().map(|r| r.max_memory_used_mb as f64 / 1024.0).sum::<f64>() / n;
        let actual_ratio = runs.iter().map(|r| r.actual_cpu_mem_ratio).sum::<f64>() / n;
        let elapsed_hours =
            runs.iter().map(|r| r.actual_time.as_secs_f64() / 3600.0).sum::<f64>() / n;

        let cpu_eff_variance = runs
            .iter()
            .map(|r| (r.cpu_efficiency - cpu_eff).powi(2))
            .sum::<f64>()
            / n;
        let mem_eff_variance = runs
            .iter()
            .map(|r| (r.memory_efficiency - mem_eff).powi(2))
            .sum::<f64>()
            / n;

        Self {
            count: runs.len(),
            cpu_eff,
            mem_eff,
            time_eff,
            max_rss_gb,
            actual_ratio,
            elapsed_hours,
            cpu_eff_variance,
            mem_eff_variance,
        }
    }

    /// Sample confidence shrunk by run-to-run variability. The denominator
    /// is empirical; see the scoring notes in DESIGN.md before tuning it.
    fn insight_confidence(&self) -> f64 {
        let sample_confidence = (self.count as f64 / 10.0).min(1.0);
        let consistency =
            1.0 / (1.0 + (self.cpu_eff_variance + self.mem_eff_variance) / 1000.0);
        sample_confidence * consistency
    }
}

fn optimization_confidence(efficiency: f64, sample_size: usize) -> f64 {
    let base = if efficiency < 50.0 {
        0.8
    } else if efficiency < 70.0 {
        0.6
    } else {
        0.5
    };
    let sample = (sample_size as f64 / 10.0).min(1.0);
    base * sample
}

fn optimization_risk(efficiency: f64, sample_size: usize) -> RiskLevel {
    if sample_size >= 3 && efficiency < 70.0 {
        RiskLevel::Low
    } else {
        RiskLevel::Medium
    }
}

/// Instance-family table over mean efficiencies and the GB-per-effective-core
/// ratio. Falls back to general purpose with low confidence when the shape
/// is unclear.
fn recommend_instance_family(stats: &RunStats) -> InstanceRecommendation {
    let confidence = family_confidence(stats);

    if stats.cpu_eff > 75.0 && stats.actual_ratio < 4.0 {
        InstanceRecommendation {
            instance_family: "c5".to_string(),
            gb_per_vcpu: 2.0,
            reasoning: format!(
                "CPU-bound workload ({:.0}% CPU eff, {:.1}GB per effective core)",
                stats.cpu_eff, stats.actual_ratio
            ),
            cost_impact: "15-25% lower cost per vCPU than general-purpose instances".to_string(),
            performance_impact: "Higher clock speeds for CPU-heavy work".to_string(),
            confidence_level: confidence,
        }
    } else if stats.mem_eff > 75.0 && stats.actual_ratio > 6.0 {
        InstanceRecommendation {
            instance_family: "r5".to_string(),
            gb_per_vcpu: 8.0,
            reasoning: format!(
                "Memory-bound workload ({:.0}% memory eff, {:.1}GB per effective core)",
                stats.mem_eff, stats.actual_ratio
            ),
            cost_impact: "20-30% lower cost per GB than general-purpose instances".to_string(),
            performance_impact: "Higher memory bandwidth".to_string(),
            confidence_level: confidence,
        }
    } else if stats.cpu_eff > 60.0 && stats.mem_eff > 60.0 {
        InstanceRecommendation {
            instance_family: "m5".to_string(),
            gb_per_vcpu: 4.0,
            reasoning: format!(
                "Balanced workload ({:.0}% CPU eff, {:.0}% memory eff)",
                stats.cpu_eff, stats.mem_eff
            ),
            cost_impact: "Good general-purpose price/performance".to_string(),
            performance_impact: "Balanced CPU and memory".to_string(),
            confidence_level: confidence,
        }
    } else {
        InstanceRecommendation {
            instance_family: "m5".to_string(),
            gb_per_vcpu: 4.0,
            reasoning: format!(
                "Variable resource usage ({:.0}% CPU eff, {:.0}% memory eff)",
                stats.cpu_eff, stats.mem_eff
            ),
            cost_impact: "Right-size resources before specializing the instance type"
                .to_string(),
            performance_impact: "General-purpose until usage patterns stabilize".to_string(),
            confidence_level: 0.3,
        }
    }
}

fn family_confidence(stats: &RunStats) -> f64 {
    let sample = (stats.count as f64 / 5.0).min(1.0);
    let clarity = ((stats.cpu_eff - stats.mem_eff).abs() / 50.0).min(1.0);
    sample * (0.5 + 0.5 * clarity)
}

/// Aggregate a pattern from the similar runs. Requires three runs before the
/// pattern is considered meaningful.
fn generate_pattern(runs: &[JobEfficiencyData]) -> Option<JobPattern> {
    if runs.len() < 3 {
        return None;
    }
    let mut iter = runs.iter();
    let mut pattern = JobPattern::from_run(iter.next()?);
    for run in iter {
        pattern.absorb(run);
    }
    Some(pattern)
}

fn calculate_trends(runs: &[JobEfficiencyData], stats: &RunStats) -> EfficiencyTrends {
    EfficiencyTrends {
        cpu_trend: trend_of(runs, |r| r.cpu_efficiency),
        memory_trend: trend_of(runs, |r| r.memory_efficiency),
        time_trend: trend_of(runs, |r| r.time_efficiency),
        cpu_efficiency_avg: stats.cpu_eff,
        memory_efficiency_avg: stats.mem_eff,
        time_efficiency_avg: stats.time_eff,
    }
}

/// Compare the older half of the runs against the newer half.
fn trend_of(runs: &[JobEfficiencyData], metric: impl Fn(&JobEfficiencyData) -> f64) -> Trend {
    if runs.len() < 3 {
        return Trend::InsufficientData;
    }

    let mut ordered: Vec<&JobEfficiencyData> = runs.iter().collect();
    ordered.sort_by_key(|r| r.submission_time);

    let mid = ordered.len() / 2;
    let older: f64 = ordered[..mid].iter().map(|r| metric(r)).sum::<f64>() / mid as f64;
    let newer: f64 =
        ordered[mid..].iter().map(|r| metric(r)).sum::<f64>() / (ordered.len() - mid) as f64;

    let diff = newer - older;
    if diff > TREND_THRESHOLD {
        Trend::Improving
    } else if diff < -TREND_THRESHOLD {
        Trend::Declining
    } else {
        Trend::Stable
    }
}

/// Clone the request and apply every accepted change. The original request
/// is never touched.
fn apply_optimizations(
    job: &JobRequest,
    optimizations: &[ResourceOptimization],
) -> JobRequest {
    let mut optimized = job.clone();
    for opt in optimizations {
        match opt.change {
            ResourceChange::Memory { suggested_mb, .. } => {
                optimized.memory = format_memory_mb(suggested_mb);
            }
            ResourceChange::Cpu { suggested_per_task, .. } => {
                optimized.cpus_per_task = suggested_per_task;
            }
            ResourceChange::Time { suggested_secs, .. } => {
                optimized.time_limit = Duration::from_secs(suggested_secs);
            }
        }
    }
    optimized
}

fn decision_impact(
    original: &crate::models::Recommendation,
    optimized: &crate::models::Recommendation,
) -> DecisionImpact {
    let decision_changed = original.preferred != optimized.preferred;
    let impact_description = if decision_changed {
        format!(
            "Optimization changed recommendation from {} to {}",
            original.preferred, optimized.preferred
        )
    } else {
        format!(
            "Optimization reinforces the {} recommendation with a better cost/time ratio",
            original.preferred
        )
    };

    DecisionImpact {
        original_recommendation: original.preferred,
        optimized_recommendation: optimized.preferred,
        decision_changed,
        impact_description,
        cost_difference_change: optimized.cost_difference - original.cost_difference,
        time_difference_change_secs: optimized.time_savings_secs - original.time_savings_secs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::efficiency::test_run;
    use crate::models::{CostBreakdown, Venue};
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn local_partition() -> PartitionAnalysis {
        PartitionAnalysis {
            name: "cpu".to_string(),
            venue: Venue::Local,
            queue_depth: 8,
            estimated_wait: Duration::from_secs(9900),
            startup: Duration::ZERO,
            available_nodes: 4,
            total_nodes: 16,
            estimated_cost: CostBreakdown {
                total_cost: 52.0,
                ..Default::default()
            },
            instance_type: None,
            current_price: None,
        }
    }

    fn cloud_partition() -> PartitionAnalysis {
        PartitionAnalysis {
            name: "gpu-aws".to_string(),
            venue: Venue::Cloud,
            queue_depth: 0,
            estimated_wait: Duration::ZERO,
            startup: Duration::from_secs(180),
            available_nodes: 1000,
            total_nodes: 1000,
            estimated_cost: CostBreakdown {
                total_cost: 44.13,
                ..Default::default()
            },
            instance_type: Some("p3.8xlarge".to_string()),
            current_price: Some(4.1),
        }
    }

    fn over_allocated_job() -> JobRequest {
        JobRequest {
            job_name: "sim".to_string(),
            nodes: 1,
            ntasks_per_node: 1,
            cpus_per_task: 32,
            time_limit: Duration::from_secs(4 * 3600),
            memory: "256G".to_string(),
            tres: HashMap::new(),
            ..Default::default()
        }
    }

    fn seeded_store(dir: &TempDir, runs: usize, cpu: f64, mem: f64, time: f64) -> JobHistoryStore {
        let store = JobHistoryStore::open_at(&dir.path().join("jobs.db")).unwrap();
        for i in 0..runs {
            let mut run = test_run(cpu, mem, time);
            run.job_id = format!("50{i}");
            run.submission_time = run.submission_time - chrono::Duration::hours(runs as i64 - i as i64);
            store.insert(&run).unwrap();
        }
        store
    }

    fn analyzer() -> HistoryAnalyzer {
        HistoryAnalyzer::new(DecisionWeights::default(), "test")
    }

    #[test]
    fn test_no_store_returns_baseline() {
        let enhanced = analyzer().analyze_with_history(
            &local_partition(),
            &cloud_partition(),
            &over_allocated_job(),
            "abc123",
            None,
        );
        assert!(enhanced.optimized.is_none());
        assert!(enhanced.history_insights.is_none());
        assert!(enhanced.resource_optimizations.is_empty());
    }

    #[test]
    fn test_single_similar_run_keeps_baseline() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir, 1, 45.0, 68.0, 80.0);

        let enhanced = analyzer().analyze_with_history(
            &local_partition(),
            &cloud_partition(),
            &over_allocated_job(),
            "abc123",
            Some(&store),
        );

        let insights = enhanced.history_insights.unwrap();
        assert_eq!(insights.similar_jobs_found, 1);
        assert!(enhanced.resource_optimizations.is_empty());
        assert!(enhanced.instance_recommendation.is_none());
        assert!(enhanced.optimized.is_none());
        assert!(enhanced.decision_impact.is_none());
    }

    #[test]
    fn test_over_allocation_produces_three_optimizations() {
        let dir = TempDir::new().unwrap();
        // 45% CPU, 68% memory, 50% time: every threshold is crossed.
        let store = seeded_store(&dir, 5, 45.0, 68.0, 50.0);

        let enhanced = analyzer().analyze_with_history(
            &local_partition(),
            &cloud_partition(),
            &over_allocated_job(),
            "abc123",
            Some(&store),
        );

        assert_eq!(enhanced.resource_optimizations.len(), 3);

        let memory = enhanced
            .resource_optimizations
            .iter()
            .find_map(|o| match o.change {
                ResourceChange::Memory { suggested_mb, current_mb } => {
                    Some((current_mb, suggested_mb))
                }
                _ => None,
            })
            .expect("memory optimization emitted");
        // 68% of 256G is ~174GB observed; 1.25x buffer is ~217GB < 256GB
        assert_eq!(memory.0, 256 * 1024);
        assert!(memory.1 < memory.0);
        assert!(memory.1 > 200 * 1024);

        let cpu = enhanced
            .resource_optimizations
            .iter()
            .find_map(|o| match o.change {
                ResourceChange::Cpu { suggested_per_task, .. } => Some(suggested_per_task),
                _ => None,
            })
            .expect("cpu optimization emitted");
        // 32 cores at 45% = 14.4 effective; 1.2x buffer floors to 17
        assert_eq!(cpu, 17);

        let time = enhanced
            .resource_optimizations
            .iter()
            .find_map(|o| match o.change {
                ResourceChange::Time { suggested_secs, .. } => Some(suggested_secs),
                _ => None,
            })
            .expect("time optimization emitted");
        // 2h mean runtime with a 1.3 buffer rounds to 3h
        assert_eq!(time, 3 * 3600);

        // Five consistent runs below threshold: low risk.
        for opt in &enhanced.resource_optimizations {
            assert_eq!(opt.risk_level, RiskLevel::Low);
            assert!(opt.confidence_level > 0.0);
        }

        // Re-decision ran and kept the cloud recommendation.
        let impact = enhanced.decision_impact.unwrap();
        assert!(!impact.decision_changed);
        assert_eq!(impact.optimized_recommendation, Venue::Cloud);
        assert!(enhanced.optimized.is_some());
    }

    #[test]
    fn test_optimized_clone_leaves_original_request_untouched() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir, 5, 45.0, 68.0, 50.0);
        let job = over_allocated_job();

        let enhanced = analyzer().analyze_with_history(
            &local_partition(),
            &cloud_partition(),
            &job,
            "abc123",
            Some(&store),
        );

        assert_eq!(job.memory, "256G");
        assert_eq!(job.cpus_per_task, 32);
        let optimized = &enhanced.optimized.unwrap().job_request;
        assert_ne!(optimized.memory, job.memory);
        assert!(optimized.cpus_per_task < job.cpus_per_task);
    }

    #[test]
    fn test_efficient_history_emits_no_optimizations() {
        let dir = TempDir::new().unwrap();
        // Every efficiency at or above its threshold.
        let store = seeded_store(&dir, 5, 85.0, 85.0, 90.0);

        let enhanced = analyzer().analyze_with_history(
            &local_partition(),
            &cloud_partition(),
            &over_allocated_job(),
            "abc123",
            Some(&store),
        );

        assert!(enhanced.resource_optimizations.is_empty());
        assert!(enhanced.optimized.is_none());
        assert!(enhanced.decision_impact.is_none());
        // Baseline recommendation is untouched.
        let baseline = analyzer().analyze_with_history(
            &local_partition(),
            &cloud_partition(),
            &over_allocated_job(),
            "abc123",
            None,
        );
        assert_eq!(
            enhanced.current.recommendation,
            baseline.current.recommendation
        );
    }

    #[test]
    fn test_instance_family_table() {
        let cpu_bound = RunStats {
            count: 5,
            cpu_eff: 85.0,
            mem_eff: 40.0,
            time_eff: 70.0,
            max_rss_gb: 10.0,
            actual_ratio: 1.5,
            elapsed_hours: 2.0,
            cpu_eff_variance: 4.0,
            mem_eff_variance: 4.0,
        };
        assert_eq!(recommend_instance_family(&cpu_bound).instance_family, "c5");

        let mem_bound = RunStats {
            cpu_eff: 40.0,
            mem_eff: 85.0,
            actual_ratio: 9.0,
            ..cpu_bound
        };
        let rec = recommend_instance_family(&mem_bound);
        assert_eq!(rec.instance_family, "r5");
        assert!((rec.gb_per_vcpu - 8.0).abs() < 1e-9);

        let balanced = RunStats {
            cpu_eff: 70.0,
            mem_eff: 70.0,
            actual_ratio: 5.0,
            ..cpu_bound
        };
        assert_eq!(recommend_instance_family(&balanced).instance_family, "m5");

        let unclear = RunStats {
            cpu_eff: 30.0,
            mem_eff: 30.0,
            actual_ratio: 5.0,
            ..cpu_bound
        };
        let rec = recommend_instance_family(&unclear);
        assert_eq!(rec.instance_family, "m5");
        assert!((rec.confidence_level - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_insight_confidence_shrinks_with_variance() {
        let steady = RunStats {
            count: 10,
            cpu_eff: 50.0,
            mem_eff: 50.0,
            time_eff: 50.0,
            max_rss_gb: 10.0,
            actual_ratio: 2.0,
            elapsed_hours: 1.0,
            cpu_eff_variance: 0.0,
            mem_eff_variance: 0.0,
        };
        assert!((steady.insight_confidence() - 1.0).abs() < 1e-9);

        let noisy = RunStats {
            cpu_eff_variance: 500.0,
            mem_eff_variance: 500.0,
            ..steady
        };
        assert!((noisy.insight_confidence() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_trend_detection() {
        let mut runs = Vec::new();
        for i in 0..6 {
            let eff = 40.0 + i as f64 * 5.0;
            let mut run = test_run(eff, 50.0, 50.0);
            run.job_id = format!("60{i}");
            run.submission_time =
                run.submission_time - chrono::Duration::hours(6 - i as i64);
            runs.push(run);
        }
        assert_eq!(trend_of(&runs, |r| r.cpu_efficiency), Trend::Improving);
        assert_eq!(trend_of(&runs, |r| r.memory_efficiency), Trend::Stable);
        assert_eq!(trend_of(&runs[..2], |r| r.cpu_efficiency), Trend::InsufficientData);
    }

    #[test]
    fn test_pattern_requires_three_runs() {
        let runs: Vec<_> = (0..2).map(|i| {
            let mut run = test_run(50.0, 50.0, 50.0);
            run.job_id = format!("70{i}");
            run
        }).collect();
        assert!(generate_pattern(&runs).is_none());
    }
}
