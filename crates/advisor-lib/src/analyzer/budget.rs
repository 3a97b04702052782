//! Budget-aware analysis layer
//!
//! Wraps an enhanced analysis with budget status, affordability and grant
//! timeline data from the optional budget collaborator. The collaborator is
//! never load-bearing: every failure records a warning and leaves the
//! cost/time decision untouched.

use crate::analyzer::EnhancedAnalysis;
use crate::budget::{
    AffordabilityCheck, BudgetClient, BudgetStatus, GrantTimeline, ResearchDeadline,
};
use crate::models::Venue;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// How hard an upcoming deadline should push the decision toward speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeadlinePressure {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlternativeStrategy {
    pub strategy: String,
    pub cost: f64,
    pub description: String,
}

/// The decision after budget constraints have had their say.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetRecommendation {
    pub final_recommendation: Venue,
    pub budget_influence: String,
    pub cost_optimization_advice: Vec<String>,
    pub budget_risk: String,
    pub alternative_strategies: Vec<AlternativeStrategy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineOptimization {
    pub deadline_pressure: DeadlinePressure,
    pub critical_deadlines: Vec<ResearchDeadline>,
    pub timeline_recommendation: String,
    pub urgency_factor: f64,
}

/// Enhanced analysis plus whatever the budget collaborator could provide.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetAwareAnalysis {
    pub enhanced: EnhancedAnalysis,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_status: Option<BudgetStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affordability: Option<AffordabilityCheck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grant_timeline: Option<GrantTimeline>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_recommendation: Option<BudgetRecommendation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeline_optimization: Option<TimelineOptimization>,
}

/// Consult the budget collaborator and fold its answers into the analysis.
/// A missing client, empty account, failed probe or any query error all
/// degrade to the plain cost/time analysis with a recorded warning.
pub async fn apply_budget_constraints(
    client: Option<&BudgetClient>,
    account: &str,
    enhanced: EnhancedAnalysis,
) -> BudgetAwareAnalysis {
    let mut analysis = BudgetAwareAnalysis {
        enhanced,
        budget_status: None,
        affordability: None,
        grant_timeline: None,
        budget_recommendation: None,
        timeline_optimization: None,
    };

    let Some(client) = client else {
        return analysis;
    };
    if account.is_empty() {
        return analysis;
    }

    if !client.is_available().await {
        degrade(&mut analysis, "budget service unavailable; decision based on cost/time analysis only");
        return analysis;
    }

    match client.status(account).await {
        Ok(status) => analysis.budget_status = Some(status),
        Err(e) => {
            warn!(error = %e, account, "budget status lookup failed");
            degrade(&mut analysis, "budget status unavailable; decision based on cost/time analysis only");
            return analysis;
        }
    }

    let cloud_cost = analysis
        .enhanced
        .current
        .burst_partition
        .estimated_cost
        .total_cost;
    match client.check(account, cloud_cost).await {
        Ok(check) => analysis.affordability = Some(check),
        Err(e) => warn!(error = %e, account, "affordability check failed"),
    }

    match client.timeline(account).await {
        Ok(timeline) => analysis.grant_timeline = Some(timeline),
        Err(e) => warn!(error = %e, account, "grant timeline lookup failed"),
    }

    analysis.budget_recommendation = Some(budget_recommendation(
        &analysis.enhanced,
        analysis.budget_status.as_ref(),
        analysis.affordability.as_ref(),
    ));
    analysis.timeline_optimization = analysis
        .grant_timeline
        .as_ref()
        .map(timeline_optimization);

    analysis
}

fn degrade(analysis: &mut BudgetAwareAnalysis, message: &str) {
    analysis
        .enhanced
        .current
        .recommendation
        .reasoning
        .push(message.to_string());
    analysis
        .enhanced
        .current
        .metadata
        .warnings
        .push(message.to_string());
}

/// Fold the service's affordability verdict and account health into a final
/// recommendation. The technical decision only moves when the service takes
/// a side.
pub(crate) fn budget_recommendation(
    enhanced: &EnhancedAnalysis,
    status: Option<&BudgetStatus>,
    affordability: Option<&AffordabilityCheck>,
) -> BudgetRecommendation {
    let mut recommendation = BudgetRecommendation {
        final_recommendation: enhanced.current.recommendation.preferred,
        budget_influence: "budget neutral; technical factors determine the decision".to_string(),
        cost_optimization_advice: Vec::new(),
        budget_risk: "low".to_string(),
        alternative_strategies: Vec::new(),
    };

    if let Some(check) = affordability {
        match check.recommended_decision.as_str() {
            "LOCAL" => {
                recommendation.final_recommendation = Venue::Local;
                recommendation.budget_influence =
                    "budget constraints favor local execution".to_string();
                recommendation.budget_risk = check.risk_assessment.budget_risk.clone();
            }
            "AWS" => {
                recommendation.final_recommendation = Venue::Cloud;
                recommendation.budget_influence =
                    "budget allows cloud execution for better turnaround".to_string();
                recommendation.budget_risk = check.risk_assessment.budget_risk.clone();
            }
            _ => {}
        }

        recommendation.alternative_strategies = check
            .alternative_options
            .iter()
            .map(|option| AlternativeStrategy {
                strategy: option.strategy.clone(),
                cost: option.cost,
                description: option.description.clone(),
            })
            .collect();
    }

    if let Some(status) = status {
        if status.health_score < 50 {
            recommendation
                .cost_optimization_advice
                .push("budget health low; prioritize cost optimization".to_string());
        }
        if status.burn_rate > status.budget_available / 30.0 {
            recommendation
                .cost_optimization_advice
                .push("high burn rate detected; consider local execution".to_string());
        }
        if status.grant_days_remaining < 30 {
            recommendation
                .cost_optimization_advice
                .push("grant ending soon; preserve budget for critical experiments".to_string());
        }
    }

    recommendation
}

/// Urgency grows as high/critical deadlines approach; critical ones count
/// double.
pub(crate) fn timeline_optimization(timeline: &GrantTimeline) -> TimelineOptimization {
    let mut critical_deadlines = Vec::new();
    let mut max_urgency = 0.0f64;

    for deadline in &timeline.upcoming_deadlines {
        if deadline.urgency != "high" && deadline.urgency != "critical" {
            continue;
        }
        critical_deadlines.push(deadline.clone());

        let mut urgency = 1.0 / (1.0 + deadline.days_until.max(0) as f64 / 7.0);
        if deadline.urgency == "critical" {
            urgency *= 2.0;
        }
        max_urgency = max_urgency.max(urgency);
    }

    let (pressure, recommendation) = if max_urgency > 0.8 {
        (
            DeadlinePressure::Critical,
            "prioritize speed over cost; burst for faster results",
        )
    } else if max_urgency > 0.5 {
        (
            DeadlinePressure::High,
            "consider bursting if budget allows; moderate deadline pressure",
        )
    } else if max_urgency > 0.2 {
        (
            DeadlinePressure::Medium,
            "balanced approach; optimize the cost/performance ratio",
        )
    } else {
        (
            DeadlinePressure::Low,
            "prioritize cost efficiency; no urgent deadlines",
        )
    };

    TimelineOptimization {
        deadline_pressure: pressure,
        critical_deadlines,
        timeline_recommendation: recommendation.to_string(),
        urgency_factor: max_urgency,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::HistoryAnalyzer;
    use crate::budget::{BudgetGuidance, BudgetImpact, RiskAssessment};
    use crate::models::{
        CostBreakdown, DecisionWeights, JobRequest, PartitionAnalysis,
    };
    use chrono::Utc;
    use std::time::Duration;

    fn enhanced() -> EnhancedAnalysis {
        let local = PartitionAnalysis {
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
                total_cost: 44.13,
                ..Default::default()
            },
            instance_type: Some("p3.8xlarge".to_string()),
            current_price: Some(4.1),
        };
        let job = JobRequest {
            job_name: "sim".to_string(),
            nodes: 1,
            ntasks_per_node: 1,
            cpus_per_task: 32,
            time_limit: Duration::from_secs(4 * 3600),
            memory: "256G".to_string(),
            ..Default::default()
        };
        HistoryAnalyzer::new(DecisionWeights::default(), "test")
            .analyze_with_history(&local, &cloud, &job, "", None)
    }

    fn affordability(decision: &str) -> AffordabilityCheck {
        AffordabilityCheck {
            affordable: decision != "LOCAL",
            recommended_decision: decision.to_string(),
            budget_impact: BudgetImpact {
                cost_as_percent_of_budget: 1.0,
                cost_as_percent_of_remaining: 2.0,
                budget_after_cost: 17000.0,
            },
            risk_assessment: RiskAssessment {
                budget_risk: "medium".to_string(),
                deadline_risk: "low".to_string(),
                overall_risk: "medium".to_string(),
                risk_factors: vec![],
            },
            alternative_options: vec![],
            confidence_level: 0.8,
        }
    }

    fn status(health: u32, burn_rate: f64, days: i64) -> BudgetStatus {
        BudgetStatus {
            account: "NSF-ABC123".to_string(),
            budget_limit: 50_000.0,
            budget_used: 30_000.0,
            budget_held: 0.0,
            budget_available: 20_000.0,
            burn_rate,
            health_score: health,
            risk_level: "medium".to_string(),
            grant_days_remaining: days,
            decision: crate::budget::BudgetDecision::Either,
            can_afford_aws: true,
            last_updated: None,
        }
    }

    fn deadline(urgency: &str, days_until: i64) -> ResearchDeadline {
        ResearchDeadline {
            kind: "conference".to_string(),
            name: "ICLR".to_string(),
            date: Utc::now(),
            days_until,
            urgency: urgency.to_string(),
        }
    }

    fn timeline_with(deadlines: Vec<ResearchDeadline>) -> GrantTimeline {
        GrantTimeline {
            account: "NSF-ABC123".to_string(),
            grant_end_date: Utc::now(),
            days_remaining: 200,
            next_allocation: None,
            upcoming_deadlines: deadlines,
            budget_guidance: BudgetGuidance {
                recommended_strategy: "steady".to_string(),
                max_recommended_spend: 500.0,
                optimization_suggestions: vec![],
            },
            emergency_burst_advice: None,
        }
    }

    #[test]
    fn test_service_verdict_overrides_technical_decision() {
        let base = enhanced();
        assert_eq!(base.current.recommendation.preferred, Venue::Cloud);

        let rec = budget_recommendation(&base, None, Some(&affordability("LOCAL")));
        assert_eq!(rec.final_recommendation, Venue::Local);
        assert!(rec.budget_influence.contains("favor local"));
        assert_eq!(rec.budget_risk, "medium");
    }

    #[test]
    fn test_neutral_verdict_keeps_technical_decision() {
        let base = enhanced();
        let rec = budget_recommendation(&base, None, Some(&affordability("EITHER")));
        assert_eq!(rec.final_recommendation, Venue::Cloud);
        assert!(rec.budget_influence.contains("neutral"));
    }

    #[test]
    fn test_cost_advice_from_unhealthy_account() {
        let base = enhanced();
        // Health 40, burning faster than a month of runway, 20 days left.
        let rec = budget_recommendation(&base, Some(&status(40, 800.0, 20)), None);
        assert_eq!(rec.cost_optimization_advice.len(), 3);
    }

    #[test]
    fn test_healthy_account_needs_no_advice() {
        let base = enhanced();
        let rec = budget_recommendation(&base, Some(&status(90, 100.0, 200)), None);
        assert!(rec.cost_optimization_advice.is_empty());
    }

    #[test]
    fn test_timeline_pressure_scales_with_deadline_distance() {
        let near = timeline_optimization(&timeline_with(vec![deadline("critical", 1)]));
        assert_eq!(near.deadline_pressure, DeadlinePressure::Critical);
        assert_eq!(near.critical_deadlines.len(), 1);

        let moderate = timeline_optimization(&timeline_with(vec![deadline("high", 7)]));
        assert_eq!(moderate.deadline_pressure, DeadlinePressure::Medium);

        let far = timeline_optimization(&timeline_with(vec![deadline("high", 90)]));
        assert_eq!(far.deadline_pressure, DeadlinePressure::Low);

        let none = timeline_optimization(&timeline_with(vec![deadline("low", 3)]));
        assert!(none.critical_deadlines.is_empty());
        assert_eq!(none.deadline_pressure, DeadlinePressure::Low);
    }

    #[tokio::test]
    async fn test_missing_client_passes_analysis_through() {
        let analysis = apply_budget_constraints(None, "NSF-ABC123", enhanced()).await;
        assert!(analysis.budget_status.is_none());
        assert!(analysis.budget_recommendation.is_none());
        assert!(analysis.enhanced.current.metadata.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_service_degrades_with_warning() {
        let client = BudgetClient::new(
            "http://127.0.0.1:9",
            None,
            Duration::from_millis(200),
        )
        .unwrap();
        let analysis =
            apply_budget_constraints(Some(&client), "NSF-ABC123", enhanced()).await;
        assert!(analysis.budget_status.is_none());
        assert!(!analysis.enhanced.current.metadata.warnings.is_empty());
        assert!(analysis
            .enhanced
            .current
            .recommendation
            .reasoning
            .iter()
            .any(|r| r.contains("budget service unavailable")));
    }
}
