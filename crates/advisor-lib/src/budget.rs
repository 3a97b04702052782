//! Budget collaborator client
//!
//! Thin JSON/HTTP contract with the grant-budget service. The advisor only
//! ever treats this collaborator as advisory: any failure here downgrades
//! the report to cost/time analysis, never the decision itself.

use crate::error::{AdvisorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Spending posture the budget service recommends for an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BudgetDecision {
    PreferLocal,
    PreferAws,
    Either,
    EmergencyOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetStatus {
    pub account: String,
    pub budget_limit: f64,
    pub budget_used: f64,
    pub budget_held: f64,
    pub budget_available: f64,
    pub burn_rate: f64,
    /// 0-100, higher is healthier.
    pub health_score: u32,
    pub risk_level: String,
    pub grant_days_remaining: i64,
    pub decision: BudgetDecision,
    pub can_afford_aws: bool,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetImpact {
    pub cost_as_percent_of_budget: f64,
    pub cost_as_percent_of_remaining: f64,
    pub budget_after_cost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub budget_risk: String,
    pub deadline_risk: String,
    pub overall_risk: String,
    #[serde(default)]
    pub risk_factors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlternativeOption {
    pub strategy: String,
    pub cost: f64,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffordabilityCheck {
    pub affordable: bool,
    pub recommended_decision: String,
    pub budget_impact: BudgetImpact,
    pub risk_assessment: RiskAssessment,
    #[serde(default)]
    pub alternative_options: Vec<AlternativeOption>,
    pub confidence_level: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchDeadline {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub date: DateTime<Utc>,
    pub days_until: i64,
    pub urgency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextAllocation {
    pub date: DateTime<Utc>,
    pub amount: f64,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetGuidance {
    pub recommended_strategy: String,
    pub max_recommended_spend: f64,
    #[serde(default)]
    pub optimization_suggestions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyAdvice {
    pub emergency_funds_available: bool,
    pub emergency_threshold: f64,
    pub emergency_procedure: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantTimeline {
    pub account: String,
    pub grant_end_date: DateTime<Utc>,
    pub days_remaining: i64,
    #[serde(default)]
    pub next_allocation: Option<NextAllocation>,
    #[serde(default)]
    pub upcoming_deadlines: Vec<ResearchDeadline>,
    pub budget_guidance: BudgetGuidance,
    #[serde(default)]
    pub emergency_burst_advice: Option<EmergencyAdvice>,
}

pub struct BudgetClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
}

impl BudgetClient {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AdvisorError::Budget {
                operation: "BudgetClient::new".to_string(),
                message: "failed to build HTTP client".to_string(),
                source: Some(e),
            })?;
        let base_url = Url::parse(base_url).map_err(|e| {
            AdvisorError::validation("BudgetClient::new", format!("invalid budget URL: {e}"))
        })?;
        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    /// Availability probe: anything but a 200 means the collaborator is out.
    pub async fn is_available(&self) -> bool {
        let Ok(url) = self.base_url.join("health") else {
            return false;
        };
        match self.http.get(url).send().await {
            Ok(response) => response.status() == reqwest::StatusCode::OK,
            Err(_) => false,
        }
    }

    pub async fn status(&self, account: &str) -> Result<BudgetStatus> {
        self.post(
            "api/v1/asba/budget-status",
            "status",
            &serde_json::json!({ "account": account }),
            account,
        )
        .await
    }

    pub async fn check(&self, account: &str, estimated_cost: f64) -> Result<AffordabilityCheck> {
        if estimated_cost < 0.0 {
            return Err(AdvisorError::validation(
                "BudgetClient::check",
                "estimated cost cannot be negative",
            ));
        }
        self.post(
            "api/v1/asba/affordability-check",
            "check",
            &serde_json::json!({ "account": account, "estimated_cost": estimated_cost }),
            account,
        )
        .await
    }

    pub async fn timeline(&self, account: &str) -> Result<GrantTimeline> {
        self.post(
            "api/v1/asba/grant-timeline",
            "timeline",
            &serde_json::json!({
                "account": account,
                "look_ahead_days": 90,
                "include_alerts": true,
            }),
            account,
        )
        .await
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        operation: &str,
        body: &serde_json::Value,
        account: &str,
    ) -> Result<T> {
        if account.is_empty() {
            return Err(AdvisorError::validation(
                format!("BudgetClient::{operation}"),
                "account cannot be empty",
            ));
        }

        let url = self.base_url.join(path).map_err(|e| {
            AdvisorError::validation(
                format!("BudgetClient::{operation}"),
                format!("invalid budget path: {e}"),
            )
        })?;

        let mut request = self.http.post(url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| AdvisorError::Budget {
            operation: format!("BudgetClient::{operation}"),
            message: "budget service request failed".to_string(),
            source: Some(e),
        })?;

        if !response.status().is_success() {
            return Err(AdvisorError::Budget {
                operation: format!("BudgetClient::{operation}"),
                message: format!("budget service returned {}", response.status()),
                source: None,
            });
        }

        response.json().await.map_err(|e| AdvisorError::Budget {
            operation: format!("BudgetClient::{operation}"),
            message: "failed to parse budget response".to_string(),
            source: Some(e),
        })
    }
}
