//! Decision, optimization and planning engines
//!
//! All three are pure: they take venue snapshots and history rows and
//! produce value objects. I/O stays in the collaborators and the store.

mod budget;
mod costs;
mod decision;
pub(crate) mod optimizer;
mod planner;

pub use budget::{
    apply_budget_constraints, AlternativeStrategy, BudgetAwareAnalysis, BudgetRecommendation,
    DeadlinePressure, TimelineOptimization,
};
pub use costs::{cloud_cost, local_cost, LocalCostRates};
pub use decision::DecisionEngine;
pub use optimizer::{
    EfficiencyTrends, EnhancedAnalysis, HistoryAnalyzer, HistoryInsights, InstanceRecommendation,
    ResourceChange, ResourceOptimization, RiskLevel, Trend,
};
pub use planner::{load_plan, save_plan, ExecutionPlanner};
