//! Core library for the burst advisor
//!
//! This crate provides the decision and planning engine:
//! - Per-user job history store with pattern aggregation
//! - Scored local-vs-cloud decision engine
//! - History-aware resource right-sizing and re-planning
//! - Research-domain classification and execution-plan synthesis
//! - Scheduler, pricing and budget collaborator clients

pub mod advisor;
pub mod analyzer;
pub mod budget;
pub mod config;
pub mod domain;
pub mod error;
pub mod history;
pub mod models;
pub mod pricing;
pub mod slurm;

pub use advisor::Advisor;
pub use analyzer::{
    DecisionEngine, EnhancedAnalysis, ExecutionPlanner, HistoryAnalyzer, HistoryInsights,
};
pub use config::AdvisorSettings;
pub use error::{AdvisorError, Result};
pub use history::JobHistoryStore;
pub use models::*;
