//! The `plan` command: execution-plan JSON for the downstream executor

use crate::commands::JobContext;
use crate::output::print_success;
use anyhow::Result;
use asba_lib::analyzer::{save_plan, ExecutionPlanner};
use asba_lib::domain::detect_domain;
use asba_lib::models::ExecutionPlan;
use asba_lib::{Advisor, JobHistoryStore};
use std::path::Path;

/// Build the execution plan for one script. History participates whenever a
/// store is available; the plan synthesizer requires the baseline decision
/// regardless.
pub async fn build(
    advisor: &Advisor,
    store: Option<&JobHistoryStore>,
    ctx: &JobContext,
    burst: &str,
    version: &str,
    user: &str,
) -> Result<ExecutionPlan> {
    let analysis = advisor
        .advise(&ctx.job, &ctx.target, burst, &ctx.fingerprint, store)
        .await?;

    let classification = detect_domain(Some(&ctx.script_path), &ctx.job);

    let planner = ExecutionPlanner::new(version, user);
    let plan = planner.generate(
        &analysis,
        &ctx.job,
        &ctx.script_path.display().to_string(),
        &ctx.fingerprint,
        &classification,
    )?;

    Ok(plan)
}

pub async fn run(
    advisor: &Advisor,
    store: Option<&JobHistoryStore>,
    ctx: &JobContext,
    burst: &str,
    version: &str,
    user: &str,
    output: Option<&Path>,
) -> Result<()> {
    let plan = build(advisor, store, ctx, burst, version, user).await?;

    match output {
        Some(path) => {
            save_plan(&plan, path)?;
            print_success(&format!("execution plan written to {}", path.display()));
        }
        None => println!("{}", plan.to_json()?),
    }

    Ok(())
}
