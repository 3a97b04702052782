//! The `burst` command: advise, then hand the plan to the executor

use crate::commands::{plan, JobContext};
use crate::output::{print_info, print_success, print_warning};
use anyhow::{bail, Context, Result};
use asba_lib::analyzer::save_plan;
use asba_lib::{Advisor, JobHistoryStore};
use std::process::Stdio;
use tracing::info;

pub struct BurstOptions {
    pub node_list: String,
    pub dry_run: bool,
    /// Executor binary consuming the plan document.
    pub executor: String,
}

pub async fn run(
    advisor: &Advisor,
    store: Option<&JobHistoryStore>,
    ctx: &JobContext,
    burst: &str,
    version: &str,
    user: &str,
    options: &BurstOptions,
) -> Result<()> {
    let plan = plan::build(advisor, store, ctx, burst, version, user).await?;

    if !plan.should_burst {
        print_warning("analysis recommends staying local; not invoking the executor");
        print_info(&format!("to submit locally: sbatch {}", ctx.script_path.display()));
        return Ok(());
    }

    let plan_path = std::env::temp_dir().join(format!(
        "asba-plan-{}-{}.json",
        ctx.job.job_name.replace('/', "_"),
        std::process::id()
    ));
    save_plan(&plan, &plan_path)?;

    if options.dry_run {
        print_info(&format!(
            "dry run: would invoke {} resume --execution-plan={} {}",
            options.executor,
            plan_path.display(),
            options.node_list
        ));
        println!("{}", plan.to_json()?);
        return Ok(());
    }

    info!(executor = %options.executor, plan = %plan_path.display(), "invoking executor");
    let status = tokio::process::Command::new(&options.executor)
        .arg("resume")
        .arg(format!("--execution-plan={}", plan_path.display()))
        .arg(&options.node_list)
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
        .with_context(|| format!("failed to launch executor {}", options.executor))?;

    if !status.success() {
        bail!("executor exited with {status}");
    }

    print_success("burst submitted");
    Ok(())
}
