//! The `history` and `insights` commands

use crate::output::{color_efficiency, print_heading, print_info, print_warning};
use anyhow::Result;
use asba_lib::models::{JobPattern, WorkloadType};
use asba_lib::slurm::SlurmClient;
use asba_lib::JobHistoryStore;
use std::collections::BTreeMap;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use tracing::warn;

#[derive(Tabled)]
struct PatternRow {
    #[tabled(rename = "Script")]
    script: String,
    #[tabled(rename = "Runs")]
    runs: u32,
    #[tabled(rename = "Last run")]
    last_run: String,
    #[tabled(rename = "Workload")]
    workload: &'static str,
    #[tabled(rename = "CPU eff")]
    cpu_eff: String,
    #[tabled(rename = "Mem eff")]
    mem_eff: String,
    #[tabled(rename = "Avg runtime")]
    runtime: String,
    #[tabled(rename = "Success")]
    success: String,
}

/// `history --patterns`: the aggregated per-script table.
pub fn show_patterns(store: &JobHistoryStore) -> Result<()> {
    let patterns = store.patterns()?;

    if patterns.is_empty() {
        print_info("no patterns detected yet; run jobs with --days ingestion to build them");
        return Ok(());
    }

    let rows: Vec<PatternRow> = patterns
        .iter()
        .map(|p| PatternRow {
            script: p.script_name.clone(),
            runs: p.run_count,
            last_run: p.last_run.format("%Y-%m-%d").to_string(),
            workload: p.workload_type.as_str(),
            cpu_eff: color_efficiency(p.avg_cpu_efficiency),
            mem_eff: color_efficiency(p.avg_memory_efficiency),
            runtime: crate::output::format_duration_secs(p.avg_runtime.as_secs()),
            success: format!("{:.0}%", p.success_rate * 100.0),
        })
        .collect();

    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{table}");
    Ok(())
}

/// `history --days N`: ingest recent accounting rows into the store.
pub async fn ingest(
    store: &JobHistoryStore,
    slurm: &SlurmClient,
    user: &str,
    days: u32,
) -> Result<()> {
    let runs = slurm.user_job_efficiency(user, days).await?;

    let mut stored = 0usize;
    for run in &runs {
        // A failed write loses one record, not the whole ingestion.
        match store.insert(run) {
            Ok(()) => stored += 1,
            Err(e) => warn!(job_id = %run.job_id, error = %e, "failed to store run"),
        }
    }

    println!(
        "Collected {} job records ({} stored) from the last {} days",
        runs.len(),
        stored,
        days
    );
    Ok(())
}

/// Bare `history`: store statistics.
pub fn show_stats(store: &JobHistoryStore, user: &str) -> Result<()> {
    let count = store.count()?;
    println!("Job history for user: {user}");
    println!("Total jobs tracked: {count}");
    println!(
        "Store size: {:.2} MB",
        store.size()? as f64 / 1024.0 / 1024.0
    );
    println!("Store location: {}", store.path().display());

    if count == 0 {
        print_info("no job history found; run 'asba history --days 30' to collect data");
    }
    Ok(())
}

/// `insights`: efficiency summary and over-allocation census.
pub fn show_insights(store: &JobHistoryStore) -> Result<()> {
    let patterns = store.patterns()?;
    if patterns.is_empty() {
        print_info("no job patterns found; ingest history first to generate insights");
        return Ok(());
    }

    print_heading("EFFICIENCY INSIGHTS");

    let total_runs: u32 = patterns.iter().map(|p| p.run_count).sum();
    let weighted = |f: fn(&JobPattern) -> f64| -> f64 {
        patterns
            .iter()
            .map(|p| f(p) * p.run_count as f64)
            .sum::<f64>()
            / total_runs.max(1) as f64
    };

    println!("Overall statistics ({total_runs} total job runs):");
    println!(
        "  Average CPU efficiency: {}",
        color_efficiency(weighted(|p| p.avg_cpu_efficiency))
    );
    println!(
        "  Average memory efficiency: {}",
        color_efficiency(weighted(|p| p.avg_memory_efficiency))
    );
    println!("  Job patterns tracked: {}", patterns.len());

    let mut by_workload: BTreeMap<&'static str, usize> = BTreeMap::new();
    for pattern in &patterns {
        *by_workload.entry(pattern.workload_type.as_str()).or_default() += 1;
    }
    println!("\nWorkload distribution:");
    for (workload, count) in by_workload {
        println!("  {workload}: {count} patterns");
    }

    let cpu_over = patterns.iter().filter(|p| p.avg_cpu_efficiency < 60.0).count();
    let mem_over = patterns
        .iter()
        .filter(|p| p.avg_memory_efficiency < 70.0)
        .count();
    let over_allocated = patterns
        .iter()
        .filter(|p| p.workload_type == WorkloadType::OverAllocated)
        .count();

    println!("\nOptimization opportunities:");
    if cpu_over > 0 {
        print_warning(&format!(
            "CPU over-allocation: {cpu_over} patterns could reduce CPU requests"
        ));
    }
    if mem_over > 0 {
        print_warning(&format!(
            "memory over-allocation: {mem_over} patterns could reduce memory requests"
        ));
    }
    if over_allocated > 0 {
        print_warning(&format!(
            "{over_allocated} patterns are over-allocated on both axes"
        ));
    }
    if cpu_over == 0 && mem_over == 0 {
        println!("  no major over-allocation detected; resource requests look good");
    }

    Ok(())
}
