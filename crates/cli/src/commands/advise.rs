//! The `advise` command: decision report on stdout

use crate::commands::JobContext;
use crate::output::{
    color_confidence, color_efficiency, color_venue, format_currency, format_signed_duration,
    print_heading, print_info, print_warning,
};
use anyhow::Result;
use asba_lib::analyzer::{apply_budget_constraints, BudgetAwareAnalysis, ResourceOptimization};
use asba_lib::budget::BudgetClient;
use asba_lib::models::{PartitionAnalysis, Recommendation, Venue};
use asba_lib::{Advisor, HistoryInsights, JobHistoryStore};

pub struct AdviseOptions {
    pub with_history: bool,
    pub optimize: bool,
    pub account: Option<String>,
    pub check_budget: bool,
}

pub async fn run(
    advisor: &Advisor,
    store: Option<&JobHistoryStore>,
    ctx: &JobContext,
    burst: &str,
    budget: Option<&BudgetClient>,
    options: &AdviseOptions,
) -> Result<()> {
    let history_store = if options.with_history || options.optimize {
        store
    } else {
        None
    };

    let analysis = advisor
        .advise(&ctx.job, &ctx.target, burst, &ctx.fingerprint, history_store)
        .await?;

    println!(
        "Analyzing {} ({} nodes, {} CPUs/task, {})",
        ctx.script_path.display(),
        ctx.job.nodes,
        ctx.job.cpus_per_task,
        format_signed_duration(ctx.job.time_limit.as_secs() as i64),
    );

    print_heading("ANALYSIS RESULTS");
    display_partition("TARGET", &analysis.current.target_partition);
    display_partition("BURST", &analysis.current.burst_partition);

    if options.with_history {
        if let Some(insights) = &analysis.history_insights {
            display_insights(insights);
        }
    }

    if options.optimize && !analysis.resource_optimizations.is_empty() {
        display_optimizations(&analysis.resource_optimizations);
        if let Some(rec) = &analysis.instance_recommendation {
            print_heading("INSTANCE RECOMMENDATION");
            println!(
                "Family {} ({:.1}GB per vCPU): {}",
                rec.instance_family, rec.gb_per_vcpu, rec.reasoning
            );
            println!("  Cost impact: {}", rec.cost_impact);
            println!("  Confidence: {}", color_confidence(rec.confidence_level));
        }
        if let Some(impact) = &analysis.decision_impact {
            print_heading("DECISION IMPACT");
            println!("{}", impact.impact_description);
            if impact.cost_difference_change.abs() > f64::EPSILON {
                println!(
                    "  Cost difference change: {}",
                    format_currency(impact.cost_difference_change)
                );
            }
        }
    }

    // The optimized decision is the one we report when a re-plan happened.
    let effective = analysis
        .optimized
        .as_ref()
        .filter(|_| options.optimize)
        .unwrap_or(&analysis.current);
    display_recommendation(&effective.recommendation);

    if options.check_budget {
        let account = options
            .account
            .clone()
            .or_else(|| Some(ctx.job.account.clone()).filter(|a| !a.is_empty()));
        match account {
            Some(account) => {
                let budget_analysis =
                    apply_budget_constraints(budget, &account, analysis).await;
                display_budget(&budget_analysis);
            }
            None => print_warning("budget check requested but no account configured"),
        }
    }

    Ok(())
}

fn display_partition(label: &str, analysis: &PartitionAnalysis) {
    println!("\n{} ({}, {})", label, analysis.name, color_venue(analysis.venue));

    if analysis.queue_depth > 0 {
        println!("  Queue depth: {} jobs ahead", analysis.queue_depth);
        println!(
            "  Est. wait time: {}",
            format_signed_duration(analysis.estimated_wait.as_secs() as i64)
        );
    } else {
        println!("  Queue depth: none (immediate start)");
        if !analysis.startup.is_zero() {
            println!(
                "  Startup time: {}",
                format_signed_duration(analysis.startup.as_secs() as i64)
            );
        }
    }

    if analysis.venue == Venue::Local {
        println!(
            "  Available capacity: {}/{} nodes idle",
            analysis.available_nodes, analysis.total_nodes
        );
    } else if let Some(instance_type) = &analysis.instance_type {
        println!("  Instance type: {instance_type}");
        if let Some(price) = analysis.current_price {
            println!("  Current effective price: ${price:.3}/hour");
        }
    }

    let cost = &analysis.estimated_cost;
    println!("  Cost estimate: {}", format_currency(cost.total_cost));
    if cost.compute_cost > 0.0 {
        println!("    compute {}", format_currency(cost.compute_cost));
    }
    if cost.node_cost > 0.0 {
        println!("    node {}", format_currency(cost.node_cost));
    }
    if cost.overhead_cost > 0.0 {
        println!("    overhead {}", format_currency(cost.overhead_cost));
    }
    if cost.data_transfer_cost > 0.0 {
        println!("    data transfer {}", format_currency(cost.data_transfer_cost));
    }
}

fn display_recommendation(rec: &Recommendation) {
    print_heading("RECOMMENDATION");
    println!("Advisory: run on the {}", color_venue(rec.preferred));

    match rec.time_savings_secs.cmp(&0) {
        std::cmp::Ordering::Greater => println!(
            "├─ Time difference: +{} (cloud finishes sooner)",
            format_signed_duration(rec.time_savings_secs)
        ),
        std::cmp::Ordering::Less => println!(
            "├─ Time difference: {} (local is faster)",
            format_signed_duration(rec.time_savings_secs)
        ),
        std::cmp::Ordering::Equal => println!("├─ Time difference: ~0 (similar timing)"),
    }

    if rec.cost_difference > 0.0 {
        println!(
            "├─ Cost difference: +{} (cloud costs more)",
            format_currency(rec.cost_difference)
        );
    } else if rec.cost_difference < 0.0 {
        println!(
            "├─ Cost difference: -{} (cloud costs less)",
            format_currency(-rec.cost_difference)
        );
    } else {
        println!("├─ Cost difference: ~$0 (similar cost)");
    }

    match rec.breakeven_secs {
        Some(secs) => println!(
            "├─ Break-even wait: {} (beyond this, bursting pays for itself)",
            format_signed_duration(secs as i64)
        ),
        None => println!("├─ Break-even wait: n/a"),
    }

    println!("└─ Confidence: {}", color_confidence(rec.confidence));

    println!("\nReasoning:");
    for reason in &rec.reasoning {
        println!("• {reason}");
    }

    print_info("this is advisory guidance; the submission decision stays with you");
}

fn display_insights(insights: &HistoryInsights) {
    print_heading("HISTORICAL INSIGHTS");

    if insights.similar_jobs_found == 0 {
        println!("No similar jobs found in your history");
        return;
    }

    println!("Similar jobs found: {}", insights.similar_jobs_found);
    println!("Confidence: {}", color_confidence(insights.confidence));

    if let Some(trends) = &insights.trends {
        println!("\nEfficiency patterns:");
        println!(
            "  CPU: {} average ({:?} trend)",
            color_efficiency(trends.cpu_efficiency_avg),
            trends.cpu_trend
        );
        println!(
            "  Memory: {} average ({:?} trend)",
            color_efficiency(trends.memory_efficiency_avg),
            trends.memory_trend
        );
        println!(
            "  Time: {} average ({:?} trend)",
            color_efficiency(trends.time_efficiency_avg),
            trends.time_trend
        );
    }

    if let Some(pattern) = &insights.pattern {
        println!("\nJob pattern:");
        println!("  Workload type: {}", pattern.workload_type.as_str());
        println!("  Typical effective CPUs: {:.1}", pattern.typical_effective_cpus);
        println!("  Typical memory usage: {:.1}GB", pattern.typical_memory_usage_gb);
        println!("  Success rate: {:.0}%", pattern.success_rate * 100.0);
    }
}

fn display_optimizations(optimizations: &[ResourceOptimization]) {
    print_heading("RESOURCE OPTIMIZATIONS");
    for opt in optimizations {
        println!(
            "\n{} optimization: {} -> {}",
            opt.change.label(),
            opt.change.current_display(),
            opt.change.suggested_display()
        );
        println!("  {}", opt.reasoning);
        println!(
            "  Confidence: {} ({:?} risk)",
            color_confidence(opt.confidence_level),
            opt.risk_level
        );
    }
}

fn display_budget(analysis: &BudgetAwareAnalysis) {
    print_heading("BUDGET STATUS");

    for warning in &analysis.enhanced.current.metadata.warnings {
        print_warning(warning);
    }

    if let Some(status) = &analysis.budget_status {
        println!("Account: {}", status.account);
        println!(
            "Available: {} of {} (health {}/100, {} risk)",
            format_currency(status.budget_available),
            format_currency(status.budget_limit),
            status.health_score,
            status.risk_level
        );
        println!("Grant days remaining: {}", status.grant_days_remaining);
        println!("Service guidance: {:?}", status.decision);
    }

    if let Some(check) = &analysis.affordability {
        if check.affordable {
            println!(
                "Affordability: the burst estimate fits ({:.1}% of remaining budget)",
                check.budget_impact.cost_as_percent_of_remaining
            );
        } else {
            print_warning(&format!(
                "burst estimate exceeds comfortable spend; service suggests {}",
                check.recommended_decision
            ));
        }
    }

    if let Some(rec) = &analysis.budget_recommendation {
        println!(
            "Budget-aware recommendation: {}",
            color_venue(rec.final_recommendation)
        );
        println!("  {}", rec.budget_influence);
        for advice in &rec.cost_optimization_advice {
            print_info(advice);
        }
    }

    if let Some(timeline) = &analysis.timeline_optimization {
        println!(
            "Deadline pressure: {:?} (urgency {:.2})",
            timeline.deadline_pressure, timeline.urgency_factor
        );
        println!("  {}", timeline.timeline_recommendation);
        for deadline in &timeline.critical_deadlines {
            print_warning(&format!(
                "{} '{}' in {} days",
                deadline.kind, deadline.name, deadline.days_until
            ));
        }
    }
}
