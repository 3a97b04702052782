//! The `detect-domain` command

use crate::output::{color_confidence, print_heading};
use anyhow::{Context, Result};
use asba_lib::domain::{detect_domain, profile_for};
use asba_lib::slurm::parse_batch_script;
use std::path::Path;

pub fn run(script: &Path) -> Result<()> {
    let batch = parse_batch_script(script)
        .with_context(|| format!("failed to parse {}", script.display()))?;
    let classification = detect_domain(Some(script), &batch.to_job_request());

    print_heading("DOMAIN DETECTION");
    println!("Script: {}", script.display());
    println!("Domain: {}", classification.domain.as_str());
    println!("Confidence: {}", color_confidence(classification.confidence));
    println!(
        "Detection methods: {}",
        classification.detection_methods.join(", ")
    );

    let profile = profile_for(classification.domain);
    println!("\nProfile:");
    println!(
        "  Communication pattern: {}",
        serde_json::to_string(&profile.communication_pattern)?.trim_matches('"')
    );
    println!("  MPI library: {}", profile.preferred_mpi_library);
    println!("  Requires EFA: {}", profile.requires_efa);
    println!(
        "  Gang scheduling: {}",
        profile.requires_gang_scheduling
    );
    println!(
        "  Preferred instances: {}",
        profile.optimal_instance_types.join(", ")
    );

    Ok(())
}
