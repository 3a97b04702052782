//! Research-domain detection from script content and resource shape
//!
//! Scores every domain with `0.6 * script + 0.4 * resource`; anything under
//! 0.3 is reported as unknown with zero confidence. The keyword and resource
//! tables are co-located so the whole rule system is unit-testable.

use crate::models::{DomainClassification, JobRequest, ResearchDomain};
use std::path::Path;
use tracing::debug;

const SCRIPT_WEIGHT: f64 = 0.6;
const RESOURCE_WEIGHT: f64 = 0.4;
const MIN_CONFIDENCE: f64 = 0.3;

const KEYWORD_SCORE: f64 = 0.2;
const EXECUTABLE_SCORE: f64 = 0.3;
const EXTENSION_SCORE: f64 = 0.1;

/// Memory-per-CPU above this marks a request as memory-hungry.
const MEMORY_INTENSIVE_GB_PER_CPU: f64 = 4.0;

struct ScriptPattern {
    domain: ResearchDomain,
    keywords: &'static [&'static str],
    executables: &'static [&'static str],
    extensions: &'static [&'static str],
}

struct ResourcePattern {
    domain: ResearchDomain,
    typical_node_count: u32,
    gpu_required: bool,
    memory_intensive: bool,
}

static SCRIPT_PATTERNS: &[ScriptPattern] = &[
    ScriptPattern {
        domain: ResearchDomain::ClimateModeling,
        keywords: &["wrf", "gromacs", "namd", "climate", "weather", "atmospheric"],
        executables: &["wrf.exe", "gmx", "namd2", "real.exe"],
        extensions: &[".mdp", ".pdb", ".psf"],
    },
    ScriptPattern {
        domain: ResearchDomain::MachineLearning,
        keywords: &["pytorch", "tensorflow", "training", "model", "neural", "deep learning"],
        executables: &["python", "torchrun", "horovodrun"],
        extensions: &[".py", ".ipynb"],
    },
    ScriptPattern {
        domain: ResearchDomain::Bioinformatics,
        keywords: &["blast", "bwa", "samtools", "gatk", "genome", "sequence"],
        executables: &["blastp", "bwa", "samtools", "gatk"],
        extensions: &[".fasta", ".fastq", ".sam", ".bam"],
    },
    ScriptPattern {
        domain: ResearchDomain::ComputationalPhysics,
        keywords: &["lammps", "quantum", "vasp", "gaussian", "dft"],
        executables: &["lmp", "vasp", "g16", "qe.x"],
        extensions: &[".in", ".inp", ".com"],
    },
];

static RESOURCE_PATTERNS: &[ResourcePattern] = &[
    ResourcePattern {
        domain: ResearchDomain::ClimateModeling,
        typical_node_count: 16,
        gpu_required: false,
        memory_intensive: true,
    },
    ResourcePattern {
        domain: ResearchDomain::MachineLearning,
        typical_node_count: 8,
        gpu_required: true,
        memory_intensive: true,
    },
    ResourcePattern {
        domain: ResearchDomain::Bioinformatics,
        typical_node_count: 4,
        gpu_required: false,
        memory_intensive: true,
    },
    ResourcePattern {
        domain: ResearchDomain::ComputationalPhysics,
        typical_node_count: 8,
        gpu_required: false,
        memory_intensive: false,
    },
];

/// Classify a job, reading the script when a path is given.
pub fn detect_domain(script_path: Option<&Path>, job: &JobRequest) -> DomainClassification {
    let content = script_path.and_then(|path| std::fs::read_to_string(path).ok());
    detect_domain_from_content(
        content.as_deref(),
        script_path.map(|p| p.display().to_string()).as_deref(),
        job,
    )
}

/// Classification over already-loaded script text. Split out for tests.
pub fn detect_domain_from_content(
    content: Option<&str>,
    script_name: Option<&str>,
    job: &JobRequest,
) -> DomainClassification {
    let lowered = content.map(str::to_lowercase);

    let mut best_domain = ResearchDomain::Unknown;
    let mut best_score = 0.0f64;

    for pattern in SCRIPT_PATTERNS {
        let script = lowered
            .as_deref()
            .map(|text| script_score(pattern, text, script_name))
            .unwrap_or(0.0);
        let resource = resource_score(pattern.domain, job);
        let combined = SCRIPT_WEIGHT * script + RESOURCE_WEIGHT * resource;

        debug!(
            domain = pattern.domain.as_str(),
            script, resource, combined, "domain score"
        );

        if combined > best_score {
            best_score = combined;
            best_domain = pattern.domain;
        }
    }

    if best_score < MIN_CONFIDENCE {
        return DomainClassification {
            domain: ResearchDomain::Unknown,
            confidence: 0.0,
            detection_methods: vec!["insufficient_data".to_string()],
        };
    }

    let mut methods = Vec::new();
    if lowered.is_some() {
        methods.push("script_analysis".to_string());
    }
    methods.push("resource_pattern".to_string());

    DomainClassification {
        domain: best_domain,
        confidence: best_score,
        detection_methods: methods,
    }
}

fn script_score(pattern: &ScriptPattern, content: &str, script_name: Option<&str>) -> f64 {
    let mut score = 0.0;

    for keyword in pattern.keywords {
        if content.contains(keyword) {
            score += KEYWORD_SCORE;
        }
    }
    for executable in pattern.executables {
        if content.contains(executable) {
            score += EXECUTABLE_SCORE;
        }
    }
    if let Some(name) = script_name {
        for ext in pattern.extensions {
            if name.ends_with(ext) {
                score += EXTENSION_SCORE;
            }
        }
    }

    score.min(1.0)
}

fn resource_score(domain: ResearchDomain, job: &JobRequest) -> f64 {
    let Some(pattern) = RESOURCE_PATTERNS.iter().find(|p| p.domain == domain) else {
        return 0.0;
    };

    let mut score: f64 = 0.0;

    if pattern.gpu_required == job.has_gpus() {
        score += 0.3;
    }

    let typical = pattern.typical_node_count;
    if job.nodes >= typical / 2 && job.nodes <= typical * 2 {
        score += 0.2;
    }

    if let Some(gb_per_cpu) = job.requested_gb_per_cpu() {
        let memory_hungry = gb_per_cpu > MEMORY_INTENSIVE_GB_PER_CPU;
        if pattern.memory_intensive && memory_hungry {
            score += 0.3;
        } else if !pattern.memory_intensive && !memory_hungry {
            score += 0.2;
        }
    }

    score.min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    fn job(nodes: u32, cpus: u32, memory: &str, gpus: u32) -> JobRequest {
        let mut tres = HashMap::new();
        if gpus > 0 {
            tres.insert("gpu".to_string(), gpus);
        }
        JobRequest {
            job_name: "job".to_string(),
            nodes,
            ntasks_per_node: 1,
            cpus_per_task: cpus,
            time_limit: Duration::from_secs(3600),
            memory: memory.to_string(),
            tres,
            ..Default::default()
        }
    }

    #[test]
    fn test_plain_python_script_is_unknown() {
        let result =
            detect_domain_from_content(Some("python tool.py\n"), Some("tool.sbatch"), &job(1, 4, "8G", 0));
        assert_eq!(result.domain, ResearchDomain::Unknown);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.detection_methods, vec!["insufficient_data"]);
    }

    #[test]
    fn test_torchrun_with_gpus_is_machine_learning() {
        let content = "module load cuda\ntorchrun --nproc_per_node=4 train.py # pytorch\n";
        let result =
            detect_domain_from_content(Some(content), Some("train.sbatch"), &job(2, 16, "64G", 4));
        assert_eq!(result.domain, ResearchDomain::MachineLearning);
        assert!(result.confidence >= MIN_CONFIDENCE);
        assert!(result
            .detection_methods
            .contains(&"script_analysis".to_string()));
    }

    #[test]
    fn test_wrf_cluster_job_is_climate_modeling() {
        let content = "export WRF_DIR=/opt/wrf\nmpirun ./wrf.exe\n# atmospheric forecast\n";
        let result =
            detect_domain_from_content(Some(content), Some("forecast.sbatch"), &job(16, 8, "48G", 0));
        assert_eq!(result.domain, ResearchDomain::ClimateModeling);
        assert!(result.confidence >= MIN_CONFIDENCE);
    }

    #[test]
    fn test_alignment_pipeline_is_bioinformatics() {
        let content = "bwa mem ref.fasta reads.fastq | samtools sort -o out.bam\n# genome alignment\n";
        let result =
            detect_domain_from_content(Some(content), Some("align.sbatch"), &job(4, 8, "64G", 0));
        assert_eq!(result.domain, ResearchDomain::Bioinformatics);
        assert!(result.confidence >= MIN_CONFIDENCE);
    }

    #[test]
    fn test_lammps_run_is_computational_physics() {
        let content = "module load lammps\nsrun lmp -in bench.in # quantum dft\n";
        let result =
            detect_domain_from_content(Some(content), Some("bench.sbatch"), &job(8, 16, "32G", 0));
        assert_eq!(result.domain, ResearchDomain::ComputationalPhysics);
        assert!(result.confidence >= MIN_CONFIDENCE);
    }

    #[test]
    fn test_no_script_relies_on_resources_alone() {
        // Resource score alone peaks at 0.4 * 1.0 = 0.4, reachable only with
        // a full match; a GPU-free single node job stays unknown.
        let result = detect_domain_from_content(None, None, &job(1, 4, "8G", 0));
        assert_eq!(result.domain, ResearchDomain::Unknown);
    }

    #[test]
    fn test_script_score_caps_at_one() {
        let pattern = &SCRIPT_PATTERNS[1];
        let content = "pytorch tensorflow training model neural deep learning python torchrun horovodrun";
        assert_eq!(script_score(pattern, content, Some("x.py")), 1.0);
    }

    #[test]
    fn test_resource_score_components() {
        // ML pattern: gpu match 0.3 + nodes in window 0.2 + memory hungry 0.3
        let heavy = job(8, 4, "256G", 2);
        assert!((resource_score(ResearchDomain::MachineLearning, &heavy) - 0.8).abs() < 1e-9);

        // Physics pattern rewards lean memory with the smaller increment.
        let lean = job(8, 8, "16G", 0);
        assert!((resource_score(ResearchDomain::ComputationalPhysics, &lean) - 0.7).abs() < 1e-9);
    }
}
