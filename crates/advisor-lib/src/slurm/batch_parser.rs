//! Submit-script parser
//!
//! Scans the `#SBATCH` directive block at the top of a script and produces a
//! `BatchScript`. Directives the advisor does not model are kept verbatim in
//! `raw_directives`. Parsing stops at the first executable line.

use crate::error::{AdvisorError, Result};
use crate::models::{parse_slurm_time, BatchScript};
use std::path::Path;
use tracing::warn;

/// Parse a submit script from disk.
pub fn parse_batch_script(path: &Path) -> Result<BatchScript> {
    let content = std::fs::read_to_string(path).map_err(|e| AdvisorError::Permission {
        operation: "parse_batch_script".to_string(),
        message: format!("failed to read {}", path.display()),
        source: Some(e),
    })?;

    let mut script = parse_batch_content(&content)?;
    script.filename = path.display().to_string();
    Ok(script)
}

/// Parse submit-script text. Split out for tests.
pub(crate) fn parse_batch_content(content: &str) -> Result<BatchScript> {
    let mut script = BatchScript::default();

    for (line_num, raw_line) in content.lines().enumerate() {
        let line = raw_line.trim();

        // The directive block ends at the first non-comment line.
        if !line.is_empty() && !line.starts_with('#') {
            break;
        }

        let Some(directive) = line.strip_prefix("#SBATCH") else {
            continue;
        };
        let directive = directive.trim();
        if directive.is_empty() {
            continue;
        }

        if let Err(e) = parse_directive(&mut script, directive) {
            warn!(line = line_num + 1, directive, error = %e, "skipping unparseable directive");
        }
    }

    validate_batch_script(&script)?;
    Ok(script)
}

fn parse_directive(script: &mut BatchScript, directive: &str) -> Result<()> {
    let args = split_directive_args(directive)?;
    let Some(first) = args.first() else {
        return Ok(());
    };

    let value = extract_value(first, &args);
    script
        .raw_directives
        .insert(flag_name(first), value.clone());

    match first.as_str() {
        arg if arg.starts_with("--job-name") || arg == "-J" => script.job_name = value,
        arg if arg.starts_with("--partition") || arg == "-p" => script.partition = value,
        arg if arg.starts_with("--nodes") || arg == "-N" => {
            script.nodes = parse_node_spec(&value);
        }
        arg if arg.starts_with("--ntasks-per-node") => {
            if let Ok(tasks) = value.parse() {
                script.ntasks_per_node = tasks;
            }
        }
        arg if arg.starts_with("--ntasks") || arg == "-n" => {
            // Derive node count when only a task total was given.
            if let Ok(ntasks) = value.parse::<u32>() {
                if script.nodes == 0 && script.ntasks_per_node > 0 {
                    script.nodes = ntasks.div_ceil(script.ntasks_per_node);
                }
            }
        }
        arg if arg.starts_with("--cpus-per-task") || arg == "-c" => {
            if let Ok(cpus) = value.parse() {
                script.cpus_per_task = cpus;
            }
        }
        arg if arg.starts_with("--time") || arg == "-t" => {
            script.time_limit = parse_slurm_time(&value).unwrap_or_default();
        }
        arg if arg.starts_with("--mem-per-cpu") => {
            script.memory = format!("{value}-per-cpu");
        }
        arg if arg.starts_with("--mem-per-gpu") => {
            script.memory = format!("{value}-per-gpu");
        }
        arg if arg.starts_with("--mem") => script.memory = value,
        arg if arg.starts_with("--gres") => parse_gres(script, &value),
        arg if arg.starts_with("--account") || arg == "-A" => script.account = value,
        arg if arg.starts_with("--qos") || arg == "-q" => script.qos = value,
        arg if arg.starts_with("--constraint") || arg == "-C" => {
            script
                .constraints
                .extend(value.split('&').map(str::to_string));
        }
        arg if arg.starts_with("--exclusive") => {
            script
                .raw_directives
                .insert("exclusive".to_string(), "true".to_string());
        }
        _ => {}
    }

    Ok(())
}

/// Split a directive into arguments, honoring quoting and escapes.
fn split_directive_args(directive: &str) -> Result<Vec<String>> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = directive.chars().peekable();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (None, '"' | '\'') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            (None, ' ') => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            (Some(_), '\\') => {
                let escaped = chars.next().unwrap_or('\\');
                current.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => other,
                });
            }
            (_, c) => current.push(c),
        }
    }

    if quote.is_some() {
        return Err(AdvisorError::validation(
            "split_directive_args",
            format!("unclosed quote in directive: {directive}"),
        ));
    }
    if !current.is_empty() {
        args.push(current);
    }
    Ok(args)
}

/// Extract the value from `--flag=value` or `--flag value` forms.
fn extract_value(first: &str, args: &[String]) -> String {
    if let Some((_, value)) = first.split_once('=') {
        return value.to_string();
    }
    args.get(1).cloned().unwrap_or_default()
}

fn flag_name(first: &str) -> String {
    let name = first.split('=').next().unwrap_or(first);
    name.trim_start_matches('-').to_string()
}

/// Node specs may be a plain count or a range list like `node[01-04]`.
fn parse_node_spec(spec: &str) -> u32 {
    if let Ok(count) = spec.parse() {
        return count;
    }

    if let (Some(open), Some(close)) = (spec.find('['), spec.find(']')) {
        if open < close {
            let inner = &spec[open + 1..close];
            if let Some((start, end)) = inner.split_once('-') {
                if let (Ok(start), Ok(end)) = (start.parse::<u32>(), end.parse::<u32>()) {
                    if end >= start {
                        return end - start + 1;
                    }
                }
            }
            return inner.split(',').count() as u32;
        }
    }

    1
}

/// Parse `gpu:4` or `gpu:a100:4` style generic-resource specs.
fn parse_gres(script: &mut BatchScript, spec: &str) {
    for entry in spec.split(',') {
        let parts: Vec<&str> = entry.split(':').collect();
        if parts.len() < 2 {
            continue;
        }
        let resource = parts[0].to_string();
        if let Ok(count) = parts[parts.len() - 1].parse() {
            script.gres.insert(resource, count);
        }
    }
}

fn validate_batch_script(script: &BatchScript) -> Result<()> {
    if script.nodes == 0 && script.cpus_per_task == 0 && script.time_limit.is_zero() {
        return Err(AdvisorError::validation(
            "parse_batch_script",
            "script contains no recognizable resource directives",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const ML_SCRIPT: &str = "#!/bin/bash\n\
        #SBATCH --job-name=train-resnet\n\
        #SBATCH --partition=gpu\n\
        #SBATCH --nodes=2\n\
        #SBATCH --ntasks-per-node=1\n\
        #SBATCH --cpus-per-task=16\n\
        #SBATCH --mem=64G\n\
        #SBATCH --gres=gpu:4\n\
        #SBATCH --time=4:00:00\n\
        #SBATCH --account=NSF-ABC123\n\
        \n\
        torchrun train.py --epochs 50\n";

    #[test]
    fn test_parse_full_directive_block() {
        let script = parse_batch_content(ML_SCRIPT).unwrap();
        assert_eq!(script.job_name, "train-resnet");
        assert_eq!(script.partition, "gpu");
        assert_eq!(script.nodes, 2);
        assert_eq!(script.ntasks_per_node, 1);
        assert_eq!(script.cpus_per_task, 16);
        assert_eq!(script.memory, "64G");
        assert_eq!(script.gres.get("gpu"), Some(&4));
        assert_eq!(script.time_limit, Duration::from_secs(4 * 3600));
        assert_eq!(script.account, "NSF-ABC123");
    }

    #[test]
    fn test_directives_after_first_command_ignored() {
        let content = "#SBATCH --nodes=2\necho hello\n#SBATCH --nodes=8\n";
        let script = parse_batch_content(content).unwrap();
        assert_eq!(script.nodes, 2);
    }

    #[test]
    fn test_short_flags() {
        let content = "#SBATCH -N 4\n#SBATCH -c 8\n#SBATCH -t 30:00\n#SBATCH -A geo-lab\n";
        let script = parse_batch_content(content).unwrap();
        assert_eq!(script.nodes, 4);
        assert_eq!(script.cpus_per_task, 8);
        assert_eq!(script.time_limit, Duration::from_secs(1800));
        assert_eq!(script.account, "geo-lab");
    }

    #[test]
    fn test_typed_gres() {
        let content = "#SBATCH --nodes=1\n#SBATCH --gres=gpu:a100:2\n";
        let script = parse_batch_content(content).unwrap();
        assert_eq!(script.gres.get("gpu"), Some(&2));
    }

    #[test]
    fn test_constraints_split_on_ampersand() {
        let content = "#SBATCH --nodes=1\n#SBATCH --constraint=skylake&ib\n";
        let script = parse_batch_content(content).unwrap();
        assert_eq!(script.constraints, vec!["skylake", "ib"]);
    }

    #[test]
    fn test_exclusive_and_array_recorded_raw() {
        let content = "#SBATCH --nodes=1\n#SBATCH --exclusive\n#SBATCH --array=1-10\n";
        let script = parse_batch_content(content).unwrap();
        assert!(script.is_exclusive());
        assert!(script.is_array_job());
    }

    #[test]
    fn test_ntasks_derives_nodes() {
        let content = "#SBATCH --ntasks-per-node=4\n#SBATCH --ntasks=10\n#SBATCH --time=1:00:00\n";
        let script = parse_batch_content(content).unwrap();
        assert_eq!(script.nodes, 3);
    }

    #[test]
    fn test_mem_per_cpu_marked() {
        let content = "#SBATCH --nodes=1\n#SBATCH --mem-per-cpu=4G\n";
        let script = parse_batch_content(content).unwrap();
        assert_eq!(script.memory, "4G-per-cpu");
    }

    #[test]
    fn test_empty_script_rejected() {
        assert!(parse_batch_content("#!/bin/bash\necho hi\n").is_err());
    }

    #[test]
    fn test_node_range_spec() {
        assert_eq!(parse_node_spec("4"), 4);
        assert_eq!(parse_node_spec("node[01-04]"), 4);
        assert_eq!(parse_node_spec("node[1,3,5]"), 3);
        assert_eq!(parse_node_spec("weird"), 1);
    }
}
