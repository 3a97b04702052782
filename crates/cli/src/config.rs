//! Configuration loading for the CLI
//!
//! Layered: optional YAML file (explicit `--config` or `~/.asba/config.yaml`),
//! then `ASBA_*` environment overrides. Missing files are fine; every
//! setting has a default.

use anyhow::{Context, Result};
use asba_lib::AdvisorSettings;
use std::path::{Path, PathBuf};
use tracing::debug;

pub fn load_settings(config_path: Option<&Path>) -> Result<AdvisorSettings> {
    let mut builder = config::Config::builder();

    let file = config_path
        .map(Path::to_path_buf)
        .or_else(default_config_path);
    if let Some(path) = file {
        let required = config_path.is_some();
        debug!(path = %path.display(), required, "loading configuration file");
        builder = builder.add_source(config::File::from(path).required(required));
    }

    let settings: AdvisorSettings = builder
        .add_source(config::Environment::with_prefix("ASBA").separator("__"))
        .build()
        .context("failed to assemble configuration")?
        .try_deserialize()
        .unwrap_or_default();

    settings
        .validate()
        .context("configuration failed validation")?;
    Ok(settings)
}

fn default_config_path() -> Option<PathBuf> {
    let path = dirs::home_dir()?.join(".asba").join("config.yaml");
    path.exists().then_some(path)
}

/// The user owning the history store and the report.
pub fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_config_file() {
        let settings = load_settings(None).unwrap();
        assert_eq!(settings.analysis.deadline_seconds, 30);
        assert_eq!(settings.cloud.startup_minutes, 3);
    }

    #[test]
    fn test_explicit_config_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "analysis:\n  deadline_seconds: 10\ncloud:\n  region: us-west-2\n",
        )
        .unwrap();

        let settings = load_settings(Some(&path)).unwrap();
        assert_eq!(settings.analysis.deadline_seconds, 10);
        assert_eq!(settings.cloud.region, "us-west-2");
    }

    #[test]
    fn test_current_user_never_empty() {
        assert!(!current_user().is_empty());
    }
}
