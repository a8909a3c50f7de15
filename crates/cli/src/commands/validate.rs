//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::{DeliveryConfig, Destination};
use serde::Serialize;
use std::path::Path;
use tracing::info;

use crate::cli::{Cli, ValidateArgs};

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    storage_dir: String,
    workers: usize,
    default_limit: u32,
    suffix_limit_count: usize,
    snapshot_interval_ms: u64,
    max_attempts: Option<u32>,
    queue_limits: Vec<(Destination, usize)>,
}

/// Execute the `validate` command
pub fn run_validate(cli: &Cli, args: &ValidateArgs) -> Result<()> {
    let path = cli
        .config
        .as_deref()
        .context("No configuration file given (use --config or TELEMETRY_DELIVERY_CONFIG)")?;
    info!(config = %path.display(), "Validating configuration");

    let result = validate_config(path);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(path: &Path) -> ValidationResult {
    let config_path = path.display().to_string();

    if !path.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", path.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(path) {
        Ok(config) => {
            let warnings = collect_warnings(&config);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(summarize(&config)),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

fn summarize(config: &DeliveryConfig) -> ConfigSummary {
    ConfigSummary {
        version: format!("{:?}", config.version),
        storage_dir: config.storage_dir.display().to_string(),
        workers: config.workers,
        default_limit: config.rate_limits.default_limit,
        suffix_limit_count: config.rate_limits.domain_suffix_limits.len(),
        snapshot_interval_ms: config.snapshot.interval_ms,
        max_attempts: config.retry.max_attempts,
        queue_limits: Destination::ALL
            .into_iter()
            .map(|destination| (destination, config.max_pending(destination)))
            .collect(),
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(config: &DeliveryConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.retry.max_attempts.is_none() {
        warnings.push("retry.max_attempts is unset - failing calls are retried forever".to_string());
    }

    if config.rate_limits.default_limit == 0 {
        warnings.push(
            "rate_limits.default_limit is 0 - network capture is disabled for unlisted domains"
                .to_string(),
        );
    }

    for (suffix, limit) in &config.rate_limits.domain_suffix_limits {
        if *limit == 0 {
            warnings.push(format!("Capture disabled for domains ending in '{}'", suffix));
        }
    }

    if !config.storage_dir.exists() {
        warnings.push(format!(
            "storage_dir {} does not exist yet - it will be created",
            config.storage_dir.display()
        ));
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Storage: {}", summary.storage_dir);
            println!("  Workers: {}", summary.workers);
            println!(
                "  Rate limits: default {} + {} suffixes",
                summary.default_limit, summary.suffix_limit_count
            );
            println!("  Snapshot interval: {} ms", summary.snapshot_interval_ms);
            match summary.max_attempts {
                Some(max) => println!("  Max attempts: {}", max),
                None => println!("  Max attempts: unbounded"),
            }
            for (destination, limit) in &summary.queue_limits {
                println!("  Queue limit {}: {}", destination, limit);
            }
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config_with_warnings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("delivery.toml");
        std::fs::write(
            &path,
            format!(
                "storage_dir = \"{}\"\n[retry]\n[rate_limits.domain_suffix_limits]\n\"ads.example\" = 0\n",
                dir.path().display()
            ),
        )
        .unwrap();

        let result = validate_config(&path);
        assert!(result.valid, "{:?}", result.error);
        let warnings = result.warnings.unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("ads.example"));
    }

    #[test]
    fn test_invalid_config_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("delivery.toml");
        std::fs::write(&path, "workers = 0\n").unwrap();

        let result = validate_config(&path);
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("workers"));
    }

    #[test]
    fn test_missing_file() {
        let result = validate_config(Path::new("/nonexistent/delivery.toml"));
        assert!(!result.valid);
        assert!(result.summary.is_none());
    }
}
