//! `validate` command implementation.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

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
    uri: String,
    scheme: String,
    num_workers: usize,
    target_count: usize,
    topic_count: usize,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

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

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(config) => {
            let warnings = collect_warnings(&config);
            let topics = config.topic_names();
            let mut distinct: Vec<&String> = topics.values().collect();
            distinct.sort();
            distinct.dedup();

            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: (!warnings.is_empty()).then_some(warnings),
                summary: Some(ConfigSummary {
                    uri: config.uri.clone(),
                    scheme: config
                        .scheme()
                        .map(|s| s.as_str().to_string())
                        .unwrap_or_default(),
                    num_workers: config.num_workers,
                    target_count: config.targets.len(),
                    topic_count: distinct.len(),
                }),
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

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(config: &contracts::SinkConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.topic_name.is_some() && config.targets.len() > 1 {
        warnings.push(format!(
            "topic_name override sends all {} targets to one topic",
            config.targets.len()
        ));
    }

    if config.num_workers == 1 {
        warnings.push("num_workers = 1 - every key shares a single publisher".to_string());
    }

    if config.mailbox_capacity > 1024 {
        warnings.push(format!(
            "mailbox_capacity = {} - flush may wait on a long queue",
            config.mailbox_capacity
        ));
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  URI: {} ({})", summary.uri, summary.scheme);
            println!("  Workers: {}", summary.num_workers);
            println!("  Targets: {}", summary.target_count);
            println!("  Topics: {}", summary.topic_count);
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
