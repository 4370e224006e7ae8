//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::SinkConfig;
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    uri: String,
    scheme: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    topic_name: Option<String>,
    workers: WorkerInfo,
    encoding: EncodingInfo,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    targets: Vec<TargetInfo>,
}

#[derive(Serialize)]
struct WorkerInfo {
    num_workers: usize,
    mailbox_capacity: usize,
}

#[derive(Serialize)]
struct EncodingInfo {
    format: String,
    envelope: String,
}

#[derive(Serialize)]
struct TargetInfo {
    id: u32,
    name: String,
    topic: String,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let config = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let info = build_config_info(&config, args);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&config, args);
    }

    Ok(())
}

fn build_config_info(config: &SinkConfig, args: &InfoArgs) -> ConfigInfo {
    let topics = config.topic_names();
    let targets = if args.targets {
        config
            .targets
            .iter()
            .map(|t| TargetInfo {
                id: t.id.get(),
                name: t.name.clone(),
                topic: topics.get(&t.id).cloned().unwrap_or_default(),
            })
            .collect()
    } else {
        Vec::new()
    };

    ConfigInfo {
        uri: config.uri.clone(),
        scheme: config
            .scheme()
            .map(|s| s.as_str().to_string())
            .unwrap_or_default(),
        topic_name: config.topic_name.clone(),
        workers: WorkerInfo {
            num_workers: config.num_workers,
            mailbox_capacity: config.mailbox_capacity,
        },
        encoding: EncodingInfo {
            format: config.format.to_string(),
            envelope: config.envelope.to_string(),
        },
        targets,
    }
}

fn print_config_info(config: &SinkConfig, args: &InfoArgs) {
    println!("=== cdc-pubsub configuration ===\n");

    println!("Sink");
    println!("   ├─ URI: {}", config.uri);
    println!("   ├─ Workers: {}", config.num_workers);
    println!("   ├─ Mailbox capacity: {}", config.mailbox_capacity);
    println!("   └─ Encoding: {} / {}", config.format, config.envelope);

    let topics = config.topic_names();
    println!("\nTargets ({})", config.targets.len());
    if args.targets {
        for (i, target) in config.targets.iter().enumerate() {
            let prefix = if i == config.targets.len() - 1 { "└─" } else { "├─" };
            let topic = topics.get(&target.id).map(String::as_str).unwrap_or("?");
            println!("   {} {} ({}) -> {}", prefix, target.id, target.name, topic);
        }
    } else {
        println!("   └─ pass --targets to list them");
    }

    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{SourceId, TargetConfig};

    #[test]
    fn test_build_config_info_with_override() {
        let mut config = SinkConfig::new(
            "log://stdout",
            vec![
                TargetConfig {
                    id: SourceId::new(7),
                    name: "orders".to_string(),
                },
                TargetConfig {
                    id: SourceId::new(8),
                    name: "users".to_string(),
                },
            ],
        );
        config.topic_name = Some("everything".to_string());

        let args = InfoArgs {
            config: "sink.toml".into(),
            json: true,
            targets: true,
        };
        let info = build_config_info(&config, &args);

        assert_eq!(info.scheme, "log");
        assert_eq!(info.encoding.format, "json");
        assert_eq!(info.targets.len(), 2);
        assert!(info.targets.iter().all(|t| t.topic == "everything"));
        assert_eq!(info.targets[1].id, 8);
    }
}
