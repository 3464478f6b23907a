use std::sync::Arc;

use colored::Colorize;
use serde_json::{json, Value};
use tracing::{debug, info};

use keel_store::{FileKeyValueStore, KeyValueStore};
use keel_sync::StorageContext;
use keel_types::NETWORKS;

use crate::cli::*;
use crate::config::CliConfig;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = CliConfig::resolve(cli.config.as_deref(), cli.store.as_deref())?;
    let format = cli.format;
    match cli.command {
        Command::Get(args) => cmd_get(&config, args, format).await,
        Command::Set(args) => cmd_set(&config, args, format).await,
        Command::Keys => cmd_keys(&config, format).await,
        Command::Networks(args) => cmd_networks(args, format),
    }
}

fn context(config: &CliConfig) -> anyhow::Result<StorageContext> {
    debug!(path = %config.store.display(), "opening store");
    let store: Arc<dyn KeyValueStore> = Arc::new(FileKeyValueStore::open(&config.store)?);
    Ok(StorageContext::new(store, config.sync.clone()))
}

/// Values on the command line are JSON; anything that does not parse is
/// taken as a plain string.
pub(crate) fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

async fn cmd_get(config: &CliConfig, args: GetArgs, format: OutputFormat) -> anyhow::Result<()> {
    let ctx = context(config)?;
    let fallback = args.fallback.as_deref().map(parse_value);
    let cell = ctx.open::<Value>(args.key.as_str(), fallback).await?;
    let value = cell.read();
    match format {
        OutputFormat::Json => println!("{}", json!({ "key": args.key, "value": value })),
        OutputFormat::Text => println!("{}", serde_json::to_string_pretty(&value)?),
    }
    Ok(())
}

async fn cmd_set(config: &CliConfig, args: SetArgs, format: OutputFormat) -> anyhow::Result<()> {
    let ctx = context(config)?;
    let value = parse_value(&args.value);
    let cell = ctx.open::<Value>(args.key.as_str(), Some(Value::Null)).await?;
    cell.write(value.clone()).await?;
    info!(key = %args.key, "value written");
    match format {
        OutputFormat::Json => println!("{}", json!({ "key": args.key, "value": value })),
        OutputFormat::Text => println!(
            "{} {} = {}",
            "✓".green().bold(),
            args.key.yellow(),
            value
        ),
    }
    Ok(())
}

async fn cmd_keys(config: &CliConfig, format: OutputFormat) -> anyhow::Result<()> {
    let ctx = context(config)?;
    let mut keys: Vec<String> = ctx
        .store()
        .get_all()
        .await?
        .into_keys()
        .map(|k| k.into_string())
        .collect();
    keys.sort();
    debug!(count = keys.len(), "listing keys");
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(&keys)?),
        OutputFormat::Text if keys.is_empty() => {
            println!("No keys in {}.", config.store.display().to_string().bold())
        }
        OutputFormat::Text => {
            for key in &keys {
                println!("{key}");
            }
        }
    }
    Ok(())
}

fn cmd_networks(args: NetworksArgs, format: OutputFormat) -> anyhow::Result<()> {
    let networks: Vec<_> = NETWORKS.iter().filter(|n| args.all || !n.disabled).collect();
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&networks)?),
        OutputFormat::Text => {
            for network in networks {
                let id = if network.is_mainnet() {
                    network.id.green().bold()
                } else {
                    network.id.cyan()
                };
                println!("{:<12} {:<6} {}", id, network.kind.to_string(), network.rpc_base_url);
                println!("  {}", network.description.dimmed());
            }
        }
    }
    Ok(())
}
