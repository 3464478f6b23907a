use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "keel",
    about = "Inspect and edit synchronized wallet storage",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Store document to operate on (overrides the config file)
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Read a stored value
    Get(GetArgs),
    /// Write a value
    Set(SetArgs),
    /// List stored keys
    Keys,
    /// Show the built-in network catalog
    Networks(NetworksArgs),
}

#[derive(Args)]
pub struct GetArgs {
    pub key: String,
    /// Value to print when the key is absent (JSON, or a bare string)
    #[arg(long)]
    pub fallback: Option<String>,
}

#[derive(Args)]
pub struct SetArgs {
    pub key: String,
    /// New value (JSON, or a bare string)
    pub value: String,
}

#[derive(Args)]
pub struct NetworksArgs {
    /// Include disabled networks
    #[arg(long)]
    pub all: bool,
}
