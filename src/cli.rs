use crate::config::DEFAULT_CONFIG_PATH;
use crate::probe::platform::StrategyChoice;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "tracetag")]
#[command(about = "Probe inventory IP addresses and tag them by reachability")]
pub struct Cli {
    /// Probe this host once and print the outcome instead of walking the inventory
    pub target: Option<String>,

    /// Config file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Enable debug output
    #[arg(short, long)]
    pub debug: bool,

    /// Quiet mode - log only errors
    #[arg(short, long)]
    pub quiet: bool,

    /// Log folder path
    #[arg(short, long)]
    pub logfolder: Option<PathBuf>,

    /// Maximum number of hops (overrides the config file)
    #[arg(long)]
    pub hops: Option<u8>,

    /// Per-hop timeout in milliseconds (overrides the config file)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Probing strategy (overrides the config file)
    #[arg(long, value_enum)]
    pub strategy: Option<StrategyChoice>,
}

pub fn parse() -> Cli {
    Cli::parse()
}
