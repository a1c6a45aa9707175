use eyre::{Result, WrapErr};
use std::path::PathBuf;
use std::process::ExitCode;
use tracetag::cli::Cli;
use tracetag::config::Config;
use tracetag::inventory::InventoryClient;
use tracetag::probe::{Platform, Prober};
use tracetag::tagger::{self, Tagger};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = tracetag::cli::parse();

    // Initialize logging first
    let log_dir = args
        .logfolder
        .clone()
        .or_else(|| tracetag::default_log_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));
    let log_path = match tracetag::init_logging(&log_dir, tracetag::logging::level_for(args.debug, args.quiet)) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("Error in config log: {}", e);
            return Ok(ExitCode::FAILURE);
        }
    };

    log::info!("================================================================================");
    log::info!("NEW TRACETAG RUN STARTING");
    log::info!("================================================================================");

    let config = load_config(&args)?;

    if let Some(target) = &args.target {
        return probe_once(target, &config).await;
    }

    let probe = tagger::system_probe(&config.probe)?;
    let inventory = InventoryClient::new(&config.inventory)?;
    let tagger = Tagger::new(inventory, probe, config);

    println!("Running...");
    let summary = tagger.run().await.wrap_err("Tagging run failed")?;

    println!(
        "Processed {} records: {} probed, {} reached, {} updates applied, {} failed",
        summary.records, summary.probed, summary.reached, summary.updates_applied, summary.updates_failed
    );
    println!("Completed! View log at {}", log_path.display());
    Ok(ExitCode::SUCCESS)
}

/// Read the config file and apply command line overrides.
/// A missing file is only acceptable for a one-off probe.
fn load_config(args: &Cli) -> Result<Config> {
    let mut config = if args.config.exists() || args.target.is_none() {
        Config::load(&args.config)?
    } else {
        log::debug!("[main] config_absent: path={} using defaults", args.config.display());
        Config::default()
    };

    if let Some(hops) = args.hops {
        if hops == 0 {
            eyre::bail!("--hops must be at least 1");
        }
        config.probe.hops = hops;
    }
    if let Some(timeout) = args.timeout {
        if timeout == 0 {
            eyre::bail!("--timeout must be at least 1");
        }
        config.probe.timeout_ms = timeout;
    }
    if let Some(strategy) = args.strategy {
        config.probe.strategy = strategy;
    }

    Ok(config)
}

async fn probe_once(target: &str, config: &Config) -> Result<ExitCode> {
    let platform = Platform::from_choice(config.probe.strategy)?;
    let hops = config.probe.hops;
    let timeout_ms = config.probe.timeout_ms;

    println!("traceroute to {}, {} hops max, {}ms timeout", target, hops, timeout_ms);

    let destination = target.to_string();
    let outcome = tokio::task::spawn_blocking(move || {
        Prober::with_platform(&destination, hops, timeout_ms, platform).run()
    })
    .await
    .wrap_err("Probe worker failed")?
    .wrap_err_with(|| format!("Probe of {} failed", target))?;

    println!("{}: {}", target, outcome);
    Ok(if outcome.reached {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}
