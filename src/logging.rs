use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use log::LevelFilter;

/// Initialize logging to a timestamped file inside `log_dir`.
///
/// `RUST_LOG` wins over `default_level` when it holds a valid level.
/// Returns the path of the log file.
pub fn init_logging(log_dir: &Path, default_level: LevelFilter) -> Result<PathBuf, Box<dyn std::error::Error>> {
    fs::create_dir_all(log_dir)?;
    let log_path = log_dir.join(log_file_name(chrono::Utc::now().timestamp()));

    let log_level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|level| level.parse::<LevelFilter>().ok())
        .unwrap_or(default_level);

    env_logger::Builder::new()
        .filter_level(log_level)
        .format(|buf, record| {
            writeln!(
                buf,
                "{}\t{}\t{} - {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .target(env_logger::Target::Pipe(Box::new(
            fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)?
        )))
        .try_init()?;

    log::info!("Logging initialized to: {}", log_path.display());
    log::info!("Log level: {}", log_level);

    Ok(log_path)
}

/// Level implied by the command line flags.
pub fn level_for(debug: bool, quiet: bool) -> LevelFilter {
    if quiet {
        LevelFilter::Error
    } else if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

pub fn log_file_name(unix_secs: i64) -> String {
    format!("tracetag_{}.log", unix_secs)
}

/// Get the system-specific log directory
pub fn default_log_dir() -> Result<PathBuf, Box<dyn std::error::Error>> {
    let log_dir = if cfg!(target_os = "macos") {
        // macOS: ~/Library/Logs/tracetag/
        dirs::home_dir()
            .ok_or("Could not find home directory")?
            .join("Library")
            .join("Logs")
            .join("tracetag")
    } else {
        dirs::data_local_dir()
            .ok_or("Could not find local data directory")?
            .join("tracetag")
            .join("logs")
    };

    Ok(log_dir)
}
