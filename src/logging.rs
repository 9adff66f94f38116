// src/logging.rs

use std::path::{Path, PathBuf};

use color_eyre::eyre::{Result, WrapErr};
use directories::ProjectDirs;
use lazy_static::lazy_static;
use time::macros::format_description;
use tracing_error::ErrorLayer;
use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

lazy_static! {
    pub static ref PROJECT_NAME: String = env!("CARGO_CRATE_NAME").to_uppercase();
    /// Filter override read when `RUST_LOG` is unset, e.g. `vanguard_grab=debug`.
    pub static ref LOG_ENV: String = format!("{}_LOGLEVEL", *PROJECT_NAME);
    pub static ref LOG_FILE: String = format!("{}.log", env!("CARGO_PKG_NAME"));
}

fn project_dir(pick: fn(&ProjectDirs) -> &Path, fallback: &str) -> PathBuf {
    ProjectDirs::from("io", "vanguard", env!("CARGO_PKG_NAME"))
        .map(|dirs| pick(&dirs).to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".").join(fallback))
}

/// Where the log file is written.
pub fn get_data_dir() -> PathBuf {
    project_dir(ProjectDirs::data_local_dir, ".data")
}

/// Where `config.json` is looked up when no explicit path is given.
pub fn get_config_dir() -> PathBuf {
    project_dir(ProjectDirs::config_dir, ".config")
}

fn filter_directive() -> String {
    std::env::var("RUST_LOG")
        .or_else(|_| std::env::var(LOG_ENV.as_str()))
        .unwrap_or_else(|_| format!("{}=info", env!("CARGO_CRATE_NAME")))
}

/// Installs file-based logging.
///
/// Reports go to stdout one JSON object per line, so diagnostics never do.
pub fn initialize_logging() -> Result<()> {
    let directory = get_data_dir();
    std::fs::create_dir_all(&directory)
        .wrap_err_with(|| format!("failed to create {}", directory.display()))?;
    let log_path = directory.join(LOG_FILE.as_str());
    let log_file = std::fs::File::create(&log_path)
        .wrap_err_with(|| format!("failed to open {}", log_path.display()))?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_timer(LocalTime::new(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second]"
        )))
        .with_target(false)
        .with_ansi(false)
        .with_filter(EnvFilter::new(filter_directive()));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(ErrorLayer::default())
        .try_init()
        .wrap_err("failed to install the tracing subscriber")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_the_package() {
        assert_eq!(LOG_ENV.as_str(), "VANGUARD_GRAB_LOGLEVEL");
        assert_eq!(LOG_FILE.as_str(), "vanguard-grab.log");
    }
}
