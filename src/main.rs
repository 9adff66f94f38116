// src/main.rs

use color_eyre::eyre::{eyre, Result, WrapErr};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use vanguard_grab::core::config::ScanFlags;
use vanguard_grab::core::models::ScanTarget;
use vanguard_grab::core::scanner::{ModuleKind, ScanModule};
use vanguard_grab::logging::initialize_logging;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    initialize_logging()?;

    let kind = match std::env::args().nth(1) {
        Some(arg) => arg
            .parse::<ModuleKind>()
            .map_err(|_| eyre!("unknown module {:?}, expected `http` or `ipp`", arg))?,
        None => ModuleKind::Http,
    };
    let flags = ScanFlags::load().wrap_err("failed to load configuration")?;
    let module = ScanModule::init(kind, &flags)?;

    info!(module = %module.name(), "Reading targets from stdin.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut scanned = 0usize;

    // One target per line: `ip`, `domain` or `ip,domain`, optionally `,port`.
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let target = match line.parse::<ScanTarget>() {
            Ok(target) => target,
            Err(e) => {
                warn!(error = %e, "Skipping target line.");
                continue;
            }
        };

        let report = module.scan(&target).await;
        let mut json = serde_json::to_vec(&report)?;
        json.push(b'\n');
        stdout.write_all(&json).await?;
        scanned += 1;
    }
    stdout.flush().await?;

    info!(targets = scanned, "Done.");
    Ok(())
}
