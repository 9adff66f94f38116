// src/core/scanner/mod.rs

// Public interface of the `scanner` module: the closed set of scan modules
// and the dispatch that turns one target into one report.
pub mod capture;
pub mod http_scanner;
pub mod ipp_scanner;

use chrono::Utc;
use strum::{Display, EnumIter, EnumString};
use tracing::info;

use crate::core::config::ScanFlags;
use crate::core::error::ConfigError;
use crate::core::models::{ScanReport, ScanResults, ScanTarget};
use self::http_scanner::HttpScanner;
use self::ipp_scanner::IppScanner;

/// Which protocol a module speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum ModuleKind {
    Http,
    Ipp,
}

impl ModuleKind {
    pub fn default_port(&self) -> u16 {
        match self {
            ModuleKind::Http => 80,
            ModuleKind::Ipp => 631,
        }
    }

    pub fn default_endpoint(&self) -> &'static str {
        match self {
            ModuleKind::Http => "/",
            ModuleKind::Ipp => "/ipp",
        }
    }
}

/// An initialized scan module, configuration frozen.
pub enum ScanModule {
    Http(HttpScanner),
    Ipp(IppScanner),
}

impl ScanModule {
    /// Validates `flags` for `kind` and builds the module.
    ///
    /// # Returns
    /// A ready module, or the `ConfigError` that made the flags unusable.
    pub fn init(kind: ModuleKind, flags: &ScanFlags) -> Result<Self, ConfigError> {
        let config = flags.validate(kind)?;
        info!(
            module = %kind,
            port = config.port,
            endpoint = %config.endpoint,
            custom_headers = config.custom_headers.len(),
            "Module initialized."
        );
        Ok(match kind {
            ModuleKind::Http => ScanModule::Http(HttpScanner::new(config)),
            ModuleKind::Ipp => ScanModule::Ipp(IppScanner::new(config)),
        })
    }

    pub fn kind(&self) -> ModuleKind {
        match self {
            ScanModule::Http(_) => ModuleKind::Http,
            ScanModule::Ipp(_) => ModuleKind::Ipp,
        }
    }

    pub fn name(&self) -> String {
        self.kind().to_string()
    }

    /// Scans one target and wraps the outcome in a report.
    pub async fn scan(&self, target: &ScanTarget) -> ScanReport {
        let (status, result, error) = match self {
            ScanModule::Http(scanner) => {
                let outcome = scanner.scan(target).await;
                (outcome.status(), ScanResults::Http(outcome.results), outcome.error)
            }
            ScanModule::Ipp(scanner) => {
                let outcome = scanner.scan(target).await;
                (outcome.status(), ScanResults::Ipp(outcome.results), outcome.error)
            }
        };
        ScanReport {
            module: self.name(),
            target: target.clone(),
            status,
            timestamp: Utc::now(),
            result: Some(result),
            error: error.map(|e| e.to_string()),
        }
    }
}
