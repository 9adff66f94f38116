// src/core/config.rs

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Method;
use reqwest::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::error::ConfigError;
use crate::core::scanner::ModuleKind;
use crate::logging::get_config_dir;

/// Environment variable pointing at an explicit configuration file.
pub const CONFIG_ENV: &str = "VANGUARD_GRAB_CONFIG";

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 vanguard-grab/0.1";

/// Raw, user-facing knobs as they appear in the JSON configuration file.
///
/// Unset `port` and `endpoint` fall back to the selected module's defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ScanFlags {
    pub port: Option<u16>,
    pub method: String,
    pub endpoint: Option<String>,
    pub user_agent: String,
    /// Max kilobytes to read from each response body.
    pub max_size: u32,
    pub max_redirects: usize,
    pub follow_localhost_redirects: bool,
    pub use_https: bool,
    pub redirects_succeed: bool,
    pub retry_https: bool,
    /// Seconds allowed for the whole attempt.
    pub timeout: u64,
    /// Seconds allowed for a single dial; defaults to `timeout`.
    pub connect_timeout: Option<u64>,
    pub custom_headers_names: String,
    pub custom_headers_values: String,
    pub override_sig_hash: bool,
}

impl Default for ScanFlags {
    fn default() -> Self {
        Self {
            port: None,
            method: "GET".to_string(),
            endpoint: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_size: 256,
            max_redirects: 0,
            follow_localhost_redirects: false,
            use_https: false,
            redirects_succeed: false,
            retry_https: false,
            timeout: 10,
            connect_timeout: None,
            custom_headers_names: String::new(),
            custom_headers_values: String::new(),
            override_sig_hash: false,
        }
    }
}

impl ScanFlags {
    /// Loads flags from `$VANGUARD_GRAB_CONFIG`, then the project config dir,
    /// falling back to defaults when neither file exists.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::from_file(Path::new(&path));
        }
        let path = default_config_path();
        if path.exists() {
            Self::from_file(&path)
        } else {
            debug!(path = %path.display(), "No configuration file, using defaults.");
            Ok(Self::default())
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let flags = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        info!(path = %path.display(), "Loaded configuration file.");
        Ok(flags)
    }

    /// Validates the flags and freezes them into the configuration every session shares.
    pub fn validate(&self, module: ModuleKind) -> Result<ScanConfiguration, ConfigError> {
        let method = Method::from_bytes(self.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| ConfigError::InvalidMethod(self.method.clone()))?;

        let endpoint = self
            .endpoint
            .clone()
            .unwrap_or_else(|| module.default_endpoint().to_string());
        if !endpoint.starts_with('/') {
            return Err(ConfigError::InvalidEndpoint(endpoint));
        }

        let custom_headers =
            HeaderTable::from_csv(&self.custom_headers_names, &self.custom_headers_values)?;

        let timeout = Duration::from_secs(self.timeout);
        let connect_timeout = self.connect_timeout.map(Duration::from_secs).unwrap_or(timeout);

        Ok(ScanConfiguration {
            port: self.port.unwrap_or_else(|| module.default_port()),
            method,
            endpoint,
            user_agent: self.user_agent.clone(),
            max_size: self.max_size,
            max_redirects: self.max_redirects,
            follow_localhost_redirects: self.follow_localhost_redirects,
            use_https: self.use_https,
            redirects_succeed: self.redirects_succeed,
            retry_https: self.retry_https,
            timeout,
            connect_timeout,
            custom_headers,
            override_sig_hash: self.override_sig_hash,
        })
    }
}

pub fn default_config_path() -> PathBuf {
    get_config_dir().join("config.json")
}

/// Immutable, validated settings for one module instance.
#[derive(Debug, Clone)]
pub struct ScanConfiguration {
    pub port: u16,
    pub method: Method,
    pub endpoint: String,
    pub user_agent: String,
    pub max_size: u32,
    pub max_redirects: usize,
    pub follow_localhost_redirects: bool,
    pub use_https: bool,
    pub redirects_succeed: bool,
    pub retry_https: bool,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub custom_headers: HeaderTable,
    pub override_sig_hash: bool,
}

impl ScanConfiguration {
    /// Upper bound on captured body bytes.
    pub fn max_body_bytes(&self) -> u64 {
        u64::from(self.max_size) * 1024
    }
}

impl Default for ScanConfiguration {
    fn default() -> Self {
        // The default flags always validate.
        ScanFlags::default()
            .validate(ModuleKind::Http)
            .unwrap_or_else(|e| unreachable!("default flags rejected: {}", e))
    }
}

/// Custom request headers, parsed once at initialization and never mutated.
///
/// Names are unique; a repeated name keeps the position of its first
/// occurrence and the value of its last, the way a map assignment would.
#[derive(Debug, Clone, Default)]
pub struct HeaderTable {
    entries: Vec<(HeaderName, HeaderValue)>,
}

impl HeaderTable {
    /// Builds the table from the two comma-separated flag values.
    ///
    /// # Arguments
    /// * `names` - One CSV record of header names.
    /// * `values` - One CSV record of header values, in the same order.
    ///
    /// # Returns
    /// The table, or a `ConfigError` when only one list is given, either list
    /// is malformed, or their lengths differ.
    pub fn from_csv(names: &str, values: &str) -> Result<Self, ConfigError> {
        if names.is_empty() && values.is_empty() {
            return Ok(Self::default());
        }
        if names.is_empty() {
            return Err(ConfigError::MissingHeaderNames);
        }
        if values.is_empty() {
            return Err(ConfigError::MissingHeaderValues);
        }
        Self::from_pairs(&csv_record("names", names)?, &csv_record("values", values)?)
    }

    pub fn from_pairs<N: AsRef<str>, V: AsRef<str>>(
        names: &[N],
        values: &[V],
    ) -> Result<Self, ConfigError> {
        if names.len() != values.len() {
            return Err(ConfigError::HeaderCountMismatch {
                names: names.len(),
                values: values.len(),
            });
        }

        let mut entries: Vec<(HeaderName, HeaderValue)> = Vec::with_capacity(names.len());
        for (name, value) in names.iter().zip(values) {
            let (name, value) = (name.as_ref().trim(), value.as_ref());
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                ConfigError::InvalidHeader { name: name.to_string(), reason: e.to_string() }
            })?;
            let header_value = HeaderValue::from_str(value).map_err(|e| {
                ConfigError::InvalidHeader { name: name.to_string(), reason: e.to_string() }
            })?;
            match entries.iter_mut().find(|(existing, _)| *existing == header_name) {
                Some(slot) => slot.1 = header_value,
                None => entries.push((header_name, header_value)),
            }
        }
        Ok(Self { entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, name: &HeaderName) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&HeaderName, &HeaderValue)> {
        self.entries.iter().map(|(n, v)| (n, v))
    }
}

/// Reads the first CSV record of `line`.
///
/// The reader closes a quoted field left open at the end of input, so an odd
/// number of quote characters is rejected up front.
fn csv_record(list: &'static str, line: &str) -> Result<Vec<String>, ConfigError> {
    if line.matches('"').count() % 2 != 0 {
        return Err(ConfigError::UnterminatedQuote { list });
    }
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes());
    let record = reader
        .records()
        .next()
        .transpose()
        .map_err(|source| ConfigError::HeaderList { list, source })?
        .unwrap_or_default();
    Ok(record.iter().map(str::to_string).collect())
}
