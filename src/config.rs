//! Configuration file management for ssl-inspector.
//!
//! Settings come from three places, later ones winning:
//!
//! 1. Default values
//! 2. Configuration file (`ssl-inspector.toml` or the file given with `--config`)
//! 3. Command-line arguments
//!
//! # Example Configuration File
//!
//! ```toml
//! endpoints = ["example.com", "ldaps://directory.example.com:636"]
//! output = "text"
//! exit_code = 2
//! timeout = 10
//!
//! [trust_store]
//! path = "corporate-roots.p12"
//! password = "changeit"
//!
//! [prometheus]
//! enabled = true
//! address = "http://localhost:9091"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use thiserror::Error;

/// File looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "ssl-inspector.toml";

/// How results are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum OutputFormat {
    /// Verdict and numbered findings per endpoint
    Text,
    /// Machine readable reports
    Json,
    /// One table row per endpoint
    Summary,
}

/// Main configuration structure.
///
/// All fields are optional to support partial configuration and merging.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// Endpoints to inspect
    pub endpoints: Option<Vec<String>>,
    /// Output format: text, json, summary
    pub output: Option<String>,
    /// Exit code to use when any endpoint would not accept a connection
    pub exit_code: Option<i32>,
    /// Connect/handshake timeout in seconds
    pub timeout: Option<u64>,
    /// Extra trust anchors
    pub trust_store: Option<TrustStoreConfig>,
    /// Prometheus configuration
    pub prometheus: Option<PrometheusConfig>,
}

/// PKCS#12 file holding additional trusted roots.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TrustStoreConfig {
    /// Path to the trust store
    pub path: Option<PathBuf>,
    /// Trust store password
    pub password: Option<String>,
}

/// Prometheus Push Gateway integration.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PrometheusConfig {
    /// Enable prometheus metrics pushing
    pub enabled: Option<bool>,
    /// Prometheus push gateway address (e.g., "http://localhost:9091")
    pub address: Option<String>,
}

impl Default for Config {
    /// - `endpoints`: None (must be provided)
    /// - `output`: "text"
    /// - `exit_code`: 0 (an invalid certificate alone does not fail the run)
    /// - `timeout`: 30 seconds
    /// - `trust_store`: None (platform roots only)
    /// - `prometheus.enabled`: false
    /// - `prometheus.address`: "http://localhost:9091"
    fn default() -> Self {
        Config {
            endpoints: None,
            output: Some(OutputFormat::Text.to_string()),
            exit_code: Some(0),
            timeout: Some(crate::DEFAULT_TIMEOUT.as_secs()),
            trust_store: None,
            prometheus: Some(PrometheusConfig {
                enabled: Some(false),
                address: Some("http://localhost:9091".to_string()),
            }),
        }
    }
}

impl Config {
    /// Loads configuration from a TOML file.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use ssl_inspector::config::Config;
    /// let config = Config::from_file("ssl-inspector.toml")?;
    /// # Ok::<(), ssl_inspector::config::ConfigError>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Merges this configuration with another, prioritizing the other's values.
    ///
    /// ```
    /// # use ssl_inspector::config::Config;
    /// let cli = Config::from_cli_args(Some(vec!["badssl.com".to_string()]), None, None, None, None, None, None, None);
    /// let merged = Config::default().merge_with(cli);
    /// assert_eq!(merged.output.as_deref(), Some("text"));
    /// ```
    pub fn merge_with(mut self, other: Config) -> Self {
        if other.endpoints.is_some() {
            self.endpoints = other.endpoints;
        }
        if other.output.is_some() {
            self.output = other.output;
        }
        if other.exit_code.is_some() {
            self.exit_code = other.exit_code;
        }
        if other.timeout.is_some() {
            self.timeout = other.timeout;
        }
        if let Some(other_store) = other.trust_store {
            match self.trust_store {
                Some(ref mut self_store) => {
                    if other_store.path.is_some() {
                        self_store.path = other_store.path;
                    }
                    if other_store.password.is_some() {
                        self_store.password = other_store.password;
                    }
                }
                None => self.trust_store = Some(other_store),
            }
        }
        if let Some(other_prom) = other.prometheus {
            match self.prometheus {
                Some(ref mut self_prom) => {
                    if other_prom.enabled.is_some() {
                        self_prom.enabled = other_prom.enabled;
                    }
                    if other_prom.address.is_some() {
                        self_prom.address = other_prom.address;
                    }
                }
                None => self.prometheus = Some(other_prom),
            }
        }
        self
    }

    /// Creates a Config from command-line arguments for merging.
    ///
    /// Only provided arguments (Some values) will override other configurations.
    #[allow(clippy::too_many_arguments)]
    pub fn from_cli_args(
        endpoints: Option<Vec<String>>,
        output: Option<String>,
        exit_code: Option<i32>,
        timeout: Option<u64>,
        trust_store: Option<PathBuf>,
        trust_store_password: Option<String>,
        prometheus: Option<bool>,
        prometheus_address: Option<String>,
    ) -> Self {
        let trust_store = if trust_store.is_some() || trust_store_password.is_some() {
            Some(TrustStoreConfig {
                path: trust_store,
                password: trust_store_password,
            })
        } else {
            None
        };
        Config {
            endpoints,
            output,
            exit_code,
            timeout,
            trust_store,
            prometheus: Some(PrometheusConfig {
                enabled: prometheus,
                address: prometheus_address,
            }),
        }
    }

    /// Checks that the merged configuration can drive a run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.endpoints {
            Some(endpoints) if !endpoints.is_empty() => {}
            _ => {
                return Err(ConfigError::Validation(
                    "at least one endpoint is required".to_string(),
                ))
            }
        }
        self.output_format()?;
        if self.timeout == Some(0) {
            return Err(ConfigError::Validation(
                "timeout must be at least one second".to_string(),
            ));
        }
        if let Some(TrustStoreConfig { path: None, .. }) = self.trust_store {
            return Err(ConfigError::Validation(
                "a trust store password was given without a trust store path".to_string(),
            ));
        }
        Ok(())
    }

    pub fn output_format(&self) -> Result<OutputFormat, ConfigError> {
        match &self.output {
            Some(output) => OutputFormat::from_str(output).map_err(|_| {
                ConfigError::Validation(format!(
                    "unknown output format '{}', expected text, json or summary",
                    output
                ))
            }),
            None => Ok(OutputFormat::Text),
        }
    }

    pub fn timeout_duration(&self) -> Duration {
        self.timeout
            .map(Duration::from_secs)
            .unwrap_or(crate::DEFAULT_TIMEOUT)
    }

    /// Trust store path and password, the password defaulting to empty.
    pub fn trust_store_settings(&self) -> (Option<&Path>, &str) {
        match &self.trust_store {
            Some(store) => (
                store.path.as_deref(),
                store.password.as_deref().unwrap_or_default(),
            ),
            None => (None, ""),
        }
    }

    /// Push gateway address when metrics pushing is enabled.
    pub fn prometheus_address(&self) -> Option<&str> {
        let prometheus = self.prometheus.as_ref()?;
        if prometheus.enabled.unwrap_or(false) {
            prometheus.address.as_deref()
        } else {
            None
        }
    }

    /// Generates an example configuration file in TOML format.
    pub fn example_toml() -> String {
        let example = Config {
            endpoints: Some(vec![
                "example.com".to_string(),
                "example.com:8443".to_string(),
                "ldaps://directory.example.com:636".to_string(),
                "expired.badssl.com".to_string(),
            ]),
            output: Some(OutputFormat::Summary.to_string()),
            exit_code: Some(2),
            timeout: Some(10),
            trust_store: Some(TrustStoreConfig {
                path: Some(PathBuf::from("corporate-roots.p12")),
                password: Some("changeit".to_string()),
            }),
            prometheus: Some(PrometheusConfig {
                enabled: Some(false),
                address: Some("http://localhost:9091".to_string()),
            }),
        };

        toml::to_string_pretty(&example)
            .unwrap_or_else(|_| "# Error generating example".to_string())
    }
}

/// Errors that can occur during configuration loading and parsing.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error (file not found, permission denied, etc.)
    #[error("IO Error: {0}")]
    Io(String),
    /// TOML parsing error (invalid syntax, type mismatch, etc.)
    #[error("Parse Error: {0}")]
    Parse(String),
    /// Validation error (missing required fields, invalid values, etc.)
    #[error("Validation Error: {0}")]
    Validation(String),
}
