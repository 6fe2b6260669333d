//! Configuration file handling for certwatcher.
//!
//! The configuration is a TOML file loaded once at startup. Mail delivery
//! settings live in the `[certwatcher]` table; the optional `[prometheus]`
//! table enables pushing run results to a Push Gateway.
//!
//! # Example Configuration File
//!
//! ```toml
//! [certwatcher]
//! sendmail = true
//! host = "smtp.example.com"
//! port = "587"
//! username = "alerts"
//! password = "secret"
//! rcpt = "ops@example.com"
//! from = "certwatcher@example.com"
//! subjectprefix = "[certwatcher]"
//!
//! [prometheus]
//! enabled = true
//! address = "http://localhost:9091"
//! ```
//!
//! Keys missing from `[certwatcher]` default to empty strings (and `port` to
//! `"587"`). That is only accepted while `sendmail` is off; see
//! [`Config::validate`].

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// SMTP port used when `port` is missing or empty.
pub const DEFAULT_SMTP_PORT: u16 = 587;

const DEFAULT_PROMETHEUS_ADDRESS: &str = "http://localhost:9091";

/// Main configuration structure.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
pub struct Config {
    /// Mail delivery settings
    #[serde(default)]
    pub certwatcher: MailSettings,
    /// Prometheus configuration
    pub prometheus: Option<PrometheusConfig>,
}

/// Settings of the `[certwatcher]` table.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct MailSettings {
    /// Gate for every notification; nothing is sent while false
    pub sendmail: bool,
    /// SMTP relay host
    pub host: String,
    /// SMTP relay port, kept as text like the rest of the table
    pub port: String,
    pub username: String,
    pub password: String,
    /// Recipient address; several may be separated by commas
    pub rcpt: String,
    pub from: String,
    /// Prepended to every subject line
    pub subjectprefix: String,
}

impl Default for MailSettings {
    fn default() -> Self {
        MailSettings {
            sendmail: false,
            host: String::new(),
            port: DEFAULT_SMTP_PORT.to_string(),
            username: String::new(),
            password: String::new(),
            rcpt: String::new(),
            from: String::new(),
            subjectprefix: String::new(),
        }
    }
}

impl MailSettings {
    /// Parses `port`, falling back to 587 when it is empty.
    pub fn port_number(&self) -> Result<u16, ConfigError> {
        let port = self.port.trim();
        if port.is_empty() {
            return Ok(DEFAULT_SMTP_PORT);
        }
        port.parse::<u16>()
            .map_err(|e| ConfigError::Validation(format!("invalid port '{}': {}", port, e)))
    }

    /// Recipients listed in `rcpt`.
    pub fn recipients(&self) -> Vec<String> {
        self.rcpt
            .split(',')
            .map(str::trim)
            .filter(|rcpt| !rcpt.is_empty())
            .map(String::from)
            .collect()
    }
}

/// Prometheus integration configuration.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct PrometheusConfig {
    /// Enable prometheus metrics pushing
    #[serde(default)]
    pub enabled: bool,
    /// Prometheus push gateway address (e.g., "http://localhost:9091")
    #[serde(default = "default_prometheus_address")]
    pub address: String,
}

fn default_prometheus_address() -> String {
    DEFAULT_PROMETHEUS_ADDRESS.to_string()
}

impl Config {
    /// Loads configuration from a TOML file without validating it.
    ///
    /// # Returns
    ///
    /// * `Ok(Config)` - Successfully parsed configuration
    /// * `Err(ConfigError::Io)` - File could not be read
    /// * `Err(ConfigError::Parse)` - File contains invalid TOML
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        Ok(config)
    }

    /// Loads and validates a configuration file.
    ///
    /// ```no_run
    /// # use certwatcher::config::Config;
    /// let config = Config::load("/etc/certwatcher/config.toml")?;
    /// # Ok::<(), certwatcher::config::ConfigError>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that mail delivery can work when it is enabled.
    ///
    /// With `sendmail = true`, `host`, `rcpt` and `from` must be set and
    /// `port` must be a valid port number. With `sendmail = false` anything goes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mail = &self.certwatcher;
        if !mail.sendmail {
            return Ok(());
        }

        let mut missing = Vec::new();
        if mail.host.trim().is_empty() {
            missing.push("host");
        }
        if mail.recipients().is_empty() {
            missing.push("rcpt");
        }
        if mail.from.trim().is_empty() {
            missing.push("from");
        }
        if !missing.is_empty() {
            return Err(ConfigError::Validation(format!(
                "sendmail is enabled but [certwatcher] is missing: {}",
                missing.join(", ")
            )));
        }

        mail.port_number()?;
        Ok(())
    }

    /// Push Gateway address, if metrics pushing is enabled.
    pub fn prometheus_address(&self) -> Option<&str> {
        self.prometheus
            .as_ref()
            .filter(|prometheus| prometheus.enabled)
            .map(|prometheus| prometheus.address.as_str())
    }

    /// Generates an example configuration file in TOML format.
    ///
    /// ```
    /// # use certwatcher::config::Config;
    /// let example = Config::example_toml();
    /// assert!(example.contains("[certwatcher]"));
    /// ```
    pub fn example_toml() -> String {
        let example = Config {
            certwatcher: MailSettings {
                sendmail: true,
                host: "smtp.example.com".to_string(),
                port: DEFAULT_SMTP_PORT.to_string(),
                username: "alerts".to_string(),
                password: "change-me".to_string(),
                rcpt: "ops@example.com".to_string(),
                from: "certwatcher@example.com".to_string(),
                subjectprefix: "[certwatcher]".to_string(),
            },
            prometheus: Some(PrometheusConfig {
                enabled: false,
                address: default_prometheus_address(),
            }),
        };

        toml::to_string_pretty(&example)
            .unwrap_or_else(|_| "# Error generating example".to_string())
    }
}

/// Errors that can occur during configuration loading and parsing.
#[derive(Debug)]
pub enum ConfigError {
    /// I/O error (file not found, permission denied, etc.)
    Io(String),
    /// TOML parsing error (invalid syntax, type mismatch, etc.)
    Parse(String),
    /// Validation error (missing required fields, invalid values, etc.)
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "IO Error: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Parse Error: {}", msg),
            ConfigError::Validation(msg) => write!(f, "Validation Error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
