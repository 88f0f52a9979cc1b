//! Daemon configuration: the TOML file passed on the command line, plus the
//! `BGPRANKING_HOME` environment variable that the control interface (§6)
//! requires to be set before the process will start.

use std::env;
use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The environment variable naming the working directory. Its absence is a
/// configuration error: the process refuses to start.
pub const HOME_ENV_VAR: &str = "BGPRANKING_HOME";

/// Top-level daemon configuration, loaded from a TOML file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Directory holding `*.json` feed descriptors (§4.1).
    #[serde(default = "default_modules_dir")]
    pub feeds_dir: Utf8PathBuf,

    pub redis: RedisConfig,

    pub ip2asn: Ip2AsnConfig,

    #[serde(default)]
    pub log: LoggingConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,
}

fn default_modules_dir() -> Utf8PathBuf {
    Utf8PathBuf::from("config/modules")
}

impl Config {
    /// Read and parse a TOML config file, then resolve relative paths against
    /// `BGPRANKING_HOME`.
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read config file '{path}': {e}")))?;
        let mut config: Config = toml::from_str(&text)
            .map_err(|e| Error::config(format!("cannot parse config file '{path}': {e}")))?;

        let home = working_directory()?;
        if config.feeds_dir.is_relative() {
            config.feeds_dir = home.join(&config.feeds_dir);
        }

        Ok(config)
    }
}

/// Read and validate `BGPRANKING_HOME`. Per §6's control interface, a missing
/// working directory is fatal at startup.
pub fn working_directory() -> Result<Utf8PathBuf> {
    let raw = env::var(HOME_ENV_VAR)
        .map_err(|_| Error::config(format!("{HOME_ENV_VAR} is not set")))?;
    let path = Utf8PathBuf::from(raw);
    if !path.is_dir() {
        return Err(Error::config(format!(
            "{HOME_ENV_VAR} '{path}' does not exist or is not a directory"
        )));
    }
    Ok(path)
}

/// Connection settings for the three Redis-protocol roles the pipeline
/// depends on. They may all point at the same instance in small deployments.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    /// Ephemeral `intake`/`to_insert`/`running`/`shutdown` state — a fast
    /// instance, typically without persistence.
    pub queues_url: String,
    /// The durable daily-fact and ranking key space (§3).
    pub storage_url: String,
}

/// The IP-to-ASN history service endpoint (§6).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Ip2AsnConfig {
    pub base_url: String,
    #[serde(default = "default_ip2asn_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_ip2asn_timeout_secs() -> u64 {
    30
}

/// Tick intervals for each periodic job, in seconds. Matches the
/// `run(sleep_in_sec)` loop of the coordinator (§4.7).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_fetcher_interval")]
    pub fetcher_secs: u64,
    #[serde(default = "default_parser_interval")]
    pub parser_secs: u64,
    #[serde(default = "default_sanitizer_interval")]
    pub sanitizer_secs: u64,
    #[serde(default = "default_enricher_interval")]
    pub enricher_secs: u64,
    #[serde(default = "default_ranker_interval")]
    pub ranker_secs: u64,
    #[serde(default = "default_asn_descriptions_interval")]
    pub asn_descriptions_secs: u64,
    #[serde(default = "default_archiver_interval")]
    pub archiver_secs: u64,
}

fn default_fetcher_interval() -> u64 {
    300
}
fn default_parser_interval() -> u64 {
    120
}
fn default_sanitizer_interval() -> u64 {
    60
}
fn default_enricher_interval() -> u64 {
    60
}
fn default_ranker_interval() -> u64 {
    3600
}
fn default_asn_descriptions_interval() -> u64 {
    3600
}
fn default_archiver_interval() -> u64 {
    86_400
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        ScheduleConfig {
            fetcher_secs: default_fetcher_interval(),
            parser_secs: default_parser_interval(),
            sanitizer_secs: default_sanitizer_interval(),
            enricher_secs: default_enricher_interval(),
            ranker_secs: default_ranker_interval(),
            asn_descriptions_secs: default_asn_descriptions_interval(),
            archiver_secs: default_archiver_interval(),
        }
    }
}

/// Where log events go.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub target: LogTarget,
    #[serde(default)]
    pub level: LogLevel,
    /// Extra `tracing` directives, e.g. `"bgpranking_core::pipeline=debug"`.
    #[serde(default)]
    pub trace_targets: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    #[default]
    Stdout,
    Stderr,
    File(Utf8PathBuf),
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_toml() {
        let toml = r#"
            [redis]
            queues_url = "redis://127.0.0.1:6379/0"
            storage_url = "redis://127.0.0.1:6379/1"

            [ip2asn]
            base_url = "https://ip2asn.example/"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.feeds_dir, Utf8PathBuf::from("config/modules"));
        assert_eq!(config.schedule.ranker_secs, 3600);
        assert_eq!(config.ip2asn.timeout_secs, 30);
    }
}
