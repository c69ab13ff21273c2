use clap::{Parser, Subcommand};
use log::LevelFilter;
use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ConfigError;

pub const CONFIG_ENV: &str = "PEAKPROXY_CONFIG";

#[derive(Parser, Debug)]
#[clap(
    name = "peakproxy",
    about = "Peak Proxy - peak detection in front of Prometheus query_range"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Runs the proxy
    #[clap(alias = "r")]
    Run(RunArgs),
}

#[derive(clap::Args, Debug, Default)]
pub struct RunArgs {
    /// Local port the proxy will listen on
    #[clap(short = 'p', long)]
    pub local_port: Option<u16>,

    /// URI of the target Prometheus host
    #[clap(short = 't', long)]
    pub target_uri: Option<String>,

    /// Number of iterations to run the peak detector [default: 1]
    #[clap(short = 'i', long)]
    pub iterations: Option<u32>,

    /// Logging level. Case insensitive. Must be one of: DEBUG, INFO, WARN, ERROR [default: info]
    #[clap(short = 'l', long)]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(ConfigError::UnknownLogLevel(s.to_string())),
        }
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Error => LevelFilter::Error,
        }
    }
}

/// Settings that may come from the optional TOML file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub local_port: Option<u16>,
    pub target_uri: Option<String>,
    pub iterations: Option<u32>,
    pub log_level: Option<String>,
}

impl FileConfig {
    /// Reads the file named by `PEAKPROXY_CONFIG`, if it names one that exists.
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_ENV) {
            Ok(config_path) => {
                let path = PathBuf::from(config_path);
                if path.exists() {
                    Self::from_path(&path)
                } else {
                    Ok(Self::default())
                }
            }
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn from_path(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file_error = |reason: String| ConfigError::File {
            path: path.display().to_string(),
            reason,
        };
        let contents = std::fs::read_to_string(path).map_err(|e| file_error(e.to_string()))?;
        toml::from_str(&contents).map_err(|e| file_error(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub local_port: u16,
    pub target_uri: String,
    pub iterations: u32,
    pub log_level: LogLevel,
}

impl Config {
    /// Command-line values win over the file.
    pub fn resolve(args: RunArgs, file: FileConfig) -> Result<Self, ConfigError> {
        let local_port = args
            .local_port
            .or(file.local_port)
            .ok_or(ConfigError::MissingField("local-port"))?;
        let target_uri = args
            .target_uri
            .or(file.target_uri)
            .ok_or(ConfigError::MissingField("target-uri"))?;
        let iterations = args.iterations.or(file.iterations).unwrap_or(1);
        let log_level = args
            .log_level
            .or(file.log_level)
            .as_deref()
            .unwrap_or("info")
            .parse()?;

        Ok(Self {
            local_port,
            target_uri,
            iterations,
            log_level,
        })
    }
}
