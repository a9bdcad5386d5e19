//! Configuration management for kestrel.
//!
//! This module provides configuration handling with:
//! - YAML file support
//! - CLI argument overrides through [`ConfigBuilder`]
//! - Validation and defaults

use crate::core::{KestrelError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

/// Complete configuration for kestrel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host name reported as the `host.name` resource of built-in metrics
    pub hostname: String,
    /// Scrape interval, also the default flush interval of every sink
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// OTLP gRPC sinks
    pub otlp: Vec<OtlpConfig>,
    /// Parquet file sink
    pub parquet: Option<ParquetConfig>,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Debug mode
    #[serde(skip)]
    pub debug: bool,
}

/// One OTLP gRPC destination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtlpConfig {
    /// Sink name, unique across OTLP sinks
    pub name: String,
    /// Receiver host name or address
    #[serde(default = "default_otlp_host")]
    pub host: String,
    /// Receiver port
    #[serde(default = "default_otlp_port")]
    pub port: u16,
    /// Flush interval, defaults to the global interval
    #[serde(default, with = "humantime_serde")]
    pub flush_interval: Option<Duration>,
    /// Export RPC deadline, defaults to the flush interval
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

/// Parquet sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParquetConfig {
    /// Root of the metric directory tree
    pub basedir: PathBuf,
    /// Lifetime of one active file before rotation
    #[serde(default = "default_file_duration", with = "humantime_serde")]
    pub file_duration: Duration,
    /// Maximum age of buffered rows before they are written out
    #[serde(default = "default_buffer_duration", with = "humantime_serde")]
    pub buffer_duration: Duration,
    /// Process-wide cap on buffered rows; 0 disables buffering
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Column compression codec
    #[serde(default)]
    pub compression: Compression,
    /// Codec level, validated against the codec's range
    #[serde(default)]
    pub compression_level: Option<i32>,
    /// Flush interval, defaults to the global interval
    #[serde(default, with = "humantime_serde")]
    pub flush_interval: Option<Duration>,
}

/// Parquet compression codecs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// No compression
    #[default]
    #[serde(alias = "off")]
    Uncompressed,
    /// Brotli, levels 1 to 11
    Brotli,
    /// Gzip, levels 1 to 9
    Gzip,
    /// Zstandard, levels 1 to 22
    Zstd,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,
}

/// Log levels
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

fn default_otlp_host() -> String {
    "localhost".to_string()
}

fn default_otlp_port() -> u16 {
    4317
}

fn default_file_duration() -> Duration {
    Duration::from_secs(3600)
}

fn default_buffer_duration() -> Duration {
    Duration::from_secs(3600)
}

fn default_buffer_size() -> usize {
    10_000
}

fn default_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

impl Default for Config {
    fn default() -> Self {
        Config {
            hostname: default_hostname(),
            interval: Duration::from_secs(10),
            otlp: Vec::new(),
            parquet: None,
            logging: LoggingConfig::default(),
            debug: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Info,
        }
    }
}

impl OtlpConfig {
    /// New OTLP destination with default host and port
    pub fn new(name: impl Into<String>) -> Self {
        OtlpConfig {
            name: name.into(),
            host: default_otlp_host(),
            port: default_otlp_port(),
            flush_interval: None,
            timeout: None,
        }
    }

    /// Endpoint URI for the gRPC channel
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl ParquetConfig {
    /// New Parquet sink rooted at `basedir` with default policy
    pub fn new(basedir: impl Into<PathBuf>) -> Self {
        ParquetConfig {
            basedir: basedir.into(),
            file_duration: default_file_duration(),
            buffer_duration: default_buffer_duration(),
            buffer_size: default_buffer_size(),
            compression: Compression::default(),
            compression_level: None,
            flush_interval: None,
        }
    }

    /// Validate durations and the compression level
    pub fn validate(&self) -> Result<()> {
        if self.basedir.as_os_str().is_empty() {
            return Err(KestrelError::invalid("parquet basedir must be set"));
        }
        if self.buffer_duration > self.file_duration {
            return Err(KestrelError::invalid(format!(
                "parquet buffer_duration ({:?}) must not exceed file_duration ({:?})",
                self.buffer_duration, self.file_duration
            )));
        }
        self.compression.validate_level(self.compression_level)
    }
}

impl Compression {
    /// Allowed level range, `None` for codecs without levels
    pub fn level_range(&self) -> Option<RangeInclusive<i32>> {
        match self {
            Compression::Uncompressed => None,
            Compression::Brotli => Some(1..=11),
            Compression::Gzip => Some(1..=9),
            Compression::Zstd => Some(1..=22),
        }
    }

    /// Check `level` against the codec's range
    pub fn validate_level(&self, level: Option<i32>) -> Result<()> {
        let Some(level) = level else {
            return Ok(());
        };
        match self.level_range() {
            Some(range) if range.contains(&level) => Ok(()),
            Some(range) => Err(KestrelError::invalid(format!(
                "{} compression level {} outside {}..={}",
                self.as_str(),
                level,
                range.start(),
                range.end()
            ))),
            None => Err(KestrelError::invalid(format!(
                "compression level {level} given without a compression codec"
            ))),
        }
    }

    /// Codec name as written in configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::Uncompressed => "uncompressed",
            Compression::Brotli => "brotli",
            Compression::Gzip => "gzip",
            Compression::Zstd => "zstd",
        }
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Result<Self> {
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.hostname.is_empty() {
            return Err(KestrelError::invalid("hostname must not be empty"));
        }

        if self.interval.is_zero() {
            return Err(KestrelError::invalid("interval must be greater than 0"));
        }

        let mut names = HashSet::new();
        for sink in &self.otlp {
            if sink.name.is_empty() {
                return Err(KestrelError::invalid("otlp sink name must not be empty"));
            }
            if !names.insert(sink.name.as_str()) {
                return Err(KestrelError::invalid(format!(
                    "duplicate otlp sink name '{}'",
                    sink.name
                )));
            }
            if sink.host.is_empty() {
                return Err(KestrelError::invalid(format!(
                    "otlp sink '{}': host must not be empty",
                    sink.name
                )));
            }
            if sink.port == 0 {
                return Err(KestrelError::invalid(format!(
                    "otlp sink '{}': port must be greater than 0",
                    sink.name
                )));
            }
            if sink.flush_interval.is_some_and(|d| d.is_zero()) {
                return Err(KestrelError::invalid(format!(
                    "otlp sink '{}': flush_interval must be greater than 0",
                    sink.name
                )));
            }
        }

        if let Some(parquet) = &self.parquet {
            parquet.validate()?;
            if parquet.flush_interval.is_some_and(|d| d.is_zero()) {
                return Err(KestrelError::invalid("parquet flush_interval must be greater than 0"));
            }
        }

        Ok(())
    }

    /// Flush interval of an OTLP sink
    pub fn otlp_flush_interval(&self, sink: &OtlpConfig) -> Duration {
        sink.flush_interval.unwrap_or(self.interval)
    }

    /// Flush interval of the Parquet sink
    pub fn parquet_flush_interval(&self, sink: &ParquetConfig) -> Duration {
        sink.flush_interval.unwrap_or(self.interval)
    }
}

impl LogLevel {
    /// Convert to tracing filter string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Configuration builder for programmatic construction
#[derive(Debug)]
pub struct ConfigBuilder {
    config: Config,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        ConfigBuilder {
            config: Config::default(),
        }
    }

    /// Load configuration from YAML string
    pub fn from_yaml(mut self, yaml: &str) -> Result<Self> {
        self.config = serde_yaml::from_str(yaml)
            .map_err(|e| KestrelError::config(format!("Failed to parse YAML config: {}", e)))?;
        Ok(self)
    }

    /// Set host name
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.config.hostname = hostname.into();
        self
    }

    /// Set scrape and default flush interval
    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    /// Add an OTLP sink
    pub fn otlp(mut self, sink: OtlpConfig) -> Self {
        self.config.otlp.push(sink);
        self
    }

    /// Set the Parquet sink
    pub fn parquet(mut self, sink: ParquetConfig) -> Self {
        self.config.parquet = Some(sink);
        self
    }

    /// Set debug mode
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
