//! Command-line interface for kestrel.
//!
//! Run `kestrel --config agent.yaml` to start the agent; every option can
//! also come from the environment.

use crate::application::Application;
use crate::core::{Config, ConfigBuilder, KestrelError, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Host telemetry agent exporting metrics over OTLP and to Parquet files
#[derive(Parser, Debug)]
#[command(name = "kestrel")]
#[command(version, about, long_about = None)]
#[command(disable_version_flag = true)]
pub struct Cli {
    /// Configuration file path (default: ~/.config/kestrel/config.yaml)
    #[arg(short, long, env = "KESTREL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Scrape and default flush interval, e.g. "10s"
    #[arg(short, long, env = "KESTREL_INTERVAL", value_parser = humantime_serde::re::humantime::parse_duration)]
    pub interval: Option<Duration>,

    /// Host name reported by the agent's own metrics
    #[arg(long, env = "KESTREL_HOSTNAME")]
    pub hostname: Option<String>,

    /// Enable debug logging
    #[arg(short, long, env = "KESTREL_DEBUG")]
    pub debug: bool,

    /// Validate configuration and exit
    #[arg(long)]
    pub check_config: bool,

    /// Show version information
    #[arg(short = 'V', long = "show-version")]
    pub version: bool,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("kestrel").join("config.yaml"))
    }

    /// Load configuration with proper precedence:
    /// 1. CLI arguments and environment (highest priority)
    /// 2. Config file
    /// 3. Defaults (lowest priority)
    pub async fn load_config(&self) -> Result<Config> {
        let mut builder = ConfigBuilder::new();

        let config_path = match &self.config {
            Some(path) => Some(path.clone()),
            None => Self::default_config_path().filter(|path| path.exists()),
        };

        if let Some(path) = config_path {
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => {
                    builder = builder.from_yaml(&content)?;
                    tracing::info!("Loaded configuration from: {:?}", path);
                },
                Err(e) if self.config.is_some() => {
                    return Err(KestrelError::config(format!(
                        "Failed to read config file {:?}: {}",
                        path, e
                    )));
                },
                Err(_) => {
                    tracing::debug!("No config file found at {:?}, using defaults", path);
                },
            }
        }

        self.build_config_from_args(builder)
    }

    fn build_config_from_args(&self, mut builder: ConfigBuilder) -> Result<Config> {
        if let Some(interval) = self.interval {
            builder = builder.interval(interval);
        }
        if let Some(hostname) = &self.hostname {
            builder = builder.hostname(hostname.clone());
        }
        builder.debug(self.debug).build()
    }

    /// Initialize logging. `--debug` wins over `KESTREL_LOG_LEVEL`, which
    /// wins over the configured level; `RUST_LOG` overrides all of them.
    pub fn init_logging(&self, config: &Config) -> Result<()> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

        let log_level = if self.debug {
            "debug".to_string()
        } else {
            std::env::var("KESTREL_LOG_LEVEL")
                .unwrap_or_else(|_| config.logging.level.as_str().to_string())
        };

        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level));

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(self.debug)
            .with_line_number(self.debug)
            .compact();

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| KestrelError::config(format!("Failed to initialize logging: {}", e)))?;

        Ok(())
    }
}

/// Execute the kestrel agent.
pub async fn execute(cli: Cli) -> Result<()> {
    if cli.version {
        println!("kestrel {}", env!("CARGO_PKG_VERSION"));
        println!("Host telemetry agent");
        return Ok(());
    }

    let config = cli.load_config().await?;
    cli.init_logging(&config)?;

    if cli.check_config {
        println!("Configuration is valid!");
        println!("  Hostname: {}", config.hostname);
        println!("  Interval: {:?}", config.interval);
        for sink in &config.otlp {
            println!("  OTLP sink {}: {}", sink.name, sink.endpoint());
        }
        if let Some(parquet) = &config.parquet {
            println!(
                "  Parquet sink: {} ({})",
                parquet.basedir.display(),
                parquet.compression.as_str()
            );
        }
        return Ok(());
    }

    let app = Application::new(config)?;
    app.run().await
}
