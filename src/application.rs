//! Main application entry point for kestrel.

use crate::core::{Config, Result};
use crate::export::{OtlpSink, ParquetSink, Sink};
use crate::scheduler::{AgentProducer, Dispatcher, Scheduler};
use std::sync::Arc;

/// Name of the Parquet sink, used to address flush requests.
pub const PARQUET_SINK_NAME: &str = "parquet";

/// Wires the configured sinks into a scheduler and runs it until Ctrl-C.
pub struct Application {
    scheduler: Scheduler,
    config: Config,
}

impl Application {
    /// Builds every configured sink and registers it with the scheduler.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let mut scheduler = Scheduler::new(config.interval);

        for otlp in &config.otlp {
            let interval = config.otlp_flush_interval(otlp);
            let sink: Arc<dyn Sink> = Arc::new(OtlpSink::from_config(otlp, interval)?);
            scheduler.register_sink(sink, interval)?;
        }

        if let Some(parquet) = &config.parquet {
            let sink: Arc<dyn Sink> = Arc::new(ParquetSink::new(PARQUET_SINK_NAME, parquet)?);
            scheduler.register_sink(sink, config.parquet_flush_interval(parquet))?;
        }

        let agent = AgentProducer::new(config.hostname.clone(), scheduler.dispatcher());
        scheduler.register_producer(Arc::new(agent));

        Ok(Self { scheduler, config })
    }

    /// Dispatcher over the configured sinks.
    pub fn dispatcher(&self) -> Dispatcher {
        self.scheduler.dispatcher()
    }

    /// Runs until Ctrl-C, then closes every sink.
    pub async fn run(self) -> Result<()> {
        tracing::info!(
            hostname = %self.config.hostname,
            interval = ?self.config.interval,
            sinks = self.scheduler.dispatcher().sinks().len(),
            "Starting kestrel"
        );
        if self.scheduler.dispatcher().sinks().is_empty() {
            tracing::warn!("No sinks configured, metrics will be discarded");
        }

        let handle = self.scheduler.start();

        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
        tracing::info!("Received shutdown signal, stopping...");

        handle.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::EXIT_INVALID;
    use crate::core::{ConfigBuilder, KestrelError, OtlpConfig, ParquetConfig};
    use std::time::Duration;

    #[test]
    fn test_builds_configured_sinks() {
        let tmp = tempfile::tempdir().unwrap();
        let config = ConfigBuilder::new()
            .otlp(OtlpConfig::new("primary"))
            .otlp(OtlpConfig::new("secondary"))
            .parquet(ParquetConfig::new(tmp.path()))
            .build()
            .unwrap();

        let app = Application::new(config).unwrap();
        let names: Vec<String> = app
            .dispatcher()
            .sinks()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(names, vec!["primary", "secondary", PARQUET_SINK_NAME]);
    }

    #[test]
    fn test_invalid_parquet_config_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let mut parquet = ParquetConfig::new(tmp.path());
        parquet.buffer_duration = Duration::from_secs(7200);

        let mut config = Config::default();
        config.parquet = Some(parquet);
        let err = Application::new(config).err().unwrap();
        assert!(matches!(err, KestrelError::Invalid(_)));
        assert_eq!(err.exit_code(), EXIT_INVALID);
    }
}
