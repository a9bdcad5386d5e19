//! OTLP gRPC sink.
//!
//! Staged families are exported with a unary `MetricsService/Export` call.
//! The channel is built lazily on the first export, so an unreachable
//! receiver at startup is not an error; data simply stays staged until an
//! export succeeds.

pub mod format;

use crate::core::{KestrelError, OtlpConfig, Result};
use crate::export::{Sink, Staging};
use crate::metrics::MetricFamily;
use format::StartTimeCache;
use opentelemetry_proto::tonic::collector::metrics::v1::metrics_service_client::MetricsServiceClient;
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};

/// Export state, only touched while an export is in progress.
struct Exporter {
    client: Option<MetricsServiceClient<Channel>>,
    start_times: StartTimeCache,
}

impl Exporter {
    async fn export(
        &mut self,
        endpoint: &Endpoint,
        request: ExportMetricsServiceRequest,
    ) -> Result<()> {
        let client = self
            .client
            .get_or_insert_with(|| MetricsServiceClient::new(endpoint.connect_lazy()));

        let response = client.export(tonic::Request::new(request)).await?.into_inner();

        match response.partial_success {
            Some(partial) if partial.rejected_data_points > 0 || !partial.error_message.is_empty() => {
                Err(KestrelError::PartialSuccess {
                    rejected: partial.rejected_data_points,
                    message: partial.error_message,
                })
            },
            _ => Ok(()),
        }
    }
}

/// Sink exporting to one OTLP/gRPC metrics receiver.
pub struct OtlpSink {
    name: String,
    endpoint: Endpoint,
    staging: Staging,
    exporter: tokio::sync::Mutex<Exporter>,
}

impl OtlpSink {
    /// Creates a sink for `uri` (`http://host:port`) with the given RPC
    /// deadline. Fails if `uri` is not a valid URI; no connection is made.
    pub fn new(name: impl Into<String>, uri: impl Into<String>, timeout: Duration) -> Result<Self> {
        let endpoint = Endpoint::from_shared(uri.into())?
            .timeout(timeout)
            .connect_timeout(timeout);
        Ok(Self {
            name: name.into(),
            endpoint,
            staging: Staging::new(),
            exporter: tokio::sync::Mutex::new(Exporter {
                client: None,
                start_times: StartTimeCache::new(),
            }),
        })
    }

    /// Creates a sink from its configuration. The RPC deadline defaults to
    /// the sink's flush interval.
    pub fn from_config(config: &OtlpConfig, flush_interval: Duration) -> Result<Self> {
        Self::new(
            config.name.clone(),
            config.endpoint(),
            config.timeout.unwrap_or(flush_interval),
        )
    }

    /// Receiver URI.
    pub fn uri(&self) -> String {
        self.endpoint.uri().to_string()
    }
}

#[async_trait::async_trait]
impl Sink for OtlpSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&self, family: &MetricFamily) -> Result<usize> {
        self.staging.write(family)
    }

    async fn flush(&self, timeout: Duration) -> Result<()> {
        let mut exporter = self.exporter.lock().await;
        let Some(set) = self.staging.take_due(timeout) else {
            return Ok(());
        };

        let request = match format::export_request(&set, &mut exporter.start_times) {
            Ok(request) => request,
            Err(err) => {
                tracing::error!(
                    sink = %self.name,
                    metrics = set.metric_count(),
                    error = %err,
                    "Dropping staged metrics that could not be formatted"
                );
                return Err(err);
            },
        };

        match exporter.export(&self.endpoint, request).await {
            Ok(()) => {
                tracing::debug!(
                    sink = %self.name,
                    resources = set.len(),
                    metrics = set.metric_count(),
                    "Exported metrics"
                );
                Ok(())
            },
            Err(KestrelError::PartialSuccess { rejected, message }) => {
                tracing::info!(
                    notice = true,
                    sink = %self.name,
                    rejected,
                    "OTLP receiver rejected {} data points: {}",
                    rejected,
                    message
                );
                Ok(())
            },
            Err(err) if err.is_recoverable() => {
                tracing::warn!(
                    sink = %self.name,
                    endpoint = %self.endpoint.uri(),
                    metrics = set.metric_count(),
                    error = %err,
                    "Export failed, keeping metrics staged"
                );
                self.staging.restore(set)?;
                Err(err)
            },
            Err(err) => {
                tracing::error!(
                    sink = %self.name,
                    endpoint = %self.endpoint.uri(),
                    metrics = set.metric_count(),
                    error = %err,
                    category = err.category(),
                    "Export rejected, keeping metrics staged"
                );
                self.staging.restore(set)?;
                Err(err)
            },
        }
    }

    async fn close(&self) -> Result<()> {
        let result = self.flush(Duration::ZERO).await;
        self.exporter.lock().await.client = None;
        tracing::info!(sink = %self.name, "OTLP sink closed");
        result
    }

    fn staged_metrics(&self) -> usize {
        self.staging.metric_count()
    }
}
