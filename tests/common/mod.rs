//! Common test utilities and fixtures.

#![allow(dead_code)]

use kestrel_lib::metrics::{Metric, MetricFamily, MetricType, Value};
use opentelemetry_proto::tonic::collector::metrics::v1::{
    metrics_service_server::{MetricsService, MetricsServiceServer},
    ExportMetricsPartialSuccess, ExportMetricsServiceRequest, ExportMetricsServiceResponse,
};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::{transport::Server, Request, Response, Status};
use tracing_subscriber::fmt::MakeWriter;

/// Metrics service recording every request it receives.
struct RecordingService {
    requests: Arc<Mutex<Vec<ExportMetricsServiceRequest>>>,
    rejected: i64,
}

#[tonic::async_trait]
impl MetricsService for RecordingService {
    async fn export(
        &self,
        request: Request<ExportMetricsServiceRequest>,
    ) -> Result<Response<ExportMetricsServiceResponse>, Status> {
        self.requests.lock().push(request.into_inner());
        let partial_success = (self.rejected > 0).then(|| ExportMetricsPartialSuccess {
            rejected_data_points: self.rejected,
            error_message: "points out of order".to_string(),
        });
        Ok(Response::new(ExportMetricsServiceResponse { partial_success }))
    }
}

/// In-process OTLP metrics receiver on a random local port.
pub struct TestReceiver {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<ExportMetricsServiceRequest>>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestReceiver {
    /// Starts a receiver accepting everything.
    pub async fn start() -> Self {
        Self::start_rejecting(0).await
    }

    /// Starts a receiver reporting `rejected` data points as a partial
    /// success on every export.
    pub async fn start_rejecting(rejected: i64) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let service = RecordingService {
            requests: Arc::clone(&requests),
            rejected,
        };
        let (tx, rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            Server::builder()
                .add_service(MetricsServiceServer::new(service))
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async {
                    let _ = rx.await;
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            requests,
            shutdown: Some(tx),
        }
    }

    /// `http://` URI of this receiver.
    pub fn uri(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<ExportMetricsServiceRequest> {
        self.requests.lock().clone()
    }
}

impl Drop for TestReceiver {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Log output captured from a scoped subscriber.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl std::io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Captures log output on the current thread until the guard is dropped.
pub fn capture_logs() -> (LogCapture, tracing::subscriber::DefaultGuard) {
    let capture = LogCapture::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(capture.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    (capture, tracing::subscriber::set_default(subscriber))
}

/// Family with a `host.name` resource.
pub fn family_on(host: &str, name: &str, ty: MetricType) -> MetricFamily {
    let mut family = MetricFamily::new(name, ty).unwrap();
    family.set_resource_attribute("host.name", host).unwrap();
    family
}

/// Appends one metric with the given labels and time.
pub fn add_metric(family: &mut MetricFamily, labels: &[(&str, &str)], value: Value, time: u64) {
    let mut metric = Metric::new(value).with_time(time);
    for (name, value) in labels {
        metric.labels.add(name, value).unwrap();
    }
    family.push(metric).unwrap();
}
