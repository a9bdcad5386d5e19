//! Parquet file sink.
//!
//! Values land in `<basedir>/<host>/<family>/<label values...>/`, one
//! single-column file per leaf. Counters are stored as INT64, gauges and
//! untyped values as DOUBLE. Distributions have no single-value form and are
//! skipped.

pub mod registry;
pub mod writer;

use crate::core::{Compression, KestrelError, ParquetConfig, Result};
use crate::export::{Sink, Staging};
use crate::metrics::{MetricFamily, ResourceMetricsSet, Value};
use parquet::basic::{BrotliLevel, Compression as Codec, GzipLevel, ZstdLevel};
use parquet::file::properties::WriterProperties;
use registry::Registry;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use writer::{Sample, WriterContext};

/// Resource attribute naming the host directory.
pub const HOST_ATTRIBUTE: &str = "host.name";

fn unsigned_level(level: i32) -> Result<u32> {
    u32::try_from(level).map_err(|_| KestrelError::invalid(format!("negative compression level {level}")))
}

/// Writer properties for `compression` at `level`, or the codec's default
/// level when none is given.
pub fn writer_properties(compression: Compression, level: Option<i32>) -> Result<WriterProperties> {
    compression.validate_level(level)?;
    let codec = match compression {
        Compression::Uncompressed => Codec::UNCOMPRESSED,
        Compression::Brotli => Codec::BROTLI(match level {
            Some(level) => BrotliLevel::try_new(unsigned_level(level)?)?,
            None => BrotliLevel::default(),
        }),
        Compression::Gzip => Codec::GZIP(match level {
            Some(level) => GzipLevel::try_new(unsigned_level(level)?)?,
            None => GzipLevel::default(),
        }),
        Compression::Zstd => Codec::ZSTD(match level {
            Some(level) => ZstdLevel::try_new(level)?,
            None => ZstdLevel::default(),
        }),
    };
    Ok(WriterProperties::builder().set_compression(codec).build())
}

/// Makes a label value or host name safe to use as one path component.
pub fn path_segment(value: &str) -> String {
    match value {
        "." => "_".to_string(),
        ".." => "__".to_string(),
        _ => value.replace(['/', '\\', '\0'], "_"),
    }
}

fn sample(value: &Value) -> Result<Option<Sample>> {
    match value {
        Value::Counter(counter) => i64::try_from(*counter)
            .map(|v| Some(Sample::Int64(v)))
            .map_err(|_| KestrelError::invalid(format!("counter {counter} does not fit INT64"))),
        Value::Gauge(gauge) => Ok(Some(Sample::Double(*gauge))),
        Value::Distribution(_) => Ok(None),
    }
}

/// Writes every value of `set` to its leaf. Failed values are logged and
/// dropped; returns how many were written.
fn write_set(registry: &Registry, set: &ResourceMetricsSet, now: SystemTime) -> usize {
    let mut written = 0;
    for entry in set {
        let host = entry
            .resource
            .get(HOST_ATTRIBUTE)
            .map(|host| host.trim_end_matches('.'))
            .filter(|host| !host.is_empty());
        let Some(host) = host else {
            let err = KestrelError::not_found(format!("{HOST_ATTRIBUTE} in resource {}", entry.resource));
            tracing::error!(metrics = entry.metric_count(), error = %err, "Dropping metrics without host");
            continue;
        };

        for family in &entry.families {
            written += write_family(registry, host, family, now);
        }
    }
    written
}

fn write_family(registry: &Registry, host: &str, family: &MetricFamily, now: SystemTime) -> usize {
    let mut written = 0;
    for metric in family.iter() {
        let sample = match sample(&metric.metric.value) {
            Ok(Some(sample)) => sample,
            Ok(None) => {
                tracing::debug!(family = family.name(), "Skipping distribution family");
                return written;
            },
            Err(err) => {
                tracing::warn!(metric = %metric.identity(), error = %err, "Dropping value");
                continue;
            },
        };

        let mut path = PathBuf::from(path_segment(host));
        path.push(path_segment(family.name()));
        for pair in &metric.metric.labels {
            path.push(path_segment(&pair.value));
        }

        match registry.write(&path, sample, now) {
            Ok(()) => written += 1,
            Err(err) => {
                tracing::warn!(metric = %metric.identity(), error = %err, "Dropping value");
            },
        }
    }
    written
}

/// Sink writing values into a Parquet directory tree.
pub struct ParquetSink {
    name: String,
    staging: Staging,
    registry: Arc<Registry>,
    export_lock: tokio::sync::Mutex<()>,
}

impl ParquetSink {
    /// Creates a sink from its configuration after validating it.
    pub fn new(name: impl Into<String>, config: &ParquetConfig) -> Result<Self> {
        config.validate()?;
        let ctx = WriterContext::new(
            config.file_duration,
            config.buffer_duration,
            config.buffer_size,
            writer_properties(config.compression, config.compression_level)?,
        )?;
        Ok(Self {
            name: name.into(),
            staging: Staging::new(),
            registry: Arc::new(Registry::new(config.basedir.clone(), ctx)),
            export_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Rows buffered inside the leaf writers.
    pub fn buffered_rows(&self) -> usize {
        self.registry.buffered()
    }
}

#[async_trait::async_trait]
impl Sink for ParquetSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&self, family: &MetricFamily) -> Result<usize> {
        self.staging.write(family)
    }

    /// Writes staged values into the leaf writers. A zero `timeout` also
    /// drains every leaf buffer to disk.
    async fn flush(&self, timeout: Duration) -> Result<()> {
        let _export = self.export_lock.lock().await;
        let set = self.staging.take_due(timeout);
        let drain = timeout.is_zero();
        if set.is_none() && !drain {
            return Ok(());
        }

        let registry = Arc::clone(&self.registry);
        let name = self.name.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let now = SystemTime::now();
            if let Some(set) = set {
                let written = write_set(&registry, &set, now);
                tracing::debug!(sink = %name, written, staged = set.metric_count(), "Wrote parquet values");
            }
            if drain {
                registry.flush_all(now)?;
            }
            Ok(())
        })
        .await?
    }

    async fn close(&self) -> Result<()> {
        let flushed = self.flush(Duration::ZERO).await;
        let registry = Arc::clone(&self.registry);
        let _export = self.export_lock.lock().await;
        tokio::task::spawn_blocking(move || registry.close_all()).await??;
        tracing::info!(sink = %self.name, basedir = %self.registry.basedir().display(), "Parquet sink closed");
        flushed
    }

    fn staged_metrics(&self) -> usize {
        self.staging.metric_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{Distribution, Metric, MetricType};
    use std::path::Path;

    fn sink(basedir: &Path) -> ParquetSink {
        ParquetSink::new("parquet", &ParquetConfig::new(basedir)).unwrap()
    }

    fn rotated(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name != writer::ACTIVE_FILE)
            .collect()
    }

    #[test]
    fn test_writer_properties_levels() {
        assert!(writer_properties(Compression::Zstd, Some(22)).is_ok());
        assert!(writer_properties(Compression::Gzip, None).is_ok());
        assert!(matches!(
            writer_properties(Compression::Brotli, Some(12)),
            Err(KestrelError::Invalid(_))
        ));
        assert!(matches!(
            writer_properties(Compression::Uncompressed, Some(1)),
            Err(KestrelError::Invalid(_))
        ));
    }

    #[test]
    fn test_path_segment() {
        assert_eq!(path_segment("sda1"), "sda1");
        assert_eq!(path_segment("/var/log"), "_var_log");
        assert_eq!(path_segment("."), "_");
        assert_eq!(path_segment(".."), "__");
        assert_eq!(path_segment("a.b"), "a.b");
    }

    #[tokio::test]
    async fn test_values_land_in_leaf_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = sink(tmp.path());

        let mut counters = MetricFamily::new("disk_ops", MetricType::Counter).unwrap();
        counters.set_resource_attribute(HOST_ATTRIBUTE, "web-1.example.").unwrap();
        let template = Metric::new(Value::Counter(0)).with_label("disk", "sda").unwrap();
        counters.append(Some(("op", "read")), Value::Counter(10), Some(&template)).unwrap();
        counters.append(Some(("op", "write")), Value::Counter(20), Some(&template)).unwrap();
        sink.write(&counters).unwrap();

        sink.flush(Duration::ZERO).await.unwrap();
        assert_eq!(sink.staged_metrics(), 0);
        assert_eq!(sink.buffered_rows(), 0);
        let read = tmp.path().join("web-1.example/disk_ops/sda/read");
        assert!(read.join(writer::ACTIVE_FILE).exists());

        sink.close().await.unwrap();
        assert_eq!(rotated(&read).len(), 1);
        assert_eq!(rotated(&tmp.path().join("web-1.example/disk_ops/sda/write")).len(), 1);
    }

    #[tokio::test]
    async fn test_missing_host_and_distributions_dropped() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = sink(tmp.path());

        let mut hostless = MetricFamily::new("load", MetricType::Gauge).unwrap();
        hostless.append(None, Value::Gauge(1.0), None).unwrap();
        sink.write(&hostless).unwrap();

        let mut latency = MetricFamily::new("latency", MetricType::Distribution).unwrap();
        latency.set_resource_attribute(HOST_ATTRIBUTE, "a").unwrap();
        latency
            .append(None, Value::Distribution(Distribution::linear(2, 1.0).unwrap()), None)
            .unwrap();
        sink.write(&latency).unwrap();

        sink.close().await.unwrap();
        assert_eq!(sink.staged_metrics(), 0);
        assert!(std::fs::read_dir(tmp.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_young_data_stays_staged() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = sink(tmp.path());
        sink.flush(Duration::ZERO).await.unwrap();

        let mut fam = MetricFamily::new("load", MetricType::Gauge).unwrap();
        fam.set_resource_attribute(HOST_ATTRIBUTE, "a").unwrap();
        fam.append(None, Value::Gauge(1.0), None).unwrap();
        sink.write(&fam).unwrap();

        sink.flush(Duration::from_secs(3600)).await.unwrap();
        assert_eq!(sink.staged_metrics(), 1);
    }
}
