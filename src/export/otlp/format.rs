//! Mapping from staged metrics to OTLP protobuf messages.

use crate::core::{KestrelError, Result};
use crate::metrics::{infer_unit, LabelSet, Metric, MetricFamily, MetricType, ResourceMetricsSet, Value};
use ahash::AHashMap;
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::common::v1::{any_value, AnyValue, InstrumentationScope, KeyValue};
use opentelemetry_proto::tonic::metrics::v1::{
    metric::Data, number_data_point, AggregationTemporality, Gauge, Histogram,
    HistogramDataPoint, Metric as OtlpMetric, NumberDataPoint, ResourceMetrics, ScopeMetrics, Sum,
};
use opentelemetry_proto::tonic::resource::v1::Resource;

/// Exports a series may be absent from before its start time is forgotten.
pub const STALE_EXPORTS: u64 = 10;

#[derive(Debug, Clone, Copy)]
struct Sighting {
    first: u64,
    export: u64,
}

/// Remembers when each cumulative series was first seen so that later
/// points can carry a `start_time_unix_nano`.
#[derive(Debug, Default)]
pub struct StartTimeCache {
    first_seen: AHashMap<String, Sighting>,
    export: u64,
}

impl StartTimeCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start time for a point of series `key` at `time`. The first sighting
    /// of a series is recorded and reported as unset (0).
    pub fn start_time(&mut self, key: String, time: u64) -> u64 {
        if time == 0 {
            return 0;
        }
        let export = self.export;
        let sighting = self
            .first_seen
            .entry(key)
            .or_insert(Sighting { first: time, export });
        sighting.export = export;
        if sighting.first < time {
            sighting.first
        } else {
            0
        }
    }

    /// Ends one export. Series absent from the last [`STALE_EXPORTS`]
    /// exports are dropped and start over when seen again.
    pub fn end_export(&mut self) {
        self.export += 1;
        let export = self.export;
        let before = self.first_seen.len();
        self.first_seen
            .retain(|_, sighting| export - sighting.export <= STALE_EXPORTS);
        let evicted = before - self.first_seen.len();
        if evicted > 0 {
            tracing::debug!(evicted, tracked = self.first_seen.len(), "Forgot stale series");
        }
    }

    /// Number of tracked series.
    pub fn len(&self) -> usize {
        self.first_seen.len()
    }

    /// True if no series is tracked.
    pub fn is_empty(&self) -> bool {
        self.first_seen.is_empty()
    }
}

fn string_attribute(key: &str, value: &str) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(any_value::Value::StringValue(value.to_string())),
        }),
    }
}

fn attributes(labels: &LabelSet) -> Vec<KeyValue> {
    labels
        .iter()
        .map(|pair| string_attribute(&pair.name, &pair.value))
        .collect()
}

fn series_key(resource: &LabelSet, family: &MetricFamily, metric: &Metric) -> String {
    format!("{}{}{}", resource, family.name(), metric.labels)
}

fn number_point(
    metric: &Metric,
    start_time_unix_nano: u64,
    value: number_data_point::Value,
) -> NumberDataPoint {
    NumberDataPoint {
        attributes: attributes(&metric.labels),
        start_time_unix_nano,
        time_unix_nano: metric.time,
        value: Some(value),
        ..Default::default()
    }
}

fn mismatch(family: &MetricFamily, metric: &Metric) -> KestrelError {
    KestrelError::internal(format!(
        "{} family {} holds value {}",
        family.ty,
        family.name(),
        metric.value
    ))
}

fn format_family(
    resource: &LabelSet,
    family: &MetricFamily,
    cache: &mut StartTimeCache,
) -> Result<OtlpMetric> {
    let data = match family.ty {
        MetricType::Counter => {
            let mut data_points = Vec::with_capacity(family.len());
            for metric in &family.metrics {
                let Value::Counter(counter) = metric.value else {
                    return Err(mismatch(family, metric));
                };
                let start = cache.start_time(series_key(resource, family, metric), metric.time);
                let value = match i64::try_from(counter) {
                    Ok(v) => number_data_point::Value::AsInt(v),
                    Err(_) => number_data_point::Value::AsDouble(counter as f64),
                };
                data_points.push(number_point(metric, start, value));
            }
            Data::Sum(Sum {
                data_points,
                aggregation_temporality: AggregationTemporality::Cumulative as i32,
                is_monotonic: true,
            })
        },
        MetricType::Gauge | MetricType::Untyped => {
            let mut data_points = Vec::with_capacity(family.len());
            for metric in &family.metrics {
                let Value::Gauge(gauge) = metric.value else {
                    return Err(mismatch(family, metric));
                };
                data_points.push(number_point(metric, 0, number_data_point::Value::AsDouble(gauge)));
            }
            Data::Gauge(Gauge { data_points })
        },
        MetricType::Distribution => {
            let mut data_points = Vec::with_capacity(family.len());
            for metric in &family.metrics {
                let Value::Distribution(dist) = &metric.value else {
                    return Err(mismatch(family, metric));
                };
                let start = cache.start_time(series_key(resource, family, metric), metric.time);
                data_points.push(HistogramDataPoint {
                    attributes: attributes(&metric.labels),
                    start_time_unix_nano: start,
                    time_unix_nano: metric.time,
                    count: dist.count(),
                    sum: Some(dist.sum()),
                    bucket_counts: dist.buckets().iter().map(|b| b.count).collect(),
                    explicit_bounds: dist.explicit_bounds(),
                    ..Default::default()
                });
            }
            Data::Histogram(Histogram {
                data_points,
                aggregation_temporality: AggregationTemporality::Cumulative as i32,
            })
        },
    };

    let unit = family
        .unit
        .clone()
        .or_else(|| infer_unit(family.name(), family.ty).map(str::to_string))
        .unwrap_or_default();

    Ok(OtlpMetric {
        name: family.name().to_string(),
        description: family.help.clone().unwrap_or_default(),
        unit,
        data: Some(data),
        ..Default::default()
    })
}

/// Maps every staged resource to one OTLP `ResourceMetrics` with a single
/// scope naming this agent.
pub fn resource_metrics(
    set: &ResourceMetricsSet,
    cache: &mut StartTimeCache,
) -> Result<Vec<ResourceMetrics>> {
    let mut out = Vec::with_capacity(set.len());
    for entry in set {
        let metrics = entry
            .families
            .iter()
            .map(|family| format_family(&entry.resource, family, cache))
            .collect::<Result<Vec<_>>>()?;

        out.push(ResourceMetrics {
            resource: Some(Resource {
                attributes: attributes(&entry.resource),
                ..Default::default()
            }),
            scope_metrics: vec![ScopeMetrics {
                scope: Some(InstrumentationScope {
                    name: env!("CARGO_PKG_NAME").to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    ..Default::default()
                }),
                metrics,
                ..Default::default()
            }],
            ..Default::default()
        });
    }
    Ok(out)
}

/// Builds the export request for `set`.
pub fn export_request(
    set: &ResourceMetricsSet,
    cache: &mut StartTimeCache,
) -> Result<ExportMetricsServiceRequest> {
    let resource_metrics = resource_metrics(set, cache)?;
    cache.end_export();
    Ok(ExportMetricsServiceRequest { resource_metrics })
}
