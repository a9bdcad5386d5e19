//! Metric data model.
//!
//! - [`LabelSet`]: sorted, validated name/value pairs
//! - [`Value`], [`Metric`], [`MetricFamily`]: samples and their typed groups
//! - [`identity`]: canonical string form and its parser
//! - [`Distribution`]: bucketed histograms
//! - [`ResourceMetricsSet`]: the per-sink staging structure

pub mod distribution;
pub mod family;
pub mod identity;
pub mod label;
pub mod resource;
pub mod unit;
pub mod value;

pub use distribution::{BucketCount, Distribution};
pub use family::{now_unix_nanos, unix_nanos, Metric, MetricFamily, MetricRef};
pub use identity::{parse_identity, parse_identity_prefix};
pub use label::{LabelPair, LabelSet};
pub use resource::{ResourceMetrics, ResourceMetricsSet};
pub use unit::infer_unit;
pub use value::{MetricType, Value};
