//! Metric values and family types.

use crate::core::{KestrelError, Result};
use crate::metrics::distribution::{format_float, Distribution};
use std::fmt;

/// Type of a metric family, which fixes the variant of its values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum MetricType {
    /// Monotonic unsigned counter
    Counter,
    /// Instantaneous floating point reading
    Gauge,
    /// Gauge-valued metric of unknown semantics
    #[default]
    Untyped,
    /// Bucketed histogram
    Distribution,
}

impl MetricType {
    /// Lower-case name as used in logs and directory names.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
            MetricType::Untyped => "untyped",
            MetricType::Distribution => "distribution",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value of one metric.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Monotonic counter
    Counter(u64),
    /// Gauge, also used by untyped families
    Gauge(f64),
    /// Histogram
    Distribution(Distribution),
}

impl Value {
    /// True if this value may be stored in a family of type `ty`.
    pub fn fits(&self, ty: MetricType) -> bool {
        matches!(
            (self, ty),
            (Value::Counter(_), MetricType::Counter)
                | (Value::Gauge(_), MetricType::Gauge | MetricType::Untyped)
                | (Value::Distribution(_), MetricType::Distribution)
        )
    }

    /// Counters as base-10 integers, gauges in their shortest round-trip
    /// form, distributions as `{count=N,sum=S,buckets=[le:cumulative,...]}`.
    pub fn marshal_text(&self) -> String {
        match self {
            Value::Counter(c) => c.to_string(),
            Value::Gauge(g) => format_float(*g),
            Value::Distribution(d) => d.to_string(),
        }
    }

    /// Numeric view used by sinks that only store scalars.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Counter(c) => Some(*c as f64),
            Value::Gauge(g) => Some(*g),
            Value::Distribution(_) => None,
        }
    }

    /// Checks that the value agrees with `ty`.
    pub fn check_type(&self, ty: MetricType) -> Result<()> {
        if self.fits(ty) {
            Ok(())
        } else {
            Err(KestrelError::invalid(format!(
                "value {} does not fit a {} family",
                self.marshal_text(),
                ty
            )))
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.marshal_text())
    }
}
