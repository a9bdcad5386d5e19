//! Metrics and metric families.
//!
//! A [`MetricFamily`] exclusively owns its [`Metric`]s. A metric never points
//! back at its family; code that needs both borrows them together through a
//! [`MetricRef`].

use crate::core::{KestrelError, Result};
use crate::metrics::identity;
use crate::metrics::label::LabelSet;
use crate::metrics::value::{MetricType, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Nanoseconds since the Unix epoch, saturating at the bounds of `u64`.
pub fn unix_nanos(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Current wall clock in Unix nanoseconds.
pub fn now_unix_nanos() -> u64 {
    unix_nanos(SystemTime::now())
}

/// Returns true if `c` may appear in a metric family name.
pub(crate) fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == ':'
}

/// Checks `name` against `[A-Za-z_:][A-Za-z0-9_:]*`.
pub fn validate_metric_name(name: &str) -> Result<()> {
    let Some(first) = name.chars().next() else {
        return Err(KestrelError::invalid("metric name is empty"));
    };
    if first.is_ascii_digit() || !name.chars().all(is_name_char) {
        return Err(KestrelError::invalid(format!("invalid metric name {name:?}")));
    }
    Ok(())
}

/// One sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    /// Sample labels
    pub labels: LabelSet,
    /// Sample value, matching the family type
    pub value: Value,
    /// Event time in Unix nanoseconds; 0 if the producer did not set one
    pub time: u64,
    /// Scrape interval the sample was taken at
    pub interval: Duration,
    /// Free-form metadata, not part of the identity
    pub meta: BTreeMap<String, String>,
}

impl Metric {
    /// A metric with no labels and no timestamp.
    pub fn new(value: Value) -> Self {
        Metric {
            labels: LabelSet::new(),
            value,
            time: 0,
            interval: Duration::ZERO,
            meta: BTreeMap::new(),
        }
    }

    /// Sets the event time.
    pub fn with_time(mut self, time: u64) -> Self {
        self.time = time;
        self
    }

    /// Adds a label, failing like [`LabelSet::add`].
    pub fn with_label(mut self, name: &str, value: &str) -> Result<Self> {
        self.labels.add(name, value)?;
        Ok(self)
    }

    /// Value of label `name`.
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name)
    }

    /// Adds, updates or, for an empty `value`, removes label `name`.
    pub fn set_label(&mut self, name: &str, value: &str) -> Result<()> {
        self.labels.set(name, value)
    }

    /// Order used for deduplication: label set first, then event time.
    pub fn key_cmp(&self, other: &Metric) -> Ordering {
        self.labels
            .cmp(&other.labels)
            .then_with(|| self.time.cmp(&other.time))
    }
}

/// A named, typed group of metrics sharing help text, unit and resource.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    name: String,
    /// Help text
    pub help: Option<String>,
    /// Unit, in UCUM notation
    pub unit: Option<String>,
    /// Family type
    pub ty: MetricType,
    /// Labels describing the producing entity
    pub resource: LabelSet,
    /// Samples, in append order
    pub metrics: Vec<Metric>,
}

impl MetricFamily {
    /// Creates an empty family after validating `name`.
    pub fn new(name: impl Into<String>, ty: MetricType) -> Result<Self> {
        let name = name.into();
        validate_metric_name(&name)?;
        Ok(MetricFamily {
            name,
            help: None,
            unit: None,
            ty,
            resource: LabelSet::new(),
            metrics: Vec::new(),
        })
    }

    /// Family name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets the help text.
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Sets the unit.
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Appends a new metric holding `value`.
    ///
    /// With a `template`, its labels, time, interval and metadata are copied
    /// first; `label` is then applied with [`Metric::set_label`] semantics.
    pub fn append(
        &mut self,
        label: Option<(&str, &str)>,
        value: Value,
        template: Option<&Metric>,
    ) -> Result<()> {
        value.check_type(self.ty)?;
        let mut metric = match template {
            Some(t) => Metric {
                labels: t.labels.clone(),
                value,
                time: t.time,
                interval: t.interval,
                meta: t.meta.clone(),
            },
            None => Metric::new(value),
        };
        if let Some((name, value)) = label {
            metric.set_label(name, value)?;
        }
        self.metrics.try_reserve(1)?;
        self.metrics.push(metric);
        Ok(())
    }

    /// Appends an already-built metric.
    pub fn push(&mut self, metric: Metric) -> Result<()> {
        metric.value.check_type(self.ty)?;
        self.metrics.try_reserve(1)?;
        self.metrics.push(metric);
        Ok(())
    }

    /// Drops all metrics, keeping name, help, type, unit and resource.
    pub fn reset_metrics(&mut self) {
        self.metrics.clear();
    }

    /// Copy of the family without metrics and without resource labels.
    pub fn clone_empty(&self) -> Self {
        MetricFamily {
            name: self.name.clone(),
            help: self.help.clone(),
            unit: self.unit.clone(),
            ty: self.ty,
            resource: LabelSet::new(),
            metrics: Vec::new(),
        }
    }

    /// Adds, updates or, for an empty `value`, removes a resource label.
    pub fn set_resource_attribute(&mut self, name: &str, value: &str) -> Result<()> {
        self.resource.set_attribute(name, value)
    }

    /// Total order by name, then by resource labels.
    pub fn compare(&self, other: &MetricFamily) -> Ordering {
        self.name
            .cmp(&other.name)
            .then_with(|| self.resource.cmp(&other.resource))
    }

    /// Borrowed views pairing each metric with this family.
    pub fn iter(&self) -> impl Iterator<Item = MetricRef<'_>> {
        self.metrics.iter().map(move |metric| MetricRef { family: self, metric })
    }

    /// Number of metrics.
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// True if the family holds no metrics.
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

/// A metric borrowed together with the family that owns it.
#[derive(Debug, Clone, Copy)]
pub struct MetricRef<'a> {
    /// Owning family
    pub family: &'a MetricFamily,
    /// The metric itself
    pub metric: &'a Metric,
}

impl MetricRef<'_> {
    /// Canonical `name{label="value",...}` form.
    pub fn identity(&self) -> String {
        identity::identity(self.family.name(), &self.metric.labels)
    }
}
