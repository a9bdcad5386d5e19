//! Write sinks.
//!
//! Every sink stages incoming families in its own [`Staging`] area and ships
//! them out when flushed. Producers only ever see the [`Sink`] trait; the
//! scheduler holds the sinks as `Arc<dyn Sink>`.

pub mod otlp;
pub mod parquet;

use crate::core::Result;
use crate::metrics::{MetricFamily, ResourceMetricsSet};
use parking_lot::Mutex;
use std::time::{Duration, Instant};

pub use self::otlp::OtlpSink;
pub use self::parquet::ParquetSink;

/// A destination for metric families.
#[async_trait::async_trait]
pub trait Sink: Send + Sync {
    /// Unique sink name, used to address external flush requests.
    fn name(&self) -> &str;

    /// Stages a copy of `family`. Returns the number of metrics skipped as
    /// duplicates of already staged ones.
    fn write(&self, family: &MetricFamily) -> Result<usize>;

    /// Ships staged data. A non-zero `timeout` skips the flush while the
    /// staged data is younger than `timeout`; zero flushes unconditionally.
    async fn flush(&self, timeout: Duration) -> Result<()>;

    /// Flushes unconditionally and releases sink resources.
    async fn close(&self) -> Result<()>;

    /// Number of metrics currently staged.
    fn staged_metrics(&self) -> usize;
}

/// Staging area shared by all sinks.
///
/// The lock is only ever held for in-memory work. Flushing swaps the staged
/// set out, exports it without the lock and merges it back on failure.
#[derive(Debug)]
pub struct Staging {
    state: Mutex<StagingState>,
}

#[derive(Debug)]
struct StagingState {
    set: ResourceMetricsSet,
    staged_time: Instant,
}

impl Default for Staging {
    fn default() -> Self {
        Self::new()
    }
}

impl Staging {
    /// Creates an empty staging area.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StagingState {
                set: ResourceMetricsSet::new(),
                staged_time: Instant::now(),
            }),
        }
    }

    /// Stages `family`, see [`ResourceMetricsSet::add`].
    pub fn write(&self, family: &MetricFamily) -> Result<usize> {
        self.state.lock().set.add(family)
    }

    /// Takes the staged set if a flush with `timeout` is due now.
    pub fn take_due(&self, timeout: Duration) -> Option<ResourceMetricsSet> {
        self.take_due_at(timeout, Instant::now())
    }

    /// Takes the staged set if a flush with `timeout` is due at `now`.
    ///
    /// An empty area restarts the staging clock. A non-zero `timeout` leaves
    /// the data in place until `timeout` has passed since that restart.
    pub fn take_due_at(&self, timeout: Duration, now: Instant) -> Option<ResourceMetricsSet> {
        let mut state = self.state.lock();
        if state.set.is_empty() {
            state.staged_time = now;
            return None;
        }
        if !timeout.is_zero() && now < state.staged_time + timeout {
            return None;
        }
        Some(state.set.take())
    }

    /// Puts back a set that could not be exported. Metrics staged in the
    /// meantime win over identical restored ones.
    pub fn restore(&self, set: ResourceMetricsSet) -> Result<usize> {
        self.state.lock().set.merge(set)
    }

    /// Number of staged metrics.
    pub fn metric_count(&self) -> usize {
        self.state.lock().set.metric_count()
    }

    /// True if nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.state.lock().set.is_empty()
    }
}
