//! Flush scheduling and producer polling.
//!
//! The [`Scheduler`] owns every sink. Each sink gets a background loop that
//! calls its `flush` at the sink's interval; each registered [`Producer`] is
//! polled on its own interval and its families are fanned out to all sinks
//! through a [`Dispatcher`]. External code holds a cloned `Dispatcher` to
//! write and flush on demand.

pub mod agent;

pub use agent::AgentProducer;

use crate::core::{KestrelError, Result};
use crate::export::Sink;
use crate::metrics::MetricFamily;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// A source of metric families polled by the scheduler.
#[async_trait::async_trait]
pub trait Producer: Send + Sync {
    /// Producer name, for logs.
    fn name(&self) -> &str;

    /// Polling interval; `None` uses the scheduler default.
    fn interval(&self) -> Option<Duration> {
        None
    }

    /// Reads the current values.
    async fn read(&self) -> Result<Vec<MetricFamily>>;
}

/// Write and flush entry points over every registered sink.
#[derive(Clone, Default)]
pub struct Dispatcher {
    sinks: Arc<Vec<Arc<dyn Sink>>>,
}

impl Dispatcher {
    /// Creates a dispatcher over `sinks`.
    pub fn new(sinks: Vec<Arc<dyn Sink>>) -> Self {
        Self {
            sinks: Arc::new(sinks),
        }
    }

    /// All sinks, in registration order.
    pub fn sinks(&self) -> &[Arc<dyn Sink>] {
        &self.sinks
    }

    /// Stages `family` in every sink.
    ///
    /// Every sink is attempted. Returns the largest duplicate count reported
    /// by any sink, or the first error.
    pub fn write(&self, family: &MetricFamily) -> Result<usize> {
        let mut skipped = 0;
        let mut first_error = None;
        for sink in self.sinks.iter() {
            match sink.write(family) {
                Ok(n) => skipped = skipped.max(n),
                Err(err) => {
                    tracing::warn!(sink = sink.name(), family = family.name(), error = %err, "Write failed");
                    first_error.get_or_insert(err);
                },
            }
        }
        first_error.map_or(Ok(skipped), Err)
    }

    /// Flushes the sink named `id`, or every sink for `None`.
    ///
    /// A zero `timeout` flushes unconditionally. Fails with `NotFound` if no
    /// sink is named `id`; otherwise returns the first sink error.
    pub async fn flush(&self, timeout: Duration, id: Option<&str>) -> Result<()> {
        let targets: Vec<&Arc<dyn Sink>> = self
            .sinks
            .iter()
            .filter(|sink| id.map_or(true, |id| sink.name() == id))
            .collect();
        match id {
            Some(id) if targets.is_empty() => {
                return Err(KestrelError::not_found(format!("sink {id}")));
            },
            _ => {},
        }

        let results = futures::future::join_all(targets.iter().map(|sink| sink.flush(timeout))).await;
        let mut first_error = None;
        for (sink, result) in targets.iter().zip(results) {
            if let Err(err) = result {
                tracing::warn!(sink = sink.name(), error = %err, "Flush failed");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Closes every sink: a final unconditional flush, then release.
    pub async fn close(&self) -> Result<()> {
        let results = futures::future::join_all(self.sinks.iter().map(|sink| sink.close())).await;
        let mut first_error = None;
        for (sink, result) in self.sinks.iter().zip(results) {
            if let Err(err) = result {
                tracing::error!(sink = sink.name(), error = %err, "Closing sink failed");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Collects sinks and producers, then runs their loops.
pub struct Scheduler {
    default_interval: Duration,
    sinks: Vec<(Arc<dyn Sink>, Duration)>,
    producers: Vec<Arc<dyn Producer>>,
}

impl Scheduler {
    /// Creates a scheduler; `default_interval` applies to producers that do
    /// not pick their own.
    pub fn new(default_interval: Duration) -> Self {
        Self {
            default_interval,
            sinks: Vec::new(),
            producers: Vec::new(),
        }
    }

    /// Registers a sink flushed every `interval`. Sink names must be unique.
    pub fn register_sink(&mut self, sink: Arc<dyn Sink>, interval: Duration) -> Result<()> {
        if interval.is_zero() {
            return Err(KestrelError::invalid(format!("sink {} has a zero flush interval", sink.name())));
        }
        if self.sinks.iter().any(|(s, _)| s.name() == sink.name()) {
            return Err(KestrelError::exists(format!("sink {}", sink.name())));
        }
        tracing::info!(sink = sink.name(), interval = ?interval, "Registered sink");
        self.sinks.push((sink, interval));
        Ok(())
    }

    /// Registers a producer.
    pub fn register_producer(&mut self, producer: Arc<dyn Producer>) {
        tracing::info!(producer = producer.name(), "Registered producer");
        self.producers.push(producer);
    }

    /// Dispatcher over the sinks registered so far.
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.sinks.iter().map(|(sink, _)| Arc::clone(sink)).collect())
    }

    /// Spawns one flush loop per sink and one poll loop per producer.
    pub fn start(self) -> SchedulerHandle {
        let dispatcher = self.dispatcher();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::with_capacity(self.sinks.len() + self.producers.len());

        for (sink, interval) in self.sinks {
            tasks.push(tokio::spawn(flush_loop(sink, interval, shutdown_rx.clone())));
        }
        for producer in self.producers {
            let interval = producer.interval().unwrap_or(self.default_interval);
            tasks.push(tokio::spawn(poll_loop(
                producer,
                interval,
                dispatcher.clone(),
                shutdown_rx.clone(),
            )));
        }

        SchedulerHandle {
            dispatcher,
            shutdown: shutdown_tx,
            tasks,
        }
    }
}

/// Handle to a running scheduler.
pub struct SchedulerHandle {
    dispatcher: Dispatcher,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Dispatcher over the scheduled sinks.
    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    /// Stops every loop, then closes all sinks.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(err) = task.await {
                tracing::error!(error = %err, "Scheduler task failed");
            }
        }
        tracing::info!("Scheduler stopped, closing sinks");
        self.dispatcher.close().await
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn flush_loop(sink: Arc<dyn Sink>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = ticker(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = sink.flush(interval).await {
                    tracing::warn!(sink = sink.name(), error = %err, "Periodic flush failed");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    tracing::debug!(sink = sink.name(), "Flush loop stopped");
}

async fn poll_loop(
    producer: Arc<dyn Producer>,
    interval: Duration,
    dispatcher: Dispatcher,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = ticker(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => poll_once(producer.as_ref(), &dispatcher).await,
            _ = shutdown.changed() => break,
        }
    }
    tracing::debug!(producer = producer.name(), "Poll loop stopped");
}

async fn poll_once(producer: &dyn Producer, dispatcher: &Dispatcher) {
    let families = match producer.read().await {
        Ok(families) => families,
        Err(err) => {
            tracing::warn!(producer = producer.name(), error = %err, "Read failed");
            return;
        },
    };
    for family in &families {
        match dispatcher.write(family) {
            Ok(0) => {},
            Ok(skipped) => {
                tracing::debug!(producer = producer.name(), family = family.name(), skipped, "Skipped duplicates");
            },
            // Already logged per sink.
            Err(_) => {},
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::export::Staging;
    use crate::metrics::{MetricType, Value};
    use parking_lot::Mutex;

    /// In-memory sink recording every flush timeout.
    pub(crate) struct MemorySink {
        name: String,
        staging: Staging,
        pub(crate) flushes: Mutex<Vec<Duration>>,
        pub(crate) closed: Mutex<bool>,
    }

    impl MemorySink {
        pub(crate) fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                staging: Staging::new(),
                flushes: Mutex::new(Vec::new()),
                closed: Mutex::new(false),
            })
        }
    }

    #[async_trait::async_trait]
    impl Sink for MemorySink {
        fn name(&self) -> &str {
            &self.name
        }

        fn write(&self, family: &MetricFamily) -> Result<usize> {
            self.staging.write(family)
        }

        async fn flush(&self, timeout: Duration) -> Result<()> {
            self.flushes.lock().push(timeout);
            self.staging.take_due(timeout);
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            self.flush(Duration::ZERO).await?;
            *self.closed.lock() = true;
            Ok(())
        }

        fn staged_metrics(&self) -> usize {
            self.staging.metric_count()
        }
    }

    struct StaticProducer;

    #[async_trait::async_trait]
    impl Producer for StaticProducer {
        fn name(&self) -> &str {
            "static"
        }

        fn interval(&self) -> Option<Duration> {
            Some(Duration::from_millis(20))
        }

        async fn read(&self) -> Result<Vec<MetricFamily>> {
            let mut fam = MetricFamily::new("up", MetricType::Gauge)?;
            fam.append(None, Value::Gauge(1.0), None)?;
            Ok(vec![fam])
        }
    }

    fn gauge() -> MetricFamily {
        let mut fam = MetricFamily::new("up", MetricType::Gauge).unwrap();
        fam.append(None, Value::Gauge(1.0), None).unwrap();
        fam
    }

    #[test]
    fn test_write_fans_out() {
        let a = MemorySink::new("a");
        let b = MemorySink::new("b");
        let sinks: Vec<Arc<dyn Sink>> = vec![a.clone(), b.clone()];
        let dispatcher = Dispatcher::new(sinks);

        assert_eq!(dispatcher.write(&gauge()).unwrap(), 0);
        assert_eq!(dispatcher.write(&gauge()).unwrap(), 1);
        assert_eq!(a.staged_metrics(), 1);
        assert_eq!(b.staged_metrics(), 1);
    }

    #[tokio::test]
    async fn test_flush_by_id() {
        let a = MemorySink::new("a");
        let b = MemorySink::new("b");
        let sinks: Vec<Arc<dyn Sink>> = vec![a.clone(), b.clone()];
        let dispatcher = Dispatcher::new(sinks);

        dispatcher.flush(Duration::ZERO, Some("b")).await.unwrap();
        assert!(a.flushes.lock().is_empty());
        assert_eq!(*b.flushes.lock(), vec![Duration::ZERO]);

        dispatcher.flush(Duration::from_secs(5), None).await.unwrap();
        assert_eq!(a.flushes.lock().len(), 1);
        assert_eq!(b.flushes.lock().len(), 2);

        let err = dispatcher.flush(Duration::ZERO, Some("missing")).await.unwrap_err();
        assert!(matches!(err, KestrelError::NotFound(_)));
    }

    #[test]
    fn test_register_sink_rejects_duplicates() {
        let mut scheduler = Scheduler::new(Duration::from_secs(10));
        scheduler.register_sink(MemorySink::new("a"), Duration::from_secs(1)).unwrap();
        let err = scheduler
            .register_sink(MemorySink::new("a"), Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, KestrelError::Exists(_)));
        assert!(scheduler.register_sink(MemorySink::new("b"), Duration::ZERO).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loops_run_until_shutdown() {
        let sink = MemorySink::new("mem");
        let mut scheduler = Scheduler::new(Duration::from_secs(3600));
        scheduler.register_sink(sink.clone(), Duration::from_millis(20)).unwrap();
        scheduler.register_producer(Arc::new(StaticProducer));

        let handle = scheduler.start();
        // Let both loops arm their tickers before the clock moves.
        tokio::task::yield_now().await;
        for _ in 0..5 {
            tokio::time::advance(Duration::from_millis(20)).await;
            tokio::task::yield_now().await;
        }
        handle.shutdown().await.unwrap();

        let flushes = sink.flushes.lock().clone();
        assert!(
            (2..=6).contains(&flushes.len()),
            "expected periodic flushes, got {flushes:?}"
        );
        assert!(flushes[..flushes.len() - 1]
            .iter()
            .all(|t| *t == Duration::from_millis(20)));
        assert_eq!(flushes.last(), Some(&Duration::ZERO));
        assert!(*sink.closed.lock());
        assert_eq!(sink.staged_metrics(), 0);
    }
}
