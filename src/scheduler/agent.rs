//! Built-in producer reporting on the agent itself.

use super::{Dispatcher, Producer};
use crate::core::Result;
use crate::metrics::{now_unix_nanos, Metric, MetricFamily, MetricType, Value};
use std::time::Instant;

/// Reports agent uptime and the number of metrics staged per sink.
pub struct AgentProducer {
    hostname: String,
    started: Instant,
    dispatcher: Dispatcher,
}

impl AgentProducer {
    /// Creates the producer. Families carry `host.name = hostname`.
    pub fn new(hostname: impl Into<String>, dispatcher: Dispatcher) -> Self {
        Self {
            hostname: hostname.into(),
            started: Instant::now(),
            dispatcher,
        }
    }

    fn family(&self, name: &str, help: &str, unit: &str) -> Result<MetricFamily> {
        let mut family = MetricFamily::new(name, MetricType::Gauge)?
            .with_help(help)
            .with_unit(unit);
        family.set_resource_attribute("host.name", &self.hostname)?;
        Ok(family)
    }
}

#[async_trait::async_trait]
impl Producer for AgentProducer {
    fn name(&self) -> &str {
        "agent"
    }

    async fn read(&self) -> Result<Vec<MetricFamily>> {
        let template = Metric::new(Value::Gauge(0.0)).with_time(now_unix_nanos());

        let mut uptime = self.family("kestrel_uptime_seconds", "Time since the agent started", "s")?;
        uptime.append(
            None,
            Value::Gauge(self.started.elapsed().as_secs_f64()),
            Some(&template),
        )?;

        let mut staged = self.family(
            "kestrel_staged_metrics",
            "Metrics waiting in a sink for the next flush",
            "{metric}",
        )?;
        for sink in self.dispatcher.sinks() {
            #[allow(clippy::cast_precision_loss)]
            let count = sink.staged_metrics() as f64;
            staged.append(Some(("sink", sink.name())), Value::Gauge(count), Some(&template))?;
        }

        Ok(vec![uptime, staged])
    }
}
