//! Resource-grouped metric staging.
//!
//! A [`ResourceMetricsSet`] groups families by their resource labels. Each
//! entry keeps its families sorted by name, and each family keeps its
//! metrics sorted by `(labels, time)` without duplicates. Adding the same
//! family twice therefore changes nothing the second time, which lets
//! producers retry freely.

use crate::core::{KestrelError, Result};
use crate::metrics::family::{Metric, MetricFamily};
use crate::metrics::label::LabelSet;

/// All staged families of one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceMetrics {
    /// Resource labels shared by every family of this entry
    pub resource: LabelSet,
    /// Families sorted by name; their own `resource` is always empty
    pub families: Vec<MetricFamily>,
}

impl ResourceMetrics {
    /// Number of metrics across all families.
    pub fn metric_count(&self) -> usize {
        self.families.iter().map(MetricFamily::len).sum()
    }
}

/// Families grouped by resource, ordered by resource label set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceMetricsSet {
    entries: Vec<ResourceMetrics>,
}

impl ResourceMetricsSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages a copy of every metric of `family`.
    ///
    /// Returns how many metrics were skipped because an identical metric,
    /// same labels and time, was already staged. An empty family is a no-op.
    pub fn add(&mut self, family: &MetricFamily) -> Result<usize> {
        if family.is_empty() {
            return Ok(0);
        }
        let entry = self.entry_mut(&family.resource)?;
        let staged = lookup_or_insert_family(entry, family)?;
        if staged.ty != family.ty {
            return Err(KestrelError::invalid(format!(
                "family {} staged as {} but received as {}",
                family.name(),
                staged.ty,
                family.ty
            )));
        }
        insert_metrics(staged, &family.metrics)
    }

    fn entry_mut(&mut self, resource: &LabelSet) -> Result<&mut ResourceMetrics> {
        let idx = match self.entries.binary_search_by(|e| e.resource.cmp(resource)) {
            Ok(idx) => idx,
            Err(idx) => {
                self.entries.try_reserve(1)?;
                self.entries.insert(
                    idx,
                    ResourceMetrics {
                        resource: resource.clone(),
                        families: Vec::new(),
                    },
                );
                idx
            },
        };
        Ok(&mut self.entries[idx])
    }

    /// Moves everything staged in `other` into this set.
    pub fn merge(&mut self, other: ResourceMetricsSet) -> Result<usize> {
        let mut skipped = 0;
        for entry in other.entries {
            for mut family in entry.families {
                family.resource = entry.resource.clone();
                skipped += self.add(&family)?;
            }
        }
        Ok(skipped)
    }

    /// Drops every entry.
    pub fn reset(&mut self) {
        self.entries.clear();
    }

    /// Takes the staged contents, leaving this set empty.
    pub fn take(&mut self) -> ResourceMetricsSet {
        std::mem::take(self)
    }

    /// True if nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of resource entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Number of staged metrics across all entries.
    pub fn metric_count(&self) -> usize {
        self.entries.iter().map(ResourceMetrics::metric_count).sum()
    }

    /// Entries in resource order.
    pub fn iter(&self) -> impl Iterator<Item = &ResourceMetrics> {
        self.entries.iter()
    }

    /// Entry for exactly `resource`, if any.
    pub fn get(&self, resource: &LabelSet) -> Option<&ResourceMetrics> {
        self.entries
            .binary_search_by(|e| e.resource.cmp(resource))
            .ok()
            .map(|idx| &self.entries[idx])
    }
}

impl<'a> IntoIterator for &'a ResourceMetricsSet {
    type Item = &'a ResourceMetrics;
    type IntoIter = std::slice::Iter<'a, ResourceMetrics>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

fn lookup_or_insert_family<'a>(
    entry: &'a mut ResourceMetrics,
    family: &MetricFamily,
) -> Result<&'a mut MetricFamily> {
    let idx = match entry
        .families
        .binary_search_by(|f| f.name().cmp(family.name()))
    {
        Ok(idx) => idx,
        Err(idx) => {
            entry.families.try_reserve(1)?;
            entry.families.insert(idx, family.clone_empty());
            idx
        },
    };
    Ok(&mut entry.families[idx])
}

fn insert_metrics(staged: &mut MetricFamily, metrics: &[Metric]) -> Result<usize> {
    let mut skipped = 0;
    for metric in metrics {
        match staged.metrics.binary_search_by(|m| m.key_cmp(metric)) {
            Ok(_) => {
                tracing::trace!(
                    identity = %crate::metrics::identity::identity(staged.name(), &metric.labels),
                    time = metric.time,
                    "Skipping duplicate metric"
                );
                skipped += 1;
            },
            Err(idx) => {
                metric.value.check_type(staged.ty)?;
                staged.metrics.try_reserve(1)?;
                staged.metrics.insert(idx, metric.clone());
            },
        }
    }
    Ok(skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::value::{MetricType, Value};
    use pretty_assertions::assert_eq;

    fn family(name: &str, host: &str, samples: &[(&str, u64, f64)]) -> MetricFamily {
        let mut fam = MetricFamily::new(name, MetricType::Gauge).unwrap();
        fam.set_resource_attribute("host.name", host).unwrap();
        for (cpu, time, value) in samples {
            let template = Metric::new(Value::Gauge(0.0)).with_time(*time);
            fam.append(Some(("cpu", cpu)), Value::Gauge(*value), Some(&template))
                .unwrap();
        }
        fam
    }

    #[test]
    fn test_replay_is_idempotent() {
        let fam = family("load", "a", &[("1", 10, 1.0), ("0", 10, 2.0), ("0", 20, 3.0)]);
        let mut set = ResourceMetricsSet::new();

        assert_eq!(set.add(&fam).unwrap(), 0);
        let snapshot = set.clone();
        assert_eq!(set.add(&fam).unwrap(), fam.len());
        assert_eq!(set, snapshot);
    }

    #[test]
    fn test_metrics_sorted_by_labels_then_time() {
        let fam = family("load", "a", &[("1", 10, 1.0), ("0", 20, 2.0), ("0", 10, 3.0)]);
        let mut set = ResourceMetricsSet::new();
        set.add(&fam).unwrap();

        let staged = &set.iter().next().unwrap().families[0];
        let keys: Vec<(&str, u64)> = staged
            .metrics
            .iter()
            .map(|m| (m.label("cpu").unwrap(), m.time))
            .collect();
        assert_eq!(keys, vec![("0", 10), ("0", 20), ("1", 10)]);
    }

    #[test]
    fn test_staged_families_have_no_resource() {
        let mut set = ResourceMetricsSet::new();
        set.add(&family("load", "a", &[("0", 1, 1.0)])).unwrap();
        let entry = set.iter().next().unwrap();
        assert_eq!(entry.resource.get("host.name"), Some("a"));
        assert!(entry.families.iter().all(|f| f.resource.is_empty()));
    }

    #[test]
    fn test_grouping_by_resource_and_name() {
        let mut set = ResourceMetricsSet::new();
        set.add(&family("mem", "b", &[("0", 1, 1.0)])).unwrap();
        set.add(&family("load", "a", &[("0", 1, 1.0)])).unwrap();
        set.add(&family("cpu", "a", &[("0", 1, 1.0)])).unwrap();

        assert_eq!(set.len(), 2);
        let hosts: Vec<_> = set.iter().map(|e| e.resource.get("host.name").unwrap()).collect();
        assert_eq!(hosts, vec!["a", "b"]);
        let names: Vec<_> = set.iter().next().unwrap().families.iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["cpu", "load"]);
        assert_eq!(set.metric_count(), 3);
    }

    #[test]
    fn test_empty_family_is_noop() {
        let mut set = ResourceMetricsSet::new();
        let fam = MetricFamily::new("empty", MetricType::Counter).unwrap();
        assert_eq!(set.add(&fam).unwrap(), 0);
        assert!(set.is_empty());
    }

    #[test]
    fn test_reset_then_add_matches_single_add() {
        let fam = family("load", "a", &[("0", 1, 1.0), ("1", 1, 2.0)]);
        let mut once = ResourceMetricsSet::new();
        once.add(&fam).unwrap();

        let mut set = ResourceMetricsSet::new();
        set.add(&fam).unwrap();
        set.reset();
        assert!(set.is_empty());
        set.add(&fam).unwrap();
        assert_eq!(set, once);
    }

    #[test]
    fn test_type_conflict_rejected() {
        let mut set = ResourceMetricsSet::new();
        set.add(&family("load", "a", &[("0", 1, 1.0)])).unwrap();

        let mut counter = MetricFamily::new("load", MetricType::Counter).unwrap();
        counter.set_resource_attribute("host.name", "a").unwrap();
        counter.append(None, Value::Counter(1), None).unwrap();
        assert!(matches!(set.add(&counter), Err(KestrelError::Invalid(_))));
        assert_eq!(set.metric_count(), 1);
    }

    #[test]
    fn test_take_and_merge_back() {
        let mut set = ResourceMetricsSet::new();
        set.add(&family("load", "a", &[("0", 1, 1.0)])).unwrap();
        let snapshot = set.clone();

        let taken = set.take();
        assert!(set.is_empty());
        set.add(&family("load", "a", &[("0", 2, 5.0)])).unwrap();

        assert_eq!(set.merge(taken).unwrap(), 0);
        assert_eq!(set.metric_count(), 2);
        assert_eq!(set.merge(snapshot).unwrap(), 1);
    }
}
