//! Bucketed distributions.
//!
//! A distribution keeps one counter per bucket, ordered by ascending upper
//! bound. The last bucket is always unbounded (`+Inf`). Counts are stored
//! per bucket; cumulative counts are derived on demand.

use crate::core::{KestrelError, Result};
use std::fmt;

/// One histogram bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bucket {
    /// Exclusive upper bound; `f64::INFINITY` for the last bucket
    pub maximum: f64,
    /// Observations that fell into this bucket only
    pub count: u64,
}

/// Bucket as reported by [`Distribution::buckets`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketCount {
    /// Upper bound of the bucket
    pub maximum: f64,
    /// Observations in this bucket
    pub count: u64,
    /// Observations in this bucket and every bucket below it
    pub cumulative: u64,
}

/// A histogram of non-negative observations.
#[derive(Debug, Clone, PartialEq)]
pub struct Distribution {
    buckets: Vec<Bucket>,
    sum: f64,
    square_sum: f64,
}

impl Distribution {
    fn from_bounds(bounds: impl Iterator<Item = f64>) -> Self {
        let buckets = bounds.map(|maximum| Bucket { maximum, count: 0 }).collect();
        Distribution {
            buckets,
            sum: 0.0,
            square_sum: 0.0,
        }
    }

    /// `num_buckets` buckets of equal `width`; the last one is unbounded.
    pub fn linear(num_buckets: usize, width: f64) -> Result<Self> {
        if num_buckets == 0 || !(width > 0.0) {
            return Err(KestrelError::invalid(format!(
                "linear distribution needs buckets > 0 and width > 0, got {num_buckets} and {width}"
            )));
        }
        Ok(Self::from_bounds((0..num_buckets).map(|i| {
            if i == num_buckets - 1 {
                f64::INFINITY
            } else {
                (i + 1) as f64 * width
            }
        })))
    }

    /// Bucket `i` ends at `factor * base^i`; the last one is unbounded.
    pub fn exponential(num_buckets: usize, base: f64, factor: f64) -> Result<Self> {
        if num_buckets == 0 || !(base > 1.0) || !(factor > 0.0) {
            return Err(KestrelError::invalid(format!(
                "exponential distribution needs buckets > 0, base > 1 and factor > 0, \
                 got {num_buckets}, {base} and {factor}"
            )));
        }
        Ok(Self::from_bounds((0..num_buckets).map(|i| {
            if i == num_buckets - 1 {
                f64::INFINITY
            } else {
                factor * base.powi(i as i32)
            }
        })))
    }

    /// Explicit upper bounds, strictly increasing and positive. An implicit
    /// `+Inf` bucket is appended, so `bounds` may not contain infinity itself.
    pub fn custom(bounds: &[f64]) -> Result<Self> {
        let mut previous = 0.0;
        for &bound in bounds {
            if !(bound > previous) {
                return Err(KestrelError::invalid(format!(
                    "custom distribution bounds must be positive and strictly increasing: {bounds:?}"
                )));
            }
            previous = bound;
        }
        if bounds.last().is_some_and(|b| b.is_infinite()) {
            return Err(KestrelError::invalid("custom distribution bounds must be finite"));
        }
        Ok(Self::from_bounds(
            bounds.iter().copied().chain(std::iter::once(f64::INFINITY)),
        ))
    }

    /// Records one observation.
    pub fn update(&mut self, gauge: f64) -> Result<()> {
        if !(gauge >= 0.0) {
            return Err(KestrelError::invalid(format!(
                "distribution observations must be non-negative, got {gauge}"
            )));
        }
        let idx = self
            .buckets
            .partition_point(|b| b.maximum <= gauge)
            .min(self.buckets.len() - 1);
        self.buckets[idx].count += 1;
        self.sum += gauge;
        self.square_sum += gauge * gauge;
        Ok(())
    }

    /// Number of buckets, including the unbounded one.
    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Total number of observations.
    pub fn count(&self) -> u64 {
        self.buckets.iter().map(|b| b.count).sum()
    }

    /// Sum of all observations.
    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Upper bound of the bucket holding the `percent`th percentile. `NaN`
    /// for an empty distribution.
    pub fn percentile(&self, percent: f64) -> Result<f64> {
        if !(0.0..=100.0).contains(&percent) {
            return Err(KestrelError::invalid(format!("percentile {percent} outside 0..=100")));
        }
        let total = self.count();
        if total == 0 {
            return Ok(f64::NAN);
        }
        let target = (total as f64 * percent / 100.0).ceil() as u64;
        let mut cumulative = 0;
        for bucket in &self.buckets {
            cumulative += bucket.count;
            if cumulative >= target {
                return Ok(bucket.maximum);
            }
        }
        Ok(f64::INFINITY)
    }

    /// Mean observation, `NaN` when empty.
    pub fn average(&self) -> f64 {
        match self.count() {
            0 => f64::NAN,
            n => self.sum / n as f64,
        }
    }

    /// Sum of squared deviations from the mean.
    pub fn squared_deviation_sum(&self) -> f64 {
        let n = self.count() as f64;
        let mean = self.average();
        mean * mean * n - 2.0 * mean * self.sum + self.square_sum
    }

    /// Sample standard deviation; 0 for a single observation.
    pub fn stddev(&self) -> f64 {
        let n = self.count();
        match n {
            0 => f64::NAN,
            1 => 0.0,
            _ => {
                let n = n as f64;
                ((n * self.square_sum - self.sum * self.sum) / (n * (n - 1.0))).sqrt()
            },
        }
    }

    /// Buckets with their own and cumulative counts.
    pub fn buckets(&self) -> Vec<BucketCount> {
        let mut cumulative = 0;
        self.buckets
            .iter()
            .map(|b| {
                cumulative += b.count;
                BucketCount {
                    maximum: b.maximum,
                    count: b.count,
                    cumulative,
                }
            })
            .collect()
    }

    /// Upper bounds excluding the implicit `+Inf` bucket.
    pub fn explicit_bounds(&self) -> Vec<f64> {
        self.buckets[..self.buckets.len() - 1]
            .iter()
            .map(|b| b.maximum)
            .collect()
    }

    /// Clears all observations, keeping the bucket layout.
    pub fn reset(&mut self) {
        for bucket in &mut self.buckets {
            bucket.count = 0;
        }
        self.sum = 0.0;
        self.square_sum = 0.0;
    }

    fn same_layout(&self, other: &Self) -> bool {
        self.buckets.len() == other.buckets.len()
            && self
                .buckets
                .iter()
                .zip(&other.buckets)
                .all(|(a, b)| a.maximum == b.maximum)
    }

    /// Subtracts an earlier snapshot of the same distribution. Fails if the
    /// layouts differ or `earlier` has more observations in any bucket.
    pub fn sub(&mut self, earlier: &Distribution) -> Result<()> {
        if !self.same_layout(earlier) {
            return Err(KestrelError::invalid("distribution bucket layouts differ"));
        }
        if self
            .buckets
            .iter()
            .zip(&earlier.buckets)
            .any(|(a, b)| a.count < b.count)
        {
            return Err(KestrelError::invalid(
                "cannot subtract a distribution with more observations",
            ));
        }
        for (a, b) in self.buckets.iter_mut().zip(&earlier.buckets) {
            a.count -= b.count;
        }
        self.sum -= earlier.sum;
        self.square_sum -= earlier.square_sum;
        Ok(())
    }

    /// True if both share a layout and no bucket of `self` holds more
    /// observations than the same bucket of `other`. Used to detect resets.
    pub fn is_le(&self, other: &Distribution) -> bool {
        self.same_layout(other)
            && self
                .buckets
                .iter()
                .zip(&other.buckets)
                .all(|(a, b)| a.count <= b.count)
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{count={},sum={},buckets=[", self.count(), format_float(self.sum))?;
        for (i, bucket) in self.buckets().iter().enumerate() {
            if i != 0 {
                f.write_str(",")?;
            }
            write!(f, "{}:{}", format_float(bucket.maximum), bucket.cumulative)?;
        }
        f.write_str("]}")
    }
}

/// Shortest text form that parses back to the same `f64`, with
/// Prometheus-style spellings for the non-finite values.
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        value.to_string()
    }
}
