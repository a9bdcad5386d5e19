//! Unit inference from metric names.
//!
//! Families scraped from Prometheus-style sources encode their unit as a
//! name suffix (`node_memory_free_bytes`, `http_request_duration_seconds`).
//! [`infer_unit`] maps those suffixes back to UCUM units for OTLP.

use crate::metrics::value::MetricType;

/// Prometheus suffix to UCUM unit. Longer suffixes first so that
/// `_bytes_per_second` wins over `_second`-style matches.
const SUFFIX_UNITS: &[(&str, &str)] = &[
    ("bytes_per_second", "By/s"),
    ("milliseconds", "ms"),
    ("microseconds", "us"),
    ("nanoseconds", "ns"),
    ("kibibytes", "KiBy"),
    ("mebibytes", "MiBy"),
    ("gibibytes", "GiBy"),
    ("tebibytes", "TiBy"),
    ("kilobytes", "KBy"),
    ("megabytes", "MBy"),
    ("gigabytes", "GBy"),
    ("terabytes", "TBy"),
    ("celsius", "Cel"),
    ("amperes", "A"),
    ("seconds", "s"),
    ("minutes", "min"),
    ("percent", "%"),
    ("joules", "J"),
    ("meters", "m"),
    ("volts", "V"),
    ("watts", "W"),
    ("grams", "g"),
    ("hertz", "Hz"),
    ("hours", "h"),
    ("bytes", "By"),
    ("ratio", "1"),
    ("days", "d"),
];

/// Infers a UCUM unit from `name`. Counters have their `_total` suffix
/// stripped first. Returns `None` when no known suffix matches.
pub fn infer_unit(name: &str, ty: MetricType) -> Option<&'static str> {
    let name = match ty {
        MetricType::Counter => name.strip_suffix("_total").unwrap_or(name),
        _ => name,
    };
    SUFFIX_UNITS.iter().find_map(|(suffix, unit)| {
        name.strip_suffix(suffix)
            .filter(|prefix| prefix.ends_with('_'))
            .map(|_| *unit)
    })
}
