//! Canonical metric identities.
//!
//! The identity of a metric is its family name followed, when it has labels,
//! by `{name="value",...}` with labels in name order. Backslash, double
//! quote, newline, carriage return and tab inside values are escaped with a
//! backslash. [`parse_identity`] is the exact inverse.

use crate::core::{KestrelError, Result};
use crate::metrics::family::{is_name_char, validate_metric_name, Metric, MetricFamily};
use crate::metrics::label::{is_label_char, LabelSet};
use crate::metrics::value::{MetricType, Value};
use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, is_not, take_while1},
    character::complete::char,
    combinator::{map, opt, value as nom_value},
    multi::separated_list1,
    sequence::{delimited, pair, separated_pair},
    IResult,
};
use std::fmt::{self, Write};

/// Writes `value` with identity escaping applied.
pub(crate) fn write_escaped<W: Write>(out: &mut W, value: &str) -> fmt::Result {
    for c in value.chars() {
        match c {
            '\\' => out.write_str("\\\\")?,
            '"' => out.write_str("\\\"")?,
            '\n' => out.write_str("\\n")?,
            '\r' => out.write_str("\\r")?,
            '\t' => out.write_str("\\t")?,
            c => out.write_char(c)?,
        }
    }
    Ok(())
}

/// Identity of a metric named `name` carrying `labels`.
pub fn identity(name: &str, labels: &LabelSet) -> String {
    if labels.is_empty() {
        return name.to_string();
    }
    format!("{name}{labels}")
}

/// Parses a complete identity into an untyped family holding one metric.
///
/// Only canonical identities are accepted: labels must appear in name order,
/// each at most once, with non-empty values.
pub fn parse_identity(s: &str) -> Result<MetricFamily> {
    let (family, rest) = parse_identity_prefix(s)?;
    if !rest.is_empty() {
        return Err(KestrelError::invalid(format!(
            "trailing data after identity: {rest:?}"
        )));
    }
    Ok(family)
}

/// Parses an identity at the start of `s`, as found in `identity SP value`
/// lines. Returns the family and the rest of the input, which is either
/// empty or starts with a space.
pub fn parse_identity_prefix(s: &str) -> Result<(MetricFamily, &str)> {
    let (rest, (name, pairs)) = match pair(metric_name, opt(label_block))(s) {
        Ok(parsed) => parsed,
        Err(e) => {
            return Err(KestrelError::invalid(format!(
                "failed to parse identity {s:?}: {e}"
            )))
        },
    };
    validate_metric_name(name)?;

    if !(rest.is_empty() || rest.starts_with(' ')) {
        return Err(KestrelError::invalid(format!("unexpected {rest:?} after identity")));
    }

    let mut labels = LabelSet::new();
    let mut last_name: Option<&str> = None;
    for (key, value) in pairs.unwrap_or_default() {
        if last_name.is_some_and(|last| last >= key) {
            return Err(KestrelError::invalid(format!(
                "labels out of order or repeated at {key:?} in {s:?}"
            )));
        }
        if value.is_empty() {
            return Err(KestrelError::invalid(format!("empty value for label {key:?}")));
        }
        labels.add(key, &value)?;
        last_name = Some(key);
    }

    let mut family = MetricFamily::new(name, MetricType::Untyped)?;
    family.push(Metric {
        labels,
        ..Metric::new(Value::Gauge(0.0))
    })?;
    Ok((family, rest))
}

/// Parse a metric family name
fn metric_name(input: &str) -> IResult<&str, &str> {
    take_while1(is_name_char)(input)
}

/// Parse `{name="value",...}`
fn label_block(input: &str) -> IResult<&str, Vec<(&str, String)>> {
    delimited(
        char('{'),
        separated_list1(
            char(','),
            separated_pair(take_while1(is_label_char), char('='), label_value),
        ),
        char('}'),
    )(input)
}

/// Parse a quoted label value, undoing identity escaping. Only the escapes
/// produced by [`write_escaped`] are accepted.
fn label_value(input: &str) -> IResult<&str, String> {
    delimited(
        char('"'),
        map(
            opt(escaped_transform(
                is_not("\\\"\n"),
                '\\',
                alt((
                    nom_value("\\", char('\\')),
                    nom_value("\"", char('"')),
                    nom_value("\n", char('n')),
                    nom_value("\r", char('r')),
                    nom_value("\t", char('t')),
                )),
            )),
            Option::unwrap_or_default,
        ),
        char('"'),
    )(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn first_identity(family: &MetricFamily) -> String {
        family.iter().next().unwrap().identity()
    }

    #[test]
    fn test_identity_without_labels() {
        assert_eq!(identity("up", &LabelSet::new()), "up");
    }

    #[test]
    fn test_identity_escapes() {
        let labels = LabelSet::from_pairs([("newline", "\n"), ("quote", "\"")]).unwrap();
        assert_eq!(
            identity("escape_sequences", &labels),
            r#"escape_sequences{newline="\n",quote="\""}"#
        );

        let labels =
            LabelSet::from_pairs([("bs", "a\\b"), ("cr", "\r"), ("tab", "x\ty")]).unwrap();
        assert_eq!(identity("m", &labels), r#"m{bs="a\\b",cr="\r",tab="x\ty"}"#);
    }

    #[test]
    fn test_parse_round_trip() {
        for s in [
            "up",
            "http:requests_total",
            r#"m{a="1"}"#,
            r#"escape_sequences{newline="\n",quote="\""}"#,
            r#"m{bs="a\\b",cr="\r",tab="x\ty",utf8="übung"}"#,
        ] {
            let family = parse_identity(s).unwrap();
            assert_eq!(first_identity(&family), s);
        }
    }

    #[test]
    fn test_parse_unescapes() {
        let family = parse_identity(r#"m{a="x\ny",b="\"q\"",c="\\"}"#).unwrap();
        let metric = &family.metrics[0];
        assert_eq!(metric.label("a"), Some("x\ny"));
        assert_eq!(metric.label("b"), Some("\"q\""));
        assert_eq!(metric.label("c"), Some("\\"));
        assert_eq!(family.ty, MetricType::Untyped);
    }

    #[test]
    fn test_parse_prefix_stops_at_space() {
        let (family, rest) = parse_identity_prefix(r#"load{cpu="0"} 0.5"#).unwrap();
        assert_eq!(family.name(), "load");
        assert_eq!(rest, " 0.5");

        let (_, rest) = parse_identity_prefix("load 1").unwrap();
        assert_eq!(rest, " 1");

        assert!(parse_identity("load 1").is_err());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for s in [
            "",
            "9abc",
            "m{",
            "m{}",
            r#"m{a="1""#,
            r#"m{a="1"x"#,
            r#"m{a=1}"#,
            r#"m{a="1",}"#,
            r#"m{a="1"}x"#,
            "m{a=\"x\ny\"}",
            r#"m{b="1",a="2"}"#,
            r#"m{a="1",a="2"}"#,
            r#"m{a=""}"#,
            r#"m{1a="x"}"#,
            r#"m{__name__="x"}"#,
            r#"m{a="\"#,
            r#"m{a="\x"}"#,
            r#"m{a="\0"}"#,
            "m-x",
            r#"m{a="1"{b="2"}"#,
        ] {
            assert!(
                matches!(parse_identity(s), Err(KestrelError::Invalid(_))),
                "accepted {s:?}"
            );
        }
    }
}
