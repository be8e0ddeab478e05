//! Prometheus text exposition format rendering.

use std::collections::{BTreeMap, HashSet};
use std::fmt::Write;

use tracing::warn;

use crate::metrics::Metric;

/// Content type of the text exposition format.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Render gathered metrics, grouped by family and sorted by name.
///
/// Series repeated within one scrape (same name and label values) are
/// rendered once; the first value wins.
pub fn render(metrics: &[Metric], output: &mut String) {
    let mut by_name: BTreeMap<&str, Vec<&Metric>> = BTreeMap::new();
    for metric in metrics {
        by_name
            .entry(metric.desc().fq_name())
            .or_default()
            .push(metric);
    }

    for (name, series) in by_name {
        let desc = series[0].desc();

        writeln!(output, "# HELP {} {}", name, escape_help(desc.help())).ok();
        writeln!(output, "# TYPE {} {}", name, desc.kind().as_str()).ok();

        let mut seen: HashSet<&[String]> = HashSet::with_capacity(series.len());
        for metric in series {
            if !seen.insert(metric.label_values()) {
                warn!(metric = %name, "Duplicate series in scrape, dropping");
                continue;
            }

            writeln!(
                output,
                "{}{} {}",
                name,
                format_labels(metric),
                format_value(metric.value())
            )
            .ok();
        }
    }
}

/// Format labels for Prometheus exposition format.
fn format_labels(metric: &Metric) -> String {
    if metric.label_values().is_empty() {
        return String::new();
    }

    let parts: Vec<String> = metric
        .labels()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();

    format!("{{{}}}", parts.join(","))
}

/// Escape special characters in label values.
fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Escape special characters in HELP text.
fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

/// Format a floating point value for Prometheus.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}
