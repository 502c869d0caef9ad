//! Prometheus text exposition format.
//!
//! Renders registry snapshots into the Prometheus text exposition format
//! for scraping by a Prometheus server or compatible agent.

use std::fmt::Write;

use crate::measure::MeasureValue;
use crate::registry::ViewData;
use crate::view::{Aggregation, AggregationData};

/// Turn `namespace` + view name into a valid metric name.
///
/// Characters outside `[a-zA-Z0-9_:]` become `_`.
pub fn metric_name(namespace: &str, view_name: &str) -> String {
    let raw = if namespace.is_empty() {
        view_name.to_string()
    } else {
        format!("{namespace}_{view_name}")
    };
    let mut name: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == ':' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

fn escape_label_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}

/// Prometheus spells non-finite samples `+Inf`, `-Inf` and `NaN`.
fn format_float(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "+Inf" } else { "-Inf" }.to_string()
    } else {
        v.to_string()
    }
}

fn format_value(data: &AggregationData) -> String {
    match *data {
        AggregationData::LastValue(MeasureValue::Int(v)) => v.to_string(),
        AggregationData::LastValue(MeasureValue::Float(v)) => format_float(v),
        AggregationData::Count(n) => n.to_string(),
        AggregationData::Sum(s) => format_float(s),
    }
}

fn escape_help(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\n', "\\n")
}

/// Render view snapshots into Prometheus text format.
///
/// LastValue views are `gauge`s; Count and Sum views are `counter`s and
/// carry the `_total` suffix. Tag keys become labels in the view's tag
/// key order.
pub fn render_prometheus(namespace: &str, views: &[ViewData]) -> String {
    let mut out = String::new();

    for data in views {
        let mut name = metric_name(namespace, &data.view.name);
        let kind = match data.view.aggregation {
            Aggregation::LastValue => "gauge",
            Aggregation::Count | Aggregation::Sum => {
                if !name.ends_with("_total") {
                    name.push_str("_total");
                }
                "counter"
            }
        };

        // Help + type declarations.
        let _ = writeln!(out, "# HELP {name} {}", escape_help(&data.view.description));
        let _ = writeln!(out, "# TYPE {name} {kind}");

        for row in &data.rows {
            let labels: Vec<String> = row
                .tags
                .iter()
                .map(|(key, value)| {
                    format!(
                        "{}=\"{}\"",
                        metric_name("", key.name()),
                        escape_label_value(value)
                    )
                })
                .collect();
            let value = format_value(&row.data);
            if labels.is_empty() {
                let _ = writeln!(out, "{name} {value}");
            } else {
                let _ = writeln!(out, "{name}{{{}}} {value}", labels.join(","));
            }
        }
    }

    out
}
