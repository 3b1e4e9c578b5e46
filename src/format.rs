//! Rendering of decoded Loki responses as raw lines, pretty JSON or verbose text.

use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::{DateTime, SecondsFormat};
use serde_json::Value;

use crate::error::{LokiError, Result};
use crate::model::{BackendEnvelope, OutputFormat, Payload, SeriesData};

/// What a response describes. Drives the count header and the empty message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subject<'a> {
    Logs,
    LabelNames,
    LabelValues(&'a str),
}

impl Subject<'_> {
    pub fn empty_message(&self) -> String {
        match self {
            Self::Logs => "No logs found matching the query".to_string(),
            Self::LabelNames => "No labels found".to_string(),
            Self::LabelValues(label) => format!("No values found for label '{label}'"),
        }
    }

    fn list_header(&self, count: usize) -> String {
        match self {
            // query_range 只返回 series；仅当后端把查询应答为纯列表时走到这里
            Self::Logs => format!("Found {count} entries:"),
            Self::LabelNames => format!("Found {count} labels:"),
            Self::LabelValues(label) => format!("Found {count} values for label '{label}':"),
        }
    }
}

pub fn render(envelope: &BackendEnvelope, subject: Subject<'_>, format: OutputFormat) -> Result<String> {
    if envelope.payload_len() == 0 {
        let message = subject.empty_message();
        return Ok(match format {
            OutputFormat::Json => serde_json::json!({ "message": message }).to_string(),
            OutputFormat::Raw | OutputFormat::Text => message,
        });
    }

    let Some(payload) = envelope.data.as_ref() else {
        return Ok(subject.empty_message());
    };
    match (payload, format) {
        (_, OutputFormat::Json) => serde_json::to_string_pretty(envelope)
            .map_err(|e| LokiError::EncodeError(e.to_string())),
        (Payload::Series(series), OutputFormat::Raw) => Ok(series_raw(series)),
        (Payload::Series(series), OutputFormat::Text) => Ok(series_text(series)),
        (Payload::List(items), OutputFormat::Raw) => Ok(list_raw(items)),
        (Payload::List(items), OutputFormat::Text) => Ok(list_text(items, subject)),
    }
}

fn series_raw(series: &SeriesData) -> String {
    let mut out = String::new();
    for entry in &series.result {
        let labels = entry
            .labels()
            .map(|l| format!("{{{}}} ", join_labels(l, ",")))
            .unwrap_or_default();
        for pair in entry.values.iter().filter(|p| p.len() >= 2) {
            let _ = writeln!(
                out,
                "{} {}{}",
                format_timestamp(&pair[0]),
                labels,
                value_text(&pair[1])
            );
        }
    }
    out
}

fn series_text(series: &SeriesData) -> String {
    let mut out = format!("Found {} streams:\n\n", series.result.len());
    for (i, entry) in series.result.iter().enumerate() {
        match entry.labels() {
            Some(l) => {
                let _ = writeln!(out, "Stream ({}) {}:", join_labels(l, ", "), i + 1);
            }
            None => {
                let _ = writeln!(out, "Stream {}:", i + 1);
            }
        }
        for pair in entry.values.iter().filter(|p| p.len() >= 2) {
            let _ = writeln!(
                out,
                "[{}] {}",
                format_timestamp(&pair[0]),
                value_text(&pair[1])
            );
        }
        out.push('\n');
    }
    out
}

fn list_raw(items: &[String]) -> String {
    let mut out = String::new();
    for item in items {
        out.push_str(item);
        out.push('\n');
    }
    out
}

fn list_text(items: &[String], subject: Subject<'_>) -> String {
    let mut out = subject.list_header(items.len());
    out.push_str("\n\n");
    for (i, item) in items.iter().enumerate() {
        let _ = writeln!(out, "{}. {}", i + 1, item);
    }
    out
}

fn join_labels(labels: &BTreeMap<String, String>, sep: &str) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(sep)
}

/// Render the first element of a value pair.
///
/// Anything that parses as a number is taken as nanoseconds since the Unix
/// epoch, whatever the result type; the rest is returned unchanged.
pub fn format_timestamp(raw: &Value) -> String {
    let text = value_text(raw);
    let trimmed = text.trim();
    let nanos = match trimmed.parse::<i64>() {
        Ok(n) => Some(n),
        Err(_) => trimmed
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            // `as` 在越界时饱和截断
            .map(|f| f as i64),
    };
    match nanos {
        Some(n) => DateTime::from_timestamp_nanos(n).to_rfc3339_opts(SecondsFormat::Secs, true),
        None => text,
    }
}

/// Strings verbatim, integral numbers without a fractional part.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(u) = n.as_u64() {
                u.to_string()
            } else {
                let f = n.as_f64().unwrap_or_default();
                if f.fract() == 0.0 && f.abs() < 1e15 {
                    (f as i64).to_string()
                } else {
                    f.to_string()
                }
            }
        }
        other => other.to_string(),
    }
}
