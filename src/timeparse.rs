use std::sync::OnceLock;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;

use crate::error::{LokiError, Result};

/// Zone-less layouts tried after RFC 3339, in order. Interpreted as UTC.
const NAIVE_DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];
const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn parse_time(input: &str) -> Result<DateTime<Utc>> {
    parse_time_at(input, Utc::now())
}

/// 解析时间表达式："now"、相对时间（如 -1h、-30m）、RFC3339 或常见的无时区格式。
pub fn parse_time_at(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    if input == "now" {
        return Ok(now);
    }

    if input.starts_with('-') {
        // 相对时间解析失败时继续尝试绝对格式
        if let Some(offset) = parse_duration(input) {
            if let Some(t) = now.checked_add_signed(offset) {
                return Ok(t);
            }
        }
    }

    if let Ok(t) = DateTime::parse_from_rfc3339(input) {
        return Ok(t.with_timezone(&Utc));
    }

    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(t) = NaiveDateTime::parse_from_str(input, format) {
            return Ok(t.and_utc());
        }
    }

    if let Ok(d) = NaiveDate::parse_from_str(input, DATE_FORMAT) {
        if let Some(t) = d.and_hms_opt(0, 0, 0) {
            return Ok(t.and_utc());
        }
    }

    Err(LokiError::InvalidTimeFormat {
        input: input.to_string(),
    })
}

fn duration_component_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d+(?:\.\d*)?|\.\d+)(ns|us|µs|μs|ms|s|m|h)").expect("static regex")
    })
}

/// Signed duration such as `-1h`, `-1h30m`, `+90s` or `-1.5h`.
/// Returns `None` unless the whole string is consumed.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let (negative, body) = match input.as_bytes().first()? {
        b'-' => (true, &input[1..]),
        b'+' => (false, &input[1..]),
        _ => (false, input),
    };
    if body.is_empty() {
        return None;
    }
    if body == "0" {
        return Some(Duration::zero());
    }

    let re = duration_component_re();
    let mut consumed = 0usize;
    let mut total_nanos: f64 = 0.0;
    for caps in re.captures_iter(body) {
        let whole = caps.get(0)?;
        if whole.start() != consumed {
            return None;
        }
        consumed = whole.end();
        let amount: f64 = caps[1].parse().ok()?;
        let unit_nanos = match &caps[2] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60.0 * 1e9,
            "h" => 3600.0 * 1e9,
            _ => return None,
        };
        total_nanos += amount * unit_nanos;
    }
    if consumed != body.len() || total_nanos > i64::MAX as f64 {
        return None;
    }

    let nanos = total_nanos as i64;
    Some(Duration::nanoseconds(if negative { -nanos } else { nanos }))
}
