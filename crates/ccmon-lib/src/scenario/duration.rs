//! Go-style duration parsing and formatting
//!
//! Scenario files express offsets the way Go's `time.Duration` prints
//! them: `30s`, `1m30s`, `1.5h`, `250ms`. A bare number is seconds.

use crate::error::ScenarioError;
use serde::{Deserialize, Deserializer};
use std::fmt::Write;
use std::time::Duration;

/// Parse a duration such as `1h2m3.5s` or `250ms`
pub fn parse_duration(input: &str) -> Result<Duration, ScenarioError> {
    let invalid = || ScenarioError::InvalidDuration(input.to_string());
    let s = input.trim();
    if s.is_empty() {
        return Err(invalid());
    }

    if let Ok(secs) = s.parse::<f64>() {
        if !secs.is_finite() || secs < 0.0 {
            return Err(invalid());
        }
        return Duration::try_from_secs_f64(secs).map_err(|_| invalid());
    }

    let mut rest = s;
    let mut total_secs = 0.0f64;
    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_end == 0 {
            return Err(invalid());
        }
        let value: f64 = rest[..number_end].parse().map_err(|_| invalid())?;
        rest = &rest[number_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_end] {
            "ns" => 1e-9,
            "us" | "µs" | "μs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return Err(invalid()),
        };
        total_secs += value * scale;
        rest = &rest[unit_end..];
    }

    Duration::try_from_secs_f64(total_secs).map_err(|_| invalid())
}

/// Format a duration compactly, e.g. `1m30s` or `250ms`
pub fn format_duration(d: Duration) -> String {
    if d.is_zero() {
        return "0s".to_string();
    }
    if d < Duration::from_secs(1) {
        return format!("{}ms", d.as_millis());
    }

    let total = d.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    let mut out = String::new();
    if hours > 0 {
        let _ = write!(out, "{}h", hours);
    }
    if hours > 0 || minutes > 0 {
        let _ = write!(out, "{}m", minutes);
    }
    let millis = d.subsec_millis();
    if millis > 0 {
        let frac = format!("{:03}", millis);
        let _ = write!(out, "{}.{}s", seconds, frac.trim_end_matches('0'));
    } else {
        let _ = write!(out, "{}s", seconds);
    }
    out
}

/// Scalar accepted wherever the scenario expects a duration or quantity
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum Scalar {
    Text(String),
    Integer(i64),
    Float(f64),
}

impl Scalar {
    pub(crate) fn into_string(self) -> String {
        match self {
            Scalar::Text(s) => s,
            Scalar::Integer(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
        }
    }
}

pub(crate) fn deserialize_scalar<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Scalar>::deserialize(deserializer)?.map(Scalar::into_string))
}
