use crate::config::{Config, CutoffPolicy};
use crate::error::{EvalError, Result};
use crate::models::{EventType, Interaction};
use crate::services::ingestion::RawInteraction;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

pub fn validate_config(config: &Config) -> Result<()> {
    let invalid = |msg: String| Err(EvalError::InvalidConfig(msg));

    if config.evaluation.k == 0 {
        return invalid("evaluation.k must be greater than 0".to_string());
    }

    if config.evaluation.workers == 0 {
        return invalid("evaluation.workers must be greater than 0".to_string());
    }

    if config.evaluation.timeout_ms == 0 {
        return invalid("evaluation.timeout_ms must be greater than 0".to_string());
    }

    if let CutoffPolicy::Fractional { test_fraction } = config.split {
        if !(test_fraction > 0.0 && test_fraction < 1.0) {
            return invalid(format!(
                "split.test_fraction must be in (0, 1), got {}",
                test_fraction
            ));
        }
    }

    for event_type in EventType::ALL {
        let weight = config.event_weights.weight(event_type);
        if !weight.is_finite() || weight <= 0.0 {
            return invalid(format!(
                "event_weights.{} must be positive and finite, got {}",
                event_type.as_str(),
                weight
            ));
        }
    }

    Ok(())
}

/// Turns a raw record into an `Interaction`, or reports why it cannot be one.
pub fn validate_raw_interaction(line: usize, raw: RawInteraction) -> Result<Interaction> {
    let fail = |reason: String| EvalError::DataValidation { line, reason };

    let user_id = required(raw.user_id, "user_id").map_err(fail)?;
    let item_id = required(raw.item_id, "item_id").map_err(fail)?;
    let event_raw = required(raw.event_type, "event_type").map_err(fail)?;
    let timestamp_raw = required(raw.timestamp, "timestamp").map_err(fail)?;

    let event_type = EventType::parse(&event_raw)
        .ok_or_else(|| fail(format!("unknown event type '{}'", event_raw)))?;
    let timestamp = parse_timestamp(&timestamp_raw)
        .ok_or_else(|| fail(format!("unparseable timestamp '{}'", timestamp_raw)))?;

    Ok(Interaction {
        user_id,
        item_id,
        event_type,
        timestamp,
    })
}

fn required(value: Option<String>, field: &str) -> std::result::Result<String, String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(format!("missing {}", field)),
    }
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS[.f][+HH:MM]`, `YYYY-MM-DD`, or unix seconds.
/// Values without an offset are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z"] {
        if let Ok(ts) = DateTime::parse_from_str(raw, format) {
            return Some(ts.with_timezone(&Utc));
        }
    }

    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&ts));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|ts| Utc.from_utc_datetime(&ts));
    }

    raw.parse::<i64>()
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
}
