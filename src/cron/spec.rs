//! `CronSpec`: parses cron expressions and yields next-fire instants.
//!
//! Wraps the `cron` crate, which speaks 6-field `sec min hour dom month
//! dow` syntax. `with_seconds` controls whether the caller's expression is
//! expected to already carry that leading seconds field (`true`) or the
//! conventional 5-field `min hour dom month dow` form, which gets a `0 `
//! seconds field prepended before parsing (`false`). Symbolic descriptors
//! (`@hourly`, `@daily`, ...) are expanded before field-count validation.

use crate::error::CronError;
use chrono::{DateTime, TimeZone};
use std::collections::HashMap;
use std::str::FromStr as _;

/// A parsed, ready-to-evaluate cron schedule.
#[derive(Debug, Clone)]
pub struct Schedule(cron::Schedule);

impl Schedule {
    /// The first instant strictly after `from` that satisfies the
    /// expression. Returns `None` only for schedules the underlying `cron`
    /// crate considers unsatisfiable (e.g. Feb 30th), which does not occur
    /// for any expression this crate accepts.
    pub fn next<Tz>(&self, from: DateTime<Tz>) -> Option<DateTime<Tz>>
    where
        Tz: TimeZone,
        Tz::Offset: Copy,
    {
        self.0.after(&from).next()
    }
}

/// Parses cron expressions under a fixed `with_seconds` configuration.
#[derive(Debug, Clone, Copy)]
pub struct CronSpec {
    with_seconds: bool,
}

impl CronSpec {
    pub fn new(with_seconds: bool) -> Self {
        Self { with_seconds }
    }

    /// Parse a cron expression, failing with [`CronError::InvalidExpression`]
    /// on field-count mismatch, out-of-range values, or an unrecognized
    /// descriptor.
    pub fn parse(&self, expr: &str) -> Result<Schedule, CronError> {
        let normalized = self.normalize(expr)?;
        cron::Schedule::from_str(&normalized)
            .map(Schedule)
            .map_err(|error| CronError::InvalidExpression {
                expr: expr.to_string(),
                reason: error.to_string(),
            })
    }

    fn normalize(&self, expr: &str) -> Result<String, CronError> {
        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Err(CronError::InvalidExpression {
                expr: expr.to_string(),
                reason: "empty expression".to_string(),
            });
        }

        let base = expand_descriptor(trimmed).unwrap_or(trimmed).to_string();
        let field_count = base.split_whitespace().count();
        let expected = if self.with_seconds { 6 } else { 5 };

        if field_count != expected {
            return Err(CronError::InvalidExpression {
                expr: expr.to_string(),
                reason: format!(
                    "expected {expected} fields (with_seconds={}), got {field_count} in '{base}'",
                    self.with_seconds
                ),
            });
        }

        if self.with_seconds {
            Ok(base)
        } else {
            Ok(format!("0 {base}"))
        }
    }
}

fn expand_descriptor(expr: &str) -> Option<&'static str> {
    match expr {
        "@yearly" | "@annually" => Some("0 0 1 1 *"),
        "@monthly" => Some("0 0 1 * *"),
        "@weekly" => Some("0 0 * * 0"),
        "@daily" | "@midnight" => Some("0 0 * * *"),
        "@hourly" => Some("0 * * * *"),
        _ => None,
    }
}

/// Per-scheduler-instance cache of parsed schedules, keyed by the raw
/// expression string. Deliberately a constructor-supplied dependency
/// rather than process-wide `static` state, so distinct scheduler
/// instances (e.g. in tests) never share a cache.
pub struct CronSpecCache {
    spec: CronSpec,
    entries: parking_lot::RwLock<HashMap<String, Schedule>>,
}

impl CronSpecCache {
    pub fn new(spec: CronSpec) -> Self {
        Self {
            spec,
            entries: parking_lot::RwLock::new(HashMap::new()),
        }
    }

    /// Look up a cached parse, or parse-and-cache on miss.
    pub fn get_or_parse(&self, expr: &str) -> Result<Schedule, CronError> {
        if let Some(schedule) = self.entries.read().get(expr) {
            return Ok(schedule.clone());
        }

        let schedule = self.spec.parse(expr)?;
        self.entries
            .write()
            .insert(expr.to_string(), schedule.clone());
        Ok(schedule)
    }

    /// Validate an expression without installing it in the cache's
    /// long-lived entry set beyond the normal insert-on-parse path.
    pub fn validate(&self, expr: &str) -> Result<(), CronError> {
        self.get_or_parse(expr).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn next_is_strictly_after_and_minimal() {
        let spec = CronSpec::new(false);
        let schedule = spec.parse("*/5 * * * *").expect("valid expression");
        let now = Utc::now();
        let next = schedule.next(now).expect("has a next fire");
        assert!(next > now);
        // No minute strictly between `now` and `next` satisfies a */5 schedule.
        let mut probe = now + chrono::Duration::minutes(1);
        while probe < next {
            assert_ne!(probe.minute() % 5, 0, "found an earlier satisfying minute");
            probe += chrono::Duration::minutes(1);
        }
    }

    use chrono::Timelike as _;

    #[test]
    fn rejects_field_count_mismatch() {
        let spec = CronSpec::new(false);
        assert!(spec.parse("* * * *").is_err());
        assert!(spec.parse("* * * * * *").is_err());
    }

    #[test]
    fn with_seconds_requires_leading_field() {
        let spec = CronSpec::new(true);
        assert!(spec.parse("* * * * *").is_err());
        assert!(spec.parse("*/5 * * * * *").is_ok());
    }

    #[test]
    fn rejects_out_of_range_value() {
        let spec = CronSpec::new(false);
        assert!(spec.parse("99 * * * *").is_err());
    }

    #[test]
    fn rejects_unrecognized_descriptor() {
        let spec = CronSpec::new(false);
        assert!(spec.parse("@fortnightly").is_err());
    }

    #[test]
    fn expands_known_descriptors() {
        let spec = CronSpec::new(false);
        assert!(spec.parse("@hourly").is_ok());
        assert!(spec.parse("@daily").is_ok());
        assert!(spec.parse("@weekly").is_ok());
        assert!(spec.parse("@monthly").is_ok());
        assert!(spec.parse("@yearly").is_ok());
    }

    #[test]
    fn cache_returns_same_result_on_repeat_lookup() {
        let cache = CronSpecCache::new(CronSpec::new(false));
        let a = cache.get_or_parse("*/10 * * * *").unwrap();
        let b = cache.get_or_parse("*/10 * * * *").unwrap();
        let now = Utc::now();
        assert_eq!(a.next(now), b.next(now));
    }
}
