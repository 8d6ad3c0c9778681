//! Injectable time source and SAML instant handling
//!
//! Temporal checks never read the system clock directly; they consult the
//! [`Clock`] carried by the orchestrator so tests can pin time.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

use crate::error::{ErrorKind, SamlError, SamlResult};

/// A UTC wall-clock source
pub trait Clock: std::fmt::Debug + Send + Sync {
    /// Current instant
    fn now(&self) -> DateTime<Utc>;
}

/// System UTC clock (the default)
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock pinned to one instant, for tests and replay analysis
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Parse a SAML date-time (`xs:dateTime` in UTC, fractional seconds
/// tolerated)
pub fn parse_instant(value: &str) -> SamlResult<DateTime<Utc>> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
        return Ok(instant.with_timezone(&Utc));
    }
    // some IdPs emit a bare UTC instant without an offset designator
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    Err(SamlError::new(
        ErrorKind::SchemaViolation,
        format!("unparseable instant: {}", value),
    ))
}

/// Format an instant the way SAML messages carry it
pub fn format_instant(instant: DateTime<Utc>) -> String {
    instant.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
