//! Core data types flowing through the pipeline.
//!
//! See `store::keys` for how these are projected onto the Redis key space
//! of §3 of the specification; this module only holds the in-memory shapes.
//! [`IntakeRecord`] and [`SanitizedRecord`] are stored as Redis hashes with
//! one field per struct field (matching the original `hmset(uuid, {...})`
//! layout), so they round-trip through plain string maps rather than JSON.
//!
//! The enrichment outcome itself is represented directly by
//! [`crate::ip2asn::RoutingResponse`] rather than a separate type here.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::error::{Error, Result};

/// A feed descriptor, as loaded from `config/modules/*.json`.
///
/// Identity is `"{vendor}-{name}"` (see [`FeedDescriptor::source`]); two
/// descriptors sharing a source is a configuration error, caught by
/// [`crate::registry::Registry::load`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedDescriptor {
    pub vendor: String,
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_impact")]
    pub impact: u8,
    #[serde(default)]
    pub parser: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_impact() -> u8 {
    1
}

impl FeedDescriptor {
    /// The identity key used throughout the storage schema: `"{vendor}-{name}"`.
    pub fn source(&self) -> String {
        format!("{}-{}", self.vendor, self.name)
    }
}

/// The address family of a sanitized IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    pub fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }

    /// The numeral used in ranking keys (`v4`/`v6`).
    pub fn version(&self) -> u8 {
        match self {
            AddressFamily::V4 => 4,
            AddressFamily::V6 => 6,
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AddressFamily::V4 => "v4",
            AddressFamily::V6 => "v6",
        })
    }
}

impl FromStr for AddressFamily {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "v4" => Ok(AddressFamily::V4),
            "v6" => Ok(AddressFamily::V6),
            other => Err(Error::config(format!("unknown address family '{other}'"))),
        }
    }
}

/// A record produced by the parser, awaiting sanitization.
///
/// Stored under a fresh UUID in the `intake` queue; deleted by the
/// sanitizer once processed (successfully or not).
#[derive(Debug, Clone)]
pub struct IntakeRecord {
    pub ip: String,
    pub source: String,
    pub datetime: OffsetDateTime,
}

impl IntakeRecord {
    pub fn to_hash(&self) -> HashMap<String, String> {
        HashMap::from([
            ("ip".to_string(), self.ip.clone()),
            ("source".to_string(), self.source.clone()),
            (
                "datetime".to_string(),
                self.datetime
                    .format(&time::format_description::well_known::Rfc3339)
                    .unwrap_or_default(),
            ),
        ])
    }

    pub fn from_hash(map: &HashMap<String, String>) -> Result<Self> {
        let ip = map
            .get("ip")
            .ok_or_else(|| Error::transient("intake record missing 'ip'"))?
            .clone();
        let source = map
            .get("source")
            .ok_or_else(|| Error::transient("intake record missing 'source'"))?
            .clone();
        let datetime_raw = map
            .get("datetime")
            .ok_or_else(|| Error::transient("intake record missing 'datetime'"))?;
        let datetime = parse_flexible_datetime(datetime_raw)?;
        Ok(IntakeRecord {
            ip,
            source,
            datetime,
        })
    }
}

/// Parse a timestamp that may or may not carry an explicit UTC offset,
/// accepting both RFC 3339 and the bare `YYYY-MM-DDTHH:MM:SS` form emitted
/// by parsers that never learned their source's timezone.
pub fn parse_flexible_datetime(raw: &str) -> Result<OffsetDateTime> {
    if let Ok(dt) = OffsetDateTime::parse(raw, &time::format_description::well_known::Rfc3339) {
        return Ok(dt);
    }
    let format = time::format_description::well_known::Iso8601::DEFAULT;
    if let Ok(dt) = OffsetDateTime::parse(raw, &format) {
        return Ok(dt);
    }
    let primitive_format = time::macros::format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second]"
    );
    time::PrimitiveDateTime::parse(raw, primitive_format)
        .map(|naive| naive.assume_utc())
        .map_err(|err| Error::transient(format!("cannot parse datetime '{raw}': {err}")))
}

/// A record that has passed sanitization, awaiting enrichment.
///
/// Stored under the same UUID in the `to_insert` queue; deleted by the
/// enricher on success, or returned to the queue on a transient failure.
#[derive(Debug, Clone)]
pub struct SanitizedRecord {
    pub ip: IpAddr,
    pub source: String,
    pub family: AddressFamily,
    pub date: Date,
    pub datetime: OffsetDateTime,
}

impl SanitizedRecord {
    pub fn to_hash(&self) -> HashMap<String, String> {
        HashMap::from([
            ("ip".to_string(), self.ip.to_string()),
            ("source".to_string(), self.source.clone()),
            ("address_family".to_string(), self.family.to_string()),
            ("date".to_string(), self.date.to_string()),
            (
                "datetime".to_string(),
                self.datetime
                    .format(&time::format_description::well_known::Rfc3339)
                    .unwrap_or_default(),
            ),
        ])
    }

    pub fn from_hash(map: &HashMap<String, String>) -> Result<Self> {
        let ip: IpAddr = map
            .get("ip")
            .ok_or_else(|| Error::transient("sanitized record missing 'ip'"))?
            .parse()
            .map_err(|e| Error::transient(format!("invalid ip in sanitized record: {e}")))?;
        let source = map
            .get("source")
            .ok_or_else(|| Error::transient("sanitized record missing 'source'"))?
            .clone();
        let family: AddressFamily = map
            .get("address_family")
            .ok_or_else(|| Error::transient("sanitized record missing 'address_family'"))?
            .parse()?;
        let date_raw = map
            .get("date")
            .ok_or_else(|| Error::transient("sanitized record missing 'date'"))?;
        let date = parse_date(date_raw)?;
        let datetime_raw = map
            .get("datetime")
            .ok_or_else(|| Error::transient("sanitized record missing 'datetime'"))?;
        let datetime = parse_flexible_datetime(datetime_raw)?;
        Ok(SanitizedRecord {
            ip,
            source,
            family,
            date,
            datetime,
        })
    }
}

pub fn parse_date(raw: &str) -> Result<Date> {
    let format = time::macros::format_description!("[year]-[month]-[day]");
    Date::parse(raw, format).map_err(|err| Error::transient(format!("invalid date '{raw}': {err}")))
}

/// A UUID identifying a queued record, used as the shared key in both the
/// `intake` and `to_insert` sets and their companion hashes.
pub type RecordId = Uuid;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_is_vendor_dash_name() {
        let d = FeedDescriptor {
            vendor: "abuse".into(),
            name: "feodo".into(),
            url: None,
            impact: 1,
            parser: None,
            tags: vec![],
        };
        assert_eq!(d.source(), "abuse-feodo");
    }

    #[test]
    fn intake_record_roundtrips_through_hash() {
        let rec = IntakeRecord {
            ip: "1.2.3.4".into(),
            source: "abuse-feodo".into(),
            datetime: OffsetDateTime::parse(
                "2024-01-02T00:00:00Z",
                &time::format_description::well_known::Rfc3339,
            )
            .unwrap(),
        };
        let hash = rec.to_hash();
        let back = IntakeRecord::from_hash(&hash).unwrap();
        assert_eq!(back.ip, rec.ip);
        assert_eq!(back.source, rec.source);
        assert_eq!(back.datetime, rec.datetime);
    }

    #[test]
    fn flexible_datetime_accepts_naive_form() {
        let dt = parse_flexible_datetime("2024-01-02T00:00:00").unwrap();
        assert_eq!(dt.date().to_string(), "2024-01-02");
    }
}
