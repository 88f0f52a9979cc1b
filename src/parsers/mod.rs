//! Parser strategies (§4.3): the default permissive IPv4 extractor, plus the
//! bespoke catalogue of per-vendor parsers named in feed descriptors.
//!
//! This is the "reflection-driven parser binding" redesign note of §9,
//! applied as a registry mapping string identifier to strategy value; an
//! unknown identifier is a startup configuration error, never a runtime one
//! (see [`catalogue`] and [`crate::registry::Registry`]).

pub mod catalogue;

use std::sync::OnceLock;

use regex::Regex;
use time::OffsetDateTime;

use crate::error::Result;

/// What a parser extracted from one raw file.
pub enum ParseOutcome {
    /// Bare IPs sharing one event timestamp (the parser's own `datetime`).
    BareIps {
        datetime: OffsetDateTime,
        ips: Vec<String>,
    },
    /// IPs each carrying their own timestamp (e.g. a CSV with a per-row
    /// column).
    TimedIps(Vec<(String, OffsetDateTime)>),
    /// The well-known "this feed is not generated for this family" sentinel
    /// was found; nothing to extract.
    Empty,
}

/// A strategy for turning one raw feed file into intake-record material.
pub trait Parser: Send + Sync {
    fn parse(&self, raw: &[u8]) -> Result<ParseOutcome>;
}

/// The permissive default: every dotted-quad literal, timestamped "today,
/// midnight UTC" (§9's open question on filename timezone is resolved as
/// UTC throughout this crate). Leading zeros are intentionally not
/// stripped, and invalid octets like `999.1.1.1` are intentionally not
/// rejected here — the sanitizer is where that validation belongs.
pub struct DefaultIpv4Parser;

impl Parser for DefaultIpv4Parser {
    fn parse(&self, raw: &[u8]) -> Result<ParseOutcome> {
        let ips = extract_ipv4(raw);
        Ok(ParseOutcome::BareIps {
            datetime: today_midnight_utc(),
            ips,
        })
    }
}

fn ipv4_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\d+(\.\d+){3}").expect("static regex is valid"))
}

pub(crate) fn extract_ipv4(raw: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(raw);
    ipv4_pattern()
        .find_iter(&text)
        .map(|m| m.as_str().to_string())
        .collect()
}

pub(crate) fn today_midnight_utc() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    now.replace_time(time::Time::MIDNIGHT)
}

/// Strip leading zeros from each dotted-quad octet (`"008.008.008.008"` ->
/// `"8.8.8.8"`), as dshield's feed requires.
pub(crate) fn strip_leading_zeros(ip: &str) -> String {
    ip.split('.')
        .map(|octet| octet.trim_start_matches('0'))
        .map(|octet| if octet.is_empty() { "0" } else { octet })
        .collect::<Vec<_>>()
        .join(".")
}

/// Look up a bespoke parser by its feed-descriptor identifier. Returns
/// `None` for an unrecognised identifier; callers must treat that as a
/// startup configuration error.
pub fn lookup(identifier: &str) -> Option<Box<dyn Parser>> {
    catalogue::lookup(identifier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_dotted_quads_without_validating_octets() {
        let ips = extract_ipv4(b"line one 1.2.3.4\nline two 999.1.1.1 noise");
        assert_eq!(ips, vec!["1.2.3.4", "999.1.1.1"]);
    }

    #[test]
    fn strips_leading_zeros_per_octet() {
        assert_eq!(strip_leading_zeros("008.008.008.008"), "8.8.8.8");
        assert_eq!(strip_leading_zeros("1.002.3.004"), "1.2.3.4");
        assert_eq!(strip_leading_zeros("0.0.0.0"), "0.0.0.0");
    }

    #[test]
    fn unknown_identifier_is_none() {
        assert!(lookup("totally-unknown-parser").is_none());
    }
}
