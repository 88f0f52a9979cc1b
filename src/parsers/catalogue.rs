//! The bespoke per-vendor parsers named by feed descriptors, ported from
//! `bgpranking/parsers/*.py`.

use std::collections::HashMap;

use serde::Deserialize;
use time::OffsetDateTime;

use super::{extract_ipv4, strip_leading_zeros, today_midnight_utc, ParseOutcome, Parser};
use crate::error::{Error, Result};
use crate::model::parse_flexible_datetime;

/// `bambenekconsulting`: an explicit "not generated for this family"
/// sentinel means no IPs; otherwise a `## Feed generated at: <ts>` header
/// sets the shared datetime before the default IPv4 extraction runs.
pub struct Bambenekconsulting;

impl Parser for Bambenekconsulting {
    fn parse(&self, raw: &[u8]) -> Result<ParseOutcome> {
        let text = String::from_utf8_lossy(raw);
        if text.contains("This feed is not generated for this family") {
            return Ok(ParseOutcome::Empty);
        }

        let datetime = find_header_timestamp(&text, "## Feed generated at: ")
            .unwrap_or_else(today_midnight_utc);
        Ok(ParseOutcome::BareIps {
            datetime,
            ips: extract_ipv4(raw),
        })
    }
}

/// `dshield`: a `# updated <ts>` header, then the default IPv4 extraction
/// with each octet's leading zeros stripped.
pub struct Dshield;

impl Parser for Dshield {
    fn parse(&self, raw: &[u8]) -> Result<ParseOutcome> {
        let text = String::from_utf8_lossy(raw);
        let datetime =
            find_header_timestamp(&text, "# updated ").unwrap_or_else(today_midnight_utc);
        let ips = extract_ipv4(raw).into_iter().map(|ip| strip_leading_zeros(&ip)).collect();
        Ok(ParseOutcome::BareIps { datetime, ips })
    }
}

/// `nothink`: a `# Generated <ts>` header, then the default IPv4 extraction.
pub struct Nothink;

impl Parser for Nothink {
    fn parse(&self, raw: &[u8]) -> Result<ParseOutcome> {
        let text = String::from_utf8_lossy(raw);
        let datetime =
            find_header_timestamp(&text, "# Generated ").unwrap_or_else(today_midnight_utc);
        Ok(ParseOutcome::BareIps {
            datetime,
            ips: extract_ipv4(raw),
        })
    }
}

/// `shadowserver`: CSV with a `timestamp`/`ip` or `src_ip` column; one
/// `(ip, timestamp)` pair per row, defaulting to today-midnight when the
/// `timestamp` column is absent.
pub struct Shadowserver;

impl Parser for Shadowserver {
    fn parse(&self, raw: &[u8]) -> Result<ParseOutcome> {
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(raw);
        let headers = reader.headers().map_err(|e| Error::transient(e.to_string()))?.clone();
        let default_ts = today_midnight_utc();

        let mut out = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| Error::transient(e.to_string()))?;
            let row: HashMap<&str, &str> = headers.iter().zip(record.iter()).collect();

            let ip = row
                .get("ip")
                .or_else(|| row.get("src_ip"))
                .ok_or_else(|| Error::transient("shadowserver row has neither 'ip' nor 'src_ip'"))?;

            let ts = match row.get("timestamp") {
                Some(raw_ts) => parse_flexible_datetime(raw_ts).unwrap_or(default_ts),
                None => default_ts,
            };

            out.push((ip.to_string(), ts));
        }

        Ok(ParseOutcome::TimedIps(out))
    }
}

/// `abusech_threatfox`: a JSON object whose values are arrays of objects
/// carrying an `ioc_value` of the form `ip:port`; only the IP half is kept.
pub struct AbusechThreatfox;

#[derive(Deserialize)]
struct ThreatfoxEntry {
    ioc_value: String,
}

impl Parser for AbusechThreatfox {
    fn parse(&self, raw: &[u8]) -> Result<ParseOutcome> {
        let doc: HashMap<String, Vec<ThreatfoxEntry>> =
            serde_json::from_slice(raw).map_err(|e| Error::transient(e.to_string()))?;

        let ips = doc
            .into_values()
            .filter_map(|entries| entries.into_iter().next())
            .map(|entry| {
                entry
                    .ioc_value
                    .split(':')
                    .next()
                    .unwrap_or(&entry.ioc_value)
                    .to_string()
            })
            .collect();

        Ok(ParseOutcome::BareIps {
            datetime: today_midnight_utc(),
            ips,
        })
    }
}

fn find_header_timestamp(text: &str, prefix: &str) -> Option<OffsetDateTime> {
    let line = text.lines().find(|line| line.starts_with(prefix))?;
    let raw = line.strip_prefix(prefix)?.trim();
    parse_flexible_datetime(raw).ok()
}

pub fn lookup(identifier: &str) -> Option<Box<dyn Parser>> {
    match identifier {
        "bambenekconsulting" => Some(Box::new(Bambenekconsulting)),
        "dshield" => Some(Box::new(Dshield)),
        "nothink" => Some(Box::new(Nothink)),
        "shadowserver" => Some(Box::new(Shadowserver)),
        "abusech_threatfox" => Some(Box::new(AbusechThreatfox)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bambenekconsulting_sentinel_yields_empty() {
        let raw = b"This feed is not generated for this family\n";
        let outcome = Bambenekconsulting.parse(raw).unwrap();
        assert!(matches!(outcome, ParseOutcome::Empty));
    }

    #[test]
    fn bambenekconsulting_reads_header_and_ips() {
        let raw = b"## Feed generated at: 2024-01-02T00:00:00Z\n1.2.3.4\n5.6.7.8\n";
        match Bambenekconsulting.parse(raw).unwrap() {
            ParseOutcome::BareIps { ips, .. } => {
                assert_eq!(ips, vec!["1.2.3.4", "5.6.7.8"]);
            }
            _ => panic!("expected BareIps"),
        }
    }

    #[test]
    fn dshield_strips_leading_zeros() {
        let raw = b"# updated 2024-01-02T00:00:00Z\n008.008.008.008\n";
        match Dshield.parse(raw).unwrap() {
            ParseOutcome::BareIps { ips, .. } => assert_eq!(ips, vec!["8.8.8.8"]),
            _ => panic!("expected BareIps"),
        }
    }

    #[test]
    fn shadowserver_prefers_ip_over_src_ip() {
        let raw = b"timestamp,ip\n2024-01-02T00:00:00Z,1.2.3.4\n";
        match Shadowserver.parse(raw).unwrap() {
            ParseOutcome::TimedIps(rows) => {
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0].0, "1.2.3.4");
            }
            _ => panic!("expected TimedIps"),
        }
    }

    #[test]
    fn shadowserver_falls_back_to_src_ip() {
        let raw = b"src_ip\n1.2.3.4\n";
        match Shadowserver.parse(raw).unwrap() {
            ParseOutcome::TimedIps(rows) => {
                assert_eq!(rows[0].0, "1.2.3.4");
            }
            _ => panic!("expected TimedIps"),
        }
    }

    #[test]
    fn threatfox_keeps_only_ip_half() {
        let raw = br#"{"abc":[{"ioc_value":"1.2.3.4:8080"}]}"#;
        match AbusechThreatfox.parse(raw).unwrap() {
            ParseOutcome::BareIps { ips, .. } => assert_eq!(ips, vec!["1.2.3.4"]),
            _ => panic!("expected BareIps"),
        }
    }

    #[test]
    fn unknown_identifier_returns_none() {
        assert!(lookup("nope").is_none());
    }
}
