//! Builders for the Redis key schema of §3. Every key producer and reader
//! across processes must agree on these exact shapes, so they live in one
//! place rather than being assembled ad hoc at call sites.

use time::Date;

/// `intake` — the set of UUIDs awaiting sanitization.
pub fn intake_set() -> String {
    "intake".to_string()
}

/// `to_insert` — the set of UUIDs awaiting enrichment.
pub fn to_insert_set() -> String {
    "to_insert".to_string()
}

/// `running` — hash mapping component name to active-instance count.
pub fn running_hash() -> String {
    "running".to_string()
}

/// `shutdown` — sentinel key whose mere existence requests a stop.
pub fn shutdown_sentinel() -> String {
    "shutdown".to_string()
}

/// Per-record hash holding `{ip, source, datetime}` for an intake UUID.
pub fn intake_hash(id: &str) -> String {
    format!("intake:{id}")
}

/// Per-record hash holding `{ip, source, address_family, date, datetime}`
/// for a to_insert UUID.
pub fn to_insert_hash(id: &str) -> String {
    format!("to_insert:{id}")
}

fn day(d: Date) -> String {
    d.to_string()
}

/// `D|sources` — set of sources with at least one fact on day `D`.
pub fn sources(d: Date) -> String {
    format!("{}|sources", day(d))
}

/// `D|S` — set of ASNs seen for source `S` on day `D`.
pub fn source_asns(d: Date, source: &str) -> String {
    format!("{}|{source}", day(d))
}

/// `D|S|A` — set of prefixes seen for ASN `A` of source `S` on day `D`.
pub fn source_asn_prefixes(d: Date, source: &str, asn: &str) -> String {
    format!("{}|{source}|{asn}", day(d))
}

/// `D|S|A|P` — set of `"{ip}|{timestamp}"` events for one (source, asn, prefix).
pub fn source_asn_prefix_events(d: Date, source: &str, asn: &str, prefix: &str) -> String {
    format!("{}|{source}|{asn}|{prefix}", day(d))
}

/// `{A}|descriptions` — hash mapping ISO-8601 import timestamp to ASN name.
pub fn asn_descriptions(asn: &str) -> String {
    format!("{asn}|descriptions")
}

/// `D|S|A|v` — scalar rank of `A` for source `S` on day `D`, family `v`.
pub fn source_asn_rank(d: Date, source: &str, asn: &str, version: u8) -> String {
    format!("{}|{source}|{asn}|v{version}", day(d))
}

/// `D|S|asns|v` — sorted set `{A -> rank}` for source `S`.
pub fn source_asns_ranking(d: Date, source: &str, version: u8) -> String {
    format!("{}|{source}|asns|v{version}", day(d))
}

/// `D|asns|v` — sorted set `{A -> sum over S of rank}`.
pub fn asns_ranking(d: Date, version: u8) -> String {
    format!("{}|asns|v{version}", day(d))
}

/// `D|S|A|v|prefixes` — sorted set `{P -> per-prefix rank}`.
pub fn source_asn_prefixes_ranking(d: Date, source: &str, asn: &str, version: u8) -> String {
    format!("{}|{source}|{asn}|v{version}|prefixes", day(d))
}

/// `D|A|v` — sorted set `{P -> sum_S(per-prefix rank * impact_S)}`.
pub fn asn_prefixes_ranking(d: Date, asn: &str, version: u8) -> String {
    format!("{}|{asn}|v{version}", day(d))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn fact_keys_match_schema() {
        let d = date!(2024 - 01 - 02);
        assert_eq!(sources(d), "2024-01-02|sources");
        assert_eq!(source_asns(d, "abuse-feodo"), "2024-01-02|abuse-feodo");
        assert_eq!(
            source_asn_prefixes(d, "abuse-feodo", "64500"),
            "2024-01-02|abuse-feodo|64500"
        );
        assert_eq!(
            source_asn_prefix_events(d, "abuse-feodo", "64500", "1.2.3.0/24"),
            "2024-01-02|abuse-feodo|64500|1.2.3.0/24"
        );
    }

    #[test]
    fn ranking_keys_match_schema() {
        let d = date!(2024 - 01 - 02);
        assert_eq!(
            source_asn_rank(d, "abuse-feodo", "64500", 4),
            "2024-01-02|abuse-feodo|64500|v4"
        );
        assert_eq!(asns_ranking(d, 4), "2024-01-02|asns|v4");
        assert_eq!(asn_prefixes_ranking(d, "64500", 4), "2024-01-02|64500|v4");
    }

    #[test]
    fn asn_descriptions_key() {
        assert_eq!(asn_descriptions("64500"), "64500|descriptions");
    }
}
