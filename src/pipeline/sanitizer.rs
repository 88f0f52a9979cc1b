//! The sanitizer (§4.4): validates IPs and timestamps, drops non-global
//! addresses, and primes the IP-to-ASN cache for the enricher.

use std::net::IpAddr;

use time::UtcOffset;
use tracing::warn;

use super::{is_ip2asn_ready, PipelineContext, DRAIN_BATCH_SIZE};
use crate::error::Result;
use crate::ip2asn::RoutingQuery;
use crate::model::{AddressFamily, IntakeRecord, SanitizedRecord};

/// §4.4/§4.5's shared lookback window for routing-table churn.
const PRECISION_DELTA_DAYS: u32 = 3;

pub async fn tick(ctx: &PipelineContext) -> Result<()> {
    if !is_ip2asn_ready(ctx.ip2asn.as_ref()).await? {
        warn!("ip2asn cache below readiness threshold, skipping sanitizer tick");
        return Ok(());
    }

    let ids = ctx.store.pop_intake(DRAIN_BATCH_SIZE).await?;
    if ids.is_empty() {
        return Ok(());
    }

    let mut sanitized = Vec::new();
    let mut queries = Vec::new();

    for id in &ids {
        let Some(record) = ctx.store.get_intake(*id).await? else {
            continue;
        };
        let Some(record) = sanitize(record) else {
            continue;
        };
        queries.push(RoutingQuery {
            ip: record.ip,
            family: record.family,
            date: record.date,
            precision_delta_days: PRECISION_DELTA_DAYS,
        });
        sanitized.push((*id, record));
    }

    if let Err(err) = ctx.ip2asn.mass_cache(&queries).await {
        warn!(%err, "mass_cache failed, requeuing batch");
        ctx.store.requeue_intake(&ids).await?;
        return Ok(());
    }

    for (id, record) in &sanitized {
        ctx.store.push_to_insert(*id, record).await?;
    }

    ctx.store.delete_intake(&ids).await?;
    Ok(())
}

/// Validate one intake record, discarding it (returning `None`) on any
/// failure per §4.4 step 2.
fn sanitize(record: IntakeRecord) -> Option<SanitizedRecord> {
    let ip: IpAddr = record.ip.parse().ok()?;
    if !is_global(&ip) {
        return None;
    }
    let family = AddressFamily::of(&ip);
    let datetime = record.datetime.to_offset(UtcOffset::UTC);

    Some(SanitizedRecord {
        ip,
        source: record.source,
        family,
        date: datetime.date(),
        datetime,
    })
}

/// Whether `ip` is a publicly routable unicast address: not private,
/// reserved, shared/CGNAT, loopback, link-local, multicast, unspecified, or
/// documentation/benchmarking space.
///
/// `std::net::Ipv4Addr`/`Ipv6Addr` have no stable `is_reserved`/`is_shared`/
/// `is_global` on this crate's pinned edition, so the ranges they'd cover
/// are checked explicitly here, the same way the IPv6 ULA/link-local checks
/// already are.
fn is_global(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            !(v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation()
                || is_reserved_v4(v4)
                || is_shared_v4(v4)
                || is_this_network_v4(v4))
        }
        IpAddr::V6(v6) => {
            !(v6.is_loopback()
                || v6.is_multicast()
                || v6.is_unspecified()
                || is_unique_local(v6)
                || is_unicast_link_local(v6)
                || is_documentation_v6(v6))
        }
    }
}

/// `240.0.0.0/4`, the "reserved for future use" block (includes the
/// `255.255.255.255/32` broadcast address, already covered separately).
fn is_reserved_v4(v4: &std::net::Ipv4Addr) -> bool {
    v4.octets()[0] & 0xf0 == 240
}

/// `100.64.0.0/10`, shared address space for carrier-grade NAT (RFC 6598).
fn is_shared_v4(v4: &std::net::Ipv4Addr) -> bool {
    let octets = v4.octets();
    octets[0] == 100 && (octets[1] & 0xc0) == 64
}

/// `0.0.0.0/8`, "this network" (RFC 791).
fn is_this_network_v4(v4: &std::net::Ipv4Addr) -> bool {
    v4.octets()[0] == 0
}

fn is_unique_local(v6: &std::net::Ipv6Addr) -> bool {
    (v6.segments()[0] & 0xfe00) == 0xfc00
}

fn is_unicast_link_local(v6: &std::net::Ipv6Addr) -> bool {
    (v6.segments()[0] & 0xffc0) == 0xfe80
}

/// `2001:db8::/32`, reserved for documentation (RFC 3849).
fn is_documentation_v6(v6: &std::net::Ipv6Addr) -> bool {
    v6.segments()[0] == 0x2001 && v6.segments()[1] == 0x0db8
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn record(ip: &str) -> IntakeRecord {
        IntakeRecord {
            ip: ip.to_string(),
            source: "abuse-feodo".to_string(),
            datetime: datetime!(2024-01-02 00:00:00 UTC),
        }
    }

    #[test]
    fn discards_unparseable_ip() {
        assert!(sanitize(record("not-an-ip")).is_none());
    }

    #[test]
    fn discards_private_ip() {
        assert!(sanitize(record("10.0.0.1")).is_none());
        assert!(sanitize(record("192.168.1.1")).is_none());
        assert!(sanitize(record("127.0.0.1")).is_none());
        assert!(sanitize(record("224.0.0.1")).is_none());
    }

    #[test]
    fn keeps_global_ipv4() {
        let sanitized = sanitize(record("8.8.8.8")).unwrap();
        assert_eq!(sanitized.family.version(), 4);
        assert_eq!(sanitized.date.to_string(), "2024-01-02");
    }

    #[test]
    fn discards_unique_local_ipv6() {
        assert!(sanitize(record("fc00::1")).is_none());
        assert!(sanitize(record("fe80::1")).is_none());
    }

    #[test]
    fn keeps_global_ipv6() {
        let sanitized = sanitize(record("2001:4860:4860::8888")).unwrap();
        assert_eq!(sanitized.family.version(), 6);
    }

    #[test]
    fn discards_reserved_ipv4() {
        assert!(sanitize(record("240.0.0.1")).is_none());
    }

    #[test]
    fn discards_shared_cgnat_ipv4() {
        assert!(sanitize(record("100.64.0.1")).is_none());
        assert!(sanitize(record("100.127.255.254")).is_none());
        assert!(sanitize(record("100.128.0.1")).is_some());
    }

    #[test]
    fn discards_this_network_ipv4() {
        assert!(sanitize(record("0.0.0.1")).is_none());
    }

    #[test]
    fn discards_documentation_ipv6() {
        assert!(sanitize(record("2001:db8::1")).is_none());
    }
}
