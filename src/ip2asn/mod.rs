//! The external IP-to-ASN history service (§6), modelled as a trait so a
//! deterministic fake can back the pipeline's tests.

pub mod fake;
pub mod http;

use async_trait::async_trait;
use std::net::IpAddr;
use time::Date;

use crate::error::Result;
use crate::model::AddressFamily;

/// One query for `mass_query`/`mass_cache`: an IP observed for a source on a
/// given day, with a lookback window for routing-table churn.
#[derive(Debug, Clone)]
pub struct RoutingQuery {
    pub ip: IpAddr,
    pub family: AddressFamily,
    pub date: Date,
    pub precision_delta_days: u32,
}

/// The resolved routing info for one `RoutingQuery`, or the reason it
/// couldn't be resolved.
#[derive(Debug, Clone)]
pub enum RoutingResponse {
    /// A non-sentinel `(asn, prefix)` pair.
    Resolved { asn: String, prefix: String },
    /// The service has no data for that date yet (§4.5 "Retry").
    Unknown,
    /// The service returned an error, or a sentinel `asn`/`prefix` (§4.5
    /// "Discarded").
    Error,
}

/// Cache readiness, per §6's `meta()` operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Readiness {
    pub v4_percent: f64,
    pub v6_percent: f64,
}

impl Readiness {
    /// §4.4/§4.5's gate: skip the tick if either family is under 90% cached.
    pub fn is_ready(&self) -> bool {
        self.v4_percent >= 90.0 && self.v6_percent >= 90.0
    }
}

/// The external IP-to-ASN history service's four operations.
#[async_trait]
pub trait Ip2AsnService: Send + Sync {
    async fn meta(&self) -> Result<Readiness>;

    /// Prime the service's routing-table cache for a batch of IPs.
    async fn mass_cache(&self, queries: &[RoutingQuery]) -> Result<()>;

    /// Resolve a batch of IPs to `(asn, prefix)`, one response per query, in
    /// the same order.
    async fn mass_query(&self, queries: &[RoutingQuery]) -> Result<Vec<RoutingResponse>>;

    /// The number of addresses BGP-announced for `asn`/`family` on `date`,
    /// if known.
    async fn asn_meta(&self, asn: &str, family: AddressFamily, date: Date) -> Result<Option<u64>>;
}
