//! A deterministic in-memory [`Ip2AsnService`], for tests (§8).

use std::collections::HashMap;
use std::net::IpAddr;

use async_trait::async_trait;
use time::Date;
use tokio::sync::Mutex;

use super::{Ip2AsnService, Readiness, RoutingQuery, RoutingResponse};
use crate::error::Result;
use crate::model::AddressFamily;

#[derive(Debug, Clone)]
pub enum ScriptedRouting {
    Resolved { asn: String, prefix: String },
    Unknown,
    Error,
}

#[derive(Default)]
struct Inner {
    routing: HashMap<(IpAddr, Date), ScriptedRouting>,
    asn_counts: HashMap<(String, AddressFamily, Date), u64>,
    cached: Vec<IpAddr>,
    readiness: Readiness,
}

/// A fake IP-to-ASN service whose responses are scripted ahead of time,
/// standing in for a real deployment's CAIDA-backed history service.
pub struct FakeIp2AsnService {
    inner: Mutex<Inner>,
}

impl Default for FakeIp2AsnService {
    fn default() -> Self {
        FakeIp2AsnService {
            inner: Mutex::new(Inner {
                readiness: Readiness {
                    v4_percent: 100.0,
                    v6_percent: 100.0,
                },
                ..Inner::default()
            }),
        }
    }
}

impl FakeIp2AsnService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_readiness(&self, readiness: Readiness) {
        self.inner.lock().await.readiness = readiness;
    }

    pub async fn script_routing(&self, ip: IpAddr, date: Date, routing: ScriptedRouting) {
        self.inner.lock().await.routing.insert((ip, date), routing);
    }

    pub async fn script_asn_count(&self, asn: &str, family: AddressFamily, date: Date, count: u64) {
        self.inner
            .lock()
            .await
            .asn_counts
            .insert((asn.to_string(), family, date), count);
    }

    pub async fn cached_ips(&self) -> Vec<IpAddr> {
        self.inner.lock().await.cached.clone()
    }
}

#[async_trait]
impl Ip2AsnService for FakeIp2AsnService {
    async fn meta(&self) -> Result<Readiness> {
        Ok(self.inner.lock().await.readiness)
    }

    async fn mass_cache(&self, queries: &[RoutingQuery]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        for q in queries {
            inner.cached.push(q.ip);
        }
        Ok(())
    }

    async fn mass_query(&self, queries: &[RoutingQuery]) -> Result<Vec<RoutingResponse>> {
        let inner = self.inner.lock().await;
        Ok(queries
            .iter()
            .map(|q| match inner.routing.get(&(q.ip, q.date)) {
                Some(ScriptedRouting::Resolved { asn, prefix }) => RoutingResponse::Resolved {
                    asn: asn.clone(),
                    prefix: prefix.clone(),
                },
                Some(ScriptedRouting::Error) => RoutingResponse::Error,
                Some(ScriptedRouting::Unknown) | None => RoutingResponse::Unknown,
            })
            .collect())
    }

    async fn asn_meta(&self, asn: &str, family: AddressFamily, date: Date) -> Result<Option<u64>> {
        Ok(self
            .inner
            .lock()
            .await
            .asn_counts
            .get(&(asn.to_string(), family, date))
            .copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[tokio::test]
    async fn unscripted_routing_is_unknown() {
        let fake = FakeIp2AsnService::new();
        let responses = fake
            .mass_query(&[RoutingQuery {
                ip: "1.2.3.4".parse().unwrap(),
                family: AddressFamily::V4,
                date: date!(2024 - 01 - 02),
                precision_delta_days: 3,
            }])
            .await
            .unwrap();
        assert!(matches!(responses[0], RoutingResponse::Unknown));
    }

    #[tokio::test]
    async fn scripted_routing_resolves() {
        let fake = FakeIp2AsnService::new();
        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        let day = date!(2024 - 01 - 02);
        fake.script_routing(
            ip,
            day,
            ScriptedRouting::Resolved {
                asn: "64500".into(),
                prefix: "1.2.3.0/24".into(),
            },
        )
        .await;

        let responses = fake
            .mass_query(&[RoutingQuery {
                ip,
                family: AddressFamily::V4,
                date: day,
                precision_delta_days: 3,
            }])
            .await
            .unwrap();
        match &responses[0] {
            RoutingResponse::Resolved { asn, prefix } => {
                assert_eq!(asn, "64500");
                assert_eq!(prefix, "1.2.3.0/24");
            }
            other => panic!("expected Resolved, got {other:?}"),
        }
    }
}
