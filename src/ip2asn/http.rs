//! A `reqwest`-based client for the real IP-to-ASN history service.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::Date;

use super::{Ip2AsnService, Readiness, RoutingQuery, RoutingResponse};
use crate::error::{Error, Result};
use crate::model::AddressFamily;

pub struct Client {
    http: reqwest::Client,
    base_url: String,
}

impl Client {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("cannot build ip2asn http client: {e}")))?;
        Ok(Client {
            http,
            base_url: base_url.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[derive(Deserialize)]
struct MetaResponse {
    cached_dates: CachedDates,
}

#[derive(Deserialize)]
struct CachedDates {
    caida: Caida,
}

#[derive(Deserialize)]
struct Caida {
    v4: Percent,
    v6: Percent,
}

#[derive(Deserialize)]
struct Percent {
    percent: f64,
}

#[derive(Serialize)]
struct CacheQuery<'a> {
    ip: String,
    address_family: &'a str,
    source: &'a str,
    date: String,
    precision_delta: PrecisionDelta,
}

#[derive(Serialize)]
struct PrecisionDelta {
    days: u32,
}

#[derive(Deserialize)]
struct MassQueryResponse {
    responses: Vec<MassQueryEntry>,
}

#[derive(Deserialize)]
struct MassQueryEntry {
    response: HashMap<String, Value>,
}

#[derive(Deserialize)]
struct AsnMetaResponse {
    response: HashMap<String, HashMap<String, IpCount>>,
}

#[derive(Deserialize)]
struct IpCount {
    ipcount: u64,
}

fn to_cache_query(q: &RoutingQuery) -> CacheQuery<'_> {
    CacheQuery {
        ip: q.ip.to_string(),
        address_family: match q.family {
            AddressFamily::V4 => "v4",
            AddressFamily::V6 => "v6",
        },
        source: "caida",
        date: q.date.to_string(),
        precision_delta: PrecisionDelta {
            days: q.precision_delta_days,
        },
    }
}

#[async_trait]
impl Ip2AsnService for Client {
    async fn meta(&self) -> Result<Readiness> {
        let resp: MetaResponse = self.http.get(self.url("meta")).send().await?.json().await?;
        Ok(Readiness {
            v4_percent: resp.cached_dates.caida.v4.percent,
            v6_percent: resp.cached_dates.caida.v6.percent,
        })
    }

    async fn mass_cache(&self, queries: &[RoutingQuery]) -> Result<()> {
        if queries.is_empty() {
            return Ok(());
        }
        let body: Vec<_> = queries.iter().map(to_cache_query).collect();
        self.http
            .post(self.url("mass_cache"))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn mass_query(&self, queries: &[RoutingQuery]) -> Result<Vec<RoutingResponse>> {
        if queries.is_empty() {
            return Ok(Vec::new());
        }
        let body: Vec<_> = queries.iter().map(to_cache_query).collect();
        let resp: MassQueryResponse = self
            .http
            .post(self.url("mass_query"))
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        Ok(queries
            .iter()
            .zip(resp.responses)
            .map(|(query, entry)| parse_routing_response(query, &entry.response))
            .collect())
    }

    async fn asn_meta(&self, asn: &str, family: AddressFamily, date: Date) -> Result<Option<u64>> {
        let family = family.to_string();
        let date = date.to_string();
        let resp: AsnMetaResponse = self
            .http
            .get(self.url("asn_meta"))
            .query(&[
                ("asn", asn),
                ("source", "caida"),
                ("address_family", family.as_str()),
                ("date", date.as_str()),
            ])
            .send()
            .await?
            .json()
            .await?;
        Ok(resp
            .response
            .get(&date.to_string())
            .and_then(|by_asn| by_asn.get(asn))
            .map(|c| c.ipcount))
    }
}

fn parse_routing_response(query: &RoutingQuery, by_date: &HashMap<String, Value>) -> RoutingResponse {
    let Some(entry) = by_date.get(&query.date.to_string()) else {
        return RoutingResponse::Unknown;
    };
    if entry.get("error").is_some() {
        return RoutingResponse::Error;
    }
    let asn = entry.get("asn").and_then(Value::as_str);
    let prefix = entry.get("prefix").and_then(Value::as_str);
    match (asn, prefix) {
        (Some(asn), Some(prefix)) if is_real_routing(asn, prefix) => RoutingResponse::Resolved {
            asn: asn.to_string(),
            prefix: prefix.to_string(),
        },
        (None, None) => RoutingResponse::Unknown,
        _ => RoutingResponse::Error,
    }
}

/// §4.5 step 4: sentinels mean "no real routing info", not "unresolved".
fn is_real_routing(asn: &str, prefix: &str) -> bool {
    asn != "0" && prefix != "0.0.0.0/0" && prefix != "::/0"
}
