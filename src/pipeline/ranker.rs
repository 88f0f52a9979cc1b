//! The ranker (§4.6): daily aggregation of facts into the ranking key
//! family. Each tick recomputes "today" from scratch, and — before noon —
//! also recomputes "yesterday" to catch late-arriving events from feeds
//! that publish once a day.

use std::collections::HashMap;
use std::str::FromStr;

use ipnet::IpNet;
use time::{Duration, OffsetDateTime};
use tracing::{error, warn};

use super::{is_ip2asn_ready, PipelineContext};
use crate::error::Result;
use crate::model::AddressFamily;
use crate::store::RankingBatch;

pub async fn tick(ctx: &PipelineContext) -> Result<()> {
    if !is_ip2asn_ready(ctx.ip2asn.as_ref()).await? {
        warn!("ip2asn cache below readiness threshold, skipping ranker tick");
        return Ok(());
    }

    let now = OffsetDateTime::now_utc();
    rank_a_day(ctx, now.date()).await?;

    if now.hour() < 12 {
        let yesterday = (now - Duration::days(1)).date();
        rank_a_day(ctx, yesterday).await?;
    }
    Ok(())
}

/// The per-day accumulator of a single ASN's contribution, summed over
/// every source that reported it.
#[derive(Default)]
struct AsnAccumulator {
    rank_v4: f64,
    rank_v6: f64,
    prefixes_v4: HashMap<String, f64>,
    prefixes_v6: HashMap<String, f64>,
}

pub async fn rank_a_day(ctx: &PipelineContext, day: time::Date) -> Result<()> {
    let sources = ctx.store.sources_for_day(day).await?;
    if sources.is_empty() {
        return Ok(());
    }

    let mut asns_seen: Vec<String> = Vec::new();
    let mut batch = RankingBatch::default();
    let mut asn_totals: HashMap<String, AsnAccumulator> = HashMap::new();

    for source in &sources {
        let impact = ctx.registry.read().await.impact_of(source);
        let asns = ctx.store.asns_for_source(day, source).await?;

        let mut source_asn_scores_v4 = Vec::new();
        let mut source_asn_scores_v6 = Vec::new();

        for asn in asns {
            if asn == "0" {
                continue;
            }
            if !asns_seen.contains(&asn) {
                asns_seen.push(asn.clone());
            }

            let prefixes = ctx.store.prefixes_for_asn(day, source, &asn).await?;
            let mut prefix_ranks_v4 = Vec::new();
            let mut prefix_ranks_v6 = Vec::new();
            let mut asn_rank_v4 = 0.0_f64;
            let mut asn_rank_v6 = 0.0_f64;

            for prefix in prefixes {
                if prefix == "None" {
                    error!(%source, %asn, "prefix is the literal 'None', skipping (upstream data corruption)");
                    continue;
                }

                let events = ctx.store.events_for_prefix(day, source, &asn, &prefix).await?;
                let distinct_ips: std::collections::HashSet<&str> = events
                    .iter()
                    .map(|e| e.split('|').next().unwrap_or(e.as_str()))
                    .collect();
                let unique_count = distinct_ips.len() as f64;

                let Some(num_addresses) = num_addresses(&prefix) else {
                    warn!(%source, %asn, %prefix, "cannot parse prefix, skipping");
                    continue;
                };
                let prefix_rank = unique_count / num_addresses;
                let family = prefix_family(&prefix);

                match family {
                    AddressFamily::V4 => {
                        prefix_ranks_v4.push((prefix.clone(), prefix_rank));
                        asn_rank_v4 += unique_count * impact as f64;
                        *asn_totals
                            .entry(asn.clone())
                            .or_default()
                            .prefixes_v4
                            .entry(prefix.clone())
                            .or_insert(0.0) += prefix_rank * impact as f64;
                    }
                    AddressFamily::V6 => {
                        prefix_ranks_v6.push((prefix.clone(), prefix_rank));
                        asn_rank_v6 += unique_count * impact as f64;
                        *asn_totals
                            .entry(asn.clone())
                            .or_default()
                            .prefixes_v6
                            .entry(prefix.clone())
                            .or_insert(0.0) += prefix_rank * impact as f64;
                    }
                }
            }

            if !prefix_ranks_v4.is_empty() {
                batch
                    .source_asn_prefixes
                    .push((source.clone(), asn.clone(), 4, prefix_ranks_v4));
            }
            if !prefix_ranks_v6.is_empty() {
                batch
                    .source_asn_prefixes
                    .push((source.clone(), asn.clone(), 6, prefix_ranks_v6));
            }

            let announced_v4 = ctx
                .ip2asn
                .asn_meta(&asn, AddressFamily::V4, day)
                .await?;
            let announced_v6 = ctx
                .ip2asn
                .asn_meta(&asn, AddressFamily::V6, day)
                .await?;

            if let Some(count) = announced_v4.filter(|c| *c > 0) {
                let scalar = asn_rank_v4 / count as f64;
                if scalar > 0.0 {
                    batch
                        .source_asn_scalars
                        .push((source.clone(), asn.clone(), 4, scalar));
                    source_asn_scores_v4.push((asn.clone(), scalar));
                    asn_totals.entry(asn.clone()).or_default().rank_v4 += scalar;
                }
            }
            if let Some(count) = announced_v6.filter(|c| *c > 0) {
                let scalar = asn_rank_v6 / count as f64;
                if scalar > 0.0 {
                    batch
                        .source_asn_scalars
                        .push((source.clone(), asn.clone(), 6, scalar));
                    source_asn_scores_v6.push((asn.clone(), scalar));
                    asn_totals.entry(asn.clone()).or_default().rank_v6 += scalar;
                }
            }
        }

        if !source_asn_scores_v4.is_empty() {
            batch.source_asns.push((source.clone(), 4, source_asn_scores_v4));
        }
        if !source_asn_scores_v6.is_empty() {
            batch.source_asns.push((source.clone(), 6, source_asn_scores_v6));
        }
    }

    let mut asns_v4 = Vec::new();
    let mut asns_v6 = Vec::new();
    for (asn, acc) in &asn_totals {
        if acc.rank_v4 > 0.0 {
            asns_v4.push((asn.clone(), acc.rank_v4));
        }
        if acc.rank_v6 > 0.0 {
            asns_v6.push((asn.clone(), acc.rank_v6));
        }
        if !acc.prefixes_v4.is_empty() {
            batch.asn_prefixes.push((
                asn.clone(),
                4,
                acc.prefixes_v4.iter().map(|(p, s)| (p.clone(), *s)).collect(),
            ));
        }
        if !acc.prefixes_v6.is_empty() {
            batch.asn_prefixes.push((
                asn.clone(),
                6,
                acc.prefixes_v6.iter().map(|(p, s)| (p.clone(), *s)).collect(),
            ));
        }
    }
    if !asns_v4.is_empty() {
        batch.asns.push((4, asns_v4));
    }
    if !asns_v6.is_empty() {
        batch.asns.push((6, asns_v6));
    }

    ctx.store.delete_ranking_keys(day, &sources, &asns_seen).await?;
    ctx.store.write_ranking(day, batch).await?;
    Ok(())
}

fn prefix_family(prefix: &str) -> AddressFamily {
    if prefix.contains(':') {
        AddressFamily::V6
    } else {
        AddressFamily::V4
    }
}

fn num_addresses(prefix: &str) -> Option<f64> {
    let net = IpNet::from_str(prefix).ok()?;
    let host_bits = (net.max_prefix_len() - net.prefix_len()) as u32;
    Some(2f64.powi(host_bits as i32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn num_addresses_v4_slash_24() {
        assert_eq!(num_addresses("1.2.3.0/24"), Some(256.0));
    }

    #[test]
    fn num_addresses_v6_slash_64() {
        assert_eq!(num_addresses("2001:db8::/64"), Some(2f64.powi(64)));
    }

    #[test]
    fn num_addresses_rejects_garbage() {
        assert_eq!(num_addresses("not-a-prefix"), None);
    }

    #[test]
    fn prefix_family_detects_v6_by_colon() {
        assert_eq!(prefix_family("2001:db8::/64").version(), 6);
        assert_eq!(prefix_family("1.2.3.0/24").version(), 4);
    }
}
