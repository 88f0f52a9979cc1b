//! The enricher / DB-Insert stage (§4.5): resolves sanitized records to
//! `(asn, prefix)` via the IP-to-ASN service and writes the daily facts.

use tracing::warn;

use super::{is_ip2asn_ready, PipelineContext, DRAIN_BATCH_SIZE};
use crate::error::Result;
use crate::ip2asn::{RoutingQuery, RoutingResponse};
use crate::model::{RecordId, SanitizedRecord};
use crate::store::FactEntry;

const PRECISION_DELTA_DAYS: u32 = 3;

pub async fn tick(ctx: &PipelineContext) -> Result<()> {
    if !is_ip2asn_ready(ctx.ip2asn.as_ref()).await? {
        warn!("ip2asn cache below readiness threshold, skipping enricher tick");
        return Ok(());
    }

    let ids = ctx.store.pop_to_insert(DRAIN_BATCH_SIZE).await?;
    if ids.is_empty() {
        return Ok(());
    }

    let mut batch: Vec<(RecordId, SanitizedRecord)> = Vec::new();
    for id in &ids {
        if let Some(record) = ctx.store.get_to_insert(*id).await? {
            batch.push((*id, record));
        }
    }

    let queries: Vec<RoutingQuery> = batch
        .iter()
        .map(|(_, r)| RoutingQuery {
            ip: r.ip,
            family: r.family,
            date: r.date,
            precision_delta_days: PRECISION_DELTA_DAYS,
        })
        .collect();

    let responses = match ctx.ip2asn.mass_query(&queries).await {
        Ok(responses) => responses,
        Err(err) => {
            warn!(%err, "mass_query failed, requeuing batch");
            ctx.store.requeue_to_insert(&ids).await?;
            return Ok(());
        }
    };

    let mut done_ids = Vec::new();
    let mut discarded_ids = Vec::new();
    let mut retry_ids = Vec::new();
    let mut by_source_day: std::collections::HashMap<(time::Date, String), Vec<FactEntry>> =
        std::collections::HashMap::new();

    for ((id, record), response) in batch.into_iter().zip(responses) {
        match response {
            RoutingResponse::Resolved { asn, prefix } => {
                done_ids.push(id);
                let timestamp = record
                    .datetime
                    .format(&time::format_description::well_known::Rfc3339)
                    .unwrap_or_default();
                by_source_day
                    .entry((record.date, record.source.clone()))
                    .or_default()
                    .push(FactEntry {
                        asn,
                        prefix,
                        ip: record.ip.to_string(),
                        timestamp,
                    });
            }
            RoutingResponse::Unknown => retry_ids.push(id),
            RoutingResponse::Error => discarded_ids.push(id),
        }
    }

    for ((day, source), entries) in by_source_day {
        ctx.store.insert_facts(day, &source, &entries).await?;
    }

    let mut to_delete = done_ids;
    to_delete.extend(discarded_ids);
    if !to_delete.is_empty() {
        ctx.store.delete_to_insert(&to_delete).await?;
    }
    if !retry_ids.is_empty() {
        ctx.store.requeue_to_insert(&retry_ids).await?;
    }

    Ok(())
}
