//! The real [`Store`] implementation, backed by two Redis-protocol
//! connections: one for the ephemeral queue/coordinator keys, one for the
//! durable facts/ranking/description keys. They may point at the same
//! server in small deployments (see [`crate::config::RedisConfig`]).

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use time::Date;
use uuid::Uuid;

use super::{keys, FactEntry, RankingBatch, Store};
use crate::error::Result;
use crate::model::{IntakeRecord, RecordId, SanitizedRecord};

pub struct RedisStore {
    queues: ConnectionManager,
    storage: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(queues_url: &str, storage_url: &str) -> Result<Self> {
        let queues = redis::Client::open(queues_url)?
            .get_connection_manager()
            .await?;
        let storage = redis::Client::open(storage_url)?
            .get_connection_manager()
            .await?;
        Ok(RedisStore { queues, storage })
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn push_intake(&self, id: RecordId, record: &IntakeRecord) -> Result<()> {
        let mut conn = self.queues.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .sadd(keys::intake_set(), id.to_string())
            .ignore()
            .hset_multiple(keys::intake_hash(&id.to_string()), &hash_pairs(&record.to_hash()))
            .ignore();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn pop_intake(&self, max: usize) -> Result<Vec<RecordId>> {
        let mut conn = self.queues.clone();
        let raw: Vec<String> = redis::cmd("SPOP")
            .arg(keys::intake_set())
            .arg(max)
            .query_async(&mut conn)
            .await?;
        Ok(raw.into_iter().filter_map(|s| Uuid::parse_str(&s).ok()).collect())
    }

    async fn get_intake(&self, id: RecordId) -> Result<Option<IntakeRecord>> {
        let mut conn = self.queues.clone();
        let map: HashMap<String, String> = conn.hgetall(keys::intake_hash(&id.to_string())).await?;
        if map.is_empty() {
            return Ok(None);
        }
        Ok(Some(IntakeRecord::from_hash(&map)?))
    }

    async fn delete_intake(&self, ids: &[RecordId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.queues.clone();
        let keys: Vec<String> = ids.iter().map(|id| keys::intake_hash(&id.to_string())).collect();
        let _: () = conn.del(keys).await?;
        Ok(())
    }

    async fn requeue_intake(&self, ids: &[RecordId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.queues.clone();
        let raw: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        let _: () = conn.sadd(keys::intake_set(), raw).await?;
        Ok(())
    }

    async fn push_to_insert(&self, id: RecordId, record: &SanitizedRecord) -> Result<()> {
        let mut conn = self.queues.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .sadd(keys::to_insert_set(), id.to_string())
            .ignore()
            .hset_multiple(
                keys::to_insert_hash(&id.to_string()),
                &hash_pairs(&record.to_hash()),
            )
            .ignore();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn pop_to_insert(&self, max: usize) -> Result<Vec<RecordId>> {
        let mut conn = self.queues.clone();
        let raw: Vec<String> = redis::cmd("SPOP")
            .arg(keys::to_insert_set())
            .arg(max)
            .query_async(&mut conn)
            .await?;
        Ok(raw.into_iter().filter_map(|s| Uuid::parse_str(&s).ok()).collect())
    }

    async fn get_to_insert(&self, id: RecordId) -> Result<Option<SanitizedRecord>> {
        let mut conn = self.queues.clone();
        let map: HashMap<String, String> =
            conn.hgetall(keys::to_insert_hash(&id.to_string())).await?;
        if map.is_empty() {
            return Ok(None);
        }
        Ok(Some(SanitizedRecord::from_hash(&map)?))
    }

    async fn delete_to_insert(&self, ids: &[RecordId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.queues.clone();
        let keys: Vec<String> = ids
            .iter()
            .map(|id| keys::to_insert_hash(&id.to_string()))
            .collect();
        let _: () = conn.del(keys).await?;
        Ok(())
    }

    async fn requeue_to_insert(&self, ids: &[RecordId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.queues.clone();
        let raw: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        let _: () = conn.sadd(keys::to_insert_set(), raw).await?;
        Ok(())
    }

    async fn insert_facts(&self, day: Date, source: &str, entries: &[FactEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.storage.clone();
        let mut pipe = redis::pipe();
        pipe.atomic().sadd(keys::sources(day), source).ignore();
        for entry in entries {
            pipe.sadd(keys::source_asns(day, source), &entry.asn).ignore();
            pipe.sadd(keys::source_asn_prefixes(day, source, &entry.asn), &entry.prefix)
                .ignore();
            pipe.sadd(
                keys::source_asn_prefix_events(day, source, &entry.asn, &entry.prefix),
                format!("{}|{}", entry.ip, entry.timestamp),
            )
            .ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn sources_for_day(&self, day: Date) -> Result<Vec<String>> {
        let mut conn = self.storage.clone();
        Ok(conn.smembers(keys::sources(day)).await?)
    }

    async fn asns_for_source(&self, day: Date, source: &str) -> Result<Vec<String>> {
        let mut conn = self.storage.clone();
        Ok(conn.smembers(keys::source_asns(day, source)).await?)
    }

    async fn prefixes_for_asn(&self, day: Date, source: &str, asn: &str) -> Result<Vec<String>> {
        let mut conn = self.storage.clone();
        Ok(conn
            .smembers(keys::source_asn_prefixes(day, source, asn))
            .await?)
    }

    async fn events_for_prefix(
        &self,
        day: Date,
        source: &str,
        asn: &str,
        prefix: &str,
    ) -> Result<Vec<String>> {
        let mut conn = self.storage.clone();
        Ok(conn
            .smembers(keys::source_asn_prefix_events(day, source, asn, prefix))
            .await?)
    }

    async fn delete_ranking_keys(&self, day: Date, sources: &[String], asns: &[String]) -> Result<()> {
        let mut conn = self.storage.clone();
        let mut to_delete = vec![keys::asns_ranking(day, 4), keys::asns_ranking(day, 6)];
        for source in sources {
            to_delete.push(keys::source_asns_ranking(day, source, 4));
            to_delete.push(keys::source_asns_ranking(day, source, 6));
            for asn in asns {
                to_delete.push(keys::source_asn_rank(day, source, asn, 4));
                to_delete.push(keys::source_asn_rank(day, source, asn, 6));
                to_delete.push(keys::source_asn_prefixes_ranking(day, source, asn, 4));
                to_delete.push(keys::source_asn_prefixes_ranking(day, source, asn, 6));
            }
        }
        for asn in asns {
            to_delete.push(keys::asn_prefixes_ranking(day, asn, 4));
            to_delete.push(keys::asn_prefixes_ranking(day, asn, 6));
        }
        if !to_delete.is_empty() {
            let _: () = conn.del(to_delete).await?;
        }
        Ok(())
    }

    async fn write_ranking(&self, day: Date, batch: RankingBatch) -> Result<()> {
        let mut conn = self.storage.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();

        for (source, asn, version, score) in &batch.source_asn_scalars {
            pipe.set(keys::source_asn_rank(day, source, asn, *version), score)
                .ignore();
        }
        for (source, asn, version, members) in &batch.source_asn_prefixes {
            if members.is_empty() {
                continue;
            }
            let key = keys::source_asn_prefixes_ranking(day, source, asn, *version);
            for (member, score) in members {
                pipe.zadd(&key, member, *score).ignore();
            }
        }
        for (asn, version, members) in &batch.asn_prefixes {
            if members.is_empty() {
                continue;
            }
            let key = keys::asn_prefixes_ranking(day, asn, *version);
            for (member, score) in members {
                pipe.zadd(&key, member, *score).ignore();
            }
        }
        for (source, version, members) in &batch.source_asns {
            if members.is_empty() {
                continue;
            }
            let key = keys::source_asns_ranking(day, source, *version);
            for (member, score) in members {
                pipe.zadd(&key, member, *score).ignore();
            }
        }
        for (version, members) in &batch.asns {
            if members.is_empty() {
                continue;
            }
            let key = keys::asns_ranking(day, *version);
            for (member, score) in members {
                pipe.zadd(&key, member, *score).ignore();
            }
        }

        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn latest_asn_description(&self, asn: &str) -> Result<Option<(String, String)>> {
        let mut conn = self.storage.clone();
        let all: HashMap<String, String> = conn.hgetall(keys::asn_descriptions(asn)).await?;
        Ok(all.into_iter().max_by(|a, b| a.0.cmp(&b.0)))
    }

    async fn set_asn_description(&self, asn: &str, timestamp: &str, description: &str) -> Result<()> {
        let mut conn = self.storage.clone();
        let _: () = conn
            .hset(keys::asn_descriptions(asn), timestamp, description)
            .await?;
        Ok(())
    }

    async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.storage.clone();
        Ok(conn.get(format!("meta|{key}")).await?)
    }

    async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.storage.clone();
        let _: () = conn.set(format!("meta|{key}"), value).await?;
        Ok(())
    }

    async fn set_running(&self, name: &str) -> Result<()> {
        let mut conn = self.queues.clone();
        let _: () = conn.hincr(keys::running_hash(), name, 1).await?;
        Ok(())
    }

    async fn unset_running(&self, name: &str) -> Result<()> {
        let mut conn = self.queues.clone();
        let _: () = conn.hincr(keys::running_hash(), name, -1).await?;
        Ok(())
    }

    async fn shutdown_requested(&self) -> bool {
        let mut conn = self.queues.clone();
        match conn.exists::<_, bool>(keys::shutdown_sentinel()).await {
            Ok(requested) => requested,
            // Fail-safe: an unreachable coordinator store means stop.
            Err(_) => true,
        }
    }
}

fn hash_pairs(map: &HashMap<String, String>) -> Vec<(String, String)> {
    map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}
