//! An in-memory [`Store`], standing in for Redis in tests. Mirrors the same
//! atomicity guarantees the real implementation needs (pop removes from the
//! set exactly once) without needing a live server.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use time::Date;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{FactEntry, RankingBatch, Store};
use crate::error::Result;
use crate::model::{IntakeRecord, RecordId, SanitizedRecord};

#[derive(Default)]
struct Facts {
    // source -> asn -> prefix -> {"ip|timestamp", ...}
    by_source: HashMap<String, HashMap<String, HashMap<String, HashSet<String>>>>,
}

#[derive(Default)]
struct Inner {
    intake_set: HashSet<RecordId>,
    intake_hash: HashMap<RecordId, IntakeRecord>,
    to_insert_set: HashSet<RecordId>,
    to_insert_hash: HashMap<RecordId, SanitizedRecord>,
    facts: HashMap<Date, Facts>,
    scalars: HashMap<(Date, String, String, u8), f64>,
    source_asn_prefix_ranks: HashMap<(Date, String, String, u8), Vec<(String, f64)>>,
    asn_prefix_ranks: HashMap<(Date, String, u8), Vec<(String, f64)>>,
    source_asns_ranks: HashMap<(Date, String, u8), Vec<(String, f64)>>,
    asns_ranks: HashMap<(Date, u8), Vec<(String, f64)>>,
    descriptions: HashMap<String, HashMap<String, String>>,
    meta: HashMap<String, String>,
    running: HashMap<String, i64>,
    shutdown: bool,
}

/// An in-memory fake, intended only for tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn request_shutdown(&self) {
        self.inner.lock().await.shutdown = true;
    }

    pub async fn running_count(&self, name: &str) -> i64 {
        *self.inner.lock().await.running.get(name).unwrap_or(&0)
    }

    pub async fn scalar(&self, day: Date, source: &str, asn: &str, version: u8) -> Option<f64> {
        self.inner
            .lock()
            .await
            .scalars
            .get(&(day, source.to_string(), asn.to_string(), version))
            .copied()
    }

    pub async fn source_asn_prefix_rank(
        &self,
        day: Date,
        source: &str,
        asn: &str,
        version: u8,
    ) -> Vec<(String, f64)> {
        self.inner
            .lock()
            .await
            .source_asn_prefix_ranks
            .get(&(day, source.to_string(), asn.to_string(), version))
            .cloned()
            .unwrap_or_default()
    }

    pub async fn asns_ranking(&self, day: Date, version: u8) -> Vec<(String, f64)> {
        self.inner
            .lock()
            .await
            .asns_ranks
            .get(&(day, version))
            .cloned()
            .unwrap_or_default()
    }

    pub async fn source_asns_ranking(&self, day: Date, source: &str, version: u8) -> Vec<(String, f64)> {
        self.inner
            .lock()
            .await
            .source_asns_ranks
            .get(&(day, source.to_string(), version))
            .cloned()
            .unwrap_or_default()
    }

    pub async fn intake_len(&self) -> usize {
        self.inner.lock().await.intake_set.len()
    }

    pub async fn to_insert_len(&self) -> usize {
        self.inner.lock().await.to_insert_set.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn push_intake(&self, id: RecordId, record: &IntakeRecord) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.intake_set.insert(id);
        inner.intake_hash.insert(id, record.clone());
        Ok(())
    }

    async fn pop_intake(&self, max: usize) -> Result<Vec<RecordId>> {
        let mut inner = self.inner.lock().await;
        let ids: Vec<RecordId> = inner.intake_set.iter().take(max).copied().collect();
        for id in &ids {
            inner.intake_set.remove(id);
        }
        Ok(ids)
    }

    async fn get_intake(&self, id: RecordId) -> Result<Option<IntakeRecord>> {
        Ok(self.inner.lock().await.intake_hash.get(&id).cloned())
    }

    async fn delete_intake(&self, ids: &[RecordId]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        for id in ids {
            inner.intake_hash.remove(id);
        }
        Ok(())
    }

    async fn requeue_intake(&self, ids: &[RecordId]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        for id in ids {
            inner.intake_set.insert(*id);
        }
        Ok(())
    }

    async fn push_to_insert(&self, id: RecordId, record: &SanitizedRecord) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.to_insert_set.insert(id);
        inner.to_insert_hash.insert(id, record.clone());
        Ok(())
    }

    async fn pop_to_insert(&self, max: usize) -> Result<Vec<RecordId>> {
        let mut inner = self.inner.lock().await;
        let ids: Vec<RecordId> = inner.to_insert_set.iter().take(max).copied().collect();
        for id in &ids {
            inner.to_insert_set.remove(id);
        }
        Ok(ids)
    }

    async fn get_to_insert(&self, id: RecordId) -> Result<Option<SanitizedRecord>> {
        Ok(self.inner.lock().await.to_insert_hash.get(&id).cloned())
    }

    async fn delete_to_insert(&self, ids: &[RecordId]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        for id in ids {
            inner.to_insert_hash.remove(id);
        }
        Ok(())
    }

    async fn requeue_to_insert(&self, ids: &[RecordId]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        for id in ids {
            inner.to_insert_set.insert(*id);
        }
        Ok(())
    }

    async fn insert_facts(&self, day: Date, source: &str, entries: &[FactEntry]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let facts = inner.facts.entry(day).or_default();
        let by_asn = facts.by_source.entry(source.to_string()).or_default();
        for entry in entries {
            let by_prefix = by_asn.entry(entry.asn.clone()).or_default();
            let events = by_prefix.entry(entry.prefix.clone()).or_default();
            events.insert(format!("{}|{}", entry.ip, entry.timestamp));
        }
        Ok(())
    }

    async fn sources_for_day(&self, day: Date) -> Result<Vec<String>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .facts
            .get(&day)
            .map(|f| f.by_source.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn asns_for_source(&self, day: Date, source: &str) -> Result<Vec<String>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .facts
            .get(&day)
            .and_then(|f| f.by_source.get(source))
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn prefixes_for_asn(&self, day: Date, source: &str, asn: &str) -> Result<Vec<String>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .facts
            .get(&day)
            .and_then(|f| f.by_source.get(source))
            .and_then(|m| m.get(asn))
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn events_for_prefix(
        &self,
        day: Date,
        source: &str,
        asn: &str,
        prefix: &str,
    ) -> Result<Vec<String>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .facts
            .get(&day)
            .and_then(|f| f.by_source.get(source))
            .and_then(|m| m.get(asn))
            .and_then(|m| m.get(prefix))
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_ranking_keys(&self, day: Date, sources: &[String], asns: &[String]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.asns_ranks.remove(&(day, 4));
        inner.asns_ranks.remove(&(day, 6));
        for source in sources {
            inner.source_asns_ranks.remove(&(day, source.clone(), 4));
            inner.source_asns_ranks.remove(&(day, source.clone(), 6));
            for asn in asns {
                inner
                    .scalars
                    .remove(&(day, source.clone(), asn.clone(), 4));
                inner
                    .scalars
                    .remove(&(day, source.clone(), asn.clone(), 6));
                inner
                    .source_asn_prefix_ranks
                    .remove(&(day, source.clone(), asn.clone(), 4));
                inner
                    .source_asn_prefix_ranks
                    .remove(&(day, source.clone(), asn.clone(), 6));
            }
        }
        for asn in asns {
            inner.asn_prefix_ranks.remove(&(day, asn.clone(), 4));
            inner.asn_prefix_ranks.remove(&(day, asn.clone(), 6));
        }
        Ok(())
    }

    async fn write_ranking(&self, day: Date, batch: RankingBatch) -> Result<()> {
        let mut inner = self.inner.lock().await;
        for (source, asn, version, score) in batch.source_asn_scalars {
            inner.scalars.insert((day, source, asn, version), score);
        }
        for (source, asn, version, members) in batch.source_asn_prefixes {
            inner
                .source_asn_prefix_ranks
                .insert((day, source, asn, version), members);
        }
        for (asn, version, members) in batch.asn_prefixes {
            inner.asn_prefix_ranks.insert((day, asn, version), members);
        }
        for (source, version, members) in batch.source_asns {
            inner
                .source_asns_ranks
                .insert((day, source, version), members);
        }
        for (version, members) in batch.asns {
            inner.asns_ranks.insert((day, version), members);
        }
        Ok(())
    }

    async fn latest_asn_description(&self, asn: &str) -> Result<Option<(String, String)>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .descriptions
            .get(asn)
            .and_then(|m| m.iter().max_by(|a, b| a.0.cmp(b.0)))
            .map(|(ts, desc)| (ts.clone(), desc.clone())))
    }

    async fn set_asn_description(&self, asn: &str, timestamp: &str, description: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .descriptions
            .entry(asn.to_string())
            .or_default()
            .insert(timestamp.to_string(), description.to_string());
        Ok(())
    }

    async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.lock().await.meta.get(key).cloned())
    }

    async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.inner
            .lock()
            .await
            .meta
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn set_running(&self, name: &str) -> Result<()> {
        *self
            .inner
            .lock()
            .await
            .running
            .entry(name.to_string())
            .or_insert(0) += 1;
        Ok(())
    }

    async fn unset_running(&self, name: &str) -> Result<()> {
        *self
            .inner
            .lock()
            .await
            .running
            .entry(name.to_string())
            .or_insert(0) -= 1;
        Ok(())
    }

    async fn shutdown_requested(&self) -> bool {
        self.inner.lock().await.shutdown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn sample_intake() -> IntakeRecord {
        IntakeRecord {
            ip: "1.2.3.4".into(),
            source: "abuse-feodo".into(),
            datetime: time::OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn pop_intake_removes_from_set_but_not_hash() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        store.push_intake(id, &sample_intake()).await.unwrap();
        assert_eq!(store.intake_len().await, 1);

        let popped = store.pop_intake(10).await.unwrap();
        assert_eq!(popped, vec![id]);
        assert_eq!(store.intake_len().await, 0);
        assert!(store.get_intake(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn requeue_intake_restores_set_membership() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        store.push_intake(id, &sample_intake()).await.unwrap();
        store.pop_intake(10).await.unwrap();
        store.requeue_intake(&[id]).await.unwrap();
        assert_eq!(store.intake_len().await, 1);
    }

    #[tokio::test]
    async fn insert_facts_is_idempotent() {
        let store = MemoryStore::new();
        let day = date!(2024 - 01 - 02);
        let entries = vec![FactEntry {
            asn: "64500".into(),
            prefix: "1.2.3.0/24".into(),
            ip: "1.2.3.4".into(),
            timestamp: "2024-01-02T00:00:00Z".into(),
        }];
        store.insert_facts(day, "abuse-feodo", &entries).await.unwrap();
        store.insert_facts(day, "abuse-feodo", &entries).await.unwrap();

        let events = store
            .events_for_prefix(day, "abuse-feodo", "64500", "1.2.3.0/24")
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn shutdown_requested_reflects_flag() {
        let store = MemoryStore::new();
        assert!(!store.shutdown_requested().await);
        store.request_shutdown().await;
        assert!(store.shutdown_requested().await);
    }
}
