//! Storage abstraction over the queue/durable Redis-protocol instances.
//!
//! [`Store`] is the seam the teacher's "module-scoped database clients
//! created eagerly in constructors" redesign note calls for: one trait,
//! implemented once against real Redis ([`redis_backed::RedisStore`]) and
//! once as an in-memory fake ([`memory::MemoryStore`]) so the pipeline's
//! tests never need a live server.

pub mod keys;
pub mod memory;
pub mod redis_backed;

use async_trait::async_trait;
use time::Date;

use crate::error::Result;
use crate::model::{IntakeRecord, RecordId, SanitizedRecord};

/// One enriched event, ready to be folded into the daily-fact sets of §3.
#[derive(Debug, Clone)]
pub struct FactEntry {
    pub asn: String,
    pub prefix: String,
    pub ip: String,
    /// RFC 3339 timestamp, stored verbatim as the `{ip}|{timestamp}` member.
    pub timestamp: String,
}

/// The complete set of writes produced by one `rank_a_day` pass (§4.6),
/// applied as a single batch so a reader never observes a half-rewritten
/// day.
#[derive(Debug, Clone, Default)]
pub struct RankingBatch {
    /// `D|S|A|v` scalar ranks.
    pub source_asn_scalars: Vec<(String, String, u8, f64)>,
    /// `D|S|A|v|prefixes` sorted sets.
    pub source_asn_prefixes: Vec<(String, String, u8, Vec<(String, f64)>)>,
    /// `D|A|v` sorted sets, already summed over sources.
    pub asn_prefixes: Vec<(String, u8, Vec<(String, f64)>)>,
    /// `D|S|asns|v` sorted sets.
    pub source_asns: Vec<(String, u8, Vec<(String, f64)>)>,
    /// `D|asns|v` sorted set, summed over sources.
    pub asns: Vec<(u8, Vec<(String, f64)>)>,
}

/// Storage operations shared by every pipeline stage.
///
/// Implementations must make queue pops (`pop_intake`, `pop_to_insert`)
/// atomic with respect to other callers: two workers racing for the same
/// stage must never observe overlapping UUIDs.
#[async_trait]
pub trait Store: Send + Sync {
    // -- intake queue --------------------------------------------------

    async fn push_intake(&self, id: RecordId, record: &IntakeRecord) -> Result<()>;
    async fn pop_intake(&self, max: usize) -> Result<Vec<RecordId>>;
    async fn get_intake(&self, id: RecordId) -> Result<Option<IntakeRecord>>;
    async fn delete_intake(&self, ids: &[RecordId]) -> Result<()>;
    async fn requeue_intake(&self, ids: &[RecordId]) -> Result<()>;

    // -- to_insert queue ------------------------------------------------

    async fn push_to_insert(&self, id: RecordId, record: &SanitizedRecord) -> Result<()>;
    async fn pop_to_insert(&self, max: usize) -> Result<Vec<RecordId>>;
    async fn get_to_insert(&self, id: RecordId) -> Result<Option<SanitizedRecord>>;
    async fn delete_to_insert(&self, ids: &[RecordId]) -> Result<()>;
    async fn requeue_to_insert(&self, ids: &[RecordId]) -> Result<()>;

    // -- daily facts ------------------------------------------------------

    /// Add all four set memberships of §3 for every entry, for one
    /// `(day, source)` pair, in one round-trip.
    async fn insert_facts(&self, day: Date, source: &str, entries: &[FactEntry]) -> Result<()>;

    async fn sources_for_day(&self, day: Date) -> Result<Vec<String>>;
    async fn asns_for_source(&self, day: Date, source: &str) -> Result<Vec<String>>;
    async fn prefixes_for_asn(&self, day: Date, source: &str, asn: &str) -> Result<Vec<String>>;
    /// The `"{ip}|{timestamp}"` members of `D|S|A|P`.
    async fn events_for_prefix(
        &self,
        day: Date,
        source: &str,
        asn: &str,
        prefix: &str,
    ) -> Result<Vec<String>>;

    // -- ranking ------------------------------------------------------------

    /// Delete every ranking key for day `D` across the given sources/asns,
    /// before a fresh `rank_a_day` rewrite.
    async fn delete_ranking_keys(&self, day: Date, sources: &[String], asns: &[String]) -> Result<()>;

    async fn write_ranking(&self, day: Date, batch: RankingBatch) -> Result<()>;

    // -- ASN descriptions (harvester) ----------------------------------------

    /// The most recent `(timestamp, description)` recorded for `asn`, if any.
    async fn latest_asn_description(&self, asn: &str) -> Result<Option<(String, String)>>;
    async fn set_asn_description(&self, asn: &str, timestamp: &str, description: &str) -> Result<()>;

    // -- small key/value metadata (fetcher high-water marks, harvester
    // last-modified cursor) --------------------------------------------------

    async fn get_meta(&self, key: &str) -> Result<Option<String>>;
    async fn set_meta(&self, key: &str, value: &str) -> Result<()>;

    // -- coordinator (§4.7) ----------------------------------------------

    async fn set_running(&self, name: &str) -> Result<()>;
    async fn unset_running(&self, name: &str) -> Result<()>;
    /// Fail-safe: an unreachable store must be reported as "shutdown
    /// requested", never as "carry on".
    async fn shutdown_requested(&self) -> bool;
}
