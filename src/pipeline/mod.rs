//! The five core pipeline stages (§4.2-§4.6) plus the two supplementary
//! periodic jobs (§4.8, §4.9), each a function driven by
//! [`crate::coordinator::Coordinator::run`].

pub mod archiver;
pub mod asn_descriptions;
pub mod enricher;
pub mod fetcher;
pub mod parser;
pub mod ranker;
pub mod sanitizer;

use std::sync::Arc;

use camino::Utf8PathBuf;
use tokio::sync::RwLock;

use crate::ip2asn::Ip2AsnService;
use crate::registry::Registry;
use crate::store::Store;

/// Everything a pipeline job needs: shared storage, the IP-to-ASN client,
/// the feed registry, and the on-disk data root. Constructed once at
/// startup and cloned cheaply into every job closure — the "one explicit
/// context value" the teacher's own redesign notes call for.
#[derive(Clone)]
pub struct PipelineContext {
    pub store: Arc<dyn Store>,
    pub ip2asn: Arc<dyn Ip2AsnService>,
    pub registry: Arc<RwLock<Registry>>,
    pub data_dir: Utf8PathBuf,
    /// Directory of `*.json` feed descriptors, re-polled by the fetcher's
    /// outer loop on every tick (§4.1/§2).
    pub feeds_dir: Utf8PathBuf,
}

/// Default batch size for queue drains (§4.4/§4.5 both pop up to 100).
pub const DRAIN_BATCH_SIZE: usize = 100;

/// The external-service readiness gate shared by the sanitizer, enricher,
/// and ranker (§4.4/§4.5/§4.6).
pub async fn is_ip2asn_ready(ip2asn: &dyn Ip2AsnService) -> crate::error::Result<bool> {
    let readiness = ip2asn.meta().await?;
    Ok(readiness.is_ready())
}
