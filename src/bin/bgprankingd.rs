//! The BGP ranking daemon: loads configuration, wires up storage and the
//! IP-to-ASN client, and runs every pipeline stage as an independent
//! coordinator-driven job until a shutdown sentinel is observed.

use std::sync::Arc;
use std::time::Duration;

use bgpranking_core::config::Config;
use bgpranking_core::coordinator::Coordinator;
use bgpranking_core::error::{Error, Result};
use bgpranking_core::ip2asn::http::Client as Ip2AsnClient;
use bgpranking_core::log::Logger;
use bgpranking_core::pipeline::{self, PipelineContext};
use bgpranking_core::registry::Registry;
use bgpranking_core::store::redis_backed::RedisStore;
use camino::Utf8PathBuf;
use clap::Parser;
use tokio::sync::RwLock;
use tracing::info;

/// BGP ranking daemon.
#[derive(Parser, Debug)]
#[command(name = "bgprankingd", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "bgpranking.toml")]
    config: Utf8PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    Logger::launch(&config.log).map_err(Error::config)?;
    info!(config = %cli.config, "starting bgprankingd");

    let store: Arc<dyn bgpranking_core::store::Store> = Arc::new(
        RedisStore::connect(&config.redis.queues_url, &config.redis.storage_url).await?,
    );
    let ip2asn: Arc<dyn bgpranking_core::ip2asn::Ip2AsnService> = Arc::new(Ip2AsnClient::new(
        config.ip2asn.base_url.clone(),
        Duration::from_secs(config.ip2asn.timeout_secs),
    )?);
    let registry = Arc::new(RwLock::new(Registry::load(&config.feeds_dir)?));
    let data_dir = bgpranking_core::config::working_directory()?.join("data");
    std::fs::create_dir_all(&data_dir)?;

    let ctx = PipelineContext {
        store: store.clone(),
        ip2asn,
        registry,
        data_dir,
        feeds_dir: config.feeds_dir.clone(),
    };
    let coordinator = Coordinator::new(store);
    let schedule = config.schedule;

    tokio::join!(
        coordinator.run("fetcher", schedule.fetcher_secs, {
            let ctx = ctx.clone();
            move |_| {
                let ctx = ctx.clone();
                async move { pipeline::fetcher::tick(&ctx).await }
            }
        }),
        coordinator.run("parser", schedule.parser_secs, {
            let ctx = ctx.clone();
            move |_| {
                let ctx = ctx.clone();
                async move { pipeline::parser::tick(&ctx).await }
            }
        }),
        coordinator.run("sanitizer", schedule.sanitizer_secs, {
            let ctx = ctx.clone();
            move |_| {
                let ctx = ctx.clone();
                async move { pipeline::sanitizer::tick(&ctx).await }
            }
        }),
        coordinator.run("enricher", schedule.enricher_secs, {
            let ctx = ctx.clone();
            move |_| {
                let ctx = ctx.clone();
                async move { pipeline::enricher::tick(&ctx).await }
            }
        }),
        coordinator.run("ranker", schedule.ranker_secs, {
            let ctx = ctx.clone();
            move |_| {
                let ctx = ctx.clone();
                async move { pipeline::ranker::tick(&ctx).await }
            }
        }),
        coordinator.run("asn_descriptions", schedule.asn_descriptions_secs, {
            let ctx = ctx.clone();
            move |_| {
                let ctx = ctx.clone();
                async move { pipeline::asn_descriptions::tick(&ctx).await }
            }
        }),
        coordinator.run("archiver", schedule.archiver_secs, {
            let ctx = ctx.clone();
            move |_| {
                let ctx = ctx.clone();
                async move { pipeline::archiver::tick(&ctx).await }
            }
        }),
    );

    Ok(())
}
