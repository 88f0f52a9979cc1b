//! The parser (§4.3): turns each descriptor's raw files into intake records.
//!
//! A file is processed at most once: on success it moves to `archive/`, on
//! failure to parse it moves to `unparsable/` so a bad file never blocks a
//! feed forever.

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::PipelineContext;
use crate::error::Result;
use crate::model::{FeedDescriptor, IntakeRecord};
use crate::parsers::{self, DefaultIpv4Parser, ParseOutcome, Parser};

pub async fn tick(ctx: &PipelineContext) -> Result<()> {
    let descriptors: Vec<FeedDescriptor> = ctx
        .registry
        .read()
        .await
        .descriptors()
        .cloned()
        .collect();

    for descriptor in descriptors {
        if let Err(err) = parse_one(ctx, &descriptor).await {
            warn!(source = %descriptor.source(), %err, "parser tick failed for source");
        }
    }
    Ok(())
}

async fn parse_one(ctx: &PipelineContext, descriptor: &FeedDescriptor) -> Result<()> {
    let source = descriptor.source();
    let dir = ctx.data_dir.join(&descriptor.vendor).join(&descriptor.name);
    let archive_dir = dir.join("archive");
    let unparsable_dir = dir.join("unparsable");
    std::fs::create_dir_all(&archive_dir)?;
    std::fs::create_dir_all(&unparsable_dir)?;

    let parser: Box<dyn Parser> = match &descriptor.parser {
        Some(name) => parsers::lookup(name).ok_or_else(|| {
            crate::error::Error::config(format!(
                "source '{source}' names unknown parser '{name}'"
            ))
        })?,
        None => Box::new(DefaultIpv4Parser),
    };

    for file in pending_files(&dir)? {
        let raw = std::fs::read(&file)?;
        match parser.parse(&raw) {
            Ok(outcome) => {
                let count = push_intake(ctx, &source, outcome).await?;
                info!(%source, file = %file, records = count, "parsed file");
                move_into(&file, &archive_dir)?;
            }
            Err(err) => {
                error!(%source, file = %file, %err, "file failed to parse, moving aside");
                move_into(&file, &unparsable_dir)?;
            }
        }
    }
    Ok(())
}

async fn push_intake(ctx: &PipelineContext, source: &str, outcome: ParseOutcome) -> Result<usize> {
    let pairs: Vec<(String, time::OffsetDateTime)> = match outcome {
        ParseOutcome::Empty => Vec::new(),
        ParseOutcome::BareIps { datetime, ips } => {
            ips.into_iter().map(|ip| (ip, datetime)).collect()
        }
        ParseOutcome::TimedIps(pairs) => pairs,
    };

    let count = pairs.len();
    for (ip, datetime) in pairs {
        let record = IntakeRecord {
            ip,
            source: source.to_string(),
            datetime,
        };
        ctx.store.push_intake(Uuid::new_v4(), &record).await?;
    }
    Ok(count)
}

/// Every regular file directly under `dir`, oldest-first by filename (the
/// fetcher names files by RFC 3339 timestamp, so lexical order is
/// chronological).
fn pending_files(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Ok(path) = Utf8PathBuf::try_from(entry.path()) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn move_into(file: &Utf8Path, dest_dir: &Utf8Path) -> Result<()> {
    let Some(name) = file.file_name() else {
        return Ok(());
    };
    std::fs::rename(file, dest_dir.join(name))?;
    Ok(())
}
