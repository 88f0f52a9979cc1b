//! The fetcher (§4.2): one logical fetcher per descriptor, gated by
//! Last-Modified and deduplicated by content hash.

use std::time::{SystemTime, UNIX_EPOCH};

use camino::{Utf8Path, Utf8PathBuf};
use sha2::{Digest, Sha512};
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use super::PipelineContext;
use crate::error::Result;
use crate::model::FeedDescriptor;
use crate::util::write_file;

/// How long a stale lock file is trusted to mean "another fetcher is still
/// working" before it is reclaimed. Guards against a crash leaving a lock
/// behind forever; §4.2 has no persistent backoff state, so this is the
/// only staleness handling the fetcher does.
const LOCK_STALE_SECS: u64 = 600;

pub async fn tick(ctx: &PipelineContext) -> Result<()> {
    if let Err(err) = ctx.registry.write().await.refresh(&ctx.feeds_dir) {
        warn!(%err, "feed registry refresh failed, continuing with previous snapshot");
    }

    let descriptors: Vec<FeedDescriptor> = ctx
        .registry
        .read()
        .await
        .descriptors()
        .cloned()
        .collect();

    for descriptor in descriptors {
        if let Err(err) = fetch_one(ctx, &descriptor).await {
            warn!(source = %descriptor.source(), %err, "fetch failed, will retry next tick");
        }
    }
    Ok(())
}

async fn fetch_one(ctx: &PipelineContext, descriptor: &FeedDescriptor) -> Result<()> {
    let Some(url) = &descriptor.url else {
        return Ok(());
    };

    let dir = ctx
        .data_dir
        .join(&descriptor.vendor)
        .join(&descriptor.name);
    let meta_dir = dir.join("meta");
    let archive_dir = dir.join("archive");
    std::fs::create_dir_all(&dir)?;
    std::fs::create_dir_all(&meta_dir)?;
    std::fs::create_dir_all(&archive_dir)?;

    let lock_path = meta_dir.join("fetch.lock");
    if !acquire_lock(&lock_path)? {
        debug!(source = %descriptor.source(), "fetch lock held, skipping tick");
        return Ok(());
    }
    let result = fetch_inner(ctx, descriptor, url, &dir, &archive_dir).await;
    let _ = std::fs::remove_file(&lock_path);
    result
}

async fn fetch_inner(
    ctx: &PipelineContext,
    descriptor: &FeedDescriptor,
    url: &str,
    dir: &Utf8Path,
    archive_dir: &Utf8Path,
) -> Result<()> {
    let source = descriptor.source();
    let http = reqwest::Client::new();

    let head = http.head(url).send().await?;
    let current_last_modified = head
        .headers()
        .get(reqwest::header::LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if !should_download(ctx, &source, current_last_modified.as_deref()).await? {
        debug!(%source, "not newer than last fetch, skipping");
        return Ok(());
    }

    let body = http.get(url).send().await?.bytes().await?;

    if is_duplicate_of_newest(dir, archive_dir, &body)? {
        debug!(%source, "identical to today's newest file, discarding");
        return Ok(());
    }

    let now = OffsetDateTime::now_utc();
    let filename = now
        .format(&Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
        .replace(':', "-");
    let path = dir.join(format!("{filename}.txt"));
    write_file(&path, &body)?;
    info!(%source, path = %path, "fetched new file");
    Ok(())
}

async fn should_download(
    ctx: &PipelineContext,
    source: &str,
    current: Option<&str>,
) -> Result<bool> {
    let meta_key = format!("fetcher|{source}|lastmodified");
    let previous = ctx.store.get_meta(&meta_key).await?;

    match (previous, current) {
        (None, Some(new)) => {
            ctx.store.set_meta(&meta_key, new).await?;
            Ok(true)
        }
        (None, None) => Ok(true),
        (Some(_), None) => Ok(true),
        (Some(prev), Some(new)) => {
            let newer = parse_http_date(new)
                .zip(parse_http_date(&prev))
                .map(|(new, prev)| new > prev)
                .unwrap_or(true);
            if newer {
                ctx.store.set_meta(&meta_key, new).await?;
            }
            Ok(newer)
        }
    }
}

fn parse_http_date(raw: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(raw, &Rfc2822).ok()
}

fn is_duplicate_of_newest(dir: &Utf8Path, archive_dir: &Utf8Path, body: &[u8]) -> Result<bool> {
    let mut candidates = Vec::new();
    candidates.extend(newest_file(dir)?);
    candidates.extend(newest_file(archive_dir)?);

    let today = OffsetDateTime::now_utc().date();
    let downloaded_hash = sha512(body);

    for candidate in candidates {
        let Some(file_date) = file_timestamp(&candidate) else {
            continue;
        };
        if file_date.date() != today {
            continue;
        }
        let existing = std::fs::read(&candidate)?;
        if sha512(&existing) == downloaded_hash {
            return Ok(true);
        }
    }
    Ok(false)
}

fn newest_file(dir: &Utf8Path) -> Result<Option<Utf8PathBuf>> {
    if !dir.exists() {
        return Ok(None);
    }
    let mut newest: Option<(SystemTime, Utf8PathBuf)> = None;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let modified = entry.metadata()?.modified().unwrap_or(UNIX_EPOCH);
        let Ok(path) = Utf8PathBuf::try_from(entry.path()) else {
            continue;
        };
        if newest.as_ref().map(|(t, _)| modified > *t).unwrap_or(true) {
            newest = Some((modified, path));
        }
    }
    Ok(newest.map(|(_, path)| path))
}

/// Filenames are an RFC 3339 timestamp with the time portion's `:`
/// replaced by `-` (colons aren't portable in filenames); undo that before
/// parsing.
fn file_timestamp(path: &Utf8Path) -> Option<OffsetDateTime> {
    let stem = path.file_stem()?;
    if let Ok(dt) = OffsetDateTime::parse(stem, &Rfc3339) {
        return Some(dt);
    }
    let (date_part, time_part) = stem.split_once('T')?;
    let restored = format!("{date_part}T{}", time_part.replace('-', ":"));
    OffsetDateTime::parse(&restored, &Rfc3339).ok()
}

fn sha512(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha512::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

fn acquire_lock(lock_path: &Utf8Path) -> Result<bool> {
    match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(lock_path)
    {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            let age = std::fs::metadata(lock_path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|m| SystemTime::now().duration_since(m).ok())
                .map(|d| d.as_secs())
                .unwrap_or(0);
            if age > LOCK_STALE_SECS {
                std::fs::remove_file(lock_path)?;
                std::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(lock_path)?;
                Ok(true)
            } else {
                Ok(false)
            }
        }
        Err(e) => Err(e.into()),
    }
}
