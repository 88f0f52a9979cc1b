//! ASN-description harvester (§4.8, new): scrapes a fixed HTML table of
//! `AS<number> ... <description>` pairs and records changes per ASN.
//!
//! Grounded on `bgpranking/asn_descriptions.py`: a `Last-Modified`
//! high-water mark gates the whole import, and only descriptions that
//! differ from the most recently recorded one are written.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use time::format_description::well_known::Rfc2822;
use time::OffsetDateTime;
use tracing::info;

use super::PipelineContext;
use crate::error::Result;

const SOURCE_URL: &str = "http://www.cidr-report.org/as2.0/autnums.html";
const META_KEY: &str = "asn_descriptions|last_modified";

pub async fn tick(ctx: &PipelineContext) -> Result<()> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;

    let head = http.head(SOURCE_URL).send().await?;
    let Some(current_last_modified) = head
        .headers()
        .get(reqwest::header::LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
    else {
        return Ok(());
    };

    let previous = ctx.store.get_meta(META_KEY).await?;
    if let Some(previous) = &previous {
        let newer = OffsetDateTime::parse(&current_last_modified, &Rfc2822)
            .ok()
            .zip(OffsetDateTime::parse(previous, &Rfc2822).ok())
            .map(|(current, previous)| current > previous)
            .unwrap_or(true);
        if !newer {
            return Ok(());
        }
    }

    let body = http.get(SOURCE_URL).send().await?.text().await?;
    let import_timestamp = OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default();

    let mut new_asns = 0;
    let mut new_descriptions = 0;
    for (asn, description) in extract_entries(&body) {
        match ctx.store.latest_asn_description(&asn).await? {
            None => {
                ctx.store
                    .set_asn_description(&asn, &import_timestamp, &description)
                    .await?;
                new_asns += 1;
            }
            Some((_, last_description)) if last_description != description => {
                ctx.store
                    .set_asn_description(&asn, &import_timestamp, &description)
                    .await?;
                new_descriptions += 1;
            }
            Some(_) => {}
        }
    }

    ctx.store.set_meta(META_KEY, &current_last_modified).await?;
    info!(new_asns, new_descriptions, "asn description import complete");
    Ok(())
}

fn entry_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"as=AS(?P<asn>\d+)&.*?</a>\s*(?P<descr>.*)").expect("static regex is valid")
    })
}

fn extract_entries(html: &str) -> Vec<(String, String)> {
    html.lines()
        .filter_map(|line| {
            let caps = entry_pattern().captures(line)?;
            Some((caps["asn"].to_string(), caps["descr"].trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_asn_and_description() {
        let html = r#"<a href="/cgi-bin/as-report?as=AS64500&view=2.0">AS64500 </a> EXAMPLE-AS, US"#;
        let entries = extract_entries(html);
        assert_eq!(entries, vec![("64500".to_string(), "EXAMPLE-AS, US".to_string())]);
    }

    #[test]
    fn ignores_unrelated_lines() {
        assert!(extract_entries("just some text\n").is_empty());
    }
}
