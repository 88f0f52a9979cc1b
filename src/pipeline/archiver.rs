//! Deep archiver (§4.9, new): groups each feed's aged-out archive files by
//! calendar month and zips them, grounded on `bin/archiver.py`'s
//! `DeepArchive`.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};

use camino::{Utf8Path, Utf8PathBuf};
use time::{Date, OffsetDateTime};
use tracing::{info, warn};
use zip::write::FileOptions;
use zip::ZipWriter;

use super::PipelineContext;
use crate::error::{Error, Result};
use crate::model::FeedDescriptor;

pub async fn tick(ctx: &PipelineContext) -> Result<()> {
    let descriptors: Vec<FeedDescriptor> = ctx
        .registry
        .read()
        .await
        .descriptors()
        .cloned()
        .collect();

    let today = OffsetDateTime::now_utc().date();
    let cutoff = last_day_to_keep(today);

    for descriptor in descriptors {
        let dir = ctx
            .data_dir
            .join(&descriptor.vendor)
            .join(&descriptor.name)
            .join("archive");
        if let Err(err) = archive_one(&dir, cutoff) {
            warn!(source = %descriptor.source(), %err, "deep archive pass failed");
        }
    }
    Ok(())
}

/// The first day of the month two months before `today` — files from
/// before this date are rolled into the monthly deep archive.
fn last_day_to_keep(today: Date) -> Date {
    let first_of_this_month = today.replace_day(1).expect("day 1 always valid");
    let one_month_back = step_back_one_month(first_of_this_month);
    step_back_one_month(one_month_back)
}

fn step_back_one_month(d: Date) -> Date {
    let (year, month) = (d.year(), d.month() as u8);
    if month == 1 {
        Date::from_calendar_date(year - 1, time::Month::December, 1).expect("valid date")
    } else {
        let prev = time::Month::try_from(month - 1).expect("valid month");
        Date::from_calendar_date(year, prev, 1).expect("valid date")
    }
}

fn archive_one(dir: &Utf8Path, cutoff: Date) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    let deep_dir = dir.join("deep");
    std::fs::create_dir_all(&deep_dir)?;

    let mut groups: HashMap<String, Vec<Utf8PathBuf>> = HashMap::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let Ok(path) = Utf8PathBuf::try_from(entry.path()) else {
            continue;
        };
        let Some(file_date) = file_date(&path) else {
            continue;
        };
        if file_date >= cutoff {
            continue;
        }
        let archive_name = format!("{:04}{:02}.zip", file_date.year(), file_date.month() as u8);
        groups.entry(archive_name).or_default().push(path);
    }

    if groups.is_empty() {
        return Ok(());
    }

    for (archive_name, paths) in groups {
        let archive_path = deep_dir.join(&archive_name);
        write_zip(&archive_path, &paths)?;
        for path in &paths {
            std::fs::remove_file(path)?;
        }
        info!(archive = %archive_path, files = paths.len(), "deep-archived files");
    }
    Ok(())
}

fn write_zip(archive_path: &Utf8Path, paths: &[Utf8PathBuf]) -> Result<()> {
    let file = File::options()
        .write(true)
        .create_new(true)
        .open(archive_path)
        .map_err(|e| Error::transient(format!("cannot create archive '{archive_path}': {e}")))?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for path in paths {
        let Some(name) = path.file_name() else {
            continue;
        };
        let mut contents = Vec::new();
        File::open(path)?.read_to_end(&mut contents)?;
        zip.start_file(name, options)
            .map_err(|e| Error::transient(format!("cannot write zip entry '{name}': {e}")))?;
        zip.write_all(&contents)?;
    }
    zip.finish()
        .map_err(|e| Error::transient(format!("cannot finalize archive '{archive_path}': {e}")))?;
    Ok(())
}

/// Feed files are named `{rfc3339-with-dashes-for-colons}.txt`; the date is
/// the portion before the first `T`.
fn file_date(path: &Utf8Path) -> Option<Date> {
    let stem = path.file_stem()?;
    let date_part = stem.split('T').next()?;
    let format = time::macros::format_description!("[year]-[month]-[day]");
    Date::parse(date_part, format).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn last_day_to_keep_crosses_year_boundary() {
        assert_eq!(last_day_to_keep(date!(2024 - 01 - 15)), date!(2023 - 11 - 01));
        assert_eq!(last_day_to_keep(date!(2024 - 02 - 15)), date!(2023 - 12 - 01));
        assert_eq!(last_day_to_keep(date!(2024 - 06 - 01)), date!(2024 - 04 - 01));
    }

    #[test]
    fn file_date_parses_rfc3339_stem() {
        let path = Utf8PathBuf::from("2024-03-05T10-30-00Z.txt");
        assert_eq!(file_date(&path), Some(date!(2024 - 03 - 05)));
    }
}
