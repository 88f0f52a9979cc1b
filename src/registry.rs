//! Feed registry (§4.1): an in-memory index of feed descriptors loaded from
//! a directory of JSON documents.

use camino::Utf8Path;
use tracing::warn;

use crate::error::{Error, Result};
use crate::model::FeedDescriptor;

/// A snapshot of the feed descriptors known at the moment it was built,
/// keyed by `source` (`"{vendor}-{name}"`).
pub struct Registry {
    by_source: foldhash::HashMap<String, FeedDescriptor>,
}

impl Registry {
    /// Load every `*.json` descriptor under `dir`. Two descriptors sharing a
    /// `source` is a configuration error.
    pub fn load(dir: &Utf8Path) -> Result<Self> {
        let mut by_source = foldhash::HashMap::default();

        let entries = std::fs::read_dir(dir)
            .map_err(|e| Error::config(format!("cannot read feed directory '{dir}': {e}")))?;

        for entry in entries {
            let entry = entry.map_err(|e| Error::config(format!("cannot list '{dir}': {e}")))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let text = std::fs::read_to_string(&path).map_err(|e| {
                Error::config(format!("cannot read descriptor '{}': {e}", path.display()))
            })?;
            let descriptor: FeedDescriptor = serde_json::from_str(&text).map_err(|e| {
                Error::config(format!("invalid descriptor '{}': {e}", path.display()))
            })?;

            let source = descriptor.source();
            if by_source.insert(source.clone(), descriptor).is_some() {
                return Err(Error::config(format!(
                    "duplicate feed descriptor for source '{source}'"
                )));
            }
        }

        Ok(Registry { by_source })
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &FeedDescriptor> {
        self.by_source.values()
    }

    pub fn get(&self, source: &str) -> Option<&FeedDescriptor> {
        self.by_source.get(source)
    }

    pub fn impact_of(&self, source: &str) -> u8 {
        self.by_source.get(source).map(|d| d.impact).unwrap_or(1)
    }

    /// Re-read `dir` and report which sources were added or removed
    /// relative to this snapshot, replacing it in place.
    pub fn refresh(&mut self, dir: &Utf8Path) -> Result<(Vec<String>, Vec<String>)> {
        let fresh = Registry::load(dir)?;

        let added: Vec<String> = fresh
            .by_source
            .keys()
            .filter(|s| !self.by_source.contains_key(*s))
            .cloned()
            .collect();
        let removed: Vec<String> = self
            .by_source
            .keys()
            .filter(|s| !fresh.by_source.contains_key(*s))
            .cloned()
            .collect();

        for source in &added {
            warn!(source, "feed registry: new descriptor");
        }
        for source in &removed {
            warn!(source, "feed registry: descriptor removed");
        }

        *self = fresh;
        Ok((added, removed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_descriptor(dir: &Utf8Path, filename: &str, json: &str) {
        std::fs::write(dir.join(filename), json).unwrap();
    }

    #[test]
    fn loads_descriptors_keyed_by_source() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap();
        write_descriptor(
            dir,
            "feodo.json",
            r#"{"vendor":"abuse","name":"feodo","url":"https://example/feodo.txt","impact":2}"#,
        );

        let registry = Registry::load(dir).unwrap();
        let descriptor = registry.get("abuse-feodo").unwrap();
        assert_eq!(descriptor.impact, 2);
        assert_eq!(registry.impact_of("missing-source"), 1);
    }

    #[test]
    fn duplicate_source_is_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap();
        write_descriptor(dir, "a.json", r#"{"vendor":"abuse","name":"feodo"}"#);
        write_descriptor(dir, "b.json", r#"{"vendor":"abuse","name":"feodo"}"#);

        let err = Registry::load(dir).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn refresh_reports_added_and_removed() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap();
        write_descriptor(dir, "feodo.json", r#"{"vendor":"abuse","name":"feodo"}"#);
        let mut registry = Registry::load(dir).unwrap();

        std::fs::remove_file(dir.join("feodo.json")).unwrap();
        write_descriptor(dir, "dshield.json", r#"{"vendor":"dshield","name":"block"}"#);

        let (added, removed) = registry.refresh(dir).unwrap();
        assert_eq!(added, vec!["dshield-block".to_string()]);
        assert_eq!(removed, vec!["abuse-feodo".to_string()]);
    }
}
