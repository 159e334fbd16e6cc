//! Location configuration.
//!
//! The file is read fresh on every call so a run always sees the current list.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{ReviewWatchError, Result};
use crate::types::Location;

#[async_trait]
pub trait LocationSource: Send + Sync {
    /// All configured locations, in configuration order.
    async fn load(&self) -> Result<Vec<Location>>;
}

#[derive(Deserialize)]
struct LocationsFile {
    #[serde(alias = "businesses")]
    locations: Vec<Location>,
}

/// Reads locations from a JSON file shaped `{"locations": [...]}`.
pub struct FileLocationSource {
    path: PathBuf,
}

impl FileLocationSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LocationSource for FileLocationSource {
    async fn load(&self) -> Result<Vec<Location>> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            ReviewWatchError::Config(format!(
                "cannot read location configuration {}: {e}",
                self.path.display()
            ))
        })?;
        parse_locations(&raw)
    }
}

/// Parse and validate a locations document.
pub fn parse_locations(raw: &str) -> Result<Vec<Location>> {
    let file: LocationsFile = serde_json::from_str(raw)
        .map_err(|e| ReviewWatchError::Config(format!("invalid location configuration: {e}")))?;

    let mut seen = HashSet::new();
    for location in &file.locations {
        if location.id.trim().is_empty() {
            return Err(ReviewWatchError::Config(format!(
                "location {:?} has an empty id",
                location.display_name
            )));
        }
        if !seen.insert(location.id.as_str()) {
            return Err(ReviewWatchError::Config(format!(
                "duplicate location id {:?}",
                location.id
            )));
        }
    }

    Ok(file.locations)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_configuration_order() {
        let locations = parse_locations(
            r#"{"locations": [
                {"id": "b", "display_name": "Bakery", "source_reference": "https://maps.example/b"},
                {"id": "a", "display_name": "Arcade", "group": "Fun Co", "source_reference": "https://maps.example/a"}
            ]}"#,
        )
        .unwrap();
        let ids: Vec<_> = locations.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, ["b", "a"]);
        assert_eq!(locations[1].group.as_deref(), Some("Fun Co"));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = parse_locations(
            r#"{"locations": [
                {"id": "a", "display_name": "One", "source_reference": "x"},
                {"id": "a", "display_name": "Two", "source_reference": "y"}
            ]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ReviewWatchError::Config(_)));
    }

    #[test]
    fn legacy_businesses_document_is_accepted() {
        let locations = parse_locations(
            r#"{"businesses": [{"id": 1, "name": "Diner", "google_maps_url": "https://maps.example/d"}],
                "settings": {"check_interval_hours": 2}}"#,
        )
        .unwrap();
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].id, "1");
    }

    #[tokio::test]
    async fn missing_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileLocationSource::new(dir.path().join("nope.json"));
        let err = source.load().await.unwrap_err();
        assert!(matches!(err, ReviewWatchError::Config(msg) if msg.contains("nope.json")));
    }

    #[tokio::test]
    async fn reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("businesses.json");
        std::fs::write(
            &path,
            r#"{"locations": [{"id": "a", "display_name": "A", "source_reference": "x"}]}"#,
        )
        .unwrap();
        let locations = FileLocationSource::new(&path).load().await.unwrap();
        assert_eq!(locations[0].display_name, "A");
    }
}
