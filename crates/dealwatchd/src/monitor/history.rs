//! Persistent sighting history, keyed by listing URL.

use super::ScrapeError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sighting {
    pub date: NaiveDate,
    pub price: f64,
    pub title: String,
}

#[derive(Debug)]
pub struct History {
    path: PathBuf,
    entries: BTreeMap<String, Vec<Sighting>>,
}

impl History {
    /// Load the history file, starting empty if it does not exist yet
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ScrapeError> {
        let path = path.into();
        let entries = if path.exists() {
            let content = fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Date of the most recent sighting of `url`
    pub fn last_seen(&self, url: &str) -> Option<NaiveDate> {
        self.entries.get(url)?.last().map(|s| s.date)
    }

    pub fn sightings(&self, url: &str) -> &[Sighting] {
        self.entries.get(url).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn record(&mut self, url: &str, sighting: Sighting) {
        self.entries.entry(url.to_string()).or_default().push(sighting);
    }

    pub fn save(&self) -> Result<(), ScrapeError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, serde_json::to_string_pretty(&self.entries)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let history = History::load(dir.path().join("data/history.json")).unwrap();
        assert_eq!(history.last_seen("https://www.ebay.com/itm/1"), None);
    }

    #[test]
    fn test_record_save_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data/history.json");
        let url = "https://www.ebay.com/itm/1";

        let mut history = History::load(&path).unwrap();
        history.record(url, Sighting { date: day("2025-07-20"), price: 1299.0, title: "A".into() });
        history.record(url, Sighting { date: day("2025-07-27"), price: 1199.0, title: "A".into() });
        history.save().unwrap();

        let reloaded = History::load(&path).unwrap();
        assert_eq!(reloaded.sightings(url).len(), 2);
        assert_eq!(reloaded.last_seen(url), Some(day("2025-07-27")));

        // dates are stored as plain YYYY-MM-DD
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"2025-07-20\""));
    }
}
