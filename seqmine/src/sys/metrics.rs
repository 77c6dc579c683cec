//! Metrics publisher.
//!
//! Collects labeled numeric observations in memory and flushes them to a
//! CSV file under the stats directory at a configurable interval. External
//! scrapers pick the file up from there; the engine itself only appends.

use std::fmt::Write as _;

use chrono::Local;

use crate::sys::{log, setup};

pub const DEFAULT_PUBLISH_INTERVAL_SECONDS: u64 = 60;

#[derive(Debug, Clone)]
struct Entry {
    field: String,
    labels: Vec<(String, String)>,
    value: f64,
}

#[derive(Debug, Default)]
pub struct Metrics {
    entries: Vec<Entry>,
    pub publish_interval: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            entries: Vec::new(),
            publish_interval: DEFAULT_PUBLISH_INTERVAL_SECONDS,
        }
    }

    pub fn write(&mut self, field: &str, labels: &[(&str, &str)], value: f64) {
        self.entries.push(Entry {
            field: field.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            value,
        });
    }

    /// Append the collected entries to the metrics file and clear them.
    pub fn publish(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        let timestamp = Local::now().format("%Y-%m-%dT%H:%M:%S");
        let mut out = String::new();
        for entry in &self.entries {
            let labels = entry
                .labels
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(";");
            let _ = writeln!(out, "{},{},{},{}", timestamp, entry.field, labels, entry.value);
        }
        self.entries.clear();
        let path = setup::stats_home().join("metrics.csv");
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut f| std::io::Write::write_all(&mut f, out.as_bytes()));
        if let Err(e) = result {
            log::warn(&format!("Cannot publish metrics: {}", e));
        }
    }
}
