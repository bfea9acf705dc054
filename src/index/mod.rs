//! Deduplicated `canonical timestamp -> mean depth` views over a depth log.

pub mod cache;

use chrono::NaiveDateTime;
use std::collections::HashMap;

use crate::log::{DepthReading, Timestamp};

pub use cache::{IndexCache, IndexPhase, Snapshot};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IndexEntry {
    /// The instant the key encodes (minute precision).
    pub minute: NaiveDateTime,
    pub mean_depth: f64,
}

/// Canonical timestamp (`M/D/YY H:mm`) to the mean depth of the last
/// reading seen for it, plus the keys in first-insertion order.
#[derive(Clone, Debug, Default)]
pub struct TimestampIndex {
    entries: HashMap<String, IndexEntry>,
    order: Vec<String>,
}

impl TimestampIndex {
    /// Index every reading accepted by `filter`, in the given (file) order.
    pub fn build<'a, I, F>(readings: I, mut filter: F) -> Self
    where
        I: IntoIterator<Item = &'a DepthReading>,
        F: FnMut(&Timestamp) -> bool,
    {
        let mut index = Self::default();
        for reading in readings {
            if filter(&reading.timestamp) {
                index.insert(reading);
            }
        }
        index
    }

    /// Last write wins.
    pub fn insert(&mut self, reading: &DepthReading) {
        let key = reading.timestamp.canonical();
        let entry = IndexEntry {
            minute: reading.timestamp.minute(),
            mean_depth: reading.mean_depth,
        };
        if self.entries.insert(key.clone(), entry).is_none() {
            self.order.push(key);
        }
    }

    pub fn get(&self, key: &str) -> Option<&IndexEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries sorted by time; equal instants keep first-insertion order.
    /// The log is mostly append-ordered but not guaranteed monotonic.
    pub fn chronological(&self) -> Vec<(&str, IndexEntry)> {
        let mut out: Vec<(&str, IndexEntry)> = self
            .order
            .iter()
            .filter_map(|key| self.entries.get(key).map(|e| (key.as_str(), *e)))
            .collect();
        out.sort_by_key(|(_, e)| e.minute);
        out
    }
}
