use std::cell::Cell;
use std::collections::HashMap;
use std::hash::Hash;

use chrono::{DateTime, Duration, Utc};

/// Source of wall-clock time for record timestamps.
pub trait Clock {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for deterministic tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    now: Cell<DateTime<Utc>>,
}

impl ManualClock {
    /// Creates a new clock frozen at the provided instant.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Cell::new(start),
        }
    }

    /// Moves the clock forward by `step`.
    pub fn advance(&self, step: Duration) {
        self.now.set(self.now.get() + step);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }
}

/// In-memory mapping from entity id to its tracked record.
///
/// Access is single-threaded; callers share a store through `RefCell` and
/// must not hold a borrow across a suspension point.
#[derive(Debug, Clone)]
pub struct StatsStore<K, R> {
    records: HashMap<K, R>,
}

impl<K, R> Default for StatsStore<K, R> {
    fn default() -> Self {
        Self {
            records: HashMap::new(),
        }
    }
}

impl<K, R> StatsStore<K, R>
where
    K: Copy + Eq + Hash,
    R: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the record for `id`, if tracked.
    pub fn get(&self, id: K) -> Option<&R> {
        self.records.get(&id)
    }

    pub fn get_mut(&mut self, id: K) -> Option<&mut R> {
        self.records.get_mut(&id)
    }

    /// Inserts or replaces the record for `id`.
    pub fn set(&mut self, id: K, record: R) {
        self.records.insert(id, record);
    }

    /// Removes the record for `id`. Removing an unknown id is a no-op.
    pub fn delete(&mut self, id: K) -> Option<R> {
        self.records.remove(&id)
    }

    /// Snapshot of all `(id, record)` pairs in no particular order.
    pub fn entries(&self) -> Vec<(K, R)> {
        self.records
            .iter()
            .map(|(id, record)| (*id, record.clone()))
            .collect()
    }

    /// Keeps only the records for which `keep` returns true and returns the
    /// number of records dropped.
    pub fn retain<F: FnMut(&K, &R) -> bool>(&mut self, mut keep: F) -> usize {
        let before = self.records.len();
        self.records.retain(|id, record| keep(id, record));
        before - self.records.len()
    }

    /// Replaces the whole store with the given pairs.
    pub fn replace_all<I: IntoIterator<Item = (K, R)>>(&mut self, entries: I) {
        self.records = entries.into_iter().collect();
    }

    pub fn contains(&self, id: K) -> bool {
        self.records.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

const BYTE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Formats a byte count with binary units and at most one decimal.
///
/// `format_bytes(0)` is `"0 B"`, `format_bytes(1536)` is `"1.5 KB"`.
pub fn format_bytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < BYTE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let rounded = (value * 10.0).round() / 10.0;
    if rounded.fract() == 0.0 {
        format!("{} {}", rounded as u64, BYTE_UNITS[unit])
    } else {
        format!("{rounded:.1} {}", BYTE_UNITS[unit])
    }
}

/// Formats a remaining duration in whole seconds, minutes or hours.
pub fn format_eta(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    if seconds < 60.0 {
        format!("{}s", seconds.floor() as u64)
    } else if seconds < 3600.0 {
        format!("{}m", (seconds / 60.0).floor() as u64)
    } else {
        format!("{}h", (seconds / 3600.0).floor() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_bytes_with_binary_units() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024), "1 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5 MB");
    }

    #[test]
    fn formats_eta_by_magnitude() {
        assert_eq!(format_eta(42.9), "42s");
        assert_eq!(format_eta(60.0), "1m");
        assert_eq!(format_eta(3599.0), "59m");
        assert_eq!(format_eta(7300.0), "2h");
    }

    #[test]
    fn store_delete_is_idempotent() {
        let mut store: StatsStore<u64, &str> = StatsStore::new();
        store.set(1, "a");
        store.set(2, "b");
        assert_eq!(store.delete(1), Some("a"));
        assert_eq!(store.delete(1), None);
        assert_eq!(store.delete(99), None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn replace_all_drops_previous_entries() {
        let mut store: StatsStore<u64, u32> = StatsStore::new();
        store.set(1, 10);
        store.set(2, 20);
        store.replace_all(vec![(7, 70)]);
        assert_eq!(store.get(7), Some(&70));
        assert_eq!(store.entries(), vec![(7, 70)]);
    }

    #[test]
    fn manual_clock_advances() {
        let start = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(Duration::seconds(30));
        assert_eq!(clock.now(), start + Duration::seconds(30));
    }
}
