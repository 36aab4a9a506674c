use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use util::StatsStore;

/// Stable identifier for a browser tab, assigned by the host.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TabId(u64);

impl TabId {
    /// Creates a new `TabId` from a raw numeric value.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw numeric value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Loading status reported by the host for a tab.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabStatus {
    Loading,
    Complete,
    Unloaded,
}

/// Host-side snapshot of a live tab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabInfo {
    pub id: TabId,
    #[serde(default)]
    pub window_id: Option<u64>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub status: Option<TabStatus>,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub audible: bool,
    #[serde(default)]
    pub fav_icon_url: Option<String>,
}

impl TabInfo {
    pub fn new(id: TabId, title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id,
            window_id: None,
            title: title.into(),
            url: url.into(),
            active: false,
            status: None,
            pinned: false,
            audible: false,
            fav_icon_url: None,
        }
    }
}

/// Tracked statistics for a single tab.
///
/// Memory (MB) and CPU (percent) figures are simulated estimates, not
/// measurements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabRecord {
    pub id: TabId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub memory_usage: f64,
    #[serde(default)]
    pub cpu_usage: f64,
}

impl TabRecord {
    /// Creates a record first observed at `now` with zeroed metrics.
    pub fn new(id: TabId, title: impl Into<String>, url: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            title: title.into(),
            url: url.into(),
            created_at: now,
            last_updated: None,
            last_seen: None,
            memory_usage: 0.0,
            cpu_usage: 0.0,
        }
    }

    /// Most recent observation, falling back to creation time.
    pub fn last_observed(&self) -> DateTime<Utc> {
        self.last_seen
            .into_iter()
            .chain(self.last_updated)
            .max()
            .unwrap_or(self.created_at)
    }
}

pub type TabStore = StatsStore<TabId, TabRecord>;

/// Subset of tab properties that changed in an update notification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabChange {
    #[serde(default)]
    pub status: Option<TabStatus>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl TabChange {
    /// Whether the change signals that navigation finished loading.
    pub fn is_load_complete(&self) -> bool {
        self.status == Some(TabStatus::Complete)
    }
}

/// Tab lifecycle notification emitted by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TabEvent {
    Created { tab: TabInfo },
    Removed { id: TabId },
    Updated { id: TabId, change: TabChange, tab: Option<TabInfo> },
}

/// Applies a tab lifecycle event to the store.
///
/// Updates are only merged once the host reports the load as complete;
/// other events never fail.
pub fn apply_tab_event(store: &mut TabStore, event: &TabEvent, now: DateTime<Utc>) {
    match event {
        TabEvent::Created { tab } => {
            store.set(tab.id, TabRecord::new(tab.id, &tab.title, &tab.url, now));
            debug!(event = "tab_created", tab_id = %tab.id);
        }
        TabEvent::Removed { id } => {
            if store.delete(*id).is_some() {
                debug!(event = "tab_removed", tab_id = %id);
            }
        }
        TabEvent::Updated { id, change, tab } => {
            if !change.is_load_complete() {
                return;
            }

            let title = tab
                .as_ref()
                .map(|tab| tab.title.clone())
                .or_else(|| change.title.clone());
            let url = tab
                .as_ref()
                .map(|tab| tab.url.clone())
                .or_else(|| change.url.clone());

            if !store.contains(*id) {
                store.set(*id, TabRecord::new(*id, "", "", now));
            }
            let Some(record) = store.get_mut(*id) else {
                return;
            };

            if let Some(title) = title {
                record.title = title;
            }
            if let Some(url) = url {
                record.url = url;
            }
            record.last_updated = Some(now);
            debug!(event = "tab_updated", tab_id = %id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn created(id: u64) -> TabEvent {
        TabEvent::Created {
            tab: TabInfo::new(TabId::new(id), format!("Tab {id}"), format!("https://example.com/{id}")),
        }
    }

    fn removed(id: u64) -> TabEvent {
        TabEvent::Removed { id: TabId::new(id) }
    }

    #[test]
    fn count_tracks_creates_minus_removes() {
        let mut store = TabStore::new();
        for event in [
            created(1),
            created(2),
            created(3),
            removed(2),
            removed(2),
            removed(42),
            created(4),
            removed(1),
        ] {
            apply_tab_event(&mut store, &event, now());
        }

        assert_eq!(store.len(), 2);
        assert!(store.contains(TabId::new(3)));
        assert!(store.contains(TabId::new(4)));
    }

    #[test]
    fn created_record_starts_with_zero_metrics() {
        let mut store = TabStore::new();
        apply_tab_event(&mut store, &created(5), now());

        let record = store.get(TabId::new(5)).unwrap();
        assert_eq!(record.created_at, now());
        assert_eq!(record.memory_usage, 0.0);
        assert_eq!(record.cpu_usage, 0.0);
        assert_eq!(record.title, "Tab 5");
    }

    #[test]
    fn loading_updates_are_ignored() {
        let mut store = TabStore::new();
        apply_tab_event(&mut store, &created(1), now());

        let event = TabEvent::Updated {
            id: TabId::new(1),
            change: TabChange {
                status: Some(TabStatus::Loading),
                title: Some("Half loaded".into()),
                url: None,
            },
            tab: None,
        };
        apply_tab_event(&mut store, &event, now() + Duration::seconds(5));

        let record = store.get(TabId::new(1)).unwrap();
        assert_eq!(record.title, "Tab 1");
        assert_eq!(record.last_updated, None);
    }

    #[test]
    fn complete_update_merges_and_creates_when_missing() {
        let mut store = TabStore::new();
        let later = now() + Duration::seconds(5);
        let mut tab = TabInfo::new(TabId::new(9), "Docs", "https://docs.rs");
        tab.status = Some(TabStatus::Complete);
        let event = TabEvent::Updated {
            id: TabId::new(9),
            change: TabChange {
                status: Some(TabStatus::Complete),
                ..TabChange::default()
            },
            tab: Some(tab),
        };
        apply_tab_event(&mut store, &event, later);

        let record = store.get(TabId::new(9)).unwrap();
        assert_eq!(record.title, "Docs");
        assert_eq!(record.url, "https://docs.rs");
        assert_eq!(record.created_at, later);
        assert_eq!(record.last_updated, Some(later));
    }

    #[test]
    fn last_observed_prefers_latest_timestamp() {
        let mut record = TabRecord::new(TabId::new(1), "", "", now());
        assert_eq!(record.last_observed(), now());

        record.last_updated = Some(now() + Duration::hours(1));
        record.last_seen = Some(now() + Duration::minutes(30));
        assert_eq!(record.last_observed(), now() + Duration::hours(1));
    }

    #[test]
    fn record_serializes_with_camel_case_millis() {
        let record = TabRecord::new(TabId::new(7), "Seven", "https://seven.test", now());
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["createdAt"], 1_700_000_000_000i64);
        assert!(value["lastSeen"].is_null());
    }
}
