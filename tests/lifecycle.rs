use std::rc::Rc;

use chrono::{DateTime, Duration, Utc};
use downloads::{DownloadDelta, DownloadEvent, DownloadId, DownloadInfo};
use host::InMemoryHost;
use memory::MetricSimulator;
use serde_json::json;
use storage::JsonFileStore;
use tabmon::{Background, Config, HostEvent};
use tabs::{TabEvent, TabId, TabInfo};
use util::ManualClock;

fn start() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap()
}

async fn background_at(path: &std::path::Path, host: Rc<InMemoryHost>, clock: Rc<ManualClock>) -> Background {
    let store = JsonFileStore::open(path).await.unwrap();
    Background::with_parts(
        host,
        Rc::new(store),
        clock,
        MetricSimulator::seeded(11),
        Config::default(),
    )
}

#[tokio::test]
async fn stats_survive_restart_and_age_out() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tabmon.json");
    let host = Rc::new(InMemoryHost::new());
    let clock = Rc::new(ManualClock::new(start()));

    let first = background_at(&path, host.clone(), clock.clone()).await;
    let tab = TabInfo::new(TabId::new(1), "Docs", "https://docs.test");
    host.insert_tab(tab.clone());
    first.handle_event(&HostEvent::Tab(TabEvent::Created { tab })).await;
    let download = DownloadInfo::new(DownloadId::new(9), "data.csv", start());
    host.insert_download(download.clone());
    first
        .handle_event(&HostEvent::Download(DownloadEvent::Created { download }))
        .await;
    assert!(first.flush().await);
    drop(first);

    let second = background_at(&path, host.clone(), clock.clone()).await;
    second.handle_event(&HostEvent::Startup).await;
    assert!(second.stats().tabs.borrow().contains(TabId::new(1)));
    assert!(second.stats().downloads.borrow().contains(DownloadId::new(9)));

    // The tab is still open so every tick keeps it alive; the download is
    // never touched again and ages out.
    clock.advance(Duration::hours(25));
    let report = second.tick().await.unwrap();
    assert_eq!(report.evicted_downloads, 1);
    assert_eq!(report.evicted_tabs, 0);
    assert!(second.stats().tabs.borrow().contains(TabId::new(1)));
}

#[tokio::test]
async fn download_progress_is_reported_through_requests() {
    let dir = tempfile::tempdir().unwrap();
    let host = Rc::new(InMemoryHost::new());
    let clock = Rc::new(ManualClock::new(start()));
    let background = background_at(&dir.path().join("tabmon.json"), host.clone(), clock.clone()).await;

    let mut download = DownloadInfo::new(DownloadId::new(3), "video.mp4", start());
    download.total_bytes = 10_000;
    host.insert_download(download.clone());
    background
        .handle_event(&HostEvent::Download(DownloadEvent::Created { download }))
        .await;

    clock.advance(Duration::seconds(2));
    let delta = DownloadDelta {
        bytes_received: Some(2_000),
        ..DownloadDelta::default()
    };
    let changed = DownloadEvent::Changed {
        id: DownloadId::new(3),
        delta,
    };
    host.apply_download_event(&changed);
    background.handle_event(&HostEvent::Download(changed)).await;
    clock.advance(Duration::seconds(2));

    let response = background
        .handle_message(&json!({"action": "getDownloadStats"}))
        .await;
    assert!(response.success);
    let stat = &response.data.unwrap()[0];
    assert_eq!(stat["progress"], 20.0);
    assert_eq!(stat["speed"], "1000 B/s");
    assert_eq!(stat["timeRemaining"], "8s");
}
