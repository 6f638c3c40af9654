//! End-to-end behaviour of the aggregator

use maildcn_common::config::{ChannelConfig, MonitorConfig};
use maildcn_common::types::ProtocolEvent;
use maildcn_common::Config;
use maildcn_core::buffer::LIVE_CAPACITY;
use maildcn_core::graph::NODE_EVENT_CAPACITY;
use maildcn_core::{
    DcnMonitor, EventIngest, LocalChannel, MonitorCommand, MonitorService, PanelView,
    PlaybackState, PushChannel, STORY,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn event(n: usize) -> ProtocolEvent {
    let timestamp = chrono::NaiveDate::from_ymd_opt(2024, 5, 1)
        .and_then(|d| d.and_hms_opt(10, 0, 0))
        .map(|t| t + chrono::Duration::milliseconds(n as i64))
        .map(|t| t.format("%Y-%m-%dT%H:%M:%S%.6f").to_string())
        .unwrap();
    ProtocolEvent::new("SMTP", format!("STAGE_{n}"), format!("event {n}")).with_timestamp(timestamp)
}

fn stages<'a>(events: impl Iterator<Item = &'a Arc<ProtocolEvent>>) -> Vec<String> {
    events.map(|e| e.stage.clone()).collect()
}

#[test]
fn test_150_events_keep_last_100_live_and_all_history() {
    let mut monitor = DcnMonitor::new(&MonitorConfig::default());
    let now = Instant::now();
    for n in 0..150 {
        monitor.record(event(n), now);
        assert_eq!(monitor.buffers().live().len(), (n + 1).min(LIVE_CAPACITY));
        assert_eq!(
            monitor.buffers().live().head().map(|e| e.stage.clone()),
            Some(format!("STAGE_{n}"))
        );
    }

    let expected_live: Vec<String> = (50..150).rev().map(|n| format!("STAGE_{n}")).collect();
    assert_eq!(stages(monitor.buffers().live().iter()), expected_live);

    let expected_history: Vec<String> = (0..150).rev().map(|n| format!("STAGE_{n}")).collect();
    assert_eq!(stages(monitor.buffers().history().iter()), expected_history);

    let timestamps: Vec<_> = monitor
        .buffers()
        .live()
        .iter()
        .filter_map(|e| e.parsed_timestamp())
        .collect();
    assert_eq!(timestamps.len(), LIVE_CAPACITY);
    assert!(timestamps.windows(2).all(|w| w[0] > w[1]));
}

#[test]
fn test_node_activity_is_case_insensitive_and_capped() {
    let mut monitor = DcnMonitor::new(&MonitorConfig::default());
    let now = Instant::now();

    monitor.record(ProtocolEvent::new("tls", "HANDSHAKE", ""), now);
    let tls = monitor.graph().node("tls").unwrap();
    assert!(tls.is_active());
    assert_eq!(tls.recent().len(), 1);

    for n in 0..15 {
        monitor.record(ProtocolEvent::new("Tls", format!("S{n}"), ""), now);
    }
    assert_eq!(
        monitor.graph().node("tls").unwrap().recent().len(),
        NODE_EVENT_CAPACITY
    );

    let before: Vec<_> = monitor
        .graph()
        .nodes()
        .iter()
        .map(|n| (n.is_active(), n.recent().len()))
        .collect();
    monitor.record(ProtocolEvent::new("SYSTEM", "SERVERS_STARTED", ""), now);
    let after: Vec<_> = monitor
        .graph()
        .nodes()
        .iter()
        .map(|n| (n.is_active(), n.recent().len()))
        .collect();
    assert_eq!(before, after);
    assert_eq!(monitor.buffers().history().len(), 17);
}

#[test]
fn test_story_walks_to_the_end_and_finishes() {
    let mut monitor = DcnMonitor::new(&MonitorConfig::default());
    monitor.start();
    for _ in 0..STORY.len() - 1 {
        monitor.next();
    }
    assert_eq!(monitor.playback().cursor(), STORY.len() - 1);
    assert!(monitor.playback().is_last_step());

    monitor.next();
    assert_eq!(monitor.playback().state(), PlaybackState::Finished);
    assert_eq!(monitor.playback().cursor(), STORY.len() - 1);

    monitor.reset();
    assert_eq!(monitor.playback().state(), PlaybackState::Idle);
    assert!(!monitor.previous());
    assert_eq!(monitor.playback().cursor(), 0);
}

#[test]
fn test_reset_clears_selection_from_any_state() {
    let mut monitor = DcnMonitor::new(&MonitorConfig::default());
    monitor.start();
    monitor.next();
    monitor.pause();
    monitor.select_node("crypto").unwrap();
    assert!(matches!(
        PanelView::from_panel(&monitor.detail_panel(), false),
        PanelView::Protocol { id: "crypto", .. }
    ));

    monitor.reset();
    assert_eq!(monitor.selected(), None);
    assert_eq!(monitor.playback().cursor(), 0);
    assert!(matches!(
        PanelView::from_panel(&monitor.detail_panel(), false),
        PanelView::Overview(_)
    ));
}

#[test]
fn test_no_channel_means_nothing_recorded() {
    let (ingest, mut rx) = EventIngest::attach(None, &ChannelConfig::default());
    assert!(!ingest.is_subscribed());
    assert!(rx.try_recv().is_err());

    let monitor = DcnMonitor::new(&MonitorConfig::default());
    assert!(monitor.buffers().live().is_empty());
    assert!(monitor.buffers().history().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_service_end_to_end_over_local_channel() {
    let local = Arc::new(LocalChannel::new());
    let channel: Arc<dyn PushChannel> = local.clone();
    let (service, handle) = MonitorService::new(&Config::default(), Some(channel));
    let task = tokio::spawn(service.run());

    for n in 0..150 {
        local.publish(
            "dcn_process",
            json!({
                "protocol": "AI",
                "stage": format!("STAGE_{n}"),
                "details": "",
                "timestamp": format!("2024-05-01T10:00:00.{:06}", n)
            }),
        );
    }
    local.publish("dcn_process", json!({"unexpected": true}));

    let mut rx = handle.subscribe();
    let snapshot = tokio::time::timeout(
        Duration::from_secs(60),
        rx.wait_for(|s| s.history == 150 && s.pending_recent == 0),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();

    assert_eq!(snapshot.live, LIVE_CAPACITY);
    assert_eq!(snapshot.recent.len(), 10);
    assert_eq!(snapshot.recent[0].stage, "STAGE_149");
    assert_eq!(snapshot.recent_total, 150);

    handle.send(MonitorCommand::Clear).unwrap();
    let snapshot = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.history == 0))
        .await
        .unwrap()
        .unwrap()
        .clone();
    assert_eq!(snapshot.live, 0);
    assert!(snapshot.recent.is_empty());

    drop(rx);
    drop(handle);
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(local.subscriber_count("dcn_process"), 0);
    assert_eq!(local.subscriber_count("server_status"), 0);
}
