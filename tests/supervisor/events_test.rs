//! Event recording tests: classification, enrichment, sink and subscribers.

use std::time::Duration;

use runtime_supervisor::config::{AdapterConfig, PatternConfig};
use runtime_supervisor::events::{Classification, Event, EventSink};
use runtime_supervisor::supervisor::{Adapter, LifecycleState};
use tokio::sync::broadcast;
use tokio_stream::StreamExt;

use super::{script_config, wait_for};

fn pattern(regex: &str, event_type: &str) -> PatternConfig {
    PatternConfig {
        regex: regex.to_string(),
        event_type: event_type.to_string(),
    }
}

async fn next_event(rx: &mut broadcast::Receiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

#[tokio::test]
async fn scripted_session_records_enriched_events() {
    let dir = tempfile::TempDir::new().unwrap();
    let log = dir.path().join("logs").join("events.jsonl");
    let config = AdapterConfig {
        namespace: "roguelike".to_string(),
        event_log: Some(log.clone()),
        patterns: vec![
            pattern(r"^level (?P<depth>\d+)$", "LEVEL"),
            pattern(r"loot found", "LOOT"),
            pattern(r"quest complete", "QUEST"),
        ],
        ..script_config(
            "scripted-game",
            dir.path(),
            "printf 'level 4\\nloot found\\nquest complete\\n'\nexec cat\n",
        )
    };
    let adapter = Adapter::new(config).unwrap();
    let mut rx = adapter.subscribe();

    adapter.start().await.unwrap();

    let events = [
        next_event(&mut rx).await,
        next_event(&mut rx).await,
        next_event(&mut rx).await,
    ];
    let types: Vec<_> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(types, ["LEVEL", "LOOT", "QUEST"]);

    let lines: Vec<_> = events.iter().map(|e| e.payload["line"].clone()).collect();
    assert_eq!(lines, ["level 4", "loot found", "quest complete"]);
    for event in &events {
        assert_eq!(event.source, "roguelike:scripted-game");
        assert_eq!(event.payload["depth"], 4);
    }

    let status = adapter.status();
    assert_eq!(status.derived_state["depth"], 4);
    assert_eq!(status.derived_state["last_event_type"], "QUEST");

    adapter.stop().await;

    let recorded = EventSink::open(&log).unwrap().read_all().unwrap();
    assert_eq!(recorded.len(), 3);
    assert_eq!(recorded[0].event_type, "LEVEL");
    assert_eq!(recorded[2].payload["line"], "quest complete");

    let raw = std::fs::read_to_string(&log).unwrap();
    assert!(raw.lines().all(|line| line.contains("\"type\"")));
}

#[tokio::test]
async fn custom_classifier_sees_every_line() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = script_config(
        "custom-classifier",
        dir.path(),
        "printf 'one\\ntwo\\n'\nexec cat\n",
    );
    let adapter = Adapter::builder(config)
        .classifier(|line: &str| {
            vec![Classification::new("SEEN").with("length", line.chars().count())]
        })
        .build()
        .unwrap();
    let mut stream = adapter.event_stream();

    adapter.start().await.unwrap();

    let first = tokio::time::timeout(Duration::from_secs(10), stream.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(first.payload["line"], "one");
    assert_eq!(first.payload["length"], 3);
    assert!(first.payload.get("depth").is_none());

    adapter.stop().await;
}

#[tokio::test]
async fn classifier_panics_degrade_without_stopping_runtime() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = AdapterConfig {
        degraded_after: 1,
        ..script_config("panicking-classifier", dir.path(), "printf 'boom\\n'\nexec cat\n")
    };
    let adapter = Adapter::builder(config)
        .classifier(|line: &str| {
            assert!(line != "boom", "cannot classify boom");
            vec![Classification::new("OK")]
        })
        .build()
        .unwrap();
    let mut rx = adapter.subscribe();

    adapter.start().await.unwrap();
    let status = wait_for(&adapter, |s| s.state == LifecycleState::Degraded).await;
    assert!(status.running);
    assert!(status.last_error.unwrap().contains("cannot classify boom"));
    assert!(!adapter.health().ok);

    adapter.send("fine").unwrap();
    let event = next_event(&mut rx).await;
    assert_eq!(event.event_type, "OK");
    let status = wait_for(&adapter, |s| s.state == LifecycleState::Running).await;
    assert!(status.running);

    adapter.stop().await;
}

#[tokio::test]
async fn output_subscribers_receive_raw_chunks() {
    let dir = tempfile::TempDir::new().unwrap();
    let adapter = Adapter::new(script_config(
        "raw-output",
        dir.path(),
        "printf 'raw bytes\\n'\nexec cat\n",
    ))
    .unwrap();
    let mut chunks = adapter.subscribe_output();

    adapter.start().await.unwrap();

    let mut seen = String::new();
    while !seen.contains("raw bytes") {
        let chunk = tokio::time::timeout(Duration::from_secs(10), chunks.recv())
            .await
            .unwrap()
            .unwrap();
        seen.push_str(&chunk);
    }
    assert!(seen.contains("\r\n"));

    adapter.stop().await;
}
