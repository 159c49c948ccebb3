//! Fetch orchestration against a fake rendering engine

mod helpers;

use footfall_common::config::FetchConfig;
use footfall_engine::browser::FetchOrchestrator;
use helpers::{capture_logs, FailingRenderer, FakeRenderer};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn no_jitter() -> FetchConfig {
    FetchConfig {
        jitter_secs: 0.0,
        ..FetchConfig::default()
    }
}

fn urls(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_slow_page_isolated_and_order_preserved() {
    let (logs, _guard) = capture_logs();
    let renderer = FakeRenderer::new()
        .page("https://a.example/", "<div id=\"ready\">A</div>")
        .slow_page(
            "https://slow.example/",
            "<div id=\"ready\">late</div>",
            Duration::from_secs(5),
        )
        .page("https://c.example/", "<div id=\"ready\">C</div>");
    let closed = Arc::clone(&renderer.pages_closed);
    let orchestrator = FetchOrchestrator::new(Arc::new(renderer), &no_jitter());

    let pages = orchestrator
        .fetch_pages(
            &urls(&["https://c.example/", "https://slow.example/", "https://a.example/"]),
            "#ready",
            Duration::from_millis(200),
        )
        .await
        .unwrap();

    assert_eq!(pages.len(), 3);
    assert!(pages[0].contains(">C<"));
    assert_eq!(pages[1], "");
    assert!(pages[2].contains(">A<"));
    assert_eq!(closed.load(Ordering::SeqCst), 3);
    logs.assert_contains("returning empty string");
    // The partial content is logged for diagnosis
    logs.assert_contains("Loading");
}

#[tokio::test]
async fn test_missing_ready_selector_yields_empty() {
    let renderer = FakeRenderer::new()
        .page("https://blocked.example/", "<html>Access denied</html>")
        .page("https://ok.example/", "<table id=\"gridTable\"></table>");
    let orchestrator = FetchOrchestrator::new(Arc::new(renderer), &no_jitter());

    let pages = orchestrator
        .fetch_pages(
            &urls(&["https://blocked.example/", "https://ok.example/"]),
            "#gridTable",
            Duration::from_secs(1),
        )
        .await
        .unwrap();

    assert_eq!(pages[0], "");
    assert!(pages[1].contains("gridTable"));
}

#[tokio::test]
async fn test_launch_failure_is_error() {
    let orchestrator = FetchOrchestrator::new(Arc::new(FailingRenderer), &no_jitter());

    let err = orchestrator
        .fetch_pages(&urls(&["https://a.example/"]), "#ready", Duration::from_secs(1))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("browser executable not found"));
}

#[tokio::test]
async fn test_one_launch_per_batch() {
    let renderer = FakeRenderer::new()
        .page("https://a.example/", "<p id=\"ready\"></p>")
        .page("https://b.example/", "<p id=\"ready\"></p>");
    let launches = Arc::clone(&renderer.launches);
    let orchestrator = FetchOrchestrator::new(Arc::new(renderer), &no_jitter());

    orchestrator
        .fetch_pages(
            &urls(&["https://a.example/", "https://b.example/"]),
            "#ready",
            Duration::from_secs(1),
        )
        .await
        .unwrap();

    assert_eq!(launches.load(Ordering::SeqCst), 1);
}
