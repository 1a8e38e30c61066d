//! Shutdown ordering against a live listener.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::get;
use axum::Router;

mod common;

fn sleeping_api(finished: Arc<AtomicUsize>, sleep: Duration) -> Router {
    Router::new()
        .route(
            "/api/v1/namespaces/{ns}/jobs",
            get(move || {
                let finished = finished.clone();
                async move {
                    tokio::time::sleep(sleep).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    "done"
                }
            }),
        )
        .route("/api/v1/namespaces/{ns}/pods", get(|| async { "pods" }))
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never became true");
}

#[tokio::test]
async fn test_done_waits_for_in_flight_requests() {
    let addr: SocketAddr = "127.0.0.1:28311".parse().unwrap();
    let finished = Arc::new(AtomicUsize::new(0));
    let running = common::start_server(
        common::test_config(addr),
        sleeping_api(finished.clone(), Duration::from_millis(500)),
    )
    .await;

    let client = common::http_client();
    let mut requests = Vec::new();
    for _ in 0..3 {
        let client = client.clone();
        requests.push(tokio::spawn(async move {
            client
                .get(format!("http://{}/api/v1/namespaces/dev/jobs", addr))
                .bearer_auth(common::ALICE_TOKEN)
                .send()
                .await
                .map(|r| r.status().as_u16())
        }));
    }

    let wait_group = running.wait_group.clone();
    wait_until(|| wait_group.len() == 3).await;

    running.stop.trigger();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!running.handle.is_done(), "done fired while requests were in flight");

    tokio::time::timeout(Duration::from_secs(5), running.handle.done())
        .await
        .expect("shutdown did not complete");
    assert_eq!(finished.load(Ordering::SeqCst), 3);

    for request in requests {
        assert_eq!(request.await.unwrap().unwrap(), 200);
    }
    running.handle.wait().await.unwrap();
}

#[tokio::test]
async fn test_listener_serves_through_shutdown_delay() {
    let addr: SocketAddr = "127.0.0.1:28312".parse().unwrap();
    let mut config = common::test_config(addr);
    config.timeouts.shutdown_delay_secs = 1;
    let running = common::start_server(
        config,
        sleeping_api(Arc::new(AtomicUsize::new(0)), Duration::ZERO),
    )
    .await;
    let client = common::http_client();
    let url = format!("http://{}/api/v1/namespaces/dev/pods", addr);

    let started = Instant::now();
    running.stop.trigger();
    running.stop.trigger();

    let response = client
        .get(&url)
        .bearer_auth(common::ALICE_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    tokio::time::timeout(Duration::from_secs(5), running.handle.stopped())
        .await
        .expect("listener never stopped");
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert!(client.get(&url).send().await.is_err());

    tokio::time::timeout(Duration::from_secs(5), running.handle.done())
        .await
        .expect("shutdown did not complete");
}

#[tokio::test]
async fn test_requests_after_drain_are_rejected() {
    let addr: SocketAddr = "127.0.0.1:28313".parse().unwrap();
    let running = common::start_server(
        common::test_config(addr),
        sleeping_api(Arc::new(AtomicUsize::new(0)), Duration::ZERO),
    )
    .await;

    running.wait_group.wait().await;
    assert!(running.wait_group.is_draining());

    let response = common::http_client()
        .get(format!("http://{}/api/v1/namespaces/dev/pods", addr))
        .bearer_auth(common::ALICE_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 503);
    assert_eq!(response.headers()["retry-after"], "1");

    running.stop.trigger();
    tokio::time::timeout(Duration::from_secs(5), running.handle.done())
        .await
        .expect("shutdown did not complete");
}
