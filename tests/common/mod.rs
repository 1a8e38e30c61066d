//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use apiserver_kit::audit::{AuditEvent, AuditSink};
use apiserver_kit::config::schema::{AuthorizationMode, PolicyRuleConfig, TokenConfig};
use apiserver_kit::http::{ApiServer, ServerComponents};
use apiserver_kit::lifecycle::{SafeWaitGroup, ShutdownHandle, StopSignal};
use apiserver_kit::ServerConfig;
use axum::Router;

pub const ALICE_TOKEN: &str = "alice-token";
pub const BOB_TOKEN: &str = "bob-token";

/// Alice may do anything; Bob may only read users.
pub fn test_config(addr: SocketAddr) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.listener.bind_address = addr.to_string();
    config.timeouts.request_secs = 5;
    config.timeouts.shutdown_timeout_secs = 5;
    config.authentication.tokens = vec![
        TokenConfig {
            token: ALICE_TOKEN.into(),
            user: "alice".into(),
            groups: vec!["admins".into()],
            ..Default::default()
        },
        TokenConfig {
            token: BOB_TOKEN.into(),
            user: "bob".into(),
            ..Default::default()
        },
    ];
    config.authorization.mode = AuthorizationMode::Policy;
    config.authorization.policy = vec![
        PolicyRuleConfig {
            group: Some("admins".into()),
            resources: vec!["*".into()],
            ..Default::default()
        },
        PolicyRuleConfig {
            group: Some("admins".into()),
            non_resource_paths: vec!["*".into()],
            ..Default::default()
        },
        PolicyRuleConfig {
            user: Some("bob".into()),
            readonly: true,
            resources: vec!["users".into()],
            ..Default::default()
        },
    ];
    config
}

/// Audit sink that keeps every event in memory.
#[derive(Default)]
pub struct MemorySink {
    pub events: Mutex<Vec<AuditEvent>>,
}

impl AuditSink for MemorySink {
    fn process(&self, event: &AuditEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

impl MemorySink {
    pub fn codes(&self) -> Vec<Option<u16>> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.response_code)
            .collect()
    }
}

/// Build a server for `config` around `api`, with an in-memory audit sink.
pub fn build_server(config: ServerConfig, api: Router) -> (ApiServer, Arc<MemorySink>) {
    let mut components = ServerComponents::from_config(&config, SafeWaitGroup::new());
    let sink = Arc::new(MemorySink::default());
    components.chain.audit_sink = Some(sink.clone());
    (ApiServer::new(config, api, components.chain), sink)
}

pub struct RunningServer {
    pub stop: StopSignal,
    pub handle: ShutdownHandle,
    pub audit: Arc<MemorySink>,
    pub wait_group: SafeWaitGroup,
}

/// Start serving `api` on `addr` and wait until it accepts connections.
pub async fn start_server(config: ServerConfig, api: Router) -> RunningServer {
    let addr: SocketAddr = config.listener.bind_address.parse().unwrap();
    let (server, audit) = build_server(config, api);
    let wait_group = server.wait_group();
    let stop = StopSignal::new();
    let handle = server.run(stop.subscribe()).await.unwrap();
    wait_for_port(addr).await;
    RunningServer {
        stop,
        handle,
        audit,
        wait_group,
    }
}

pub async fn wait_for_port(addr: SocketAddr) {
    for _ in 0..50 {
        if tokio::net::TcpStream::connect(addr).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("server at {} never became reachable", addr);
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
