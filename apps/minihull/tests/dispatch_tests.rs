//! End-to-end tests for notification fan-out, install and the server
//! lifecycle.
//!
//! Each fake connector is a real axum server on a loopback port that
//! records what it receives.

#![allow(clippy::unwrap_used, clippy::panic)]

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, Uri},
    routing::get,
};
use minihull::ledger::parse_query;
use minihull::{Config, Direction, Minihull, Platform};
use minihull_core::{Collection, Ident, NotificationBody, Record};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// FAKE CONNECTOR
// =============================================================================

/// A request as seen by a fake connector.
#[derive(Debug, Clone)]
struct Received {
    path: String,
    query: BTreeMap<String, String>,
    headers: HeaderMap,
    body: Value,
}

#[derive(Clone)]
struct ConnectorState {
    manifest: Value,
    status: StatusCode,
    /// How long `/manifest.json` takes to answer.
    delay: Duration,
    received: Arc<Mutex<Vec<Received>>>,
}

struct Connector {
    url: String,
    received: Arc<Mutex<Vec<Received>>>,
}

impl Connector {
    fn received(&self) -> Vec<Received> {
        self.received.lock().unwrap().clone()
    }
}

async fn manifest_handler(State(state): State<ConnectorState>) -> Json<Value> {
    tokio::time::sleep(state.delay).await;
    Json(state.manifest)
}

async fn receive_handler(
    State(state): State<ConnectorState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    state.received.lock().unwrap().push(Received {
        path: uri.path().to_string(),
        query: uri.query().map(parse_query).unwrap_or_default(),
        headers,
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
    });
    state.status
}

/// Start a fake connector answering every POST with `status`.
async fn spawn_connector(manifest: Value, status: StatusCode) -> Connector {
    spawn_slow_connector(manifest, status, Duration::ZERO).await
}

/// Start a fake connector whose manifest takes `delay` to arrive.
async fn spawn_slow_connector(manifest: Value, status: StatusCode, delay: Duration) -> Connector {
    let received = Arc::new(Mutex::new(Vec::new()));
    let state = ConnectorState {
        manifest,
        status,
        delay,
        received: Arc::clone(&received),
    };
    let app = Router::new()
        .route("/manifest.json", get(manifest_handler))
        .fallback(receive_handler)
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Connector {
        url: format!("http://{}", addr),
        received,
    }
}

/// A url nothing listens on.
async fn dead_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

fn record(value: Value) -> Record {
    value.as_object().cloned().unwrap()
}

fn entity_manifest() -> Value {
    json!({
        "subscriptions": [
            {"url": "/notify", "channels": ["user_report:update"]},
            {"url": "/smart-notifier"},
            {"url": "/ship-only", "channels": ["ship:update"]}
        ]
    })
}

async fn add_subscriber(platform: &Platform, id: &str, url: &str, manifest: Value) {
    platform
        .insert(
            Collection::Subscribers,
            record(json!({"id": id, "url": url, "manifest": manifest, "settings": {}})),
        )
        .await
        .unwrap();
}

fn notification(received: &Received) -> NotificationBody {
    serde_json::from_value(received.body.clone()).unwrap()
}

// =============================================================================
// FAN-OUT
// =============================================================================

#[tokio::test]
async fn test_fan_out_issues_one_call_per_subscription() {
    let platform = Platform::new(&Config::default());
    let mut connectors = Vec::new();
    for i in 0..3 {
        let connector = spawn_connector(entity_manifest(), StatusCode::OK).await;
        add_subscriber(&platform, &format!("s{i}"), &connector.url, entity_manifest()).await;
        connectors.push(connector);
    }
    platform
        .insert(Collection::Entities, record(json!({"id": "123"})))
        .await
        .unwrap();

    let (report, dispatch) = platform
        .update_entity(&Ident::id("123"), &record(json!({"foo": "bar"})))
        .await
        .unwrap();

    // 3 subscribers x 2 matching subscriptions
    assert_eq!(dispatch.outcomes.len(), 6);
    assert!(dispatch.is_success());
    assert_eq!(platform.ledger().count(Direction::Outbound), 6);
    assert_eq!(report.changes, record(json!({"foo": [null, "bar"]})));

    for (i, connector) in connectors.iter().enumerate() {
        let received = connector.received();
        let mut paths: Vec<&str> = received.iter().map(|r| r.path.as_str()).collect();
        paths.sort_unstable();
        assert_eq!(paths, vec!["/notify", "/smart-notifier"]);

        for call in &received {
            assert_eq!(
                call.headers
                    .get("x-amz-sns-message-type")
                    .and_then(|v| v.to_str().ok()),
                Some("dummy")
            );
            assert_eq!(call.query.get("ship"), Some(&format!("s{i}")));
            assert_eq!(call.query.get("secret").map(String::as_str), Some("1234"));
            assert_eq!(
                call.query.get("organization").map(String::as_str),
                Some("localhost:8001")
            );
            let body = notification(call);
            assert_eq!(body.kind, "Notification");
            assert_eq!(body.subject, "user_report:update");
            assert_eq!(body.message_id, dispatch.notification_id);
            let payload = body.payload().unwrap();
            assert_eq!(payload["user"]["foo"], json!("bar"));
            assert_eq!(payload["changes"], json!({"foo": [null, "bar"]}));
            assert_eq!(payload["events"], json!([]));
        }
    }

    let stored = platform
        .find(Collection::Entities, &Ident::id("123"))
        .await
        .unwrap();
    assert_eq!(stored.get("foo"), Some(&json!("bar")));
}

#[tokio::test]
async fn test_failing_subscribers_do_not_block_others() {
    let platform = Platform::new(&Config::default());
    let manifest = json!({"subscriptions": [{"url": "/notify"}]});
    let healthy = spawn_connector(manifest.clone(), StatusCode::OK).await;
    let broken = spawn_connector(manifest.clone(), StatusCode::INTERNAL_SERVER_ERROR).await;
    add_subscriber(&platform, "down", &dead_url().await, manifest.clone()).await;
    add_subscriber(&platform, "broken", &broken.url, manifest.clone()).await;
    add_subscriber(&platform, "healthy", &healthy.url, manifest).await;

    let dispatch = platform
        .notify("custom:topic", &json!({"hello": "world"}))
        .await;

    assert_eq!(dispatch.outcomes.len(), 3);
    let failed: Vec<&str> = dispatch
        .failures()
        .map(|o| o.subscriber_id.as_str())
        .collect();
    assert_eq!(failed, vec!["down", "broken"]);
    assert_eq!(dispatch.outcomes[1].status, Some(500));
    assert_eq!(dispatch.outcomes[0].status, None);
    assert_eq!(healthy.received().len(), 1);
    assert_eq!(broken.received().len(), 1);
    // Every attempt is captured, failed or not.
    assert_eq!(platform.ledger().count(Direction::Outbound), 3);
}

#[tokio::test]
async fn test_outbound_ledger_follows_plan_order() {
    let platform = Platform::new(&Config::default());
    let a = spawn_connector(Value::Null, StatusCode::OK).await;
    let b = spawn_connector(Value::Null, StatusCode::OK).await;
    add_subscriber(&platform, "a", &a.url, json!({"subscriptions": [{"url": "/one"}, {"url": "/two"}]})).await;
    add_subscriber(&platform, "b", &b.url, json!({"subscriptions": [{"url": "/three"}]})).await;

    let third = platform.ledger().nth_outbound(3);
    platform.notify("ship:update", &json!({})).await;

    assert_eq!(third.wait_for(WAIT).await.unwrap().path, "/three");
    let paths: Vec<String> = platform
        .ledger()
        .entries(Direction::Outbound)
        .into_iter()
        .map(|e| e.exchange.path)
        .collect();
    assert_eq!(paths, vec!["/one", "/two", "/three"]);
}

#[tokio::test]
async fn test_no_subscribers_settles_immediately() {
    let platform = Platform::new(&Config::default());

    let dispatch = platform.notify("ship:update", &json!({})).await;

    assert!(dispatch.outcomes.is_empty());
    assert!(dispatch.is_success());
}

// =============================================================================
// SUBSCRIBER OPERATIONS
// =============================================================================

#[tokio::test]
async fn test_install_fetches_manifest_and_announces() {
    let platform = Platform::new(&Config::default());
    let manifest = json!({
        "name": "Test Connector",
        "admin": "/admin",
        "subscriptions": [{"url": "/smart-notifier"}]
    });
    let connector = spawn_connector(manifest.clone(), StatusCode::OK).await;

    let (subscriber, dispatch) = platform.install(&connector.url).await.unwrap();

    assert_eq!(subscriber.get("manifest"), Some(&manifest));
    assert_eq!(subscriber.get("settings"), Some(&json!({})));
    let id = subscriber["id"].as_str().unwrap().to_string();
    assert_eq!(id.len(), 24);
    assert!(dispatch.is_success());

    let outbound = platform.ledger().entries(Direction::Outbound);
    assert_eq!(outbound.len(), 2);
    assert_eq!(outbound[0].method, "GET");
    assert_eq!(outbound[0].path, "/manifest.json");
    assert_eq!(outbound[1].path, "/smart-notifier");

    let received = connector.received();
    assert_eq!(received.len(), 1);
    let body = notification(&received[0]);
    assert_eq!(body.subject, "ship:update");
    assert_eq!(body.payload().unwrap()["id"], json!(id));

    let dashboard = platform.dashboard_url(None).await.unwrap().unwrap();
    assert!(dashboard.starts_with(&format!("{}/admin?", connector.url)));
    assert!(dashboard.contains(&format!("ship={id}")));
    assert!(dashboard.contains("secret=1234"));
}

#[tokio::test]
async fn test_dashboard_url_encodes_signing_values() {
    let config = Config {
        secret: "a+b&c=d e".to_string(),
        ..Config::default()
    };
    let platform = Platform::new(&config);
    add_subscriber(&platform, "s1", "http://connector.test", json!({"admin": "/admin"})).await;

    let dashboard = platform.dashboard_url(Some("s1")).await.unwrap().unwrap();

    let (base, query) = dashboard.split_once('?').unwrap();
    assert_eq!(base, "http://connector.test/admin");
    let query = parse_query(query);
    assert_eq!(query.get("secret").map(String::as_str), Some("a+b&c=d e"));
    assert_eq!(query.get("organization").map(String::as_str), Some("localhost:8001"));
    assert_eq!(query.get("ship").map(String::as_str), Some("s1"));
}

#[tokio::test]
async fn test_install_of_unreachable_connector_fails() {
    let platform = Platform::new(&Config::default());

    let result = platform.install(&dead_url().await).await;

    assert!(matches!(
        result,
        Err(minihull_core::MinihullError::OutboundFailed(_))
    ));
    assert!(platform.all(Collection::Subscribers).await.is_empty());
    // The failed manifest fetch is still captured.
    assert_eq!(platform.ledger().count(Direction::Outbound), 1);
}

#[tokio::test]
async fn test_update_subscriber_merges_settings_of_first() {
    let platform = Platform::new(&Config::default());
    let manifest = json!({"subscriptions": [{"url": "/notify", "channels": ["ship:update"]}]});
    let connector = spawn_connector(manifest.clone(), StatusCode::OK).await;
    add_subscriber(&platform, "s1", &connector.url, manifest).await;
    platform
        .update_subscriber(None, &record(json!({"api_key": "k", "nested": {"a": 1}})))
        .await
        .unwrap();

    let (subscriber, dispatch) = platform
        .update_subscriber(Some("s1"), &record(json!({"nested": {"b": 2}})))
        .await
        .unwrap();

    assert_eq!(
        subscriber["settings"],
        json!({"api_key": "k", "nested": {"a": 1, "b": 2}})
    );
    assert_eq!(dispatch.outcomes.len(), 1);
    assert_eq!(connector.received().len(), 2);
}

#[tokio::test]
async fn test_batch_points_connector_at_dump() {
    let platform = Platform::new(&Config::default());
    let connector = spawn_connector(Value::Null, StatusCode::OK).await;
    add_subscriber(&platform, "s1", &connector.url, json!({})).await;

    let outcome = platform.batch(None).await.unwrap();

    assert_eq!(outcome.status, 200);
    let received = connector.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].path, "/batch");
    assert_eq!(
        received[0].body,
        json!({"url": "http://localhost:8001/_batch", "format": "json"})
    );
    assert!(received[0].headers.get("x-amz-sns-message-type").is_none());
    assert_eq!(received[0].query.get("ship").map(String::as_str), Some("s1"));
}

#[tokio::test]
async fn test_operations_need_a_subscriber() {
    let platform = Platform::new(&Config::default());

    assert!(matches!(
        platform.batch(None).await,
        Err(minihull_core::MinihullError::RecordNotFound { .. })
    ));
}

// =============================================================================
// MEMBERSHIP AND GROUPS
// =============================================================================

#[tokio::test]
async fn test_enter_and_exit_group_report_matching_groups() {
    let platform = Platform::new(&Config::default());
    let connector = spawn_connector(Value::Null, StatusCode::OK).await;
    add_subscriber(&platform, "s1", &connector.url, json!({"subscriptions": [{"url": "/notify"}]})).await;
    for (id, name) in [("g1", "Leads"), ("g2", "Deals")] {
        platform
            .insert(Collection::Groups, record(json!({"id": id, "name": name})))
            .await
            .unwrap();
    }
    platform
        .insert(Collection::Entities, record(json!({"id": "u1", "email": "a@b.c"})))
        .await
        .unwrap();
    let user = Ident::Match(record(json!({"email": "a@b.c"})));

    platform.enter_group(&user, "g2").await.unwrap();
    platform.enter_group(&user, "ghost").await.unwrap();
    let (report, _) = platform.enter_group(&user, "g1").await.unwrap();
    let names: Vec<&Value> = report.groups.iter().map(|g| &g["name"]).collect();
    assert_eq!(names, vec!["Leads", "Deals"]);
    assert_eq!(report.entity["group_ids"], json!(["g2", "ghost", "g1"]));

    let (report, _) = platform.exit_group(&user, "g2").await.unwrap();
    assert_eq!(report.groups.len(), 1);
    assert_eq!(report.entity["group_ids"], json!(["ghost", "g1"]));

    assert_eq!(connector.received().len(), 4);
    let last = notification(connector.received().last().unwrap());
    assert_eq!(last.payload().unwrap()["segments"][0]["id"], json!("g1"));
}

#[tokio::test]
async fn test_exit_group_compares_loosely() {
    let platform = Platform::new(&Config::default());
    platform
        .insert(
            Collection::Entities,
            record(json!({"id": "u1", "group_ids": [7, "7", "8"]})),
        )
        .await
        .unwrap();

    let (report, _) = platform.exit_group(&Ident::id("u1"), "7").await.unwrap();

    assert_eq!(report.entity["group_ids"], json!(["8"]));
}

#[tokio::test]
async fn test_enter_group_keeps_existing_ids() {
    let platform = Platform::new(&Config::default());
    platform
        .insert(
            Collection::Entities,
            record(json!({"id": "u1", "group_ids": [7, "8", {"legacy": true}]})),
        )
        .await
        .unwrap();

    let (report, _) = platform.enter_group(&Ident::id("u1"), "g1").await.unwrap();
    assert_eq!(
        report.entity["group_ids"],
        json!([7, "8", {"legacy": true}, "g1"])
    );

    let (report, _) = platform.enter_group(&Ident::id("u1"), "8").await.unwrap();
    assert_eq!(report.entity["group_ids"].as_array().unwrap().len(), 4);
    assert!(report.changes.is_empty());
}

#[tokio::test]
async fn test_rename_group_announces_segment_update() {
    let platform = Platform::new(&Config::default());
    let connector = spawn_connector(Value::Null, StatusCode::OK).await;
    add_subscriber(
        &platform,
        "s1",
        &connector.url,
        json!({"subscriptions": [{"url": "/segments", "channels": ["segment:update"]}]}),
    )
    .await;
    platform
        .insert(Collection::Groups, record(json!({"id": "g1", "name": "Leads"})))
        .await
        .unwrap();

    let (group, dispatch) = platform.rename_group("g1", "Hot Leads").await.unwrap();

    assert_eq!(group["name"], json!("Hot Leads"));
    assert!(group.contains_key("updated_at"));
    assert_eq!(dispatch.outcomes.len(), 1);
    let body = notification(&connector.received()[0]);
    assert_eq!(body.subject, "segment:update");
    assert_eq!(body.payload().unwrap()["name"], json!("Hot Leads"));

    assert!(platform.rename_group("nope", "x").await.is_err());
}

// =============================================================================
// SERVER LIFECYCLE
// =============================================================================

#[tokio::test]
async fn test_listen_on_free_port_and_close() {
    let config = Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..Config::default()
    };
    let minihull = Minihull::new(config);

    let addr = minihull.listen(0).await.unwrap();
    assert_ne!(addr.port(), 0);
    assert_eq!(minihull.org_addr(), format!("127.0.0.1:{}", addr.port()));

    let inbound = minihull.ledger().next_inbound_at("/api/v1/");
    let identity: Value = reqwest::get(format!("http://{}/api/v1/", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(identity["domain"], json!(minihull.org_addr()));
    assert_eq!(inbound.wait_for(WAIT).await.unwrap().method, "GET");

    assert!(minihull.listen(0).await.is_err());
    minihull.close().await.unwrap();
    assert!(minihull.local_addr().await.is_none());
    assert!(
        reqwest::get(format!("http://{}/api/v1/", addr))
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_path_waits_follow_arrival_not_completion() {
    let config = Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..Config::default()
    };
    let minihull = Minihull::new(config);
    let addr = minihull.listen(0).await.unwrap();
    let slow = spawn_slow_connector(
        json!({"subscriptions": []}),
        StatusCode::OK,
        Duration::from_millis(400),
    )
    .await;
    let install = format!("http://{}/_ops/install", addr);
    let client = reqwest::Client::new();
    let first = minihull.ledger().next_inbound_at("/_ops/install");

    let slow_call = tokio::spawn({
        let client = client.clone();
        let install = install.clone();
        let url = slow.url.clone();
        async move {
            client
                .post(install)
                .json(&json!({"url": url}))
                .send()
                .await
                .unwrap()
                .status()
        }
    });
    while minihull.ledger().count(Direction::Inbound) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    // Registered while the slow request is still being handled.
    let after_slow = minihull.ledger().next_inbound_at("/_ops/install");

    let fast = client
        .post(&install)
        .json(&json!({"url": dead_url().await}))
        .send()
        .await
        .unwrap();
    assert_eq!(fast.status(), StatusCode::BAD_GATEWAY);

    let first = first.wait_for(WAIT).await.unwrap();
    assert_eq!(first.position, 1);
    assert_eq!(first.body["url"], json!(slow.url));
    let after_slow = after_slow.wait_for(WAIT).await.unwrap();
    assert_eq!(after_slow.position, 2);
    assert_eq!(slow_call.await.unwrap(), StatusCode::OK);

    minihull.close().await.unwrap();
}

#[tokio::test]
async fn test_public_address_override_is_announced() {
    let config = Config {
        host: "127.0.0.1".to_string(),
        public_addr: Some("hull.example:443".to_string()),
        ..Config::default()
    };
    let minihull = Minihull::new(config);
    let connector = spawn_connector(Value::Null, StatusCode::OK).await;
    add_subscriber(&minihull, "s1", &connector.url, json!({"subscriptions": [{"url": "/n"}]})).await;

    minihull.notify("ship:update", &json!({})).await;

    assert_eq!(
        connector.received()[0].query.get("organization").map(String::as_str),
        Some("hull.example:443")
    );
}

// =============================================================================
// SNAPSHOTS
// =============================================================================

#[tokio::test]
async fn test_save_and_load_round_trip_through_directory() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        snapshot_dir: dir.path().to_path_buf(),
        ..Config::default()
    };
    let platform = Platform::new(&config);
    platform
        .insert(Collection::Entities, record(json!({"id": "u1", "name": "Ann"})))
        .await
        .unwrap();
    platform.save("seeded").await.unwrap();

    platform.reset().await;
    assert!(platform.all(Collection::Entities).await.is_empty());

    platform.load("seeded").await.unwrap();
    assert_eq!(platform.list_snapshots().unwrap(), vec!["seeded"]);
    let restored = platform
        .find(Collection::Entities, &Ident::id("u1"))
        .await
        .unwrap();
    assert_eq!(restored["name"], json!("Ann"));
}

#[tokio::test]
async fn test_saves_and_store_writes_interleave() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        snapshot_dir: dir.path().to_path_buf(),
        ..Config::default()
    };
    let platform = Platform::new(&config);
    platform
        .insert(Collection::Entities, record(json!({"id": "u1"})))
        .await
        .unwrap();

    let (saved, inserted) = tokio::join!(
        platform.save("during-write"),
        platform.insert(Collection::Entities, record(json!({"id": "u2"}))),
    );
    saved.unwrap();
    inserted.unwrap();
    assert_eq!(platform.all(Collection::Entities).await.len(), 2);

    // The file holds whichever state the save read, never a torn one.
    platform.load("during-write").await.unwrap();
    let restored = platform.all(Collection::Entities).await.len();
    assert!((1..=2).contains(&restored));
}
