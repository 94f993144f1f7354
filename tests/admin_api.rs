//! Admin API tests.

use reqwest::StatusCode;
use serde_json::Value;

use valkey_gateway::resilience::CircuitState;
use valkey_gateway::store::Fault;

mod common;

#[tokio::test]
async fn test_admin_requires_bearer_token() {
    let gateway = common::TestGateway::start(common::test_config()).await;
    let client = common::client();

    let res = client.get(gateway.url("/admin/status")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(gateway.url("/admin/status"))
        .bearer_auth("wrong-key")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(gateway.url("/admin/status"))
        .bearer_auth(common::ADMIN_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "operational");
    assert_eq!(body["endpoint"], "memory");
    assert_eq!(body["circuit"], "closed");

    gateway.stop().await;
}

#[tokio::test]
async fn test_admin_routes_absent_when_disabled() {
    let mut config = common::test_config();
    config.admin.enabled = false;
    let gateway = common::TestGateway::start(config).await;

    let res = common::client()
        .get(gateway.url("/admin/status"))
        .bearer_auth(common::ADMIN_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    gateway.stop().await;
}

#[tokio::test]
async fn test_pool_and_telemetry_views() {
    let gateway = common::TestGateway::start(common::test_config()).await;
    let client = common::client();
    gateway.cache.put("k", "v", None).await.unwrap();
    gateway.cache.get("k").await.unwrap();

    let pool: Value = client
        .get(gateway.url("/admin/pool"))
        .bearer_auth(common::ADMIN_KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(pool["max_size"], 4);
    assert_eq!(pool["leased"], 0);
    assert_eq!(pool["acquired"], 2);

    let telemetry: Value = client
        .get(gateway.url("/admin/telemetry"))
        .bearer_auth(common::ADMIN_KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let commands = telemetry["commands"].as_array().unwrap();
    let get = commands.iter().find(|c| c["command"] == "get").unwrap();
    assert_eq!(get["outcomes"]["success"], 1);
    assert_eq!(get["latency"]["count"], 1);

    gateway.stop().await;
}

#[tokio::test]
async fn test_circuit_reset() {
    let mut config = common::test_config();
    config.retries.enabled = false;
    config.circuit_breaker.minimum_calls = 2;
    config.circuit_breaker.window_size = 2;
    config.circuit_breaker.cooldown_ms = 60_000;
    let gateway = common::TestGateway::start(config).await;
    let client = common::client();

    gateway.store.inject_many(Fault::Transient, 2);
    let _ = gateway.cache.get("k").await;
    let _ = gateway.cache.get("k").await;
    assert_eq!(gateway.breaker.state(), CircuitState::Open);

    let circuit: Value = client
        .get(gateway.url("/admin/circuit"))
        .bearer_auth(common::ADMIN_KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(circuit["state"], "open");

    let res = client
        .post(gateway.url("/admin/circuit/reset"))
        .bearer_auth(common::ADMIN_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let circuit: Value = res.json().await.unwrap();
    assert_eq!(circuit["state"], "closed");

    assert_eq!(gateway.breaker.state(), CircuitState::Closed);
    assert_eq!(gateway.cache.get("k").await, Ok(None));

    gateway.stop().await;
}
