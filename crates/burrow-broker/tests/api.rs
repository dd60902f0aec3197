//! Integration tests for the broker control plane.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use burrow_broker::{BrokerConfig, BrokerServer, SshCredentials, DEFAULT_PORT_RANGE};
use burrow_proto::{
    AccountCheckResponse, MessageResponse, NodeStatusResponse, RandomPortResponse,
};
use serde_json::json;
use tower::ServiceExt; // For `oneshot` method

/// Broker on an in-memory registry. Nothing listens on the SSH side.
async fn create_test_server() -> BrokerServer {
    let config = BrokerConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        database_url: "sqlite::memory:".to_string(),
        ssh: SshCredentials {
            username: "tunnel".to_string(),
            password: "tunnel-secret".to_string(),
        },
    };

    BrokerServer::new(config)
        .await
        .expect("failed to assemble broker")
}

async fn send_json(
    app: &Router,
    method: &str,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, Vec<u8>) {
    let request = Request::builder()
        .uri(uri)
        .method(method)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, bytes.to_vec())
}

async fn register(app: &Router, name: &str, password: &str, service_port: u16) -> StatusCode {
    let (status, _) = send_json(
        app,
        "POST",
        "/node/account",
        json!({
            "node_name": name,
            "node_password": password,
            "service_port": service_port,
        }),
    )
    .await;
    status
}

#[tokio::test]
async fn account_check_distinguishes_credentials() {
    let server = create_test_server().await;
    let app = server.build_router();

    assert_eq!(register(&app, "alpha", "hunter2", 3000).await, StatusCode::OK);

    let (status, body) = send_json(
        &app,
        "GET",
        "/node/account/check",
        json!({"node_name": "alpha", "node_password": "hunter2"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let check: AccountCheckResponse = serde_json::from_slice(&body).unwrap();
    assert!(check.valid);

    for wrong in [
        json!({"node_name": "alpha", "node_password": "hunter3"}),
        json!({"node_name": "beta", "node_password": "hunter2"}),
    ] {
        let (status, body) = send_json(&app, "GET", "/node/account/check", wrong).await;
        assert_eq!(status, StatusCode::OK);
        let check: AccountCheckResponse = serde_json::from_slice(&body).unwrap();
        assert!(!check.valid);
    }
}

#[tokio::test]
async fn duplicate_registration_is_rejected() {
    let server = create_test_server().await;
    let app = server.build_router();

    assert_eq!(register(&app, "alpha", "one", 3000).await, StatusCode::OK);
    assert_eq!(
        register(&app, "alpha", "two", 3001).await,
        StatusCode::CONFLICT
    );
}

#[tokio::test]
async fn random_ports_are_free_and_distinct() {
    let server = create_test_server().await;
    let app = server.build_router();

    let mut ports = Vec::new();
    for _ in 0..2 {
        let request = Request::builder()
            .uri("/port/random")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let reply: RandomPortResponse = serde_json::from_slice(&body).unwrap();
        assert!(DEFAULT_PORT_RANGE.contains(&reply.port));

        // Reserved for us, not held open.
        let probe = std::net::TcpListener::bind(("127.0.0.1", reply.port));
        assert!(probe.is_ok(), "port {} was not free", reply.port);
        ports.push(reply.port);
    }
    assert_ne!(ports[0], ports[1]);
}

#[tokio::test]
async fn node_check_reports_connection_state() {
    let server = create_test_server().await;
    let store = server.store();
    let app = server.build_router();

    assert_eq!(register(&app, "alpha", "pw", 8080).await, StatusCode::OK);

    let (status, body) = send_json(&app, "GET", "/node/check", json!({"node_name": "alpha"})).await;
    assert_eq!(status, StatusCode::OK);
    let node: NodeStatusResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(node.node_name, "alpha");
    assert_eq!(node.service_port, 8080);
    assert!(!node.connection_valid);
    assert_eq!(node.proxy_port, None);

    store.mark_connected("alpha", 12345).await.unwrap();
    let (_, body) = send_json(&app, "GET", "/node/check", json!({"node_name": "alpha"})).await;
    let node: NodeStatusResponse = serde_json::from_slice(&body).unwrap();
    assert!(node.connection_valid);
    assert_eq!(node.proxy_port, Some(12345));

    let (status, _) = send_json(&app, "GET", "/node/check", json!({"node_name": "ghost"})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn disconnect_clears_connection() {
    let server = create_test_server().await;
    let store = server.store();
    let app = server.build_router();

    assert_eq!(register(&app, "alpha", "pw", 8080).await, StatusCode::OK);
    store.mark_connected("alpha", 23456).await.unwrap();

    let (status, body) =
        send_json(&app, "POST", "/node/disconnect", json!({"node_name": "alpha"})).await;
    assert_eq!(status, StatusCode::OK);
    let ack: MessageResponse = serde_json::from_slice(&body).unwrap();
    assert!(ack.message.contains("alpha"));

    assert!(!store.connection_valid("alpha").await.unwrap());

    let (status, _) =
        send_json(&app, "POST", "/node/disconnect", json!({"node_name": "ghost"})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn provide_proxy_rejects_bad_credentials() {
    let server = create_test_server().await;
    let app = server.build_router();

    assert_eq!(register(&app, "alpha", "pw", 8080).await, StatusCode::OK);

    let (status, _) = send_json(
        &app,
        "POST",
        "/proxy/provide",
        json!({
            "node_name": "alpha",
            "node_password": "wrong",
            "remote_ssh_port": 50022,
            "proxy_port": 50080,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn provide_proxy_acks_then_fails_in_background() {
    let server = create_test_server().await;
    let store = server.store();
    let app = server.build_router();

    assert_eq!(register(&app, "alpha", "pw", 8080).await, StatusCode::OK);

    // A port nothing listens on: bind one, note it, drop it.
    let dead_port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let (status, body) = send_json(
        &app,
        "POST",
        "/proxy/provide",
        json!({
            "node_name": "alpha",
            "node_password": "pw",
            "remote_ssh_port": dead_port,
            "proxy_port": 50080,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let ack: MessageResponse = serde_json::from_slice(&body).unwrap();
    assert!(ack.message.contains("alpha"));

    // The SSH dial hits a closed port, so the supervisor gives up without
    // ever marking the node connected.
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    assert!(!store.connection_valid("alpha").await.unwrap());
}
