//! State machine walks against a stub broker and a stub tunnel driver.
//!
//! The stub broker speaks the real control-plane wire contract; the stub
//! driver stands in for the SSH dial so the ladder can be exercised
//! without a peer.

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use burrow_agent::{
    AgentError, ConnectionContext, ConnectionMachine, ConnectionState, TargetInfo, TunnelDriver,
};
use burrow_proto::{
    AccountCheckRequest, AccountCheckResponse, MessageResponse, NodeNameRequest,
    ProvideProxyRequest, RandomPortResponse,
};

struct StubBroker {
    valid: AtomicBool,
    port_status: AtomicU16,
    provide_status: AtomicU16,
    disconnect_status: AtomicU16,
    next_port: AtomicU16,
    last_provide: Mutex<Option<ProvideProxyRequest>>,
    disconnects: AtomicUsize,
}

impl StubBroker {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            valid: AtomicBool::new(true),
            port_status: AtomicU16::new(200),
            provide_status: AtomicU16::new(200),
            disconnect_status: AtomicU16::new(200),
            next_port: AtomicU16::new(40000),
            last_provide: Mutex::new(None),
            disconnects: AtomicUsize::new(0),
        })
    }
}

async fn stub_check(
    State(stub): State<Arc<StubBroker>>,
    Json(_request): Json<AccountCheckRequest>,
) -> Json<AccountCheckResponse> {
    Json(AccountCheckResponse {
        valid: stub.valid.load(Ordering::Relaxed),
    })
}

async fn stub_port(State(stub): State<Arc<StubBroker>>) -> Response {
    if stub.port_status.load(Ordering::Relaxed) == 503 {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    Json(RandomPortResponse {
        port: stub.next_port.fetch_add(1, Ordering::Relaxed),
    })
    .into_response()
}

async fn stub_provide(
    State(stub): State<Arc<StubBroker>>,
    Json(request): Json<ProvideProxyRequest>,
) -> Response {
    *stub.last_provide.lock().unwrap() = Some(request);
    if stub.provide_status.load(Ordering::Relaxed) != 200 {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    Json(MessageResponse {
        message: "provisioning".to_string(),
    })
    .into_response()
}

async fn stub_disconnect(
    State(stub): State<Arc<StubBroker>>,
    Json(_request): Json<NodeNameRequest>,
) -> Response {
    stub.disconnects.fetch_add(1, Ordering::Relaxed);
    if stub.disconnect_status.load(Ordering::Relaxed) != 200 {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    Json(MessageResponse {
        message: "disconnected".to_string(),
    })
    .into_response()
}

async fn spawn_stub_broker(stub: Arc<StubBroker>) -> u16 {
    let app = Router::new()
        .route("/node/account/check", get(stub_check).post(stub_check))
        .route("/port/random", get(stub_port))
        .route("/proxy/provide", post(stub_provide))
        .route("/node/disconnect", post(stub_disconnect))
        .with_state(stub);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

/// Driver standing in for the SSH dial: fails a set number of times, then
/// records a fixed reverse-tunnel port and reports success.
struct StubDriver {
    fail_times: AtomicUsize,
    tunnel_port: u16,
}

impl StubDriver {
    fn ok(tunnel_port: u16) -> Arc<Self> {
        Arc::new(Self {
            fail_times: AtomicUsize::new(0),
            tunnel_port,
        })
    }

    fn failing_once(tunnel_port: u16) -> Arc<Self> {
        Arc::new(Self {
            fail_times: AtomicUsize::new(1),
            tunnel_port,
        })
    }
}

#[async_trait]
impl TunnelDriver for StubDriver {
    async fn establish(
        &self,
        _target: TargetInfo,
        ctx: Arc<RwLock<ConnectionContext>>,
    ) -> Result<(), AgentError> {
        if self.fail_times.load(Ordering::Relaxed) > 0 {
            self.fail_times.fetch_sub(1, Ordering::Relaxed);
            return Err(AgentError::TunnelSetupFailed("no route to broker".into()));
        }
        ctx.write().unwrap().remote_tunnel_port = Some(self.tunnel_port);
        Ok(())
    }
}

fn configured_machine(driver: Arc<dyn TunnelDriver>, broker_port: u16) -> ConnectionMachine {
    let machine = ConnectionMachine::new(driver, broker_port);
    machine.set_info(burrow_proto::NodeInfoRequest {
        server_host: "127.0.0.1".to_string(),
        server_ssh_port: 2222,
        node_name: "kitchen-pi".to_string(),
        node_password: "hunter2".to_string(),
    });
    machine
}

async fn wait_for(machine: &ConnectionMachine, want: ConnectionState) {
    for _ in 0..200 {
        if machine.state() == want {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("state never reached {want:?}, still {:?}", machine.state());
}

/// Climb from Disconnected to ProxyEstablished with everything healthy.
async fn climb_to_top(machine: &ConnectionMachine) {
    machine.proceed().await.unwrap();
    wait_for(machine, ConnectionState::ReverseTunnelEstablished).await;
    machine.proceed().await.unwrap();
    machine.proceed().await.unwrap();
    assert_eq!(machine.state(), ConnectionState::ProxyEstablished);
}

#[tokio::test]
async fn full_proceed_ladder_reaches_the_top() {
    let stub = StubBroker::new();
    let broker_port = spawn_stub_broker(stub.clone()).await;
    let machine = configured_machine(StubDriver::ok(50022), broker_port);

    let after = machine.proceed().await.unwrap();
    assert!(after.level() >= 1, "left Disconnected, got {after:?}");
    wait_for(&machine, ConnectionState::ReverseTunnelEstablished).await;

    assert_eq!(
        machine.proceed().await.unwrap(),
        ConnectionState::AwaitingProxy
    );
    assert_eq!(
        machine.proceed().await.unwrap(),
        ConnectionState::ProxyEstablished
    );

    let provide = stub.last_provide.lock().unwrap().clone().unwrap();
    assert_eq!(provide.node_name, "kitchen-pi");
    assert_eq!(provide.node_password, "hunter2");
    assert_eq!(provide.remote_ssh_port, 50022);
    assert_eq!(provide.proxy_port, 40000);

    // Terminal state is a fixed point.
    assert_eq!(
        machine.proceed().await.unwrap(),
        ConnectionState::ProxyEstablished
    );
}

#[tokio::test]
async fn turn_back_walks_down_one_level_at_a_time() {
    let stub = StubBroker::new();
    let broker_port = spawn_stub_broker(stub.clone()).await;
    let machine = configured_machine(StubDriver::ok(50022), broker_port);
    climb_to_top(&machine).await;

    let ladder = [
        ConnectionState::AwaitingProxy,
        ConnectionState::ReverseTunnelEstablished,
        ConnectionState::AwaitingReverseTunnel,
        ConnectionState::Disconnected,
    ];
    for want in ladder {
        assert_eq!(machine.turn_back().await.unwrap(), want);
    }

    // Only the top step talks to the broker.
    assert_eq!(stub.disconnects.load(Ordering::Relaxed), 1);

    // And the bottom is a no-op.
    assert_eq!(
        machine.turn_back().await.unwrap(),
        ConnectionState::Disconnected
    );
    assert_eq!(stub.disconnects.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn rejected_account_stays_disconnected() {
    let stub = StubBroker::new();
    stub.valid.store(false, Ordering::Relaxed);
    let broker_port = spawn_stub_broker(stub).await;
    let machine = configured_machine(StubDriver::ok(50022), broker_port);

    let err = machine.proceed().await.unwrap_err();
    assert!(matches!(err, AgentError::AuthenticationRejected(_)));
    assert_eq!(machine.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn port_exhaustion_is_retryable() {
    let stub = StubBroker::new();
    let broker_port = spawn_stub_broker(stub.clone()).await;
    let machine = configured_machine(StubDriver::ok(50022), broker_port);

    machine.proceed().await.unwrap();
    wait_for(&machine, ConnectionState::ReverseTunnelEstablished).await;
    machine.proceed().await.unwrap();

    stub.port_status.store(503, Ordering::Relaxed);
    let err = machine.proceed().await.unwrap_err();
    assert!(matches!(err, AgentError::ResourceExhausted));
    assert_eq!(machine.state(), ConnectionState::AwaitingProxy);

    stub.port_status.store(200, Ordering::Relaxed);
    assert_eq!(
        machine.proceed().await.unwrap(),
        ConnectionState::ProxyEstablished
    );
}

#[tokio::test]
async fn provisioning_failure_leaves_state_in_place() {
    let stub = StubBroker::new();
    stub.provide_status.store(500, Ordering::Relaxed);
    let broker_port = spawn_stub_broker(stub).await;
    let machine = configured_machine(StubDriver::ok(50022), broker_port);

    machine.proceed().await.unwrap();
    wait_for(&machine, ConnectionState::ReverseTunnelEstablished).await;
    machine.proceed().await.unwrap();

    let err = machine.proceed().await.unwrap_err();
    assert!(matches!(err, AgentError::ControlPlane(_)));
    assert_eq!(machine.state(), ConnectionState::AwaitingProxy);
}

#[tokio::test]
async fn teardown_failure_holds_at_the_top() {
    let stub = StubBroker::new();
    let broker_port = spawn_stub_broker(stub.clone()).await;
    let machine = configured_machine(StubDriver::ok(50022), broker_port);
    climb_to_top(&machine).await;

    stub.disconnect_status.store(500, Ordering::Relaxed);
    let err = machine.turn_back().await.unwrap_err();
    assert!(matches!(err, AgentError::TeardownFailed(_)));
    assert_eq!(machine.state(), ConnectionState::ProxyEstablished);

    stub.disconnect_status.store(200, Ordering::Relaxed);
    assert_eq!(
        machine.turn_back().await.unwrap(),
        ConnectionState::AwaitingProxy
    );
}

#[tokio::test]
async fn setup_failure_leaves_awaiting_and_a_retry_recovers() {
    let stub = StubBroker::new();
    let broker_port = spawn_stub_broker(stub).await;
    let machine = configured_machine(StubDriver::failing_once(50022), broker_port);

    machine.proceed().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(machine.state(), ConnectionState::AwaitingReverseTunnel);

    // The failed attempt is done, so another proceed relaunches.
    machine.proceed().await.unwrap();
    wait_for(&machine, ConnectionState::ReverseTunnelEstablished).await;
}
