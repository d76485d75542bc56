use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use hostop_broker::{DeviceFileProxy, DeviceRegistry, PolledSet};
use hostop_core::messages::InfraConfig;
use hostop_engine::InstanceManager;
use hostop_settings::HostopSettings;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::devices::serve_devices;
use crate::handlers;
use crate::shutdown::{ShutdownCoordinator, DEFAULT_SHUTDOWN_TIMEOUT};

/// Listener configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
    pub socket_path: PathBuf,
    pub static_dir: PathBuf,
    pub max_message_size: usize,
    pub shutdown_timeout: Duration,
}

impl ServerConfig {
    pub fn from_settings(settings: &HostopSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            http_port: settings.server.http_port,
            socket_path: PathBuf::from(&settings.device.socket_path),
            static_dir: PathBuf::from(&settings.server.static_dir),
            max_message_size: settings.server.max_message_size,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub devices: Arc<DeviceRegistry>,
    pub polled: Arc<PolledSet>,
    pub instances: Arc<InstanceManager>,
    pub proxy: Arc<DeviceFileProxy>,
    pub infra: Arc<InfraConfig>,
    pub wait_timeout: Duration,
    pub max_message_size: usize,
}

impl AppState {
    /// Fresh registries around an existing instance manager.
    pub fn new(settings: &HostopSettings, instances: Arc<InstanceManager>) -> Self {
        Self {
            devices: Arc::new(DeviceRegistry::new()),
            polled: Arc::new(PolledSet::new()),
            instances,
            proxy: Arc::new(DeviceFileProxy::new(&settings.server.intercept_dir)),
            infra: Arc::new(InfraConfig::from_urls(
                settings.device.ice_servers.iter().cloned(),
            )),
            wait_timeout: Duration::from_secs(settings.server.wait_operation_secs),
            max_message_size: settings.server.max_message_size,
        }
    }
}

/// Build the router. Unmatched paths are served from `static_dir`.
pub fn build_router(state: AppState, static_dir: &Path) -> Router {
    // `:forward` and `:wait` are literal segments, not captures.
    Router::new()
        .without_v07_checks()
        .route(
            "/devices",
            post(handlers::create_cvd).get(handlers::list_devices),
        )
        .route("/devices/{id}", get(handlers::get_device))
        .route("/devices/{id}/files/{*path}", get(handlers::device_files))
        .route("/operations", get(handlers::list_operations))
        .route("/operations/{name}", get(handlers::get_operation))
        .route("/operations/{name}/:wait", post(handlers::wait_operation))
        .route(
            "/polled_connections",
            post(handlers::create_polled_connection),
        )
        .route(
            "/polled_connections/{id}/:forward",
            post(handlers::forward_polled),
        )
        .route(
            "/polled_connections/{id}/messages",
            get(handlers::polled_messages),
        )
        .route("/infra_config", get(handlers::infra_config))
        .route("/connect_client", get(handlers::connect_client))
        .route("/_debug/statusz", get(handlers::statusz))
        .fallback_service(ServeDir::new(static_dir))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Bind the HTTP listener and the device socket and start serving both.
pub async fn start(config: ServerConfig, state: AppState) -> std::io::Result<ServerHandle> {
    let device_listener = hostop_transport::bind_device_socket(&config.socket_path)?;
    let http_listener =
        tokio::net::TcpListener::bind((config.host.as_str(), config.http_port)).await?;
    let addr = http_listener.local_addr()?;

    let coordinator = ShutdownCoordinator::new();

    coordinator.track(tokio::spawn(serve_devices(
        device_listener,
        Arc::clone(&state.devices),
        Arc::clone(&state.infra),
        config.max_message_size,
        coordinator.token(),
    )));

    let router = build_router(state, &config.static_dir);
    let token = coordinator.token();
    coordinator.track(tokio::spawn(async move {
        let result = axum::serve(http_listener, router)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "HTTP server failed");
        }
    }));

    info!(
        addr = %addr,
        socket = %config.socket_path.display(),
        "operator server started"
    );

    Ok(ServerHandle {
        addr,
        socket_path: config.socket_path,
        shutdown_timeout: config.shutdown_timeout,
        coordinator,
    })
}

/// Running server. Dropping it leaves the tasks running; call
/// [`ServerHandle::shutdown`] to stop them.
pub struct ServerHandle {
    pub addr: SocketAddr,
    pub socket_path: PathBuf,
    shutdown_timeout: Duration,
    coordinator: ShutdownCoordinator,
}

impl ServerHandle {
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Stop accepting, drain tasks and remove the device socket file.
    pub async fn shutdown(self) {
        self.coordinator
            .graceful_shutdown(self.shutdown_timeout)
            .await;
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            tracing::debug!(error = %e, "device socket already removed");
        }
        info!("operator server stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use hostop_broker::Device;
    use hostop_core::api::CreateCvdRequest;
    use hostop_engine::{OperationRegistry, Procedure, ProcedureBuilder};
    use hostop_transport::{MessageSink, TransportError};
    use serde_json::{json, Value};
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    struct NoopBuilder;

    impl ProcedureBuilder for NoopBuilder {
        fn build(&self, _req: &CreateCvdRequest) -> Procedure {
            Procedure::default()
        }
    }

    /// Device transport that hands every message to a channel.
    struct ChannelSink(mpsc::UnboundedSender<Value>);

    #[async_trait]
    impl MessageSink for ChannelSink {
        async fn send(&self, value: &Value) -> hostop_transport::Result<()> {
            self.0.send(value.clone()).map_err(|_| TransportError::Closed)
        }

        async fn close(&self) {}
    }

    fn state(static_dir: &Path) -> AppState {
        let mut settings = HostopSettings::default();
        settings.server.wait_operation_secs = 1;
        settings.server.intercept_dir = static_dir.display().to_string();
        let instances = Arc::new(InstanceManager::new(
            Arc::new(OperationRegistry::new()),
            Arc::new(NoopBuilder),
        ));
        AppState::new(&settings, instances)
    }

    fn attach_device(state: &AppState, id: &str) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        let device = Device::new(id, 0, Some(json!({"kind": "test"})), Arc::new(ChannelSink(tx)));
        assert!(state.devices.register(Arc::new(device)));
        rx
    }

    async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let body = match body {
            Some(v) => Body::from(v.to_string()),
            None => Body::empty(),
        };
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        (status, value)
    }

    #[tokio::test]
    async fn statusz_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let router = build_router(state(dir.path()), dir.path());
        let (status, body) = call(&router, "GET", "/_debug/statusz", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!("ok"));
    }

    #[tokio::test]
    async fn create_cvd_then_wait() {
        let dir = tempfile::tempdir().unwrap();
        let router = build_router(state(dir.path()), dir.path());

        let (status, op) = call(
            &router,
            "POST",
            "/devices",
            Some(json!({
                "build_info": {"build_id": "1", "target": "t"},
                "fetch_cvd_build_id": "2"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(op["done"], false);
        let name = op["name"].as_str().unwrap().to_owned();

        let (status, waited) =
            call(&router, "POST", &format!("/operations/{name}/:wait"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(waited, json!({"name": name, "done": true, "result": {}}));

        let (_, got) = call(&router, "GET", &format!("/operations/{name}"), None).await;
        assert_eq!(got, waited);
    }

    #[tokio::test]
    async fn invalid_create_is_400_and_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(dir.path());
        let router = build_router(st.clone(), dir.path());

        let (status, body) = call(
            &router,
            "POST",
            "/devices",
            Some(json!({"build_info": null, "fetch_cvd_build_id": "2"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("build_info"));
        assert!(st.instances.operations().is_empty());

        let (status, _) = call(&router, "POST", "/devices", Some(json!("garbage"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_operation_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let router = build_router(state(dir.path()), dir.path());
        let (status, body) = call(&router, "GET", "/operations/op_nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());

        let (status, _) = call(&router, "POST", "/operations/op_nope/:wait", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn wait_deadline_is_503() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(dir.path());
        let op = st.instances.operations().create().unwrap();
        let router = build_router(st, dir.path());

        let (status, _) =
            call(&router, "POST", &format!("/operations/{}/:wait", op.name), None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn list_operations_shows_running_only() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(dir.path());
        let ops = st.instances.operations().clone();
        let running = ops.create().unwrap();
        let done = ops.create().unwrap();
        ops.complete(&done.name, hostop_core::OperationResult::ok())
            .unwrap();
        let router = build_router(st, dir.path());

        let (_, body) = call(&router, "GET", "/operations", None).await;
        assert_eq!(body, json!({"operations": [{"name": running.name, "done": false}]}));
    }

    #[tokio::test]
    async fn devices_are_listed_and_described() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(dir.path());
        let _rx = attach_device(&st, "cvd-1");
        let router = build_router(st, dir.path());

        let (_, ids) = call(&router, "GET", "/devices", None).await;
        assert_eq!(ids, json!(["cvd-1"]));

        let (status, desc) = call(&router, "GET", "/devices/cvd-1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            desc,
            json!({"device_id": "cvd-1", "device_port": 0, "device_info": {"kind": "test"}})
        );

        let (status, _) = call(&router, "GET", "/devices/ghost", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn polled_connection_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(dir.path());
        let mut device_rx = attach_device(&st, "cvd-1");
        let router = build_router(st.clone(), dir.path());

        let (status, conn) = call(
            &router,
            "POST",
            "/polled_connections",
            Some(json!({"device_id": "cvd-1"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(conn["device_info"], json!({"kind": "test"}));
        let conn_id = conn["connection_id"].as_str().unwrap().to_owned();

        let (status, body) = call(
            &router,
            "POST",
            &format!("/polled_connections/{conn_id}/:forward"),
            Some(json!({"payload": {"sdp": "offer"}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!("ok"));
        let to_device = device_rx.recv().await.unwrap();
        assert_eq!(to_device["message_type"], "client_msg");
        assert_eq!(to_device["payload"], json!({"sdp": "offer"}));
        let client_id = to_device["client_id"].as_i64().unwrap();

        let device = st.devices.get("cvd-1").unwrap();
        device.forward(client_id, &json!({"message_type": "device_msg", "payload": 1})).await.unwrap();
        device.forward(client_id, &json!({"message_type": "device_msg", "payload": 2})).await.unwrap();

        let uri = format!("/polled_connections/{conn_id}/messages");
        let (_, all) = call(&router, "GET", &uri, None).await;
        assert_eq!(all.as_array().unwrap().len(), 2);
        let (_, tail) = call(&router, "GET", &format!("{uri}?start=1&count=-1"), None).await;
        assert_eq!(tail, json!([{"message_type": "device_msg", "payload": 2}]));
        let (_, none) = call(&router, "GET", &format!("{uri}?start=5"), None).await;
        assert_eq!(none, json!([]));

        let (status, _) = call(&router, "GET", &format!("{uri}?start=abc"), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = call(&router, "GET", &format!("{uri}?count=-5"), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn polled_connection_to_unknown_device_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let router = build_router(state(dir.path()), dir.path());
        let (status, _) = call(
            &router,
            "POST",
            "/polled_connections",
            Some(json!({"device_id": "ghost"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(
            &router,
            "GET",
            "/polled_connections/conn_missing/messages",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn infra_config_lists_ice_servers() {
        let dir = tempfile::tempdir().unwrap();
        let router = build_router(state(dir.path()), dir.path());
        let (_, body) = call(&router, "GET", "/infra_config", None).await;
        assert_eq!(
            body["ice_servers"],
            json!([{"urls": ["stun:stun.l.google.com:19302"]}])
        );
    }

    #[tokio::test]
    async fn static_files_are_served() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>hi</h1>").unwrap();
        let router = build_router(state(dir.path()), dir.path());
        let (status, body) = call(&router, "GET", "/index.html", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!("<h1>hi</h1>"));
    }
}
