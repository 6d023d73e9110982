//! HTTP and WebSocket surface of the gateway.
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check
//! - `GET|POST /components` - List / create components
//! - `DELETE /components/:id` - Destroy a component
//! - `GET /components/:id/controls` - Protocol to control URL map
//! - `GET /components/:id/qemu` - Console bridge (WebSocket) or USB device list
//! - `POST /components/:id/qemu` - Forward monitor commands, one per line
//! - `GET /components/:id/ws+ethernet/:hw` - Ethernet bridge (WebSocket)
//! - `POST /networks` - Create a network
//! - `GET|DELETE /networks/:id` - Inspect / remove a network
//! - `POST /networks/:id/components` - Plug a component in
//! - `POST /networks/:id/components/:cid/disconnect` - Unplug a component
//! - `DELETE /networks/:id/components/:cid` - Drop a component
//! - `GET /networks/:id/wsConnection` - New switch endpoint for a client
//! - `PUT /networks/:id/lifetime` - Schedule removal

use crate::error::ApiResult;
use crate::ws;
use axum::{
    extract::{ws::WebSocketUpgrade, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post, put},
    Router,
};
use emucomp_core::{
    normalize_hw_address, Capability, ComponentConfig, ComponentId, ComponentManager, Lifetime,
    NetworkComponentRequest, NetworkRequest, Networks, CONSOLE_PROTOCOL, ETHERNET_PROTOCOL,
    USB_PROTOCOL,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ComponentManager>,
    pub networks: Arc<Networks>,
}

impl AppState {
    /// State for a manager and the network service built on it.
    pub fn new(manager: Arc<ComponentManager>) -> Self {
        let networks = Networks::new(Arc::clone(&manager));
        Self { manager, networks }
    }
}

/// Build the HTTP router.
///
/// The returned router can be served directly with axum or composed
/// into a larger application.
pub fn build_router(state: AppState) -> Router {
    tracing::debug!("Building HTTP router");

    Router::new()
        .route("/health", get(health_handler))
        .route("/components", get(list_components).post(create_component))
        .route("/components/:id", delete(destroy_component))
        .route("/components/:id/controls", get(component_controls))
        .route("/components/:id/qemu", get(qemu_get).post(qemu_post))
        .route("/components/:id/ws+ethernet/:hw", get(ethernet_ws))
        .route("/networks", post(create_network))
        .route("/networks/:id", get(network_info).delete(remove_network))
        .route("/networks/:id/components", post(add_network_component))
        .route(
            "/networks/:id/components/:cid",
            delete(remove_network_component),
        )
        .route(
            "/networks/:id/components/:cid/disconnect",
            post(disconnect_network_component),
        )
        .route("/networks/:id/wsConnection", get(network_ws_connection))
        .route("/networks/:id/lifetime", put(set_network_lifetime))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    tracing::trace!("Health check request");
    Json(json!({
        "status": "healthy",
        "service": "emucomp-gateway",
        "components": state.manager.count().await,
        "networks": state.networks.sessions().len(),
    }))
}

async fn list_components(State(state): State<AppState>) -> Json<Vec<ComponentId>> {
    let mut ids = state.manager.list().await;
    ids.sort();
    Json(ids)
}

async fn create_component(
    State(state): State<AppState>,
    Json(config): Json<ComponentConfig>,
) -> ApiResult<impl IntoResponse> {
    let id = state.manager.create(config).await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

async fn destroy_component(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.manager.destroy(id.parse()?).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn component_controls(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let component = state
        .manager
        .get_component_by_id(&id, Capability::Any)
        .await?;
    Ok(Json(component.control_urls()?))
}

/// Console bridge on upgrade; the USB device list otherwise.
async fn qemu_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
    upgrade: Option<WebSocketUpgrade>,
) -> ApiResult<Response> {
    if let Some(upgrade) = upgrade {
        let manager = Arc::clone(&state.manager);
        return Ok(upgrade
            .on_upgrade(move |socket| {
                ws::serve(socket, manager, id, CONSOLE_PROTOCOL.to_string())
            })
            .into_response());
    }

    let component = state
        .manager
        .get_component_by_id(&id, Capability::Any)
        .await?;
    component.connector(USB_PROTOCOL)?;
    Ok(Json(component.usb_devices()).into_response())
}

async fn qemu_post(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: String,
) -> ApiResult<StatusCode> {
    state
        .manager
        .forward_monitor_commands(id.parse()?, &body)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Connector protocol for the `:hw` path segment; connectors are keyed by
/// the lowercase address.
fn ethernet_protocol(hw: &str) -> ApiResult<String> {
    Ok(format!("{ETHERNET_PROTOCOL}+{}", normalize_hw_address(hw)?))
}

async fn ethernet_ws(
    State(state): State<AppState>,
    Path((id, hw)): Path<(String, String)>,
    upgrade: WebSocketUpgrade,
) -> ApiResult<Response> {
    let protocol = ethernet_protocol(&hw)?;
    let requested = format!("{ETHERNET_PROTOCOL}+{hw}");
    let manager = Arc::clone(&state.manager);
    Ok(upgrade
        .protocols([protocol.clone(), requested])
        .on_upgrade(move |socket| ws::serve(socket, manager, id, protocol)))
}

async fn create_network(
    State(state): State<AppState>,
    Json(request): Json<NetworkRequest>,
) -> ApiResult<impl IntoResponse> {
    let response = state.networks.create(request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

async fn network_info(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.networks.info(&id)?))
}

async fn remove_network(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.networks.remove(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_network_component(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<NetworkComponentRequest>,
) -> ApiResult<StatusCode> {
    state.networks.add_component(&id, &request).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn disconnect_network_component(
    State(state): State<AppState>,
    Path((id, cid)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    state.networks.disconnect_component(&id, &cid).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_network_component(
    State(state): State<AppState>,
    Path((id, cid)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    state.networks.remove_component(&id, &cid).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn network_ws_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let url = state.networks.ws_connection(&id).await?;
    Ok(Json(json!({ "url": url })))
}

async fn set_network_lifetime(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(lifetime): Json<Lifetime>,
) -> ApiResult<impl IntoResponse> {
    let expires_at = state.networks.set_lifetime(&id, &lifetime)?;
    Ok(Json(json!({ "expiresAt": expires_at })))
}

/// Start the HTTP server.
///
/// This function runs until the server is shut down via the provided
/// shutdown signal.
pub async fn serve(
    state: AppState,
    addr: std::net::SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let router = build_router(state);

    tracing::info!(%addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::debug!(%addr, "TCP listener bound");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use emucomp_core::ManagerConfig;
    use tower::ServiceExt;

    fn state(dir: &std::path::Path) -> AppState {
        let config = ManagerConfig::builder()
            .work_dir(dir)
            .build()
            .expect("config");
        AppState::new(Arc::new(ComponentManager::new(config)))
    }

    async fn send(router: Router, method: &str, uri: &str, body: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request");
        let response = router.oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (status, body) = send(build_router(state(dir.path())), "GET", "/health", "").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("healthy"));
    }

    #[tokio::test]
    async fn test_component_lifecycle_over_http() {
        let dir = tempfile::tempdir().expect("tempdir");
        let router = build_router(state(dir.path()));

        let (status, body) = send(
            router.clone(),
            "POST",
            "/components",
            r#"{"type": "emulator", "binary": "sleep", "args": ["30"], "console": false}"#,
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        let created: serde_json::Value = serde_json::from_str(&body).expect("json");
        let id = created["id"].as_str().expect("id").to_string();

        let (status, body) =
            send(router.clone(), "GET", &format!("/components/{id}/controls"), "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "{}");

        let (status, _) = send(router.clone(), "GET", &format!("/components/{id}/qemu"), "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(router.clone(), "DELETE", &format!("/components/{id}"), "").await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, body) = send(router, "DELETE", &format!("/components/{id}"), "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.contains("message"));
    }

    #[test]
    fn test_ethernet_protocol_uses_lowercase_address() {
        assert_eq!(
            ethernet_protocol("52:54:00:AB:CD:EF").expect("valid"),
            format!("{ETHERNET_PROTOCOL}+52:54:00:ab:cd:ef")
        );
        let rejected = ethernet_protocol("52:54:00:ab:cd").expect_err("short address");
        assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_network_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let router = build_router(state(dir.path()));

        let (status, _) = send(router.clone(), "DELETE", "/networks/nope", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(
            router.clone(),
            "PUT",
            "/networks/nope/lifetime",
            r#"{"value": 1, "unit": "seconds"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(router, "GET", "/networks/nope/wsConnection", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_monitor_commands_need_console() {
        let dir = tempfile::tempdir().expect("tempdir");
        let router = build_router(state(dir.path()));
        let (status, _) = send(
            router,
            "POST",
            &format!("/components/{}/qemu", ComponentId::new()),
            "info status\n",
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
