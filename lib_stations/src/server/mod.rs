//! # HTTP / WebSocket Front
//!
//! The single listening socket of the server. It carries:
//! - `GET /ws`: the WebSocket upgrade; every upgraded socket is handed to
//!   [`run_connection`].
//! - `GET /health`: a small JSON status document for load balancers and uptime checks.
//! - everything else: a WebSocket upgrade when the request asks for one, so clients
//!   connecting to `/` or any other path are served too; otherwise static files from
//!   the configured directory.
//!
//! [`bind`] starts serving in a background task and returns a [`StopHandle`] that
//! performs the graceful transport close used by the shutdown sequence.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{
        ws::rejection::WebSocketUpgradeRejection, ConnectInfo, FromRef, Request, State,
        WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::info;

use crate::core::lifecycle::run_connection;
use crate::core::shutdown::StopHandle;
use crate::core::context::StreamContext;

#[derive(Clone)]
struct FrontState {
    ctx: Arc<StreamContext>,
    files: Option<ServeDir>,
}

impl FromRef<FrontState> for Arc<StreamContext> {
    fn from_ref(state: &FrontState) -> Self {
        Arc::clone(&state.ctx)
    }
}

/// Builds the router. `static_dir` is served for every path without a route that is
/// not a WebSocket upgrade.
pub fn router(ctx: Arc<StreamContext>, static_dir: Option<PathBuf>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let state = FrontState {
        ctx,
        files: static_dir.map(ServeDir::new),
    };

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .fallback(upgrade_or_serve)
        .layer(cors)
        .with_state(state)
}

/// A server that is accepting connections.
#[derive(Debug)]
pub struct RunningServer {
    pub local_addr: SocketAddr,
    pub transport: StopHandle,
}

/// Binds `addr` and serves `router(ctx, static_dir)` until the returned handle is
/// stopped.
pub async fn bind(
    addr: SocketAddr,
    ctx: Arc<StreamContext>,
    static_dir: Option<PathBuf>,
) -> std::io::Result<RunningServer> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    let app = router(ctx, static_dir);

    let token = CancellationToken::new();
    let shutdown = token.clone();
    let task = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
    });

    info!(%local_addr, "Server is running");
    Ok(RunningServer {
        local_addr,
        transport: StopHandle::new("transport", token, task),
    })
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(ctx): State<Arc<StreamContext>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_connection(socket, ctx, Some(addr)))
}

async fn upgrade_or_serve(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(front): State<FrontState>,
    request: Request,
) -> Response {
    if let Ok(ws) = ws {
        let ctx = front.ctx;
        return ws.on_upgrade(move |socket| run_connection(socket, ctx, Some(addr)));
    }
    match front.files {
        Some(files) => match files.oneshot(request).await {
            Ok(response) => response.into_response(),
            Err(never) => match never {},
        },
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn health_handler(State(ctx): State<Arc<StreamContext>>) -> impl IntoResponse {
    Json(json!({
        "status": if ctx.registry.is_sealed() { "stopping" } else { "ok" },
        "connections": ctx.registry.len(),
        "streams": ctx.dataset.stream_count(),
    }))
}
