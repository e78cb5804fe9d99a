use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{DefaultBodyLimit, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use pairchat_engine::ChatEngine;
use pairchat_telemetry::{MetricsRecorder, SqliteLogSink};
use tokio::sync::oneshot;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use crate::client::{self, ClientRegistry};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::handlers;
use crate::hub::{Hub, HubHandle};

/// Headroom on top of the file limit for multipart boundaries and headers.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub hub: HubHandle,
    pub client_registry: Arc<ClientRegistry>,
    pub metrics: Arc<MetricsRecorder>,
    /// `None` when warn+ logs are not persisted.
    pub logs: Option<Arc<SqliteLogSink>>,
}

pub fn build_router(state: AppState) -> Router {
    let public = &state.config.public_dir;
    let index = public.join("index.html");
    let upload_limit = state.config.max_upload_bytes + MULTIPART_OVERHEAD;

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(handlers::health))
        .route("/check-username", post(handlers::check_username))
        .route("/user-activity", get(handlers::user_activity))
        .route("/metrics", get(handlers::metrics))
        .route("/logs", get(handlers::logs))
        .route(
            "/upload",
            post(handlers::upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route_service("/", ServeFile::new(&index))
        .route_service("/home", ServeFile::new(&index))
        .route_service("/chat", ServeFile::new(public.join("chat.html")))
        .route_service("/setup", ServeFile::new(public.join("setup.html")))
        .nest_service("/uploads", ServeDir::new(&state.config.uploads_dir))
        .fallback_service(ServeDir::new(public))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

pub async fn start(
    config: ServerConfig,
    metrics: Arc<MetricsRecorder>,
    logs: Option<Arc<SqliteLogSink>>,
) -> Result<ServerHandle, ServerError> {
    tokio::fs::create_dir_all(&config.uploads_dir).await?;

    let client_registry = Arc::new(ClientRegistry::new(config.max_send_queue));
    let engine = ChatEngine::with_activity_capacity(config.activity_capacity);
    let (hub, hub_task) =
        Hub::new(engine, Arc::clone(&client_registry), Arc::clone(&metrics)).spawn();

    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    let local_addr = listener.local_addr()?;

    let app_state = AppState {
        config: Arc::new(config),
        hub,
        client_registry,
        metrics,
        logs,
    };
    let router = build_router(app_state);

    tracing::info!(addr = %local_addr, "pairchat server started");

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "server error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        shutdown: Some(shutdown_tx),
        server,
        hub: hub_task,
    })
}

pub struct ServerHandle {
    pub port: u16,
    shutdown: Option<oneshot::Sender<()>>,
    server: tokio::task::JoinHandle<()>,
    hub: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections and wait for the listener to wind down.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.server).await {
            tracing::warn!(error = %e, "server task ended abnormally");
        }
        self.hub.abort();
        tracing::info!("pairchat server stopped");
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (connection_id, rx) = state.client_registry.register();
    let span = tracing::info_span!("socket", connection_id = %connection_id);

    async move {
        state.hub.connect(&connection_id).await;
        client::handle_ws_connection(
            socket,
            connection_id,
            rx,
            state.client_registry,
            state.hub,
        )
        .await;
    }
    .instrument(span)
    .await;
}
