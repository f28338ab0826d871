//! Router assembly and server lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ama_store::RoomStore;
use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::routing::{get, patch};
use axum::Router;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::handlers;
use crate::notifier::Notifier;
use crate::registry::ConnectionRegistry;
use crate::shutdown::ShutdownCoordinator;

const CORS_MAX_AGE: Duration = Duration::from_secs(300);

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RoomStore>,
    pub registry: Arc<ConnectionRegistry>,
    pub notifier: Notifier,
    /// Parent of every subscription session's token.
    pub shutdown: CancellationToken,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(store: Arc<dyn RoomStore>, shutdown: CancellationToken) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        Self {
            store,
            notifier: Notifier::new(Arc::clone(&registry)),
            registry,
            shutdown,
            start_time: Instant::now(),
        }
    }
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    let message = "/api/rooms/{room_id}/messages/{message_id}";

    Router::new()
        .route("/subscribe/{room_id}", get(handlers::subscribe))
        .route("/api/rooms", get(handlers::list_rooms).post(handlers::create_room))
        .route(
            "/api/rooms/{room_id}/messages",
            get(handlers::list_messages).post(handlers::create_message),
        )
        .route(message, get(handlers::get_message))
        .route(
            &format!("{message}/react"),
            patch(handlers::react_to_message).delete(handlers::remove_reaction_from_message),
        )
        .route(&format!("{message}/answer"), patch(handlers::mark_message_as_answered))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(CatchPanicLayer::new())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(config))
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

/// Any http(s) origin unless `allowed_origins` narrows it.
fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let origins = if config.allowed_origins.is_empty() {
        AllowOrigin::predicate(|origin: &HeaderValue, _| {
            origin
                .to_str()
                .is_ok_and(|o| o.starts_with("http://") || o.starts_with("https://"))
        })
    } else {
        let list: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %o, "ignoring malformed CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(list)
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
            Method::PATCH,
        ])
        .allow_headers([
            header::ACCEPT,
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-csrf-token"),
        ])
        .expose_headers([header::LINK])
        .max_age(CORS_MAX_AGE)
}

/// Bind, spawn the server, and return a handle to it.
pub async fn start(config: ServerConfig, store: Arc<dyn RoomStore>) -> Result<ServerHandle, std::io::Error> {
    let coordinator = ShutdownCoordinator::new();
    let state = AppState::new(store, coordinator.token());
    let registry = Arc::clone(&state.registry);
    let router = build_router(state, &config);

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    let addr = listener.local_addr()?;
    info!(addr = %addr, "ama server started");

    let token = coordinator.token();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await;
        if let Err(e) = result {
            warn!(error = %e, "server exited with error");
        }
        info!("ama server stopped");
    });

    Ok(ServerHandle {
        addr,
        registry,
        coordinator,
        server,
    })
}

/// Handle returned by `start()`.
pub struct ServerHandle {
    addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    coordinator: ShutdownCoordinator,
    server: JoinHandle<()>,
}

impl ServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn coordinator(&self) -> &ShutdownCoordinator {
        &self.coordinator
    }

    /// Stop accepting requests, close every subscription and wait for the
    /// server task to drain.
    pub async fn shutdown(self, timeout: Option<Duration>) {
        self.coordinator.graceful_shutdown(vec![self.server], timeout).await;
    }
}
