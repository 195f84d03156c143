//! HTTP handlers for Chirp server.
//!
//! This module is the boundary between HTTP and the chat hub: it checks the
//! shared secret, validates send requests and turns subscriptions into
//! streaming `text/event-stream` responses.

use crate::config::{Config, ConfigError};
use crate::metrics;
use anyhow::Result;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use chirp_core::{ChatHub, HubError, LivenessLoop};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The chat hub.
    pub hub: Arc<ChatHub>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            hub: Arc::new(ChatHub::with_config(config.hub_config())),
            config,
        }
    }
}

/// Errors surfaced to HTTP clients.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Wrong or missing shared secret.
    #[error("Unauthorized")]
    Unauthorized,

    /// Body is not JSON or lacks `message`/`nick`.
    #[error("Malformed request")]
    Malformed,

    /// Message text exceeds the configured limit.
    #[error("Message too large")]
    MessageTooLarge,

    /// Subscriber limit reached.
    #[error("Too many subscribers")]
    TooManySubscribers,

    /// Shutdown has started; no new streams are opened.
    #[error("Server shutting down")]
    ShuttingDown,

    /// Anything the client cannot fix.
    #[error("Internal error")]
    Internal(#[source] HubError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Malformed => StatusCode::BAD_REQUEST,
            ApiError::MessageTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::TooManySubscribers | ApiError::ShuttingDown => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "unauthorized",
            ApiError::Malformed => "malformed",
            ApiError::MessageTooLarge => "too_large",
            ApiError::TooManySubscribers => "capacity",
            ApiError::ShuttingDown => "shutdown",
            ApiError::Internal(_) => "internal",
        }
    }
}

impl From<HubError> for ApiError {
    fn from(e: HubError) -> Self {
        match e {
            HubError::MaxSubscribersReached => ApiError::TooManySubscribers,
            HubError::ShuttingDown => ApiError::ShuttingDown,
            other => ApiError::Internal(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Internal(e) => error!(error = %e, "Request failed"),
            other => debug!(reason = other.reason(), "Request rejected"),
        }
        metrics::record_rejection(self.reason());
        (self.status(), self.to_string()).into_response()
    }
}

/// Body of a send request, as posted by clients.
#[derive(Debug, Deserialize)]
struct SendMessageForm {
    message: Option<String>,
    nick: Option<String>,
    #[serde(rename = "avatarUrl")]
    avatar_url: Option<String>,
}

/// A send request that passed validation.
#[derive(Debug)]
struct SendMessage {
    text: String,
    nick: String,
    avatar_url: Option<String>,
}

impl SendMessage {
    /// Parse a raw body. The content type is not checked.
    fn parse(body: &[u8], max_len: usize) -> Result<Self, ApiError> {
        let form: SendMessageForm = serde_json::from_slice(body).map_err(|_| ApiError::Malformed)?;

        let text = non_blank(form.message).ok_or(ApiError::Malformed)?;
        let nick = non_blank(form.nick).ok_or(ApiError::Malformed)?;
        if text.len() > max_len {
            return Err(ApiError::MessageTooLarge);
        }

        Ok(Self {
            text,
            nick,
            avatar_url: non_blank(form.avatar_url),
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn authorize(headers: &HeaderMap, api_code: &str) -> Result<(), ApiError> {
    match headers.get(header::AUTHORIZATION) {
        Some(value) if value.as_bytes() == api_code.as_bytes() => Ok(()),
        _ => Err(ApiError::Unauthorized),
    }
}

/// Build the CORS layer for the configured origins.
///
/// # Errors
///
/// Returns an error if an origin is not a valid header value.
pub fn cors_layer(origins: &[String]) -> Result<CorsLayer, ConfigError> {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let origins = origins
            .iter()
            .map(|o| {
                HeaderValue::from_str(o)
                    .map_err(|_| ConfigError::Invalid(format!("invalid CORS origin: {o}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        AllowOrigin::list(origins)
    };

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]))
}

/// Build the HTTP router.
///
/// # Errors
///
/// Returns an error if the CORS configuration is invalid.
pub fn router(state: Arc<AppState>) -> Result<Router, ConfigError> {
    let cors = cors_layer(&state.config.cors_allowed_origins)?;

    Ok(Router::new()
        .route("/health", get(health_handler))
        .route("/sendMessage", post(send_message_handler))
        .route("/subscribe", get(subscribe_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

/// Run the HTTP server until a shutdown signal arrives.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let liveness = LivenessLoop::start_with_observer(
        Arc::clone(&state.hub),
        config.liveness_config(),
        Some(Arc::new(metrics::set_active_subscribers)),
    );

    let app = router(Arc::clone(&state))?;

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Chirp server listening on {}", addr);
    info!("Event stream endpoint: http://{}/subscribe", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(Arc::clone(&state.hub)))
    .await?;

    liveness.stop().await;
    info!("Chirp server stopped");

    Ok(())
}

/// Resolve on Ctrl-C or SIGTERM, then end every open event stream and
/// refuse new ones so the graceful shutdown does not wait on them forever.
async fn shutdown_signal(hub: Arc<ChatHub>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    let closed = hub.close_all();
    info!(subscribers = closed, "Shutting down");
}

/// Health check handler.
async fn health_handler() -> &'static str {
    "ok"
}

/// Accept a chat message and broadcast it.
async fn send_message_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<&'static str, ApiError> {
    authorize(&headers, &state.config.api_code)?;
    let request = SendMessage::parse(&body, state.config.limits.max_message_len)?;

    let start = Instant::now();
    let text_len = request.text.len();
    let (message, report) = state
        .hub
        .post(request.text, request.nick, request.avatar_url)?;

    metrics::record_message(text_len);
    metrics::record_broadcast(&report, start.elapsed().as_secs_f64());

    if report.failed > 0 {
        warn!(
            message = %message.id,
            failed = report.failed,
            "Some subscribers were unreachable"
        );
    }

    Ok("ok")
}

/// Open an event stream: replay the history, then push live events until
/// the client disconnects.
async fn subscribe_handler(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
) -> Result<Response, ApiError> {
    let remote = connect_info.map(|ConnectInfo(addr)| addr.to_string());
    let subscription = state.hub.connect(remote)?;

    debug!(subscriber = %subscription.id(), "Event stream opened");
    metrics::record_connection();

    Ok((
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CONNECTION, "keep-alive"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(subscription),
    )
        .into_response())
}
