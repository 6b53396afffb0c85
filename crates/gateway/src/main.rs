//! StudyVault API Gateway
//!
//! The main entry point for all external API requests.
//! Handles:
//! - Authentication (bearer session tokens)
//! - Resource submission, moderation and engagement
//! - Live streams (server-sent events) over the store's live queries
//! - The assistant chat endpoint, rate limited
//! - Observability (logging, metrics)

mod handlers;
mod middleware;

use axum::{
    extract::{DefaultBodyLimit, FromRef},
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post, put},
    Router,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::sync::Arc;
use studyvault_common::{
    assistant::AssistantService,
    auth::JwtManager,
    config::{AppConfig, StoreBackend},
    db::PgStore,
    errors::Result,
    media::{HttpMediaStore, MediaStore},
    metrics::{self, LATENCY_BUCKETS, METRICS_PREFIX, SLOW_BUCKETS},
    store::{DataStore, MemoryStore},
};
use studyvault_workflow::{AdminRoster, ResourceLifecycle};
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::middleware::rate_limit::ChatRateLimiter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn DataStore>,
    pub lifecycle: ResourceLifecycle<dyn DataStore>,
    pub assistant: Arc<AssistantService>,
    pub tokens: Arc<JwtManager>,
    pub roster: Arc<AdminRoster>,
}

impl AppState {
    pub fn new(config: AppConfig, store: Arc<dyn DataStore>, media: Arc<dyn MediaStore>) -> Result<Self> {
        let secret = match config.auth.jwt_secret.clone() {
            Some(secret) => secret,
            None => {
                warn!("No JWT secret configured; using an ephemeral one, tokens will not survive a restart");
                uuid::Uuid::new_v4().to_string()
            }
        };
        let tokens = JwtManager::new(
            &secret,
            config.auth.jwt_expiration_secs,
            config.auth.allowed_domain.clone(),
        );
        let roster = AdminRoster::from_config(&config.auth.admins)?;
        if roster.is_empty() {
            warn!("No admins configured; submissions cannot be moderated");
        } else {
            info!(admins = roster.len(), "Admin roster loaded");
        }
        let assistant = AssistantService::from_config(&config.assistant, &config.media)?;

        Ok(Self {
            lifecycle: ResourceLifecycle::new(store.clone(), media),
            store,
            assistant: Arc::new(assistant),
            tokens: Arc::new(tokens),
            roster: Arc::new(roster),
            config: Arc::new(config),
        })
    }
}

impl FromRef<AppState> for Arc<JwtManager> {
    fn from_ref(state: &AppState) -> Self {
        state.tokens.clone()
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));
    if config.observability.json_logging {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
    }

    info!("Starting StudyVault API Gateway v{}", studyvault_common::VERSION);

    // Initialize metrics
    install_metrics_exporter(config.observability.metrics_port)?;
    metrics::register_metrics();

    // Initialize the data store
    let store: Arc<dyn DataStore> = match config.database.backend {
        StoreBackend::Memory => {
            warn!("Using the in-process store; data is lost on restart");
            Arc::new(MemoryStore::new())
        }
        StoreBackend::Postgres => Arc::new(PgStore::connect(&config.database).await?),
    };
    let media: Arc<dyn MediaStore> = Arc::new(HttpMediaStore::new(&config.media)?);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let state = AppState::new(config, store, media)?;

    // Build the router
    let app = create_router(state);

    // Start the server
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn install_metrics_exporter(port: u16) -> std::result::Result<(), Box<dyn std::error::Error>> {
    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_request_duration_seconds", METRICS_PREFIX)),
            LATENCY_BUCKETS,
        )?
        .set_buckets_for_metric(Matcher::Suffix("_chat_duration_seconds".to_string()), SLOW_BUCKETS)?
        .set_buckets_for_metric(
            Matcher::Suffix("_conversion_duration_seconds".to_string()),
            SLOW_BUCKETS,
        )?
        .install()?;
    info!(port, "Metrics exporter listening");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    use handlers::{chat, health, moderation, profile, resources, subjects};

    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    // API routes
    let api_routes = Router::new()
        // Profile
        .route("/profile", get(profile::get_profile).put(profile::update_profile))

        // Resources
        .route("/resources", get(resources::list_resources).post(resources::submit_resource))
        .route("/resources/live", get(resources::live_resources))
        .route("/resources/{id}", delete(resources::delete_resource))
        .route("/resources/{id}/view", post(resources::record_view))
        .route("/resources/{id}/like", put(resources::toggle_like))
        .route("/resources/{id}/save", put(resources::toggle_save))

        // Moderation
        .route("/moderation/pending", get(moderation::list_pending))
        .route("/moderation/pending/live", get(moderation::live_pending))
        .route("/moderation/{id}/approve", post(moderation::approve))
        .route("/moderation/{id}/reject", post(moderation::reject))

        // Subject folders
        .route("/subjects/{department}/{semester}", get(subjects::list_subjects))
        .route("/subjects/{department}/{semester}/live", get(subjects::live_subjects));

    // Assistant endpoint, rate limited separately
    let mut chat_routes = Router::new().route("/api/chat", post(chat::chat));
    if state.config.rate_limit.enabled {
        let limiter = Arc::new(ChatRateLimiter::new(
            state.config.rate_limit.requests_per_second,
            state.config.rate_limit.burst,
        ));
        chat_routes = chat_routes.route_layer(from_fn_with_state(limiter, middleware::rate_limit::rate_limit));
    }

    let max_upload = state.config.server.max_upload_bytes;

    // Compose the app
    Router::new()
        // Health endpoints (no auth)
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .nest("/v1", api_routes)
        .merge(chat_routes)
        .layer(DefaultBodyLimit::max(max_upload))
        .layer(from_fn(middleware::metrics::track_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
