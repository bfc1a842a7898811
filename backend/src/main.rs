//! PassVault Backend Server
//!
//! Escrow marketplace API: transaction lifecycle, disputes, vendor approvals,
//! fraud scoring and the chat send-gate, plus the background escrow sweeper.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::State;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::IntoResponse;
use axum::{routing::get, Json, Router};
use sqlx::PgPool;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};

use passvault_server::auth::JwtSecret;
use passvault_server::chat::ChatGuard;
use passvault_server::config::Config;
use passvault_server::db;
use passvault_server::dispute::DisputeService;
use passvault_server::escrow::{escrow_sweeper, EscrowSweeper};
use passvault_server::gateway::{HttpPaymentGateway, PaymentGateway};
use passvault_server::middleware::{self, RateLimiter};
use passvault_server::notifications::{LogSink, NotificationSink, Notifier, RetryPolicy, WebhookSink};
use passvault_server::routes;
use passvault_server::services::FraudReviewService;
use passvault_server::state::AppState;
use passvault_server::store::{PgStore, Store};
use passvault_server::transaction::TransactionService;
use passvault_server::vendor_approval::VendorApprovalService;
use passvault_server::websocket::{self, WsState};

/// How often idle rate-limit buckets are pruned
const RATE_LIMIT_CLEANUP_EVERY: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!(environment = config.environment.as_str(), "Starting PassVault server");

    let db_pool = db::create_pool(&config)
        .await
        .context("database connection failed")?;
    db::run_migrations(&db_pool)
        .await
        .context("database migrations failed")?;

    let store: Arc<dyn Store> = Arc::new(PgStore::new(db_pool.clone()));

    let gateway_timeout = Duration::from_secs(config.gateway_timeout_secs);
    let gateway: Arc<dyn PaymentGateway> = Arc::new(
        HttpPaymentGateway::new(
            config.payment_gateway_url.clone(),
            config.payment_gateway_api_key.clone(),
            gateway_timeout,
        )
        .context("payment gateway client")?,
    );

    let sink: Arc<dyn NotificationSink> = match &config.notification_webhook_url {
        Some(url) => Arc::new(
            WebhookSink::new(url.clone(), Duration::from_secs(10))
                .context("notification webhook client")?,
        ),
        None => {
            tracing::warn!("NOTIFICATION_WEBHOOK_URL not set, notifications are only logged");
            Arc::new(LogSink)
        }
    };
    let (notifier, _notification_worker) = Notifier::spawn(sink, RetryPolicy::default());

    // Initialize WebSocket state
    let ws_state = WsState::new();

    let transaction_service = Arc::new(TransactionService::new(
        store.clone(),
        gateway,
        gateway_timeout,
        config.escrow.clone(),
        notifier.clone(),
        ws_state.clone(),
    ));
    let dispute_service = Arc::new(DisputeService::new(
        store.clone(),
        notifier.clone(),
        ws_state.clone(),
    ));
    let approval_service = Arc::new(VendorApprovalService::new(
        store.clone(),
        notifier,
        ws_state.clone(),
        config.escrow.vendor_approval_ttl_hours,
    ));
    let fraud_service = Arc::new(FraudReviewService::new(store.clone()));
    let chat_guard = Arc::new(ChatGuard::new(store.clone()));

    let app_state = AppState {
        transaction_service: transaction_service.clone(),
        dispute_service,
        approval_service,
        fraud_service,
        chat_guard,
        ws_state,
        jwt_secret: JwtSecret::new(&config.jwt_secret),
        webhook_secret: config.webhook_secret.clone(),
    };

    // Start the escrow sweeper in background
    let sweeper = Arc::new(EscrowSweeper::new(store, transaction_service));
    let sweep_interval = Duration::from_secs(config.escrow_sweep_interval_secs);
    tokio::spawn(async move {
        tracing::info!("Escrow sweeper task started");
        escrow_sweeper(sweeper, sweep_interval).await;
        tracing::error!("Escrow sweeper task exited unexpectedly");
    });

    let rate_limiter = RateLimiter::new(config.rate_limit_rps);
    let _cleanup = rate_limiter.spawn_cleanup(RATE_LIMIT_CLEANUP_EVERY);

    let health_router = Router::new()
        .route("/health", get(health_check))
        .with_state(db_pool);

    let mut app = Router::new()
        .route("/", get(root))
        .route("/ws", get(websocket::ws_handler))
        .merge(routes::api_routes())
        .with_state(app_state)
        .merge(health_router)
        .layer(axum::middleware::from_fn(middleware::security_headers))
        .layer(axum::middleware::from_fn(middleware::request_tracing))
        .layer(axum::middleware::from_fn(middleware::rate_limit_layer(
            rate_limiter,
        )))
        .layer(configure_cors(config.cors_allowed_origins.as_deref()));

    if config.environment.is_production() {
        app = app.layer(axum::middleware::from_fn(middleware::hsts_header));
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    tracing::info!("Server listening on {}", addr);
    tracing::info!("WebSocket available at ws://{}/ws", addr);
    tracing::info!("Health check at http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    // Serve with graceful shutdown
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn root() -> &'static str {
    "PassVault API Server"
}

/// Health check response
#[derive(serde::Serialize)]
struct HealthResponse {
    status: &'static str,
    database: String,
    version: &'static str,
}

/// Health check endpoint; a failing database degrades to 503 instead of hanging
async fn health_check(State(pool): State<PgPool>) -> impl IntoResponse {
    let (code, status, database) = match db::check_health(&pool).await {
        Ok(()) => (StatusCode::OK, "healthy", "connected".to_string()),
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unhealthy", e.to_string())
        }
    };

    (
        code,
        Json(HealthResponse {
            status,
            database,
            version: env!("CARGO_PKG_VERSION"),
        }),
    )
}

fn configure_cors(allowed_origins: Option<&str>) -> CorsLayer {
    let allowed_origins = allowed_origins.unwrap_or_default();

    if allowed_origins.is_empty() {
        tracing::warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (permissive)");
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
