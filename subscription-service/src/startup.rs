//! Application startup and lifecycle management.

use crate::config::SubscriptionConfig;
use crate::handlers::{
    health_check, list_subscription_trades, metrics_handler, readiness_check,
    update_subscription_trade, upload_subscriptions,
};
use crate::services::{
    init_metrics, CaseLookup, Database, HealthCheck, HttpExtractorClient, SpreadsheetExtractor,
    TradeLookup, TradePersistence,
};
use crate::workflow::Collaborators;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, patch, post},
    Router,
};
use dashmap::DashSet;
use service_core::error::AppError;
use service_core::middleware::tracing::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub collaborators: Collaborators,
    pub health: Arc<dyn HealthCheck>,
    /// Cases with an upload currently running in this process.
    pub in_flight: Arc<DashSet<Uuid>>,
}

impl AppState {
    pub fn new<S>(store: Arc<S>, extractor: Arc<dyn SpreadsheetExtractor>) -> Self
    where
        S: CaseLookup + TradeLookup + TradePersistence + HealthCheck + 'static,
    {
        Self {
            collaborators: Collaborators::new(store.clone(), extractor),
            health: store,
            in_flight: Arc::new(DashSet::new()),
        }
    }
}

/// Build the HTTP router with all routes and middleware.
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .route(
            "/cases/:case_id/subscription-uploads",
            post(upload_subscriptions).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route(
            "/cases/:case_id/subscription-trades",
            get(list_subscription_trades),
        )
        .route(
            "/cases/:case_id/subscription-trades/:trade_id",
            patch(update_subscription_trade),
        )
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: SubscriptionConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build the application without running migrations.
    /// Use this in tests when migrations are already applied by the test harness.
    pub async fn build_without_migrations(config: SubscriptionConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(
        config: SubscriptionConfig,
        run_migrations: bool,
    ) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if run_migrations {
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }

        let extractor = Arc::new(HttpExtractorClient::new(&config.extractor));
        let state = AppState::new(Arc::new(db), extractor);

        Self::with_state(state, config.common.port, config.upload.max_upload_bytes).await
    }

    /// Bind a listener for an already assembled state.
    pub async fn with_state(
        state: AppState,
        port: u16,
        max_upload_bytes: usize,
    ) -> Result<Self, AppError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(http_port = port, "Subscription service listener bound");

        Ok(Self {
            port,
            listener,
            router: router(state, max_upload_bytes),
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        tracing::info!(
            service = "subscription-service",
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.port,
            "Service ready to accept connections"
        );

        axum::serve(self.listener, self.router).await.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}
