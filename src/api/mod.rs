pub mod handlers;
pub mod queries;
pub mod types;

use axum::{routing::get, Router};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
}

pub fn router(pool: PgPool) -> Router {
    let state = Arc::new(AppState { pool });

    Router::new()
        .route("/api/v1/health", get(handlers::health))
        .route("/api/v1/stats", get(handlers::stats))
        .route("/api/v1/suspicious", get(handlers::list_suspicious))
        .route("/api/v1/blacklist", get(handlers::list_blacklist))
        .route("/api/v1/pending", get(handlers::list_pending))
        .route("/api/v1/rules", get(handlers::list_rules))
        .route(
            "/api/v1/rules/{name}/violations",
            get(handlers::rule_violations),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

pub async fn serve(pool: PgPool, host: &str, port: u16) -> eyre::Result<()> {
    let app = router(pool);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "API server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
