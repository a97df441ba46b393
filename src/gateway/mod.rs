//! HTTP gateway
//!
//! Thin axum layer over [`TransferService`](crate::transfer::TransferService):
//! auth middleware, request validation, and the wire envelope. No business
//! rules live here.

pub mod handlers;
pub mod openapi;
pub mod state;
pub mod types;

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::jwt_auth_middleware;
use state::AppState;

/// Build the full application router
pub fn build_router(state: Arc<AppState>) -> Router {
    let transfer_routes = Router::new()
        .route("/internal", post(handlers::create_internal_transfer))
        .route("/external", post(handlers::create_external_transfer))
        .route("/history", get(handlers::get_history))
        .route("/{transfer_id}", get(handlers::get_transfer))
        .layer(from_fn_with_state(state.clone(), jwt_auth_middleware));

    Router::new()
        .route("/api/v1/health", get(handlers::health_check))
        .nest("/api/v1/transfers", transfer_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()))
}

/// Serve the gateway until the cancellation token fires
pub async fn run_server(
    state: Arc<AppState>,
    host: &str,
    port: u16,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let app = build_router(state);

    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "Gateway listening");
    tracing::info!("API docs at http://{}/docs", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    tracing::info!("Gateway stopped");
    Ok(())
}
