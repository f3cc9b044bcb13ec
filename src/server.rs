//! HTTP surface for the hub — transport plumbing around [`Hub::dispatch`].
//!
//! A single `POST /call` endpoint carries `{op, payload}` requests for
//! embedded callers that cannot link the library directly. Dispatch itself
//! always answers 200 with a structured `{ok, ...}` body; non-200 statuses
//! are reserved for transport-level problems.

use axum::{
    http::Method,
    response::{IntoResponse, Json},
    routing::{get, post},
    Extension, Router,
};
use hyper::Server;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::coordinator::Coordinator;
use crate::hub::{Hub, HubRequest};

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "audit-hub",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn call_handler(
    Extension(hub): Extension<Arc<Hub>>,
    Json(request): Json<HubRequest>,
) -> impl IntoResponse {
    Json(hub.dispatch(&request))
}

/// Create the HTTP server with all routes
pub fn create_server(coordinator: Arc<Coordinator>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let hub = Arc::new(Hub::new(coordinator));

    Router::new()
        .route("/health", get(health))
        .route("/call", post(call_handler))
        .layer(Extension(hub))
        .layer(ServiceBuilder::new().layer(cors))
}

/// Start the HTTP server on the specified port, flushing the stores on
/// ctrl-c before returning.
pub async fn start_server(
    coordinator: Arc<Coordinator>,
    port: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = create_server(coordinator.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    println!("🚀 Hub listening on http://localhost:{port}");
    println!("💚 Health check: http://localhost:{port}/health");
    println!("📨 Call endpoint: POST http://localhost:{port}/call");

    Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    coordinator.flush()?;
    Ok(())
}
