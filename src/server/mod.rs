//! HTTP/WebSocket server exposing the supervised terminal to remote observers

mod auth;
pub mod state;
mod ws;

pub use auth::{generate_auth_token, AuthLayer};
pub use state::ServerAppState;

use axum::{
    extract::State,
    http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    routing::get,
    Json, Router,
};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use crate::error::{RelayError, Result};
use crate::supervisor::SupervisorStatus;

/// Build the router with auth and CORS applied
pub fn router(state: ServerAppState) -> Router {
    // Layer order: cors (outer) -> auth -> handler
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    Router::new()
        .route("/ws", get(ws::observer_ws_handler))
        .route("/health", get(health_handler))
        .route("/api/status", get(status_handler))
        .layer(AuthLayer::new(state.auth_token.clone()))
        .layer(cors)
        .with_state(state)
}

/// Run the HTTP/WebSocket server until shutdown is requested
pub async fn run_server(port: u16, bind: &str, state: ServerAppState) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", bind, port)
        .parse()
        .map_err(|e| RelayError::Server(format!("Invalid address: {}", e)))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| RelayError::Server(format!("Failed to bind to {}: {}", addr, e)))?;

    println!("\n╔══════════════════════════════════════════════════════════════╗");
    println!("║                        PTY Relay                              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║                                                               ║");
    println!("║  Server URL: http://{}:{:<24}  ║", bind, port);
    println!("║                                                               ║");
    println!("║  Auth Token: {}  ║", state.auth_token);
    println!("║                                                               ║");
    println!("║  Endpoints:                                                   ║");
    println!("║    GET  /ws?token=...    - Observer WebSocket                ║");
    println!("║    GET  /api/status      - Supervisor status                 ║");
    println!("║    GET  /health          - Health check                      ║");
    println!("║                                                               ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    serve(listener, state).await
}

/// Serve on an already bound listener
pub async fn serve(listener: TcpListener, state: ServerAppState) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        log::info!("Server listening on http://{}", addr);
    }

    // Create shutdown signal that waits for the shutdown state flag
    let shutdown_state = state.shutdown_state.clone();
    let shutdown_signal = async move {
        shutdown_state.wait().await;
        log::info!("Shutdown signal received, stopping server...");
    };

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal)
        .await
        .map_err(|e| RelayError::Server(format!("Server error: {}", e)))
}

/// Health check endpoint
async fn health_handler() -> &'static str {
    "OK"
}

async fn status_handler(State(state): State<ServerAppState>) -> Json<SupervisorStatus> {
    Json(state.supervisor.status())
}
