//! FENAM Affiliation Service - Main Application Entry Point
//!
//! This is the backend of the FENAM membership site: members pay a fee or
//! donation through PayPal, and the service issues the membership record, a
//! numbered card and confirmation emails. It also signs the handoff tokens
//! that let partner sites accept a FENAM membership as a login credential,
//! and runs the magic-link flow for returning members.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Database**: PostgreSQL with sqlx (async queries)
//! - **Tokens**: HMAC-SHA256 signed payloads, no server-side sessions
//! - **Format**: JSON requests/responses, redirects for the browser flows
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Create database connection pool and run migrations
//! 3. Build the external clients (PayPal, email, card renderer)
//! 4. Build the HTTP router with routes and middleware
//! 5. Start the rate-limiter sweeper and the server

mod clients;
mod config;
mod db;
mod error;
mod handlers;
mod middleware;
mod models;
mod services;
mod state;
mod token;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::EnvFilter;

use crate::clients::{card::HttpCardRenderer, email::HttpEmailSender, paypal::PayPalClient};
use crate::middleware::rate_limit::RateLimiter;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with tracing subscriber. Reads RUST_LOG (defaults
    // to "info" level).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Load configuration
    let config = config::Config::from_env()?;
    tracing::info!("Configuration loaded");

    // Create database pool
    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database pool created");

    // Run migrations
    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    // External collaborators
    let paypal = PayPalClient::new(
        &config.paypal_base_url,
        &config.paypal_client_id,
        &config.paypal_client_secret,
    )?;
    let email = HttpEmailSender::new(
        &config.email_api_url,
        &config.email_api_key,
        &config.email_from,
    )?;
    let cards = HttpCardRenderer::new(&config.card_renderer_url)?;

    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        paypal,
        email: Arc::new(email),
        cards: Arc::new(cards),
        rate_limiter: RateLimiter::new(),
    };

    // Periodic sweep keeps the rate-limit table bounded.
    let sweeper = state.rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            sweeper.sweep().await;
        }
    });

    // The login-request route gets its own per-IP limit on top of the
    // per-email limit inside the service.
    let login_routes = Router::new()
        .route(
            "/api/v1/login/request",
            post(handlers::login::request_login),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit::login_rate_limit,
        ));

    let app = Router::new()
        .route("/health", get(handlers::health::health_check))
        // Affiliation lifecycle
        .route(
            "/api/v1/affiliations",
            post(handlers::affiliations::create_affiliation),
        )
        .route(
            "/api/v1/affiliations/complete",
            post(handlers::affiliations::complete_affiliation),
        )
        // Magic-link verification (redirect-only)
        .route("/login/verify", get(handlers::login::verify_login))
        // Cross-site handoff
        .route(
            "/api/v1/handoff",
            get(handlers::handoff::handoff_redirect).post(handlers::handoff::issue_handoff),
        )
        .merge(login_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    // Bind to network address and start server
    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // ConnectInfo gives the rate limiter a peer address to fall back to
    // when no proxy header is present.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
