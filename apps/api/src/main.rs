mod auth;
mod billing;
mod clients;
mod config;
mod db;
mod errors;
mod mailer;
mod media;
mod models;
mod notifications;
mod referrals;
mod routes;
mod state;
mod users;

use anyhow::Result;
use std::net::SocketAddr;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::db::create_pool;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={},tower_http=info",
                env!("CARGO_CRATE_NAME"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting estate media API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url).await?;

    if config.auth.secret.is_none() {
        warn!("AUTH_SECRET is not set; sign-in endpoints will answer 500");
    }
    if config.paypal.is_none() {
        warn!("PayPal credentials are not set; PayPal activation is disabled");
    }
    if config.mail.is_none() {
        warn!("Mail provider is not configured; magic links cannot be sent");
    }
    if !config.dropbox.has_credentials() {
        info!("Dropbox credentials are not set; Dropbox links will answer 500");
    }

    // Build app state
    let state = AppState::new(db, config.clone())?;

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
