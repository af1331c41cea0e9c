mod config;
mod db;
mod error;
mod ingest;
mod routes;

use std::sync::Arc;

use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::db::Database;
use crate::ingest::Ingestor;
use crate::routes::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "feedloft=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = if std::path::Path::new("feedloft.toml").exists() {
        Config::load("feedloft.toml")?
    } else {
        info!("No feedloft.toml found, using defaults");
        Config::default()
    };

    // Initialize database
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| config.database_url.clone());
    let db = Database::new(&database_url).await?;
    db.initialize().await?;
    info!("Database initialized");

    let db = Arc::new(db);

    // Create ingestor and app state
    let ingestor = Arc::new(Ingestor::new(db.clone(), &config));
    let state = Arc::new(AppState {
        db: db.clone(),
        ingestor,
    });

    // Build router
    let app = build_router(state).layer(TraceLayer::new_for_http());

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!("Server starting on http://{}", config.bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}
