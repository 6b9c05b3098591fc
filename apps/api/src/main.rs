mod config;
mod errors;
mod geo;
mod geocoding;
mod matching;
mod routes;
mod state;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::geocoding::{build_http_client, CityLookup, CoordinateStore, RedisCoordinateStore};
use crate::matching::relevance::FuzzyRelevanceEngine;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on malformed numeric env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Jobmatch API v{}", env!("CARGO_PKG_VERSION"));

    // Persistent coordinate store (optional)
    let store: Option<Arc<dyn CoordinateStore>> = match &config.redis_url {
        Some(url) => {
            let client = redis::Client::open(url.as_str())?;
            info!("Redis coordinate store enabled");
            Some(Arc::new(RedisCoordinateStore::new(client)))
        }
        None => {
            warn!("REDIS_URL not set; geocoded cities will not be persisted");
            None
        }
    };

    // City lookup: seed from the static dataset up front
    let city_lookup = Arc::new(CityLookup::new(config.dataset_paths(), store));
    let seeded = city_lookup.ensure_loaded();
    info!("City lookup seeded with {seeded} cities");

    let http = build_http_client()?;
    if config.rapidapi_key.is_none() && config.google_maps_api_key.is_none() {
        warn!("No geocoding provider key configured; relying on request keys");
    }

    // Build app state
    let state = AppState {
        config: config.clone(),
        city_lookup,
        http,
        relevance: Arc::new(FuzzyRelevanceEngine::default()),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict allowed origins once the calling frontends are known

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
