use std::sync::Arc;

use crate::config::Config;
use crate::geocoding::CityLookup;
use crate::matching::relevance::RelevanceEngine;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    /// Process-wide city → coordinate resolver (dataset + persistent store).
    pub city_lookup: Arc<CityLookup>,
    /// Shared provider HTTP client; cloning shares the connection pool.
    pub http: reqwest::Client,
    /// Pluggable relevance engine. Default: FuzzyRelevanceEngine.
    pub relevance: Arc<dyn RelevanceEngine>,
}
