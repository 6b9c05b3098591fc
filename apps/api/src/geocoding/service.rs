use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::geo::{Coordinate, LocationCandidate};
use crate::geocoding::city_lookup::CityLookup;
use crate::geocoding::providers::GeocodeProvider;
use crate::geocoding::stats::{Counter, GeocodeCounters, GeocodeStats};

/// Resolves a city/state pair to coordinates. The city picker and the job
/// processor only see this trait.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode_city_state(&self, city: &str, state: &str) -> Option<Coordinate>;

    fn stats(&self) -> GeocodeStats {
        GeocodeStats::default()
    }

    /// Name of the remote provider behind this geocoder, if any.
    fn provider_name(&self) -> Option<&'static str> {
        None
    }

    /// Geocodes `candidates` in fixed-size batches, each batch concurrently.
    /// Output order matches input order.
    async fn geocode_batch(
        &self,
        candidates: &[LocationCandidate],
        batch_size: usize,
    ) -> Vec<Option<Coordinate>> {
        let mut results = Vec::with_capacity(candidates.len());
        for batch in candidates.chunks(batch_size.max(1)) {
            let coords = join_all(
                batch
                    .iter()
                    .map(|c| self.geocode_city_state(&c.city, &c.state)),
            )
            .await;
            results.extend(coords);
        }
        results
    }
}

/// Geocoding front door: memoizes per exact `"<city>, <state>"` string,
/// consults the city lookup tiers, and only then calls the remote provider.
pub struct GeocodingService {
    lookup: Arc<CityLookup>,
    provider: Option<Arc<dyn GeocodeProvider>>,
    cache: Mutex<HashMap<String, Option<Coordinate>>>,
    counters: GeocodeCounters,
}

impl GeocodingService {
    pub fn new(lookup: Arc<CityLookup>, provider: Option<Arc<dyn GeocodeProvider>>) -> Self {
        Self {
            lookup,
            provider,
            cache: Mutex::new(HashMap::new()),
            counters: GeocodeCounters::default(),
        }
    }

    fn remember(&self, key: String, value: Option<Coordinate>) -> Option<Coordinate> {
        self.cache.lock().insert(key, value);
        value
    }

    async fn resolve(&self, city: &str, state: &str) -> Option<Coordinate> {
        let key = format!("{city}, {state}");

        let cached = self.cache.lock().get(&key).copied();
        if let Some(hit) = cached {
            self.counters.bump(Counter::CacheHit);
            return hit;
        }
        self.counters.bump(Counter::CacheMiss);

        if let Some(coord) = self.lookup.lookup_city_async(city, state).await {
            self.counters.bump(Counter::CsvHit);
            return self.remember(key, Some(coord));
        }

        let Some(provider) = self.provider.as_ref() else {
            self.counters.bump(Counter::HttpFail);
            self.counters.bump(Counter::ParsedFail);
            return self.remember(key, None);
        };

        self.counters.bump(Counter::CallMade);
        let result = match provider.fetch(city, state).await {
            Ok(Some(coord)) => {
                self.counters.bump(Counter::HttpOk);
                self.counters.bump(Counter::ParsedOk);
                self.lookup.add_city(city, state, coord);
                Some(coord)
            }
            Ok(None) => {
                self.counters.bump(Counter::HttpOk);
                self.counters.bump(Counter::ParsedFail);
                debug!("{} returned no coordinates for {key}", provider.name());
                None
            }
            Err(e) => {
                self.counters.bump(Counter::HttpFail);
                self.counters.bump(Counter::ParsedFail);
                warn!("{} geocode failed for {key}: {e}", provider.name());
                None
            }
        };
        self.remember(key, result)
    }
}

#[async_trait]
impl Geocoder for GeocodingService {
    async fn geocode_city_state(&self, city: &str, state: &str) -> Option<Coordinate> {
        self.resolve(city, state).await
    }

    fn stats(&self) -> GeocodeStats {
        self.counters.snapshot()
    }

    fn provider_name(&self) -> Option<&'static str> {
        self.provider.as_ref().map(|p| p.name())
    }
}
