// Coordinate resolution: static dataset and persistent store tiers
// (`city_lookup`), remote providers, and the caching geocoding service.

pub mod city_lookup;
pub mod dataset;
pub mod providers;
pub mod service;
pub mod stats;
pub mod store;

pub use city_lookup::CityLookup;
pub use providers::{build_http_client, select_provider, ProviderSettings};
pub use service::{Geocoder, GeocodingService};
pub use stats::GeocodeStats;
pub use store::{CoordinateStore, RedisCoordinateStore};
