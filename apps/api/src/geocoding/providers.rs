//! Remote geocoding providers. Exactly one is active per service instance,
//! chosen from whichever credential is configured.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;

use crate::geo::{to_num, Coordinate};

pub const DEFAULT_RAPIDAPI_HOST: &str = "google-maps-geocoding3.p.rapidapi.com";
const GOOGLE_GEOCODE_BASE_URL: &str = "https://maps.googleapis.com";
const HTTP_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider returned status {status}")]
    Status { status: u16 },

    #[error("Provider rejected request: {0}")]
    Rejected(String),
}

/// A remote geocoding backend.
///
/// `Err` means the call itself failed (transport error, non-2xx, provider
/// error status). `Ok(None)` means a response arrived but held no usable
/// coordinates.
#[async_trait]
pub trait GeocodeProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(&self, city: &str, state: &str) -> Result<Option<Coordinate>, GeocodeError>;
}

/// Credentials and endpoints for the remote providers.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub rapidapi_key: Option<String>,
    pub rapidapi_host: String,
    /// Overrides `https://<rapidapi_host>`; used by tests.
    pub rapidapi_base_url: Option<String>,
    pub google_maps_api_key: Option<String>,
    /// Overrides the Google Maps base URL; used by tests.
    pub google_base_url: Option<String>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            rapidapi_key: None,
            rapidapi_host: DEFAULT_RAPIDAPI_HOST.to_string(),
            rapidapi_base_url: None,
            google_maps_api_key: None,
            google_base_url: None,
        }
    }
}

impl ProviderSettings {
    pub fn has_rapidapi_key(&self) -> bool {
        non_empty(&self.rapidapi_key).is_some()
    }

    pub fn has_google_key(&self) -> bool {
        non_empty(&self.google_maps_api_key).is_some()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Shared HTTP client for provider calls.
pub fn build_http_client() -> reqwest::Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .build()
}

/// Picks the provider: RapidAPI when its key is present, else Google Maps,
/// else none (every lookup then resolves to not-found without a call).
pub fn select_provider(
    http: Client,
    settings: &ProviderSettings,
) -> Option<Arc<dyn GeocodeProvider>> {
    if let Some(key) = non_empty(&settings.rapidapi_key) {
        let base_url = settings
            .rapidapi_base_url
            .clone()
            .unwrap_or_else(|| format!("https://{}", settings.rapidapi_host));
        return Some(Arc::new(RapidApiProvider {
            http,
            api_key: key.to_string(),
            host: settings.rapidapi_host.clone(),
            base_url,
        }));
    }

    if let Some(key) = non_empty(&settings.google_maps_api_key) {
        let base_url = settings
            .google_base_url
            .clone()
            .unwrap_or_else(|| GOOGLE_GEOCODE_BASE_URL.to_string());
        return Some(Arc::new(GoogleMapsProvider {
            http,
            api_key: key.to_string(),
            base_url,
        }));
    }

    None
}

// ────────────────────────────────────────────────────────────────────────────
// RapidAPI proxy
// ────────────────────────────────────────────────────────────────────────────

pub struct RapidApiProvider {
    http: Client,
    api_key: String,
    host: String,
    base_url: String,
}

#[async_trait]
impl GeocodeProvider for RapidApiProvider {
    fn name(&self) -> &'static str {
        "rapidapi"
    }

    async fn fetch(&self, city: &str, state: &str) -> Result<Option<Coordinate>, GeocodeError> {
        let response = self
            .http
            .get(format!("{}/geocode", self.base_url.trim_end_matches('/')))
            .query(&[("address", format!("{city}, {state}"))])
            .header("x-rapidapi-host", &self.host)
            .header("x-rapidapi-key", &self.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GeocodeError::Status {
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        Ok(serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| parse_geocode_payload(&v)))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Google Maps Geocoding API
// ────────────────────────────────────────────────────────────────────────────

pub struct GoogleMapsProvider {
    http: Client,
    api_key: String,
    base_url: String,
}

#[async_trait]
impl GeocodeProvider for GoogleMapsProvider {
    fn name(&self) -> &'static str {
        "google"
    }

    async fn fetch(&self, city: &str, state: &str) -> Result<Option<Coordinate>, GeocodeError> {
        let response = self
            .http
            .get(format!(
                "{}/maps/api/geocode/json",
                self.base_url.trim_end_matches('/')
            ))
            .query(&[
                ("address", format!("{city}, {state}")),
                ("key", self.api_key.clone()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GeocodeError::Status {
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        let Ok(body) = serde_json::from_str::<Value>(&body) else {
            return Ok(None);
        };
        let api_status = body.get("status").and_then(Value::as_str).unwrap_or("");
        let has_result = body
            .get("results")
            .and_then(Value::as_array)
            .is_some_and(|r| !r.is_empty());
        if api_status != "OK" || !has_result {
            return Err(GeocodeError::Rejected(api_status.to_string()));
        }

        Ok(parse_geocode_payload(&body))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Payload parsing
// ────────────────────────────────────────────────────────────────────────────

/// Extracts coordinates from any of the payload shapes the providers return:
///
/// - flat `{latitude, longitude}`
/// - `{results: [{geometry: {location: {lat, lng}}}]}`
/// - `{geometry: {location: {lat, lng}}}`
///
/// Numeric strings are accepted; non-finite values are rejected.
pub fn parse_geocode_payload(data: &Value) -> Option<Coordinate> {
    if let (Some(lat), Some(lng)) = (data.get("latitude"), data.get("longitude")) {
        return Coordinate::new(to_num(lat)?, to_num(lng)?);
    }

    let location = data
        .get("results")
        .and_then(Value::as_array)
        .and_then(|results| results.first())
        .and_then(|first| first.pointer("/geometry/location"))
        .or_else(|| data.pointer("/geometry/location"))?;

    Coordinate::new(to_num(location.get("lat")?)?, to_num(location.get("lng")?)?)
}

#[cfg(test)]
mod tests {
    use httptest::matchers::{all_of, contains, request, url_decoded};
    use httptest::responders::{json_encoded, status_code};
    use httptest::{Expectation, Server};
    use serde_json::json;

    use super::*;

    fn rapid_settings(server: &Server) -> ProviderSettings {
        ProviderSettings {
            rapidapi_key: Some("test-key".into()),
            rapidapi_base_url: Some(format!("http://{}", server.addr())),
            ..ProviderSettings::default()
        }
    }

    #[test]
    fn test_parse_flat_shape() {
        let c = parse_geocode_payload(&json!({"latitude": 37.33, "longitude": "-121.88"}));
        assert_eq!(c, Coordinate::new(37.33, -121.88));
    }

    #[test]
    fn test_parse_results_shape() {
        let c = parse_geocode_payload(&json!({
            "results": [{"geometry": {"location": {"lat": 38.58, "lng": -121.49}}}],
            "status": "OK"
        }));
        assert_eq!(c, Coordinate::new(38.58, -121.49));
    }

    #[test]
    fn test_parse_single_geometry_shape() {
        let c = parse_geocode_payload(&json!({"geometry": {"location": {"lat": 1.5, "lng": 2.5}}}));
        assert_eq!(c, Coordinate::new(1.5, 2.5));
    }

    #[test]
    fn test_parse_rejects_unusable_payloads() {
        assert!(parse_geocode_payload(&json!({})).is_none());
        assert!(parse_geocode_payload(&json!({"results": []})).is_none());
        assert!(parse_geocode_payload(&json!({"latitude": "abc", "longitude": 1})).is_none());
        assert!(parse_geocode_payload(&json!({"latitude": null, "longitude": 1})).is_none());
        assert!(parse_geocode_payload(&json!({"geometry": {"location": {"lat": 1}}})).is_none());
    }

    #[test]
    fn test_selection_prefers_rapidapi() {
        let settings = ProviderSettings {
            rapidapi_key: Some("r".into()),
            google_maps_api_key: Some("g".into()),
            ..ProviderSettings::default()
        };
        let provider = select_provider(Client::new(), &settings).unwrap();
        assert_eq!(provider.name(), "rapidapi");
    }

    #[test]
    fn test_selection_falls_back_to_google_then_none() {
        let settings = ProviderSettings {
            rapidapi_key: Some("  ".into()),
            google_maps_api_key: Some("g".into()),
            ..ProviderSettings::default()
        };
        assert_eq!(select_provider(Client::new(), &settings).unwrap().name(), "google");
        assert!(select_provider(Client::new(), &ProviderSettings::default()).is_none());
    }

    #[tokio::test]
    async fn test_rapidapi_fetch_parses_flat_response() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/geocode"),
                request::query(url_decoded(contains(("address", "San Jose, CA")))),
            ])
            .respond_with(json_encoded(json!({"latitude": 37.3382, "longitude": -121.8863}))),
        );

        let provider = select_provider(Client::new(), &rapid_settings(&server)).unwrap();
        let coord = provider.fetch("San Jose", "CA").await.unwrap();
        assert_eq!(coord, Coordinate::new(37.3382, -121.8863));
    }

    #[tokio::test]
    async fn test_rapidapi_non_2xx_is_an_error() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/geocode"))
                .respond_with(status_code(503)),
        );

        let provider = select_provider(Client::new(), &rapid_settings(&server)).unwrap();
        let err = provider.fetch("Fresno", "CA").await.unwrap_err();
        assert!(matches!(err, GeocodeError::Status { status: 503 }));
    }

    #[tokio::test]
    async fn test_rapidapi_unparsable_body_is_not_found() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/geocode"))
                .respond_with(json_encoded(json!({"message": "no match"}))),
        );

        let provider = select_provider(Client::new(), &rapid_settings(&server)).unwrap();
        assert_eq!(provider.fetch("Atlantis", "CA").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_google_fetch_and_error_status() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/maps/api/geocode/json"),
                request::query(url_decoded(contains(("address", "Sacramento, CA")))),
            ])
            .respond_with(json_encoded(json!({
                "status": "OK",
                "results": [{"geometry": {"location": {"lat": 38.5816, "lng": -121.4944}}}]
            }))),
        );
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/maps/api/geocode/json"),
                request::query(url_decoded(contains(("address", "Nowhere, CA")))),
            ])
            .respond_with(json_encoded(json!({"status": "ZERO_RESULTS", "results": []}))),
        );

        let settings = ProviderSettings {
            google_maps_api_key: Some("g-key".into()),
            google_base_url: Some(format!("http://{}", server.addr())),
            ..ProviderSettings::default()
        };
        let provider = select_provider(Client::new(), &settings).unwrap();
        assert_eq!(
            provider.fetch("Sacramento", "CA").await.unwrap(),
            Coordinate::new(38.5816, -121.4944)
        );
        assert!(matches!(
            provider.fetch("Nowhere", "CA").await,
            Err(GeocodeError::Rejected(s)) if s == "ZERO_RESULTS"
        ));
    }

    #[tokio::test]
    async fn test_google_non_json_body_is_not_found() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/maps/api/geocode/json"))
                .respond_with(status_code(200).body("<html>maintenance</html>")),
        );

        let settings = ProviderSettings {
            google_maps_api_key: Some("g-key".into()),
            google_base_url: Some(format!("http://{}", server.addr())),
            ..ProviderSettings::default()
        };
        let provider = select_provider(Client::new(), &settings).unwrap();
        assert_eq!(provider.fetch("Fresno", "CA").await.unwrap(), None);
    }
}
