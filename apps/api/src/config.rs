use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};

use crate::geocoding::dataset;
use crate::geocoding::providers::DEFAULT_RAPIDAPI_HOST;
use crate::geocoding::ProviderSettings;
use crate::matching::city_picker::{DEFAULT_CITY_BATCH_SIZE, DEFAULT_EARLY_EXIT_KM};
use crate::matching::processor::{PipelineSettings, DEFAULT_JOB_CONCURRENCY};

/// Application configuration loaded from environment variables.
/// Everything is optional; a malformed number fails startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub rust_log: String,
    /// Unset disables the persistent coordinate store.
    pub redis_url: Option<String>,
    pub cities_csv_path: Option<PathBuf>,
    pub rapidapi_key: Option<String>,
    pub rapidapi_host: String,
    pub google_maps_api_key: Option<String>,
    pub job_concurrency: usize,
    pub city_batch_size: usize,
    pub early_exit_km: f64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            redis_url: optional_env("REDIS_URL"),
            cities_csv_path: optional_env("CITIES_CSV_PATH").map(PathBuf::from),
            rapidapi_key: optional_env("RAPIDAPI_KEY"),
            rapidapi_host: optional_env("RAPIDAPI_HOST")
                .unwrap_or_else(|| DEFAULT_RAPIDAPI_HOST.to_string()),
            google_maps_api_key: optional_env("GOOGLE_MAPS_API_KEY"),
            job_concurrency: parse_env("JOB_CONCURRENCY", DEFAULT_JOB_CONCURRENCY)?.max(1),
            city_batch_size: parse_env("CITY_BATCH_SIZE", DEFAULT_CITY_BATCH_SIZE)?.max(1),
            early_exit_km: parse_env("EARLY_EXIT_KM", DEFAULT_EARLY_EXIT_KM)?,
        })
    }

    /// `CITIES_CSV_PATH` when set, otherwise the conventional locations.
    pub fn dataset_paths(&self) -> Vec<PathBuf> {
        match &self.cities_csv_path {
            Some(path) => vec![path.clone()],
            None => dataset::default_paths(),
        }
    }

    pub fn pipeline_defaults(&self) -> PipelineSettings {
        PipelineSettings {
            job_concurrency: self.job_concurrency,
            city_batch_size: self.city_batch_size,
            early_exit_km: self.early_exit_km,
            debug: false,
        }
    }

    /// Provider credentials for one request: configured keys win, the
    /// request's keys fill the gaps.
    pub fn provider_settings(
        &self,
        request_rapidapi_key: Option<String>,
        request_google_key: Option<String>,
    ) -> ProviderSettings {
        ProviderSettings {
            rapidapi_key: self.rapidapi_key.clone().or(non_blank(request_rapidapi_key)),
            rapidapi_host: self.rapidapi_host.clone(),
            google_maps_api_key: self
                .google_maps_api_key
                .clone()
                .or(non_blank(request_google_key)),
            ..ProviderSettings::default()
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn optional_env(key: &str) -> Option<String> {
    non_blank(std::env::var(key).ok())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    parse_value(key, optional_env(key).as_deref(), default)
}

fn parse_value<T>(key: &str, raw: Option<&str>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} must be a valid number, got '{raw}'")),
        None => Ok(default),
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        port: 0,
        rust_log: "info".to_string(),
        redis_url: None,
        cities_csv_path: None,
        rapidapi_key: None,
        rapidapi_host: DEFAULT_RAPIDAPI_HOST.to_string(),
        google_maps_api_key: None,
        job_concurrency: DEFAULT_JOB_CONCURRENCY,
        city_batch_size: DEFAULT_CITY_BATCH_SIZE,
        early_exit_km: DEFAULT_EARLY_EXIT_KM,
    }
}
