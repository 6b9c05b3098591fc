use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use tracing::info;

use crate::errors::AppError;
use crate::geocoding::{select_provider, GeocodingService};
use crate::matching::models::{ServiceInput, ServiceOutput};
use crate::matching::processor::{JobProcessor, PipelineSettings};
use crate::state::AppState;

/// POST /api/v1/jobs/match
///
/// Each request gets its own geocoding service, so the exact-string cache
/// and the geocode counters in `__debug` are scoped to this call. The city
/// lookup behind it is shared.
pub async fn handle_match_jobs(
    State(state): State<AppState>,
    payload: Result<Json<ServiceInput>, JsonRejection>,
) -> Result<Json<ServiceOutput>, AppError> {
    let Json(input) = payload?;
    let has_jobs = input
        .nursing_form_jobs
        .as_ref()
        .is_some_and(|form| form.response_jobs.is_some());
    if !has_jobs {
        return Err(AppError::Validation(
            "nursing_form_jobs.response_jobs is required".to_string(),
        ));
    }

    let providers = state
        .config
        .provider_settings(input.rapidapi_key.clone(), input.google_maps_api_key.clone());
    let provider = select_provider(state.http.clone(), &providers);
    let geocoder = Arc::new(GeocodingService::new(state.city_lookup.clone(), provider));

    let settings = PipelineSettings::resolve(&state.config.pipeline_defaults(), &input);
    info!(
        job_concurrency = settings.job_concurrency,
        city_batch_size = settings.city_batch_size,
        early_exit_km = settings.early_exit_km,
        "Matching jobs"
    );

    let processor = JobProcessor::new(geocoder, state.relevance.clone(), settings)
        .with_provider_keys(&providers);
    Ok(Json(processor.process_jobs(input).await))
}
