//! Wire types for the matching endpoint and the debug trace it returns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::geo::to_num;
use crate::geocoding::GeocodeStats;
use crate::matching::city_picker::EarlyExit;

pub const UNKNOWN_JOB_ID: &str = "(unknown)";

// ────────────────────────────────────────────────────────────────────────────
// Job
// ────────────────────────────────────────────────────────────────────────────

/// A job posting as received. Only location-related fields are read and
/// written; everything else passes through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Job(pub Map<String, Value>);

impl Job {
    /// First present of `job_eid`, `id`, `url`.
    pub fn id(&self) -> String {
        ["job_eid", "id", "url"]
            .iter()
            .find_map(|k| self.text(k))
            .unwrap_or_else(|| UNKNOWN_JOB_ID.to_string())
    }

    pub fn title(&self) -> Option<String> {
        self.text("title")
    }

    /// `location`, falling back to `location_string`.
    pub fn location_text(&self) -> String {
        self.text("location")
            .or_else(|| self.text("location_string"))
            .unwrap_or_default()
    }

    /// Non-empty string (or number) value of `field`.
    pub fn text(&self, field: &str) -> Option<String> {
        match self.0.get(field)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Rewrites the location fields to the chosen city and records distance.
    pub fn set_resolved_location(&mut self, display: &str, distance_km: Option<f64>) {
        self.0
            .insert("location".into(), Value::String(display.to_string()));
        self.0
            .insert("location_string".into(), Value::String(display.to_string()));
        self.0.insert(
            "distance_km".into(),
            distance_km
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
        );
    }
}

#[cfg(test)]
impl Job {
    pub fn distance_km(&self) -> Option<f64> {
        self.0.get("distance_km").and_then(to_num)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Request
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriberJobs {
    #[serde(default)]
    pub response_jobs: Option<Vec<Job>>,
    #[serde(default)]
    pub latitude: Option<Value>,
    #[serde(default)]
    pub longitude: Option<Value>,
    #[serde(default)]
    pub city_latitude: Option<Value>,
    #[serde(default)]
    pub city_longitude: Option<Value>,
    #[serde(default)]
    pub subscriber_city: Option<String>,
    #[serde(default)]
    pub subscriber_state: Option<String>,
}

impl SubscriberJobs {
    /// `latitude`, else `city_latitude`, coerced to a finite number.
    pub fn lat(&self) -> Option<f64> {
        self.latitude
            .as_ref()
            .or(self.city_latitude.as_ref())
            .and_then(to_num)
    }

    pub fn lng(&self) -> Option<f64> {
        self.longitude
            .as_ref()
            .or(self.city_longitude.as_ref())
            .and_then(to_num)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceInput {
    #[serde(default)]
    pub nursing_form_jobs: Option<SubscriberJobs>,
    #[serde(default)]
    pub job_passion: Option<Value>,
    #[serde(default)]
    pub licenses: Option<Value>,
    #[serde(default)]
    pub backfill_when_less_than_3: Option<Value>,
    #[serde(default)]
    pub job_concurrency: Option<Value>,
    #[serde(default)]
    pub city_batch_size: Option<Value>,
    #[serde(default)]
    pub early_exit_km: Option<Value>,
    #[serde(default)]
    pub debug: Option<Value>,
    #[serde(default)]
    pub rapidapi_key: Option<String>,
    #[serde(default)]
    pub google_maps_api_key: Option<String>,
}

impl ServiceInput {
    pub fn passion_raw(&self) -> String {
        self.job_passion.as_ref().map(to_text).unwrap_or_default()
    }

    pub fn licenses_raw(&self) -> String {
        self.licenses.as_ref().map(to_text).unwrap_or_default()
    }

    pub fn backfill(&self) -> bool {
        self.backfill_when_less_than_3.as_ref().is_some_and(to_flag)
    }

    /// `None` when the request leaves the flag unset (absent or null).
    pub fn debug_flag(&self) -> Option<bool> {
        self.debug.as_ref().filter(|v| !v.is_null()).map(to_flag)
    }
}

/// Loose truthiness for request flags: `false`, null, zero, NaN and the
/// empty string are false; everything else is true.
fn to_flag(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Strings pass through, numbers are stringified, anything else is empty.
fn to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Response + debug trace
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ServiceOutput {
    pub result: Vec<Job>,
    #[serde(rename = "__debug")]
    pub debug: DebugInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    Prefilter,
    Fuzzy,
    Selection,
    Completed,
    CaughtException,
}

#[derive(Debug, Clone, Serialize)]
pub struct DebugInfo {
    pub request_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub stage: Stage,
    pub inputs: DebugInputs,
    pub steps: DebugSteps,
    pub geocode_stats: GeocodeStats,
    pub errors: Vec<DebugError>,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DebugInputs {
    pub jobs_len: usize,
    pub lat_parsed: Option<f64>,
    pub lng_parsed: Option<f64>,
    pub subscriber_city: String,
    pub subscriber_state_norm: String,
    pub job_passion_raw: String,
    pub licenses_raw: String,
    pub geocode_provider: Option<String>,
    pub rapidapi_key_present: bool,
    pub google_maps_key_present: bool,
    pub job_concurrency: usize,
    pub city_batch_size: usize,
    pub early_exit_km: f64,
    pub backfill_when_less_than_3: bool,
    pub debug_on: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DebugSteps {
    pub prefilter: PrefilterStep,
    pub fuzzy: FuzzyStep,
    pub selection: SelectionStep,
    pub mode: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PrefilterStep {
    pub dropped_no_state_city: usize,
    pub kept: usize,
    pub samples: Vec<PrefilterSample>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrefilterSample {
    pub id: String,
    pub title: Option<String>,
    pub early_reason: EarlyExit,
    pub picked_city: String,
    pub distance_km: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FuzzyStep {
    pub threshold: f64,
    pub passion_phrases: Vec<String>,
    pub license_phrases: Vec<String>,
    pub matched_passion_ids_count: usize,
    pub matched_license_ids_count: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SelectionStep {
    pub reasons: Vec<SelectionReason>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectionReason {
    pub id: String,
    pub title: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DebugError {
    #[serde(rename = "where")]
    pub location: String,
    pub message: String,
}
