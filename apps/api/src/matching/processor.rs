//! Job processor: runs the full matching pipeline for one request.
//!
//! init → prefilter (parse + pick city per job, bounded concurrency) →
//! fuzzy relevance (only when phrases are given) → selection → completed.
//! Per-job problems are absorbed into the trace; anything unexpected is
//! recorded as `caught_exception` with an empty result.

use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::anyhow;
use chrono::Utc;
use futures::{stream, FutureExt, StreamExt};
use serde_json::Value;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::geo::{norm_state, parse_cities_for_state, split_phrases, to_num, Coordinate};
use crate::geocoding::{Geocoder, ProviderSettings};
use crate::matching::city_picker::{
    CityPicker, PickResult, DEFAULT_CITY_BATCH_SIZE, DEFAULT_EARLY_EXIT_KM,
};
use crate::matching::models::{
    DebugError, DebugInfo, DebugInputs, DebugSteps, FuzzyStep, Job, PrefilterSample,
    PrefilterStep, SelectionReason, SelectionStep, ServiceInput, ServiceOutput, Stage,
    UNKNOWN_JOB_ID,
};
use crate::matching::relevance::{RelevanceEngine, RelevanceRecord};

pub const DEFAULT_JOB_CONCURRENCY: usize = 6;
pub const MAX_RESULTS: usize = 3;
const DEBUG_MAX_SAMPLES: usize = 100;
const MAX_SAMPLES: usize = 15;

// ────────────────────────────────────────────────────────────────────────────
// Settings
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub job_concurrency: usize,
    pub city_batch_size: usize,
    pub early_exit_km: f64,
    pub debug: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            job_concurrency: DEFAULT_JOB_CONCURRENCY,
            city_batch_size: DEFAULT_CITY_BATCH_SIZE,
            early_exit_km: DEFAULT_EARLY_EXIT_KM,
            debug: false,
        }
    }
}

impl PipelineSettings {
    /// Applies the request's tuning values over `defaults`. Missing,
    /// non-numeric or non-positive values keep the default.
    pub fn resolve(defaults: &PipelineSettings, input: &ServiceInput) -> Self {
        let positive = |v: &Option<Value>| v.as_ref().and_then(to_num).filter(|n| *n > 0.0);
        let count = |v: &Option<Value>, fallback: usize| {
            positive(v)
                .map(|n| n as usize)
                .filter(|n| *n > 0)
                .unwrap_or(fallback)
                .max(1)
        };

        Self {
            job_concurrency: count(&input.job_concurrency, defaults.job_concurrency),
            city_batch_size: count(&input.city_batch_size, defaults.city_batch_size),
            early_exit_km: positive(&input.early_exit_km).unwrap_or(defaults.early_exit_km),
            debug: input.debug_flag().unwrap_or(defaults.debug),
        }
    }

    fn sample_cap(&self) -> usize {
        if self.debug {
            DEBUG_MAX_SAMPLES
        } else {
            MAX_SAMPLES
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Per-request context
// ────────────────────────────────────────────────────────────────────────────

struct Subscriber {
    lat: Option<f64>,
    lng: Option<f64>,
    city: String,
    state: String,
}

impl Subscriber {
    fn has_geo(&self) -> bool {
        self.lat
            .zip(self.lng)
            .and_then(|(lat, lng)| Coordinate::new(lat, lng))
            .is_some()
    }
}

/// Outcome of one job's prefilter task. Each task owns its job exclusively
/// and hands it back here; the trace is assembled afterwards.
enum JobOutcome {
    Dropped { id: String, title: Option<String> },
    Kept(RankedJob),
}

struct RankedJob {
    id: String,
    title: Option<String>,
    job: Job,
    pick: PickResult,
}

impl RankedJob {
    fn sort_key(&self) -> f64 {
        self.pick.distance_km.unwrap_or(f64::INFINITY)
    }
}

/// Which phrase lists are required and which ids matched them.
struct RelevanceGate {
    passion: Option<HashSet<String>>,
    license: Option<HashSet<String>>,
}

impl RelevanceGate {
    fn check(&self, id: &str) -> Result<(), String> {
        match (&self.passion, &self.license) {
            (Some(p), Some(l)) => {
                let (in_p, in_l) = (p.contains(id), l.contains(id));
                if in_p && in_l {
                    Ok(())
                } else {
                    Err(format!("no BOTH match (passion:{in_p}, license:{in_l})"))
                }
            }
            (Some(p), None) if !p.contains(id) => Err("no passion match".to_string()),
            (None, Some(l)) if !l.contains(id) => Err("no license match".to_string()),
            _ => Ok(()),
        }
    }
}

fn push_capped<T>(samples: &mut Vec<T>, item: T, cap: usize) {
    if samples.len() < cap {
        samples.push(item);
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

// ────────────────────────────────────────────────────────────────────────────
// Processor
// ────────────────────────────────────────────────────────────────────────────

pub struct JobProcessor {
    geocoder: Arc<dyn Geocoder>,
    picker: CityPicker,
    relevance: Arc<dyn RelevanceEngine>,
    settings: PipelineSettings,
    provider_keys: (bool, bool),
}

impl JobProcessor {
    pub fn new(
        geocoder: Arc<dyn Geocoder>,
        relevance: Arc<dyn RelevanceEngine>,
        settings: PipelineSettings,
    ) -> Self {
        let picker = CityPicker::new(
            geocoder.clone(),
            settings.city_batch_size,
            settings.early_exit_km,
        );
        Self {
            geocoder,
            picker,
            relevance,
            settings,
            provider_keys: (false, false),
        }
    }

    /// Records which provider keys were available for this request; only
    /// reported in the debug trace.
    pub fn with_provider_keys(mut self, providers: &ProviderSettings) -> Self {
        self.provider_keys = (providers.has_rapidapi_key(), providers.has_google_key());
        self
    }

    pub async fn process_jobs(&self, input: ServiceInput) -> ServiceOutput {
        let passion_raw = input.passion_raw();
        let licenses_raw = input.licenses_raw();
        let backfill = input.backfill();
        let form = input.nursing_form_jobs.unwrap_or_default();
        let subscriber = Subscriber {
            lat: form.lat(),
            lng: form.lng(),
            city: form.subscriber_city.clone().unwrap_or_default(),
            state: norm_state(form.subscriber_state.as_deref().unwrap_or("")),
        };
        let jobs = form.response_jobs.unwrap_or_default();

        let mut trace = DebugInfo {
            request_id: Uuid::new_v4(),
            started_at: Utc::now(),
            stage: Stage::Init,
            inputs: DebugInputs {
                jobs_len: jobs.len(),
                lat_parsed: subscriber.lat,
                lng_parsed: subscriber.lng,
                subscriber_city: subscriber.city.clone(),
                subscriber_state_norm: subscriber.state.clone(),
                job_passion_raw: passion_raw.clone(),
                licenses_raw: licenses_raw.clone(),
                geocode_provider: self.geocoder.provider_name().map(str::to_string),
                rapidapi_key_present: self.provider_keys.0,
                google_maps_key_present: self.provider_keys.1,
                job_concurrency: self.settings.job_concurrency,
                city_batch_size: self.settings.city_batch_size,
                early_exit_km: self.settings.early_exit_km,
                backfill_when_less_than_3: backfill,
                debug_on: self.settings.debug,
            },
            steps: DebugSteps {
                prefilter: PrefilterStep::default(),
                fuzzy: FuzzyStep {
                    threshold: self.relevance.threshold(),
                    passion_phrases: split_phrases(&passion_raw),
                    license_phrases: split_phrases(&licenses_raw),
                    matched_passion_ids_count: 0,
                    matched_license_ids_count: 0,
                },
                selection: SelectionStep::default(),
                mode: String::new(),
            },
            geocode_stats: self.geocoder.stats(),
            errors: Vec::new(),
            notes: Vec::new(),
        };

        if jobs.is_empty() {
            trace.notes.push("No jobs array or length == 0.".to_string());
            return ServiceOutput {
                result: Vec::new(),
                debug: trace,
            };
        }

        if subscriber.state.is_empty() {
            trace.notes.push("Missing subscriber_state.".to_string());
            return ServiceOutput {
                result: Vec::new(),
                debug: trace,
            };
        }

        let result = match self.run(&subscriber, jobs, backfill, &mut trace).await {
            Ok(result) => {
                trace.stage = Stage::Completed;
                result
            }
            Err(e) => {
                error!("Job processing failed at stage {:?}: {e:#}", trace.stage);
                trace.stage = Stage::CaughtException;
                trace.errors.push(DebugError {
                    location: "main_catch".to_string(),
                    message: format!("{e:#}"),
                });
                Vec::new()
            }
        };
        trace.geocode_stats = self.geocoder.stats();

        info!(
            request_id = %trace.request_id,
            stage = ?trace.stage,
            kept = trace.steps.prefilter.kept,
            returned = result.len(),
            "Job matching finished"
        );

        ServiceOutput {
            result,
            debug: trace,
        }
    }

    async fn run(
        &self,
        subscriber: &Subscriber,
        jobs: Vec<Job>,
        backfill: bool,
        trace: &mut DebugInfo,
    ) -> anyhow::Result<Vec<Job>> {
        let cap = self.settings.sample_cap();
        let have_geo = subscriber.has_geo();
        trace.stage = Stage::Prefilter;
        trace.steps.mode = if have_geo { "distance" } else { "no-geo-fallback" }.to_string();

        let outcomes = stream::iter(jobs)
            .map(|job| AssertUnwindSafe(self.prefilter_job(job, subscriber)).catch_unwind())
            .buffered(self.settings.job_concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        let mut ranked = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            let outcome =
                outcome.map_err(|p| anyhow!("job task panicked: {}", panic_message(p)))?;
            match outcome {
                JobOutcome::Dropped { id, title } => {
                    trace.steps.prefilter.dropped_no_state_city += 1;
                    push_capped(
                        &mut trace.steps.selection.reasons,
                        SelectionReason {
                            id,
                            title,
                            reason: "No city in subscriber state".to_string(),
                        },
                        cap,
                    );
                }
                JobOutcome::Kept(job) => {
                    push_capped(
                        &mut trace.steps.prefilter.samples,
                        PrefilterSample {
                            id: job.id.clone(),
                            title: job.title.clone(),
                            early_reason: job.pick.early,
                            picked_city: job.pick.chosen.raw.clone(),
                            distance_km: job.pick.distance_km,
                        },
                        cap,
                    );
                    ranked.push(job);
                }
            }
        }
        trace.steps.prefilter.kept = ranked.len();

        if ranked.is_empty() {
            trace
                .notes
                .push("All jobs filtered out before fuzzy matching.".to_string());
            return Ok(Vec::new());
        }

        if have_geo {
            ranked.sort_by(|a, b| a.sort_key().total_cmp(&b.sort_key()));
        }

        let gate = self.build_gate(&ranked, trace, cap);

        trace.stage = Stage::Selection;
        let mut picked: Vec<usize> = Vec::with_capacity(MAX_RESULTS);
        for (i, job) in ranked.iter().enumerate() {
            match gate.check(&job.id) {
                Ok(()) => {
                    picked.push(i);
                    if picked.len() >= MAX_RESULTS {
                        break;
                    }
                }
                Err(reason) => push_capped(
                    &mut trace.steps.selection.reasons,
                    SelectionReason {
                        id: job.id.clone(),
                        title: job.title.clone(),
                        reason,
                    },
                    cap,
                ),
            }
        }

        if picked.len() < MAX_RESULTS && backfill {
            trace
                .notes
                .push(format!("Backfilling {}", MAX_RESULTS - picked.len()));
            let mut seen: HashSet<String> = picked.iter().map(|&i| ranked[i].id.clone()).collect();
            for (i, job) in ranked.iter().enumerate() {
                if picked.len() >= MAX_RESULTS {
                    break;
                }
                if !picked.contains(&i) && seen.insert(job.id.clone()) {
                    picked.push(i);
                }
            }
        }

        let mut slots: Vec<Option<RankedJob>> = ranked.into_iter().map(Some).collect();
        Ok(picked
            .into_iter()
            .take(MAX_RESULTS)
            .filter_map(|i| slots[i].take().map(|r| r.job))
            .collect())
    }

    async fn prefilter_job(&self, mut job: Job, subscriber: &Subscriber) -> JobOutcome {
        let id = job.id();
        let title = job.title();
        let candidates = parse_cities_for_state(&job.location_text(), &subscriber.state);

        let pick = self
            .picker
            .pick(&candidates, subscriber.lat, subscriber.lng, &subscriber.city)
            .await;
        let Some(pick) = pick else {
            debug!("Dropping job {id}: no city in {}", subscriber.state);
            return JobOutcome::Dropped { id, title };
        };

        job.set_resolved_location(&pick.chosen.raw, pick.distance_km);
        JobOutcome::Kept(RankedJob {
            id,
            title,
            job,
            pick,
        })
    }

    fn build_gate(&self, ranked: &[RankedJob], trace: &mut DebugInfo, cap: usize) -> RelevanceGate {
        let passion = trace.steps.fuzzy.passion_phrases.clone();
        let license = trace.steps.fuzzy.license_phrases.clone();
        if passion.is_empty() && license.is_empty() {
            return RelevanceGate {
                passion: None,
                license: None,
            };
        }

        trace.stage = Stage::Fuzzy;
        let records = ranked
            .iter()
            .map(|r| RelevanceRecord::from_job(&r.job, self.relevance.fields()))
            .collect();
        let index = self.relevance.build(records);

        let mut collect = |phrases: &[String]| -> HashSet<String> {
            let mut ids = HashSet::new();
            for phrase in phrases {
                let hits = index.search(phrase);
                push_capped(
                    &mut trace.steps.selection.reasons,
                    SelectionReason {
                        id: format!("FUZZY_QUERY:{phrase}"),
                        title: Some(format!("hits:{}", hits.len())),
                        reason: "fuzzy_query".to_string(),
                    },
                    cap,
                );
                // Jobs without an id can never be told apart, so they never
                // satisfy a required phrase list.
                ids.extend(
                    hits.into_iter()
                        .map(|h| h.id)
                        .filter(|id| id != UNKNOWN_JOB_ID),
                );
            }
            ids
        };

        let passion_set = (!passion.is_empty()).then(|| collect(&passion));
        let license_set = (!license.is_empty()).then(|| collect(&license));

        trace.steps.fuzzy.matched_passion_ids_count = passion_set.as_ref().map_or(0, HashSet::len);
        trace.steps.fuzzy.matched_license_ids_count = license_set.as_ref().map_or(0, HashSet::len);

        RelevanceGate {
            passion: passion_set,
            license: license_set,
        }
    }
}
