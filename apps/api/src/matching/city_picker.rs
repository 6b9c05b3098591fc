//! City picker: chooses the best in-state city for one job.
//!
//! Decision order: exact subscriber-city match, deterministic fallback when
//! the subscriber has no coordinates, then a batched nearest-city search that
//! stops as soon as a candidate falls within the early-exit radius.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::geo::{round3, Coordinate, LocationCandidate};
use crate::geocoding::Geocoder;

pub const DEFAULT_CITY_BATCH_SIZE: usize = 6;
pub const DEFAULT_EARLY_EXIT_KM: f64 = 100.0;

/// Which exit of the decision order produced a pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EarlyExit {
    ExactMatch,
    NoGeo,
    Threshold,
    BestAfterAll,
    NoGeocodeSuccess,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PickResult {
    pub chosen: LocationCandidate,
    pub distance_km: Option<f64>,
    pub early: EarlyExit,
}

pub struct CityPicker {
    geocoder: Arc<dyn Geocoder>,
    batch_size: usize,
    early_exit_km: f64,
}

impl CityPicker {
    pub fn new(geocoder: Arc<dyn Geocoder>, batch_size: usize, early_exit_km: f64) -> Self {
        Self {
            geocoder,
            batch_size: batch_size.max(1),
            early_exit_km,
        }
    }

    /// Picks one city out of `candidates`. Returns `None` only for an empty
    /// candidate list.
    pub async fn pick(
        &self,
        candidates: &[LocationCandidate],
        sub_lat: Option<f64>,
        sub_lng: Option<f64>,
        sub_city: &str,
    ) -> Option<PickResult> {
        if candidates.is_empty() {
            return None;
        }

        let sub_city = sub_city.trim().to_lowercase();
        if !sub_city.is_empty() {
            if let Some(exact) = candidates
                .iter()
                .find(|c| c.city.trim().to_lowercase() == sub_city)
            {
                return Some(PickResult {
                    chosen: exact.clone(),
                    distance_km: Some(0.0),
                    early: EarlyExit::ExactMatch,
                });
            }
        }

        let Some(origin) = sub_lat.zip(sub_lng).and_then(|(lat, lng)| Coordinate::new(lat, lng))
        else {
            return Some(PickResult {
                chosen: first_by_name(candidates).clone(),
                distance_km: None,
                early: EarlyExit::NoGeo,
            });
        };

        let mut best: Option<(usize, f64)> = None;
        for (batch_no, batch) in candidates.chunks(self.batch_size).enumerate() {
            let offset = batch_no * self.batch_size;
            let coords = self.geocoder.geocode_batch(batch, self.batch_size).await;

            for (j, coord) in coords.into_iter().enumerate() {
                let Some(coord) = coord else { continue };
                let d = origin.distance_km(&coord);
                if best.map_or(true, |(_, best_d)| d < best_d) {
                    best = Some((offset + j, d));
                }
            }

            if let Some((idx, d)) = best {
                if d <= self.early_exit_km {
                    return Some(PickResult {
                        chosen: candidates[idx].clone(),
                        distance_km: Some(round3(d)),
                        early: EarlyExit::Threshold,
                    });
                }
            }
        }

        Some(match best {
            Some((idx, d)) => PickResult {
                chosen: candidates[idx].clone(),
                distance_km: Some(round3(d)),
                early: EarlyExit::BestAfterAll,
            },
            None => PickResult {
                chosen: first_by_name(candidates).clone(),
                distance_km: None,
                early: EarlyExit::NoGeocodeSuccess,
            },
        })
    }
}

/// Alphabetical first, ignoring case and accents; ties keep input order.
fn first_by_name(candidates: &[LocationCandidate]) -> &LocationCandidate {
    candidates
        .iter()
        .min_by(|a, b| compare_names(&a.city, &b.city))
        .unwrap_or(&candidates[0])
}

/// Compares on base letters only: accents and case are ignored, so
/// "Ángeles" sorts with the A's.
fn compare_names(a: &str, b: &str) -> Ordering {
    base_letters(a).cmp(&base_letters(b))
}

fn base_letters(name: &str) -> String {
    name.nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
pub mod testing {
    //! Geocoder stub shared by picker and processor tests.

    use std::collections::HashMap;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct StubGeocoder {
        pub table: HashMap<String, Coordinate>,
        pub calls: Mutex<Vec<String>>,
    }

    impl StubGeocoder {
        pub fn new(entries: &[(&str, f64, f64)]) -> Self {
            Self {
                table: entries
                    .iter()
                    .map(|(city, lat, lng)| {
                        (city.to_string(), Coordinate::new(*lat, *lng).unwrap())
                    })
                    .collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl Geocoder for StubGeocoder {
        async fn geocode_city_state(&self, city: &str, _state: &str) -> Option<Coordinate> {
            self.calls.lock().push(city.to_string());
            self.table.get(city).copied()
        }
    }
}
