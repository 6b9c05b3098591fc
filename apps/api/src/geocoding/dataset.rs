//! Static US city reference dataset (simplemaps-style `uscities.csv`).
//!
//! Column positions have moved between dataset revisions, so columns are
//! located by header name first and only fall back to the pinned legacy
//! layout when the header does not name them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord};
use thiserror::Error;
use tracing::{info, warn};

use crate::geo::{cache_key, Coordinate};

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("City dataset not found (tried: {0})")]
    NotFound(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Column indices of the fields the index is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnLayout {
    pub city: usize,
    pub city_ascii: usize,
    pub state_id: usize,
    pub lat: usize,
    pub lng: usize,
}

impl ColumnLayout {
    /// Layout of the legacy `uscities.csv` revision.
    pub const LEGACY: ColumnLayout = ColumnLayout {
        city: 0,
        city_ascii: 1,
        state_id: 2,
        lat: 6,
        lng: 7,
    };

    /// Finds the columns by header name; `None` when any is missing.
    pub fn from_header(header: &StringRecord) -> Option<Self> {
        let position = |name: &str| {
            header
                .iter()
                .position(|h| h.trim().trim_start_matches('\u{feff}').eq_ignore_ascii_case(name))
        };
        Some(Self {
            city: position("city")?,
            city_ascii: position("city_ascii")?,
            state_id: position("state_id")?,
            lat: position("lat")?,
            lng: position("lng")?,
        })
    }

    fn resolve(header: &StringRecord) -> Self {
        Self::from_header(header).unwrap_or_else(|| {
            warn!("City dataset header not recognized; using legacy column layout");
            Self::LEGACY
        })
    }
}

/// Default locations searched when no explicit path is configured.
pub fn default_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("data").join("uscities.csv"),
        PathBuf::from("uscities.csv"),
    ]
}

/// Returns the first existing path among `candidates`.
pub fn locate(candidates: &[PathBuf]) -> Result<PathBuf, DatasetError> {
    candidates
        .iter()
        .find(|p| p.exists())
        .cloned()
        .ok_or_else(|| {
            DatasetError::NotFound(
                candidates
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            )
        })
}

/// Reads the dataset into a CacheKey → coordinate index.
///
/// Rows with missing fields or non-finite coordinates are skipped. The
/// alias keyed by the accented `city` name never overrides an existing key.
pub fn load_index(path: &Path) -> Result<HashMap<String, Coordinate>, DatasetError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let layout = ColumnLayout::resolve(reader.headers()?);
    let mut index = HashMap::new();
    let mut skipped = 0usize;

    for record in reader.records() {
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                skipped += 1;
                tracing::debug!("Skipping unreadable dataset row: {e}");
                continue;
            }
        };
        if !index_record(&record, layout, &mut index) {
            skipped += 1;
        }
    }

    info!(
        "City lookup loaded: {} cities indexed from {} ({} rows skipped)",
        index.len(),
        path.display(),
        skipped
    );
    Ok(index)
}

fn index_record(
    record: &StringRecord,
    layout: ColumnLayout,
    index: &mut HashMap<String, Coordinate>,
) -> bool {
    let field = |i: usize| record.get(i).map(str::trim).filter(|s| !s.is_empty());

    let (Some(city_ascii), Some(state_id), Some(lat), Some(lng)) = (
        field(layout.city_ascii),
        field(layout.state_id),
        field(layout.lat),
        field(layout.lng),
    ) else {
        return false;
    };

    let Some(coord) = lat
        .parse::<f64>()
        .ok()
        .zip(lng.parse::<f64>().ok())
        .and_then(|(lat, lng)| Coordinate::new(lat, lng))
    else {
        return false;
    };

    index.insert(cache_key(city_ascii, state_id), coord);

    if let Some(city) = field(layout.city) {
        if city != city_ascii {
            index.entry(cache_key(city, state_id)).or_insert(coord);
        }
    }
    true
}
