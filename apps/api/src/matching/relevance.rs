//! Relevance matching: pluggable fuzzy search over weighted job text fields.
//!
//! Default: `FuzzyRelevanceEngine` (Jaro-Winkler over token windows via
//! `strsim`). The processor only depends on the `RelevanceEngine` trait so the
//! scorer can be swapped without touching orchestration.

use std::collections::HashMap;

use serde::Serialize;
use strsim::jaro_winkler;

use crate::matching::models::Job;

/// Maximum distance (0 = identical, 1 = unrelated) for a field to match.
pub const DEFAULT_RELEVANCE_THRESHOLD: f64 = 0.1;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct WeightedField {
    pub name: &'static str,
    pub weight: f64,
}

/// Job fields searched for interest/license phrases, most important first.
pub const JOB_SEARCH_FIELDS: [WeightedField; 4] = [
    WeightedField { name: "title", weight: 0.5 },
    WeightedField { name: "searchable_text", weight: 0.3 },
    WeightedField { name: "description", weight: 0.15 },
    WeightedField { name: "industry", weight: 0.05 },
];

/// One searchable record: an id plus its text fields by name.
#[derive(Debug, Clone)]
pub struct RelevanceRecord {
    pub id: String,
    pub fields: HashMap<&'static str, String>,
}

impl RelevanceRecord {
    pub fn from_job(job: &Job, fields: &[WeightedField]) -> Self {
        Self {
            id: job.id(),
            fields: fields
                .iter()
                .filter_map(|f| job.text(f.name).map(|text| (f.name, text)))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelevanceHit {
    pub id: String,
    /// Weighted distance; lower is better.
    pub score: f64,
}

pub trait RelevanceIndex: Send + Sync {
    /// Records matching `phrase` within the threshold, best first.
    fn search(&self, phrase: &str) -> Vec<RelevanceHit>;
}

pub trait RelevanceEngine: Send + Sync {
    fn threshold(&self) -> f64;

    fn fields(&self) -> &[WeightedField];

    fn build(&self, records: Vec<RelevanceRecord>) -> Box<dyn RelevanceIndex>;
}

// ────────────────────────────────────────────────────────────────────────────
// Fuzzy engine
// ────────────────────────────────────────────────────────────────────────────

pub struct FuzzyRelevanceEngine {
    fields: Vec<WeightedField>,
    threshold: f64,
}

impl FuzzyRelevanceEngine {
    pub fn new(fields: &[WeightedField], threshold: f64) -> Self {
        Self {
            fields: fields.to_vec(),
            threshold,
        }
    }
}

impl Default for FuzzyRelevanceEngine {
    fn default() -> Self {
        Self::new(&JOB_SEARCH_FIELDS, DEFAULT_RELEVANCE_THRESHOLD)
    }
}

impl RelevanceEngine for FuzzyRelevanceEngine {
    fn threshold(&self) -> f64 {
        self.threshold
    }

    fn fields(&self) -> &[WeightedField] {
        &self.fields
    }

    fn build(&self, records: Vec<RelevanceRecord>) -> Box<dyn RelevanceIndex> {
        let records = records
            .into_iter()
            .map(|r| IndexedRecord {
                id: r.id,
                fields: self
                    .fields
                    .iter()
                    .map(|f| r.fields.get(f.name).map(|text| tokenize(text)))
                    .collect(),
            })
            .collect();
        Box::new(FuzzyIndex {
            records,
            weights: self.fields.iter().map(|f| f.weight).collect(),
            threshold: self.threshold,
        })
    }
}

struct IndexedRecord {
    id: String,
    /// Tokenized text per configured field, same order as the weights.
    fields: Vec<Option<Vec<String>>>,
}

struct FuzzyIndex {
    records: Vec<IndexedRecord>,
    weights: Vec<f64>,
    threshold: f64,
}

impl RelevanceIndex for FuzzyIndex {
    fn search(&self, phrase: &str) -> Vec<RelevanceHit> {
        let query = tokenize(phrase);
        if query.is_empty() {
            return Vec::new();
        }
        let query = query.join(" ");
        let query_len = query.split(' ').count();

        let mut hits: Vec<RelevanceHit> = self
            .records
            .iter()
            .filter_map(|record| {
                let distances: Vec<Option<f64>> = record
                    .fields
                    .iter()
                    .map(|tokens| tokens.as_ref().map(|t| field_distance(&query, query_len, t)))
                    .collect();

                let best = distances.iter().flatten().copied().fold(f64::INFINITY, f64::min);
                if best > self.threshold {
                    return None;
                }

                let (weighted, total) = distances
                    .iter()
                    .zip(&self.weights)
                    .filter_map(|(d, w)| d.map(|d| (d * w, *w)))
                    .fold((0.0, 0.0), |(s, t), (dw, w)| (s + dw, t + w));
                let score = if total > 0.0 { weighted / total } else { best };

                Some(RelevanceHit {
                    id: record.id.clone(),
                    score,
                })
            })
            .collect();

        hits.sort_by(|a, b| a.score.total_cmp(&b.score));
        hits
    }
}

/// Lower-cased alphanumeric tokens.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// `1 - best Jaro-Winkler similarity` between the query and every window of
/// the field with the same token count.
fn field_distance(query: &str, query_len: usize, tokens: &[String]) -> f64 {
    if tokens.is_empty() {
        return 1.0;
    }
    let window = query_len.min(tokens.len());
    let best = tokens
        .windows(window)
        .map(|w| jaro_winkler(query, &w.join(" ")))
        .fold(0.0, f64::max);
    1.0 - best
}
