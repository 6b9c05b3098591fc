use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Point-in-time copy of the geocoder counters, embedded in the debug trace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeocodeStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub http_ok: u64,
    pub http_fail: u64,
    pub parsed_ok: u64,
    pub parsed_fail: u64,
    pub calls_made: u64,
    /// Misses of the geocoder's own cache answered by the city lookup tiers.
    pub csv_hits: u64,
}

#[derive(Debug, Clone, Copy)]
pub enum Counter {
    CacheHit,
    CacheMiss,
    HttpOk,
    HttpFail,
    ParsedOk,
    ParsedFail,
    CallMade,
    CsvHit,
}

/// Lock-free counters shared by every concurrent geocoding task. Only
/// diagnostic, so relaxed ordering is enough.
#[derive(Debug, Default)]
pub struct GeocodeCounters {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    http_ok: AtomicU64,
    http_fail: AtomicU64,
    parsed_ok: AtomicU64,
    parsed_fail: AtomicU64,
    calls_made: AtomicU64,
    csv_hits: AtomicU64,
}

impl GeocodeCounters {
    pub fn bump(&self, counter: Counter) {
        let slot = match counter {
            Counter::CacheHit => &self.cache_hits,
            Counter::CacheMiss => &self.cache_misses,
            Counter::HttpOk => &self.http_ok,
            Counter::HttpFail => &self.http_fail,
            Counter::ParsedOk => &self.parsed_ok,
            Counter::ParsedFail => &self.parsed_fail,
            Counter::CallMade => &self.calls_made,
            Counter::CsvHit => &self.csv_hits,
        };
        slot.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> GeocodeStats {
        GeocodeStats {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            http_ok: self.http_ok.load(Ordering::Relaxed),
            http_fail: self.http_fail.load(Ordering::Relaxed),
            parsed_ok: self.parsed_ok.load(Ordering::Relaxed),
            parsed_fail: self.parsed_fail.load(Ordering::Relaxed),
            calls_made: self.calls_made.load(Ordering::Relaxed),
            csv_hits: self.csv_hits.load(Ordering::Relaxed),
        }
    }
}
