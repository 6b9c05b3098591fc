//! Location text parsing: turns "City ST, City2 ST2 US" style strings into
//! structured, state-filtered candidates.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// `<city text> <two-letter code>` optionally followed by `US`. Non-greedy on
/// the city so a trailing `US` is never swallowed into the state slot.
static CHUNK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(.*?)\s+([A-Za-z]{2})(?:\s+US)?$").expect("location chunk regex is valid")
});

static CHUNK_SPLIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*,\s*").expect("chunk split regex is valid"));

static PHRASE_SPLIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[|,;/]+").expect("phrase split regex is valid"));

/// One in-state city parsed out of a job's location text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationCandidate {
    pub city: String,
    /// Normalized two-letter code, upper case.
    pub state: String,
    /// Canonical display string: `"<city> <STATE> US"`.
    pub raw: String,
}

impl LocationCandidate {
    pub fn new(city: &str, state: &str) -> Self {
        let city = city.trim().to_string();
        let state = norm_state(state);
        let raw = format!("{city} {state} US");
        Self { city, state, raw }
    }
}

/// Canonical `"CITY,STATE"` identity shared by every coordinate cache tier.
pub fn cache_key(city: &str, state: &str) -> String {
    format!(
        "{},{}",
        city.trim().to_uppercase(),
        state.trim().to_uppercase()
    )
}

/// Strips every non-letter character and upper-cases what is left.
pub fn norm_state(abbrev: &str) -> String {
    abbrev
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Splits a phrase list on any run of `| , ; /`, trimming and dropping empties.
pub fn split_phrases(input: &str) -> Vec<String> {
    PHRASE_SPLIT_RE
        .split(input)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parses comma-separated location text and keeps only the entries whose
/// state matches `target_state`.
///
/// Malformed chunks are skipped. Output preserves input order and is not
/// deduplicated.
pub fn parse_cities_for_state(location: &str, target_state: &str) -> Vec<LocationCandidate> {
    let target = norm_state(target_state);
    if location.trim().is_empty() {
        return Vec::new();
    }

    CHUNK_SPLIT_RE
        .split(location)
        .map(str::trim)
        .filter(|chunk| !chunk.is_empty())
        .filter_map(parse_chunk)
        .filter(|candidate| candidate.state == target)
        .collect()
}

fn parse_chunk(chunk: &str) -> Option<LocationCandidate> {
    let caps = CHUNK_RE.captures(chunk)?;
    let city = caps.get(1)?.as_str().trim();
    let state = caps.get(2)?.as_str();
    if city.is_empty() {
        return None;
    }
    Some(LocationCandidate::new(city, state))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_norm_state_strips_and_uppercases() {
        assert_eq!(norm_state(" ca. "), "CA");
        assert_eq!(norm_state("N-Y"), "NY");
        assert_eq!(norm_state(""), "");
    }

    #[test]
    fn test_split_phrases() {
        assert_eq!(
            split_phrases("ICU | ER nurse;; Pediatrics/ ,Oncology"),
            vec!["ICU", "ER nurse", "Pediatrics", "Oncology"]
        );
        assert!(split_phrases("  | , ").is_empty());
        assert!(split_phrases("").is_empty());
    }

    #[test]
    fn test_parses_multi_city_text_filtered_to_state() {
        let out = parse_cities_for_state("San Jose CA, Reno NV, Fresno CA US", "ca");
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].city, "San Jose");
        assert_eq!(out[0].state, "CA");
        assert_eq!(out[0].raw, "San Jose CA US");
        assert_eq!(out[1].city, "Fresno");
        assert_eq!(out[1].raw, "Fresno CA US");
    }

    #[test]
    fn test_trailing_us_is_not_taken_as_state() {
        let out = parse_cities_for_state("Los Angeles CA US", "CA");
        assert_eq!(out, vec![LocationCandidate::new("Los Angeles", "CA")]);
    }

    #[test]
    fn test_lowercase_state_code_is_normalized() {
        let out = parse_cities_for_state("oakland ca", "CA");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].city, "oakland");
        assert_eq!(out[0].state, "CA");
    }

    #[test]
    fn test_malformed_chunks_are_dropped() {
        let out = parse_cities_for_state("Remote, California, , Sacramento CA", "CA");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].city, "Sacramento");
    }

    #[test]
    fn test_duplicates_are_kept_in_order() {
        let out = parse_cities_for_state("Fresno CA, Fresno CA", "CA");
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_empty_input_yields_nothing() {
        assert!(parse_cities_for_state("", "CA").is_empty());
        assert!(parse_cities_for_state("   ", "CA").is_empty());
    }

    #[test]
    fn test_output_bounded_by_chunk_count_and_state() {
        let inputs = [
            "A CA, B CA, C NV, D",
            "X TX US,Y tx,Z CA",
            "Alpha Beta CA,,, Gamma CA US",
        ];
        for input in inputs {
            let chunks = input.split(',').count();
            let out = parse_cities_for_state(input, "CA");
            assert!(out.len() <= chunks);
            assert!(out.iter().all(|c| c.state == "CA"));
        }
    }

    #[test]
    fn test_cache_key_is_uppercase_city_and_state() {
        assert_eq!(cache_key(" San Jose ", "ca"), "SAN JOSE,CA");
        let c = LocationCandidate::new("Fresno", "ca");
        assert_eq!(cache_key(&c.city, &c.state), "FRESNO,CA");
    }
}
