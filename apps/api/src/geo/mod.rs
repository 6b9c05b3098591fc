// Geometry and location-text helpers. Pure functions, no I/O.

pub mod distance;
pub mod location;

pub use distance::{round3, to_num, Coordinate};
pub use location::{cache_key, norm_state, parse_cities_for_state, split_phrases, LocationCandidate};
