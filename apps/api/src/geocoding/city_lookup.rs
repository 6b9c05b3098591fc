//! City → coordinate resolver backed by the static dataset and the
//! persistent store.
//!
//! One instance lives in `AppState` for the whole process. The dataset is
//! loaded at most once, lazily, behind a once-guard; a missing dataset only
//! leaves the seed empty.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::geo::{cache_key, Coordinate};
use crate::geocoding::dataset;
use crate::geocoding::store::CoordinateStore;

#[derive(Debug, Clone, Serialize)]
pub struct CityLookupStats {
    pub total_cities: usize,
    pub loaded: bool,
    pub store_enabled: bool,
}

pub struct CityLookup {
    index: RwLock<HashMap<String, Coordinate>>,
    loaded: OnceCell<usize>,
    warmed: tokio::sync::OnceCell<usize>,
    dataset_paths: Vec<PathBuf>,
    store: Option<Arc<dyn CoordinateStore>>,
}

impl CityLookup {
    pub fn new(dataset_paths: Vec<PathBuf>, store: Option<Arc<dyn CoordinateStore>>) -> Self {
        Self {
            index: RwLock::new(HashMap::new()),
            loaded: OnceCell::new(),
            warmed: tokio::sync::OnceCell::new(),
            dataset_paths,
            store,
        }
    }

    pub fn store_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Loads the dataset on first use. Subsequent calls are no-ops returning
    /// the number of rows merged by the first load.
    pub fn ensure_loaded(&self) -> usize {
        *self.loaded.get_or_init(|| self.load_dataset())
    }

    fn load_dataset(&self) -> usize {
        let path = match dataset::locate(&self.dataset_paths) {
            Ok(path) => path,
            Err(e) => {
                warn!("{e}. Geocoding will use the store and remote API only.");
                return 0;
            }
        };

        match dataset::load_index(&path) {
            Ok(seed) => {
                let count = seed.len();
                let mut index = self.index.write();
                for (key, coord) in seed {
                    index.entry(key).or_insert(coord);
                }
                count
            }
            Err(e) => {
                warn!("Error loading city dataset {}: {e}", path.display());
                0
            }
        }
    }

    /// In-process lookup only.
    pub fn lookup_city(&self, city: &str, state: &str) -> Option<Coordinate> {
        self.ensure_loaded();
        self.index.read().get(&cache_key(city, state)).copied()
    }

    /// In-process lookup, then the persistent store. A store hit is copied
    /// into the in-process map. Store failures are treated as a miss.
    pub async fn lookup_city_async(&self, city: &str, state: &str) -> Option<Coordinate> {
        if let Some(coord) = self.lookup_city(city, state) {
            return Some(coord);
        }

        let store = self.store.as_ref()?;

        if self.warm_from_store().await > 0 {
            if let Some(coord) = self.lookup_city(city, state) {
                return Some(coord);
            }
        }

        let key = cache_key(city, state);
        match store.get(&key).await {
            Ok(Some(coord)) => {
                self.index.write().entry(key).or_insert(coord);
                Some(coord)
            }
            Ok(None) => None,
            Err(e) => {
                debug!("Store lookup for {key} treated as miss: {e}");
                None
            }
        }
    }

    /// Copies every stored entry into the in-process map, once per instance.
    /// Existing keys are kept.
    pub async fn warm_from_store(&self) -> usize {
        let Some(store) = self.store.as_ref() else {
            return 0;
        };
        self.ensure_loaded();

        *self
            .warmed
            .get_or_init(|| async {
                match store.get_all().await {
                    Ok(entries) => {
                        let count = entries.len();
                        let mut index = self.index.write();
                        for (key, coord) in entries {
                            index.entry(key).or_insert(coord);
                        }
                        info!("Loaded {count} geocoded cities from store");
                        count
                    }
                    Err(e) => {
                        warn!("Could not load geocoded cities from store: {e}");
                        0
                    }
                }
            })
            .await
    }

    /// Registers a freshly geocoded city. The in-process map is updated
    /// immediately (an existing value is never replaced); the store write runs
    /// as a detached task and its failure is only logged.
    pub fn add_city(&self, city: &str, state: &str, coord: Coordinate) {
        self.ensure_loaded();
        let key = cache_key(city, state);
        self.index.write().entry(key.clone()).or_insert(coord);

        let Some(store) = self.store.clone() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime; skipping store write for {key}");
            return;
        };
        handle.spawn(async move {
            match store.set(&key, coord).await {
                Ok(()) => debug!("Saved {key} to store"),
                Err(e) => warn!("Failed to save {key} to store: {e}"),
            }
        });
    }

    pub fn stats(&self) -> CityLookupStats {
        CityLookupStats {
            total_cities: self.index.read().len(),
            loaded: self.loaded.get().is_some(),
            store_enabled: self.store_enabled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::*;
    use crate::geocoding::store::testing::MemoryStore;

    fn dataset_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            b"city,city_ascii,state_id,state_name,county_fips,county_name,lat,lng\n\
              San Jose,San Jose,CA,California,06085,Santa Clara,37.3382,-121.8863\n",
        )
        .unwrap();
        file
    }

    #[test]
    fn test_missing_dataset_is_not_fatal() {
        let lookup = CityLookup::new(vec![PathBuf::from("/no/such/uscities.csv")], None);
        assert_eq!(lookup.ensure_loaded(), 0);
        assert!(lookup.lookup_city("San Jose", "CA").is_none());
        assert!(lookup.stats().loaded);
    }

    #[test]
    fn test_lookup_is_case_insensitive_on_both_parts() {
        let file = dataset_file();
        let lookup = CityLookup::new(vec![file.path().to_path_buf()], None);
        assert!(lookup.lookup_city(" san jose ", "ca").is_some());
    }

    #[test]
    fn test_dataset_is_loaded_only_once() {
        let file = dataset_file();
        let lookup = CityLookup::new(vec![file.path().to_path_buf()], None);
        assert_eq!(lookup.ensure_loaded(), 1);
        // Removing the file proves later calls do not touch the disk again.
        drop(file);
        assert_eq!(lookup.ensure_loaded(), 1);
        assert!(lookup.lookup_city("San Jose", "CA").is_some());
    }

    #[tokio::test]
    async fn test_store_hit_populates_in_process_map() {
        let store = Arc::new(MemoryStore::with_raw(&[(
            "FRESNO,CA",
            r#"{"lat":36.7378,"lng":-119.7871}"#,
        )]));
        let lookup = CityLookup::new(vec![], Some(store.clone()));

        assert!(lookup.lookup_city("Fresno", "CA").is_none());
        let coord = lookup.lookup_city_async("Fresno", "CA").await;
        assert_eq!(coord, Coordinate::new(36.7378, -119.7871));

        store.fail.store(true, Ordering::SeqCst);
        assert_eq!(lookup.lookup_city("Fresno", "CA"), coord);
    }

    #[tokio::test]
    async fn test_store_failure_and_malformed_value_are_misses() {
        let store = Arc::new(MemoryStore::with_raw(&[("BAD,CA", "{oops")]));
        let lookup = CityLookup::new(vec![], Some(store.clone()));
        assert!(lookup.lookup_city_async("Bad", "CA").await.is_none());

        store.fail.store(true, Ordering::SeqCst);
        assert!(lookup.lookup_city_async("Other", "CA").await.is_none());
    }

    #[tokio::test]
    async fn test_without_store_async_lookup_is_tier_one_only() {
        let lookup = CityLookup::new(vec![], None);
        assert!(!lookup.store_enabled());
        assert!(lookup.lookup_city_async("Fresno", "CA").await.is_none());
    }

    #[tokio::test]
    async fn test_add_city_is_visible_immediately_and_written_in_background() {
        let store = Arc::new(MemoryStore::default());
        let lookup = CityLookup::new(vec![], Some(store.clone()));
        let coord = Coordinate::new(38.5816, -121.4944).unwrap();

        lookup.add_city("Sacramento", "ca", coord);
        assert_eq!(lookup.lookup_city("SACRAMENTO", "CA"), Some(coord));

        for _ in 0..50 {
            if store.writes.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(store.entries.lock().contains_key("SACRAMENTO,CA"));
    }

    #[tokio::test]
    async fn test_add_city_never_overwrites_existing_value() {
        let lookup = CityLookup::new(vec![], None);
        let first = Coordinate::new(1.0, 1.0).unwrap();
        lookup.add_city("Town", "CA", first);
        lookup.add_city("Town", "CA", Coordinate::new(2.0, 2.0).unwrap());
        assert_eq!(lookup.lookup_city("Town", "CA"), Some(first));
    }

    #[tokio::test]
    async fn test_failed_store_write_does_not_affect_lookup() {
        let store = Arc::new(MemoryStore::default());
        store.fail.store(true, Ordering::SeqCst);
        let lookup = CityLookup::new(vec![], Some(store));
        let coord = Coordinate::new(1.0, 2.0).unwrap();
        lookup.add_city("Town", "CA", coord);
        tokio::task::yield_now().await;
        assert_eq!(lookup.lookup_city("Town", "CA"), Some(coord));
    }

    #[tokio::test]
    async fn test_warm_from_store_runs_once() {
        let store = Arc::new(MemoryStore::with_raw(&[
            ("RENO,NV", r#"{"lat":39.5,"lng":-119.8}"#),
            ("BROKEN,NV", "nope"),
        ]));
        let lookup = CityLookup::new(vec![], Some(store.clone()));
        assert_eq!(lookup.warm_from_store().await, 1);

        store
            .entries
            .lock()
            .insert("ELKO,NV".into(), r#"{"lat":40.8,"lng":-115.7}"#.into());
        assert_eq!(lookup.warm_from_store().await, 1);
        assert!(lookup.lookup_city("Reno", "NV").is_some());
        assert!(lookup.lookup_city("Elko", "NV").is_none());
    }
}
