//! Persistent coordinate store, the cross-process tier of the city cache.
//!
//! Only three hash operations are used: get one field, set one field, get
//! every field. Values are JSON `{"lat": .., "lng": ..}` keyed by CacheKey.

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::geo::{to_num, Coordinate};

/// Redis hash holding every geocoded city.
pub const GEOCODED_CITIES_HASH: &str = "geocoded-cities";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Malformed stored value for '{key}': {raw}")]
    Malformed { key: String, raw: String },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[async_trait]
pub trait CoordinateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Coordinate>, StoreError>;

    async fn set(&self, key: &str, coord: Coordinate) -> Result<(), StoreError>;

    /// Every well-formed entry of the collection. Malformed values are skipped.
    async fn get_all(&self) -> Result<Vec<(String, Coordinate)>, StoreError>;
}

#[derive(Debug, Serialize)]
struct StoredCoordinate {
    lat: f64,
    lng: f64,
}

#[derive(Debug, Deserialize)]
struct LooseCoordinate {
    lat: Value,
    lng: Value,
}

/// Decodes a stored value. Accepts numeric strings as well as numbers since
/// older writers stored both.
pub fn decode_coordinate(raw: &str) -> Option<Coordinate> {
    let loose: LooseCoordinate = serde_json::from_str(raw).ok()?;
    Coordinate::new(to_num(&loose.lat)?, to_num(&loose.lng)?)
}

pub fn encode_coordinate(coord: Coordinate) -> Result<String, StoreError> {
    Ok(serde_json::to_string(&StoredCoordinate {
        lat: coord.lat,
        lng: coord.lng,
    })?)
}

/// Redis-backed store. Connections are multiplexed and opened per call so a
/// Redis outage never poisons long-lived state.
#[derive(Clone)]
pub struct RedisCoordinateStore {
    client: redis::Client,
    hash: String,
}

impl RedisCoordinateStore {
    pub fn new(client: redis::Client) -> Self {
        Self {
            client,
            hash: GEOCODED_CITIES_HASH.to_string(),
        }
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, StoreError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

#[async_trait]
impl CoordinateStore for RedisCoordinateStore {
    async fn get(&self, key: &str) -> Result<Option<Coordinate>, StoreError> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn.hget(&self.hash, key).await?;
        match raw {
            None => Ok(None),
            Some(raw) => match decode_coordinate(&raw) {
                Some(coord) => Ok(Some(coord)),
                None => Err(StoreError::Malformed {
                    key: key.to_string(),
                    raw,
                }),
            },
        }
    }

    async fn set(&self, key: &str, coord: Coordinate) -> Result<(), StoreError> {
        let value = encode_coordinate(coord)?;
        let mut conn = self.connection().await?;
        let _: () = conn.hset(&self.hash, key, value).await?;
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<(String, Coordinate)>, StoreError> {
        let mut conn = self.connection().await?;
        let entries: std::collections::HashMap<String, String> =
            conn.hgetall(&self.hash).await?;
        Ok(entries
            .into_iter()
            .filter_map(|(key, raw)| match decode_coordinate(&raw) {
                Some(coord) => Some((key, coord)),
                None => {
                    tracing::debug!("Skipping malformed stored coordinate for {key}");
                    None
                }
            })
            .collect())
    }
}

#[cfg(test)]
pub mod testing {
    //! In-memory store used by tests across the crate.

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct MemoryStore {
        pub entries: Mutex<HashMap<String, String>>,
        pub fail: AtomicBool,
        pub writes: AtomicUsize,
    }

    impl MemoryStore {
        pub fn with_raw(entries: &[(&str, &str)]) -> Self {
            let store = Self::default();
            {
                let mut map = store.entries.lock();
                for (k, v) in entries {
                    map.insert(k.to_string(), v.to_string());
                }
            }
            store
        }

        fn check(&self) -> Result<(), StoreError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StoreError::Redis(redis::RedisError::from((
                    redis::ErrorKind::IoError,
                    "store offline",
                ))));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl CoordinateStore for MemoryStore {
        async fn get(&self, key: &str) -> Result<Option<Coordinate>, StoreError> {
            self.check()?;
            let raw = self.entries.lock().get(key).cloned();
            match raw {
                None => Ok(None),
                Some(raw) => decode_coordinate(&raw).map(Some).ok_or(StoreError::Malformed {
                    key: key.to_string(),
                    raw,
                }),
            }
        }

        async fn set(&self, key: &str, coord: Coordinate) -> Result<(), StoreError> {
            self.check()?;
            let value = encode_coordinate(coord)?;
            self.entries.lock().insert(key.to_string(), value);
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn get_all(&self) -> Result<Vec<(String, Coordinate)>, StoreError> {
            self.check()?;
            Ok(self
                .entries
                .lock()
                .iter()
                .filter_map(|(k, v)| decode_coordinate(v).map(|c| (k.clone(), c)))
                .collect())
        }
    }
}
