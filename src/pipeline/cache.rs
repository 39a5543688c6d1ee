//! Key -> (value, expiry) cache with single-flight recomputation
//!
//! ## Semantics
//!
//! - Expiry is lazy: an entry read at or after `expires_at` is a miss.
//!   Nothing sweeps in the background.
//! - `invalidate` turns the entry into a miss immediately but keeps its
//!   value as the last-known-good fallback for failed recomputations.
//! - Keys can be read and recomputed as a group under one flight name.
//!   A group is hit only if every key is live, is computed by a single
//!   call, and is published all-or-nothing, so the live members of a
//!   group always come from the same computation.
//! - At most one recomputation per flight runs at a time. Concurrent
//!   misses join it and share its result.
//! - Every key carries a generation bumped by `invalidate`. A flight only
//!   publishes if none of its keys moved on while it ran. Readers that
//!   arrive after an invalidation wait for the running flight to drain,
//!   then start a fresh one, so they never get pre-invalidation data.

use crate::error::{AnalyticsError, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

/// Default TTL for every key class (one hour)
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;
type FlightCell<V> = Arc<OnceCell<Result<Vec<Arc<V>>>>>;

/// Cache counters since creation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub recomputations: u64,
    pub compute_failures: u64,
    /// Failed recomputations answered with the last-known-good value
    pub stale_served: u64,
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: Arc<V>,
    expires_at: DateTime<Utc>,
    invalidated: bool,
}

impl<V> CacheEntry<V> {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.invalidated && now < self.expires_at
    }
}

struct Flight<V> {
    keys: Vec<String>,
    /// Generation of each key when the flight was registered
    generations: Vec<u64>,
    cell: FlightCell<V>,
}

struct CacheState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    generations: HashMap<String, u64>,
    inflight: HashMap<String, Flight<V>>,
    stats: CacheStats,
}

impl<V> CacheState<V> {
    fn generation(&self, key: &str) -> u64 {
        self.generations.get(key).copied().unwrap_or(0)
    }

    fn generations_of(&self, keys: &[&str]) -> Vec<u64> {
        keys.iter().map(|key| self.generation(key)).collect()
    }

    fn bump(&mut self, key: &str) {
        *self.generations.entry(key.to_string()).or_insert(0) += 1;
    }

    fn live(&self, key: &str, now: DateTime<Utc>) -> Option<Arc<V>> {
        self.entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
    }

    /// Every key live, or `None`
    fn live_all(&self, keys: &[&str], now: DateTime<Utc>) -> Option<Vec<Arc<V>>> {
        keys.iter().map(|key| self.live(key, now)).collect()
    }

    /// Stored value of every key, live or not; the first missing key on failure
    fn stored_all(&self, keys: &[&str]) -> std::result::Result<Vec<Arc<V>>, String> {
        keys.iter()
            .map(|key| {
                self.entries
                    .get(*key)
                    .map(|entry| entry.value.clone())
                    .ok_or_else(|| key.to_string())
            })
            .collect()
    }
}

pub struct CacheLayer<V> {
    state: Mutex<CacheState<V>>,
    default_ttl: Duration,
    now_fn: Clock,
}

impl<V> CacheLayer<V>
where
    V: Send + Sync + 'static,
{
    /// Create a cache on the system clock
    pub fn new(default_ttl: Duration) -> Self {
        Self::new_with_clock(default_ttl, Box::new(Utc::now))
    }

    /// Create a cache with a custom clock (deterministic expiry in tests)
    pub fn new_with_clock(default_ttl: Duration, now_fn: Clock) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                generations: HashMap::new(),
                inflight: HashMap::new(),
                stats: CacheStats::default(),
            }),
            default_ttl,
            now_fn,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn now(&self) -> DateTime<Utc> {
        (self.now_fn)()
    }

    fn expiry(&self, ttl: Duration) -> DateTime<Utc> {
        chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| self.now().checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Look up a live value; `None` is a miss
    pub fn get(&self, key: &str) -> Option<Arc<V>> {
        let now = self.now();
        let mut state = self.state.lock();
        let value = state.live(key, now);
        if value.is_some() {
            state.stats.hits += 1;
        } else {
            state.stats.misses += 1;
        }
        value
    }

    /// Store a value, replacing any previous entry
    pub fn set(&self, key: &str, value: V, ttl: Duration) -> Arc<V> {
        let value = Arc::new(value);
        let expires_at = self.expiry(ttl);
        self.state.lock().entries.insert(
            key.to_string(),
            CacheEntry {
                value: value.clone(),
                expires_at,
                invalidated: false,
            },
        );
        value
    }

    /// Mark a key stale; returns true if a live entry was invalidated
    pub fn invalidate(&self, key: &str) -> bool {
        self.invalidate_all(&[key]) > 0
    }

    /// Mark several keys stale in one step; returns how many were live
    ///
    /// A running flight over any of the keys stays registered but can no
    /// longer publish. Readers arriving from now on wait for it and then
    /// recompute.
    pub fn invalidate_all(&self, keys: &[&str]) -> usize {
        let now = self.now();
        let mut state = self.state.lock();
        let mut invalidated = 0;
        for key in keys {
            state.bump(key);
            if let Some(entry) = state.entries.get_mut(*key) {
                if entry.is_live(now) {
                    invalidated += 1;
                }
                entry.invalidated = true;
            }
        }
        invalidated
    }

    /// True if `key` would be a hit right now (does not touch stats)
    pub fn contains(&self, key: &str) -> bool {
        let now = self.now();
        self.state.lock().live(key, now).is_some()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = self.now();
        self.state
            .lock()
            .entries
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry, including last-known-good values
    ///
    /// Running flights finish but cannot publish.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        let mut keys: Vec<String> = state.entries.keys().cloned().collect();
        for flight in state.inflight.values() {
            keys.extend(flight.keys.iter().cloned());
        }
        for key in keys {
            state.bump(&key);
        }
        state.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.state.lock().stats
    }

    /// Most recent value stored under `key`, live or not
    pub fn last_known_good(&self, key: &str) -> Option<Arc<V>> {
        self.state
            .lock()
            .entries
            .get(key)
            .map(|entry| entry.value.clone())
    }

    /// Cache-aside read of one key with single-flight recomputation
    ///
    /// A failed or panicking compute leaves the cache untouched; callers
    /// then get the last-known-good value if there is one, `Unavailable`
    /// otherwise.
    pub async fn get_or_compute<F>(&self, key: &str, ttl: Duration, compute: F) -> Result<Arc<V>>
    where
        F: Fn() -> Result<V> + Send + Sync,
    {
        let mut values = self
            .get_or_compute_group(key, &[key], ttl, || compute().map(|value| vec![value]))
            .await?;
        values
            .pop()
            .ok_or_else(|| AnalyticsError::Unavailable(key.to_string()))
    }

    /// Cache-aside read of a group of keys computed together
    ///
    /// `compute` returns one value per key, in `keys` order. On a hit every
    /// key is live; on a miss one flight named `flight` computes them all
    /// and concurrent callers share its result. Fallback is all-or-nothing
    /// as well: the last-known-good values are served only if every key
    /// has one.
    pub async fn get_or_compute_group<F>(
        &self,
        flight: &str,
        keys: &[&str],
        ttl: Duration,
        compute: F,
    ) -> Result<Vec<Arc<V>>>
    where
        F: Fn() -> Result<Vec<V>> + Send + Sync,
    {
        let mut counted = false;
        loop {
            let (cell, generations, current) = {
                let now = self.now();
                let mut state = self.state.lock();
                if let Some(values) = state.live_all(keys, now) {
                    state.stats.hits += 1;
                    return Ok(values);
                }
                if !counted {
                    state.stats.misses += 1;
                    counted = true;
                }

                let latest = state.generations_of(keys);
                match state.inflight.get(flight) {
                    Some(running) => (
                        running.cell.clone(),
                        running.generations.clone(),
                        running.generations == latest,
                    ),
                    None => {
                        let cell: FlightCell<V> = Arc::new(OnceCell::new());
                        state.inflight.insert(
                            flight.to_string(),
                            Flight {
                                keys: keys.iter().map(|key| key.to_string()).collect(),
                                generations: latest.clone(),
                                cell: cell.clone(),
                            },
                        );
                        (cell, latest, true)
                    }
                }
            };

            let outcome = cell
                .get_or_init(|| async { self.run_flight(keys, &generations, ttl, &compute) })
                .await
                .clone();
            self.retire(flight, &cell);

            if !current {
                // Drained a flight that predates an invalidation; start over
                log::trace!("{} flight was stale, recomputing", flight);
                continue;
            }
            return self.resolve(keys, outcome);
        }
    }

    fn retire(&self, flight: &str, cell: &FlightCell<V>) {
        let mut state = self.state.lock();
        let finished = state
            .inflight
            .get(flight)
            .is_some_and(|running| Arc::ptr_eq(&running.cell, cell));
        if finished {
            state.inflight.remove(flight);
        }
    }

    fn resolve(&self, keys: &[&str], outcome: Result<Vec<Arc<V>>>) -> Result<Vec<Arc<V>>> {
        let err = match outcome {
            Ok(values) => return Ok(values),
            Err(err) => err,
        };

        let mut state = self.state.lock();
        match state.stored_all(keys) {
            Ok(stale) => {
                state.stats.stale_served += 1;
                log::warn!(
                    "⚠️  Serving last-known-good {} after failure: {}",
                    keys.join(", "),
                    err
                );
                Ok(stale)
            }
            Err(missing) => Err(AnalyticsError::Unavailable(missing)),
        }
    }

    /// Run one recomputation and publish it if none of its keys were invalidated meanwhile
    fn run_flight<F>(
        &self,
        keys: &[&str],
        generations: &[u64],
        ttl: Duration,
        compute: &F,
    ) -> Result<Vec<Arc<V>>>
    where
        F: Fn() -> Result<Vec<V>>,
    {
        let label = keys.join(", ");
        let outcome = panic::catch_unwind(AssertUnwindSafe(compute))
            .unwrap_or_else(|payload| {
                Err(AnalyticsError::Compute {
                    view: label.clone(),
                    reason: format!("panicked: {}", panic_message(payload.as_ref())),
                })
            })
            .and_then(|values| {
                if values.len() == keys.len() {
                    Ok(values)
                } else {
                    Err(AnalyticsError::Compute {
                        view: label.clone(),
                        reason: format!("expected {} values, got {}", keys.len(), values.len()),
                    })
                }
            });

        let expires_at = self.expiry(ttl);
        let mut state = self.state.lock();
        state.stats.recomputations += 1;

        match outcome {
            Ok(values) => {
                let values: Vec<Arc<V>> = values.into_iter().map(Arc::new).collect();
                if state.generations_of(keys) == generations {
                    for (key, value) in keys.iter().zip(&values) {
                        state.entries.insert(
                            key.to_string(),
                            CacheEntry {
                                value: value.clone(),
                                expires_at,
                                invalidated: false,
                            },
                        );
                    }
                } else {
                    log::debug!("🔄 {} invalidated during recompute, result not cached", label);
                }
                Ok(values)
            }
            Err(err) => {
                state.stats.compute_failures += 1;
                log::error!("❌ Recompute of {} failed: {}", label, err);
                Err(err)
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
