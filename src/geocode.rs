//! Address geocoding for the map view.
//!
//! Free-text customer addresses resolve to coordinates through an external
//! provider, but never twice: a session-persisted cache is consulted
//! synchronously before any call is dispatched, and an in-flight map keeps
//! two near-simultaneous requests for the same address from issuing two
//! upstream calls (the second waits on the first's result).
//!
//! Missing addresses are geocoded in fixed-size batches with a short pause
//! between batches to respect upstream rate limits. Unresolvable addresses
//! are simply omitted from the map — a lower pin count, not an error.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::PortalError;
use crate::session::{get_typed, set_typed, KvStore};

/// Addresses geocoded per batch.
pub const BATCH_SIZE: usize = 10;
/// Pause between batches.
pub const BATCH_DELAY: Duration = Duration::from_millis(200);
/// Collision jitter radius in degrees (~15 m).
pub const JITTER_RADIUS_DEG: f64 = 0.00015;

const CACHE_KEY: &str = "geocodeCache";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

/// Batch progress for UI display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeocodeProgress {
    pub done: usize,
    pub total: usize,
}

/// External geocoding provider: address in, coordinates (or nothing) out.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, address: &str) -> Result<Option<LatLng>, PortalError>;
}

// ---------------------------------------------------------------------------
// HTTP provider (Nominatim-compatible)
// ---------------------------------------------------------------------------

pub struct HttpGeocoder {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct GeocodeHit {
    lat: String,
    lon: String,
}

impl HttpGeocoder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl Geocoder for HttpGeocoder {
    async fn geocode(&self, address: &str) -> Result<Option<LatLng>, PortalError> {
        let url = format!("{}/search", self.base_url);
        let hits: Vec<GeocodeHit> = self
            .client
            .get(&url)
            .query(&[("q", address), ("format", "json"), ("limit", "1")])
            .send()
            .await
            .map_err(|e| PortalError::Geocode(e.to_string()))?
            .error_for_status()
            .map_err(|e| PortalError::Geocode(e.to_string()))?
            .json()
            .await
            .map_err(|e| PortalError::Geocode(e.to_string()))?;

        let Some(hit) = hits.into_iter().next() else {
            return Ok(None);
        };
        match (hit.lat.parse::<f64>(), hit.lon.parse::<f64>()) {
            (Ok(lat), Ok(lng)) => Ok(Some(LatLng { lat, lng })),
            _ => {
                log::warn!("Geocoder returned unparseable coordinates for '{address}'");
                Ok(None)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Session cache
// ---------------------------------------------------------------------------

/// `None` while pending; `Some(result)` once the leader resolves.
type InFlightResult = Option<Option<LatLng>>;

pub struct GeocodeCache {
    geocoder: Arc<dyn Geocoder>,
    store: Arc<dyn KvStore>,
    cache: RwLock<HashMap<String, LatLng>>,
    in_flight: DashMap<String, watch::Receiver<InFlightResult>>,
}

enum LookupRole {
    Leader(watch::Sender<InFlightResult>),
    Follower(watch::Receiver<InFlightResult>),
}

impl GeocodeCache {
    pub fn new(geocoder: Arc<dyn Geocoder>, store: Arc<dyn KvStore>) -> Self {
        let cache: HashMap<String, LatLng> =
            get_typed(store.as_ref(), CACHE_KEY).unwrap_or_default();
        Self {
            geocoder,
            store,
            cache: RwLock::new(cache),
            in_flight: DashMap::new(),
        }
    }

    /// Resolve one address. The cache check and the in-flight claim both
    /// happen synchronously before any await, so a concurrent duplicate
    /// request can never slip past into a second upstream call.
    pub async fn lookup(&self, address: &str) -> Result<Option<LatLng>, PortalError> {
        if let Some(hit) = self.cache.read().get(address) {
            return Ok(Some(*hit));
        }

        let role = match self.in_flight.entry(address.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(occupied) => {
                LookupRole::Follower(occupied.get().clone())
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let (tx, rx) = watch::channel(None);
                vacant.insert(rx);
                LookupRole::Leader(tx)
            }
        };

        match role {
            LookupRole::Follower(mut rx) => loop {
                if let Some(result) = *rx.borrow() {
                    return Ok(result);
                }
                if rx.changed().await.is_err() {
                    // Leader failed; its error was already logged. Fall back
                    // to the cache in case a later attempt resolved it.
                    return Ok(self.cache.read().get(address).copied());
                }
            },
            LookupRole::Leader(tx) => {
                let outcome = self.geocoder.geocode(address).await;
                self.in_flight.remove(address);
                match outcome {
                    Ok(resolved) => {
                        if let Some(coords) = resolved {
                            let snapshot = {
                                let mut cache = self.cache.write();
                                cache.insert(address.to_string(), coords);
                                cache.clone()
                            };
                            set_typed(self.store.as_ref(), CACHE_KEY, &snapshot);
                        }
                        let _ = tx.send(Some(resolved));
                        Ok(resolved)
                    }
                    Err(e) => {
                        // Dropping tx wakes followers with a closed channel
                        drop(tx);
                        Err(e)
                    }
                }
            }
        }
    }

    /// Resolve a set of addresses, cache-first, geocoding the misses in
    /// batches of [`BATCH_SIZE`] with [`BATCH_DELAY`] between batches.
    /// Unresolvable addresses (no result, or a provider error) are omitted.
    pub async fn resolve_all<F>(
        &self,
        addresses: &[String],
        mut progress: F,
    ) -> HashMap<String, LatLng>
    where
        F: FnMut(GeocodeProgress),
    {
        let mut distinct: Vec<&String> = Vec::new();
        for address in addresses {
            if !distinct.contains(&address) {
                distinct.push(address);
            }
        }

        let total = distinct.len();
        let mut done = 0;
        let mut resolved = HashMap::new();
        progress(GeocodeProgress { done, total });

        for batch in distinct.chunks(BATCH_SIZE) {
            for address in batch {
                match self.lookup(address).await {
                    Ok(Some(coords)) => {
                        resolved.insert((*address).clone(), coords);
                    }
                    Ok(None) => {
                        log::info!("No geocode result for '{address}', omitting pin");
                    }
                    Err(e) => {
                        log::warn!("Geocode failed for '{address}': {e}");
                    }
                }
                done += 1;
            }
            progress(GeocodeProgress { done, total });
            if done < total {
                tokio::time::sleep(BATCH_DELAY).await;
            }
        }

        resolved
    }
}

// ---------------------------------------------------------------------------
// Collision jitter
// ---------------------------------------------------------------------------

/// Six-decimal coordinate key; entities mapping to the same key sit on the
/// same physical point at map resolution.
fn collision_key(coords: LatLng) -> (i64, i64) {
    (
        (coords.lat * 1_000_000.0).round() as i64,
        (coords.lng * 1_000_000.0).round() as i64,
    )
}

/// Spread entities pinned at identical coordinates evenly around the
/// shared point so each stays independently clickable. Lone pins are
/// left exactly where they resolved.
pub fn spread_collisions(pins: Vec<(String, LatLng)>) -> Vec<(String, LatLng)> {
    let mut groups: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
    for (idx, (_, coords)) in pins.iter().enumerate() {
        groups.entry(collision_key(*coords)).or_default().push(idx);
    }

    let mut out = pins;
    for indices in groups.values() {
        if indices.len() < 2 {
            continue;
        }
        let n = indices.len() as f64;
        for (slot, &idx) in indices.iter().enumerate() {
            let angle = std::f64::consts::TAU * slot as f64 / n;
            let coords = &mut out[idx].1;
            coords.lat += JITTER_RADIUS_DEG * angle.cos();
            coords.lng += JITTER_RADIUS_DEG * angle.sin();
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted provider: counts upstream calls, resolves from a fixed map.
    struct FakeGeocoder {
        calls: AtomicUsize,
        results: HashMap<String, LatLng>,
    }

    impl FakeGeocoder {
        fn new(results: &[(&str, f64, f64)]) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                results: results
                    .iter()
                    .map(|(addr, lat, lng)| {
                        (addr.to_string(), LatLng { lat: *lat, lng: *lng })
                    })
                    .collect(),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Geocoder for FakeGeocoder {
        async fn geocode(&self, address: &str) -> Result<Option<LatLng>, PortalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Yield so concurrent lookups genuinely overlap
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(self.results.get(address).copied())
        }
    }

    fn cache_with(
        geocoder: Arc<FakeGeocoder>,
        store: Arc<dyn KvStore>,
    ) -> GeocodeCache {
        GeocodeCache::new(geocoder, store)
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_cache_hit_suppresses_upstream_call() {
        let geocoder = Arc::new(FakeGeocoder::new(&[("12 Main St", 45.5, -73.6)]));
        let cache = cache_with(Arc::clone(&geocoder), Arc::new(MemoryStore::new()));

        let first = cache.lookup("12 Main St").await.expect("lookup");
        let second = cache.lookup("12 Main St").await.expect("lookup");

        assert_eq!(first, second);
        assert_eq!(geocoder.call_count(), 1);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_concurrent_lookups_share_one_call() {
        let geocoder = Arc::new(FakeGeocoder::new(&[("9 Rue Principale", 46.8, -71.2)]));
        let cache = Arc::new(cache_with(Arc::clone(&geocoder), Arc::new(MemoryStore::new())));

        let a = Arc::clone(&cache);
        let b = Arc::clone(&cache);
        let (ra, rb) = tokio::join!(
            a.lookup("9 Rue Principale"),
            b.lookup("9 Rue Principale"),
        );

        let ra = ra.expect("a").expect("coords");
        let rb = rb.expect("b").expect("coords");
        assert_eq!(ra, rb);
        assert_eq!(geocoder.call_count(), 1, "duplicate concurrent call issued");
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_cache_persists_across_sessions() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let geocoder = Arc::new(FakeGeocoder::new(&[("4 Elm", 44.0, -79.0)]));

        let cache = cache_with(Arc::clone(&geocoder), Arc::clone(&store));
        cache.lookup("4 Elm").await.expect("lookup");
        drop(cache);

        // New session over the same store: no further upstream call
        let cache = cache_with(Arc::clone(&geocoder), store);
        let hit = cache.lookup("4 Elm").await.expect("lookup").expect("coords");
        assert_eq!(hit, LatLng { lat: 44.0, lng: -79.0 });
        assert_eq!(geocoder.call_count(), 1);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_batches_report_progress_and_omit_misses() {
        let geocoder = Arc::new(FakeGeocoder::new(&[
            ("a", 1.0, 1.0),
            ("b", 2.0, 2.0),
            // "c" is unresolvable
        ]));
        let cache = cache_with(Arc::clone(&geocoder), Arc::new(MemoryStore::new()));

        let addresses: Vec<String> = (0..12)
            .map(|i| format!("filler {i}"))
            .chain(["a".to_string(), "b".to_string(), "c".to_string()])
            .collect();

        let mut reports = Vec::new();
        let resolved = cache
            .resolve_all(&addresses, |p| reports.push(p))
            .await;

        assert_eq!(resolved.len(), 2);
        assert!(resolved.contains_key("a"));
        assert!(!resolved.contains_key("c"));
        // 15 addresses → initial report plus one per batch of 10
        assert_eq!(
            reports,
            vec![
                GeocodeProgress { done: 0, total: 15 },
                GeocodeProgress { done: 10, total: 15 },
                GeocodeProgress { done: 15, total: 15 },
            ]
        );
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_resolve_all_dedups_addresses() {
        let geocoder = Arc::new(FakeGeocoder::new(&[("dup", 3.0, 3.0)]));
        let cache = cache_with(Arc::clone(&geocoder), Arc::new(MemoryStore::new()));

        let addresses = vec!["dup".to_string(), "dup".to_string(), "dup".to_string()];
        let resolved = cache.resolve_all(&addresses, |_| {}).await;

        assert_eq!(resolved.len(), 1);
        assert_eq!(geocoder.call_count(), 1);
    }

    #[test]
    fn test_collision_jitter_separates_pins() {
        let shared = LatLng { lat: 45.501234, lng: -73.601234 };
        let pins = vec![
            ("c1".to_string(), shared),
            ("c2".to_string(), shared),
            ("c3".to_string(), shared),
        ];

        let spread = spread_collisions(pins);
        assert_eq!(spread.len(), 3);

        // All distinct
        for i in 0..3 {
            for j in (i + 1)..3 {
                assert_ne!(spread[i].1, spread[j].1, "pins {i} and {j} coincide");
            }
        }
        // Each within the jitter radius of the original point
        for (_, coords) in &spread {
            let dist = ((coords.lat - shared.lat).powi(2)
                + (coords.lng - shared.lng).powi(2))
            .sqrt();
            assert!(dist <= JITTER_RADIUS_DEG * 1.001);
            assert!(dist > 0.0);
        }
    }

    #[test]
    fn test_lone_pin_is_not_moved() {
        let spot = LatLng { lat: 45.0, lng: -73.0 };
        let spread = spread_collisions(vec![("solo".to_string(), spot)]);
        assert_eq!(spread[0].1, spot);
    }

    #[test]
    fn test_nearby_but_distinct_pins_untouched() {
        // Differ at the sixth decimal — not a collision
        let a = LatLng { lat: 45.000001, lng: -73.0 };
        let b = LatLng { lat: 45.000002, lng: -73.0 };
        let spread = spread_collisions(vec![("a".to_string(), a), ("b".to_string(), b)]);
        assert_eq!(spread[0].1, a);
        assert_eq!(spread[1].1, b);
    }
}
