//! Shared portal state wiring the stores and the change feed together.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::db::PortalDb;
use crate::error::StoreError;
use crate::feed::ChangeFeed;
use crate::geocode::{GeocodeCache, Geocoder, HttpGeocoder};
use crate::notifications::NotificationAggregator;
use crate::session::{FileStore, KvStore, MemoryStore};

const GEOCODER_URL: &str = "https://nominatim.openstreetmap.org";

/// Everything a portal view needs, built once at startup.
///
/// `session` is per-run scratch (selection pointers, wizard progress);
/// `durable` survives restarts (dismissed notifications, geocode cache,
/// panel widths).
pub struct PortalState {
    pub db: Arc<Mutex<PortalDb>>,
    pub feed: Arc<ChangeFeed>,
    pub session: Arc<dyn KvStore>,
    pub durable: Arc<dyn KvStore>,
    pub notifications: NotificationAggregator,
    pub geocode: Arc<GeocodeCache>,
}

impl PortalState {
    /// Open the on-disk database and stores under the home directory.
    pub fn new() -> Result<Self, StoreError> {
        let feed = ChangeFeed::new();
        let db = Arc::new(Mutex::new(PortalDb::open(Arc::clone(&feed))?));
        let durable: Arc<dyn KvStore> =
            Arc::new(FileStore::open_named("portal").ok_or(StoreError::NoHomeDir)?);
        let geocoder = Arc::new(HttpGeocoder::new(GEOCODER_URL));
        Ok(Self::assemble(db, feed, durable, geocoder))
    }

    /// In-memory variant for tests: temp-free, nothing persists.
    pub fn ephemeral(geocoder: Arc<dyn Geocoder>) -> Result<Self, StoreError> {
        let feed = ChangeFeed::new();
        let db = Arc::new(Mutex::new(PortalDb::open_in_memory(Arc::clone(&feed))?));
        let durable: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        Ok(Self::assemble(db, feed, durable, geocoder))
    }

    fn assemble(
        db: Arc<Mutex<PortalDb>>,
        feed: Arc<ChangeFeed>,
        durable: Arc<dyn KvStore>,
        geocoder: Arc<dyn Geocoder>,
    ) -> Self {
        let session: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let notifications = NotificationAggregator::new(Arc::clone(&db), Arc::clone(&durable));
        let geocode = Arc::new(GeocodeCache::new(geocoder, Arc::clone(&durable)));
        Self {
            db,
            feed,
            session,
            durable,
            notifications,
            geocode,
        }
    }
}
