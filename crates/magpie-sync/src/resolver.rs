use crate::catalog::EndpointCatalog;
use magpie_api::QueryIdDiscovery;
use magpie_core::MagpieResult;
use magpie_store::CredentialStore;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const QUERY_ID_TTL: Duration = Duration::from_secs(10 * 60);

struct CachedQueryId {
    query_id: String,
    resolved_at: Instant,
}

/// Resolves the opaque query id the host requires for a named operation.
///
/// Resolution walks a strict fallback chain, cheapest first: the in-memory
/// cache, the durable per-operation slot, the endpoint catalog, and finally
/// live bundle discovery. Anything a later stage finds is written back into
/// the earlier stages so the expensive path runs as rarely as possible.
pub struct EndpointResolver {
    store: CredentialStore,
    profile: String,
    ttl: Duration,
    cache: Mutex<HashMap<String, CachedQueryId>>,
    discovery: Box<dyn QueryIdDiscovery + Send + Sync>,
}

impl EndpointResolver {
    pub fn new(
        store: CredentialStore,
        profile: impl Into<String>,
        discovery: Box<dyn QueryIdDiscovery + Send + Sync>,
    ) -> Self {
        Self {
            store,
            profile: profile.into(),
            ttl: QUERY_ID_TTL,
            cache: Mutex::new(HashMap::new()),
            discovery,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn resolve(
        &self,
        operation: &str,
        catalog: &EndpointCatalog,
    ) -> MagpieResult<Option<String>> {
        if let Some(cached) = self.cached(operation) {
            return Ok(Some(cached));
        }

        if let Some(stored) = self.store.load_query_id(&self.profile, operation)? {
            self.remember(operation, &stored.query_id);
            return Ok(Some(stored.query_id));
        }

        if let Some(entry) = catalog.entries_for(operation).into_iter().next() {
            debug!(operation, query_id = %entry.query_id, "resolved query id from endpoint catalog");
            self.persist(operation, &entry.query_id)?;
            return Ok(Some(entry.query_id));
        }

        if let Some(query_id) = self.discover_quietly(operation) {
            info!(operation, query_id = %query_id, "resolved query id via live bundle discovery");
            self.persist(operation, &query_id)?;
            return Ok(Some(query_id));
        }

        Ok(None)
    }

    /// Drops every cached value first, then runs discovery only; the cheap
    /// stages are exactly what is known to be stale when this is called.
    pub fn force_rediscover(&self, operation: &str) -> MagpieResult<Option<String>> {
        self.invalidate(operation);
        self.store.clear_query_id(&self.profile, operation)?;

        let Some(query_id) = self.discover_quietly(operation) else {
            return Ok(None);
        };

        info!(operation, query_id = %query_id, "rediscovered query id after stale signal");
        self.persist(operation, &query_id)?;
        Ok(Some(query_id))
    }

    pub fn invalidate(&self, operation: &str) {
        lock_cache(&self.cache).remove(operation);
    }

    /// Passive-observation write path: a query id seen on the wire becomes
    /// the durable slot and the fresh memory entry.
    pub fn record_observed(&self, operation: &str, query_id: &str) -> MagpieResult<()> {
        self.persist(operation, query_id)
    }

    /// Discovery is inherently fragile (network plus minified-bundle
    /// scraping); a failed attempt counts as "nothing found" rather than
    /// failing the whole resolution chain.
    fn discover_quietly(&self, operation: &str) -> Option<String> {
        match self.discovery.discover(operation) {
            Ok(found) => found,
            Err(err) => {
                warn!(operation, error = %err.message, "live bundle discovery failed");
                None
            }
        }
    }

    fn cached(&self, operation: &str) -> Option<String> {
        let cache = lock_cache(&self.cache);
        let entry = cache.get(operation)?;
        if entry.resolved_at.elapsed() > self.ttl {
            return None;
        }
        Some(entry.query_id.clone())
    }

    fn remember(&self, operation: &str, query_id: &str) {
        lock_cache(&self.cache).insert(
            operation.to_string(),
            CachedQueryId {
                query_id: query_id.to_string(),
                resolved_at: Instant::now(),
            },
        );
    }

    fn persist(&self, operation: &str, query_id: &str) -> MagpieResult<()> {
        self.store.save_query_id(&self.profile, operation, query_id)?;
        self.remember(operation, query_id);
        Ok(())
    }
}

fn lock_cache(cache: &Mutex<HashMap<String, CachedQueryId>>) -> MutexGuard<'_, HashMap<String, CachedQueryId>> {
    cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use magpie_api::{ObservedEndpoint, parse_graphql_url};
    use magpie_fs::init_workspace;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingDiscovery {
        calls: AtomicUsize,
        answer: Option<String>,
    }

    impl CountingDiscovery {
        fn returning(answer: Option<&str>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                answer: answer.map(str::to_string),
            }
        }
    }

    impl QueryIdDiscovery for &'static CountingDiscovery {
        fn discover(&self, _operation: &str) -> MagpieResult<Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.answer.clone())
        }
    }

    fn fixture() -> (tempfile::TempDir, CredentialStore, EndpointCatalog) {
        let temp = tempfile::tempdir().expect("tempdir");
        let init = init_workspace(Some(&temp.path().join("workspace")), None).expect("init");
        let store = CredentialStore::from_workspace(&init.paths).expect("store");
        let catalog = EndpointCatalog::load(store.clone(), "default").expect("catalog");
        (temp, store, catalog)
    }

    fn observed(url: &str) -> ObservedEndpoint {
        parse_graphql_url(url).expect("observed endpoint")
    }

    fn leaked_discovery(answer: Option<&str>) -> &'static CountingDiscovery {
        Box::leak(Box::new(CountingDiscovery::returning(answer)))
    }

    #[test]
    fn catalog_entries_short_circuit_live_discovery() {
        let (_temp, store, catalog) = fixture();
        catalog.record(
            &observed("https://x.com/i/api/graphql/cat-qid/Bookmarks?variables=%7B%7D"),
            "GET",
        );

        let discovery = leaked_discovery(Some("net-qid"));
        let resolver = EndpointResolver::new(store.clone(), "default", Box::new(discovery));

        let resolved = resolver.resolve("Bookmarks", &catalog).expect("resolve");
        assert_eq!(resolved.as_deref(), Some("cat-qid"));
        assert_eq!(discovery.calls.load(Ordering::SeqCst), 0);

        // The catalog hit was written back to the durable slot.
        let slot = store
            .load_query_id("default", "Bookmarks")
            .expect("load slot")
            .expect("slot populated");
        assert_eq!(slot.query_id, "cat-qid");
    }

    #[test]
    fn durable_slot_wins_over_catalog_and_discovery() {
        let (_temp, store, catalog) = fixture();
        store
            .save_query_id("default", "Bookmarks", "slot-qid")
            .expect("seed slot");
        catalog.record(
            &observed("https://x.com/i/api/graphql/cat-qid/Bookmarks"),
            "GET",
        );

        let discovery = leaked_discovery(Some("net-qid"));
        let resolver = EndpointResolver::new(store, "default", Box::new(discovery));

        let resolved = resolver.resolve("Bookmarks", &catalog).expect("resolve");
        assert_eq!(resolved.as_deref(), Some("slot-qid"));
        assert_eq!(discovery.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn discovery_runs_last_and_persists_the_result() {
        let (_temp, store, catalog) = fixture();
        let discovery = leaked_discovery(Some("net-qid"));
        let resolver = EndpointResolver::new(store.clone(), "default", Box::new(discovery));

        let resolved = resolver.resolve("Bookmarks", &catalog).expect("resolve");
        assert_eq!(resolved.as_deref(), Some("net-qid"));
        assert_eq!(discovery.calls.load(Ordering::SeqCst), 1);

        // Subsequent resolves hit the memory cache, not discovery again.
        let resolved = resolver.resolve("Bookmarks", &catalog).expect("resolve");
        assert_eq!(resolved.as_deref(), Some("net-qid"));
        assert_eq!(discovery.calls.load(Ordering::SeqCst), 1);

        let slot = store
            .load_query_id("default", "Bookmarks")
            .expect("load slot")
            .expect("slot populated");
        assert_eq!(slot.query_id, "net-qid");
    }

    #[test]
    fn unresolvable_operations_return_none() {
        let (_temp, store, catalog) = fixture();
        let discovery = leaked_discovery(None);
        let resolver = EndpointResolver::new(store, "default", Box::new(discovery));

        assert!(resolver.resolve("Bookmarks", &catalog).expect("resolve").is_none());
        assert_eq!(discovery.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn force_rediscover_skips_cheap_stages_and_overwrites() {
        let (_temp, store, catalog) = fixture();
        store
            .save_query_id("default", "Bookmarks", "stale-qid")
            .expect("seed slot");

        let discovery = leaked_discovery(Some("fresh-qid"));
        let resolver = EndpointResolver::new(store.clone(), "default", Box::new(discovery));

        // Warm the memory cache with the stale value first.
        assert_eq!(
            resolver.resolve("Bookmarks", &catalog).expect("resolve").as_deref(),
            Some("stale-qid")
        );

        let rediscovered = resolver.force_rediscover("Bookmarks").expect("rediscover");
        assert_eq!(rediscovered.as_deref(), Some("fresh-qid"));
        assert_eq!(discovery.calls.load(Ordering::SeqCst), 1);

        let slot = store
            .load_query_id("default", "Bookmarks")
            .expect("load slot")
            .expect("slot populated");
        assert_eq!(slot.query_id, "fresh-qid");
    }

    #[test]
    fn invalidate_drops_only_the_memory_entry() {
        let (_temp, store, catalog) = fixture();
        store
            .save_query_id("default", "Bookmarks", "slot-qid")
            .expect("seed slot");

        let discovery = leaked_discovery(None);
        let resolver = EndpointResolver::new(store.clone(), "default", Box::new(discovery));

        assert!(resolver.resolve("Bookmarks", &catalog).expect("resolve").is_some());
        resolver.invalidate("Bookmarks");

        // The durable slot still answers; discovery is never consulted.
        assert_eq!(
            resolver.resolve("Bookmarks", &catalog).expect("resolve").as_deref(),
            Some("slot-qid")
        );
        assert_eq!(discovery.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn expired_memory_entries_fall_through_to_the_slot() {
        let (_temp, store, catalog) = fixture();
        store
            .save_query_id("default", "Bookmarks", "slot-qid")
            .expect("seed slot");

        let discovery = leaked_discovery(None);
        let resolver = EndpointResolver::new(store, "default", Box::new(discovery))
            .with_ttl(Duration::ZERO);

        assert!(resolver.resolve("Bookmarks", &catalog).expect("resolve").is_some());
        assert!(resolver.resolve("Bookmarks", &catalog).expect("resolve").is_some());
        assert_eq!(discovery.calls.load(Ordering::SeqCst), 0);
    }
}
