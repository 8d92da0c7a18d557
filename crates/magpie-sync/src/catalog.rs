use chrono::{DateTime, Duration as ChronoDuration, Utc};
use magpie_api::{CatalogEntry, ObservedEndpoint};
use magpie_core::MagpieResult;
use magpie_store::CredentialStore;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

pub const CATALOG_MAX_ENTRIES: usize = 120;
pub const CATALOG_RETENTION_DAYS: i64 = 14;
pub const CATALOG_FLUSH_DEBOUNCE: Duration = Duration::from_secs(2);

struct CatalogState {
    entries: BTreeMap<String, CatalogEntry>,
    dirty_since: Option<Instant>,
}

/// Capped, time-pruned record of every GraphQL endpoint seen on the wire.
///
/// Observations mutate memory immediately; persistence is write-behind so a
/// burst of traffic costs a single store write. `flush` must be called on
/// shutdown or reset so nothing pending is lost.
pub struct EndpointCatalog {
    store: CredentialStore,
    profile: String,
    max_entries: usize,
    debounce: Duration,
    state: Mutex<CatalogState>,
}

impl EndpointCatalog {
    pub fn load(store: CredentialStore, profile: impl Into<String>) -> MagpieResult<Self> {
        let profile = profile.into();
        let entries = store.load_catalog(&profile)?;

        Ok(Self {
            store,
            profile,
            max_entries: CATALOG_MAX_ENTRIES,
            debounce: CATALOG_FLUSH_DEBOUNCE,
            state: Mutex::new(CatalogState {
                entries,
                dirty_since: None,
            }),
        })
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    pub fn with_flush_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn record(&self, endpoint: &ObservedEndpoint, method: &str) {
        let now = Utc::now().to_rfc3339();
        let key = endpoint.catalog_key();
        let method = method.to_ascii_uppercase();

        let mut state = lock_state(&self.state);
        match state.entries.get_mut(&key) {
            Some(entry) => {
                entry.seen_count += 1;
                entry.last_seen = now;
                entry.path = endpoint.path.clone();
                if !entry.methods.contains(&method) {
                    entry.methods.push(method);
                }
                if endpoint.variables.is_some() {
                    entry.variables_sample = endpoint.variables.clone();
                }
                if endpoint.features.is_some() {
                    entry.features_sample = endpoint.features.clone();
                }
                if endpoint.field_toggles.is_some() {
                    entry.field_toggles_sample = endpoint.field_toggles.clone();
                }
            }
            None => {
                state.entries.insert(
                    key,
                    CatalogEntry {
                        operation: endpoint.operation.clone(),
                        query_id: endpoint.query_id.clone(),
                        path: endpoint.path.clone(),
                        first_seen: now.clone(),
                        last_seen: now,
                        seen_count: 1,
                        methods: vec![method],
                        variables_sample: endpoint.variables.clone(),
                        features_sample: endpoint.features.clone(),
                        field_toggles_sample: endpoint.field_toggles.clone(),
                    },
                );
            }
        }

        evict_to_cap(&mut state.entries, self.max_entries);

        if state.dirty_since.is_none() {
            state.dirty_since = Some(Instant::now());
        }
    }

    pub fn entries_for(&self, operation: &str) -> Vec<CatalogEntry> {
        let state = lock_state(&self.state);
        let mut matches: Vec<CatalogEntry> = state
            .entries
            .values()
            .filter(|entry| entry.operation == operation)
            .cloned()
            .collect();

        matches.sort_by(|left, right| right.last_seen.cmp(&left.last_seen));
        matches
    }

    pub fn entries(&self) -> Vec<CatalogEntry> {
        let state = lock_state(&self.state);
        let mut all: Vec<CatalogEntry> = state.entries.values().cloned().collect();
        all.sort_by(|left, right| right.last_seen.cmp(&left.last_seen));
        all
    }

    pub fn len(&self) -> usize {
        lock_state(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes entries whose last observation fell out of the retention
    /// window, then re-enforces the size cap. Returns how many were dropped.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let cutoff = (now - ChronoDuration::days(CATALOG_RETENTION_DAYS)).to_rfc3339();

        let mut state = lock_state(&self.state);
        let before = state.entries.len();
        state.entries.retain(|_, entry| entry.last_seen >= cutoff);
        evict_to_cap(&mut state.entries, self.max_entries);

        let removed = before - state.entries.len();
        if removed > 0 {
            debug!(removed, "pruned endpoint catalog entries");
            if state.dirty_since.is_none() {
                state.dirty_since = Some(Instant::now());
            }
        }

        removed
    }

    /// Persists accumulated observations once they have been sitting dirty
    /// for longer than the debounce window.
    pub fn maybe_flush(&self) -> MagpieResult<bool> {
        let should_flush = {
            let state = lock_state(&self.state);
            state
                .dirty_since
                .is_some_and(|dirty_since| dirty_since.elapsed() >= self.debounce)
        };

        if !should_flush {
            return Ok(false);
        }

        self.flush()?;
        Ok(true)
    }

    pub fn flush(&self) -> MagpieResult<()> {
        let entries = {
            let mut state = lock_state(&self.state);
            state.dirty_since = None;
            state.entries.clone()
        };

        self.store.save_catalog(&self.profile, &entries)
    }
}

fn evict_to_cap(entries: &mut BTreeMap<String, CatalogEntry>, cap: usize) {
    while entries.len() > cap {
        let oldest_key = entries
            .iter()
            .min_by(|(_, left), (_, right)| left.last_seen.cmp(&right.last_seen))
            .map(|(key, _)| key.clone());

        match oldest_key {
            Some(key) => {
                entries.remove(&key);
            }
            None => break,
        }
    }
}

fn lock_state(state: &Mutex<CatalogState>) -> MutexGuard<'_, CatalogState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
