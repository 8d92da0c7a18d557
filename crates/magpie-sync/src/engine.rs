use crate::caller::{ApiCaller, CallSpec};
use crate::catalog::EndpointCatalog;
use crate::events::{EventPipeline, resolve_bookmark_event_plan};
use crate::queue::{FetchQueue, Pacing};
use crate::reconcile::reconcile;
use crate::resolver::EndpointResolver;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use magpie_api::{
    Bookmark, BundleDiscovery, GraphqlClient, KNOWN_OPERATIONS, OP_BOOKMARKS, OP_DELETE_BOOKMARK,
    OP_TWEET_DETAIL, ObservationSource, ObservedTraffic, QueryIdDiscovery, TrafficPhase,
    TweetDetail, decode_bookmark_page, decode_mutation_response, decode_tweet_detail,
    parse_graphql_url,
};
use magpie_core::{ErrorKind, MagpieError, MagpieResult};
use magpie_fs::ResolvedProfile;
use magpie_session::{ReauthDriver, SessionManager};
use magpie_store::{CredentialStore, SyncState};
use serde::Serialize;
use serde_json::{Value, json};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const SOFT_SYNC_THROTTLE_SECS: i64 = 90;
pub const FULL_SYNC_THROTTLE_SECS: i64 = 15 * 60;

const HARD_SYNC_BASE_TIMEOUT_MS: u64 = 10_000;
const HARD_SYNC_PER_BOOKMARK_MS: u64 = 150;
const HARD_SYNC_MAX_TIMEOUT_MS: u64 = 120_000;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub profile: String,
    pub host: String,
    pub page_size: u32,
    pub full_page_size: u32,
    pub soft_throttle_secs: i64,
    pub full_throttle_secs: i64,
    pub pacing: Pacing,
}

impl EngineOptions {
    pub fn from_profile(resolved: &ResolvedProfile) -> Self {
        Self {
            profile: resolved.name.clone(),
            host: resolved.host.clone(),
            page_size: resolved.page_size,
            full_page_size: resolved.full_page_size,
            soft_throttle_secs: SOFT_SYNC_THROTTLE_SECS,
            full_throttle_secs: FULL_SYNC_THROTTLE_SECS,
            pacing: Pacing::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub mode: String,
    pub pages_requested: usize,
    pub new_bookmarks: usize,
    pub removed_stale: usize,
    pub total_bookmarks: usize,
    pub aborted: bool,
    pub store_write_failed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthStatus {
    pub connected: bool,
    pub user_id: Option<String>,
    pub captured_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ObserveOutcome {
    pub catalog_recorded: bool,
    pub credentials_captured: bool,
    pub event_recorded: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplyEventsReport {
    pub deleted: usize,
    pub fetched_new: usize,
    pub acked: usize,
    pub needs_page_fetch: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MaintenanceReport {
    pub catalog_pruned: usize,
    pub events_pruned: usize,
}

/// Long-lived facade over the whole sync and auth machinery. All mutable
/// caches and in-flight guards live here as instance state so isolated
/// engines can be constructed side by side.
pub struct MirrorEngine {
    options: EngineOptions,
    store: CredentialStore,
    client: GraphqlClient,
    session: SessionManager,
    resolver: EndpointResolver,
    catalog: EndpointCatalog,
    events: EventPipeline,
    queue: Mutex<Arc<FetchQueue>>,
    reauth_driver: Box<dyn ReauthDriver>,
    soft_sync_in_flight: AtomicBool,
    hard_sync_in_flight: AtomicBool,
    discovery_in_flight: AtomicBool,
}

impl MirrorEngine {
    pub fn new(
        store: CredentialStore,
        options: EngineOptions,
        reauth_driver: Box<dyn ReauthDriver>,
    ) -> MagpieResult<Self> {
        let discovery = BundleDiscovery::new(&options.host)?;
        Self::with_discovery(store, options, reauth_driver, Box::new(discovery))
    }

    pub fn with_discovery(
        store: CredentialStore,
        options: EngineOptions,
        reauth_driver: Box<dyn ReauthDriver>,
        discovery: Box<dyn QueryIdDiscovery + Send + Sync>,
    ) -> MagpieResult<Self> {
        let client = GraphqlClient::new(&options.host)?;
        let session = SessionManager::new(store.clone(), options.profile.clone());
        let resolver = EndpointResolver::new(store.clone(), options.profile.clone(), discovery);
        let catalog = EndpointCatalog::load(store.clone(), options.profile.clone())?;
        let events = EventPipeline::new(store.clone(), options.profile.clone());
        let queue = Mutex::new(Arc::new(FetchQueue::with_pacing(options.pacing.clone())));

        Ok(Self {
            options,
            store,
            client,
            session,
            resolver,
            catalog,
            events,
            queue,
            reauth_driver,
            soft_sync_in_flight: AtomicBool::new(false),
            hard_sync_in_flight: AtomicBool::new(false),
            discovery_in_flight: AtomicBool::new(false),
        })
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn resolver(&self) -> &EndpointResolver {
        &self.resolver
    }

    pub fn catalog(&self) -> &EndpointCatalog {
        &self.catalog
    }

    pub fn events(&self) -> &EventPipeline {
        &self.events
    }

    pub fn check_auth(&self) -> AuthStatus {
        let captured_at = match self.session.credentials() {
            Ok(Some(credentials)) if credentials.is_complete() => Some(credentials.captured_at),
            _ => None,
        };

        AuthStatus {
            connected: captured_at.is_some(),
            user_id: self.session.current_user_id(),
            captured_at,
        }
    }

    /// Light, frequent refresh: incremental walk with a small page size, at
    /// most once per throttle window. Returns `None` when throttled or when
    /// another sync pass holds the guard.
    pub fn soft_sync(&self) -> MagpieResult<Option<SyncReport>> {
        if self.hard_sync_in_flight.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let Some(_guard) = FlightGuard::acquire(&self.soft_sync_in_flight) else {
            return Ok(None);
        };

        let state = self.store.load_sync_state(&self.options.profile)?;
        if within_throttle(
            state.last_soft_sync_at.as_deref(),
            self.options.soft_throttle_secs,
        ) {
            debug!("soft sync skipped; inside the throttle window");
            return Ok(None);
        }

        self.run_sync(false).map(Some)
    }

    /// Periodic full correctness pass: walks every page, detects deletions,
    /// and aborts the walk when a collection-size-scaled timeout fires.
    pub fn hard_sync(&self) -> MagpieResult<Option<SyncReport>> {
        let Some(_guard) = FlightGuard::acquire(&self.hard_sync_in_flight) else {
            return Ok(None);
        };

        let state = self.store.load_sync_state(&self.options.profile)?;
        if within_throttle(
            state.last_full_sync_at.as_deref(),
            self.options.full_throttle_secs,
        ) {
            debug!("hard sync skipped; inside the throttle window");
            return Ok(None);
        }

        self.run_sync(true).map(Some)
    }

    fn run_sync(&self, full: bool) -> MagpieResult<SyncReport> {
        let local_ids = self.store.bookmark_ids(&self.options.profile)?;
        let queue = self.fresh_queue();

        let timer_done = Arc::new(AtomicBool::new(false));
        if full {
            spawn_abort_timer(queue.clone(), timer_done.clone(), local_ids.len());
        }

        let caller = self.caller();
        let page_size = if full {
            self.options.full_page_size
        } else {
            self.options.page_size
        };

        let applied = Cell::new(0usize);
        let pages = Cell::new(0usize);
        let store_write_failed = Cell::new(false);

        let outcome = reconcile(
            &local_ids,
            full,
            |cursor| {
                pages.set(pages.get() + 1);
                let payload = caller.call(
                    &bookmark_page_spec(page_size, cursor),
                    Some(queue.as_ref()),
                )?;
                decode_bookmark_page(&payload)
            },
            |fresh| {
                match self.store.upsert_bookmarks(&self.options.profile, fresh) {
                    Ok(_) => applied.set(applied.get() + fresh.len()),
                    Err(err) => {
                        // A failed local write is recoverable on the next
                        // full pass; the fetched results stay authoritative
                        // for this session.
                        warn!(error = %err.message, "bookmark persistence failed; continuing with in-memory results");
                        store_write_failed.set(true);
                    }
                }
                Ok(())
            },
        );
        timer_done.store(true, Ordering::SeqCst);

        let mut state = self.store.load_sync_state(&self.options.profile)?;
        let now = Utc::now().to_rfc3339();

        match outcome {
            Ok(outcome) => {
                let removed_stale = if full && !outcome.stale_ids.is_empty() {
                    self.store
                        .remove_bookmarks(&self.options.profile, &outcome.stale_ids)?
                } else {
                    0
                };

                if full {
                    state.last_full_sync_at = Some(now.clone());
                }
                state.last_soft_sync_at = Some(now);
                state.last_error = None;
                state.bookmark_count = self.store.bookmark_count(&self.options.profile)?;
                self.store.save_sync_state(&self.options.profile, &state)?;

                info!(
                    mode = if full { "full" } else { "soft" },
                    pages = outcome.pages_requested,
                    new = outcome.new_bookmarks.len(),
                    removed_stale,
                    "sync pass finished"
                );

                Ok(SyncReport {
                    mode: sync_mode_name(full),
                    pages_requested: outcome.pages_requested,
                    new_bookmarks: outcome.new_bookmarks.len(),
                    removed_stale,
                    total_bookmarks: state.bookmark_count,
                    aborted: false,
                    store_write_failed: store_write_failed.get(),
                })
            }
            Err(error) if error.kind == ErrorKind::Aborted => {
                // Partial pages already applied are kept; deletion detection
                // is skipped because the remote walk is incomplete.
                warn!(pages = pages.get(), applied = applied.get(), "sync aborted; keeping partial progress");
                state.last_error = Some(error.message.clone());
                state.bookmark_count = self.store.bookmark_count(&self.options.profile)?;
                self.store.save_sync_state(&self.options.profile, &state)?;

                Ok(SyncReport {
                    mode: sync_mode_name(full),
                    pages_requested: pages.get(),
                    new_bookmarks: applied.get(),
                    removed_stale: 0,
                    total_bookmarks: state.bookmark_count,
                    aborted: true,
                    store_write_failed: store_write_failed.get(),
                })
            }
            Err(error) => {
                state.last_error = Some(error.message.clone());
                self.store.save_sync_state(&self.options.profile, &state)?;
                Err(error)
            }
        }
    }

    /// Single-shot user-paced mutation; bypasses the queue.
    pub fn delete_bookmark(&self, tweet_id: &str) -> MagpieResult<bool> {
        if tweet_id.trim().is_empty() {
            return Err(MagpieError::usage("a tweet id is required to delete a bookmark"));
        }

        let caller = self.caller();
        let payload = caller.call(
            &CallSpec::post(OP_DELETE_BOOKMARK, json!({"tweet_id": tweet_id})),
            None,
        )?;

        let response = decode_mutation_response(&payload)?;
        if response.done {
            self.store
                .remove_bookmarks(&self.options.profile, &[tweet_id.to_string()])?;
        }

        Ok(response.done)
    }

    pub fn fetch_detail(&self, tweet_id: &str) -> MagpieResult<TweetDetail> {
        let caller = self.caller();
        let payload = caller.call(
            &CallSpec::get(
                OP_TWEET_DETAIL,
                json!({"focalTweetId": tweet_id, "with_rux_injections": false}),
                default_features(),
            ),
            None,
        )?;

        decode_tweet_detail(&payload)
    }

    /// Ingests one observed traffic record: catalog bookkeeping, passive
    /// query-id capture, credential capture, and mutation detection.
    /// Requests the engine itself issued are ignored to avoid feedback loops.
    pub fn observe(&self, record: &ObservedTraffic) -> MagpieResult<ObserveOutcome> {
        if record.source == ObservationSource::SelfIssued {
            return Ok(ObserveOutcome::default());
        }

        let mut outcome = ObserveOutcome::default();
        let endpoint = parse_graphql_url(&record.url);

        if let Some(endpoint) = &endpoint {
            self.catalog.record(endpoint, &record.method);
            self.resolver
                .record_observed(&endpoint.operation, &endpoint.query_id)?;
            outcome.catalog_recorded = true;
        }

        if record.phase == TrafficPhase::Request && !record.headers.is_empty() {
            outcome.credentials_captured =
                self.session.capture_from_observed_headers(&record.headers)?;
        }

        if let Some(endpoint) = &endpoint {
            let tweet_id = record.tweet_id.as_deref();
            let event = match record.phase {
                TrafficPhase::Request => {
                    self.events
                        .observe_request(&endpoint.operation, tweet_id, record.source)?
                }
                TrafficPhase::Completion => self.events.observe_completion(
                    &endpoint.operation,
                    record.status,
                    tweet_id,
                    record.source,
                )?,
            };
            outcome.event_recorded = event.is_some();
        }

        self.catalog.maybe_flush()?;
        Ok(outcome)
    }

    /// Applies queued mutation events: deletes locally, fetches one small
    /// page when a create was signalled, then acknowledges every event.
    pub fn apply_events(&self) -> MagpieResult<ApplyEventsReport> {
        let events = self.events.get()?;
        if events.is_empty() {
            return Ok(ApplyEventsReport::default());
        }

        let plan = resolve_bookmark_event_plan(&events);
        let deleted = if plan.ids_to_delete.is_empty() {
            0
        } else {
            self.store
                .remove_bookmarks(&self.options.profile, &plan.ids_to_delete)?
        };

        let mut fetched_new = 0usize;
        if plan.needs_page_fetch {
            fetched_new = self.merge_one_page()?;
        }

        let acked = self.events.ack(&plan.ack_ids)?;

        Ok(ApplyEventsReport {
            deleted,
            fetched_new,
            acked,
            needs_page_fetch: plan.needs_page_fetch,
        })
    }

    fn merge_one_page(&self) -> MagpieResult<usize> {
        let local_ids = self.store.bookmark_ids(&self.options.profile)?;
        let queue = self.fresh_queue();
        let caller = self.caller();

        let payload = caller.call(
            &bookmark_page_spec(self.options.page_size, None),
            Some(queue.as_ref()),
        )?;
        let page = decode_bookmark_page(&payload)?;

        let missing: Vec<Bookmark> = page
            .bookmarks
            .into_iter()
            .filter(|bookmark| !local_ids.contains(&bookmark.tweet_id))
            .collect();

        if missing.is_empty() {
            return Ok(0);
        }

        self.store.upsert_bookmarks(&self.options.profile, &missing)?;
        Ok(missing.len())
    }

    /// Warm-up pass over the known operation set; each miss already walks
    /// the resolver's full fallback chain including discovery.
    pub fn discover_missing_query_ids(&self) -> MagpieResult<Option<BTreeMap<String, String>>> {
        let Some(_guard) = FlightGuard::acquire(&self.discovery_in_flight) else {
            return Ok(None);
        };

        let mut resolved = BTreeMap::new();
        for operation in KNOWN_OPERATIONS {
            if let Some(query_id) = self.resolver.resolve(operation, &self.catalog)? {
                resolved.insert((*operation).to_string(), query_id);
            }
        }

        Ok(Some(resolved))
    }

    pub fn store_query_ids(&self, query_ids: &BTreeMap<String, String>) -> MagpieResult<usize> {
        let mut stored = 0usize;
        for (operation, query_id) in query_ids {
            if operation.trim().is_empty() || query_id.trim().is_empty() {
                continue;
            }
            self.resolver.record_observed(operation, query_id)?;
            stored += 1;
        }

        Ok(stored)
    }

    pub fn maintenance(&self, now: DateTime<Utc>) -> MagpieResult<MaintenanceReport> {
        let catalog_pruned = self.catalog.prune(now);
        self.catalog.flush()?;
        let events_pruned = self.events.prune(now)?;

        let mut state = self.store.load_sync_state(&self.options.profile)?;
        state.last_maintenance_at = Some(now.to_rfc3339());
        self.store.save_sync_state(&self.options.profile, &state)?;

        Ok(MaintenanceReport {
            catalog_pruned,
            events_pruned,
        })
    }

    /// Drops volatile runtime state: aborts in-flight bulk work, flushes the
    /// catalog so nothing pending is lost, and clears queued events plus
    /// sync watermarks. Credentials and resolved endpoints survive.
    pub fn reset(&self) -> MagpieResult<()> {
        {
            let queue = lock_queue(&self.queue);
            queue.abort();
        }
        self.replace_queue();

        self.catalog.flush()?;
        self.store.clear_runtime_state(&self.options.profile)?;

        self.soft_sync_in_flight.store(false, Ordering::SeqCst);
        self.hard_sync_in_flight.store(false, Ordering::SeqCst);
        self.discovery_in_flight.store(false, Ordering::SeqCst);

        Ok(())
    }

    pub fn silent_reauth(&self) -> MagpieResult<bool> {
        self.session.silent_reauth(self.reauth_driver.as_ref())
    }

    pub fn sync_state(&self) -> MagpieResult<SyncState> {
        self.store.load_sync_state(&self.options.profile)
    }

    fn caller(&self) -> ApiCaller<'_> {
        ApiCaller {
            client: &self.client,
            session: &self.session,
            resolver: &self.resolver,
            catalog: &self.catalog,
            reauth_driver: self.reauth_driver.as_ref(),
        }
    }

    /// An aborted queue stays aborted; later syncs need a live one.
    fn fresh_queue(&self) -> Arc<FetchQueue> {
        let current = lock_queue(&self.queue).clone();
        if !current.is_aborted() {
            return current;
        }
        self.replace_queue()
    }

    fn replace_queue(&self) -> Arc<FetchQueue> {
        let replacement = Arc::new(FetchQueue::with_pacing(self.options.pacing.clone()));
        *lock_queue(&self.queue) = replacement.clone();
        replacement
    }
}

struct FlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> FlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

fn sync_mode_name(full: bool) -> String {
    if full { "full" } else { "soft" }.to_string()
}

fn within_throttle(last: Option<&str>, throttle_secs: i64) -> bool {
    let Some(last) = last else {
        return false;
    };
    let Ok(parsed) = DateTime::parse_from_rfc3339(last) else {
        return false;
    };

    Utc::now() - parsed.with_timezone(&Utc) < ChronoDuration::seconds(throttle_secs)
}

fn spawn_abort_timer(queue: Arc<FetchQueue>, done: Arc<AtomicBool>, local_count: usize) {
    let timeout_ms = (HARD_SYNC_BASE_TIMEOUT_MS
        + HARD_SYNC_PER_BOOKMARK_MS.saturating_mul(local_count as u64))
    .min(HARD_SYNC_MAX_TIMEOUT_MS);

    thread::spawn(move || {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        while Instant::now() < deadline {
            if done.load(Ordering::SeqCst) {
                return;
            }
            thread::sleep(Duration::from_millis(100));
        }

        if !done.load(Ordering::SeqCst) {
            warn!(timeout_ms, "hard sync deadline reached; aborting the fetch queue");
            queue.abort();
        }
    });
}

fn bookmark_page_spec(page_size: u32, cursor: Option<&str>) -> CallSpec {
    let mut variables = json!({
        "count": page_size,
        "includePromotedContent": false,
    });
    if let Some(cursor) = cursor {
        variables["cursor"] = json!(cursor);
    }

    CallSpec::get(OP_BOOKMARKS, variables, default_features())
}

fn default_features() -> Value {
    json!({
        "graphql_timeline_v2_bookmark_timeline": true,
        "responsive_web_graphql_timeline_navigation_enabled": true,
        "responsive_web_graphql_skip_user_profile_image_extensions_enabled": false,
        "tweet_awards_web_tipping_enabled": false,
        "longform_notetweets_inline_media_enabled": true,
        "view_counts_everywhere_api_enabled": true,
    })
}

fn lock_queue<'a>(queue: &'a Mutex<Arc<FetchQueue>>) -> MutexGuard<'a, Arc<FetchQueue>> {
    queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
