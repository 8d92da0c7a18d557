use chrono::{DateTime, Duration as ChronoDuration, Utc};
use magpie_api::{
    BookmarkEvent, EventKind, OP_CREATE_BOOKMARK, OP_DELETE_BOOKMARK, ObservationSource,
};
use magpie_core::MagpieResult;
use magpie_store::CredentialStore;
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

pub const EVENT_QUEUE_MAX: usize = 200;
pub const EVENT_MAX_AGE_HOURS: i64 = 24;
pub const EVENT_COALESCE_WINDOW_MS: i64 = 1_000;

/// What a consumer should do with a drained batch of events.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct EventPlan {
    pub ids_to_delete: Vec<String>,
    pub needs_page_fetch: bool,
    pub ack_ids: Vec<String>,
}

/// Queue of normalized create/delete signals derived from observed traffic.
///
/// Deletes are recorded as soon as the mutation request is seen (the tweet id
/// is already known and local removal is safe). Creates are recorded only
/// after the server confirms the mutation, so a consumer's follow-up page
/// fetch cannot run before the new bookmark is visible remotely.
pub struct EventPipeline {
    store: CredentialStore,
    profile: String,
    max_events: usize,
    coalesce_window_ms: i64,
}

impl EventPipeline {
    pub fn new(store: CredentialStore, profile: impl Into<String>) -> Self {
        Self {
            store,
            profile: profile.into(),
            max_events: EVENT_QUEUE_MAX,
            coalesce_window_ms: EVENT_COALESCE_WINDOW_MS,
        }
    }

    pub fn with_max_events(mut self, max_events: usize) -> Self {
        self.max_events = max_events.max(1);
        self
    }

    pub fn observe_request(
        &self,
        operation: &str,
        tweet_id: Option<&str>,
        source: ObservationSource,
    ) -> MagpieResult<Option<BookmarkEvent>> {
        if operation != OP_DELETE_BOOKMARK {
            return Ok(None);
        }

        self.record(EventKind::Delete, tweet_id.unwrap_or_default(), source)
    }

    pub fn observe_completion(
        &self,
        operation: &str,
        status: Option<u16>,
        tweet_id: Option<&str>,
        source: ObservationSource,
    ) -> MagpieResult<Option<BookmarkEvent>> {
        if operation != OP_CREATE_BOOKMARK {
            return Ok(None);
        }
        if !status.is_some_and(|status| (200..300).contains(&status)) {
            return Ok(None);
        }

        self.record(EventKind::Create, tweet_id.unwrap_or_default(), source)
    }

    /// Appends an event unless an equivalent one landed inside the
    /// coalescing window; two observation points seeing the same network
    /// call must produce one record, not two.
    pub fn record(
        &self,
        kind: EventKind,
        tweet_id: &str,
        source: ObservationSource,
    ) -> MagpieResult<Option<BookmarkEvent>> {
        let now = Utc::now();
        let existing = self.store.load_events(&self.profile)?;

        let duplicate = existing.iter().any(|event| {
            event.kind == kind
                && event.tweet_id == tweet_id
                && within_window(&event.at, now, self.coalesce_window_ms)
        });
        if duplicate {
            debug!(?kind, tweet_id, "coalesced duplicate bookmark event");
            return Ok(None);
        }

        let event = BookmarkEvent {
            id: Uuid::new_v4().to_string(),
            kind,
            tweet_id: tweet_id.to_string(),
            at: now.to_rfc3339(),
            source,
        };
        self.store.append_event(&self.profile, &event)?;

        let overflow = (existing.len() + 1).saturating_sub(self.max_events);
        if overflow > 0 {
            let oldest: Vec<String> = existing
                .iter()
                .take(overflow)
                .map(|event| event.id.clone())
                .collect();
            self.store.remove_events(&self.profile, &oldest)?;
        }

        Ok(Some(event))
    }

    pub fn get(&self) -> MagpieResult<Vec<BookmarkEvent>> {
        self.store.load_events(&self.profile)
    }

    /// Read-and-clear.
    pub fn drain(&self) -> MagpieResult<Vec<BookmarkEvent>> {
        let events = self.store.load_events(&self.profile)?;
        let ids: Vec<String> = events.iter().map(|event| event.id.clone()).collect();
        self.store.remove_events(&self.profile, &ids)?;
        Ok(events)
    }

    pub fn ack(&self, ids: &[String]) -> MagpieResult<usize> {
        self.store.remove_events(&self.profile, ids)
    }

    pub fn prune(&self, now: DateTime<Utc>) -> MagpieResult<usize> {
        let cutoff = now - ChronoDuration::hours(EVENT_MAX_AGE_HOURS);
        let events = self.store.load_events(&self.profile)?;

        let expired: Vec<String> = events
            .iter()
            .filter(|event| {
                DateTime::parse_from_rfc3339(&event.at)
                    .map(|at| at.with_timezone(&Utc) < cutoff)
                    .unwrap_or(true)
            })
            .map(|event| event.id.clone())
            .collect();

        if expired.is_empty() {
            return Ok(0);
        }

        self.store.remove_events(&self.profile, &expired)
    }
}

fn within_window(at: &str, now: DateTime<Utc>, window_ms: i64) -> bool {
    let Ok(parsed) = DateTime::parse_from_rfc3339(at) else {
        return false;
    };

    (now - parsed.with_timezone(&Utc)).num_milliseconds().abs() <= window_ms
}

/// Pure planning step over a drained batch: every delete with a usable id is
/// applied locally, any create forces one small page fetch (there is no
/// fetch-by-id endpoint to target), and every event is acknowledged whether
/// or not it contributed anything.
pub fn resolve_bookmark_event_plan(events: &[BookmarkEvent]) -> EventPlan {
    let mut ids_to_delete = Vec::new();
    let mut seen_delete_ids = HashSet::new();
    let mut needs_page_fetch = false;
    let mut ack_ids = Vec::with_capacity(events.len());

    for event in events {
        ack_ids.push(event.id.clone());

        match event.kind {
            EventKind::Delete => {
                if !event.tweet_id.is_empty() && seen_delete_ids.insert(event.tweet_id.clone()) {
                    ids_to_delete.push(event.tweet_id.clone());
                }
            }
            EventKind::Create => needs_page_fetch = true,
        }
    }

    EventPlan {
        ids_to_delete,
        needs_page_fetch,
        ack_ids,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use magpie_fs::init_workspace;

    fn fixture() -> (tempfile::TempDir, EventPipeline) {
        let temp = tempfile::tempdir().expect("tempdir");
        let init = init_workspace(Some(&temp.path().join("workspace")), None).expect("init");
        let store = CredentialStore::from_workspace(&init.paths).expect("store");
        (temp, EventPipeline::new(store, "default"))
    }

    fn event(id: &str, kind: EventKind, tweet_id: &str) -> BookmarkEvent {
        BookmarkEvent {
            id: id.to_string(),
            kind,
            tweet_id: tweet_id.to_string(),
            at: "2026-08-01T00:00:00Z".to_string(),
            source: ObservationSource::Page,
        }
    }

    #[test]
    fn duplicate_events_inside_the_window_are_coalesced() {
        let (_temp, pipeline) = fixture();

        let first = pipeline
            .record(EventKind::Delete, "111", ObservationSource::Page)
            .expect("record");
        assert!(first.is_some());

        let duplicate = pipeline
            .record(EventKind::Delete, "111", ObservationSource::ContentScript)
            .expect("record duplicate");
        assert!(duplicate.is_none());

        // Same id but a different kind is a distinct signal.
        let other_kind = pipeline
            .record(EventKind::Create, "111", ObservationSource::Page)
            .expect("record create");
        assert!(other_kind.is_some());

        assert_eq!(pipeline.get().expect("get").len(), 2);
    }

    #[test]
    fn queue_is_capped_dropping_oldest_first() {
        let (_temp, pipeline) = fixture();
        let pipeline = pipeline.with_max_events(3);

        for index in 0..5 {
            pipeline
                .record(EventKind::Delete, &format!("{index}"), ObservationSource::Page)
                .expect("record");
        }

        let events = pipeline.get().expect("get");
        assert_eq!(events.len(), 3);
        let tweet_ids: Vec<&str> = events.iter().map(|event| event.tweet_id.as_str()).collect();
        assert_eq!(tweet_ids, vec!["2", "3", "4"]);
    }

    #[test]
    fn drain_reads_and_clears_ack_removes_by_id() {
        let (_temp, pipeline) = fixture();

        pipeline
            .record(EventKind::Delete, "1", ObservationSource::Page)
            .expect("record");
        pipeline
            .record(EventKind::Delete, "2", ObservationSource::Page)
            .expect("record");

        let peeked = pipeline.get().expect("get");
        assert_eq!(peeked.len(), 2);

        pipeline
            .ack(&[peeked[0].id.clone()])
            .expect("ack first");
        assert_eq!(pipeline.get().expect("get").len(), 1);

        let drained = pipeline.drain().expect("drain");
        assert_eq!(drained.len(), 1);
        assert!(pipeline.get().expect("get").is_empty());
    }

    #[test]
    fn prune_removes_events_past_max_age() {
        let (_temp, pipeline) = fixture();

        pipeline
            .record(EventKind::Delete, "1", ObservationSource::Page)
            .expect("record");

        assert_eq!(pipeline.prune(Utc::now()).expect("prune"), 0);

        let far_future = Utc::now() + ChronoDuration::hours(EVENT_MAX_AGE_HOURS + 1);
        assert_eq!(pipeline.prune(far_future).expect("prune"), 1);
        assert!(pipeline.get().expect("get").is_empty());
    }

    #[test]
    fn observation_points_map_operations_to_event_kinds() {
        let (_temp, pipeline) = fixture();

        // A delete is queued from the request observation point alone.
        let delete = pipeline
            .observe_request(OP_DELETE_BOOKMARK, Some("900"), ObservationSource::ContentScript)
            .expect("observe delete");
        assert_eq!(delete.expect("event").kind, EventKind::Delete);

        // A create is ignored until the server confirms completion.
        assert!(pipeline
            .observe_request(OP_CREATE_BOOKMARK, Some("901"), ObservationSource::Page)
            .expect("observe create request")
            .is_none());
        assert!(pipeline
            .observe_completion(OP_CREATE_BOOKMARK, Some(500), Some("901"), ObservationSource::Page)
            .expect("observe failed create")
            .is_none());

        let create = pipeline
            .observe_completion(OP_CREATE_BOOKMARK, Some(200), Some("901"), ObservationSource::Page)
            .expect("observe confirmed create");
        assert_eq!(create.expect("event").kind, EventKind::Create);

        // Unrelated operations never queue anything.
        assert!(pipeline
            .observe_request("HomeTimeline", Some("1"), ObservationSource::Page)
            .expect("observe unrelated")
            .is_none());
    }

    #[test]
    fn delete_plan_deduplicates_ids_and_acks_everything() {
        let events = vec![
            event("e1", EventKind::Delete, "111"),
            event("e2", EventKind::Delete, "111"),
            event("e3", EventKind::Delete, ""),
        ];

        let plan = resolve_bookmark_event_plan(&events);
        assert_eq!(plan.ids_to_delete, vec!["111".to_string()]);
        assert!(!plan.needs_page_fetch);
        assert_eq!(
            plan.ack_ids,
            vec!["e1".to_string(), "e2".to_string(), "e3".to_string()]
        );
    }

    #[test]
    fn create_plan_requests_a_page_fetch_even_without_an_id() {
        let events = vec![event("e1", EventKind::Create, "")];

        let plan = resolve_bookmark_event_plan(&events);
        assert!(plan.needs_page_fetch);
        assert!(plan.ids_to_delete.is_empty());
        assert_eq!(plan.ack_ids, vec!["e1".to_string()]);
    }

    #[test]
    fn empty_batch_produces_an_empty_plan() {
        let plan = resolve_bookmark_event_plan(&[]);
        assert!(plan.ids_to_delete.is_empty());
        assert!(!plan.needs_page_fetch);
        assert!(plan.ack_ids.is_empty());
    }
}
