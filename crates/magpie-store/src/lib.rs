use chrono::Utc;
use magpie_api::{Bookmark, BookmarkEvent, CatalogEntry, SessionCredentials};
use magpie_core::{MagpieError, MagpieResult};
use magpie_fs::WorkspacePaths;
use rusqlite::{Connection, Error as SqlError, ErrorCode, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredQueryId {
    pub query_id: String,
    pub resolved_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncState {
    pub last_soft_sync_at: Option<String>,
    pub last_full_sync_at: Option<String>,
    pub last_maintenance_at: Option<String>,
    pub last_error: Option<String>,
    #[serde(default)]
    pub bookmark_count: usize,
}

#[derive(Debug, Clone)]
pub struct CredentialStore {
    db_path: PathBuf,
}

impl CredentialStore {
    pub fn from_workspace(paths: &WorkspacePaths) -> MagpieResult<Self> {
        fs::create_dir_all(&paths.magpie_dir).map_err(|err| {
            MagpieError::io(format!(
                "failed to create state directory '{}': {}",
                paths.magpie_dir.display(),
                err
            ))
        })?;

        let store = Self {
            db_path: paths.state_db_path.clone(),
        };

        let conn = store.connection()?;
        store.initialize_schema(&conn)?;

        Ok(store)
    }

    pub fn load_credentials(&self, profile: &str) -> MagpieResult<Option<SessionCredentials>> {
        let key = profile_key(profile);
        let conn = self.connection()?;
        let payload = conn
            .query_row(
                "SELECT payload_json FROM credentials WHERE profile = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(|err| sqlite_error("load credentials", &self.db_path, err))?;

        let Some(payload) = payload else {
            return Ok(None);
        };

        let parsed = serde_json::from_str::<SessionCredentials>(&payload).map_err(|err| {
            MagpieError::store(format!(
                "failed to parse stored credentials in '{}': {}",
                self.db_path.display(),
                err
            ))
        })?;

        Ok(Some(parsed))
    }

    /// The credential set is replaced whole; a partial header map is never
    /// visible to readers.
    pub fn save_credentials(
        &self,
        profile: &str,
        credentials: &SessionCredentials,
    ) -> MagpieResult<()> {
        let key = profile_key(profile);
        let payload = serde_json::to_string(credentials)
            .map_err(|err| MagpieError::store(format!("failed to serialize credentials: {err}")))?;

        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO credentials (profile, payload_json, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(profile) DO UPDATE SET payload_json = excluded.payload_json, updated_at = excluded.updated_at",
            params![key, payload, Utc::now().to_rfc3339()],
        )
        .map_err(|err| sqlite_error("save credentials", &self.db_path, err))?;

        Ok(())
    }

    pub fn clear_credentials(&self, profile: &str) -> MagpieResult<()> {
        let key = profile_key(profile);
        let conn = self.connection()?;
        conn.execute("DELETE FROM credentials WHERE profile = ?1", params![key])
            .map_err(|err| sqlite_error("clear credentials", &self.db_path, err))?;
        Ok(())
    }

    pub fn load_query_id(&self, profile: &str, operation: &str) -> MagpieResult<Option<StoredQueryId>> {
        let key = profile_key(profile);
        let conn = self.connection()?;
        conn.query_row(
            "SELECT query_id, resolved_at FROM query_ids WHERE profile = ?1 AND operation = ?2",
            params![key, operation],
            |row| {
                Ok(StoredQueryId {
                    query_id: row.get(0)?,
                    resolved_at: row.get(1)?,
                })
            },
        )
        .optional()
        .map_err(|err| sqlite_error("load query id", &self.db_path, err))
    }

    pub fn save_query_id(&self, profile: &str, operation: &str, query_id: &str) -> MagpieResult<()> {
        let key = profile_key(profile);
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO query_ids (profile, operation, query_id, resolved_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(profile, operation) DO UPDATE SET query_id = excluded.query_id, resolved_at = excluded.resolved_at",
            params![key, operation, query_id, Utc::now().to_rfc3339()],
        )
        .map_err(|err| sqlite_error("save query id", &self.db_path, err))?;
        Ok(())
    }

    pub fn clear_query_id(&self, profile: &str, operation: &str) -> MagpieResult<()> {
        let key = profile_key(profile);
        let conn = self.connection()?;
        conn.execute(
            "DELETE FROM query_ids WHERE profile = ?1 AND operation = ?2",
            params![key, operation],
        )
        .map_err(|err| sqlite_error("clear query id", &self.db_path, err))?;
        Ok(())
    }

    pub fn load_all_query_ids(&self, profile: &str) -> MagpieResult<BTreeMap<String, StoredQueryId>> {
        let key = profile_key(profile);
        let conn = self.connection()?;
        let mut statement = conn
            .prepare("SELECT operation, query_id, resolved_at FROM query_ids WHERE profile = ?1")
            .map_err(|err| sqlite_error("prepare query id listing", &self.db_path, err))?;

        let rows = statement
            .query_map(params![key], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    StoredQueryId {
                        query_id: row.get(1)?,
                        resolved_at: row.get(2)?,
                    },
                ))
            })
            .map_err(|err| sqlite_error("list query ids", &self.db_path, err))?;

        let mut out = BTreeMap::new();
        for row in rows {
            let (operation, stored) =
                row.map_err(|err| sqlite_error("read query id row", &self.db_path, err))?;
            out.insert(operation, stored);
        }

        Ok(out)
    }

    pub fn load_catalog(&self, profile: &str) -> MagpieResult<BTreeMap<String, CatalogEntry>> {
        let key = profile_key(profile);
        let conn = self.connection()?;
        let payload = conn
            .query_row(
                "SELECT payload_json FROM catalog WHERE profile = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(|err| sqlite_error("load endpoint catalog", &self.db_path, err))?;

        let Some(payload) = payload else {
            return Ok(BTreeMap::new());
        };

        serde_json::from_str::<BTreeMap<String, CatalogEntry>>(&payload).map_err(|err| {
            MagpieError::store(format!(
                "failed to parse endpoint catalog in '{}': {}",
                self.db_path.display(),
                err
            ))
        })
    }

    pub fn save_catalog(
        &self,
        profile: &str,
        entries: &BTreeMap<String, CatalogEntry>,
    ) -> MagpieResult<()> {
        let key = profile_key(profile);
        let payload = serde_json::to_string(entries)
            .map_err(|err| MagpieError::store(format!("failed to encode endpoint catalog: {err}")))?;

        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO catalog (profile, payload_json, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(profile) DO UPDATE SET payload_json = excluded.payload_json, updated_at = excluded.updated_at",
            params![key, payload, Utc::now().to_rfc3339()],
        )
        .map_err(|err| sqlite_error("save endpoint catalog", &self.db_path, err))?;

        Ok(())
    }

    pub fn append_event(&self, profile: &str, event: &BookmarkEvent) -> MagpieResult<()> {
        let key = profile_key(profile);
        let payload = serde_json::to_string(event)
            .map_err(|err| MagpieError::store(format!("failed to encode bookmark event: {err}")))?;

        let conn = self.connection()?;
        conn.execute(
            "INSERT OR REPLACE INTO events (profile, id, payload_json, recorded_at) VALUES (?1, ?2, ?3, ?4)",
            params![key, event.id, payload, event.at],
        )
        .map_err(|err| sqlite_error("append bookmark event", &self.db_path, err))?;

        Ok(())
    }

    pub fn load_events(&self, profile: &str) -> MagpieResult<Vec<BookmarkEvent>> {
        let key = profile_key(profile);
        let conn = self.connection()?;
        let mut statement = conn
            .prepare(
                "SELECT payload_json FROM events WHERE profile = ?1 ORDER BY recorded_at ASC, rowid ASC",
            )
            .map_err(|err| sqlite_error("prepare event listing", &self.db_path, err))?;

        let rows = statement
            .query_map(params![key], |row| row.get::<_, String>(0))
            .map_err(|err| sqlite_error("list bookmark events", &self.db_path, err))?;

        let mut events = Vec::new();
        for row in rows {
            let payload = row.map_err(|err| sqlite_error("read event row", &self.db_path, err))?;
            let parsed = serde_json::from_str::<BookmarkEvent>(&payload).map_err(|err| {
                MagpieError::store(format!(
                    "failed to parse bookmark event in '{}': {}",
                    self.db_path.display(),
                    err
                ))
            })?;
            events.push(parsed);
        }

        Ok(events)
    }

    pub fn remove_events(&self, profile: &str, ids: &[String]) -> MagpieResult<usize> {
        let key = profile_key(profile);
        let mut conn = self.connection()?;
        let transaction = conn
            .transaction()
            .map_err(|err| sqlite_error("start event removal transaction", &self.db_path, err))?;

        let mut removed = 0usize;
        for id in ids {
            removed += transaction
                .execute(
                    "DELETE FROM events WHERE profile = ?1 AND id = ?2",
                    params![key, id],
                )
                .map_err(|err| sqlite_error("remove bookmark event", &self.db_path, err))?;
        }

        transaction
            .commit()
            .map_err(|err| sqlite_error("commit event removal", &self.db_path, err))?;

        Ok(removed)
    }

    pub fn clear_events(&self, profile: &str) -> MagpieResult<()> {
        let key = profile_key(profile);
        let conn = self.connection()?;
        conn.execute("DELETE FROM events WHERE profile = ?1", params![key])
            .map_err(|err| sqlite_error("clear bookmark events", &self.db_path, err))?;
        Ok(())
    }

    /// Upsert keyed by tweet id; re-observing a bookmark refreshes it instead
    /// of inserting a duplicate row.
    pub fn upsert_bookmarks(&self, profile: &str, bookmarks: &[Bookmark]) -> MagpieResult<usize> {
        let key = profile_key(profile);
        let mut conn = self.connection()?;
        let transaction = conn
            .transaction()
            .map_err(|err| sqlite_error("start bookmark upsert transaction", &self.db_path, err))?;

        let mut inserted = 0usize;
        for bookmark in bookmarks {
            if bookmark.tweet_id.is_empty() {
                continue;
            }

            let payload = serde_json::to_string(&bookmark.payload)
                .map_err(|err| MagpieError::store(format!("failed to encode bookmark: {err}")))?;
            inserted += transaction
                .execute(
                    "INSERT INTO bookmarks (profile, tweet_id, sort_index, payload_json, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(profile, tweet_id) DO UPDATE SET
                         sort_index = excluded.sort_index,
                         payload_json = excluded.payload_json,
                         updated_at = excluded.updated_at",
                    params![
                        key,
                        bookmark.tweet_id,
                        bookmark.sort_index,
                        payload,
                        Utc::now().to_rfc3339()
                    ],
                )
                .map_err(|err| sqlite_error("upsert bookmark", &self.db_path, err))?;
        }

        transaction
            .commit()
            .map_err(|err| sqlite_error("commit bookmark upsert", &self.db_path, err))?;

        Ok(inserted)
    }

    pub fn remove_bookmarks(&self, profile: &str, ids: &[String]) -> MagpieResult<usize> {
        let key = profile_key(profile);
        let mut conn = self.connection()?;
        let transaction = conn
            .transaction()
            .map_err(|err| sqlite_error("start bookmark removal transaction", &self.db_path, err))?;

        let mut removed = 0usize;
        for id in ids {
            removed += transaction
                .execute(
                    "DELETE FROM bookmarks WHERE profile = ?1 AND tweet_id = ?2",
                    params![key, id],
                )
                .map_err(|err| sqlite_error("remove bookmark", &self.db_path, err))?;
        }

        transaction
            .commit()
            .map_err(|err| sqlite_error("commit bookmark removal", &self.db_path, err))?;

        Ok(removed)
    }

    pub fn bookmark_ids(&self, profile: &str) -> MagpieResult<HashSet<String>> {
        let key = profile_key(profile);
        let conn = self.connection()?;
        let mut statement = conn
            .prepare("SELECT tweet_id FROM bookmarks WHERE profile = ?1")
            .map_err(|err| sqlite_error("prepare bookmark id listing", &self.db_path, err))?;

        let rows = statement
            .query_map(params![key], |row| row.get::<_, String>(0))
            .map_err(|err| sqlite_error("list bookmark ids", &self.db_path, err))?;

        let mut ids = HashSet::new();
        for row in rows {
            ids.insert(row.map_err(|err| sqlite_error("read bookmark id row", &self.db_path, err))?);
        }

        Ok(ids)
    }

    pub fn bookmark_count(&self, profile: &str) -> MagpieResult<usize> {
        let key = profile_key(profile);
        let conn = self.connection()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM bookmarks WHERE profile = ?1",
                params![key],
                |row| row.get(0),
            )
            .map_err(|err| sqlite_error("count bookmarks", &self.db_path, err))?;

        Ok(count.max(0) as usize)
    }

    pub fn list_bookmarks(&self, profile: &str, limit: Option<usize>) -> MagpieResult<Vec<Bookmark>> {
        let key = profile_key(profile);
        let conn = self.connection()?;
        let mut statement = conn
            .prepare(
                "SELECT tweet_id, sort_index, payload_json FROM bookmarks
                 WHERE profile = ?1 ORDER BY sort_index DESC",
            )
            .map_err(|err| sqlite_error("prepare bookmark listing", &self.db_path, err))?;

        let rows = statement
            .query_map(params![key], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(|err| sqlite_error("list bookmarks", &self.db_path, err))?;

        let mut bookmarks = Vec::new();
        for row in rows {
            let (tweet_id, sort_index, payload) =
                row.map_err(|err| sqlite_error("read bookmark row", &self.db_path, err))?;
            let payload = serde_json::from_str(&payload).map_err(|err| {
                MagpieError::store(format!(
                    "failed to parse stored bookmark in '{}': {}",
                    self.db_path.display(),
                    err
                ))
            })?;

            bookmarks.push(Bookmark {
                tweet_id,
                sort_index,
                payload,
            });

            if let Some(limit) = limit
                && bookmarks.len() >= limit
            {
                break;
            }
        }

        Ok(bookmarks)
    }

    pub fn load_sync_state(&self, profile: &str) -> MagpieResult<SyncState> {
        let key = profile_key(profile);
        let conn = self.connection()?;
        let payload = conn
            .query_row(
                "SELECT payload_json FROM sync_state WHERE profile = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(|err| sqlite_error("load sync state", &self.db_path, err))?;

        let Some(payload) = payload else {
            return Ok(SyncState::default());
        };

        serde_json::from_str::<SyncState>(&payload).map_err(|err| {
            MagpieError::store(format!(
                "failed to parse sync state in '{}': {}",
                self.db_path.display(),
                err
            ))
        })
    }

    pub fn save_sync_state(&self, profile: &str, state: &SyncState) -> MagpieResult<()> {
        let key = profile_key(profile);
        let payload = serde_json::to_string(state)
            .map_err(|err| MagpieError::store(format!("failed to encode sync state: {err}")))?;

        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO sync_state (profile, payload_json, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(profile) DO UPDATE SET payload_json = excluded.payload_json, updated_at = excluded.updated_at",
            params![key, payload, Utc::now().to_rfc3339()],
        )
        .map_err(|err| sqlite_error("save sync state", &self.db_path, err))?;

        Ok(())
    }

    /// Drops queue-like runtime state; credentials, resolved query ids, the
    /// catalog, and the bookmark collection survive a reset.
    pub fn clear_runtime_state(&self, profile: &str) -> MagpieResult<()> {
        let key = profile_key(profile);
        let conn = self.connection()?;
        conn.execute("DELETE FROM events WHERE profile = ?1", params![key])
            .map_err(|err| sqlite_error("clear bookmark events", &self.db_path, err))?;
        conn.execute("DELETE FROM sync_state WHERE profile = ?1", params![key])
            .map_err(|err| sqlite_error("clear sync state", &self.db_path, err))?;
        Ok(())
    }

    fn connection(&self) -> MagpieResult<Connection> {
        Connection::open(&self.db_path)
            .map_err(|err| sqlite_error("open state database", &self.db_path, err))
    }

    fn initialize_schema(&self, conn: &Connection) -> MagpieResult<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             CREATE TABLE IF NOT EXISTS credentials (
                 profile TEXT PRIMARY KEY,
                 payload_json TEXT NOT NULL,
                 updated_at TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS query_ids (
                 profile TEXT NOT NULL,
                 operation TEXT NOT NULL,
                 query_id TEXT NOT NULL,
                 resolved_at TEXT NOT NULL,
                 PRIMARY KEY (profile, operation)
             );
             CREATE TABLE IF NOT EXISTS catalog (
                 profile TEXT PRIMARY KEY,
                 payload_json TEXT NOT NULL,
                 updated_at TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS events (
                 profile TEXT NOT NULL,
                 id TEXT NOT NULL,
                 payload_json TEXT NOT NULL,
                 recorded_at TEXT NOT NULL,
                 PRIMARY KEY (profile, id)
             );
             CREATE TABLE IF NOT EXISTS bookmarks (
                 profile TEXT NOT NULL,
                 tweet_id TEXT NOT NULL,
                 sort_index TEXT NOT NULL,
                 payload_json TEXT NOT NULL,
                 updated_at TEXT NOT NULL,
                 PRIMARY KEY (profile, tweet_id)
             );
             CREATE TABLE IF NOT EXISTS sync_state (
                 profile TEXT PRIMARY KEY,
                 payload_json TEXT NOT NULL,
                 updated_at TEXT NOT NULL
             );",
        )
        .map_err(|err| sqlite_error("initialize schema", &self.db_path, err))?;

        Ok(())
    }
}

fn sqlite_error(action: &str, db_path: &Path, err: SqlError) -> MagpieError {
    if let SqlError::SqliteFailure(code, message) = &err
        && (code.code == ErrorCode::DatabaseCorrupt || code.code == ErrorCode::NotADatabase)
    {
        let detail = message.as_deref().unwrap_or("sqlite reported corruption");
        return MagpieError::store(format!(
            "failed to {action}: state database '{}' is corrupted ({detail}); remove '.magpie/state.db' and run `magpie sync pull --full` to rebuild local state",
            db_path.display()
        ));
    }

    MagpieError::store(format!(
        "failed to {action} using state database '{}': {}",
        db_path.display(),
        err
    ))
}

fn profile_key(profile: &str) -> String {
    let mut output = String::with_capacity(profile.len());
    for ch in profile.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
            output.push(ch);
        } else {
            output.push('_');
        }
    }

    if output.is_empty() {
        "default".to_string()
    } else {
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use magpie_api::{EventKind, ObservationSource};
    use magpie_fs::init_workspace;
    use serde_json::json;

    fn fixture_store() -> (tempfile::TempDir, CredentialStore) {
        let temp = tempfile::tempdir().expect("tempdir");
        let init = init_workspace(Some(&temp.path().join("workspace")), None).expect("init");
        let store = CredentialStore::from_workspace(&init.paths).expect("store");
        (temp, store)
    }

    fn fixture_credentials() -> SessionCredentials {
        let mut headers = BTreeMap::new();
        headers.insert("authorization".to_string(), "Bearer t".to_string());
        headers.insert("x-csrf-token".to_string(), "c".to_string());
        headers.insert("cookie".to_string(), "twid=u%3D1".to_string());
        SessionCredentials::from_headers(headers, "2026-08-01T00:00:00Z".to_string())
    }

    fn fixture_event(id: &str, tweet_id: &str, at: &str) -> BookmarkEvent {
        BookmarkEvent {
            id: id.to_string(),
            kind: EventKind::Delete,
            tweet_id: tweet_id.to_string(),
            at: at.to_string(),
            source: ObservationSource::Page,
        }
    }

    #[test]
    fn credentials_round_trip_and_clear() {
        let (_temp, store) = fixture_store();

        assert!(store.load_credentials("default").expect("load").is_none());

        store
            .save_credentials("default", &fixture_credentials())
            .expect("save");
        let loaded = store
            .load_credentials("default")
            .expect("load")
            .expect("credentials present");
        assert_eq!(loaded.header("authorization"), Some("Bearer t"));

        store.clear_credentials("default").expect("clear");
        assert!(store.load_credentials("default").expect("load").is_none());
    }

    #[test]
    fn query_id_slots_are_per_operation() {
        let (_temp, store) = fixture_store();

        store
            .save_query_id("default", "Bookmarks", "qid-1")
            .expect("save");
        store
            .save_query_id("default", "TweetDetail", "qid-2")
            .expect("save");
        store
            .save_query_id("default", "Bookmarks", "qid-3")
            .expect("overwrite");

        let stored = store
            .load_query_id("default", "Bookmarks")
            .expect("load")
            .expect("slot present");
        assert_eq!(stored.query_id, "qid-3");

        let all = store.load_all_query_ids("default").expect("list");
        assert_eq!(all.len(), 2);

        store.clear_query_id("default", "Bookmarks").expect("clear");
        assert!(store.load_query_id("default", "Bookmarks").expect("load").is_none());
    }

    #[test]
    fn bookmarks_deduplicate_by_tweet_id() {
        let (_temp, store) = fixture_store();

        let first = Bookmark {
            tweet_id: "101".to_string(),
            sort_index: "5".to_string(),
            payload: json!({"v": 1}),
        };
        let duplicate = Bookmark {
            tweet_id: "101".to_string(),
            sort_index: "9".to_string(),
            payload: json!({"v": 2}),
        };
        let other = Bookmark {
            tweet_id: "102".to_string(),
            sort_index: "7".to_string(),
            payload: json!({}),
        };

        store
            .upsert_bookmarks("default", &[first, duplicate, other])
            .expect("upsert");

        assert_eq!(store.bookmark_count("default").expect("count"), 2);

        let listed = store.list_bookmarks("default", None).expect("list");
        assert_eq!(listed[0].tweet_id, "101");
        assert_eq!(listed[0].sort_index, "9");
        assert_eq!(listed[0].payload["v"], 2);
        assert_eq!(listed[1].tweet_id, "102");

        let removed = store
            .remove_bookmarks("default", &["101".to_string(), "missing".to_string()])
            .expect("remove");
        assert_eq!(removed, 1);
        assert_eq!(store.bookmark_count("default").expect("count"), 1);
    }

    #[test]
    fn events_preserve_order_and_remove_by_id() {
        let (_temp, store) = fixture_store();

        store
            .append_event("default", &fixture_event("e1", "1", "2026-08-01T00:00:01Z"))
            .expect("append");
        store
            .append_event("default", &fixture_event("e2", "2", "2026-08-01T00:00:02Z"))
            .expect("append");
        store
            .append_event("default", &fixture_event("e3", "3", "2026-08-01T00:00:03Z"))
            .expect("append");

        let events = store.load_events("default").expect("load");
        let ids: Vec<&str> = events.iter().map(|event| event.id.as_str()).collect();
        assert_eq!(ids, vec!["e1", "e2", "e3"]);

        let removed = store
            .remove_events("default", &["e1".to_string(), "e3".to_string()])
            .expect("remove");
        assert_eq!(removed, 2);

        let remaining = store.load_events("default").expect("load");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "e2");
    }

    #[test]
    fn runtime_reset_keeps_credentials_and_bookmarks() {
        let (_temp, store) = fixture_store();

        store
            .save_credentials("default", &fixture_credentials())
            .expect("save credentials");
        store
            .upsert_bookmarks(
                "default",
                &[Bookmark {
                    tweet_id: "1".to_string(),
                    sort_index: "1".to_string(),
                    payload: json!({}),
                }],
            )
            .expect("save bookmark");
        store
            .append_event("default", &fixture_event("e1", "1", "2026-08-01T00:00:01Z"))
            .expect("append event");
        store
            .save_sync_state(
                "default",
                &SyncState {
                    last_soft_sync_at: Some("2026-08-01T00:00:00Z".to_string()),
                    ..SyncState::default()
                },
            )
            .expect("save state");

        store.clear_runtime_state("default").expect("reset");

        assert!(store.load_credentials("default").expect("load").is_some());
        assert_eq!(store.bookmark_count("default").expect("count"), 1);
        assert!(store.load_events("default").expect("load").is_empty());
        assert!(store.load_sync_state("default").expect("load").last_soft_sync_at.is_none());
    }

    #[test]
    fn profile_name_sanitization_is_stable() {
        assert_eq!(profile_key("default"), "default");
        assert_eq!(profile_key("my profile"), "my_profile");
        assert_eq!(profile_key(""), "default");
    }
}
