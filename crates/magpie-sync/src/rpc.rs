use crate::engine::MirrorEngine;
use magpie_core::MagpieError;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// Typed message boundary. Callers hand over one request and get either a
/// `data` or an `error` envelope back; no handler is allowed to panic.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    FetchBookmarks {
        #[serde(default)]
        full: bool,
    },
    DeleteBookmark {
        tweet_id: String,
    },
    CheckAuth,
    DrainBookmarkEvents,
    AckBookmarkEvents {
        ids: Vec<String>,
    },
    StoreQueryIds {
        query_ids: BTreeMap<String, String>,
    },
    ResetSwState,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Response {
    Data { data: Value },
    Error { error: String },
}

pub fn dispatch(engine: &MirrorEngine, request: Request) -> Response {
    let result = match request {
        Request::FetchBookmarks { full } => {
            let outcome = if full {
                engine.hard_sync()
            } else {
                engine.soft_sync()
            };
            outcome.map(|report| match report {
                Some(report) => json!(report),
                None => json!({"skipped": true}),
            })
        }
        Request::DeleteBookmark { tweet_id } => engine
            .delete_bookmark(&tweet_id)
            .map(|done| json!({"tweet_id": tweet_id, "done": done})),
        Request::CheckAuth => Ok(json!(engine.check_auth())),
        Request::DrainBookmarkEvents => engine
            .events()
            .drain()
            .map(|events| json!({"events": events})),
        Request::AckBookmarkEvents { ids } => engine
            .events()
            .ack(&ids)
            .map(|acked| json!({"acked": acked})),
        Request::StoreQueryIds { query_ids } => engine
            .store_query_ids(&query_ids)
            .map(|stored| json!({"stored": stored})),
        Request::ResetSwState => engine.reset().map(|()| json!({"reset": true})),
    };

    match result {
        Ok(data) => Response::Data { data },
        Err(error) => Response::Error {
            error: error_string(&error),
        },
    }
}

fn error_string(error: &MagpieError) -> String {
    let kind = serde_json::to_value(error.kind)
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string());

    format!("{kind}: {}", error.message)
}
