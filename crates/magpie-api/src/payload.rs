use magpie_core::{MagpieError, MagpieResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bookmark {
    pub tweet_id: String,
    pub sort_index: String,
    pub payload: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookmarkPage {
    pub bookmarks: Vec<Bookmark>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TweetDetail {
    pub tweet_id: String,
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationResponse {
    pub done: bool,
    pub message: Option<String>,
}

const STALE_QUERY_ID_CODE: i64 = 404;

fn stale_query_id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)query\s?id[^.]*not\s+(?:found|recognized)").expect("stale query id regex")
    })
}

pub fn embedded_error_codes(payload: &Value) -> Vec<(Option<i64>, String)> {
    let Some(errors) = payload.get("errors").and_then(Value::as_array) else {
        return Vec::new();
    };

    errors
        .iter()
        .map(|error| {
            let code = error
                .get("code")
                .and_then(Value::as_i64)
                .or_else(|| {
                    error
                        .get("extensions")
                        .and_then(|ext| ext.get("code"))
                        .and_then(Value::as_i64)
                });
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            (code, message)
        })
        .collect()
}

/// A 2xx payload can still carry an embedded validation error saying the
/// query id the request used is no longer recognized by the host.
pub fn has_stale_query_id_error(payload: &Value) -> bool {
    embedded_error_codes(payload).iter().any(|(code, message)| {
        *code == Some(STALE_QUERY_ID_CODE) || stale_query_id_pattern().is_match(message)
    })
}

pub fn decode_bookmark_page(payload: &Value) -> MagpieResult<BookmarkPage> {
    let timeline = payload
        .get("data")
        .and_then(|data| {
            data.get("bookmark_timeline_v2")
                .or_else(|| data.get("bookmark_timeline"))
        })
        .and_then(|timeline| timeline.get("timeline"))
        .ok_or_else(|| {
            MagpieError::decode("bookmark page payload is missing the timeline object")
        })?;

    let instructions = timeline
        .get("instructions")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            MagpieError::decode("bookmark page timeline has no instructions array")
        })?;

    let mut bookmarks = Vec::new();
    let mut next_cursor = None;

    for instruction in instructions {
        let Some(entries) = instruction.get("entries").and_then(Value::as_array) else {
            continue;
        };

        for entry in entries {
            let Some(entry_id) = entry.get("entryId").and_then(Value::as_str) else {
                continue;
            };

            if let Some(suffix) = entry_id.strip_prefix("tweet-") {
                let tweet_id = entry_tweet_id(entry).unwrap_or_else(|| suffix.to_string());
                if tweet_id.is_empty() {
                    continue;
                }

                let sort_index = entry
                    .get("sortIndex")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();

                bookmarks.push(Bookmark {
                    tweet_id,
                    sort_index,
                    payload: entry.clone(),
                });
            } else if entry_id.starts_with("cursor-bottom") {
                next_cursor = entry_cursor_value(entry);
            }
        }
    }

    Ok(BookmarkPage {
        bookmarks,
        next_cursor: next_cursor.filter(|cursor| !cursor.is_empty()),
    })
}

fn entry_tweet_id(entry: &Value) -> Option<String> {
    entry
        .get("content")
        .and_then(|content| content.get("itemContent"))
        .and_then(|item| item.get("tweet_results"))
        .and_then(|results| results.get("result"))
        .and_then(|result| result.get("rest_id"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn entry_cursor_value(entry: &Value) -> Option<String> {
    let content = entry.get("content")?;
    content
        .get("value")
        .or_else(|| content.get("itemContent").and_then(|item| item.get("value")))
        .and_then(Value::as_str)
        .map(str::to_string)
}

pub fn decode_tweet_detail(payload: &Value) -> MagpieResult<TweetDetail> {
    let result = payload
        .get("data")
        .and_then(|data| data.get("tweetResult"))
        .and_then(|tweet| tweet.get("result"))
        .ok_or_else(|| MagpieError::decode("tweet detail payload is missing data.tweetResult.result"))?;

    let tweet_id = result
        .get("rest_id")
        .and_then(Value::as_str)
        .ok_or_else(|| MagpieError::decode("tweet detail result has no rest_id"))?
        .to_string();

    Ok(TweetDetail {
        tweet_id,
        payload: result.clone(),
    })
}

pub fn decode_mutation_response(payload: &Value) -> MagpieResult<MutationResponse> {
    let data = payload
        .get("data")
        .ok_or_else(|| MagpieError::decode("mutation payload has no data object"))?;

    let marker = data
        .get("tweet_bookmark_delete")
        .or_else(|| data.get("tweet_bookmark_put"))
        .and_then(Value::as_str);

    let errors = embedded_error_codes(payload);
    let done = match marker {
        Some(value) => value.eq_ignore_ascii_case("done"),
        None => errors.is_empty() && !data.is_null(),
    };

    Ok(MutationResponse {
        done,
        message: errors.into_iter().next().map(|(_, message)| message),
    })
}
