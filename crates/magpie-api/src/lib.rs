mod discovery;
mod observed;
mod payload;

pub use discovery::{
    BundleDiscovery, DISCOVERY_MAX_SCRIPT_BYTES, DISCOVERY_MAX_SCRIPTS, QueryIdDiscovery,
    extract_query_id, extract_script_urls,
};
pub use observed::{
    BookmarkEvent, CatalogEntry, EventKind, ObservationSource, ObservedEndpoint, ObservedTraffic,
    SAMPLE_MAX_CHARS, TrafficPhase, parse_graphql_url, truncate_sample,
};
pub use payload::{
    Bookmark, BookmarkPage, MutationResponse, TweetDetail, decode_bookmark_page,
    decode_mutation_response, decode_tweet_detail, embedded_error_codes, has_stale_query_id_error,
};

use magpie_core::{MagpieError, MagpieResult};
use rand::Rng;
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

pub const GRAPHQL_PATH_PREFIX: &str = "/i/api/graphql";

pub const HEADER_AUTHORIZATION: &str = "authorization";
pub const HEADER_COOKIE: &str = "cookie";
pub const HEADER_CSRF: &str = "x-csrf-token";
pub const HEADER_TRANSACTION_ID: &str = "x-client-transaction-id";
pub const SESSION_COOKIE_NAME: &str = "twid";

pub const OP_BOOKMARKS: &str = "Bookmarks";
pub const OP_TWEET_DETAIL: &str = "TweetDetail";
pub const OP_CREATE_BOOKMARK: &str = "CreateBookmark";
pub const OP_DELETE_BOOKMARK: &str = "DeleteBookmark";

pub const KNOWN_OPERATIONS: &[&str] = &[
    OP_BOOKMARKS,
    OP_TWEET_DETAIL,
    OP_CREATE_BOOKMARK,
    OP_DELETE_BOOKMARK,
];

const USER_AGENT_VALUE: &str = concat!("magpie/", env!("CARGO_PKG_VERSION"));
const ERROR_BODY_MAX_CHARS: usize = 240;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCredentials {
    pub headers: BTreeMap<String, String>,
    pub captured_at: String,
}

impl SessionCredentials {
    pub fn from_headers(headers: BTreeMap<String, String>, captured_at: String) -> Self {
        let normalized = headers
            .into_iter()
            .map(|(key, value)| (key.to_ascii_lowercase(), value))
            .collect();

        Self {
            headers: normalized,
            captured_at,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn cookie_header(&self) -> Option<&str> {
        self.header(HEADER_COOKIE)
    }

    /// A credential set is usable only when the bearer token, the session
    /// cookie, and the anti-forgery token were all captured together.
    pub fn is_complete(&self) -> bool {
        let has_auth = self
            .header(HEADER_AUTHORIZATION)
            .is_some_and(|value| !value.trim().is_empty());
        let has_csrf = self
            .header(HEADER_CSRF)
            .is_some_and(|value| !value.trim().is_empty());
        let has_session_cookie = self
            .cookie_header()
            .is_some_and(|value| value.contains(SESSION_COOKIE_NAME));

        has_auth && has_csrf && has_session_cookie
    }
}

#[derive(Debug, Clone)]
pub struct GraphqlClient {
    base_url: String,
    client: Client,
}

impl GraphqlClient {
    pub fn new(base_url: &str) -> MagpieResult<Self> {
        let trimmed = base_url.trim_end_matches('/').to_string();
        if trimmed.is_empty() {
            return Err(MagpieError::usage("host URL cannot be empty"));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT_VALUE)
            .build()
            .map_err(|err| MagpieError::io(format!("failed to construct API client: {err}")))?;

        Ok(Self {
            base_url: trimmed,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn get(
        &self,
        query_id: &str,
        operation: &str,
        credentials: &SessionCredentials,
        variables: &Value,
        features: &Value,
        field_toggles: Option<&Value>,
    ) -> MagpieResult<Value> {
        let mut query: Vec<(&str, String)> = vec![
            ("variables", encode_param("variables", variables)?),
            ("features", encode_param("features", features)?),
        ];
        if let Some(toggles) = field_toggles {
            query.push(("fieldToggles", encode_param("fieldToggles", toggles)?));
        }

        let request = self
            .client
            .get(self.url(query_id, operation))
            .query(&query)
            .headers(request_headers(credentials)?);

        parse_json_response(request.send().map_err(network_error)?)
    }

    pub fn post(
        &self,
        query_id: &str,
        operation: &str,
        credentials: &SessionCredentials,
        variables: &Value,
        features: Option<&Value>,
    ) -> MagpieResult<Value> {
        let mut body = serde_json::json!({
            "variables": variables,
            "queryId": query_id,
        });
        if let Some(features) = features {
            body["features"] = features.clone();
        }

        let request = self
            .client
            .post(self.url(query_id, operation))
            .headers(request_headers(credentials)?)
            .json(&body);

        parse_json_response(request.send().map_err(network_error)?)
    }

    fn url(&self, query_id: &str, operation: &str) -> String {
        format!("{}{GRAPHQL_PATH_PREFIX}/{query_id}/{operation}", self.base_url)
    }
}

fn encode_param(name: &str, value: &Value) -> MagpieResult<String> {
    serde_json::to_string(value)
        .map_err(|err| MagpieError::usage(format!("failed to encode {name} parameter: {err}")))
}

fn request_headers(credentials: &SessionCredentials) -> MagpieResult<HeaderMap> {
    let mut headers = HeaderMap::new();

    for (name, value) in &credentials.headers {
        let value = if name == HEADER_TRANSACTION_ID {
            perturb_transaction_id(value)
        } else {
            value.clone()
        };

        let header_name = reqwest::header::HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| MagpieError::usage(format!("invalid stored header name '{name}': {err}")))?;
        let header_value = reqwest::header::HeaderValue::from_str(&value)
            .map_err(|err| MagpieError::usage(format!("invalid stored header value for '{name}': {err}")))?;
        headers.insert(header_name, header_value);
    }

    Ok(headers)
}

/// The host expects this header to vary per request: one randomly chosen
/// digit is bumped by a small random amount.
pub fn perturb_transaction_id(value: &str) -> String {
    let digit_positions: Vec<usize> = value
        .char_indices()
        .filter(|(_, ch)| ch.is_ascii_digit())
        .map(|(index, _)| index)
        .collect();

    if digit_positions.is_empty() {
        return value.to_string();
    }

    let mut rng = rand::thread_rng();
    let position = digit_positions[rng.gen_range(0..digit_positions.len())];
    let bump = rng.gen_range(1..=3u32);

    let mut output = String::with_capacity(value.len());
    for (index, ch) in value.char_indices() {
        if index == position {
            let digit = ch.to_digit(10).unwrap_or(0);
            let replaced = char::from_digit((digit + bump) % 10, 10).unwrap_or(ch);
            output.push(replaced);
        } else {
            output.push(ch);
        }
    }

    output
}

fn parse_json_response(response: Response) -> MagpieResult<Value> {
    let status = response.status();
    let headers = response.headers().clone();
    let body_text = response.text().unwrap_or_default();

    if !status.is_success() {
        return Err(parse_error_response(status, &body_text, Some(&headers)));
    }

    serde_json::from_str::<Value>(&body_text)
        .map_err(|err| MagpieError::decode(format!("failed to decode API response JSON: {err}")))
}

fn parse_error_response(status: StatusCode, body_text: &str, headers: Option<&HeaderMap>) -> MagpieError {
    let body_trimmed = body_text.trim();
    let detail = if body_trimmed.is_empty() {
        format!("request failed with status {}", status.as_u16())
    } else {
        format!(
            "request failed with status {}: {}",
            status.as_u16(),
            truncate_for_error(body_trimmed, ERROR_BODY_MAX_CHARS)
        )
    };

    let with_retry_after = if status == StatusCode::TOO_MANY_REQUESTS {
        if let Some(seconds) = headers.and_then(extract_retry_after_seconds) {
            format!("{detail} [retry_after_seconds={seconds}]")
        } else {
            detail
        }
    } else {
        detail
    };

    let message = format!("{} [http_status={}]", with_retry_after, status.as_u16());

    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        MagpieError::auth_expired(message)
    } else {
        MagpieError::api(message)
    }
}

fn extract_retry_after_seconds(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .and_then(|value| value.parse::<u64>().ok())
}

fn truncate_for_error(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }

    let truncated: String = input.chars().take(max_chars).collect();
    format!("{truncated}...")
}

fn network_error(err: reqwest::Error) -> MagpieError {
    MagpieError::api(format!("network request failed: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::GET;
    use httpmock::MockServer;
    use magpie_core::{ErrorKind, extract_http_status};
    use serde_json::json;

    fn fixture_credentials() -> SessionCredentials {
        let mut headers = BTreeMap::new();
        headers.insert(HEADER_AUTHORIZATION.to_string(), "Bearer token-1".to_string());
        headers.insert(HEADER_CSRF.to_string(), "csrf-1".to_string());
        headers.insert(
            HEADER_COOKIE.to_string(),
            "twid=u%3D123; ct0=csrf-1".to_string(),
        );
        SessionCredentials::from_headers(headers, "2026-08-01T00:00:00Z".to_string())
    }

    #[test]
    fn credentials_require_all_three_headers() {
        let complete = fixture_credentials();
        assert!(complete.is_complete());

        let mut missing_csrf = complete.clone();
        missing_csrf.headers.remove(HEADER_CSRF);
        assert!(!missing_csrf.is_complete());

        let mut no_session_cookie = complete.clone();
        no_session_cookie
            .headers
            .insert(HEADER_COOKIE.to_string(), "ct0=csrf-1".to_string());
        assert!(!no_session_cookie.is_complete());
    }

    #[test]
    fn credential_header_names_are_normalized_to_lowercase() {
        let mut headers = BTreeMap::new();
        headers.insert("Authorization".to_string(), "Bearer token".to_string());
        let credentials = SessionCredentials::from_headers(headers, String::new());
        assert_eq!(credentials.header(HEADER_AUTHORIZATION), Some("Bearer token"));
    }

    #[test]
    fn transaction_id_perturbation_keeps_shape() {
        let original = "tx-4821-aa90";
        for _ in 0..32 {
            let perturbed = perturb_transaction_id(original);
            assert_eq!(perturbed.len(), original.len());
            let differing: Vec<_> = original
                .chars()
                .zip(perturbed.chars())
                .filter(|(a, b)| a != b)
                .collect();
            assert!(differing.len() <= 1);
            for (a, b) in differing {
                assert!(a.is_ascii_digit());
                assert!(b.is_ascii_digit());
            }
        }

        assert_eq!(perturb_transaction_id("no-digits"), "no-digits");
    }

    #[test]
    fn get_builds_graphql_path_and_returns_payload() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/i/api/graphql/qid-1/Bookmarks")
                .header("authorization", "Bearer token-1")
                .header("x-csrf-token", "csrf-1")
                .query_param("variables", json!({"count": 2}).to_string());
            then.status(200).json_body(json!({"data": {"ok": true}}));
        });

        let client = GraphqlClient::new(&server.base_url()).expect("client");
        let payload = client
            .get(
                "qid-1",
                OP_BOOKMARKS,
                &fixture_credentials(),
                &json!({"count": 2}),
                &json!({}),
                None,
            )
            .expect("payload");

        assert_eq!(payload["data"]["ok"], true);
        mock.assert_hits(1);
    }

    #[test]
    fn unauthorized_maps_to_auth_expired() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/i/api/graphql/qid-1/Bookmarks");
            then.status(401).body("denied");
        });

        let client = GraphqlClient::new(&server.base_url()).expect("client");
        let error = client
            .get(
                "qid-1",
                OP_BOOKMARKS,
                &fixture_credentials(),
                &json!({}),
                &json!({}),
                None,
            )
            .expect_err("should fail");

        assert_eq!(error.kind, ErrorKind::AuthExpired);
        assert_eq!(extract_http_status(&error.message), Some(401));
    }

    #[test]
    fn server_error_carries_status_and_truncated_body() {
        let server = MockServer::start();
        let long_body = "x".repeat(2_000);
        server.mock(|when, then| {
            when.method(GET).path("/i/api/graphql/qid-1/Bookmarks");
            then.status(503).body(&long_body);
        });

        let client = GraphqlClient::new(&server.base_url()).expect("client");
        let error = client
            .get(
                "qid-1",
                OP_BOOKMARKS,
                &fixture_credentials(),
                &json!({}),
                &json!({}),
                None,
            )
            .expect_err("should fail");

        assert_eq!(error.kind, ErrorKind::Api);
        assert_eq!(extract_http_status(&error.message), Some(503));
        assert!(error.message.len() < 600);
    }
}
