use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

pub const SAMPLE_MAX_CHARS: usize = 400;

/// A GraphQL call parsed out of a URL seen on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservedEndpoint {
    pub query_id: String,
    pub operation: String,
    pub path: String,
    pub variables: Option<String>,
    pub features: Option<String>,
    pub field_toggles: Option<String>,
}

impl ObservedEndpoint {
    pub fn catalog_key(&self) -> String {
        format!("{}:{}", self.operation, self.query_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub operation: String,
    pub query_id: String,
    pub path: String,
    pub first_seen: String,
    pub last_seen: String,
    pub seen_count: u64,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub variables_sample: Option<String>,
    #[serde(default)]
    pub features_sample: Option<String>,
    #[serde(default)]
    pub field_toggles_sample: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Create,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationSource {
    Page,
    ContentScript,
    SelfIssued,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookmarkEvent {
    pub id: String,
    pub kind: EventKind,
    pub tweet_id: String,
    pub at: String,
    pub source: ObservationSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficPhase {
    Request,
    Completion,
}

/// One record of the host page's own network activity, relayed inward by
/// whatever is watching the wire (header capture, page script, replay file).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservedTraffic {
    pub url: String,
    pub method: String,
    pub phase: TrafficPhase,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub source: ObservationSource,
    #[serde(default)]
    pub tweet_id: Option<String>,
    #[serde(default)]
    pub at: Option<String>,
}

pub fn parse_graphql_url(raw: &str) -> Option<ObservedEndpoint> {
    let parsed = Url::parse(raw).ok()?;
    let mut segments = parsed.path_segments()?;

    segments.by_ref().find(|segment| *segment == "graphql")?;
    let query_id = segments.next()?.to_string();
    let operation = segments.next()?.to_string();
    if query_id.is_empty() || operation.is_empty() {
        return None;
    }

    let mut variables = None;
    let mut features = None;
    let mut field_toggles = None;
    for (key, value) in parsed.query_pairs() {
        match key.as_ref() {
            "variables" => variables = Some(truncate_sample(&value)),
            "features" => features = Some(truncate_sample(&value)),
            "fieldToggles" => field_toggles = Some(truncate_sample(&value)),
            _ => {}
        }
    }

    Some(ObservedEndpoint {
        query_id,
        operation,
        path: parsed.path().to_string(),
        variables,
        features,
        field_toggles,
    })
}

/// Bounds stored samples; anything past the cap is replaced with an explicit
/// truncation marker so the catalog never grows with pathological payloads.
pub fn truncate_sample(input: &str) -> String {
    let total = input.chars().count();
    if total <= SAMPLE_MAX_CHARS {
        return input.to_string();
    }

    let kept: String = input.chars().take(SAMPLE_MAX_CHARS).collect();
    let dropped = total - SAMPLE_MAX_CHARS;
    format!("{kept}[truncated {dropped} chars]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graphql_url_parses_path_and_query_samples() {
        let url = "https://x.com/i/api/graphql/AbC123_x/Bookmarks?variables=%7B%22count%22%3A20%7D&features=%7B%7D";
        let endpoint = parse_graphql_url(url).expect("endpoint");

        assert_eq!(endpoint.query_id, "AbC123_x");
        assert_eq!(endpoint.operation, "Bookmarks");
        assert_eq!(endpoint.path, "/i/api/graphql/AbC123_x/Bookmarks");
        assert_eq!(endpoint.variables.as_deref(), Some(r#"{"count":20}"#));
        assert_eq!(endpoint.features.as_deref(), Some("{}"));
        assert!(endpoint.field_toggles.is_none());
        assert_eq!(endpoint.catalog_key(), "Bookmarks:AbC123_x");
    }

    #[test]
    fn non_graphql_urls_are_ignored() {
        assert!(parse_graphql_url("https://x.com/home").is_none());
        assert!(parse_graphql_url("https://x.com/i/api/graphql/only-id").is_none());
        assert!(parse_graphql_url("not a url").is_none());
    }

    #[test]
    fn long_samples_get_a_truncation_marker() {
        let long = "v".repeat(SAMPLE_MAX_CHARS + 25);
        let truncated = truncate_sample(&long);
        assert!(truncated.ends_with("[truncated 25 chars]"));
        assert!(truncated.starts_with("vvv"));

        let short = "w".repeat(SAMPLE_MAX_CHARS);
        assert_eq!(truncate_sample(&short), short);
    }
}
