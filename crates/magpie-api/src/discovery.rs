use magpie_core::{MagpieError, MagpieResult};
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use url::Url;

pub const DISCOVERY_MAX_SCRIPTS: usize = 8;
pub const DISCOVERY_MAX_SCRIPT_BYTES: usize = 4 * 1024 * 1024;

/// Last-resort strategy for recovering a query id: scan the host's own
/// script bundles for the operation's registration literal.
pub trait QueryIdDiscovery {
    fn discover(&self, operation: &str) -> MagpieResult<Option<String>>;
}

#[derive(Debug, Clone)]
pub struct BundleDiscovery {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl BundleDiscovery {
    pub fn new(base_url: &str) -> MagpieResult<Self> {
        let trimmed = base_url.trim_end_matches('/').to_string();
        if trimmed.is_empty() {
            return Err(MagpieError::usage("host URL cannot be empty"));
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(|err| {
                MagpieError::io(format!("failed to construct discovery client: {err}"))
            })?;

        Ok(Self {
            base_url: trimmed,
            client,
        })
    }

    fn fetch_text(&self, url: &str) -> MagpieResult<String> {
        let response = self
            .client
            .get(url)
            .header("accept", "text/html,application/javascript,*/*")
            .send()
            .map_err(|err| MagpieError::api(format!("discovery fetch failed for '{url}': {err}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MagpieError::api(format!(
                "discovery fetch for '{url}' failed [http_status={}]",
                status.as_u16()
            )));
        }

        let body = response
            .text()
            .map_err(|err| MagpieError::api(format!("discovery body read failed for '{url}': {err}")))?;

        if body.len() > DISCOVERY_MAX_SCRIPT_BYTES {
            let mut end = DISCOVERY_MAX_SCRIPT_BYTES;
            while end > 0 && !body.is_char_boundary(end) {
                end -= 1;
            }
            return Ok(body[..end].to_string());
        }

        Ok(body)
    }
}

impl QueryIdDiscovery for BundleDiscovery {
    fn discover(&self, operation: &str) -> MagpieResult<Option<String>> {
        let html = self.fetch_text(&self.base_url)?;

        if let Some(query_id) = extract_query_id(&html, operation) {
            return Ok(Some(query_id));
        }

        for script_url in extract_script_urls(&html, &self.base_url, DISCOVERY_MAX_SCRIPTS) {
            let body = match self.fetch_text(&script_url) {
                Ok(body) => body,
                Err(_) => continue,
            };

            if let Some(query_id) = extract_query_id(&body, operation) {
                return Ok(Some(query_id));
            }
        }

        Ok(None)
    }
}

fn script_src_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"<script[^>]+src\s*=\s*["']([^"']+\.js[^"']*)["']"#).expect("script src regex")
    })
}

pub fn extract_script_urls(html: &str, base_url: &str, cap: usize) -> Vec<String> {
    let base = Url::parse(base_url).ok();
    let mut urls = Vec::new();

    for capture in script_src_pattern().captures_iter(html) {
        if urls.len() >= cap {
            break;
        }

        let src = &capture[1];
        let resolved = if src.starts_with("http://") || src.starts_with("https://") {
            Some(src.to_string())
        } else {
            base.as_ref()
                .and_then(|base| base.join(src).ok())
                .map(|url| url.to_string())
        };

        if let Some(url) = resolved
            && !urls.contains(&url)
        {
            urls.push(url);
        }
    }

    urls
}

/// Minified bundles register operations as object literals carrying both
/// `queryId` and `operationName`; the two keys appear in either order.
pub fn extract_query_id(source: &str, operation: &str) -> Option<String> {
    let escaped = regex::escape(operation);

    let id_first = Regex::new(&format!(
        r#"queryId\s*:\s*"([\w-]+)"\s*,[^{{}}]{{0,200}}?operationName\s*:\s*"{escaped}""#
    ))
    .ok()?;
    if let Some(capture) = id_first.captures(source) {
        return Some(capture[1].to_string());
    }

    let name_first = Regex::new(&format!(
        r#"operationName\s*:\s*"{escaped}"\s*,[^{{}}]{{0,200}}?queryId\s*:\s*"([\w-]+)""#
    ))
    .ok()?;
    if let Some(capture) = name_first.captures(source) {
        return Some(capture[1].to_string());
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::GET;
    use httpmock::MockServer;

    #[test]
    fn query_id_extraction_handles_both_key_orders() {
        let id_first = r#"e.exports={queryId:"abc-DEF_123",operationName:"Bookmarks",operationType:"query"}"#;
        assert_eq!(
            extract_query_id(id_first, "Bookmarks").as_deref(),
            Some("abc-DEF_123")
        );

        let name_first = r#"e.exports={operationName:"Bookmarks",metadata:{},queryId:"zzz999"}"#;
        assert_eq!(
            extract_query_id(name_first, "Bookmarks").as_deref(),
            Some("zzz999")
        );

        let other_operation = r#"e.exports={queryId:"abc",operationName:"TweetDetail"}"#;
        assert!(extract_query_id(other_operation, "Bookmarks").is_none());
    }

    #[test]
    fn operation_names_do_not_match_as_prefixes() {
        let source = r#"{queryId:"abc",operationName:"BookmarksV2"}"#;
        assert!(extract_query_id(source, "Bookmarks").is_none());
    }

    #[test]
    fn script_urls_are_resolved_capped_and_deduplicated() {
        let html = r#"
            <script src="https://cdn.test/main.1.js"></script>
            <script src="/bundles/app.2.js?v=9"></script>
            <script src="https://cdn.test/main.1.js"></script>
            <script src="/bundles/app.3.js"></script>
        "#;

        let urls = extract_script_urls(html, "https://host.test", 2);
        assert_eq!(
            urls,
            vec![
                "https://cdn.test/main.1.js".to_string(),
                "https://host.test/bundles/app.2.js?v=9".to_string(),
            ]
        );
    }

    #[test]
    fn discovery_scans_scripts_and_stops_at_first_hit() {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(GET).path("/");
            then.status(200).body(format!(
                r#"<html><script src="{0}/js/first.js"></script><script src="{0}/js/second.js"></script></html>"#,
                server.base_url()
            ));
        });
        server.mock(|when, then| {
            when.method(GET).path("/js/first.js");
            then.status(200)
                .body(r#"register({queryId:"other",operationName:"TweetDetail"})"#);
        });
        let second = server.mock(|when, then| {
            when.method(GET).path("/js/second.js");
            then.status(200)
                .body(r#"register({operationName:"Bookmarks",kind:"q",queryId:"found-1"})"#);
        });

        let discovery = BundleDiscovery::new(&server.base_url()).expect("discovery");
        let found = discovery.discover("Bookmarks").expect("discover");
        assert_eq!(found.as_deref(), Some("found-1"));
        second.assert_hits(1);
    }

    #[test]
    fn discovery_returns_none_when_no_bundle_matches() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/");
            then.status(200).body("<html>no scripts here</html>");
        });

        let discovery = BundleDiscovery::new(&server.base_url()).expect("discovery");
        assert!(discovery.discover("Bookmarks").expect("discover").is_none());
    }
}
