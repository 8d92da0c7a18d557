use crate::catalog::EndpointCatalog;
use crate::queue::FetchQueue;
use crate::resolver::EndpointResolver;
use magpie_api::{GraphqlClient, has_stale_query_id_error};
use magpie_core::{ErrorKind, MagpieError, MagpieResult};
use magpie_session::{ReauthDriver, SessionManager};
use serde_json::Value;
use tracing::{debug, warn};

/// Each staleness kind gets exactly one automatic recovery per logical call;
/// passing the budget by value makes the bound structural.
#[derive(Debug, Clone, Copy)]
pub struct RetryBudget {
    pub auth: u8,
    pub endpoint: u8,
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self { auth: 1, endpoint: 1 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMethod {
    Get,
    Post,
}

#[derive(Debug, Clone)]
pub struct CallSpec {
    pub operation: String,
    pub variables: Value,
    pub features: Value,
    pub field_toggles: Option<Value>,
    pub method: CallMethod,
}

impl CallSpec {
    pub fn get(operation: impl Into<String>, variables: Value, features: Value) -> Self {
        Self {
            operation: operation.into(),
            variables,
            features,
            field_toggles: None,
            method: CallMethod::Get,
        }
    }

    pub fn post(operation: impl Into<String>, variables: Value) -> Self {
        Self {
            operation: operation.into(),
            variables,
            features: Value::Null,
            field_toggles: None,
            method: CallMethod::Post,
        }
    }
}

pub struct ApiCaller<'a> {
    pub client: &'a GraphqlClient,
    pub session: &'a SessionManager,
    pub resolver: &'a EndpointResolver,
    pub catalog: &'a EndpointCatalog,
    pub reauth_driver: &'a dyn ReauthDriver,
}

impl ApiCaller<'_> {
    /// Bulk calls go through the queue; single-shot user-paced calls pass
    /// `None` and execute immediately.
    pub fn call(&self, spec: &CallSpec, queue: Option<&FetchQueue>) -> MagpieResult<Value> {
        self.call_with_budget(spec, queue, RetryBudget::default())
    }

    pub fn call_with_budget(
        &self,
        spec: &CallSpec,
        queue: Option<&FetchQueue>,
        mut budget: RetryBudget,
    ) -> MagpieResult<Value> {
        loop {
            let credentials = self
                .session
                .credentials()?
                .filter(|credentials| credentials.is_complete())
                .ok_or_else(|| {
                    MagpieError::no_auth(
                        "no usable credentials captured; browse the host site with capture running or import headers via `magpie auth capture`",
                    )
                })?;

            let Some(query_id) = self.resolver.resolve(&spec.operation, self.catalog)? else {
                return Err(MagpieError::no_query_id(format!(
                    "could not resolve a query id for operation '{}' through any fallback",
                    spec.operation
                )));
            };

            let result = self.execute(spec, queue, &credentials, &query_id);

            match result {
                Err(error) if error.kind == ErrorKind::AuthExpired && budget.auth > 0 => {
                    budget.auth -= 1;
                    warn!(operation = %spec.operation, "host rejected stored credentials; attempting silent reauth");
                    self.session.clear_credentials()?;

                    if !self.session.silent_reauth(self.reauth_driver)? {
                        return Err(MagpieError::auth_expired(
                            "stored session was rejected and silent reauth failed; reconnect manually",
                        ));
                    }
                    continue;
                }
                Err(error) => return Err(error),
                Ok(payload) => {
                    if has_stale_query_id_error(&payload) && budget.endpoint > 0 {
                        budget.endpoint -= 1;
                        debug!(operation = %spec.operation, query_id, "host flagged query id as stale; forcing rediscovery");

                        if self.resolver.force_rediscover(&spec.operation)?.is_none() {
                            return Err(MagpieError::no_query_id(format!(
                                "query id for '{}' was rejected and rediscovery found no replacement",
                                spec.operation
                            )));
                        }
                        continue;
                    }

                    // Remaining embedded errors are domain-level; the payload
                    // is returned untouched for the caller to interpret.
                    return Ok(payload);
                }
            }
        }
    }

    fn execute(
        &self,
        spec: &CallSpec,
        queue: Option<&FetchQueue>,
        credentials: &magpie_api::SessionCredentials,
        query_id: &str,
    ) -> MagpieResult<Value> {
        let Some(queue) = queue else {
            return self.execute_direct(spec, credentials, query_id);
        };

        let client = self.client.clone();
        let spec = spec.clone();
        let credentials = credentials.clone();
        let query_id = query_id.to_string();

        queue
            .enqueue(Box::new(move || match spec.method {
                CallMethod::Get => client.get(
                    &query_id,
                    &spec.operation,
                    &credentials,
                    &spec.variables,
                    &spec.features,
                    spec.field_toggles.as_ref(),
                ),
                CallMethod::Post => client.post(
                    &query_id,
                    &spec.operation,
                    &credentials,
                    &spec.variables,
                    non_null(&spec.features),
                ),
            }))?
            .wait()
    }

    fn execute_direct(
        &self,
        spec: &CallSpec,
        credentials: &magpie_api::SessionCredentials,
        query_id: &str,
    ) -> MagpieResult<Value> {
        match spec.method {
            CallMethod::Get => self.client.get(
                query_id,
                &spec.operation,
                credentials,
                &spec.variables,
                &spec.features,
                spec.field_toggles.as_ref(),
            ),
            CallMethod::Post => self.client.post(
                query_id,
                &spec.operation,
                credentials,
                &spec.variables,
                non_null(&spec.features),
            ),
        }
    }
}

fn non_null(value: &Value) -> Option<&Value> {
    if value.is_null() { None } else { Some(value) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::GET;
    use httpmock::MockServer;
    use magpie_api::{
        HEADER_AUTHORIZATION, HEADER_COOKIE, HEADER_CSRF, OP_BOOKMARKS, QueryIdDiscovery,
        SessionCredentials,
    };
    use magpie_fs::init_workspace;
    use magpie_store::CredentialStore;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        _temp: tempfile::TempDir,
        store: CredentialStore,
        session: SessionManager,
        catalog: EndpointCatalog,
    }

    fn fixture() -> Fixture {
        let temp = tempfile::tempdir().expect("tempdir");
        let init = init_workspace(Some(&temp.path().join("workspace")), None).expect("init");
        let store = CredentialStore::from_workspace(&init.paths).expect("store");
        let session = SessionManager::new(store.clone(), "default")
            .with_poll_interval(std::time::Duration::from_millis(10));
        let catalog = EndpointCatalog::load(store.clone(), "default").expect("catalog");

        Fixture {
            _temp: temp,
            store,
            session,
            catalog,
        }
    }

    fn complete_headers() -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        headers.insert(HEADER_AUTHORIZATION.to_string(), "Bearer t".to_string());
        headers.insert(HEADER_CSRF.to_string(), "csrf".to_string());
        headers.insert(HEADER_COOKIE.to_string(), "twid=u%3D1; ct0=csrf".to_string());
        headers
    }

    fn seed_credentials(store: &CredentialStore) {
        let credentials = SessionCredentials::from_headers(
            complete_headers(),
            chrono::Utc::now().to_rfc3339(),
        );
        store
            .save_credentials("default", &credentials)
            .expect("seed credentials");
    }

    struct FixedDiscovery(Option<String>, AtomicUsize);

    impl QueryIdDiscovery for &'static FixedDiscovery {
        fn discover(&self, _operation: &str) -> MagpieResult<Option<String>> {
            self.1.fetch_add(1, Ordering::SeqCst);
            Ok(self.0.clone())
        }
    }

    fn fixed_discovery(answer: Option<&str>) -> &'static FixedDiscovery {
        Box::leak(Box::new(FixedDiscovery(
            answer.map(str::to_string),
            AtomicUsize::new(0),
        )))
    }

    /// "Succeeds" by restoring a credential set that the server will still
    /// reject; used to prove the auth retry happens exactly once.
    struct RestoringDriver {
        store: CredentialStore,
        opens: AtomicUsize,
    }

    impl ReauthDriver for RestoringDriver {
        fn open(&self) -> MagpieResult<()> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let credentials = SessionCredentials::from_headers(
                complete_headers(),
                chrono::Utc::now().to_rfc3339(),
            );
            self.store.save_credentials("default", &credentials)
        }

        fn close(&self) {}
    }

    #[test]
    fn call_fails_fast_without_credentials() {
        let fixture = fixture();
        let server = MockServer::start();
        let client = GraphqlClient::new(&server.base_url()).expect("client");
        let discovery = fixed_discovery(Some("qid"));
        let resolver = EndpointResolver::new(fixture.store.clone(), "default", Box::new(discovery));
        let driver = magpie_session::NoopReauthDriver;

        let caller = ApiCaller {
            client: &client,
            session: &fixture.session,
            resolver: &resolver,
            catalog: &fixture.catalog,
            reauth_driver: &driver,
        };

        let error = caller
            .call(&CallSpec::get(OP_BOOKMARKS, json!({}), json!({})), None)
            .expect_err("should fail");
        assert_eq!(error.kind, ErrorKind::NoAuth);
    }

    #[test]
    fn call_fails_with_no_query_id_when_every_stage_misses() {
        let fixture = fixture();
        seed_credentials(&fixture.store);

        let server = MockServer::start();
        let client = GraphqlClient::new(&server.base_url()).expect("client");
        let discovery = fixed_discovery(None);
        let resolver = EndpointResolver::new(fixture.store.clone(), "default", Box::new(discovery));
        let driver = magpie_session::NoopReauthDriver;

        let caller = ApiCaller {
            client: &client,
            session: &fixture.session,
            resolver: &resolver,
            catalog: &fixture.catalog,
            reauth_driver: &driver,
        };

        let error = caller
            .call(&CallSpec::get(OP_BOOKMARKS, json!({}), json!({})), None)
            .expect_err("should fail");
        assert_eq!(error.kind, ErrorKind::NoQueryId);
    }

    #[test]
    fn repeated_unauthorized_terminates_after_exactly_one_reauth() {
        let fixture = fixture();
        seed_credentials(&fixture.store);

        let server = MockServer::start();
        let unauthorized = server.mock(|when, then| {
            when.method(GET).path("/i/api/graphql/qid/Bookmarks");
            then.status(401).body("nope");
        });

        let client = GraphqlClient::new(&server.base_url()).expect("client");
        let discovery = fixed_discovery(None);
        let resolver = EndpointResolver::new(fixture.store.clone(), "default", Box::new(discovery));
        fixture
            .store
            .save_query_id("default", OP_BOOKMARKS, "qid")
            .expect("seed query id");

        let driver = RestoringDriver {
            store: fixture.store.clone(),
            opens: AtomicUsize::new(0),
        };

        let caller = ApiCaller {
            client: &client,
            session: &fixture.session,
            resolver: &resolver,
            catalog: &fixture.catalog,
            reauth_driver: &driver,
        };

        let error = caller
            .call(&CallSpec::get(OP_BOOKMARKS, json!({}), json!({})), None)
            .expect_err("should fail");

        assert_eq!(error.kind, ErrorKind::AuthExpired);
        assert_eq!(driver.opens.load(Ordering::SeqCst), 1);
        unauthorized.assert_hits(2);
    }

    #[test]
    fn stale_query_id_payload_triggers_one_rediscovery() {
        let fixture = fixture();
        seed_credentials(&fixture.store);

        let server = MockServer::start();
        let stale = server.mock(|when, then| {
            when.method(GET).path("/i/api/graphql/stale-qid/Bookmarks");
            then.status(200)
                .json_body(json!({"errors": [{"code": 404, "message": "query id not found"}]}));
        });
        let fresh = server.mock(|when, then| {
            when.method(GET).path("/i/api/graphql/fresh-qid/Bookmarks");
            then.status(200).json_body(json!({"data": {"ok": true}}));
        });

        let client = GraphqlClient::new(&server.base_url()).expect("client");
        let discovery = fixed_discovery(Some("fresh-qid"));
        let resolver = EndpointResolver::new(fixture.store.clone(), "default", Box::new(discovery));
        fixture
            .store
            .save_query_id("default", OP_BOOKMARKS, "stale-qid")
            .expect("seed stale query id");

        let driver = magpie_session::NoopReauthDriver;
        let caller = ApiCaller {
            client: &client,
            session: &fixture.session,
            resolver: &resolver,
            catalog: &fixture.catalog,
            reauth_driver: &driver,
        };

        let payload = caller
            .call(&CallSpec::get(OP_BOOKMARKS, json!({}), json!({})), None)
            .expect("payload");

        assert_eq!(payload["data"]["ok"], true);
        assert_eq!(discovery.1.load(Ordering::SeqCst), 1);
        stale.assert_hits(1);
        fresh.assert_hits(1);
    }

    #[test]
    fn persistent_stale_signal_returns_the_payload_unchanged() {
        let fixture = fixture();
        seed_credentials(&fixture.store);

        let server = MockServer::start();
        let always_stale = server.mock(|when, then| {
            when.method(GET)
                .path_matches(httpmock::prelude::Regex::new("/i/api/graphql/.*/Bookmarks").expect("regex"));
            then.status(200)
                .json_body(json!({"errors": [{"code": 404, "message": "query id not found"}]}));
        });

        let client = GraphqlClient::new(&server.base_url()).expect("client");
        let discovery = fixed_discovery(Some("next-qid"));
        let resolver = EndpointResolver::new(fixture.store.clone(), "default", Box::new(discovery));
        fixture
            .store
            .save_query_id("default", OP_BOOKMARKS, "first-qid")
            .expect("seed query id");

        let driver = magpie_session::NoopReauthDriver;
        let caller = ApiCaller {
            client: &client,
            session: &fixture.session,
            resolver: &resolver,
            catalog: &fixture.catalog,
            reauth_driver: &driver,
        };

        let payload = caller
            .call(&CallSpec::get(OP_BOOKMARKS, json!({}), json!({})), None)
            .expect("payload returned as-is");

        assert!(has_stale_query_id_error(&payload));
        assert_eq!(discovery.1.load(Ordering::SeqCst), 1);
        always_stale.assert_hits(2);
    }

    #[test]
    fn queued_calls_resolve_through_the_fetch_queue() {
        let fixture = fixture();
        seed_credentials(&fixture.store);

        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/i/api/graphql/qid/Bookmarks");
            then.status(200).json_body(json!({"data": {"ok": true}}));
        });

        let client = GraphqlClient::new(&server.base_url()).expect("client");
        let discovery = fixed_discovery(None);
        let resolver = EndpointResolver::new(fixture.store.clone(), "default", Box::new(discovery));
        fixture
            .store
            .save_query_id("default", OP_BOOKMARKS, "qid")
            .expect("seed query id");

        let queue = FetchQueue::with_pacing(crate::queue::Pacing {
            base: std::time::Duration::from_millis(5),
            jitter: std::time::Duration::ZERO,
            long_pause_odds: 0,
            long_pause_min: std::time::Duration::ZERO,
            long_pause_max: std::time::Duration::ZERO,
        });

        let driver = magpie_session::NoopReauthDriver;
        let caller = ApiCaller {
            client: &client,
            session: &fixture.session,
            resolver: &resolver,
            catalog: &fixture.catalog,
            reauth_driver: &driver,
        };

        let payload = caller
            .call(&CallSpec::get(OP_BOOKMARKS, json!({}), json!({})), Some(&queue))
            .expect("payload");
        assert_eq!(payload["data"]["ok"], true);
    }
}
