use chrono::Utc;
use magpie_api::{HEADER_COOKIE, SESSION_COOKIE_NAME, SessionCredentials};
use magpie_core::{MagpieError, MagpieResult};
use magpie_store::CredentialStore;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const REAUTH_TIMEOUT: Duration = Duration::from_secs(15);
const REAUTH_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Stand-in for the hidden authenticated tab: `open` kicks off whatever side
/// effect makes the host emit an authenticated request, `close` tears it down.
pub trait ReauthDriver: Send + Sync {
    fn open(&self) -> MagpieResult<()>;
    fn close(&self);
}

pub struct SessionManager {
    store: CredentialStore,
    profile: String,
    reauth_in_flight: AtomicBool,
    reauth_timeout: Duration,
    poll_interval: Duration,
}

impl SessionManager {
    pub fn new(store: CredentialStore, profile: impl Into<String>) -> Self {
        Self {
            store,
            profile: profile.into(),
            reauth_in_flight: AtomicBool::new(false),
            reauth_timeout: REAUTH_TIMEOUT,
            poll_interval: REAUTH_POLL_INTERVAL,
        }
    }

    pub fn with_reauth_timeout(mut self, timeout: Duration) -> Self {
        self.reauth_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn credentials(&self) -> MagpieResult<Option<SessionCredentials>> {
        self.store.load_credentials(&self.profile)
    }

    pub fn has_valid_session(&self) -> bool {
        matches!(self.credentials(), Ok(Some(credentials)) if credentials.is_complete())
    }

    /// A read failure here means "unknown", not "logged out": stored
    /// credentials are left untouched and the caller sees `None`.
    pub fn current_user_id(&self) -> Option<String> {
        let credentials = match self.credentials() {
            Ok(Some(credentials)) => credentials,
            Ok(None) => return None,
            Err(err) => {
                debug!(error = %err.message, "credential read failed; treating identity as unknown");
                return None;
            }
        };

        credentials
            .header(HEADER_COOKIE)
            .and_then(user_id_from_cookie_header)
    }

    /// Commits a fresh credential set only when the bearer token, session
    /// cookie, and anti-forgery token all appear in one observed request.
    pub fn capture_from_observed_headers(
        &self,
        headers: &BTreeMap<String, String>,
    ) -> MagpieResult<bool> {
        let candidate =
            SessionCredentials::from_headers(headers.clone(), Utc::now().to_rfc3339());
        if !candidate.is_complete() {
            return Ok(false);
        }

        self.store.save_credentials(&self.profile, &candidate)?;
        debug!(profile = %self.profile, "captured credential set from observed headers");
        Ok(true)
    }

    /// Clears stored credentials after an explicit rejection from the server.
    /// Transient failures must never route through here.
    pub fn clear_credentials(&self) -> MagpieResult<()> {
        self.store.clear_credentials(&self.profile)
    }

    /// Re-establishes a session without prompting the user: the driver opens
    /// a hidden authenticated surface, and success is a credential set whose
    /// capture time postdates the attempt. At most one attempt runs at a
    /// time; a concurrent caller gets `false` without a second driver open.
    pub fn silent_reauth(&self, driver: &dyn ReauthDriver) -> MagpieResult<bool> {
        if self
            .reauth_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("silent reauth already in flight; piggybacking on failure result");
            return Ok(false);
        }

        let started_at = Utc::now().to_rfc3339();
        let result = self.wait_for_fresh_capture(driver, &started_at);
        driver.close();
        self.reauth_in_flight.store(false, Ordering::SeqCst);
        result
    }

    fn wait_for_fresh_capture(
        &self,
        driver: &dyn ReauthDriver,
        started_at: &str,
    ) -> MagpieResult<bool> {
        if let Err(err) = driver.open() {
            warn!(error = %err.message, "reauth driver failed to open; reporting reauth failure");
            return Ok(false);
        }

        let deadline = Instant::now() + self.reauth_timeout;
        loop {
            match self.credentials() {
                Ok(Some(credentials))
                    if credentials.is_complete() && credentials.captured_at.as_str() > started_at =>
                {
                    return Ok(true);
                }
                Ok(_) => {}
                // Transient store reads fail without meaning the session is
                // gone; keep polling until the deadline decides.
                Err(err) => debug!(error = %err.message, "credential poll failed during reauth"),
            }

            if Instant::now() >= deadline {
                warn!(profile = %self.profile, "silent reauth timed out waiting for captured headers");
                return Ok(false);
            }

            thread::sleep(self.poll_interval);
        }
    }
}

fn raw_cookie_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"u%3D(\d+)").expect("raw session cookie regex"))
}

fn decoded_cookie_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"u=(\d+)").expect("decoded session cookie regex"))
}

fn numeric_cookie_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)$").expect("numeric session cookie regex"))
}

/// The session cookie value shows up raw (`u%3D123`), URL-decoded (`u=123`),
/// or as a bare number depending on where it was read; each form is tried in
/// turn and the first match wins.
pub fn user_id_from_cookie_value(value: &str) -> Option<String> {
    let trimmed = value.trim().trim_matches('"');

    for pattern in [
        raw_cookie_pattern(),
        decoded_cookie_pattern(),
        numeric_cookie_pattern(),
    ] {
        if let Some(capture) = pattern.captures(trimmed) {
            return Some(capture[1].to_string());
        }
    }

    None
}

pub fn user_id_from_cookie_header(header: &str) -> Option<String> {
    for segment in header.split(';') {
        let Some((name, value)) = segment.split_once('=') else {
            continue;
        };

        if name.trim() == SESSION_COOKIE_NAME {
            return user_id_from_cookie_value(value);
        }
    }

    None
}

/// Driver for contexts with nothing to open; reauth always fails.
pub struct NoopReauthDriver;

impl ReauthDriver for NoopReauthDriver {
    fn open(&self) -> MagpieResult<()> {
        Err(MagpieError::no_auth(
            "no reauth command configured; set `reauth_command` in the profile or run `magpie auth capture`",
        ))
    }

    fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use magpie_api::{HEADER_AUTHORIZATION, HEADER_CSRF};
    use magpie_fs::init_workspace;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    fn fixture_store() -> (tempfile::TempDir, CredentialStore) {
        let temp = tempfile::tempdir().expect("tempdir");
        let init = init_workspace(Some(&temp.path().join("workspace")), None).expect("init");
        let store = CredentialStore::from_workspace(&init.paths).expect("store");
        (temp, store)
    }

    fn complete_headers() -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        headers.insert(HEADER_AUTHORIZATION.to_string(), "Bearer t".to_string());
        headers.insert(HEADER_CSRF.to_string(), "csrf".to_string());
        headers.insert(
            HEADER_COOKIE.to_string(),
            "guest_id=abc; twid=\"u%3D7788990011\"; ct0=csrf".to_string(),
        );
        headers
    }

    struct CapturingDriver {
        store: CredentialStore,
        profile: String,
        opens: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
    }

    impl ReauthDriver for CapturingDriver {
        fn open(&self) -> MagpieResult<()> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let credentials =
                SessionCredentials::from_headers(complete_headers(), Utc::now().to_rfc3339());
            self.store.save_credentials(&self.profile, &credentials)
        }

        fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct StallingDriver {
        closes: Arc<AtomicUsize>,
    }

    impl ReauthDriver for StallingDriver {
        fn open(&self) -> MagpieResult<()> {
            Ok(())
        }

        fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn cookie_value_forms_parse_in_order() {
        assert_eq!(user_id_from_cookie_value("u%3D123456").as_deref(), Some("123456"));
        assert_eq!(user_id_from_cookie_value("u=987").as_deref(), Some("987"));
        assert_eq!(user_id_from_cookie_value("555").as_deref(), Some("555"));
        assert_eq!(
            user_id_from_cookie_value("\"u%3D42\"").as_deref(),
            Some("42")
        );
        assert!(user_id_from_cookie_value("logged-out").is_none());
        assert!(user_id_from_cookie_value("").is_none());
    }

    #[test]
    fn cookie_header_finds_the_session_cookie() {
        let header = "guest_id=v1; twid=u%3D31337; ct0=abc";
        assert_eq!(user_id_from_cookie_header(header).as_deref(), Some("31337"));
        assert!(user_id_from_cookie_header("guest_id=v1; ct0=abc").is_none());
    }

    #[test]
    fn capture_ignores_partial_header_sets() {
        let (_temp, store) = fixture_store();
        let manager = SessionManager::new(store, "default");

        let mut partial = complete_headers();
        partial.remove(HEADER_CSRF);
        assert!(!manager.capture_from_observed_headers(&partial).expect("capture"));
        assert!(!manager.has_valid_session());

        assert!(manager
            .capture_from_observed_headers(&complete_headers())
            .expect("capture"));
        assert!(manager.has_valid_session());
        assert_eq!(manager.current_user_id().as_deref(), Some("7788990011"));
    }

    #[test]
    fn silent_reauth_succeeds_on_fresh_capture_and_closes_driver() {
        let (_temp, store) = fixture_store();
        let manager = SessionManager::new(store.clone(), "default")
            .with_poll_interval(Duration::from_millis(10));

        let opens = Arc::new(AtomicUsize::new(0));
        let closes = Arc::new(AtomicUsize::new(0));
        let driver = CapturingDriver {
            store,
            profile: "default".to_string(),
            opens: opens.clone(),
            closes: closes.clone(),
        };

        assert!(manager.silent_reauth(&driver).expect("reauth"));
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn silent_reauth_times_out_and_still_closes_driver() {
        let (_temp, store) = fixture_store();
        let manager = SessionManager::new(store, "default")
            .with_reauth_timeout(Duration::from_millis(50))
            .with_poll_interval(Duration::from_millis(10));

        let closes = Arc::new(AtomicUsize::new(0));
        let driver = StallingDriver {
            closes: closes.clone(),
        };

        assert!(!manager.silent_reauth(&driver).expect("reauth"));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_reauth_attempts_share_the_failure_result() {
        let (_temp, store) = fixture_store();
        let manager = Arc::new(
            SessionManager::new(store, "default")
                .with_reauth_timeout(Duration::from_millis(200))
                .with_poll_interval(Duration::from_millis(10)),
        );

        let closes = Arc::new(AtomicUsize::new(0));
        let driver = Arc::new(StallingDriver {
            closes: closes.clone(),
        });

        let background_manager = manager.clone();
        let background_driver = driver.clone();
        let background = thread::spawn(move || {
            background_manager
                .silent_reauth(background_driver.as_ref())
                .expect("reauth")
        });

        thread::sleep(Duration::from_millis(50));
        assert!(!manager.silent_reauth(driver.as_ref()).expect("second reauth"));

        assert!(!background.join().expect("join"));
        // Only the first attempt ran a driver lifecycle.
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
