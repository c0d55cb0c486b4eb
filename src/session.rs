use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use reqwest::cookie::Jar;
use reqwest::redirect::Policy;
use tracing::{debug, warn};

use crate::logger::Journal;
use crate::protocol::{login_form, LOGIN_PATH};
use crate::{Error, Result};

pub(crate) struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: String, password: String) -> Result<Self> {
        if username.is_empty() {
            return Err(Error::InvalidCredentials("username is empty"));
        }
        if password.is_empty() {
            return Err(Error::InvalidCredentials("password is empty"));
        }
        Ok(Self { username, password })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Cookie-authenticated session against mymodlet.com.
///
/// The site answers a login with a redirect and a cookie and gives no other
/// indication of success, so a login is considered done once any response
/// arrives. Bad credentials show up later as failing data requests.
pub(crate) struct Session {
    http: reqwest::Client,
    login_http: reqwest::Client,
    base_url: String,
    credentials: Credentials,
    auth_ttl: Duration,
    last_login: Mutex<Option<Instant>>,
    journal: Arc<Journal>,
}

impl Session {
    pub fn new(
        base_url: String,
        credentials: Credentials,
        auth_ttl: Duration,
        request_timeout: Option<Duration>,
        journal: Arc<Journal>,
    ) -> Result<Self> {
        let jar = Arc::new(Jar::default());
        let mut http = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .gzip(true);
        // Login must not chase its redirect; the cookie is on the 302 itself.
        let mut login_http = reqwest::Client::builder()
            .cookie_provider(jar)
            .gzip(true)
            .redirect(Policy::none());
        if let Some(timeout) = request_timeout {
            http = http.timeout(timeout);
            login_http = login_http.timeout(timeout);
        }

        Ok(Self {
            http: http.build()?,
            login_http: login_http.build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            auth_ttl,
            last_login: Mutex::new(None),
            journal,
        })
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Log in unless the last login is younger than the auth TTL.
    pub async fn ensure_authenticated(&self) -> Result<()> {
        if !login_due(self.last_login(), Instant::now(), self.auth_ttl) {
            return Ok(());
        }

        self.journal.note("api", "logging in...");
        let url = self.url(LOGIN_PATH);
        debug!(url = %url, user = %self.credentials.username, "logging in to mymodlet");
        self.journal.request("POST", LOGIN_PATH, None);

        let form = login_form(&self.credentials.username, &self.credentials.password);
        let resp = self.login_http.post(&url).form(&form).send().await?;

        let status = resp.status();
        if !(status.is_success() || status.is_redirection()) {
            warn!(status = status.as_u16(), "login answered with an error status");
        }
        self.set_last_login(Instant::now());
        Ok(())
    }

    fn last_login(&self) -> Option<Instant> {
        *self.last_login.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_last_login(&self, at: Instant) {
        *self.last_login.lock().unwrap_or_else(|e| e.into_inner()) = Some(at);
    }
}

fn login_due(last_login: Option<Instant>, now: Instant, ttl: Duration) -> bool {
    match last_login {
        None => true,
        Some(at) => now.saturating_duration_since(at) > ttl,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_logged_in_is_due() {
        assert!(login_due(None, Instant::now(), Duration::from_secs(7200)));
    }

    #[test]
    fn login_due_only_after_ttl() {
        let ttl = Duration::from_secs(7200);
        let at = Instant::now();
        assert!(!login_due(Some(at), at, ttl));
        assert!(!login_due(Some(at), at + ttl, ttl));
        assert!(login_due(Some(at), at + ttl + Duration::from_millis(1), ttl));
    }

    #[test]
    fn credentials_must_be_non_empty() {
        assert!(matches!(
            Credentials::new(String::new(), "pw".into()),
            Err(Error::InvalidCredentials(_))
        ));
        assert!(matches!(
            Credentials::new("me".into(), String::new()),
            Err(Error::InvalidCredentials(_))
        ));
        assert!(Credentials::new("me".into(), "pw".into()).is_ok());
    }

    #[test]
    fn debug_hides_password() {
        let creds = Credentials::new("me".into(), "hunter2".into()).unwrap();
        let shown = format!("{creds:?}");
        assert!(shown.contains("me"));
        assert!(!shown.contains("hunter2"));
    }

    #[tokio::test]
    async fn base_url_trailing_slash_is_dropped() {
        let session = Session::new(
            "http://127.0.0.1:1/".into(),
            Credentials::new("me".into(), "pw".into()).unwrap(),
            Duration::from_secs(1),
            None,
            Arc::new(Journal::new(None, None)),
        )
        .unwrap();
        assert_eq!(session.url(LOGIN_PATH), "http://127.0.0.1:1/Account/Login");
    }

    #[tokio::test]
    async fn unreachable_login_leaves_session_unauthenticated() {
        let session = Session::new(
            "http://127.0.0.1:1".into(),
            Credentials::new("me".into(), "pw".into()).unwrap(),
            Duration::from_secs(7200),
            Some(Duration::from_secs(5)),
            Arc::new(Journal::new(None, None)),
        )
        .unwrap();

        let err = session.ensure_authenticated().await.unwrap_err();
        assert!(matches!(err, Error::Http(_)));
        assert!(session.last_login().is_none());
        assert!(session.ensure_authenticated().await.is_err());
        assert!(session.last_login().is_none());
    }
}
