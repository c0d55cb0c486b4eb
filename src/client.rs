use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, trace};

use crate::cache::DeviceCache;
use crate::diff::device_events;
use crate::lock::OwnershipLock;
use crate::logger::{Journal, LogSink, MessageLogMode, MessageLogger};
use crate::parser::Payload;
use crate::protocol::{decode_nested, interpret_ack, settings_body, settings_command};
use crate::session::{Credentials, Session};
use crate::types::*;
use crate::{Error, Result};

type EventCallback = Box<dyn Fn(&Event) + Send + Sync>;
type SnapshotCallback = Box<dyn Fn(&[Device]) + Send + Sync>;

pub struct SmartAcClientBuilder {
    username: String,
    password: String,
    format: ApiFormat,
    base_url: Option<String>,
    auth_ttl: Duration,
    update_ttl: Duration,
    request_timeout: Option<Duration>,
    log_sink: Option<LogSink>,
    event_callbacks: Vec<EventCallback>,
    snapshot_callbacks: Vec<SnapshotCallback>,
    log_mode: Option<MessageLogMode>,
    log_path: Option<String>,
}

impl SmartAcClientBuilder {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            format: ApiFormat::default(),
            base_url: None,
            auth_ttl: DEFAULT_AUTH_TTL,
            update_ttl: DEFAULT_UPDATE_TTL,
            request_timeout: None,
            log_sink: None,
            event_callbacks: Vec::new(),
            snapshot_callbacks: Vec::new(),
            log_mode: None,
            log_path: None,
        }
    }

    pub fn api_format(mut self, format: ApiFormat) -> Self {
        self.format = format;
        self
    }

    /// Override the upstream host, e.g. `http://127.0.0.1:8080`.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn auth_ttl(mut self, ttl: Duration) -> Self {
        self.auth_ttl = ttl;
        self
    }

    pub fn update_ttl(mut self, ttl: Duration) -> Self {
        self.update_ttl = ttl;
        self
    }

    /// Bound every upstream request. Unset by default: a hung connection
    /// then stalls refreshes until the OS gives up on it.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Receive `(subject, message)` pairs describing client activity.
    pub fn on_log(mut self, f: impl Fn(&str, &str) + Send + Sync + 'static) -> Self {
        self.log_sink = Some(Box::new(f));
        self
    }

    pub fn on_event(mut self, f: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        self.event_callbacks.push(Box::new(f));
        self
    }

    pub fn on_snapshot(mut self, f: impl Fn(&[Device]) + Send + Sync + 'static) -> Self {
        self.snapshot_callbacks.push(Box::new(f));
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<String>) -> Self {
        self.log_mode = Some(mode);
        self.log_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<SmartAcClient> {
        let credentials = Credentials::new(self.username, self.password)?;

        let traffic = match (self.log_mode, self.log_path) {
            (Some(mode), Some(path)) => Some(MessageLogger::new(mode, &path)?),
            _ => None,
        };
        let journal = Arc::new(Journal::new(self.log_sink, traffic));

        let base_url = self
            .base_url
            .unwrap_or_else(|| self.format.default_base_url().to_string());
        let session = Session::new(
            base_url,
            credentials,
            self.auth_ttl,
            self.request_timeout,
            journal.clone(),
        )?;

        Ok(SmartAcClient {
            session,
            format: self.format,
            update_ttl: self.update_ttl,
            state: OwnershipLock::new(RefreshState::default()),
            journal,
            event_callbacks: self.event_callbacks,
            snapshot_callbacks: self.snapshot_callbacks,
        })
    }
}

#[derive(Default)]
struct RefreshState {
    cache: DeviceCache,
    last_updated: Option<Instant>,
}

impl RefreshState {
    fn is_fresh(&self, now: Instant, ttl: Duration) -> bool {
        self.last_updated
            .is_some_and(|at| now.saturating_duration_since(at) <= ttl)
    }
}

/// Client for one mymodlet.com account.
///
/// Refreshes are serialized: callers arriving while one is in flight wait
/// for it and are handed its result rather than hitting upstream again, and
/// nothing is fetched while the last refresh is younger than the update TTL.
/// Pushes bypass all of that and go straight upstream.
pub struct SmartAcClient {
    session: Session,
    format: ApiFormat,
    update_ttl: Duration,
    state: OwnershipLock<RefreshState>,
    journal: Arc<Journal>,
    event_callbacks: Vec<EventCallback>,
    snapshot_callbacks: Vec<SnapshotCallback>,
}

impl SmartAcClient {
    pub fn builder(
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> SmartAcClientBuilder {
        SmartAcClientBuilder::new(username, password)
    }

    /// Every known device, refreshed from upstream first if the cache is stale.
    pub async fn refresh(&self) -> Result<Vec<Device>> {
        let mut state = self.state.acquire().await;
        if state.is_fresh(Instant::now(), self.update_ttl) {
            trace!("refresh: cache is fresh");
            return Ok(state.cache.snapshot());
        }

        self.journal.note("api", "updating thermostat status...");
        self.session.ensure_authenticated().await?;
        let devices = self.fetch_status().await?;
        self.commit(&mut state, devices);
        Ok(state.cache.snapshot())
    }

    /// The cached record for `id`, without touching upstream.
    pub async fn device(&self, id: &str) -> Option<Device> {
        self.state.acquire().await.cache.get(id).cloned()
    }

    /// Send a desired state for one device and report whether upstream
    /// accepted it. The cache is left alone; the next refresh picks up the
    /// authoritative state.
    pub async fn push(&self, device_id: &str, desired: DesiredState) -> Result<bool> {
        if device_id.is_empty() {
            return Err(Error::InvalidCommand("device id is empty".into()));
        }
        if desired.is_empty() {
            return Err(Error::InvalidCommand(format!("nothing to change for {device_id}")));
        }

        self.session.ensure_authenticated().await?;
        self.journal.note(device_id, &describe(&desired));

        let command = settings_command(device_id, &desired);
        let path = self.format.settings_path();
        let body = settings_body(self.format, command.clone())?;
        self.journal.request("POST", path, Some(&body));

        let resp = self
            .session
            .http()
            .post(self.session.url(path))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let acknowledged = interpret_ack(&resp.text().await?)?;

        debug!(device = device_id, acknowledged, "pushed settings");
        self.journal.command(device_id, &command, Some(acknowledged));
        Ok(acknowledged)
    }

    /// Change only the setpoint. The body carries no power field, and
    /// upstream may apply its own default to it; use [`push`](Self::push)
    /// with both fields set to keep the power state pinned.
    pub async fn set_target_temperature(&self, device_id: &str, temp: i32) -> Result<bool> {
        self.push(device_id, DesiredState::new().target_temperature(temp))
            .await
    }

    /// Change only the power state. The setpoint is omitted from the body, so
    /// upstream may fall back to its own default; pass a full [`DesiredState`]
    /// to [`push`](Self::push) to set both at once.
    pub async fn set_power(&self, device_id: &str, on: bool) -> Result<bool> {
        self.push(device_id, DesiredState::new().power_on(on)).await
    }

    async fn fetch_status(&self) -> Result<Vec<Device>> {
        let path = self.format.status_path();
        let url = self.session.url(path);
        debug!(url = %url, "fetching device status");

        let request = match self.format {
            ApiFormat::Legacy => {
                self.journal.request("POST", path, None);
                self.session.http().post(&url)
            }
            ApiFormat::Modern => {
                self.journal.request("GET", path, None);
                self.session.http().get(&url)
            }
        };
        let resp = request.send().await?.error_for_status()?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;

        if self.journal.logs_traffic() {
            self.journal
                .status(status, &decode_nested(&body).unwrap_or(Value::Null));
        }

        Payload::detect(&body)?.parse()
    }

    fn commit(&self, state: &mut RefreshState, devices: Vec<Device>) {
        let mut events = Vec::new();
        for device in devices {
            events.extend(device_events(state.cache.get(&device.id), &device));
            state.cache.upsert(device);
        }
        state.last_updated = Some(Instant::now());
        debug!(
            devices = state.cache.len(),
            events = events.len(),
            "refresh committed"
        );

        for event in &events {
            for cb in &self.event_callbacks {
                cb(event);
            }
        }
        if !self.snapshot_callbacks.is_empty() {
            let snapshot = state.cache.snapshot();
            for cb in &self.snapshot_callbacks {
                cb(&snapshot);
            }
        }
    }
}

fn describe(desired: &DesiredState) -> String {
    let mut parts = Vec::new();
    if let Some(temp) = desired.target_temperature {
        parts.push(format!("target temp {temp}"));
    }
    if let Some(on) = desired.power_on {
        parts.push(format!("power {}", if on { "on" } else { "off" }));
    }
    format!("set {}", parts.join(", "))
}
