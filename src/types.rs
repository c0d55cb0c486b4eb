use std::time::Duration;

use serde::Serialize;

/// How long a login is trusted before the session logs in again.
pub const DEFAULT_AUTH_TTL: Duration = Duration::from_secs(2 * 60 * 60);

/// How long a refreshed device snapshot is served without going back upstream.
pub const DEFAULT_UPDATE_TTL: Duration = Duration::from_secs(2);

/// Which generation of the mymodlet.com contract to talk to.
///
/// Selects the endpoints and the command encoding. Status payloads are
/// recognised by shape regardless of this setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApiFormat {
    /// HTML fragments quoted inside a JSON string (`mymodlet.com/SmartAC`).
    #[default]
    Legacy,
    /// JSON documents encoded inside a JSON string (`web.mymodlet.com/Devices`).
    Modern,
}

/// One SmartAC unit as last reported by upstream.
///
/// Temperatures are whole degrees in the unit upstream reports (Fahrenheit
/// for every account seen so far).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub current_temperature: i32,
    pub target_temperature: i32,
    pub power_on: bool,
    /// The modlet bridge is not reachable from the cloud service.
    pub device_offline: bool,
    /// The thermostat sensor is not attached to its modlet.
    pub sensor_offline: bool,
    /// Upstream refuses reads and writes for this unit.
    pub unavailable: bool,
}

impl Device {
    pub fn is_reachable(&self) -> bool {
        !(self.device_offline || self.sensor_offline || self.unavailable)
    }
}

/// Desired state for a push. Fields left as `None` are not sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DesiredState {
    pub target_temperature: Option<i32>,
    pub power_on: Option<bool>,
}

impl DesiredState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn target_temperature(mut self, temp: i32) -> Self {
        self.target_temperature = Some(temp);
        self
    }

    pub fn power_on(mut self, on: bool) -> Self {
        self.power_on = Some(on);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.target_temperature.is_none() && self.power_on.is_none()
    }
}

/// Events emitted when a refresh changes a cached record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    DeviceDiscovered { id: String, name: String },
    NameChanged { id: String, name: String },
    CurrentTemperatureChanged { id: String, name: String, temp: i32 },
    TargetTemperatureChanged { id: String, name: String, temp: i32 },
    PowerChanged { id: String, name: String, on: bool },
    ConnectivityChanged {
        id: String,
        name: String,
        device_offline: bool,
        sensor_offline: bool,
        unavailable: bool,
    },
}
