use serde_json::{json, Map, Value};
use tracing::warn;

use crate::types::{ApiFormat, DesiredState};
use crate::{Error, Result};

pub const LEGACY_BASE_URL: &str = "https://mymodlet.com";
pub const MODERN_BASE_URL: &str = "https://web.mymodlet.com";

pub const LOGIN_PATH: &str = "/Account/Login";
const LOGIN_RETURN_URL: &str = "/smartac";

/// Upstream wraps payloads in at most two layers of JSON strings.
const MAX_ENCODING_DEPTH: usize = 2;

impl ApiFormat {
    pub(crate) fn default_base_url(&self) -> &'static str {
        match self {
            ApiFormat::Legacy => LEGACY_BASE_URL,
            ApiFormat::Modern => MODERN_BASE_URL,
        }
    }

    pub(crate) fn status_path(&self) -> &'static str {
        match self {
            ApiFormat::Legacy => "/SmartAC/UserSettingsTable",
            ApiFormat::Modern => "/Devices/UserData",
        }
    }

    pub(crate) fn settings_path(&self) -> &'static str {
        match self {
            ApiFormat::Legacy => "/SmartAC/UserSettings",
            ApiFormat::Modern => "/Devices/UserSettings",
        }
    }
}

pub fn login_form<'a>(username: &'a str, password: &'a str) -> [(&'static str, &'a str); 4] {
    [
        ("loginForm.Email", username),
        ("loginForm.Password", password),
        ("loginForm.RememberMe", "True"),
        ("ReturnUrl", LOGIN_RETURN_URL),
    ]
}

/// The settings command for one appliance. Temperatures travel as strings.
pub fn settings_command(device_id: &str, state: &DesiredState) -> Value {
    let mut cmd = Map::new();
    cmd.insert("applianceId".into(), json!(device_id));
    if let Some(temp) = state.target_temperature {
        cmd.insert("targetTemperature".into(), json!(temp.to_string()));
    }
    if let Some(on) = state.power_on {
        cmd.insert("thermostated".into(), json!(on));
    }
    Value::Object(cmd)
}

/// Wrap a settings command the way `format` expects it on the wire.
pub fn settings_body(format: ApiFormat, command: Value) -> Result<Value> {
    match format {
        ApiFormat::Legacy => Ok(command),
        ApiFormat::Modern => Ok(json!({ "data": serde_json::to_string(&command)? })),
    }
}

/// Decode a response body, unwrapping JSON strings that themselves hold JSON.
///
/// A string that does not look like an encoded object or array is returned
/// as-is, so quoted HTML survives as `Value::String`.
pub fn decode_nested(body: &str) -> Result<Value> {
    let mut value: Value = serde_json::from_str(body)?;
    for _ in 0..MAX_ENCODING_DEPTH {
        let inner = match &value {
            Value::String(s) if looks_encoded(s) => serde_json::from_str(s)?,
            _ => break,
        };
        value = inner;
    }
    Ok(value)
}

fn looks_encoded(s: &str) -> bool {
    matches!(s.trim_start().chars().next(), Some('{') | Some('['))
}

/// Interpret a settings acknowledgment as success or failure.
pub fn interpret_ack(body: &str) -> Result<bool> {
    let ack = decode_nested(body)?;

    if let Some(success) = ack.get("Success").and_then(Value::as_bool) {
        return Ok(success);
    }

    if let Some(result) = ack.get("result").filter(|r| r.is_object()) {
        let status_ok = result
            .get("status")
            .and_then(Value::as_str)
            .is_some_and(|s| s.eq_ignore_ascii_case("ok") || s.eq_ignore_ascii_case("success"));
        let error_free = match result.get("error") {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.is_empty(),
            Some(_) => false,
        };
        return Ok(status_ok && error_free);
    }

    if !ack.is_object() {
        return Err(Error::Protocol(format!("acknowledgment is not an object: {ack}")));
    }

    warn!(%ack, "unrecognised settings acknowledgment");
    Ok(false)
}
