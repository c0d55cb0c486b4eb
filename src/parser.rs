//! Status payload decoding.
//!
//! mymodlet.com has served two unrelated shapes from its status endpoints:
//! a quoted HTML fragment scraped by element id and class, and a JSON
//! document (encoded inside a JSON string) that lists modlet bridges and
//! thermostats separately and links them by serial number. Both are reduced
//! to the same [`Device`] records here. One broken entry never costs the
//! rest of the batch.

use std::collections::HashMap;

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{trace, warn};

use crate::protocol::decode_nested;
use crate::types::Device;
use crate::{Error, Result};

/// A decoded status response, tagged by the shape upstream used.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    LegacyHtml(String),
    ModernJson(Value),
}

impl Payload {
    /// Decode a raw status body and work out which shape it is.
    pub fn detect(body: &str) -> Result<Self> {
        match decode_nested(body)? {
            Value::String(html) => Ok(Payload::LegacyHtml(html)),
            value @ Value::Object(_) => Ok(Payload::ModernJson(value)),
            other => Err(Error::Protocol(format!(
                "status payload is neither HTML nor an object: {}",
                kind(&other)
            ))),
        }
    }

    pub fn parse(&self) -> Result<Vec<Device>> {
        match self {
            Payload::LegacyHtml(html) => parse_legacy_html(html),
            Payload::ModernJson(doc) => parse_modern_json(doc),
        }
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

struct LegacySelectors {
    app_name: Selector,
    set_temp: Selector,
    selected_option: Selector,
    current_temp: Selector,
    power_off_action: Selector,
}

impl LegacySelectors {
    fn new() -> Result<Self> {
        Ok(Self {
            app_name: selector("#appName")?,
            set_temp: selector(".drSetTemp")?,
            selected_option: selector("option[selected]")?,
            current_temp: selector("#currentTemperature")?,
            power_off_action: selector("#deviceAction > a.Off")?,
        })
    }
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| Error::Protocol(format!("bad selector {css}: {e:?}")))
}

/// Scrape devices from the settings table fragment.
///
/// Each unit is an `#appName` block holding a `.drSetTemp` control whose id
/// is the appliance id. Its siblings (reached through the block's parent)
/// hold the setpoint dropdown, the current reading, and the on/off action;
/// an action link labelled `Off` means the unit is currently on.
fn parse_legacy_html(html: &str) -> Result<Vec<Device>> {
    let sel = LegacySelectors::new()?;
    let doc = Html::parse_fragment(html);
    let mut devices = Vec::new();

    for block in doc.select(&sel.app_name) {
        let Some(control) = block.select(&sel.set_temp).next() else {
            continue;
        };
        let id = control.value().attr("id").map(str::trim);
        let Some(id) = id.filter(|s| !s.is_empty()) else {
            warn!("legacy payload: setpoint control without id, skipping");
            continue;
        };
        match legacy_device(&sel, block, id) {
            Some(device) => devices.push(device),
            None => warn!(id, "legacy payload: incomplete device entry, skipping"),
        }
    }

    trace!(count = devices.len(), "parsed legacy payload");
    Ok(devices)
}

fn legacy_device(sel: &LegacySelectors, block: ElementRef<'_>, id: &str) -> Option<Device> {
    let name = block
        .children()
        .find_map(ElementRef::wrap)
        .map(collect_text)
        .unwrap_or_default();
    let row = block.parent().and_then(ElementRef::wrap)?;

    let option = row.select(&sel.selected_option).next()?;
    let target_temperature = match option.value().attr("value") {
        Some(v) => leading_int(v),
        None => leading_int(&collect_text(option)),
    }?;
    let current_temperature = row
        .select(&sel.current_temp)
        .next()
        .and_then(|e| leading_int(&collect_text(e)))?;
    let power_on = row.select(&sel.power_off_action).next().is_some();

    Some(Device {
        id: id.to_string(),
        name,
        current_temperature,
        target_temperature,
        power_on,
        device_offline: false,
        sensor_offline: false,
        unavailable: false,
    })
}

fn collect_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Integer prefix of `s` after leading whitespace, so `"72°F"` reads as 72.
fn leading_int(s: &str) -> Option<i32> {
    let s = s.trim_start();
    let end = s
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && (c == '-' || c == '+'))))
        .map_or(s.len(), |(i, _)| i);
    s[..end].parse().ok()
}

// Only the id and temperatures are mandatory. Names and flags of the wrong
// type read as absent so they cannot cost the whole entry.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModletEntry {
    appliance_id: Option<Value>,
    #[serde(default, deserialize_with = "lenient_string")]
    appliance_name: Option<String>,
    serial_number: Option<Value>,
    #[serde(default, deserialize_with = "lenient_bool")]
    is_online: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThermostatEntry {
    serial_number: Option<Value>,
    current_temperature: Option<Value>,
    target_temperature: Option<Value>,
    #[serde(default, deserialize_with = "lenient_bool")]
    is_on: Option<bool>,
    #[serde(default, deserialize_with = "lenient_bool")]
    is_thermostat_attached: Option<bool>,
    #[serde(default, deserialize_with = "lenient_bool")]
    is_reachable: Option<bool>,
}

fn lenient_bool<'de, D>(deserializer: D) -> std::result::Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Value::deserialize(deserializer)?.as_bool())
}

fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Value::deserialize(deserializer)?
        .as_str()
        .map(str::to_string))
}

fn parse_modern_json(doc: &Value) -> Result<Vec<Device>> {
    let modlets = list(doc, "modlets")?;
    let thermostats = list(doc, "devices")?;

    let mut by_serial = HashMap::new();
    for raw in thermostats {
        let entry: ThermostatEntry = match serde_json::from_value(raw.clone()) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "modern payload: malformed thermostat entry, skipping");
                continue;
            }
        };
        match entry.serial_number.as_ref().and_then(key_string) {
            Some(serial) => {
                by_serial.insert(serial, entry);
            }
            None => warn!("modern payload: thermostat without serial number, skipping"),
        }
    }

    let mut devices = Vec::new();
    for raw in modlets {
        let modlet: ModletEntry = match serde_json::from_value(raw.clone()) {
            Ok(modlet) => modlet,
            Err(e) => {
                warn!(error = %e, "modern payload: malformed modlet entry, skipping");
                continue;
            }
        };
        let Some(id) = modlet.appliance_id.as_ref().and_then(key_string) else {
            warn!("modern payload: modlet without appliance id, skipping");
            continue;
        };
        let Some(thermostat) = modlet
            .serial_number
            .as_ref()
            .and_then(key_string)
            .and_then(|serial| by_serial.get(&serial))
        else {
            warn!(%id, "modern payload: modlet has no matching thermostat, skipping");
            continue;
        };
        match modern_device(id.clone(), &modlet, thermostat) {
            Some(device) => devices.push(device),
            None => warn!(%id, "modern payload: thermostat missing temperatures, skipping"),
        }
    }

    trace!(count = devices.len(), "parsed modern payload");
    Ok(devices)
}

fn list<'a>(doc: &'a Value, field: &str) -> Result<&'a Vec<Value>> {
    doc.get(field)
        .and_then(Value::as_array)
        .ok_or_else(|| Error::Protocol(format!("status payload has no {field} list")))
}

fn modern_device(
    id: String,
    modlet: &ModletEntry,
    thermostat: &ThermostatEntry,
) -> Option<Device> {
    let current_temperature = thermostat.current_temperature.as_ref().and_then(int_value)?;
    let target_temperature = thermostat.target_temperature.as_ref().and_then(int_value)?;
    let name = modlet
        .appliance_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(id.as_str())
        .to_string();

    Some(Device {
        name,
        current_temperature,
        target_temperature,
        power_on: thermostat.is_on.unwrap_or(false),
        device_offline: !modlet.is_online.unwrap_or(true),
        sensor_offline: !thermostat.is_thermostat_attached.unwrap_or(true),
        unavailable: !thermostat.is_reachable.unwrap_or(true),
        id,
    })
}

/// Identifiers arrive as strings or bare numbers depending on the endpoint.
fn key_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn int_value(value: &Value) -> Option<i32> {
    match value {
        Value::Number(n) => match n.as_i64() {
            Some(i) => i32::try_from(i).ok(),
            None => n.as_f64().map(|f| f.round() as i32),
        },
        Value::String(s) => leading_int(s),
        _ => None,
    }
}
