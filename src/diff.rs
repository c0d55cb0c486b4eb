use serde_json::{Map, Value};

use crate::types::{Device, Event};

/// Collect `(path, old, new)` for every leaf that differs between two JSON
/// documents. Keys only present in `previous` are not reported.
pub(crate) fn diff_json(
    previous: &Value,
    current: &Value,
    path_prefix: &str,
    changes: &mut Vec<(String, Value, Value)>,
) {
    match (previous, current) {
        (Value::Object(prev_map), Value::Object(curr_map)) => {
            for (key, curr_val) in curr_map {
                let path = if path_prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{path_prefix}.{key}")
                };
                match prev_map.get(key) {
                    Some(prev_val) => diff_json(prev_val, curr_val, &path, changes),
                    None if curr_val.is_object() => {
                        diff_json(&Value::Object(Map::new()), curr_val, &path, changes);
                    }
                    None => changes.push((path, Value::Null, curr_val.clone())),
                }
            }
        }
        (prev, curr) if prev != curr => {
            changes.push((path_prefix.to_string(), prev.clone(), curr.clone()));
        }
        _ => {}
    }
}

/// Events describing how `current` differs from the record it replaces.
pub(crate) fn device_events(previous: Option<&Device>, current: &Device) -> Vec<Event> {
    let id = || current.id.clone();
    let name = || current.name.clone();

    let Some(prev) = previous else {
        return vec![Event::DeviceDiscovered {
            id: id(),
            name: name(),
        }];
    };

    let mut events = Vec::new();
    if prev.name != current.name {
        events.push(Event::NameChanged {
            id: id(),
            name: name(),
        });
    }
    if prev.current_temperature != current.current_temperature {
        events.push(Event::CurrentTemperatureChanged {
            id: id(),
            name: name(),
            temp: current.current_temperature,
        });
    }
    if prev.target_temperature != current.target_temperature {
        events.push(Event::TargetTemperatureChanged {
            id: id(),
            name: name(),
            temp: current.target_temperature,
        });
    }
    if prev.power_on != current.power_on {
        events.push(Event::PowerChanged {
            id: id(),
            name: name(),
            on: current.power_on,
        });
    }
    if (prev.device_offline, prev.sensor_offline, prev.unavailable)
        != (current.device_offline, current.sensor_offline, current.unavailable)
    {
        events.push(Event::ConnectivityChanged {
            id: id(),
            name: name(),
            device_offline: current.device_offline,
            sensor_offline: current.sensor_offline,
            unavailable: current.unavailable,
        });
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn device() -> Device {
        Device {
            id: "a1".into(),
            name: "Bedroom".into(),
            current_temperature: 70,
            target_temperature: 72,
            power_on: true,
            device_offline: false,
            sensor_offline: false,
            unavailable: false,
        }
    }

    #[test]
    fn diff_json_reports_changed_leaves() {
        let prev = json!({"modlets": {"S1": {"isOnline": true}}, "count": 1});
        let curr = json!({"modlets": {"S1": {"isOnline": false}}, "count": 1, "new": "x"});
        let mut changes = Vec::new();
        diff_json(&prev, &curr, "", &mut changes);

        assert_eq!(changes.len(), 2);
        assert!(changes.contains(&("modlets.S1.isOnline".into(), json!(true), json!(false))));
        assert!(changes.contains(&("new".into(), Value::Null, json!("x"))));
    }

    #[test]
    fn diff_json_identical_is_empty() {
        let doc = json!({"a": [1, 2], "b": {"c": null}});
        let mut changes = Vec::new();
        diff_json(&doc, &doc, "", &mut changes);
        assert!(changes.is_empty());
    }

    #[test]
    fn first_sighting_is_discovery() {
        let events = device_events(None, &device());
        assert_eq!(
            events,
            vec![Event::DeviceDiscovered {
                id: "a1".into(),
                name: "Bedroom".into()
            }]
        );
    }

    #[test]
    fn unchanged_record_emits_nothing() {
        assert!(device_events(Some(&device()), &device()).is_empty());
    }

    #[test]
    fn field_changes_map_to_events() {
        let mut next = device();
        next.target_temperature = 74;
        next.power_on = false;
        next.sensor_offline = true;

        let events = device_events(Some(&device()), &next);
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], Event::TargetTemperatureChanged { temp: 74, .. }));
        assert!(matches!(events[1], Event::PowerChanged { on: false, .. }));
        assert!(matches!(
            events[2],
            Event::ConnectivityChanged {
                sensor_offline: true,
                device_offline: false,
                ..
            }
        ));
    }
}
