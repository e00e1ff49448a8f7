//! Incoming-state fix-ups and minimal outgoing patches.

use crate::error::Result;
use crate::types::{
    Accessory, GatewayDetails, Group, GroupOperation, Scene, DEFAULT_TRANSITION_TIME,
    MIN_BRIGHTNESS_SENTINEL,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};

const LIGHT_LIST_KEY: &str = "3311";
const NAME_KEY: &str = "9001";
const ON_OFF_KEY: &str = "5850";
const DIMMER_KEY: &str = "5851";
const SCENE_ID_KEY: &str = "9039";
const TRANSITION_TIME_KEY: &str = "5712";

/// Keys of a group that cannot be written through a patch
const READ_ONLY_GROUP_KEYS: [&str; 3] = ["9002", "9003", "9018"];

fn parse<T: DeserializeOwned>(payload: &Value) -> Result<T> {
    Ok(serde_json::from_value(payload.clone())?)
}

/// Parse an accessory and apply the brightness fix-up
pub fn parse_accessory(payload: &Value) -> Result<Accessory> {
    let mut accessory: Accessory = parse(payload)?;
    normalize_accessory(&mut accessory);
    Ok(accessory)
}

/// Parse a group payload
pub fn parse_group(payload: &Value) -> Result<Group> {
    parse(payload)
}

/// Parse a scene payload
pub fn parse_scene(payload: &Value) -> Result<Scene> {
    parse(payload)
}

/// Parse the gateway details payload
pub fn parse_gateway_details(payload: &Value) -> Result<GatewayDetails> {
    parse(payload)
}

/// Switched-off lights report the minimum brightness instead of zero
pub fn normalize_accessory(accessory: &mut Accessory) {
    for light in &mut accessory.light_list {
        if !light.on_off && light.dimmer == MIN_BRIGHTNESS_SENTINEL {
            light.dimmer = 0;
        }
    }
}

fn to_object<T: Serialize>(value: &T) -> Result<Map<String, Value>> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        _ => Ok(Map::new()),
    }
}

/// Entries of `current` that are absent from or different in `previous`
fn changed_fields(previous: &Map<String, Value>, current: &Map<String, Value>) -> Map<String, Value> {
    current
        .iter()
        .filter(|(key, value)| previous.get(*key) != Some(*value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn deciseconds(seconds: f64) -> u64 {
    (seconds.max(0.0) * 10.0).round() as u64
}

/// Minimal patch turning `stored` into `current`, or `None` when nothing differs
pub fn device_patch(stored: &Accessory, current: &Accessory) -> Result<Option<Value>> {
    let mut patch = Map::new();

    if stored.name != current.name {
        patch.insert(NAME_KEY.to_string(), json!(current.name));
    }

    let mut lights = Vec::new();
    for (index, light) in current.light_list.iter().enumerate() {
        let mut changes = match stored.light_list.get(index) {
            Some(previous) => changed_fields(&to_object(previous)?, &to_object(light)?),
            None => to_object(light)?,
        };
        if !changes.is_empty() {
            changes.insert(
                TRANSITION_TIME_KEY.to_string(),
                json!(deciseconds(light.transition_time)),
            );
            lights.push(Value::Object(changes));
        }
    }
    if !lights.is_empty() {
        patch.insert(LIGHT_LIST_KEY.to_string(), Value::Array(lights));
    }

    Ok((!patch.is_empty()).then_some(Value::Object(patch)))
}

/// Minimal patch for a group, or `None` when nothing differs
pub fn group_patch(stored: &Group, current: &Group) -> Result<Option<Value>> {
    let mut changes = changed_fields(&to_object(stored)?, &to_object(current)?);
    for key in READ_ONLY_GROUP_KEYS {
        changes.remove(key);
    }
    if changes.is_empty() {
        return Ok(None);
    }
    if changes.contains_key(ON_OFF_KEY) || changes.contains_key(DIMMER_KEY) {
        changes.insert(
            TRANSITION_TIME_KEY.to_string(),
            json!(deciseconds(DEFAULT_TRANSITION_TIME)),
        );
    }
    Ok(Some(Value::Object(changes)))
}

/// Payload for a group operation; `None` for an empty operation
pub fn group_operation_payload(operation: &GroupOperation) -> Option<Value> {
    if operation.is_empty() {
        return None;
    }
    let mut payload = Map::new();
    if let Some(on_off) = operation.on_off {
        payload.insert(ON_OFF_KEY.to_string(), json!(u8::from(on_off)));
    }
    if let Some(dimmer) = operation.dimmer {
        payload.insert(DIMMER_KEY.to_string(), json!(dimmer));
    }
    if let Some(scene_id) = operation.scene_id {
        payload.insert(SCENE_ID_KEY.to_string(), json!(scene_id));
    }
    if operation.on_off.is_some() || operation.dimmer.is_some() {
        let seconds = operation.transition_time.unwrap_or(DEFAULT_TRANSITION_TIME);
        payload.insert(TRANSITION_TIME_KEY.to_string(), json!(deciseconds(seconds)));
    }
    Some(Value::Object(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccessoryType, Light};

    fn bulb(on_off: bool, dimmer: u8) -> Value {
        json!({
            "9003": 65536,
            "9001": "bulb",
            "5750": 2,
            "3311": [{"9003": 0, "5850": u8::from(on_off), "5851": dimmer, "5706": "efd275"}]
        })
    }

    #[test]
    fn sentinel_brightness_on_a_switched_off_light_becomes_zero() {
        let accessory = parse_accessory(&bulb(false, 1)).unwrap();
        assert!(!accessory.light_list[0].on_off);
        assert_eq!(accessory.light_list[0].dimmer, 0);
    }

    #[test]
    fn other_brightness_on_a_switched_off_light_is_kept() {
        let accessory = parse_accessory(&bulb(false, 2)).unwrap();
        assert_eq!(accessory.light_list[0].dimmer, 2);
        let accessory = parse_accessory(&bulb(true, 1)).unwrap();
        assert_eq!(accessory.light_list[0].dimmer, 1);
    }

    #[test]
    fn unchanged_accessory_has_no_patch() {
        let stored = parse_accessory(&bulb(true, 254)).unwrap();
        assert_eq!(device_patch(&stored, &stored.clone()).unwrap(), None);
    }

    #[test]
    fn patch_holds_only_changed_light_fields_and_the_transition_time() {
        let stored = parse_accessory(&bulb(true, 254)).unwrap();
        let mut current = stored.clone();
        current.light_list[0].on_off = false;
        let patch = device_patch(&stored, &current).unwrap().unwrap();
        assert_eq!(patch, json!({"3311": [{"5850": 0, "5712": 5}]}));
    }

    #[test]
    fn renamed_accessory_patches_the_name_only() {
        let stored = parse_accessory(&bulb(true, 254)).unwrap();
        let mut current = stored.clone();
        current.name = "desk".to_string();
        let patch = device_patch(&stored, &current).unwrap().unwrap();
        assert_eq!(patch, json!({"9001": "desk"}));
    }

    #[test]
    fn added_light_is_sent_in_full() {
        let stored = Accessory {
            instance_id: 1,
            device_type: AccessoryType::Lightbulb,
            ..Accessory::default()
        };
        let mut current = stored.clone();
        current.light_list.push(Light {
            on_off: true,
            dimmer: 10,
            transition_time: 1.0,
            ..Light::default()
        });
        let patch = device_patch(&stored, &current).unwrap().unwrap();
        assert_eq!(patch["3311"][0]["5850"], json!(1));
        assert_eq!(patch["3311"][0]["5712"], json!(10));
    }

    #[test]
    fn group_patch_skips_membership() {
        let stored = Group {
            instance_id: 123456,
            device_ids: vec![1, 2],
            ..Group::default()
        };
        let mut current = stored.clone();
        current.device_ids.push(3);
        assert_eq!(group_patch(&stored, &current).unwrap(), None);

        current.dimmer = 100;
        let patch = group_patch(&stored, &current).unwrap().unwrap();
        assert_eq!(patch, json!({"5851": 100, "5712": 5}));
    }

    #[test]
    fn group_operations_send_what_is_set() {
        assert_eq!(group_operation_payload(&GroupOperation::default()), None);
        let payload = group_operation_payload(&GroupOperation {
            scene_id: Some(654321),
            ..GroupOperation::default()
        })
        .unwrap();
        assert_eq!(payload, json!({"9039": 654321}));
        let payload = group_operation_payload(&GroupOperation {
            on_off: Some(true),
            transition_time: Some(2.0),
            ..GroupOperation::default()
        })
        .unwrap();
        assert_eq!(payload, json!({"5850": 1, "5712": 20}));
    }
}
