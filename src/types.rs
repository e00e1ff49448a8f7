//! Domain objects and their fixed numeric-key wire schema

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Instance identifier, unique within its collection
pub type InstanceId = u32;

/// Default light transition time in seconds
pub const DEFAULT_TRANSITION_TIME: f64 = 0.5;

/// Brightness the gateway reports for lights that are switched off
pub const MIN_BRIGHTNESS_SENTINEL: u8 = 1;

/// Kind of accessory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum AccessoryType {
    #[default]
    Remote,
    SlaveRemote,
    Lightbulb,
    Plug,
    MotionSensor,
    SignalRepeater,
    Blind,
    SoundRemote,
    Other(u8),
}

impl From<u8> for AccessoryType {
    fn from(value: u8) -> Self {
        match value {
            0 => AccessoryType::Remote,
            1 => AccessoryType::SlaveRemote,
            2 => AccessoryType::Lightbulb,
            3 => AccessoryType::Plug,
            4 => AccessoryType::MotionSensor,
            6 => AccessoryType::SignalRepeater,
            7 => AccessoryType::Blind,
            8 => AccessoryType::SoundRemote,
            other => AccessoryType::Other(other),
        }
    }
}

impl From<AccessoryType> for u8 {
    fn from(value: AccessoryType) -> Self {
        match value {
            AccessoryType::Remote => 0,
            AccessoryType::SlaveRemote => 1,
            AccessoryType::Lightbulb => 2,
            AccessoryType::Plug => 3,
            AccessoryType::MotionSensor => 4,
            AccessoryType::SignalRepeater => 6,
            AccessoryType::Blind => 7,
            AccessoryType::SoundRemote => 8,
            AccessoryType::Other(other) => other,
        }
    }
}

/// Device information block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(rename = "0", default)]
    pub manufacturer: String,
    #[serde(rename = "1", default)]
    pub model_number: String,
    #[serde(rename = "2", default)]
    pub serial_number: String,
    #[serde(rename = "3", default)]
    pub firmware_version: String,
    #[serde(rename = "6", default)]
    pub power_source: u8,
    #[serde(rename = "9", default, skip_serializing_if = "Option::is_none")]
    pub battery: Option<u8>,
}

/// A device known to the gateway
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Accessory {
    #[serde(rename = "9003", default)]
    pub instance_id: InstanceId,
    #[serde(rename = "9001", default)]
    pub name: String,
    #[serde(rename = "9002", default)]
    pub created_at: u64,
    #[serde(rename = "5750", default)]
    pub device_type: AccessoryType,
    #[serde(rename = "9019", default, with = "int_bool")]
    pub alive: bool,
    #[serde(rename = "9020", default)]
    pub last_seen: u64,
    #[serde(rename = "3", default)]
    pub device_info: DeviceInfo,
    #[serde(rename = "3311", default, skip_serializing_if = "Vec::is_empty")]
    pub light_list: Vec<Light>,
}

impl Accessory {
    /// Whether this accessory can be operated as a light
    pub fn is_light(&self) -> bool {
        self.device_type == AccessoryType::Lightbulb && !self.light_list.is_empty()
    }

    pub fn light(&self) -> Option<&Light> {
        self.light_list.first()
    }

    pub fn light_mut(&mut self) -> Option<&mut Light> {
        self.light_list.first_mut()
    }
}

/// Light state of an accessory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Light {
    #[serde(rename = "9003", default)]
    pub instance_id: InstanceId,
    #[serde(rename = "5850", default, with = "int_bool")]
    pub on_off: bool,
    /// Brightness, 0..=254
    #[serde(rename = "5851", default)]
    pub dimmer: u8,
    #[serde(rename = "5706", default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(rename = "5707", default, skip_serializing_if = "Option::is_none")]
    pub hue: Option<u16>,
    #[serde(rename = "5708", default, skip_serializing_if = "Option::is_none")]
    pub saturation: Option<u16>,
    #[serde(rename = "5709", default, skip_serializing_if = "Option::is_none")]
    pub color_x: Option<u32>,
    #[serde(rename = "5710", default, skip_serializing_if = "Option::is_none")]
    pub color_y: Option<u32>,
    #[serde(rename = "5711", default, skip_serializing_if = "Option::is_none")]
    pub color_temperature: Option<u16>,
    /// Seconds; sent with every change rather than being part of the state
    #[serde(skip, default = "default_transition_time")]
    pub transition_time: f64,
}

fn default_transition_time() -> f64 {
    DEFAULT_TRANSITION_TIME
}

impl Default for Light {
    fn default() -> Self {
        Self {
            instance_id: 0,
            on_off: false,
            dimmer: 0,
            color: None,
            hue: None,
            saturation: None,
            color_x: None,
            color_y: None,
            color_temperature: None,
            transition_time: DEFAULT_TRANSITION_TIME,
        }
    }
}

/// Requested change to a light; unset fields stay as they are
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LightOperation {
    pub on_off: Option<bool>,
    pub dimmer: Option<u8>,
    pub color: Option<String>,
    pub hue: Option<u16>,
    pub saturation: Option<u16>,
    pub color_temperature: Option<u16>,
    pub transition_time: Option<f64>,
}

impl LightOperation {
    pub(crate) fn apply_to(&self, light: &mut Light) {
        if let Some(on_off) = self.on_off {
            light.on_off = on_off;
        }
        if let Some(dimmer) = self.dimmer {
            light.dimmer = dimmer;
        }
        if let Some(color) = &self.color {
            light.color = Some(color.clone());
        }
        if let Some(hue) = self.hue {
            light.hue = Some(hue);
        }
        if let Some(saturation) = self.saturation {
            light.saturation = Some(saturation);
        }
        if let Some(temperature) = self.color_temperature {
            light.color_temperature = Some(temperature);
        }
        if let Some(transition_time) = self.transition_time {
            light.transition_time = transition_time;
        }
    }
}

/// A group of accessories
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    #[serde(rename = "9003", default)]
    pub instance_id: InstanceId,
    #[serde(rename = "9001", default)]
    pub name: String,
    #[serde(rename = "9002", default)]
    pub created_at: u64,
    #[serde(rename = "5850", default, with = "int_bool")]
    pub on_off: bool,
    #[serde(rename = "5851", default)]
    pub dimmer: u8,
    #[serde(rename = "9039", default)]
    pub scene_id: InstanceId,
    #[serde(rename = "9018", default, with = "member_ids")]
    pub device_ids: Vec<InstanceId>,
}

/// Requested change to a whole group; unset fields are not sent
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupOperation {
    pub on_off: Option<bool>,
    pub dimmer: Option<u8>,
    pub scene_id: Option<InstanceId>,
    pub transition_time: Option<f64>,
}

impl GroupOperation {
    pub fn is_empty(&self) -> bool {
        self.on_off.is_none() && self.dimmer.is_none() && self.scene_id.is_none()
    }
}

/// A scene stored for a group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scene {
    #[serde(rename = "9003", default)]
    pub instance_id: InstanceId,
    #[serde(rename = "9001", default)]
    pub name: String,
    #[serde(rename = "9057", default)]
    pub scene_index: u32,
    #[serde(rename = "9068", default, with = "int_bool")]
    pub is_predefined: bool,
    #[serde(rename = "15013", default)]
    pub light_settings: Vec<LightSetting>,
}

/// Light state recalled by a scene
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightSetting {
    #[serde(rename = "9003", default)]
    pub instance_id: InstanceId,
    #[serde(rename = "5850", default, with = "int_bool")]
    pub on_off: bool,
    #[serde(rename = "5851", default)]
    pub dimmer: u8,
    #[serde(rename = "5706", default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(rename = "5709", default, skip_serializing_if = "Option::is_none")]
    pub color_x: Option<u32>,
    #[serde(rename = "5710", default, skip_serializing_if = "Option::is_none")]
    pub color_y: Option<u32>,
    #[serde(rename = "5711", default, skip_serializing_if = "Option::is_none")]
    pub color_temperature: Option<u16>,
}

/// Gateway metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayDetails {
    #[serde(rename = "9029", default)]
    pub version: String,
    #[serde(rename = "9023", default)]
    pub ntp_server: String,
    #[serde(rename = "9059", default)]
    pub current_time_unix: u64,
    #[serde(rename = "9060", default)]
    pub current_time_iso8601: String,
    #[serde(rename = "9061", default)]
    pub commissioning_mode: u32,
    #[serde(rename = "9054", default)]
    pub ota_update_state: u8,
    #[serde(rename = "9055", default)]
    pub update_progress: u8,
}

/// Booleans travel as 0/1
mod int_bool {
    use super::*;

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(u8::from(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::Bool(b) => Ok(b),
            serde_json::Value::Number(n) => Ok(n.as_f64().is_some_and(|n| n != 0.0)),
            serde_json::Value::Null => Ok(false),
            other => Err(serde::de::Error::custom(format!("expected 0/1, got {}", other))),
        }
    }
}

/// Group members nest as `{"15002": {"9003": [ids]}}`
mod member_ids {
    use super::*;

    #[derive(Serialize, Deserialize, Default)]
    struct Ids {
        #[serde(rename = "9003", default)]
        ids: Vec<InstanceId>,
    }

    #[derive(Serialize, Deserialize, Default)]
    struct Members {
        #[serde(rename = "15002", default)]
        accessories: Ids,
    }

    pub fn serialize<S: Serializer>(ids: &[InstanceId], serializer: S) -> Result<S::Ok, S::Error> {
        Members {
            accessories: Ids { ids: ids.to_vec() },
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<InstanceId>, D::Error> {
        Ok(Members::deserialize(deserializer)?.accessories.ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accessory_parses_from_numeric_keys() {
        let accessory: Accessory = serde_json::from_value(json!({
            "9003": 65536,
            "9001": "Living room",
            "5750": 2,
            "9019": 1,
            "3": {"0": "IKEA of Sweden", "1": "TRADFRI bulb E27 CWS opal 600lm", "3": "1.3.002"},
            "3311": [{"9003": 0, "5850": 1, "5851": 254, "5706": "f1e0b5", "5709": 30138, "5710": 26909}]
        }))
        .unwrap();
        assert_eq!(accessory.instance_id, 65536);
        assert_eq!(accessory.device_type, AccessoryType::Lightbulb);
        assert!(accessory.alive);
        assert!(accessory.is_light());
        let light = accessory.light().unwrap();
        assert!(light.on_off);
        assert_eq!(light.dimmer, 254);
        assert_eq!(light.color.as_deref(), Some("f1e0b5"));
        assert_eq!(light.transition_time, DEFAULT_TRANSITION_TIME);
    }

    #[test]
    fn unknown_accessory_types_survive() {
        let accessory: Accessory = serde_json::from_value(json!({"9003": 1, "5750": 42})).unwrap();
        assert_eq!(accessory.device_type, AccessoryType::Other(42));
        assert!(!accessory.is_light());
        assert_eq!(serde_json::to_value(&accessory).unwrap()["5750"], json!(42));
    }

    #[test]
    fn group_members_are_nested() {
        let group: Group = serde_json::from_value(json!({
            "9003": 123456,
            "5850": 0,
            "9018": {"15002": {"9003": [65536, 65537]}}
        }))
        .unwrap();
        assert_eq!(group.device_ids, vec![65536, 65537]);
        let value = serde_json::to_value(&group).unwrap();
        assert_eq!(value["9018"], json!({"15002": {"9003": [65536, 65537]}}));
        assert_eq!(value["5850"], json!(0));
    }
}
