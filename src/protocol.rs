use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Well-known gateway resource paths
pub mod endpoints {
    /// Collection of device ids
    pub const DEVICES: &str = "15001";
    /// Collection of group ids
    pub const GROUPS: &str = "15004";
    /// Root of the per-group scene collections
    pub const SCENES: &str = "15005";
    /// Gateway root
    pub const GATEWAY: &str = "15011";
    /// Gateway details
    pub const GATEWAY_DETAILS: &str = "15011/15012";
    /// Identity registration
    pub const AUTHENTICATION: &str = "15011/9063";
    /// Gateway reboot
    pub const REBOOT: &str = "15011/9030";
    /// Gateway factory reset
    pub const FACTORY_RESET: &str = "15011/9031";

    /// A single device
    pub fn device(id: u32) -> String {
        format!("{}/{}", DEVICES, id)
    }

    /// A single group
    pub fn group(id: u32) -> String {
        format!("{}/{}", GROUPS, id)
    }

    /// Scene ids of a group
    pub fn scenes(group_id: u32) -> String {
        format!("{}/{}", SCENES, group_id)
    }

    /// A single scene of a group
    pub fn scene(group_id: u32, scene_id: u32) -> String {
        format!("{}/{}/{}", SCENES, group_id, scene_id)
    }
}

/// CoAP request methods
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "get",
            Method::Post => "post",
            Method::Put => "put",
            Method::Delete => "delete",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CoAP response code in `class.detail` form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResponseCode {
    pub class: u8,
    pub detail: u8,
}

impl ResponseCode {
    pub const CREATED: Self = Self::new(2, 1);
    pub const DELETED: Self = Self::new(2, 2);
    pub const VALID: Self = Self::new(2, 3);
    pub const CHANGED: Self = Self::new(2, 4);
    pub const CONTENT: Self = Self::new(2, 5);
    pub const BAD_REQUEST: Self = Self::new(4, 0);
    pub const UNAUTHORIZED: Self = Self::new(4, 1);
    pub const BAD_OPTION: Self = Self::new(4, 2);
    pub const FORBIDDEN: Self = Self::new(4, 3);
    pub const NOT_FOUND: Self = Self::new(4, 4);
    pub const METHOD_NOT_ALLOWED: Self = Self::new(4, 5);
    pub const INTERNAL_SERVER_ERROR: Self = Self::new(5, 0);
    pub const SERVICE_UNAVAILABLE: Self = Self::new(5, 3);

    pub const fn new(class: u8, detail: u8) -> Self {
        Self { class, detail }
    }

    /// 2.xx codes
    pub fn is_success(&self) -> bool {
        self.class == 2
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.class, self.detail)
    }
}

/// CoAP content-format option value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentFormat(pub u16);

impl ContentFormat {
    pub const TEXT_PLAIN: Self = Self(0);
    pub const LINK_FORMAT: Self = Self(40);
    pub const XML: Self = Self(41);
    pub const OCTET_STREAM: Self = Self(42);
    pub const EXI: Self = Self(47);
    pub const JSON: Self = Self(50);
}

/// Raw response as delivered by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapResponse {
    pub code: ResponseCode,
    pub payload: Vec<u8>,
    pub format: Option<ContentFormat>,
}

impl CoapResponse {
    /// A JSON response with the given code
    pub fn json(code: ResponseCode, value: &Value) -> Self {
        Self {
            code,
            payload: serde_json::to_vec(value).unwrap_or_default(),
            format: Some(ContentFormat::JSON),
        }
    }

    /// A payload-less response, as gateways send for most errors
    pub fn empty(code: ResponseCode) -> Self {
        Self {
            code,
            payload: Vec::new(),
            format: Some(ContentFormat::JSON),
        }
    }

    /// Decode the payload according to its content format
    pub fn decode(&self) -> Result<Payload> {
        decode_payload(&self.payload, self.format)
    }
}

/// Decoded response payload
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Json(Value),
    Binary(Vec<u8>),
}

impl Payload {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(value) => Some(value),
            _ => None,
        }
    }
}

/// Decode a payload: no format or text/plain yields a string, JSON is parsed,
/// and every other format passes the raw bytes through.
pub fn decode_payload(bytes: &[u8], format: Option<ContentFormat>) -> Result<Payload> {
    match format {
        None | Some(ContentFormat::TEXT_PLAIN) => {
            Ok(Payload::Text(String::from_utf8_lossy(bytes).into_owned()))
        }
        Some(ContentFormat::JSON) => {
            if bytes.is_empty() {
                Ok(Payload::Json(Value::Null))
            } else {
                Ok(Payload::Json(serde_json::from_slice(bytes)?))
            }
        }
        Some(_) => Ok(Payload::Binary(bytes.to_vec())),
    }
}

/// Extract a list of instance ids from a collection payload
pub(crate) fn parse_id_list(payload: &Payload) -> Option<Vec<u32>> {
    let ids = payload.as_json()?.as_array()?;
    ids.iter()
        .map(|v| v.as_u64().and_then(|id| u32::try_from(id).ok()))
        .collect()
}
