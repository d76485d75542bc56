//! Signaling envelopes exchanged with devices and clients.
//!
//! Only the envelope fields the broker inspects are typed. Payloads and device
//! info stay opaque `serde_json::Value`s and are relayed untouched.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const TYPE_REGISTER: &str = "register";
pub const TYPE_CONNECT: &str = "connect";
pub const TYPE_FORWARD: &str = "forward";
pub const TYPE_CLIENT_MSG: &str = "client_msg";
pub const TYPE_DEVICE_MSG: &str = "device_msg";
pub const TYPE_DEVICE_INFO: &str = "device_info";
pub const TYPE_CONFIG: &str = "config";

/// First message a device sends on its socket.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RegisterMsg {
    #[serde(default)]
    pub message_type: String,
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub device_port: u16,
    #[serde(default)]
    pub device_info: Option<Value>,
}

/// First message a realtime client sends.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectMsg {
    #[serde(default)]
    pub message_type: String,
    #[serde(default)]
    pub device_id: String,
}

/// Relay request. Devices set `client_id`; clients leave it out.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ForwardMsg {
    #[serde(default)]
    pub message_type: String,
    #[serde(default)]
    pub client_id: i64,
    #[serde(default)]
    pub payload: Option<Value>,
}

/// Client payload as delivered to a device.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientMsg {
    pub message_type: String,
    pub client_id: i64,
    pub payload: Value,
}

impl ClientMsg {
    pub fn new(client_id: i64, payload: Value) -> Self {
        Self {
            message_type: TYPE_CLIENT_MSG.into(),
            client_id,
            payload,
        }
    }

    pub fn into_value(self) -> Value {
        json!({
            "message_type": self.message_type,
            "client_id": self.client_id,
            "payload": self.payload,
        })
    }
}

/// Device payload as delivered to a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceMsg {
    pub message_type: String,
    pub payload: Value,
}

impl DeviceMsg {
    pub fn new(payload: Value) -> Self {
        Self {
            message_type: TYPE_DEVICE_MSG.into(),
            payload,
        }
    }

    pub fn into_value(self) -> Value {
        json!({"message_type": self.message_type, "payload": self.payload})
    }
}

/// Device info pushed to a realtime client right after it connects.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfoMsg {
    pub message_type: String,
    pub device_info: Value,
}

impl DeviceInfoMsg {
    pub fn new(device_info: Value) -> Self {
        Self {
            message_type: TYPE_DEVICE_INFO.into(),
            device_info,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMsg {
    pub error: String,
}

impl ErrorMsg {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// Signaling configuration handed to both ends of a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfraConfig {
    pub message_type: String,
    pub ice_servers: Vec<IceServer>,
}

impl InfraConfig {
    pub fn new(ice_servers: Vec<IceServer>) -> Self {
        Self {
            message_type: TYPE_CONFIG.into(),
            ice_servers,
        }
    }

    /// One ICE server entry per URL.
    pub fn from_urls<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            urls.into_iter()
                .map(|u| IceServer {
                    urls: vec![u.into()],
                })
                .collect(),
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewConnMsg {
    #[serde(default)]
    pub device_id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewConnReply {
    pub connection_id: String,
    pub device_info: Value,
}
