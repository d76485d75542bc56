//! HTTP request and response bodies.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::operation::Operation;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    #[serde(default)]
    pub build_id: String,
    #[serde(default)]
    pub target: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateCvdRequest {
    #[serde(default)]
    pub build_info: Option<BuildInfo>,
    #[serde(default)]
    pub fetch_cvd_build_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instances_count: Option<u32>,
}

impl CreateCvdRequest {
    pub fn instances_count(&self) -> u32 {
        self.instances_count.unwrap_or(1)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListOperationsResponse {
    pub operations: Vec<Operation>,
}

/// Reply body for `GET /devices/{id}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub device_id: String,
    pub device_port: u16,
    pub device_info: Value,
}
