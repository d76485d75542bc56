//! Settings types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostopSettings {
    pub server: ServerSettings,
    pub device: DeviceSettings,
    pub orchestrator: OrchestratorSettings,
}

/// HTTP surface settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Plain HTTP port.
    pub http_port: u16,
    /// HTTPS port. TLS is terminated outside this process.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub https_port: Option<u16>,
    /// Directory holding the TLS certificate, consumed by the terminator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_cert_dir: Option<String>,
    /// Directory served for unmatched GET requests.
    pub static_dir: String,
    /// Directory holding files that replace proxied device files.
    pub intercept_dir: String,
    /// How long `POST /operations/{name}/:wait` blocks before giving up.
    pub wait_operation_secs: u64,
    /// Largest accepted signaling message, in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 1080,
            https_port: None,
            tls_cert_dir: None,
            static_dir: "static".to_string(),
            intercept_dir: "intercept".to_string(),
            wait_operation_secs: 30,
            max_message_size: 16 * 1024 * 1024,
        }
    }
}

/// Device-facing socket settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceSettings {
    /// Filesystem path of the device socket.
    pub socket_path: String,
    /// ICE server URLs advertised in the signaling configuration.
    pub ice_servers: Vec<String>,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            socket_path: "/run/hostop/devices.sock".to_string(),
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
        }
    }
}

/// Instance provisioning settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrchestratorSettings {
    /// Base URL of the artifact build service.
    pub artifact_service_url: String,
    /// Root of all provisioning state on disk.
    pub root_dir: String,
    /// Build target the helper binary is fetched from.
    pub cvd_bin_target: String,
    /// Artifact name of the helper binary.
    pub cvd_artifact_name: String,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            artifact_service_url: "https://androidbuildinternal.googleapis.com".to_string(),
            root_dir: "/var/lib/hostop".to_string(),
            cvd_bin_target: "aosp_cf_x86_64_phone-userdebug".to_string(),
            cvd_artifact_name: "cvd".to_string(),
        }
    }
}

impl OrchestratorSettings {
    pub fn cvd_bin(&self) -> PathBuf {
        PathBuf::from(&self.root_dir).join("cvd")
    }

    pub fn artifacts_root_dir(&self) -> PathBuf {
        PathBuf::from(&self.root_dir).join("artifacts")
    }

    pub fn homes_root_dir(&self) -> PathBuf {
        PathBuf::from(&self.root_dir).join("homes")
    }
}
