//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::HostopSettings;

/// Load settings from an optional file, then apply env var overrides.
pub fn load_settings(path: Option<&Path>) -> Result<HostopSettings> {
    match path {
        Some(path) => load_settings_from_path(path),
        None => {
            let mut settings = HostopSettings::default();
            apply_env_overrides(&mut settings, |name| std::env::var(name).ok())?;
            Ok(settings)
        }
    }
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<HostopSettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok())?;
    Ok(settings)
}

fn read_settings_file(path: &Path) -> Result<HostopSettings> {
    let defaults = serde_json::to_value(HostopSettings::default()).map_err(SettingsError::Defaults)?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|e| SettingsError::read(path, e))?;
        let user: Value =
            serde_json::from_str(&content).map_err(|e| SettingsError::parse(path, e))?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    serde_json::from_value(merged).map_err(|e| SettingsError::parse(path, e))
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `HOSTOP_*` overrides read through `lookup`.
///
/// Empty values are treated as unset. A port that does not parse fails the
/// whole load with [`SettingsError::EnvOverride`].
pub fn apply_env_overrides<F>(settings: &mut HostopSettings, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let read_string = |name: &str| lookup(name).filter(|v| !v.is_empty());
    let read_port = |name: &str| -> Result<Option<u16>> {
        let Some(val) = read_string(name) else {
            return Ok(None);
        };
        match parse_port(&val) {
            Some(port) => Ok(Some(port)),
            None => Err(SettingsError::EnvOverride {
                key: name.to_owned(),
                value: val,
                reason: "expected a port between 1 and 65535",
            }),
        }
    };

    if let Some(v) = read_string("HOSTOP_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_port("HOSTOP_HTTP_PORT")? {
        settings.server.http_port = v;
    }
    if let Some(v) = read_port("HOSTOP_HTTPS_PORT")? {
        settings.server.https_port = Some(v);
    }
    if let Some(v) = read_string("HOSTOP_TLS_CERT_DIR") {
        settings.server.tls_cert_dir = Some(v);
    }
    if let Some(v) = read_string("HOSTOP_STATIC_DIR") {
        settings.server.static_dir = v;
    }
    if let Some(v) = read_string("HOSTOP_SOCKET_PATH") {
        settings.device.socket_path = v;
    }
    if let Some(v) = read_string("HOSTOP_ARTIFACT_SERVICE_URL") {
        settings.orchestrator.artifact_service_url = v;
    }
    if let Some(v) = read_string("HOSTOP_ROOT_DIR") {
        settings.orchestrator.root_dir = v;
    }
    if let Some(v) = read_string("HOSTOP_CVD_BIN_TARGET") {
        settings.orchestrator.cvd_bin_target = v;
    }
    Ok(())
}

/// Parse a non-zero TCP port.
pub fn parse_port(val: &str) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= 1).then_some(n)
}
