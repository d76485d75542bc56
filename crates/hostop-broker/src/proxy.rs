//! Proxy for files served by a device's local HTTP service.

use std::path::PathBuf;

use bytes::Bytes;

use crate::device::Device;
use crate::error::BrokerError;

/// Path served from the local intercept directory instead of the device.
pub const INTERCEPTED_PATH: &str = "/js/server_connector.js";

/// Status, content type and body relayed back to the HTTP client.
#[derive(Debug)]
pub struct ProxiedResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// Serves files from a device's loopback HTTP service.
///
/// A fixed set of intercepted paths is answered from local disk instead.
pub struct DeviceFileProxy {
    http: reqwest::Client,
    intercept_dir: PathBuf,
}

impl DeviceFileProxy {
    #[must_use]
    pub fn new(intercept_dir: impl Into<PathBuf>) -> Self {
        Self::with_client(reqwest::Client::new(), intercept_dir)
    }

    /// Use a preconfigured HTTP client.
    #[must_use]
    pub fn with_client(http: reqwest::Client, intercept_dir: impl Into<PathBuf>) -> Self {
        Self {
            http,
            intercept_dir: intercept_dir.into(),
        }
    }

    /// Fetch `path` from the device's loopback service, preserving `query`.
    pub async fn fetch(
        &self,
        device: &Device,
        path: &str,
        query: Option<&str>,
    ) -> Result<ProxiedResponse, BrokerError> {
        let path = if path.starts_with('/') {
            path.to_owned()
        } else {
            format!("/{path}")
        };

        if path == INTERCEPTED_PATH {
            return self.intercepted(&path).await;
        }

        let mut url = format!("http://127.0.0.1:{}{}", device.port(), path);
        if let Some(q) = query.filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(q);
        }

        let resp = self.http.get(&url).send().await.map_err(|e| {
            tracing::warn!(device_id = %device.id(), url = %url, error = %e, "device proxy request failed");
            BrokerError::Proxy(e.to_string())
        })?;
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = resp
            .bytes()
            .await
            .map_err(|e| BrokerError::Proxy(e.to_string()))?;

        Ok(ProxiedResponse {
            status,
            content_type,
            body,
        })
    }

    async fn intercepted(&self, path: &str) -> Result<ProxiedResponse, BrokerError> {
        let file = self.intercept_dir.join(path.trim_start_matches('/'));
        let body = match tokio::fs::read(&file).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BrokerError::FileNotFound(path.to_owned()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(ProxiedResponse {
            status: 200,
            content_type: Some("application/javascript".into()),
            body: Bytes::from(body),
        })
    }
}
