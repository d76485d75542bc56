//! Artifact downloads from the Android Build service.
//!
//! Fetching is a two-step exchange: ask the service for a short-lived signed
//! URL, then stream the artifact from that URL.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::errors::DownloadError;

/// A build on the artifact server, identified by build id and target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AndroidBuild {
    pub id: String,
    pub target: String,
}

#[async_trait]
pub trait ArtifactDownloader: Send + Sync {
    /// Stream artifact `name` of `build` into `dst`.
    async fn download(
        &self,
        dst: &mut (dyn AsyncWrite + Unpin + Send),
        build: &AndroidBuild,
        name: &str,
    ) -> Result<(), DownloadError>;
}

#[derive(Deserialize)]
struct SignedUrlReply {
    #[serde(rename = "signedUrl")]
    signed_url: String,
}

#[derive(Deserialize)]
struct ErrorReply {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: i64,
}

/// Downloads artifacts by first asking the server for a signed URL.
pub struct SignedUrlArtifactDownloader {
    http: reqwest::Client,
    base_url: String,
}

impl SignedUrlArtifactDownloader {
    #[must_use]
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    /// Endpoint returning the signed URL for an artifact.
    pub fn signed_url_endpoint(
        &self,
        build: &AndroidBuild,
        name: &str,
    ) -> Result<Url, DownloadError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| DownloadError::InvalidUrl(format!("{}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|()| DownloadError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend([
                "android",
                "internal",
                "build",
                "v3",
                "builds",
                build.id.as_str(),
                build.target.as_str(),
                "attempts",
                "latest",
                "artifacts",
                name,
                "url",
            ]);
        url.query_pairs_mut().append_pair("redirect", "false");
        Ok(url)
    }

    async fn signed_url(&self, build: &AndroidBuild, name: &str) -> Result<String, DownloadError> {
        let endpoint = self.signed_url_endpoint(build, name)?;
        let resp = self.http.get(endpoint).send().await?;
        if resp.status() != StatusCode::OK {
            return Err(remote_error(resp).await);
        }
        let reply: SignedUrlReply = resp.json().await?;
        Ok(reply.signed_url)
    }
}

async fn remote_error(resp: reqwest::Response) -> DownloadError {
    let status = resp.status().as_u16();
    let body = match resp.bytes().await {
        Ok(body) => body,
        Err(e) => return e.into(),
    };
    match serde_json::from_slice::<ErrorReply>(&body) {
        Ok(reply) => DownloadError::Remote {
            status,
            code: reply.error.code,
            message: reply.error.message,
        },
        Err(_) => DownloadError::MalformedErrorBody { status },
    }
}

#[async_trait]
impl ArtifactDownloader for SignedUrlArtifactDownloader {
    async fn download(
        &self,
        dst: &mut (dyn AsyncWrite + Unpin + Send),
        build: &AndroidBuild,
        name: &str,
    ) -> Result<(), DownloadError> {
        let url = self.signed_url(build, name).await?;
        debug!(build_id = %build.id, target = %build.target, artifact = name, "downloading artifact");

        let resp = self.http.get(&url).send().await?;
        if resp.status() != StatusCode::OK {
            return Err(remote_error(resp).await);
        }

        let mut body = resp.bytes_stream();
        while let Some(chunk) = body.next().await {
            dst.write_all(&chunk?).await?;
        }
        dst.flush().await?;
        Ok(())
    }
}
