//! Accept loop for the device socket.

use std::sync::Arc;

use async_trait::async_trait;
use hostop_broker::device_session::run_device_session;
use hostop_broker::DeviceRegistry;
use hostop_core::messages::InfraConfig;
use hostop_transport::{framed_pair, MessageSource, TransportError};
use serde_json::Value;
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Source that reports `Closed` once shutdown starts, so the session takes
/// its normal disconnect path.
struct UntilCancelled<S> {
    inner: S,
    token: CancellationToken,
}

#[async_trait]
impl<S: MessageSource> MessageSource for UntilCancelled<S> {
    async fn recv(&mut self) -> hostop_transport::Result<Value> {
        tokio::select! {
            () = self.token.cancelled() => Err(TransportError::Closed),
            msg = self.inner.recv() => msg,
        }
    }
}

/// Accept device connections until `token` is cancelled, then wait for the
/// open sessions to unregister their devices.
pub async fn serve_devices(
    listener: UnixListener,
    devices: Arc<DeviceRegistry>,
    infra: Arc<InfraConfig>,
    max_message_size: usize,
    token: CancellationToken,
) {
    info!("accepting device connections");
    let sessions = TaskTracker::new();
    loop {
        let stream = tokio::select! {
            () = token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(e) => {
                    warn!(error = %e, "device accept failed");
                    continue;
                }
            },
        };

        debug!("device connected");
        let (sink, source) = framed_pair(stream, max_message_size);
        let source = UntilCancelled {
            inner: source,
            token: token.clone(),
        };
        let devices = Arc::clone(&devices);
        let infra = Arc::clone(&infra);
        sessions.spawn(async move {
            run_device_session(&devices, &infra, Arc::new(sink), source).await;
        });
    }

    sessions.close();
    info!(open_sessions = sessions.len(), "device listener stopped");
    sessions.wait().await;
}
