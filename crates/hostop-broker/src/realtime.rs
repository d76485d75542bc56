use std::sync::Arc;

use async_trait::async_trait;
use hostop_core::messages::ErrorMsg;
use hostop_transport::{send_msg, MessageSink};
use serde_json::Value;

use crate::device::ClientHandle;
use crate::error::BrokerError;

/// Client bound to an open realtime socket.
pub struct RealtimeClient {
    sink: Arc<dyn MessageSink>,
}

impl RealtimeClient {
    #[must_use]
    pub fn new(sink: Arc<dyn MessageSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl ClientHandle for RealtimeClient {
    async fn send(&self, value: &Value) -> Result<(), BrokerError> {
        self.sink.send(value).await?;
        Ok(())
    }

    async fn on_device_disconnected(&self) {
        if let Err(e) = send_msg(self.sink.as_ref(), &ErrorMsg::new("Device disconnected")).await
        {
            tracing::debug!(error = %e, "could not notify client of device disconnect");
        }
        self.sink.close().await;
    }
}
