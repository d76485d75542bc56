//! WebSocket transport over an upgraded axum socket.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::{Result, TransportError};
use crate::{MessageSink, MessageSource};

pub fn ws_pair(socket: WebSocket) -> (WsSink, WsSource) {
    let (tx, rx) = socket.split();
    (
        WsSink {
            inner: Mutex::new(tx),
        },
        WsSource { inner: rx },
    )
}

pub struct WsSink {
    inner: Mutex<SplitSink<WebSocket, Message>>,
}

#[async_trait]
impl MessageSink for WsSink {
    async fn send(&self, value: &Value) -> Result<()> {
        let text = serde_json::to_string(value)?;
        self.inner
            .lock()
            .await
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }

    async fn close(&self) {
        let mut tx = self.inner.lock().await;
        if let Err(e) = tx.send(Message::Close(None)).await {
            tracing::debug!(error = %e, "failed to send websocket close frame");
        }
        if let Err(e) = tx.close().await {
            tracing::debug!(error = %e, "error closing websocket sink");
        }
    }
}

pub struct WsSource {
    inner: SplitStream<WebSocket>,
}

#[async_trait]
impl MessageSource for WsSource {
    async fn recv(&mut self) -> Result<Value> {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => return Ok(serde_json::from_str(text.as_str())?),
                Some(Ok(Message::Binary(data))) => return Ok(serde_json::from_slice(&data)?),
                Some(Ok(Message::Close(_))) | None => return Err(TransportError::Closed),
                // Ping/pong are answered by the protocol layer.
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(TransportError::WebSocket(e.to_string())),
            }
        }
    }
}
