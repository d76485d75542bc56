//! HTTP long-polling stand-in for a realtime client socket.
//!
//! Each polled connection owns an append-only log of device messages that
//! the client reads back by index.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use hostop_core::messages::ClientMsg;
use hostop_core::ConnectionId;
use parking_lot::Mutex;
use serde_json::Value;

use crate::device::{ClientHandle, Device};
use crate::error::BrokerError;
use crate::registry::DeviceRegistry;

type MessageLog = Arc<Mutex<Vec<Value>>>;
type ConnectionMap = Arc<DashMap<ConnectionId, Arc<PolledConnection>>>;

/// A client that exchanges messages by polling instead of holding a socket.
///
/// Device messages are appended to a log which the client reads by index.
pub struct PolledConnection {
    id: ConnectionId,
    device: Arc<Device>,
    client_id: i64,
    log: MessageLog,
}

impl PolledConnection {
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    #[must_use]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Id the device uses to address this connection.
    #[must_use]
    pub fn client_id(&self) -> i64 {
        self.client_id
    }

    /// Relay a client payload to the device, tagged with this connection's
    /// client id.
    pub async fn forward(&self, payload: Value) -> Result<(), BrokerError> {
        if self.device.is_closed() {
            return Err(BrokerError::ConnectionNotFound(self.id.to_string()));
        }
        let msg = ClientMsg::new(self.client_id, payload).into_value();
        self.device.send(&msg).await
    }

    /// Messages from index `start`; `count == -1` reads to the end.
    pub fn messages(&self, start: i64, count: i64) -> Result<Vec<Value>, BrokerError> {
        if start < 0 {
            return Err(BrokerError::InvalidRange(format!(
                "Invalid value for start: {start}"
            )));
        }
        if count < -1 {
            return Err(BrokerError::InvalidRange(format!(
                "Invalid value for count: {count}"
            )));
        }

        let log = self.log.lock();
        let start = usize::try_from(start).unwrap_or(usize::MAX);
        if start >= log.len() {
            return Ok(Vec::new());
        }
        let end = match count {
            -1 => log.len(),
            n => start
                .saturating_add(usize::try_from(n).unwrap_or(usize::MAX))
                .min(log.len()),
        };
        Ok(log[start..end].to_vec())
    }

    /// Number of device messages received so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.log.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.log.lock().is_empty()
    }
}

/// Client handle that buffers device messages into a connection log.
struct PolledClient {
    connection_id: ConnectionId,
    log: MessageLog,
    connections: ConnectionMap,
}

#[async_trait]
impl ClientHandle for PolledClient {
    async fn send(&self, value: &Value) -> Result<(), BrokerError> {
        self.log.lock().push(value.clone());
        Ok(())
    }

    async fn on_device_disconnected(&self) {
        if self.connections.remove(&self.connection_id).is_some() {
            tracing::debug!(connection_id = %self.connection_id, "polled connection dropped");
        }
    }
}

/// All live polled connections.
#[derive(Default)]
pub struct PolledSet {
    connections: ConnectionMap,
}

impl PolledSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a polled connection against a registered device.
    pub fn create(
        &self,
        devices: &DeviceRegistry,
        device_id: &str,
    ) -> Result<Arc<PolledConnection>, BrokerError> {
        let device = devices
            .get(device_id)
            .ok_or_else(|| BrokerError::DeviceNotFound(device_id.to_owned()))?;

        let id = ConnectionId::new();
        let log = MessageLog::default();
        let client_id = device.register_client(Arc::new(PolledClient {
            connection_id: id.clone(),
            log: Arc::clone(&log),
            connections: Arc::clone(&self.connections),
        }))?;

        let conn = Arc::new(PolledConnection {
            id: id.clone(),
            device: Arc::clone(&device),
            client_id,
            log,
        });
        self.connections.insert(id.clone(), Arc::clone(&conn));

        // The device may have gone away between attaching and inserting.
        if device.is_closed() {
            self.connections.remove(&id);
            return Err(BrokerError::DeviceNotFound(device_id.to_owned()));
        }

        tracing::info!(connection_id = %id, device_id, client_id, "polled connection created");
        Ok(conn)
    }

    /// Look up a connection, failing with `ConnectionNotFound`.
    pub fn get(&self, id: &str) -> Result<Arc<PolledConnection>, BrokerError> {
        self.connections
            .get(&ConnectionId::from_raw(id))
            .map(|c| Arc::clone(c.value()))
            .ok_or_else(|| BrokerError::ConnectionNotFound(id.to_owned()))
    }

    /// Forward `payload` through connection `id`.
    pub async fn forward(&self, id: &str, payload: Value) -> Result<(), BrokerError> {
        self.get(id)?.forward(payload).await
    }

    /// Read the message log of connection `id`.
    pub fn get_messages(&self, id: &str, start: i64, count: i64) -> Result<Vec<Value>, BrokerError> {
        self.get(id)?.messages(start, count)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
