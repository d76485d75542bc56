use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use hostop_transport::MessageSink;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::BrokerError;

/// A client attached to a device.
#[async_trait]
pub trait ClientHandle: Send + Sync {
    /// Deliver a device message to the client.
    async fn send(&self, value: &Value) -> Result<(), BrokerError>;

    /// Called once when the owning device goes away.
    async fn on_device_disconnected(&self);
}

struct ClientTable {
    clients: HashMap<i64, Arc<dyn ClientHandle>>,
    closed: bool,
}

/// A registered device backend.
pub struct Device {
    id: String,
    port: u16,
    info: Value,
    sink: Arc<dyn MessageSink>,
    clients: Mutex<ClientTable>,
    next_client_id: AtomicI64,
}

impl Device {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        port: u16,
        info: Option<Value>,
        sink: Arc<dyn MessageSink>,
    ) -> Self {
        Self {
            id: id.into(),
            port,
            info: info.unwrap_or_else(|| Value::Object(Default::default())),
            sink,
            clients: Mutex::new(ClientTable {
                clients: HashMap::new(),
                closed: false,
            }),
            // 0 is reserved for "no client" on the wire.
            next_client_id: AtomicI64::new(1),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Port of the device's loopback HTTP service.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Opaque info the device sent at registration.
    #[must_use]
    pub fn info(&self) -> &Value {
        &self.info
    }

    /// Write a message to the device transport.
    pub async fn send(&self, value: &Value) -> Result<(), BrokerError> {
        self.sink.send(value).await?;
        Ok(())
    }

    /// Attach a client and return its id. Ids are never reused.
    pub fn register_client(&self, handle: Arc<dyn ClientHandle>) -> Result<i64, BrokerError> {
        let mut table = self.clients.lock();
        if table.closed {
            return Err(BrokerError::DeviceGone);
        }
        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        table.clients.insert(id, handle);
        tracing::debug!(device_id = %self.id, client_id = id, "client attached");
        Ok(id)
    }

    /// Detach a client. Returns whether it was attached.
    pub fn unregister_client(&self, client_id: i64) -> bool {
        let removed = self.clients.lock().clients.remove(&client_id).is_some();
        if removed {
            tracing::debug!(device_id = %self.id, client_id, "client detached");
        }
        removed
    }

    /// Relay a device-originated message to one attached client.
    pub async fn forward(&self, client_id: i64, value: &Value) -> Result<(), BrokerError> {
        let handle = self
            .clients
            .lock()
            .clients
            .get(&client_id)
            .cloned()
            .ok_or(BrokerError::UnknownClient(client_id))?;
        handle.send(value).await
    }

    /// Number of clients currently attached.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.lock().clients.len()
    }

    /// Whether the device has been unregistered.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.clients.lock().closed
    }

    /// Mark the device closed and notify every attached client exactly once.
    pub(crate) async fn disconnect_clients(&self) {
        let clients = {
            let mut table = self.clients.lock();
            table.closed = true;
            std::mem::take(&mut table.clients)
        };
        tracing::info!(device_id = %self.id, clients = clients.len(), "disconnecting clients");
        for (_, client) in clients {
            client.on_device_disconnected().await;
        }
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}
