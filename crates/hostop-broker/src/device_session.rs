//! Device-side session: registration followed by a relay loop.

use std::sync::Arc;

use hostop_core::messages::{DeviceMsg, ErrorMsg, ForwardMsg, InfraConfig, RegisterMsg};
use hostop_core::messages::{TYPE_FORWARD, TYPE_REGISTER};
use hostop_transport::{recv_msg, send_msg, MessageSink, MessageSource, TransportError};

use crate::device::Device;
use crate::error::BrokerError;
use crate::registry::DeviceRegistry;

async fn reply_error(sink: &dyn MessageSink, message: impl Into<String>) {
    let message = message.into();
    tracing::warn!(error = %message, "rejecting device message");
    if let Err(e) = send_msg(sink, &ErrorMsg::new(message)).await {
        tracing::debug!(error = %e, "failed to send error reply to device");
    }
}

/// Run one device connection to completion.
///
/// Registration failures reply with an error and return without touching the
/// registry. Once registered, the device stays registered until the
/// connection drops or it sends a malformed message.
pub async fn run_device_session<S>(
    devices: &DeviceRegistry,
    infra: &InfraConfig,
    sink: Arc<dyn MessageSink>,
    mut source: S,
) where
    S: MessageSource,
{
    let register: RegisterMsg = match recv_msg(&mut source).await {
        Ok(msg) => msg,
        Err(e) if e.is_disconnect() => {
            tracing::debug!(error = %e, "device connection closed before registering");
            return;
        }
        Err(e) => {
            reply_error(sink.as_ref(), format!("Failed to parse message: {e}")).await;
            return;
        }
    };

    if register.message_type != TYPE_REGISTER {
        reply_error(
            sink.as_ref(),
            "First message must be a registration message",
        )
        .await;
        return;
    }
    if register.device_id.is_empty() {
        reply_error(sink.as_ref(), "Missing device_id").await;
        return;
    }

    let device = Arc::new(Device::new(
        register.device_id.clone(),
        register.device_port,
        register.device_info,
        Arc::clone(&sink),
    ));
    if !devices.register(Arc::clone(&device)) {
        reply_error(
            sink.as_ref(),
            format!("Device id already taken: {}", register.device_id),
        )
        .await;
        return;
    }

    match send_msg(sink.as_ref(), infra).await {
        Ok(()) => relay(&device, sink.as_ref(), &mut source).await,
        Err(e) => tracing::info!(device_id = %device.id(), error = %e, "failed to send config to device"),
    }

    devices.unregister_device(&device).await;
    sink.close().await;
}

async fn relay<S>(device: &Device, sink: &dyn MessageSink, source: &mut S)
where
    S: MessageSource,
{
    loop {
        let msg: ForwardMsg = match recv_msg(source).await {
            Ok(msg) => msg,
            Err(TransportError::Closed) => {
                tracing::info!(device_id = %device.id(), "device disconnected");
                return;
            }
            Err(e) if e.is_disconnect() => {
                tracing::info!(device_id = %device.id(), error = %e, "device transport failed");
                return;
            }
            Err(e) => {
                reply_error(sink, format!("Failed to parse message: {e}")).await;
                return;
            }
        };

        if msg.message_type != TYPE_FORWARD {
            reply_error(
                sink,
                format!("Unrecognized message type: {}", msg.message_type),
            )
            .await;
            return;
        }
        if msg.client_id == 0 {
            reply_error(sink, "Missing or invalid client_id").await;
            return;
        }
        let Some(payload) = msg.payload else {
            reply_error(sink, "Missing payload").await;
            return;
        };

        let envelope = DeviceMsg::new(payload).into_value();
        if let Err(e) = device.forward(msg.client_id, &envelope).await {
            tracing::debug!(device_id = %device.id(), client_id = msg.client_id, error = %e, "relay to client failed");
            reply_error(sink, BrokerError::UnknownClient(msg.client_id).to_string()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::tests::CountingClient;
    use crate::device::ClientHandle;
    use async_trait::async_trait;
    use hostop_transport::{framed_pair, FramedSink, FramedSource};
    use serde_json::{json, Value};
    use std::sync::atomic::Ordering;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

    type Peer = (FramedSink<WriteHalf<DuplexStream>>, FramedSource<ReadHalf<DuplexStream>>);

    fn start(devices: Arc<DeviceRegistry>) -> (Peer, tokio::task::JoinHandle<()>) {
        start_with_limit(devices, 1 << 20)
    }

    fn start_with_limit(
        devices: Arc<DeviceRegistry>,
        max_frame: usize,
    ) -> (Peer, tokio::task::JoinHandle<()>) {
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let (sink, source) = framed_pair(ours, max_frame);
        let infra = InfraConfig::from_urls(["stun:example.org"]);
        let task = tokio::spawn(async move {
            run_device_session(&devices, &infra, Arc::new(sink), source).await;
        });
        (framed_pair(theirs, 1 << 20), task)
    }

    async fn register(peer: &mut Peer, id: &str) -> Value {
        peer.0
            .send(&json!({"message_type": "register", "device_id": id, "device_port": 8443}))
            .await
            .unwrap();
        peer.1.recv().await.unwrap()
    }

    #[tokio::test]
    async fn registers_and_receives_config() {
        let devices = Arc::new(DeviceRegistry::new());
        let (mut peer, task) = start(devices.clone());

        let config = register(&mut peer, "d1").await;
        assert_eq!(config["message_type"], "config");
        assert_eq!(config["ice_servers"][0]["urls"][0], "stun:example.org");
        let device = devices.get("d1").unwrap();
        assert_eq!(device.port(), 8443);
        assert_eq!(device.info(), &json!({}));

        drop(peer);
        task.await.unwrap();
        assert!(devices.get("d1").is_none());
    }

    #[tokio::test]
    async fn wrong_first_message_is_rejected() {
        let devices = Arc::new(DeviceRegistry::new());
        let (mut peer, task) = start(devices.clone());

        peer.0
            .send(&json!({"message_type": "forward", "device_id": "d1"}))
            .await
            .unwrap();
        let reply = peer.1.recv().await.unwrap();
        assert!(reply["error"].as_str().unwrap().contains("registration"));

        task.await.unwrap();
        assert!(devices.is_empty());
    }

    #[tokio::test]
    async fn missing_device_id_is_rejected() {
        let devices = Arc::new(DeviceRegistry::new());
        let (mut peer, task) = start(devices.clone());

        peer.0
            .send(&json!({"message_type": "register"}))
            .await
            .unwrap();
        assert_eq!(peer.1.recv().await.unwrap(), json!({"error": "Missing device_id"}));
        task.await.unwrap();
        assert!(devices.is_empty());
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected_and_original_survives() {
        let devices = Arc::new(DeviceRegistry::new());
        let (mut first, _first_task) = start(devices.clone());
        register(&mut first, "d1").await;
        let original = devices.get("d1").unwrap();

        let (mut second, second_task) = start(devices.clone());
        let reply = register(&mut second, "d1").await;
        assert!(reply["error"].as_str().unwrap().contains("already taken"));
        second_task.await.unwrap();

        assert!(Arc::ptr_eq(&devices.get("d1").unwrap(), &original));
    }

    #[tokio::test]
    async fn forwards_to_attached_client() {
        let devices = Arc::new(DeviceRegistry::new());
        let (mut peer, _task) = start(devices.clone());
        register(&mut peer, "d1").await;

        let client = Arc::new(CountingClient::default());
        let client_id = devices.get("d1").unwrap().register_client(client.clone()).unwrap();

        peer.0
            .send(&json!({"message_type": "forward", "client_id": client_id, "payload": {"sdp": "answer"}}))
            .await
            .unwrap();
        // Unknown client produces a reply, which also proves the first message was handled.
        peer.0
            .send(&json!({"message_type": "forward", "client_id": 99, "payload": 1}))
            .await
            .unwrap();
        assert_eq!(
            peer.1.recv().await.unwrap(),
            json!({"error": "Client disconnected: 99"})
        );

        assert_eq!(
            client.received.lock().as_slice(),
            &[json!({"message_type": "device_msg", "payload": {"sdp": "answer"}})]
        );
    }

    #[tokio::test]
    async fn malformed_forward_ends_session_and_notifies_clients() {
        let devices = Arc::new(DeviceRegistry::new());
        let (mut peer, task) = start(devices.clone());
        register(&mut peer, "d1").await;

        let client = Arc::new(CountingClient::default());
        devices.get("d1").unwrap().register_client(client.clone()).unwrap();

        peer.0
            .send(&json!({"message_type": "forward", "client_id": 0, "payload": 1}))
            .await
            .unwrap();
        assert_eq!(
            peer.1.recv().await.unwrap(),
            json!({"error": "Missing or invalid client_id"})
        );

        task.await.unwrap();
        assert!(devices.get("d1").is_none());
        assert_eq!(client.disconnects.load(Ordering::SeqCst), 1);
    }

    /// Client whose socket is already gone.
    struct GoneClient;

    #[async_trait]
    impl ClientHandle for GoneClient {
        async fn send(&self, _value: &Value) -> Result<(), BrokerError> {
            Err(BrokerError::Transport(TransportError::Closed))
        }

        async fn on_device_disconnected(&self) {}
    }

    #[tokio::test]
    async fn failed_relay_is_reported_to_the_device() {
        let devices = Arc::new(DeviceRegistry::new());
        let (mut peer, _task) = start(devices.clone());
        register(&mut peer, "d1").await;

        let client_id = devices
            .get("d1")
            .unwrap()
            .register_client(Arc::new(GoneClient))
            .unwrap();
        peer.0
            .send(&json!({"message_type": "forward", "client_id": client_id, "payload": "x"}))
            .await
            .unwrap();

        let reply = tokio::time::timeout(std::time::Duration::from_secs(5), peer.1.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            reply,
            json!({"error": format!("Client disconnected: {client_id}")})
        );
        assert!(devices.get("d1").is_some());
    }

    #[tokio::test]
    async fn oversized_message_gets_error_reply() {
        let devices = Arc::new(DeviceRegistry::new());
        let (mut peer, task) = start_with_limit(devices.clone(), 256);
        register(&mut peer, "d1").await;

        let client = Arc::new(CountingClient::default());
        devices.get("d1").unwrap().register_client(client.clone()).unwrap();

        peer.0
            .send(&json!({"message_type": "forward", "client_id": 1, "payload": "x".repeat(1024)}))
            .await
            .unwrap();

        let reply = peer.1.recv().await.unwrap();
        assert!(
            reply["error"].as_str().unwrap().contains("too large"),
            "got {reply}"
        );
        task.await.unwrap();
        assert!(devices.get("d1").is_none());
        assert_eq!(client.disconnects.load(Ordering::SeqCst), 1);
        assert!(client.received.lock().is_empty());
    }
}
