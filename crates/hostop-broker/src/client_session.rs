//! Realtime client session: connect to a device, then relay until the socket
//! closes.

use std::sync::Arc;

use hostop_core::messages::{ClientMsg, ConnectMsg, DeviceInfoMsg, ErrorMsg, ForwardMsg, InfraConfig};
use hostop_core::messages::{TYPE_CONNECT, TYPE_FORWARD};
use hostop_transport::{recv_msg, send_msg, MessageSink, MessageSource};

use crate::device::Device;
use crate::realtime::RealtimeClient;
use crate::registry::DeviceRegistry;

async fn reply_error(sink: &dyn MessageSink, message: impl Into<String>) {
    let message = message.into();
    tracing::debug!(error = %message, "rejecting client message");
    if let Err(e) = send_msg(sink, &ErrorMsg::new(message)).await {
        tracing::debug!(error = %e, "failed to send error reply to client");
    }
}

/// Serve one realtime client until either side disconnects.
///
/// The first message must name a device. The client then receives the infra config and the device info, then its
/// messages are forwarded to the device tagged with its client id.
pub async fn run_client_session<S>(
    devices: &DeviceRegistry,
    infra: &InfraConfig,
    sink: Arc<dyn MessageSink>,
    mut source: S,
) where
    S: MessageSource,
{
    let connect: ConnectMsg = match recv_msg(&mut source).await {
        Ok(msg) => msg,
        Err(e) if e.is_disconnect() => return,
        Err(e) => {
            reply_error(sink.as_ref(), format!("Failed to parse message: {e}")).await;
            return;
        }
    };
    if connect.message_type != TYPE_CONNECT {
        reply_error(sink.as_ref(), "First message must be a connect message").await;
        return;
    }
    let Some(device) = devices.get(&connect.device_id) else {
        reply_error(
            sink.as_ref(),
            format!("Device not found: {}", connect.device_id),
        )
        .await;
        return;
    };

    let client_id = match device.register_client(Arc::new(RealtimeClient::new(Arc::clone(&sink)))) {
        Ok(id) => id,
        Err(e) => {
            reply_error(sink.as_ref(), e.to_string()).await;
            return;
        }
    };
    tracing::info!(device_id = %device.id(), client_id, "realtime client connected");

    let greeted = async {
        send_msg(sink.as_ref(), infra).await?;
        send_msg(sink.as_ref(), &DeviceInfoMsg::new(device.info().clone())).await
    }
    .await;
    match greeted {
        Ok(()) => relay(&device, client_id, sink.as_ref(), &mut source).await,
        Err(e) => tracing::debug!(client_id, error = %e, "client went away during greeting"),
    }

    device.unregister_client(client_id);
    tracing::info!(device_id = %device.id(), client_id, "realtime client disconnected");
}

async fn relay<S>(device: &Device, client_id: i64, sink: &dyn MessageSink, source: &mut S)
where
    S: MessageSource,
{
    loop {
        let msg: ForwardMsg = match recv_msg(source).await {
            Ok(msg) => msg,
            Err(e) if e.is_disconnect() => return,
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
        let Some(payload) = msg.payload else {
            reply_error(sink, "Missing payload").await;
            return;
        };

        let envelope = ClientMsg::new(client_id, payload).into_value();
        if let Err(e) = device.send(&envelope).await {
            tracing::debug!(device_id = %device.id(), client_id, error = %e, "relay to device failed");
            reply_error(sink, "Device disconnected").await;
        }
    }
}
