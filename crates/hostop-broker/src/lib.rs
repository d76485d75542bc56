//! Device registry and signaling broker.
//!
//! Devices attach over a local socket and are tracked in a [`DeviceRegistry`].
//! Clients reach a device either over a realtime socket ([`client_session`])
//! or by HTTP polling ([`PolledSet`]). The broker relays payloads opaquely.

pub mod client_session;
pub mod device;
pub mod device_session;
pub mod error;
pub mod polled;
pub mod proxy;
pub mod realtime;
pub mod registry;

#[cfg(test)]
mod testing;

pub use device::{ClientHandle, Device};
pub use error::BrokerError;
pub use polled::{PolledConnection, PolledSet};
pub use proxy::{DeviceFileProxy, ProxiedResponse};
pub use realtime::RealtimeClient;
pub use registry::DeviceRegistry;
