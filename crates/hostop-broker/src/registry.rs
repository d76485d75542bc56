use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::device::Device;

/// Devices currently attached, keyed by device id.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: DashMap<String, Arc<Device>>,
}

impl DeviceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `device` under its id. Returns false if the id is taken;
    /// the existing registration is left untouched.
    pub fn register(&self, device: Arc<Device>) -> bool {
        match self.devices.entry(device.id().to_owned()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                tracing::info!(device_id = %device.id(), port = device.port(), "device registered");
                slot.insert(device);
                true
            }
        }
    }

    /// Remove the device with `id` and notify its clients. No-op if absent.
    pub async fn unregister(&self, id: &str) {
        if let Some((_, device)) = self.devices.remove(id) {
            Self::teardown(device).await;
        }
    }

    /// Like [`unregister`](Self::unregister), but only if `device` is still
    /// the registration for its id.
    pub async fn unregister_device(&self, device: &Arc<Device>) {
        if let Some((_, device)) = self
            .devices
            .remove_if(device.id(), |_, current| Arc::ptr_eq(current, device))
        {
            Self::teardown(device).await;
        }
    }

    async fn teardown(device: Arc<Device>) {
        tracing::info!(device_id = %device.id(), "device unregistered");
        device.disconnect_clients().await;
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Device>> {
        self.devices.get(id).map(|d| Arc::clone(d.value()))
    }

    /// Ids of all registered devices, in no particular order.
    #[must_use]
    pub fn list_ids(&self) -> Vec<String> {
        self.devices.iter().map(|d| d.key().clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::tests::CountingClient;
    use crate::testing::RecordingSink;
    use std::sync::atomic::Ordering;

    fn device(id: &str) -> Arc<Device> {
        Arc::new(Device::new(
            id,
            0,
            None,
            Arc::new(RecordingSink::default()),
        ))
    }

    #[test]
    fn duplicate_id_is_rejected_and_original_kept() {
        let reg = DeviceRegistry::new();
        let first = device("d1");
        assert!(reg.register(first.clone()));
        assert!(!reg.register(device("d1")));

        let got = reg.get("d1").unwrap();
        assert!(Arc::ptr_eq(&got, &first));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn list_ids_returns_every_device() {
        let reg = DeviceRegistry::new();
        reg.register(device("a"));
        reg.register(device("b"));
        let mut ids = reg.list_ids();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn unregister_notifies_each_client_once() {
        let reg = DeviceRegistry::new();
        let d = device("d1");
        reg.register(d.clone());

        let clients: Vec<Arc<CountingClient>> =
            (0..3).map(|_| Arc::new(CountingClient::default())).collect();
        for c in &clients {
            d.register_client(c.clone()).unwrap();
        }

        reg.unregister("d1").await;
        reg.unregister("d1").await;

        assert!(reg.get("d1").is_none());
        for c in &clients {
            assert_eq!(c.disconnects.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn unregister_unknown_is_noop() {
        let reg = DeviceRegistry::new();
        reg.unregister("ghost").await;
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn stale_session_does_not_remove_replacement() {
        let reg = DeviceRegistry::new();
        let old = device("d1");
        reg.register(old.clone());
        reg.unregister("d1").await;

        let new = device("d1");
        reg.register(new.clone());
        reg.unregister_device(&old).await;

        assert!(Arc::ptr_eq(&reg.get("d1").unwrap(), &new));
        assert!(!new.is_closed());
    }
}
