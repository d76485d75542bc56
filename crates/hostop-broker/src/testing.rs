//! In-memory transport doubles shared by the unit tests.

use async_trait::async_trait;
use hostop_transport::{MessageSink, Result, TransportError};
use parking_lot::Mutex;
use serde_json::Value;

#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<Value>>,
    closed: Mutex<bool>,
}

impl RecordingSink {
    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock()
    }
}

#[async_trait]
impl MessageSink for RecordingSink {
    async fn send(&self, value: &Value) -> Result<()> {
        if *self.closed.lock() {
            return Err(TransportError::Closed);
        }
        self.sent.lock().push(value.clone());
        Ok(())
    }

    async fn close(&self) {
        *self.closed.lock() = true;
    }
}
