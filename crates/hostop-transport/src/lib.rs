//! JSON message transports.
//!
//! A connection is split into a [`MessageSink`] that any task may write to
//! and a [`MessageSource`] owned by the single task reading the session.

pub mod error;
pub mod framed;
pub mod unix;
pub mod ws;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

pub use error::{Result, TransportError};
pub use framed::{framed_pair, FramedSink, FramedSource};
pub use unix::bind_device_socket;
pub use ws::{ws_pair, WsSink, WsSource};

/// Write half of a JSON transport. Safe to share between tasks.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, value: &Value) -> Result<()>;

    /// Close the underlying connection. Further sends fail.
    async fn close(&self);
}

/// Read half of a JSON transport.
#[async_trait]
pub trait MessageSource: Send {
    /// Wait for the next complete message.
    async fn recv(&mut self) -> Result<Value>;
}

/// Serialize `msg` and send it.
pub async fn send_msg<S, T>(sink: &S, msg: &T) -> Result<()>
where
    S: MessageSink + ?Sized,
    T: Serialize + ?Sized,
{
    let value = serde_json::to_value(msg)?;
    sink.send(&value).await
}

/// Receive a message and decode it as `T`.
///
/// A message that arrives but does not decode yields [`TransportError::Decode`];
/// the connection itself stays usable.
pub async fn recv_msg<S, T>(source: &mut S) -> Result<T>
where
    S: MessageSource + ?Sized,
    T: DeserializeOwned,
{
    let value = source.recv().await?;
    Ok(serde_json::from_value(value)?)
}
