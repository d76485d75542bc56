//! Length-delimited JSON framing for local stream sockets.
//!
//! Wire format: 4-byte big-endian length prefix followed by one UTF-8 JSON
//! document. A frame over the limit is reported as
//! [`TransportError::Oversized`]; the codec does not resynchronise after it,
//! so the next `recv` sees the stream as closed.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

use crate::error::{Result, TransportError};
use crate::{MessageSink, MessageSource};

fn codec(max_frame_length: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .max_frame_length(max_frame_length)
        .new_codec()
}

/// Split a byte stream into a framed sink and source.
pub fn framed_pair<S>(
    stream: S,
    max_frame_length: usize,
) -> (FramedSink<WriteHalf<S>>, FramedSource<ReadHalf<S>>)
where
    S: AsyncRead + AsyncWrite,
{
    let (read, write) = tokio::io::split(stream);
    (
        FramedSink {
            inner: Mutex::new(FramedWrite::new(write, codec(max_frame_length))),
        },
        FramedSource {
            inner: FramedRead::new(read, codec(max_frame_length)),
        },
    )
}

pub struct FramedSink<W> {
    inner: Mutex<FramedWrite<W, LengthDelimitedCodec>>,
}

#[async_trait]
impl<W> MessageSink for FramedSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&self, value: &Value) -> Result<()> {
        let frame = Bytes::from(serde_json::to_vec(value)?);
        self.inner.lock().await.send(frame).await?;
        Ok(())
    }

    async fn close(&self) {
        if let Err(e) = SinkExt::<Bytes>::close(&mut *self.inner.lock().await).await {
            tracing::debug!(error = %e, "error closing framed sink");
        }
    }
}

pub struct FramedSource<R> {
    inner: FramedRead<R, LengthDelimitedCodec>,
}

#[async_trait]
impl<R> MessageSource for FramedSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn recv(&mut self) -> Result<Value> {
        match self.inner.next().await {
            Some(Ok(frame)) => Ok(serde_json::from_slice(&frame)?),
            Some(Err(e)) if e.kind() == std::io::ErrorKind::InvalidData => {
                Err(TransportError::Oversized(e.to_string()))
            }
            Some(Err(e)) => Err(TransportError::Io(e)),
            None => Err(TransportError::Closed),
        }
    }
}
