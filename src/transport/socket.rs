//! Socket adapter.
//!
//! Splits a duplex byte stream into a [`SocketReader`] owned by the
//! connection's read loop and a [`SocketWriter`] shared by everyone that
//! sends on the connection. Every wait is bounded: reads by the caller's
//! readiness wait, writes by the configured write timeout.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, trace};

use crate::core::codec::FrameCodec;
use crate::error::{ProtocolError, Result};

type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// Split `stream` into its framed read and write halves
pub fn split<S>(stream: S, codec: FrameCodec, write_timeout: Duration) -> (SocketReader, SocketWriter)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let reader: BoxedRead = Box::new(read_half);
    let writer: BoxedWrite = Box::new(write_half);

    (
        SocketReader {
            inner: FramedRead::new(reader, codec),
        },
        SocketWriter {
            inner: Mutex::new(FramedWrite::new(writer, codec)),
            write_timeout,
            closed: AtomicBool::new(false),
            stalled: AtomicBool::new(false),
        },
    )
}

pub struct SocketReader {
    inner: FramedRead<BoxedRead, FrameCodec>,
}

impl SocketReader {
    /// Wait up to `wait` for the next frame body.
    ///
    /// `Ok(None)` means nothing became ready in time; the caller re-checks
    /// its own state and polls again.
    ///
    /// # Errors
    /// `ConnectionClosed` on end of stream, or the framing/I/O error.
    pub async fn read_frame(&mut self, wait: Duration) -> Result<Option<Bytes>> {
        match tokio::time::timeout(wait, self.inner.next()).await {
            Err(_) => Ok(None),
            Ok(None) => Err(ProtocolError::ConnectionClosed),
            Ok(Some(Ok(body))) => {
                trace!(bytes = body.len(), "Frame read");
                Ok(Some(body))
            }
            Ok(Some(Err(e))) => Err(e),
        }
    }
}

pub struct SocketWriter {
    inner: Mutex<FramedWrite<BoxedWrite, FrameCodec>>,
    write_timeout: Duration,
    closed: AtomicBool,
    /// A write timed out with part of a frame possibly still buffered
    stalled: AtomicBool,
}

impl SocketWriter {
    /// Write one frame body. Concurrent writers are serialized.
    ///
    /// A timed-out write leaves the writer stalled: every later write is
    /// refused with `ConnectionClosed` so the buffered frame never goes out.
    pub async fn write_frame(&self, body: &[u8]) -> Result<()> {
        if self.closed.load(Ordering::Acquire) || self.stalled.load(Ordering::Acquire) {
            return Err(ProtocolError::ConnectionClosed);
        }

        let mut sink = self.inner.lock().await;
        if self.stalled.load(Ordering::Acquire) {
            return Err(ProtocolError::ConnectionClosed);
        }
        match tokio::time::timeout(self.write_timeout, sink.send(body)).await {
            Ok(result) => result,
            Err(_) => {
                self.stalled.store(true, Ordering::Release);
                Err(ProtocolError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "frame write timed out",
                )))
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled.load(Ordering::Acquire)
    }

    /// Flush and close the write half. Later writes fail with `ConnectionClosed`.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut sink = self.inner.lock().await;
        let stalled = self.stalled.load(Ordering::Acquire);
        let result = tokio::time::timeout(self.write_timeout, async {
            if !stalled {
                let _ = SinkExt::<&[u8]>::flush(&mut *sink).await;
            }
            sink.get_mut().shutdown().await
        })
        .await;

        if let Ok(Err(e)) = result {
            debug!(error = %e, "Socket shutdown failed");
        }
    }
}
