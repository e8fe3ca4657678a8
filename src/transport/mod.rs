//! Transport layer for Harp communication.
//!
//! A transport opens a byte stream to the device and hands back its read and
//! write halves. The read half is owned by the reader task, the write half is
//! shared behind a [`FrameWriter`].

pub mod reader;
pub mod serial;

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::protocol::{Message, encode};

/// Boxed read half of a transport.
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed write half of a transport.
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Trait for transport implementations.
pub trait Transport: Send + Sync {
    /// Opens the link and returns its read and write halves.
    fn open(&mut self) -> Pin<Box<dyn Future<Output = Result<(BoxReader, BoxWriter)>> + Send + '_>>;

    /// Human readable name of the link, used in errors and logs.
    fn name(&self) -> &str;
}

/// Transport over an already established byte stream.
///
/// The stream can be opened once; later calls fail with `NotConnected`.
pub struct StreamTransport<S> {
    name: String,
    stream: Option<S>,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + Sync + 'static,
{
    /// Wraps a stream.
    #[must_use]
    pub fn new(name: impl Into<String>, stream: S) -> Self {
        Self {
            name: name.into(),
            stream: Some(stream),
        }
    }
}

impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + Sync + 'static,
{
    fn open(&mut self) -> Pin<Box<dyn Future<Output = Result<(BoxReader, BoxWriter)>> + Send + '_>> {
        Box::pin(async move {
            let stream = self.stream.take().ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotConnected, "stream already consumed")
            })?;
            let (reader, writer) = tokio::io::split(stream);
            Ok((Box::new(reader) as BoxReader, Box::new(writer) as BoxWriter))
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Shared, serialised access to the write half of a transport.
#[derive(Clone)]
pub struct FrameWriter {
    inner: Arc<Mutex<BoxWriter>>,
}

impl FrameWriter {
    /// Wraps a write half.
    #[must_use]
    pub fn new(writer: BoxWriter) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
        }
    }

    /// Encodes and writes one message.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the write or flush fails.
    pub async fn send(&self, message: &Message) -> io::Result<()> {
        let frame = encode(message);
        tracing::trace!("sending frame: {}", hex::encode(&frame));

        let mut writer = self.inner.lock().await;
        writer.write_all(&frame).await?;
        writer.flush().await
    }

    /// Shuts down the write half.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the shutdown fails.
    pub async fn shutdown(&self) -> io::Result<()> {
        self.inner.lock().await.shutdown().await
    }
}

impl std::fmt::Debug for FrameWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameWriter").finish_non_exhaustive()
    }
}

pub use reader::run_reader;
pub use serial::{SerialConfig, SerialTransport, list_ports};
