//! Serial/USB transport implementation.
//!
//! Harp devices enumerate as USB serial ports running at 1 Mbaud.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio_serial::{SerialPortBuilderExt, SerialPortType};

use crate::error::{Error, Result};
use crate::transport::{BoxReader, BoxWriter, Transport};

/// Default baud rate for Harp devices.
pub const DEFAULT_BAUD_RATE: u32 = 1_000_000;

/// Default delay between opening the port and draining it.
pub const DEFAULT_CONNECTION_DELAY: Duration = Duration::from_millis(50);

/// Default window for discarding bytes left over from a previous session.
pub const DEFAULT_DRAIN_WINDOW: Duration = Duration::from_millis(100);

/// Configuration for serial transport.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0" or "COM3").
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Delay after opening before the port is drained.
    pub connection_delay: Duration,
    /// How long to discard stale input after opening.
    pub drain_window: Duration,
}

impl SerialConfig {
    /// Creates a new serial configuration with default settings.
    #[must_use]
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            connection_delay: DEFAULT_CONNECTION_DELAY,
            drain_window: DEFAULT_DRAIN_WINDOW,
        }
    }

    /// Sets the baud rate.
    #[must_use]
    pub const fn baud_rate(mut self, rate: u32) -> Self {
        self.baud_rate = rate;
        self
    }

    /// Sets the connection delay.
    #[must_use]
    pub const fn connection_delay(mut self, delay: Duration) -> Self {
        self.connection_delay = delay;
        self
    }

    /// Sets the drain window. `Duration::ZERO` disables draining.
    #[must_use]
    pub const fn drain_window(mut self, window: Duration) -> Self {
        self.drain_window = window;
        self
    }
}

/// Serial transport for Harp communication.
#[derive(Debug, Clone)]
pub struct SerialTransport {
    config: SerialConfig,
}

impl SerialTransport {
    /// Creates a new serial transport with the given configuration.
    #[must_use]
    pub const fn new(config: SerialConfig) -> Self {
        Self { config }
    }

    /// Creates a new serial transport for the given port with default settings.
    #[must_use]
    pub fn with_port(port: impl Into<String>) -> Self {
        Self::new(SerialConfig::new(port))
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &SerialConfig {
        &self.config
    }
}

impl Transport for SerialTransport {
    fn open(&mut self) -> Pin<Box<dyn Future<Output = Result<(BoxReader, BoxWriter)>> + Send + '_>> {
        Box::pin(async move {
            tracing::info!(
                "opening serial port {} at {} baud",
                self.config.port,
                self.config.baud_rate
            );

            let mut stream = tokio_serial::new(&self.config.port, self.config.baud_rate)
                .open_native_async()
                .map_err(Error::Serial)?;

            tokio::time::sleep(self.config.connection_delay).await;

            // Drop replies and events still queued from a previous session
            let mut buf = [0u8; 1024];
            let mut total_drained = 0usize;
            let drain_deadline = tokio::time::Instant::now() + self.config.drain_window;
            while tokio::time::Instant::now() < drain_deadline {
                match tokio::time::timeout(Duration::from_millis(20), stream.read(&mut buf)).await {
                    Ok(Ok(n)) if n > 0 => total_drained += n,
                    _ => tokio::time::sleep(Duration::from_millis(5)).await,
                }
            }
            if total_drained > 0 {
                tracing::debug!("drained {} stale bytes from {}", total_drained, self.config.port);
            }

            let (reader, writer) = tokio::io::split(stream);
            Ok((Box::new(reader) as BoxReader, Box::new(writer) as BoxWriter))
        })
    }

    fn name(&self) -> &str {
        &self.config.port
    }
}

/// Lists serial ports that may host a Harp device.
///
/// On macOS only the `cu.*` call-out devices are returned and Bluetooth
/// ports are skipped.
///
/// # Errors
///
/// Returns an error if the port list cannot be retrieved.
pub fn list_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports().map_err(Error::Serial)?;
    Ok(ports
        .into_iter()
        .filter(|p| !matches!(p.port_type, SerialPortType::BluetoothPort))
        .map(|p| p.port_name)
        .filter(|name| keep_port_name(name))
        .collect())
}

fn keep_port_name(name: &str) -> bool {
    if cfg!(target_os = "macos") {
        name.contains("cu.") && !name.contains("Bluetooth")
    } else {
        true
    }
}
