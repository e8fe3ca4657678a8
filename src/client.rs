//! Main [`Device`] implementation.
//!
//! This module provides the high-level [`Device`] façade that combines the
//! transport, the command correlator and the event multiplexer into typed
//! register access for a LoadCells board.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::commands::{CommandCorrelator, DEFAULT_TIMEOUT};
use crate::error::{CommandError, ConnectionError, Error, Result};
use crate::event::{
    AddressFilter, DEFAULT_EVENT_CAPACITY, DEFAULT_MAX_MISSED_EVENTS, EventMultiplexer,
    EventStream, Subscription,
};
use crate::protocol::{DEFAULT_PORT, Message};
use crate::registers::{self, Capabilities, RegisterDescriptor, WHO_AM_I, app, common};
use crate::transport::{FrameWriter, SerialConfig, SerialTransport, Transport, run_reader};
use crate::types::configuration::channel_offset;
use crate::types::value::to_payload;
use crate::types::{
    DeviceIdentity, DeviceName, DigitalInputMode, DigitalOutputMode, DigitalOutputs, EventFlags,
    HarpVersion, LOAD_CELL_CHANNELS, LoadCellChannel, LoadCellData, LoadCellsConfiguration,
    RegisterValue, ResetFlags, Timestamped,
};

/// Default time allowed for the device to answer the identify read.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Connection state of a [`Device`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceState {
    /// No link to the device.
    Disconnected,
    /// Link opening, identity not yet confirmed.
    Connecting,
    /// The device answered as a LoadCells board; reading its details.
    Identified,
    /// Ready for register access.
    Active,
}

/// Configuration for a [`Device`].
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Serial link settings. Ignored when a custom transport is supplied.
    pub serial: SerialConfig,
    /// Time allowed for the identify read.
    pub connect_timeout: Duration,
    /// Time allowed for each command.
    pub command_timeout: Duration,
    /// Queue capacity of each event subscription.
    pub event_capacity: usize,
    /// Consecutive missed events before a subscription is dropped.
    pub max_missed_events: u32,
    /// Port id stamped on outgoing requests.
    pub host_port: u8,
}

impl DeviceConfig {
    /// Creates a configuration for the given serial port with default settings.
    #[must_use]
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            serial: SerialConfig::new(port),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            command_timeout: DEFAULT_TIMEOUT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            max_missed_events: DEFAULT_MAX_MISSED_EVENTS,
            host_port: DEFAULT_PORT,
        }
    }

    /// Sets the baud rate.
    #[must_use]
    pub fn baud_rate(mut self, rate: u32) -> Self {
        self.serial = self.serial.baud_rate(rate);
        self
    }

    /// Sets the serial link settings.
    #[must_use]
    pub fn serial_config(mut self, serial: SerialConfig) -> Self {
        self.serial = serial;
        self
    }

    /// Sets the identify timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the command timeout.
    #[must_use]
    pub const fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Sets the queue capacity of each subscription.
    #[must_use]
    pub const fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Sets how many consecutive misses drop a subscription.
    #[must_use]
    pub const fn max_missed_events(mut self, count: u32) -> Self {
        self.max_missed_events = count;
        self
    }

    /// Sets the port id of outgoing requests.
    #[must_use]
    pub const fn host_port(mut self, port: u8) -> Self {
        self.host_port = port;
        self
    }
}

struct Session {
    correlator: CommandCorrelator,
    events: EventMultiplexer,
    writer: FrameWriter,
    reader_task: JoinHandle<()>,
}

/// Client for a Harp LoadCells device.
pub struct Device<T> {
    transport: T,
    config: DeviceConfig,
    state: Arc<watch::Sender<DeviceState>>,
    session: Option<Session>,
    identity: Option<DeviceIdentity>,
}

impl Device<SerialTransport> {
    /// Creates a new device for a serial port.
    ///
    /// # Arguments
    ///
    /// * `port` - Serial port path (e.g., "/dev/ttyUSB0")
    ///
    /// # Returns
    ///
    /// A new device (not yet connected).
    #[must_use]
    pub fn serial(port: impl Into<String>) -> Self {
        Self::with_config(DeviceConfig::new(port))
    }

    /// Creates a new serial device with custom configuration.
    #[must_use]
    pub fn with_config(config: DeviceConfig) -> Self {
        let transport = SerialTransport::new(config.serial.clone());
        Self::with_transport(transport, config)
    }
}

/// Connects to the LoadCells board on `port`.
///
/// # Errors
///
/// Returns a `ConnectionError` if the port cannot be opened or the device
/// does not identify as a LoadCells board.
pub async fn connect(port: impl Into<String>) -> Result<Device<SerialTransport>> {
    let mut device = Device::serial(port);
    device.connect().await?;
    Ok(device)
}

impl<T: Transport + 'static> Device<T> {
    /// Creates a device over any transport.
    #[must_use]
    pub fn with_transport(transport: T, config: DeviceConfig) -> Self {
        let (state, _) = watch::channel(DeviceState::Disconnected);
        Self {
            transport,
            config,
            state: Arc::new(state),
            session: None,
            identity: None,
        }
    }

    /// Connects to the device and identifies it.
    ///
    /// This will:
    /// 1. Open the transport and start the reader task
    /// 2. Read `WhoAmI` within the connect timeout and check it is 1232
    /// 3. Read the device name, hardware and firmware versions
    /// 4. Read the serial number if the device has one
    ///
    /// # Errors
    ///
    /// Returns `AlreadyConnected` if the device is active, otherwise a
    /// `ConnectionError` describing which step failed.
    pub async fn connect(&mut self) -> Result<DeviceIdentity> {
        if self.state() == DeviceState::Active {
            return Err(Error::AlreadyConnected);
        }
        // A session whose link dropped on its own
        self.teardown().await;

        let port = self.transport.name().to_owned();
        self.state.send_replace(DeviceState::Connecting);
        tracing::info!("connecting to {}", port);

        let (reader, writer) = match self.transport.open().await {
            Ok(halves) => halves,
            Err(e) => {
                self.state.send_replace(DeviceState::Disconnected);
                return Err(ConnectionError::PortUnavailable {
                    port,
                    reason: e.to_string(),
                }
                .into());
            }
        };

        let writer = FrameWriter::new(writer);
        let correlator = CommandCorrelator::new(writer.clone());
        let events =
            EventMultiplexer::with_limits(self.config.event_capacity, self.config.max_missed_events);

        let reader_task = {
            let correlator = correlator.clone();
            let events = events.clone();
            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                if let Err(e) = run_reader(reader, correlator, events).await {
                    tracing::error!("reader stopped: {}", e);
                }
                state.send_replace(DeviceState::Disconnected);
                tracing::info!("device disconnected");
            })
        };
        self.session = Some(Session {
            correlator,
            events,
            writer,
            reader_task,
        });

        match self.identify(&port).await {
            Ok(identity) => {
                tracing::info!(
                    "connected to {} on {} (hardware {}, firmware {})",
                    identity.name,
                    port,
                    identity.hardware_version,
                    identity.firmware_version
                );
                self.identity = Some(identity.clone());
                self.state.send_replace(DeviceState::Active);
                Ok(identity)
            }
            Err(e) => {
                tracing::warn!("identify on {} failed: {}", port, e);
                self.teardown().await;
                Err(e)
            }
        }
    }

    async fn identify(&self, port: &str) -> Result<DeviceIdentity> {
        let timeout = self.config.connect_timeout;
        let who_am_i = match self.read_register::<u16>(common::WHO_AM_I, timeout).await {
            Ok(value) => value.value,
            Err(Error::Command(CommandError::Timeout { .. })) => {
                return Err(ConnectionError::IdentifyTimeout {
                    port: port.to_owned(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                }
                .into());
            }
            Err(e) => return Err(identify_error(port, e)),
        };
        if who_am_i != WHO_AM_I {
            return Err(ConnectionError::UnexpectedDevice {
                port: port.to_owned(),
                expected: WHO_AM_I,
                found: who_am_i,
            }
            .into());
        }
        self.state.send_replace(DeviceState::Identified);

        let name = self
            .read_value::<DeviceName>(common::DEVICE_NAME)
            .await
            .map_err(|e| identify_error(port, e))?;
        let hardware_version = self
            .read_version(common::HARDWARE_VERSION_HIGH, common::HARDWARE_VERSION_LOW)
            .await
            .map_err(|e| identify_error(port, e))?;
        let firmware_version = self
            .read_version(common::FIRMWARE_VERSION_HIGH, common::FIRMWARE_VERSION_LOW)
            .await
            .map_err(|e| identify_error(port, e))?;

        // Older units have no serial number register
        let serial_number = match self.read_value::<u16>(common::SERIAL_NUMBER).await {
            Ok(serial_number) => Some(serial_number),
            Err(e) => {
                tracing::debug!("no serial number on {}: {}", port, e);
                None
            }
        };

        Ok(DeviceIdentity {
            who_am_i,
            name: name.0,
            hardware_version,
            firmware_version,
            serial_number,
        })
    }

    async fn read_version(&self, major: u8, minor: u8) -> Result<HarpVersion> {
        Ok(HarpVersion::new(
            self.read_value::<u8>(major).await?,
            self.read_value::<u8>(minor).await?,
        ))
    }

    /// Disconnects from the device.
    ///
    /// Pending commands fail with `Disconnected` and every subscription ends.
    pub async fn disconnect(&mut self) {
        if self.session.is_some() {
            tracing::info!("disconnecting from {}", self.transport.name());
        }
        self.teardown().await;
    }

    async fn teardown(&mut self) {
        if let Some(session) = self.session.take() {
            session.reader_task.abort();
            session.correlator.fail_all();
            session.events.close();
            if let Err(e) = session.writer.shutdown().await {
                tracing::debug!("closing write half: {}", e);
            }
        }
        self.identity = None;
        self.state.send_replace(DeviceState::Disconnected);
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn state(&self) -> DeviceState {
        *self.state.borrow()
    }

    /// Returns a receiver that observes state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<DeviceState> {
        self.state.subscribe()
    }

    /// Returns true if the device is ready for register access.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == DeviceState::Active
    }

    /// Returns the identity captured by the last successful connect.
    #[must_use]
    pub const fn identity(&self) -> Option<&DeviceIdentity> {
        self.identity.as_ref()
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &DeviceConfig {
        &self.config
    }

    fn session(&self) -> Result<&Session> {
        self.session.as_ref().ok_or(Error::NotConnected)
    }

    fn active_session(&self) -> Result<&Session> {
        if self.state() != DeviceState::Active {
            return Err(Error::NotConnected);
        }
        self.session()
    }

    async fn issue(&self, request: Message, timeout: Duration) -> Result<Message> {
        let session = self.session()?;
        let request = request.with_port(self.config.host_port);
        Ok(session.correlator.issue(request, timeout).await?)
    }

    async fn read_register<V: RegisterValue>(
        &self,
        address: u8,
        timeout: Duration,
    ) -> Result<Timestamped<V>> {
        let descriptor = checked::<V>(address, Capabilities::READ, "read")?;
        let reply = self
            .issue(Message::read(address, descriptor.element_type), timeout)
            .await?;
        Timestamped::from_message(&reply).ok_or_else(|| mismatch(descriptor, "payload does not decode"))
    }

    async fn read_value<V: RegisterValue>(&self, address: u8) -> Result<V> {
        self.read_register(address, self.config.command_timeout)
            .await
            .map(|value| value.value)
    }

    /// Reads a register.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected`, `UnknownRegister`, `Unsupported` or
    /// `TypeMismatch` before anything is sent, or the `CommandError` of the
    /// read itself.
    pub async fn read<V: RegisterValue>(&self, address: u8) -> Result<V> {
        self.active_session()?;
        self.read_value(address).await
    }

    /// Reads a register together with the device timestamp of the reply.
    ///
    /// # Errors
    ///
    /// Same as [`Device::read`].
    pub async fn read_timestamped<V: RegisterValue>(&self, address: u8) -> Result<Timestamped<V>> {
        self.active_session()?;
        self.read_register(address, self.config.command_timeout).await
    }

    /// Writes a register and returns the device's acknowledgement.
    ///
    /// # Errors
    ///
    /// Same as [`Device::read`]; a rejected write is reported as
    /// `CommandError::DeviceRejected`.
    pub async fn write<V: RegisterValue>(&self, address: u8, value: V) -> Result<Message> {
        self.active_session()?;
        let descriptor = checked::<V>(address, Capabilities::WRITE, "write")?;
        let request = Message::write(address, descriptor.element_type, to_payload(&value))?;
        self.issue(request, self.config.command_timeout).await
    }

    /// Subscribes to the events of one register, decoded as `V`.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected`, `UnknownRegister`, `Unsupported` if the
    /// register never sends events, or `TypeMismatch`.
    pub fn events<V: RegisterValue>(&self, address: u8) -> Result<EventStream<V>> {
        let session = self.active_session()?;
        checked::<V>(address, Capabilities::EVENT, "events")?;
        Ok(EventStream::new(
            session.events.subscribe(AddressFilter::Address(address)),
        ))
    }

    /// Subscribes to raw events.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected`, or for a single-address filter
    /// `UnknownRegister`/`Unsupported` as [`Device::events`] does.
    pub fn subscribe(&self, filter: AddressFilter) -> Result<Subscription> {
        let session = self.active_session()?;
        if let AddressFilter::Address(address) = filter {
            let descriptor = registers::lookup(address)?;
            if !descriptor.supports(Capabilities::EVENT) {
                return Err(unsupported(descriptor, "events"));
            }
        }
        Ok(session.events.subscribe(filter))
    }

    /// Reads the latest sample of every load cell channel.
    pub async fn load_cell_data(&self) -> Result<LoadCellData> {
        self.read(app::LOAD_CELL_DATA).await
    }

    /// Starts acquisition.
    pub async fn start_acquisition(&self) -> Result<()> {
        self.write(app::START_ACQUISITION, 1u8).await.map(drop)
    }

    /// Stops acquisition.
    pub async fn stop_acquisition(&self) -> Result<()> {
        self.write(app::START_ACQUISITION, 0u8).await.map(drop)
    }

    /// Reads which events the device sends.
    pub async fn enabled_events(&self) -> Result<EventFlags> {
        self.read(app::ENABLE_EVENTS).await
    }

    /// Sets which events the device sends.
    pub async fn set_enabled_events(&self, events: EventFlags) -> Result<()> {
        self.write(app::ENABLE_EVENTS, events).await.map(drop)
    }

    /// Drives the given digital outputs high.
    pub async fn set_outputs(&self, outputs: DigitalOutputs) -> Result<()> {
        self.write(app::OUTPUT_SET, outputs).await.map(drop)
    }

    /// Drives the given digital outputs low.
    pub async fn clear_outputs(&self, outputs: DigitalOutputs) -> Result<()> {
        self.write(app::OUTPUT_CLEAR, outputs).await.map(drop)
    }

    /// Toggles the given digital outputs.
    pub async fn toggle_outputs(&self, outputs: DigitalOutputs) -> Result<()> {
        self.write(app::OUTPUT_TOGGLE, outputs).await.map(drop)
    }

    /// Reads the level of every digital output.
    pub async fn output_state(&self) -> Result<DigitalOutputs> {
        self.read(app::OUTPUT_STATE).await
    }

    /// Sends a command to the `ResetDevice` register.
    pub async fn reset_device(&self, flags: ResetFlags) -> Result<()> {
        tracing::info!("resetting device with flags {:#04x}", flags.bits());
        self.write(common::RESET_DEVICE, flags).await.map(drop)
    }

    /// Reads every writable application register.
    pub async fn read_configuration(&self) -> Result<LoadCellsConfiguration> {
        let mut config = LoadCellsConfiguration {
            acquisition: self.read::<u8>(app::START_ACQUISITION).await? != 0,
            di0_mode: self.read::<DigitalInputMode>(app::DI0_MODE).await?,
            do0_mode: self.read::<DigitalOutputMode>(app::DO0_MODE).await?,
            do0_pulse_duration: self.read(app::DO0_PULSE_DURATION).await?,
            enabled_events: self.read(app::ENABLE_EVENTS).await?,
            ..LoadCellsConfiguration::default()
        };
        for channel in 0..LOAD_CELL_CHANNELS {
            let offset = channel_offset(channel);
            config.offsets[channel] = self.read(app::OFFSET_LOAD_CELL0 + offset).await?;
            config.targets[channel] = self
                .read::<LoadCellChannel>(app::DO0_TARGET_LOAD_CELL + offset)
                .await?;
            config.thresholds[channel] = self.read(app::DO0_THRESHOLD + offset).await?;
            config.rising_buffers[channel] = self.read(app::DO0_BUFFER_RISING_EDGE + offset).await?;
            config.falling_buffers[channel] =
                self.read(app::DO0_BUFFER_FALLING_EDGE + offset).await?;
        }
        Ok(config)
    }

    /// Writes every application register in `config`.
    ///
    /// With `persist` the device is then told to save its registers to
    /// non-volatile memory.
    pub async fn write_configuration(
        &self,
        config: &LoadCellsConfiguration,
        persist: bool,
    ) -> Result<()> {
        self.active_session()?;
        for request in config.write_requests()? {
            self.issue(request, self.config.command_timeout).await?;
        }
        if persist {
            self.reset_device(ResetFlags::SAVE).await?;
        }
        Ok(())
    }
}

impl<T> Drop for Device<T> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.reader_task.abort();
            session.correlator.fail_all();
            session.events.close();
        }
    }
}

impl<T> std::fmt::Debug for Device<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("state", &*self.state.borrow())
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

/// Resolves `address` and checks that `V` can use it for `capability`.
fn checked<V: RegisterValue>(
    address: u8,
    capability: Capabilities,
    operation: &'static str,
) -> Result<&'static RegisterDescriptor> {
    let descriptor = registers::lookup(address)?;
    if !descriptor.supports(capability) {
        return Err(unsupported(descriptor, operation));
    }
    V::check(descriptor).map_err(|reason| mismatch(descriptor, reason))?;
    Ok(descriptor)
}

const fn unsupported(descriptor: &RegisterDescriptor, operation: &'static str) -> Error {
    Error::Unsupported {
        address: descriptor.address,
        name: descriptor.name,
        operation,
    }
}

const fn mismatch(descriptor: &RegisterDescriptor, reason: &'static str) -> Error {
    Error::TypeMismatch {
        address: descriptor.address,
        name: descriptor.name,
        element: descriptor.element_type,
        count: descriptor.element_count,
        reason,
    }
}

fn identify_error(port: &str, source: Error) -> Error {
    ConnectionError::Identify {
        port: port.to_owned(),
        source: Box::new(source),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MessageType, Timestamp};
    use crate::sim::{SIM_LOAD_CELLS, SimDevice, SimOptions};
    use crate::transport::StreamTransport;
    use futures::StreamExt;
    use tokio::io::DuplexStream;

    async fn connected() -> (Device<StreamTransport<DuplexStream>>, SimDevice) {
        let (transport, sim) = SimDevice::spawn();
        let mut device = Device::with_transport(transport, DeviceConfig::new("sim"));
        device.connect().await.unwrap();
        (device, sim)
    }

    async fn wait_for_state(device: &Device<StreamTransport<DuplexStream>>, state: DeviceState) {
        let mut rx = device.watch_state();
        while *rx.borrow_and_update() != state {
            rx.changed().await.unwrap();
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = DeviceConfig::new("/dev/ttyACM0");
        assert_eq!(config.serial.port, "/dev/ttyACM0");
        assert_eq!(config.serial.baud_rate, 1_000_000);
        assert_eq!(config.connect_timeout, Duration::from_millis(500));
        assert_eq!(config.command_timeout, Duration::from_secs(1));
        assert_eq!(config.event_capacity, 256);
        assert_eq!(config.max_missed_events, 16);
        assert_eq!(config.host_port, 255);
    }

    #[test]
    fn test_config_builder() {
        let config = DeviceConfig::new("COM3")
            .baud_rate(115_200)
            .command_timeout(Duration::from_millis(200))
            .event_capacity(8)
            .max_missed_events(2);
        assert_eq!(config.serial.baud_rate, 115_200);
        assert_eq!(config.command_timeout, Duration::from_millis(200));
        assert_eq!(config.event_capacity, 8);
        assert_eq!(config.max_missed_events, 2);
    }

    #[tokio::test]
    async fn test_connect_identifies_device() {
        let (device, _sim) = connected().await;
        let identity = device.identity().unwrap();
        assert_eq!(identity.who_am_i, 1232);
        assert_eq!(identity.name, "LoadCells");
        assert_eq!(identity.hardware_version, HarpVersion::new(1, 0));
        assert_eq!(identity.firmware_version, HarpVersion::new(2, 1));
        assert_eq!(identity.serial_number, Some(42));
        assert_eq!(device.state(), DeviceState::Active);
        assert!(device.is_connected());
    }

    #[tokio::test]
    async fn test_read_load_cell_data() {
        let (device, _sim) = connected().await;
        let data = device.load_cell_data().await.unwrap();
        assert_eq!(data.channels, SIM_LOAD_CELLS);

        let raw: Vec<i16> = device.read(app::LOAD_CELL_DATA).await.unwrap();
        assert_eq!(raw.len(), 8);

        let stamped = device
            .read_timestamped::<u16>(common::WHO_AM_I)
            .await
            .unwrap();
        assert_eq!(stamped.value, 1232);
        assert!(stamped.timestamp.is_some());
    }

    #[tokio::test]
    async fn test_enable_events_write_ack() {
        let (device, sim) = connected().await;
        let ack = device
            .write(app::ENABLE_EVENTS, EventFlags::LOAD_CELL_DATA)
            .await
            .unwrap();
        assert_eq!(ack.message_type(), MessageType::Write);
        assert_eq!(ack.address(), 90);
        assert_eq!(ack.payload().as_ref(), &[0x01]);
        assert_eq!(sim.register(app::ENABLE_EVENTS).as_ref(), &[0x01]);
        assert_eq!(device.enabled_events().await.unwrap(), EventFlags::LOAD_CELL_DATA);
    }

    #[tokio::test]
    async fn test_event_reaches_only_matching_subscription() {
        let (device, sim) = connected().await;
        let mut load_cells = device.events::<LoadCellData>(app::LOAD_CELL_DATA).unwrap();
        let mut inputs = device
            .subscribe(AddressFilter::Address(app::INPUT_EVENT))
            .unwrap();

        sim.emit(
            Message::from_values(MessageType::Event, app::LOAD_CELL_DATA, &[5i16; 8])
                .unwrap()
                .with_timestamp(Timestamp::new(9, 0)),
        );

        let event = load_cells.next().await.unwrap();
        assert_eq!(event.value.channels, [5; 8]);
        assert_eq!(event.timestamp, Some(Timestamp::new(9, 0)));
        assert!(inputs.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_events_do_not_disturb_commands() {
        let (device, sim) = connected().await;
        let mut everything = device.subscribe(AddressFilter::All).unwrap();

        sim.emit(Message::from_values(MessageType::Event, app::LOAD_CELL_DATA, &[1i16; 8]).unwrap());
        let data = device.load_cell_data().await.unwrap();
        assert_eq!(data.channels, SIM_LOAD_CELLS);

        let event = everything.recv().await.unwrap();
        assert_eq!(event.message_type(), MessageType::Event);
        assert_eq!(event.values::<i16>(), Some(vec![1; 8]));
    }

    #[tokio::test]
    async fn test_operations_before_connect() {
        let (transport, _sim) = SimDevice::spawn();
        let device = Device::with_transport(transport, DeviceConfig::new("sim"));
        assert_eq!(device.state(), DeviceState::Disconnected);
        assert!(matches!(
            device.read::<u16>(common::WHO_AM_I).await,
            Err(Error::NotConnected)
        ));
        assert!(matches!(
            device.write(app::ENABLE_EVENTS, EventFlags::ALL).await,
            Err(Error::NotConnected)
        ));
        assert!(matches!(
            device.subscribe(AddressFilter::All),
            Err(Error::NotConnected)
        ));
        assert!(matches!(
            device.events::<LoadCellData>(app::LOAD_CELL_DATA),
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_unexpected_device_rejected() {
        let (transport, _sim) = SimDevice::spawn_with(SimOptions {
            who_am_i: 1234,
            ..SimOptions::default()
        });
        let mut device = Device::with_transport(transport, DeviceConfig::new("sim"));
        let result = device.connect().await;
        assert!(matches!(
            result,
            Err(Error::Connection(ConnectionError::UnexpectedDevice {
                expected: 1232,
                found: 1234,
                ..
            }))
        ));
        assert_eq!(device.state(), DeviceState::Disconnected);
        assert!(device.identity().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_device_times_out() {
        let (transport, sim) = SimDevice::spawn_with(SimOptions {
            silent: true,
            ..SimOptions::default()
        });
        let mut device = Device::with_transport(transport, DeviceConfig::new("sim"));
        let result = device.connect().await;
        assert!(matches!(
            result,
            Err(Error::Connection(ConnectionError::IdentifyTimeout { timeout_ms: 500, .. }))
        ));
        assert_eq!(device.state(), DeviceState::Disconnected);
        assert_eq!(sim.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_serial_number_tolerated() {
        let (transport, _sim) = SimDevice::spawn_with(SimOptions {
            serial_number: None,
            ..SimOptions::default()
        });
        let mut device = Device::with_transport(transport, DeviceConfig::new("sim"));
        let identity = device.connect().await.unwrap();
        assert_eq!(identity.serial_number, None);
        assert_eq!(device.state(), DeviceState::Active);
    }

    #[tokio::test]
    async fn test_second_connect_rejected() {
        let (mut device, _sim) = connected().await;
        assert!(matches!(device.connect().await, Err(Error::AlreadyConnected)));
        assert!(device.is_connected());
    }

    #[tokio::test]
    async fn test_register_checks() {
        let (device, sim) = connected().await;
        let sent = sim.requests().len();

        assert!(matches!(
            device.read::<u8>(36).await,
            Err(Error::UnknownRegister(crate::error::UnknownRegister(36)))
        ));
        assert!(matches!(
            device
                .write(app::LOAD_CELL_DATA, LoadCellData::default())
                .await,
            Err(Error::Unsupported { address: 33, operation: "write", .. })
        ));
        assert!(matches!(
            device.read::<u8>(app::LOAD_CELL_DATA).await,
            Err(Error::TypeMismatch { address: 33, count: 8, .. })
        ));
        assert!(matches!(
            device.events::<u8>(app::START_ACQUISITION),
            Err(Error::Unsupported { operation: "events", .. })
        ));
        assert!(matches!(
            device.subscribe(AddressFilter::Address(36)),
            Err(Error::UnknownRegister(_))
        ));
        assert_eq!(sim.requests().len(), sent);
    }

    #[tokio::test]
    async fn test_concurrent_commands() {
        let (device, _sim) = connected().await;
        let (data, outputs, events) = tokio::join!(
            device.load_cell_data(),
            device.output_state(),
            device.enabled_events()
        );
        assert_eq!(data.unwrap().channels, SIM_LOAD_CELLS);
        assert_eq!(outputs.unwrap(), DigitalOutputs::NONE);
        assert_eq!(events.unwrap().bits(), 0x07);
    }

    #[tokio::test]
    async fn test_disconnect_ends_subscriptions() {
        let (mut device, _sim) = connected().await;
        let mut subscription = device.subscribe(AddressFilter::All).unwrap();

        device.disconnect().await;
        assert_eq!(device.state(), DeviceState::Disconnected);
        assert!(subscription.recv().await.is_none());
        assert!(matches!(
            device.load_cell_data().await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_link_loss_ends_subscriptions() {
        let (device, sim) = connected().await;
        let mut subscription = device.events::<LoadCellData>(app::LOAD_CELL_DATA).unwrap();

        sim.hang_up();
        assert!(subscription.recv().await.is_none());
        wait_for_state(&device, DeviceState::Disconnected).await;
        assert!(matches!(
            device.load_cell_data().await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_reconnect_after_link_loss() {
        let (transport, sim) = SimDevice::spawn();
        let mut device = Device::with_transport(transport, DeviceConfig::new("sim"));
        device.connect().await.unwrap();
        sim.hang_up();
        wait_for_state(&device, DeviceState::Disconnected).await;

        // The stream transport can only be opened once
        let result = device.connect().await;
        assert!(matches!(
            result,
            Err(Error::Connection(ConnectionError::PortUnavailable { .. }))
        ));
        assert_eq!(device.state(), DeviceState::Disconnected);
    }

    #[tokio::test]
    async fn test_acquisition_and_outputs() {
        let (device, sim) = connected().await;
        device.start_acquisition().await.unwrap();
        assert_eq!(sim.register(app::START_ACQUISITION).as_ref(), &[1]);
        device.stop_acquisition().await.unwrap();
        assert_eq!(sim.register(app::START_ACQUISITION).as_ref(), &[0]);

        device
            .set_outputs(DigitalOutputs::DO0.union(DigitalOutputs::DO8))
            .await
            .unwrap();
        device.clear_outputs(DigitalOutputs::DO0).await.unwrap();
        device.toggle_outputs(DigitalOutputs::DO1).await.unwrap();
        assert_eq!(
            device.output_state().await.unwrap(),
            DigitalOutputs::DO1.union(DigitalOutputs::DO8)
        );
    }

    #[tokio::test]
    async fn test_configuration_round_trip() {
        let (device, sim) = connected().await;
        let mut config = device.read_configuration().await.unwrap();
        assert_eq!(config, LoadCellsConfiguration::default());

        config.di0_mode = DigitalInputMode::RiseStartAcquisition;
        config.do0_mode = DigitalOutputMode::Pulse;
        config.offsets[2] = -15;
        config.targets[4] = LoadCellChannel::Channel6;
        config.thresholds[7] = 1200;
        config.rising_buffers[0] = 30;
        config.falling_buffers[5] = 60;
        config.enabled_events = EventFlags::LOAD_CELL_DATA;
        device.write_configuration(&config, true).await.unwrap();

        assert_eq!(device.read_configuration().await.unwrap(), config);
        let save = sim
            .requests()
            .into_iter()
            .rev()
            .find(|request| request.address() == common::RESET_DEVICE)
            .unwrap();
        assert_eq!(save.payload().as_ref(), &[0x04]);
    }

    #[tokio::test]
    async fn test_device_name_register() {
        let (device, _sim) = connected().await;
        device
            .write(common::DEVICE_NAME, DeviceName("Rig 3".into()))
            .await
            .unwrap();
        let name: DeviceName = device.read(common::DEVICE_NAME).await.unwrap();
        assert_eq!(name.to_string(), "Rig 3");
    }
}
