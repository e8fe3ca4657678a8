//! In-memory LoadCells device for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::protocol::{FrameDecoder, Message, MessageType, Timestamp, encode};
use crate::registers::{self, CATALOG, WHO_AM_I, app, common};
use crate::transport::StreamTransport;
use crate::types::value::to_payload;
use crate::types::{DeviceName, DigitalOutputs, LoadCellData};

pub(crate) const SIM_LOAD_CELLS: [i16; 8] = [100, -200, 300, -400, 500, -600, 700, -800];

#[derive(Debug, Clone)]
pub(crate) struct SimOptions {
    pub who_am_i: u16,
    pub serial_number: Option<u16>,
    pub silent: bool,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            who_am_i: WHO_AM_I,
            serial_number: Some(42),
            silent: false,
        }
    }
}

type Registers = Arc<Mutex<HashMap<u8, Bytes>>>;

pub(crate) struct SimDevice {
    inject: mpsc::UnboundedSender<Message>,
    registers: Registers,
    requests: Arc<Mutex<Vec<Message>>>,
    task: JoinHandle<()>,
}

impl SimDevice {
    /// Starts a device with default options.
    pub fn spawn() -> (StreamTransport<DuplexStream>, Self) {
        Self::spawn_with(SimOptions::default())
    }

    pub fn spawn_with(options: SimOptions) -> (StreamTransport<DuplexStream>, Self) {
        init_tracing();
        let (host, device) = tokio::io::duplex(4096);
        let (inject, inject_rx) = mpsc::unbounded_channel();
        let registers = Arc::new(Mutex::new(initial_registers(&options)));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let task = tokio::spawn(run(
            device,
            options,
            Arc::clone(&registers),
            Arc::clone(&requests),
            inject_rx,
        ));
        (
            StreamTransport::new("sim", host),
            Self {
                inject,
                registers,
                requests,
                task,
            },
        )
    }

    /// Sends an unsolicited event to the host.
    pub fn emit(&self, message: Message) {
        self.inject.send(message).unwrap();
    }

    pub fn register(&self, address: u8) -> Bytes {
        self.registers.lock().unwrap()[&address].clone()
    }

    pub fn requests(&self) -> Vec<Message> {
        self.requests.lock().unwrap().clone()
    }

    /// Drops the link as if the cable was pulled.
    pub fn hang_up(&self) {
        self.task.abort();
    }
}

impl Drop for SimDevice {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn initial_registers(options: &SimOptions) -> HashMap<u8, Bytes> {
    let mut registers: HashMap<u8, Bytes> = CATALOG
        .iter()
        .map(|descriptor| (descriptor.address, Bytes::from(vec![0; descriptor.payload_len()])))
        .collect();
    let mut set = |address: u8, payload: Vec<u8>| {
        registers.insert(address, Bytes::from(payload));
    };

    set(common::WHO_AM_I, to_payload(&options.who_am_i));
    set(common::HARDWARE_VERSION_HIGH, vec![1]);
    set(common::HARDWARE_VERSION_LOW, vec![0]);
    set(common::FIRMWARE_VERSION_HIGH, vec![2]);
    set(common::FIRMWARE_VERSION_LOW, vec![1]);
    set(common::DEVICE_NAME, to_payload(&DeviceName("LoadCells".into())));
    if let Some(serial_number) = options.serial_number {
        set(common::SERIAL_NUMBER, to_payload(&serial_number));
    }
    set(
        app::LOAD_CELL_DATA,
        to_payload(&LoadCellData {
            channels: SIM_LOAD_CELLS,
        }),
    );
    set(app::DO0_MODE, vec![1]);
    set(app::DO0_PULSE_DURATION, vec![10]);
    for channel in 0..8 {
        set(app::DO0_TARGET_LOAD_CELL + channel, vec![8]);
    }
    set(app::ENABLE_EVENTS, vec![0x07]);
    registers
}

async fn run(
    stream: DuplexStream,
    options: SimOptions,
    registers: Registers,
    requests: Arc<Mutex<Vec<Message>>>,
    mut inject: mpsc::UnboundedReceiver<Message>,
) {
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 512];
    let mut seconds = 0u32;

    loop {
        tokio::select! {
            read = reader.read(&mut buf) => {
                let n = match read {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                decoder.feed(&buf[..n]);
                while let Ok(Some(request)) = decoder.decode() {
                    requests.lock().unwrap().push(request.clone());
                    if options.silent {
                        continue;
                    }
                    seconds += 1;
                    let reply = respond(&request, &options, &registers)
                        .with_timestamp(Timestamp::new(seconds, 0));
                    if writer.write_all(&encode(&reply)).await.is_err() {
                        return;
                    }
                }
            }
            Some(event) = inject.recv() => {
                if writer.write_all(&encode(&event)).await.is_err() {
                    return;
                }
            }
        }
    }
}

fn respond(request: &Message, options: &SimOptions, registers: &Registers) -> Message {
    let address = request.address();
    let Ok(descriptor) = registers::lookup(address) else {
        return request.with_type(error_kind(request.message_type()));
    };
    let mut registers = registers.lock().unwrap();

    match request.message_type() {
        MessageType::Read => {
            if address == common::SERIAL_NUMBER && options.serial_number.is_none() {
                return Message::new(MessageType::ReadError, address, descriptor.element_type, Bytes::new())
                    .unwrap();
            }
            Message::new(
                MessageType::Read,
                address,
                descriptor.element_type,
                registers[&address].clone(),
            )
            .unwrap()
        }
        MessageType::Write => {
            if registers::validate(request).is_err() {
                return request.with_type(MessageType::WriteError);
            }
            let payload = request.payload().clone();
            apply_output_command(&mut registers, address, &payload);
            registers.insert(address, payload);
            request.with_type(MessageType::Write)
        }
        other => request.with_type(error_kind(other)),
    }
}

fn error_kind(message_type: MessageType) -> MessageType {
    match message_type {
        MessageType::Write => MessageType::WriteError,
        _ => MessageType::ReadError,
    }
}

fn apply_output_command(registers: &mut HashMap<u8, Bytes>, address: u8, payload: &[u8]) {
    use crate::types::RegisterValue;

    let Some(bits) = DigitalOutputs::decode(payload) else {
        return;
    };
    let Some(mut state) = DigitalOutputs::decode(&registers[&app::OUTPUT_STATE]) else {
        return;
    };
    match address {
        app::OUTPUT_SET => state.insert(bits),
        app::OUTPUT_CLEAR => state.remove(bits),
        app::OUTPUT_TOGGLE => state = DigitalOutputs::from_bits(state.bits() ^ bits.bits()),
        _ => return,
    }
    registers.insert(app::OUTPUT_STATE, Bytes::from(to_payload(&state)));
}
