//! Snapshot of the writable LoadCells application registers.

use crate::error::FrameError;
use crate::protocol::Message;
use crate::registers::app;
use crate::types::device::{
    DigitalInputMode, DigitalOutputMode, LOAD_CELL_CHANNELS, LoadCellChannel,
};
use crate::types::flags::EventFlags;
use crate::types::value::{RegisterValue, to_payload};

/// Every writable application register of a LoadCells board.
///
/// `Default` matches the values the firmware restores on
/// `ResetFlags::RESTORE_DEFAULT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadCellsConfiguration {
    /// Whether acquisition is running (`StartAcquisition`).
    pub acquisition: bool,
    /// Digital input 0 mode.
    pub di0_mode: DigitalInputMode,
    /// Digital output 0 mode.
    pub do0_mode: DigitalOutputMode,
    /// Pulse length in milliseconds when DO0 is in pulse mode.
    pub do0_pulse_duration: u8,
    /// Offset applied to each load cell channel.
    pub offsets: [i16; LOAD_CELL_CHANNELS],
    /// Channel feeding the threshold filter of each digital output.
    pub targets: [LoadCellChannel; LOAD_CELL_CHANNELS],
    /// Threshold of each digital output.
    pub thresholds: [i16; LOAD_CELL_CHANNELS],
    /// Time above threshold, in milliseconds, before an output rises.
    pub rising_buffers: [u16; LOAD_CELL_CHANNELS],
    /// Time below threshold, in milliseconds, before an output falls.
    pub falling_buffers: [u16; LOAD_CELL_CHANNELS],
    /// Events the device is allowed to send.
    pub enabled_events: EventFlags,
}

impl Default for LoadCellsConfiguration {
    fn default() -> Self {
        Self {
            acquisition: false,
            di0_mode: DigitalInputMode::Sync,
            do0_mode: DigitalOutputMode::ToggleEachSecond,
            do0_pulse_duration: 10,
            offsets: [0; LOAD_CELL_CHANNELS],
            targets: [LoadCellChannel::Software; LOAD_CELL_CHANNELS],
            thresholds: [0; LOAD_CELL_CHANNELS],
            rising_buffers: [0; LOAD_CELL_CHANNELS],
            falling_buffers: [0; LOAD_CELL_CHANNELS],
            enabled_events: EventFlags::LOAD_CELL_DATA
                .union(EventFlags::DI0)
                .union(EventFlags::DO0),
        }
    }
}

impl LoadCellsConfiguration {
    /// Builds the write requests that apply this configuration.
    ///
    /// `StartAcquisition` comes last so the device only starts sampling
    /// once every other register holds its new value.
    ///
    /// # Errors
    ///
    /// Returns a `FrameError` if a payload cannot be framed.
    pub fn write_requests(&self) -> Result<Vec<Message>, FrameError> {
        let mut requests = vec![
            request(app::DI0_MODE, &self.di0_mode)?,
            request(app::DO0_MODE, &self.do0_mode)?,
            request(app::DO0_PULSE_DURATION, &self.do0_pulse_duration)?,
        ];
        for channel in 0..LOAD_CELL_CHANNELS {
            let offset = channel_offset(channel);
            requests.push(request(app::OFFSET_LOAD_CELL0 + offset, &self.offsets[channel])?);
            requests.push(request(
                app::DO0_TARGET_LOAD_CELL + offset,
                &self.targets[channel],
            )?);
            requests.push(request(app::DO0_THRESHOLD + offset, &self.thresholds[channel])?);
            requests.push(request(
                app::DO0_BUFFER_RISING_EDGE + offset,
                &self.rising_buffers[channel],
            )?);
            requests.push(request(
                app::DO0_BUFFER_FALLING_EDGE + offset,
                &self.falling_buffers[channel],
            )?);
        }
        requests.push(request(app::ENABLE_EVENTS, &self.enabled_events)?);
        requests.push(request(app::START_ACQUISITION, &u8::from(self.acquisition))?);
        Ok(requests)
    }
}

/// Converts a channel index (always below 8) into a register offset.
pub(crate) fn channel_offset(channel: usize) -> u8 {
    u8::try_from(channel).unwrap_or(u8::MAX)
}

fn request<T: RegisterValue>(address: u8, value: &T) -> Result<Message, FrameError> {
    Message::write(address, T::ELEMENT, to_payload(value))
}
