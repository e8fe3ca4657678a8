//! Read loop for a Harp connection.

use std::io;

use tokio::io::AsyncReadExt;

use crate::commands::CommandCorrelator;
use crate::event::EventMultiplexer;
use crate::protocol::{FrameDecoder, Message, MessageType};
use crate::registers;
use crate::transport::BoxReader;

/// Reads frames until the transport closes, dispatching each message.
///
/// Events go to the multiplexer; replies go to the correlator. When the
/// loop ends every pending command fails with `Disconnected` and every
/// subscription is closed.
///
/// # Errors
///
/// Returns the read error that ended the loop. A clean end of stream
/// returns `Ok(())`.
pub async fn run_reader(
    mut reader: BoxReader,
    correlator: CommandCorrelator,
    events: EventMultiplexer,
) -> io::Result<()> {
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 1024];

    let result = loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                tracing::debug!("transport closed");
                break Ok(());
            }
            Ok(n) => n,
            Err(e) => {
                tracing::error!("transport read error: {}", e);
                break Err(e);
            }
        };

        tracing::trace!("received {} bytes: {}", n, hex::encode(&buf[..n]));
        decoder.feed(&buf[..n]);

        loop {
            match decoder.decode() {
                Ok(Some(message)) => dispatch(message, &correlator, &events),
                Ok(None) => break,
                Err(e) => tracing::trace!("resync: {}", e),
            }
        }
    };

    if decoder.resyncs() > 0 {
        tracing::debug!("reader skipped {} bytes while resyncing", decoder.resyncs());
    }
    correlator.fail_all();
    events.close();
    result
}

/// Routes one decoded message.
pub(crate) fn dispatch(message: Message, correlator: &CommandCorrelator, events: &EventMultiplexer) {
    if let Err(mismatch) = registers::validate(&message) {
        tracing::warn!(
            "dropping {:?} on register {}: {:?}",
            message.message_type(),
            message.address(),
            mismatch
        );
        return;
    }

    if message.message_type() == MessageType::Event {
        events.publish(&message);
    } else if let Some(unclaimed) = correlator.complete(message) {
        tracing::debug!(
            "discarding unclaimed {:?} on register {}",
            unclaimed.message_type(),
            unclaimed.address()
        );
    }
}
