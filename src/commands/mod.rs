//! Command correlation for Harp register access.
//!
//! A command is a `Read` or `Write` request for one register. It is
//! answered by the next reply of the same kind for the same address:
//! `Read`/`ReadError` answer a read, `Write`/`WriteError` answer a write.
//! Events never answer anything. At most one command per address is in
//! flight at any time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::CommandError;
use crate::protocol::{Message, MessageType};
use crate::transport::FrameWriter;

/// Default command timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

type Completion = oneshot::Sender<Result<Message, CommandError>>;

struct PendingOperation {
    id: u64,
    expected: MessageType,
    completion: Completion,
}

#[derive(Default)]
struct PendingTable {
    operations: HashMap<u8, PendingOperation>,
    next_id: u64,
    closed: bool,
}

struct Inner {
    pending: Mutex<PendingTable>,
    writer: FrameWriter,
}

/// Matches outgoing commands with their replies.
///
/// Cloning is cheap; all clones share the same pending table.
#[derive(Clone)]
pub struct CommandCorrelator {
    inner: Arc<Inner>,
}

impl CommandCorrelator {
    /// Creates a correlator that sends requests through `writer`.
    #[must_use]
    pub fn new(writer: FrameWriter) -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: Mutex::new(PendingTable::default()),
                writer,
            }),
        }
    }

    fn table(&self) -> MutexGuard<'_, PendingTable> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Sends a request and waits for its reply.
    ///
    /// Dropping the returned future withdraws the command; a reply that
    /// arrives afterwards is discarded.
    ///
    /// Replies carry no sequence number. A reply that arrives after a
    /// timeout but once a new command for the same address and kind is in
    /// flight completes that new command.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` unless the request is a `Read` or `Write`
    /// - `Busy` if a command for the address is already in flight (nothing is sent)
    /// - `Transport` if the request cannot be written
    /// - `Timeout` if no reply arrives in time
    /// - `DeviceRejected` if the device answers with an error reply
    /// - `Disconnected` if the connection drops first
    pub async fn issue(&self, request: Message, timeout: Duration) -> Result<Message, CommandError> {
        let expected = request.message_type();
        if !matches!(expected, MessageType::Read | MessageType::Write) {
            return Err(CommandError::InvalidRequest(expected));
        }
        let address = request.address();

        let (tx, rx) = oneshot::channel();
        let id = {
            let mut table = self.table();
            if table.closed {
                return Err(CommandError::Disconnected);
            }
            if table.operations.contains_key(&address) {
                return Err(CommandError::Busy { address });
            }
            let id = table.next_id;
            table.next_id += 1;
            table.operations.insert(
                address,
                PendingOperation {
                    id,
                    expected,
                    completion: tx,
                },
            );
            id
        };
        let _guard = PendingGuard {
            correlator: self,
            address,
            id,
        };

        tracing::debug!("issuing {:?} on register {}", expected, address);
        self.inner
            .writer
            .send(&request)
            .await
            .map_err(CommandError::Transport)?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CommandError::Disconnected),
            Err(_) => {
                tracing::debug!("{:?} on register {} timed out", expected, address);
                Err(CommandError::Timeout {
                    address,
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }

    /// Completes the pending command a reply answers.
    ///
    /// Returns the message back if nothing claimed it.
    pub fn complete(&self, message: Message) -> Option<Message> {
        let Some(kind) = message.message_type().command_kind() else {
            return Some(message);
        };
        let address = message.address();

        let operation = {
            let mut table = self.table();
            let claimed = table
                .operations
                .get(&address)
                .is_some_and(|operation| operation.expected == kind);
            if !claimed {
                return Some(message);
            }
            table.operations.remove(&address)
        };
        let Some(operation) = operation else {
            return Some(message);
        };

        let result = if message.message_type().is_error() {
            Err(CommandError::DeviceRejected {
                address,
                payload: message.payload().clone(),
            })
        } else {
            Ok(message)
        };
        if operation.completion.send(result).is_err() {
            tracing::debug!("reply on register {} arrived after the caller left", address);
        }
        None
    }

    /// Fails every pending command with `Disconnected` and rejects new ones.
    pub fn fail_all(&self) {
        let operations: Vec<PendingOperation> = {
            let mut table = self.table();
            table.closed = true;
            table.operations.drain().map(|(_, operation)| operation).collect()
        };
        if !operations.is_empty() {
            tracing::debug!("failing {} pending commands", operations.len());
        }
        for operation in operations {
            let _ = operation.completion.send(Err(CommandError::Disconnected));
        }
    }

    /// Number of commands currently in flight.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.table().operations.len()
    }
}

impl std::fmt::Debug for CommandCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandCorrelator")
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

/// Removes a pending command when its `issue` future ends or is dropped.
struct PendingGuard<'a> {
    correlator: &'a CommandCorrelator,
    address: u8,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut table = self.correlator.table();
        if table
            .operations
            .get(&self.address)
            .is_some_and(|operation| operation.id == self.id)
        {
            table.operations.remove(&self.address);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ElementType;
    use crate::registers::app;
    use tokio::io::{AsyncReadExt, DuplexStream};

    fn correlator() -> (CommandCorrelator, DuplexStream) {
        let (host, device) = tokio::io::duplex(256);
        let (_, writer) = tokio::io::split(host);
        (CommandCorrelator::new(FrameWriter::new(Box::new(writer))), device)
    }

    fn spawn_read(
        correlator: &CommandCorrelator,
        address: u8,
        timeout: Duration,
    ) -> tokio::task::JoinHandle<Result<Message, CommandError>> {
        let correlator = correlator.clone();
        tokio::spawn(async move {
            correlator
                .issue(Message::read(address, ElementType::S16), timeout)
                .await
        })
    }

    async fn read_request(device: &mut DuplexStream) -> [u8; 6] {
        let mut buf = [0u8; 6];
        device.read_exact(&mut buf).await.unwrap();
        buf
    }

    fn load_cell_reply(message_type: MessageType) -> Message {
        Message::from_values(message_type, app::LOAD_CELL_DATA, &[7i16; 8]).unwrap()
    }

    #[tokio::test]
    async fn test_issue_resolves_with_reply() {
        let (correlator, mut device) = correlator();
        let task = spawn_read(&correlator, app::LOAD_CELL_DATA, DEFAULT_TIMEOUT);
        assert_eq!(read_request(&mut device).await[2], app::LOAD_CELL_DATA);

        let reply = load_cell_reply(MessageType::Read);
        assert!(correlator.complete(reply.clone()).is_none());
        assert_eq!(task.await.unwrap().unwrap(), reply);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_sends_nothing() {
        let (correlator, mut device) = correlator();
        let _first = spawn_read(&correlator, app::LOAD_CELL_DATA, DEFAULT_TIMEOUT);
        read_request(&mut device).await;

        let second = correlator
            .issue(Message::read(app::LOAD_CELL_DATA, ElementType::S16), DEFAULT_TIMEOUT)
            .await;
        assert!(matches!(second, Err(CommandError::Busy { address }) if address == app::LOAD_CELL_DATA));

        let mut buf = [0u8; 1];
        let more = tokio::time::timeout(Duration::from_millis(10), device.read(&mut buf)).await;
        assert!(more.is_err(), "busy command must not write any bytes");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_late_reply_discarded() {
        let (correlator, mut device) = correlator();
        let task = spawn_read(&correlator, app::LOAD_CELL_DATA, Duration::from_millis(50));
        read_request(&mut device).await;

        let result = task.await.unwrap();
        assert!(matches!(
            result,
            Err(CommandError::Timeout { address, timeout_ms: 50 }) if address == app::LOAD_CELL_DATA
        ));
        assert_eq!(correlator.pending_count(), 0);

        let late = load_cell_reply(MessageType::Read);
        assert_eq!(correlator.complete(late.clone()), Some(late));

        // The address is free again
        let task = spawn_read(&correlator, app::LOAD_CELL_DATA, DEFAULT_TIMEOUT);
        read_request(&mut device).await;
        let reply = load_cell_reply(MessageType::Read);
        assert!(correlator.complete(reply.clone()).is_none());
        assert_eq!(task.await.unwrap().unwrap(), reply);
    }

    #[tokio::test]
    async fn test_cancellation_clears_pending() {
        let (correlator, mut device) = correlator();
        let task = spawn_read(&correlator, app::LOAD_CELL_DATA, DEFAULT_TIMEOUT);
        read_request(&mut device).await;
        assert_eq!(correlator.pending_count(), 1);

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert_eq!(correlator.pending_count(), 0);

        let late = load_cell_reply(MessageType::Read);
        assert!(correlator.complete(late).is_some());
    }

    #[tokio::test]
    async fn test_error_reply_rejects() {
        let (correlator, mut device) = correlator();
        let task = spawn_read(&correlator, app::LOAD_CELL_DATA, DEFAULT_TIMEOUT);
        read_request(&mut device).await;

        assert!(correlator.complete(load_cell_reply(MessageType::ReadError)).is_none());
        let result = task.await.unwrap();
        assert!(matches!(
            result,
            Err(CommandError::DeviceRejected { address, ref payload })
                if address == app::LOAD_CELL_DATA && payload.len() == 16
        ));
    }

    #[tokio::test]
    async fn test_write_error_rejects_write() {
        let (correlator, mut device) = correlator();
        let request =
            Message::from_values(MessageType::Write, app::ENABLE_EVENTS, &[0x07u8]).unwrap();
        let task = {
            let correlator = correlator.clone();
            tokio::spawn(async move { correlator.issue(request, DEFAULT_TIMEOUT).await })
        };
        let mut frame = [0u8; 7];
        device.read_exact(&mut frame).await.unwrap();
        assert_eq!(frame[0], MessageType::Write.to_byte());

        // A ReadError for the same address answers reads only
        let read_error =
            Message::from_values(MessageType::ReadError, app::ENABLE_EVENTS, &[0x07u8]).unwrap();
        assert_eq!(correlator.complete(read_error.clone()), Some(read_error));

        let rejection =
            Message::from_values(MessageType::WriteError, app::ENABLE_EVENTS, &[0x07u8]).unwrap();
        assert!(correlator.complete(rejection).is_none());
        assert!(matches!(
            task.await.unwrap(),
            Err(CommandError::DeviceRejected { address, ref payload })
                if address == app::ENABLE_EVENTS && payload[..] == [0x07]
        ));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_reply_completes_reissued_command() {
        let (correlator, mut device) = correlator();
        let first = spawn_read(&correlator, app::LOAD_CELL_DATA, Duration::from_millis(50));
        read_request(&mut device).await;
        assert!(matches!(first.await.unwrap(), Err(CommandError::Timeout { .. })));

        let second = spawn_read(&correlator, app::LOAD_CELL_DATA, DEFAULT_TIMEOUT);
        read_request(&mut device).await;

        // The reply to the first read cannot be told apart from the second's
        let late = load_cell_reply(MessageType::Read);
        assert!(correlator.complete(late.clone()).is_none());
        assert_eq!(second.await.unwrap().unwrap(), late);
    }

    #[tokio::test]
    async fn test_events_and_other_kinds_do_not_complete() {
        let (correlator, mut device) = correlator();
        let task = spawn_read(&correlator, app::LOAD_CELL_DATA, DEFAULT_TIMEOUT);
        read_request(&mut device).await;

        let event = load_cell_reply(MessageType::Event);
        assert_eq!(correlator.complete(event.clone()), Some(event));
        let ack = load_cell_reply(MessageType::Write);
        assert_eq!(correlator.complete(ack.clone()), Some(ack));
        let other = Message::from_values(MessageType::Read, app::INPUT_EVENT, &[1u8]).unwrap();
        assert_eq!(correlator.complete(other.clone()), Some(other));
        assert_eq!(correlator.pending_count(), 1);

        let reply = load_cell_reply(MessageType::Read);
        assert!(correlator.complete(reply.clone()).is_none());
        assert_eq!(task.await.unwrap().unwrap(), reply);
    }

    #[tokio::test]
    async fn test_fail_all_disconnects() {
        let (correlator, mut device) = correlator();
        let task = spawn_read(&correlator, app::LOAD_CELL_DATA, DEFAULT_TIMEOUT);
        read_request(&mut device).await;

        correlator.fail_all();
        assert!(matches!(task.await.unwrap(), Err(CommandError::Disconnected)));
        assert_eq!(correlator.pending_count(), 0);

        let after = correlator
            .issue(Message::read(app::INPUT_EVENT, ElementType::U8), DEFAULT_TIMEOUT)
            .await;
        assert!(matches!(after, Err(CommandError::Disconnected)));
    }

    #[tokio::test]
    async fn test_only_read_and_write_are_commands() {
        let (correlator, _device) = correlator();
        let event = load_cell_reply(MessageType::Event);
        let result = correlator.issue(event, DEFAULT_TIMEOUT).await;
        assert!(matches!(
            result,
            Err(CommandError::InvalidRequest(MessageType::Event))
        ));
    }

    #[tokio::test]
    async fn test_write_failure_is_transport_error() {
        let (correlator, device) = correlator();
        drop(device);

        let result = correlator
            .issue(Message::read(app::LOAD_CELL_DATA, ElementType::S16), DEFAULT_TIMEOUT)
            .await;
        assert!(matches!(result, Err(CommandError::Transport(_))));
        assert_eq!(correlator.pending_count(), 0);
    }
}
