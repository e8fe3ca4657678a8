//! Event fan-out for unsolicited register updates.
//!
//! The reader task publishes every `Event` message to the multiplexer,
//! which copies it into the bounded queue of each matching subscriber.
//! Delivery never blocks the reader: a full queue counts as a miss, and a
//! subscriber that misses too many deliveries in a row is dropped.

use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll, ready};

use futures::Stream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::protocol::Message;
use crate::types::{RegisterValue, Timestamped};

/// Default queue capacity per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Default number of consecutive misses before a subscriber is dropped.
pub const DEFAULT_MAX_MISSED_EVENTS: u32 = 16;

/// Selects which registers a subscription receives events from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFilter {
    /// Every register.
    All,
    /// A single register.
    Address(u8),
}

impl AddressFilter {
    /// Checks if a message passes this filter.
    #[must_use]
    pub const fn matches(self, message: &Message) -> bool {
        match self {
            Self::All => true,
            Self::Address(address) => message.address() == address,
        }
    }
}

struct Subscriber {
    id: u64,
    filter: AddressFilter,
    sender: mpsc::Sender<Message>,
    missed: u32,
}

#[derive(Default)]
struct SubscriberList {
    subscribers: Vec<Subscriber>,
    next_id: u64,
    closed: bool,
}

struct Inner {
    list: Mutex<SubscriberList>,
    capacity: usize,
    max_missed: u32,
}

impl Inner {
    fn list(&self) -> MutexGuard<'_, SubscriberList> {
        self.list.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fans out events to subscribers.
#[derive(Clone)]
pub struct EventMultiplexer {
    inner: Arc<Inner>,
}

impl Default for EventMultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

impl EventMultiplexer {
    /// Creates a multiplexer with the default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_EVENT_CAPACITY, DEFAULT_MAX_MISSED_EVENTS)
    }

    /// Creates a multiplexer with a per-subscriber queue `capacity` and a
    /// limit of `max_missed` consecutive misses.
    #[must_use]
    pub fn with_limits(capacity: usize, max_missed: u32) -> Self {
        Self {
            inner: Arc::new(Inner {
                list: Mutex::new(SubscriberList::default()),
                capacity: capacity.max(1),
                max_missed: max_missed.max(1),
            }),
        }
    }

    /// Subscribes to events passing `filter`.
    ///
    /// Subscribing to a closed multiplexer yields an already ended
    /// subscription.
    #[must_use]
    pub fn subscribe(&self, filter: AddressFilter) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.inner.capacity);
        let mut list = self.inner.list();
        let id = list.next_id;
        list.next_id += 1;
        if !list.closed {
            list.subscribers.push(Subscriber {
                id,
                filter,
                sender,
                missed: 0,
            });
        }
        drop(list);

        tracing::debug!("subscriber {} added for {:?}", id, filter);
        Subscription {
            id,
            filter,
            receiver,
            multiplexer: Arc::downgrade(&self.inner),
            active: true,
        }
    }

    /// Delivers an event to every matching subscriber.
    pub fn publish(&self, message: &Message) {
        let max_missed = self.inner.max_missed;
        let mut list = self.inner.list();
        list.subscribers.retain_mut(|subscriber| {
            if !subscriber.filter.matches(message) {
                return true;
            }
            match subscriber.sender.try_send(message.clone()) {
                Ok(()) => {
                    subscriber.missed = 0;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    subscriber.missed += 1;
                    if subscriber.missed >= max_missed {
                        tracing::warn!(
                            "dropping subscriber {} after {} missed events",
                            subscriber.id,
                            subscriber.missed
                        );
                        false
                    } else {
                        true
                    }
                }
                Err(TrySendError::Closed(_)) => false,
            }
        });
    }

    /// Ends every subscription and rejects new ones.
    pub fn close(&self) {
        let mut list = self.inner.list();
        list.closed = true;
        let count = list.subscribers.len();
        list.subscribers.clear();
        drop(list);

        if count > 0 {
            tracing::debug!("closed {} subscriptions", count);
        }
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.list().subscribers.len()
    }
}

impl std::fmt::Debug for EventMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventMultiplexer")
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

/// A subscription to events.
///
/// Yields events in wire order until it is unsubscribed, dropped for
/// falling behind, or the connection closes. It cannot be restarted.
pub struct Subscription {
    id: u64,
    filter: AddressFilter,
    receiver: mpsc::Receiver<Message>,
    multiplexer: Weak<Inner>,
    active: bool,
}

impl Subscription {
    /// Receives the next event.
    ///
    /// Returns `None` once the subscription has ended.
    pub async fn recv(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }

    /// Receives an event if one is queued.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.receiver.try_recv().ok()
    }

    /// Returns the filter this subscription was created with.
    #[must_use]
    pub const fn filter(&self) -> AddressFilter {
        self.filter
    }

    /// Stops receiving events. Calling it again has no effect.
    pub fn unsubscribe(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;

        if let Some(inner) = self.multiplexer.upgrade() {
            inner.list().subscribers.retain(|subscriber| subscriber.id != self.id);
        }
        self.receiver.close();
        while self.receiver.try_recv().is_ok() {}
        tracing::debug!("subscriber {} removed", self.id);
    }

    fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl Stream for Subscription {
    type Item = Message;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_recv(cx)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("filter", &self.filter)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

/// Events of one register decoded as `T`.
///
/// Messages that do not decode are logged and skipped.
pub struct EventStream<T> {
    subscription: Subscription,
    _value: PhantomData<fn() -> T>,
}

impl<T: RegisterValue> EventStream<T> {
    /// Wraps a subscription.
    #[must_use]
    pub const fn new(subscription: Subscription) -> Self {
        Self {
            subscription,
            _value: PhantomData,
        }
    }

    /// Receives the next decoded event.
    pub async fn recv(&mut self) -> Option<Timestamped<T>> {
        loop {
            let message = self.subscription.recv().await?;
            if let Some(value) = decode_event(&message) {
                return Some(value);
            }
        }
    }

    /// Stops receiving events.
    pub fn unsubscribe(&mut self) {
        self.subscription.unsubscribe();
    }

    /// Returns the untyped subscription.
    #[must_use]
    pub fn into_inner(self) -> Subscription {
        self.subscription
    }
}

fn decode_event<T: RegisterValue>(message: &Message) -> Option<Timestamped<T>> {
    let value = Timestamped::from_message(message);
    if value.is_none() {
        tracing::warn!(
            "skipping undecodable event on register {} ({:?} x {})",
            message.address(),
            message.element(),
            message.element_count()
        );
    }
    value
}

impl<T: RegisterValue> Stream for EventStream<T> {
    type Item = Timestamped<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match ready!(this.subscription.poll_recv(cx)) {
                Some(message) => {
                    if let Some(value) = decode_event(&message) {
                        return Poll::Ready(Some(value));
                    }
                }
                None => return Poll::Ready(None),
            }
        }
    }
}

impl<T> std::fmt::Debug for EventStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("subscription", &self.subscription)
            .finish()
    }
}
