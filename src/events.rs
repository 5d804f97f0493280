//! Notification fan-out.
//!
//! Nodes publish events (a mixer input finishing, a circuit breaker tripping)
//! into an [`EventHub`]. Every subscriber gets its own `rtrb` queue, so
//! publishing never calls back into user code and can safely happen from the
//! audio path.

use parking_lot::Mutex;
use rtrb::{Consumer, Producer, RingBuffer};

/// Default per-subscriber queue length.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Multi-subscriber event queue.
pub struct EventHub<T> {
    subscribers: Mutex<Vec<Producer<T>>>,
}

impl<T: Clone + Send> EventHub<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Register a subscriber. Events published from now on are queued on the
    /// returned consumer; once it is full, further events for it are dropped.
    pub fn subscribe(&self, capacity: usize) -> Consumer<T> {
        let (producer, consumer) = RingBuffer::new(capacity.max(1));
        self.subscribers.lock().push(producer);
        consumer
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|p| !p.is_abandoned());
        subscribers.len()
    }

    /// Queue `event` for every live subscriber.
    ///
    /// Must not be called while holding a lock a subscriber might also take.
    pub fn publish(&self, event: T) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|p| !p.is_abandoned());
        for producer in subscribers.iter_mut() {
            if producer.push(event.clone()).is_err() {
                tracing::warn!("event queue full, dropping event");
            }
        }
    }
}

impl<T: Clone + Send> Default for EventHub<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subscriber_sees_each_event() {
        let hub = EventHub::new();
        let mut a = hub.subscribe(4);
        let mut b = hub.subscribe(4);
        hub.publish(7u32);
        hub.publish(8u32);
        assert_eq!(a.pop(), Ok(7));
        assert_eq!(a.pop(), Ok(8));
        assert_eq!(b.pop(), Ok(7));
        assert_eq!(b.pop(), Ok(8));
        assert!(a.pop().is_err());
    }

    #[test]
    fn dropped_subscribers_are_forgotten() {
        let hub = EventHub::new();
        let a = hub.subscribe(1);
        let _b = hub.subscribe(1);
        drop(a);
        hub.publish(1u8);
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let hub = EventHub::new();
        let mut a = hub.subscribe(1);
        hub.publish(1u8);
        hub.publish(2u8);
        assert_eq!(a.pop(), Ok(1));
        assert!(a.pop().is_err());
    }
}
