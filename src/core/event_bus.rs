//! Pub/Sub bus for playback events.
//!
//! - Subscribers implement `PlaybackSubscriber` (closures do automatically)
//!   and are invoked synchronously from `emit()`
//! - emit() also queues the event; poll() drains the queue for consumers
//!   that batch-process on their own loop (the REST status feed)
//!
//! Callback order: FIFO (first-subscribed, first-called).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use log::{trace, warn};

use crate::core::player_events::PlaybackEvent;

/// Maximum events in queue before oldest are evicted
const MAX_QUEUE_SIZE: usize = 1000;

/// Observer of playback events
pub trait PlaybackSubscriber: Send + Sync {
    fn on_event(&self, event: &PlaybackEvent);
}

impl<F> PlaybackSubscriber for F
where
    F: Fn(&PlaybackEvent) + Send + Sync,
{
    fn on_event(&self, event: &PlaybackEvent) {
        self(event)
    }
}

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscribers = Vec<(SubscriptionId, Arc<dyn PlaybackSubscriber>)>;

#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<RwLock<Subscribers>>,
    queue: Arc<Mutex<Vec<PlaybackEvent>>>,
    next_id: Arc<AtomicU64>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("queue_len", &self.queue_len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(Vec::new())),
            queue: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Register a subscriber. It sees every event emitted afterwards.
    pub fn subscribe<S>(&self, subscriber: S) -> SubscriptionId
    where
        S: PlaybackSubscriber + 'static,
    {
        self.subscribe_arc(Arc::new(subscriber))
    }

    pub fn subscribe_arc(&self, subscriber: Arc<dyn PlaybackSubscriber>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, subscriber));
        id
    }

    /// Returns false if the id was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        let before = subs.len();
        subs.retain(|(sid, _)| *sid != id);
        subs.len() != before
    }

    /// Emit event: invoke subscribers immediately AND queue for poll().
    ///
    /// Subscribers run outside the lock, so they may emit or subscribe.
    pub fn emit(&self, event: PlaybackEvent) {
        let subs: Vec<Arc<dyn PlaybackSubscriber>> = self
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, s)| Arc::clone(s))
            .collect();
        for sub in &subs {
            sub.on_event(&event);
        }
        trace!("Event {} -> {} subscribers", event.name(), subs.len());

        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        if queue.len() >= MAX_QUEUE_SIZE {
            let evict_count = queue.len() / 2;
            warn!("EventBus queue full ({} events), evicting oldest {}", queue.len(), evict_count);
            queue.drain(0..evict_count);
        }
        queue.push(event);
    }

    /// All events queued since the last poll
    pub fn poll(&self) -> Vec<PlaybackEvent> {
        std::mem::take(&mut *self.queue.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Clear all subscribers and queue
    pub fn clear(&self) {
        self.subscribers.write().unwrap_or_else(|e| e.into_inner()).clear();
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_and_emit() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        bus.subscribe(move |e: &PlaybackEvent| {
            seen_clone.lock().unwrap().push(e.name());
        });

        bus.emit(PlaybackEvent::Play);
        bus.emit(PlaybackEvent::SpeedChanged { speed: 2.0 });
        assert_eq!(*seen.lock().unwrap(), vec!["play", "speedChanged"]);
    }

    #[test]
    fn test_fifo_callback_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            bus.subscribe(move |_: &PlaybackEvent| order.lock().unwrap().push(i));
        }
        bus.emit(PlaybackEvent::Pause);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&count);
        let id = bus.subscribe(move |_: &PlaybackEvent| {
            c.fetch_add(1, Ordering::Relaxed);
        });
        bus.emit(PlaybackEvent::Play);
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.emit(PlaybackEvent::Play);
        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_poll_drains_queue() {
        let bus = EventBus::new();
        bus.emit(PlaybackEvent::Play);
        bus.emit(PlaybackEvent::Stop);
        assert_eq!(bus.queue_len(), 2);
        assert_eq!(bus.poll(), vec![PlaybackEvent::Play, PlaybackEvent::Stop]);
        assert!(bus.poll().is_empty());
    }

    #[test]
    fn test_queue_eviction() {
        let bus = EventBus::new();
        for _ in 0..(MAX_QUEUE_SIZE + 10) {
            bus.emit(PlaybackEvent::Pause);
        }
        assert!(bus.queue_len() <= MAX_QUEUE_SIZE);
    }

    #[test]
    fn test_subscriber_may_emit() {
        let bus = EventBus::new();
        let inner = bus.clone();
        bus.subscribe(move |e: &PlaybackEvent| {
            if *e == PlaybackEvent::Stop {
                inner.emit(PlaybackEvent::Seek { time_ms: 0.0, frame_index: 0 });
            }
        });
        bus.emit(PlaybackEvent::Stop);
        let names: Vec<_> = bus.poll().iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["seek", "stop"]);
    }
}
