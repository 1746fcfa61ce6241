//! Component A — Event Bus: a bounded publish/subscribe queue. Publish is
//! non-blocking: when the queue is full the *oldest* event is dropped (with
//! a warning) before the new one is enqueued, per spec §4.6/§8.
//!
//! This is hand-rolled rather than built on `tokio::sync::broadcast` because
//! `broadcast` has no drop-oldest-on-full semantics for a *single* shared
//! queue — it copies the value to every receiver's own ring buffer and lags
//! each independently. The spec wants one bounded queue with one consumer
//! (§4.6), which then fans out via the broadcast fabric (component B).

use std::collections::VecDeque;
use std::sync::Arc;

use engine_types::EventEnvelope;
use tokio::sync::{Mutex, Notify};

pub const EVENT_BUS_CAPACITY: usize = 1_000;

struct Inner {
    queue: Mutex<VecDeque<EventEnvelope>>,
    notify: Notify,
}

/// Bounded FIFO of events. Cloning shares the same underlying queue.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
    capacity: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::with_capacity(capacity)),
                notify: Notify::new(),
            }),
            capacity,
        }
    }

    /// Enqueue an event. Never blocks: if the queue is at capacity, the
    /// oldest entry is dropped first.
    pub async fn publish(&self, event: EventEnvelope) {
        let mut queue = self.inner.queue.lock().await;
        if queue.len() >= self.capacity {
            if let Some(dropped) = queue.pop_front() {
                tracing::warn!(
                    target: "engine.event_bus",
                    dropped_event_id = %dropped.id,
                    "event bus at capacity, dropping oldest event"
                );
            }
        }
        queue.push_back(event);
        drop(queue);
        self.inner.notify.notify_one();
    }

    /// Dequeue the next event, waiting if the queue is currently empty.
    /// The single-consumer contract (§4.6) lives in the broadcast fabric,
    /// which is the only caller of this method in the engine wiring.
    pub async fn recv(&self) -> EventEnvelope {
        loop {
            {
                let mut queue = self.inner.queue.lock().await;
                if let Some(event) = queue.pop_front() {
                    return event;
                }
            }
            self.inner.notify.notified().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.queue.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_types::EngineEvent;

    fn log_event(message: &str) -> EventEnvelope {
        EventEnvelope::new(EngineEvent::Log {
            level: "info".to_string(),
            message: message.to_string(),
        })
    }

    #[tokio::test]
    async fn publish_then_recv_is_fifo() {
        let bus = EventBus::with_capacity(4);
        bus.publish(log_event("one")).await;
        bus.publish(log_event("two")).await;
        let first = bus.recv().await;
        let second = bus.recv().await;
        match (first.event, second.event) {
            (EngineEvent::Log { message: a, .. }, EngineEvent::Log { message: b, .. }) => {
                assert_eq!(a, "one");
                assert_eq!(b, "two");
            }
            _ => panic!("expected log events"),
        }
    }

    #[tokio::test]
    async fn overflow_drops_exactly_one_oldest_event() {
        let bus = EventBus::with_capacity(2);
        bus.publish(log_event("a")).await;
        bus.publish(log_event("b")).await;
        bus.publish(log_event("c")).await;
        assert_eq!(bus.len().await, 2);
        let first = bus.recv().await;
        match first.event {
            EngineEvent::Log { message, .. } => assert_eq!(message, "b"),
            _ => panic!("expected log event"),
        }
    }

    #[tokio::test]
    async fn recv_waits_for_publish() {
        let bus = EventBus::with_capacity(4);
        let bus2 = bus.clone();
        let handle = tokio::spawn(async move { bus2.recv().await });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        bus.publish(log_event("late")).await;
        let received = handle.await.unwrap();
        match received.event {
            EngineEvent::Log { message, .. } => assert_eq!(message, "late"),
            _ => panic!("expected log event"),
        }
    }
}
