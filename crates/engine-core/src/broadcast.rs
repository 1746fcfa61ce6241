//! Component B — Broadcast Fabric: fans out events drained from the event
//! bus (component A) to every live subscriber, and owns subscriber
//! connection lifecycle. The consumer loop never dies (§4.6): consecutive
//! delivery errors trip a long backoff instead of aborting the task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use engine_observability::{emit_event, ObservabilityEvent};
use engine_types::EventEnvelope;
use tokio::sync::{mpsc, RwLock};
use tracing::Level;

use crate::event_bus::EventBus;

pub const DEFAULT_MAX_BROADCAST_ERROR_COUNT: u32 = 5;
pub const DEFAULT_BROADCAST_ERROR_DELAY: Duration = Duration::from_secs(30);

/// One live subscriber's outbound channel. The WebSocket layer (engine-server)
/// owns turning these JSON strings into actual frames.
type SubscriberId = u64;

#[derive(Clone)]
pub struct BroadcastFabric {
    subscribers: Arc<RwLock<HashMap<SubscriberId, mpsc::Sender<String>>>>,
    next_id: Arc<AtomicU64>,
    max_error_count: u32,
    error_delay: Duration,
}

impl BroadcastFabric {
    pub fn new() -> Self {
        Self::with_policy(DEFAULT_MAX_BROADCAST_ERROR_COUNT, DEFAULT_BROADCAST_ERROR_DELAY)
    }

    pub fn with_policy(max_error_count: u32, error_delay: Duration) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            max_error_count,
            error_delay,
        }
    }

    /// Register a new subscriber connection; returns its id (for
    /// `unsubscribe`) and the receiving half of its channel.
    pub async fn subscribe(&self, buffer: usize) -> (SubscriberId, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers.write().await.insert(id, tx);
        (id, rx)
    }

    pub async fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers.write().await.remove(&id);
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    async fn deliver(&self, payload: &str) -> (usize, usize) {
        let subscribers = self.subscribers.read().await;
        let mut dead = Vec::new();
        let mut delivered = 0usize;
        for (id, tx) in subscribers.iter() {
            if tx.try_send(payload.to_string()).is_ok() {
                delivered += 1;
            } else {
                dead.push(*id);
            }
        }
        drop(subscribers);
        let failures = dead.len();
        if !dead.is_empty() {
            let mut subscribers = self.subscribers.write().await;
            for id in dead {
                subscribers.remove(&id);
            }
        }
        (delivered, failures)
    }

    /// Spawn the single-consumer loop draining `bus` and fanning events out.
    /// Returns a handle the caller may abort on shutdown.
    pub fn spawn_consumer(&self, bus: EventBus) -> tokio::task::JoinHandle<()> {
        let fabric = self.clone();
        tokio::spawn(async move {
            let mut consecutive_errors: u32 = 0;
            loop {
                let envelope: EventEnvelope = bus.recv().await;
                let payload = match serde_json::to_string(&envelope) {
                    Ok(json) => json,
                    Err(err) => {
                        tracing::error!(error = %err, "failed to serialize event for broadcast");
                        continue;
                    }
                };

                let (_delivered, failures) = fabric.deliver(&payload).await;

                if failures > 0 {
                    consecutive_errors += 1;
                } else {
                    consecutive_errors = 0;
                }

                if consecutive_errors >= fabric.max_error_count {
                    emit_event(
                        Level::WARN,
                        ObservabilityEvent {
                            event: "broadcast_backoff",
                            component: "broadcast_fabric",
                            task_id: None,
                            agent_id: None,
                            revision: None,
                            provider_id: None,
                            model_id: None,
                            status: None,
                            error_code: None,
                            detail: Some(&format!(
                                "{consecutive_errors} consecutive delivery errors, sleeping {:?}",
                                fabric.error_delay
                            )),
                        },
                    );
                    tokio::time::sleep(fabric.error_delay).await;
                    consecutive_errors = 0;
                }
            }
        })
    }
}

impl Default for BroadcastFabric {
    fn default() -> Self {
        Self::new()
    }
}
