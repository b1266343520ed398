//! Broadcast event bus for distributing `ExecutionEvent` to live subscribers.
//!
//! Built on `tokio::sync::broadcast`. Publishing with no active subscribers
//! is a no-op; the durable copy of every event goes through the repository.

use stepwise_types::event::ExecutionEvent;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Multi-consumer bus for execution events.
///
/// Cloning the bus clones the sender, allowing multiple producers and
/// consumers.
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    /// Create a new event bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    /// Receive future events of one execution only.
    pub fn subscribe_execution(&self, execution_id: Uuid) -> ExecutionSubscription {
        ExecutionSubscription {
            execution_id,
            receiver: self.sender.subscribe(),
        }
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

/// A receiver filtered to a single execution.
pub struct ExecutionSubscription {
    execution_id: Uuid,
    receiver: broadcast::Receiver<ExecutionEvent>,
}

impl ExecutionSubscription {
    /// Next event for this execution. `None` once the bus is closed.
    ///
    /// Lagged receivers skip the lost events and keep going.
    pub async fn next(&mut self) -> Option<ExecutionEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.execution_id == self.execution_id => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        execution_id = %self.execution_id,
                        skipped,
                        "event subscriber lagged"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stepwise_types::event::EventKind;

    fn sample_event(execution_id: Uuid, sequence: u64) -> ExecutionEvent {
        ExecutionEvent {
            execution_id,
            sequence,
            timestamp: Utc::now(),
            kind: EventKind::ExecutionAborted,
        }
    }

    #[tokio::test]
    async fn publish_and_subscribe_delivers_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(sample_event(Uuid::nil(), 1));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.sequence, 1);
    }

    #[tokio::test]
    async fn execution_subscription_filters_other_runs() {
        let bus = EventBus::new(16);
        let mine = Uuid::now_v7();
        let mut sub = bus.subscribe_execution(mine);

        bus.publish(sample_event(Uuid::nil(), 1));
        bus.publish(sample_event(mine, 7));

        let received = sub.next().await.unwrap();
        assert_eq!(received.execution_id, mine);
        assert_eq!(received.sequence, 7);
    }

    #[tokio::test]
    async fn subscription_ends_when_bus_dropped() {
        let bus = EventBus::new(4);
        let mut sub = bus.subscribe_execution(Uuid::nil());
        drop(bus);
        assert!(sub.next().await.is_none());
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new(16);
        bus.publish(sample_event(Uuid::nil(), 1));
    }

    #[test]
    fn clone_shares_channel() {
        let bus = EventBus::new(16);
        let bus2 = bus.clone();
        let mut rx = bus.subscribe();

        bus2.publish(sample_event(Uuid::nil(), 2));

        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn debug_impl() {
        let bus = EventBus::new(16);
        let _rx = bus.subscribe();
        let debug = format!("{bus:?}");
        assert!(debug.contains("EventBus"));
        assert!(debug.contains("receiver_count"));
    }
}
