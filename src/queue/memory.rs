use super::{AckPolicy, Acknowledge, Delivery, JobQueue, Subscription, Topology};
use crate::sync_ext::MutexExt;
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

const DIRECT: &str = "direct";

struct Exchange {
    kind: String,
    /// (queue, routing key) pairs
    bindings: Vec<(String, String)>,
}

#[derive(Default)]
struct Queue {
    messages: VecDeque<Vec<u8>>,
    consumers: usize,
}

#[derive(Default)]
struct BrokerState {
    exchanges: HashMap<String, Exchange>,
    queues: HashMap<String, Queue>,
}

impl BrokerState {
    fn declare_exchange(&mut self, exchange: &str, kind: &str) -> Result<()> {
        match self.exchanges.get(exchange) {
            Some(existing) if existing.kind != kind => bail!(
                "Exchange {exchange} already exists with type {}, not {kind}",
                existing.kind
            ),
            Some(_) => {}
            None => {
                self.exchanges.insert(
                    exchange.to_owned(),
                    Exchange {
                        kind: kind.to_owned(),
                        bindings: Vec::new(),
                    },
                );
            }
        }
        Ok(())
    }

    // Auto-delete a queue that lost its last consumer, then any exchange that lost its last binding
    fn release_consumer(&mut self, queue: &str) {
        let Some(state) = self.queues.get_mut(queue) else {
            return;
        };
        state.consumers = state.consumers.saturating_sub(1);
        if state.consumers > 0 {
            return;
        }

        self.queues.remove(queue);
        self.exchanges.retain(|_, exchange| {
            let had_bindings = !exchange.bindings.is_empty();
            exchange.bindings.retain(|(bound_queue, _)| bound_queue != queue);
            !(had_bindings && exchange.bindings.is_empty())
        });
    }
}

#[derive(Default)]
struct Shared {
    state: Mutex<BrokerState>,
    notify: Notify,
    unavailable: AtomicBool,
    closed: AtomicBool,
}

impl Shared {
    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("Connection refused");
        }
        Ok(())
    }
}

/// An in-process broker with the routing semantics of an AMQP direct exchange
/// Clones share the same broker, so one clone can publish while another consumes.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    shared: Arc<Shared>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail as if the broker could not be reached
    pub fn set_unavailable(&self, unavailable: bool) {
        self.shared.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Declare an exchange of an arbitrary type
    pub fn declare_exchange_kind(&self, exchange: &str, kind: &str) -> Result<()> {
        self.shared.check_available()?;
        self.shared
            .state
            .lock_unpoisoned()
            .declare_exchange(exchange, kind)
    }

    /// Return the number of messages waiting in a queue
    pub fn pending(&self, queue: &str) -> usize {
        self.shared
            .state
            .lock_unpoisoned()
            .queues
            .get(queue)
            .map_or(0, |queue| queue.messages.len())
    }

    pub fn queue_exists(&self, queue: &str) -> bool {
        self.shared.state.lock_unpoisoned().queues.contains_key(queue)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn declare_exchange(&self, exchange: &str) -> Result<()> {
        self.declare_exchange_kind(exchange, DIRECT)
    }

    async fn declare_topology(&self, topology: &Topology) -> Result<()> {
        self.shared.check_available()?;
        let mut state = self.shared.state.lock_unpoisoned();
        state.declare_exchange(&topology.exchange, DIRECT)?;
        state.queues.entry(topology.queue.clone()).or_default();
        let binding = (topology.queue.clone(), topology.routing_key.clone());
        if let Some(exchange) = state.exchanges.get_mut(&topology.exchange) {
            if !exchange.bindings.contains(&binding) {
                exchange.bindings.push(binding);
            }
        }
        Ok(())
    }

    async fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<()> {
        self.shared.check_available()?;
        let mut state = self.shared.state.lock_unpoisoned();
        let Some(exchange_state) = state.exchanges.get(exchange) else {
            bail!("No exchange {exchange}");
        };
        let targets = exchange_state
            .bindings
            .iter()
            .filter(|(_, key)| key == routing_key)
            .map(|(queue, _)| queue.clone())
            .collect::<Vec<_>>();
        // Messages that match no binding are dropped
        for queue in targets {
            if let Some(queue) = state.queues.get_mut(&queue) {
                queue.messages.push_back(payload.to_vec());
            }
        }
        drop(state);
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn subscribe(
        &self,
        queue: &str,
        _consumer_tag: &str,
        ack_policy: AckPolicy,
    ) -> Result<Box<dyn Subscription>> {
        self.shared.check_available()?;
        let mut state = self.shared.state.lock_unpoisoned();
        let Some(queue_state) = state.queues.get_mut(queue) else {
            bail!("No queue {queue}");
        };
        queue_state.consumers += 1;
        Ok(Box::new(MemorySubscription {
            shared: Arc::clone(&self.shared),
            queue: queue.to_owned(),
            ack_policy,
            unacked: Arc::new(Mutex::new(HashMap::new())),
            next_tag: AtomicU64::new(0),
            active: true,
        }))
    }

    async fn close(&self) -> Result<()> {
        self.shared.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

type Unacked = Arc<Mutex<HashMap<u64, Vec<u8>>>>;

struct MemorySubscription {
    shared: Arc<Shared>,
    queue: String,
    ack_policy: AckPolicy,
    unacked: Unacked,
    next_tag: AtomicU64,
    active: bool,
}

impl MemorySubscription {
    fn release(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;

        let mut state = self.shared.state.lock_unpoisoned();
        // Unacknowledged messages go back to the front of the queue, oldest first
        let mut unacked = self
            .unacked
            .lock_unpoisoned()
            .drain()
            .collect::<Vec<_>>();
        unacked.sort_by_key(|(tag, _)| *tag);
        if let Some(queue) = state.queues.get_mut(&self.queue) {
            for (_, message) in unacked.into_iter().rev() {
                queue.messages.push_front(message);
            }
        }
        state.release_consumer(&self.queue);
        drop(state);
        self.shared.notify.notify_waiters();
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Result<Option<Delivery>> {
        loop {
            let notified = self.shared.notify.notified();
            {
                let mut state = self.shared.state.lock_unpoisoned();
                let Some(queue) = state.queues.get_mut(&self.queue) else {
                    return Ok(None);
                };
                if let Some(body) = queue.messages.pop_front() {
                    let pending_ack: Option<Box<dyn Acknowledge>> = match self.ack_policy {
                        AckPolicy::OnReceipt => None,
                        AckPolicy::AfterProcessing => {
                            let tag = self.next_tag.fetch_add(1, Ordering::SeqCst);
                            self.unacked
                                .lock_unpoisoned()
                                .insert(tag, body.clone());
                            Some(Box::new(MemoryAck {
                                unacked: Arc::clone(&self.unacked),
                                tag,
                            }))
                        }
                    };
                    return Ok(Some(Delivery::new(body, pending_ack)));
                }
            }
            notified.await;
        }
    }

    async fn cancel(mut self: Box<Self>) -> Result<()> {
        self.release();
        Ok(())
    }
}

// Dropping a subscription without cancelling it behaves like a consumer whose connection died
impl Drop for MemorySubscription {
    fn drop(&mut self) {
        self.release();
    }
}

struct MemoryAck {
    unacked: Unacked,
    tag: u64,
}

#[async_trait]
impl Acknowledge for MemoryAck {
    async fn ack(self: Box<Self>) -> Result<()> {
        self.unacked.lock_unpoisoned().remove(&self.tag);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topology(queue: &str) -> Topology {
        Topology {
            exchange: "asteroid".to_owned(),
            queue: queue.to_owned(),
            routing_key: "all".to_owned(),
        }
    }

    #[tokio::test]
    async fn test_declare_is_idempotent() {
        let broker = MemoryQueue::new();
        broker.declare_topology(&topology("workers")).await.unwrap();
        broker.declare_topology(&topology("workers")).await.unwrap();
        broker.declare_exchange("asteroid").await.unwrap();

        broker.publish("asteroid", "all", b"job").await.unwrap();
        assert_eq!(broker.pending("workers"), 1);
    }

    #[tokio::test]
    async fn test_declare_conflicting_type() {
        let broker = MemoryQueue::new();
        broker.declare_exchange_kind("asteroid", "fanout").unwrap();
        assert_eq!(
            broker.declare_exchange("asteroid").await.unwrap_err().to_string(),
            "Exchange asteroid already exists with type fanout, not direct"
        );
    }

    #[tokio::test]
    async fn test_direct_routing() {
        let broker = MemoryQueue::new();
        broker.declare_topology(&topology("workers")).await.unwrap();

        broker.publish("asteroid", "other", b"job").await.unwrap();
        assert_eq!(broker.pending("workers"), 0);
        assert!(broker.publish("missing", "all", b"job").await.is_err());
    }

    #[tokio::test]
    async fn test_ack_on_receipt_loses_message_on_crash() {
        let broker = MemoryQueue::new();
        broker.declare_topology(&topology("workers")).await.unwrap();
        let mut backup = broker
            .subscribe("workers", "backup", AckPolicy::OnReceipt)
            .await
            .unwrap();
        let mut subscription = broker
            .subscribe("workers", "worker", AckPolicy::OnReceipt)
            .await
            .unwrap();
        broker.publish("asteroid", "all", b"job").await.unwrap();

        let delivery = subscription.next().await.unwrap().unwrap();
        assert_eq!(delivery.body, b"job");
        drop(subscription);

        // The message was acknowledged when it was received, so it is not redelivered
        assert_eq!(broker.pending("workers"), 0);
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(20), backup.next())
                .await
                .is_err()
        );
        backup.cancel().await.unwrap();
    }

    #[tokio::test]
    async fn test_ack_after_processing_requeues_on_crash() {
        let broker = MemoryQueue::new();
        broker.declare_topology(&topology("workers")).await.unwrap();
        let mut backup = broker
            .subscribe("workers", "backup", AckPolicy::AfterProcessing)
            .await
            .unwrap();
        let mut subscription = broker
            .subscribe("workers", "worker", AckPolicy::AfterProcessing)
            .await
            .unwrap();
        broker.publish("asteroid", "all", b"first").await.unwrap();
        broker.publish("asteroid", "all", b"second").await.unwrap();

        let first = subscription.next().await.unwrap().unwrap();
        first.ack().await.unwrap();
        let _second = subscription.next().await.unwrap().unwrap();
        drop(subscription);

        let redelivered = backup.next().await.unwrap().unwrap();
        assert_eq!(redelivered.body, b"second");
    }

    #[tokio::test]
    async fn test_queue_auto_deleted_after_last_consumer() {
        let broker = MemoryQueue::new();
        broker.declare_topology(&topology("workers")).await.unwrap();
        let subscription = broker
            .subscribe("workers", "worker", AckPolicy::OnReceipt)
            .await
            .unwrap();
        subscription.cancel().await.unwrap();

        assert!(!broker.queue_exists("workers"));
        assert!(broker.publish("asteroid", "all", b"job").await.is_err());
    }

    #[tokio::test]
    async fn test_next_waits_for_publish() {
        let broker = MemoryQueue::new();
        broker.declare_topology(&topology("workers")).await.unwrap();
        let mut subscription = broker
            .subscribe("workers", "worker", AckPolicy::OnReceipt)
            .await
            .unwrap();

        let publisher = broker.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            publisher.publish("asteroid", "all", b"late").await.unwrap();
        });

        let delivery = subscription.next().await.unwrap().unwrap();
        assert_eq!(delivery.body, b"late");
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_unavailable() {
        let broker = MemoryQueue::new();
        broker.set_unavailable(true);
        assert_eq!(
            broker.declare_exchange("asteroid").await.unwrap_err().to_string(),
            "Connection refused"
        );
    }
}
