//! In-memory [`MessageBroker`] with queue semantics.
//!
//! Each topic is a FIFO queue shared by all of its subscribers. A subscriber
//! holds at most one unsettled delivery; a requeued message goes back to the
//! head of the queue flagged as redelivered. Settlements are counted as soon
//! as a delivery is acked or nacked, whether or not its subscriber polls again.

use futures::future::BoxFuture;
use seckill_core::broker::{Acknowledgement, Delivery, DeliveryStream, MessageBroker};
use seckill_core::error::BrokerError;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{Notify, oneshot};

#[derive(Clone, Debug)]
struct Queued {
    key: String,
    payload: Vec<u8>,
    redelivered: bool,
}

/// A delivery handed out and not yet accounted for.
#[derive(Debug)]
struct InFlight {
    topic: String,
    message: Queued,
    settled: oneshot::Receiver<Acknowledgement>,
}

/// One subscriber's unsettled delivery, shared with the broker for accounting.
type Slot = Arc<Mutex<Option<InFlight>>>;

#[derive(Debug, Default)]
struct Inner {
    queues: Mutex<HashMap<String, VecDeque<Queued>>>,
    published: Mutex<Vec<(String, String, Vec<u8>)>>,
    in_flight: Mutex<Vec<Slot>>,
    arrived: Notify,
    closed: AtomicBool,
    fail_publish: AtomicBool,
    publish_delay: Mutex<Option<Duration>>,
    acked: AtomicUsize,
    requeued: AtomicUsize,
    discarded: AtomicUsize,
}

impl Inner {
    fn pop(&self, topic: &str) -> Option<Queued> {
        self.queues
            .lock()
            .unwrap()
            .get_mut(topic)
            .and_then(VecDeque::pop_front)
    }

    fn requeue(&self, topic: &str, mut message: Queued) {
        message.redelivered = true;
        self.queues
            .lock()
            .unwrap()
            .entry(topic.to_string())
            .or_default()
            .push_front(message);
        self.arrived.notify_waiters();
    }

    fn record(&self, flight: InFlight, ack: Acknowledgement) {
        match ack {
            Acknowledgement::Ack => {
                self.acked.fetch_add(1, Ordering::SeqCst);
            }
            Acknowledgement::Nack { requeue: false } => {
                self.discarded.fetch_add(1, Ordering::SeqCst);
            }
            Acknowledgement::Nack { requeue: true } => {
                self.requeued.fetch_add(1, Ordering::SeqCst);
                self.requeue(&flight.topic, flight.message);
            }
        }
    }

    /// Account for every delivery already settled by its holder.
    fn collect_settled(&self) {
        let slots = self.in_flight.lock().unwrap().clone();
        for slot in slots {
            let mut guard = slot.lock().unwrap();
            let ack = match guard.as_mut().map(|f| f.settled.try_recv()) {
                None | Some(Err(oneshot::error::TryRecvError::Empty)) => continue,
                Some(Ok(ack)) => ack,
                Some(Err(oneshot::error::TryRecvError::Closed)) => {
                    Acknowledgement::Nack { requeue: true }
                }
            };
            if let Some(flight) = guard.take() {
                drop(guard);
                self.record(flight, ack);
            }
        }
    }

    /// Ready once the delivery in `slot` is settled and accounted for.
    fn poll_settled(&self, slot: &Slot, cx: &mut Context<'_>) -> Poll<()> {
        let mut guard = slot.lock().unwrap();
        let Some(flight) = guard.as_mut() else {
            return Poll::Ready(());
        };
        let ack = match Pin::new(&mut flight.settled).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(outcome) => outcome.unwrap_or(Acknowledgement::Nack { requeue: true }),
        };
        if let Some(flight) = guard.take() {
            drop(guard);
            self.record(flight, ack);
        }
        Poll::Ready(())
    }
}

/// In-memory broker for tests.
#[derive(Clone, Debug, Default)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl InMemoryBroker {
    /// Broker with no topics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every publish fail (or succeed again).
    pub fn set_publish_failing(&self, failing: bool) {
        self.inner.fail_publish.store(failing, Ordering::SeqCst);
    }

    /// Hold every publish for `delay` before accepting it. `None` removes the delay.
    pub fn set_publish_delay(&self, delay: Option<Duration>) {
        *self.inner.publish_delay.lock().unwrap() = delay;
    }

    /// End every subscription once its current delivery is settled.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.arrived.notify_waiters();
    }

    /// Payloads accepted on `topic`, in publish order, including consumed ones.
    #[must_use]
    pub fn published(&self, topic: &str) -> Vec<Vec<u8>> {
        self.inner
            .published
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _, _)| t == topic)
            .map(|(_, _, payload)| payload.clone())
            .collect()
    }

    /// Keys accepted on `topic`, in publish order.
    #[must_use]
    pub fn published_keys(&self, topic: &str) -> Vec<String> {
        self.inner
            .published
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _, _)| t == topic)
            .map(|(_, key, _)| key.clone())
            .collect()
    }

    /// Messages waiting on `topic`, including settled requeues.
    #[must_use]
    pub fn queued(&self, topic: &str) -> usize {
        self.inner.collect_settled();
        self.inner
            .queues
            .lock()
            .unwrap()
            .get(topic)
            .map_or(0, VecDeque::len)
    }

    /// Deliveries acknowledged so far.
    #[must_use]
    pub fn acked(&self) -> usize {
        self.inner.collect_settled();
        self.inner.acked.load(Ordering::SeqCst)
    }

    /// Deliveries requeued so far.
    #[must_use]
    pub fn requeued(&self) -> usize {
        self.inner.collect_settled();
        self.inner.requeued.load(Ordering::SeqCst)
    }

    /// Deliveries rejected without requeue so far.
    #[must_use]
    pub fn discarded(&self) -> usize {
        self.inner.collect_settled();
        self.inner.discarded.load(Ordering::SeqCst)
    }
}

impl MessageBroker for InMemoryBroker {
    fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: Vec<u8>,
    ) -> BoxFuture<'_, Result<(), BrokerError>> {
        let topic = topic.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let delay = *self.inner.publish_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.inner.fail_publish.load(Ordering::SeqCst) {
                return Err(BrokerError::PublishFailed {
                    topic,
                    reason: "simulated broker outage".to_string(),
                });
            }
            self.inner
                .published
                .lock()
                .unwrap()
                .push((topic.clone(), key.clone(), payload.clone()));
            self.inner
                .queues
                .lock()
                .unwrap()
                .entry(topic)
                .or_default()
                .push_back(Queued {
                    key,
                    payload,
                    redelivered: false,
                });
            self.inner.arrived.notify_waiters();
            Ok(())
        })
    }

    fn subscribe(&self, topic: &str) -> BoxFuture<'_, Result<DeliveryStream, BrokerError>> {
        let topic = topic.to_string();
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            if inner.closed.load(Ordering::SeqCst) {
                return Err(BrokerError::SubscriptionFailed {
                    topic,
                    reason: "broker closed".to_string(),
                });
            }
            let slot: Slot = Arc::default();
            inner.in_flight.lock().unwrap().push(Arc::clone(&slot));

            let stream = async_stream::stream! {
                loop {
                    let arrived = inner.arrived.notified();
                    if inner.closed.load(Ordering::SeqCst) {
                        break;
                    }
                    let Some(message) = inner.pop(&topic) else {
                        arrived.await;
                        continue;
                    };
                    drop(arrived);

                    let (delivery, settled) = Delivery::new(
                        Some(message.key.clone()),
                        message.payload.clone(),
                        message.redelivered,
                    );
                    *slot.lock().unwrap() = Some(InFlight {
                        topic: topic.clone(),
                        message,
                        settled,
                    });
                    yield Ok(delivery);

                    // Prefetch of one: wait for the settlement before the next message.
                    futures::future::poll_fn(|cx| inner.poll_settled(&slot, cx)).await;
                }
            };
            Ok(Box::pin(stream) as DeliveryStream)
        })
    }
}
