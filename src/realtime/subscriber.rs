//! Subscribers and their registry.
//!
//! # Backpressure
//! Every subscriber owns a bounded outbound queue. Pushes never wait: a full
//! queue means the client is not keeping up, and the subscriber is
//! disconnected on the spot instead of stalling the broadcaster.
//!
//! # Disconnect
//! `disconnect` may be triggered concurrently by either socket loop, by an
//! overflowing push or by a transport error. An atomic flag makes the cleanup
//! (registry removal, queue close, close signal) run exactly once.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;
use uuid::Uuid;

use crate::collections::ConcurrentMap;
use crate::error::{MonitorError, MonitorResult};
use crate::observability::metrics;
use crate::realtime::filter::{FilterPatch, SubscriptionFilter};
use crate::realtime::message::Envelope;
use crate::tracking::unix_millis;

/// Why a subscriber went away; used as a metrics label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    QueueOverflow,
    ClientClosed,
    TransportError,
    IdleTimeout,
    Shutdown,
}

impl DisconnectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DisconnectReason::QueueOverflow => "queue_overflow",
            DisconnectReason::ClientClosed => "client_closed",
            DisconnectReason::TransportError => "transport_error",
            DisconnectReason::IdleTimeout => "idle_timeout",
            DisconnectReason::Shutdown => "shutdown",
        }
    }
}

/// Public view of a subscriber for the connections listing.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriberInfo {
    pub id: String,
    pub filter: SubscriptionFilter,
    pub created_at: u64,
    pub last_heartbeat: u64,
    pub client_addr: String,
    pub user_agent: String,
}

pub struct Subscriber {
    id: String,
    queue: Mutex<Option<mpsc::Sender<Arc<Envelope>>>>,
    filter: RwLock<SubscriptionFilter>,
    created_at: u64,
    last_heartbeat: AtomicU64,
    client_addr: String,
    user_agent: String,
    closed: AtomicBool,
    close_signal: watch::Sender<bool>,
    registry: SubscriberRegistry,
}

impl Subscriber {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Non-blocking enqueue. A full queue disconnects the subscriber.
    pub fn push(&self, message: Arc<Envelope>) -> MonitorResult<()> {
        let outcome = match self.queue.lock().as_ref() {
            Some(queue) => queue.try_send(message),
            None => return Err(MonitorError::SubscriberClosed(self.id.clone())),
        };

        match outcome {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.disconnect(DisconnectReason::QueueOverflow);
                Err(MonitorError::QueueOverflow(self.id.clone()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.disconnect(DisconnectReason::TransportError);
                Err(MonitorError::SubscriberClosed(self.id.clone()))
            }
        }
    }

    /// Tear the subscriber down. Returns `true` only for the call that did the cleanup.
    pub fn disconnect(&self, reason: DisconnectReason) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }

        self.registry.remove(&self.id);
        self.queue.lock().take();
        self.close_signal.send_replace(true);

        metrics::record_subscriber_disconnected(reason.as_str(), self.registry.len());
        info!(subscriber_id = %self.id, reason = reason.as_str(), "Subscriber disconnected");
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves to `true` once the subscriber is disconnected.
    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.close_signal.subscribe()
    }

    pub fn update_filter(&self, patch: FilterPatch) {
        self.filter.write().merge(patch);
    }

    /// Drop every subscription.
    pub fn reset_filter(&self) {
        *self.filter.write() = SubscriptionFilter::default();
    }

    pub fn filter(&self) -> SubscriptionFilter {
        self.filter.read().clone()
    }

    /// Evaluate `check` against the current filter without cloning it.
    pub fn with_filter<R>(&self, check: impl FnOnce(&SubscriptionFilter) -> R) -> R {
        check(&self.filter.read())
    }

    pub fn touch(&self) {
        self.last_heartbeat.store(unix_millis(), Ordering::Relaxed);
    }

    pub fn info(&self) -> SubscriberInfo {
        SubscriberInfo {
            id: self.id.clone(),
            filter: self.filter(),
            created_at: self.created_at,
            last_heartbeat: self.last_heartbeat.load(Ordering::Relaxed),
            client_addr: self.client_addr.clone(),
            user_agent: self.user_agent.clone(),
        }
    }
}

/// Concurrent set of live subscribers keyed by id.
#[derive(Clone, Default)]
pub struct SubscriberRegistry {
    inner: ConcurrentMap<String, Arc<Subscriber>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a subscriber. The receiver feeds its write loop.
    pub fn register(
        &self,
        queue_capacity: usize,
        filter: SubscriptionFilter,
        client_addr: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> (Arc<Subscriber>, mpsc::Receiver<Arc<Envelope>>) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let (close_signal, _) = watch::channel(false);
        let now = unix_millis();

        let subscriber = Arc::new(Subscriber {
            id: Uuid::new_v4().to_string(),
            queue: Mutex::new(Some(tx)),
            filter: RwLock::new(filter),
            created_at: now,
            last_heartbeat: AtomicU64::new(now),
            client_addr: client_addr.into(),
            user_agent: user_agent.into(),
            closed: AtomicBool::new(false),
            close_signal,
            registry: self.clone(),
        });

        self.inner.put(subscriber.id.clone(), subscriber.clone());
        metrics::record_subscriber_connected(self.len());
        info!(
            subscriber_id = %subscriber.id,
            client = %subscriber.client_addr,
            "Subscriber connected"
        );
        (subscriber, rx)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Subscriber>> {
        self.inner.get(&id.to_string())
    }

    fn remove(&self, id: &str) -> Option<Arc<Subscriber>> {
        self.inner.delete(&id.to_string())
    }

    /// Membership at some point during the call.
    pub fn snapshot(&self) -> Vec<Arc<Subscriber>> {
        self.inner.values()
    }

    pub fn infos(&self) -> Vec<SubscriberInfo> {
        let mut infos: Vec<_> = self.snapshot().iter().map(|s| s.info()).collect();
        infos.sort_by_key(|info| info.created_at);
        infos
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Disconnect everyone (used on shutdown).
    pub fn disconnect_all(&self, reason: DisconnectReason) {
        for subscriber in self.snapshot() {
            subscriber.disconnect(reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::message::MessageType;

    fn envelope(n: u64) -> Arc<Envelope> {
        Arc::new(Envelope::new(MessageType::StatsUpdate, &n).unwrap())
    }

    #[test]
    fn test_overflow_disconnects() {
        let registry = SubscriberRegistry::new();
        let (subscriber, _rx) = registry.register(256, SubscriptionFilter::all(), "127.0.0.1", "test");
        let closed = subscriber.closed_signal();

        let mut overflowed = 0;
        for n in 0..300 {
            if subscriber.push(envelope(n)).is_err() {
                overflowed += 1;
            }
        }

        assert!(subscriber.is_closed());
        assert!(registry.is_empty());
        assert!(*closed.borrow());
        assert_eq!(overflowed, 300 - 256);
    }

    #[test]
    fn test_disconnect_runs_once() {
        let registry = SubscriberRegistry::new();
        let (subscriber, _rx) = registry.register(4, SubscriptionFilter::default(), "", "");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let subscriber = subscriber.clone();
                std::thread::spawn(move || subscriber.disconnect(DisconnectReason::TransportError))
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        assert!(registry.get(subscriber.id()).is_none());
        assert!(matches!(
            subscriber.push(envelope(1)),
            Err(MonitorError::SubscriberClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_queue_drains_in_order() {
        let registry = SubscriberRegistry::new();
        let (subscriber, mut rx) = registry.register(8, SubscriptionFilter::all(), "", "");
        for n in 0..3 {
            subscriber.push(envelope(n)).unwrap();
        }
        for n in 0..3u64 {
            let msg = rx.recv().await.unwrap();
            assert_eq!(msg.data, serde_json::json!(n));
        }

        subscriber.disconnect(DisconnectReason::ClientClosed);
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_filter_updates() {
        let registry = SubscriberRegistry::new();
        let (subscriber, _rx) = registry.register(4, SubscriptionFilter::default(), "", "");
        subscriber.update_filter(FilterPatch {
            subscribe_requests: Some(true),
            ..FilterPatch::default()
        });
        assert!(subscriber.with_filter(|f| f.subscribe_requests));

        subscriber.reset_filter();
        assert_eq!(subscriber.filter(), SubscriptionFilter::default());
        assert_eq!(registry.infos().len(), 1);
    }
}
