//! Fan-out of trace and stats updates to subscribers.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::hub::MonitorHub;
use crate::realtime::{Envelope, MessageType, SubscriptionFilter};
use crate::requests::RequestTrace;
use crate::tracking::TaskTrace;

impl MonitorHub {
    pub fn broadcast_task_update(&self, trace: &TaskTrace) {
        self.fan_out(MessageType::TaskUpdate, trace, |filter| filter.matches_task(trace));
    }

    pub fn broadcast_request_update(&self, trace: &RequestTrace) {
        self.fan_out(MessageType::RequestUpdate, trace, |filter| {
            filter.matches_request(trace)
        });
    }

    /// Push a fresh stats snapshot to every stats subscriber.
    pub fn broadcast_stats(&self) {
        if !self
            .subscribers()
            .snapshot()
            .iter()
            .any(|s| s.with_filter(|f| f.subscribe_stats))
        {
            return;
        }
        let stats = self.get_current_stats();
        self.fan_out(MessageType::StatsUpdate, &stats, |filter| filter.subscribe_stats);
    }

    /// Serialize once, then try-push to every subscriber whose filter wants it.
    ///
    /// Returns how many subscribers accepted the message.
    fn fan_out<T, F>(&self, kind: MessageType, payload: &T, wants: F) -> usize
    where
        T: Serialize,
        F: Fn(&SubscriptionFilter) -> bool,
    {
        let subscribers = self.subscribers().snapshot();
        if subscribers.is_empty() {
            return 0;
        }

        let mut envelope: Option<Arc<Envelope>> = None;
        let mut delivered = 0;
        for subscriber in subscribers {
            if !subscriber.with_filter(&wants) {
                continue;
            }

            let message = match envelope.clone() {
                Some(message) => message,
                None => match Envelope::new(kind, payload) {
                    Ok(message) => {
                        let message = Arc::new(message);
                        envelope = Some(message.clone());
                        message
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to encode broadcast");
                        return delivered;
                    }
                },
            };

            match subscriber.push(message) {
                Ok(()) => delivered += 1,
                Err(e) => debug!(subscriber_id = %subscriber.id(), error = %e, "Broadcast not delivered"),
            }
        }
        delivered
    }
}
