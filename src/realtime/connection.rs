//! Socket loops for one subscriber connection.
//!
//! # Data Flow
//! ```text
//! broadcaster ──push──▶ bounded queue ──▶ write loop ──▶ socket
//!                                          (keep-alive ping when idle)
//! socket ──▶ read loop ──▶ ControlMessage ──▶ filter update / pong / stats
//! ```
//!
//! Whichever loop ends first ends the connection; the subscriber is then
//! disconnected (a no-op if something else already did it).

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

use crate::hub::MonitorHub;
use crate::realtime::filter::SubscriptionFilter;
use crate::realtime::message::{ControlMessage, Envelope, MessageType};
use crate::realtime::subscriber::{DisconnectReason, Subscriber};

/// A single frame write may not take longer than this.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Register a subscriber for `socket` and run it until either side ends.
pub async fn serve_socket(
    socket: WebSocket,
    hub: Arc<MonitorHub>,
    client_addr: String,
    user_agent: String,
) {
    let settings = hub.realtime_config().clone();
    let (subscriber, queue) = hub.subscribers().register(
        settings.queue_capacity,
        SubscriptionFilter::default(),
        client_addr,
        user_agent,
    );

    let (sink, stream) = socket.split();
    let reason = tokio::select! {
        reason = write_loop(sink, queue, subscriber.clone(), settings.keepalive_interval()) => reason,
        reason = read_loop(stream, subscriber.clone(), hub.clone(), settings.idle_timeout()) => reason,
    };

    if let Some(reason) = reason {
        subscriber.disconnect(reason);
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut queue: mpsc::Receiver<Arc<Envelope>>,
    subscriber: Arc<Subscriber>,
    keepalive: Duration,
) -> Option<DisconnectReason> {
    let mut closed = subscriber.closed_signal();
    let mut ping = tokio::time::interval_at(Instant::now() + keepalive, keepalive);

    loop {
        tokio::select! {
            biased;

            _ = closed.changed() => {
                let _ = timeout(WRITE_TIMEOUT, sink.send(Message::Close(None))).await;
                return None;
            }
            next = queue.recv() => {
                let Some(envelope) = next else {
                    let _ = timeout(WRITE_TIMEOUT, sink.send(Message::Close(None))).await;
                    return None;
                };
                let text = match envelope.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(subscriber_id = %subscriber.id(), error = %e, "Failed to encode outbound message");
                        continue;
                    }
                };
                if let Err(reason) = send(&mut sink, Message::Text(text.into())).await {
                    return Some(reason);
                }
                ping.reset();
            }
            _ = ping.tick() => {
                if let Err(reason) = send(&mut sink, Message::Ping(Default::default())).await {
                    return Some(reason);
                }
            }
        }
    }
}

async fn send(
    sink: &mut SplitSink<WebSocket, Message>,
    message: Message,
) -> Result<(), DisconnectReason> {
    match timeout(WRITE_TIMEOUT, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            debug!(error = %e, "Socket write failed");
            Err(DisconnectReason::TransportError)
        }
        Err(_) => {
            debug!("Socket write timed out");
            Err(DisconnectReason::TransportError)
        }
    }
}

async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    subscriber: Arc<Subscriber>,
    hub: Arc<MonitorHub>,
    idle: Duration,
) -> Option<DisconnectReason> {
    loop {
        let frame = match timeout(idle, stream.next()).await {
            Err(_) => return Some(DisconnectReason::IdleTimeout),
            Ok(None) => return Some(DisconnectReason::ClientClosed),
            Ok(Some(Err(e))) => {
                debug!(subscriber_id = %subscriber.id(), error = %e, "Socket read failed");
                return Some(DisconnectReason::TransportError);
            }
            Ok(Some(Ok(frame))) => frame,
        };

        subscriber.touch();
        match frame {
            Message::Text(text) => handle_control(&hub, &subscriber, text.as_str()),
            Message::Binary(_) => {
                warn!(subscriber_id = %subscriber.id(), "Ignoring binary frame");
            }
            Message::Close(_) => return Some(DisconnectReason::ClientClosed),
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
}

/// Apply one inbound text frame. Malformed input is logged and ignored.
pub(crate) fn handle_control(hub: &MonitorHub, subscriber: &Subscriber, text: &str) {
    let message = match ControlMessage::parse(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(subscriber_id = %subscriber.id(), error = %e, "Ignoring malformed control message");
            return;
        }
    };

    let reply = match message {
        ControlMessage::Subscribe(patch) => {
            subscriber.update_filter(patch);
            debug!(subscriber_id = %subscriber.id(), "Subscription filter updated");
            None
        }
        ControlMessage::Unsubscribe => {
            subscriber.reset_filter();
            None
        }
        ControlMessage::Ping => Some(Envelope::pong()),
        ControlMessage::GetStats => {
            match Envelope::new(MessageType::StatsUpdate, &hub.get_current_stats()) {
                Ok(envelope) => Some(envelope),
                Err(e) => {
                    warn!(subscriber_id = %subscriber.id(), error = %e, "Failed to encode stats");
                    None
                }
            }
        }
    };

    if let Some(reply) = reply {
        if let Err(e) = subscriber.push(Arc::new(reply)) {
            debug!(subscriber_id = %subscriber.id(), error = %e, "Reply dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MonitorConfig, RealtimeConfig};

    #[tokio::test]
    async fn test_control_messages() {
        let hub = MonitorHub::new(MonitorConfig::default(), RealtimeConfig::default());
        let (subscriber, mut rx) =
            hub.subscribers()
                .register(8, SubscriptionFilter::default(), "127.0.0.1", "test");

        handle_control(&hub, &subscriber, r#"{"type":"subscribe","data":{"subscribe_tasks":true}}"#);
        assert!(subscriber.filter().subscribe_tasks);

        handle_control(&hub, &subscriber, "{{{ nope");
        assert!(!subscriber.is_closed());

        handle_control(&hub, &subscriber, r#"{"type":"ping"}"#);
        assert_eq!(rx.recv().await.unwrap().kind, MessageType::Pong);

        handle_control(&hub, &subscriber, r#"{"type":"get_stats"}"#);
        let stats = rx.recv().await.unwrap();
        assert_eq!(stats.kind, MessageType::StatsUpdate);
        assert!(stats.data.get("task_stats").is_some());

        handle_control(&hub, &subscriber, r#"{"type":"unsubscribe"}"#);
        assert_eq!(subscriber.filter(), SubscriptionFilter::default());
    }
}
