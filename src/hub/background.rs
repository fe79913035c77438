//! Periodic hub maintenance: stats broadcast and history sweep.

use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::hub::MonitorHub;

pub(super) fn spawn(hub: &Arc<MonitorHub>) {
    let config = hub.config().clone();

    if config.enable_realtime {
        let weak = Arc::downgrade(hub);
        tokio::spawn(every(config.stats_interval(), weak, |hub| hub.broadcast_stats()));
    }

    let weak = Arc::downgrade(hub);
    let retention = config.history_retention();
    tokio::spawn(every(config.cleanup_interval(), weak, move |hub| {
        let report = hub.cleanup_history(retention);
        if report.tasks + report.requests > 0 {
            info!(tasks = report.tasks, requests = report.requests, "Swept expired history");
        }
    }));
}

/// Run `tick` every `period` until the hub is dropped.
async fn every<F>(period: Duration, hub: Weak<MonitorHub>, tick: F)
where
    F: Fn(&MonitorHub) + Send + 'static,
{
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(hub) = hub.upgrade() else {
            debug!("Monitor hub dropped; stopping background loop");
            return;
        };
        tick(&hub);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MonitorConfig, RealtimeConfig};
    use crate::realtime::{MessageType, SubscriptionFilter};

    #[tokio::test(start_paused = true)]
    async fn test_stats_broadcaster_ticks() {
        let config = MonitorConfig {
            stats_interval_ms: 1000,
            enable_performance_monitor: false,
            ..MonitorConfig::default()
        };
        let hub = MonitorHub::new(config, RealtimeConfig::default()).start();
        let (_subscriber, mut rx) = hub
            .subscribers()
            .register(8, SubscriptionFilter::all(), "", "");

        tokio::time::sleep(Duration::from_millis(1500)).await;
        let message = rx.recv().await.unwrap();
        assert_eq!(message.kind, MessageType::StatsUpdate);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loops_stop_with_hub() {
        let hub = MonitorHub::new(MonitorConfig::default(), RealtimeConfig::default()).start();
        let weak = Arc::downgrade(&hub);
        drop(hub);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(weak.upgrade().is_none());
    }
}
