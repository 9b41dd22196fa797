//! Pull-based backstop for missed push events.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use {
    chrono::{DateTime, Utc},
    herald_config::PollConfig,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    delivery::DeliveryPipeline,
    registry::SubscriptionRegistry,
    router::MessageRouter,
    source::{RawMessage, SourceApi},
    store::StateStore,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub channels_polled: usize,
    pub forwarded: usize,
}

pub struct ReconciliationPoller {
    registry: Arc<SubscriptionRegistry>,
    router: Arc<MessageRouter>,
    pipeline: Arc<DeliveryPipeline>,
    store: Arc<StateStore>,
    sources: Vec<Arc<dyn SourceApi>>,
    config: PollConfig,
    /// Rotates through the channel list across cycles.
    cursor: AtomicUsize,
}

impl ReconciliationPoller {
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        router: Arc<MessageRouter>,
        pipeline: Arc<DeliveryPipeline>,
        store: Arc<StateStore>,
        sources: Vec<Arc<dyn SourceApi>>,
        config: PollConfig,
    ) -> Self {
        Self {
            registry,
            router,
            pipeline,
            store,
            sources,
            config,
            cursor: AtomicUsize::new(0),
        }
    }

    pub async fn poll_once(&self) -> PollReport {
        self.poll_at(Utc::now()).await
    }

    /// One cycle: pull-reachable channels only, at most
    /// `max_channels_per_cycle` of them, recent and undelivered messages only.
    pub async fn poll_at(&self, now: DateTime<Utc>) -> PollReport {
        let channels = self.registry.pull_reachable_channels().await;
        if channels.is_empty() {
            debug!("no pull-reachable channels to poll");
            return PollReport::default();
        }

        let take = self.config.max_channels_per_cycle.min(channels.len());
        let start = self.cursor.fetch_add(take, Ordering::Relaxed) % channels.len();
        let threshold = self.config.recency();

        let mut batch = Vec::new();
        for channel_id in channels.iter().cycle().skip(start).take(take) {
            let Some(messages) = self.fetch(channel_id).await else {
                continue;
            };
            for raw in &messages {
                let Ok(msg) = self.router.route_recent(raw, threshold, now).await else {
                    continue;
                };
                if self.store.was_delivered(&msg.key()).await {
                    continue;
                }
                batch.push(msg);
            }
        }

        let forwarded = batch.len();
        if forwarded > 0 {
            info!(messages = forwarded, "poll found undelivered messages");
            self.pipeline.send_messages(batch).await;
        }
        PollReport {
            channels_polled: take,
            forwarded,
        }
    }

    /// Poll at the configured interval until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        if !self.config.enabled {
            info!("reconciliation polling disabled");
            return;
        }
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick is immediate; skip it so startup is push-first.
        ticker.tick().await;
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.poll_once().await;
                    debug!(channels = report.channels_polled, forwarded = report.forwarded, "poll cycle finished");
                },
            }
        }
        debug!("poll loop stopped");
    }

    /// Recent messages for a channel from the first credential that can read it.
    async fn fetch(&self, channel_id: &str) -> Option<Vec<RawMessage>> {
        for source in &self.sources {
            match source
                .fetch_recent_messages(channel_id, self.config.fetch_limit)
                .await
            {
                Ok(messages) => return Some(messages),
                Err(e) => debug!(source = source.label(), channel_id, error = %e, "poll fetch failed"),
            }
        }
        warn!(channel_id, "no credential could fetch channel history");
        None
    }
}
