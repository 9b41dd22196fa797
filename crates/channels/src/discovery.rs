//! Finding new announcement channels, periodically and on join events.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use {
    herald_config::DiscoveryConfig,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    classify::select_channels,
    delivery::DeliveryPipeline,
    format::onboarding_notice,
    registry::{AccessMode, SubscriptionRegistry},
    router::MessageRouter,
    source::{CommunitySnapshot, CommunitySummary, SourceApi},
    threads::ThreadManager,
};

/// What triggered single-community processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Scan,
    /// A join event on a live session.
    Realtime,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub communities_seen: usize,
    pub registered: usize,
    pub failed: usize,
}

pub struct DiscoveryEngine {
    registry: Arc<SubscriptionRegistry>,
    threads: Arc<ThreadManager>,
    pipeline: Arc<DeliveryPipeline>,
    router: Arc<MessageRouter>,
    sources: Vec<Arc<dyn SourceApi>>,
    config: DiscoveryConfig,
}

impl DiscoveryEngine {
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        threads: Arc<ThreadManager>,
        pipeline: Arc<DeliveryPipeline>,
        router: Arc<MessageRouter>,
        sources: Vec<Arc<dyn SourceApi>>,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            registry,
            threads,
            pipeline,
            router,
            sources,
            config,
        }
    }

    /// Session-start verification: work out how each subscribed channel can
    /// reach us through this credential.
    ///
    /// Push access comes from the session's visible communities, pull access
    /// from a probe. Results are merged with what other credentials found.
    pub async fn bootstrap(&self, visible: &[CommunitySummary], source: &dyn SourceApi) {
        let visible_ids: HashSet<&str> = visible.iter().map(|c| c.id.as_str()).collect();
        let visible_names: HashSet<&str> = visible.iter().map(|c| c.name.as_str()).collect();

        let channels = self.registry.channels().await;
        let (mut push, mut pull) = (0usize, 0usize);
        for channel in &channels {
            let pushed = match &channel.community_id {
                Some(id) => visible_ids.contains(id.as_str()),
                None => visible_names.contains(channel.community.as_str()),
            };
            let access = self.verify_access(&channel.id, source, pushed).await;
            push += usize::from(access.push());
            pull += usize::from(access.pull());
        }

        info!(
            source = source.label(),
            channels = channels.len(),
            push_reachable = push,
            pull_reachable = pull,
            "channel access verified"
        );
    }

    /// One pass over every community visible to any credential.
    pub async fn scan(&self) -> ScanReport {
        let mut report = ScanReport::default();
        let mut order: Vec<CommunitySummary> = Vec::new();
        let mut seen_by: HashMap<String, Vec<usize>> = HashMap::new();

        for (i, source) in self.sources.iter().enumerate() {
            match source.list_communities().await {
                Ok(communities) => {
                    for community in communities {
                        let entry = seen_by.entry(community.id.clone()).or_default();
                        if entry.is_empty() {
                            order.push(community);
                        }
                        entry.push(i);
                    }
                },
                Err(e) => warn!(source = source.label(), error = %e, "failed to list communities"),
            }
        }
        report.communities_seen = order.len();

        let mut fetched_any = false;
        for community in &order {
            if self
                .registry
                .knows_community(&community.id, &community.name)
                .await
            {
                continue;
            }
            if fetched_any {
                tokio::time::sleep(self.config.community_delay()).await;
            }
            fetched_any = true;

            let candidates = seen_by.get(&community.id).map(Vec::as_slice).unwrap_or(&[]);
            match self.snapshot(community, candidates).await {
                Some((snapshot, source)) => {
                    if self
                        .process_community(&snapshot, source.as_ref(), Trigger::Scan)
                        .await
                    {
                        report.registered += 1;
                    }
                },
                None => report.failed += 1,
            }
        }

        debug!(
            seen = report.communities_seen,
            registered = report.registered,
            failed = report.failed,
            "discovery scan finished"
        );
        report
    }

    /// Scan at the configured interval until cancelled. The first scan runs
    /// immediately.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.scan_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.scan().await;
                    if report.registered > 0 {
                        info!(registered = report.registered, "discovery scan found new communities");
                    }
                },
            }
        }
        debug!("discovery loop stopped");
    }

    /// Classify, register, bind, and backfill a single community.
    ///
    /// Returns `true` if the community was newly registered.
    pub async fn process_community(
        &self,
        community: &CommunitySnapshot,
        source: &dyn SourceApi,
        trigger: Trigger,
    ) -> bool {
        let limit = match trigger {
            Trigger::Scan => self.config.scan_channel_limit,
            Trigger::Realtime => self.config.realtime_channel_limit,
        };
        let selected = select_channels(&community.channels, limit);
        if selected.is_empty() {
            debug!(community = %community.name, "no announcement-like channels");
            return false;
        }
        if !self
            .registry
            .register_community(&community.id, &community.name, &selected)
            .await
        {
            return false;
        }
        info!(
            community = %community.name,
            community_id = %community.id,
            channels = selected.len(),
            ?trigger,
            "new community discovered"
        );

        // A join event arrives on a live session, so those channels are
        // pushed to us. Pull access is probed either way.
        let pushed = trigger == Trigger::Realtime;
        for channel in &selected {
            self.verify_access(&channel.id, source, pushed).await;
        }

        self.threads.get_or_create_thread(&community.name).await;

        let mut backlog = Vec::new();
        for channel in &selected {
            match source
                .fetch_recent_messages(&channel.id, self.config.backlog_limit)
                .await
            {
                Ok(messages) => {
                    for raw in &messages {
                        if let Ok(msg) = self.router.route(raw).await {
                            backlog.push(msg);
                        }
                    }
                },
                Err(e) => warn!(
                    community = %community.name,
                    channel_id = %channel.id,
                    error = %e,
                    "backlog fetch failed"
                ),
            }
        }
        if !backlog.is_empty() {
            let report = self.pipeline.send_messages(backlog).await;
            debug!(community = %community.name, delivered = report.delivered, "backlog delivered");
        }

        if trigger == Trigger::Realtime && self.config.notify_new_communities {
            let notice = onboarding_notice(&community.name, &selected);
            if let Err(e) = self.pipeline.send(&notice, &community.name).await {
                warn!(community = %community.name, error = %e, "onboarding notification failed");
            }
        }
        true
    }

    /// Probe pull access through `source` and merge it, with `pushed`, into
    /// what other credentials already found.
    async fn verify_access(
        &self,
        channel_id: &str,
        source: &dyn SourceApi,
        pushed: bool,
    ) -> AccessMode {
        let pulled = match source.probe_channel(channel_id).await {
            Ok(reachable) => reachable,
            Err(e) => {
                warn!(source = source.label(), channel_id, error = %e, "channel probe failed");
                false
            },
        };

        let access = self
            .registry
            .access(channel_id)
            .await
            .union(AccessMode::from_flags(pushed, pulled));
        self.registry.set_access(channel_id, access).await;
        access
    }

    /// Channel list for `community`, trying each credential that sees it.
    async fn snapshot(
        &self,
        community: &CommunitySummary,
        candidates: &[usize],
    ) -> Option<(CommunitySnapshot, Arc<dyn SourceApi>)> {
        for &i in candidates {
            let Some(source) = self.sources.get(i) else {
                continue;
            };
            match source.list_channels(&community.id).await {
                Ok(channels) => {
                    return Some((
                        CommunitySnapshot {
                            id: community.id.clone(),
                            name: community.name.clone(),
                            channels,
                        },
                        Arc::clone(source),
                    ));
                },
                Err(e) => debug!(
                    source = source.label(),
                    community = %community.name,
                    error = %e,
                    "channel listing failed, trying next credential"
                ),
            }
        }
        warn!(community = %community.name, "could not list channels with any credential, skipping");
        None
    }
}
