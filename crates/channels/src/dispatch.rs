//! Push-event handling shared by every streaming connection.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use {
    async_trait::async_trait,
    tokio_util::task::TaskTracker,
    tracing::{debug, warn},
};

use crate::{
    delivery::DeliveryPipeline,
    discovery::{DiscoveryEngine, Trigger},
    pool::WorkerPool,
    router::{InboundMessage, MessageRouter},
    source::{CommunitySnapshot, RawMessage, SessionInfo, SourceApi, SourceEventSink},
};

const DEDUP_WINDOW: Duration = Duration::from_secs(10 * 60);
const DEDUP_CAPACITY: usize = 4096;

/// Message ids seen recently, bounded by age and count.
#[derive(Debug)]
pub struct RecentIds {
    window: Duration,
    capacity: usize,
    order: VecDeque<(String, Instant)>,
    ids: HashSet<String>,
}

impl RecentIds {
    #[must_use]
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            window,
            capacity: capacity.max(1),
            order: VecDeque::new(),
            ids: HashSet::new(),
        }
    }

    /// Record `id`; `false` if it was already seen within the window.
    pub fn first_seen(&mut self, id: &str, now: Instant) -> bool {
        while let Some((_, at)) = self.order.front() {
            if now.duration_since(*at) < self.window {
                break;
            }
            self.evict_oldest();
        }

        if self.ids.contains(id) {
            return false;
        }
        if self.order.len() >= self.capacity {
            self.evict_oldest();
        }
        self.ids.insert(id.to_string());
        self.order.push_back((id.to_string(), now));
        true
    }

    fn evict_oldest(&mut self) {
        if let Some((id, _)) = self.order.pop_front() {
            self.ids.remove(&id);
        }
    }
}

impl Default for RecentIds {
    fn default() -> Self {
        Self::new(DEDUP_WINDOW, DEDUP_CAPACITY)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Enqueued {
    /// A drain job for the community is already admitted.
    Queued,
    /// First message in an idle lane; the caller must start a drain job.
    Opened,
    Full,
}

/// Per-community FIFO of routed messages awaiting delivery.
///
/// A community has an entry only while exactly one drain job owns it, so
/// messages for one community leave in the order they arrived.
#[derive(Debug, Default)]
struct Lanes {
    queues: Mutex<HashMap<String, VecDeque<InboundMessage>>>,
}

impl Lanes {
    fn push(&self, message: InboundMessage, limit: usize) -> Enqueued {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        match queues.get_mut(&message.community) {
            Some(queue) if queue.len() >= limit => Enqueued::Full,
            Some(queue) => {
                queue.push_back(message);
                Enqueued::Queued
            },
            None => {
                queues.insert(message.community.clone(), VecDeque::from([message]));
                Enqueued::Opened
            },
        }
    }

    /// Everything queued for `community`. An empty result closes the lane.
    fn take(&self, community: &str) -> Vec<InboundMessage> {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        match queues.get_mut(community) {
            Some(queue) if !queue.is_empty() => queue.drain(..).collect(),
            _ => {
                queues.remove(community);
                Vec::new()
            },
        }
    }

    /// Close the lane without delivering. Returns how many were dropped.
    fn abandon(&self, community: &str) -> usize {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(community)
            .map_or(0, |queue| queue.len())
    }
}

async fn drain_lane(lanes: Arc<Lanes>, pipeline: Arc<DeliveryPipeline>, community: String) {
    loop {
        let batch = lanes.take(&community);
        if batch.is_empty() {
            break;
        }
        pipeline.send_messages(batch).await;
    }
}

/// Routes push events into discovery and delivery without blocking the
/// connection that produced them.
///
/// Deliveries run on the shared [`WorkerPool`], one drain job per community
/// at a time. Discovery work runs on the dispatcher's own tracker, drained
/// with [`close`](Self::close) and [`wait`](Self::wait).
pub struct EventDispatcher {
    router: Arc<MessageRouter>,
    pipeline: Arc<DeliveryPipeline>,
    discovery: Arc<DiscoveryEngine>,
    pool: Arc<WorkerPool>,
    recent: Mutex<RecentIds>,
    lanes: Arc<Lanes>,
    background: TaskTracker,
}

impl EventDispatcher {
    pub fn new(
        router: Arc<MessageRouter>,
        pipeline: Arc<DeliveryPipeline>,
        discovery: Arc<DiscoveryEngine>,
        pool: Arc<WorkerPool>,
    ) -> Self {
        Self {
            router,
            pipeline,
            discovery,
            pool,
            recent: Mutex::new(RecentIds::default()),
            lanes: Arc::new(Lanes::default()),
            background: TaskTracker::new(),
        }
    }

    /// Discovery tasks started and not yet finished.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.background.len()
    }

    pub fn close(&self) {
        self.background.close();
    }

    /// Wait for in-flight discovery work. Returns only after
    /// [`close`](Self::close).
    pub async fn wait(&self) {
        self.background.wait().await;
    }

    fn first_seen(&self, id: &str) -> bool {
        self.recent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .first_seen(id, Instant::now())
    }
}

#[async_trait]
impl SourceEventSink for EventDispatcher {
    async fn session_ready(&self, session: SessionInfo, source: Arc<dyn SourceApi>) {
        let discovery = Arc::clone(&self.discovery);
        self.background.spawn(async move {
            discovery
                .bootstrap(&session.communities, source.as_ref())
                .await;
        });
    }

    async fn message_created(&self, message: RawMessage) {
        if !self.first_seen(&message.id) {
            debug!(message_id = %message.id, "duplicate message from another session");
            return;
        }
        let Ok(inbound) = self.router.route(&message).await else {
            return;
        };
        let community = inbound.community.clone();

        match self.lanes.push(inbound, self.pool.capacity()) {
            Enqueued::Queued => {},
            Enqueued::Full => {
                warn!(message_id = %message.id, community = %community, "delivery lane full, leaving it to the poller");
            },
            Enqueued::Opened => {
                let job = drain_lane(
                    Arc::clone(&self.lanes),
                    Arc::clone(&self.pipeline),
                    community.clone(),
                );
                if let Err(e) = self.pool.try_submit(job) {
                    let dropped = self.lanes.abandon(&community);
                    warn!(
                        message_id = %message.id,
                        community = %community,
                        dropped,
                        error = %e,
                        "delivery rejected, leaving it to the poller"
                    );
                }
            },
        }
    }

    async fn community_joined(&self, community: CommunitySnapshot, source: Arc<dyn SourceApi>) {
        let discovery = Arc::clone(&self.discovery);
        self.background.spawn(async move {
            discovery
                .process_community(&community, source.as_ref(), Trigger::Realtime)
                .await;
        });
    }
}
