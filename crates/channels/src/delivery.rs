//! Outbound delivery with classified retry.
//!
//! Each chunk gets a bounded number of attempts. A missing thread is
//! recreated once and then abandoned for unthreaded delivery, a rate limit
//! waits exactly as long as asked, and anything else waits a fixed delay.
//! Terminal failures are logged and dropped.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};

use {
    herald_config::HeraldConfig,
    tokio::sync::Mutex,
    tracing::{debug, error, warn},
};

use crate::{
    destination::{Destination, MessageId, ThreadId},
    error::DeliveryError,
    format::{chunk_message, format_message},
    router::InboundMessage,
    store::StateStore,
    threads::ThreadManager,
};

#[derive(Debug, Clone)]
pub struct DeliverySettings {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    /// Wait used when a rate limit reports no usable duration.
    pub rate_limit_default: Duration,
    pub chunk_len: usize,
    pub show_timestamps: bool,
}

impl DeliverySettings {
    #[must_use]
    pub fn from_config(config: &HeraldConfig) -> Self {
        Self {
            max_attempts: config.delivery.max_attempts.max(1),
            retry_delay: config.delivery.retry_delay(),
            rate_limit_default: config.delivery.rate_limit_default(),
            chunk_len: config.delivery.chunk_len,
            show_timestamps: config.telegram.show_timestamps,
        }
    }
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self::from_config(&HeraldConfig::default())
    }
}

/// Outcome of a [`DeliveryPipeline::send_messages`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

pub struct DeliveryPipeline {
    destination: Arc<dyn Destination>,
    threads: Arc<ThreadManager>,
    store: Arc<StateStore>,
    settings: DeliverySettings,
    /// One lock per community so concurrent batches do not interleave.
    community_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DeliveryPipeline {
    pub fn new(
        destination: Arc<dyn Destination>,
        threads: Arc<ThreadManager>,
        store: Arc<StateStore>,
        settings: DeliverySettings,
    ) -> Self {
        Self {
            destination,
            threads,
            store,
            settings,
            community_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &DeliverySettings {
        &self.settings
    }

    /// Deliver `content` into the community's thread, chunked as needed.
    ///
    /// Returns the ids of the delivered chunks. Fails only if no chunk
    /// could be delivered.
    pub async fn send(
        &self,
        content: &str,
        community: &str,
    ) -> Result<Vec<MessageId>, DeliveryError> {
        let mut thread = self.threads.get_or_create_thread(community).await;
        let limit = self
            .settings
            .chunk_len
            .min(self.destination.max_message_len());

        let mut delivered = Vec::new();
        let mut last_error = None;
        for chunk in chunk_message(content, limit) {
            match self.send_chunk(&chunk, community, &mut thread).await {
                Ok(id) => delivered.push(id),
                Err(e) => last_error = Some(e),
            }
        }

        match last_error {
            Some(e) if delivered.is_empty() => Err(e),
            _ => Ok(delivered),
        }
    }

    /// Deliver a batch, grouped per community and in ascending timestamp
    /// order within each community, then record what went out.
    pub async fn send_messages(&self, messages: Vec<InboundMessage>) -> DeliveryReport {
        let mut by_community: BTreeMap<String, Vec<InboundMessage>> = BTreeMap::new();
        for msg in messages {
            by_community
                .entry(msg.community.clone())
                .or_default()
                .push(msg);
        }

        let mut report = DeliveryReport::default();
        for (community, mut batch) in by_community {
            batch.sort_by_key(|m| m.timestamp);

            let lock = self.community_lock(&community).await;
            let _serialised = lock.lock().await;

            let mut record = Vec::new();
            for msg in &batch {
                let text = format_message(msg, self.settings.show_timestamps);
                match self.send(&text, &community).await {
                    Ok(ids) => {
                        report.delivered += 1;
                        record.extend(ids.into_iter().map(|id| (msg.key(), id.0)));
                    },
                    Err(_) => report.failed += 1,
                }
            }

            if record.is_empty() {
                continue;
            }
            debug!(community, messages = record.len(), "recording deliveries");
            if let Err(e) = self.store.update(|s| s.messages.extend(record)).await {
                warn!(community, error = %e, "failed to persist delivery record");
            }
        }
        report
    }

    async fn send_chunk(
        &self,
        chunk: &str,
        community: &str,
        thread: &mut Option<ThreadId>,
    ) -> Result<MessageId, DeliveryError> {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut recreated = false;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match self.destination.send_message(chunk, *thread).await {
                Ok(id) => return Ok(id),
                Err(err) => err,
            };

            if attempt >= max_attempts {
                error!(
                    community,
                    attempts = attempt,
                    error = %err,
                    "delivery failed, dropping chunk"
                );
                return Err(err);
            }

            match &err {
                DeliveryError::MissingThread => match *thread {
                    Some(stale) if !recreated => {
                        recreated = true;
                        warn!(community, thread_id = %stale, "thread not found, recreating");
                        *thread = self.threads.recreate_thread(community, stale).await;
                    },
                    _ => {
                        warn!(community, "thread still missing, falling back to unthreaded delivery");
                        *thread = None;
                    },
                },
                DeliveryError::RateLimited { retry_after } => {
                    let wait = retry_after.unwrap_or(self.settings.rate_limit_default);
                    warn!(
                        community,
                        attempt,
                        retry_after_secs = wait.as_secs_f64(),
                        "rate limited, waiting before retry"
                    );
                    tokio::time::sleep(wait).await;
                },
                DeliveryError::Other { reason } => {
                    warn!(community, attempt, reason = %reason, "send failed, retrying");
                    tokio::time::sleep(self.settings.retry_delay).await;
                },
            }
        }
    }

    async fn community_lock(&self, community: &str) -> Arc<Mutex<()>> {
        let mut locks = self.community_locks.lock().await;
        Arc::clone(locks.entry(community.to_string()).or_default())
    }
}
