//! Turns raw source messages into routable [`InboundMessage`]s.

use std::{sync::Arc, time::Duration};

use {
    chrono::{DateTime, Utc},
    tracing::{debug, trace, warn},
};

use crate::{registry::SubscriptionRegistry, source::RawMessage, text::normalize};

const UNKNOWN_AUTHOR: &str = "Unknown User";

/// A message resolved to its community and ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Source message id, used for duplicate suppression only.
    pub source_id: String,
    pub content: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub community: String,
    pub channel: String,
}

impl InboundMessage {
    /// Key under which the delivery is recorded.
    #[must_use]
    pub fn key(&self) -> String {
        self.timestamp.to_rfc3339()
    }
}

/// Why a message was not routed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Dropped {
    #[error("channel {0} is not subscribed")]
    Unsubscribed(String),
    #[error("channel {0} is subscribed but could not be resolved")]
    Unresolved(String),
    #[error("message has no content")]
    Empty,
    #[error("unparseable timestamp {0:?}")]
    BadTimestamp(String),
    #[error("message is older than the recency threshold")]
    Stale,
}

pub struct MessageRouter {
    registry: Arc<SubscriptionRegistry>,
}

impl MessageRouter {
    pub fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        Self { registry }
    }

    /// Resolve and sanitise a message. Every drop is logged here at the
    /// level its cause deserves.
    pub async fn route(&self, raw: &RawMessage) -> Result<InboundMessage, Dropped> {
        if !self.registry.contains(&raw.channel_id).await {
            debug!(channel_id = %raw.channel_id, "dropping message from unsubscribed channel");
            return Err(Dropped::Unsubscribed(raw.channel_id.clone()));
        }

        let Some((community, channel)) = self.registry.resolve(&raw.channel_id).await else {
            warn!(channel_id = %raw.channel_id, "subscribed channel did not resolve, dropping message");
            return Err(Dropped::Unresolved(raw.channel_id.clone()));
        };

        let content = normalize(&raw.content);
        let content = content.trim();
        if content.is_empty() {
            trace!(channel_id = %raw.channel_id, message_id = %raw.id, "dropping empty message");
            return Err(Dropped::Empty);
        }

        let timestamp = match DateTime::parse_from_rfc3339(&raw.timestamp) {
            Ok(ts) => ts.with_timezone(&Utc),
            Err(e) => {
                warn!(
                    channel_id = %raw.channel_id,
                    timestamp = %raw.timestamp,
                    error = %e,
                    "dropping message with bad timestamp"
                );
                return Err(Dropped::BadTimestamp(raw.timestamp.clone()));
            },
        };

        let author = raw
            .author
            .as_deref()
            .map(normalize)
            .filter(|a| !a.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string());

        Ok(InboundMessage {
            source_id: raw.id.clone(),
            content: content.to_string(),
            author,
            timestamp,
            community,
            channel,
        })
    }

    /// [`route`](Self::route) plus the poll-path filter: only messages newer
    /// than `now - threshold` pass.
    pub async fn route_recent(
        &self,
        raw: &RawMessage,
        threshold: Duration,
        now: DateTime<Utc>,
    ) -> Result<InboundMessage, Dropped> {
        let msg = self.route(raw).await?;
        let cutoff = chrono::Duration::from_std(threshold)
            .ok()
            .and_then(|t| now.checked_sub_signed(t))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        if msg.timestamp <= cutoff {
            trace!(channel_id = %raw.channel_id, message_id = %raw.id, "skipping stale message");
            return Err(Dropped::Stale);
        }
        Ok(msg)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::store::StateStore, chrono::TimeZone};

    async fn router() -> MessageRouter {
        let registry = Arc::new(SubscriptionRegistry::new(Arc::new(StateStore::in_memory())));
        registry.add_channel("Acme", "100", "announcements").await;
        MessageRouter::new(registry)
    }

    fn raw(channel_id: &str, content: &str, timestamp: &str) -> RawMessage {
        RawMessage {
            id: "1".into(),
            channel_id: channel_id.into(),
            author: Some("alice".into()),
            content: content.into(),
            timestamp: timestamp.into(),
        }
    }

    #[tokio::test]
    async fn routes_subscribed_channel() {
        let msg = router()
            .await
            .route(&raw("100", "  hello  ", "2024-05-01T12:00:00.123000+00:00"))
            .await
            .unwrap();
        assert_eq!(msg.community, "Acme");
        assert_eq!(msg.channel, "announcements");
        assert_eq!(msg.content, "hello");
        assert_eq!(msg.author, "alice");
        assert_eq!(msg.key(), "2024-05-01T12:00:00.123+00:00");
    }

    #[tokio::test]
    async fn unsubscribed_channel_is_dropped() {
        let out = router()
            .await
            .route(&raw("999", "hello", "2024-05-01T12:00:00+00:00"))
            .await;
        assert_eq!(out, Err(Dropped::Unsubscribed("999".into())));
    }

    #[tokio::test]
    async fn whitespace_and_controls_only_is_empty() {
        let out = router()
            .await
            .route(&raw("100", " \u{0}\u{7} \n", "2024-05-01T12:00:00+00:00"))
            .await;
        assert_eq!(out, Err(Dropped::Empty));
    }

    #[tokio::test]
    async fn bad_timestamp_is_dropped() {
        let out = router().await.route(&raw("100", "hi", "yesterday")).await;
        assert_eq!(out, Err(Dropped::BadTimestamp("yesterday".into())));
    }

    #[tokio::test]
    async fn missing_author_gets_placeholder() {
        let mut m = raw("100", "hi", "2024-05-01T12:00:00+00:00");
        m.author = None;
        let msg = router().await.route(&m).await.unwrap();
        assert_eq!(msg.author, "Unknown User");
    }

    #[tokio::test]
    async fn recency_filter_excludes_old_messages() {
        let router = router().await;
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let threshold = Duration::from_secs(120);

        let fresh = raw("100", "fresh", "2024-05-01T11:59:00+00:00");
        let old = raw("100", "old", "2024-05-01T11:50:00+00:00");
        let edge = raw("100", "edge", "2024-05-01T11:58:00+00:00");

        assert!(router.route_recent(&fresh, threshold, now).await.is_ok());
        assert_eq!(
            router.route_recent(&old, threshold, now).await,
            Err(Dropped::Stale)
        );
        assert_eq!(
            router.route_recent(&edge, threshold, now).await,
            Err(Dropped::Stale)
        );
    }
}
