//! Source-side seams: the pull protocol client and the push event sink.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SourceError;

/// Channel type as far as relaying is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Text,
    /// Native announcement channel.
    Announcement,
    /// Voice, category, forum, and anything else that cannot carry posts.
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommunitySummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
    pub kind: ChannelKind,
}

/// A community together with its channel list, as delivered by a join event
/// or assembled by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommunitySnapshot {
    pub id: String,
    pub name: String,
    pub channels: Vec<ChannelInfo>,
}

/// A message as received from either protocol, before routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub id: String,
    pub channel_id: String,
    pub author: Option<String>,
    pub content: String,
    /// ISO-8601 timestamp as sent by the source.
    pub timestamp: String,
}

/// Session details reported when a streaming session becomes ready.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: String,
    pub user: Option<String>,
    /// Communities visible to this connection.
    pub communities: Vec<CommunitySummary>,
}

/// Request/response access to the source, one instance per credential.
#[async_trait]
pub trait SourceApi: Send + Sync {
    /// Short label for logs (never the credential itself).
    fn label(&self) -> &str;

    async fn list_communities(&self) -> Result<Vec<CommunitySummary>, SourceError>;

    async fn list_channels(&self, community_id: &str) -> Result<Vec<ChannelInfo>, SourceError>;

    /// Most recent messages first, at most `limit`.
    async fn fetch_recent_messages(
        &self,
        channel_id: &str,
        limit: u32,
    ) -> Result<Vec<RawMessage>, SourceError>;

    /// Whether the channel's history can be read with this credential.
    async fn probe_channel(&self, channel_id: &str) -> Result<bool, SourceError>;
}

/// Receives decoded push events from a streaming connection.
///
/// Implementations must return quickly: they are awaited on the
/// connection's read loop.
#[async_trait]
pub trait SourceEventSink: Send + Sync {
    async fn session_ready(&self, session: SessionInfo, source: Arc<dyn SourceApi>);

    async fn message_created(&self, message: RawMessage);

    async fn community_joined(&self, community: CommunitySnapshot, source: Arc<dyn SourceApi>);
}
