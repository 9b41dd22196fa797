//! The set of channels in scope and the communities they belong to.
//!
//! Scope is the configured seed plus everything discovered since, and only
//! ever grows until an explicit reset. All reads and writes go through one
//! lock; discovered communities are persisted while it is held.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
};

use {
    herald_config::SeedMap,
    tokio::sync::Mutex,
    tracing::{debug, info, warn},
};

use crate::{
    source::ChannelInfo,
    store::{PersistedChannel, PersistedCommunity, StateStore},
};

/// How a channel's messages can reach us. Kept in memory only and
/// recomputed at every session start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AccessMode {
    #[default]
    None,
    Push,
    Pull,
    Both,
}

impl AccessMode {
    #[must_use]
    pub fn from_flags(push: bool, pull: bool) -> Self {
        match (push, pull) {
            (true, true) => Self::Both,
            (true, false) => Self::Push,
            (false, true) => Self::Pull,
            (false, false) => Self::None,
        }
    }

    #[must_use]
    pub fn push(self) -> bool {
        matches!(self, Self::Push | Self::Both)
    }

    #[must_use]
    pub fn pull(self) -> bool {
        matches!(self, Self::Pull | Self::Both)
    }

    /// Access granted through either of two credentials.
    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self::from_flags(self.push() || other.push(), self.pull() || other.pull())
    }
}

/// A subscribed channel with its owning community.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEntry {
    pub id: String,
    pub name: String,
    pub community: String,
    pub community_id: Option<String>,
    pub access: AccessMode,
}

#[derive(Debug, Default)]
struct Community {
    id: Option<String>,
    /// Insertion-ordered (channel id, channel name).
    channels: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct Inner {
    communities: BTreeMap<String, Community>,
    /// channel id → (community name, channel name)
    index: HashMap<String, (String, String)>,
    known_ids: HashSet<String>,
    access: HashMap<String, AccessMode>,
}

impl Inner {
    fn insert_channel(&mut self, community: &str, channel_id: &str, channel_name: &str) -> bool {
        if self.index.contains_key(channel_id) {
            return false;
        }
        self.communities
            .entry(community.to_string())
            .or_default()
            .channels
            .push((channel_id.to_string(), channel_name.to_string()));
        self.index.insert(
            channel_id.to_string(),
            (community.to_string(), channel_name.to_string()),
        );
        true
    }

    fn set_community_id(&mut self, community: &str, id: &str) {
        if let Some(entry) = self.communities.get_mut(community) {
            if entry.id.is_none() {
                entry.id = Some(id.to_string());
            }
        }
        self.known_ids.insert(id.to_string());
    }

    fn persisted(&self) -> BTreeMap<String, PersistedCommunity> {
        self.communities
            .iter()
            .map(|(name, c)| {
                (name.clone(), PersistedCommunity {
                    id: c.id.clone(),
                    channels: c
                        .channels
                        .iter()
                        .map(|(id, name)| PersistedChannel {
                            id: id.clone(),
                            name: name.clone(),
                        })
                        .collect(),
                })
            })
            .collect()
    }
}

pub struct SubscriptionRegistry {
    inner: Mutex<Inner>,
    store: Arc<StateStore>,
}

impl SubscriptionRegistry {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            store,
        }
    }

    /// Add the configured bootstrap channels. Not persisted; the seed is
    /// re-applied from config at every start.
    pub async fn seed(&self, seed: &SeedMap) {
        let mut inner = self.inner.lock().await;
        for (community, channels) in seed {
            for (id, name) in channels {
                inner.insert_channel(community, id, name);
            }
        }
        debug!(channels = inner.index.len(), "registry seeded");
    }

    /// Load persisted subscriptions into memory.
    pub async fn restore(&self) {
        let state = self.store.snapshot().await;
        let mut inner = self.inner.lock().await;
        for (community, persisted) in &state.communities {
            inner.communities.entry(community.clone()).or_default();
            for channel in &persisted.channels {
                inner.insert_channel(community, &channel.id, &channel.name);
            }
            if let Some(id) = &persisted.id {
                inner.set_community_id(community, id);
            }
        }
        debug!(
            communities = inner.communities.len(),
            channels = inner.index.len(),
            "registry restored"
        );
    }

    /// Subscribe a single channel. Returns `false` if it was already in scope.
    pub async fn add_channel(&self, community: &str, channel_id: &str, channel_name: &str) -> bool {
        let mut inner = self.inner.lock().await;
        if !inner.insert_channel(community, channel_id, channel_name) {
            return false;
        }
        self.persist(&inner).await;
        true
    }

    pub async fn contains(&self, channel_id: &str) -> bool {
        self.inner.lock().await.index.contains_key(channel_id)
    }

    /// (community name, channel name) for a subscribed channel.
    pub async fn resolve(&self, channel_id: &str) -> Option<(String, String)> {
        self.inner.lock().await.index.get(channel_id).cloned()
    }

    /// Whether a community is already known, by id or by name.
    pub async fn knows_community(&self, id: &str, name: &str) -> bool {
        let inner = self.inner.lock().await;
        inner.known_ids.contains(id) || inner.communities.contains_key(name)
    }

    /// Register a newly found community and its selected channels as one
    /// atomic step.
    ///
    /// Returns `false` (and changes nothing but the id mapping) if the
    /// community was already known, so concurrent discoveries of the same
    /// community register it exactly once.
    pub async fn register_community(&self, id: &str, name: &str, channels: &[ChannelInfo]) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.known_ids.contains(id) {
            return false;
        }
        if inner.communities.contains_key(name) {
            // Seeded by name only; remember the id so scans skip it.
            inner.set_community_id(name, id);
            self.persist(&inner).await;
            return false;
        }

        inner.communities.insert(name.to_string(), Community {
            id: Some(id.to_string()),
            channels: Vec::new(),
        });
        inner.known_ids.insert(id.to_string());
        for channel in channels {
            if !inner.insert_channel(name, &channel.id, &channel.name) {
                warn!(
                    community = name,
                    channel_id = %channel.id,
                    "channel already subscribed under another community"
                );
            }
        }
        self.persist(&inner).await;
        info!(community = name, channels = channels.len(), "community registered");
        true
    }

    /// Snapshot of every subscribed channel.
    pub async fn channels(&self) -> Vec<ChannelEntry> {
        let inner = self.inner.lock().await;
        let access = &inner.access;
        inner
            .communities
            .iter()
            .flat_map(|(community, c)| {
                c.channels.iter().map(move |(id, name)| ChannelEntry {
                    id: id.clone(),
                    name: name.clone(),
                    community: community.clone(),
                    community_id: c.id.clone(),
                    access: access.get(id).copied().unwrap_or_default(),
                })
            })
            .collect()
    }

    pub async fn set_access(&self, channel_id: &str, access: AccessMode) {
        self.inner
            .lock()
            .await
            .access
            .insert(channel_id.to_string(), access);
    }

    pub async fn access(&self, channel_id: &str) -> AccessMode {
        self.inner
            .lock()
            .await
            .access
            .get(channel_id)
            .copied()
            .unwrap_or_default()
    }

    /// Channel ids whose history can be fetched, in stable order.
    pub async fn pull_reachable_channels(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner
            .communities
            .values()
            .flat_map(|c| c.channels.iter().map(|(id, _)| id))
            .filter(|id| inner.access.get(*id).is_some_and(|a| a.pull()))
            .cloned()
            .collect()
    }

    /// Drop every subscription and re-apply `seed`. Clears the persisted
    /// subscriptions too.
    pub async fn reset(&self, seed: &SeedMap) {
        let mut inner = self.inner.lock().await;
        *inner = Inner::default();
        for (community, channels) in seed {
            for (id, name) in channels {
                inner.insert_channel(community, id, name);
            }
        }
        if let Err(e) = self.store.update(|s| s.communities.clear()).await {
            warn!(error = %e, "failed to persist subscription reset");
        }
        info!("subscriptions reset");
    }

    async fn persist(&self, inner: &Inner) {
        let communities = inner.persisted();
        if let Err(e) = self.store.update(|s| s.communities = communities).await {
            warn!(error = %e, "failed to persist subscriptions");
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::source::ChannelKind};

    fn registry() -> SubscriptionRegistry {
        SubscriptionRegistry::new(Arc::new(StateStore::in_memory()))
    }

    fn seed() -> SeedMap {
        let mut seed = SeedMap::new();
        seed.entry("Monad".into())
            .or_default()
            .insert("1036885738182168597".into(), "announcements".into());
        seed
    }

    fn announcements(id: &str) -> ChannelInfo {
        ChannelInfo {
            id: id.into(),
            name: "announcements".into(),
            kind: ChannelKind::Text,
        }
    }

    #[tokio::test]
    async fn seed_then_resolve() {
        let reg = registry();
        reg.seed(&seed()).await;

        assert!(reg.contains("1036885738182168597").await);
        assert!(!reg.contains("999").await);
        assert_eq!(
            reg.resolve("1036885738182168597").await,
            Some(("Monad".into(), "announcements".into()))
        );
        assert_eq!(reg.resolve("999").await, None);
    }

    #[tokio::test]
    async fn add_channel_is_idempotent_and_persisted() {
        let store = Arc::new(StateStore::in_memory());
        let reg = SubscriptionRegistry::new(Arc::clone(&store));

        assert!(reg.add_channel("Acme", "100", "announcements").await);
        assert!(!reg.add_channel("Acme", "100", "announcements").await);

        let state = store.snapshot().await;
        assert_eq!(state.communities["Acme"].channels.len(), 1);
    }

    #[tokio::test]
    async fn register_community_once() {
        let reg = registry();
        assert!(!reg.knows_community("42", "Acme").await);

        assert!(reg.register_community("42", "Acme", &[announcements("100")]).await);
        assert!(!reg.register_community("42", "Acme", &[announcements("100")]).await);

        assert!(reg.knows_community("42", "Renamed").await);
        assert_eq!(reg.channels().await.len(), 1);
    }

    #[tokio::test]
    async fn seeded_community_learns_its_id() {
        let reg = registry();
        reg.seed(&seed()).await;

        assert!(reg.knows_community("7", "Monad").await);
        assert!(!reg.register_community("7", "Monad", &[announcements("555")]).await);
        assert!(!reg.contains("555").await);

        let entry = reg.channels().await.remove(0);
        assert_eq!(entry.community_id.as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn restore_reloads_persisted_subscriptions() {
        let store = Arc::new(StateStore::in_memory());
        SubscriptionRegistry::new(Arc::clone(&store))
            .register_community("42", "Acme", &[announcements("100")])
            .await;

        let reg = SubscriptionRegistry::new(store);
        reg.restore().await;
        assert!(reg.contains("100").await);
        assert!(reg.knows_community("42", "whatever").await);
    }

    #[tokio::test]
    async fn pull_reachable_filters_by_access() {
        let reg = registry();
        reg.add_channel("Acme", "1", "announcements").await;
        reg.add_channel("Acme", "2", "news").await;
        reg.add_channel("Acme", "3", "updates").await;

        reg.set_access("1", AccessMode::Push).await;
        reg.set_access("2", AccessMode::Both).await;
        reg.set_access("3", AccessMode::Pull).await;

        assert_eq!(reg.pull_reachable_channels().await, vec!["2", "3"]);
        assert_eq!(reg.access("1").await, AccessMode::Push);
        assert_eq!(reg.access("missing").await, AccessMode::None);
    }

    #[tokio::test]
    async fn reset_keeps_only_seed() {
        let store = Arc::new(StateStore::in_memory());
        let reg = SubscriptionRegistry::new(Arc::clone(&store));
        reg.seed(&seed()).await;
        reg.register_community("42", "Acme", &[announcements("100")]).await;

        reg.reset(&seed()).await;

        assert!(!reg.contains("100").await);
        assert!(reg.contains("1036885738182168597").await);
        assert!(store.snapshot().await.communities.is_empty());
    }

    #[test]
    fn access_union() {
        assert_eq!(AccessMode::Push.union(AccessMode::Pull), AccessMode::Both);
        assert_eq!(AccessMode::None.union(AccessMode::Pull), AccessMode::Pull);
        assert!(!AccessMode::None.union(AccessMode::None).pull());
    }
}
