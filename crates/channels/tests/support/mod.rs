#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::{
    collections::{HashMap, HashSet, VecDeque},
    fmt,
    sync::{
        Arc, Mutex,
        atomic::{AtomicI64, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    herald_channels::{
        ChannelInfo, CommunitySummary, DeliveryError, DeliveryPipeline, DeliverySettings,
        Destination, MessageId, MessageRouter, RawMessage, SourceApi, SourceError, StateStore,
        SubscriptionRegistry, ThreadId, ThreadManager,
    },
    tracing::{
        Event, Level, Subscriber,
        field::{Field, Visit},
        subscriber::DefaultGuard,
    },
    tracing_subscriber::{
        layer::{Context, Layer, SubscriberExt},
        registry,
    },
};

/// Every event logged on the current thread while the guard is alive.
#[derive(Clone, Default)]
pub struct CapturedLogs {
    events: Arc<Mutex<Vec<(Level, String)>>>,
}

impl CapturedLogs {
    /// Capture into a fresh buffer until the returned guard drops.
    pub fn install() -> (Self, DefaultGuard) {
        let logs = Self::default();
        let guard = tracing::subscriber::set_default(registry().with(logs.clone()));
        (logs, guard)
    }

    /// `(level, message)` in emission order.
    pub fn events(&self) -> Vec<(Level, String)> {
        self.events.lock().unwrap().clone()
    }
}

struct MessageField(String);

impl Visit for MessageField {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

impl<S: Subscriber> Layer<S> for CapturedLogs {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut message = MessageField(String::new());
        event.record(&mut message);
        self.events
            .lock()
            .unwrap()
            .push((*event.metadata().level(), message.0));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    SupportsThreads,
    CreateThread(String),
    ThreadExists(ThreadId),
    Send {
        text: String,
        thread: Option<ThreadId>,
    },
}

/// Records every call; sends fail with scripted errors before succeeding.
pub struct FakeDestination {
    threaded: bool,
    calls: Mutex<Vec<Call>>,
    next_thread: AtomicI64,
    next_message: AtomicI64,
    send_failures: Mutex<VecDeque<DeliveryError>>,
    always_fail: Option<DeliveryError>,
    dead_threads: Mutex<HashSet<ThreadId>>,
    create_delay: Duration,
}

impl FakeDestination {
    pub fn new() -> Self {
        Self {
            threaded: true,
            calls: Mutex::new(Vec::new()),
            next_thread: AtomicI64::new(1),
            next_message: AtomicI64::new(1000),
            send_failures: Mutex::new(VecDeque::new()),
            always_fail: None,
            dead_threads: Mutex::new(HashSet::new()),
            create_delay: Duration::ZERO,
        }
    }

    pub fn unthreaded() -> Self {
        Self {
            threaded: false,
            ..Self::new()
        }
    }

    pub fn always_failing(err: DeliveryError) -> Self {
        Self {
            always_fail: Some(err),
            ..Self::new()
        }
    }

    pub fn with_create_delay(delay: Duration) -> Self {
        Self {
            create_delay: delay,
            ..Self::new()
        }
    }

    pub fn fail_next_send(&self, err: DeliveryError) {
        self.send_failures.lock().unwrap().push_back(err);
    }

    pub fn kill_thread(&self, thread: ThreadId) {
        self.dead_threads.lock().unwrap().insert(thread);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn creates(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::CreateThread(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    pub fn sends(&self) -> Vec<(String, Option<ThreadId>)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Send { text, thread } => Some((text, thread)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Destination for FakeDestination {
    async fn supports_threads(&self) -> Result<bool, DeliveryError> {
        self.record(Call::SupportsThreads);
        Ok(self.threaded)
    }

    async fn create_thread(&self, name: &str) -> Result<ThreadId, DeliveryError> {
        self.record(Call::CreateThread(name.to_string()));
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }
        Ok(ThreadId(self.next_thread.fetch_add(1, Ordering::SeqCst)))
    }

    async fn thread_exists(&self, thread: ThreadId) -> Result<bool, DeliveryError> {
        self.record(Call::ThreadExists(thread));
        Ok(!self.dead_threads.lock().unwrap().contains(&thread))
    }

    async fn send_message(
        &self,
        text: &str,
        thread: Option<ThreadId>,
    ) -> Result<MessageId, DeliveryError> {
        self.record(Call::Send {
            text: text.to_string(),
            thread,
        });
        if let Some(err) = &self.always_fail {
            return Err(err.clone());
        }
        if let Some(err) = self.send_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(MessageId(self.next_message.fetch_add(1, Ordering::SeqCst)))
    }
}

/// In-memory source with fixed communities, channels, and history.
#[derive(Default)]
pub struct FakeSource {
    pub label: String,
    pub communities: Vec<CommunitySummary>,
    pub channels: HashMap<String, Vec<ChannelInfo>>,
    pub messages: HashMap<String, Vec<RawMessage>>,
    pub readable: HashSet<String>,
    pub fetches: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn fetched(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceApi for FakeSource {
    fn label(&self) -> &str {
        &self.label
    }

    async fn list_communities(&self) -> Result<Vec<CommunitySummary>, SourceError> {
        Ok(self.communities.clone())
    }

    async fn list_channels(&self, community_id: &str) -> Result<Vec<ChannelInfo>, SourceError> {
        self.channels
            .get(community_id)
            .cloned()
            .ok_or_else(|| SourceError::Forbidden {
                route: format!("/guilds/{community_id}/channels"),
            })
    }

    async fn fetch_recent_messages(
        &self,
        channel_id: &str,
        limit: u32,
    ) -> Result<Vec<RawMessage>, SourceError> {
        self.fetches.lock().unwrap().push(channel_id.to_string());
        Ok(self
            .messages
            .get(channel_id)
            .map(|m| m.iter().take(limit as usize).cloned().collect())
            .unwrap_or_default())
    }

    async fn probe_channel(&self, channel_id: &str) -> Result<bool, SourceError> {
        Ok(self.readable.contains(channel_id))
    }
}

pub fn raw(id: &str, channel_id: &str, content: &str, timestamp: &str) -> RawMessage {
    RawMessage {
        id: id.into(),
        channel_id: channel_id.into(),
        author: Some("alice".into()),
        content: content.into(),
        timestamp: timestamp.into(),
    }
}

/// The relay core wired around a fake destination.
pub struct Harness {
    pub destination: Arc<FakeDestination>,
    pub store: Arc<StateStore>,
    pub registry: Arc<SubscriptionRegistry>,
    pub threads: Arc<ThreadManager>,
    pub router: Arc<MessageRouter>,
    pub pipeline: Arc<DeliveryPipeline>,
}

impl Harness {
    pub fn new(destination: FakeDestination) -> Self {
        Self::with_settings(destination, DeliverySettings {
            show_timestamps: false,
            ..DeliverySettings::default()
        })
    }

    pub fn with_settings(destination: FakeDestination, settings: DeliverySettings) -> Self {
        let destination = Arc::new(destination);
        let store = Arc::new(StateStore::in_memory());
        let registry = Arc::new(SubscriptionRegistry::new(Arc::clone(&store)));
        let threads = Arc::new(ThreadManager::new(
            Arc::clone(&destination) as Arc<dyn Destination>,
            Arc::clone(&store),
        ));
        let router = Arc::new(MessageRouter::new(Arc::clone(&registry)));
        let pipeline = Arc::new(DeliveryPipeline::new(
            Arc::clone(&destination) as Arc<dyn Destination>,
            Arc::clone(&threads),
            Arc::clone(&store),
            settings,
        ));
        Self {
            destination,
            store,
            registry,
            threads,
            router,
            pipeline,
        }
    }
}
