//! Relay core: which channels are in scope, how their messages are routed,
//! and how they reach the destination.
//!
//! Source and destination protocols plug in through [`SourceApi`],
//! [`SourceEventSink`] and [`Destination`].

pub mod classify;
pub mod delivery;
pub mod destination;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod format;
pub mod poller;
pub mod pool;
pub mod registry;
pub mod router;
pub mod source;
pub mod store;
pub mod text;
pub mod threads;

pub use {
    classify::{channel_priority, select_channels},
    delivery::{DeliveryPipeline, DeliveryReport, DeliverySettings},
    destination::{Destination, MessageId, ThreadId},
    discovery::{DiscoveryEngine, ScanReport, Trigger},
    dispatch::EventDispatcher,
    error::{DeliveryError, SourceError, StoreError},
    poller::{PollReport, ReconciliationPoller},
    pool::{PoolError, WorkerPool},
    registry::{AccessMode, ChannelEntry, SubscriptionRegistry},
    router::{Dropped, InboundMessage, MessageRouter},
    source::{
        ChannelInfo, ChannelKind, CommunitySnapshot, CommunitySummary, RawMessage, SessionInfo,
        SourceApi, SourceEventSink,
    },
    store::{PersistedState, StateStore},
    threads::ThreadManager,
};
