//! Community → destination thread bindings.
//!
//! The whole check/verify/create/persist sequence runs under one lock, so
//! concurrent callers for the same community create exactly one thread.

use std::{collections::HashMap, sync::Arc};

use {
    tokio::sync::{Mutex, OnceCell},
    tracing::{debug, info, warn},
};

use crate::{
    destination::{Destination, ThreadId},
    store::StateStore,
};

/// Telegram's forum topic name limit, in characters.
const MAX_THREAD_NAME_CHARS: usize = 128;

pub struct ThreadManager {
    destination: Arc<dyn Destination>,
    store: Arc<StateStore>,
    bindings: Mutex<HashMap<String, ThreadId>>,
    threaded: OnceCell<bool>,
}

impl ThreadManager {
    pub fn new(destination: Arc<dyn Destination>, store: Arc<StateStore>) -> Self {
        Self {
            destination,
            store,
            bindings: Mutex::new(HashMap::new()),
            threaded: OnceCell::new(),
        }
    }

    /// Load persisted bindings.
    pub async fn restore(&self) {
        let topics = self.store.snapshot().await.topics;
        let mut bindings = self.bindings.lock().await;
        bindings.extend(topics);
        debug!(bindings = bindings.len(), "thread bindings restored");
    }

    /// Current binding without verifying it.
    pub async fn binding(&self, community: &str) -> Option<ThreadId> {
        self.bindings.lock().await.get(community).copied()
    }

    /// Thread for `community`, verified alive or freshly created.
    ///
    /// `None` means deliver unthreaded: the destination has no threads, or
    /// creating one failed.
    pub async fn get_or_create_thread(&self, community: &str) -> Option<ThreadId> {
        if !self.threads_supported().await {
            return None;
        }

        let mut bindings = self.bindings.lock().await;
        if let Some(&thread) = bindings.get(community) {
            match self.destination.thread_exists(thread).await {
                Ok(true) => return Some(thread),
                Ok(false) => {
                    info!(community, thread_id = %thread, "thread is gone, evicting binding");
                    bindings.remove(community);
                },
                Err(e) => {
                    // Not conclusive; a send will tell.
                    debug!(community, thread_id = %thread, error = %e, "thread probe failed, reusing binding");
                    return Some(thread);
                },
            }
        }

        self.create_locked(&mut bindings, community).await
    }

    /// Replace `stale` after a send reported it missing.
    ///
    /// If another caller already replaced it, that replacement is returned
    /// and nothing is created.
    pub async fn recreate_thread(&self, community: &str, stale: ThreadId) -> Option<ThreadId> {
        let mut bindings = self.bindings.lock().await;
        match bindings.get(community) {
            Some(&current) if current != stale => return Some(current),
            Some(_) => {
                bindings.remove(community);
            },
            None => {},
        }
        self.create_locked(&mut bindings, community).await
    }

    /// Forget every binding, in memory and on disk.
    pub async fn reset(&self) {
        let mut bindings = self.bindings.lock().await;
        bindings.clear();
        if let Err(e) = self.store.update(|s| s.topics.clear()).await {
            warn!(error = %e, "failed to persist thread binding reset");
        }
        info!("thread bindings reset");
    }

    async fn create_locked(
        &self,
        bindings: &mut HashMap<String, ThreadId>,
        community: &str,
    ) -> Option<ThreadId> {
        let name: String = community.chars().take(MAX_THREAD_NAME_CHARS).collect();
        let thread = match self.destination.create_thread(&name).await {
            Ok(thread) => thread,
            Err(e) => {
                warn!(community, error = %e, "failed to create thread, delivering unthreaded");
                return None;
            },
        };

        bindings.insert(community.to_string(), thread);
        let key = community.to_string();
        if let Err(e) = self.store.update(|s| s.topics.insert(key, thread)).await {
            warn!(community, error = %e, "failed to persist thread binding");
        }
        info!(community, thread_id = %thread, "thread created");
        Some(thread)
    }

    /// Asked once; a failed check is retried on the next call.
    async fn threads_supported(&self) -> bool {
        let checked = self
            .threaded
            .get_or_try_init(|| self.destination.supports_threads())
            .await;
        match checked {
            Ok(supported) => *supported,
            Err(e) => {
                warn!(error = %e, "could not determine thread support, delivering unthreaded");
                false
            },
        }
    }
}
