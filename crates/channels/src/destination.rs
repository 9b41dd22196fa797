//! Destination-side seam.

use std::fmt;

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
};

use crate::error::DeliveryError;

/// Handle of a destination thread (a forum topic on Telegram).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(pub i64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The single chat everything is mirrored into.
///
/// Every error returned here is already classified; callers never look at
/// raw reason text.
#[async_trait]
pub trait Destination: Send + Sync {
    /// Whether per-community threads can be created at all.
    async fn supports_threads(&self) -> Result<bool, DeliveryError>;

    async fn create_thread(&self, name: &str) -> Result<ThreadId, DeliveryError>;

    /// Existence probe. `Ok(false)` means the thread is gone for good.
    async fn thread_exists(&self, thread: ThreadId) -> Result<bool, DeliveryError>;

    async fn send_message(
        &self,
        text: &str,
        thread: Option<ThreadId>,
    ) -> Result<MessageId, DeliveryError>;

    /// Largest text accepted by a single `send_message`, in bytes.
    fn max_message_len(&self) -> usize {
        4096
    }
}
