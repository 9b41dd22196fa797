//! Telegram destination: one chat, one forum topic per source community.
//!
//! Built on teloxide. Failures are classified into
//! [`herald_channels::DeliveryError`] at this boundary.

pub mod destination;
pub mod error;

pub use {
    destination::{TOPIC_ICON_COLOR, TelegramDestination},
    error::{Error, Result},
};
