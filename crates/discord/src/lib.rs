//! Discord source: the streaming gateway session and the REST pull client.

pub mod error;
pub mod gateway;
pub mod protocol;
pub mod rest;

pub use {
    error::{Error, Result},
    gateway::{ConnectionState, GatewayConnection, GatewaySettings},
    rest::DiscordRest,
};
