use std::time::Duration;

use tokio_tungstenite::tungstenite;

/// Why a gateway session ended. Every variant leads to a cold reconnect.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("websocket transport error: {0}")]
    Transport(#[from] Box<tungstenite::Error>),

    #[error("gateway closed the connection: {reason}")]
    Closed { reason: String },

    #[error("no heartbeat ack within {0:?}")]
    MissedHeartbeatAck(Duration),

    #[error("no hello frame within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("gateway requested a reconnect")]
    ServerRequestedReconnect,

    #[error("gateway invalidated the session")]
    InvalidSession,

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("invalid gateway url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

impl Error {
    #[must_use]
    pub fn protocol(message: impl std::fmt::Display) -> Self {
        Self::Protocol(message.to_string())
    }
}

impl From<tungstenite::Error> for Error {
    fn from(err: tungstenite::Error) -> Self {
        Self::Transport(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
