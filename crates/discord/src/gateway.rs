//! One streaming session per credential.
//!
//! `Disconnected → Connecting → AwaitingHandshake → Identifying → Ready`.
//! Any failure drops to `Reconnecting`, waits a fixed delay and starts over
//! with a cold handshake. Only cancellation ends the loop.

use std::{
    collections::HashSet,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    futures::{SinkExt, Stream, StreamExt},
    herald_channels::{SourceApi, SourceEventSink},
    herald_config::DiscordConfig,
    secrecy::{ExposeSecret, Secret},
    tokio::{
        sync::{mpsc, watch},
        time::Instant,
    },
    tokio_tungstenite::{connect_async, tungstenite::Message},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, trace, warn},
    url::Url,
};

use crate::{
    error::{Error, Result},
    protocol::{self, DispatchEvent, Frame},
};

/// Default websocket endpoint when none is configured or discoverable.
pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    AwaitingHandshake,
    Identifying,
    Ready,
    Reconnecting,
}

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub url: String,
    pub intents: u64,
    pub reconnect_delay: Duration,
    /// Bounds both the socket connect and the wait for the hello frame.
    pub handshake_timeout: Duration,
}

impl GatewaySettings {
    #[must_use]
    pub fn from_config(config: &DiscordConfig, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            intents: config.intents,
            reconnect_delay: config.reconnect_delay(),
            handshake_timeout: config.handshake_timeout(),
        }
    }
}

/// Runtime state of the current session, reset on every reconnect.
#[derive(Debug, Default)]
struct Session {
    session_id: Option<String>,
    visible: HashSet<String>,
}

pub struct GatewayConnection {
    token: Secret<String>,
    settings: GatewaySettings,
    sink: Arc<dyn SourceEventSink>,
    source: Arc<dyn SourceApi>,
    state: watch::Sender<ConnectionState>,
    session: Mutex<Session>,
}

impl GatewayConnection {
    /// `source` is the pull client for the same credential; it is handed to
    /// the sink along with ready and join events.
    pub fn new(
        token: Secret<String>,
        settings: GatewaySettings,
        sink: Arc<dyn SourceEventSink>,
        source: Arc<dyn SourceApi>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            token,
            settings,
            sink,
            source,
            state,
            session: Mutex::new(Session::default()),
        }
    }

    pub fn label(&self) -> &str {
        self.source.label()
    }

    /// Watch state transitions.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn session_id(&self) -> Option<String> {
        self.lock_session().session_id.clone()
    }

    /// Community ids visible to the current session, sorted.
    pub fn visible_communities(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock_session().visible.iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Connect and stay connected until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let label = self.label().to_string();
        while !cancel.is_cancelled() {
            match self.connect_once(&cancel).await {
                Ok(()) => break,
                Err(e) => {
                    warn!(
                        source = %label,
                        error = %e,
                        delay_secs = self.settings.reconnect_delay.as_secs(),
                        "gateway session lost, reconnecting"
                    );
                },
            }
            self.set_state(ConnectionState::Reconnecting);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.reconnect_delay) => {},
            }
        }
        *self.lock_session() = Session::default();
        self.set_state(ConnectionState::Disconnected);
        info!(source = %label, "gateway connection stopped");
    }

    /// One session from connect to close. `Ok` only on cancellation.
    async fn connect_once(&self, cancel: &CancellationToken) -> Result<()> {
        *self.lock_session() = Session::default();
        self.set_state(ConnectionState::Connecting);

        let url = endpoint(&self.settings.url)?;
        let timeout = self.settings.handshake_timeout;
        debug!(source = %self.label(), url = %url, "connecting to gateway");
        let (ws, _response) = tokio::time::timeout(timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| Error::HandshakeTimeout(timeout))??;
        let (mut writer, mut reader) = ws.split();

        self.set_state(ConnectionState::AwaitingHandshake);
        let interval = tokio::time::timeout(timeout, wait_for_hello(&mut reader))
            .await
            .map_err(|_| Error::HandshakeTimeout(timeout))??;
        debug!(
            source = %self.label(),
            interval_ms = interval.as_millis() as u64,
            "gateway hello"
        );

        self.set_state(ConnectionState::Identifying);
        let (outbound, mut queued) = mpsc::unbounded_channel::<String>();
        let last_seq = Arc::new(AtomicU64::new(0));
        let stop_heartbeat = cancel.child_token();
        let heartbeat = tokio::spawn(heartbeat_loop(
            interval,
            outbound.clone(),
            Arc::clone(&last_seq),
            stop_heartbeat.clone(),
        ));

        let identify = protocol::identify(self.token.expose_secret(), self.settings.intents);
        let result = match writer.send(Message::Text(identify.into())).await {
            Ok(()) => {
                self.read_loop(
                    &mut writer,
                    &mut reader,
                    &mut queued,
                    &outbound,
                    interval,
                    &last_seq,
                    cancel,
                )
                .await
            },
            Err(e) => Err(e.into()),
        };

        stop_heartbeat.cancel();
        if let Err(e) = heartbeat.await {
            debug!(error = %e, "heartbeat task ended abnormally");
        }
        let _ = writer.send(Message::Close(None)).await;
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn read_loop<W, R>(
        &self,
        writer: &mut W,
        reader: &mut R,
        queued: &mut mpsc::UnboundedReceiver<String>,
        outbound: &mpsc::UnboundedSender<String>,
        interval: Duration,
        last_seq: &AtomicU64,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        W: futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
        R: Stream<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>
            + Unpin,
    {
        let ack_window = interval * 2;
        let mut last_ack = Instant::now();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep_until(last_ack + ack_window) => {
                    return Err(Error::MissedHeartbeatAck(ack_window));
                },
                Some(text) = queued.recv() => {
                    writer.send(Message::Text(text.into())).await?;
                },
                incoming = reader.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let frame = match protocol::decode_frame(text.as_str()) {
                            Ok(frame) => frame,
                            Err(e) => {
                                warn!(source = %self.label(), error = %e, "dropping malformed gateway frame");
                                continue;
                            },
                        };
                        match frame {
                            Frame::HeartbeatAck => last_ack = Instant::now(),
                            Frame::HeartbeatRequest => {
                                let _ = outbound.send(protocol::heartbeat(load_seq(last_seq)));
                            },
                            Frame::Reconnect => return Err(Error::ServerRequestedReconnect),
                            Frame::InvalidSession => return Err(Error::InvalidSession),
                            Frame::Dispatch { seq, event } => {
                                if let Some(seq) = seq {
                                    last_seq.store(seq, Ordering::Relaxed);
                                }
                                self.dispatch(event).await;
                            },
                            Frame::Hello { .. } => debug!("ignoring repeated hello"),
                            Frame::Unknown { op } => debug!(op, "ignoring unknown opcode"),
                        }
                    },
                    Some(Ok(Message::Ping(data))) => writer.send(Message::Pong(data)).await?,
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| format!("{} {}", u16::from(f.code), f.reason.as_str()))
                            .unwrap_or_else(|| "no close frame".into());
                        return Err(Error::Closed { reason });
                    },
                    Some(Ok(_)) => {},
                    Some(Err(e)) => return Err(e.into()),
                    None => {
                        return Err(Error::Closed {
                            reason: "stream ended".into(),
                        });
                    },
                },
            }
        }
    }

    async fn dispatch(&self, event: DispatchEvent) {
        match event {
            DispatchEvent::Ready(session) => {
                {
                    let mut state = self.lock_session();
                    state.session_id = Some(session.session_id.clone());
                    state.visible = session.communities.iter().map(|c| c.id.clone()).collect();
                }
                self.set_state(ConnectionState::Ready);
                info!(
                    source = %self.label(),
                    user = session.user.as_deref().unwrap_or("unknown"),
                    communities = session.communities.len(),
                    "gateway session ready"
                );
                self.sink
                    .session_ready(session, Arc::clone(&self.source))
                    .await;
            },
            DispatchEvent::MessageCreate(message) => self.sink.message_created(message).await,
            DispatchEvent::GuildCreate(community) => {
                self.lock_session().visible.insert(community.id.clone());
                self.sink
                    .community_joined(community, Arc::clone(&self.source))
                    .await;
            },
            DispatchEvent::GuildDelete { id, unavailable } => {
                self.lock_session().visible.remove(&id);
                debug!(source = %self.label(), community = %id, unavailable, "community no longer visible");
            },
            DispatchEvent::Ignored(name) => trace!(event = %name, "ignored dispatch"),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Versioned websocket URL.
fn endpoint(base: &str) -> Result<Url> {
    let mut url = Url::parse(base).map_err(|source| Error::InvalidUrl {
        url: base.to_string(),
        source,
    })?;
    url.set_query(Some("v=9&encoding=json"));
    Ok(url)
}

/// Sequence numbers start at 1; 0 means none seen yet.
fn load_seq(last_seq: &AtomicU64) -> Option<u64> {
    match last_seq.load(Ordering::Relaxed) {
        0 => None,
        seq => Some(seq),
    }
}

async fn wait_for_hello<R>(reader: &mut R) -> Result<Duration>
where
    R: Stream<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(message) = reader.next().await {
        match message? {
            Message::Text(text) => match protocol::decode_frame(text.as_str())? {
                Frame::Hello { heartbeat_interval } => return Ok(heartbeat_interval),
                other => trace!(frame = ?other, "frame before hello"),
            },
            Message::Close(_) => {
                return Err(Error::Closed {
                    reason: "closed during handshake".into(),
                });
            },
            _ => {},
        }
    }
    Err(Error::Closed {
        reason: "stream ended before hello".into(),
    })
}

async fn heartbeat_loop(
    interval: Duration,
    outbound: mpsc::UnboundedSender<String>,
    last_seq: Arc<AtomicU64>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                if outbound.send(protocol::heartbeat(load_seq(&last_seq))).is_err() {
                    return;
                }
            },
        }
    }
}
