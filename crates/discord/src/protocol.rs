//! Gateway frame codec.
//!
//! Frames are decoded once, here, into a closed set of variants. Dispatch
//! events are looked up by name in [`DISPATCH_DECODERS`].

use std::time::Duration;

use {
    herald_channels::{
        ChannelInfo, ChannelKind, CommunitySnapshot, CommunitySummary, RawMessage, SessionInfo,
        text::repair_json_surrogates,
    },
    serde::Deserialize,
    serde_json::{Value, json},
};

use crate::error::{Error, Result};

/// Gateway opcodes this client understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Dispatch = 0,
    Heartbeat = 1,
    Identify = 2,
    Reconnect = 7,
    InvalidSession = 9,
    Hello = 10,
    HeartbeatAck = 11,
}

impl Opcode {
    #[must_use]
    pub fn from_u8(op: u8) -> Option<Self> {
        Some(match op {
            0 => Self::Dispatch,
            1 => Self::Heartbeat,
            2 => Self::Identify,
            7 => Self::Reconnect,
            9 => Self::InvalidSession,
            10 => Self::Hello,
            11 => Self::HeartbeatAck,
            _ => return None,
        })
    }
}

/// Wire envelope: `{op, d, s, t}`.
#[derive(Debug, Deserialize)]
pub struct RawFrame {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub t: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Hello { heartbeat_interval: Duration },
    HeartbeatAck,
    /// The server wants a heartbeat right now.
    HeartbeatRequest,
    Reconnect,
    InvalidSession,
    Dispatch {
        seq: Option<u64>,
        event: DispatchEvent,
    },
    Unknown { op: u8 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent {
    Ready(SessionInfo),
    MessageCreate(RawMessage),
    GuildCreate(CommunitySnapshot),
    GuildDelete { id: String, unavailable: bool },
    /// An event this client has no use for.
    Ignored(String),
}

type DispatchDecoder = fn(Value) -> Result<DispatchEvent>;

/// Event name → payload decoder.
pub const DISPATCH_DECODERS: &[(&str, DispatchDecoder)] = &[
    ("READY", decode_ready),
    ("MESSAGE_CREATE", decode_message_create),
    ("GUILD_CREATE", decode_guild_create),
    ("GUILD_DELETE", decode_guild_delete),
];

/// Decode one text frame. Lone surrogate escapes are repaired first so a
/// single bad character never loses the whole event.
pub fn decode_frame(text: &str) -> Result<Frame> {
    let text = repair_json_surrogates(text);
    let raw: RawFrame = serde_json::from_str(&text)?;
    Frame::from_raw(raw)
}

impl Frame {
    pub fn from_raw(raw: RawFrame) -> Result<Self> {
        let Some(op) = Opcode::from_u8(raw.op) else {
            return Ok(Self::Unknown { op: raw.op });
        };
        Ok(match op {
            Opcode::Hello => {
                let ms = raw
                    .d
                    .get("heartbeat_interval")
                    .and_then(Value::as_u64)
                    .filter(|ms| *ms > 0)
                    .ok_or_else(|| Error::protocol("hello without heartbeat_interval"))?;
                Self::Hello {
                    heartbeat_interval: Duration::from_millis(ms),
                }
            },
            Opcode::HeartbeatAck => Self::HeartbeatAck,
            Opcode::Heartbeat => Self::HeartbeatRequest,
            Opcode::Reconnect => Self::Reconnect,
            Opcode::InvalidSession => Self::InvalidSession,
            Opcode::Dispatch => {
                let name = raw
                    .t
                    .ok_or_else(|| Error::protocol("dispatch without event name"))?;
                let event = match DISPATCH_DECODERS.iter().find(|(n, _)| *n == name) {
                    Some((_, decode)) => decode(raw.d)?,
                    None => DispatchEvent::Ignored(name),
                };
                Self::Dispatch {
                    seq: raw.s,
                    event,
                }
            },
            // Client-to-server only.
            Opcode::Identify => Self::Unknown { op: raw.op },
        })
    }
}

/// Identify frame: credential, capability bitmask, client metadata.
#[must_use]
pub fn identify(token: &str, intents: u64) -> String {
    json!({
        "op": Opcode::Identify as u8,
        "d": {
            "token": token,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "herald",
                "device": "herald",
            },
            "compress": false,
            "large_threshold": 50,
            "intents": intents,
        },
    })
    .to_string()
}

/// Heartbeat frame carrying the last seen sequence number.
#[must_use]
pub fn heartbeat(seq: Option<u64>) -> String {
    json!({ "op": Opcode::Heartbeat as u8, "d": seq }).to_string()
}

/// Discord channel type → relay channel kind (0 = text, 5 = announcement).
#[must_use]
pub fn channel_kind(discord_type: u8) -> ChannelKind {
    match discord_type {
        0 => ChannelKind::Text,
        5 => ChannelKind::Announcement,
        _ => ChannelKind::Other,
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct UserPayload {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub global_name: Option<String>,
}

impl UserPayload {
    fn display(self) -> Option<String> {
        self.global_name.or(self.username)
    }
}

#[derive(Debug, Deserialize)]
struct GuildProperties {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GuildPayload {
    pub id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    properties: Option<GuildProperties>,
    #[serde(default)]
    channels: Vec<ChannelPayload>,
    #[serde(default)]
    unavailable: bool,
}

impl GuildPayload {
    pub(crate) fn name(&self) -> String {
        self.name
            .clone()
            .or_else(|| self.properties.as_ref().and_then(|p| p.name.clone()))
            .unwrap_or_else(|| self.id.clone())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChannelPayload {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: u8,
}

impl From<ChannelPayload> for ChannelInfo {
    fn from(c: ChannelPayload) -> Self {
        Self {
            name: c.name.unwrap_or_else(|| c.id.clone()),
            kind: channel_kind(c.kind),
            id: c.id,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct MessagePayload {
    pub id: String,
    pub channel_id: String,
    #[serde(default)]
    pub author: Option<UserPayload>,
    #[serde(default)]
    pub content: String,
    pub timestamp: String,
}

impl From<MessagePayload> for RawMessage {
    fn from(m: MessagePayload) -> Self {
        Self {
            id: m.id,
            channel_id: m.channel_id,
            author: m.author.and_then(UserPayload::display),
            content: m.content,
            timestamp: m.timestamp,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReadyPayload {
    session_id: String,
    #[serde(default)]
    user: Option<UserPayload>,
    #[serde(default)]
    guilds: Vec<GuildPayload>,
}

fn decode_ready(d: Value) -> Result<DispatchEvent> {
    let ready: ReadyPayload = serde_json::from_value(d)?;
    let communities = ready
        .guilds
        .iter()
        .filter(|g| !g.unavailable)
        .map(|g| CommunitySummary {
            id: g.id.clone(),
            name: g.name(),
        })
        .collect();
    Ok(DispatchEvent::Ready(SessionInfo {
        session_id: ready.session_id,
        user: ready.user.and_then(UserPayload::display),
        communities,
    }))
}

fn decode_message_create(d: Value) -> Result<DispatchEvent> {
    let message: MessagePayload = serde_json::from_value(d)?;
    Ok(DispatchEvent::MessageCreate(message.into()))
}

fn decode_guild_create(d: Value) -> Result<DispatchEvent> {
    let guild: GuildPayload = serde_json::from_value(d)?;
    let name = guild.name();
    Ok(DispatchEvent::GuildCreate(CommunitySnapshot {
        id: guild.id,
        name,
        channels: guild.channels.into_iter().map(ChannelInfo::from).collect(),
    }))
}

fn decode_guild_delete(d: Value) -> Result<DispatchEvent> {
    #[derive(Deserialize)]
    struct Payload {
        id: String,
        #[serde(default)]
        unavailable: bool,
    }
    let payload: Payload = serde_json::from_value(d)?;
    Ok(DispatchEvent::GuildDelete {
        id: payload.id,
        unavailable: payload.unavailable,
    })
}
