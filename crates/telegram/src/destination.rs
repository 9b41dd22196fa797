//! [`Destination`] over the Bot API. Forum topics are the destination threads.

use {
    async_trait::async_trait,
    herald_channels::{DeliveryError, Destination, MessageId, ThreadId},
    herald_config::TelegramConfig,
    secrecy::ExposeSecret,
    teloxide::{
        Bot, RequestError,
        payloads::{SendChatActionSetters, SendMessageSetters},
        requests::Requester,
        types::{
            ChatAction, ChatId, ChatKind, LinkPreviewOptions, PublicChatKind, Recipient,
            ThreadId as TopicId,
        },
    },
    tracing::{debug, info},
    url::Url,
};

use crate::error::{Error, Result};

/// Bot API hard limit for message text.
pub const MAX_MESSAGE_LEN: usize = 4096;

/// Topic names are limited to 128 characters.
const MAX_TOPIC_NAME_CHARS: usize = 128;

/// Blue topic icon.
pub const TOPIC_ICON_COLOR: u32 = 0x6F_B9_F0;

const NO_PREVIEW: LinkPreviewOptions = LinkPreviewOptions {
    is_disabled: true,
    url: None,
    prefer_small_media: false,
    prefer_large_media: false,
    show_above_text: false,
};

pub struct TelegramDestination {
    bot: Bot,
    chat: Recipient,
}

impl TelegramDestination {
    /// `chat_id` is a numeric id or an `@channel` handle.
    pub fn new(bot: Bot, chat_id: &str) -> Self {
        let chat = match chat_id.parse::<i64>() {
            Ok(id) => Recipient::Id(ChatId(id)),
            Err(_) => Recipient::ChannelUsername(chat_id.to_string()),
        };
        Self { bot, chat }
    }

    pub fn from_config(config: &TelegramConfig) -> Result<Self> {
        let api_url = Url::parse(&config.api_base).map_err(|source| Error::InvalidApiUrl {
            url: config.api_base.clone(),
            source,
        })?;
        let bot = Bot::new(config.token.expose_secret()).set_api_url(api_url);
        Ok(Self::new(bot, &config.chat_id))
    }

    /// Classify at the boundary. The bot token never leaves in a reason.
    fn classify(&self, err: RequestError) -> DeliveryError {
        match DeliveryError::from(Error::from(err)) {
            DeliveryError::Other { reason } => DeliveryError::Other {
                reason: reason.replace(self.bot.token(), "<redacted>"),
            },
            classified => classified,
        }
    }
}

/// `🏰 <community>` capped at the topic name limit.
fn topic_name(community: &str) -> String {
    format!("🏰 {community}")
        .chars()
        .take(MAX_TOPIC_NAME_CHARS)
        .collect()
}

/// Topic ids are 32-bit on the wire; a binding outside that range cannot
/// name a live topic.
fn topic_id(thread: ThreadId) -> std::result::Result<TopicId, DeliveryError> {
    i32::try_from(thread.0)
        .map(|id| TopicId(teloxide::types::MessageId(id)))
        .map_err(|_| DeliveryError::MissingThread)
}

#[async_trait]
impl Destination for TelegramDestination {
    async fn supports_threads(&self) -> std::result::Result<bool, DeliveryError> {
        let chat = self
            .bot
            .get_chat(self.chat.clone())
            .await
            .map_err(|e| self.classify(e))?;
        let supported = match &chat.kind {
            ChatKind::Public(public) => {
                matches!(&public.kind, PublicChatKind::Supergroup(group) if group.is_forum)
            },
            ChatKind::Private(_) => false,
        };
        info!(chat_id = chat.id.0, topics = supported, "destination chat inspected");
        Ok(supported)
    }

    async fn create_thread(&self, name: &str) -> std::result::Result<ThreadId, DeliveryError> {
        let topic = self
            .bot
            .create_forum_topic(self.chat.clone(), topic_name(name), TOPIC_ICON_COLOR, String::new())
            .await
            .map_err(|e| self.classify(e))?;
        Ok(ThreadId(i64::from(topic.thread_id.0.0)))
    }

    async fn thread_exists(&self, thread: ThreadId) -> std::result::Result<bool, DeliveryError> {
        let Ok(topic) = topic_id(thread) else {
            return Ok(false);
        };
        let probe = self
            .bot
            .send_chat_action(self.chat.clone(), ChatAction::Typing)
            .message_thread_id(topic)
            .await;
        match probe.map_err(|e| self.classify(e)) {
            Ok(_) => Ok(true),
            Err(DeliveryError::MissingThread) => {
                debug!(thread_id = %thread, "topic no longer exists");
                Ok(false)
            },
            Err(e) => Err(e),
        }
    }

    async fn send_message(
        &self,
        text: &str,
        thread: Option<ThreadId>,
    ) -> std::result::Result<MessageId, DeliveryError> {
        let mut request = self
            .bot
            .send_message(self.chat.clone(), text)
            .link_preview_options(NO_PREVIEW);
        if let Some(thread) = thread {
            request = request.message_thread_id(topic_id(thread)?);
        }
        let sent = request.await.map_err(|e| self.classify(e))?;
        Ok(MessageId(i64::from(sent.id.0)))
    }

    fn max_message_len(&self) -> usize {
        MAX_MESSAGE_LEN
    }
}
