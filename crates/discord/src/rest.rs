//! Pull client for the source REST API, one per credential.

use std::time::Duration;

use {
    async_trait::async_trait,
    herald_channels::{
        ChannelInfo, CommunitySummary, RawMessage, SourceApi, SourceError,
        text::repair_json_surrogates,
    },
    reqwest::{
        StatusCode,
        header::{AUTHORIZATION, HeaderMap, LINK, RETRY_AFTER},
    },
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, de::DeserializeOwned},
    tracing::{debug, warn},
};

use crate::{
    gateway::DEFAULT_GATEWAY_URL,
    protocol::{ChannelPayload, GuildPayload, MessagePayload},
};

/// 429 responses honored before giving up on a request.
const RATE_LIMIT_MAX_RETRIES: usize = 5;

/// Wait used when a 429 carries no usable hint.
const RATE_LIMIT_FALLBACK: Duration = Duration::from_secs(1);

const GUILD_PAGE_SIZE: usize = 200;

/// Upper bound on followed pages, in case the server keeps linking back.
const MAX_GUILD_PAGES: usize = 50;

pub struct DiscordRest {
    label: String,
    http: reqwest::Client,
    api_base: String,
    token: Secret<String>,
}

impl DiscordRest {
    pub fn new(label: impl Into<String>, token: Secret<String>, api_base: &str) -> Self {
        Self {
            label: label.into(),
            http: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Websocket endpoint advertised by `GET /gateway`, or the default one.
    pub async fn gateway_url(&self) -> String {
        #[derive(Deserialize)]
        struct GatewayInfo {
            url: String,
        }

        match self.get_json::<GatewayInfo>("/gateway").await {
            Ok(info) => info.url,
            Err(e) => {
                warn!(source = %self.label, error = %e, "gateway lookup failed, using default");
                DEFAULT_GATEWAY_URL.to_string()
            },
        }
    }

    fn url(&self, route: &str) -> String {
        format!("{}{route}", self.api_base)
    }

    async fn get_json<T: DeserializeOwned>(&self, route: &str) -> Result<T, SourceError> {
        let response = self.get(route, &self.url(route)).await?;
        decode(route, response).await
    }

    /// GET with bounded 429 handling. `route` only labels errors and logs.
    async fn get(&self, route: &str, url: &str) -> Result<reqwest::Response, SourceError> {
        let mut retries = 0usize;

        loop {
            let response = self
                .http
                .get(url)
                .header(AUTHORIZATION, self.token.expose_secret())
                .send()
                .await
                .map_err(|e| SourceError::transport(route, e))?;

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }
            match status {
                StatusCode::TOO_MANY_REQUESTS => {
                    let wait = retry_after(response).await;
                    if retries >= RATE_LIMIT_MAX_RETRIES {
                        warn!(
                            source = %self.label,
                            route,
                            retries,
                            retry_after_ms = wait.as_millis() as u64,
                            "rate limit persisted after retries"
                        );
                        return Err(SourceError::RateLimited {
                            route: route.to_string(),
                            retry_after: wait,
                        });
                    }
                    retries += 1;
                    warn!(
                        source = %self.label,
                        route,
                        retries,
                        retry_after_ms = wait.as_millis() as u64,
                        "rate limited, waiting before retry"
                    );
                    tokio::time::sleep(wait).await;
                },
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    return Err(SourceError::Forbidden {
                        route: route.to_string(),
                    });
                },
                StatusCode::NOT_FOUND => {
                    return Err(SourceError::NotFound {
                        route: route.to_string(),
                    });
                },
                other => {
                    return Err(SourceError::Status {
                        route: route.to_string(),
                        status: other.as_u16(),
                    });
                },
            }
        }
    }
}

#[async_trait]
impl SourceApi for DiscordRest {
    fn label(&self) -> &str {
        &self.label
    }

    async fn list_communities(&self) -> Result<Vec<CommunitySummary>, SourceError> {
        let first = format!("/users/@me/guilds?limit={GUILD_PAGE_SIZE}");
        let mut url = self.url(&first);
        let mut communities = Vec::new();

        for _ in 0..MAX_GUILD_PAGES {
            let response = self.get("/users/@me/guilds", &url).await?;
            let next = next_link(response.headers());
            let page: Vec<GuildPayload> = decode("/users/@me/guilds", response).await?;
            let full_page = page.len() >= GUILD_PAGE_SIZE;
            let last_id = page.last().map(|g| g.id.clone());

            communities.extend(page.iter().map(|g| CommunitySummary {
                id: g.id.clone(),
                name: g.name(),
            }));

            url = match (next, last_id) {
                (Some(link), _) => link,
                (None, Some(after)) if full_page => {
                    self.url(&format!("{first}&after={after}"))
                },
                _ => return Ok(communities),
            };
        }

        warn!(
            source = %self.label,
            pages = MAX_GUILD_PAGES,
            "community listing truncated"
        );
        Ok(communities)
    }

    async fn list_channels(&self, community_id: &str) -> Result<Vec<ChannelInfo>, SourceError> {
        let channels: Vec<ChannelPayload> = self
            .get_json(&format!("/guilds/{community_id}/channels"))
            .await?;
        Ok(channels.into_iter().map(ChannelInfo::from).collect())
    }

    async fn fetch_recent_messages(
        &self,
        channel_id: &str,
        limit: u32,
    ) -> Result<Vec<RawMessage>, SourceError> {
        let limit = limit.clamp(1, 100);
        let messages: Vec<MessagePayload> = self
            .get_json(&format!("/channels/{channel_id}/messages?limit={limit}"))
            .await?;
        Ok(messages.into_iter().map(RawMessage::from).collect())
    }

    async fn probe_channel(&self, channel_id: &str) -> Result<bool, SourceError> {
        let route = format!("/channels/{channel_id}/messages?limit=1");
        match self.get(&route, &self.url(&route)).await {
            Ok(_) => Ok(true),
            Err(SourceError::Forbidden { .. } | SourceError::NotFound { .. }) => {
                debug!(source = %self.label, channel = channel_id, "channel history not readable");
                Ok(false)
            },
            Err(e) => Err(e),
        }
    }
}

async fn decode<T: DeserializeOwned>(
    route: &str,
    response: reqwest::Response,
) -> Result<T, SourceError> {
    let body = response
        .text()
        .await
        .map_err(|e| SourceError::transport(route, e))?;
    serde_json::from_str(&repair_json_surrogates(&body)).map_err(|e| SourceError::Decode {
        route: route.to_string(),
        message: e.to_string(),
    })
}

/// Wait suggested by a 429: body `retry_after` (float seconds), then the
/// `Retry-After` header, then a fixed fallback.
async fn retry_after(response: reqwest::Response) -> Duration {
    #[derive(Deserialize)]
    struct RateLimitBody {
        retry_after: f64,
    }

    let header = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok());
    let body = response
        .text()
        .await
        .ok()
        .and_then(|b| serde_json::from_str::<RateLimitBody>(&b).ok())
        .map(|b| b.retry_after);

    body.or(header)
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .unwrap_or(RATE_LIMIT_FALLBACK)
}

/// Target of the `rel="next"` entry of a `Link` header.
fn next_link(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(LINK)?.to_str().ok()?;
    value.split(',').find_map(|entry| {
        let mut parts = entry.split(';');
        let target = parts.next()?.trim();
        let is_next = parts.any(|p| {
            let p = p.trim();
            p == r#"rel="next""# || p == "rel=next"
        });
        is_next.then(|| {
            target
                .trim_start_matches('<')
                .trim_end_matches('>')
                .to_string()
        })
    })
}
