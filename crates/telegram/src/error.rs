use {herald_channels::DeliveryError, teloxide::RequestError};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Telegram(#[from] RequestError),

    #[error("invalid bot api url {url}: {source}")]
    InvalidApiUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

impl From<Error> for DeliveryError {
    fn from(err: Error) -> Self {
        match err {
            Error::Telegram(RequestError::RetryAfter(wait)) => DeliveryError::RateLimited {
                retry_after: Some(wait.duration()),
            },
            Error::Telegram(RequestError::Api(api)) => {
                DeliveryError::classify(&api.to_string(), None)
            },
            other => DeliveryError::other(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
