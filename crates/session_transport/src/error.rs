use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid connection config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid endpoint url `{url}`: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("endpoint scheme `{0}` is not ws or wss")]
    UnsupportedScheme(String),
    #[error("backoff schedule must have at least one delay")]
    EmptyBackoff,
    #[error("token query parameter name must not be empty")]
    EmptyTokenParam,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("connection manager has shut down")]
    ChannelClosed,
}
