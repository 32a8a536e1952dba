use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Required setting is missing (e.g. tumblr api key).
    #[error("configuration error: {0}")]
    Configuration(&'static str),

    /// Transport failure while talking to a remote api.
    #[error("fetch error: {0}")]
    Fetch(#[from] reqwest::Error),

    /// Response body (or stored value) is not the json we expect.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Remote api answered, but with a non-success status.
    #[error("remote api returned {status}: {message}")]
    RemoteApi { status: i64, message: String },

    #[error("unsupported media kind `{0}`")]
    UnsupportedMedia(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Non-ok answer from the telegram bot api.
    #[error("telegram error {0}: {1}")]
    Telegram(u16, String),

    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Another process (usually the running bot) holds the database.
    #[error("database {0} is locked by a running bot, send /rewind or /block to it in telegram instead")]
    DatabaseLocked(String),

    #[error("config parse error: {0}")]
    Config(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("delivery task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    /// Whether this only costs the current polling cycle.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Fetch(_) | Error::Decode(_) | Error::RemoteApi { .. } | Error::Telegram(..)
        )
    }
}
