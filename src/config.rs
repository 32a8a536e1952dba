use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Serialize, Deserialize, Debug)]
pub struct Config {
    /// sled database directory. Can be redefined on the command line.
    pub database: Option<String>,
    /// Seconds between polling passes.
    #[serde(default = "default_interval")]
    pub interval: u64,

    pub telegram: TelegramConfig,
    pub tumblr: TumblrConfig,
    #[serde(default)]
    pub subscribers: Vec<SubscriberConfig>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct TelegramConfig {
    pub token: String,
    /// HTTP timeout in seconds, also used for tumblr requests.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    pub api_base: Option<String>,
    /// User ids or usernames allowed to use /rewind and /block.
    #[serde(default)]
    pub admins: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct TumblrConfig {
    #[serde(default)]
    pub api_key: String,
    /// Seconds a delivered post stays in the dedup cache.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: u64,
    #[serde(default = "default_cache_purge")]
    pub cache_purge: u64,
    pub api_base: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SubscriberConfig {
    pub chat_id: String,
    /// Blog names (`staff`) or hosts (`staff.tumblr.com`).
    pub follows: Vec<String>,
}

fn default_interval() -> u64 {
    300
}

fn default_timeout() -> u64 {
    30
}

fn default_cache_ttl() -> u64 {
    crate::cache::DEFAULT_TTL.as_secs()
}

fn default_cache_purge() -> u64 {
    crate::cache::DEFAULT_PURGE.as_secs()
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = fs::read(path)?;
        Ok(toml::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [telegram]
            token = "123:abc"

            [tumblr]
            api_key = "key"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.interval, 300);
        assert_eq!(cfg.telegram.timeout, 30);
        assert_eq!(cfg.tumblr.cache_ttl, 12 * 60 * 60);
        assert_eq!(cfg.tumblr.cache_purge, 60 * 60);
        assert!(cfg.database.is_none());
        assert!(cfg.subscribers.is_empty());
        assert!(cfg.telegram.admins.is_empty());
    }

    #[test]
    fn subscribers_are_parsed() {
        let cfg: Config = toml::from_str(
            r#"
            database = "bot.db"
            interval = 60

            [telegram]
            token = "123:abc"
            api_base = "http://localhost:8081"
            admins = ["42", "@fox"]

            [tumblr]

            [[subscribers]]
            chat_id = "-100123"
            follows = ["staff", "art.example.com"]
            "#,
        )
        .unwrap();

        assert_eq!(cfg.database.as_deref(), Some("bot.db"));
        assert_eq!(cfg.tumblr.api_key, "");
        assert_eq!(cfg.telegram.admins, ["42", "@fox"]);
        assert_eq!(cfg.subscribers[0].chat_id, "-100123");
        assert_eq!(cfg.subscribers[0].follows, ["staff", "art.example.com"]);
    }

    #[test]
    fn missing_file_is_io_error() {
        assert!(matches!(Config::load("/nonexistent/tumbfoxbot.toml"), Err(crate::error::Error::Io(_))));
    }
}
