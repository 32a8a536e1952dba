use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::delivery::{MediaKind, OutgoingMedia, Transport};
use crate::error::{Error, Result};

pub const API_BASE: &str = "https://api.telegram.org";

pub struct TelegramClient {
    token: String,
    api_base: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct TelegramInputMedia<'a> {
    r#type: &'static str,
    media: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    caption: &'a str,
}

#[derive(Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: String,
    #[serde(default)]
    error_code: u16,
    #[serde(default)]
    result: serde_json::Value,
}

/// Incoming update from `getUpdates`. Only text messages are of interest.
#[derive(Deserialize, Debug)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<IncomingMessage>,
}

#[derive(Deserialize, Debug)]
pub struct IncomingMessage {
    pub chat: Chat,
    pub from: Option<User>,
    pub text: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct Chat {
    pub id: i64,
}

#[derive(Deserialize, Debug)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
}

impl MediaKind {
    fn telegram_type(self) -> &'static str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::Video => "video",
        }
    }
}

impl<'a> From<&'a OutgoingMedia> for TelegramInputMedia<'a> {
    fn from(m: &'a OutgoingMedia) -> Self {
        Self { r#type: m.kind.telegram_type(), media: &m.url, caption: &m.caption }
    }
}

impl TelegramClient {
    pub fn new(token: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { token, api_base: API_BASE.into(), client })
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    async fn call(&self, method: &str, body: serde_json::Value) -> Result<()> {
        self.request(method, body, None).await.map(drop)
    }

    async fn request(
        &self,
        method: &str,
        body: serde_json::Value,
        timeout: Option<Duration>,
    ) -> Result<serde_json::Value> {
        let mut req = self
            .client
            .post(format!("{}/bot{}/{}", self.api_base, self.token, method))
            .json(&body);
        if let Some(timeout) = timeout {
            req = req.timeout(timeout);
        }
        let res = req.send().await?;

        let status = res.status();
        let text = res.text().await?;
        let tgres = serde_json::from_str(&text).unwrap_or(TelegramResponse {
            ok: false,
            error_code: status.as_u16(),
            description: "(tumbfoxbot) Unparsable response".into(),
            result: serde_json::Value::Null,
        });

        if tgres.ok && status.is_success() {
            debug!(method, "telegram call succeeded");
            Ok(tgres.result)
        } else {
            Err(Error::Telegram(tgres.error_code, tgres.description))
        }
    }

    /// Long polls for updates after `offset`, waiting up to `wait`.
    pub async fn get_updates(&self, offset: i64, wait: Duration) -> Result<Vec<Update>> {
        let body = json!({
            "offset": offset,
            "timeout": wait.as_secs(),
            "allowed_updates": ["message"],
        });
        // the long poll itself may take `wait`, leave room on top of it
        let result = self.request("getUpdates", body, Some(wait + Duration::from_secs(10))).await?;

        Ok(serde_json::from_value(result)?)
    }
}

#[async_trait]
impl Transport for TelegramClient {
    async fn send_text(&self, chat: &str, text: &str) -> Result<()> {
        self.call("sendMessage", json!({ "chat_id": chat, "text": text })).await
    }

    async fn send_media(&self, chat: &str, media: &OutgoingMedia) -> Result<()> {
        let (method, field) = match media.kind {
            MediaKind::Photo => ("sendPhoto", "photo"),
            MediaKind::Video => ("sendVideo", "video"),
        };

        let mut body = json!({ "chat_id": chat });
        body[field] = json!(media.url);
        if !media.caption.is_empty() {
            body["caption"] = json!(media.caption);
        }

        self.call(method, body).await
    }

    async fn send_album(&self, chat: &str, media: &[OutgoingMedia]) -> Result<()> {
        let media: Vec<TelegramInputMedia> = media.iter().map(Into::into).collect();
        self.call("sendMediaGroup", json!({ "chat_id": chat, "media": media })).await
    }
}
