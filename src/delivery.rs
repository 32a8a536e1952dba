use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::sources::{ReplyMessage, Resource, ResourceKind};

/// Telegram won't take more than this in one media group.
pub const MAX_ALBUM_SIZE: usize = 10;
/// Captions of single media posts are cut to this many characters.
pub const MAX_CAPTION_CHARS: usize = 191;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Video,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingMedia {
    pub kind: MediaKind,
    pub url: String,
    /// Empty for no caption.
    pub caption: String,
}

impl OutgoingMedia {
    fn from_resource(resource: &Resource, caption: String) -> Result<Self> {
        let kind = match &resource.kind {
            ResourceKind::Image => MediaKind::Photo,
            ResourceKind::Video => MediaKind::Video,
            other => return Err(Error::UnsupportedMedia(other.to_string())),
        };

        Ok(Self { kind, url: resource.url.clone(), caption })
    }
}

/// Chat side of the bot.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_text(&self, chat: &str, text: &str) -> Result<()>;
    async fn send_media(&self, chat: &str, media: &OutgoingMedia) -> Result<()>;
    /// Sends 2..=`MAX_ALBUM_SIZE` items as one group.
    async fn send_album(&self, chat: &str, media: &[OutgoingMedia]) -> Result<()>;
}

fn truncate_caption(caption: &str) -> String {
    caption.chars().take(MAX_CAPTION_CHARS).collect()
}

#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
}

/// Running deliveries started by [`Dispatcher::deliver_all`].
///
/// Dropping it does not stop the sends.
pub struct Deliveries {
    handles: Vec<JoinHandle<Result<()>>>,
}

impl Deliveries {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Waits for every delivery, outcomes are in message order.
    pub async fn join(self) -> Vec<Result<()>> {
        futures::future::join_all(self.handles)
            .await
            .into_iter()
            .map(|res| res.map_err(Error::from).and_then(|r| r))
            .collect()
    }
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub async fn deliver(&self, chat: &str, message: ReplyMessage) -> Result<()> {
        if let Some(e) = message.error {
            return Err(e);
        }

        match message.resources.as_slice() {
            [] => {
                self.transport.send_text(chat, &message.caption).await?;
                debug!(%chat, "sent text");
                Ok(())
            }
            [single] => {
                let media = OutgoingMedia::from_resource(single, truncate_caption(&message.caption))?;
                self.transport.send_media(chat, &media).await
            }
            resources => {
                let mut ret = Ok(());

                for (batch, chunk) in resources.chunks(MAX_ALBUM_SIZE).enumerate() {
                    let mut media: Vec<OutgoingMedia> = chunk
                        .iter()
                        .filter_map(|r| match OutgoingMedia::from_resource(r, String::new()) {
                            Ok(m) => Some(m),
                            Err(e) => {
                                warn!(%chat, url = %r.url, error = %e, "dropped from album");
                                None
                            }
                        })
                        .collect();

                    let res = match media.len() {
                        0 => continue,
                        // one-item groups are rejected by telegram
                        1 => {
                            media[0].caption = truncate_caption(&message.caption);
                            self.transport.send_media(chat, &media[0]).await
                        }
                        _ => {
                            media[0].caption = message.caption.clone();
                            self.transport.send_album(chat, &media).await
                        }
                    };

                    match res {
                        Ok(()) => debug!(%chat, batch, "sent album"),
                        Err(e) => {
                            warn!(%chat, batch, error = %e, "unable to send album");
                            ret = Err(e);
                        }
                    }
                }

                ret
            }
        }
    }

    /// Starts one independent send per message. Order at the recipient is
    /// not guaranteed.
    pub fn deliver_all(&self, chat: &str, messages: Vec<ReplyMessage>) -> Deliveries {
        let handles = messages
            .into_iter()
            .map(|message| {
                let dispatcher = self.clone();
                let chat = chat.to_owned();
                tokio::spawn(async move {
                    let caption = message.caption.clone();
                    let res = dispatcher.deliver(&chat, message).await;
                    if let Err(e) = &res {
                        error!(%chat, %caption, error = %e, "delivery failed");
                    }
                    res
                })
            })
            .collect();

        Deliveries { handles }
    }
}
