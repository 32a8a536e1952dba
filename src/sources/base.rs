use std::fmt;

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Kind of a deliverable media asset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResourceKind {
    /// Photo. .png, .jpeg or etc... (NOT GIF)
    Image,
    /// Video or GIF.
    Video,
    /// Anything the chat side has no send method for.
    Other(String),
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Image => f.write_str("image"),
            ResourceKind::Video => f.write_str("video"),
            ResourceKind::Other(kind) => f.write_str(kind),
        }
    }
}

/// One media asset that can be sent to a chat.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resource {
    pub url: String,
    pub kind: ResourceKind,
    /// Url identifying the asset at its source. The block fragment is taken
    /// from it, so this is the url an operator passes to `block`.
    pub caption_source: String,
}

impl Resource {
    pub fn new(url: impl Into<String>, kind: ResourceKind) -> Self {
        let url = url.into();
        Self { caption_source: url.clone(), url, kind }
    }
}

/// Message composed from one source post, ready to be delivered.
///
/// `resources` may only be empty for plain text replies. A message carrying
/// `error` is never sent, the error is reported instead.
#[derive(Debug, Default)]
pub struct ReplyMessage {
    pub resources: Vec<Resource>,
    pub caption: String,
    pub error: Option<Error>,
}

impl ReplyMessage {
    pub fn media(resources: Vec<Resource>, caption: impl Into<String>) -> Self {
        Self { resources, caption: caption.into(), error: None }
    }

    pub fn text(caption: impl Into<String>) -> Self {
        Self { resources: vec![], caption: caption.into(), error: None }
    }

    pub fn failed(error: Error) -> Self {
        Self { error: Some(error), ..Default::default() }
    }
}

/// A feed that can be polled for new posts of one source account.
#[async_trait]
pub trait TimelineSource: Send + Sync {
    /// Fetch posts of `source` not older than `since` (unix seconds),
    /// newest first. Already delivered posts are skipped.
    async fn fetch_since(&self, source: &str, since: i64) -> Result<Vec<ReplyMessage>>;
}
