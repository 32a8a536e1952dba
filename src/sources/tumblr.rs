use std::sync::Arc;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{ReplyMessage, Resource, ResourceKind, TimelineSource};
use crate::cache::DedupCache;
use crate::error::{Error, Result};
use crate::http::HttpGet;
use crate::store::BlockRegistry;

pub const API_BASE: &str = "https://api.tumblr.com";

lazy_static! {
    static ref BLOG_NAME: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9-]*$").unwrap();
}

pub struct TumblrClient {
    /// Tumblr OAuth consumer key
    api_key: String,
    api_base: String,
    http: Arc<dyn HttpGet>,
    cache: Arc<DedupCache>,
    blocks: BlockRegistry,
}

#[derive(Deserialize)]
struct TumblrPosts {
    meta: TumblrMeta,
    // `[]` instead of an object when status is not 200
    #[serde(default)]
    response: serde_json::Value,
}
#[derive(Deserialize)]
struct TumblrMeta {
    status: i64,
    #[serde(default)]
    msg: String,
}
#[derive(Deserialize)]
struct TumblrResponse {
    // decoded one by one, only photo and video posts have to be well formed
    #[serde(default)]
    posts: Vec<serde_json::Value>,
}
#[derive(Deserialize)]
struct TumblrPost {
    r#type: String,
    id: PostId,
    timestamp: i64,
    #[serde(default)]
    short_url: String,
    #[serde(default)]
    post_url: String,
    #[serde(default)]
    trail: Vec<TumblrTrailEntry>,
    #[serde(default)]
    photos: Vec<TumblrPhoto>,
    video_url: Option<String>,
}
#[derive(Deserialize)]
struct TumblrTrailEntry {
    #[serde(default)]
    post: TumblrTrailPost,
}
#[derive(Deserialize, Default)]
struct TumblrTrailPost {
    id: Option<PostId>,
}
#[derive(Deserialize)]
struct TumblrPhoto {
    original_size: TumblrPhotoSize,
}
#[derive(Deserialize)]
struct TumblrPhotoSize {
    url: String,
}

/// Post ids show up both as json strings and numbers.
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
enum PostId {
    Text(String),
    Number(i64),
}

impl PostId {
    /// Normalized key, `None` for empty/zero ids.
    fn key(&self) -> Option<String> {
        match self {
            PostId::Text(s) if !s.is_empty() => Some(s.clone()),
            PostId::Number(n) if *n != 0 => Some(n.to_string()),
            _ => None,
        }
    }
}

fn is_media(post: &serde_json::Value) -> bool {
    matches!(post.get("type").and_then(serde_json::Value::as_str), Some("photo" | "video"))
}

impl TumblrPost {
    /// Id used for dedup. Reblogs resolve to the original post so the same
    /// content coming from several blogs is delivered once.
    fn canonical_id(&self) -> String {
        self.trail
            .first()
            .and_then(|entry| entry.post.id.as_ref())
            .and_then(PostId::key)
            .or_else(|| self.id.key())
            .unwrap_or_default()
    }

    fn caption(&self) -> &str {
        if self.short_url.is_empty() {
            &self.post_url
        } else {
            &self.short_url
        }
    }
}

/// Per-image key used for blocking: 4th `/`-separated segment of the url,
/// e.g. `abcfrag` for `https://64.media.tumblr.com/abcfrag/s1280x1920/x.jpg`.
pub fn image_fragment(url: &str) -> Option<&str> {
    url.split('/').nth(3)
}

/// `staff` -> `staff.tumblr.com`, full hosts are kept as is.
pub fn blog_host(source: &str) -> String {
    if BLOG_NAME.is_match(source) {
        format!("{source}.tumblr.com")
    } else {
        source.to_owned()
    }
}

impl TumblrClient {
    pub fn new(
        api_key: String,
        http: Arc<dyn HttpGet>,
        cache: Arc<DedupCache>,
        blocks: BlockRegistry,
    ) -> Self {
        Self { api_key, api_base: API_BASE.into(), http, cache, blocks }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn posts_url(&self, source: &str) -> String {
        format!("{}/v2/blog/{}/posts?api_key={}", self.api_base, blog_host(source), self.api_key)
    }

    pub async fn fetch_from(&self, source: &str, since: i64) -> Result<Vec<ReplyMessage>> {
        if self.api_key.is_empty() {
            return Err(Error::Configuration("tumblr api key is not set"));
        }

        let body = self.http.get(&self.posts_url(source)).await?;
        let data: TumblrPosts = serde_json::from_slice(&body)?;

        if data.meta.status != 200 {
            return Err(Error::RemoteApi { status: data.meta.status, message: data.meta.msg });
        }

        let data: TumblrResponse = serde_json::from_value(data.response)?;

        let mut res = vec![];

        for raw in data.posts {
            if !is_media(&raw) {
                continue;
            }
            let post: TumblrPost = match serde_json::from_value(raw) {
                Ok(post) => post,
                Err(e) => {
                    warn!(%source, error = %e, "malformed post skipped");
                    continue;
                }
            };
            // feed is newest first, everything below is older
            if post.timestamp < since {
                break;
            }

            let key = format!("{}@{}", source, post.canonical_id());
            if !self.cache.insert_if_new(&key) {
                debug!(%key, "already delivered");
                continue;
            }

            let mut resources = Vec::with_capacity(post.photos.len() + 1);

            for photo in &post.photos {
                let url = &photo.original_size.url;
                let kind = if url.to_lowercase().ends_with(".gif") {
                    ResourceKind::Video
                } else {
                    ResourceKind::Image
                };
                let resource = Resource::new(url.as_str(), kind);

                if let Some(fragment) = image_fragment(&resource.caption_source) {
                    if self.blocks.is_blocked(source, fragment) {
                        debug!(%source, %fragment, "blocked image skipped");
                        continue;
                    }
                }

                resources.push(resource);
            }

            if let Some(video) = post.video_url.as_deref().filter(|v| !v.is_empty()) {
                resources.push(Resource::new(video, ResourceKind::Video));
            }

            if !resources.is_empty() {
                res.push(ReplyMessage::media(resources, post.caption()));
            }
        }

        Ok(res)
    }
}

#[async_trait]
impl TimelineSource for TumblrClient {
    async fn fetch_since(&self, source: &str, since: i64) -> Result<Vec<ReplyMessage>> {
        let res = self.fetch_from(source, since).await?;
        debug!(%source, since, found = res.len(), "tumblr timeline fetched");
        Ok(res)
    }
}
