use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures::future::join_all;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::sources::tumblr::image_fragment;
use crate::sources::{ReplyMessage, TimelineSource};
use crate::store::{BlockRegistry, CursorStore};

pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Collects new posts for subscribers and owns their read position.
///
/// Concurrent `push_for` calls for the same subscriber race on the cursor,
/// the last writer wins.
pub struct Pusher {
    source: Arc<dyn TimelineSource>,
    cursors: CursorStore,
    blocks: BlockRegistry,
    clock: fn() -> i64,
}

impl Pusher {
    pub fn new(source: Arc<dyn TimelineSource>, cursors: CursorStore, blocks: BlockRegistry) -> Self {
        Self { source, cursors, blocks, clock: unix_now }
    }

    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    /// New posts of all `follows` since the subscriber's cursor. A failing
    /// source only loses its own posts for this pass. The cursor moves to
    /// "now" only when something was found.
    pub async fn push_for(&self, subscriber: &str, follows: &[String]) -> Vec<ReplyMessage> {
        let last_update = self.cursors.get(subscriber).unwrap_or_else(|e| {
            warn!(%subscriber, error = %e, "unreadable cursor, starting from 0");
            0
        });

        let fetches = follows.iter().map(|source| self.source.fetch_since(source, last_update));
        let results = join_all(fetches).await;

        let mut ret = vec![];
        for (source, result) in follows.iter().zip(results) {
            match result {
                Ok(messages) => ret.extend(messages),
                Err(e) if e.is_recoverable() => {
                    warn!(%subscriber, %source, error = %e, "source skipped this pass")
                }
                Err(e) => error!(%subscriber, %source, error = %e, "source failed"),
            }
        }

        if !ret.is_empty() {
            let now = (self.clock)().max(last_update);
            match self.cursors.set(subscriber, now) {
                Ok(()) => info!(%subscriber, found = ret.len(), cursor = now, "cursor advanced"),
                Err(e) => warn!(%subscriber, error = %e, "failed to store cursor"),
            }
        }

        ret
    }

    /// Moves the cursor `back` seconds before now so recent posts are
    /// delivered again on the next pass.
    pub fn go_back(&self, subscriber: &str, back: i64) -> Result<()> {
        let now = (self.clock)();
        if back < 0 || back > now {
            return Err(Error::InvalidArgument(format!("cannot go back {back} seconds")));
        }

        self.cursors.set(subscriber, now - back)?;
        info!(%subscriber, cursor = now - back, "cursor rewound");
        Ok(())
    }

    /// Blocks the image referenced by `caption` (an image url) for `owner`.
    /// Returns a message for the operator.
    pub fn block(&self, owner: &str, caption: &str) -> String {
        let fragment = match image_fragment(caption.trim()) {
            Some(fragment) => fragment,
            None => return "Unrecognized image caption.".into(),
        };

        match self.blocks.set_blocked(owner, fragment, true) {
            Ok(()) => format!("{} blocked.", BlockRegistry::key(owner, fragment)),
            Err(e) => format!("Failed to block {}: {e}", BlockRegistry::key(owner, fragment)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;

    use super::*;
    use crate::sources::{Resource, ResourceKind};
    use crate::store::temporary_store;

    const NOW: i64 = 1_700_000_000;

    /// source -> captions, `None` fails the fetch
    struct FakeSource {
        feeds: HashMap<String, Option<Vec<&'static str>>>,
        seen_since: std::sync::Mutex<Vec<i64>>,
    }

    impl FakeSource {
        fn new(feeds: &[(&str, Option<Vec<&'static str>>)]) -> Arc<Self> {
            Arc::new(Self {
                feeds: feeds.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
                seen_since: Default::default(),
            })
        }
    }

    #[async_trait]
    impl TimelineSource for FakeSource {
        async fn fetch_since(&self, source: &str, since: i64) -> Result<Vec<ReplyMessage>> {
            self.seen_since.lock().unwrap().push(since);
            match self.feeds.get(source).cloned().flatten() {
                Some(captions) => Ok(captions
                    .into_iter()
                    .map(|c| ReplyMessage::media(vec![Resource::new(c, ResourceKind::Image)], c))
                    .collect()),
                None => Err(Error::RemoteApi { status: 500, message: "down".into() }),
            }
        }
    }

    fn pusher(source: Arc<FakeSource>) -> (Pusher, CursorStore) {
        let store = temporary_store();
        let cursors = CursorStore::new(store.clone());
        let pusher = Pusher::new(source, cursors.clone(), BlockRegistry::new(store)).with_clock(|| NOW);
        (pusher, cursors)
    }

    fn follows(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn failing_source_does_not_abort_push() {
        let source = FakeSource::new(&[("a", Some(vec!["a1", "a2"])), ("broken", None), ("b", Some(vec!["b1"]))]);
        let (pusher, cursors) = pusher(source.clone());

        let res = pusher.push_for("chat", &follows(&["a", "broken", "b"])).await;

        let captions: Vec<_> = res.iter().map(|m| m.caption.as_str()).collect();
        assert_eq!(captions, ["a1", "a2", "b1"]);
        assert_eq!(cursors.get("chat").unwrap(), NOW);
        assert_eq!(*source.seen_since.lock().unwrap(), [0, 0, 0]);
    }

    #[tokio::test]
    async fn cursor_kept_when_nothing_found() {
        let source = FakeSource::new(&[("a", Some(vec![])), ("broken", None)]);
        let (pusher, cursors) = pusher(source);
        cursors.set("chat", 123).unwrap();

        let res = pusher.push_for("chat", &follows(&["a", "broken"])).await;

        assert!(res.is_empty());
        assert_eq!(cursors.get("chat").unwrap(), 123);
    }

    #[tokio::test]
    async fn cursor_never_moves_backwards() {
        let source = FakeSource::new(&[("a", Some(vec!["a1"]))]);
        let (pusher, cursors) = pusher(source.clone());
        cursors.set("chat", NOW + 50).unwrap();

        pusher.push_for("chat", &follows(&["a"])).await;

        assert_eq!(cursors.get("chat").unwrap(), NOW + 50);
        assert_eq!(*source.seen_since.lock().unwrap(), [NOW + 50]);
    }

    #[test]
    fn go_back_sets_cursor_before_now() {
        let (pusher, cursors) = pusher(FakeSource::new(&[]));

        pusher.go_back("chat", 3600).unwrap();
        assert_eq!(cursors.get("chat").unwrap(), 1_699_996_400);

        let err = pusher.go_back("chat", 99_999_999_999).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(cursors.get("chat").unwrap(), 1_699_996_400);

        assert!(pusher.go_back("chat", -1).is_err());
    }

    #[test]
    fn block_needs_four_segments() {
        let store = temporary_store();
        let blocks = BlockRegistry::new(store.clone());
        let pusher = Pusher::new(FakeSource::new(&[]), CursorStore::new(store), blocks.clone());

        assert_eq!(pusher.block("staff", "abcfrag"), "Unrecognized image caption.");
        assert_eq!(
            pusher.block("staff", "https://64.media.tumblr.com/abcfrag/s640x960/x.jpg"),
            "staff@abcfrag blocked."
        );
        assert!(blocks.is_blocked("staff", "abcfrag"));
    }
}
