use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::SubscriberConfig;
use crate::delivery::Transport;
use crate::push::Pusher;
use crate::telegram::{TelegramClient, User};

const HELP: &str = "/rewind <seconds> - deliver posts of the last <seconds> again\n\
                    /block <url> - never send this image from the blogs this chat follows\n\
                    /block <blog> <url> - never send this image from <blog>";

/// Admin commands handled by the running bot, so the database stays owned
/// by one process.
pub struct Commands {
    pusher: Arc<Pusher>,
    subscribers: Vec<SubscriberConfig>,
    /// Telegram user ids or usernames.
    admins: Vec<String>,
}

impl Commands {
    pub fn new(pusher: Arc<Pusher>, subscribers: Vec<SubscriberConfig>, admins: Vec<String>) -> Self {
        Self { pusher, subscribers, admins }
    }

    pub fn is_admin(&self, user: &User) -> bool {
        let id = user.id.to_string();
        self.admins.iter().any(|admin| {
            *admin == id || user.username.as_deref() == Some(admin.trim_start_matches('@'))
        })
    }

    /// Runs the command in `text` for `chat`. `None` if `text` is no command of ours.
    pub fn handle(&self, chat: &str, text: &str) -> Option<String> {
        let mut words = text.split_whitespace();
        let command = words.next()?.strip_prefix('/')?;
        // `/rewind@botname` in groups
        let command = command.split('@').next().unwrap_or(command);
        let args: Vec<&str> = words.collect();

        match command {
            "rewind" => Some(self.rewind(chat, &args)),
            "block" => Some(self.block(chat, &args)),
            "help" | "start" => Some(HELP.into()),
            _ => None,
        }
    }

    fn rewind(&self, chat: &str, args: &[&str]) -> String {
        let seconds = match args {
            [seconds] => match seconds.parse::<i64>() {
                Ok(seconds) => seconds,
                Err(_) => return "Usage: /rewind <seconds>".into(),
            },
            _ => return "Usage: /rewind <seconds>".into(),
        };

        match self.pusher.go_back(chat, seconds) {
            Ok(()) => format!("Going back {seconds} seconds."),
            Err(e) => format!("Failed: {e}"),
        }
    }

    fn block(&self, chat: &str, args: &[&str]) -> String {
        match args {
            [url] => {
                let follows = self
                    .subscribers
                    .iter()
                    .find(|sub| sub.chat_id == chat)
                    .map(|sub| sub.follows.as_slice())
                    .unwrap_or_default();

                if follows.is_empty() {
                    return "This chat follows no blogs, use /block <blog> <url>.".into();
                }

                follows
                    .iter()
                    .map(|source| self.pusher.block(source, url))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            [source, url] => self.pusher.block(source, url),
            _ => "Usage: /block [blog] <url>".into(),
        }
    }

    /// Long polls telegram for admin commands until the task is aborted.
    pub async fn serve(self, telegram: Arc<TelegramClient>, wait: Duration) {
        let mut offset = 0;

        info!(admins = self.admins.len(), "listening for commands");
        loop {
            let updates = match telegram.get_updates(offset, wait).await {
                Ok(updates) => updates,
                Err(e) => {
                    warn!(error = %e, "failed to get updates");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);

                let message = match update.message {
                    Some(message) => message,
                    None => continue,
                };
                let (text, from) = match (message.text, message.from) {
                    (Some(text), Some(from)) => (text, from),
                    _ => continue,
                };
                let chat = message.chat.id.to_string();

                if !self.is_admin(&from) {
                    debug!(%chat, user = from.id, "ignoring message from non-admin");
                    continue;
                }

                if let Some(reply) = self.handle(&chat, &text) {
                    info!(%chat, %text, "command handled");
                    if let Err(e) = telegram.send_text(&chat, &reply).await {
                        warn!(%chat, error = %e, "failed to answer command");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::error::Result;
    use crate::sources::{ReplyMessage, TimelineSource};
    use crate::store::{temporary_store, BlockRegistry, CursorStore};

    struct NoPosts;

    #[async_trait]
    impl TimelineSource for NoPosts {
        async fn fetch_since(&self, _source: &str, _since: i64) -> Result<Vec<ReplyMessage>> {
            Ok(vec![])
        }
    }

    fn commands() -> (Commands, CursorStore, BlockRegistry) {
        let store = temporary_store();
        let cursors = CursorStore::new(store.clone());
        let blocks = BlockRegistry::new(store);
        let pusher = Pusher::new(Arc::new(NoPosts), cursors.clone(), blocks.clone()).with_clock(|| 1_700_000_000);
        let subscribers = vec![SubscriberConfig {
            chat_id: "-100".into(),
            follows: vec!["staff".into(), "art".into()],
        }];

        (Commands::new(Arc::new(pusher), subscribers, vec!["42".into(), "@fox".into()]), cursors, blocks)
    }

    #[test]
    fn rewind_moves_chat_cursor() {
        let (commands, cursors, _) = commands();

        let reply = commands.handle("-100", "/rewind@tumbfoxbot 3600").unwrap();

        assert_eq!(reply, "Going back 3600 seconds.");
        assert_eq!(cursors.get("-100").unwrap(), 1_699_996_400);
    }

    #[test]
    fn rewind_rejects_bad_input() {
        let (commands, cursors, _) = commands();

        assert_eq!(commands.handle("-100", "/rewind").unwrap(), "Usage: /rewind <seconds>");
        assert_eq!(commands.handle("-100", "/rewind soon").unwrap(), "Usage: /rewind <seconds>");
        assert!(commands.handle("-100", "/rewind 99999999999").unwrap().starts_with("Failed: invalid argument"));
        assert_eq!(cursors.get("-100").unwrap(), 0);
    }

    #[test]
    fn block_without_blog_covers_all_follows() {
        let (commands, _, blocks) = commands();

        let reply = commands.handle("-100", "/block https://64.media.tumblr.com/abcfrag/s640x960/x.jpg").unwrap();

        assert_eq!(reply, "staff@abcfrag blocked.\nart@abcfrag blocked.");
        assert!(blocks.is_blocked("staff", "abcfrag"));
        assert!(blocks.is_blocked("art", "abcfrag"));
    }

    #[test]
    fn block_with_blog() {
        let (commands, _, blocks) = commands();

        let reply = commands.handle("-5", "/block other https://64.media.tumblr.com/abcfrag/x.jpg").unwrap();

        assert_eq!(reply, "other@abcfrag blocked.");
        assert!(!blocks.is_blocked("staff", "abcfrag"));
        assert_eq!(
            commands.handle("-5", "/block https://64.media.tumblr.com/abcfrag/x.jpg").unwrap(),
            "This chat follows no blogs, use /block <blog> <url>."
        );
        assert_eq!(commands.handle("-100", "/block abcfrag").unwrap(), "Unrecognized image caption.\nUnrecognized image caption.");
    }

    #[test]
    fn other_text_is_ignored() {
        let (commands, _, _) = commands();

        assert!(commands.handle("-100", "hello").is_none());
        assert!(commands.handle("-100", "/unknown 1").is_none());
        assert!(commands.handle("-100", "").is_none());
        assert_eq!(commands.handle("-100", "/help").unwrap(), HELP);
    }

    #[test]
    fn admins_by_id_or_username() {
        let (commands, _, _) = commands();

        assert!(commands.is_admin(&User { id: 42, username: None }));
        assert!(commands.is_admin(&User { id: 7, username: Some("fox".into()) }));
        assert!(!commands.is_admin(&User { id: 7, username: Some("wolf".into()) }));
        assert!(!commands.is_admin(&User { id: 7, username: None }));
    }
}
