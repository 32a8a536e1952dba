use std::{process::exit, sync::Arc, time::Duration};

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tumbfoxbot::{
    cache::DedupCache,
    commands::Commands,
    config::{Config, SubscriberConfig},
    delivery::Dispatcher,
    error::Result,
    http::ReqwestHttp,
    push::Pusher,
    sources::tumblr::TumblrClient,
    store::{BlockRegistry, CursorStore, SledStore, Store},
    telegram::TelegramClient,
};

#[derive(Parser)]
#[clap(version, about)]
struct Args {
    /// Toml configuration. See README for more info.
    #[clap(short, long, value_parser, default_value = "tumbfoxbot.toml")]
    config: String,

    /// Database directory. Overrides the one in config.
    #[clap(short, long, value_parser)]
    database: Option<String>,

    /// Debug logging. RUST_LOG takes precedence.
    #[clap(short, long, value_parser, default_value_t = false)]
    verbose: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll tumblr and repost new posts to telegram.
    Run {
        /// Make a single pass, wait for all sends and exit.
        #[clap(long, value_parser, default_value_t = false)]
        once: bool,
    },
    /// Move a subscriber's cursor `seconds` back, so recent posts come again.
    /// Needs the bot stopped, a running bot takes /rewind from admins.
    Rewind {
        #[clap(value_parser)]
        chat_id: String,
        #[clap(value_parser)]
        seconds: i64,
    },
    /// Never send this image from this source again.
    /// Needs the bot stopped, a running bot takes /block from admins.
    Block {
        #[clap(value_parser)]
        source: String,
        /// Image url, e.g. https://64.media.tumblr.com/<hash>/s1280x1920/x.jpg
        #[clap(value_parser)]
        url: String,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "tumbfoxbot=debug" } else { "tumbfoxbot=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    match run(args).await {
        Ok(true) => exit(2),
        Ok(false) => {}
        Err(e) => {
            error!(error = %e, "fatal");
            exit(1);
        }
    }
}

/// Returns whether some delivery failed.
async fn run(args: Args) -> Result<bool> {
    info!("reading config from {}", args.config);
    let cfg = Config::load(&args.config)?;

    let database = args
        .database
        .or_else(|| cfg.database.clone())
        .unwrap_or_else(|| "tumbfoxbot.db".into());
    let store: Arc<dyn Store> = Arc::new(SledStore::open(&database)?);
    let cursors = CursorStore::new(store.clone());
    let blocks = BlockRegistry::new(store);

    let timeout = Duration::from_secs(cfg.telegram.timeout);
    let cache = Arc::new(DedupCache::new(Duration::from_secs(cfg.tumblr.cache_ttl)));
    let http = Arc::new(ReqwestHttp::new(timeout)?);
    let mut tumblr = TumblrClient::new(cfg.tumblr.api_key.clone(), http, cache.clone(), blocks.clone());
    if let Some(api_base) = &cfg.tumblr.api_base {
        tumblr = tumblr.with_api_base(api_base.as_str());
    }
    let pusher = Arc::new(Pusher::new(Arc::new(tumblr), cursors, blocks));

    match args.command {
        Command::Rewind { chat_id, seconds } => {
            pusher.go_back(&chat_id, seconds)?;
            println!("{chat_id} will get posts of the last {seconds} seconds again.");
            Ok(false)
        }
        Command::Block { source, url } => {
            println!("{}", pusher.block(&source, &url));
            Ok(false)
        }
        Command::Run { once } => {
            let mut tg = TelegramClient::new(cfg.telegram.token.clone(), timeout)?;
            if let Some(api_base) = &cfg.telegram.api_base {
                tg = tg.with_api_base(api_base.as_str());
            }
            let tg = Arc::new(tg);
            let dispatcher = Dispatcher::new(tg.clone());

            if once {
                return Ok(poll_once(&pusher, &dispatcher, &cfg.subscribers).await);
            }

            let purger = cache.spawn_purger(Duration::from_secs(cfg.tumblr.cache_purge));
            let commands = if cfg.telegram.admins.is_empty() {
                None
            } else {
                let commands = Commands::new(pusher.clone(), cfg.subscribers.clone(), cfg.telegram.admins.clone());
                Some(tokio::spawn(commands.serve(tg.clone(), timeout)))
            };
            let mut ticker = tokio::time::interval(Duration::from_secs(cfg.interval));

            info!(subscribers = cfg.subscribers.len(), interval = cfg.interval, "polling started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for sub in &cfg.subscribers {
                            let messages = pusher.push_for(&sub.chat_id, &sub.follows).await;
                            // not awaited, failures are logged by the tasks
                            let deliveries = dispatcher.deliver_all(&sub.chat_id, messages);
                            if !deliveries.is_empty() {
                                info!(chat = %sub.chat_id, count = deliveries.len(), "delivering");
                            }
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("shutting down");
                        break;
                    }
                }
            }

            purger.abort();
            if let Some(commands) = commands {
                commands.abort();
            }
            Ok(false)
        }
    }
}

async fn poll_once(pusher: &Pusher, dispatcher: &Dispatcher, subscribers: &[SubscriberConfig]) -> bool {
    let mut failed = false;

    for sub in subscribers {
        let messages = pusher.push_for(&sub.chat_id, &sub.follows).await;
        let outcomes = dispatcher.deliver_all(&sub.chat_id, messages).join().await;

        let failures = outcomes.iter().filter(|o| o.is_err()).count();
        info!(chat = %sub.chat_id, sent = outcomes.len() - failures, failures, "pass finished");
        failed |= failures > 0;
    }

    failed
}
