//! Reposts new tumblr photo and video posts to telegram chats.
//!
//! `sources` turns blog timelines into [`sources::ReplyMessage`]s, `push`
//! tracks what every subscriber has already seen and `delivery` sends the
//! result through a [`delivery::Transport`] such as [`telegram::TelegramClient`].

pub mod cache;
pub mod commands;
pub mod config;
pub mod delivery;
pub mod error;
pub mod http;
pub mod push;
pub mod sources;
pub mod store;
pub mod telegram;
